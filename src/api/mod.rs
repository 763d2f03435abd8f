// API module - HTTP endpoints

use axum::{routing::get, Router};

use middleware::session::AppState;

pub mod auth;
pub mod events;
pub mod extract;
pub mod health;
pub mod middleware;
pub mod response;
pub mod tickets;
pub mod users;


/// Every JSON endpoint, mounted under `/api`, plus `/health`
pub fn router() -> Router<AppState> {
    let api = Router::new()
        .merge(auth::router())
        .merge(users::router())
        .merge(events::router())
        .merge(tickets::router());

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api)
}
