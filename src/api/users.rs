use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, patch},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::extract::{ApiJson, ApiPath};
use crate::api::middleware::auth::CurrentUser;
use crate::api::middleware::session::AppState;
use crate::api::response;
use crate::error::Result;
use crate::models::Role;
use crate::services::accounts;

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

async fn get_by_wallet(
    State(state): State<AppState>,
    ApiPath(address): ApiPath<String>,
) -> Result<impl IntoResponse> {
    let user = accounts::find_by_wallet_address(state.store.as_ref(), &address).await?;
    Ok(response::ok(user))
}

async fn change_role(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<ChangeRoleRequest>,
) -> Result<impl IntoResponse> {
    let user = accounts::change_role(state.store.as_ref(), &actor, id, payload.role).await?;
    Ok(response::ok(user))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/wallet/:address", get(get_by_wallet))
        .route("/users/:id/role", patch(change_role))
}
