use axum::{extract::State, response::IntoResponse, routing::{get, post}, Json, Router};
use serde::Deserialize;
use tower_sessions::Session;
use uuid::Uuid;

use crate::api::extract::ApiJson;
use crate::api::middleware::auth::CurrentUser;
use crate::api::middleware::session::{AppState, SESSION_KEY_USER_ID};
use crate::api::response::{self, Envelope};
use crate::error::{AppError, Result};
use crate::models::Role;
use crate::services::accounts::{self, Registration};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub wallet_address: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Rotates the session id and binds it to the user
async fn start_session(session: &Session, user_id: Uuid) -> Result<()> {
    session
        .cycle_id()
        .await
        .map_err(|e| AppError::Session(e.to_string()))?;
    session
        .insert(SESSION_KEY_USER_ID, user_id)
        .await
        .map_err(|e| AppError::Session(e.to_string()))?;
    Ok(())
}

async fn register(
    State(state): State<AppState>,
    session: Session,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse> {
    let user = accounts::register(
        state.store.as_ref(),
        Registration {
            username: payload.username,
            email: payload.email,
            password: payload.password,
            wallet_address: payload.wallet_address,
            role: payload.role,
        },
        state.config.bootstrap_admin_email.as_deref(),
    )
    .await?;

    start_session(&session, user.id).await?;

    Ok(response::created(user))
}

async fn login(
    State(state): State<AppState>,
    session: Session,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse> {
    let user = accounts::login(state.store.as_ref(), &payload.email, &payload.password).await?;

    start_session(&session, user.id).await?;

    tracing::info!(user_id = %user.id, "User logged in");

    Ok(response::ok(user))
}

async fn logout(session: Session) -> Result<impl IntoResponse> {
    session
        .flush()
        .await
        .map_err(|e| AppError::Session(e.to_string()))?;

    Ok(Json(Envelope::new(()).with_message("Logged out")))
}

async fn me(State(state): State<AppState>, CurrentUser(actor): CurrentUser) -> Result<impl IntoResponse> {
    let user = state
        .store
        .find_user(actor.id)
        .await?
        .ok_or_else(AppError::unauthenticated)?;

    Ok(response::ok(user))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}
