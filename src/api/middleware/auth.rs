use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tower_sessions::Session;
use uuid::Uuid;

use super::session::{AppState, SESSION_KEY_USER_ID};
use crate::error::AppError;
use crate::services::policy::Actor;

/// Resolves the session's user id to an actor. The role is read fresh from
/// the store so role changes apply to existing sessions.
pub async fn authenticated_actor(session: &Session, state: &AppState) -> Result<Actor, AppError> {
    let user_id: Uuid = session
        .get(SESSION_KEY_USER_ID)
        .await
        .map_err(|e| AppError::Session(e.to_string()))?
        .ok_or_else(AppError::unauthenticated)?;

    let user = state
        .store
        .find_user(user_id)
        .await?
        .ok_or_else(AppError::unauthenticated)?;

    Ok(Actor::from(&user))
}

/// Extractor for handlers that require a logged-in user
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Actor);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, msg)| AppError::Session(msg.to_string()))?;

        authenticated_actor(&session, state).await.map(CurrentUser)
    }
}
