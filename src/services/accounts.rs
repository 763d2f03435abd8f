use uuid::Uuid;

use crate::db::TicketingStore;
use crate::error::{AppError, Result};
use crate::models::user::{CreateUserData, Role, User};
use crate::services::credentials;
use crate::services::policy::{self, Action, Actor};

/// Registration input after JSON decoding
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub wallet_address: Option<String>,
    pub role: Option<Role>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Creates an account. Self-service sign-up may pick `user` or `organizer`;
/// admins are appointed through [`change_role`] or the bootstrap email.
#[tracing::instrument(skip(store, registration, bootstrap_admin_email), fields(username = %registration.username))]
pub async fn register(
    store: &dyn TicketingStore,
    registration: Registration,
    bootstrap_admin_email: Option<&str>,
) -> Result<User> {
    let username = registration.username.trim().to_string();
    let email = registration.email.trim().to_lowercase();
    let wallet_address = non_empty(registration.wallet_address);

    if username.is_empty() {
        return Err(AppError::Validation("Username is required".to_string()));
    }
    if !email.contains('@') {
        return Err(AppError::Validation(
            "A valid email address is required".to_string(),
        ));
    }

    let mut role = match registration.role.unwrap_or_default() {
        Role::Admin => {
            return Err(AppError::Validation(
                "The admin role cannot be self-assigned".to_string(),
            ))
        }
        role => role,
    };
    if bootstrap_admin_email.is_some_and(|admin| admin.eq_ignore_ascii_case(&email)) {
        role = Role::Admin;
    }

    if store
        .find_conflicting_user(&username, &email, wallet_address.as_deref())
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(
            "User with this username, email or wallet address already exists".to_string(),
        ));
    }

    let password = registration.password;
    let password_hash = tokio::task::spawn_blocking(move || credentials::hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Password hashing task failed: {e}")))??;

    let user = store
        .insert_user(CreateUserData {
            username,
            email,
            wallet_address,
            role,
            password_hash,
        })
        .await?;

    tracing::info!(user_id = %user.id, role = ?user.role, "User registered");

    Ok(user)
}

/// Checks email and password. Unknown emails and wrong passwords produce
/// the same error. Hashing runs on the blocking pool.
pub async fn login(store: &dyn TicketingStore, email: &str, password: &str) -> Result<User> {
    let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

    let user = store
        .find_user_by_email(email.trim())
        .await?
        .ok_or_else(invalid)?;

    let password = password.to_string();
    let stored = user.password_hash.clone();
    let matches = tokio::task::spawn_blocking(move || credentials::verify_password(&password, &stored))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Password check task failed: {e}")))?;

    if !matches {
        tracing::debug!(user_id = %user.id, "Password mismatch");
        return Err(invalid());
    }

    Ok(user)
}

pub async fn find_by_wallet_address(store: &dyn TicketingStore, address: &str) -> Result<User> {
    store
        .find_user_by_wallet_address(address.trim())
        .await?
        .ok_or_else(|| AppError::not_found("User"))
}

pub async fn change_role(
    store: &dyn TicketingStore,
    actor: &Actor,
    user_id: Uuid,
    role: Role,
) -> Result<User> {
    policy::require_role(actor, &[Role::Admin], Action::ChangeRole)?;

    let user = store
        .update_user_role(user_id, role)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    tracing::info!(user_id = %user.id, role = ?role, changed_by = %actor.id, "User role changed");

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;

    fn registration(username: &str, email: &str) -> Registration {
        Registration {
            username: username.to_string(),
            email: email.to_string(),
            password: "s3cret-passphrase".to_string(),
            wallet_address: None,
            role: None,
        }
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let store = MemoryStore::new();
        let user = register(&store, registration("alice", " Alice@Example.com "), None)
            .await
            .unwrap();

        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.role, Role::User);

        let logged_in = login(&store, "ALICE@example.com", "s3cret-passphrase")
            .await
            .unwrap();
        assert_eq!(logged_in.id, user.id);

        let err = login(&store, "alice@example.com", "wrong-passphrase")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_duplicate_identity_conflicts() {
        let store = MemoryStore::new();
        register(&store, registration("alice", "alice@example.com"), None)
            .await
            .unwrap();

        let err = register(&store, registration("alice", "other@example.com"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = register(&store, registration("bob", "ALICE@example.com"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_admin_cannot_be_self_assigned() {
        let store = MemoryStore::new();
        let mut input = registration("mallory", "mallory@example.com");
        input.role = Some(Role::Admin);

        let err = register(&store, input, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_bootstrap_email_becomes_admin() {
        let store = MemoryStore::new();
        let user = register(
            &store,
            registration("root", "ops@example.com"),
            Some("OPS@example.com"),
        )
        .await
        .unwrap();

        assert_eq!(user.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_wallet_lookup() {
        let store = MemoryStore::new();
        let mut input = registration("carol", "carol@example.com");
        input.wallet_address = Some("0xabc".to_string());
        let carol = register(&store, input, None).await.unwrap();

        assert_eq!(find_by_wallet_address(&store, "0xabc").await.unwrap().id, carol.id);
        assert!(matches!(
            find_by_wallet_address(&store, "0xdef").await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_only_admin_changes_roles() {
        let store = MemoryStore::new();
        let user = register(&store, registration("dave", "dave@example.com"), None)
            .await
            .unwrap();

        let organizer = Actor {
            id: Uuid::new_v4(),
            role: Role::Organizer,
        };
        let err = change_role(&store, &organizer, user.id, Role::Organizer)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let admin = Actor {
            id: Uuid::new_v4(),
            role: Role::Admin,
        };
        let updated = change_role(&store, &admin, user.id, Role::Organizer)
            .await
            .unwrap();
        assert_eq!(updated.role, Role::Organizer);
    }
}
