//! Invite-only sign up.

use serde::Deserialize;
use validator::Validate;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::clock::Clock;
use crate::crypto::{PasswordManager, is_access_code_format};
use crate::database::{Database, RedeemOutcome};
use crate::error::{Result, ServerError};
use crate::principal::{Principal, Role};

/// Body of a sign up request.
#[derive(Deserialize, Validate, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct RegisterForm {
    #[validate(
        length(min = 3, max = 32, message = "Username must be 3 to 32 characters long."),
        custom(
            function = "crate::router::validate_username",
            message = "Username may only contain letters, digits, '_', '.' and '-'."
        )
    )]
    pub username: String,
    #[validate(length(
        min = 8,
        max = 255,
        message = "Password must be 8 to 255 characters long."
    ))]
    pub password: String,
    #[validate(length(min = 1, message = "Access code is required."))]
    pub access_code: String,
}

fn invalid_code() -> ServerError {
    ServerError::field(
        "accessCode",
        "invalid_code",
        "Invalid or already used access code.",
    )
}

fn expired_code() -> ServerError {
    ServerError::field("accessCode", "expired_code", "Access code expired.")
}

fn username_taken() -> ServerError {
    ServerError::field("username", "username_taken", "Username already exists.")
}

/// Create a user consuming `form.access_code`.
///
/// Checks run in order and stop at the first failure: code exists, is active
/// and unused; code is not expired; username is free. The user insertion and
/// the code consumption are then committed together.
pub async fn register(
    db: &Database,
    pwd: &PasswordManager,
    clock: &dyn Clock,
    form: &RegisterForm,
) -> Result<Principal> {
    let code = form.access_code.trim().to_uppercase();
    if !is_access_code_format(&code) {
        return Err(invalid_code());
    }

    let access_code = db.codes.find_by_code(&code).await?.ok_or_else(invalid_code)?;
    if !access_code.is_active || access_code.is_used() {
        return Err(invalid_code());
    }

    let now = clock.now();
    if access_code.is_expired(now) {
        return Err(expired_code());
    }

    if db.principals.find_by_username(&form.username).await?.is_some() {
        return Err(username_taken());
    }

    let hash = pwd.hash_password(&form.password)?;
    let user = Principal::new(&form.username, hash, Role::User, now);

    match db.codes.redeem(access_code.id, &user, now).await? {
        RedeemOutcome::Registered(user) => {
            tracing::info!(user_id = %user.id, code_id = %access_code.id, "user registered");
            Ok(user)
        },
        RedeemOutcome::UsernameTaken => Err(username_taken()),
        RedeemOutcome::CodeUnavailable => Err(invalid_code()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_code::{AccessCode, Issuer};
    use crate::clock::FixedClock;
    use crate::crypto::tests::fast_argon;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn form(username: &str, code: &str) -> RegisterForm {
        RegisterForm {
            username: username.into(),
            password: "password123".into(),
            access_code: code.into(),
        }
    }

    fn message(err: ServerError) -> String {
        let ServerError::Validation(errors) = err else {
            panic!("expected a validation error, got {err:?}");
        };
        errors
            .field_errors()
            .values()
            .flat_map(|errors| errors.iter())
            .filter_map(|error| error.message.as_ref().map(|m| m.to_string()))
            .next()
            .unwrap()
    }

    async fn seed_code(
        db: &Database,
        code: &str,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> AccessCode {
        let code = AccessCode::new(code, Issuer::Admin(Uuid::new_v4()), expires_at, Utc::now());
        db.codes.insert(&code, None).await.unwrap();
        code
    }

    #[tokio::test]
    async fn test_code_is_consumed_once() {
        let db = Database::memory();
        let pwd = PasswordManager::new(Some(fast_argon())).unwrap();
        let clock = FixedClock::new(Utc::now());
        let code = seed_code(&db, "ABCD1234", None).await;

        let user = register(&db, &pwd, &clock, &form("alice", "abcd1234 "))
            .await
            .unwrap();
        assert_eq!(user.role, Role::User);
        assert!(pwd.verify_password("password123", &user.password_hash));

        let stored = db.codes.find_by_id(code.id).await.unwrap().unwrap();
        assert_eq!(stored.used_by_user, Some(user.id));
        assert_eq!(stored.used_at, Some(clock.now()));

        let err = register(&db, &pwd, &clock, &form("bob", "ABCD1234"))
            .await
            .unwrap_err();
        assert_eq!(message(err), "Invalid or already used access code.");
        assert!(db.principals.find_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_code_is_rejected() {
        let db = Database::memory();
        let pwd = PasswordManager::new(Some(fast_argon())).unwrap();
        let clock = FixedClock::new(Utc::now());
        let code = seed_code(&db, "EXPIRED1", Some(clock.now() - Duration::minutes(1))).await;

        let err = register(&db, &pwd, &clock, &form("alice", "EXPIRED1"))
            .await
            .unwrap_err();
        assert_eq!(message(err), "Access code expired.");

        assert!(db.principals.find_by_username("alice").await.unwrap().is_none());
        let stored = db.codes.find_by_id(code.id).await.unwrap().unwrap();
        assert!(stored.used_by_user.is_none());
    }

    #[tokio::test]
    async fn test_checks_run_in_order() {
        let db = Database::memory();
        let pwd = PasswordManager::new(Some(fast_argon())).unwrap();
        let clock = FixedClock::new(Utc::now());
        seed_code(&db, "FIRST001", None).await;
        seed_code(&db, "SECOND02", None).await;

        register(&db, &pwd, &clock, &form("alice", "FIRST001")).await.unwrap();

        // Unknown code wins over the taken username.
        let err = register(&db, &pwd, &clock, &form("alice", "UNKNOWN1"))
            .await
            .unwrap_err();
        assert_eq!(message(err), "Invalid or already used access code.");

        let err = register(&db, &pwd, &clock, &form("alice", "SECOND02"))
            .await
            .unwrap_err();
        assert_eq!(message(err), "Username already exists.");

        let err = register(&db, &pwd, &clock, &form("bob", "not a code"))
            .await
            .unwrap_err();
        assert_eq!(message(err), "Invalid or already used access code.");
    }

    #[tokio::test]
    async fn test_deactivated_code_is_rejected() {
        let db = Database::memory();
        let pwd = PasswordManager::new(Some(fast_argon())).unwrap();
        let clock = FixedClock::new(Utc::now());
        let code = seed_code(&db, "DISABLED", None).await;
        db.codes.deactivate(code.id).await.unwrap();

        let err = register(&db, &pwd, &clock, &form("alice", "DISABLED"))
            .await
            .unwrap_err();
        assert_eq!(message(err), "Invalid or already used access code.");
    }

    #[test]
    fn test_form_validation() {
        assert!(form("alice", "ABCD1234").validate().is_ok());
        assert!(form("al", "ABCD1234").validate().is_err());
        assert!(form("alice smith", "ABCD1234").validate().is_err());
        assert!(form("alice", "").validate().is_err());

        let mut short = form("alice", "ABCD1234");
        short.password = "short".into();
        assert!(short.validate().is_err());
    }
}
