use uuid::Uuid;

use super::{Principal, PrincipalKind, Role};
use crate::clock::Clock;
use crate::config::Admin as AdminConfig;
use crate::crypto::PasswordManager;
use crate::database::Database;
use crate::error::{Result, ServerError};

fn principal_not_found() -> ServerError {
    ServerError::field("id", "not_found", "User not found.")
}

/// Check credentials against the active principal of the given kind.
///
/// Unknown usernames, inactive accounts, other kinds and wrong passwords are
/// all reported the same way.
pub async fn verify(
    db: &Database,
    pwd: &PasswordManager,
    kind: PrincipalKind,
    username: &str,
    password: &str,
) -> Result<Option<Principal>> {
    let Some(principal) = db.principals.find_by_username(username).await?
    else {
        return Ok(None);
    };

    if !principal.is_active || principal.kind() != kind {
        return Ok(None);
    }

    if !pwd.verify_password(password, &principal.password_hash) {
        return Ok(None);
    }

    Ok(Some(principal))
}

/// Log in as an administrator, else as a user.
pub async fn login(
    db: &Database,
    pwd: &PasswordManager,
    username: &str,
    password: &str,
) -> Result<Principal> {
    for kind in [PrincipalKind::Admin, PrincipalKind::User] {
        if let Some(principal) =
            verify(db, pwd, kind, username, password).await?
        {
            return Ok(principal);
        }
    }

    Err(ServerError::InvalidCredentials)
}

/// Log in through the administration entry point.
pub async fn admin_login(
    db: &Database,
    pwd: &PasswordManager,
    username: &str,
    password: &str,
) -> Result<Principal> {
    verify(db, pwd, PrincipalKind::Admin, username, password)
        .await?
        .ok_or(ServerError::InvalidCredentials)
}

/// Create the configured main administrator when there is none yet.
pub async fn bootstrap_main_admin(
    db: &Database,
    pwd: &PasswordManager,
    clock: &dyn Clock,
    config: Option<&AdminConfig>,
) -> Result<Option<Principal>> {
    if db.principals.has_main_admin().await? {
        return Ok(None);
    }

    let Some(config) = config else {
        tracing::warn!(
            "no main administrator exists and no `admin` section is configured"
        );
        return Ok(None);
    };

    let hash = pwd.hash_password(&config.password)?;
    let admin =
        Principal::new(&config.username, hash, Role::MainAdmin, clock.now());

    if !db.principals.insert(&admin).await? {
        return Err(ServerError::internal(format!(
            "cannot create main administrator, username {} is taken",
            config.username
        )));
    }

    tracing::info!(username = %admin.username, "main administrator created");
    Ok(Some(admin))
}

/// Grant administration rights to a user.
pub async fn promote(db: &Database, target: Uuid) -> Result<()> {
    if db.principals.change_role(target, Role::User, Role::Admin).await? {
        tracing::info!(%target, "user promoted to administrator");
        return Ok(());
    }

    match db.principals.find_by_id(target).await? {
        Some(_) => Err(ServerError::field(
            "id",
            "not_user",
            "Only users can be promoted.",
        )),
        None => Err(principal_not_found()),
    }
}

/// Turn an administrator back into a user. Reserved to the main
/// administrator, who cannot be demoted.
pub async fn demote(db: &Database, actor: Uuid, target: Uuid) -> Result<()> {
    let is_main_admin = db
        .principals
        .find_by_id(actor)
        .await?
        .is_some_and(|principal| principal.is_main_admin());
    if !is_main_admin {
        return Err(ServerError::AccessDenied);
    }

    if db.principals.change_role(target, Role::Admin, Role::User).await? {
        tracing::info!(%target, "administrator demoted to user");
        return Ok(());
    }

    match db.principals.find_by_id(target).await? {
        Some(_) => Err(ServerError::field(
            "id",
            "not_admin",
            "Only administrators can be demoted.",
        )),
        None => Err(principal_not_found()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::crypto::tests::fast_argon;
    use chrono::Utc;

    fn setup() -> (Database, PasswordManager, FixedClock) {
        (
            Database::memory(),
            PasswordManager::new(Some(fast_argon())).unwrap(),
            FixedClock::new(Utc::now()),
        )
    }

    async fn seed(
        db: &Database,
        pwd: &PasswordManager,
        username: &str,
        role: Role,
    ) -> Principal {
        let hash = pwd.hash_password("password123").unwrap();
        let principal = Principal::new(username, hash, role, Utc::now());
        assert!(db.principals.insert(&principal).await.unwrap());
        principal
    }

    #[tokio::test]
    async fn test_bootstrapped_admin_logs_in() {
        let (db, pwd, clock) = setup();
        let config = AdminConfig {
            username: "root".into(),
            password: "correct horse battery".into(),
        };

        let admin = bootstrap_main_admin(&db, &pwd, &clock, Some(&config))
            .await
            .unwrap()
            .unwrap();
        assert!(admin.is_main_admin());
        assert!(admin.password_hash.starts_with("$argon2id$"));

        // Runs once.
        assert!(
            bootstrap_main_admin(&db, &pwd, &clock, Some(&config))
                .await
                .unwrap()
                .is_none()
        );

        let logged = login(&db, &pwd, "root", "correct horse battery")
            .await
            .unwrap();
        assert_eq!(logged.id, admin.id);
        assert_eq!(logged.kind(), PrincipalKind::Admin);

        let err = login(&db, &pwd, "root", "admin123").await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_login_falls_back_to_user() {
        let (db, pwd, _) = setup();
        let user = seed(&db, &pwd, "alice", Role::User).await;

        let logged = login(&db, &pwd, "alice", "password123").await.unwrap();
        assert_eq!(logged.id, user.id);
        assert_eq!(logged.kind(), PrincipalKind::User);

        let err = admin_login(&db, &pwd, "alice", "password123")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidCredentials));

        let err = login(&db, &pwd, "nobody", "password123").await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_inactive_principal_cannot_log_in() {
        let (db, pwd, _) = setup();
        let mut principal = Principal::new(
            "ghost",
            pwd.hash_password("password123").unwrap(),
            Role::User,
            Utc::now(),
        );
        principal.is_active = false;
        db.principals.insert(&principal).await.unwrap();

        assert!(
            verify(&db, &pwd, PrincipalKind::User, "ghost", "password123")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_promote_and_demote() {
        let (db, pwd, _) = setup();
        let main = seed(&db, &pwd, "root", Role::MainAdmin).await;
        let admin = seed(&db, &pwd, "helper", Role::Admin).await;
        let user = seed(&db, &pwd, "alice", Role::User).await;

        promote(&db, user.id).await.unwrap();
        let promoted = db.principals.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(promoted.role, Role::Admin);

        // Already an administrator.
        assert!(matches!(
            promote(&db, user.id).await.unwrap_err(),
            ServerError::Validation(_)
        ));

        // A plain administrator cannot demote.
        assert!(matches!(
            demote(&db, admin.id, user.id).await.unwrap_err(),
            ServerError::AccessDenied
        ));

        demote(&db, main.id, user.id).await.unwrap();
        let demoted = db.principals.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(demoted.role, Role::User);

        // The main administrator stays.
        assert!(matches!(
            demote(&db, main.id, main.id).await.unwrap_err(),
            ServerError::Validation(_)
        ));
        assert!(matches!(
            demote(&db, main.id, Uuid::new_v4()).await.unwrap_err(),
            ServerError::Validation(_)
        ));
    }
}
