//! Invitation codes gating registration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::crypto::generate_access_code;
use crate::database::{Database, IssueOutcome};
use crate::error::{Result, ServerError};
use crate::principal::{PrincipalKind, USER_CODE_QUOTA};
use crate::session::Session;

/// Attempts to find an unused code value before giving up.
const MAX_GENERATION_ATTEMPTS: usize = 5;

/// Who issued an [`AccessCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Issuer {
    Admin(Uuid),
    User(Uuid),
}

/// Access code as saved on database.
///
/// Exactly one of `created_by_admin` and `created_by_user` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AccessCode {
    pub id: Uuid,
    pub code: String,
    pub created_by_admin: Option<Uuid>,
    pub created_by_user: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub used_by_user: Option<Uuid>,
    pub used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl AccessCode {
    /// Create a new active, unused [`AccessCode`].
    pub fn new(
        code: impl Into<String>,
        issuer: Issuer,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let (created_by_admin, created_by_user) = match issuer {
            Issuer::Admin(id) => (Some(id), None),
            Issuer::User(id) => (None, Some(id)),
        };

        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            created_by_admin,
            created_by_user,
            expires_at,
            used_by_user: None,
            used_at: None,
            is_active: true,
            created_at: now,
        }
    }

    pub fn issuer(&self) -> Option<Issuer> {
        match (self.created_by_admin, self.created_by_user) {
            (Some(id), None) => Some(Issuer::Admin(id)),
            (None, Some(id)) => Some(Issuer::User(id)),
            _ => None,
        }
    }

    pub fn is_used(&self) -> bool {
        self.used_by_user.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Whether registration may consume this code.
    pub fn is_consumable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_used() && !self.is_expired(now)
    }
}

pub(crate) fn quota_reached() -> ServerError {
    ServerError::field(
        "quota",
        "quota_reached",
        "You already created the maximum of 3 access codes.",
    )
}

fn code_not_found() -> ServerError {
    ServerError::field("id", "not_found", "Access code not found.")
}

/// Issue a new code on behalf of the session principal.
pub async fn issue(
    db: &Database,
    clock: &dyn Clock,
    session: &Session,
    expires_at: Option<DateTime<Utc>>,
) -> Result<AccessCode> {
    if expires_at.is_some_and(|expires_at| expires_at <= clock.now()) {
        return Err(ServerError::field(
            "expiresAt",
            "past_expiry",
            "Expiry date must be in the future.",
        ));
    }

    match session.kind {
        PrincipalKind::Admin => {
            issue_for_admin(db, clock, session.user_id, expires_at).await
        },
        PrincipalKind::User => {
            issue_for_user(db, clock, session.user_id, expires_at).await
        },
    }
}

/// Issue a code without any quota.
pub async fn issue_for_admin(
    db: &Database,
    clock: &dyn Clock,
    admin_id: Uuid,
    expires_at: Option<DateTime<Utc>>,
) -> Result<AccessCode> {
    insert_unique(db, clock, Issuer::Admin(admin_id), expires_at, None).await
}

/// Issue a code counted against the user's lifetime quota.
pub async fn issue_for_user(
    db: &Database,
    clock: &dyn Clock,
    user_id: Uuid,
    expires_at: Option<DateTime<Utc>>,
) -> Result<AccessCode> {
    let user = db
        .principals
        .find_by_id(user_id)
        .await?
        .ok_or(ServerError::AccessDenied)?;
    if user.quota_reached() {
        return Err(quota_reached());
    }

    insert_unique(
        db,
        clock,
        Issuer::User(user.id),
        expires_at,
        Some(USER_CODE_QUOTA),
    )
    .await
}

async fn insert_unique(
    db: &Database,
    clock: &dyn Clock,
    issuer: Issuer,
    expires_at: Option<DateTime<Utc>>,
    quota: Option<i32>,
) -> Result<AccessCode> {
    for _ in 0..MAX_GENERATION_ATTEMPTS {
        let code =
            AccessCode::new(generate_access_code(), issuer, expires_at, clock.now());

        match db.codes.insert(&code, quota).await? {
            IssueOutcome::Issued(code) => {
                tracing::info!(code_id = %code.id, issuer = ?issuer, "access code issued");
                return Ok(code);
            },
            IssueOutcome::QuotaExceeded => return Err(quota_reached()),
            IssueOutcome::Collision => {
                tracing::debug!("access code collision, generating another one");
            },
        }
    }

    Err(ServerError::internal("could not generate a unique access code"))
}

/// Deactivate a code. Administrators may deactivate any code, users only
/// those they issued.
pub async fn deactivate(db: &Database, session: &Session, code_id: Uuid) -> Result<()> {
    let code = db.codes.find_by_id(code_id).await?.ok_or_else(code_not_found)?;

    let allowed = match session.kind {
        PrincipalKind::Admin => true,
        PrincipalKind::User => code.created_by_user == Some(session.user_id),
    };
    if !allowed {
        return Err(ServerError::AccessDenied);
    }

    if !db.codes.deactivate(code_id).await? {
        return Err(code_not_found());
    }

    tracing::info!(%code_id, by = %session.user_id, "access code deactivated");
    Ok(())
}
