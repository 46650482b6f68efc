//! Users and administrators.
mod service;

pub use service::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifetime number of access codes a user may issue.
pub const USER_CODE_QUOTA: i32 = 3;

/// Role of a [`Principal`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "principal_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    /// The single administrator allowed to demote other administrators.
    MainAdmin,
}

impl Role {
    /// Session kind granted to this role.
    pub fn kind(self) -> PrincipalKind {
        match self {
            Role::User => PrincipalKind::User,
            Role::Admin | Role::MainAdmin => PrincipalKind::Admin,
        }
    }
}

/// Kind of principal carried by a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    Admin,
}

/// Principal as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    #[serde(skip)]
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub codes_created_count: i32,
    pub created_at: DateTime<Utc>,
}

impl Principal {
    /// Create a new active [`Principal`].
    pub fn new(
        username: impl Into<String>,
        password_hash: impl Into<String>,
        role: Role,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            password_hash: password_hash.into(),
            role,
            is_active: true,
            codes_created_count: 0,
            created_at: now,
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        self.role.kind()
    }

    pub fn is_main_admin(&self) -> bool {
        self.role == Role::MainAdmin
    }

    /// Whether this user reached its access code quota.
    pub fn quota_reached(&self) -> bool {
        self.codes_created_count >= USER_CODE_QUOTA
    }
}
