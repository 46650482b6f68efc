//! Datastore ports and their adapters.
//!
//! Every multi-step write (registration, quota-bound issuance, feed
//! retention, like toggling) is a single port call so adapters can run it
//! atomically.
mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::access_code::AccessCode;
use crate::error::Result;
use crate::feed::Post;
use crate::ledger::{Transaction, TransactionUpdate};
use crate::notification::Notification;
use crate::principal::{Principal, Role};

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "coinfolio";
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Result of inserting an access code.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueOutcome {
    Issued(AccessCode),
    /// Another code already uses this value.
    Collision,
    /// The issuing user already created as many codes as allowed.
    QuotaExceeded,
}

/// Result of consuming an access code for a new user.
#[derive(Debug, Clone, PartialEq)]
pub enum RedeemOutcome {
    Registered(Principal),
    UsernameTaken,
    /// Code got used, deactivated or expired meanwhile.
    CodeUnavailable,
}

/// State of a like after a toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeState {
    pub liked: bool,
    pub likes_count: i32,
}

/// Port for principal persistence.
#[async_trait]
pub trait PrincipalRepository: Send + Sync {
    /// Find a principal by its unique username.
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>>;

    /// Find a principal by ID.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>>;

    /// Every principal, newest first.
    async fn list(&self) -> Result<Vec<Principal>>;

    /// Insert a principal. Returns `false` if the username exists.
    async fn insert(&self, principal: &Principal) -> Result<bool>;

    /// Whether a main administrator exists.
    async fn has_main_admin(&self) -> Result<bool>;

    /// Set `to` on the principal only if its current role is `from`.
    async fn change_role(&self, id: Uuid, from: Role, to: Role) -> Result<bool>;
}

/// Port for access code persistence.
#[async_trait]
pub trait AccessCodeRepository: Send + Sync {
    async fn find_by_code(&self, code: &str) -> Result<Option<AccessCode>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccessCode>>;

    /// Every code, newest first.
    async fn list(&self) -> Result<Vec<AccessCode>>;

    /// Codes created by a user, newest first.
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<AccessCode>>;

    /// Insert a code. When `quota` is set, the issuing user's counter is
    /// incremented in the same transaction, only while below `quota`.
    async fn insert(&self, code: &AccessCode, quota: Option<i32>) -> Result<IssueOutcome>;

    /// Create `user` and consume the code in one transaction.
    async fn redeem(
        &self,
        code_id: Uuid,
        user: &Principal,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome>;

    /// Returns `false` if the code does not exist.
    async fn deactivate(&self, id: Uuid) -> Result<bool>;
}

/// Port for portfolio transactions.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, transaction: &Transaction) -> Result<()>;

    /// Transactions of a user, newest first.
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Transaction>>;

    /// Update a transaction owned by `user_id`.
    async fn update(
        &self,
        id: Uuid,
        user_id: Uuid,
        update: &TransactionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>>;

    /// Delete a transaction owned by `user_id`.
    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool>;
}

/// Port for the announcement feed.
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Insert a post then delete all but the `keep` newest.
    async fn create(&self, post: &Post, keep: usize) -> Result<()>;

    /// Newest posts first.
    async fn latest(&self, limit: usize) -> Result<Vec<Post>>;

    /// Among `post_ids`, those liked by `user_id`.
    async fn liked_by(&self, user_id: Uuid, post_ids: &[Uuid]) -> Result<Vec<Uuid>>;

    /// Flip the like of `user_id` on `post_id`. `None` if the post is gone.
    async fn toggle_like(&self, user_id: Uuid, post_id: Uuid) -> Result<Option<LikeState>>;
}

/// Port for broadcast notifications.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<()>;

    /// Every notification, newest first.
    async fn list(&self) -> Result<Vec<Notification>>;

    /// Active notifications, newest first.
    async fn list_active(&self, limit: usize) -> Result<Vec<Notification>>;

    async fn deactivate(&self, id: Uuid) -> Result<bool>;
}

/// Custom db structure to pass to Axum.
#[derive(Clone)]
pub struct Database {
    pub principals: Arc<dyn PrincipalRepository>,
    pub codes: Arc<dyn AccessCodeRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub posts: Arc<dyn PostRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
}

impl Database {
    /// Init database connections and run migrations.
    pub async fn postgres(
        hostname: &str,
        username: &str,
        password: &str,
        db: &str,
        pool: u32,
    ) -> Result<Self> {
        let store = PostgresStore::connect(hostname, username, password, db, pool).await?;
        store.migrate().await?;

        Ok(Self::from_store(Arc::new(store)))
    }

    /// Process-local datastore. Data is lost on restart.
    pub fn memory() -> Self {
        Self::from_store(Arc::new(MemoryStore::default()))
    }

    fn from_store<S>(store: Arc<S>) -> Self
    where
        S: PrincipalRepository
            + AccessCodeRepository
            + TransactionRepository
            + PostRepository
            + NotificationRepository
            + 'static,
    {
        Self {
            principals: store.clone(),
            codes: store.clone(),
            transactions: store.clone(),
            posts: store.clone(),
            notifications: store,
        }
    }
}
