//! PostgreSQL adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use super::{
    AccessCodeRepository, IssueOutcome, LikeState, NotificationRepository,
    PostRepository, PrincipalRepository, RedeemOutcome, TransactionRepository,
};
use crate::access_code::AccessCode;
use crate::error::Result;
use crate::feed::Post;
use crate::ledger::{Transaction, TransactionUpdate};
use crate::notification::Notification;
use crate::principal::{Principal, Role};

const PRINCIPAL_COLUMNS: &str =
    "id, username, password_hash, role, is_active, codes_created_count, created_at";
const CODE_COLUMNS: &str = "id, code, created_by_admin, created_by_user, expires_at, \
                            used_by_user, used_at, is_active, created_at";
const TRANSACTION_COLUMNS: &str = "id, user_id, crypto_symbol, crypto_name, amount, \
                                   price_paid, comment, created_at, updated_at";
const POST_COLUMNS: &str = "id, admin_id, admin_username, content, likes_count, created_at";
const NOTIFICATION_COLUMNS: &str = "id, message, created_by_admin, is_active, created_at";

fn limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// PostgreSQL datastore.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Open a connection pool.
    pub async fn connect(
        hostname: &str,
        username: &str,
        password: &str,
        db: &str,
        pool: u32,
    ) -> Result<Self> {
        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let pool = PgPoolOptions::new()
            .max_connections(pool)
            .connect(&addr)
            .await?;

        tracing::info!(%hostname, %db, "postgres connected");

        Ok(Self { pool })
    }

    /// Create a new [`PostgresStore`] over an existing pool.
    #[cfg(test)]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;

        Ok(())
    }
}

#[async_trait]
impl PrincipalRepository for PostgresStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>> {
        let principal = sqlx::query_as::<_, Principal>(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(principal)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>> {
        let principal = sqlx::query_as::<_, Principal>(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(principal)
    }

    async fn list(&self) -> Result<Vec<Principal>> {
        let principals = sqlx::query_as::<_, Principal>(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(principals)
    }

    async fn insert(&self, principal: &Principal) -> Result<bool> {
        let result = sqlx::query(&format!(
            r#"INSERT INTO principals ({PRINCIPAL_COLUMNS})
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (username) DO NOTHING"#
        ))
        .bind(principal.id)
        .bind(&principal.username)
        .bind(&principal.password_hash)
        .bind(principal.role)
        .bind(principal.is_active)
        .bind(principal.codes_created_count)
        .bind(principal.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn has_main_admin(&self) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM principals WHERE role = $1)",
        )
        .bind(Role::MainAdmin)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn change_role(&self, id: Uuid, from: Role, to: Role) -> Result<bool> {
        let result =
            sqlx::query("UPDATE principals SET role = $3 WHERE id = $1 AND role = $2")
                .bind(id)
                .bind(from)
                .bind(to)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl AccessCodeRepository for PostgresStore {
    async fn find_by_code(&self, code: &str) -> Result<Option<AccessCode>> {
        let code = sqlx::query_as::<_, AccessCode>(&format!(
            "SELECT {CODE_COLUMNS} FROM access_codes WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(code)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccessCode>> {
        let code = sqlx::query_as::<_, AccessCode>(&format!(
            "SELECT {CODE_COLUMNS} FROM access_codes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(code)
    }

    async fn list(&self) -> Result<Vec<AccessCode>> {
        let codes = sqlx::query_as::<_, AccessCode>(&format!(
            "SELECT {CODE_COLUMNS} FROM access_codes ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(codes)
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<AccessCode>> {
        let codes = sqlx::query_as::<_, AccessCode>(&format!(
            r#"SELECT {CODE_COLUMNS} FROM access_codes
                WHERE created_by_user = $1
                ORDER BY created_at DESC"#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(codes)
    }

    async fn insert(&self, code: &AccessCode, quota: Option<i32>) -> Result<IssueOutcome> {
        let mut tx = self.pool.begin().await?;

        if let Some(quota) = quota {
            let result = sqlx::query(
                r#"UPDATE principals SET codes_created_count = codes_created_count + 1
                    WHERE id = $1 AND codes_created_count < $2"#,
            )
            .bind(code.created_by_user)
            .bind(quota)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() != 1 {
                tx.rollback().await?;
                return Ok(IssueOutcome::QuotaExceeded);
            }
        }

        let result = sqlx::query(&format!(
            r#"INSERT INTO access_codes ({CODE_COLUMNS})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (code) DO NOTHING"#
        ))
        .bind(code.id)
        .bind(&code.code)
        .bind(code.created_by_admin)
        .bind(code.created_by_user)
        .bind(code.expires_at)
        .bind(code.used_by_user)
        .bind(code.used_at)
        .bind(code.is_active)
        .bind(code.created_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(IssueOutcome::Collision);
        }

        tx.commit().await?;
        Ok(IssueOutcome::Issued(code.clone()))
    }

    async fn redeem(
        &self,
        code_id: Uuid,
        user: &Principal,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE access_codes SET used_by_user = $2, used_at = $3
                WHERE id = $1
                    AND is_active
                    AND used_by_user IS NULL
                    AND (expires_at IS NULL OR expires_at > $3)"#,
        )
        .bind(code_id)
        .bind(user.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(RedeemOutcome::CodeUnavailable);
        }

        let result = sqlx::query(&format!(
            r#"INSERT INTO principals ({PRINCIPAL_COLUMNS})
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (username) DO NOTHING"#
        ))
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.is_active)
        .bind(user.codes_created_count)
        .bind(user.created_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(RedeemOutcome::UsernameTaken);
        }

        tx.commit().await?;
        Ok(RedeemOutcome::Registered(user.clone()))
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE access_codes SET is_active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl TransactionRepository for PostgresStore {
    async fn insert(&self, transaction: &Transaction) -> Result<()> {
        sqlx::query(&format!(
            r#"INSERT INTO transactions ({TRANSACTION_COLUMNS})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#
        ))
        .bind(transaction.id)
        .bind(transaction.user_id)
        .bind(&transaction.crypto_symbol)
        .bind(&transaction.crypto_name)
        .bind(transaction.amount)
        .bind(transaction.price_paid)
        .bind(&transaction.comment)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Transaction>> {
        let transactions = sqlx::query_as::<_, Transaction>(&format!(
            r#"SELECT {TRANSACTION_COLUMNS} FROM transactions
                WHERE user_id = $1
                ORDER BY created_at DESC"#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    async fn update(
        &self,
        id: Uuid,
        user_id: Uuid,
        update: &TransactionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>> {
        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            r#"UPDATE transactions
                SET amount = $3, price_paid = $4, comment = $5, updated_at = $6
                WHERE id = $1 AND user_id = $2
                RETURNING {TRANSACTION_COLUMNS}"#
        ))
        .bind(id)
        .bind(user_id)
        .bind(update.amount)
        .bind(update.price_paid)
        .bind(&update.comment)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM transactions WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl PostRepository for PostgresStore {
    async fn create(&self, post: &Post, keep: usize) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Serialize publications so pruning always sees every post.
        sqlx::query("LOCK TABLE posts IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        sqlx::query(&format!(
            "INSERT INTO posts ({POST_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
        ))
        .bind(post.id)
        .bind(post.admin_id)
        .bind(&post.admin_username)
        .bind(&post.content)
        .bind(post.likes_count)
        .bind(post.created_at)
        .execute(&mut *tx)
        .await?;

        let pruned = sqlx::query(
            r#"DELETE FROM posts WHERE id NOT IN (
                SELECT id FROM posts ORDER BY created_at DESC LIMIT $1
            )"#,
        )
        .bind(limit(keep))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if pruned.rows_affected() > 0 {
            tracing::debug!(count = pruned.rows_affected(), "old announcements pruned");
        }

        Ok(())
    }

    async fn latest(&self, count: usize) -> Result<Vec<Post>> {
        let posts = sqlx::query_as::<_, Post>(&format!(
            "SELECT {POST_COLUMNS} FROM posts ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit(count))
        .fetch_all(&self.pool)
        .await?;

        Ok(posts)
    }

    async fn liked_by(&self, user_id: Uuid, post_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let liked = sqlx::query_scalar::<_, Uuid>(
            "SELECT post_id FROM post_likes WHERE user_id = $1 AND post_id = ANY($2)",
        )
        .bind(user_id)
        .bind(post_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(liked)
    }

    async fn toggle_like(&self, user_id: Uuid, post_id: Uuid) -> Result<Option<LikeState>> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, Uuid>("SELECT id FROM posts WHERE id = $1 FOR UPDATE")
            .bind(post_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let removed = sqlx::query("DELETE FROM post_likes WHERE user_id = $1 AND post_id = $2")
            .bind(user_id)
            .bind(post_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;

        if !removed {
            sqlx::query("INSERT INTO post_likes (id, user_id, post_id) VALUES ($1, $2, $3)")
                .bind(Uuid::new_v4())
                .bind(user_id)
                .bind(post_id)
                .execute(&mut *tx)
                .await?;
        }

        let likes_count = sqlx::query_scalar::<_, i32>(
            "UPDATE posts SET likes_count = likes_count + $2 WHERE id = $1 RETURNING likes_count",
        )
        .bind(post_id)
        .bind(if removed { -1 } else { 1 })
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(LikeState {
            liked: !removed,
            likes_count,
        }))
    }
}

#[async_trait]
impl NotificationRepository for PostgresStore {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO notifications ({NOTIFICATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"
        ))
        .bind(notification.id)
        .bind(&notification.message)
        .bind(notification.created_by_admin)
        .bind(notification.is_active)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    async fn list_active(&self, count: usize) -> Result<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(&format!(
            r#"SELECT {NOTIFICATION_COLUMNS} FROM notifications
                WHERE is_active
                ORDER BY created_at DESC
                LIMIT $1"#
        ))
        .bind(limit(count))
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE notifications SET is_active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}
