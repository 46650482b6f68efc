use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
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

#[derive(Default)]
struct Tables {
    principals: Vec<Principal>,
    codes: Vec<AccessCode>,
    transactions: Vec<Transaction>,
    posts: Vec<Post>,
    /// `(user_id, post_id)` pairs.
    likes: Vec<(Uuid, Uuid)>,
    notifications: Vec<Notification>,
}

/// In-process datastore.
///
/// A single lock guards every table, so each call is atomic like a
/// PostgreSQL transaction would be.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

/// Copy rows sorted by descending creation date. Among equal dates, the
/// latest inserted comes first.
fn newest_first<'a, T, I>(rows: I, created_at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T>
where
    T: Clone + 'a,
    I: DoubleEndedIterator<Item = &'a T>,
{
    let mut rows: Vec<T> = rows.rev().cloned().collect();
    rows.sort_by_key(|row| std::cmp::Reverse(created_at(row)));
    rows
}

#[async_trait]
impl PrincipalRepository for MemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .principals
            .iter()
            .find(|principal| principal.username == username)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>> {
        let tables = self.tables.lock().await;
        Ok(tables.principals.iter().find(|principal| principal.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<Principal>> {
        let tables = self.tables.lock().await;
        Ok(newest_first(tables.principals.iter(), |p| p.created_at))
    }

    async fn insert(&self, principal: &Principal) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        if tables.principals.iter().any(|p| p.username == principal.username) {
            return Ok(false);
        }

        tables.principals.push(principal.clone());
        Ok(true)
    }

    async fn has_main_admin(&self) -> Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables.principals.iter().any(|p| p.role == Role::MainAdmin))
    }

    async fn change_role(&self, id: Uuid, from: Role, to: Role) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.principals.iter_mut().find(|p| p.id == id && p.role == from) {
            Some(principal) => {
                principal.role = to;
                Ok(true)
            },
            None => Ok(false),
        }
    }
}

#[async_trait]
impl AccessCodeRepository for MemoryStore {
    async fn find_by_code(&self, code: &str) -> Result<Option<AccessCode>> {
        let tables = self.tables.lock().await;
        Ok(tables.codes.iter().find(|c| c.code == code).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccessCode>> {
        let tables = self.tables.lock().await;
        Ok(tables.codes.iter().find(|c| c.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<AccessCode>> {
        let tables = self.tables.lock().await;
        Ok(newest_first(tables.codes.iter(), |c| c.created_at))
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<AccessCode>> {
        let tables = self.tables.lock().await;
        Ok(newest_first(
            tables.codes.iter().filter(|c| c.created_by_user == Some(user_id)),
            |c| c.created_at,
        ))
    }

    async fn insert(&self, code: &AccessCode, quota: Option<i32>) -> Result<IssueOutcome> {
        let mut tables = self.tables.lock().await;
        if tables.codes.iter().any(|c| c.code == code.code) {
            return Ok(IssueOutcome::Collision);
        }

        if let Some(quota) = quota {
            let issuer = tables.principals.iter_mut().find(|p| {
                Some(p.id) == code.created_by_user && p.codes_created_count < quota
            });
            match issuer {
                Some(user) => user.codes_created_count += 1,
                None => return Ok(IssueOutcome::QuotaExceeded),
            }
        }

        tables.codes.push(code.clone());
        Ok(IssueOutcome::Issued(code.clone()))
    }

    async fn redeem(
        &self,
        code_id: Uuid,
        user: &Principal,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        let mut tables = self.tables.lock().await;

        let consumable = tables
            .codes
            .iter()
            .any(|c| c.id == code_id && c.is_consumable(now));
        if !consumable {
            return Ok(RedeemOutcome::CodeUnavailable);
        }
        if tables.principals.iter().any(|p| p.username == user.username) {
            return Ok(RedeemOutcome::UsernameTaken);
        }

        tables.principals.push(user.clone());
        if let Some(code) = tables.codes.iter_mut().find(|c| c.id == code_id) {
            code.used_by_user = Some(user.id);
            code.used_at = Some(now);
        }

        Ok(RedeemOutcome::Registered(user.clone()))
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.codes.iter_mut().find(|c| c.id == id) {
            Some(code) => {
                code.is_active = false;
                Ok(true)
            },
            None => Ok(false),
        }
    }
}

#[async_trait]
impl TransactionRepository for MemoryStore {
    async fn insert(&self, transaction: &Transaction) -> Result<()> {
        self.tables.lock().await.transactions.push(transaction.clone());
        Ok(())
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Transaction>> {
        let tables = self.tables.lock().await;
        Ok(newest_first(
            tables.transactions.iter().filter(|t| t.user_id == user_id),
            |t| t.created_at,
        ))
    }

    async fn update(
        &self,
        id: Uuid,
        user_id: Uuid,
        update: &TransactionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>> {
        let mut tables = self.tables.lock().await;
        let Some(transaction) = tables
            .transactions
            .iter_mut()
            .find(|t| t.id == id && t.user_id == user_id)
        else {
            return Ok(None);
        };

        transaction.amount = update.amount;
        transaction.price_paid = update.price_paid;
        transaction.comment = update.comment.clone();
        transaction.updated_at = Some(now);

        Ok(Some(transaction.clone()))
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let before = tables.transactions.len();
        tables
            .transactions
            .retain(|t| !(t.id == id && t.user_id == user_id));
        Ok(tables.transactions.len() != before)
    }
}

#[async_trait]
impl PostRepository for MemoryStore {
    async fn create(&self, post: &Post, keep: usize) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.posts.push(post.clone());

        let kept: Vec<Uuid> = newest_first(tables.posts.iter(), |p| p.created_at)
            .into_iter()
            .take(keep)
            .map(|p| p.id)
            .collect();
        tables.posts.retain(|p| kept.contains(&p.id));
        tables.likes.retain(|(_, post_id)| kept.contains(post_id));

        Ok(())
    }

    async fn latest(&self, limit: usize) -> Result<Vec<Post>> {
        let tables = self.tables.lock().await;
        let mut posts = newest_first(tables.posts.iter(), |p| p.created_at);
        posts.truncate(limit);
        Ok(posts)
    }

    async fn liked_by(&self, user_id: Uuid, post_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .likes
            .iter()
            .filter(|(user, post)| *user == user_id && post_ids.contains(post))
            .map(|(_, post)| *post)
            .collect())
    }

    async fn toggle_like(&self, user_id: Uuid, post_id: Uuid) -> Result<Option<LikeState>> {
        let mut tables = self.tables.lock().await;
        if !tables.posts.iter().any(|p| p.id == post_id) {
            return Ok(None);
        }

        let liked = match tables.likes.iter().position(|like| *like == (user_id, post_id)) {
            Some(index) => {
                tables.likes.remove(index);
                false
            },
            None => {
                tables.likes.push((user_id, post_id));
                true
            },
        };

        let Some(post) = tables.posts.iter_mut().find(|p| p.id == post_id) else {
            return Ok(None);
        };
        post.likes_count += if liked { 1 } else { -1 };

        Ok(Some(LikeState {
            liked,
            likes_count: post.likes_count,
        }))
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        self.tables.lock().await.notifications.push(notification.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Notification>> {
        let tables = self.tables.lock().await;
        Ok(newest_first(tables.notifications.iter(), |n| n.created_at))
    }

    async fn list_active(&self, limit: usize) -> Result<Vec<Notification>> {
        let tables = self.tables.lock().await;
        let mut notifications = newest_first(
            tables.notifications.iter().filter(|n| n.is_active),
            |n| n.created_at,
        );
        notifications.truncate(limit);
        Ok(notifications)
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.notifications.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.is_active = false;
                Ok(true)
            },
            None => Ok(false),
        }
    }
}
