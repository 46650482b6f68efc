//! Broadcast messages from administrators to users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::clock::Clock;
use crate::database::Database;
use crate::error::{Result, ServerError};

/// Notifications shown on a user's dashboard.
pub const USER_NOTIFICATION_LIMIT: usize = 5;
pub const MAX_MESSAGE_LENGTH: usize = 1000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub message: String,
    pub created_by_admin: Uuid,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewNotification {
    #[validate(length(
        min = 1,
        max = 1000,
        message = "Message must be 1 to 1000 characters long."
    ))]
    pub message: String,
}

/// Send a notification to every user.
pub async fn send(
    db: &Database,
    clock: &dyn Clock,
    admin_id: Uuid,
    message: &str,
) -> Result<Notification> {
    let message = message.trim();
    if message.is_empty() || message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ServerError::field(
            "message",
            "length",
            "Message must be 1 to 1000 characters long.",
        ));
    }

    let notification = Notification {
        id: Uuid::new_v4(),
        message: message.to_owned(),
        created_by_admin: admin_id,
        is_active: true,
        created_at: clock.now(),
    };
    db.notifications.insert(&notification).await?;

    Ok(notification)
}

pub async fn deactivate(db: &Database, id: Uuid) -> Result<()> {
    if !db.notifications.deactivate(id).await? {
        return Err(ServerError::field(
            "id",
            "not_found",
            "Notification not found.",
        ));
    }

    Ok(())
}

/// What a user sees on its dashboard.
pub async fn for_users(db: &Database) -> Result<Vec<Notification>> {
    db.notifications.list_active(USER_NOTIFICATION_LIMIT).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::Duration;

    #[tokio::test]
    async fn test_users_see_five_newest_active() {
        let db = Database::memory();
        let clock = FixedClock::new(Utc::now());
        let admin = Uuid::new_v4();

        let mut sent = Vec::new();
        for i in 0..7 {
            sent.push(send(&db, &clock, admin, &format!("message {i}")).await.unwrap());
            clock.advance(Duration::seconds(1));
        }
        deactivate(&db, sent[6].id).await.unwrap();

        let visible = for_users(&db).await.unwrap();
        let messages: Vec<&str> = visible.iter().map(|n| n.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["message 5", "message 4", "message 3", "message 2", "message 1"]
        );

        // Administrators see everything.
        assert_eq!(db.notifications.list().await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_message_rules() {
        let db = Database::memory();
        let clock = FixedClock::new(Utc::now());

        assert!(send(&db, &clock, Uuid::new_v4(), " ").await.is_err());
        let long = "x".repeat(MAX_MESSAGE_LENGTH + 1);
        assert!(send(&db, &clock, Uuid::new_v4(), &long).await.is_err());
        assert!(deactivate(&db, Uuid::new_v4()).await.is_err());
    }
}
