//! Internal announcements, limited to the newest few.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::clock::Clock;
use crate::database::{Database, LikeState};
use crate::error::{Result, ServerError};
use crate::principal::PrincipalKind;
use crate::session::Session;

/// Posts kept after each publication.
pub const FEED_CAPACITY: usize = 3;
pub const MAX_POST_LENGTH: usize = 5000;

/// Post as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub admin_id: Uuid,
    /// Author name when the post was published.
    pub admin_username: String,
    pub content: String,
    pub likes_count: i32,
    pub created_at: DateTime<Utc>,
}

/// Post as seen by a reader.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPost {
    #[serde(flatten)]
    pub post: Post,
    pub user_has_liked: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewPost {
    #[validate(length(
        min = 1,
        max = 5000,
        message = "Content must be 1 to 5000 characters long."
    ))]
    pub content: String,
}

fn post_not_found() -> ServerError {
    ServerError::field("id", "not_found", "Post not found.")
}

/// Publish a post then drop everything but the newest [`FEED_CAPACITY`].
pub async fn create_post(
    db: &Database,
    clock: &dyn Clock,
    author: &Session,
    content: &str,
) -> Result<Post> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ServerError::field(
            "content",
            "required",
            "Content is required.",
        ));
    }
    if content.chars().count() > MAX_POST_LENGTH {
        return Err(ServerError::field(
            "content",
            "too_long",
            "Content must be 1 to 5000 characters long.",
        ));
    }

    let post = Post {
        id: Uuid::new_v4(),
        admin_id: author.user_id,
        admin_username: author.username.clone(),
        content: content.to_owned(),
        likes_count: 0,
        created_at: clock.now(),
    };

    db.posts.create(&post, FEED_CAPACITY).await?;
    tracing::info!(post_id = %post.id, admin_id = %post.admin_id, "announcement published");

    Ok(post)
}

/// Like the post, or unlike it if already liked.
pub async fn toggle_like(db: &Database, user_id: Uuid, post_id: Uuid) -> Result<LikeState> {
    db.posts
        .toggle_like(user_id, post_id)
        .await?
        .ok_or_else(post_not_found)
}

/// Newest posts. Likes of the viewer are flagged when it is a user.
pub async fn latest(db: &Database, viewer: Option<&Session>) -> Result<Vec<FeedPost>> {
    let posts = db.posts.latest(FEED_CAPACITY).await?;

    let liked = match viewer {
        Some(session) if session.kind == PrincipalKind::User && !posts.is_empty() => {
            let ids: Vec<Uuid> = posts.iter().map(|post| post.id).collect();
            db.posts.liked_by(session.user_id, &ids).await?
        },
        _ => Vec::new(),
    };

    Ok(posts
        .into_iter()
        .map(|post| FeedPost {
            user_has_liked: liked.contains(&post.id),
            post,
        })
        .collect())
}
