//! Public announcements feed.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::{get, post};

use crate::database::LikeState;
use crate::feed::{self, FeedPost};
use crate::router::IdPath;
use crate::session::{MaybeSession, UserSession};
use crate::{AppState, ServerError};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(latest))
        .route("/{id}/like", post(like))
}

/// `GET /announcements`.
pub async fn latest(
    State(state): State<AppState>,
    MaybeSession(session): MaybeSession,
) -> Result<Json<Vec<FeedPost>>, ServerError> {
    Ok(Json(feed::latest(&state.db, session.as_ref()).await?))
}

/// `POST /announcements/{id}/like`: like, or unlike when already liked.
pub async fn like(
    State(state): State<AppState>,
    UserSession(session): UserSession,
    IdPath(id): IdPath,
) -> Result<Json<LikeState>, ServerError> {
    Ok(Json(feed::toggle_like(&state.db, session.user_id, id).await?))
}
