//! Administration area.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::access_code::{self, AccessCode};
use crate::feed::{self, NewPost, Post};
use crate::notification::{self, NewNotification, Notification};
use crate::principal::{self, Principal};
use crate::router::{IdPath, Valid, auth};
use crate::session::AdminSession;
use crate::{AppState, ServerError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub codes: Vec<AccessCode>,
    pub principals: Vec<Principal>,
    pub notifications: Vec<Notification>,
    pub is_main_admin: bool,
}

#[derive(Debug, Default, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCode {
    pub expires_at: Option<DateTime<Utc>>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(overview))
        .route("/login", post(auth::admin_login))
        .route("/codes", post(issue_code))
        .route("/codes/{id}/deactivate", post(deactivate_code))
        .route("/notifications", post(send_notification))
        .route(
            "/notifications/{id}/deactivate",
            post(deactivate_notification),
        )
        .route("/users/{id}/promote", post(promote))
        .route("/users/{id}/demote", post(demote))
        .route("/posts", post(create_post))
}

/// `GET /admin`.
pub async fn overview(
    State(state): State<AppState>,
    AdminSession(session): AdminSession,
) -> Result<Json<Overview>, ServerError> {
    let is_main_admin = state
        .db
        .principals
        .find_by_id(session.user_id)
        .await?
        .is_some_and(|admin| admin.is_main_admin());

    Ok(Json(Overview {
        codes: state.db.codes.list().await?,
        principals: state.db.principals.list().await?,
        notifications: state.db.notifications.list().await?,
        is_main_admin,
    }))
}

pub async fn issue_code(
    State(state): State<AppState>,
    AdminSession(session): AdminSession,
    Valid(body): Valid<IssueCode>,
) -> Result<(StatusCode, Json<AccessCode>), ServerError> {
    let code =
        access_code::issue(&state.db, state.clock.as_ref(), &session, body.expires_at)
            .await?;

    Ok((StatusCode::CREATED, Json(code)))
}

pub async fn deactivate_code(
    State(state): State<AppState>,
    AdminSession(session): AdminSession,
    IdPath(id): IdPath,
) -> Result<StatusCode, ServerError> {
    access_code::deactivate(&state.db, &session, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn send_notification(
    State(state): State<AppState>,
    AdminSession(session): AdminSession,
    Valid(body): Valid<NewNotification>,
) -> Result<(StatusCode, Json<Notification>), ServerError> {
    let notification = notification::send(
        &state.db,
        state.clock.as_ref(),
        session.user_id,
        &body.message,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(notification)))
}

pub async fn deactivate_notification(
    State(state): State<AppState>,
    AdminSession(_): AdminSession,
    IdPath(id): IdPath,
) -> Result<StatusCode, ServerError> {
    notification::deactivate(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn promote(
    State(state): State<AppState>,
    AdminSession(_): AdminSession,
    IdPath(id): IdPath,
) -> Result<StatusCode, ServerError> {
    principal::promote(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Only the main administrator gets through.
pub async fn demote(
    State(state): State<AppState>,
    AdminSession(session): AdminSession,
    IdPath(id): IdPath,
) -> Result<StatusCode, ServerError> {
    principal::demote(&state.db, session.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_post(
    State(state): State<AppState>,
    AdminSession(session): AdminSession,
    Valid(body): Valid<NewPost>,
) -> Result<(StatusCode, Json<Post>), ServerError> {
    let post =
        feed::create_post(&state.db, state.clock.as_ref(), &session, &body.content)
            .await?;

    Ok((StatusCode::CREATED, Json(post)))
}
