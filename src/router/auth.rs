//! Login, logout and sign up.

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use validator::Validate;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::principal::{self, Principal, PrincipalKind};
use crate::registration::{self, RegisterForm};
use crate::router::Valid;
use crate::{AppState, ServerError};

#[derive(Debug, Validate, Deserialize, Serialize, Zeroize, ZeroizeOnDrop)]
pub struct LoginForm {
    #[validate(length(min = 1, message = "Username is required."))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "type")]
    pub kind: PrincipalKind,
    pub username: String,
    /// Landing page of the principal.
    pub redirect: String,
}

fn landing(kind: PrincipalKind) -> &'static str {
    match kind {
        PrincipalKind::Admin => "/admin",
        PrincipalKind::User => "/dashboard",
    }
}

/// Issue the session cookie of `principal`.
fn open_session(state: &AppState, principal: Principal) -> Result<Response, ServerError> {
    let kind = principal.kind();
    let value = state.sessions.encode(principal.id, &principal.username, kind)?;

    tracing::info!(user_id = %principal.id, ?kind, "logged in");
    Ok((
        [(header::SET_COOKIE, state.sessions.session_cookie(&value))],
        Json(LoginResponse {
            kind,
            username: principal.username,
            redirect: landing(kind).to_owned(),
        }),
    )
        .into_response())
}

/// `POST /login`: administrators first, then users.
pub async fn login(
    State(state): State<AppState>,
    Valid(body): Valid<LoginForm>,
) -> Result<Response, ServerError> {
    let principal =
        principal::login(&state.db, &state.crypto.pwd, &body.username, &body.password)
            .await?;

    open_session(&state, principal)
}

/// `POST /admin/login`.
pub async fn admin_login(
    State(state): State<AppState>,
    Valid(body): Valid<LoginForm>,
) -> Result<Response, ServerError> {
    let principal = principal::admin_login(
        &state.db,
        &state.crypto.pwd,
        &body.username,
        &body.password,
    )
    .await?;

    open_session(&state, principal)
}

/// `POST /register`.
pub async fn register(
    State(state): State<AppState>,
    Valid(body): Valid<RegisterForm>,
) -> Result<(StatusCode, Json<Principal>), ServerError> {
    let user = registration::register(
        &state.db,
        &state.crypto.pwd,
        state.clock.as_ref(),
        &body,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// `POST /logout`.
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, state.sessions.clear_session_cookie())],
    )
}
