//! Stateless sessions carried by a signed cookie.
//!
//! The cookie value is `hex(json) "." hex(hmac)`, where `json` is
//! `{"userId", "username", "type", "timestamp"}`. Nothing is stored server
//! side: a session ends when the cookie is cleared or gets 24 hours old.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::clock::Clock;
use crate::crypto::SessionKey;
use crate::error::{Result, ServerError};
use crate::principal::PrincipalKind;

pub const SESSION_COOKIE: &str = "session";
/// Session lifetime, in milliseconds.
pub const SESSION_TTL: i64 = 24 * 60 * 60 * 1000;

/// Authenticated principal, as decoded from the cookie.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: Uuid,
    pub username: String,
    #[serde(rename = "type")]
    pub kind: PrincipalKind,
    /// Issue time, in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Session {
    pub fn new(
        user_id: Uuid,
        username: impl Into<String>,
        kind: PrincipalKind,
        timestamp: i64,
    ) -> Self {
        Self {
            user_id,
            username: username.into(),
            kind,
            timestamp,
        }
    }
}

/// Encode and decode session cookies.
#[derive(Clone)]
pub struct SessionCodec {
    key: SessionKey,
    clock: Arc<dyn Clock>,
    secure: bool,
}

impl SessionCodec {
    /// Create a new [`SessionCodec`].
    ///
    /// `secure` adds the `Secure` attribute to emitted cookies.
    pub fn new(key: SessionKey, clock: Arc<dyn Clock>, secure: bool) -> Self {
        Self { key, clock, secure }
    }

    /// Serialize a fresh session issued now.
    pub fn encode(
        &self,
        principal_id: Uuid,
        display_name: &str,
        kind: PrincipalKind,
    ) -> Result<String> {
        let session = Session::new(principal_id, display_name, kind, self.clock.now_millis());
        let payload = serde_json::to_vec(&session).map_err(|err| ServerError::Internal {
            details: "cannot serialize session".into(),
            source: Some(Box::new(err)),
        })?;

        Ok(format!("{}.{}", hex::encode(&payload), self.key.sign(&payload)))
    }

    /// Parse a cookie value.
    ///
    /// Malformed, forged or expired values all yield `None`.
    pub fn decode(&self, value: &str) -> Option<Session> {
        let (payload, tag) = value.split_once('.')?;
        let payload = hex::decode(payload).ok()?;
        if !self.key.verify(&payload, tag) {
            return None;
        }

        let session: Session = serde_json::from_slice(&payload).ok()?;
        if self.clock.now_millis() - session.timestamp >= SESSION_TTL {
            return None;
        }

        Some(session)
    }

    /// `Set-Cookie` value carrying `value`.
    pub fn session_cookie(&self, value: &str) -> String {
        let mut cookie = format!(
            "{SESSION_COOKIE}={value}; HttpOnly; Path=/; Max-Age={}; SameSite=Lax",
            SESSION_TTL / 1000
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// `Set-Cookie` value removing the session.
    pub fn clear_session_cookie(&self) -> String {
        let mut cookie = format!("{SESSION_COOKIE}=; HttpOnly; Path=/; Max-Age=0; SameSite=Lax");
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Decode the session carried by request headers, if any.
    pub fn from_headers(&self, headers: &HeaderMap) -> Option<Session> {
        read_session_cookie(headers).and_then(|value| self.decode(value))
    }
}

/// Raw value of the session cookie.
pub fn read_session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
}

impl FromRequestParts<AppState> for Session {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        // The authorization gate already decoded it on protected paths.
        if let Some(session) = parts.extensions.get::<Session>() {
            return Ok(session.clone());
        }

        state
            .sessions
            .from_headers(&parts.headers)
            .ok_or(ServerError::AccessDenied)
    }
}

/// Check `session` against the stored principal.
///
/// Role changes and deactivations apply to live cookies: the principal must
/// still exist, be active and hold a role of the `expected` kind.
async fn current(
    state: &AppState,
    session: Session,
    expected: PrincipalKind,
) -> Result<Session> {
    if session.kind != expected {
        return Err(ServerError::AccessDenied);
    }

    match state.db.principals.find_by_id(session.user_id).await? {
        Some(principal) if principal.is_active && principal.kind() == expected => Ok(session),
        _ => {
            tracing::debug!(user_id = %session.user_id, "stale session refused");
            Err(ServerError::AccessDenied)
        },
    }
}

/// Session if any, never rejects.
#[derive(Clone, Debug)]
pub struct MaybeSession(pub Option<Session>);

impl FromRequestParts<AppState> for MaybeSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(MaybeSession(
            Session::from_request_parts(parts, state).await.ok(),
        ))
    }
}

/// Session of a regular user.
#[derive(Clone, Debug)]
pub struct UserSession(pub Session);

impl FromRequestParts<AppState> for UserSession {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        current(state, session, PrincipalKind::User).await.map(UserSession)
    }
}

/// Session of an administrator.
#[derive(Clone, Debug)]
pub struct AdminSession(pub Session);

impl FromRequestParts<AppState> for AdminSession {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        current(state, session, PrincipalKind::Admin).await.map(AdminSession)
    }
}
