//! JSON HTTP surface.
pub mod admin;
pub mod announcements;
pub mod auth;
pub mod dashboard;
pub mod status;

use axum::Json;
use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::error::ServerError;

/// Usernames are made of ASCII letters, digits, `_`, `.` and `-`.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let valid = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid {
        return Err(ValidationError::new("invalid_username"));
    }

    Ok(())
}

/// JSON body checked with its `validator` rules.
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Single `{id}` path segment.
pub struct IdPath(pub Uuid);

impl<S> FromRequestParts<S> for IdPath
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<Uuid>::from_request_parts(parts, state).await?;
        Ok(IdPath(id))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Response, StatusCode};
    use chrono::Utc;
    use http_body_util::BodyExt;

    use super::*;
    use crate::AppState;
    use crate::clock::{Clock, FixedClock};
    use crate::config::Configuration;
    use crate::crypto::Crypto;
    use crate::crypto::tests::fast_argon;
    use crate::database::Database;
    use crate::market::{Quote, StaticMarket};
    use crate::market::tests::asset;
    use crate::principal::{Principal, Role};
    use crate::session::SessionCodec;

    pub(crate) const PASSWORD: &str = "password123";

    /// Application state over an in-memory datastore.
    pub(crate) fn state() -> AppState {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let crypto = Crypto::new(Some(fast_argon()), [42u8; 32]).unwrap();
        let sessions = SessionCodec::new(crypto.session_key.clone(), clock.clone(), false);

        let market = StaticMarket {
            assets: vec![
                asset("bitcoin", "btc", "Bitcoin"),
                asset("ethereum", "eth", "Ethereum"),
            ],
            prices: [(
                "bitcoin".to_owned(),
                Quote {
                    usd: 150.0,
                    usd_24h_change: Some(1.0),
                },
            )]
            .into(),
            rate: Some(5.0),
        };

        let mut config = Configuration::default();
        config.name = "coinfolio".into();
        config.url = "https://coinfolio.example/".into();

        AppState {
            config: Arc::new(config),
            db: Database::memory(),
            crypto: Arc::new(crypto),
            sessions,
            clock,
            market: Arc::new(market),
            metrics: None,
        }
    }

    pub(crate) async fn seed(state: &AppState, username: &str, role: Role) -> Principal {
        let hash = state.crypto.pwd.hash_password(PASSWORD).unwrap();
        let principal = Principal::new(username, hash, role, state.clock.now());
        assert!(state.db.principals.insert(&principal).await.unwrap());
        principal
    }

    /// `Cookie` header value carrying a session for `principal`.
    pub(crate) fn cookie(state: &AppState, principal: &Principal) -> String {
        let value = state
            .sessions
            .encode(principal.id, &principal.username, principal.kind())
            .unwrap();
        format!("session={value}")
    }

    pub(crate) async fn json(response: Response<Body>) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("satoshi.n_2-0").is_ok());
        assert!(validate_username("sa toshi").is_err());
        assert!(validate_username("satoshi!").is_err());
        assert!(validate_username("josé").is_err());
    }

    #[tokio::test]
    async fn test_unknown_protected_path_redirects() {
        let state = state();
        let app = crate::app(state);

        let response =
            crate::make_request(app, axum::http::Method::GET, "/nowhere", None, String::new())
                .await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    }
}
