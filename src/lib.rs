//! Coinfolio is an invite-only crypto portfolio tracker.

#![forbid(unsafe_code)]
mod access_code;
mod clock;
mod crypto;
mod database;
pub mod error;
mod feed;
mod ledger;
mod market;
mod middleware;
mod notification;
mod principal;
mod registration;
mod router;
mod session;
pub mod telemetry;

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
#[cfg(test)]
use axum::http::Method;
use axum::http::{StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use error::ServerError;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::clock::{Clock, SystemClock};
use crate::market::{MarketClient, MarketData};
use crate::session::SessionCodec;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    cookie: Option<&str>,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub db: database::Database,
    pub crypto: Arc<crypto::Crypto>,
    pub sessions: SessionCodec,
    pub clock: Arc<dyn Clock>,
    pub market: Arc<dyn MarketData>,
    /// Absent when no recorder could be installed.
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Keep session cookies out of traces.
        .layer(SetSensitiveHeadersLayer::new([header::COOKIE, header::SET_COOKIE]));

    Router::new()
        // `GET /` goes to `status`.
        .route("/", get(router::status::status))
        .route("/metrics", get(router::status::metrics))
        .route("/login", post(router::auth::login))
        .route("/register", post(router::auth::register))
        .route("/logout", post(router::auth::logout))
        .route(
            "/contributions/new",
            get(router::dashboard::contribution_form),
        )
        .nest("/admin", router::admin::router())
        .nest("/dashboard", router::dashboard::router())
        .nest("/announcements", router::announcements::router())
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        // Unmatched paths go through the gate too.
        .layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            middleware::authorize,
        ))
        .layer(middleware)
        .with_state(state)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let db = match config.postgres {
        Some(ref config) => {
            database::Database::postgres(
                &config.address,
                &config
                    .username
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .password
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .database
                    .clone()
                    .unwrap_or(database::DEFAULT_DATABASE_NAME.into()),
                config.pool_size.unwrap_or(database::DEFAULT_POOL_SIZE),
            )
            .await?
        },
        None => {
            tracing::warn!(
                "missing `postgres` entry on `config.yaml` file, data will not survive restarts"
            );
            database::Database::memory()
        },
    };

    let key = std::env::var("SESSION_KEY")
        .map_err(|_| "missing `SESSION_KEY` environnement variable")?;
    let crypto = Arc::new(crypto::Crypto::new(config.argon2.clone(), key)?);

    principal::bootstrap_main_admin(
        &db,
        &crypto.pwd,
        clock.as_ref(),
        config.admin.as_ref(),
    )
    .await?;

    let sessions = SessionCodec::new(
        crypto.session_key.clone(),
        Arc::clone(&clock),
        config.production,
    );
    let market: Arc<dyn MarketData> = Arc::new(MarketClient::new(
        &config.market.clone().unwrap_or_default(),
    )?);

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::error!(error = %err, "cannot install Prometheus recorder");
            None
        },
    };

    Ok(AppState {
        config,
        db,
        crypto,
        sessions,
        clock,
        market,
        metrics,
    })
}
