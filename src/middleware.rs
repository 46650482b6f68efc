//! Middlewares for routes.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};

use crate::AppState;
use crate::principal::PrincipalKind;

/// Where refused requests are sent.
const REDIRECT_TARGET: &str = "/";

const PUBLIC_PATHS: &[&str] =
    &["/", "/login", "/register", "/logout", "/metrics", "/favicon.ico"];
const PUBLIC_AREAS: &[&str] = &["/admin/login", "/announcements", "/static"];

const ADMIN_AREA: &str = "/admin";
const USER_AREAS: &[&str] = &["/dashboard", "/contributions"];

/// Whether `path` is `area` or lies below it.
fn within(path: &str, area: &str) -> bool {
    path.strip_prefix(area)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Paths reachable without a session.
pub fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
        || PUBLIC_AREAS.iter().any(|area| within(path, area))
}

/// Kind of principal a protected path is reserved to, if any.
pub fn required_kind(path: &str) -> Option<PrincipalKind> {
    if within(path, ADMIN_AREA) {
        Some(PrincipalKind::Admin)
    } else if USER_AREAS.iter().any(|area| within(path, area)) {
        Some(PrincipalKind::User)
    } else {
        None
    }
}

/// Authorization gate.
///
/// Outside public paths, a valid session is required and, in the admin and
/// user areas, it must be of the matching kind. Every refusal redirects to
/// the root page, whatever the cause.
pub async fn authorize(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if is_public(path) {
        return next.run(req).await;
    }
    let required = required_kind(path);

    let Some(session) = state.sessions.from_headers(req.headers()) else {
        return Redirect::temporary(REDIRECT_TARGET).into_response();
    };

    if required.is_some_and(|kind| kind != session.kind) {
        tracing::debug!(
            path = %req.uri().path(),
            user_id = %session.user_id,
            "session kind not allowed here"
        );
        return Redirect::temporary(REDIRECT_TARGET).into_response();
    }

    req.extensions_mut().insert(session);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_paths() {
        for path in [
            "/",
            "/login",
            "/register",
            "/logout",
            "/metrics",
            "/admin/login",
            "/announcements",
            "/announcements/3f1c/like",
            "/static/app.css",
            "/favicon.ico",
        ] {
            assert!(is_public(path), "{path} should be public");
        }

        for path in ["/admin", "/admin/codes", "/dashboard", "/announcementsx", "/staticky"] {
            assert!(!is_public(path), "{path} should be protected");
        }
    }

    #[test]
    fn test_required_kind() {
        assert_eq!(required_kind("/admin"), Some(PrincipalKind::Admin));
        assert_eq!(required_kind("/admin/users/1/promote"), Some(PrincipalKind::Admin));
        assert_eq!(required_kind("/administrator"), None);
        assert_eq!(required_kind("/dashboard/market"), Some(PrincipalKind::User));
        assert_eq!(required_kind("/contributions/new"), Some(PrincipalKind::User));
        assert_eq!(required_kind("/elsewhere"), None);
    }
}
