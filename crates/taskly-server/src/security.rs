use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use uuid::Uuid;

use crate::auth::ACCESS_COOKIE_NAME;
use crate::error::ApiError;
use crate::state::AppState;

/// Identity of the caller, placed in request extensions by [`require_auth`].
#[derive(Clone, Copy, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
}

fn is_unsafe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn origin_is_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    // Treat missing Origin as a non-browser client (curl, service-to-service).
    let origin = match headers.get(axum::http::header::ORIGIN) {
        Some(v) => match v.to_str() {
            Ok(s) => s,
            Err(_) => return false,
        },
        None => return true,
    };

    allowed.iter().any(|a| a == origin)
}

// Middleware: reject state-changing requests coming from a browser origin that is
// not the configured client.
pub async fn origin_guard(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if is_unsafe_method(req.method()) && !origin_is_allowed(req.headers(), &state.allowed_origins) {
        return ApiError::Forbidden("origin not allowed").into_response();
    }
    next.run(req).await
}

// Middleware: stateless access-token check for protected routes.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    match authenticate(&state, req.headers()) {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
    let jar = CookieJar::from_headers(headers);
    let token = jar
        .get(ACCESS_COOKIE_NAME)
        .map(|c| c.value().to_string())
        .ok_or(ApiError::Unauthorized("Authentication required"))?;

    let user_id = state.sessions.verify_access_token(&token)?;
    Ok(AuthUser { user_id })
}
