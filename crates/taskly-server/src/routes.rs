use axum::{
    Json, Router, middleware,
    routing::{get, post, put},
};
use serde::Serialize;

use crate::state::AppState;
use crate::{auth, security, tasks, users};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now(),
    })
}

pub fn router(state: AppState) -> Router {
    let auth_router = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout));

    // Everything below requires a valid access token cookie.
    let user_router = Router::new()
        .route("/profile", get(users::profile).put(users::update_profile))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            security::require_auth,
        ));

    let task_router = Router::new()
        .route("/", get(tasks::list).post(tasks::create))
        .route("/:id", put(tasks::update).delete(tasks::delete))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            security::require_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth_router)
        .nest("/user", user_router)
        .nest("/tasks", task_router)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security::origin_guard,
        ))
        .with_state(state)
}
