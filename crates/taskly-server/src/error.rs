use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{
        Path, Query,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::WithRejection;
use serde::Serialize;
use thiserror::Error;

use crate::session::SessionError;

pub type FieldErrors = BTreeMap<&'static str, Vec<String>>;

// Extractors whose failures render as `ApiError` bodies instead of axum's plain text.
pub type ApiJson<T> = WithRejection<Json<T>, ApiError>;
pub type ApiQuery<T> = WithRejection<Query<T>, ApiError>;
pub type ApiPath<T> = WithRejection<Path<T>, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(&'static str),
    #[error("Validation error")]
    Validation(FieldErrors),
    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
}

#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub message: &'static str,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        ApiError::Internal(err.into())
    }

    fn malformed(field: &'static str, detail: String) -> Self {
        ApiError::Validation(BTreeMap::from([(field, vec![detail])]))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::malformed("body", rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::malformed("query", rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::malformed("params", rejection.body_text())
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidCredential => ApiError::Unauthorized("Invalid or expired token"),
            other => ApiError::internal(other),
        }
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(err: sea_orm::DbErr) -> Self {
        ApiError::internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        let errors = match self {
            ApiError::Validation(fields) => Some(fields),
            ApiError::Internal(err) => {
                tracing::error!(?err, "request failed");
                None
            }
            _ => None,
        };
        (status, Json(ErrorBody { message, errors })).into_response()
    }
}

/// Rejects blank required fields, reporting every missing one at once.
pub fn require_present(fields: &[(&'static str, &str)]) -> Result<(), ApiError> {
    let missing: FieldErrors = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| (*name, vec![format!("{name} is required")]))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(missing))
    }
}
