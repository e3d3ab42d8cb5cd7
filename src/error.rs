//! Error model shared by the store layers and the HTTP frontends.
//! `StoreError` is what the storage, index and RBAC layers return; `AppError` is the
//! HTTP-facing shape with a status code and a minimal JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("invalid unit id: {0}")]
    InvalidId(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("unit is locked")]
    LockConflict,
    #[error("unit is not locked")]
    NotLocked,
    #[error("version not found")]
    VersionNotFound,
    #[error("version conflict: {0}")]
    VersionConflict(String),
    #[error("forbidden")]
    Forbidden,
    #[error("unauthorized")]
    Unauthorized,
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn internal(err: impl Display) -> Self { StoreError::Internal(err.to_string()) }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self { StoreError::Internal(format!("io: {err}")) }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self { StoreError::Internal(format!("json: {err}")) }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    Auth { code: String, message: String },
    Forbidden { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn forbidden<S: Into<String>>(code: S, msg: S) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::Auth { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidId(msg) => AppError::user("invalid_id".to_string(), msg),
            StoreError::NotFound(what) => AppError::not_found("not_found".to_string(), format!("not found: {what}")),
            StoreError::VersionNotFound => AppError::not_found("version_not_found", "version not found"),
            StoreError::AlreadyExists(what) => AppError::conflict("already_exists".to_string(), format!("already exists: {what}")),
            StoreError::LockConflict => AppError::conflict("lock_conflict", "unit is locked"),
            StoreError::NotLocked => AppError::conflict("not_locked", "unit is not locked"),
            StoreError::VersionConflict(_) => AppError::conflict("version_conflict", "concurrent modification, retry the request"),
            StoreError::Forbidden => AppError::forbidden("forbidden", "insufficient permissions"),
            StoreError::Unauthorized => AppError::auth("unauthorized", "unauthorized"),
            StoreError::Internal(detail) => {
                tracing::error!(target: "statesman::error", detail = %detail, "internal error");
                AppError::internal("internal", "internal error")
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(target: "statesman::error", detail = %err, "unhandled error");
        AppError::internal("internal", "internal error")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(serde_json::json!({ "error": self.message() }))).into_response()
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
