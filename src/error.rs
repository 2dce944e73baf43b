// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::article::{ArticleId, ArticleStatus};
use crate::registry::SourceId;

/// Errors surfaced by the control surface. Pipeline failures never end up here;
/// they are recorded on the Source or Article instead.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid source: {0}")]
    InvalidSource(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("source {0} not found")]
    SourceNotFound(SourceId),
    #[error("a source with url {0} is already registered")]
    DuplicateSource(String),
    #[error("article {0} not found")]
    ArticleNotFound(ArticleId),
    #[error("article {id} is {status}: {reason}")]
    InvalidTransition {
        id: ArticleId,
        status: ArticleStatus,
        reason: &'static str,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ControlError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ControlError::InvalidSource(_) | ControlError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ControlError::SourceNotFound(_) | ControlError::ArticleNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ControlError::DuplicateSource(_) | ControlError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            ControlError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "control request failed");
        }
        let body = serde_json::json!({ "error": format!("{self:#}") });
        (status, Json(body)).into_response()
    }
}
