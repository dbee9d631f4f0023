use axum::Json;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::notify::NotifyError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub(crate) struct ServerError {
    pub(crate) status: StatusCode,
    pub(crate) message: String,
}

impl ServerError {
    pub(crate) fn into_response(self) -> (StatusCode, Json<ErrorResponse>) {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
    }
}

impl From<SyncError> for ServerError {
    fn from(err: SyncError) -> Self {
        let status = match &err {
            SyncError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<NotifyError> for ServerError {
    fn from(err: NotifyError) -> Self {
        match err {
            NotifyError::BadRequest(message) => Self {
                status: StatusCode::BAD_REQUEST,
                message,
            },
            NotifyError::Sync(err) => Self::from(err),
        }
    }
}
