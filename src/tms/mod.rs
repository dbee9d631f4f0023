use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

mod http;
mod mock;
mod retry;

pub use http::HttpTms;
pub use mock::{MockTms, TmsCall, TmsOperation};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TmsError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("document not found: {0}")]
    NotFound(String),
}

impl TmsError {
    pub fn is_duplicate(&self) -> bool {
        match self {
            TmsError::Rejected { status, message } => {
                *status == 409 || message.to_lowercase().contains("already exists")
            }
            _ => false,
        }
    }
}

pub type TmsFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TmsError>> + Send + 'a>>;

/// Profile-derived hints sent with a document upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadHints {
    pub project: Option<String>,
    pub vault: Option<String>,
    pub workflow: Option<String>,
    pub filter: Option<String>,
    pub subfilter: Option<String>,
    pub job_id: Option<String>,
    #[serde(default)]
    pub metadata: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub title: String,
    pub content: String,
    /// Source locale in TMS notation.
    pub locale: String,
    pub hints: UploadHints,
}

/// Per-locale hints sent with a target request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetHints {
    pub workflow: Option<String>,
    pub vault: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub complete: bool,
    pub percent: u8,
}

impl Progress {
    pub fn complete() -> Self {
        Self {
            complete: true,
            percent: 100,
        }
    }

    pub fn partial(percent: u8) -> Self {
        Self {
            complete: percent >= 100,
            percent: percent.min(100),
        }
    }
}

/// Remote translation management system.
///
/// Every call carries the client's own auth context. Implementations must
/// treat "not found" on delete and archive as success.
pub trait TmsClient: Send + Sync {
    fn upload_document(&self, request: UploadRequest) -> TmsFuture<'_, String>;

    fn update_document(&self, document_id: &str, request: UploadRequest)
    -> TmsFuture<'_, String>;

    fn add_target(&self, document_id: &str, locale: &str, hints: TargetHints)
    -> TmsFuture<'_, ()>;

    fn check_document_status(&self, document_id: &str) -> TmsFuture<'_, Progress>;

    fn check_target_status(&self, document_id: &str, locale: &str) -> TmsFuture<'_, Progress>;

    fn download_target(&self, document_id: &str, locale: &str) -> TmsFuture<'_, String>;

    fn delete_document(&self, document_id: &str) -> TmsFuture<'_, ()>;

    fn archive_document(&self, document_id: &str) -> TmsFuture<'_, ()>;
}
