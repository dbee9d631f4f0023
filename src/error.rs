use thiserror::Error;

use crate::status::InvalidTransition;
use crate::tms::TmsError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("TMS unreachable, try again later: {0}")]
    Transport(String),

    #[error("TMS credentials rejected, re-authenticate: {0}")]
    Unauthenticated(String),

    #[error("TMS rejected the request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    #[error("document for {unit} already exists on the TMS: {message}")]
    DuplicateDocument { unit: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("profile '{profile}' is still used by {count} item(s)")]
    ProfileInUse { profile: String, count: usize },

    #[error("locale '{locale}' is disabled for {unit}: {reason}")]
    LocaleDisabled {
        unit: String,
        locale: String,
        reason: String,
    },

    #[error("another action on {0} is in flight")]
    Busy(String),

    #[error("TMS account is not configured: {0}")]
    NotConfigured(String),

    #[error("content error: {0}")]
    Serializer(String),

    #[error("metadata invariant violated: {0}")]
    Corrupt(String),

    #[error("metadata store error: {0}")]
    Store(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Transport failures leave state untouched; the action can simply be repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }

    pub(crate) fn from_tms(err: TmsError, unit: &str) -> Self {
        match err {
            TmsError::Transport(message) => SyncError::Transport(message),
            TmsError::Unauthenticated(message) => SyncError::Unauthenticated(message),
            TmsError::NotFound(message) => SyncError::NotFound(message),
            err @ TmsError::Rejected { .. } if err.is_duplicate() => {
                SyncError::DuplicateDocument {
                    unit: unit.to_string(),
                    message: err.to_string(),
                }
            }
            TmsError::Rejected { status, message } => SyncError::RemoteRejected { status, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_rejections_are_classified() {
        let err = SyncError::from_tms(
            TmsError::Rejected {
                status: 409,
                message: "document already exists".to_string(),
            },
            "node:1",
        );
        assert!(matches!(err, SyncError::DuplicateDocument { ref unit, .. } if unit == "node:1"));

        let err = SyncError::from_tms(
            TmsError::Rejected {
                status: 400,
                message: "invalid locale".to_string(),
            },
            "node:1",
        );
        assert!(matches!(err, SyncError::RemoteRejected { status: 400, .. }));
    }

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(SyncError::from_tms(TmsError::Transport("timeout".into()), "u").is_retryable());
        assert!(!SyncError::from_tms(TmsError::Unauthenticated("expired".into()), "u").is_retryable());
        assert!(SyncError::from_tms(TmsError::NotFound("gone".into()), "u").is_not_found());
    }
}
