use crate::error::{SyncError, SyncResult};
use crate::settings::TmsSettings;

/// Verifies the TMS account before any remote action is attempted.
#[derive(Debug, Clone, Default)]
pub struct SetupChecker {
    token: Option<String>,
    project: Option<String>,
    community: Option<String>,
    skip: bool,
}

impl SetupChecker {
    pub fn new(token: Option<String>, project: Option<String>, community: Option<String>) -> Self {
        Self {
            token,
            project,
            community,
            skip: false,
        }
    }

    pub fn from_settings(settings: &TmsSettings) -> Self {
        Self::new(
            settings.token.clone(),
            settings.project.clone(),
            settings.community.clone(),
        )
    }

    /// For in-process TMS clients that need no account.
    pub fn ready() -> Self {
        Self {
            skip: true,
            ..Self::default()
        }
    }

    pub fn missing(&self) -> Vec<&'static str> {
        if self.skip {
            return Vec::new();
        }
        [
            ("access token", &self.token),
            ("project", &self.project),
            ("community", &self.community),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().is_none_or(|value| value.trim().is_empty()))
        .map(|(name, _)| name)
        .collect()
    }

    pub fn check(&self) -> SyncResult<()> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::NotConfigured(format!("missing {}", missing.join(", "))))
        }
    }
}
