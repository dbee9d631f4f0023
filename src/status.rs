//! Lifecycle statuses for source documents and per-locale targets.
//!
//! Both transition functions are total: every `(status, event)` pair either
//! yields the next status (possibly the same one) or an [`InvalidTransition`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceStatus {
    #[default]
    Untracked,
    Edited,
    Importing,
    Current,
    Disabled,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetStatus {
    #[default]
    Untracked,
    Request,
    Pending,
    Intermediate,
    Ready,
    Current,
    Edited,
    Disabled,
    None,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    ContentUploaded,
    ContentEdited,
    ImportCompleted,
    ImportFailed,
    TargetRequested,
    TargetFailed,
    TargetProgress(u8),
    TargetCompleted,
    TargetDownloaded,
    TargetDeleted,
    LocaleDisabled,
    LocaleEnabled,
    LocaleExcluded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: String,
    pub event: Event,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cannot handle {}", self.from, self.event)
    }
}

impl std::error::Error for InvalidTransition {}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Untracked => "UNTRACKED",
            SourceStatus::Edited => "EDITED",
            SourceStatus::Importing => "IMPORTING",
            SourceStatus::Current => "CURRENT",
            SourceStatus::Disabled => "DISABLED",
            SourceStatus::Error => "ERROR",
        }
    }

    /// Whether an upload may start from this status.
    pub fn is_uploadable(&self) -> bool {
        matches!(
            self,
            SourceStatus::Untracked | SourceStatus::Edited | SourceStatus::Error
        )
    }
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Untracked => "UNTRACKED",
            TargetStatus::Request => "REQUEST",
            TargetStatus::Pending => "PENDING",
            TargetStatus::Intermediate => "INTERMEDIATE",
            TargetStatus::Ready => "READY",
            TargetStatus::Current => "CURRENT",
            TargetStatus::Edited => "EDITED",
            TargetStatus::Disabled => "DISABLED",
            TargetStatus::None => "NONE",
            TargetStatus::Error => "ERROR",
        }
    }

    /// Not yet requested from the TMS.
    pub fn is_requestable(&self) -> bool {
        matches!(self, TargetStatus::Untracked | TargetStatus::Request)
    }

    /// Requested and waiting on the TMS.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, TargetStatus::Pending | TargetStatus::Intermediate)
    }

    pub fn is_excluded(&self) -> bool {
        matches!(self, TargetStatus::Disabled | TargetStatus::None)
    }

    /// Statuses a target may hold while its unit has no document.
    pub fn is_detached(&self) -> bool {
        self.is_requestable() || self.is_excluded()
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::ContentUploaded => f.write_str("ContentUploaded"),
            Event::ContentEdited => f.write_str("ContentEdited"),
            Event::ImportCompleted => f.write_str("ImportCompleted"),
            Event::ImportFailed => f.write_str("ImportFailed"),
            Event::TargetRequested => f.write_str("TargetRequested"),
            Event::TargetFailed => f.write_str("TargetFailed"),
            Event::TargetProgress(pct) => write!(f, "TargetProgress({})", pct),
            Event::TargetCompleted => f.write_str("TargetCompleted"),
            Event::TargetDownloaded => f.write_str("TargetDownloaded"),
            Event::TargetDeleted => f.write_str("TargetDeleted"),
            Event::LocaleDisabled => f.write_str("LocaleDisabled"),
            Event::LocaleEnabled => f.write_str("LocaleEnabled"),
            Event::LocaleExcluded => f.write_str("LocaleExcluded"),
        }
    }
}

impl FromStr for SourceStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "UNTRACKED" => Ok(SourceStatus::Untracked),
            "EDITED" => Ok(SourceStatus::Edited),
            "IMPORTING" => Ok(SourceStatus::Importing),
            "CURRENT" => Ok(SourceStatus::Current),
            "DISABLED" => Ok(SourceStatus::Disabled),
            "ERROR" => Ok(SourceStatus::Error),
            other => Err(format!("unknown source status '{}'", other)),
        }
    }
}

impl FromStr for TargetStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "UNTRACKED" => Ok(TargetStatus::Untracked),
            "REQUEST" => Ok(TargetStatus::Request),
            "PENDING" => Ok(TargetStatus::Pending),
            "INTERMEDIATE" => Ok(TargetStatus::Intermediate),
            "READY" => Ok(TargetStatus::Ready),
            "CURRENT" => Ok(TargetStatus::Current),
            "EDITED" => Ok(TargetStatus::Edited),
            "DISABLED" => Ok(TargetStatus::Disabled),
            "NONE" => Ok(TargetStatus::None),
            "ERROR" => Ok(TargetStatus::Error),
            other => Err(format!("unknown target status '{}'", other)),
        }
    }
}

pub fn next_source_status(
    current: SourceStatus,
    event: Event,
) -> Result<SourceStatus, InvalidTransition> {
    use SourceStatus::*;

    let next = match (current, event) {
        (Untracked | Edited | Error, Event::ContentUploaded) => Some(Importing),

        (Current | Importing | Edited | Error, Event::ContentEdited) => Some(Edited),
        (Untracked, Event::ContentEdited) => Some(Untracked),
        (Disabled, Event::ContentEdited) => Some(Disabled),

        (Importing | Current | Error, Event::ImportCompleted) => Some(Current),
        // a stale import finishing after a local edit does not make the source current
        (Edited, Event::ImportCompleted) => Some(Edited),

        (Importing | Error, Event::ImportFailed) => Some(Error),
        (Edited, Event::ImportFailed) => Some(Edited),

        (_, Event::LocaleDisabled) => Some(Disabled),
        (Disabled, Event::LocaleEnabled) => Some(Edited),
        (status, Event::LocaleEnabled) => Some(status),

        _ => None,
    };

    next.ok_or(InvalidTransition {
        from: current.to_string(),
        event,
    })
}

pub fn next_target_status(
    current: TargetStatus,
    event: Event,
) -> Result<TargetStatus, InvalidTransition> {
    use TargetStatus::*;

    let next = match (current, event) {
        (Untracked | Request | Edited | Error, Event::TargetRequested) => Some(Pending),

        (Untracked | Request | Pending | Edited | Error, Event::TargetFailed) => Some(Error),

        (Pending | Intermediate | Error, Event::TargetProgress(pct)) => Some(progress_status(pct)),
        (Ready | Current | Edited | Disabled | None, Event::TargetProgress(_)) => Some(current),

        (Untracked | Request | Pending | Intermediate | Edited | Error, Event::TargetCompleted) => {
            Some(Ready)
        }
        (Ready | Current | Disabled | None, Event::TargetCompleted) => Some(current),

        (Ready, Event::TargetDownloaded) => Some(Current),
        // interim downloads leave the target partial
        (Intermediate, Event::TargetDownloaded) => Some(Intermediate),
        (Current, Event::TargetDownloaded) => Some(Current),

        (Disabled | None, Event::TargetDeleted) => Some(current),
        (_, Event::TargetDeleted) => Some(Untracked),

        (Current, Event::ContentEdited) => Some(Edited),
        (_, Event::ContentEdited) => Some(current),

        (_, Event::LocaleDisabled) => Some(Disabled),
        (_, Event::LocaleExcluded) => Some(None),
        (Disabled | None, Event::LocaleEnabled) => Some(Request),
        (_, Event::LocaleEnabled) => Some(current),

        _ => Option::None,
    };

    next.ok_or(InvalidTransition {
        from: current.to_string(),
        event,
    })
}

fn progress_status(pct: u8) -> TargetStatus {
    match pct {
        0 => TargetStatus::Pending,
        100.. => TargetStatus::Ready,
        _ => TargetStatus::Intermediate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCES: [SourceStatus; 6] = [
        SourceStatus::Untracked,
        SourceStatus::Edited,
        SourceStatus::Importing,
        SourceStatus::Current,
        SourceStatus::Disabled,
        SourceStatus::Error,
    ];

    const TARGETS: [TargetStatus; 10] = [
        TargetStatus::Untracked,
        TargetStatus::Request,
        TargetStatus::Pending,
        TargetStatus::Intermediate,
        TargetStatus::Ready,
        TargetStatus::Current,
        TargetStatus::Edited,
        TargetStatus::Disabled,
        TargetStatus::None,
        TargetStatus::Error,
    ];

    #[test]
    fn source_happy_path() {
        let status = next_source_status(SourceStatus::Untracked, Event::ContentUploaded).unwrap();
        assert_eq!(status, SourceStatus::Importing);
        let status = next_source_status(status, Event::ImportCompleted).unwrap();
        assert_eq!(status, SourceStatus::Current);
        let status = next_source_status(status, Event::ContentEdited).unwrap();
        assert_eq!(status, SourceStatus::Edited);
    }

    #[test]
    fn upload_while_importing_is_rejected() {
        let err = next_source_status(SourceStatus::Importing, Event::ContentUploaded).unwrap_err();
        assert_eq!(err.from, "IMPORTING");
        assert_eq!(err.event, Event::ContentUploaded);
        assert!(next_source_status(SourceStatus::Current, Event::ContentUploaded).is_err());
    }

    #[test]
    fn target_happy_path() {
        let status = next_target_status(TargetStatus::Untracked, Event::TargetRequested).unwrap();
        assert_eq!(status, TargetStatus::Pending);
        let status = next_target_status(status, Event::TargetCompleted).unwrap();
        assert_eq!(status, TargetStatus::Ready);
        let status = next_target_status(status, Event::TargetDownloaded).unwrap();
        assert_eq!(status, TargetStatus::Current);
    }

    #[test]
    fn duplicate_completion_is_a_noop() {
        assert_eq!(
            next_target_status(TargetStatus::Current, Event::TargetCompleted).unwrap(),
            TargetStatus::Current
        );
        assert_eq!(
            next_target_status(TargetStatus::Current, Event::TargetDownloaded).unwrap(),
            TargetStatus::Current
        );
    }

    #[test]
    fn download_before_ready_is_rejected() {
        for status in [
            TargetStatus::Untracked,
            TargetStatus::Pending,
            TargetStatus::Edited,
        ] {
            assert!(next_target_status(status, Event::TargetDownloaded).is_err());
        }
    }

    #[test]
    fn progress_maps_to_partial_states() {
        assert_eq!(
            next_target_status(TargetStatus::Pending, Event::TargetProgress(0)).unwrap(),
            TargetStatus::Pending
        );
        assert_eq!(
            next_target_status(TargetStatus::Pending, Event::TargetProgress(40)).unwrap(),
            TargetStatus::Intermediate
        );
        assert_eq!(
            next_target_status(TargetStatus::Intermediate, Event::TargetProgress(100)).unwrap(),
            TargetStatus::Ready
        );
        assert_eq!(
            next_target_status(TargetStatus::Current, Event::TargetProgress(50)).unwrap(),
            TargetStatus::Current
        );
    }

    #[test]
    fn edit_only_stales_current_targets() {
        for status in TARGETS {
            let next = next_target_status(status, Event::ContentEdited).unwrap();
            if status == TargetStatus::Current {
                assert_eq!(next, TargetStatus::Edited);
            } else {
                assert_eq!(next, status);
            }
        }
    }

    #[test]
    fn locale_toggles() {
        assert_eq!(
            next_target_status(TargetStatus::Ready, Event::LocaleDisabled).unwrap(),
            TargetStatus::Disabled
        );
        assert_eq!(
            next_target_status(TargetStatus::Disabled, Event::LocaleEnabled).unwrap(),
            TargetStatus::Request
        );
        assert_eq!(
            next_target_status(TargetStatus::Pending, Event::LocaleExcluded).unwrap(),
            TargetStatus::None
        );
        assert_eq!(
            next_source_status(SourceStatus::Disabled, Event::LocaleEnabled).unwrap(),
            SourceStatus::Edited
        );
    }

    #[test]
    fn target_events_are_invalid_for_sources() {
        for status in SOURCES {
            assert!(next_source_status(status, Event::TargetRequested).is_err());
            assert!(next_source_status(status, Event::TargetDownloaded).is_err());
        }
        for status in TARGETS {
            assert!(next_target_status(status, Event::ContentUploaded).is_err());
            assert!(next_target_status(status, Event::ImportCompleted).is_err());
        }
    }

    #[test]
    fn statuses_round_trip_through_strings() {
        assert_eq!("current".parse::<TargetStatus>().unwrap(), TargetStatus::Current);
        assert_eq!("IMPORTING".parse::<SourceStatus>().unwrap(), SourceStatus::Importing);
        assert!("bogus".parse::<TargetStatus>().is_err());
        let json = serde_json::to_string(&TargetStatus::Intermediate).unwrap();
        assert_eq!(json, "\"INTERMEDIATE\"");
    }
}
