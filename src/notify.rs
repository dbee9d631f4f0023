//! TMS webhook notifications.
//!
//! Notifications are delivered at least once and possibly out of order. A
//! document the store does not know, a stale transition or a duplicate
//! delivery is answered normally with a message; only transport, credential
//! and data errors are propagated so the TMS retries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::content::UnitId;
use crate::error::SyncError;
use crate::orchestrator::TranslationOrchestrator;

/// Raw webhook parameters, from the query string or a form body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Notification {
    pub document_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub locale: Option<String>,
    pub locale_code: Option<String>,
    pub complete: Option<String>,
    pub progress: Option<String>,
    pub project_id: Option<String>,
}

impl Notification {
    /// Fills fields missing here from `fallback`.
    pub fn or(self, fallback: Notification) -> Notification {
        Notification {
            document_id: self.document_id.or(fallback.document_id),
            kind: self.kind.or(fallback.kind),
            locale: self.locale.or(fallback.locale),
            locale_code: self.locale_code.or(fallback.locale_code),
            complete: self.complete.or(fallback.complete),
            progress: self.progress.or(fallback.progress),
            project_id: self.project_id.or(fallback.project_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    DocumentUploaded,
    DocumentUpdated,
    ImportFailure,
    Target,
    Phase,
    TargetDeleted,
    TargetCancelled,
    DocumentDeleted,
    DocumentArchived,
    DocumentCancelled,
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "document_uploaded" => Ok(Self::DocumentUploaded),
            "document_updated" => Ok(Self::DocumentUpdated),
            "import_failure" => Ok(Self::ImportFailure),
            "target" => Ok(Self::Target),
            "phase" => Ok(Self::Phase),
            "target_deleted" => Ok(Self::TargetDeleted),
            "target_cancelled" => Ok(Self::TargetCancelled),
            "document_deleted" => Ok(Self::DocumentDeleted),
            "document_archived" => Ok(Self::DocumentArchived),
            "document_cancelled" => Ok(Self::DocumentCancelled),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::DocumentUploaded => "document_uploaded",
            Self::DocumentUpdated => "document_updated",
            Self::ImportFailure => "import_failure",
            Self::Target => "target",
            Self::Phase => "phase",
            Self::TargetDeleted => "target_deleted",
            Self::TargetCancelled => "target_cancelled",
            Self::DocumentDeleted => "document_deleted",
            Self::DocumentArchived => "document_archived",
            Self::DocumentCancelled => "document_cancelled",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum NotificationOutcome {
    RequestTranslations { request_translations: Vec<String> },
    Download { download: bool },
    Nothing {},
}

impl NotificationOutcome {
    /// Result reported when nothing was done for a notification of `kind`.
    fn idle(kind: NotificationType) -> Self {
        match kind {
            NotificationType::DocumentUploaded | NotificationType::DocumentUpdated => {
                Self::RequestTranslations {
                    request_translations: Vec::new(),
                }
            }
            NotificationType::Target | NotificationType::Phase => Self::Download { download: false },
            _ => Self::Nothing {},
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationResponse {
    pub result: NotificationOutcome,
    pub messages: Vec<String>,
}

impl NotificationResponse {
    fn new(result: NotificationOutcome, message: impl Into<String>) -> Self {
        Self {
            result,
            messages: vec![message.into()],
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("bad notification: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub struct NotificationHandler {
    orchestrator: Arc<TranslationOrchestrator>,
}

impl NotificationHandler {
    pub fn new(orchestrator: Arc<TranslationOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn handle(&self, notification: Notification) -> Result<NotificationResponse, NotifyError> {
        let document_id = notification
            .document_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| NotifyError::BadRequest("document_id is required".to_string()))?
            .to_string();
        let raw_kind = notification
            .kind
            .as_deref()
            .ok_or_else(|| NotifyError::BadRequest("type is required".to_string()))?;
        let kind = match raw_kind.parse::<NotificationType>() {
            Ok(kind) => kind,
            Err(other) => {
                debug!("ignoring '{}' notification for {}", other, document_id);
                return Ok(NotificationResponse::new(
                    NotificationOutcome::Nothing {},
                    format!("notification type '{}' is not handled", other),
                ));
            }
        };
        let progress = parse_progress(notification.progress.as_deref())?;
        let complete = parse_flag(notification.complete.as_deref())? || progress == Some(100);
        debug!(
            "{} notification for document {} (project {})",
            kind,
            document_id,
            notification.project_id.as_deref().unwrap_or("-")
        );

        let unit = match self.orchestrator.store().get_by_document_id(&document_id) {
            Ok((unit, _)) => unit,
            Err(err) if err.is_not_found() => {
                return Ok(NotificationResponse::new(
                    NotificationOutcome::idle(kind),
                    format!("document {} is not tracked", document_id),
                ));
            }
            Err(err) => return Err(err.into()),
        };

        let locale = notification
            .locale_code
            .as_deref()
            .or(notification.locale.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        let result = self
            .dispatch(kind, &unit, &document_id, locale, complete, progress)
            .await;
        match result {
            Ok(response) => Ok(response),
            Err(err) => self.absorb(kind, &unit, &document_id, err),
        }
    }

    async fn dispatch(
        &self,
        kind: NotificationType,
        unit: &UnitId,
        document_id: &str,
        locale: Option<&str>,
        complete: bool,
        progress: Option<u8>,
    ) -> Result<NotificationResponse, NotifyError> {
        let orchestrator = &self.orchestrator;
        match kind {
            NotificationType::DocumentUploaded | NotificationType::DocumentUpdated => {
                let check = orchestrator.import_completed(unit, document_id).await?;
                let message = if check.requested.is_empty() {
                    format!("{} is {}", unit, check.status)
                } else {
                    format!("{} is {}; requested {}", unit, check.status, check.requested.join(", "))
                };
                Ok(NotificationResponse::new(
                    NotificationOutcome::RequestTranslations {
                        request_translations: check.requested,
                    },
                    message,
                ))
            }
            NotificationType::ImportFailure => {
                let status = orchestrator.import_failed(unit, document_id)?;
                Ok(NotificationResponse::new(
                    NotificationOutcome::Nothing {},
                    format!("import of {} failed; source is {}", unit, status),
                ))
            }
            NotificationType::Target | NotificationType::Phase => {
                let Some(local) = self.local_locale(locale)? else {
                    return Ok(NotificationResponse::new(
                        NotificationOutcome::Download { download: false },
                        format!("locale {} is not enabled", locale.unwrap_or_default()),
                    ));
                };
                if complete {
                    let check = orchestrator
                        .target_completed(unit, document_id, &local)
                        .await?;
                    Ok(NotificationResponse::new(
                        NotificationOutcome::Download {
                            download: check.downloaded,
                        },
                        format!("{} target of {} is {}", local, unit, check.status),
                    ))
                } else {
                    let Some(percent) = progress else {
                        return Ok(NotificationResponse::new(
                            NotificationOutcome::Download { download: false },
                            format!("{} target of {} reported no progress", local, unit),
                        ));
                    };
                    let status = orchestrator.target_progress(unit, document_id, &local, percent)?;
                    Ok(NotificationResponse::new(
                        NotificationOutcome::Download { download: false },
                        format!("{} target of {} at {}% is {}", local, unit, percent, status),
                    ))
                }
            }
            NotificationType::TargetDeleted | NotificationType::TargetCancelled => {
                let Some(local) = self.local_locale(locale)? else {
                    return Ok(NotificationResponse::new(
                        NotificationOutcome::Nothing {},
                        format!("locale {} is not enabled", locale.unwrap_or_default()),
                    ));
                };
                let status = orchestrator.target_deleted(unit, document_id, &local)?;
                Ok(NotificationResponse::new(
                    NotificationOutcome::Nothing {},
                    format!("{} target of {} is {}", local, unit, status),
                ))
            }
            NotificationType::DocumentDeleted
            | NotificationType::DocumentArchived
            | NotificationType::DocumentCancelled => {
                orchestrator.untrack(unit, document_id)?;
                Ok(NotificationResponse::new(
                    NotificationOutcome::Nothing {},
                    format!("{} no longer tracks document {}", unit, document_id),
                ))
            }
        }
    }

    fn local_locale(&self, locale: Option<&str>) -> Result<Option<String>, NotifyError> {
        let locale = locale
            .ok_or_else(|| NotifyError::BadRequest("locale_code is required".to_string()))?;
        Ok(self.orchestrator.locales().to_local(locale))
    }

    /// Conditions that are expected under at-least-once delivery become messages.
    fn absorb(
        &self,
        kind: NotificationType,
        unit: &UnitId,
        document_id: &str,
        err: NotifyError,
    ) -> Result<NotificationResponse, NotifyError> {
        let NotifyError::Sync(err) = err else {
            return Err(err);
        };
        let message = match &err {
            SyncError::NotFound(_) => format!("document {} is not tracked", document_id),
            SyncError::InvalidTransition(transition) => {
                warn!("ignoring {} notification for {}: {}", kind, unit, transition);
                format!("ignored: {}", transition)
            }
            SyncError::Busy(_) => {
                info!("{} notification for {} overlaps an action in flight", kind, unit);
                format!("{} is already being processed", unit)
            }
            SyncError::LocaleDisabled { .. } => err.to_string(),
            _ => {
                warn!("{} notification for {} failed: {}", kind, unit, err);
                return Err(NotifyError::Sync(err));
            }
        };
        Ok(NotificationResponse::new(NotificationOutcome::idle(kind), message))
    }
}

fn parse_flag(value: Option<&str>) -> Result<bool, NotifyError> {
    match value.map(|value| value.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(value) => match value.as_str() {
            "" | "0" | "false" | "no" | "off" => Ok(false),
            "1" | "true" | "yes" | "on" => Ok(true),
            other => Err(NotifyError::BadRequest(format!("complete must be a boolean, got '{}'", other))),
        },
    }
}

fn parse_progress(value: Option<&str>) -> Result<Option<u8>, NotifyError> {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    match value.parse::<u8>() {
        Ok(progress) if progress <= 100 => Ok(Some(progress)),
        _ => Err(NotifyError::BadRequest(format!(
            "progress must be an integer between 0 and 100, got '{}'",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MemoryContent;
    use crate::profile::{LocaleOverride, Profile};
    use crate::status::{SourceStatus, TargetStatus};
    use crate::test_util::{article, orchestrator_with};
    use crate::tms::{MockTms, TmsError, TmsOperation};
    use insta::assert_json_snapshot;

    async fn tracked(profile: Profile) -> (Arc<MockTms>, NotificationHandler, Arc<TranslationOrchestrator>) {
        let tms = Arc::new(MockTms::new());
        let content = Arc::new(MemoryContent::new());
        content.insert(article("node:1"), r#"{"title":"Hello"}"#);
        let orchestrator = Arc::new(orchestrator_with(profile, tms.clone(), content));
        orchestrator.upload(&"node:1".into(), None).await.unwrap();
        (tms, NotificationHandler::new(orchestrator.clone()), orchestrator)
    }

    fn notification(kind: &str, document_id: &str, locale: Option<&str>, complete: bool) -> Notification {
        Notification {
            document_id: Some(document_id.to_string()),
            kind: Some(kind.to_string()),
            locale_code: locale.map(|value| value.to_string()),
            complete: Some(complete.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn import_completion_requests_enabled_locales() {
        let profile = Profile::automatic().with_override("es", LocaleOverride::Disabled);
        let (_, handler, _) = tracked(profile).await;
        let response = handler
            .handle(notification("document_uploaded", "doc-1", None, false))
            .await
            .unwrap();
        assert_json_snapshot!(response, @r###"
        {
          "result": {
            "request_translations": [
              "de",
              "fr"
            ]
          },
          "messages": [
            "node:1 is CURRENT; requested de, fr"
          ]
        }
        "###);
    }

    #[tokio::test]
    async fn duplicate_target_completion_is_a_no_op() {
        let (tms, handler, orchestrator) = tracked(Profile::automatic()).await;
        handler
            .handle(notification("document_uploaded", "doc-1", None, false))
            .await
            .unwrap();
        let first = handler
            .handle(notification("target", "doc-1", Some("de_DE"), true))
            .await
            .unwrap();
        assert_eq!(first.result, NotificationOutcome::Download { download: true });
        let second = handler
            .handle(notification("target", "doc-1", Some("de-DE"), true))
            .await
            .unwrap();
        assert_json_snapshot!(second, @r###"
        {
          "result": {
            "download": false
          },
          "messages": [
            "de target of node:1 is CURRENT"
          ]
        }
        "###);
        assert_eq!(tms.count(TmsOperation::Download), 1);
        let metadata = orchestrator.store().get(&"node:1".into()).unwrap();
        assert_eq!(metadata.target_status("de"), TargetStatus::Current);
    }

    #[tokio::test]
    async fn unknown_documents_are_not_errors() {
        let (_, handler, _) = tracked(Profile::manual()).await;
        let response = handler
            .handle(notification("target", "doc-404", Some("de-DE"), true))
            .await
            .unwrap();
        assert_json_snapshot!(response, @r###"
        {
          "result": {
            "download": false
          },
          "messages": [
            "document doc-404 is not tracked"
          ]
        }
        "###);
    }

    #[tokio::test]
    async fn malformed_parameters_are_rejected() {
        let (_, handler, _) = tracked(Profile::manual()).await;
        let missing = handler.handle(Notification::default()).await.unwrap_err();
        assert!(matches!(missing, NotifyError::BadRequest(_)));

        let mut bad_progress = notification("phase", "doc-1", Some("de-DE"), false);
        bad_progress.progress = Some("250".to_string());
        assert!(matches!(
            handler.handle(bad_progress).await,
            Err(NotifyError::BadRequest(_))
        ));

        let no_locale = notification("target", "doc-1", None, true);
        assert!(matches!(
            handler.handle(no_locale).await,
            Err(NotifyError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn out_of_order_and_removal_notifications() {
        let (_, handler, orchestrator) = tracked(Profile::manual()).await;
        let unit = UnitId::from("node:1");

        // progress for a target that was never requested
        let stale = handler
            .handle(notification("phase", "doc-1", Some("de-DE"), false))
            .await
            .unwrap();
        assert_eq!(stale.result, NotificationOutcome::Download { download: false });

        let failed = handler
            .handle(notification("import_failure", "doc-1", None, false))
            .await
            .unwrap();
        assert_eq!(failed.result, NotificationOutcome::Nothing {});
        assert_eq!(
            orchestrator.status(&unit).unwrap().source_status,
            SourceStatus::Error
        );

        let ignored = handler
            .handle(notification("document_renamed", "doc-1", None, false))
            .await
            .unwrap();
        assert_eq!(
            ignored.messages,
            vec!["notification type 'document_renamed' is not handled"]
        );

        handler
            .handle(notification("document_archived", "doc-1", None, false))
            .await
            .unwrap();
        assert!(orchestrator.store().get_by_document_id("doc-1").is_err());
        assert_eq!(
            orchestrator.status(&unit).unwrap().source_status,
            SourceStatus::Untracked
        );
    }

    #[tokio::test]
    async fn transport_failures_propagate() {
        let (tms, handler, orchestrator) = tracked(Profile::automatic()).await;
        handler
            .handle(notification("document_uploaded", "doc-1", None, false))
            .await
            .unwrap();
        tms.fail_next(TmsOperation::Download, TmsError::Transport("timeout".into()));
        let err = handler
            .handle(notification("target", "doc-1", Some("fr-FR"), true))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Sync(SyncError::Transport(_))));
        let metadata = orchestrator.store().get(&"node:1".into()).unwrap();
        assert_eq!(metadata.target_status("fr"), TargetStatus::Ready);

        // redelivery finishes the download
        let retried = handler
            .handle(notification("target", "doc-1", Some("fr-FR"), true))
            .await
            .unwrap();
        assert_eq!(retried.result, NotificationOutcome::Download { download: true });
    }

    #[tokio::test]
    async fn progress_without_a_percentage_keeps_interim_state() {
        let tms = Arc::new(MockTms::new());
        let content = Arc::new(MemoryContent::new());
        content.insert(article("node:1"), r#"{"title":"Hello"}"#);
        let orchestrator = Arc::new(
            orchestrator_with(Profile::manual(), tms, content).with_interim_downloads(true),
        );
        let unit = UnitId::from("node:1");
        orchestrator.upload(&unit, None).await.unwrap();
        orchestrator.check_source_status(&unit).await.unwrap();
        orchestrator.request_target(&unit, "de").await.unwrap();
        let handler = NotificationHandler::new(orchestrator.clone());

        let mut halfway = notification("phase", "doc-1", Some("de-DE"), false);
        halfway.progress = Some("40".to_string());
        handler.handle(halfway).await.unwrap();
        assert_eq!(
            orchestrator.status(&unit).unwrap().target_status("de"),
            TargetStatus::Intermediate
        );

        let bare = handler
            .handle(notification("phase", "doc-1", Some("de-DE"), false))
            .await
            .unwrap();
        assert_eq!(bare.messages, vec!["de target of node:1 reported no progress"]);
        assert_eq!(
            orchestrator.status(&unit).unwrap().target_status("de"),
            TargetStatus::Intermediate
        );
    }

    #[tokio::test]
    async fn source_locale_targets_are_ignored() {
        let (_, handler, orchestrator) = tracked(Profile::automatic()).await;
        handler
            .handle(notification("document_uploaded", "doc-1", None, false))
            .await
            .unwrap();
        let response = handler
            .handle(notification("target", "doc-1", Some("en-US"), true))
            .await
            .unwrap();
        assert_eq!(response.result, NotificationOutcome::Download { download: false });
        let metadata = orchestrator.store().get(&"node:1".into()).unwrap();
        assert!(!metadata.target_statuses.contains_key("en"));
    }
}
