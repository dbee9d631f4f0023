use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::retry::{Backoff, is_throttled, retry_after};
use super::{Progress, TargetHints, TmsClient, TmsError, TmsFuture, UploadRequest};
use crate::settings::TmsSettings;

const DOCUMENT_FORMAT: &str = "JSON";

/// REST transport for the TMS document API.
#[derive(Debug, Clone)]
pub struct HttpTms {
    client: reqwest::Client,
    base_url: String,
    token: String,
    community: Option<String>,
    /// Account-level defaults used when a profile leaves a hint empty.
    project: Option<String>,
    vault: Option<String>,
    workflow: Option<String>,
}

impl HttpTms {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self, TmsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TmsError::Transport(format!("failed to create HTTP client: {}", err)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            community: None,
            project: None,
            vault: None,
            workflow: None,
        })
    }

    pub fn from_settings(settings: &TmsSettings) -> Result<Self, TmsError> {
        let mut tms = Self::new(
            settings.base_url.clone(),
            settings.token.clone().unwrap_or_default(),
            Duration::from_secs(settings.timeout_secs.max(1)),
        )?;
        tms.community = settings.community.clone();
        tms.project = settings.project.clone();
        tms.vault = settings.vault.clone();
        tms.workflow = settings.workflow.clone();
        Ok(tms)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn document_url(&self, document_id: &str, suffix: &str) -> String {
        if suffix.is_empty() {
            self.url(&format!("document/{}", document_id))
        } else {
            self.url(&format!("document/{}/{}", document_id, suffix))
        }
    }

    /// Sends the request built by `build`, retrying throttled responses.
    async fn send<F>(&self, operation: &str, build: F) -> Result<(StatusCode, String), TmsError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut backoff = Backoff::new(operation);
        loop {
            let response = build()
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|err| TmsError::Transport(format!("{} failed: {}", operation, err)))?;
            let status = response.status();
            let retry_after = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            debug!("TMS {} -> {}", operation, status);
            if status.is_success() {
                return Ok((status, text));
            }
            if is_throttled(status, &text) && backoff.wait(retry_after).await {
                continue;
            }
            return Err(classify(status, &text));
        }
    }

    fn target_form(&self, locale: &str, hints: &TargetHints) -> Vec<(String, String)> {
        let mut form = vec![("locale_code".to_string(), locale.to_string())];
        if let Some(workflow) = or_default(&hints.workflow, &self.workflow) {
            form.push(("workflow_id".to_string(), workflow.to_string()));
        }
        if let Some(vault) = or_default(&hints.vault, &self.vault) {
            form.push(("vault_id".to_string(), vault.to_string()));
        }
        form
    }

    fn upload_form(&self, request: &UploadRequest) -> Vec<(String, String)> {
        let mut form = vec![
            ("title".to_string(), request.title.clone()),
            ("content".to_string(), request.content.clone()),
            ("locale_code".to_string(), request.locale.clone()),
            ("format".to_string(), DOCUMENT_FORMAT.to_string()),
        ];
        let hints = &request.hints;
        let optional = [
            ("project_id", or_default(&hints.project, &self.project)),
            ("vault_id", or_default(&hints.vault, &self.vault)),
            ("translation_workflow_id", or_default(&hints.workflow, &self.workflow)),
            ("fprm_id", non_blank(&hints.filter)),
            ("fprm_subfilter_id", non_blank(&hints.subfilter)),
            ("job_id", non_blank(&hints.job_id)),
            ("community_id", non_blank(&self.community)),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                form.push((key.to_string(), value.to_string()));
            }
        }
        for (key, value) in &hints.metadata {
            form.push((key.clone(), value.clone()));
        }
        form
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.trim().is_empty())
}

fn or_default<'a>(hint: &'a Option<String>, default: &'a Option<String>) -> Option<&'a str> {
    non_blank(hint).or_else(|| non_blank(default))
}

impl TmsClient for HttpTms {
    fn upload_document(&self, request: UploadRequest) -> TmsFuture<'_, String> {
        Box::pin(async move {
            let url = self.url("document");
            let form = self.upload_form(&request);
            let (_, body) = self
                .send("upload", || self.client.post(&url).form(&form))
                .await?;
            parse_document_id(&body)
        })
    }

    fn update_document(
        &self,
        document_id: &str,
        request: UploadRequest,
    ) -> TmsFuture<'_, String> {
        let document_id = document_id.to_string();
        Box::pin(async move {
            let url = self.document_url(&document_id, "");
            let form = self.upload_form(&request);
            let (_, body) = self
                .send("update", || self.client.patch(&url).form(&form))
                .await?;
            Ok(parse_document_id(&body).unwrap_or(document_id))
        })
    }

    fn add_target(
        &self,
        document_id: &str,
        locale: &str,
        hints: TargetHints,
    ) -> TmsFuture<'_, ()> {
        let url = self.document_url(document_id, "translation");
        let form = self.target_form(locale, &hints);
        Box::pin(async move {
            self.send("add target", || self.client.post(&url).form(&form))
                .await?;
            Ok(())
        })
    }

    fn check_document_status(&self, document_id: &str) -> TmsFuture<'_, Progress> {
        let url = self.document_url(document_id, "status");
        Box::pin(async move {
            let (_, body) = self
                .send("document status", || self.client.get(&url))
                .await?;
            parse_document_progress(&body)
        })
    }

    fn check_target_status(&self, document_id: &str, locale: &str) -> TmsFuture<'_, Progress> {
        let url = self.document_url(document_id, "translation");
        let locale = locale.to_string();
        Box::pin(async move {
            let (_, body) = self
                .send("target status", || self.client.get(&url))
                .await?;
            parse_target_progress(&body, &locale)
        })
    }

    fn download_target(&self, document_id: &str, locale: &str) -> TmsFuture<'_, String> {
        let url = self.document_url(document_id, "content");
        let locale = locale.to_string();
        Box::pin(async move {
            let (_, body) = self
                .send("download", || {
                    self.client
                        .get(&url)
                        .query(&[("locale_code", locale.as_str())])
                })
                .await?;
            Ok(body)
        })
    }

    fn delete_document(&self, document_id: &str) -> TmsFuture<'_, ()> {
        let url = self.document_url(document_id, "");
        Box::pin(async move {
            match self.send("delete", || self.client.delete(&url)).await {
                Ok(_) | Err(TmsError::NotFound(_)) => Ok(()),
                Err(err) => Err(err),
            }
        })
    }

    fn archive_document(&self, document_id: &str) -> TmsFuture<'_, ()> {
        let url = self.document_url(document_id, "archive");
        Box::pin(async move {
            match self.send("archive", || self.client.post(&url)).await {
                Ok(_) | Err(TmsError::NotFound(_)) => Ok(()),
                Err(err) => Err(err),
            }
        })
    }
}

fn classify(status: StatusCode, body: &str) -> TmsError {
    let message = extract_error_message(body).unwrap_or_else(|| body.trim().to_string());
    match status.as_u16() {
        401 | 403 => TmsError::Unauthenticated(message),
        404 | 410 => TmsError::NotFound(message),
        400..=499 => TmsError::Rejected {
            status: status.as_u16(),
            message,
        },
        _ => TmsError::Transport(format!("{}: {}", status, message)),
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    messages: Vec<String>,
    #[serde(default)]
    message: Option<String>,
}

fn extract_error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    if let Some(message) = parsed.message.filter(|message| !message.is_empty()) {
        return Some(message);
    }
    if parsed.messages.is_empty() {
        None
    } else {
        Some(parsed.messages.join("; "))
    }
}

#[derive(Debug, Deserialize)]
struct EntityBody {
    #[serde(default)]
    properties: serde_json::Value,
    #[serde(default)]
    entities: Vec<EntityBody>,
}

fn parse_entity(body: &str) -> Result<EntityBody, TmsError> {
    serde_json::from_str(body)
        .map_err(|err| TmsError::Transport(format!("unexpected TMS response: {}", err)))
}

fn parse_document_id(body: &str) -> Result<String, TmsError> {
    let entity = parse_entity(body)?;
    let properties = &entity.properties;
    properties
        .get("next_document_id")
        .or_else(|| properties.get("id"))
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
        .ok_or_else(|| TmsError::Transport("TMS response is missing a document id".to_string()))
}

fn percent(value: &serde_json::Value, key: &str) -> u8 {
    value
        .get(key)
        .and_then(|value| value.as_u64())
        .unwrap_or(0)
        .min(100) as u8
}

fn parse_document_progress(body: &str) -> Result<Progress, TmsError> {
    let entity = parse_entity(body)?;
    Ok(Progress::partial(percent(&entity.properties, "progress")))
}

fn parse_target_progress(body: &str, locale: &str) -> Result<Progress, TmsError> {
    let entity = parse_entity(body)?;
    let wanted = locale.replace('_', "-").to_lowercase();
    entity
        .entities
        .iter()
        .find(|target| {
            target
                .properties
                .get("locale_code")
                .and_then(|value| value.as_str())
                .map(|code| code.replace('_', "-").to_lowercase() == wanted)
                .unwrap_or(false)
        })
        .map(|target| Progress::partial(percent(&target.properties, "percent_complete")))
        .ok_or_else(|| TmsError::NotFound(format!("no {} target on document", locale)))
}
