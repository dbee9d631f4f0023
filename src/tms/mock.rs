//! Deterministic in-process TMS.
//!
//! Records every call, hands out sequential document ids and lets callers
//! inject failures per operation. Used by the test suite and by `--dry-run`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{Progress, TargetHints, TmsClient, TmsError, TmsFuture, UploadRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TmsOperation {
    Upload,
    Update,
    AddTarget,
    CheckDocument,
    CheckTarget,
    Download,
    Delete,
    Archive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmsCall {
    pub operation: TmsOperation,
    pub document_id: Option<String>,
    pub locale: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<TmsCall>,
    failures: HashMap<TmsOperation, VecDeque<TmsError>>,
    documents: HashMap<String, String>,
    document_progress: HashMap<String, Progress>,
    target_progress: HashMap<(String, String), Progress>,
}

#[derive(Debug, Default)]
pub struct MockTms {
    state: Mutex<MockState>,
    next_id: AtomicUsize,
    delay_ms: u64,
}

impl MockTms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay_ms` before answering.
    pub fn with_delay(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Self::default()
        }
    }

    /// The next call of `operation` fails with `error`. Repeated calls queue up.
    pub fn fail_next(&self, operation: TmsOperation, error: TmsError) {
        let mut state = self.lock();
        state.failures.entry(operation).or_default().push_back(error);
    }

    pub fn set_document_progress(&self, document_id: &str, progress: Progress) {
        self.lock()
            .document_progress
            .insert(document_id.to_string(), progress);
    }

    pub fn set_target_progress(&self, document_id: &str, locale: &str, progress: Progress) {
        self.lock()
            .target_progress
            .insert((document_id.to_string(), locale.to_string()), progress);
    }

    pub fn calls(&self) -> Vec<TmsCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, operation: TmsOperation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    pub fn document_content(&self, document_id: &str) -> Option<String> {
        self.lock().documents.get(document_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(
        &self,
        operation: TmsOperation,
        document_id: Option<&str>,
        locale: Option<&str>,
    ) -> Result<(), TmsError> {
        let mut state = self.lock();
        state.calls.push(TmsCall {
            operation,
            document_id: document_id.map(|value| value.to_string()),
            locale: locale.map(|value| value.to_string()),
        });
        match state
            .failures
            .get_mut(&operation)
            .and_then(|queue| queue.pop_front())
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn pause(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
    }

    fn next_document_id(&self) -> String {
        format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl TmsClient for MockTms {
    fn upload_document(&self, request: UploadRequest) -> TmsFuture<'_, String> {
        Box::pin(async move {
            self.pause().await;
            self.record(TmsOperation::Upload, None, Some(&request.locale))?;
            let id = self.next_document_id();
            self.lock().documents.insert(id.clone(), request.content);
            Ok(id)
        })
    }

    fn update_document(
        &self,
        document_id: &str,
        request: UploadRequest,
    ) -> TmsFuture<'_, String> {
        let document_id = document_id.to_string();
        Box::pin(async move {
            self.pause().await;
            self.record(TmsOperation::Update, Some(&document_id), Some(&request.locale))?;
            let mut state = self.lock();
            if !state.documents.contains_key(&document_id) {
                return Err(TmsError::NotFound(document_id));
            }
            state.documents.insert(document_id.clone(), request.content);
            Ok(document_id)
        })
    }

    fn add_target(
        &self,
        document_id: &str,
        locale: &str,
        _hints: TargetHints,
    ) -> TmsFuture<'_, ()> {
        let document_id = document_id.to_string();
        let locale = locale.to_string();
        Box::pin(async move {
            self.pause().await;
            self.record(TmsOperation::AddTarget, Some(&document_id), Some(&locale))
        })
    }

    fn check_document_status(&self, document_id: &str) -> TmsFuture<'_, Progress> {
        let document_id = document_id.to_string();
        Box::pin(async move {
            self.pause().await;
            self.record(TmsOperation::CheckDocument, Some(&document_id), None)?;
            Ok(self
                .lock()
                .document_progress
                .get(&document_id)
                .copied()
                .unwrap_or_else(Progress::complete))
        })
    }

    fn check_target_status(&self, document_id: &str, locale: &str) -> TmsFuture<'_, Progress> {
        let key = (document_id.to_string(), locale.to_string());
        Box::pin(async move {
            self.pause().await;
            self.record(TmsOperation::CheckTarget, Some(&key.0), Some(&key.1))?;
            Ok(self
                .lock()
                .target_progress
                .get(&key)
                .copied()
                .unwrap_or_else(Progress::complete))
        })
    }

    fn download_target(&self, document_id: &str, locale: &str) -> TmsFuture<'_, String> {
        let document_id = document_id.to_string();
        let locale = locale.to_string();
        Box::pin(async move {
            self.pause().await;
            self.record(TmsOperation::Download, Some(&document_id), Some(&locale))?;
            let source = self
                .lock()
                .documents
                .get(&document_id)
                .cloned()
                .ok_or_else(|| TmsError::NotFound(document_id.clone()))?;
            Ok(translate_blob(&source, &locale))
        })
    }

    fn delete_document(&self, document_id: &str) -> TmsFuture<'_, ()> {
        let document_id = document_id.to_string();
        Box::pin(async move {
            self.pause().await;
            self.record(TmsOperation::Delete, Some(&document_id), None)?;
            self.lock().documents.remove(&document_id);
            Ok(())
        })
    }

    fn archive_document(&self, document_id: &str) -> TmsFuture<'_, ()> {
        let document_id = document_id.to_string();
        Box::pin(async move {
            self.pause().await;
            self.record(TmsOperation::Archive, Some(&document_id), None)?;
            self.lock().documents.remove(&document_id);
            Ok(())
        })
    }
}

/// Suffixes every string value of a JSON blob with the locale.
fn translate_blob(source: &str, locale: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(source) {
        Ok(mut value) => {
            suffix_strings(&mut value, locale);
            value.to_string()
        }
        Err(_) => format!("{}_{}", source, locale),
    }
}

fn suffix_strings(value: &mut serde_json::Value, locale: &str) {
    match value {
        serde_json::Value::String(text) => {
            text.push('_');
            text.push_str(locale);
        }
        serde_json::Value::Array(items) => {
            for item in items {
                suffix_strings(item, locale);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                suffix_strings(item, locale);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(content: &str) -> UploadRequest {
        UploadRequest {
            title: "t".to_string(),
            content: content.to_string(),
            locale: "en-US".to_string(),
            hints: Default::default(),
        }
    }

    #[tokio::test]
    async fn hands_out_sequential_ids_and_records_calls() {
        let tms = MockTms::new();
        let first = tms.upload_document(request("{}")).await.unwrap();
        let second = tms.upload_document(request("{}")).await.unwrap();
        assert_eq!(first, "doc-1");
        assert_eq!(second, "doc-2");
        assert_eq!(tms.count(TmsOperation::Upload), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let tms = MockTms::new();
        tms.fail_next(TmsOperation::Upload, TmsError::Transport("timeout".to_string()));
        assert!(tms.upload_document(request("{}")).await.is_err());
        assert!(tms.upload_document(request("{}")).await.is_ok());
    }

    #[tokio::test]
    async fn downloads_suffix_string_fields() {
        let tms = MockTms::new();
        let id = tms
            .upload_document(request(r#"{"title":"Hello","count":2}"#))
            .await
            .unwrap();
        let blob = tms.download_target(&id, "de-DE").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&blob).unwrap();
        assert_eq!(value["title"], "Hello_de-DE");
        assert_eq!(value["count"], 2);
    }
}
