//! Per-target actions offered to users, with an ordered extension point.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::content::ContentUnit;
use crate::status::{SourceStatus, TargetStatus};
use crate::store::TranslationMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Request,
    Check,
    Download,
    ReRequest,
    OpenWorkbench,
    Custom,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ActionKind::Request => "request",
            ActionKind::Check => "check",
            ActionKind::Download => "download",
            ActionKind::ReRequest => "re_request",
            ActionKind::OpenWorkbench => "open_workbench",
            ActionKind::Custom => "custom",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetAction {
    pub kind: ActionKind,
    pub locale: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl TargetAction {
    pub fn new(kind: ActionKind, locale: &str, label: impl Into<String>) -> Self {
        Self {
            kind,
            locale: locale.to_string(),
            label: label.into(),
            link: None,
        }
    }
}

/// Rewrites the action list for one target. Hooks run in registration order,
/// each receiving the previous hook's output.
pub type ActionHook =
    Arc<dyn Fn(&ContentUnit, &str, Vec<TargetAction>) -> Vec<TargetAction> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ActionRegistry {
    hooks: Vec<ActionHook>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, hook: F)
    where
        F: Fn(&ContentUnit, &str, Vec<TargetAction>) -> Vec<TargetAction> + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(hook));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn apply(
        &self,
        unit: &ContentUnit,
        locale: &str,
        base: Vec<TargetAction>,
    ) -> Vec<TargetAction> {
        self.hooks
            .iter()
            .fold(base, |actions, hook| hook(unit, locale, actions))
    }
}

/// Actions that make sense for `locale` given the recorded statuses.
pub fn available_actions(metadata: &TranslationMetadata, locale: &str) -> Vec<TargetAction> {
    let status = metadata.target_status(locale);
    let source_current = metadata.source_status == SourceStatus::Current;
    let mut actions = Vec::new();

    match status {
        TargetStatus::Untracked | TargetStatus::Request if source_current => {
            actions.push(TargetAction::new(
                ActionKind::Request,
                locale,
                format!("Request {} translation", locale),
            ));
        }
        TargetStatus::Pending => {
            actions.push(TargetAction::new(
                ActionKind::Check,
                locale,
                format!("Check {} progress", locale),
            ));
        }
        TargetStatus::Intermediate => {
            actions.push(TargetAction::new(
                ActionKind::Check,
                locale,
                format!("Check {} progress", locale),
            ));
            actions.push(TargetAction::new(
                ActionKind::Download,
                locale,
                format!("Download interim {} translation", locale),
            ));
        }
        TargetStatus::Ready => {
            actions.push(TargetAction::new(
                ActionKind::Download,
                locale,
                format!("Download {} translation", locale),
            ));
        }
        TargetStatus::Edited | TargetStatus::Error if source_current => {
            actions.push(TargetAction::new(
                ActionKind::ReRequest,
                locale,
                format!("Re-request {} translation", locale),
            ));
        }
        _ => {}
    }

    if let Some(document_id) = &metadata.document_id
        && matches!(
            status,
            TargetStatus::Pending
                | TargetStatus::Intermediate
                | TargetStatus::Ready
                | TargetStatus::Current
                | TargetStatus::Edited
        )
    {
        let mut open = TargetAction::new(
            ActionKind::OpenWorkbench,
            locale,
            format!("Open {} in workbench", locale),
        );
        open.link = Some(format!("workbench/{}/{}", document_id, locale));
        actions.push(open);
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::UnitType;

    fn metadata(source: SourceStatus, target: TargetStatus) -> TranslationMetadata {
        let mut metadata = TranslationMetadata {
            document_id: Some("doc-1".to_string()),
            source_status: source,
            ..Default::default()
        };
        metadata.target_statuses.insert("de".to_string(), target);
        metadata
    }

    fn kinds(actions: &[TargetAction]) -> Vec<ActionKind> {
        actions.iter().map(|action| action.kind).collect()
    }

    #[test]
    fn actions_follow_status() {
        let request = available_actions(&metadata(SourceStatus::Current, TargetStatus::Untracked), "de");
        assert_eq!(kinds(&request), vec![ActionKind::Request]);

        let importing =
            available_actions(&metadata(SourceStatus::Importing, TargetStatus::Untracked), "de");
        assert!(importing.is_empty());

        let ready = available_actions(&metadata(SourceStatus::Current, TargetStatus::Ready), "de");
        assert_eq!(kinds(&ready), vec![ActionKind::Download, ActionKind::OpenWorkbench]);
        assert_eq!(ready[1].link.as_deref(), Some("workbench/doc-1/de"));

        let disabled =
            available_actions(&metadata(SourceStatus::Current, TargetStatus::Disabled), "de");
        assert!(disabled.is_empty());
    }

    #[test]
    fn hooks_compose_in_registration_order() {
        let mut registry = ActionRegistry::new();
        registry.register(|_, locale, mut actions| {
            actions.push(TargetAction::new(ActionKind::Custom, locale, "first"));
            actions
        });
        registry.register(|unit, locale, mut actions| {
            actions.retain(|action| action.kind != ActionKind::Download);
            actions.push(TargetAction::new(
                ActionKind::Custom,
                locale,
                format!("second for {}", unit.id),
            ));
            actions
        });
        let unit = ContentUnit {
            id: "node:1".into(),
            unit_type: UnitType::Content,
            bundle: None,
            source_locale: "en".to_string(),
            title: "Home".to_string(),
        };
        let base = available_actions(&metadata(SourceStatus::Current, TargetStatus::Ready), "de");
        let labels = registry
            .apply(&unit, "de", base)
            .into_iter()
            .map(|action| action.label)
            .collect::<Vec<_>>();
        assert_eq!(
            labels,
            vec!["Open de in workbench", "first", "second for node:1"]
        );
    }
}
