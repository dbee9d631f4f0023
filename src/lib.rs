use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub mod actions;
pub mod content;
pub mod error;
pub mod locale;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod profile;
pub mod server;
pub mod settings;
pub mod setup;
pub mod status;
pub mod store;
pub mod tms;
pub mod worklist;

#[cfg(test)]
mod test_util;

pub use content::{ContentSerializer, ContentUnit, DirectoryContent, MemoryContent, UnitId, UnitType};
pub use error::{SyncError, SyncResult};
pub use notify::{Notification, NotificationHandler, NotificationOutcome, NotificationResponse};
pub use orchestrator::{SaveOutcome, SourceCheck, TargetCheck, TranslationOrchestrator, UnitReport};
pub use profile::{EffectivePolicy, LocaleOverride, Profile, ProfileRegistry, ProfileResolver};
pub use status::{Event, SourceStatus, TargetStatus};
pub use store::{LocalStore, MetadataStore, TranslationMetadata};
pub use tms::{HttpTms, MockTms, TmsClient, TmsError};

use crate::locale::LocaleMapper;
use crate::settings::Settings;
use crate::setup::SetupChecker;

/// Wires an orchestrator from settings.
///
/// A dry run talks to an in-process TMS and keeps metadata in memory, so
/// nothing leaves the machine and the configured store is left untouched.
pub fn build_orchestrator(settings: &Settings, dry_run: bool) -> Result<TranslationOrchestrator> {
    let store: Arc<dyn MetadataStore> = match (&settings.store_path, dry_run) {
        (Some(path), false) => Arc::new(
            LocalStore::open(path)
                .with_context(|| format!("failed to open metadata store {}", path.display()))?,
        ),
        _ => Arc::new(LocalStore::new()),
    };
    let (tms, setup): (Arc<dyn TmsClient>, SetupChecker) = if dry_run {
        (Arc::new(MockTms::new()), SetupChecker::ready())
    } else {
        let tms = HttpTms::from_settings(&settings.tms).with_context(|| "failed to create TMS client")?;
        (Arc::new(tms), SetupChecker::from_settings(&settings.tms))
    };
    let registry = Arc::new(ProfileRegistry::new(settings.profiles.clone()));
    let resolver = ProfileResolver::new(
        registry,
        settings.bundle_profiles.clone(),
        settings.default_profile.clone(),
    );
    let content = Arc::new(DirectoryContent::new(settings.content_dir.clone()));
    debug!(
        "content in {}, {} target locale(s)",
        settings.content_dir.display(),
        settings.locales.enabled.len()
    );
    Ok(TranslationOrchestrator::new(
        store,
        resolver,
        tms,
        content,
        LocaleMapper::from_settings(&settings.locales),
    )
    .with_setup(setup)
    .with_interim_downloads(settings.interim_downloads))
}

/// Profile id -> number of units that reference it explicitly.
pub fn profile_usage(orchestrator: &TranslationOrchestrator) -> BTreeMap<String, usize> {
    orchestrator
        .resolver()
        .registry()
        .list()
        .into_iter()
        .map(|profile| {
            let count = orchestrator.store().count_profile_references(&profile.id);
            (profile.id, count)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::parse_settings;
    use tempfile::tempdir;

    #[tokio::test]
    async fn dry_run_wires_a_working_orchestrator() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("page.json"),
            r#"{"source_locale":"en","title":"Page","fields":{"body":"Hi"}}"#,
        )
        .unwrap();
        let mut settings = parse_settings(
            r#"
[locales]
source = "en"
enabled = ["en", "de"]

[defaults]
profile = "automatic"
"#,
        )
        .unwrap();
        settings.content_dir = dir.path().to_path_buf();

        let orchestrator = build_orchestrator(&settings, true).unwrap();
        let outcome = orchestrator.on_content_saved(&"page".into()).await.unwrap();
        assert_eq!(outcome.uploaded.as_deref(), Some("doc-1"));
        let check = orchestrator.check_source_status(&"page".into()).await.unwrap();
        assert_eq!(check.requested, vec!["de"]);
        assert_eq!(profile_usage(&orchestrator).get("automatic"), Some(&0));
    }

    #[test]
    fn unknown_profiles_are_rejected() {
        let settings = parse_settings("").unwrap();
        let orchestrator = build_orchestrator(&settings, false).unwrap();
        let err = orchestrator.assign_profile(&"page".into(), Some("nope")).unwrap_err();
        assert!(err.is_not_found());
    }
}
