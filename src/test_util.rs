use std::collections::BTreeMap;
use std::sync::Arc;

use crate::content::{ContentUnit, MemoryContent, UnitType};
use crate::locale::LocaleMapper;
use crate::orchestrator::TranslationOrchestrator;
use crate::profile::{Profile, ProfileRegistry, ProfileResolver};
use crate::store::LocalStore;
use crate::tms::MockTms;

pub(crate) fn with_temp_home<F, R>(func: F) -> R
where
    F: FnOnce(&std::path::Path) -> R,
{
    static HOME_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
    let _guard = HOME_MUTEX
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let old_home = std::env::var("HOME").ok();
    // SAFETY: HOME_MUTEX serializes every test that touches the environment.
    unsafe { std::env::set_var("HOME", dir.path()) };
    let result = func(dir.path());
    match old_home {
        Some(old) => unsafe { std::env::set_var("HOME", old) },
        None => unsafe { std::env::remove_var("HOME") },
    }
    result
}

pub(crate) fn article(id: &str) -> ContentUnit {
    ContentUnit {
        id: id.into(),
        unit_type: UnitType::Content,
        bundle: Some("node:article".to_string()),
        source_locale: "en".to_string(),
        title: format!("Article {}", id),
    }
}

/// English source with German, Spanish and French targets.
pub(crate) fn locales() -> LocaleMapper {
    let mut map = BTreeMap::new();
    for (local, remote) in [("en", "en-US"), ("de", "de-DE"), ("es", "es-ES"), ("fr", "fr-FR")] {
        map.insert(local.to_string(), remote.to_string());
    }
    LocaleMapper::new(
        "en",
        vec!["en".to_string(), "de".to_string(), "es".to_string(), "fr".to_string()],
        map,
    )
}

/// Orchestrator whose system default is `profile`.
pub(crate) fn orchestrator_with(
    profile: Profile,
    tms: Arc<MockTms>,
    content: Arc<MemoryContent>,
) -> TranslationOrchestrator {
    let default = profile.id.clone();
    let registry = Arc::new(ProfileRegistry::new(vec![profile]));
    let resolver = ProfileResolver::new(registry, BTreeMap::new(), Some(default));
    TranslationOrchestrator::new(Arc::new(LocalStore::new()), resolver, tms, content, locales())
}
