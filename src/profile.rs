//! Translation profiles and their resolution.
//!
//! A profile bundles the automation policy for a content unit. Resolution walks
//! the explicit per-unit assignment, then the bundle default, then the system
//! default; no profile means no automation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::content::ContentUnit;
use crate::error::{SyncError, SyncResult};
use crate::store::MetadataStore;
use crate::tms::{TargetHints, UploadHints};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub auto_upload: bool,
    #[serde(default)]
    pub auto_request: bool,
    #[serde(default)]
    pub auto_download: bool,
    /// Whether a source edit turns current targets into stale ones.
    #[serde(default = "default_true")]
    pub mark_targets_stale: bool,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub vault: Option<String>,
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub subfilter: Option<String>,
    #[serde(default)]
    pub intelligence: IntelligenceMetadata,
    #[serde(default)]
    pub targets: BTreeMap<String, LocaleOverride>,
}

fn default_true() -> bool {
    true
}

/// Per-locale exception to a profile's defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocaleOverride {
    #[default]
    Inherit,
    Disabled,
    Custom {
        #[serde(default)]
        auto_request: Option<bool>,
        #[serde(default)]
        auto_download: Option<bool>,
        #[serde(default)]
        workflow: Option<String>,
        #[serde(default)]
        vault: Option<String>,
    },
}

/// Descriptive metadata forwarded to the TMS with every upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntelligenceMetadata {
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub business_unit: Option<String>,
    pub business_division: Option<String>,
    pub campaign_id: Option<String>,
    pub channel: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub content_description: Option<String>,
    pub external_style_id: Option<String>,
    pub purchase_order: Option<String>,
    pub region: Option<String>,
}

impl IntelligenceMetadata {
    pub fn pairs(&self) -> Vec<(String, String)> {
        [
            ("author_name", &self.author_name),
            ("author_email", &self.author_email),
            ("business_unit", &self.business_unit),
            ("business_division", &self.business_division),
            ("campaign_id", &self.campaign_id),
            ("channel", &self.channel),
            ("contact_name", &self.contact_name),
            ("contact_email", &self.contact_email),
            ("content_description", &self.content_description),
            ("external_style_id", &self.external_style_id),
            ("purchase_order", &self.purchase_order),
            ("region", &self.region),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_ref()
                .filter(|value| !value.trim().is_empty())
                .map(|value| (key.to_string(), value.clone()))
        })
        .collect()
    }
}

/// Policy in effect for one target locale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectivePolicy {
    pub auto_request: bool,
    pub auto_download: bool,
    pub workflow: Option<String>,
    pub vault: Option<String>,
    pub disabled: bool,
}

impl EffectivePolicy {
    pub fn target_hints(&self) -> TargetHints {
        TargetHints {
            workflow: self.workflow.clone(),
            vault: self.vault.clone(),
        }
    }
}

impl Profile {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            auto_upload: false,
            auto_request: false,
            auto_download: false,
            mark_targets_stale: true,
            project: None,
            vault: None,
            workflow: None,
            filter: None,
            subfilter: None,
            intelligence: IntelligenceMetadata::default(),
            targets: BTreeMap::new(),
        }
    }

    pub fn automatic() -> Self {
        Self {
            label: "Automatic".to_string(),
            auto_upload: true,
            auto_request: true,
            auto_download: true,
            ..Self::new("automatic")
        }
    }

    pub fn manual() -> Self {
        Self {
            label: "Manual".to_string(),
            ..Self::new("manual")
        }
    }

    pub fn with_override(mut self, locale: impl Into<String>, value: LocaleOverride) -> Self {
        self.targets.insert(locale.into(), value);
        self
    }

    pub fn policy_for(&self, locale: &str) -> EffectivePolicy {
        let base = EffectivePolicy {
            auto_request: self.auto_request,
            auto_download: self.auto_download,
            workflow: self.workflow.clone(),
            vault: self.vault.clone(),
            disabled: false,
        };
        match self.targets.get(locale) {
            None | Some(LocaleOverride::Inherit) => base,
            Some(LocaleOverride::Disabled) => EffectivePolicy {
                auto_request: false,
                auto_download: false,
                disabled: true,
                ..base
            },
            Some(LocaleOverride::Custom {
                auto_request,
                auto_download,
                workflow,
                vault,
            }) => EffectivePolicy {
                auto_request: auto_request.unwrap_or(base.auto_request),
                auto_download: auto_download.unwrap_or(base.auto_download),
                workflow: workflow.clone().or(base.workflow),
                vault: vault.clone().or(base.vault),
                disabled: false,
            },
        }
    }

    pub fn upload_hints(&self, job_id: Option<&str>) -> UploadHints {
        UploadHints {
            project: self.project.clone(),
            vault: self.vault.clone(),
            workflow: self.workflow.clone(),
            filter: self.filter.clone(),
            subfilter: self.subfilter.clone(),
            job_id: job_id.map(|value| value.to_string()),
            metadata: self.intelligence.pairs(),
        }
    }
}

/// Read-mostly store of profile definitions.
#[derive(Debug, Default)]
pub struct ProfileRegistry {
    profiles: RwLock<BTreeMap<String, Profile>>,
}

impl ProfileRegistry {
    /// Falls back to the built-in `automatic` and `manual` profiles when none are given.
    pub fn new(profiles: Vec<Profile>) -> Self {
        let profiles = if profiles.is_empty() {
            vec![Profile::automatic(), Profile::manual()]
        } else {
            profiles
        };
        Self {
            profiles: RwLock::new(
                profiles
                    .into_iter()
                    .map(|profile| (profile.id.clone(), profile))
                    .collect(),
            ),
        }
    }

    pub fn get(&self, id: &str) -> Option<Profile> {
        self.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Profile> {
        self.read().values().cloned().collect()
    }

    pub fn insert(&self, profile: Profile) {
        self.write().insert(profile.id.clone(), profile);
    }

    /// Deleting a profile that metadata still references is refused.
    pub fn remove(&self, id: &str, store: &dyn MetadataStore) -> SyncResult<Profile> {
        let count = store.count_profile_references(id);
        if count > 0 {
            return Err(SyncError::ProfileInUse {
                profile: id.to_string(),
                count,
            });
        }
        self.write()
            .remove(id)
            .ok_or_else(|| SyncError::NotFound(format!("profile '{}'", id)))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Profile>> {
        self.profiles.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Profile>> {
        self.profiles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone)]
pub struct ProfileResolver {
    registry: Arc<ProfileRegistry>,
    bundle_defaults: BTreeMap<String, String>,
    system_default: Option<String>,
}

impl ProfileResolver {
    pub fn new(
        registry: Arc<ProfileRegistry>,
        bundle_defaults: BTreeMap<String, String>,
        system_default: Option<String>,
    ) -> Self {
        Self {
            registry,
            bundle_defaults,
            system_default,
        }
    }

    pub fn registry(&self) -> &Arc<ProfileRegistry> {
        &self.registry
    }

    /// `assigned` is the profile recorded on the unit's metadata, if any.
    pub fn resolve(&self, unit: &ContentUnit, assigned: Option<&str>) -> Option<Profile> {
        let bundle_default = unit
            .bundle
            .as_deref()
            .and_then(|bundle| self.bundle_defaults.get(bundle))
            .map(String::as_str);
        let candidates = [
            ("assigned", assigned),
            ("bundle", bundle_default),
            ("system", self.system_default.as_deref()),
        ];
        for (level, id) in candidates {
            let Some(id) = id else {
                continue;
            };
            match self.registry.get(id) {
                Some(profile) => return Some(profile),
                None => warn!("{} profile '{}' for {} does not exist", level, id, unit.id),
            }
        }
        None
    }

    pub fn resolve_for_target(profile: Option<&Profile>, locale: &str) -> EffectivePolicy {
        profile
            .map(|profile| profile.policy_for(locale))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::UnitType;
    use crate::store::{LocalStore, TranslationMetadata};

    fn unit(bundle: Option<&str>) -> ContentUnit {
        ContentUnit {
            id: "node:1".into(),
            unit_type: UnitType::Content,
            bundle: bundle.map(|value| value.to_string()),
            source_locale: "en".to_string(),
            title: "Home".to_string(),
        }
    }

    fn resolver(system: Option<&str>) -> ProfileResolver {
        let registry = Arc::new(ProfileRegistry::new(vec![
            Profile::automatic(),
            Profile::manual(),
            Profile::new("articles"),
        ]));
        let mut bundles = BTreeMap::new();
        bundles.insert("node:article".to_string(), "articles".to_string());
        ProfileResolver::new(registry, bundles, system.map(|value| value.to_string()))
    }

    #[test]
    fn resolution_order() {
        let manual_default = resolver(Some("manual"));
        let article = unit(Some("node:article"));
        assert_eq!(
            manual_default.resolve(&article, Some("automatic")).unwrap().id,
            "automatic"
        );
        assert_eq!(manual_default.resolve(&article, None).unwrap().id, "articles");
        assert_eq!(
            manual_default.resolve(&unit(Some("node:page")), None).unwrap().id,
            "manual"
        );
        assert!(resolver(None).resolve(&unit(None), None).is_none());
    }

    #[test]
    fn unknown_assignment_falls_through() {
        let manual_default = resolver(Some("manual"));
        assert_eq!(
            manual_default.resolve(&unit(None), Some("deleted")).unwrap().id,
            "manual"
        );
    }

    #[test]
    fn locale_overrides() {
        let profile = Profile::automatic()
            .with_override("es", LocaleOverride::Disabled)
            .with_override(
                "de",
                LocaleOverride::Custom {
                    auto_request: None,
                    auto_download: Some(false),
                    workflow: Some("wf-de".to_string()),
                    vault: None,
                },
            );
        let es = profile.policy_for("es");
        assert!(es.disabled);
        assert!(!es.auto_request);

        let de = profile.policy_for("de");
        assert!(!de.disabled);
        assert!(de.auto_request);
        assert!(!de.auto_download);
        assert_eq!(de.workflow.as_deref(), Some("wf-de"));

        let fr = profile.policy_for("fr");
        assert!(fr.auto_request && fr.auto_download && !fr.disabled);

        let none = ProfileResolver::resolve_for_target(None, "fr");
        assert_eq!(none, EffectivePolicy::default());
    }

    #[test]
    fn overrides_parse_from_toml() {
        let profile: Profile = toml::from_str(
            r#"
id = "custom"
auto_request = true

[targets.es]
kind = "custom"
auto_download = false

[targets.it]
kind = "disabled"
"#,
        )
        .unwrap();
        assert!(profile.mark_targets_stale);
        assert_eq!(profile.targets.get("it"), Some(&LocaleOverride::Disabled));
        assert!(!profile.policy_for("es").auto_download);
    }

    #[test]
    fn profiles_in_use_cannot_be_removed() {
        let registry = ProfileRegistry::new(vec![Profile::automatic(), Profile::manual()]);
        let store = LocalStore::new();
        store
            .upsert(
                &"node:1".into(),
                TranslationMetadata {
                    profile_id: Some("automatic".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let err = registry.remove("automatic", &store).unwrap_err();
        assert!(matches!(err, SyncError::ProfileInUse { count: 1, .. }));
        assert!(registry.get("automatic").is_some());

        assert_eq!(registry.remove("manual", &store).unwrap().id, "manual");
        assert!(matches!(
            registry.remove("manual", &store),
            Err(SyncError::NotFound(_))
        ));
    }

    #[test]
    fn upload_hints_carry_intelligence() {
        let mut profile = Profile::manual();
        profile.project = Some("p-1".to_string());
        profile.intelligence.author_name = Some("Editor".to_string());
        profile.intelligence.region = Some(" ".to_string());
        let hints = profile.upload_hints(Some("job-7"));
        assert_eq!(hints.project.as_deref(), Some("p-1"));
        assert_eq!(hints.job_id.as_deref(), Some("job-7"));
        assert_eq!(
            hints.metadata,
            vec![("author_name".to_string(), "Editor".to_string())]
        );
    }
}
