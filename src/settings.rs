use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::profile::Profile;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");
const TOKEN_ENV: &str = "TMS_ACCESS_TOKEN";

#[derive(Debug, Clone)]
pub struct Settings {
    pub tms: TmsSettings,
    pub locales: LocaleSettings,
    pub interim_downloads: bool,
    pub default_profile: Option<String>,
    pub bundle_profiles: BTreeMap<String, String>,
    pub profiles: Vec<Profile>,
    pub store_path: Option<PathBuf>,
    pub content_dir: PathBuf,
    pub server_addr: String,
    pub worklist_concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct TmsSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub community: Option<String>,
    pub project: Option<String>,
    pub vault: Option<String>,
    pub workflow: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct LocaleSettings {
    pub source: String,
    pub enabled: Vec<String>,
    /// Local locale -> TMS locale.
    pub tms: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tms: TmsSettings {
                base_url: "https://tms.example.com".to_string(),
                token: None,
                community: None,
                project: None,
                vault: None,
                workflow: None,
                timeout_secs: 30,
            },
            locales: LocaleSettings {
                source: "en".to_string(),
                enabled: Vec::new(),
                tms: BTreeMap::new(),
            },
            interim_downloads: false,
            default_profile: None,
            bundle_profiles: BTreeMap::new(),
            profiles: Vec::new(),
            store_path: None,
            content_dir: PathBuf::from("content"),
            server_addr: "127.0.0.1:8700".to_string(),
            worklist_concurrency: 4,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    tms: Option<TmsSection>,
    locales: Option<LocalesSection>,
    preferences: Option<PreferencesSection>,
    defaults: Option<DefaultsSection>,
    profiles: Option<Vec<Profile>>,
    store: Option<StoreSection>,
    content: Option<ContentSection>,
    server: Option<ServerSection>,
    worklist: Option<WorklistSection>,
}

#[derive(Debug, Default, Deserialize)]
struct TmsSection {
    base_url: Option<String>,
    token: Option<String>,
    community: Option<String>,
    project: Option<String>,
    vault: Option<String>,
    workflow: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LocalesSection {
    source: Option<String>,
    enabled: Option<Vec<String>>,
    tms: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct PreferencesSection {
    interim_downloads: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct DefaultsSection {
    profile: Option<String>,
    bundles: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct StoreSection {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ContentSection {
    dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    addr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WorklistSection {
    concurrency: Option<usize>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse built-in settings")?;
    settings.merge(defaults);
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    if let Some(token) = non_empty(std::env::var(TOKEN_ENV).ok()) {
        settings.tms.token = Some(token);
    }

    Ok(settings)
}

/// Parses a single settings document on top of the defaults, without touching disk.
pub fn parse_settings(content: &str) -> Result<Settings> {
    let mut settings = Settings::default();
    let parsed: SettingsFile =
        toml::from_str(content).with_context(|| "failed to parse settings")?;
    settings.merge(parsed);
    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(tms) = incoming.tms {
            if let Some(url) = non_empty(tms.base_url) {
                self.tms.base_url = url;
            }
            if let Some(token) = non_empty(tms.token) {
                self.tms.token = Some(token);
            }
            if let Some(community) = non_empty(tms.community) {
                self.tms.community = Some(community);
            }
            if let Some(project) = non_empty(tms.project) {
                self.tms.project = Some(project);
            }
            if let Some(vault) = non_empty(tms.vault) {
                self.tms.vault = Some(vault);
            }
            if let Some(workflow) = non_empty(tms.workflow) {
                self.tms.workflow = Some(workflow);
            }
            if let Some(timeout) = tms.timeout_secs {
                if timeout > 0 {
                    self.tms.timeout_secs = timeout;
                }
            }
        }
        if let Some(locales) = incoming.locales {
            if let Some(source) = non_empty(locales.source) {
                self.locales.source = source;
            }
            if let Some(enabled) = locales.enabled {
                self.locales.enabled = enabled;
            }
            if let Some(map) = locales.tms {
                for (local, remote) in map {
                    self.locales.tms.insert(local, remote);
                }
            }
        }
        if let Some(preferences) = incoming.preferences {
            if let Some(interim) = preferences.interim_downloads {
                self.interim_downloads = interim;
            }
        }
        if let Some(defaults) = incoming.defaults {
            if let Some(profile) = defaults.profile {
                // an explicit empty value switches the system default off
                self.default_profile = non_empty(Some(profile));
            }
            if let Some(bundles) = defaults.bundles {
                for (bundle, profile) in bundles {
                    self.bundle_profiles.insert(bundle, profile);
                }
            }
        }
        if let Some(profiles) = incoming.profiles {
            for profile in profiles {
                match self.profiles.iter_mut().find(|known| known.id == profile.id) {
                    Some(known) => *known = profile,
                    None => self.profiles.push(profile),
                }
            }
        }
        if let Some(store) = incoming.store {
            if let Some(path) = non_empty(store.path) {
                self.store_path = Some(expand_home(&path));
            }
        }
        if let Some(content) = incoming.content {
            if let Some(dir) = non_empty(content.dir) {
                self.content_dir = expand_home(&dir);
            }
        }
        if let Some(server) = incoming.server {
            if let Some(addr) = non_empty(server.addr) {
                self.server_addr = addr;
            }
        }
        if let Some(worklist) = incoming.worklist {
            if let Some(concurrency) = worklist.concurrency {
                if concurrency > 0 {
                    self.worklist_concurrency = concurrency;
                }
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            if !home.trim().is_empty() {
                return Path::new(&home).join(rest);
            }
        }
    }
    PathBuf::from(path)
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

pub(crate) fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".tms-bridge"))
        }
    })
}
