//! Translatable units and the serializer boundary to the host's content.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UnitId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UnitId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    #[default]
    Content,
    Config,
}

/// One translatable thing: a content entity or a configuration object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentUnit {
    pub id: UnitId,
    pub unit_type: UnitType,
    /// Entity bundle or config type, used for bundle-level profile defaults.
    pub bundle: Option<String>,
    pub source_locale: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedContent {
    pub blob: String,
    pub locale: String,
}

impl SerializedContent {
    pub fn hash(&self) -> String {
        content_hash(&self.blob)
    }
}

pub fn content_hash(blob: &str) -> String {
    format!("{:x}", md5::compute(blob.as_bytes()))
}

pub trait ContentSerializer: Send + Sync {
    fn load(&self, id: &UnitId) -> SyncResult<ContentUnit>;

    fn serialize(&self, unit: &ContentUnit) -> SyncResult<SerializedContent>;

    fn deserialize(&self, unit: &ContentUnit, locale: &str, blob: &str) -> SyncResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct UnitFile {
    #[serde(rename = "type", default)]
    unit_type: UnitType,
    #[serde(default)]
    bundle: Option<String>,
    source_locale: String,
    #[serde(default)]
    title: String,
    fields: serde_json::Value,
}

/// Units stored as `<dir>/<unit>.json`; translations land in `<dir>/translations/`.
#[derive(Debug, Clone)]
pub struct DirectoryContent {
    root: PathBuf,
}

impl DirectoryContent {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn unit_path(&self, id: &UnitId) -> PathBuf {
        self.root.join(format!("{}.json", file_stem(id)))
    }

    pub fn translation_path(&self, id: &UnitId, locale: &str) -> PathBuf {
        self.root
            .join("translations")
            .join(format!("{}.{}.json", file_stem(id), locale))
    }

    fn read_unit(&self, id: &UnitId) -> SyncResult<UnitFile> {
        let path = self.unit_path(id);
        if !path.exists() {
            return Err(SyncError::NotFound(format!("content {}", id)));
        }
        let content = fs::read_to_string(&path)
            .map_err(|err| SyncError::Serializer(format!("failed to read {}: {}", path.display(), err)))?;
        serde_json::from_str(&content)
            .map_err(|err| SyncError::Serializer(format!("failed to parse {}: {}", path.display(), err)))
    }
}

fn file_stem(id: &UnitId) -> String {
    id.as_str()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

impl ContentSerializer for DirectoryContent {
    fn load(&self, id: &UnitId) -> SyncResult<ContentUnit> {
        let file = self.read_unit(id)?;
        Ok(ContentUnit {
            id: id.clone(),
            unit_type: file.unit_type,
            bundle: file.bundle,
            source_locale: file.source_locale,
            title: if file.title.is_empty() {
                id.to_string()
            } else {
                file.title
            },
        })
    }

    fn serialize(&self, unit: &ContentUnit) -> SyncResult<SerializedContent> {
        let file = self.read_unit(&unit.id)?;
        let blob = serde_json::to_string(&file.fields)
            .map_err(|err| SyncError::Serializer(err.to_string()))?;
        Ok(SerializedContent {
            blob,
            locale: file.source_locale,
        })
    }

    fn deserialize(&self, unit: &ContentUnit, locale: &str, blob: &str) -> SyncResult<()> {
        let value: serde_json::Value = serde_json::from_str(blob).map_err(|err| {
            SyncError::Serializer(format!("translation for {} is not JSON: {}", unit.id, err))
        })?;
        let path = self.translation_path(&unit.id, locale);
        write_json(&path, &value)
    }
}

fn write_json(path: &Path, value: &serde_json::Value) -> SyncResult<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|err| SyncError::Serializer(format!("failed to create {}: {}", dir.display(), err)))?;
    }
    let content =
        serde_json::to_string_pretty(value).map_err(|err| SyncError::Serializer(err.to_string()))?;
    fs::write(path, content)
        .map_err(|err| SyncError::Serializer(format!("failed to write {}: {}", path.display(), err)))
}

/// In-memory host content for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryContent {
    units: Mutex<HashMap<UnitId, (ContentUnit, String)>>,
    translations: Mutex<HashMap<(UnitId, String), String>>,
}

impl MemoryContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, unit: ContentUnit, blob: impl Into<String>) {
        let mut units = self.units.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        units.insert(unit.id.clone(), (unit, blob.into()));
    }

    /// Replaces the source blob of an existing unit.
    pub fn edit(&self, id: &UnitId, blob: impl Into<String>) {
        let mut units = self.units.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(entry) = units.get_mut(id) {
            entry.1 = blob.into();
        }
    }

    pub fn translation(&self, id: &UnitId, locale: &str) -> Option<String> {
        self.translations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(id.clone(), locale.to_string()))
            .cloned()
    }
}

impl ContentSerializer for MemoryContent {
    fn load(&self, id: &UnitId) -> SyncResult<ContentUnit> {
        self.units
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .map(|(unit, _)| unit.clone())
            .ok_or_else(|| SyncError::NotFound(format!("content {}", id)))
    }

    fn serialize(&self, unit: &ContentUnit) -> SyncResult<SerializedContent> {
        self.units
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&unit.id)
            .map(|(unit, blob)| SerializedContent {
                blob: blob.clone(),
                locale: unit.source_locale.clone(),
            })
            .ok_or_else(|| SyncError::NotFound(format!("content {}", unit.id)))
    }

    fn deserialize(&self, unit: &ContentUnit, locale: &str, blob: &str) -> SyncResult<()> {
        self.translations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((unit.id.clone(), locale.to_string()), blob.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn directory_content_round_trip() {
        let dir = tempdir().expect("tempdir");
        fs::write(
            dir.path().join("node_1.json"),
            r#"{"type":"content","bundle":"node:article","source_locale":"en","title":"About","fields":{"body":"Hello"}}"#,
        )
        .unwrap();
        let content = DirectoryContent::new(dir.path());
        let id = UnitId::from("node:1");
        let unit = content.load(&id).expect("load");
        assert_eq!(unit.bundle.as_deref(), Some("node:article"));
        assert_eq!(unit.title, "About");

        let serialized = content.serialize(&unit).expect("serialize");
        assert_eq!(serialized.blob, r#"{"body":"Hello"}"#);
        assert_eq!(serialized.locale, "en");

        content
            .deserialize(&unit, "de", r#"{"body":"Hallo"}"#)
            .expect("deserialize");
        let written = fs::read_to_string(content.translation_path(&id, "de")).unwrap();
        assert!(written.contains("Hallo"));

        let err = content.deserialize(&unit, "de", "not json").unwrap_err();
        assert!(matches!(err, SyncError::Serializer(_)));
    }

    #[test]
    fn missing_units_are_not_found() {
        let dir = tempdir().expect("tempdir");
        let content = DirectoryContent::new(dir.path());
        assert!(content.load(&UnitId::from("node:404")).unwrap_err().is_not_found());
    }

    #[test]
    fn hash_tracks_blob_changes() {
        assert_eq!(content_hash("a"), content_hash("a"));
        assert_ne!(content_hash("a"), content_hash("b"));
    }
}
