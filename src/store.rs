//! Translation metadata, one record per content unit.
//!
//! The store keeps a reverse `document id -> unit` index next to the records
//! and updates both under the same write lock, so webhook lookups never see a
//! stale owner. With a snapshot path every write is persisted as JSON before it
//! is acknowledged; a failed snapshot rolls the in-memory change back.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::content::UnitId;
use crate::error::{SyncError, SyncResult};
use crate::status::{SourceStatus, TargetStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationMetadata {
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub source_status: SourceStatus,
    #[serde(default)]
    pub target_statuses: BTreeMap<String, TargetStatus>,
    #[serde(default)]
    pub profile_id: Option<String>,
    /// Hash of the blob last sent to the TMS.
    #[serde(default)]
    pub last_upload_hash: Option<String>,
    #[serde(default)]
    pub updated_at: u64,
}

impl TranslationMetadata {
    /// Missing entries are untracked.
    pub fn target_status(&self, locale: &str) -> TargetStatus {
        self.target_statuses
            .get(locale)
            .copied()
            .unwrap_or_default()
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        match &self.document_id {
            Some(_) if self.source_status == SourceStatus::Untracked => {
                Err("a tracked document cannot have an untracked source".to_string())
            }
            Some(_) => Ok(()),
            None => {
                if !matches!(
                    self.source_status,
                    SourceStatus::Untracked | SourceStatus::Disabled
                ) {
                    return Err(format!(
                        "source is {} without a document",
                        self.source_status
                    ));
                }
                match self
                    .target_statuses
                    .iter()
                    .find(|(_, status)| !status.is_detached())
                {
                    Some((locale, status)) => Err(format!(
                        "target {} is {} without a document",
                        locale, status
                    )),
                    None => Ok(()),
                }
            }
        }
    }

    /// Forgets the TMS document, keeping the profile and excluded locales.
    pub fn detach(&mut self) {
        self.document_id = None;
        self.job_id = None;
        self.last_upload_hash = None;
        if self.source_status != SourceStatus::Disabled {
            self.source_status = SourceStatus::Untracked;
        }
        self.target_statuses.retain(|_, status| status.is_excluded());
    }
}

pub trait MetadataStore: Send + Sync {
    fn get(&self, unit: &UnitId) -> SyncResult<TranslationMetadata>;

    fn get_by_document_id(&self, document_id: &str) -> SyncResult<(UnitId, TranslationMetadata)>;

    fn upsert(&self, unit: &UnitId, metadata: TranslationMetadata) -> SyncResult<()>;

    /// Atomic read-modify-write. Without `create`, a missing record is `NotFound`.
    /// An error from `change` leaves the record untouched.
    fn modify(
        &self,
        unit: &UnitId,
        create: bool,
        change: &mut dyn FnMut(&mut TranslationMetadata) -> SyncResult<()>,
    ) -> SyncResult<TranslationMetadata>;

    fn remove(&self, unit: &UnitId) -> SyncResult<TranslationMetadata>;

    fn unit_ids(&self) -> Vec<UnitId>;

    fn count_profile_references(&self, profile_id: &str) -> usize;

    fn set_source_status(
        &self,
        unit: &UnitId,
        status: SourceStatus,
    ) -> SyncResult<TranslationMetadata> {
        self.modify(unit, false, &mut |metadata| {
            metadata.source_status = status;
            Ok(())
        })
    }

    fn set_target_status(
        &self,
        unit: &UnitId,
        locale: &str,
        status: TargetStatus,
    ) -> SyncResult<TranslationMetadata> {
        self.modify(unit, false, &mut |metadata| {
            metadata.target_statuses.insert(locale.to_string(), status);
            Ok(())
        })
    }

    /// Creates the record when missing. Assigning a document to an untracked
    /// source marks it importing; clearing the document detaches the record.
    fn set_document_id(
        &self,
        unit: &UnitId,
        document_id: Option<&str>,
    ) -> SyncResult<TranslationMetadata> {
        self.modify(unit, true, &mut |metadata| {
            match document_id {
                Some(id) => {
                    metadata.document_id = Some(id.to_string());
                    if metadata.source_status == SourceStatus::Untracked {
                        metadata.source_status = SourceStatus::Importing;
                    }
                }
                None => metadata.detach(),
            }
            Ok(())
        })
    }

    fn set_job_id(&self, unit: &UnitId, job_id: Option<&str>) -> SyncResult<TranslationMetadata> {
        self.modify(unit, false, &mut |metadata| {
            metadata.job_id = job_id.map(|value| value.to_string());
            Ok(())
        })
    }
}

type UndoLog = Vec<(UnitId, Option<TranslationMetadata>)>;

#[derive(Debug, Default)]
struct Records {
    units: HashMap<UnitId, TranslationMetadata>,
    by_document: HashMap<String, UnitId>,
}

impl Records {
    fn put(&mut self, unit: &UnitId, metadata: TranslationMetadata) -> UndoLog {
        let mut undo = Vec::new();
        let previous = self.units.get(unit).cloned();
        if let Some(old) = previous.as_ref().and_then(|record| record.document_id.as_ref())
            && metadata.document_id.as_ref() != Some(old)
            && self.by_document.get(old) == Some(unit)
        {
            self.by_document.remove(old);
        }
        if let Some(document_id) = metadata.document_id.clone() {
            let owner = self
                .by_document
                .get(&document_id)
                .filter(|owner| *owner != unit)
                .cloned();
            if let Some(owner) = owner
                && let Some(record) = self.units.get_mut(&owner)
            {
                warn!(
                    "document {} moved from {} to {}; detaching {}",
                    document_id, owner, unit, owner
                );
                undo.push((owner.clone(), Some(record.clone())));
                record.detach();
            }
            self.by_document.insert(document_id, unit.clone());
        }
        undo.push((unit.clone(), previous));
        self.units.insert(unit.clone(), metadata);
        undo
    }

    fn take(&mut self, unit: &UnitId) -> Option<TranslationMetadata> {
        let record = self.units.remove(unit)?;
        if let Some(document_id) = &record.document_id
            && self.by_document.get(document_id) == Some(unit)
        {
            self.by_document.remove(document_id);
        }
        Some(record)
    }

    fn restore(&mut self, undo: UndoLog) {
        for (unit, previous) in undo.into_iter().rev() {
            self.take(&unit);
            if let Some(record) = previous {
                if let Some(document_id) = &record.document_id {
                    self.by_document.insert(document_id.clone(), unit.clone());
                }
                self.units.insert(unit, record);
            }
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    units: BTreeMap<UnitId, TranslationMetadata>,
}

/// In-memory metadata store with an optional JSON snapshot on disk.
#[derive(Debug, Default)]
pub struct LocalStore {
    records: RwLock<Records>,
    snapshot: Option<PathBuf>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `path` if it exists; every later write is persisted there.
    pub fn open(path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();
        let mut records = Records::default();
        if path.exists() {
            let content = fs::read_to_string(&path).map_err(|err| {
                SyncError::Store(format!("failed to read {}: {}", path.display(), err))
            })?;
            let snapshot: Snapshot = serde_json::from_str(&content).map_err(|err| {
                SyncError::Corrupt(format!("failed to parse {}: {}", path.display(), err))
            })?;
            for (unit, metadata) in snapshot.units {
                metadata
                    .check_invariants()
                    .map_err(|err| SyncError::Corrupt(format!("{}: {}", unit, err)))?;
                records.put(&unit, metadata);
            }
            debug!(
                "loaded {} metadata records from {}",
                records.units.len(),
                path.display()
            );
        }
        Ok(Self {
            records: RwLock::new(records),
            snapshot: Some(path),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Records> {
        self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Records> {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn commit(&self, records: &mut Records, undo: UndoLog) -> SyncResult<()> {
        let Some(path) = self.snapshot.as_deref() else {
            return Ok(());
        };
        if let Err(err) = write_snapshot(path, records) {
            records.restore(undo);
            return Err(err);
        }
        Ok(())
    }
}

fn write_snapshot(path: &Path, records: &Records) -> SyncResult<()> {
    let snapshot = Snapshot {
        units: records
            .units
            .iter()
            .map(|(unit, metadata)| (unit.clone(), metadata.clone()))
            .collect(),
    };
    let content = serde_json::to_string_pretty(&snapshot)
        .map_err(|err| SyncError::Store(err.to_string()))?;
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).map_err(|err| {
            SyncError::Store(format!("failed to create {}: {}", dir.display(), err))
        })?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)
        .and_then(|_| fs::rename(&tmp, path))
        .map_err(|err| SyncError::Store(format!("failed to write {}: {}", path.display(), err)))
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

impl MetadataStore for LocalStore {
    fn get(&self, unit: &UnitId) -> SyncResult<TranslationMetadata> {
        self.read()
            .units
            .get(unit)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("metadata for {}", unit)))
    }

    fn get_by_document_id(&self, document_id: &str) -> SyncResult<(UnitId, TranslationMetadata)> {
        let records = self.read();
        records
            .by_document
            .get(document_id)
            .and_then(|unit| {
                records
                    .units
                    .get(unit)
                    .map(|metadata| (unit.clone(), metadata.clone()))
            })
            .ok_or_else(|| SyncError::NotFound(format!("document {}", document_id)))
    }

    fn upsert(&self, unit: &UnitId, mut metadata: TranslationMetadata) -> SyncResult<()> {
        metadata.check_invariants().map_err(SyncError::Corrupt)?;
        metadata.updated_at = now_unix();
        let mut records = self.write();
        let undo = records.put(unit, metadata);
        self.commit(&mut records, undo)
    }

    fn modify(
        &self,
        unit: &UnitId,
        create: bool,
        change: &mut dyn FnMut(&mut TranslationMetadata) -> SyncResult<()>,
    ) -> SyncResult<TranslationMetadata> {
        let mut records = self.write();
        let mut metadata = match records.units.get(unit) {
            Some(existing) => existing.clone(),
            None if create => TranslationMetadata::default(),
            None => return Err(SyncError::NotFound(format!("metadata for {}", unit))),
        };
        change(&mut metadata)?;
        metadata
            .check_invariants()
            .map_err(|err| SyncError::Corrupt(format!("{}: {}", unit, err)))?;
        metadata.updated_at = now_unix();
        let undo = records.put(unit, metadata.clone());
        self.commit(&mut records, undo)?;
        Ok(metadata)
    }

    fn remove(&self, unit: &UnitId) -> SyncResult<TranslationMetadata> {
        let mut records = self.write();
        let previous = records
            .take(unit)
            .ok_or_else(|| SyncError::NotFound(format!("metadata for {}", unit)))?;
        self.commit(&mut records, vec![(unit.clone(), Some(previous.clone()))])?;
        Ok(previous)
    }

    fn unit_ids(&self) -> Vec<UnitId> {
        let mut ids = self.read().units.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    fn count_profile_references(&self, profile_id: &str) -> usize {
        self.read()
            .units
            .values()
            .filter(|metadata| metadata.profile_id.as_deref() == Some(profile_id))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tracked(document_id: &str) -> TranslationMetadata {
        TranslationMetadata {
            document_id: Some(document_id.to_string()),
            source_status: SourceStatus::Current,
            ..Default::default()
        }
    }

    #[test]
    fn mutators_require_a_record() {
        let store = LocalStore::new();
        let unit = UnitId::from("node:1");
        assert!(store.get(&unit).unwrap_err().is_not_found());
        assert!(
            store
                .set_source_status(&unit, SourceStatus::Edited)
                .unwrap_err()
                .is_not_found()
        );
        assert!(store.set_job_id(&unit, Some("j")).unwrap_err().is_not_found());

        let created = store.set_document_id(&unit, Some("doc-1")).unwrap();
        assert_eq!(created.source_status, SourceStatus::Importing);
        assert_eq!(store.get_by_document_id("doc-1").unwrap().0, unit);
    }

    #[test]
    fn reverse_lookup_follows_latest_assignment() {
        let store = LocalStore::new();
        let first = UnitId::from("node:1");
        let second = UnitId::from("node:2");
        store.set_document_id(&first, Some("doc-1")).unwrap();
        store.set_document_id(&first, Some("doc-2")).unwrap();
        assert!(store.get_by_document_id("doc-1").is_err());
        assert_eq!(store.get_by_document_id("doc-2").unwrap().0, first);

        store.set_document_id(&second, Some("doc-2")).unwrap();
        assert_eq!(store.get_by_document_id("doc-2").unwrap().0, second);
        let previous = store.get(&first).unwrap();
        assert_eq!(previous.document_id, None);
        assert_eq!(previous.source_status, SourceStatus::Untracked);

        store.set_document_id(&second, None).unwrap();
        assert!(store.get_by_document_id("doc-2").is_err());
    }

    #[test]
    fn invariant_violations_are_rejected_without_partial_writes() {
        let store = LocalStore::new();
        let unit = UnitId::from("node:1");
        store.upsert(&unit, TranslationMetadata::default()).unwrap();

        let err = store
            .set_target_status(&unit, "de", TargetStatus::Pending)
            .unwrap_err();
        assert!(matches!(err, SyncError::Corrupt(_)));
        assert_eq!(store.get(&unit).unwrap().target_status("de"), TargetStatus::Untracked);

        store
            .set_target_status(&unit, "de", TargetStatus::Disabled)
            .unwrap();
        assert!(
            store
                .upsert(
                    &unit,
                    TranslationMetadata {
                        source_status: SourceStatus::Current,
                        ..Default::default()
                    }
                )
                .is_err()
        );
    }

    #[test]
    fn failing_change_leaves_record_untouched() {
        let store = LocalStore::new();
        let unit = UnitId::from("node:1");
        store.upsert(&unit, tracked("doc-1")).unwrap();
        let err = store
            .modify(&unit, false, &mut |metadata| {
                metadata.source_status = SourceStatus::Edited;
                Err(SyncError::Busy("node:1".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, SyncError::Busy(_)));
        assert_eq!(store.get(&unit).unwrap().source_status, SourceStatus::Current);
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("metadata.json");
        {
            let store = LocalStore::open(&path).unwrap();
            store.upsert(&"node:1".into(), tracked("doc-1")).unwrap();
            store
                .set_target_status(&"node:1".into(), "de", TargetStatus::Ready)
                .unwrap();
            store
                .upsert(
                    &"node:2".into(),
                    TranslationMetadata {
                        profile_id: Some("manual".to_string()),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        let store = LocalStore::open(&path).unwrap();
        let (unit, metadata) = store.get_by_document_id("doc-1").unwrap();
        assert_eq!(unit, UnitId::from("node:1"));
        assert_eq!(metadata.target_status("de"), TargetStatus::Ready);
        assert_eq!(store.count_profile_references("manual"), 1);
        assert_eq!(store.unit_ids().len(), 2);
    }

    #[test]
    fn failed_snapshot_rolls_back() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file").unwrap();
        // the parent of the snapshot is a regular file, so every write fails
        let store = LocalStore {
            records: RwLock::new(Records::default()),
            snapshot: Some(blocker.join("metadata.json")),
        };
        let unit = UnitId::from("node:1");
        assert!(matches!(
            store.upsert(&unit, tracked("doc-1")),
            Err(SyncError::Store(_))
        ));
        assert!(store.get(&unit).is_err());
        assert!(store.get_by_document_id("doc-1").is_err());
    }

    #[test]
    fn remove_drops_the_reverse_entry() {
        let store = LocalStore::new();
        let unit = UnitId::from("node:1");
        store.upsert(&unit, tracked("doc-1")).unwrap();
        assert_eq!(store.remove(&unit).unwrap().document_id.as_deref(), Some("doc-1"));
        assert!(store.get_by_document_id("doc-1").is_err());
        assert!(store.remove(&unit).is_err());
    }
}
