//! The translation lifecycle driver.
//!
//! Each entry point validates the recorded status against the lattice, talks to
//! the TMS without holding any metadata lock, then re-applies the transition to
//! whatever the record looks like after the remote call. Concurrent actions on
//! the same `(unit, slot)` pair are detected with in-flight claims; the slot is
//! either the source document or one target locale.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::actions::{ActionRegistry, TargetAction, available_actions};
use crate::content::{ContentSerializer, ContentUnit, UnitId};
use crate::error::{SyncError, SyncResult};
use crate::locale::{LocaleMapper, normalize};
use crate::profile::{EffectivePolicy, Profile, ProfileResolver};
use crate::setup::SetupChecker;
use crate::status::{
    Event, InvalidTransition, SourceStatus, TargetStatus, next_source_status, next_target_status,
};
use crate::store::{MetadataStore, TranslationMetadata};
use crate::tms::{TmsClient, TmsError, UploadHints, UploadRequest};

const SOURCE_SLOT: &str = "@source";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCheck {
    pub status: SourceStatus,
    /// Locales requested by the auto-request sweep.
    pub requested: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetCheck {
    pub status: TargetStatus,
    pub downloaded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub edited: bool,
    pub uploaded: Option<String>,
    /// The automatic upload hit a transport error and will be retried later.
    pub deferred: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub unit: UnitId,
    pub profile: Option<String>,
    pub metadata: TranslationMetadata,
    pub actions: BTreeMap<String, Vec<TargetAction>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClaimKey {
    unit: UnitId,
    slot: String,
}

/// Released on drop.
struct Claim<'a> {
    claims: &'a Mutex<HashSet<ClaimKey>>,
    key: ClaimKey,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut claims = self
            .claims
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        claims.remove(&self.key);
    }
}

pub struct TranslationOrchestrator {
    store: Arc<dyn MetadataStore>,
    resolver: ProfileResolver,
    tms: Arc<dyn TmsClient>,
    content: Arc<dyn ContentSerializer>,
    locales: LocaleMapper,
    setup: SetupChecker,
    actions: ActionRegistry,
    interim_downloads: bool,
    claims: Mutex<HashSet<ClaimKey>>,
}

impl TranslationOrchestrator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        resolver: ProfileResolver,
        tms: Arc<dyn TmsClient>,
        content: Arc<dyn ContentSerializer>,
        locales: LocaleMapper,
    ) -> Self {
        Self {
            store,
            resolver,
            tms,
            content,
            locales,
            setup: SetupChecker::ready(),
            actions: ActionRegistry::new(),
            interim_downloads: false,
            claims: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_setup(mut self, setup: SetupChecker) -> Self {
        self.setup = setup;
        self
    }

    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_interim_downloads(mut self, enabled: bool) -> Self {
        self.interim_downloads = enabled;
        self
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn resolver(&self) -> &ProfileResolver {
        &self.resolver
    }

    pub fn locales(&self) -> &LocaleMapper {
        &self.locales
    }

    pub fn interim_downloads(&self) -> bool {
        self.interim_downloads
    }

    /// Sends the unit's source content to the TMS.
    ///
    /// Units with a document are re-sent as an update. Transport failures leave
    /// the record as it was.
    pub async fn upload(&self, unit: &UnitId, job_id: Option<&str>) -> SyncResult<String> {
        self.setup.check()?;
        let _claim = self.claim_or_busy(unit, SOURCE_SLOT)?;
        let content_unit = self.content.load(unit)?;
        let metadata = self.metadata_or_default(unit)?;
        next_source_status(metadata.source_status, Event::ContentUploaded)?;

        let serialized = self.content.serialize(&content_unit)?;
        let hash = serialized.hash();
        let profile = self.resolve_profile(&content_unit, &metadata);
        let job_id = job_id
            .map(|value| value.to_string())
            .or_else(|| metadata.job_id.clone());
        let hints = match &profile {
            Some(profile) => profile.upload_hints(job_id.as_deref()),
            None => UploadHints {
                job_id: job_id.clone(),
                ..UploadHints::default()
            },
        };
        let request = UploadRequest {
            title: content_unit.title.clone(),
            content: serialized.blob,
            locale: self.locales.to_tms(&serialized.locale),
            hints,
        };

        let (result, updated) = match metadata.document_id.as_deref() {
            Some(existing) => match self.tms.update_document(existing, request.clone()).await {
                Err(TmsError::NotFound(_)) => {
                    info!("document {} for {} is gone, uploading again", existing, unit);
                    (self.tms.upload_document(request).await, false)
                }
                other => (other, true),
            },
            None => (self.tms.upload_document(request).await, false),
        };
        let document_id = match result {
            Ok(document_id) => document_id,
            Err(err) => {
                let err = SyncError::from_tms(err, unit.as_str());
                warn!("upload of {} failed: {}", unit, err);
                return Err(err);
            }
        };

        self.store.modify(unit, true, &mut |metadata| {
            metadata.source_status = next_source_status(metadata.source_status, Event::ContentUploaded)?;
            metadata.document_id = Some(document_id.clone());
            metadata.last_upload_hash = Some(hash.clone());
            metadata.job_id = job_id.clone();
            if updated {
                // the TMS re-translates every target of an updated document
                for status in metadata.target_statuses.values_mut() {
                    if *status == TargetStatus::Edited {
                        *status = next_target_status(*status, Event::TargetRequested)?;
                    }
                }
            } else {
                metadata.target_statuses.retain(|_, status| status.is_excluded());
            }
            Ok(())
        })?;
        info!("uploaded {} as document {}", unit, document_id);
        Ok(document_id)
    }

    /// Polls the document import and runs the auto-request sweep once it is current.
    pub async fn check_source_status(&self, unit: &UnitId) -> SyncResult<SourceCheck> {
        self.setup.check()?;
        let metadata = self.store.get(unit)?;
        let document_id = tracked_document(unit, &metadata)?;
        next_source_status(metadata.source_status, Event::ImportCompleted)?;
        let _claim = self.claim_or_busy(unit, SOURCE_SLOT)?;

        let progress = match self.tms.check_document_status(&document_id).await {
            Ok(progress) => progress,
            Err(TmsError::NotFound(_)) => {
                self.detach(unit, &document_id)?;
                return Ok(SourceCheck {
                    status: SourceStatus::Untracked,
                    requested: Vec::new(),
                });
            }
            Err(err) => return Err(SyncError::from_tms(err, unit.as_str())),
        };
        if !progress.complete {
            debug!("import of {} at {}%", unit, progress.percent);
            return Ok(SourceCheck {
                status: metadata.source_status,
                requested: Vec::new(),
            });
        }
        self.finish_import(unit, &document_id).await
    }

    /// Import completion reported by the TMS.
    pub async fn import_completed(&self, unit: &UnitId, document_id: &str) -> SyncResult<SourceCheck> {
        let _claim = self.claim_or_busy(unit, SOURCE_SLOT)?;
        self.finish_import(unit, document_id).await
    }

    pub fn import_failed(&self, unit: &UnitId, document_id: &str) -> SyncResult<SourceStatus> {
        let status = self.apply_source(unit, document_id, Event::ImportFailed)?;
        warn!("import of {} (document {}) failed", unit, document_id);
        Ok(status)
    }

    async fn finish_import(&self, unit: &UnitId, document_id: &str) -> SyncResult<SourceCheck> {
        let status = self.apply_source(unit, document_id, Event::ImportCompleted)?;
        if status != SourceStatus::Current {
            return Ok(SourceCheck {
                status,
                requested: Vec::new(),
            });
        }
        info!("document {} for {} is current", document_id, unit);
        let requested = self.auto_request(unit, document_id).await?;
        Ok(SourceCheck { status, requested })
    }

    async fn auto_request(&self, unit: &UnitId, document_id: &str) -> SyncResult<Vec<String>> {
        let content_unit = self.content.load(unit)?;
        let metadata = self.store.get(unit)?;
        let profile = self.resolve_profile(&content_unit, &metadata);
        let mut requested = Vec::new();
        for locale in self.target_locales(&content_unit) {
            let policy = ProfileResolver::resolve_for_target(profile.as_ref(), &locale);
            let status = metadata.target_status(&locale);
            if policy.disabled {
                if !status.is_excluded() {
                    self.apply_target(unit, document_id, &locale, Event::LocaleDisabled)?;
                }
                continue;
            }
            if !policy.auto_request || !status.is_requestable() {
                continue;
            }
            let Some(_claim) = self.claim(unit, &locale) else {
                debug!("{} for {} is busy, skipping auto request", locale, unit);
                continue;
            };
            match self.add_target(unit, document_id, &locale, &policy).await {
                Ok(_) => requested.push(locale),
                Err(err) if err.is_retryable() => return Err(err),
                Err(err @ SyncError::Unauthenticated(_)) => return Err(err),
                Err(err) => warn!("auto request of {} for {} failed: {}", locale, unit, err),
            }
        }
        Ok(requested)
    }

    /// Re-runs the auto-request sweep for a current source, picking up
    /// locales a previous sweep could not reach.
    pub async fn resume_requests(&self, unit: &UnitId) -> SyncResult<Vec<String>> {
        self.setup.check()?;
        let metadata = self.store.get(unit)?;
        let document_id = tracked_document(unit, &metadata)?;
        if metadata.source_status != SourceStatus::Current {
            return Ok(Vec::new());
        }
        self.auto_request(unit, &document_id).await
    }

    /// Asks the TMS for a translation into `locale`.
    pub async fn request_target(&self, unit: &UnitId, locale: &str) -> SyncResult<TargetStatus> {
        self.setup.check()?;
        let locale = normalize(locale);
        let content_unit = self.content.load(unit)?;
        self.ensure_target_locale(&content_unit, &locale)?;
        let metadata = self.store.get(unit)?;
        let document_id = tracked_document(unit, &metadata)?;
        if metadata.source_status != SourceStatus::Current {
            return Err(SyncError::InvalidTransition(InvalidTransition {
                from: metadata.source_status.to_string(),
                event: Event::TargetRequested,
            }));
        }
        let policy = self.policy_for(&content_unit, &metadata, &locale);
        self.ensure_not_disabled(unit, &locale, &policy, metadata.target_status(&locale))?;
        next_target_status(metadata.target_status(&locale), Event::TargetRequested)?;

        let _claim = self.claim_or_busy(unit, &locale)?;
        self.add_target(unit, &document_id, &locale, &policy).await
    }

    async fn add_target(
        &self,
        unit: &UnitId,
        document_id: &str,
        locale: &str,
        policy: &EffectivePolicy,
    ) -> SyncResult<TargetStatus> {
        let remote_locale = self.locales.to_tms(locale);
        match self
            .tms
            .add_target(document_id, &remote_locale, policy.target_hints())
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_duplicate() => {
                debug!("{} already requested for document {}", locale, document_id);
            }
            Err(TmsError::NotFound(message)) => {
                self.detach(unit, document_id)?;
                return Err(SyncError::NotFound(message));
            }
            Err(err @ TmsError::Rejected { .. }) => {
                if let Err(store_err) = self.apply_target(unit, document_id, locale, Event::TargetFailed) {
                    warn!("failed to record rejected {} request for {}: {}", locale, unit, store_err);
                }
                return Err(SyncError::from_tms(err, unit.as_str()));
            }
            Err(err) => return Err(SyncError::from_tms(err, unit.as_str())),
        }
        let status = self.apply_target(unit, document_id, locale, Event::TargetRequested)?;
        info!("requested {} translation of {}", locale, unit);
        Ok(status)
    }

    /// Polls one target; a ready target is downloaded when the policy says so.
    pub async fn check_target_status(&self, unit: &UnitId, locale: &str) -> SyncResult<TargetCheck> {
        self.setup.check()?;
        let locale = normalize(locale);
        let metadata = self.store.get(unit)?;
        let document_id = tracked_document(unit, &metadata)?;
        next_target_status(metadata.target_status(&locale), Event::TargetProgress(0))?;
        let _claim = self.claim_or_busy(unit, &locale)?;

        let remote_locale = self.locales.to_tms(&locale);
        let progress = match self.tms.check_target_status(&document_id, &remote_locale).await {
            Ok(progress) => progress,
            Err(TmsError::NotFound(_)) => {
                let status = self.apply_target(unit, &document_id, &locale, Event::TargetDeleted)?;
                return Ok(TargetCheck {
                    status,
                    downloaded: false,
                });
            }
            Err(err) => return Err(SyncError::from_tms(err, unit.as_str())),
        };
        if !progress.complete {
            let status = self.record_progress(unit, &document_id, &locale, progress.percent)?;
            return Ok(TargetCheck {
                status,
                downloaded: false,
            });
        }
        self.complete_target(unit, &document_id, &locale).await
    }

    /// Target completion reported by the TMS. Repeated deliveries are no-ops.
    pub async fn target_completed(
        &self,
        unit: &UnitId,
        document_id: &str,
        locale: &str,
    ) -> SyncResult<TargetCheck> {
        let locale = normalize(locale);
        self.ensure_target_locale(&self.content.load(unit)?, &locale)?;
        let _claim = self.claim_or_busy(unit, &locale)?;
        self.complete_target(unit, document_id, &locale).await
    }

    async fn complete_target(
        &self,
        unit: &UnitId,
        document_id: &str,
        locale: &str,
    ) -> SyncResult<TargetCheck> {
        let status = self.apply_target(unit, document_id, locale, Event::TargetCompleted)?;
        if status != TargetStatus::Ready {
            return Ok(TargetCheck {
                status,
                downloaded: false,
            });
        }
        let content_unit = self.content.load(unit)?;
        let metadata = self.store.get(unit)?;
        let policy = self.policy_for(&content_unit, &metadata, locale);
        if policy.disabled || !policy.auto_download {
            return Ok(TargetCheck {
                status,
                downloaded: false,
            });
        }
        self.setup.check()?;
        let status = self.fetch_target(&content_unit, document_id, locale).await?;
        Ok(TargetCheck {
            status,
            downloaded: true,
        })
    }

    /// Downloads a target left `READY` by an earlier failed automatic download.
    /// Nothing happens unless the policy downloads automatically.
    pub async fn resume_download(&self, unit: &UnitId, locale: &str) -> SyncResult<TargetCheck> {
        let metadata = self.store.get(unit)?;
        let document_id = tracked_document(unit, &metadata)?;
        let locale = normalize(locale);
        let status = metadata.target_status(&locale);
        if status != TargetStatus::Ready {
            return Ok(TargetCheck {
                status,
                downloaded: false,
            });
        }
        self.target_completed(unit, &document_id, &locale).await
    }

    /// Partial progress reported by the TMS; recorded only with interim downloads on.
    pub fn target_progress(
        &self,
        unit: &UnitId,
        document_id: &str,
        locale: &str,
        percent: u8,
    ) -> SyncResult<TargetStatus> {
        let locale = normalize(locale);
        self.ensure_target_locale(&self.content.load(unit)?, &locale)?;
        self.record_progress(unit, document_id, &locale, percent.min(99))
    }

    fn record_progress(
        &self,
        unit: &UnitId,
        document_id: &str,
        locale: &str,
        percent: u8,
    ) -> SyncResult<TargetStatus> {
        if !self.interim_downloads {
            let metadata = self.store.get(unit)?;
            return Ok(metadata.target_status(locale));
        }
        self.apply_target(unit, document_id, locale, Event::TargetProgress(percent))
    }

    pub fn target_deleted(
        &self,
        unit: &UnitId,
        document_id: &str,
        locale: &str,
    ) -> SyncResult<TargetStatus> {
        let locale = normalize(locale);
        let status = self.apply_target(unit, document_id, &locale, Event::TargetDeleted)?;
        info!("{} target of {} removed on the TMS", locale, unit);
        Ok(status)
    }

    /// Downloads a ready target (or an intermediate one with interim downloads on).
    pub async fn download_target(&self, unit: &UnitId, locale: &str) -> SyncResult<TargetStatus> {
        self.setup.check()?;
        let locale = normalize(locale);
        let content_unit = self.content.load(unit)?;
        let metadata = self.store.get(unit)?;
        let document_id = tracked_document(unit, &metadata)?;
        let current = metadata.target_status(&locale);
        let policy = self.policy_for(&content_unit, &metadata, &locale);
        self.ensure_not_disabled(unit, &locale, &policy, current)?;
        let allowed = current == TargetStatus::Ready
            || (current == TargetStatus::Intermediate && self.interim_downloads);
        if !allowed {
            return Err(SyncError::InvalidTransition(InvalidTransition {
                from: current.to_string(),
                event: Event::TargetDownloaded,
            }));
        }
        let _claim = self.claim_or_busy(unit, &locale)?;
        self.fetch_target(&content_unit, &document_id, &locale).await
    }

    async fn fetch_target(
        &self,
        unit: &ContentUnit,
        document_id: &str,
        locale: &str,
    ) -> SyncResult<TargetStatus> {
        let remote_locale = self.locales.to_tms(locale);
        let blob = self
            .tms
            .download_target(document_id, &remote_locale)
            .await
            .map_err(|err| SyncError::from_tms(err, unit.id.as_str()))?;
        self.content.deserialize(unit, locale, &blob)?;
        let status = self.apply_target(&unit.id, document_id, locale, Event::TargetDownloaded)?;
        info!("downloaded {} translation of {}", locale, unit.id);
        Ok(status)
    }

    /// Records a local edit: the source goes stale and so do current targets,
    /// unless the profile opts out. Units without a record are left alone.
    pub fn mark_edited(&self, unit: &UnitId) -> SyncResult<TranslationMetadata> {
        let metadata = match self.store.get(unit) {
            Ok(metadata) => metadata,
            Err(err) if err.is_not_found() => return Ok(TranslationMetadata::default()),
            Err(err) => return Err(err),
        };
        let mark_targets = match self.content.load(unit) {
            Ok(content_unit) => self
                .resolve_profile(&content_unit, &metadata)
                .is_none_or(|profile| profile.mark_targets_stale),
            Err(err) if err.is_not_found() => true,
            Err(err) => return Err(err),
        };
        let updated = self.store.modify(unit, false, &mut |metadata| {
            metadata.source_status = next_source_status(metadata.source_status, Event::ContentEdited)?;
            if mark_targets {
                for status in metadata.target_statuses.values_mut() {
                    *status = next_target_status(*status, Event::ContentEdited)?;
                }
            }
            Ok(())
        })?;
        debug!("{} marked edited", unit);
        Ok(updated)
    }

    /// Host hook for create and update. A save whose content hash matches the
    /// last upload is not an edit.
    pub async fn on_content_saved(&self, unit: &UnitId) -> SyncResult<SaveOutcome> {
        let content_unit = self.content.load(unit)?;
        let hash = self.content.serialize(&content_unit)?.hash();
        let metadata = self.metadata_or_default(unit)?;
        if metadata.last_upload_hash.as_deref() == Some(hash.as_str()) {
            return Ok(SaveOutcome::default());
        }
        let metadata = if metadata == TranslationMetadata::default() {
            metadata
        } else {
            self.mark_edited(unit)?
        };
        let mut outcome = SaveOutcome {
            edited: true,
            ..SaveOutcome::default()
        };

        let auto_upload = self
            .resolve_profile(&content_unit, &metadata)
            .is_some_and(|profile| profile.auto_upload);
        if !auto_upload || !metadata.source_status.is_uploadable() {
            return Ok(outcome);
        }
        match self.upload(unit, None).await {
            Ok(document_id) => outcome.uploaded = Some(document_id),
            Err(err) if err.is_retryable() => outcome.deferred = true,
            Err(err) => return Err(err),
        }
        Ok(outcome)
    }

    /// Records an explicit profile assignment and re-applies its locale exclusions.
    pub fn assign_profile(
        &self,
        unit: &UnitId,
        profile_id: Option<&str>,
    ) -> SyncResult<TranslationMetadata> {
        let profile = match profile_id {
            Some(id) => Some(
                self.resolver
                    .registry()
                    .get(id)
                    .ok_or_else(|| SyncError::NotFound(format!("profile '{}'", id)))?,
            ),
            None => None,
        };
        let locales = self.locales.targets();
        let updated = self.store.modify(unit, true, &mut |metadata| {
            metadata.profile_id = profile.as_ref().map(|profile| profile.id.clone());
            for locale in &locales {
                let policy = ProfileResolver::resolve_for_target(profile.as_ref(), locale);
                let current = metadata.target_status(locale);
                let next = if policy.disabled {
                    next_target_status(current, Event::LocaleDisabled)?
                } else if current == TargetStatus::Disabled {
                    next_target_status(current, Event::LocaleEnabled)?
                } else {
                    current
                };
                if next != current {
                    metadata.target_statuses.insert(locale.clone(), next);
                }
            }
            Ok(())
        })?;
        info!(
            "profile of {} set to {}",
            unit,
            profile_id.unwrap_or("(default)")
        );
        Ok(updated)
    }

    /// Excludes the unit and all its targets from translation.
    pub fn disable(&self, unit: &UnitId) -> SyncResult<TranslationMetadata> {
        let locales = self.locales.targets();
        self.store.modify(unit, true, &mut |metadata| {
            metadata.source_status = next_source_status(metadata.source_status, Event::LocaleDisabled)?;
            for locale in &locales {
                let next = next_target_status(metadata.target_status(locale), Event::LocaleDisabled)?;
                metadata.target_statuses.insert(locale.clone(), next);
            }
            Ok(())
        })
    }

    pub fn enable(&self, unit: &UnitId) -> SyncResult<TranslationMetadata> {
        let content_unit = self.content.load(unit)?;
        let metadata = self.store.get(unit)?;
        let profile = self.resolve_profile(&content_unit, &metadata);
        let locales = self.target_locales(&content_unit);
        self.store.modify(unit, false, &mut |metadata| {
            metadata.source_status = if metadata.document_id.is_none() {
                SourceStatus::Untracked
            } else {
                next_source_status(metadata.source_status, Event::LocaleEnabled)?
            };
            for locale in &locales {
                let policy = ProfileResolver::resolve_for_target(profile.as_ref(), locale);
                if policy.disabled {
                    continue;
                }
                let next = next_target_status(metadata.target_status(locale), Event::LocaleEnabled)?;
                metadata.target_statuses.insert(locale.clone(), next);
            }
            Ok(())
        })
    }

    /// Deletes the TMS document and untracks the unit.
    pub async fn delete_document(&self, unit: &UnitId) -> SyncResult<()> {
        self.remove_document(unit, false).await
    }

    /// Archives the TMS document and untracks the unit.
    pub async fn archive_document(&self, unit: &UnitId) -> SyncResult<()> {
        self.remove_document(unit, true).await
    }

    async fn remove_document(&self, unit: &UnitId, archive: bool) -> SyncResult<()> {
        self.setup.check()?;
        let metadata = self.store.get(unit)?;
        let document_id = tracked_document(unit, &metadata)?;
        let _claim = self.claim_or_busy(unit, SOURCE_SLOT)?;
        let result = if archive {
            self.tms.archive_document(&document_id).await
        } else {
            self.tms.delete_document(&document_id).await
        };
        result.map_err(|err| SyncError::from_tms(err, unit.as_str()))?;
        self.detach(unit, &document_id)?;
        info!(
            "{} document {} of {}",
            if archive { "archived" } else { "deleted" },
            document_id,
            unit
        );
        Ok(())
    }

    /// Forgets a document the TMS no longer has.
    pub fn untrack(&self, unit: &UnitId, document_id: &str) -> SyncResult<()> {
        self.detach(unit, document_id)
    }

    pub fn status(&self, unit: &UnitId) -> SyncResult<TranslationMetadata> {
        self.metadata_or_default(unit)
    }

    /// Base actions for one target, passed through the registered hooks.
    pub fn target_actions(&self, unit: &UnitId, locale: &str) -> SyncResult<Vec<TargetAction>> {
        let locale = normalize(locale);
        let content_unit = self.content.load(unit)?;
        let metadata = self.metadata_or_default(unit)?;
        let base = available_actions(&metadata, &locale);
        Ok(self.actions.apply(&content_unit, &locale, base))
    }

    pub fn report(&self, unit: &UnitId) -> SyncResult<UnitReport> {
        let content_unit = self.content.load(unit)?;
        let metadata = self.metadata_or_default(unit)?;
        let profile = self
            .resolve_profile(&content_unit, &metadata)
            .map(|profile| profile.id);
        let actions = self
            .target_locales(&content_unit)
            .into_iter()
            .map(|locale| {
                let base = available_actions(&metadata, &locale);
                let actions = self.actions.apply(&content_unit, &locale, base);
                (locale, actions)
            })
            .collect();
        Ok(UnitReport {
            unit: unit.clone(),
            profile,
            metadata,
            actions,
        })
    }

    fn metadata_or_default(&self, unit: &UnitId) -> SyncResult<TranslationMetadata> {
        match self.store.get(unit) {
            Ok(metadata) => Ok(metadata),
            Err(err) if err.is_not_found() => Ok(TranslationMetadata::default()),
            Err(err) => Err(err),
        }
    }

    fn resolve_profile(&self, unit: &ContentUnit, metadata: &TranslationMetadata) -> Option<Profile> {
        self.resolver.resolve(unit, metadata.profile_id.as_deref())
    }

    fn policy_for(
        &self,
        unit: &ContentUnit,
        metadata: &TranslationMetadata,
        locale: &str,
    ) -> EffectivePolicy {
        let profile = self.resolve_profile(unit, metadata);
        ProfileResolver::resolve_for_target(profile.as_ref(), locale)
    }

    fn target_locales(&self, unit: &ContentUnit) -> Vec<String> {
        let source = normalize(&unit.source_locale);
        self.locales
            .targets()
            .into_iter()
            .filter(|locale| *locale != source)
            .collect()
    }

    fn ensure_target_locale(&self, unit: &ContentUnit, locale: &str) -> SyncResult<()> {
        let reason = if !self.locales.is_enabled(locale) {
            "locale is not enabled"
        } else if normalize(&unit.source_locale) == locale {
            "locale is the source language"
        } else {
            return Ok(());
        };
        Err(SyncError::LocaleDisabled {
            unit: unit.id.to_string(),
            locale: locale.to_string(),
            reason: reason.to_string(),
        })
    }

    fn ensure_not_disabled(
        &self,
        unit: &UnitId,
        locale: &str,
        policy: &EffectivePolicy,
        status: TargetStatus,
    ) -> SyncResult<()> {
        let reason = if policy.disabled {
            "disabled by the translation profile"
        } else if status.is_excluded() {
            "locale is excluded for this item"
        } else {
            return Ok(());
        };
        Err(SyncError::LocaleDisabled {
            unit: unit.to_string(),
            locale: locale.to_string(),
            reason: reason.to_string(),
        })
    }

    fn apply_source(&self, unit: &UnitId, document_id: &str, event: Event) -> SyncResult<SourceStatus> {
        let mut next = SourceStatus::Untracked;
        self.store.modify(unit, false, &mut |metadata| {
            ensure_document(metadata, document_id)?;
            next = next_source_status(metadata.source_status, event)?;
            metadata.source_status = next;
            Ok(())
        })?;
        Ok(next)
    }

    fn apply_target(
        &self,
        unit: &UnitId,
        document_id: &str,
        locale: &str,
        event: Event,
    ) -> SyncResult<TargetStatus> {
        let mut transition = (TargetStatus::Untracked, TargetStatus::Untracked);
        self.store.modify(unit, false, &mut |metadata| {
            ensure_document(metadata, document_id)?;
            let current = metadata.target_status(locale);
            let next = next_target_status(current, event)?;
            metadata.target_statuses.insert(locale.to_string(), next);
            transition = (current, next);
            Ok(())
        })?;
        if transition.0 != transition.1 {
            debug!(
                "{} {}: {} -> {} ({})",
                unit, locale, transition.0, transition.1, event
            );
        }
        Ok(transition.1)
    }

    fn detach(&self, unit: &UnitId, document_id: &str) -> SyncResult<()> {
        self.store.modify(unit, false, &mut |metadata| {
            ensure_document(metadata, document_id)?;
            metadata.detach();
            Ok(())
        })?;
        info!("{} no longer tracks document {}", unit, document_id);
        Ok(())
    }

    fn claim(&self, unit: &UnitId, slot: &str) -> Option<Claim<'_>> {
        let key = ClaimKey {
            unit: unit.clone(),
            slot: slot.to_string(),
        };
        let mut claims = self
            .claims
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !claims.insert(key.clone()) {
            return None;
        }
        Some(Claim {
            claims: &self.claims,
            key,
        })
    }

    fn claim_or_busy(&self, unit: &UnitId, slot: &str) -> SyncResult<Claim<'_>> {
        self.claim(unit, slot).ok_or_else(|| {
            let slot = if slot == SOURCE_SLOT { "source" } else { slot };
            SyncError::Busy(format!("{} ({})", unit, slot))
        })
    }
}

fn tracked_document(unit: &UnitId, metadata: &TranslationMetadata) -> SyncResult<String> {
    metadata
        .document_id
        .clone()
        .ok_or_else(|| SyncError::NotFound(format!("no TMS document for {}", unit)))
}

fn ensure_document(metadata: &TranslationMetadata, document_id: &str) -> SyncResult<()> {
    if metadata.document_id.as_deref() == Some(document_id) {
        Ok(())
    } else {
        Err(SyncError::NotFound(format!(
            "document {} is no longer tracked",
            document_id
        )))
    }
}
