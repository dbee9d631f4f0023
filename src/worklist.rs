//! Periodic re-checks driven from outside, e.g. by cron calling `tms-bridge check`.

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::content::UnitId;
use crate::error::SyncError;
use crate::orchestrator::TranslationOrchestrator;
use crate::status::{SourceStatus, TargetStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorklistReport {
    pub units: usize,
    pub checked: usize,
    pub requested: usize,
    pub downloaded: usize,
    /// Checks that hit a transport error or an action in flight; retried next pass.
    pub deferred: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl WorklistReport {
    fn merge(&mut self, other: WorklistReport) {
        self.units += other.units;
        self.checked += other.checked;
        self.requested += other.requested;
        self.downloaded += other.downloaded;
        self.deferred += other.deferred;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }

    fn record(&mut self, unit: &UnitId, slot: &str, err: SyncError) {
        if err.is_retryable() || matches!(err, SyncError::Busy(_)) {
            debug!("deferring {} ({}): {}", unit, slot, err);
            self.deferred += 1;
        } else {
            warn!("check of {} ({}) failed: {}", unit, slot, err);
            self.failed += 1;
            self.errors.push(format!("{} ({}): {}", unit, slot, err));
        }
    }
}

/// Checks importing sources and in-progress targets of `units`, at most
/// `concurrency` units at a time.
pub async fn run_checks(
    orchestrator: &TranslationOrchestrator,
    units: Vec<UnitId>,
    concurrency: usize,
) -> WorklistReport {
    let reports: Vec<WorklistReport> = stream::iter(units)
        .map(|unit| async move { check_unit(orchestrator, unit).await })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = WorklistReport::default();
    for item in reports {
        report.merge(item);
    }
    info!(
        "worklist: {} unit(s), {} checked, {} deferred, {} failed",
        report.units, report.checked, report.deferred, report.failed
    );
    report
}

async fn check_unit(orchestrator: &TranslationOrchestrator, unit: UnitId) -> WorklistReport {
    let mut report = WorklistReport {
        units: 1,
        ..WorklistReport::default()
    };
    let metadata = match orchestrator.store().get(&unit) {
        Ok(metadata) if metadata.document_id.is_some() => metadata,
        Ok(_) => return report,
        Err(err) if err.is_not_found() => return report,
        Err(err) => {
            report.record(&unit, "source", err);
            return report;
        }
    };

    if metadata.source_status == SourceStatus::Importing {
        match orchestrator.check_source_status(&unit).await {
            Ok(check) => {
                report.checked += 1;
                report.requested += check.requested.len();
            }
            Err(err) => {
                report.record(&unit, "source", err);
                return report;
            }
        }
    }

    let metadata = match orchestrator.store().get(&unit) {
        Ok(metadata) => metadata,
        Err(err) => {
            report.record(&unit, "targets", err);
            return report;
        }
    };
    if metadata.source_status == SourceStatus::Current {
        // locales an earlier sweep could not request
        match orchestrator.resume_requests(&unit).await {
            Ok(requested) => report.requested += requested.len(),
            Err(err) => {
                report.record(&unit, "source", err);
                return report;
            }
        }
    }

    let targets = match orchestrator.store().get(&unit) {
        Ok(metadata) => metadata.target_statuses,
        Err(err) => {
            report.record(&unit, "targets", err);
            return report;
        }
    };
    for (locale, status) in targets {
        let result = if status.is_in_progress() {
            report.checked += 1;
            orchestrator.check_target_status(&unit, &locale).await
        } else if status == TargetStatus::Ready {
            orchestrator.resume_download(&unit, &locale).await
        } else {
            continue;
        };
        match result {
            Ok(check) if check.downloaded => report.downloaded += 1,
            Ok(_) => {}
            Err(err) => report.record(&unit, &locale, err),
        }
    }
    report
}
