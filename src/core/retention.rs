//! Time-based pruning of old snapshots.
//!
//! Snapshot directories are named `Backup_<YYYY-MM-DD>_<HH-MM>`. Only the date
//! part matters for age. Anything that is not a snapshot, including the live
//! mirror, is left alone.

use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::models::MIRROR_DIR;
use crate::core::transfer_engine::{RemotePath, TransferEngine, TransferError};

static SNAPSHOT_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Backup_(\d{4}-\d{2}-\d{2})").expect("valid snapshot regex"));

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("could not list {path}: {source}")]
    ListFailed {
        path: String,
        #[source]
        source: TransferError,
    },
}

/// A snapshot that was old enough to delete but could not be.
#[derive(Debug, Clone, PartialEq)]
pub struct PurgeFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionReport {
    pub deleted: Vec<String>,
    pub failed: Vec<PurgeFailure>,
    /// Entries skipped because they are the mirror or carry no parseable date.
    pub ignored: usize,
}

/// Date embedded in a snapshot name, or `None` when the name does not follow
/// the snapshot pattern. Such entries are never deleted.
pub fn snapshot_date(name: &str) -> Option<NaiveDate> {
    let caps = SNAPSHOT_DATE.captures(name)?;
    NaiveDate::parse_from_str(caps.get(1)?.as_str(), "%Y-%m-%d").ok()
}

/// Whole days between midnight of `date` and `now`, rounded down.
pub fn age_in_days(date: NaiveDate, now: &DateTime<Local>) -> i64 {
    (now.naive_local() - date.and_time(NaiveTime::MIN)).num_days()
}

/// Names from `entries` that have outlived `keep_days`, plus the count of
/// entries that were not considered at all.
pub fn expired(entries: &[String], now: &DateTime<Local>, keep_days: u32) -> (Vec<String>, usize) {
    let mut doomed = Vec::new();
    let mut ignored = 0;

    for name in entries {
        if name == MIRROR_DIR {
            ignored += 1;
            continue;
        }
        let Some(date) = snapshot_date(name) else {
            debug!(entry = %name, "Ignoring entry without a snapshot date");
            ignored += 1;
            continue;
        };
        if age_in_days(date, now) > i64::from(keep_days) {
            doomed.push(name.clone());
        }
    }

    (doomed, ignored)
}

/// List `root`, then purge every expired snapshot under it.
///
/// A listing failure aborts before anything is deleted. A failed purge is
/// recorded and the remaining entries are still attempted.
pub async fn enforce(
    engine: &dyn TransferEngine,
    root: &RemotePath,
    keep_days: u32,
    now: &DateTime<Local>,
) -> Result<RetentionReport, RetentionError> {
    info!(root = %root, keep_days, "Checking retention policy");

    let entries = engine
        .list_directories(root)
        .await
        .map_err(|source| RetentionError::ListFailed {
            path: root.to_string(),
            source,
        })?;

    let (doomed, ignored) = expired(&entries, now, keep_days);
    let mut report = RetentionReport {
        ignored,
        ..Default::default()
    };

    for name in doomed {
        let target = root.join(&name);
        info!(snapshot = %name, "Purging expired snapshot");
        match engine.purge(&target).await {
            Ok(()) => report.deleted.push(name),
            Err(e) => {
                warn!(snapshot = %name, error = %e, "Failed to purge snapshot");
                report.failed.push(PurgeFailure {
                    name,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        deleted = report.deleted.len(),
        failed = report.failed.len(),
        "Retention check complete"
    );
    Ok(report)
}
