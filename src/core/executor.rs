//! Runs one backup job: mirror sync, server-side snapshot, retention.
//!
//! A run moves `Running -> Success | Error`. The running state is published
//! before anything else happens, and every outcome, good or bad, goes through
//! the reporting sink.

use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::context::AgentContext;
use crate::core::models::{GlobalConfig, JobDefinition, JobRunState, MIRROR_DIR, TriggerKind};
use crate::core::reporting::ReportingSink;
use crate::core::retention::{self, RetentionReport};
use crate::core::size::format_bytes;
use crate::core::transfer_engine::{RemotePath, SyncRequest, TransferEngine, TransferError};
use crate::logging::ProgressThrottle;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid job configuration: {0}")]
    Config(String),

    #[error("Source folder not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Mirror sync failed: {0}")]
    Sync(#[source] TransferError),

    #[error("Snapshot copy failed: {0}")]
    Snapshot(#[source] TransferError),
}

/// Result of the housekeeping step. Never affects the run's status.
#[derive(Debug, Clone)]
pub enum RetentionOutcome {
    Enforced(RetentionReport),
    Aborted(String),
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub bytes_transferred: u64,
    pub size: String,
    pub duration_secs: u64,
    pub snapshot: RemotePath,
    pub retention: RetentionOutcome,
}

impl RunOutcome {
    /// Human-readable notes about housekeeping that did not go to plan.
    pub fn warnings(&self) -> Vec<String> {
        match &self.retention {
            RetentionOutcome::Aborted(reason) => vec![format!("Retention skipped: {}", reason)],
            RetentionOutcome::Enforced(report) => report
                .failed
                .iter()
                .map(|f| format!("Could not delete {}: {}", f.name, f.error))
                .collect(),
        }
    }
}

pub struct JobExecutor {
    engine: Arc<dyn TransferEngine>,
    reporter: ReportingSink,
    default_remote: String,
    progress_interval: Duration,
}

impl JobExecutor {
    pub fn new(ctx: &AgentContext) -> Self {
        Self {
            engine: ctx.engine.clone(),
            reporter: ReportingSink::new(ctx),
            default_remote: ctx.config.default_remote.clone(),
            progress_interval: Duration::from_secs(ctx.config.progress_interval_secs),
        }
    }

    /// Execute `job` and report the outcome.
    pub async fn execute(
        &self,
        job: &JobDefinition,
        trigger: TriggerKind,
        global: &GlobalConfig,
    ) -> Result<RunOutcome, JobError> {
        let started = Local::now();
        let clock = Instant::now();
        let mut state = JobRunState::started(&started);

        info!(job_id = %job.id, name = %job.name, ?trigger, "Starting backup");
        self.reporter.running(job, &state).await;

        let span = info_span!("backup", job_id = %job.id);
        let result = self
            .run(job, &mut state, &started, clock)
            .instrument(span)
            .await;

        let finished = Local::now();
        match &result {
            Ok(outcome) => {
                self.reporter
                    .success(job, state, outcome, trigger, global, &finished)
                    .await;
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Backup failed");
                self.reporter
                    .failure(job, state, e, clock.elapsed().as_secs(), trigger, global, &finished)
                    .await;
            }
        }

        result
    }

    async fn run(
        &self,
        job: &JobDefinition,
        state: &mut JobRunState,
        started: &DateTime<Local>,
        clock: Instant,
    ) -> Result<RunOutcome, JobError> {
        if job.remote_root.trim_matches('/').is_empty() {
            return Err(JobError::Config("remote_root must not be empty".to_string()));
        }
        if !job.source_path.exists() {
            return Err(JobError::SourceNotFound(job.source_path.clone()));
        }

        let remote = job
            .remote
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.default_remote.clone());
        let root = RemotePath::new(remote.clone(), job.backup_root());
        let mirror = root.join(MIRROR_DIR);
        let snapshot = RemotePath::new(remote, job.snapshot_path(started));

        info!(source = %job.source_path.display(), mirror = %mirror, "Syncing to cloud mirror");
        let bytes = self.sync(job, state, mirror.clone()).await?;

        info!(snapshot = %snapshot, "Creating immutable snapshot");
        state.detail = "Creating immutable snapshot...".to_string();
        self.reporter.running(job, state).await;
        self.engine
            .copy_server_side(&mirror, &snapshot)
            .await
            .map_err(JobError::Snapshot)?;

        let retention =
            match retention::enforce(self.engine.as_ref(), &root, job.retention_days, &Local::now())
                .await
            {
                Ok(report) => RetentionOutcome::Enforced(report),
                Err(e) => {
                    warn!(error = %e, "Retention skipped");
                    RetentionOutcome::Aborted(e.to_string())
                }
            };

        Ok(RunOutcome {
            bytes_transferred: bytes,
            size: format_bytes(bytes),
            duration_secs: clock.elapsed().as_secs(),
            snapshot,
            retention,
        })
    }

    /// Run the mirror sync on its own task and follow its progress.
    async fn sync(
        &self,
        job: &JobDefinition,
        state: &mut JobRunState,
        mirror: RemotePath,
    ) -> Result<u64, JobError> {
        let (tx, mut rx) = mpsc::channel(64);
        let engine = self.engine.clone();
        let req = SyncRequest {
            job_id: job.id.clone(),
            source: job.source_path.clone(),
            destination: mirror,
        };
        let handle = tokio::spawn(async move { engine.sync(&req, tx).await });

        let mut throttle = ProgressThrottle::new(self.progress_interval);
        while let Some(bytes) = rx.recv().await {
            if state.record_bytes(bytes) && throttle.ready() {
                debug!(bytes, "Transfer progress");
                self.reporter.progress(job, bytes).await;
            }
        }

        let result = handle
            .await
            .map_err(|e| JobError::Sync(TransferError::Reader(e)))?
            .map_err(JobError::Sync)?;

        Ok(result.bytes_transferred)
    }
}
