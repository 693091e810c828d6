//! Publishes run outcomes: run-state writes, history entries, notifications.
//!
//! Nothing here can fail a job. Store and notification errors are logged
//! and swallowed so the recorded status always reflects the transfer itself.

use chrono::{DateTime, Local};
use std::sync::Arc;
use tracing::{info, warn};

use crate::context::AgentContext;
use crate::core::executor::{JobError, RunOutcome};
use crate::core::models::{
    GlobalConfig, HistoryEntry, JobDefinition, JobRunState, RunStatus, TriggerKind,
};
use crate::core::notifications::{self, JobEvent, NotificationChannel};
use crate::store::{self, RemoteStore};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

pub struct ReportingSink {
    store: Arc<dyn RemoteStore>,
    agent_id: String,
    /// Fixed channel; when unset one is built from the global settings per report.
    channel: Option<Arc<dyn NotificationChannel>>,
}

impl ReportingSink {
    pub fn new(ctx: &AgentContext) -> Self {
        Self {
            store: ctx.store.clone(),
            agent_id: ctx.agent_id.clone(),
            channel: ctx.notifier.clone(),
        }
    }

    /// Publish an in-progress state (dispatch or phase change).
    pub async fn running(&self, job: &JobDefinition, state: &JobRunState) {
        if let Err(e) =
            store::jobs::update_status(self.store.as_ref(), &self.agent_id, &job.id, state).await
        {
            warn!(job_id = %job.id, error = %e, "Failed to publish running status");
        }
    }

    pub async fn progress(&self, job: &JobDefinition, bytes: u64) {
        if let Err(e) =
            store::jobs::update_progress(self.store.as_ref(), &self.agent_id, &job.id, bytes).await
        {
            warn!(job_id = %job.id, error = %e, "Failed to publish transfer progress");
        }
    }

    pub async fn success(
        &self,
        job: &JobDefinition,
        mut state: JobRunState,
        outcome: &RunOutcome,
        trigger: TriggerKind,
        global: &GlobalConfig,
        finished: &DateTime<Local>,
    ) {
        let warnings = outcome.warnings();
        let finished_at = finished.format(DATE_FORMAT).to_string();
        let duration = format!("{}s", outcome.duration_secs);

        state.status = RunStatus::Success;
        state.detail = if warnings.is_empty() {
            format!("Success. Uploaded: {}", outcome.size)
        } else {
            format!(
                "Success. Uploaded: {} ({})",
                outcome.size,
                warnings.join("; ")
            )
        };
        state.bytes_transferred = outcome.bytes_transferred;
        state.duration_secs = Some(outcome.duration_secs);
        state.last_success_size = Some(outcome.size.clone());
        state.last_run_date = Some(finished_at.clone());

        self.write_final(job, &state).await;
        self.append_history(
            job,
            HistoryEntry {
                timestamp: finished_at,
                job_id: job.id.clone(),
                job_name: job.name.clone(),
                status: RunStatus::Success,
                duration: duration.clone(),
                size: outcome.size.clone(),
                trigger,
            },
        )
        .await;

        info!(job_id = %job.id, size = %outcome.size, duration = %duration, "Backup complete");

        let event = JobEvent::Completed {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            source: job.source_path.clone(),
            snapshot: outcome.snapshot.to_string(),
            size: outcome.size.clone(),
            duration,
            warnings,
        };
        self.notify(job, &event, global).await;
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn failure(
        &self,
        job: &JobDefinition,
        mut state: JobRunState,
        error: &JobError,
        duration_secs: u64,
        trigger: TriggerKind,
        global: &GlobalConfig,
        finished: &DateTime<Local>,
    ) {
        let finished_at = finished.format(DATE_FORMAT).to_string();

        state.status = RunStatus::Error;
        state.detail = error.to_string();
        state.duration_secs = Some(duration_secs);
        state.last_run_date = Some(finished_at.clone());

        self.write_final(job, &state).await;
        self.append_history(
            job,
            HistoryEntry {
                timestamp: finished_at,
                job_id: job.id.clone(),
                job_name: job.name.clone(),
                status: RunStatus::Error,
                duration: format!("{}s", duration_secs),
                size: "0 B".to_string(),
                trigger,
            },
        )
        .await;

        let event = JobEvent::Failed {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            error: error.to_string(),
        };
        self.notify(job, &event, global).await;
    }

    async fn write_final(&self, job: &JobDefinition, state: &JobRunState) {
        if let Err(e) =
            store::jobs::update_status(self.store.as_ref(), &self.agent_id, &job.id, state).await
        {
            warn!(job_id = %job.id, status = ?state.status, error = %e, "Failed to record final status");
        }
    }

    async fn append_history(&self, job: &JobDefinition, entry: HistoryEntry) {
        if let Err(e) =
            store::jobs::append_history(self.store.as_ref(), &self.agent_id, &entry).await
        {
            warn!(job_id = %job.id, error = %e, "Failed to append history entry");
        }
    }

    async fn notify(&self, job: &JobDefinition, event: &JobEvent, global: &GlobalConfig) {
        let recipients = global.recipients_for(job);
        if recipients.is_empty() {
            warn!(job_id = %job.id, "Email skipped: no recipients configured");
            return;
        }

        let channel = match &self.channel {
            Some(channel) => channel.clone(),
            None => match notifications::create_notifier(&global.notifications) {
                Some(channel) => channel,
                None => return,
            },
        };

        if let Err(e) = channel.notify(event, &recipients).await {
            warn!(job_id = %job.id, error = %e, "Failed to deliver notification");
        }
    }
}
