//! The agent's polling loop.
//!
//! Every few seconds the scheduler publishes a heartbeat, reads this agent's
//! configuration, acts on any manual trigger and, once per wall-clock minute,
//! runs the jobs whose schedule matches. Jobs run one after another on the
//! loop's own task.

use chrono::{DateTime, Datelike, Local};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::AgentContext;
use crate::core::executor::{JobError, JobExecutor};
use crate::core::models::{GlobalConfig, JobDefinition, ScheduleRule, TriggerKind};
use crate::store::jobs::Trigger;
use crate::store::{self, StoreError};

#[derive(Debug, Error)]
pub enum IterationError {
    #[error("failed to read configuration: {0}")]
    Config(#[source] StoreError),

    #[error("failed to acknowledge manual trigger: {0}")]
    Trigger(#[source] StoreError),
}

/// What one iteration dispatched.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub manual: Vec<String>,
    pub scheduled: Vec<String>,
}

/// Whether `rule` fires during the minute containing `now`.
pub fn check_schedule(rule: &ScheduleRule, now: &DateTime<Local>) -> bool {
    match rule {
        ScheduleRule::Daily { time } => time.matches(now),
        ScheduleRule::Monthly { day, time } => now.day() == *day && time.matches(now),
    }
}

/// Identifies a wall-clock minute; two instants share a stamp iff they fall
/// in the same minute.
pub fn minute_stamp(now: &DateTime<Local>) -> String {
    now.format("%Y-%m-%d %H:%M").to_string()
}

pub struct Scheduler {
    ctx: AgentContext,
    executor: JobExecutor,
    last_minute: Option<String>,
}

impl Scheduler {
    pub fn new(ctx: AgentContext) -> Self {
        let executor = JobExecutor::new(&ctx);
        Self {
            ctx,
            executor,
            last_minute: None,
        }
    }

    /// Poll until `shutdown` is cancelled. A job that is already running is
    /// always allowed to finish; cancellation only stops new dispatches.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let poll = Duration::from_secs(self.ctx.config.poll_interval_secs);
        let backoff = Duration::from_secs(self.ctx.config.error_backoff_secs);

        info!(agent_id = %self.ctx.agent_id, "Agent active, waiting for commands");

        while !shutdown.is_cancelled() {
            let delay = match self.tick(Local::now()).await {
                Ok(_) => poll,
                Err(e) => {
                    error!(error = %e, "Connection glitch, backing off");
                    backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        info!("Agent stopping");
    }

    /// One polling iteration, evaluated at `now`.
    pub async fn tick(&mut self, now: DateTime<Local>) -> Result<Dispatched, IterationError> {
        let store = self.ctx.store.as_ref();
        let agent_id = self.ctx.agent_id.as_str();
        let mut dispatched = Dispatched::default();

        if let Err(e) = store::jobs::write_heartbeat(store, agent_id, now.timestamp()).await {
            warn!(error = %e, "Failed to publish heartbeat");
        }

        let global = store::jobs::global_config(store)
            .await
            .map_err(IterationError::Config)?;
        let jobs = store::jobs::list(store, agent_id)
            .await
            .map_err(IterationError::Config)?;

        if let Some(trigger) = store::jobs::pending_trigger(store, agent_id)
            .await
            .map_err(IterationError::Config)?
        {
            // Acknowledge first so a retried read cannot start the job twice.
            store::jobs::clear_trigger(store, agent_id)
                .await
                .map_err(IterationError::Trigger)?;

            info!(?trigger, "Manual trigger received");
            for job in select_triggered(&jobs, &trigger) {
                self.dispatch(job, TriggerKind::Manual, &global).await;
                dispatched.manual.push(job.id.clone());
            }
        }

        let stamp = minute_stamp(&now);
        if self.last_minute.as_deref() != Some(stamp.as_str()) {
            self.last_minute = Some(stamp);
            for job in jobs.iter().filter(|j| check_schedule(&j.schedule, &now)) {
                self.dispatch(job, TriggerKind::Scheduled, &global).await;
                dispatched.scheduled.push(job.id.clone());
            }
        }

        Ok(dispatched)
    }

    async fn dispatch(&self, job: &JobDefinition, trigger: TriggerKind, global: &GlobalConfig) {
        match self.executor.execute(job, trigger, global).await {
            Ok(outcome) => debug!(job_id = %job.id, size = %outcome.size, "Job finished"),
            Err(JobError::SourceNotFound(path)) => {
                warn!(job_id = %job.id, path = %path.display(), "Job skipped: source missing")
            }
            Err(JobError::Config(reason)) => {
                warn!(job_id = %job.id, %reason, "Job skipped: invalid configuration")
            }
            Err(e @ (JobError::Sync(_) | JobError::Snapshot(_))) => {
                error!(job_id = %job.id, error = %e, "Job failed")
            }
        }
    }
}

fn select_triggered<'a>(jobs: &'a [JobDefinition], trigger: &Trigger) -> Vec<&'a JobDefinition> {
    match trigger {
        Trigger::All => jobs.iter().collect(),
        Trigger::Job(id) => {
            let found: Vec<_> = jobs.iter().filter(|j| &j.id == id).collect();
            if found.is_empty() {
                warn!(job_id = %id, "Manual trigger names an unknown job");
            }
            found
        }
    }
}
