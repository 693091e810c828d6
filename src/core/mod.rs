pub mod executor;
pub mod models;
pub mod notifications;
pub mod reporting;
pub mod retention;
pub mod scheduler;
pub mod size;
pub mod telemetry;
pub mod transfer_engine;

pub use executor::{JobError, JobExecutor, RetentionOutcome, RunOutcome};
pub use models::{
    GlobalConfig, HistoryEntry, JobDefinition, JobRunState, NotificationSettings, RunStatus,
    ScheduleRule, TimeOfDay, TriggerKind,
};
pub use reporting::ReportingSink;
pub use scheduler::{Scheduler, check_schedule};
pub use telemetry::TelemetryParser;
