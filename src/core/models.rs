use chrono::{DateTime, Local, NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Name of the continuously overwritten copy of a job's source.
pub const MIRROR_DIR: &str = "Current_Mirror";

/// Prefix of every point-in-time snapshot directory.
pub const SNAPSHOT_PREFIX: &str = "Backup_";

/// Minute-granularity stamp appended to snapshot names.
pub const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M";

fn default_retention_days() -> u32 {
    60
}

/// A backup job as stored in the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDefinition {
    /// Filled from the key the definition is stored under.
    #[serde(skip)]
    pub id: String,
    pub name: String,
    pub source_path: PathBuf,
    pub remote_root: String,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// rclone remote name; the agent's default remote is used when absent.
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default, deserialize_with = "recipients")]
    pub email_recipients: Option<Vec<String>>,
    pub schedule: ScheduleRule,
}

impl JobDefinition {
    /// Remote path (without the `remote:` prefix) that holds the mirror and
    /// every snapshot of this job.
    pub fn backup_root(&self) -> String {
        let root = self.remote_root.trim_end_matches('/');
        match self.destination.as_deref().map(|d| d.trim_matches('/')) {
            Some(dest) if !dest.is_empty() => format!("{}/{}", root, dest),
            _ => root.to_string(),
        }
    }

    pub fn snapshot_path(&self, at: &DateTime<Local>) -> String {
        format!(
            "{}/{}{}",
            self.backup_root(),
            SNAPSHOT_PREFIX,
            at.format(SNAPSHOT_TIMESTAMP_FORMAT)
        )
    }
}

/// Accepts either a JSON array of addresses or a comma-separated string.
fn recipients<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Csv(String),
    }

    let list = match Option::<Raw>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(Raw::List(list)) => list,
        Some(Raw::Csv(csv)) => csv.split(',').map(str::to_string).collect(),
    };

    let cleaned: Vec<String> = list
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    Ok(if cleaned.is_empty() { None } else { Some(cleaned) })
}

/// Time of day in `HH:MM`, 24 hour clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn parse(s: &str) -> Option<Self> {
        let t = NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()?;
        Some(Self {
            hour: t.hour(),
            minute: t.minute(),
        })
    }

    pub fn matches(&self, now: &DateTime<Local>) -> bool {
        now.hour() == self.hour && now.minute() == self.minute
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TimeOfDay::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {:?}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScheduleRule {
    Daily { time: TimeOfDay },
    Monthly {
        #[serde(deserialize_with = "day_of_month")]
        day: u32,
        time: TimeOfDay,
    },
}

fn day_of_month<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let day = u32::deserialize(deserializer)?;
    if (1..=31).contains(&day) {
        Ok(day)
    } else {
        Err(serde::de::Error::custom(format!(
            "day of month out of range: {}",
            day
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Idle,
    Running,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    Scheduled,
    Manual,
}

/// Mutable record of one execution, owned by the executor while it runs.
///
/// Written as a field merge. Per-run fields serialize as `null` when unset so
/// a new run clears what the previous one left behind; `last_success_size`
/// is omitted instead and survives failed runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRunState {
    pub status: RunStatus,
    pub detail: String,
    pub started_at: i64,
    pub bytes_transferred: u64,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_size: Option<String>,
    #[serde(default)]
    pub last_run_date: Option<String>,
}

impl JobRunState {
    pub fn started(at: &DateTime<Local>) -> Self {
        Self {
            status: RunStatus::Running,
            detail: "Syncing & calculating delta...".to_string(),
            started_at: at.timestamp(),
            bytes_transferred: 0,
            duration_secs: None,
            last_success_size: None,
            last_run_date: None,
        }
    }

    /// Record a live byte count. Never moves the counter backwards while the
    /// run is in progress.
    pub fn record_bytes(&mut self, bytes: u64) -> bool {
        if self.status == RunStatus::Running && bytes > self.bytes_transferred {
            self.bytes_transferred = bytes;
            true
        } else {
            false
        }
    }
}

/// One immutable line of the job history log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub job_id: String,
    pub job_name: String,
    pub status: RunStatus,
    pub duration: String,
    pub size: String,
    #[serde(rename = "type")]
    pub trigger: TriggerKind,
}

/// SMTP settings shared by every job of the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NotificationSettings {
    #[serde(default)]
    pub smtp_server: Option<String>,
    #[serde(default)]
    pub smtp_port: Option<u16>,
    #[serde(default)]
    pub sender_email: Option<String>,
    #[serde(default)]
    pub sender_password: Option<String>,
    #[serde(default, deserialize_with = "recipients")]
    pub default_recipients: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalConfig {
    pub notifications: NotificationSettings,
}

impl GlobalConfig {
    /// Recipients for `job`, falling back to the global default list.
    pub fn recipients_for(&self, job: &JobDefinition) -> Vec<String> {
        job.email_recipients
            .clone()
            .or_else(|| self.notifications.default_recipients.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn job(value: serde_json::Value) -> JobDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_daily_job_with_defaults() {
        let j = job(json!({
            "name": "Tally",
            "source_path": "/data",
            "remote_root": "Backups",
            "schedule": { "type": "daily", "time": "21:00" }
        }));

        assert_eq!(j.retention_days, 60);
        assert_eq!(j.email_recipients, None);
        assert_eq!(
            j.schedule,
            ScheduleRule::Daily {
                time: TimeOfDay { hour: 21, minute: 0 }
            }
        );
    }

    #[test]
    fn recipients_accept_csv_and_lists() {
        let csv = job(json!({
            "name": "a", "source_path": "/a", "remote_root": "r",
            "email_recipients": " ops@example.com, ,boss@example.com ",
            "schedule": { "type": "daily", "time": "01:00" }
        }));
        assert_eq!(
            csv.email_recipients,
            Some(vec!["ops@example.com".to_string(), "boss@example.com".to_string()])
        );

        let empty = job(json!({
            "name": "a", "source_path": "/a", "remote_root": "r",
            "email_recipients": [],
            "schedule": { "type": "daily", "time": "01:00" }
        }));
        assert_eq!(empty.email_recipients, None);
    }

    #[test]
    fn rejects_bad_schedules() {
        let bad_time = json!({
            "name": "a", "source_path": "/a", "remote_root": "r",
            "schedule": { "type": "daily", "time": "25:00" }
        });
        assert!(serde_json::from_value::<JobDefinition>(bad_time).is_err());

        let bad_day = json!({
            "name": "a", "source_path": "/a", "remote_root": "r",
            "schedule": { "type": "monthly", "day": 32, "time": "09:00" }
        });
        assert!(serde_json::from_value::<JobDefinition>(bad_day).is_err());
    }

    #[test]
    fn paths_are_built_under_backup_root() {
        let mut j = job(json!({
            "name": "a", "source_path": "/a", "remote_root": "Backups/",
            "destination": "/office/",
            "schedule": { "type": "daily", "time": "01:00" }
        }));
        assert_eq!(j.backup_root(), "Backups/office");
        assert_eq!(
            j.snapshot_path(&at(2025, 12, 22, 9, 5)),
            "Backups/office/Backup_2025-12-22_09-05"
        );

        j.destination = Some(String::new());
        assert_eq!(j.backup_root(), "Backups");
    }

    #[test]
    fn run_state_bytes_never_decrease_while_running() {
        let mut state = JobRunState::started(&at(2025, 1, 1, 0, 0));
        assert!(state.record_bytes(500));
        assert!(!state.record_bytes(200));
        assert_eq!(state.bytes_transferred, 500);

        state.status = RunStatus::Success;
        assert!(!state.record_bytes(900));
    }

    #[test]
    fn started_state_clears_per_run_fields() {
        let value = serde_json::to_value(JobRunState::started(&at(2025, 1, 1, 0, 0))).unwrap();
        let fields = value.as_object().unwrap();
        assert_eq!(fields["duration_secs"], serde_json::Value::Null);
        assert_eq!(fields["last_run_date"], serde_json::Value::Null);
        assert!(!fields.contains_key("last_success_size"));
    }

    #[test]
    fn recipients_fall_back_to_global_default() {
        let j = job(json!({
            "name": "a", "source_path": "/a", "remote_root": "r",
            "schedule": { "type": "daily", "time": "01:00" }
        }));
        let global = GlobalConfig {
            notifications: NotificationSettings {
                default_recipients: Some(vec!["it@example.com".into()]),
                ..Default::default()
            },
        };
        assert_eq!(global.recipients_for(&j), vec!["it@example.com".to_string()]);
    }
}
