use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use super::{RemoteStore, StoreError};
use crate::core::{GlobalConfig, HistoryEntry, JobDefinition, JobRunState, NotificationSettings};

pub const NOTIFICATION_SETTINGS: &str = "settings/notifications";

pub fn heartbeat_path(agent_id: &str) -> String {
    format!("systems/{}/heartbeat", agent_id)
}

pub fn jobs_path(agent_id: &str) -> String {
    format!("configurations/{}", agent_id)
}

pub fn trigger_path(agent_id: &str) -> String {
    format!("control/{}/trigger_now", agent_id)
}

pub fn run_state_path(agent_id: &str, job_id: &str) -> String {
    format!("runtime_state/{}/{}", agent_id, job_id)
}

pub fn history_path(agent_id: &str) -> String {
    format!("logs/{}", agent_id)
}

/// A pending request to run jobs out of schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    All,
    Job(String),
}

impl Trigger {
    /// `true`, `"*"` and `"ALL"` address every job; any other non-empty
    /// string is a job id, so a job called `all` can still be triggered on
    /// its own. Everything else means no trigger is pending.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(true) => Some(Trigger::All),
            Value::String(s) => match s.trim() {
                "" => None,
                "*" | "ALL" => Some(Trigger::All),
                id => Some(Trigger::Job(id.to_string())),
            },
            _ => None,
        }
    }
}

fn to_fields<T: Serialize>(path: &str, value: &T) -> Result<Map<String, Value>, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Ok(Map::new()),
        Err(source) => Err(StoreError::Decode {
            path: path.to_string(),
            source,
        }),
    }
}

pub async fn write_heartbeat(
    store: &dyn RemoteStore,
    agent_id: &str,
    epoch_secs: i64,
) -> Result<(), StoreError> {
    store
        .set(&heartbeat_path(agent_id), Value::from(epoch_secs))
        .await
}

/// Every well-formed job definition for `agent_id`, ordered by id.
///
/// A definition that fails to decode is logged and left out so one bad entry
/// cannot stop the others from running.
pub async fn list(store: &dyn RemoteStore, agent_id: &str) -> Result<Vec<JobDefinition>, StoreError> {
    let Some(Value::Object(entries)) = store.get(&jobs_path(agent_id)).await? else {
        return Ok(Vec::new());
    };

    let mut jobs: Vec<JobDefinition> = entries
        .into_iter()
        .filter_map(|(id, raw)| match serde_json::from_value::<JobDefinition>(raw) {
            Ok(mut job) => {
                job.id = id;
                Some(job)
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "Skipping malformed job definition");
                None
            }
        })
        .collect();

    jobs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(jobs)
}

pub async fn global_config(store: &dyn RemoteStore) -> Result<GlobalConfig, StoreError> {
    let notifications = match store.get(NOTIFICATION_SETTINGS).await? {
        None => NotificationSettings::default(),
        Some(raw) => serde_json::from_value(raw).unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring malformed notification settings");
            NotificationSettings::default()
        }),
    };
    Ok(GlobalConfig { notifications })
}

pub async fn pending_trigger(
    store: &dyn RemoteStore,
    agent_id: &str,
) -> Result<Option<Trigger>, StoreError> {
    Ok(store
        .get(&trigger_path(agent_id))
        .await?
        .as_ref()
        .and_then(Trigger::from_value))
}

pub async fn clear_trigger(store: &dyn RemoteStore, agent_id: &str) -> Result<(), StoreError> {
    store.set(&trigger_path(agent_id), Value::Null).await
}

/// Write the fields of `state` over the job's stored run state. Per-run fields
/// go out as `null` when unset and are cleared; the last successful size is
/// left out when unset and keeps its stored value.
pub async fn update_status(
    store: &dyn RemoteStore,
    agent_id: &str,
    job_id: &str,
    state: &JobRunState,
) -> Result<(), StoreError> {
    let path = run_state_path(agent_id, job_id);
    let fields = to_fields(&path, state)?;
    store.update(&path, fields).await
}

pub async fn update_progress(
    store: &dyn RemoteStore,
    agent_id: &str,
    job_id: &str,
    bytes: u64,
) -> Result<(), StoreError> {
    let mut fields = Map::new();
    fields.insert("bytes_transferred".to_string(), Value::from(bytes));
    store
        .update(&run_state_path(agent_id, job_id), fields)
        .await
}

pub async fn append_history(
    store: &dyn RemoteStore,
    agent_id: &str,
    entry: &HistoryEntry,
) -> Result<String, StoreError> {
    let path = history_path(agent_id);
    let value = serde_json::to_value(entry).map_err(|source| StoreError::Decode {
        path: path.clone(),
        source,
    })?;
    store.push(&path, value).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunStatus;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn trigger_values() {
        assert_eq!(Trigger::from_value(&json!(true)), Some(Trigger::All));
        assert_eq!(Trigger::from_value(&json!("*")), Some(Trigger::All));
        assert_eq!(Trigger::from_value(&json!("ALL")), Some(Trigger::All));
        assert_eq!(
            Trigger::from_value(&json!("all")),
            Some(Trigger::Job("all".into()))
        );
        assert_eq!(
            Trigger::from_value(&json!("All")),
            Some(Trigger::Job("All".into()))
        );
        assert_eq!(
            Trigger::from_value(&json!(" nightly ")),
            Some(Trigger::Job("nightly".into()))
        );
        assert_eq!(Trigger::from_value(&json!(false)), None);
        assert_eq!(Trigger::from_value(&json!("")), None);
        assert_eq!(Trigger::from_value(&json!(3)), None);
    }

    #[tokio::test]
    async fn lists_jobs_and_skips_malformed_ones() {
        let store = MemoryStore::from_value(json!({
            "configurations": { "agent-1": {
                "b-job": {
                    "name": "B", "source_path": "/b", "remote_root": "R",
                    "schedule": { "type": "daily", "time": "02:00" }
                },
                "a-job": {
                    "name": "A", "source_path": "/a", "remote_root": "R",
                    "schedule": { "type": "monthly", "day": 1, "time": "03:00" }
                },
                "broken": { "name": "no schedule" }
            }}
        }));

        let jobs = list(&store, "agent-1").await.unwrap();
        let ids: Vec<_> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["a-job", "b-job"]);

        assert!(list(&store, "other-agent").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_run_keeps_last_success_size() {
        let store = MemoryStore::new();
        let mut state = JobRunState {
            status: RunStatus::Success,
            detail: "ok".into(),
            started_at: 1,
            bytes_transferred: 10,
            duration_secs: Some(3),
            last_success_size: Some("10.00 B".into()),
            last_run_date: Some("2025-01-01 00:00".into()),
        };
        update_status(&store, "a", "j", &state).await.unwrap();

        state.status = RunStatus::Error;
        state.detail = "boom".into();
        state.last_success_size = None;
        update_status(&store, "a", "j", &state).await.unwrap();

        let stored = store.get(&run_state_path("a", "j")).await.unwrap().unwrap();
        assert_eq!(stored["status"], json!("Error"));
        assert_eq!(stored["last_success_size"], json!("10.00 B"));
    }

    #[tokio::test]
    async fn new_run_clears_previous_duration_and_date() {
        let store = MemoryStore::new();
        let finished = JobRunState {
            status: RunStatus::Success,
            detail: "ok".into(),
            started_at: 1,
            bytes_transferred: 10,
            duration_secs: Some(42),
            last_success_size: Some("10.00 B".into()),
            last_run_date: Some("2025-01-01 00:00".into()),
        };
        update_status(&store, "a", "j", &finished).await.unwrap();

        let next = JobRunState {
            status: RunStatus::Running,
            detail: "Syncing & calculating delta...".into(),
            started_at: 2,
            bytes_transferred: 0,
            duration_secs: None,
            last_success_size: None,
            last_run_date: None,
        };
        update_status(&store, "a", "j", &next).await.unwrap();

        let stored = store.get(&run_state_path("a", "j")).await.unwrap().unwrap();
        assert_eq!(stored["status"], json!("Running"));
        assert!(stored.get("duration_secs").is_none());
        assert!(stored.get("last_run_date").is_none());
        assert_eq!(stored["last_success_size"], json!("10.00 B"));
    }

    #[tokio::test]
    async fn trigger_round_trip() {
        let store = MemoryStore::from_value(json!({"control": {"agent-1": {"trigger_now": "job-x"}}}));
        assert_eq!(
            pending_trigger(&store, "agent-1").await.unwrap(),
            Some(Trigger::Job("job-x".into()))
        );
        clear_trigger(&store, "agent-1").await.unwrap();
        assert_eq!(pending_trigger(&store, "agent-1").await.unwrap(), None);
    }
}
