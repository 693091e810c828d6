use crate::core::transfer_engine::{
    RemotePath, SyncRequest, TransferEngine, TransferError, TransferResult,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};

/// An engine operation as seen by the simulated engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Sync { source: PathBuf, destination: String },
    Copy { from: String, to: String },
    List { path: String },
    Purge { path: String },
}

/// In-process stand-in for rclone.
///
/// Keeps a directory tree of remote paths so snapshots created by
/// `copy_server_side` show up in later listings and purges remove them.
/// Failures can be injected per operation.
#[derive(Default)]
pub struct SimulatedEngine {
    progress: Vec<u64>,
    step_delay: Duration,
    fail_sync: Option<String>,
    fail_copy: Option<String>,
    fail_list: Option<String>,
    fail_purge: HashSet<String>,
    tree: Mutex<HashMap<String, BTreeSet<String>>>,
    calls: Mutex<Vec<EngineCall>>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// A slow 500 MB transfer for dry runs of the daemon.
    pub fn demo() -> Self {
        let total: u64 = 500 * 1024 * 1024;
        let steps = 10;
        Self {
            progress: (1..=steps).map(|i| total * i / steps).collect(),
            step_delay: Duration::from_millis(500),
            ..Self::default()
        }
    }

    /// Cumulative byte counts reported during `sync`, in order.
    pub fn with_progress(mut self, progress: Vec<u64>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_directories(self, path: &RemotePath, names: &[&str]) -> Self {
        {
            let mut tree = self.tree.lock().unwrap();
            let entry = tree.entry(path.to_string()).or_default();
            entry.extend(names.iter().map(|n| n.to_string()));
        }
        self
    }

    pub fn failing_sync(mut self, message: &str) -> Self {
        self.fail_sync = Some(message.to_string());
        self
    }

    pub fn failing_copy(mut self, message: &str) -> Self {
        self.fail_copy = Some(message.to_string());
        self
    }

    pub fn failing_list(mut self, message: &str) -> Self {
        self.fail_list = Some(message.to_string());
        self
    }

    /// Make `purge` fail for any path ending in `name`.
    pub fn failing_purge(mut self, name: &str) -> Self {
        self.fail_purge.insert(name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn failed(operation: &'static str, message: &str) -> TransferError {
        TransferError::Failed {
            operation,
            status: "exit status: 1".to_string(),
            message: message.to_string(),
        }
    }

    /// Register `path` as a child directory of its parent.
    fn create_dir(&self, path: &RemotePath) {
        if let Some((parent, name)) = path.path.trim_end_matches('/').rsplit_once('/') {
            let parent = RemotePath::new(path.remote.clone(), parent);
            self.tree
                .lock()
                .unwrap()
                .entry(parent.to_string())
                .or_default()
                .insert(name.to_string());
        }
    }
}

#[async_trait]
impl TransferEngine for SimulatedEngine {
    async fn sync(
        &self,
        req: &SyncRequest,
        progress: mpsc::Sender<u64>,
    ) -> Result<TransferResult, TransferError> {
        self.record(EngineCall::Sync {
            source: req.source.clone(),
            destination: req.destination.to_string(),
        });

        let mut bytes = 0;
        for &step in &self.progress {
            if !self.step_delay.is_zero() {
                sleep(self.step_delay).await;
            }
            bytes = step;
            let _ = progress.send(step).await;
        }

        if let Some(message) = &self.fail_sync {
            return Err(Self::failed("sync", message));
        }

        self.create_dir(&req.destination);
        Ok(TransferResult {
            bytes_transferred: bytes,
        })
    }

    async fn copy_server_side(
        &self,
        from: &RemotePath,
        to: &RemotePath,
    ) -> Result<(), TransferError> {
        self.record(EngineCall::Copy {
            from: from.to_string(),
            to: to.to_string(),
        });

        if let Some(message) = &self.fail_copy {
            return Err(Self::failed("copy", message));
        }

        self.create_dir(to);
        Ok(())
    }

    async fn list_directories(&self, path: &RemotePath) -> Result<Vec<String>, TransferError> {
        self.record(EngineCall::List {
            path: path.to_string(),
        });

        if let Some(message) = &self.fail_list {
            return Err(Self::failed("list", message));
        }

        let tree = self.tree.lock().unwrap();
        Ok(tree
            .get(&path.to_string())
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn purge(&self, path: &RemotePath) -> Result<(), TransferError> {
        self.record(EngineCall::Purge {
            path: path.to_string(),
        });

        if self.fail_purge.iter().any(|name| path.path.ends_with(name.as_str())) {
            return Err(Self::failed("purge", "permission denied"));
        }

        if let Some((parent, name)) = path.path.rsplit_once('/') {
            let parent = RemotePath::new(path.remote.clone(), parent);
            if let Some(children) = self.tree.lock().unwrap().get_mut(&parent.to_string()) {
                children.remove(name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_become_visible_in_listings() {
        let root = RemotePath::new("sim", "Backups");
        let engine = SimulatedEngine::new().with_directories(&root, &["Backup_2020-01-01_00-00"]);

        engine
            .copy_server_side(&root.join("Current_Mirror"), &root.join("Backup_2025-02-02_10-00"))
            .await
            .unwrap();
        engine.purge(&root.join("Backup_2020-01-01_00-00")).await.unwrap();

        let listing = engine.list_directories(&root).await.unwrap();
        assert_eq!(listing, vec!["Backup_2025-02-02_10-00".to_string()]);
        assert_eq!(engine.calls().len(), 3);
    }

    #[tokio::test]
    async fn sync_reports_progress_then_fails_when_told() {
        let engine = SimulatedEngine::new()
            .with_progress(vec![10, 20])
            .failing_sync("quota exceeded");
        let (tx, mut rx) = mpsc::channel(4);
        let req = SyncRequest {
            job_id: "j".into(),
            source: PathBuf::from("/src"),
            destination: RemotePath::new("sim", "root/Current_Mirror"),
        };

        let err = engine.sync(&req, tx).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(rx.recv().await, Some(10));
        assert_eq!(rx.recv().await, Some(20));
    }
}
