//! Abstraction over the external file-transfer engine.
//!
//! The agent never moves bytes itself. It asks an engine to mirror a local
//! folder to a remote, to copy server-side between two remote paths, and to
//! list or purge remote directories.

mod rclone;
mod simulated;

pub use rclone::RcloneEngine;
pub use simulated::{EngineCall, SimulatedEngine};

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransferEngineType {
    Rclone,
    Simulated,
}

/// A path on a configured rclone remote, rendered as `remote:path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemotePath {
    pub remote: String,
    pub path: String,
}

impl RemotePath {
    pub fn new(remote: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            path: path.into(),
        }
    }

    pub fn join(&self, child: &str) -> Self {
        let base = self.path.trim_end_matches('/');
        let path = if base.is_empty() {
            child.to_string()
        } else {
            format!("{}/{}", base, child)
        };
        Self::new(self.remote.clone(), path)
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.remote, self.path)
    }
}

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub job_id: String,
    pub source: PathBuf,
    pub destination: RemotePath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferResult {
    /// Final cumulative byte count reported by the engine.
    pub bytes_transferred: u64,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} failed to complete: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} exited with {status}: {message}")]
    Failed {
        operation: &'static str,
        status: String,
        message: String,
    },

    #[error("telemetry reader stopped unexpectedly: {0}")]
    Reader(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Mirror `req.source` onto `req.destination`, deleting remote files that
    /// no longer exist locally. Every new cumulative byte count is sent on
    /// `progress` while the transfer runs.
    async fn sync(
        &self,
        req: &SyncRequest,
        progress: mpsc::Sender<u64>,
    ) -> Result<TransferResult, TransferError>;

    /// Copy `from` to `to` without routing the data through this host.
    async fn copy_server_side(&self, from: &RemotePath, to: &RemotePath)
    -> Result<(), TransferError>;

    /// Names of the immediate child directories of `path`.
    async fn list_directories(&self, path: &RemotePath) -> Result<Vec<String>, TransferError>;

    /// Recursively and irreversibly delete `path`.
    async fn purge(&self, path: &RemotePath) -> Result<(), TransferError>;
}

pub fn create_engine(config: &AppConfig) -> Arc<dyn TransferEngine> {
    match config.transfer_engine {
        TransferEngineType::Rclone => Arc::new(RcloneEngine::from_config(config)),
        TransferEngineType::Simulated => Arc::new(SimulatedEngine::demo()),
    }
}
