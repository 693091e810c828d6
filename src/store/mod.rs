//! Access to the remote control plane.
//!
//! The control plane is a JSON document tree addressed by slash-separated
//! paths, in the style of the Firebase Realtime Database. `jobs` maps the
//! agent's view of that tree (job definitions, triggers, run state, history)
//! onto typed values.

mod firebase;
pub mod jobs;
mod memory;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} answered with HTTP {status}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("unexpected data at {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("store is unreachable")]
    Unavailable,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Value at `path`, or `None` when nothing is stored there.
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the value at `path`. Writing `null` deletes it.
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Merge `fields` into the object at `path`, leaving other fields alone.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Append `value` under a new generated key and return that key.
    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Firebase,
    Memory,
}

pub fn connect(config: &AppConfig) -> Result<Arc<dyn RemoteStore>> {
    match config.store_backend {
        StoreBackend::Firebase => {
            let url = config
                .store_url
                .as_deref()
                .context("store_url is required for the firebase backend")?;
            let store = FirebaseStore::new(url, config.store_auth.clone())
                .context("Failed to build HTTP client")?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            let store = match &config.store_seed {
                Some(path) => MemoryStore::load(path)
                    .with_context(|| format!("Failed to load store seed {}", path.display()))?,
                None => MemoryStore::new(),
            };
            Ok(Arc::new(store))
        }
    }
}
