use crate::config::AppConfig;
use crate::core::notifications::NotificationChannel;
use crate::core::transfer_engine::{self, TransferEngine};
use crate::store::{self, RemoteStore};
use anyhow::Result;
use std::sync::Arc;

/// Everything a polling iteration needs, built once at startup.
#[derive(Clone)]
pub struct AgentContext {
    pub agent_id: String,
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn RemoteStore>,
    pub engine: Arc<dyn TransferEngine>,
    /// Overrides the email channel built from the store's settings.
    pub notifier: Option<Arc<dyn NotificationChannel>>,
}

impl AgentContext {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn RemoteStore>,
        engine: Arc<dyn TransferEngine>,
    ) -> Self {
        Self {
            agent_id: config.agent_id.clone(),
            config: Arc::new(config),
            store,
            engine,
            notifier: None,
        }
    }

    /// Wire up the store and engine selected by `config`.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let store = store::connect(&config)?;
        let engine = transfer_engine::create_engine(&config);
        Ok(Self::new(config, store, engine))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationChannel>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}
