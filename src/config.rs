use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::transfer_engine::TransferEngineType;
use crate::store::StoreBackend;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/skyvault/config.toml";
pub const ENV_PREFIX: &str = "SKYVAULT_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Key this agent's jobs, triggers and state live under in the store.
    pub agent_id: String,
    pub store_backend: StoreBackend,
    pub store_url: Option<String>,
    pub store_auth: Option<String>,
    /// JSON document loaded into the memory backend at startup.
    pub store_seed: Option<PathBuf>,
    pub transfer_engine: TransferEngineType,
    pub rclone_binary: PathBuf,
    pub rclone_config: Option<PathBuf>,
    /// rclone remote used by jobs that do not name one.
    pub default_remote: String,
    pub transfers: u32,
    pub stats_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub error_backoff_secs: u64,
    /// Minimum gap between live progress writes to the store.
    pub progress_interval_secs: u64,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            store_backend: StoreBackend::Firebase,
            store_url: None,
            store_auth: None,
            store_seed: None,
            transfer_engine: TransferEngineType::Rclone,
            rclone_binary: PathBuf::from("rclone"),
            rclone_config: None,
            default_remote: "gdrive".to_string(),
            transfers: 8,
            stats_interval_secs: 1,
            poll_interval_secs: 5,
            error_backoff_secs: 10,
            progress_interval_secs: 5,
            verbose: false,
            json_logs: false,
        }
    }
}

fn default_agent_id() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "default-agent".to_string())
}

impl AppConfig {
    /// Layer defaults, the TOML file, `SKYVAULT_*` variables and finally
    /// `overrides` (usually CLI flags, with unset flags skipped).
    ///
    /// An explicitly named file must exist; the default path may be absent.
    pub fn load<T: Serialize>(file: Option<&Path>, overrides: Option<&T>) -> Result<Self> {
        let path = match file {
            Some(path) if !path.exists() => {
                bail!("Config file not found: {}", path.display())
            }
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_PATH),
        };

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed(ENV_PREFIX));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment
            .extract()
            .with_context(|| format!("Invalid configuration (file: {})", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent_id.trim().is_empty() {
            bail!("agent_id must not be empty");
        }
        if self.agent_id.contains('/') {
            bail!("agent_id must not contain '/'");
        }
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be at least 1");
        }
        if self.stats_interval_secs == 0 {
            bail!("stats_interval_secs must be at least 1");
        }
        if self.transfers == 0 {
            bail!("transfers must be at least 1");
        }
        if self.default_remote.trim().is_empty() {
            bail!("default_remote must not be empty");
        }
        Ok(())
    }

    /// Copy safe to print: credentials are masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.store_auth.is_some() {
            copy.store_auth = Some("********".to_string());
        }
        copy
    }
}
