/*
[INPUT]:  Built-in defaults, optional TOML file, AUTOFARM_* environment variables
[OUTPUT]: Parsed application configuration (update source, dispatcher timing)
[POS]:    Configuration layer - process-wide knobs, separate from task settings
[UPDATE]: When adding new application configuration options
*/

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use autofarm_updater::{DEFAULT_API_BASE_URL, ReleaseSource};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "AUTOFARM";

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub update: UpdateConfig,
    pub dispatcher: DispatcherSettings,
}

/// Where and how often to look for new releases
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Disables both the periodic and the startup check
    pub enabled: bool,
    pub owner: String,
    pub repo: String,
    pub api_base_url: String,
    /// Substring the release asset name must contain
    pub asset_pattern: Option<String>,
    pub check_interval_secs: u64,
    /// Defaults to `<cache_dir>/autofarm/updates`
    pub download_dir: Option<PathBuf>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            owner: "arnold2957".to_string(),
            repo: "wvd".to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            asset_pattern: None,
            check_interval_secs: 3600,
            download_dir: None,
        }
    }
}

impl UpdateConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn release_source(&self) -> ReleaseSource {
        ReleaseSource {
            api_base_url: self.api_base_url.clone(),
            asset_pattern: self.asset_pattern.clone(),
            ..ReleaseSource::new(&self.owner, &self.repo)
        }
    }

    pub fn resolved_download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("autofarm")
                .join("updates")
        })
    }
}

/// Dispatcher loop timing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub poll_interval_ms: u64,
    /// How long a shutdown waits for the worker to reach a checkpoint
    pub shutdown_drain_secs: u64,
    /// Notifications kept for the UI history pane
    pub notice_history: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            shutdown_drain_secs: 10,
            notice_history: 50,
        }
    }
}

impl AppConfig {
    /// `<config_dir>/autofarm/autofarm.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("autofarm").join("autofarm.toml"))
    }

    /// Layers defaults, the TOML file at `path` (if it exists) and the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("build app config")?;

        config.try_deserialize().context("parse app config")
    }
}
