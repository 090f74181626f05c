//! Daemon configuration
//!
//! Layered with figment: compiled defaults, then an optional TOML file,
//! then `WORLDD_*` environment variables (nested keys split on `__`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::lua::SandboxConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// None = in-memory database
    pub db_path: Option<String>,
    /// Client data root holding the template table, snapshots and buildout
    pub data_dir: Option<PathBuf>,
    /// None = no behavior scripts
    pub scripts_dir: Option<PathBuf>,
    /// Active planets; a planet's id is its position plus one
    pub planets: Vec<String>,
    pub scheduler_tick_ms: u64,
    pub disconnect_linger_secs: u64,
    pub log_format: LogFormat,
    pub sandbox: SandboxConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            db_path: None,
            data_dir: None,
            scripts_dir: None,
            planets: Vec::new(),
            scheduler_tick_ms: 100,
            disconnect_linger_secs: 180,
            log_format: LogFormat::Pretty,
            sandbox: SandboxConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("WORLDD_").split("__"));
        Ok(figment.extract()?)
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_ms.max(1))
    }

    pub fn disconnect_linger(&self) -> Duration {
        Duration::from_secs(self.disconnect_linger_secs)
    }
}
