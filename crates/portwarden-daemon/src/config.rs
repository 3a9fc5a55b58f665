//! Configuration loading and validation

use anyhow::{Context, Result};
use portwarden_core::MacPrefix;
use portwarden_discovery::{
    LivenessProbe, PingProbe, ReconcileSettings, TcpConnectProbe, DEFAULT_EXCLUDED_MODELS,
    DEFAULT_IGNORED_PREFIXES, DEFAULT_INTERFACE_PREFIX, DEFAULT_PROBE_TIMEOUT_MS,
};
use portwarden_routeros::{RouterOsConfig, DEFAULT_TIMEOUT_MS, ROUTEROS_API_PORT};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Environment variable that overrides `[routeros] password`
pub const PASSWORD_ENV: &str = "PORTWARDEN_ROUTEROS_PASSWORD";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub routeros: RouterOsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the HTTP API
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// JSON snapshot of the inventory; in-memory only when unset
    #[serde(default = "default_inventory_path")]
    pub path: Option<String>,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            path: default_inventory_path(),
        }
    }
}

fn default_inventory_path() -> Option<String> {
    Some("./inventory.json".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    Ping,
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_probe_method")]
    pub method: ProbeMethod,
    /// Port used by the `tcp` method
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// Periodic sweep interval in seconds (0 to disable)
    #[serde(default)]
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout(),
            method: default_probe_method(),
            tcp_port: default_tcp_port(),
            interval_secs: 0,
        }
    }
}

fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

fn default_probe_method() -> ProbeMethod {
    ProbeMethod::Ping
}

fn default_tcp_port() -> u16 {
    80
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_interface_prefix")]
    pub interface_prefix: String,
    #[serde(default = "default_ignored_prefixes")]
    pub ignored_prefixes: Vec<String>,
    #[serde(default = "default_excluded_models")]
    pub excluded_models: Vec<String>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interface_prefix: default_interface_prefix(),
            ignored_prefixes: default_ignored_prefixes(),
            excluded_models: default_excluded_models(),
        }
    }
}

fn default_interface_prefix() -> String {
    DEFAULT_INTERFACE_PREFIX.to_string()
}

fn default_ignored_prefixes() -> Vec<String> {
    DEFAULT_IGNORED_PREFIXES.iter().map(|p| p.to_string()).collect()
}

fn default_excluded_models() -> Vec<String> {
    DEFAULT_EXCLUDED_MODELS.iter().map(|m| m.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterOsSection {
    #[serde(default = "default_username")]
    pub username: String,
    /// Prefer the environment variable over storing this in the file
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_timeout")]
    pub timeout_ms: u64,
}

impl Default for RouterOsSection {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: String::new(),
            port: default_api_port(),
            timeout_ms: default_api_timeout(),
        }
    }
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_api_port() -> u16 {
    ROUTEROS_API_PORT
}

fn default_api_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Config {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.sweep.probe_timeout_ms)
    }

    /// Probe selected by `[sweep] method`
    pub fn probe(&self) -> Arc<dyn LivenessProbe> {
        match self.sweep.method {
            ProbeMethod::Ping => Arc::new(PingProbe),
            ProbeMethod::Tcp => Arc::new(TcpConnectProbe::new(self.sweep.tcp_port)),
        }
    }

    pub fn reconcile_settings(&self) -> Result<ReconcileSettings> {
        let ignored_prefixes = self
            .reconcile
            .ignored_prefixes
            .iter()
            .map(|p| {
                p.parse::<MacPrefix>()
                    .with_context(|| format!("invalid entry in reconcile.ignored_prefixes: {p:?}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ReconcileSettings {
            interface_prefix: self.reconcile.interface_prefix.clone(),
            ignored_prefixes,
            excluded_models: self.reconcile.excluded_models.clone(),
        })
    }

    /// RouterOS credentials; the environment password wins over the file
    pub fn routeros_config(&self) -> RouterOsConfig {
        let password = std::env::var(PASSWORD_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.routeros.password.clone());

        let mut config = RouterOsConfig::new(self.routeros.username.clone(), SecretString::from(password));
        config.port = self.routeros.port;
        config.timeout = Duration::from_millis(self.routeros.timeout_ms);
        config
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
