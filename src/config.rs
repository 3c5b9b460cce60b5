use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub chime: ChimeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Deserialize)]
pub struct ChimeConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_version() -> u32 {
    1
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_db_path() -> String {
    "chime.db".to_string()
}
fn default_min_connections() -> u32 {
    5
}
fn default_max_connections() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_url")]
    pub url: String,
    #[serde(default = "default_bus_pool_size")]
    pub pool_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: default_bus_url(),
            pool_size: default_bus_pool_size(),
        }
    }
}

fn default_bus_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_bus_pool_size() -> usize {
    5
}

/// Notifier delivery mode and (when `mode = "smtp"`) its SMTP settings.
#[derive(Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_notifier_mode")]
    pub mode: String,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_smtp_tls")]
    pub smtp_tls: bool,
    #[serde(default = "default_smtp_pool_size")]
    pub smtp_pool_size: usize,
}

impl std::fmt::Debug for NotifierConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierConfig")
            .field("mode", &self.mode)
            .field("from_address", &self.from_address)
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &self.smtp_password.as_ref().map(|_| "[REDACTED]"))
            .field("smtp_tls", &self.smtp_tls)
            .field("smtp_pool_size", &self.smtp_pool_size)
            .finish()
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            mode: default_notifier_mode(),
            from_address: default_from_address(),
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            smtp_tls: default_smtp_tls(),
            smtp_pool_size: default_smtp_pool_size(),
        }
    }
}

fn default_notifier_mode() -> String {
    "simulation".to_string()
}
fn default_from_address() -> String {
    "alarms@localhost".to_string()
}
fn default_smtp_host() -> String {
    "localhost".to_string()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_smtp_tls() -> bool {
    true
}
fn default_smtp_pool_size() -> usize {
    5
}

impl Config {
    /// Resolve the database path (relative to data_dir if not absolute).
    pub fn db_path(&self) -> PathBuf {
        let db_path = Path::new(&self.store.path);
        if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            self.chime.data_dir.join(db_path)
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(ConfigError::ReadFile)
        .context("reading config file")?;
    let config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.chime.version != 1 {
        return Err(ConfigError::Validation(format!(
            "unsupported config version {} (this binary supports version 1)",
            config.chime.version
        ))
        .into());
    }

    config
        .chime
        .default_timezone
        .parse::<chrono_tz::Tz>()
        .map_err(|_| ConfigError::Validation(format!("unknown timezone '{}'", config.chime.default_timezone)))?;

    config
        .chime
        .listen
        .parse::<std::net::SocketAddr>()
        .map_err(|e| ConfigError::Validation(format!("invalid listen address '{}': {e}", config.chime.listen)))?;

    if config.store.min_connections == 0 {
        return Err(ConfigError::Validation("store.min_connections must be at least 1".to_string()).into());
    }
    if config.store.max_connections < config.store.min_connections {
        return Err(ConfigError::Validation(
            "store.max_connections must be >= store.min_connections".to_string(),
        )
        .into());
    }

    match config.notifier.mode.as_str() {
        "simulation" => {}
        "smtp" => {
            if config.notifier.smtp_host.is_empty() {
                return Err(ConfigError::Validation("notifier.smtp_host is required in smtp mode".to_string()).into());
            }
            if config.notifier.smtp_username.is_some() != config.notifier.smtp_password.is_some() {
                return Err(ConfigError::Validation(
                    "notifier.smtp_username and smtp_password must be set together".to_string(),
                )
                .into());
            }
        }
        other => {
            return Err(ConfigError::Validation(format!(
                "unknown notifier mode '{other}' (expected 'simulation' or 'smtp')"
            ))
            .into());
        }
    }

    Ok(())
}
