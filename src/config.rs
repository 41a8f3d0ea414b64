use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write config file at {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What happened to the config file while loading it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigBootstrap {
    /// The file existed and already had every key.
    Unchanged,
    /// The file did not exist and was written with defaults.
    Created,
    /// The file existed but missing keys were filled in with defaults.
    Completed,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default)]
    pub web_server: WebServerConfig,
    #[serde(default)]
    pub disk_monitor: DiskMonitorConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Directory relative file settings are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WebServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DiskMonitorConfig {
    #[serde(default = "default_disk_path")]
    pub disk_path: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_usage_threshold")]
    pub usage_threshold: u8,
    #[serde(default = "default_check_interval_minutes")]
    pub check_interval_minutes: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NotificationsConfig {
    #[serde(default = "default_enable_notifications")]
    pub enable_notifications: bool,
    #[serde(default = "default_vapid_public_key")]
    pub vapid_public_key: String,
    #[serde(default = "default_vapid_private_key")]
    pub vapid_private_key: String,
    #[serde(default = "default_vapid_email")]
    pub vapid_email: String,
    #[serde(default = "default_subscription_file")]
    pub subscription_file: String,
    #[serde(default = "default_alert_title")]
    pub alert_title: String,
    #[serde(default = "default_delivery_timeout_seconds")]
    pub delivery_timeout_seconds: u64,
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,
}

// Flat overrides read from `DISKWATCH_*` environment variables.
#[derive(Deserialize, Default, Debug)]
pub struct EnvOverrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub disk_path: Option<String>,
    pub log_dir: Option<String>,
    pub usage_threshold: Option<u8>,
    pub check_interval_minutes: Option<f64>,
    pub enable_notifications: Option<bool>,
    pub vapid_public_key: Option<String>,
    pub vapid_private_key: Option<String>,
    pub vapid_email: Option<String>,
    pub subscription_file: Option<String>,
    pub alert_title: Option<String>,
    pub delivery_timeout_seconds: Option<u64>,
    pub max_concurrent_deliveries: Option<usize>,
}

const ENV_PREFIX: &str = "DISKWATCH_";

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6161
}

fn default_disk_path() -> String {
    "/".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_usage_threshold() -> u8 {
    50
}

fn default_check_interval_minutes() -> f64 {
    5.0
}

/// One year.
const MAX_CHECK_INTERVAL_MINUTES: f64 = 525_600.0;

fn default_enable_notifications() -> bool {
    true
}

fn default_vapid_public_key() -> String {
    "vapid_public_key.txt".to_string()
}

fn default_vapid_private_key() -> String {
    "vapid_private_key.pem".to_string()
}

fn default_vapid_email() -> String {
    "mailto:admin@example.com".to_string()
}

fn default_subscription_file() -> String {
    "subscriptions.json".to_string()
}

fn default_alert_title() -> String {
    "Disk Space Alert!".to_string()
}

fn default_delivery_timeout_seconds() -> u64 {
    10
}

fn default_max_concurrent_deliveries() -> usize {
    8
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for DiskMonitorConfig {
    fn default() -> Self {
        Self {
            disk_path: default_disk_path(),
            log_dir: default_log_dir(),
            usage_threshold: default_usage_threshold(),
            check_interval_minutes: default_check_interval_minutes(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enable_notifications: default_enable_notifications(),
            vapid_public_key: default_vapid_public_key(),
            vapid_private_key: default_vapid_private_key(),
            vapid_email: default_vapid_email(),
            subscription_file: default_subscription_file(),
            alert_title: default_alert_title(),
            delivery_timeout_seconds: default_delivery_timeout_seconds(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            web_server: WebServerConfig::default(),
            disk_monitor: DiskMonitorConfig::default(),
            notifications: NotificationsConfig::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl ServerConfig {
    /// Loads the config file (creating or completing it with defaults),
    /// then applies `DISKWATCH_*` environment overrides and validates.
    pub fn load(config_path: &Path) -> Result<(Self, ConfigBootstrap), ConfigError> {
        dotenv::dotenv().ok();

        let (table, bootstrap) = bootstrap_file(config_path)?;
        let mut config: ServerConfig =
            toml::Value::Table(table)
                .try_into()
                .map_err(|source| ConfigError::Parse {
                    path: config_path.to_path_buf(),
                    source,
                })?;
        config.base_dir = match config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let env_overrides = envy::prefixed(ENV_PREFIX).from_env::<EnvOverrides>()?;
        let config = config.with_overrides(env_overrides);
        config.validate()?;
        Ok((config, bootstrap))
    }

    /// Environment wins over the file for every key it sets.
    pub fn with_overrides(mut self, env: EnvOverrides) -> Self {
        let web = &mut self.web_server;
        if let Some(v) = env.bind_address {
            web.bind_address = v;
        }
        if let Some(v) = env.port {
            web.port = v;
        }

        let disk = &mut self.disk_monitor;
        if let Some(v) = env.disk_path {
            disk.disk_path = v;
        }
        if let Some(v) = env.log_dir {
            disk.log_dir = v;
        }
        if let Some(v) = env.usage_threshold {
            disk.usage_threshold = v;
        }
        if let Some(v) = env.check_interval_minutes {
            disk.check_interval_minutes = v;
        }

        let notify = &mut self.notifications;
        if let Some(v) = env.enable_notifications {
            notify.enable_notifications = v;
        }
        if let Some(v) = env.vapid_public_key {
            notify.vapid_public_key = v;
        }
        if let Some(v) = env.vapid_private_key {
            notify.vapid_private_key = v;
        }
        if let Some(v) = env.vapid_email {
            notify.vapid_email = v;
        }
        if let Some(v) = env.subscription_file {
            notify.subscription_file = v;
        }
        if let Some(v) = env.alert_title {
            notify.alert_title = v;
        }
        if let Some(v) = env.delivery_timeout_seconds {
            notify.delivery_timeout_seconds = v;
        }
        if let Some(v) = env.max_concurrent_deliveries {
            notify.max_concurrent_deliveries = v;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let disk = &self.disk_monitor;
        if disk.disk_path.trim().is_empty() {
            return Err(ConfigError::Invalid("disk_path must not be empty".to_string()));
        }
        if disk.usage_threshold > 100 {
            return Err(ConfigError::Invalid(format!(
                "usage_threshold must be between 0 and 100, got {}",
                disk.usage_threshold
            )));
        }
        if !disk.check_interval_minutes.is_finite() || disk.check_interval_minutes <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "check_interval_minutes must be a positive number, got {}",
                disk.check_interval_minutes
            )));
        }
        if disk.check_interval_minutes > MAX_CHECK_INTERVAL_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "check_interval_minutes must be at most {MAX_CHECK_INTERVAL_MINUTES}, got {}",
                disk.check_interval_minutes
            )));
        }
        let notify = &self.notifications;
        if notify.max_concurrent_deliveries == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_deliveries must be at least 1".to_string(),
            ));
        }
        if notify.delivery_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "delivery_timeout_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn resolve(&self, value: &str) -> PathBuf {
        let path = Path::new(value);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn disk_path(&self) -> PathBuf {
        self.resolve(&self.disk_monitor.disk_path)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.resolve(&self.disk_monitor.log_dir)
    }

    pub fn subscription_file(&self) -> PathBuf {
        self.resolve(&self.notifications.subscription_file)
    }

    pub fn vapid_public_key_path(&self) -> PathBuf {
        self.resolve(&self.notifications.vapid_public_key)
    }

    pub fn vapid_private_key_path(&self) -> PathBuf {
        self.resolve(&self.notifications.vapid_private_key)
    }

    /// Saturates for values `validate` would reject.
    pub fn check_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.disk_monitor.check_interval_minutes * 60.0)
            .unwrap_or(Duration::MAX)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.notifications.delivery_timeout_seconds)
    }
}

/// Reads the config file as a raw TOML table, writing defaults for anything
/// missing. Values already present in the file are never changed.
fn bootstrap_file(path: &Path) -> Result<(toml::Table, ConfigBootstrap), ConfigError> {
    let defaults = match toml::Value::try_from(ServerConfig::default())? {
        toml::Value::Table(table) => table,
        _ => toml::Table::new(),
    };

    if !path.exists() {
        write_table(path, &defaults)?;
        return Ok((defaults, ConfigBootstrap::Created));
    }

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut table: toml::Table = contents.parse().map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if fill_missing(&mut table, &defaults) {
        write_table(path, &table)?;
        Ok((table, ConfigBootstrap::Completed))
    } else {
        Ok((table, ConfigBootstrap::Unchanged))
    }
}

fn fill_missing(existing: &mut toml::Table, defaults: &toml::Table) -> bool {
    let mut changed = false;
    for (key, default_value) in defaults {
        match existing.get_mut(key) {
            None => {
                existing.insert(key.clone(), default_value.clone());
                changed = true;
            }
            Some(toml::Value::Table(existing_section)) => {
                if let toml::Value::Table(default_section) = default_value {
                    changed |= fill_missing(existing_section, default_section);
                }
            }
            Some(_) => {}
        }
    }
    changed
}

fn write_table(path: &Path, table: &toml::Table) -> Result<(), ConfigError> {
    let contents = toml::to_string_pretty(table)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, contents).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}
