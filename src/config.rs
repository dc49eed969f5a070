//! System configuration: declarative component descriptions plus tunables
//! for the event bus, plugin acquisition, and the schedule driver.
//!
//! All durations are serialized as milliseconds via the [`duration_ms`]
//! helper. Configuration is loaded from JSON with [`SystemConfig::from_file`]
//! or [`from_str`].

use std::{fs::File, io::BufReader, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::component::ComponentConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    #[serde(default = "default_init_timeout", with = "duration_ms")]
    pub init_timeout: Duration,

    #[serde(default = "default_shutdown_timeout", with = "duration_ms")]
    pub shutdown_timeout: Duration,

    #[serde(default = "default_request_timeout", with = "duration_ms")]
    pub request_timeout: Duration,

    /// Services constructed and registered by `System::initialize`.
    #[serde(default)]
    pub services: Vec<ComponentConfig>,

    /// Operations constructed and registered by `System::initialize`.
    #[serde(default)]
    pub operations: Vec<ComponentConfig>,

    #[serde(default)]
    pub plugins: PluginManagerConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            init_timeout: default_init_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            request_timeout: default_request_timeout(),
            services: Vec::new(),
            operations: Vec::new(),
            plugins: PluginManagerConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl SystemConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        from_file(path)
    }
}

/// Plugin discovery and acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManagerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Local directory scanned for plugin artifact directories.
    #[serde(default)]
    pub plugin_dir: Option<PathBuf>,

    /// Remote artifact URLs (gzipped tarballs) fetched during discovery.
    #[serde(default)]
    pub remote_urls: Vec<String>,

    #[serde(default = "default_fetch_timeout", with = "duration_ms")]
    pub fetch_timeout: Duration,

    #[serde(default = "default_shutdown_timeout", with = "duration_ms")]
    pub shutdown_timeout: Duration,
}

impl Default for PluginManagerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            plugin_dir: None,
            remote_urls: Vec::new(),
            fetch_timeout: default_fetch_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Schedule driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval", with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            poll_interval: default_poll_interval(),
        }
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> Result<T> {
    let file = File::open(path)
        .map_err(|e| Error::Configuration(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Configuration(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_event_buffer_size() -> usize {
    1000
}
fn default_init_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}
fn default_true() -> bool {
    true
}

pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
