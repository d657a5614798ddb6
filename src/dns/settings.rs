//! Settings file
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [forward]
//! upstreams = ["8.8.8.8", "tls://9.9.9.9"]
//! expire_ms = 10000
//!
//! [[zone]]
//! zone = "example.org."
//! port = "53"
//! listen_hosts = ["127.0.0.1", "::1"]
//!
//! [[zone]]
//! transport = "tls"
//! zone = "."
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use derive_more::{Display, Error, From};
use serde::Deserialize;

use crate::dns::config::Config;
use crate::dns::logging::LoggerConfig;
use crate::dns::persistent::{DEFAULT_EXPIRE, DEFAULT_MAX_DIAL_TIMEOUT, DEFAULT_MIN_DIAL_TIMEOUT};
use crate::dns::transport;
use crate::dns::upstream::TransportSettings;

#[derive(Debug, Display, From, Error)]
pub enum SettingsError {
    Io(std::io::Error),
    Toml(toml::de::Error),
}

type Result<T> = std::result::Result<T, SettingsError>;

/// Top-level settings
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggerConfig,
    pub forward: ForwardSettings,
    #[serde(rename = "zone")]
    pub zones: Vec<ZoneSettings>,
}

impl Settings {
    pub fn from_toml_str(s: &str) -> Result<Settings> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Settings> {
        let contents = fs::read_to_string(path)?;
        Settings::from_toml_str(&contents)
    }

    /// Zone configs in file order
    pub fn configs(&self) -> Vec<Arc<Config>> {
        self.zones.iter().map(|z| Arc::new(z.to_config())).collect()
    }
}

/// Upstream forwarding and connection pool settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForwardSettings {
    pub upstreams: Vec<String>,
    pub expire_ms: u64,
    pub min_dial_timeout_ms: u64,
    pub max_dial_timeout_ms: u64,
    pub tls_server_name: Option<String>,
    /// Skip certificate verification for TLS upstreams
    pub tls_insecure: bool,
}

impl Default for ForwardSettings {
    fn default() -> Self {
        Self {
            upstreams: Vec::new(),
            expire_ms: DEFAULT_EXPIRE.as_millis() as u64,
            min_dial_timeout_ms: DEFAULT_MIN_DIAL_TIMEOUT.as_millis() as u64,
            max_dial_timeout_ms: DEFAULT_MAX_DIAL_TIMEOUT.as_millis() as u64,
            tls_server_name: None,
            tls_insecure: false,
        }
    }
}

impl ForwardSettings {
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            expire: Duration::from_millis(self.expire_ms),
            min_dial_timeout: Duration::from_millis(self.min_dial_timeout_ms),
            max_dial_timeout: Duration::from_millis(self.max_dial_timeout_ms),
            tls_server_name: self.tls_server_name.clone(),
            tls_verify: !self.tls_insecure,
        }
    }
}

/// One zone block. Leaving `port` out listens on the transport's default port.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ZoneSettings {
    pub transport: String,
    pub zone: String,
    pub port: String,
    pub listen_hosts: Vec<String>,
}

impl Default for ZoneSettings {
    fn default() -> Self {
        Self {
            transport: transport::DNS.to_string(),
            zone: ".".to_string(),
            port: String::new(),
            listen_hosts: Vec::new(),
        }
    }
}

impl ZoneSettings {
    pub fn to_config(&self) -> Config {
        Config::new(&self.transport, &self.zone, &self.port)
            .with_listen_hosts(self.listen_hosts.iter().cloned())
    }
}
