//! Per-zone server configuration
//!
//! A `Config` describes one zone block: which zone it serves, on which
//! transport and port, and on which local addresses. Configs are built while
//! the configuration is loaded and are immutable once listener grouping
//! starts, so they are shared as `Arc<Config>`.

use std::fmt;
use std::sync::Arc;

use crate::dns::transport;

/// A plugin handler attached to a zone
///
/// Grouping and pooling never look inside a handler; they only hand configs
/// (and therefore their handlers) on to whoever builds the server.
pub trait Handler: Send + Sync {
    /// Name the handler was registered under
    fn name(&self) -> &str;
}

/// Configuration of a single zone block
#[derive(Clone)]
pub struct Config {
    /// Transport scheme the zone is served on, e.g. `dns` or `tls`
    pub transport: String,
    /// Fully qualified zone name
    pub zone: String,
    /// Port to listen on
    pub port: String,
    /// Local addresses to bind; an empty string binds every interface
    pub listen_hosts: Vec<String>,
    handlers: Vec<Arc<dyn Handler>>,
}

impl Config {
    pub fn new(transport: &str, zone: &str, port: &str) -> Config {
        Config {
            transport: transport.to_string(),
            zone: zone.to_string(),
            port: port.to_string(),
            listen_hosts: vec![String::new()],
            handlers: Vec::new(),
        }
    }

    /// Plain DNS on the wildcard address
    pub fn dns(zone: &str, port: &str) -> Config {
        Config::new(transport::DNS, zone, port)
    }

    /// Replace the bind hosts. An empty list still binds the wildcard address.
    pub fn with_listen_hosts<I, S>(mut self, hosts: I) -> Config
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.listen_hosts = hosts.into_iter().map(Into::into).collect();
        if self.listen_hosts.is_empty() {
            self.listen_hosts.push(String::new());
        }
        self
    }

    /// Append a handler; handlers keep the order they were added in
    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Config {
        self.handlers.push(handler);
        self
    }

    /// Look up a handler by name
    pub fn handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.iter().find(|h| h.name() == name).cloned()
    }

    /// All handlers in registration order
    pub fn handlers(&self) -> &[Arc<dyn Handler>] {
        &self.handlers
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("Config")
            .field("transport", &self.transport)
            .field("zone", &self.zone)
            .field("port", &self.port)
            .field("listen_hosts", &self.listen_hosts)
            .field("handlers", &names)
            .finish()
    }
}
