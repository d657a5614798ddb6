//! Listening servers and the registry of per-transport server constructors
//!
//! Each listener group ends up as one `Server`. Transports that need their own
//! wire handling (TLS, gRPC, HTTPS) register a constructor for their scheme;
//! every other address, including malformed or unknown schemes, is served as
//! plain DNS by `DnsServer`.

use std::collections::HashMap;
use std::fmt;
use std::net::{TcpListener, UdpSocket};
use std::sync::Arc;

use crate::dns::config::Config;
use crate::dns::errors::{DnsError, DnsResult, NetworkError, NetworkErrorKind};
use crate::dns::transport::{self, SchemeRegistry};

/// Common trait for listening servers
pub trait Server: Send + Sync {
    /// Address the server was created for, as handed to its constructor
    fn address(&self) -> &str;

    /// Zones served by this listener
    fn zones(&self) -> Vec<&str>;

    /// Bind the stream listener
    fn listen(&self) -> DnsResult<TcpListener>;

    /// Bind the packet listener
    fn listen_packet(&self) -> DnsResult<UdpSocket>;
}

/// Builds a server for one listener group
pub type ServerFactory =
    Box<dyn Fn(&str, Vec<Arc<Config>>) -> DnsResult<Box<dyn Server>> + Send + Sync>;

/// The plain DNS server
///
/// Binds UDP and TCP on the group's address. Message handling belongs to the
/// plugin chain of each zone and is not done here.
pub struct DnsServer {
    address: String,
    bind_addr: String,
    zones: HashMap<String, Arc<Config>>,
}

impl DnsServer {
    pub fn new(address: &str, group: Vec<Arc<Config>>) -> DnsServer {
        let mut zones = HashMap::with_capacity(group.len());
        for config in group {
            if let Some(previous) = zones.insert(config.zone.clone(), config) {
                log::debug!("zone {} defined twice on {}", previous.zone, address);
            }
        }

        DnsServer {
            address: address.to_string(),
            bind_addr: transport::strip_scheme(address).trim().to_string(),
            zones,
        }
    }

    /// Host and port the sockets are bound to
    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    pub fn zone(&self, name: &str) -> Option<&Arc<Config>> {
        self.zones.get(name)
    }

    /// Socket address to bind, with the wildcard host spelled out
    fn socket_addr(&self) -> String {
        if self.bind_addr.starts_with(':') {
            format!("0.0.0.0{}", self.bind_addr)
        } else {
            self.bind_addr.clone()
        }
    }

    fn bind_error(&self, err: std::io::Error) -> DnsError {
        log::warn!("failed to bind {}: {}", self.bind_addr, err);
        let kind = match NetworkErrorKind::from(err.kind()) {
            NetworkErrorKind::Other => NetworkErrorKind::BindFailed,
            kind => kind,
        };
        DnsError::Network(NetworkError {
            kind,
            endpoint: Some(self.bind_addr.clone()),
            source: Some(err),
        })
    }
}

impl Server for DnsServer {
    fn address(&self) -> &str {
        &self.address
    }

    fn zones(&self) -> Vec<&str> {
        let mut zones: Vec<&str> = self.zones.keys().map(String::as_str).collect();
        zones.sort_unstable();
        zones
    }

    fn listen(&self) -> DnsResult<TcpListener> {
        TcpListener::bind(self.socket_addr()).map_err(|e| self.bind_error(e))
    }

    fn listen_packet(&self) -> DnsResult<UdpSocket> {
        UdpSocket::bind(self.socket_addr()).map_err(|e| self.bind_error(e))
    }
}

impl fmt::Debug for DnsServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsServer")
            .field("address", &self.address)
            .field("zones", &self.zones())
            .finish()
    }
}

/// Scheme to server-constructor registry
///
/// Filled during startup and shared read-only afterwards. Registering a
/// constructor also registers the scheme's default port, so the embedded
/// `SchemeRegistry` always knows every scheme that has a server.
pub struct ServerRegistry {
    schemes: SchemeRegistry,
    factories: HashMap<String, ServerFactory>,
}

impl ServerRegistry {
    pub fn new(schemes: SchemeRegistry) -> ServerRegistry {
        ServerRegistry {
            schemes,
            factories: HashMap::new(),
        }
    }

    pub fn schemes(&self) -> &SchemeRegistry {
        &self.schemes
    }

    /// Register `factory` for `scheme`, replacing any earlier one
    pub fn register_server_factory<F>(&mut self, scheme: &str, port: &str, factory: F)
    where
        F: Fn(&str, Vec<Arc<Config>>) -> DnsResult<Box<dyn Server>> + Send + Sync + 'static,
    {
        self.schemes.register_scheme(scheme, port);
        self.factories.insert(scheme.to_string(), Box::new(factory));
    }

    /// Build the server for `address`.
    ///
    /// Unknown schemes are not an error: they get a plain DNS server.
    pub fn create_server(
        &self,
        address: &str,
        group: Vec<Arc<Config>>,
    ) -> DnsResult<Box<dyn Server>> {
        let (scheme, _) = self.schemes.parse_transport(address);
        match self.factories.get(scheme) {
            Some(factory) => factory(address, group),
            None => {
                log::debug!("no server registered for {}, serving plain DNS", address);
                Ok(Box::new(DnsServer::new(address, group)))
            }
        }
    }
}

impl Default for ServerRegistry {
    fn default() -> Self {
        ServerRegistry::new(SchemeRegistry::with_defaults())
    }
}
