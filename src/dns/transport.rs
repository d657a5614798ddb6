//! Transport schemes and their default ports
//!
//! A scheme (`dns`, `tls`, `grpc`, `https`) names the wire transport a listener
//! or upstream uses. Addresses may carry it as a `scheme://` prefix; addresses
//! without a known prefix are plain DNS.
//!
//! The registry is filled while plugins register at startup and only read
//! afterwards. Registration takes `&mut self`, so once the registry is shared
//! behind an `Arc` it can no longer change.

use std::collections::BTreeMap;

/// Plain DNS over UDP and TCP
pub const DNS: &str = "dns";
/// DNS-over-TLS
pub const TLS: &str = "tls";
/// DNS-over-gRPC
pub const GRPC: &str = "grpc";
/// DNS-over-HTTPS
pub const HTTPS: &str = "https";

/// Default port for DNS, also used for unregistered schemes
pub const PORT: &str = "53";
/// Default port for DNS-over-TLS
pub const TLS_PORT: &str = "853";
/// Default port for DNS-over-gRPC
pub const GRPC_PORT: &str = "443";
/// Default port for DNS-over-HTTPS
pub const HTTPS_PORT: &str = "443";

const SCHEME_SEPARATOR: &str = "://";

/// Mapping from scheme name to its default port
#[derive(Debug, Clone)]
pub struct SchemeRegistry {
    ports: BTreeMap<String, String>,
}

impl SchemeRegistry {
    /// A registry that only knows plain DNS
    pub fn new() -> Self {
        let mut registry = SchemeRegistry {
            ports: BTreeMap::new(),
        };
        registry.register_scheme(DNS, PORT);
        registry
    }

    /// A registry with every transport the server ships with
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_scheme(TLS, TLS_PORT);
        registry.register_scheme(GRPC, GRPC_PORT);
        registry.register_scheme(HTTPS, HTTPS_PORT);
        registry
    }

    /// Register `scheme` with its default port, replacing any earlier entry
    pub fn register_scheme(&mut self, scheme: &str, port: &str) {
        log::debug!("registering transport scheme {} on port {}", scheme, port);
        self.ports.insert(scheme.to_string(), port.to_string());
    }

    pub fn is_registered(&self, scheme: &str) -> bool {
        self.ports.contains_key(scheme)
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.ports.keys().map(String::as_str)
    }

    /// Split a `scheme://rest` address into its scheme and the trimmed rest.
    ///
    /// Addresses without a registered prefix are returned untouched together
    /// with the DNS scheme.
    pub fn parse_transport<'s>(&self, s: &'s str) -> (&str, &'s str) {
        for scheme in self.ports.keys() {
            let rest = s
                .strip_prefix(scheme.as_str())
                .and_then(|rest| rest.strip_prefix(SCHEME_SEPARATOR));
            if let Some(rest) = rest {
                return (scheme.as_str(), rest.trim());
            }
        }
        (DNS, s)
    }

    /// Default port of `scheme`, or the DNS port if it was never registered
    pub fn scheme_port(&self, scheme: &str) -> &str {
        self.ports.get(scheme).map(String::as_str).unwrap_or(PORT)
    }

    /// Render `host` on the default port of `scheme`.
    ///
    /// DNS addresses are bare `host:port`; every other scheme keeps its prefix.
    pub fn format_host_port(&self, scheme: &str, host: &str) -> String {
        let host_port = join_host_port(host, self.scheme_port(scheme));
        if scheme == DNS {
            host_port
        } else {
            format!("{}{}{}", scheme, SCHEME_SEPARATOR, host_port)
        }
    }
}

impl Default for SchemeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Join host and port, bracketing hosts that contain a colon (IPv6 literals)
pub fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Strip any `scheme://` prefix, registered or not
pub fn strip_scheme(addr: &str) -> &str {
    match addr.find(SCHEME_SEPARATOR) {
        Some(idx) => &addr[idx + SCHEME_SEPARATOR.len()..],
        None => addr,
    }
}
