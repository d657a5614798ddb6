//! Upstream resolvers and their connection pools
//!
//! Forwarding keeps one `Transport` per upstream address for the whole life
//! of the forwarder. `UpstreamManager` creates them on first use, applies the
//! configured pool settings, starts their reclamation threads and stops them
//! all on shutdown.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::dns::errors::{DnsResult, ErrorContext};
use crate::dns::persistent::{
    ConnKind, TlsConfig, Transport, TransportStats, DEFAULT_EXPIRE, DEFAULT_MAX_DIAL_TIMEOUT,
    DEFAULT_MIN_DIAL_TIMEOUT,
};
use crate::dns::transport::{self, SchemeRegistry};

/// Pool settings applied to every upstream transport
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    pub expire: Duration,
    pub min_dial_timeout: Duration,
    pub max_dial_timeout: Duration,
    /// SNI for TLS upstreams; defaults to the upstream host
    pub tls_server_name: Option<String>,
    /// Verify upstream certificates
    pub tls_verify: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            expire: DEFAULT_EXPIRE,
            min_dial_timeout: DEFAULT_MIN_DIAL_TIMEOUT,
            max_dial_timeout: DEFAULT_MAX_DIAL_TIMEOUT,
            tls_server_name: None,
            tls_verify: true,
        }
    }
}

/// An upstream resolver with its connection pool
#[derive(Debug)]
pub struct Upstream {
    /// Transport scheme, `dns` or `tls`
    pub scheme: String,
    /// `host:port` dialed by the transport
    pub addr: String,
    pub transport: Transport,
}

impl Upstream {
    /// Connection kind queries to this upstream start with
    pub fn default_kind(&self) -> ConnKind {
        if self.scheme == transport::TLS {
            ConnKind::TcpTls
        } else {
            ConnKind::Udp
        }
    }
}

/// Split an upstream such as `tls://9.9.9.9` into scheme and `host:port`,
/// filling in the scheme's default port when none is given.
pub fn parse_upstream(schemes: &SchemeRegistry, upstream: &str) -> DnsResult<(String, String)> {
    let (scheme, rest) = schemes.parse_transport(upstream.trim());
    if rest.is_empty() {
        return Err(ErrorContext::config("upstream", upstream)
            .with_reason("missing host")
            .build());
    }

    let addr = match split_port(rest) {
        Some((host, port)) => {
            port.parse::<u16>().map_err(|e| {
                ErrorContext::config("upstream", upstream)
                    .with_reason(format!("bad port {:?}: {}", port, e))
                    .build()
            })?;
            transport::join_host_port(host, port)
        }
        None => transport::join_host_port(
            rest.trim_start_matches('[').trim_end_matches(']'),
            schemes.scheme_port(scheme),
        ),
    };

    Ok((scheme.to_string(), addr))
}

/// Host and port of `s`, or `None` when it carries no port
fn split_port(s: &str) -> Option<(&str, &str)> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        return tail.strip_prefix(':').map(|port| (host, port));
    }
    if s.parse::<IpAddr>().is_ok() {
        return None;
    }
    s.rsplit_once(':')
}

/// Owner of every upstream transport of a forwarder
pub struct UpstreamManager {
    schemes: Arc<SchemeRegistry>,
    settings: TransportSettings,
    upstreams: RwLock<HashMap<String, Arc<Upstream>>>,
}

impl UpstreamManager {
    pub fn new(schemes: Arc<SchemeRegistry>, settings: TransportSettings) -> UpstreamManager {
        UpstreamManager {
            schemes,
            settings,
            upstreams: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Get the upstream for `upstream`, creating and starting its transport once
    pub fn get_or_create(&self, upstream: &str) -> DnsResult<Arc<Upstream>> {
        let (scheme, addr) = parse_upstream(&self.schemes, upstream)?;
        let key = upstream_key(&scheme, &addr);

        if let Some(existing) = self.upstreams.read().get(&key) {
            return Ok(existing.clone());
        }

        let mut upstreams = self.upstreams.write();
        if let Some(existing) = upstreams.get(&key) {
            return Ok(existing.clone());
        }

        let created = Arc::new(self.build(scheme, addr)?);
        created.transport.start()?;
        upstreams.insert(key.clone(), created.clone());
        log::info!("created upstream transport for {}", key);

        Ok(created)
    }

    fn build(&self, scheme: String, addr: String) -> DnsResult<Upstream> {
        let tr = Transport::new(&addr);
        tr.set_expire(self.settings.expire);
        tr.set_dial_timeouts(self.settings.min_dial_timeout, self.settings.max_dial_timeout);

        if scheme == transport::TLS {
            let server_name = match &self.settings.tls_server_name {
                Some(name) => name.clone(),
                None => host_of(&addr).to_string(),
            };
            tr.set_tls_config(TlsConfig::new(&server_name, self.settings.tls_verify)?);
        }

        Ok(Upstream {
            scheme,
            addr,
            transport: tr,
        })
    }

    /// Keys of every upstream created so far, sorted
    pub fn upstreams(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.upstreams.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> HashMap<String, TransportStats> {
        self.upstreams
            .read()
            .iter()
            .map(|(key, upstream)| (key.clone(), upstream.transport.stats()))
            .collect()
    }

    /// Stop every transport, closing all cached connections
    pub fn stop_all(&self) {
        for (key, upstream) in self.upstreams.read().iter() {
            log::debug!("stopping upstream {}", key);
            upstream.transport.stop();
        }
    }
}

/// Key of an already normalised `host:port` under `scheme`
fn upstream_key(scheme: &str, addr: &str) -> String {
    if scheme == transport::DNS {
        addr.to_string()
    } else {
        format!("{}://{}", scheme, addr)
    }
}

fn host_of(addr: &str) -> &str {
    match split_port(addr) {
        Some((host, _)) => host,
        None => addr,
    }
}
