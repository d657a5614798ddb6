//! Grouping of zone configs onto shared listening sockets
//!
//! Zones that ask for the same transport, host and port are served from one
//! socket. The group key is the canonical socket identity
//! `scheme://host:port`: the wildcard host renders as `scheme://:port` and
//! IPv6 literals are bracketed. Zone names never split a group. A config
//! with an empty port listens on its scheme's default port.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use crate::dns::config::Config;
use crate::dns::errors::{DnsResult, ErrorContext};
use crate::dns::server::{Server, ServerRegistry};
use crate::dns::transport::SchemeRegistry;

/// Group key to the configs sharing that socket
pub type ListenerGroups = HashMap<String, Vec<Arc<Config>>>;

/// Partition `configs` by the socket they listen on.
///
/// Configs are appended to their groups in input order. A config that names
/// the same host twice appears once in that group, and the same `Arc` passed
/// twice is kept only once per group.
///
/// Fails only when a host or port cannot be turned into a socket address.
pub fn group_configs_by_listen_addr(
    schemes: &SchemeRegistry,
    configs: &[Arc<Config>],
) -> DnsResult<ListenerGroups> {
    let mut groups = ListenerGroups::new();
    let wildcard = [String::new()];

    for config in configs {
        let port = if config.port.trim().is_empty() {
            schemes.scheme_port(&config.transport)
        } else {
            config.port.as_str()
        };
        let port = parse_port(port)?;
        let hosts = if config.listen_hosts.is_empty() {
            &wildcard[..]
        } else {
            &config.listen_hosts[..]
        };

        for host in hosts {
            let key = format!("{}://{}", config.transport, listen_addr(host, port)?);
            let group = groups.entry(key).or_insert_with(Vec::new);
            if !group.iter().any(|c| Arc::ptr_eq(c, config)) {
                group.push(config.clone());
            }
        }
    }

    for (key, group) in groups.iter() {
        log::debug!("listener {} serves {} zone(s)", key, group.len());
    }

    Ok(groups)
}

/// Group `configs` and build one server per group, stopping at the first failure
pub fn make_servers(
    registry: &ServerRegistry,
    configs: &[Arc<Config>],
) -> DnsResult<Vec<Box<dyn Server>>> {
    let groups = group_configs_by_listen_addr(registry.schemes(), configs)?;

    let mut keys: Vec<&String> = groups.keys().collect();
    keys.sort();

    let mut servers = Vec::with_capacity(keys.len());
    for key in keys {
        let server = registry.create_server(key, groups[key].clone())?;
        servers.push(server);
    }

    Ok(servers)
}

fn parse_port(port: &str) -> DnsResult<u16> {
    port.trim().parse::<u16>().map_err(|e| {
        ErrorContext::config("port", port)
            .with_reason(e.to_string())
            .with_suggestion("use a numeric port between 0 and 65535")
            .build()
    })
}

/// Canonical `host:port` for a bind host; the wildcard renders as `:port`
fn listen_addr(host: &str, port: u16) -> DnsResult<String> {
    let host = host.trim();
    if host.is_empty() {
        return Ok(format!(":{}", port));
    }

    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port).to_string());
    }

    let resolved = (literal, port).to_socket_addrs().map_err(|e| {
        ErrorContext::config("listen_host", host)
            .with_reason(e.to_string())
            .with_suggestion("bind to an IP address literal")
            .build()
    })?;

    let mut resolved: Vec<SocketAddr> = resolved.collect();
    // Prefer IPv4 when a name resolves to both families
    resolved.sort_by_key(|addr| addr.is_ipv6());
    resolved
        .first()
        .map(SocketAddr::to_string)
        .ok_or_else(|| {
            ErrorContext::config("listen_host", host)
                .with_reason("name resolved to no addresses")
                .build()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(zone: &str, port: &str, hosts: &[&str]) -> Arc<Config> {
        Arc::new(Config::dns(zone, port).with_listen_hosts(hosts.iter().copied()))
    }

    fn schemes() -> SchemeRegistry {
        SchemeRegistry::with_defaults()
    }

    fn keys(groups: &ListenerGroups) -> Vec<&str> {
        let mut keys: Vec<&str> = groups.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    #[test]
    fn test_grouping_servers() {
        let cases: Vec<(Vec<Arc<Config>>, Vec<&str>)> = vec![
            (vec![config(".", "53", &[""])], vec!["dns://:53"]),
            (
                vec![config(".", "53", &[""]), config(".", "54", &[""])],
                vec!["dns://:53", "dns://:54"],
            ),
            (
                vec![config(".", "53", &[""]), config("com.", "53", &[""])],
                vec!["dns://:53"],
            ),
            (
                vec![config(".", "53", &["127.0.0.1"]), config(".", "54", &[""])],
                vec!["dns://127.0.0.1:53", "dns://:54"],
            ),
            (
                vec![config(".", "53", &["127.0.0.1", "::1"]), config(".", "54", &[""])],
                vec!["dns://127.0.0.1:53", "dns://:54", "dns://[::1]:53"],
            ),
            (
                vec![
                    config(".", "53", &["127.0.0.1", "::1"]),
                    config("com.", "53", &["127.0.0.1", "::1"]),
                ],
                vec!["dns://127.0.0.1:53", "dns://[::1]:53"],
            ),
            (
                vec![config(".", "53", &["127.0.0.1"]), config("com.", "53", &["::1"])],
                vec!["dns://127.0.0.1:53", "dns://[::1]:53"],
            ),
            (
                vec![config(".", "53", &["127.0.0.1", "::1"]), config("com.", "53", &[""])],
                vec!["dns://127.0.0.1:53", "dns://:53", "dns://[::1]:53"],
            ),
        ];

        for (i, (configs, expected)) in cases.iter().enumerate() {
            let groups = group_configs_by_listen_addr(&schemes(), configs)
                .unwrap_or_else(|e| panic!("case {}: unexpected error {}", i, e));
            assert_eq!(keys(&groups), *expected, "case {}", i);
        }
    }

    #[test]
    fn test_zones_share_group_in_order() {
        let root = config(".", "53", &["127.0.0.1"]);
        let com = config("com.", "53", &["127.0.0.1"]);
        let groups = group_configs_by_listen_addr(&schemes(), &[root.clone(), com.clone()]).unwrap();

        let group = &groups["dns://127.0.0.1:53"];
        assert_eq!(group.len(), 2);
        assert!(Arc::ptr_eq(&group[0], &root));
        assert!(Arc::ptr_eq(&group[1], &com));
    }

    #[test]
    fn test_transport_splits_groups() {
        let configs = vec![
            config(".", "53", &[""]),
            Arc::new(Config::new("tls", ".", "53")),
        ];
        let groups = group_configs_by_listen_addr(&schemes(), &configs).unwrap();
        assert_eq!(keys(&groups), vec!["dns://:53", "tls://:53"]);
    }

    #[test]
    fn test_ipv6_literal_is_canonical() {
        let configs = vec![
            config(".", "53", &["0:0:0:0:0:0:0:1"]),
            config("org.", "53", &["[::1]"]),
        ];
        let groups = group_configs_by_listen_addr(&schemes(), &configs).unwrap();
        assert_eq!(keys(&groups), vec!["dns://[::1]:53"]);
        assert_eq!(groups["dns://[::1]:53"].len(), 2);
    }

    #[test]
    fn test_duplicate_host_in_one_config() {
        let configs = vec![config(".", "53", &["127.0.0.1", "127.0.0.1"])];
        let groups = group_configs_by_listen_addr(&schemes(), &configs).unwrap();
        assert_eq!(groups["dns://127.0.0.1:53"].len(), 1);
    }

    #[test]
    fn test_empty_port_uses_scheme_default() {
        let configs = vec![
            Arc::new(Config::new("tls", ".", "")),
            Arc::new(Config::new("dns", "example.org.", " ")),
            Arc::new(Config::new("grpc", ".", "")),
        ];
        let groups = group_configs_by_listen_addr(&schemes(), &configs).unwrap();
        assert_eq!(keys(&groups), vec!["dns://:53", "grpc://:443", "tls://:853"]);

        // unregistered schemes fall back to the global port
        let configs = vec![Arc::new(Config::new("quic", ".", ""))];
        let groups = group_configs_by_listen_addr(&SchemeRegistry::new(), &configs).unwrap();
        assert_eq!(keys(&groups), vec!["quic://:53"]);
    }

    #[test]
    fn test_explicit_port_wins_over_scheme_default() {
        let configs = vec![Arc::new(Config::new("tls", ".", "8853"))];
        let groups = group_configs_by_listen_addr(&schemes(), &configs).unwrap();
        assert_eq!(keys(&groups), vec!["tls://:8853"]);
    }

    #[test]
    fn test_same_config_twice_is_kept_once() {
        let root = config(".", "53", &[""]);
        let groups = group_configs_by_listen_addr(&schemes(), &[root.clone(), root]).unwrap();
        assert_eq!(groups["dns://:53"].len(), 1);
    }

    #[test]
    fn test_bad_port_is_config_error() {
        let schemes = schemes();
        let err = group_configs_by_listen_addr(&schemes, &[config(".", "domain53", &[""])])
            .unwrap_err();
        assert!(err.is_configuration());

        let err =
            group_configs_by_listen_addr(&schemes, &[config(".", "70000", &[""])]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_bad_host_is_config_error() {
        let configs = [config(".", "53", &["not a host name"])];
        let err = group_configs_by_listen_addr(&schemes(), &configs).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_make_servers_one_per_group() {
        let registry = ServerRegistry::default();
        let configs = vec![
            config(".", "53", &["127.0.0.1", "::1"]),
            config("com.", "53", &["127.0.0.1", "::1"]),
        ];
        let servers = make_servers(&registry, &configs).unwrap();
        let addresses: Vec<&str> = servers.iter().map(|s| s.address()).collect();
        assert_eq!(addresses, vec!["dns://127.0.0.1:53", "dns://[::1]:53"]);
        assert_eq!(servers[0].zones(), vec![".", "com."]);
    }
}
