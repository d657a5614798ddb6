//! Listener grouping and server construction through the public API

use std::collections::BTreeSet;
use std::net::{TcpListener, UdpSocket};
use std::sync::Arc;

use proptest::prelude::*;

use atlas_listen::dns::config::{Config, Handler};
use atlas_listen::dns::errors::DnsResult;
use atlas_listen::dns::grouping::{group_configs_by_listen_addr, make_servers, ListenerGroups};
use atlas_listen::dns::server::{Server, ServerRegistry};
use atlas_listen::dns::transport::SchemeRegistry;

struct TestPlugin;

impl Handler for TestPlugin {
    fn name(&self) -> &str {
        "testplugin"
    }
}

/// Server standing in for a registered transport
struct TaggedServer {
    address: String,
    zones: Vec<String>,
}

impl Server for TaggedServer {
    fn address(&self) -> &str {
        &self.address
    }

    fn zones(&self) -> Vec<&str> {
        self.zones.iter().map(String::as_str).collect()
    }

    fn listen(&self) -> DnsResult<TcpListener> {
        Ok(TcpListener::bind("127.0.0.1:0")?)
    }

    fn listen_packet(&self) -> DnsResult<UdpSocket> {
        Ok(UdpSocket::bind("127.0.0.1:0")?)
    }
}

fn defaults() -> SchemeRegistry {
    SchemeRegistry::with_defaults()
}

fn key_set(groups: &ListenerGroups) -> BTreeSet<String> {
    groups.keys().cloned().collect()
}

#[test]
fn test_handler_survives_server_creation() {
    let plugin: Arc<dyn Handler> = Arc::new(TestPlugin);
    let config = Arc::new(Config::dns(".", "53").with_handler(plugin));

    let registry = ServerRegistry::default();
    let server = registry.create_server("127.0.0.1:53", vec![config.clone()]).unwrap();
    assert_eq!(server.zones(), vec!["."]);

    assert_eq!(config.handler("testplugin").map(|h| h.name().to_string()).as_deref(), Some("testplugin"));
    assert!(config.handler("nothing").is_none());
    assert_eq!(config.handlers().len(), 1);
}

#[test]
fn test_registered_transport_gets_its_group() {
    let mut registry = ServerRegistry::new(SchemeRegistry::new());
    registry.register_server_factory("test", "8989", |addr, group| {
        Ok(Box::new(TaggedServer {
            address: format!("tagged {}", addr),
            zones: group.iter().map(|c| c.zone.clone()).collect(),
        }) as Box<dyn Server>)
    });

    let configs = vec![
        Arc::new(Config::new("test", "example.org.", "8989")),
        Arc::new(Config::new("test", "example.net.", "8989")),
        Arc::new(Config::dns(".", "5300")),
    ];
    let servers = make_servers(&registry, &configs).unwrap();
    let addresses: Vec<&str> = servers.iter().map(|s| s.address()).collect();
    assert_eq!(addresses, vec!["dns://:5300", "tagged test://:8989"]);
    assert_eq!(servers[1].zones(), vec!["example.org.", "example.net."]);
}

#[test]
fn test_grouping_error_aborts_make_servers() {
    let registry = ServerRegistry::default();
    let configs = vec![
        Arc::new(Config::dns(".", "53")),
        Arc::new(Config::dns("com.", "fifty-three")),
    ];
    let err = make_servers(&registry, &configs).err().expect("grouping must fail");
    assert!(err.is_configuration());
}

#[test]
fn test_same_port_distinct_hosts() {
    let hosts = ["127.0.0.1", "::1"];
    let configs = vec![
        Arc::new(Config::dns(".", "53").with_listen_hosts(hosts.iter().copied())),
        Arc::new(Config::dns("com.", "53").with_listen_hosts(hosts.iter().copied())),
    ];
    let groups = group_configs_by_listen_addr(&defaults(), &configs).unwrap();
    let expected: BTreeSet<String> = ["dns://127.0.0.1:53", "dns://[::1]:53"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(key_set(&groups), expected);
}

#[test]
fn test_portless_zones_listen_on_scheme_default() {
    let registry = ServerRegistry::default();
    let configs = vec![
        Arc::new(Config::new("tls", ".", "")),
        Arc::new(Config::new("https", "example.org.", "")),
        Arc::new(Config::dns(".", "")),
    ];
    let servers = make_servers(&registry, &configs).unwrap();
    let addresses: Vec<&str> = servers.iter().map(|s| s.address()).collect();
    assert_eq!(addresses, vec!["dns://:53", "https://:443", "tls://:853"]);
}

#[test]
fn test_registered_factory_port_is_default() {
    let mut registry = ServerRegistry::new(SchemeRegistry::new());
    registry.register_server_factory("test", "8989", |addr, group| {
        Ok(Box::new(TaggedServer {
            address: addr.to_string(),
            zones: group.iter().map(|c| c.zone.clone()).collect(),
        }) as Box<dyn Server>)
    });

    let configs = vec![Arc::new(Config::new("test", ".", ""))];
    let servers = make_servers(&registry, &configs).unwrap();
    assert_eq!(servers[0].address(), "test://:8989");
}

fn host_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("127.0.0.1".to_string()),
        Just("::1".to_string()),
        (1u8..=254).prop_map(|n| format!("10.0.0.{}", n)),
    ]
}

fn config_strategy() -> impl Strategy<Value = (String, String, Vec<String>)> {
    (
        prop::sample::select(vec![".", "com.", "example.org.", "in-addr.arpa."]),
        prop::sample::select(vec!["53", "54", "5353"]),
        prop::collection::vec(host_strategy(), 0..3),
    )
        .prop_map(|(zone, port, hosts)| (zone.to_string(), port.to_string(), hosts))
}

fn build(entries: &[(String, String, Vec<String>)]) -> Vec<Arc<Config>> {
    entries
        .iter()
        .map(|(zone, port, hosts)| {
            Arc::new(Config::dns(zone, port).with_listen_hosts(hosts.iter().cloned()))
        })
        .collect()
}

proptest! {
    #[test]
    fn test_grouping_ignores_order(
        entries in prop::collection::vec(config_strategy(), 1..8),
        seed in any::<u64>()
    ) {
        let configs = build(&entries);
        let mut shuffled = configs.clone();
        // deterministic rotation plus reversal stands in for a shuffle
        let len = shuffled.len();
        shuffled.rotate_left((seed as usize) % len);
        shuffled.reverse();

        let a = group_configs_by_listen_addr(&defaults(), &configs).unwrap();
        let b = group_configs_by_listen_addr(&defaults(), &shuffled).unwrap();
        prop_assert_eq!(key_set(&a), key_set(&b));

        for (key, group) in a.iter() {
            let members = |g: &Vec<Arc<Config>>| -> BTreeSet<usize> {
                g.iter().map(|c| Arc::as_ptr(c) as usize).collect()
            };
            prop_assert_eq!(members(group), members(&b[key]));
        }
    }

    #[test]
    fn test_wildcard_only_is_one_group(
        zones in prop::collection::vec("[a-z]{1,10}\\.", 1..10)
    ) {
        let configs: Vec<Arc<Config>> = zones
            .iter()
            .map(|zone| Arc::new(Config::dns(zone, "53")))
            .collect();
        let groups = group_configs_by_listen_addr(&defaults(), &configs).unwrap();
        prop_assert_eq!(groups.len(), 1);
        prop_assert_eq!(groups["dns://:53"].len(), configs.len());
    }

    #[test]
    fn test_zone_names_never_split_groups(
        entries in prop::collection::vec(config_strategy(), 1..8)
    ) {
        let renamed: Vec<(String, String, Vec<String>)> = entries
            .iter()
            .map(|(_, port, hosts)| (".".to_string(), port.clone(), hosts.clone()))
            .collect();
        let a = group_configs_by_listen_addr(&defaults(), &build(&entries)).unwrap();
        let b = group_configs_by_listen_addr(&defaults(), &build(&renamed)).unwrap();
        prop_assert_eq!(key_set(&a), key_set(&b));
    }
}
