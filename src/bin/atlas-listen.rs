use std::env;
use std::process;
use std::sync::Arc;

use getopts::Options;

use atlas_listen::dns::grouping::{group_configs_by_listen_addr, make_servers};
use atlas_listen::dns::logging::init_logging;
use atlas_listen::dns::server::ServerRegistry;
use atlas_listen::dns::settings::Settings;
use atlas_listen::dns::transport::SchemeRegistry;
use atlas_listen::dns::upstream::UpstreamManager;

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

/// Show how the configured zones map onto listeners, and optionally dial
/// every upstream once through its connection pool
fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt("c", "config", "Settings file (TOML)", "FILE");
    opts.optflag("", "probe", "Dial each upstream once and report cache use");

    let opt_matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            print_usage(&program, opts);
            process::exit(2);
        }
    };

    if opt_matches.opt_present("h") {
        print_usage(&program, opts);
        return;
    }

    let settings = match opt_matches.opt_str("c") {
        Some(path) => match Settings::from_file(&path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path, e);
                process::exit(1);
            }
        },
        None => Settings::default(),
    };

    init_logging(&settings.logging);

    // Registration happens here, single threaded, before anything is shared
    let registry = ServerRegistry::new(SchemeRegistry::with_defaults());
    let configs = settings.configs();

    let groups = match group_configs_by_listen_addr(registry.schemes(), &configs) {
        Ok(groups) => groups,
        Err(e) => {
            log::error!("Invalid listener configuration: {}", e);
            process::exit(1);
        }
    };

    let mut keys: Vec<&String> = groups.keys().collect();
    keys.sort();
    for key in keys {
        let zones: Vec<&str> = groups[key].iter().map(|c| c.zone.as_str()).collect();
        println!("{} -> {}", key, zones.join(" "));
    }

    match make_servers(&registry, &configs) {
        Ok(servers) => log::info!("{} listener(s) ready", servers.len()),
        Err(e) => {
            log::error!("Failed to create servers: {}", e);
            process::exit(1);
        }
    }

    if !opt_matches.opt_present("probe") {
        return;
    }

    let upstreams = UpstreamManager::new(
        Arc::new(registry.schemes().clone()),
        settings.forward.transport_settings(),
    );

    for name in settings.forward.upstreams.iter() {
        let upstream = match upstreams.get_or_create(name) {
            Ok(upstream) => upstream,
            Err(e) => {
                log::warn!("Skipping upstream {}: {}", name, e);
                continue;
            }
        };

        let kind = upstream.default_kind();
        for attempt in 0..2 {
            match upstream.transport.dial(kind) {
                Ok((conn, cached)) => {
                    println!("{} {} attempt {}: cached={}", name, kind, attempt, cached);
                    upstream.transport.yield_conn(conn);
                }
                Err(e) => {
                    println!("{} {} attempt {}: {}", name, kind, attempt, e);
                    break;
                }
            }
        }
    }

    upstreams.stop_all();
}
