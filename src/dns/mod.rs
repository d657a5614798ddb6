//! Listener and upstream plumbing
//!
//! # Module Structure
//!
//! * `transport` - transport schemes and their default ports
//! * `server` - listening servers and the per-scheme constructor registry
//! * `config` - per-zone configuration handed to servers
//! * `grouping` - grouping of zone configs onto shared sockets
//! * `persistent` - persistent connection cache for one upstream
//! * `upstream` - one connection cache per upstream resolver
//! * `settings` - settings file
//! * `logging` - log output setup

/// Transport schemes and default ports
pub mod transport;

/// Listening servers and the server constructor registry
pub mod server;

/// Per-zone configuration
pub mod config;

/// Grouping of zone configs by listen address
pub mod grouping;

/// Persistent upstream connections
pub mod persistent;

/// Upstream resolvers and their transports
pub mod upstream;

/// Settings file
pub mod settings;

/// Log output setup
pub mod logging;

/// Error types shared by all modules
pub mod errors;
