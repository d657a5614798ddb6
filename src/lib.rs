//! Atlas DNS listener and upstream plumbing
//!
//! Two pieces of the server that every deployment needs regardless of which
//! plugins it runs:
//!
//! * Listener grouping: zone configs that ask for the same transport, host
//!   and port are served from one socket, and each group is turned into a
//!   server by the constructor registered for its transport.
//! * Upstream connection pooling: forwarded queries reuse idle UDP, TCP and
//!   TLS connections to each upstream, with stale connections reclaimed in
//!   the background.

/// Listener grouping, transport registries and upstream connection pools
pub mod dns;
