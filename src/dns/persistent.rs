//! Persistent connections to an upstream resolver
//!
//! A `Transport` caches idle outbound connections to one upstream address so
//! forwarded queries can skip the connect (and TLS handshake) cost.
//!
//! # Ownership
//!
//! A `PersistConn` is owned by exactly one of: the caller between `dial` and
//! `yield_conn`, a per-kind pool, or the discard bucket waiting to be closed.
//! The pools hand out connections by value, so a connection taken by one
//! caller is invisible to every other caller until it is yielded back.
//!
//! # Reclamation
//!
//! `dial` never closes anything itself: stale connections it runs into are
//! moved to the discard bucket. A background thread started by `start` wakes
//! every expire interval and closes whatever is in the bucket. `stop` closes
//! everything, pooled or discarded, and leaves the transport inert until it
//! is started again.
//!
//! The wake interval is read once, when `start` runs. A later `set_expire`
//! changes how long pooled connections stay fresh but not how often the
//! thread wakes; restart the transport to change both.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};
use std::time::{Duration, Instant};

use openssl::ssl::{SslConnector, SslMethod, SslStream, SslVerifyMode};
use parking_lot::{Mutex, RwLock};

use crate::dns::errors::{DnsError, DnsResult, ErrorContext, NetworkError, NetworkErrorKind};

/// Idle time after which a pooled connection is no longer handed out
pub const DEFAULT_EXPIRE: Duration = Duration::from_secs(1);
/// Lower bound of the adaptive dial timeout
pub const DEFAULT_MIN_DIAL_TIMEOUT: Duration = Duration::from_secs(1);
/// Upper bound of the adaptive dial timeout
pub const DEFAULT_MAX_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool lookups per dial before falling back to a fresh connection
const DIAL_ATTEMPTS: usize = 2;
/// Weight of the moving average of dial durations
const DIAL_TIME_WEIGHT: i128 = 4;
/// Shortest reclamation interval, so a zero expire cannot spin the thread
const MIN_RECLAIM_INTERVAL: Duration = Duration::from_millis(1);

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Kind of upstream connection. Pools never mix kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnKind {
    Udp,
    Tcp,
    TcpTls,
}

impl ConnKind {
    pub const ALL: [ConnKind; 3] = [ConnKind::Udp, ConnKind::Tcp, ConnKind::TcpTls];

    /// Map a network name (`udp`, `tcp`, `tcp-tls`) to a kind; anything else is UDP
    pub fn from_proto(proto: &str) -> ConnKind {
        match proto {
            "tcp" => ConnKind::Tcp,
            "tcp-tls" => ConnKind::TcpTls,
            _ => ConnKind::Udp,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnKind::Udp => "udp",
            ConnKind::Tcp => "tcp",
            ConnKind::TcpTls => "tcp-tls",
        }
    }

    fn index(self) -> usize {
        match self {
            ConnKind::Udp => 0,
            ConnKind::Tcp => 1,
            ConnKind::TcpTls => 2,
        }
    }
}

impl fmt::Display for ConnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TLS settings for `tcp-tls` connections
pub struct TlsConfig {
    connector: SslConnector,
    server_name: String,
    verify: bool,
}

impl TlsConfig {
    /// Build a client config presenting `server_name` as SNI.
    ///
    /// With `verify` off neither the certificate chain nor the host name is
    /// checked.
    pub fn new(server_name: &str, verify: bool) -> DnsResult<TlsConfig> {
        let mut builder = SslConnector::builder(SslMethod::tls()).map_err(|e| {
            ErrorContext::config("tls", server_name)
                .with_reason(e.to_string())
                .build()
        })?;
        if !verify {
            builder.set_verify(SslVerifyMode::NONE);
        }

        Ok(TlsConfig {
            connector: builder.build(),
            server_name: server_name.to_string(),
            verify,
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("server_name", &self.server_name)
            .field("verify", &self.verify)
            .finish()
    }
}

/// The socket behind a persistent connection
pub enum ConnStream {
    /// Connected UDP socket
    Udp(UdpSocket),
    Tcp(TcpStream),
    Tls(SslStream<TcpStream>),
}

impl ConnStream {
    pub fn kind(&self) -> ConnKind {
        match self {
            ConnStream::Udp(_) => ConnKind::Udp,
            ConnStream::Tcp(_) => ConnKind::Tcp,
            ConnStream::Tls(_) => ConnKind::TcpTls,
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            ConnStream::Udp(socket) => socket.set_read_timeout(timeout),
            ConnStream::Tcp(stream) => stream.set_read_timeout(timeout),
            ConnStream::Tls(stream) => stream.get_ref().set_read_timeout(timeout),
        }
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            ConnStream::Udp(socket) => socket.set_write_timeout(timeout),
            ConnStream::Tcp(stream) => stream.set_write_timeout(timeout),
            ConnStream::Tls(stream) => stream.get_ref().set_write_timeout(timeout),
        }
    }

    fn close(self) -> io::Result<()> {
        match self {
            ConnStream::Udp(_) => Ok(()),
            ConnStream::Tcp(stream) => stream.shutdown(Shutdown::Both),
            ConnStream::Tls(mut stream) => {
                // close_notify errors are ignored, the TCP shutdown result is reported
                let _ = stream.shutdown();
                stream.get_ref().shutdown(Shutdown::Both)
            }
        }
    }
}

impl Read for ConnStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ConnStream::Udp(socket) => socket.recv(buf),
            ConnStream::Tcp(stream) => stream.read(buf),
            ConnStream::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ConnStream::Udp(socket) => socket.send(buf),
            ConnStream::Tcp(stream) => stream.write(buf),
            ConnStream::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ConnStream::Udp(_) => Ok(()),
            ConnStream::Tcp(stream) => stream.flush(),
            ConnStream::Tls(stream) => stream.flush(),
        }
    }
}

/// An open upstream connection and the last time it was handed back
pub struct PersistConn {
    id: u64,
    stream: ConnStream,
    used: Instant,
}

impl PersistConn {
    fn new(stream: ConnStream) -> PersistConn {
        PersistConn {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            stream,
            used: Instant::now(),
        }
    }

    /// Process-unique identity of the underlying socket
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> ConnKind {
        self.stream.kind()
    }

    pub fn last_used(&self) -> Instant {
        self.used
    }

    pub fn stream(&self) -> &ConnStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut ConnStream {
        &mut self.stream
    }

    fn is_fresh(&self, expire: Duration) -> bool {
        self.used.elapsed() < expire
    }
}

impl fmt::Debug for PersistConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistConn")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("idle", &self.used.elapsed())
            .finish()
    }
}

/// Snapshot of a transport's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Fresh connections opened
    pub dials: u64,
    /// Dials served from the pool
    pub cache_hits: u64,
    /// Stale connections moved to the discard bucket
    pub discarded: u64,
    /// Connections closed by the transport
    pub closed: u64,
}

#[derive(Default)]
struct Counters {
    dials: AtomicU64,
    cache_hits: AtomicU64,
    discarded: AtomicU64,
    closed: AtomicU64,
}

/// Unordered bag of idle connections of one kind
type ConnPool = Mutex<Vec<PersistConn>>;

fn empty_pools() -> [Arc<ConnPool>; 3] {
    [
        Arc::new(Mutex::new(Vec::new())),
        Arc::new(Mutex::new(Vec::new())),
        Arc::new(Mutex::new(Vec::new())),
    ]
}

struct TransportInner {
    addr: String,
    /// The lock guards which pool occupies a slot, not the pool contents
    conns: RwLock<[Arc<ConnPool>; 3]>,
    discard: ConnPool,
    expire_nanos: AtomicU64,
    dial_bounds: RwLock<(Duration, Duration)>,
    avg_dial_nanos: AtomicU64,
    tls_config: RwLock<Option<Arc<TlsConfig>>>,
    stopped: AtomicBool,
    counters: Counters,
}

impl TransportInner {
    fn expire(&self) -> Duration {
        Duration::from_nanos(self.expire_nanos.load(Ordering::Relaxed))
    }

    fn pool(&self, kind: ConnKind) -> Arc<ConnPool> {
        self.conns.read()[kind.index()].clone()
    }

    fn get_conn(&self, kind: ConnKind) -> Option<PersistConn> {
        if self.stopped.load(Ordering::Acquire) {
            return None;
        }

        let pool = self.pool(kind);
        let expire = self.expire();
        for _ in 0..DIAL_ATTEMPTS {
            let pc = pool.lock().pop()?;
            if pc.is_fresh(expire) {
                return Some(pc);
            }
            log::debug!("connection {} to {} expired, discarding", pc.id, self.addr);
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            self.discard.lock().push(pc);
        }
        None
    }

    fn close_conns(&self, conns: Vec<PersistConn>) {
        for pc in conns {
            let id = pc.id;
            if let Err(e) = pc.stream.close() {
                log::debug!("closing connection {} to {}: {}", id, self.addr, e);
            }
            self.counters.closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Close the discard bucket, or with `all` every pooled connection as well
    fn cleanup(&self, all: bool) {
        if all {
            let old = {
                let mut conns = self.conns.write();
                std::mem::replace(&mut *conns, empty_pools())
            };
            for pool in old.iter() {
                let drained: Vec<PersistConn> = pool.lock().drain(..).collect();
                self.close_conns(drained);
            }
        }

        let discarded: Vec<PersistConn> = self.discard.lock().drain(..).collect();
        if !discarded.is_empty() {
            log::debug!("closing {} expired connection(s) to {}", discarded.len(), self.addr);
        }
        self.close_conns(discarded);
    }

    fn conn_manager(&self, stop: Receiver<()>, interval: Duration) {
        let interval = interval.max(MIN_RECLAIM_INTERVAL);
        let mut next_tick = Instant::now() + interval;
        loop {
            let wait = next_tick.saturating_duration_since(Instant::now());
            match stop.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {
                    self.cleanup(false);
                    next_tick += interval;
                    let now = Instant::now();
                    if next_tick < now {
                        next_tick = now + interval;
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    self.cleanup(true);
                    return;
                }
            }
        }
    }

    fn resolve(&self) -> DnsResult<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(|e| {
                let mut err = ErrorContext::io(e).with_endpoint(self.addr.clone()).build();
                if let DnsError::Network(ref mut net) = err {
                    net.kind = NetworkErrorKind::AddressUnresolved;
                }
                err
            })?
            .collect();

        if addrs.is_empty() {
            return Err(ErrorContext::network(NetworkErrorKind::AddressUnresolved)
                .with_endpoint(self.addr.clone())
                .build());
        }
        Ok(addrs)
    }

    fn connect_udp(&self) -> DnsResult<UdpSocket> {
        let addr = self.resolve()?[0];
        let local = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).map_err(|e| self.dial_error(e))?;
        socket.connect(addr).map_err(|e| self.dial_error(e))?;
        Ok(socket)
    }

    fn connect_tcp(&self, timeout: Duration) -> DnsResult<TcpStream> {
        let mut last_err = None;
        for addr in self.resolve()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).map_err(|e| self.dial_error(e))?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(match last_err {
            Some(e) => self.dial_error(e),
            None => ErrorContext::network(NetworkErrorKind::AddressUnresolved)
                .with_endpoint(self.addr.clone())
                .build(),
        })
    }

    fn connect_tls(&self, timeout: Duration) -> DnsResult<SslStream<TcpStream>> {
        let tls = self.tls_config.read().clone().ok_or_else(|| {
            ErrorContext::config("tls", &self.addr)
                .with_reason("no TLS configuration for tcp-tls upstream")
                .with_suggestion("call set_tls_config before dialing tcp-tls")
                .build()
        })?;

        let tcp = self.connect_tcp(timeout)?;
        // The dial timeout also bounds the handshake
        tcp.set_read_timeout(Some(timeout)).map_err(|e| self.dial_error(e))?;
        tcp.set_write_timeout(Some(timeout)).map_err(|e| self.dial_error(e))?;

        let mut config = tls.connector.configure().map_err(|e| self.tls_error(e.to_string()))?;
        config.set_verify_hostname(tls.verify);
        let stream = config
            .connect(&tls.server_name, tcp)
            .map_err(|e| self.tls_error(e.to_string()))?;

        stream.get_ref().set_read_timeout(None).map_err(|e| self.dial_error(e))?;
        stream.get_ref().set_write_timeout(None).map_err(|e| self.dial_error(e))?;
        Ok(stream)
    }

    fn open(&self, kind: ConnKind, timeout: Duration) -> DnsResult<ConnStream> {
        match kind {
            ConnKind::Udp => self.connect_udp().map(ConnStream::Udp),
            ConnKind::Tcp => self.connect_tcp(timeout).map(ConnStream::Tcp),
            ConnKind::TcpTls => self.connect_tls(timeout).map(ConnStream::Tls),
        }
    }

    fn dial_error(&self, err: io::Error) -> DnsError {
        ErrorContext::io(err).with_endpoint(self.addr.clone()).build()
    }

    fn tls_error(&self, details: String) -> DnsError {
        DnsError::Network(NetworkError {
            kind: NetworkErrorKind::TlsHandshakeFailed,
            endpoint: Some(self.addr.clone()),
            source: Some(io::Error::new(io::ErrorKind::Other, details)),
        })
    }

    fn dial_timeout(&self) -> Duration {
        let (min, max) = *self.dial_bounds.read();
        limit_timeout(Duration::from_nanos(self.avg_dial_nanos.load(Ordering::Relaxed)), min, max)
    }

    fn update_dial_time(&self, observed: Duration) {
        let _ = self
            .avg_dial_nanos
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |avg| {
                Some(moving_average(avg, observed))
            });
    }
}

/// Twice the average, kept within `[min, max]`
fn limit_timeout(avg: Duration, min: Duration, max: Duration) -> Duration {
    if avg < min {
        return min;
    }
    if avg < max / 2 {
        return avg * 2;
    }
    max
}

fn moving_average(avg_nanos: u64, observed: Duration) -> u64 {
    let avg = i128::from(avg_nanos);
    let next = avg + (observed.as_nanos() as i128 - avg) / DIAL_TIME_WEIGHT;
    next.max(0).min(i128::from(u64::MAX)) as u64
}

fn duration_nanos(d: Duration) -> u64 {
    d.as_nanos().min(u128::from(u64::MAX)) as u64
}

struct Manager {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Cache of persistent connections to one upstream address
pub struct Transport {
    inner: Arc<TransportInner>,
    manager: Mutex<Option<Manager>>,
}

impl Transport {
    /// Create a transport for `addr` (`host:port`) with default settings
    pub fn new(addr: &str) -> Transport {
        Transport {
            inner: Arc::new(TransportInner {
                addr: addr.to_string(),
                conns: RwLock::new(empty_pools()),
                discard: Mutex::new(Vec::new()),
                expire_nanos: AtomicU64::new(duration_nanos(DEFAULT_EXPIRE)),
                dial_bounds: RwLock::new((DEFAULT_MIN_DIAL_TIMEOUT, DEFAULT_MAX_DIAL_TIMEOUT)),
                avg_dial_nanos: AtomicU64::new(duration_nanos(DEFAULT_MAX_DIAL_TIMEOUT / 2)),
                tls_config: RwLock::new(None),
                stopped: AtomicBool::new(false),
                counters: Counters::default(),
            }),
            manager: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Get a connection of `kind`, reusing an idle one when a fresh one is pooled.
    ///
    /// The flag is true on a cache hit. The caller must hand the connection
    /// back through `yield_conn` exactly once when done with it.
    pub fn dial(&self, kind: ConnKind) -> DnsResult<(PersistConn, bool)> {
        if let Some(pc) = self.inner.get_conn(kind) {
            log::debug!("reusing {} connection {} to {}", kind, pc.id, self.inner.addr);
            self.inner.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok((pc, true));
        }

        let timeout = self.inner.dial_timeout();
        let start = Instant::now();
        let stream = self.inner.open(kind, timeout)?;
        self.inner.update_dial_time(start.elapsed());
        self.inner.counters.dials.fetch_add(1, Ordering::Relaxed);

        let pc = PersistConn::new(stream);
        log::debug!("dialed {} connection {} to {}", kind, pc.id, self.inner.addr);
        Ok((pc, false))
    }

    /// Return a connection for reuse
    pub fn yield_conn(&self, mut pc: PersistConn) {
        pc.used = Instant::now();

        if self.inner.stopped.load(Ordering::Acquire) {
            self.inner.close_conns(vec![pc]);
            return;
        }

        self.inner.pool(pc.kind()).lock().push(pc);
    }

    /// Start the reclamation thread. Starting a running transport does nothing.
    pub fn start(&self) -> DnsResult<()> {
        let mut manager = self.manager.lock();
        if manager.is_some() {
            return Ok(());
        }

        let (stop, stop_rx) = channel();
        let inner = self.inner.clone();
        let interval = inner.expire();
        let handle = Builder::new()
            .name(format!("transport-{}", self.inner.addr))
            .spawn(move || inner.conn_manager(stop_rx, interval))?;

        self.inner.stopped.store(false, Ordering::Release);
        *manager = Some(Manager { stop, handle });
        log::info!("started connection manager for {}", self.inner.addr);
        Ok(())
    }

    /// Stop the reclamation thread and close every cached connection.
    ///
    /// Returns once cleanup has finished. Until the next `start`, dials never
    /// hit the cache and yielded connections are closed.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);

        let manager = self.manager.lock().take();
        match manager {
            Some(manager) => {
                let _ = manager.stop.send(());
                if manager.handle.join().is_err() {
                    log::warn!("connection manager for {} panicked", self.inner.addr);
                    self.inner.cleanup(true);
                }
            }
            None => self.inner.cleanup(true),
        }
        log::info!("stopped connection manager for {}", self.inner.addr);
    }

    pub fn is_running(&self) -> bool {
        self.manager.lock().is_some()
    }

    /// Set the idle time after which pooled connections expire.
    ///
    /// The reclamation interval is taken from this value when `start` runs.
    pub fn set_expire(&self, expire: Duration) {
        self.inner.expire_nanos.store(duration_nanos(expire), Ordering::Relaxed);
    }

    pub fn expire(&self) -> Duration {
        self.inner.expire()
    }

    pub fn set_tls_config(&self, config: TlsConfig) {
        *self.inner.tls_config.write() = Some(Arc::new(config));
    }

    /// Bounds of the adaptive dial timeout
    pub fn set_dial_timeouts(&self, min: Duration, max: Duration) {
        let max = max.max(min);
        *self.inner.dial_bounds.write() = (min, max);
    }

    /// Timeout the next fresh dial will use
    pub fn dial_timeout(&self) -> Duration {
        self.inner.dial_timeout()
    }

    pub fn stats(&self) -> TransportStats {
        let counters = &self.inner.counters;
        TransportStats {
            dials: counters.dials.load(Ordering::Relaxed),
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
            closed: counters.closed.load(Ordering::Relaxed),
        }
    }

    /// Connections currently idle in the pool of `kind`
    pub fn idle_count(&self, kind: ConnKind) -> usize {
        self.inner.pool(kind).lock().len()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.manager.get_mut().is_some() {
            self.stop();
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("addr", &self.inner.addr)
            .field("expire", &self.inner.expire())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn upstream() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        (socket, addr)
    }

    #[test]
    fn test_conn_kind_from_proto() {
        assert_eq!(ConnKind::from_proto("udp"), ConnKind::Udp);
        assert_eq!(ConnKind::from_proto("tcp"), ConnKind::Tcp);
        assert_eq!(ConnKind::from_proto("tcp-tls"), ConnKind::TcpTls);
        assert_eq!(ConnKind::from_proto("sctp"), ConnKind::Udp);
        for kind in ConnKind::ALL.iter() {
            assert_eq!(ConnKind::from_proto(kind.as_str()), *kind);
        }
    }

    #[test]
    fn test_limit_timeout() {
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        assert_eq!(limit_timeout(Duration::from_millis(10), min, max), min);
        assert_eq!(limit_timeout(Duration::from_secs(2), min, max), Duration::from_secs(4));
        assert_eq!(limit_timeout(Duration::from_secs(15), min, max), max);
        assert_eq!(limit_timeout(Duration::from_secs(60), min, max), max);
    }

    #[test]
    fn test_moving_average() {
        let avg = duration_nanos(Duration::from_secs(15));
        let next = moving_average(avg, Duration::from_secs(3));
        assert_eq!(Duration::from_nanos(next), Duration::from_secs(12));
        assert_eq!(moving_average(0, Duration::ZERO), 0);
    }

    #[test]
    fn test_fast_dials_shrink_timeout() {
        let (_upstream, addr) = upstream();
        let tr = Transport::new(&addr);
        assert_eq!(tr.dial_timeout(), DEFAULT_MAX_DIAL_TIMEOUT);

        for _ in 0..32 {
            let (pc, _) = tr.dial(ConnKind::Udp).unwrap();
            drop(pc);
        }
        assert_eq!(tr.dial_timeout(), DEFAULT_MIN_DIAL_TIMEOUT);
    }

    #[test]
    fn test_cleanup_all_closes_pooled() {
        let (_upstream, addr) = upstream();
        let tr = Transport::new(&addr);

        let conns: Vec<PersistConn> = (0..3).map(|_| tr.dial(ConnKind::Udp).unwrap().0).collect();
        for pc in conns {
            tr.yield_conn(pc);
        }
        assert_eq!(tr.idle_count(ConnKind::Udp), 3);

        tr.inner.cleanup(true);
        assert_eq!(tr.idle_count(ConnKind::Udp), 0);
        assert_eq!(tr.stats().closed, 3);
    }

    #[test]
    fn test_stale_conn_goes_to_discard() {
        let (_upstream, addr) = upstream();
        let tr = Transport::new(&addr);
        tr.set_expire(Duration::from_millis(20));

        let (pc, _) = tr.dial(ConnKind::Udp).unwrap();
        let stale_id = pc.id();
        tr.yield_conn(pc);
        sleep(Duration::from_millis(40));

        let (pc, cached) = tr.dial(ConnKind::Udp).unwrap();
        assert!(!cached);
        assert_ne!(pc.id(), stale_id);
        assert_eq!(tr.inner.discard.lock().len(), 1);

        tr.inner.cleanup(false);
        assert!(tr.inner.discard.lock().is_empty());
        assert_eq!(tr.stats().closed, 1);
    }

    #[test]
    fn test_tls_without_config_is_config_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let tr = Transport::new(&listener.local_addr().unwrap().to_string());
        let err = tr.dial(ConnKind::TcpTls).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unresolvable_upstream() {
        let tr = Transport::new("no-port-here");
        let err = tr.dial(ConnKind::Udp).unwrap_err();
        assert_eq!(err.network_kind(), Some(NetworkErrorKind::AddressUnresolved));
    }

    #[test]
    fn test_set_dial_timeouts() {
        let tr = Transport::new("127.0.0.1:53");
        tr.set_dial_timeouts(Duration::from_secs(2), Duration::from_secs(4));
        // initial average is 15s, above max/2
        assert_eq!(tr.dial_timeout(), Duration::from_secs(4));
    }

    #[test]
    fn test_start_is_idempotent() {
        let tr = Transport::new("127.0.0.1:53");
        tr.start().unwrap();
        tr.start().unwrap();
        assert!(tr.is_running());
        tr.stop();
        assert!(!tr.is_running());
        tr.stop();
    }
}
