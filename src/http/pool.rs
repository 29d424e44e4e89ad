use crate::http::stream::TraceSlot;
use bytes::Bytes;
use http_body_util::Full;
use hyper::client::conn::http1::SendRequest;
use hyper::Uri;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// One HTTP/1.1 connection: the request handle plus the slot its I/O
/// reports lifecycle events through.
pub struct PooledConn {
    pub sender: SendRequest<Full<Bytes>>,
    pub slot: TraceSlot,
}

struct Idle {
    conn: PooledConn,
    since: Instant,
}

impl Idle {
    fn usable(&self, now: Instant, timeout: Option<Duration>) -> bool {
        if self.conn.sender.is_closed() {
            return false;
        }
        match timeout {
            Some(limit) => now.saturating_duration_since(self.since) < limit,
            None => true,
        }
    }
}

type IdleMap = HashMap<String, Vec<Idle>>;

/// Idle keep-alive connections, keyed by scheme, host and port.
///
/// Connections idle for longer than `idle_timeout`, or closed by the peer,
/// are dropped whenever the pool is touched. Hosts with nothing left idle are
/// removed from the map.
#[derive(Clone)]
pub struct Pool {
    idle: Arc<Mutex<IdleMap>>,
    max_idle_per_host: usize,
    idle_timeout: Option<Duration>,
}

impl Pool {
    pub fn new(max_idle_per_host: usize, idle_timeout: Option<Duration>) -> Self {
        Self {
            idle: Arc::new(Mutex::new(HashMap::new())),
            max_idle_per_host,
            idle_timeout,
        }
    }

    pub fn key(uri: &Uri) -> String {
        let scheme = uri.scheme_str().unwrap_or("http");
        let port = uri
            .port_u16()
            .unwrap_or(if scheme == "https" { 443 } else { 80 });
        format!("{}://{}:{}", scheme, uri.host().unwrap_or_default(), port)
    }

    fn lock(&self) -> MutexGuard<'_, IdleMap> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn prune(&self, idle: &mut IdleMap, now: Instant) {
        let timeout = self.idle_timeout;
        idle.retain(|key, conns| {
            let before = conns.len();
            conns.retain(|c| c.usable(now, timeout));
            if conns.len() < before {
                debug!(
                    "Dropped {} stale idle connection(s) for {}",
                    before - conns.len(),
                    key
                );
            }
            !conns.is_empty()
        });
    }

    /// Most recently returned connection for `key` that is still open and
    /// within the idle timeout.
    pub fn checkout(&self, key: &str) -> Option<PooledConn> {
        let mut idle = self.lock();
        self.prune(&mut idle, Instant::now());
        let conns = idle.get_mut(key)?;
        let conn = conns.pop().map(|c| c.conn);
        if conns.is_empty() {
            idle.remove(key);
        }
        conn
    }

    pub fn checkin(&self, key: String, conn: PooledConn) {
        if self.max_idle_per_host == 0 || conn.sender.is_closed() {
            return;
        }
        conn.slot.disarm();
        let now = Instant::now();
        let mut idle = self.lock();
        self.prune(&mut idle, now);
        let conns = idle.entry(key).or_default();
        if conns.len() >= self.max_idle_per_host {
            debug!("Idle pool full, closing connection");
            return;
        }
        conns.push(Idle { conn, since: now });
    }

    pub fn idle_count(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, Vec::len)
    }
}
