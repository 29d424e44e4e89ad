use crate::timing::clock::{Clock, SystemClock};
use crate::timing::phase::Durations;
use crate::trace::RequestTrace;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct State {
    dns_start: Option<Instant>,
    dns_done: Option<Instant>,
    tcp_start: Option<Instant>,
    tcp_done: Option<Instant>,
    tls_start: Option<Instant>,
    tls_done: Option<Instant>,
    server_start: Option<Instant>,
    server_done: Option<Instant>,
    transfer_start: Option<Instant>,
    transfer_done: Option<Instant>,

    is_tls: bool,
    is_reused: bool,

    durations: Durations,
}

/// `end - start`, defined only once both timestamps are known.
fn between(start: Option<Instant>, end: Option<Instant>) -> Option<Duration> {
    Some(end?.saturating_duration_since(start?))
}

fn assign(slot: &mut Duration, value: Option<Duration>) {
    if let Some(d) = value {
        *slot = d;
    }
}

/// Records the lifecycle timestamps of one outbound request and derives the
/// phase and timeline durations from them.
///
/// Every timeline duration is anchored at the start of name resolution.
/// Handlers normalize as they go, so connections that skip a stage (direct
/// IP dials, plaintext, keep-alive reuse, clients that report nothing before
/// the request is written) still produce zero-length, anchored phases rather
/// than gaps.
///
/// A tracker belongs to exactly one request. Attach it with
/// [`crate::trace::attach`], drain the response body, then call
/// [`PhaseTracker::finalize`].
#[derive(Debug)]
pub struct PhaseTracker {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the end of the exchange. Call after the response body has been
    /// fully consumed; content transfer time is not observable otherwise.
    ///
    /// A tracker that never saw an event keeps zero transfer and total times.
    pub fn finalize(&self, at: Instant) {
        let mut s = self.lock();
        s.transfer_done = Some(at);

        if s.dns_start.is_none() {
            trace!("finalized without any lifecycle event");
            return;
        }

        let content_transfer = between(s.transfer_start, s.transfer_done);
        let total = between(s.dns_start, s.transfer_done);
        assign(&mut s.durations.content_transfer, content_transfer);
        assign(&mut s.durations.total, total);
    }

    /// Time from the first response byte to `t`, regardless of whether the
    /// tracker has been finalized.
    pub fn content_transfer_since(&self, t: Instant) -> Duration {
        let s = self.lock();
        between(s.server_done, Some(t)).unwrap_or_default()
    }

    /// Time from the start of name resolution to `t`, regardless of whether
    /// the tracker has been finalized.
    pub fn total_since(&self, t: Instant) -> Duration {
        let s = self.lock();
        between(s.dns_start, Some(t)).unwrap_or_default()
    }

    pub fn snapshot(&self) -> Durations {
        self.lock().durations
    }

    pub fn is_tls(&self) -> bool {
        self.lock().is_tls
    }

    pub fn is_reused(&self) -> bool {
        self.lock().is_reused
    }
}

impl RequestTrace for PhaseTracker {
    fn dns_start(&self, host: &str) {
        let now = self.clock.now();
        let mut s = self.lock();
        s.dns_start = Some(now);
        trace!(host, "dns start");
    }

    fn dns_done(&self, addrs: &[SocketAddr]) {
        let now = self.clock.now();
        let mut s = self.lock();
        s.dns_done = Some(now);

        let lookup = between(s.dns_start, s.dns_done);
        assign(&mut s.durations.dns_lookup, lookup);
        assign(&mut s.durations.name_lookup, lookup);
        trace!(addrs = addrs.len(), "dns done");
    }

    fn connect_start(&self, addr: SocketAddr) {
        let now = self.clock.now();
        let mut s = self.lock();
        s.tcp_start = Some(now);

        // Dialing an IP literal skips resolution entirely.
        if s.dns_start.is_none() {
            s.dns_start = s.tcp_start;
            s.dns_done = s.tcp_start;
        }
        trace!(%addr, "connect start");
    }

    fn connect_done(&self, addr: SocketAddr) {
        let now = self.clock.now();
        let mut s = self.lock();
        s.tcp_done = Some(now);

        let tcp = between(s.tcp_start, s.tcp_done);
        let connect = between(s.dns_start, s.tcp_done);
        assign(&mut s.durations.tcp_connection, tcp);
        assign(&mut s.durations.connect, connect);
        trace!(%addr, "connect done");
    }

    fn tls_handshake_start(&self) {
        let now = self.clock.now();
        let mut s = self.lock();
        s.is_tls = true;
        s.tls_start = Some(now);
        trace!("tls handshake start");
    }

    fn tls_handshake_done(&self) {
        let now = self.clock.now();
        let mut s = self.lock();
        s.tls_done = Some(now);

        let tls = between(s.tls_start, s.tls_done);
        let pretransfer = between(s.dns_start, s.tls_done);
        assign(&mut s.durations.tls_handshake, tls);
        assign(&mut s.durations.pretransfer, pretransfer);
        trace!("tls handshake done");
    }

    fn got_conn(&self, reused: bool) {
        let mut s = self.lock();
        if reused {
            s.is_reused = true;
        }
        trace!(reused, "got connection");
    }

    fn wrote_request(&self) {
        let now = self.clock.now();
        let mut s = self.lock();
        s.server_start = Some(now);

        // Nothing was reported before the write: collapse DNS and TCP onto it.
        if s.dns_start.is_none() && s.tcp_start.is_none() {
            s.dns_start = s.server_start;
            s.dns_done = s.server_start;
            s.tcp_start = s.server_start;
            s.tcp_done = s.server_start;
        }

        // A pooled connection never resolved, dialed or handshook.
        if s.is_reused {
            s.dns_start = s.server_start;
            s.dns_done = s.server_start;
            s.tcp_start = s.server_start;
            s.tcp_done = s.server_start;
            s.tls_start = s.server_start;
            s.tls_done = s.server_start;
        }

        trace!(tls = s.is_tls, reused = s.is_reused, "wrote request");
        if s.is_tls {
            return;
        }

        let tls = between(s.tcp_done, s.tcp_done);
        assign(&mut s.durations.tls_handshake, tls);
        s.durations.pretransfer = s.durations.connect;
    }

    fn got_first_response_byte(&self) {
        let now = self.clock.now();
        let mut s = self.lock();
        s.server_done = Some(now);

        let server = between(s.server_start, s.server_done);
        let start_transfer = between(s.dns_start, s.server_done);
        assign(&mut s.durations.server_processing, server);
        assign(&mut s.durations.start_transfer, start_transfer);

        s.transfer_start = s.server_done;
        trace!("first response byte");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::clock::ManualClock;
    use crate::timing::phase::Phase;
    use std::thread;

    const MS: Duration = Duration::from_millis(1);

    fn tracker() -> (PhaseTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (PhaseTracker::with_clock(clock.clone()), clock)
    }

    fn addr() -> SocketAddr {
        "93.184.216.34:443".parse().unwrap()
    }

    /// dns 2ms, tcp 3ms, tls 5ms, server 7ms, transfer 11ms; no gaps.
    fn run_fresh_tls(t: &PhaseTracker, clock: &ManualClock) {
        t.dns_start("example.com");
        clock.advance(2 * MS);
        t.dns_done(&[addr()]);
        t.connect_start(addr());
        clock.advance(3 * MS);
        t.connect_done(addr());
        t.tls_handshake_start();
        clock.advance(5 * MS);
        t.tls_handshake_done();
        t.got_conn(false);
        t.wrote_request();
        clock.advance(7 * MS);
        t.got_first_response_byte();
        clock.advance(11 * MS);
        t.finalize(clock.now());
    }

    #[test]
    fn test_fresh_tls_exchange() {
        let (t, clock) = tracker();
        run_fresh_tls(&t, &clock);

        let d = t.snapshot();
        assert!(t.is_tls());
        assert!(!t.is_reused());
        assert_eq!(d.dns_lookup, 2 * MS);
        assert_eq!(d.tcp_connection, 3 * MS);
        assert_eq!(d.tls_handshake, 5 * MS);
        assert_eq!(d.server_processing, 7 * MS);
        assert_eq!(d.content_transfer, 11 * MS);

        assert_eq!(d.name_lookup, 2 * MS);
        assert_eq!(d.connect, 5 * MS);
        assert_eq!(d.pretransfer, 10 * MS);
        assert_eq!(d.start_transfer, 17 * MS);
        assert_eq!(d.total, 28 * MS);

        for (phase, value) in d.iter() {
            assert!(value > Duration::ZERO, "{phase} should be non-zero");
        }
        assert_eq!(d.total, d.phase_sum());
    }

    #[test]
    fn test_plaintext_exchange_has_no_tls_phase() {
        let (t, clock) = tracker();
        t.dns_start("example.com");
        clock.advance(2 * MS);
        t.dns_done(&[addr()]);
        t.connect_start(addr());
        clock.advance(3 * MS);
        t.connect_done(addr());
        t.got_conn(false);
        t.wrote_request();
        clock.advance(7 * MS);
        t.got_first_response_byte();
        clock.advance(11 * MS);
        t.finalize(clock.now());

        let d = t.snapshot();
        assert!(!t.is_tls());
        assert_eq!(d.tls_handshake, Duration::ZERO);
        assert_eq!(d.pretransfer, d.connect);
        assert_eq!(d.pretransfer, 5 * MS);
        for (phase, value) in d.iter().filter(|(p, _)| *p != Phase::TlsHandshake) {
            assert!(value > Duration::ZERO, "{phase} should be non-zero");
        }
        assert_eq!(d.total, d.phase_sum());
    }

    #[test]
    fn test_direct_ip_dial_anchors_at_connect_start() {
        let (t, clock) = tracker();
        clock.advance(4 * MS);
        t.connect_start(addr());
        clock.advance(3 * MS);
        t.connect_done(addr());
        t.wrote_request();
        clock.advance(2 * MS);
        t.got_first_response_byte();

        let d = t.snapshot();
        assert_eq!(d.dns_lookup, Duration::ZERO);
        assert_eq!(d.tcp_connection, 3 * MS);
        assert_eq!(d.connect, 3 * MS);
        assert_eq!(d.start_transfer, 5 * MS);
        assert_eq!(t.total_since(clock.now()), 5 * MS);
    }

    #[test]
    fn test_reused_connection_collapses_setup() {
        let (t, clock) = tracker();
        t.got_conn(true);
        clock.advance(MS);
        t.wrote_request();
        clock.advance(6 * MS);
        t.got_first_response_byte();
        clock.advance(4 * MS);
        t.finalize(clock.now());

        let d = t.snapshot();
        assert!(t.is_reused());
        assert_eq!(d.dns_lookup, Duration::ZERO);
        assert_eq!(d.tcp_connection, Duration::ZERO);
        assert_eq!(d.tls_handshake, Duration::ZERO);
        assert_eq!(d.server_processing, 6 * MS);
        assert_eq!(d.content_transfer, 4 * MS);
        assert_eq!(d.start_transfer, 6 * MS);
        assert_eq!(d.total, 10 * MS);
    }

    #[test]
    fn test_no_hooks_before_write_collapses_dns_and_tcp() {
        let (t, clock) = tracker();
        clock.advance(5 * MS);
        t.wrote_request();
        clock.advance(3 * MS);
        t.got_first_response_byte();
        clock.advance(2 * MS);
        t.finalize(clock.now());

        let d = t.snapshot();
        assert_eq!(d.dns_lookup, Duration::ZERO);
        assert_eq!(d.tcp_connection, Duration::ZERO);
        assert_eq!(d.tls_handshake, Duration::ZERO);
        assert_eq!(d.server_processing, 3 * MS);
        assert_eq!(d.start_transfer, 3 * MS);
        assert_eq!(d.total, 5 * MS);
    }

    #[test]
    fn test_finalize_without_events_keeps_zero() {
        let (t, clock) = tracker();
        clock.advance(50 * MS);
        t.finalize(clock.now());

        let d = t.snapshot();
        assert_eq!(d, Durations::default());
        assert_eq!(d.total, Duration::ZERO);
        assert_eq!(d.content_transfer, Duration::ZERO);
        assert_eq!(t.total_since(clock.now()), Duration::ZERO);
        assert_eq!(t.content_transfer_since(clock.now()), Duration::ZERO);
    }

    #[test]
    fn test_since_helpers_ignore_finalize() {
        let (t, clock) = tracker();
        run_fresh_tls(&t, &clock);
        let finalized = t.snapshot();

        clock.advance(9 * MS);
        let later = clock.now();
        assert_eq!(t.content_transfer_since(later), 20 * MS);
        assert_eq!(t.total_since(later), 37 * MS);
        assert_eq!(t.snapshot(), finalized);
    }

    #[test]
    fn test_since_helpers_saturate_for_earlier_instants() {
        let clock = Arc::new(ManualClock::new());
        let before = clock.now();
        let t = PhaseTracker::with_clock(clock.clone());
        clock.advance(MS);
        t.dns_start("example.com");
        assert_eq!(t.total_since(before), Duration::ZERO);
    }

    #[test]
    fn test_snapshot_mid_flight_is_consistent() {
        let (t, clock) = tracker();
        t.dns_start("example.com");
        clock.advance(2 * MS);
        t.dns_done(&[addr()]);
        t.connect_start(addr());
        clock.advance(3 * MS);

        let d = t.snapshot();
        assert_eq!(d.dns_lookup, 2 * MS);
        assert_eq!(d.tcp_connection, Duration::ZERO);
        assert_eq!(d.total, Duration::ZERO);

        t.connect_done(addr());
        assert_eq!(t.snapshot().connect, 5 * MS);
    }

    #[test]
    fn test_tls_handshake_start_without_done_keeps_tls_flag() {
        let (t, clock) = tracker();
        t.connect_start(addr());
        clock.advance(MS);
        t.connect_done(addr());
        t.tls_handshake_start();
        clock.advance(MS);

        assert!(t.is_tls());
        let d = t.snapshot();
        assert_eq!(d.tls_handshake, Duration::ZERO);
        assert_eq!(d.pretransfer, Duration::ZERO);
    }

    #[test]
    fn test_concurrent_dials_serialize() {
        let (t, clock) = tracker();
        t.dns_start("example.com");
        clock.advance(MS);
        t.dns_done(&[addr()]);

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        t.connect_start(addr());
                        t.connect_done(addr());
                        let d = t.snapshot();
                        assert!(d.connect >= d.tcp_connection);
                        assert_eq!(d.dns_lookup, MS);
                    }
                });
            }
        });

        assert_eq!(t.snapshot().tcp_connection, Duration::ZERO);
    }

    #[test]
    fn test_independent_trackers_do_not_share_state() {
        let a = PhaseTracker::new();
        let b = PhaseTracker::new();

        thread::scope(|scope| {
            scope.spawn(|| {
                a.connect_start(addr());
                a.connect_done(addr());
                a.tls_handshake_start();
                a.tls_handshake_done();
            });
            scope.spawn(|| {
                b.got_conn(true);
                b.wrote_request();
            });
        });

        assert!(a.is_tls());
        assert!(!a.is_reused());
        assert!(b.is_reused());
        assert!(!b.is_tls());
    }
}
