use hyper::Request;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Lifecycle callbacks fired by the HTTP client while one request is in
/// flight. Every method may be called from any task or thread.
///
/// All methods default to doing nothing, so a sink only overrides the
/// events it cares about.
pub trait RequestTrace: Send + Sync {
    fn dns_start(&self, _host: &str) {}

    fn dns_done(&self, _addrs: &[SocketAddr]) {}

    /// Fired before each dial attempt.
    fn connect_start(&self, _addr: SocketAddr) {}

    /// Fired once a dial attempt has produced a connected socket.
    fn connect_done(&self, _addr: SocketAddr) {}

    fn tls_handshake_start(&self) {}

    fn tls_handshake_done(&self) {}

    /// A connection is ready for this request, fresh or from the idle pool.
    fn got_conn(&self, _reused: bool) {}

    /// The request head and body have been flushed to the connection.
    fn wrote_request(&self) {}

    fn got_first_response_byte(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrace;

impl RequestTrace for NoopTrace {}

/// Carrier for a trace inside `Request::extensions`.
#[derive(Clone)]
pub struct TraceHandle(pub Arc<dyn RequestTrace>);

impl fmt::Debug for TraceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("TraceHandle")
    }
}

/// Attach `trace` to `req` so the client reports this request's lifecycle
/// events to it. A previously attached trace is replaced.
pub fn attach<B, T>(req: &mut Request<B>, trace: Arc<T>)
where
    T: RequestTrace + 'static,
{
    req.extensions_mut().insert(TraceHandle(trace));
}

/// The trace attached to `req`, or a no-op sink.
pub fn trace_of<B>(req: &Request<B>) -> Arc<dyn RequestTrace> {
    match req.extensions().get::<TraceHandle>() {
        Some(handle) => handle.0.clone(),
        None => Arc::new(NoopTrace),
    }
}
