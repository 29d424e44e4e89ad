use crate::http::body::TracedBody;
use crate::http::connector::TracingConnector;
use crate::http::pool::{Pool, PooledConn};
use crate::http::stream::{TraceSlot, TracedStream};
use crate::tls::build_client_config;
use crate::trace::{trace_of, RequestTrace};
use anyhow::{anyhow, Context};
use bytes::Bytes;
use http::header::{HeaderValue, CONNECTION, HOST};
use http_body_util::Full;
use hyper::client::conn::http1;
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Knobs for [`TracingClient`].
#[derive(Clone)]
pub struct ClientOptions {
    /// Keep connections open and reuse them for later requests.
    pub keep_alive: bool,
    pub max_idle_per_host: usize,
    /// How long an unused connection stays in the pool. `None` keeps it
    /// until the server closes it.
    pub idle_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub nodelay: bool,
    /// Report DNS, TCP and TLS events. Off behaves like a client without
    /// connection hooks: traces first hear about a request when it is written.
    pub connect_events: bool,
    /// Accept any server certificate.
    pub insecure: bool,
    /// PEM bundle to trust instead of the bundled webpki roots.
    pub ca_file: Option<PathBuf>,
    /// Use this rustls configuration as-is; `insecure` and `ca_file` are
    /// ignored when set.
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            keep_alive: true,
            max_idle_per_host: 8,
            idle_timeout: Some(Duration::from_secs(90)),
            connect_timeout: Some(Duration::from_secs(10)),
            nodelay: true,
            connect_events: true,
            insecure: false,
            ca_file: None,
            tls_config: None,
        }
    }
}

/// HTTP/1.1 client that reports every request's lifecycle to the trace
/// attached to it with [`crate::trace::attach`].
#[derive(Clone)]
pub struct TracingClient {
    connector: TracingConnector,
    pool: Pool,
    keep_alive: bool,
}

impl TracingClient {
    pub fn new(options: ClientOptions) -> Result<TracingClient, anyhow::Error> {
        let tls_config = match options.tls_config {
            Some(config) => config,
            None => Arc::new(build_client_config(
                options.ca_file.as_deref(),
                options.insecure,
            )?),
        };
        let mut connector = TracingConnector::new(tls_config);
        connector.set_nodelay(options.nodelay);
        connector.set_connect_timeout(options.connect_timeout);
        connector.set_connect_events(options.connect_events);

        let max_idle = if options.keep_alive {
            options.max_idle_per_host
        } else {
            0
        };
        Ok(TracingClient {
            connector,
            pool: Pool::new(max_idle, options.idle_timeout),
            keep_alive: options.keep_alive,
        })
    }

    /// Sends `req` and returns once the response head has arrived.
    ///
    /// The returned body must be read to the end (or dropped) before the
    /// connection can serve another request.
    pub async fn request(
        &self,
        mut req: Request<Full<Bytes>>,
    ) -> Result<Response<TracedBody>, anyhow::Error> {
        let trace = trace_of(&req);
        let uri = req.uri().clone();
        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => return Err(anyhow!("Unsupported scheme in the uri:{}.", uri)),
        }
        let key = Pool::key(&uri);
        self.to_origin_form(&mut req)?;

        let conn = self.connection_for(&uri, &key, trace.as_ref()).await?;

        debug!("> {} {} {:?}", req.method(), req.uri(), req.version());
        for (name, value) in req.headers() {
            debug!("> {}: {}", name, value.to_str().unwrap_or("<binary>"));
        }

        conn.slot.arm(trace);
        let mut sender = conn.sender;
        let res = match sender.send_request(req).await {
            Ok(res) => res,
            Err(e) => {
                conn.slot.disarm();
                return Err(anyhow::Error::new(e).context("Failed to execute request"));
            }
        };
        let conn = PooledConn {
            sender,
            slot: conn.slot,
        };

        debug!("< {:?} {}", res.version(), res.status());
        for (name, value) in res.headers() {
            debug!("< {}: {}", name, value.to_str().unwrap_or("<binary>"));
        }

        let (parts, incoming) = res.into_parts();
        let body = if self.keep_alive {
            TracedBody::pooled(incoming, self.pool.clone(), key, conn)
        } else {
            TracedBody::new(incoming)
        };
        Ok(Response::from_parts(parts, body))
    }

    pub fn idle_connections(&self, uri: &Uri) -> usize {
        self.pool.idle_count(&Pool::key(uri))
    }

    async fn connection_for(
        &self,
        uri: &Uri,
        key: &str,
        trace: &dyn RequestTrace,
    ) -> Result<PooledConn, anyhow::Error> {
        if self.keep_alive {
            while let Some(mut conn) = self.pool.checkout(key) {
                if conn.sender.ready().await.is_ok() {
                    debug!("Reusing connection to {}", key);
                    trace.got_conn(true);
                    return Ok(conn);
                }
                debug!("Pooled connection to {} closed while idle", key);
            }
        }

        let stream = self.connector.connect(uri, trace).await?;
        let local_addr = stream.tcp().local_addr()?;
        let remote_addr = stream.tcp().peer_addr()?;

        let slot = TraceSlot::new();
        let io = TokioIo::new(TracedStream::new(stream, slot.clone()));
        let (sender, conn) = http1::handshake(io)
            .await
            .context("HTTP/1.1 handshake failed")?;
        tokio::spawn(
            async move {
                if let Err(err) = conn.await {
                    debug!("Connection failed: {:?}", err);
                }
            }
            .instrument(info_span!(
                "httpstat",
                localAddr = %local_addr,
                remoteAddr = %remote_addr,
            )),
        );

        trace.got_conn(false);
        Ok(PooledConn { sender, slot })
    }

    /// Rewrites an absolute request target to origin-form, filling in `Host`.
    fn to_origin_form(&self, req: &mut Request<Full<Bytes>>) -> Result<(), anyhow::Error> {
        let uri = req.uri().clone();
        let host = uri.host().ok_or(anyhow!("no host in {}", uri))?;

        if !req.headers().contains_key(HOST) {
            let default_port = if uri.scheme_str() == Some("https") {
                443
            } else {
                80
            };
            let authority = match uri.port_u16() {
                Some(port) if port != default_port => format!("{}:{}", host, port),
                _ => host.to_string(),
            };
            req.headers_mut()
                .insert(HOST, HeaderValue::from_str(&authority)?);
        }
        if !self.keep_alive {
            req.headers_mut()
                .entry(CONNECTION)
                .or_insert(HeaderValue::from_static("close"));
        }

        let target = uri.path_and_query().map_or("/", |p| p.as_str());
        *req.uri_mut() = target.parse()?;
        Ok(())
    }
}
