use crate::http::dns::resolve;
use crate::http::stream::MaybeTlsStream;
use crate::trace::{NoopTrace, RequestTrace};
use anyhow::{anyhow, Context};
use hyper::Uri;
use rustls::ClientConfig;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

/// Dials origin servers, reporting DNS, TCP and TLS stages to the trace of
/// the request that asked for the connection.
#[derive(Clone)]
pub struct TracingConnector {
    tls_config: Arc<ClientConfig>,
    nodelay: bool,
    connect_timeout: Option<Duration>,
    connect_events: bool,
}

impl TracingConnector {
    pub fn new(tls_config: Arc<ClientConfig>) -> TracingConnector {
        TracingConnector {
            tls_config,
            nodelay: true,
            connect_timeout: None,
            connect_events: true,
        }
    }

    pub fn set_nodelay(&mut self, nodelay: bool) {
        self.nodelay = nodelay;
    }

    pub fn set_connect_timeout(&mut self, connect_timeout: Option<Duration>) {
        self.connect_timeout = connect_timeout;
    }

    /// With events off, the connector dials silently and the trace only hears
    /// about the request once it has been written.
    pub fn set_connect_events(&mut self, connect_events: bool) {
        self.connect_events = connect_events;
    }

    pub async fn connect(
        &self,
        dst: &Uri,
        trace: &dyn RequestTrace,
    ) -> Result<MaybeTlsStream, anyhow::Error> {
        let trace: &dyn RequestTrace = if self.connect_events {
            trace
        } else {
            &NoopTrace
        };

        let host = dst.host().ok_or(anyhow!("Invalid Host in {}", dst))?;
        let is_https = dst.scheme_str() == Some("https");
        let port = dst
            .port_u16()
            .unwrap_or_else(|| if is_https { 443 } else { 80 });

        let addrs = resolve(host, port, trace)
            .await
            .with_context(|| format!("Failed to resolve {}", host))?;
        let tcp = self.dial(&addrs, trace).await?;
        tcp.set_nodelay(self.nodelay)?;

        if !is_https {
            return Ok(MaybeTlsStream::Plain(tcp));
        }

        let bare_host = host.trim_start_matches('[').trim_end_matches(']');
        let server_name = pki_types::ServerName::try_from(bare_host)
            .map_err(|e| anyhow!("invalid dnsname: {}", e))?
            .to_owned();
        let connector = TlsConnector::from(self.tls_config.clone());

        trace.tls_handshake_start();
        let tls = connector.connect(server_name, tcp).await;
        trace.tls_handshake_done();
        let tls = tls.with_context(|| format!("TLS handshake with {} failed", host))?;

        let (_, session) = tls.get_ref();
        debug!(
            "TLS established: {:?}, {:?}",
            session.protocol_version(),
            session.negotiated_cipher_suite().map(|s| s.suite())
        );
        Ok(MaybeTlsStream::Tls(Box::new(tls)))
    }

    /// Tries each address in order and keeps the first that connects.
    async fn dial(
        &self,
        addrs: &[SocketAddr],
        trace: &dyn RequestTrace,
    ) -> Result<TcpStream, anyhow::Error> {
        let mut last_err = None;
        for addr in addrs {
            trace.connect_start(*addr);
            let attempt = match self.connect_timeout {
                Some(limit) => timeout(limit, TcpStream::connect(addr))
                    .await
                    .unwrap_or_else(|_| {
                        Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("connect timed out after {:?}", limit),
                        ))
                    }),
                None => TcpStream::connect(addr).await,
            };
            match attempt {
                Ok(stream) => {
                    trace.connect_done(*addr);
                    debug!("Connected to {}", addr);
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(anyhow::Error::new(e).context("Failed to connect")),
            None => Err(anyhow!("Did not resolve an address")),
        }
    }
}
