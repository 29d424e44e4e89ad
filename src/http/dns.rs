use crate::trace::RequestTrace;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

/// Resolves `host` into dialable addresses, reporting the lookup to `trace`.
///
/// IP literals (bracketed IPv6 included) are returned as-is without firing
/// any DNS event.
pub async fn resolve(
    host: &str,
    port: u16,
    trace: &dyn RequestTrace,
) -> Result<Vec<SocketAddr>, io::Error> {
    if let Some(ip) = parse_ip_literal(host) {
        debug!("Skipping DNS for IP literal: {}", ip);
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    debug!("Resolving DNS for: {}", host);
    trace.dns_start(host);

    let name = host.to_string();
    let resolved = tokio::task::spawn_blocking(move || (name.as_str(), port).to_socket_addrs())
        .await
        .map_err(io::Error::other)
        .and_then(|r| r);

    let addresses: Vec<SocketAddr> = match resolved {
        Ok(addrs) => addrs.collect(),
        Err(e) => {
            trace.dns_done(&[]);
            return Err(e);
        }
    };
    trace.dns_done(&addresses);

    if addresses.is_empty() {
        error!("DNS resolution for {} returned no addresses.", host);
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("No IP addresses found for host {}", host),
        ));
    }

    for (i, addr) in addresses.iter().enumerate() {
        if i == 0 {
            debug!("Resolved IP: {}", addr.ip());
        } else {
            debug!("Resolved IP (alternative): {}", addr.ip());
        }
    }

    Ok(addresses)
}

fn parse_ip_literal(host: &str) -> Option<IpAddr> {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .ok()
}
