use httpstat::{Durations, Phase};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Outcome of one traced exchange, as printed by the binary.
#[derive(Debug, Serialize)]
pub struct Report {
    pub url: String,
    pub status: u16,
    pub version: String,
    pub body_bytes: u64,
    pub tls: bool,
    pub reused: bool,
    pub durations: Durations,
}

fn label(phase: Phase) -> &'static str {
    match phase {
        Phase::DnsLookup => "DNS lookup",
        Phase::TcpConnection => "TCP connection",
        Phase::TlsHandshake => "TLS handshake",
        Phase::ServerProcessing => "Server processing",
        Phase::ContentTransfer => "Content transfer",
        Phase::NameLookup => "namelookup",
        Phase::Connect => "connect",
        Phase::Pretransfer => "pretransfer",
        Phase::StartTransfer => "starttransfer",
        Phase::Total => "total",
    }
}

fn fmt_ms(d: Duration) -> String {
    format!("{:.3} ms", d.as_secs_f64() * 1000.0)
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.version, self.status, self.url)?;
        if self.reused {
            write!(f, " (connection reused)")?;
        }
        writeln!(f)?;
        writeln!(f, "  Body: {} bytes", self.body_bytes)?;

        writeln!(f, "\nTime breakdown:")?;
        for (phase, d) in self.durations.iter().filter(|(p, _)| !p.is_timeline()) {
            if phase == Phase::TlsHandshake && !self.tls && !self.reused {
                writeln!(f, "  {:<18} {:>12}", format!("{}:", label(phase)), "N/A")?;
                continue;
            }
            writeln!(f, "  {:<18} {:>12}", format!("{}:", label(phase)), fmt_ms(d))?;
        }

        writeln!(f, "\nTimeline:")?;
        for (phase, d) in self.durations.iter().filter(|(p, _)| p.is_timeline()) {
            writeln!(f, "  {:<18} {:>12}", format!("{}:", label(phase)), fmt_ms(d))?;
        }
        Ok(())
    }
}
