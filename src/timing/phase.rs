use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// The ten named durations a tracker reports.
///
/// The first five are per-phase durations, the last five are timeline
/// durations measured from the start of name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    DnsLookup,
    TcpConnection,
    TlsHandshake,
    ServerProcessing,
    ContentTransfer,
    NameLookup,
    Connect,
    Pretransfer,
    StartTransfer,
    Total,
}

impl Phase {
    pub const ALL: [Phase; 10] = [
        Phase::DnsLookup,
        Phase::TcpConnection,
        Phase::TlsHandshake,
        Phase::ServerProcessing,
        Phase::ContentTransfer,
        Phase::NameLookup,
        Phase::Connect,
        Phase::Pretransfer,
        Phase::StartTransfer,
        Phase::Total,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::DnsLookup => "DNSLookup",
            Phase::TcpConnection => "TCPConnection",
            Phase::TlsHandshake => "TLSHandshake",
            Phase::ServerProcessing => "ServerProcessing",
            Phase::ContentTransfer => "ContentTransfer",
            Phase::NameLookup => "NameLookup",
            Phase::Connect => "Connect",
            Phase::Pretransfer => "Pretransfer",
            Phase::StartTransfer => "StartTransfer",
            Phase::Total => "Total",
        }
    }

    /// Whether this is a cumulative duration rather than a single stage.
    pub fn is_timeline(&self) -> bool {
        matches!(
            self,
            Phase::NameLookup
                | Phase::Connect
                | Phase::Pretransfer
                | Phase::StartTransfer
                | Phase::Total
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Point-in-time copy of every named duration. Unset values are zero.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Durations {
    pub dns_lookup: Duration,
    pub tcp_connection: Duration,
    pub tls_handshake: Duration,
    pub server_processing: Duration,
    pub content_transfer: Duration,

    pub name_lookup: Duration,
    pub connect: Duration,
    pub pretransfer: Duration,
    pub start_transfer: Duration,
    pub total: Duration,
}

impl Durations {
    pub fn get(&self, phase: Phase) -> Duration {
        match phase {
            Phase::DnsLookup => self.dns_lookup,
            Phase::TcpConnection => self.tcp_connection,
            Phase::TlsHandshake => self.tls_handshake,
            Phase::ServerProcessing => self.server_processing,
            Phase::ContentTransfer => self.content_transfer,
            Phase::NameLookup => self.name_lookup,
            Phase::Connect => self.connect,
            Phase::Pretransfer => self.pretransfer,
            Phase::StartTransfer => self.start_transfer,
            Phase::Total => self.total,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Phase, Duration)> + '_ {
        Phase::ALL.iter().map(move |p| (*p, self.get(*p)))
    }

    pub fn to_map(&self) -> BTreeMap<&'static str, Duration> {
        self.iter().map(|(p, d)| (p.name(), d)).collect()
    }

    /// Sum of the five per-phase durations.
    pub fn phase_sum(&self) -> Duration {
        self.iter()
            .filter(|(p, _)| !p.is_timeline())
            .map(|(_, d)| d)
            .sum()
    }
}

impl Serialize for Durations {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Phase::ALL.len()))?;
        for (phase, d) in self.iter() {
            map.serialize_entry(phase.name(), &(d.as_nanos() as f64 / 1_000_000.0))?;
        }
        map.end()
    }
}
