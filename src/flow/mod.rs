// Flow records and fingerprinting.
//
// A sampled frame collapses into a canonical fingerprint over its link,
// network and transport identifiers; repeated observations of the same
// fingerprint accumulate into one record.

pub mod pipeline;
pub mod table;

use std::fmt;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::sflow::decode::FrameSummary;

/// Seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Transport-layer protocol of a sampled frame.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
            Self::Icmp => write!(f, "ICMP"),
        }
    }
}

/// Canonical flow fingerprint.
///
/// Stable across re-observations of the same flow: two frames with equal
/// link-layer endpoints, addresses, protocol and ports collapse to one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FlowKey(String);

impl FlowKey {
    pub fn from_frame(frame: &FrameSummary) -> Self {
        FlowKey(format!(
            "{}/{}/{:04x}/{}/{}/{}/{}/{}",
            format_mac(&frame.src_mac),
            format_mac(&frame.dst_mac),
            frame.ethertype,
            frame.src_ip,
            frame.dst_ip,
            frame.protocol,
            frame.src_port,
            frame.dst_port,
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkLayer {
    pub src_mac: String,
    pub dst_mac: String,
    pub ethertype: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkLayer {
    pub src: IpAddr,
    pub dst: IpAddr,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransportLayer {
    pub protocol: Protocol,
    pub src_port: u16,
    pub dst_port: u16,
}

/// One aggregated flow: created on the first observation of its key,
/// mutated by later ones, and handed to the expire callback exactly once
/// when it leaves the table.
#[derive(Debug, Clone, Serialize)]
pub struct FlowRecord {
    pub key: FlowKey,
    /// Topological provenance of the capture point (e.g. `host/br0`);
    /// empty while path resolution is still pending.
    pub probe_graph_path: String,
    pub link: LinkLayer,
    pub network: NetworkLayer,
    pub transport: TransportLayer,
    pub bytes: u64,
    pub packets: u64,
    pub first_seen: i64,
    pub last_seen: i64,
}

impl FlowRecord {
    pub fn from_frame(frame: &FrameSummary, probe_graph_path: &str, now: i64) -> Self {
        Self {
            key: FlowKey::from_frame(frame),
            probe_graph_path: probe_graph_path.to_string(),
            link: LinkLayer {
                src_mac: format_mac(&frame.src_mac),
                dst_mac: format_mac(&frame.dst_mac),
                ethertype: frame.ethertype,
            },
            network: NetworkLayer {
                src: frame.src_ip,
                dst: frame.dst_ip,
            },
            transport: TransportLayer {
                protocol: frame.protocol,
                src_port: frame.src_port,
                dst_port: frame.dst_port,
            },
            bytes: frame.frame_length as u64,
            packets: 1,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Fold another observation of the same flow into this record.
    pub fn update(&mut self, frame: &FrameSummary, now: i64) {
        self.bytes += frame.frame_length as u64;
        self.packets += 1;
        self.last_seen = now;
    }
}

/// Resolves a sample's ingress interface index to a probe graph path.
///
/// `None` means unresolved (cache miss or resolution still in flight); the
/// caller stamps the empty path and the next sample retries.
pub trait FlowPathResolver: Send + Sync {
    fn probe_path(&self, if_index: u32) -> Option<String>;
}

/// Resolver that never yields a path. Used by standalone listeners that run
/// without a topology graph.
pub struct EmptyPathResolver;

impl FlowPathResolver for EmptyPathResolver {
    fn probe_path(&self, _if_index: u32) -> Option<String> {
        None
    }
}
