// sFlow version 5 datagram decoding.
//
// Consumes flow samples (plain and expanded) carrying raw-packet-header
// records; counter samples and unrecognized record types are skipped by
// length. The embedded frame is parsed Ethernet -> IPv4/IPv6 -> TCP/UDP to
// feed flow fingerprinting. Anything malformed or unsupported decodes to
// `None` at its own layer and is dropped there.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::flow::Protocol;

pub const MAX_DATAGRAM_SIZE: usize = 1500;

const SFLOW_VERSION: u32 = 5;

// Agent address types
const ADDR_TYPE_IPV4: u32 = 1;
const ADDR_TYPE_IPV6: u32 = 2;

// Sample formats (enterprise 0)
const SAMPLE_FLOW: u32 = 1;
const SAMPLE_FLOW_EXPANDED: u32 = 3;

// Flow record formats (enterprise 0)
const RECORD_RAW_PACKET_HEADER: u32 = 1;

// Raw packet header protocols
const HEADER_PROTO_ETHERNET: u32 = 1;

// Ethernet
const ETH_HLEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;

// IPv4
const IPV4_MIN_HLEN: usize = 20;
const IPV4_PROTO_OFFSET: usize = 9;
const IPV4_FLAGS_FRAG_OFFSET: usize = 6;
const IPV4_SRC_OFFSET: usize = 12;
const IPV4_DST_OFFSET: usize = 16;

// IPv6
const IPV6_HLEN: usize = 40;
const IPV6_NEXT_HDR_OFFSET: usize = 6;
const IPV6_SRC_OFFSET: usize = 8;
const IPV6_DST_OFFSET: usize = 24;

// L4 protocol numbers
const PROTO_ICMP: u8 = 1;
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;
const PROTO_ICMPV6: u8 = 58;

// IPv6 extension header protocol numbers
const EXT_HOP_BY_HOP: u8 = 0;
const EXT_ROUTING: u8 = 43;
const EXT_FRAGMENT: u8 = 44;
const EXT_DEST_OPTIONS: u8 = 60;

// ---------------------------------------------------------------------------
// Decoded structures
// ---------------------------------------------------------------------------

/// One decoded sFlow datagram.
#[derive(Debug)]
pub struct SflowDatagram {
    pub agent_addr: IpAddr,
    pub sub_agent_id: u32,
    pub sequence: u32,
    pub uptime_ms: u32,
    pub samples: Vec<FlowSample>,
}

/// One flow sample: sampling parameters plus the frames it captured.
#[derive(Debug)]
pub struct FlowSample {
    pub sampling_rate: u32,
    pub input_ifindex: u32,
    pub output_ifindex: u32,
    pub frames: Vec<FrameSummary>,
}

/// Summarized headers of one sampled frame.
#[derive(Debug, Clone)]
pub struct FrameSummary {
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    pub ethertype: u16,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub protocol: Protocol,
    pub src_port: u16,
    pub dst_port: u16,
    /// Length of the original frame on the wire, not of the captured header.
    pub frame_length: u32,
}

// ---------------------------------------------------------------------------
// Byte cursor
// ---------------------------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn u32(&mut self) -> Option<u32> {
        let bytes = self.bytes(4)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        if end > self.data.len() {
            return None;
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Some(out)
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.bytes(n).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Datagram decoding
// ---------------------------------------------------------------------------

/// Decode a UDP payload as an sFlow v5 datagram.
///
/// Returns `None` when the payload is not a well-formed version-5 datagram.
/// Individual samples or records that are unsupported are skipped without
/// failing the whole datagram.
pub fn decode_datagram(data: &[u8]) -> Option<SflowDatagram> {
    let mut r = Reader::new(data);

    if r.u32()? != SFLOW_VERSION {
        return None;
    }

    let agent_addr = match r.u32()? {
        ADDR_TYPE_IPV4 => {
            let b = r.bytes(4)?;
            IpAddr::V4(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
        }
        ADDR_TYPE_IPV6 => {
            let b: [u8; 16] = r.bytes(16)?.try_into().ok()?;
            IpAddr::V6(Ipv6Addr::from(b))
        }
        _ => return None,
    };

    let sub_agent_id = r.u32()?;
    let sequence = r.u32()?;
    let uptime_ms = r.u32()?;
    let sample_count = r.u32()?;

    let mut samples = Vec::new();
    for _ in 0..sample_count {
        let format = r.u32()?;
        let length = r.u32()? as usize;
        let payload = r.bytes(length)?;

        match format {
            SAMPLE_FLOW => {
                if let Some(sample) = decode_flow_sample(payload, false) {
                    samples.push(sample);
                }
            }
            SAMPLE_FLOW_EXPANDED => {
                if let Some(sample) = decode_flow_sample(payload, true) {
                    samples.push(sample);
                }
            }
            // Counter samples and vendor extensions: skipped by length.
            _ => {}
        }
    }

    Some(SflowDatagram {
        agent_addr,
        sub_agent_id,
        sequence,
        uptime_ms,
        samples,
    })
}

fn decode_flow_sample(data: &[u8], expanded: bool) -> Option<FlowSample> {
    let mut r = Reader::new(data);

    r.skip(4)?; // sequence number
    if expanded {
        r.skip(8)?; // source id type + index
    } else {
        r.skip(4)?; // packed source id
    }
    let sampling_rate = r.u32()?;
    r.skip(8)?; // sample pool + drops
    let (input_ifindex, output_ifindex) = if expanded {
        r.skip(4)?; // input format
        let input = r.u32()?;
        r.skip(4)?; // output format
        let output = r.u32()?;
        (input, output)
    } else {
        (r.u32()?, r.u32()?)
    };
    let record_count = r.u32()?;

    let mut frames = Vec::new();
    for _ in 0..record_count {
        let format = r.u32()?;
        let length = r.u32()? as usize;
        let payload = r.bytes(length)?;

        if format == RECORD_RAW_PACKET_HEADER {
            if let Some(frame) = decode_raw_packet_header(payload) {
                frames.push(frame);
            }
        }
    }

    Some(FlowSample {
        sampling_rate,
        input_ifindex,
        output_ifindex,
        frames,
    })
}

fn decode_raw_packet_header(data: &[u8]) -> Option<FrameSummary> {
    let mut r = Reader::new(data);

    if r.u32()? != HEADER_PROTO_ETHERNET {
        return None;
    }
    let frame_length = r.u32()?;
    r.skip(4)?; // stripped
    let header_length = r.u32()? as usize;
    let header = r.bytes(header_length)?;

    parse_ethernet_frame(header, frame_length)
}

// ---------------------------------------------------------------------------
// Embedded frame parsing
// ---------------------------------------------------------------------------

/// Parse the captured Ethernet header slice of a sampled frame.
///
/// Returns `None` when the frame is:
/// - Too short (truncated at any layer)
/// - Not IPv4 or IPv6 after at most one 802.1Q tag
/// - A non-first IPv4 fragment
/// - Using an unsupported transport protocol
pub fn parse_ethernet_frame(data: &[u8], frame_length: u32) -> Option<FrameSummary> {
    if data.len() < ETH_HLEN {
        return None;
    }
    let dst_mac: [u8; 6] = data[0..6].try_into().ok()?;
    let src_mac: [u8; 6] = data[6..12].try_into().ok()?;
    let mut ethertype = u16::from_be_bytes([data[12], data[13]]);
    let mut l3 = &data[ETH_HLEN..];

    if ethertype == ETHERTYPE_VLAN {
        if l3.len() < 4 {
            return None;
        }
        ethertype = u16::from_be_bytes([l3[2], l3[3]]);
        l3 = &l3[4..];
    }

    let (src_ip, dst_ip, proto_byte, l4) = match ethertype {
        ETHERTYPE_IPV4 => parse_ipv4(l3)?,
        ETHERTYPE_IPV6 => parse_ipv6(l3)?,
        _ => return None,
    };

    let (protocol, src_port, dst_port) = parse_l4(proto_byte, l4)?;

    Some(FrameSummary {
        src_mac,
        dst_mac,
        ethertype,
        src_ip,
        dst_ip,
        protocol,
        src_port,
        dst_port,
        frame_length,
    })
}

fn parse_ipv4(data: &[u8]) -> Option<(IpAddr, IpAddr, u8, &[u8])> {
    if data.len() < IPV4_MIN_HLEN {
        return None;
    }
    let ihl = ((data[0] & 0x0F) as usize) * 4;
    if ihl < IPV4_MIN_HLEN || data.len() < ihl {
        return None;
    }

    // Non-first fragments carry no L4 header.
    let flags_frag = u16::from_be_bytes([
        data[IPV4_FLAGS_FRAG_OFFSET],
        data[IPV4_FLAGS_FRAG_OFFSET + 1],
    ]);
    if (flags_frag & 0x1FFF) != 0 {
        return None;
    }

    let src = IpAddr::V4(Ipv4Addr::new(
        data[IPV4_SRC_OFFSET],
        data[IPV4_SRC_OFFSET + 1],
        data[IPV4_SRC_OFFSET + 2],
        data[IPV4_SRC_OFFSET + 3],
    ));
    let dst = IpAddr::V4(Ipv4Addr::new(
        data[IPV4_DST_OFFSET],
        data[IPV4_DST_OFFSET + 1],
        data[IPV4_DST_OFFSET + 2],
        data[IPV4_DST_OFFSET + 3],
    ));

    Some((src, dst, data[IPV4_PROTO_OFFSET], &data[ihl..]))
}

fn parse_ipv6(data: &[u8]) -> Option<(IpAddr, IpAddr, u8, &[u8])> {
    if data.len() < IPV6_HLEN {
        return None;
    }
    let next_hdr = data[IPV6_NEXT_HDR_OFFSET];

    let src_bytes: [u8; 16] = data[IPV6_SRC_OFFSET..IPV6_SRC_OFFSET + 16].try_into().ok()?;
    let dst_bytes: [u8; 16] = data[IPV6_DST_OFFSET..IPV6_DST_OFFSET + 16].try_into().ok()?;

    let after_fixed = &data[IPV6_HLEN..];
    let (proto, offset) = skip_ipv6_extension_headers(next_hdr, after_fixed);

    Some((
        IpAddr::V6(Ipv6Addr::from(src_bytes)),
        IpAddr::V6(Ipv6Addr::from(dst_bytes)),
        proto,
        &after_fixed[offset..],
    ))
}

/// Skip IPv6 extension headers, returning `(final_next_hdr, offset)` into
/// the slice following the fixed header.
fn skip_ipv6_extension_headers(mut next_hdr: u8, data: &[u8]) -> (u8, usize) {
    let mut offset = 0;
    loop {
        match next_hdr {
            EXT_HOP_BY_HOP | EXT_ROUTING | EXT_DEST_OPTIONS => {
                if offset + 2 > data.len() {
                    return (next_hdr, offset);
                }
                let total_len = (data[offset + 1] as usize + 1) * 8;
                if offset + total_len > data.len() {
                    return (next_hdr, offset);
                }
                next_hdr = data[offset];
                offset += total_len;
            }
            EXT_FRAGMENT => {
                if offset + 8 > data.len() {
                    return (next_hdr, offset);
                }
                next_hdr = data[offset];
                offset += 8;
            }
            _ => return (next_hdr, offset),
        }
    }
}

fn parse_l4(proto_byte: u8, l4: &[u8]) -> Option<(Protocol, u16, u16)> {
    match proto_byte {
        PROTO_TCP | PROTO_UDP => {
            if l4.len() < 4 {
                return None;
            }
            let src_port = u16::from_be_bytes([l4[0], l4[1]]);
            let dst_port = u16::from_be_bytes([l4[2], l4[3]]);
            let protocol = if proto_byte == PROTO_TCP {
                Protocol::Tcp
            } else {
                Protocol::Udp
            };
            Some((protocol, src_port, dst_port))
        }
        PROTO_ICMP | PROTO_ICMPV6 => Some((Protocol::Icmp, 0, 0)),
        _ => None,
    }
}

// ===========================================================================
// Unit tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // DatagramBuilder — helper for constructing raw sFlow v5 test datagrams
    // -----------------------------------------------------------------------

    pub struct SampleSpec {
        pub sampling_rate: u32,
        pub input_ifindex: u32,
        pub frames: Vec<Vec<u8>>,
        pub frame_length: u32,
        pub expanded: bool,
    }

    pub struct DatagramBuilder {
        version: u32,
        sequence: u32,
        samples: Vec<SampleSpec>,
        raw_samples: Vec<(u32, Vec<u8>)>,
    }

    impl DatagramBuilder {
        pub fn new() -> Self {
            Self {
                version: SFLOW_VERSION,
                sequence: 1,
                samples: Vec::new(),
                raw_samples: Vec::new(),
            }
        }

        pub fn version(mut self, v: u32) -> Self {
            self.version = v;
            self
        }

        pub fn sample(mut self, spec: SampleSpec) -> Self {
            self.samples.push(spec);
            self
        }

        /// Append an opaque sample with an arbitrary format tag.
        pub fn raw_sample(mut self, format: u32, payload: Vec<u8>) -> Self {
            self.raw_samples.push((format, payload));
            self
        }

        pub fn build(&self) -> Vec<u8> {
            let mut out = Vec::new();
            out.extend_from_slice(&self.version.to_be_bytes());
            out.extend_from_slice(&ADDR_TYPE_IPV4.to_be_bytes());
            out.extend_from_slice(&[127, 0, 0, 1]);
            out.extend_from_slice(&0u32.to_be_bytes()); // sub agent id
            out.extend_from_slice(&self.sequence.to_be_bytes());
            out.extend_from_slice(&1000u32.to_be_bytes()); // uptime
            let count = (self.samples.len() + self.raw_samples.len()) as u32;
            out.extend_from_slice(&count.to_be_bytes());

            for spec in &self.samples {
                let payload = Self::build_flow_sample(spec);
                let format = if spec.expanded {
                    SAMPLE_FLOW_EXPANDED
                } else {
                    SAMPLE_FLOW
                };
                out.extend_from_slice(&format.to_be_bytes());
                out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                out.extend_from_slice(&payload);
            }

            for (format, payload) in &self.raw_samples {
                out.extend_from_slice(&format.to_be_bytes());
                out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                out.extend_from_slice(payload);
            }

            out
        }

        fn build_flow_sample(spec: &SampleSpec) -> Vec<u8> {
            let mut s = Vec::new();
            s.extend_from_slice(&7u32.to_be_bytes()); // sequence
            if spec.expanded {
                s.extend_from_slice(&0u32.to_be_bytes()); // source id type
                s.extend_from_slice(&3u32.to_be_bytes()); // source id index
            } else {
                s.extend_from_slice(&3u32.to_be_bytes()); // packed source id
            }
            s.extend_from_slice(&spec.sampling_rate.to_be_bytes());
            s.extend_from_slice(&100u32.to_be_bytes()); // sample pool
            s.extend_from_slice(&0u32.to_be_bytes()); // drops
            if spec.expanded {
                s.extend_from_slice(&0u32.to_be_bytes()); // input format
                s.extend_from_slice(&spec.input_ifindex.to_be_bytes());
                s.extend_from_slice(&0u32.to_be_bytes()); // output format
                s.extend_from_slice(&0u32.to_be_bytes());
            } else {
                s.extend_from_slice(&spec.input_ifindex.to_be_bytes());
                s.extend_from_slice(&0u32.to_be_bytes()); // output
            }
            s.extend_from_slice(&(spec.frames.len() as u32).to_be_bytes());

            for frame in &spec.frames {
                let mut rec = Vec::new();
                rec.extend_from_slice(&HEADER_PROTO_ETHERNET.to_be_bytes());
                rec.extend_from_slice(&spec.frame_length.to_be_bytes());
                rec.extend_from_slice(&4u32.to_be_bytes()); // stripped
                rec.extend_from_slice(&(frame.len() as u32).to_be_bytes());
                rec.extend_from_slice(frame);
                while rec.len() % 4 != 0 {
                    rec.push(0);
                }

                s.extend_from_slice(&RECORD_RAW_PACKET_HEADER.to_be_bytes());
                s.extend_from_slice(&(rec.len() as u32).to_be_bytes());
                s.extend_from_slice(&rec);
            }

            s
        }
    }

    /// Minimal Ethernet+IPv4+TCP header capture.
    pub fn tcp_frame(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16) -> Vec<u8> {
        let mut f = Vec::new();
        f.extend_from_slice(&[0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB]); // dst mac
        f.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]); // src mac
        f.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        // IPv4 header, no options
        f.push(0x45);
        f.push(0x00);
        f.extend_from_slice(&40u16.to_be_bytes()); // total length
        f.extend_from_slice(&0u16.to_be_bytes()); // identification
        f.extend_from_slice(&0u16.to_be_bytes()); // flags + frag
        f.push(64); // ttl
        f.push(PROTO_TCP);
        f.extend_from_slice(&0u16.to_be_bytes()); // checksum
        f.extend_from_slice(&src);
        f.extend_from_slice(&dst);
        // TCP header
        f.extend_from_slice(&sport.to_be_bytes());
        f.extend_from_slice(&dport.to_be_bytes());
        f.extend_from_slice(&0u32.to_be_bytes()); // seq
        f.extend_from_slice(&0u32.to_be_bytes()); // ack
        f.push(0x50);
        f.push(0x02);
        f.extend_from_slice(&65535u16.to_be_bytes());
        f.extend_from_slice(&0u16.to_be_bytes());
        f.extend_from_slice(&0u16.to_be_bytes());
        f
    }

    #[test]
    fn decodes_single_ipv4_tcp_sample() {
        let data = DatagramBuilder::new()
            .sample(SampleSpec {
                sampling_rate: 1,
                input_ifindex: 5,
                frames: vec![tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 1234, 80)],
                frame_length: 1500,
                expanded: false,
            })
            .build();

        let dgram = decode_datagram(&data).unwrap();
        assert_eq!(dgram.agent_addr, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(dgram.samples.len(), 1);

        let sample = &dgram.samples[0];
        assert_eq!(sample.sampling_rate, 1);
        assert_eq!(sample.input_ifindex, 5);
        assert_eq!(sample.frames.len(), 1);

        let frame = &sample.frames[0];
        assert_eq!(frame.src_ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(frame.dst_ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(frame.protocol, Protocol::Tcp);
        assert_eq!(frame.src_port, 1234);
        assert_eq!(frame.dst_port, 80);
        assert_eq!(frame.frame_length, 1500);
        assert_eq!(frame.src_mac, [0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    }

    #[test]
    fn decodes_expanded_flow_sample() {
        let data = DatagramBuilder::new()
            .sample(SampleSpec {
                sampling_rate: 64,
                input_ifindex: 9,
                frames: vec![tcp_frame([192, 168, 0, 1], [192, 168, 0, 2], 2000, 22)],
                frame_length: 900,
                expanded: true,
            })
            .build();

        let dgram = decode_datagram(&data).unwrap();
        assert_eq!(dgram.samples.len(), 1);
        assert_eq!(dgram.samples[0].sampling_rate, 64);
        assert_eq!(dgram.samples[0].input_ifindex, 9);
        assert_eq!(dgram.samples[0].frames[0].dst_port, 22);
    }

    #[test]
    fn counter_samples_are_skipped() {
        let data = DatagramBuilder::new()
            .raw_sample(2, vec![0u8; 32]) // counter sample
            .sample(SampleSpec {
                sampling_rate: 1,
                input_ifindex: 5,
                frames: vec![tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 2)],
                frame_length: 64,
                expanded: false,
            })
            .build();

        let dgram = decode_datagram(&data).unwrap();
        assert_eq!(dgram.samples.len(), 1);
    }

    #[test]
    fn rejects_wrong_version() {
        let data = DatagramBuilder::new().version(4).build();
        assert!(decode_datagram(&data).is_none());
    }

    #[test]
    fn rejects_truncated_datagram() {
        let data = DatagramBuilder::new()
            .sample(SampleSpec {
                sampling_rate: 1,
                input_ifindex: 5,
                frames: vec![tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 2)],
                frame_length: 64,
                expanded: false,
            })
            .build();
        assert!(decode_datagram(&data[..data.len() - 6]).is_none());
    }

    #[test]
    fn non_ip_frame_dropped_sample_kept() {
        let mut arp = vec![0u8; 40];
        arp[12] = 0x08;
        arp[13] = 0x06; // ARP ethertype

        let data = DatagramBuilder::new()
            .sample(SampleSpec {
                sampling_rate: 1,
                input_ifindex: 5,
                frames: vec![arp],
                frame_length: 60,
                expanded: false,
            })
            .build();

        let dgram = decode_datagram(&data).unwrap();
        assert_eq!(dgram.samples.len(), 1);
        assert!(dgram.samples[0].frames.is_empty());
    }

    #[test]
    fn vlan_tagged_frame_parses() {
        let inner = tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 443, 50000);
        // Re-frame with an 802.1Q tag between the MACs and the EtherType.
        let mut tagged = Vec::new();
        tagged.extend_from_slice(&inner[0..12]);
        tagged.extend_from_slice(&ETHERTYPE_VLAN.to_be_bytes());
        tagged.extend_from_slice(&100u16.to_be_bytes()); // VID
        tagged.extend_from_slice(&inner[12..]);

        let frame = parse_ethernet_frame(&tagged, 1000).unwrap();
        assert_eq!(frame.ethertype, ETHERTYPE_IPV4);
        assert_eq!(frame.src_port, 443);
    }

    #[test]
    fn ipv4_fragment_dropped() {
        let mut frag = tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 2);
        // fragment offset 185 at IP bytes 6-7 (after the 14-byte Ethernet header)
        frag[ETH_HLEN + IPV4_FLAGS_FRAG_OFFSET] = 0x00;
        frag[ETH_HLEN + IPV4_FLAGS_FRAG_OFFSET + 1] = 185;
        assert!(parse_ethernet_frame(&frag, 100).is_none());
    }

    #[test]
    fn ipv6_udp_with_hop_by_hop() {
        let mut f = Vec::new();
        f.extend_from_slice(&[0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB]);
        f.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        f.extend_from_slice(&ETHERTYPE_IPV6.to_be_bytes());
        // Fixed IPv6 header
        f.extend_from_slice(&[0x60, 0, 0, 0]);
        f.extend_from_slice(&16u16.to_be_bytes()); // payload length
        f.push(EXT_HOP_BY_HOP);
        f.push(64); // hop limit
        f.extend_from_slice(&Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1).octets());
        f.extend_from_slice(&Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 2).octets());
        // Hop-by-hop: next header UDP, length 0 -> 8 bytes total
        let mut ext = vec![0u8; 8];
        ext[0] = PROTO_UDP;
        f.extend_from_slice(&ext);
        // UDP header
        f.extend_from_slice(&5353u16.to_be_bytes());
        f.extend_from_slice(&5353u16.to_be_bytes());
        f.extend_from_slice(&8u16.to_be_bytes());
        f.extend_from_slice(&0u16.to_be_bytes());

        let frame = parse_ethernet_frame(&f, 200).unwrap();
        assert_eq!(frame.protocol, Protocol::Udp);
        assert_eq!(frame.src_port, 5353);
    }
}
