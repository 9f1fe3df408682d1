//! Ethernet / IPv4 / IPv6 / TCP header parsing.
//!
//! Hand-rolled, bounds-checked extraction of the fields the reassembly
//! engine consumes. Anything that is not Ethernet carrying IPv4 or IPv6
//! carrying TCP parses to `None` and is dropped upstream.
//!
//! Reference: RFC 791 (IPv4), RFC 8200 (IPv6), RFC 793 (TCP).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const IPPROTO_TCP: u8 = 6;

const TCP_FLAG_FIN: u8 = 0x01;
const TCP_FLAG_SYN: u8 = 0x02;
const TCP_FLAG_RST: u8 = 0x04;

/// The TCP flags the reassembly engine reacts to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
}

impl TcpFlags {
    fn from_byte(flags: u8) -> Self {
        Self {
            syn: flags & TCP_FLAG_SYN != 0,
            fin: flags & TCP_FLAG_FIN != 0,
            rst: flags & TCP_FLAG_RST != 0,
        }
    }
}

/// A parsed view of one TCP packet. The payload borrows from the captured
/// frame; nothing is copied until the engine decides to buffer it.
#[derive(Debug, Clone)]
pub struct TcpPacketView<'a> {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub sequence: u32,
    pub flags: TcpFlags,
    pub payload: &'a [u8],
    /// Capture timestamp, microseconds.
    pub timestamp_us: u64,
}

/// Parse a raw Ethernet frame down to a TCP packet view. Returns `None` for
/// non-IP ethertypes, non-TCP protocols, and truncated headers at any layer.
pub fn parse_ethernet_frame(frame: &[u8], timestamp_us: u64) -> Option<TcpPacketView<'_>> {
    let (ethertype, ip_data) = parse_ethernet(frame)?;
    let (src_ip, dst_ip, proto, tcp_data) = match ethertype {
        ETHERTYPE_IPV4 => {
            let (src, dst, proto, rest) = parse_ipv4(ip_data)?;
            (IpAddr::V4(src), IpAddr::V4(dst), proto, rest)
        }
        ETHERTYPE_IPV6 => {
            let (src, dst, proto, rest) = parse_ipv6(ip_data)?;
            (IpAddr::V6(src), IpAddr::V6(dst), proto, rest)
        }
        _ => return None,
    };
    if proto != IPPROTO_TCP {
        return None;
    }
    let (header, payload) = parse_tcp(tcp_data)?;
    Some(TcpPacketView {
        src_ip,
        dst_ip,
        src_port: header.src_port,
        dst_port: header.dst_port,
        sequence: header.sequence,
        flags: header.flags,
        payload,
        timestamp_us,
    })
}

fn parse_ethernet(data: &[u8]) -> Option<(u16, &[u8])> {
    if data.len() < 14 {
        return None;
    }
    let ethertype = u16::from_be_bytes([data[12], data[13]]);
    Some((ethertype, &data[14..]))
}

fn parse_ipv4(data: &[u8]) -> Option<(Ipv4Addr, Ipv4Addr, u8, &[u8])> {
    if data.len() < 20 {
        return None;
    }
    if data[0] >> 4 != 4 {
        return None;
    }
    let header_len = (data[0] & 0x0F) as usize * 4;
    if header_len < 20 || data.len() < header_len {
        return None;
    }
    let protocol = data[9];
    let src = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let dst = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
    // Trim link-layer padding using the IP total length when it is sane.
    let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let end = if total_len >= header_len && total_len <= data.len() {
        total_len
    } else {
        data.len()
    };
    Some((src, dst, protocol, &data[header_len..end]))
}

fn parse_ipv6(data: &[u8]) -> Option<(Ipv6Addr, Ipv6Addr, u8, &[u8])> {
    if data.len() < 40 {
        return None;
    }
    if data[0] >> 4 != 6 {
        return None;
    }
    // No extension-header walking: a packet whose next header is not TCP is
    // dropped by the caller.
    let next_header = data[6];
    let src = Ipv6Addr::from(<[u8; 16]>::try_from(&data[8..24]).ok()?);
    let dst = Ipv6Addr::from(<[u8; 16]>::try_from(&data[24..40]).ok()?);
    Some((src, dst, next_header, &data[40..]))
}

struct TcpHeader {
    src_port: u16,
    dst_port: u16,
    sequence: u32,
    flags: TcpFlags,
}

fn parse_tcp(data: &[u8]) -> Option<(TcpHeader, &[u8])> {
    if data.len() < 20 {
        return None;
    }
    let src_port = u16::from_be_bytes([data[0], data[1]]);
    let dst_port = u16::from_be_bytes([data[2], data[3]]);
    let sequence = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let data_offset = ((data[12] >> 4) as usize) * 4;
    if data_offset < 20 || data.len() < data_offset {
        return None;
    }
    let flags = TcpFlags::from_byte(data[13]);
    Some((
        TcpHeader {
            src_port,
            dst_port,
            sequence,
            flags,
        },
        &data[data_offset..],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal Ethernet + IPv4 + TCP frame.
    fn build_frame(src: Ipv4Addr, dst: Ipv4Addr, seq: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut pkt = Vec::new();

        // Ethernet
        pkt.extend_from_slice(&[0u8; 6]);
        pkt.extend_from_slice(&[0u8; 6]);
        pkt.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

        // IPv4, IHL=5
        let total_len = (20 + 20 + payload.len()) as u16;
        pkt.push(0x45);
        pkt.push(0);
        pkt.extend_from_slice(&total_len.to_be_bytes());
        pkt.extend_from_slice(&[0; 4]);
        pkt.push(64);
        pkt.push(IPPROTO_TCP);
        pkt.extend_from_slice(&[0; 2]);
        pkt.extend_from_slice(&src.octets());
        pkt.extend_from_slice(&dst.octets());

        // TCP, data offset 5
        pkt.extend_from_slice(&40000u16.to_be_bytes());
        pkt.extend_from_slice(&80u16.to_be_bytes());
        pkt.extend_from_slice(&seq.to_be_bytes());
        pkt.extend_from_slice(&0u32.to_be_bytes());
        pkt.push(0x50);
        pkt.push(flags);
        pkt.extend_from_slice(&8192u16.to_be_bytes());
        pkt.extend_from_slice(&[0; 4]);

        pkt.extend_from_slice(payload);
        pkt
    }

    #[test]
    fn test_parse_ipv4_tcp_frame() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let frame = build_frame(src, dst, 1234, TCP_FLAG_SYN | TCP_FLAG_FIN, b"payload");

        let view = parse_ethernet_frame(&frame, 99).unwrap();
        assert_eq!(view.src_ip, IpAddr::V4(src));
        assert_eq!(view.dst_ip, IpAddr::V4(dst));
        assert_eq!(view.src_port, 40000);
        assert_eq!(view.dst_port, 80);
        assert_eq!(view.sequence, 1234);
        assert!(view.flags.syn);
        assert!(view.flags.fin);
        assert!(!view.flags.rst);
        assert_eq!(view.payload, b"payload");
        assert_eq!(view.timestamp_us, 99);
    }

    #[test]
    fn test_parse_ipv6_tcp_frame() {
        let src = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
        let dst = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 2);
        let payload = b"v6";

        let mut pkt = Vec::new();
        pkt.extend_from_slice(&[0u8; 12]);
        pkt.extend_from_slice(&ETHERTYPE_IPV6.to_be_bytes());
        // IPv6 fixed header
        pkt.push(0x60);
        pkt.extend_from_slice(&[0; 3]);
        pkt.extend_from_slice(&((20 + payload.len()) as u16).to_be_bytes());
        pkt.push(IPPROTO_TCP);
        pkt.push(64); // hop limit
        pkt.extend_from_slice(&src.octets());
        pkt.extend_from_slice(&dst.octets());
        // TCP
        pkt.extend_from_slice(&4000u16.to_be_bytes());
        pkt.extend_from_slice(&443u16.to_be_bytes());
        pkt.extend_from_slice(&7u32.to_be_bytes());
        pkt.extend_from_slice(&0u32.to_be_bytes());
        pkt.push(0x50);
        pkt.push(0);
        pkt.extend_from_slice(&[0; 6]);
        pkt.extend_from_slice(payload);

        let view = parse_ethernet_frame(&pkt, 0).unwrap();
        assert_eq!(view.src_ip, IpAddr::V6(src));
        assert_eq!(view.dst_port, 443);
        assert_eq!(view.payload, b"v6");
    }

    #[test]
    fn test_non_ip_frame_rejected() {
        let mut frame = vec![0u8; 14];
        frame[12] = 0x08;
        frame[13] = 0x06; // ARP
        assert!(parse_ethernet_frame(&frame, 0).is_none());
    }

    #[test]
    fn test_non_tcp_packet_rejected() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let mut frame = build_frame(src, dst, 0, 0, b"");
        frame[14 + 9] = 17; // UDP
        assert!(parse_ethernet_frame(&frame, 0).is_none());
    }

    #[test]
    fn test_truncated_frames_rejected() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let frame = build_frame(src, dst, 0, 0, b"data");
        // Every truncation point must parse to None, never panic.
        for len in 0..frame.len() - 4 {
            assert!(parse_ethernet_frame(&frame[..len], 0).is_none());
        }
    }

    #[test]
    fn test_ip_padding_trimmed() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let mut frame = build_frame(src, dst, 0, 0, b"abc");
        // Ethernet minimum-size padding past the IP total length.
        frame.extend_from_slice(&[0u8; 7]);
        let view = parse_ethernet_frame(&frame, 0).unwrap();
        assert_eq!(view.payload, b"abc");
    }
}
