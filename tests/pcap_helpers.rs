#![allow(dead_code)]
//! Helpers for programmatically generating test pcap files. Used by the
//! reassembly integration tests.
//!
//! The generated captures are minimal but structurally valid:
//!   Global header + N×(Record header + Ethernet + IPv4 + TCP + payload).

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

// ── pcap global header (24 bytes) ──

const PCAP_MAGIC: u32 = 0xa1b2_c3d4; // microsecond resolution
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
const PCAP_SNAPLEN: u32 = 65535;
const PCAP_LINKTYPE_ETHERNET: u32 = 1;

pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_ACK: u8 = 0x10;

pub const CLIENT: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const SERVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
pub const CLIENT_PORT: u16 = 50000;
pub const SERVER_PORT: u16 = 8080;

fn pcap_global_header() -> Vec<u8> {
    let mut h = Vec::new();
    h.extend_from_slice(&PCAP_MAGIC.to_le_bytes());
    h.extend_from_slice(&PCAP_VERSION_MAJOR.to_le_bytes());
    h.extend_from_slice(&PCAP_VERSION_MINOR.to_le_bytes());
    h.extend_from_slice(&0i32.to_le_bytes()); // thiszone
    h.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
    h.extend_from_slice(&PCAP_SNAPLEN.to_le_bytes());
    h.extend_from_slice(&PCAP_LINKTYPE_ETHERNET.to_le_bytes());
    h
}

fn pcap_record_header(ts_us: u64, len: u32) -> Vec<u8> {
    let mut h = Vec::new();
    h.extend_from_slice(&((ts_us / 1_000_000) as u32).to_le_bytes());
    h.extend_from_slice(&((ts_us % 1_000_000) as u32).to_le_bytes());
    h.extend_from_slice(&len.to_le_bytes()); // incl_len
    h.extend_from_slice(&len.to_le_bytes()); // orig_len
    h
}

/// Write `frames` (capture timestamp in microseconds, link-layer bytes) as a
/// legacy pcap file.
pub fn write_pcap(path: &Path, frames: &[(u64, Vec<u8>)]) {
    let mut bytes = pcap_global_header();
    for (ts_us, frame) in frames {
        bytes.extend_from_slice(&pcap_record_header(*ts_us, frame.len() as u32));
        bytes.extend_from_slice(frame);
    }
    std::fs::write(path, bytes).expect("write pcap fixture");
}

/// Per-test fixtures directory under the system temp dir.
pub fn fixtures_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("restitch_tests").join(name);
    let _ = std::fs::create_dir_all(&dir);
    dir
}

// ── Ethernet + IPv4 + TCP frame builder ──

pub fn build_eth_ipv4_tcp(
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    seq: u32,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut pkt = Vec::new();

    // Ethernet (14 bytes)
    pkt.extend_from_slice(&[0u8; 6]); // dst MAC
    pkt.extend_from_slice(&[0u8; 6]); // src MAC
    pkt.extend_from_slice(&0x0800u16.to_be_bytes());

    // IPv4 (20 bytes)
    let total_len = (20 + 20 + payload.len()) as u16;
    pkt.push(0x45); // version=4, IHL=5
    pkt.push(0);
    pkt.extend_from_slice(&total_len.to_be_bytes());
    pkt.extend_from_slice(&[0; 4]); // id, flags, frag
    pkt.push(64); // TTL
    pkt.push(6); // TCP
    pkt.extend_from_slice(&[0; 2]); // checksum
    pkt.extend_from_slice(&src_ip.octets());
    pkt.extend_from_slice(&dst_ip.octets());

    // TCP (20 bytes)
    pkt.extend_from_slice(&src_port.to_be_bytes());
    pkt.extend_from_slice(&dst_port.to_be_bytes());
    pkt.extend_from_slice(&seq.to_be_bytes());
    pkt.extend_from_slice(&0u32.to_be_bytes()); // ack
    pkt.push(0x50); // data offset = 5 words
    pkt.push(flags);
    pkt.extend_from_slice(&8192u16.to_be_bytes()); // window
    pkt.extend_from_slice(&[0; 2]); // checksum
    pkt.extend_from_slice(&[0; 2]); // urgent

    pkt.extend_from_slice(payload);
    pkt
}

/// Frame from the well-known client to the well-known server.
pub fn client_frame(seq: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
    build_eth_ipv4_tcp(CLIENT, SERVER, CLIENT_PORT, SERVER_PORT, seq, flags, payload)
}

/// Frame from the well-known server back to the client.
pub fn server_frame(seq: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
    build_eth_ipv4_tcp(SERVER, CLIENT, SERVER_PORT, CLIENT_PORT, seq, flags, payload)
}

// ── ready-made captures ──

/// A capture with a global header and no packets.
pub fn generate_empty_pcap(dir: &Path) -> PathBuf {
    let path = dir.join("empty.pcap");
    write_pcap(&path, &[]);
    path
}

/// A complete request/response exchange: handshake SYNs, one request, one
/// response, FINs from both sides.
pub fn generate_exchange_pcap(dir: &Path) -> PathBuf {
    let path = dir.join("exchange.pcap");
    let request: &[u8] = b"GET /status HTTP/1.1\r\n\r\n";
    let response: &[u8] = b"HTTP/1.1 200 OK\r\n\r\nok";
    write_pcap(
        &path,
        &[
            (1_000, client_frame(100, TCP_SYN, b"")),
            (2_000, server_frame(700, TCP_SYN | TCP_ACK, b"")),
            (3_000, client_frame(101, TCP_ACK, request)),
            (4_000, server_frame(701, TCP_ACK, response)),
            (
                5_000,
                client_frame(101 + request.len() as u32, TCP_FIN | TCP_ACK, b""),
            ),
            (
                6_000,
                server_frame(701 + response.len() as u32, TCP_FIN | TCP_ACK, b""),
            ),
        ],
    );
    path
}
