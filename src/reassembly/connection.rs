//! Connection and per-direction state.
//!
//! A connection has two sides, indexed 0 and 1; side 0 is whichever
//! direction was seen first. Each side tracks the endpoint that defines it,
//! the next sequence number due for delivery, and the out-of-order segments
//! buffered while a gap is open.

use std::net::IpAddr;

use serde::Serialize;

use crate::reassembly::flow::FlowKey;

/// Metadata for one TCP connection, as exposed to callbacks and
/// introspection. `src_*` is the endpoint of the first packet seen.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionData {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub flow_key: FlowKey,
    /// Capture timestamp of the first packet, microseconds.
    pub start_time_us: u64,
    /// Capture timestamp of the latest packet seen (wall clock for a manual
    /// close), microseconds. Zero until any packet after the first arrives.
    pub end_time_us: u64,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionEndReason {
    /// A FIN or RST terminated the conversation.
    FinRst,
    /// `close_connection` / `close_all_connections` was called.
    Manual,
}

/// An out-of-order segment waiting for the gap before it to fill.
#[derive(Debug)]
pub(crate) struct TcpFragment {
    pub sequence: u32,
    pub data: Vec<u8>,
}

impl TcpFragment {
    pub(crate) fn end_seq(&self) -> u32 {
        self.sequence.wrapping_add(self.data.len() as u32)
    }
}

/// One direction of a connection.
#[derive(Debug, Default)]
pub(crate) struct SideState {
    /// Endpoint that defines this direction. `None` until a packet from it
    /// is seen.
    pub src_ip: Option<IpAddr>,
    pub src_port: u16,
    /// Next sequence number due for delivery. `None` until the first
    /// SYN or data-bearing packet on this side.
    pub expected_seq: Option<u32>,
    /// Buffered out-of-order segments, in arrival order.
    pub fragments: Vec<TcpFragment>,
    pub got_fin_or_rst: bool,
}

impl SideState {
    pub(crate) fn owns(&self, ip: IpAddr, port: u16) -> bool {
        self.src_ip == Some(ip) && self.src_port == port
    }
}

/// Full reassembly state for one connection.
#[derive(Debug)]
pub(crate) struct ConnectionState {
    pub sides: [SideState; 2],
    pub num_sides_seen: usize,
    /// Side whose data was most recently delivered. A change of side flushes
    /// the previous side's pending fragments.
    pub prev_side: Option<usize>,
    pub meta: ConnectionData,
}

impl ConnectionState {
    pub(crate) fn new(meta: ConnectionData) -> Self {
        Self {
            sides: [SideState::default(), SideState::default()],
            num_sides_seen: 0,
            prev_side: None,
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_fragment_end_seq_wraps() {
        let f = TcpFragment {
            sequence: 0xFFFF_FFFE,
            data: vec![0; 4],
        };
        assert_eq!(f.end_seq(), 2);
    }

    #[test]
    fn test_side_identity() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let side = SideState {
            src_ip: Some(ip),
            src_port: 4000,
            ..SideState::default()
        };
        assert!(side.owns(ip, 4000));
        assert!(!side.owns(ip, 4001));
        assert!(!SideState::default().owns(ip, 4000));
    }
}
