//! Packet ingestion.
//!
//! ## Architecture
//!
//! ```text
//! pcap file → PcapFile → CapturedPacket → parser → TcpPacketView → engine
//! ```
//!
//! The reassembly core consumes [`parser::TcpPacketView`]; where the packets
//! come from is this module's business. `parser` is always available;
//! `pcap_reader` needs the `pcap` feature.

pub mod parser;

#[cfg(feature = "pcap")]
pub mod pcap_reader;

pub use parser::{parse_ethernet_frame, TcpFlags, TcpPacketView};

#[cfg(feature = "pcap")]
pub use pcap_reader::{CapturedPacket, PcapFile};
