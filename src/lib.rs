//! restitch — TCP stream reassembly for captured traffic.
//!
//! Feed the engine captured TCP/IP packets in arrival order (both
//! directions, possibly with loss, duplication, or reordering) and it
//! demultiplexes them into connections, reconstructs each direction's byte
//! stream, and hands the bytes to your [`StreamSink`] in strict
//! sequence-number order. Higher-level analyzers (HTTP, TLS, FTP, ...) build
//! on top of these callbacks.
//!
//! ```no_run
//! use restitch::{ConnectionData, StreamSink, TcpReassembly};
//!
//! #[derive(Default)]
//! struct Printer;
//!
//! impl StreamSink for Printer {
//!     fn on_message_ready(&mut self, side: usize, data: &[u8], conn: &ConnectionData) {
//!         println!("{}:{} side {side}: {} bytes", conn.src_ip, conn.src_port, data.len());
//!     }
//! }
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut engine = TcpReassembly::new(Printer);
//! let file = restitch::capture::PcapFile::open("capture.pcap")?;
//! for packet in file.packets()? {
//!     let packet = packet?;
//!     engine.process_ethernet(&packet.data, packet.timestamp_us);
//! }
//! engine.close_all_connections();
//! # Ok(())
//! # }
//! ```
//!
//! The engine is single-threaded and does no I/O of its own; gaps that never
//! fill are surfaced exactly once as literal `[N bytes missing]` payloads.

pub mod capture;
pub mod observability;
pub mod reassembly;

pub use capture::{parse_ethernet_frame, TcpFlags, TcpPacketView};
pub use reassembly::{
    flow_key_for, ConnectionData, ConnectionEndReason, ConnectionStatus, FlowKey,
    ReassemblyConfig, StreamSink, TcpReassembly,
};
