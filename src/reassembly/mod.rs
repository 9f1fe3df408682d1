//! TCP stream reassembly.
//!
//! ## Architecture
//!
//! ```text
//! TcpPacketView → TcpReassembly → StreamSink callbacks
//!                     │
//!                     ├─ flow:       direction-independent connection keys
//!                     ├─ seq:        wrapping sequence-space arithmetic
//!                     ├─ connection: per-connection / per-side state
//!                     └─ engine:     classification, flushing, lifecycle
//! ```
//!
//! Feed packets in arrival order through [`TcpReassembly::reassemble_packet`];
//! the engine demultiplexes them into connections and their two directional
//! half-streams and delivers each direction's bytes in sequence order through
//! the [`StreamSink`] callbacks.

pub mod connection;
pub mod engine;
pub mod flow;
pub mod seq;

pub use connection::{ConnectionData, ConnectionEndReason};
pub use engine::{ConnectionStatus, ReassemblyConfig, StreamSink, TcpReassembly};
pub use flow::{flow_key_for, FlowKey};
