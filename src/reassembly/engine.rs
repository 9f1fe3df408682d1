//! The reassembly engine.
//!
//! Packets go in, ordered byte streams come out. Each packet is classified
//! against the expected sequence number of its connection side:
//!
//! - fully seen → dropped as a retransmission,
//! - overlapping the seen prefix → trimmed and delivered,
//! - exactly expected → delivered, then the fragment store is drained,
//! - future → buffered until the gap before it fills.
//!
//! A gap that is still open when the other direction starts talking, or when
//! the connection ends, is surfaced once as a literal `[N bytes missing]`
//! payload so downstream parsers can resynchronize.
//!
//! Closed connections keep their metadata around for introspection until a
//! time-bucketed cleanup queue purges them, at most once per second and a
//! bounded number per pass.
//!
//! Reference: RFC 793 (TCP). The engine is not a TCP endpoint: it never
//! ACKs, never tracks windows, and accepts whatever the capture contains.

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::capture::parser::TcpPacketView;
use crate::reassembly::connection::{
    ConnectionData, ConnectionEndReason, ConnectionState, SideState, TcpFragment,
};
use crate::reassembly::flow::{flow_key_for, FlowKey};
use crate::reassembly::seq::{seq_diff, seq_gt, seq_le, seq_lt};

const DEFAULT_CLOSED_CONNECTION_DELAY_SECS: u64 = 5;
const DEFAULT_MAX_NUM_TO_CLEAN: u32 = 30;
const PURGE_FREQUENCY_SECS: u64 = 1;

/// Receives reassembly events. All methods default to no-ops so a sink only
/// implements what it cares about.
///
/// Callbacks run synchronously inside the engine call that triggered them
/// and must not re-enter the engine. Payload slices are borrowed for the
/// duration of the call.
pub trait StreamSink {
    /// A packet with a previously unseen flow key arrived.
    fn on_connection_start(&mut self, _conn: &ConnectionData) {}

    /// In-order bytes are ready on `side` (0 = first direction seen).
    /// Synthetic `[N bytes missing]` markers are delivered through the same
    /// path.
    fn on_message_ready(&mut self, _side: usize, _data: &[u8], _conn: &ConnectionData) {}

    /// The connection ended, by FIN/RST or manually. Fires after the last
    /// `on_message_ready` of the connection.
    fn on_connection_end(&mut self, _conn: &ConnectionData, _reason: ConnectionEndReason) {}
}

/// Cleanup behavior for closed connections.
#[derive(Debug, Clone)]
pub struct ReassemblyConfig {
    /// When false, closed-connection metadata is retained forever and the
    /// cleanup queue is never used.
    pub remove_conn_info: bool,
    /// Seconds between a connection closing and its metadata becoming
    /// purge-eligible. 0 selects the default of 5; the minimum is 1.
    pub closed_connection_delay: u64,
    /// Upper bound on entries removed per purge pass. 0 selects the default
    /// of 30.
    pub max_num_to_clean: u32,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            remove_conn_info: true,
            closed_connection_delay: DEFAULT_CLOSED_CONNECTION_DELAY_SECS,
            max_num_to_clean: DEFAULT_MAX_NUM_TO_CLEAN,
        }
    }
}

impl ReassemblyConfig {
    fn normalized(mut self) -> Self {
        if self.closed_connection_delay == 0 {
            self.closed_connection_delay = DEFAULT_CLOSED_CONNECTION_DELAY_SECS;
        }
        if self.max_num_to_clean == 0 {
            self.max_num_to_clean = DEFAULT_MAX_NUM_TO_CLEAN;
        }
        self
    }
}

/// Where a connection currently stands with this engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Actively tracked; packets still mutate its state.
    Open,
    /// Closed but its metadata has not been purged yet.
    Closed,
    /// Never seen, or already purged.
    Untracked,
}

/// Closed connections waiting out their retention delay, bucketed by the
/// wall-clock second they become purge-eligible.
#[derive(Debug, Default)]
struct CleanupQueue {
    buckets: BTreeMap<u64, Vec<FlowKey>>,
}

impl CleanupQueue {
    fn schedule(&mut self, flow_key: FlowKey, eligible_at: u64) {
        self.buckets.entry(eligible_at).or_default().push(flow_key);
    }

    /// Remove up to `max` elapsed keys from `info`, front bucket first,
    /// oldest key first. Returns the number of keys processed.
    fn purge(&mut self, now: u64, max: u32, info: &mut HashMap<FlowKey, ConnectionData>) -> u32 {
        let mut removed = 0;
        while removed < max {
            let Some((&when, _)) = self.buckets.first_key_value() else {
                break;
            };
            if when > now {
                break;
            }
            let Some(bucket) = self.buckets.get_mut(&when) else {
                break;
            };
            let take = ((max - removed) as usize).min(bucket.len());
            for key in bucket.drain(..take) {
                info.remove(&key);
                removed += 1;
            }
            if bucket.is_empty() {
                self.buckets.remove(&when);
            }
        }
        removed
    }
}

/// The TCP reassembly engine. See the module docs for the overall contract.
///
/// Single-threaded: every method takes `&mut self` and callbacks run on the
/// calling thread before the method returns.
pub struct TcpReassembly<S: StreamSink> {
    sink: S,
    config: ReassemblyConfig,
    connections: HashMap<FlowKey, ConnectionState>,
    connection_info: HashMap<FlowKey, ConnectionData>,
    cleanup: CleanupQueue,
    /// Next wall-clock second at which the automatic purge may run.
    purge_timepoint: u64,
}

impl<S: StreamSink> TcpReassembly<S> {
    pub fn new(sink: S) -> Self {
        Self::with_config(sink, ReassemblyConfig::default())
    }

    pub fn with_config(sink: S, config: ReassemblyConfig) -> Self {
        Self {
            sink,
            config: config.normalized(),
            connections: HashMap::new(),
            connection_info: HashMap::new(),
            cleanup: CleanupQueue::default(),
            purge_timepoint: now_secs() + PURGE_FREQUENCY_SECS,
        }
    }

    /// Feed one parsed TCP packet into the engine, firing whatever callbacks
    /// it triggers.
    pub fn reassemble_packet(&mut self, pkt: &TcpPacketView<'_>) {
        let flow_key = flow_key_for(pkt.src_ip, pkt.dst_ip, pkt.src_port, pkt.dst_port);

        if !self.connections.contains_key(&flow_key) {
            let meta = ConnectionData {
                src_ip: pkt.src_ip,
                dst_ip: pkt.dst_ip,
                src_port: pkt.src_port,
                dst_port: pkt.dst_port,
                flow_key,
                start_time_us: pkt.timestamp_us,
                end_time_us: 0,
            };
            tracing::debug!(flow_key, src = %pkt.src_ip, dst = %pkt.dst_ip, "new connection");
            // A reincarnated flow key overwrites the stale info entry.
            self.connection_info.insert(flow_key, meta.clone());
            self.sink.on_connection_start(&meta);
            self.connections.insert(flow_key, ConnectionState::new(meta));
        }

        let Some(state) = self.connections.get_mut(&flow_key) else {
            return;
        };
        state.meta.end_time_us = pkt.timestamp_us;

        let side_index = if state.num_sides_seen == 0 {
            state.sides[0].src_ip = Some(pkt.src_ip);
            state.sides[0].src_port = pkt.src_port;
            state.num_sides_seen = 1;
            0
        } else if state.sides[0].owns(pkt.src_ip, pkt.src_port) {
            0
        } else if state.num_sides_seen == 1 {
            state.sides[1].src_ip = Some(pkt.src_ip);
            state.sides[1].src_port = pkt.src_port;
            state.num_sides_seen = 2;
            1
        } else if state.sides[1].owns(pkt.src_ip, pkt.src_port) {
            1
        } else {
            // Flow-key collision: a third endpoint pair mapped to this key.
            tracing::error!(flow_key, "packet matches neither side of the connection, dropped");
            return;
        };

        let seq = pkt.sequence;
        let payload = pkt.payload;

        if payload.is_empty() {
            // A bare SYN pins the initial sequence; its flag consumes one
            // sequence number so data starts at seq + 1.
            if pkt.flags.syn && state.sides[side_index].expected_seq.is_none() {
                state.sides[side_index].expected_seq = Some(seq.wrapping_add(1));
            }
            if pkt.flags.fin || pkt.flags.rst {
                self.handle_fin_or_rst(flow_key, side_index, pkt.timestamp_us);
            }
            self.maybe_auto_purge();
            return;
        }

        // Mid-stream capture: the first data byte seen is the stream head.
        let expected = *state.sides[side_index].expected_seq.get_or_insert(seq);

        // Switching direction flushes the previous side so its trailing gap
        // is reported before the new side's bytes are delivered.
        if let Some(prev) = state.prev_side {
            if prev != side_index {
                Self::flush_pending(
                    &mut self.sink,
                    &state.meta,
                    prev,
                    &mut state.sides[prev],
                    false,
                );
            }
        }

        let end = seq.wrapping_add(payload.len() as u32);
        let side = &mut state.sides[side_index];
        if seq_le(end, expected) {
            tracing::debug!(flow_key, side = side_index, seq, "retransmission dropped");
        } else if seq_lt(seq, expected) {
            // Overlap from the left: the prefix up to `expected` was already
            // delivered.
            let offset = seq_diff(expected, seq) as usize;
            side.expected_seq = Some(end);
            self.sink
                .on_message_ready(side_index, &payload[offset..], &state.meta);
            Self::drain_fragments(&mut self.sink, &state.meta, side_index, side);
        } else if seq == expected {
            side.expected_seq = Some(end);
            self.sink.on_message_ready(side_index, payload, &state.meta);
            Self::drain_fragments(&mut self.sink, &state.meta, side_index, side);
        } else {
            debug_assert!(seq_gt(seq, expected));
            side.fragments.push(TcpFragment {
                sequence: seq,
                data: payload.to_vec(),
            });
        }

        state.prev_side = Some(side_index);

        if pkt.flags.fin || pkt.flags.rst {
            self.handle_fin_or_rst(flow_key, side_index, pkt.timestamp_us);
        }
        self.maybe_auto_purge();
    }

    /// Parse a raw Ethernet frame and feed it in. Frames that are not
    /// Ethernet + IPv4/IPv6 + TCP are silently ignored.
    pub fn process_ethernet(&mut self, frame: &[u8], timestamp_us: u64) {
        if let Some(pkt) = crate::capture::parser::parse_ethernet_frame(frame, timestamp_us) {
            self.reassemble_packet(&pkt);
        }
    }

    /// Manually close one connection. Unknown or already-closed keys are
    /// logged and ignored; no callback fires for them.
    pub fn close_connection(&mut self, flow_key: FlowKey) {
        if !self.connections.contains_key(&flow_key) {
            tracing::error!(flow_key, "cannot close: connection unknown or already closed");
            return;
        }
        self.close_internal(flow_key, ConnectionEndReason::Manual, now_micros());
    }

    /// Manually close every open connection.
    pub fn close_all_connections(&mut self) {
        let keys: Vec<FlowKey> = self.connections.keys().copied().collect();
        let now = now_micros();
        for flow_key in keys {
            self.close_internal(flow_key, ConnectionEndReason::Manual, now);
        }
    }

    /// Remove elapsed closed-connection metadata, at most `max` entries
    /// (0 = the configured cap). Returns the number removed.
    pub fn purge_closed_connections(&mut self, max: u32) -> u32 {
        let max = if max == 0 {
            self.config.max_num_to_clean
        } else {
            max
        };
        self.cleanup
            .purge(now_secs(), max, &mut self.connection_info)
    }

    /// Metadata for every connection this engine has seen and not yet
    /// purged, open and closed alike.
    pub fn connection_information(&self) -> &HashMap<FlowKey, ConnectionData> {
        &self.connection_info
    }

    /// Whether `conn` is open, closed-but-retained, or unknown here.
    pub fn is_connection_open(&self, conn: &ConnectionData) -> ConnectionStatus {
        if self.connections.contains_key(&conn.flow_key) {
            ConnectionStatus::Open
        } else if self.connection_info.contains_key(&conn.flow_key) {
            ConnectionStatus::Closed
        } else {
            ConnectionStatus::Untracked
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Consume the engine and return the sink. Open connections are
    /// discarded without firing `on_connection_end`.
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn handle_fin_or_rst(&mut self, flow_key: FlowKey, side_index: usize, end_time_us: u64) {
        let Some(state) = self.connections.get_mut(&flow_key) else {
            return;
        };
        if state.sides[side_index].got_fin_or_rst {
            return;
        }
        state.sides[side_index].got_fin_or_rst = true;
        // The connection ends once both directions are terminal; a direction
        // that was never seen counts as terminal.
        let other = 1 - side_index;
        if state.sides[other].got_fin_or_rst || state.num_sides_seen < 2 {
            self.close_internal(flow_key, ConnectionEndReason::FinRst, end_time_us);
        }
    }

    fn close_internal(&mut self, flow_key: FlowKey, reason: ConnectionEndReason, end_time_us: u64) {
        let Some(mut state) = self.connections.remove(&flow_key) else {
            return;
        };
        for side_index in 0..2 {
            Self::flush_pending(
                &mut self.sink,
                &state.meta,
                side_index,
                &mut state.sides[side_index],
                true,
            );
        }
        state.meta.end_time_us = end_time_us;
        tracing::debug!(flow_key, ?reason, "connection closed");
        self.connection_info.insert(flow_key, state.meta.clone());
        self.sink.on_connection_end(&state.meta, reason);
        if self.config.remove_conn_info {
            self.cleanup
                .schedule(flow_key, now_secs() + self.config.closed_connection_delay);
        }
    }

    /// Deliver every buffered fragment that now overlaps or abuts the
    /// expected sequence, restarting the scan after each delivery. Fragments
    /// that fell fully behind are discarded as retransmissions.
    fn drain_fragments(
        sink: &mut S,
        meta: &ConnectionData,
        side_index: usize,
        side: &mut SideState,
    ) {
        let Some(mut expected) = side.expected_seq else {
            return;
        };
        loop {
            let mut delivered = false;
            let mut i = 0;
            while i < side.fragments.len() {
                let end = side.fragments[i].end_seq();
                if seq_le(end, expected) {
                    side.fragments.remove(i);
                    continue;
                }
                if seq_le(side.fragments[i].sequence, expected) {
                    let fragment = side.fragments.remove(i);
                    let offset = seq_diff(expected, fragment.sequence) as usize;
                    expected = end;
                    side.expected_seq = Some(expected);
                    sink.on_message_ready(side_index, &fragment.data[offset..], meta);
                    delivered = true;
                    break;
                }
                i += 1;
            }
            if !delivered {
                return;
            }
        }
    }

    /// Flush buffered out-of-order data on `side`, declaring the gap before
    /// the closest future fragment as missing. One round per direction
    /// switch; the whole list when the connection is closing.
    fn flush_pending(
        sink: &mut S,
        meta: &ConnectionData,
        side_index: usize,
        side: &mut SideState,
        clean_whole: bool,
    ) {
        Self::drain_fragments(sink, meta, side_index, side);
        loop {
            if side.fragments.is_empty() {
                return;
            }
            let Some(expected) = side.expected_seq else {
                return;
            };

            // Closest future fragment by forward distance from expected.
            let mut closest: Option<(usize, u32)> = None;
            for (i, fragment) in side.fragments.iter().enumerate() {
                let distance = seq_diff(fragment.sequence, expected);
                if closest.map_or(true, |(_, best)| distance < best) {
                    closest = Some((i, distance));
                }
            }
            let Some((index, missing)) = closest else {
                return;
            };

            let fragment = side.fragments.remove(index);
            if missing > 0 {
                let marker = format!("[{missing} bytes missing]");
                sink.on_message_ready(side_index, marker.as_bytes(), meta);
            }
            side.expected_seq = Some(fragment.end_seq());
            sink.on_message_ready(side_index, &fragment.data, meta);
            Self::drain_fragments(sink, meta, side_index, side);

            if !clean_whole {
                return;
            }
        }
    }

    fn maybe_auto_purge(&mut self) {
        if !self.config.remove_conn_info {
            return;
        }
        let now = now_secs();
        if now >= self.purge_timepoint {
            self.purge_closed_connections(0);
            self.purge_timepoint = now + PURGE_FREQUENCY_SECS;
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
