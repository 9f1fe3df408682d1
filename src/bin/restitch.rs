use std::collections::HashMap;
use std::fs::File;
use std::io::Write as _;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use restitch::capture::PcapFile;
use restitch::{ConnectionData, ConnectionEndReason, FlowKey, StreamSink, TcpReassembly};

#[derive(Parser, Debug)]
#[command(name = "restitch", version, about = "restitch – TCP stream reassembly from pcap captures")]
struct Cli {
    /// Use JSON logs
    #[arg(long, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reassemble every TCP stream and write each direction to a file
    Dump {
        /// Path to the pcap file
        pcap: PathBuf,

        /// Output directory for .stream files
        #[arg(short, long, default_value = "streams")]
        output: PathBuf,

        /// Print streams to stdout instead of writing files
        #[arg(long, default_value_t = false)]
        console: bool,
    },

    /// Print a per-connection report of a capture
    Summary {
        /// Path to the pcap file
        pcap: PathBuf,

        /// Emit JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    restitch::observability::init_tracing(cli.log_json);

    match cli.command {
        Commands::Dump {
            pcap,
            output,
            console,
        } => {
            let out_dir = if console {
                None
            } else {
                std::fs::create_dir_all(&output).with_context(|| {
                    format!("failed to create output directory {}", output.display())
                })?;
                Some(output)
            };
            let mut engine = run_engine(&pcap, StreamDumper::new(out_dir))?;
            engine.close_all_connections();
            let connections = engine.connection_information().len();
            let dumper = engine.into_sink();
            println!(
                "Dumped {} stream(s), {} bytes, from {} connection(s)",
                dumper.streams_started, dumper.bytes_delivered, connections
            );
        }

        Commands::Summary { pcap, json } => {
            let mut engine = run_engine(&pcap, SummaryCollector::default())?;
            engine.close_all_connections();
            let mut reports: Vec<ConnectionReport> = engine
                .into_sink()
                .stats
                .into_values()
                .map(ConnectionReport::from)
                .collect();
            reports.sort_by_key(|r| r.start_time_us);

            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for r in &reports {
                    println!(
                        "{}  key={:08x}  side0: {} B in {} msg(s)  side1: {} B in {} msg(s)  {}",
                        r.connection,
                        r.flow_key,
                        r.bytes[0],
                        r.messages[0],
                        r.bytes[1],
                        r.messages[1],
                        r.end_reason
                            .map(|reason| match reason {
                                ConnectionEndReason::FinRst => "closed by FIN/RST",
                                ConnectionEndReason::Manual => "closed at EOF",
                            })
                            .unwrap_or("still open"),
                    );
                }
                println!("{} connection(s)", reports.len());
            }
        }
    }

    Ok(())
}

/// Feed every packet of `pcap` through a fresh engine wrapping `sink`.
fn run_engine<S: StreamSink>(pcap: &Path, sink: S) -> Result<TcpReassembly<S>> {
    let file = PcapFile::open(pcap)?;
    let mut engine = TcpReassembly::new(sink);
    let mut packets = 0u64;
    for packet in file.packets()? {
        let packet = packet?;
        engine.process_ethernet(&packet.data, packet.timestamp_us);
        packets += 1;
    }
    tracing::info!(packets, "capture processed");
    Ok(engine)
}

// ── dump ──

/// Writes each direction of each connection to its own file, or to stdout
/// in console mode. Write failures are logged and the stream is skipped.
struct StreamDumper {
    out_dir: Option<PathBuf>,
    files: HashMap<(FlowKey, usize), File>,
    streams_started: usize,
    bytes_delivered: u64,
}

impl StreamDumper {
    fn new(out_dir: Option<PathBuf>) -> Self {
        Self {
            out_dir,
            files: HashMap::new(),
            streams_started: 0,
            bytes_delivered: 0,
        }
    }
}

impl StreamSink for StreamDumper {
    fn on_connection_start(&mut self, conn: &ConnectionData) {
        if self.out_dir.is_none() {
            println!(
                "[+] {}:{} -> {}:{}",
                conn.src_ip, conn.src_port, conn.dst_ip, conn.dst_port
            );
        }
    }

    fn on_message_ready(&mut self, side: usize, data: &[u8], conn: &ConnectionData) {
        self.bytes_delivered += data.len() as u64;
        let Some(dir) = &self.out_dir else {
            println!(
                "[{} side {side}, {} bytes]",
                stream_name(conn, side),
                data.len()
            );
            println!("{}", String::from_utf8_lossy(data));
            return;
        };
        let key = (conn.flow_key, side);
        if !self.files.contains_key(&key) {
            let path = dir.join(format!("{}.stream", stream_name(conn, side)));
            match File::create(&path) {
                Ok(file) => {
                    self.files.insert(key, file);
                    self.streams_started += 1;
                }
                Err(error) => {
                    tracing::error!(%error, path = %path.display(), "cannot create stream file");
                    return;
                }
            }
        }
        if let Some(file) = self.files.get_mut(&key) {
            if let Err(error) = file.write_all(data) {
                tracing::error!(%error, "stream write failed");
            }
        }
    }

    fn on_connection_end(&mut self, conn: &ConnectionData, reason: ConnectionEndReason) {
        self.files.remove(&(conn.flow_key, 0));
        self.files.remove(&(conn.flow_key, 1));
        if self.out_dir.is_none() {
            println!(
                "[-] {}:{} -> {}:{} ({reason:?})",
                conn.src_ip, conn.src_port, conn.dst_ip, conn.dst_port
            );
        }
    }
}

fn stream_name(conn: &ConnectionData, side: usize) -> String {
    let (from_ip, from_port, to_ip, to_port) = if side == 0 {
        (conn.src_ip, conn.src_port, conn.dst_ip, conn.dst_port)
    } else {
        (conn.dst_ip, conn.dst_port, conn.src_ip, conn.src_port)
    };
    format!(
        "{}.{}-{}.{}",
        file_safe(from_ip),
        from_port,
        file_safe(to_ip),
        to_port
    )
}

/// IPv6 colons are not filename-friendly everywhere.
fn file_safe(ip: IpAddr) -> String {
    ip.to_string().replace(':', "_")
}

// ── summary ──

#[derive(Default)]
struct SummaryCollector {
    stats: HashMap<FlowKey, ConnStats>,
}

struct ConnStats {
    meta: ConnectionData,
    bytes: [u64; 2],
    messages: [u64; 2],
    end_reason: Option<ConnectionEndReason>,
}

impl StreamSink for SummaryCollector {
    fn on_connection_start(&mut self, conn: &ConnectionData) {
        self.stats.insert(
            conn.flow_key,
            ConnStats {
                meta: conn.clone(),
                bytes: [0; 2],
                messages: [0; 2],
                end_reason: None,
            },
        );
    }

    fn on_message_ready(&mut self, side: usize, data: &[u8], conn: &ConnectionData) {
        if let Some(stats) = self.stats.get_mut(&conn.flow_key) {
            stats.bytes[side] += data.len() as u64;
            stats.messages[side] += 1;
        }
    }

    fn on_connection_end(&mut self, conn: &ConnectionData, reason: ConnectionEndReason) {
        if let Some(stats) = self.stats.get_mut(&conn.flow_key) {
            stats.meta = conn.clone();
            stats.end_reason = Some(reason);
        }
    }
}

#[derive(Serialize)]
struct ConnectionReport {
    connection: String,
    flow_key: FlowKey,
    start_time_us: u64,
    end_time_us: u64,
    bytes: [u64; 2],
    messages: [u64; 2],
    end_reason: Option<ConnectionEndReason>,
}

impl From<ConnStats> for ConnectionReport {
    fn from(stats: ConnStats) -> Self {
        let meta = &stats.meta;
        Self {
            connection: format!(
                "{}:{} <-> {}:{}",
                meta.src_ip, meta.src_port, meta.dst_ip, meta.dst_port
            ),
            flow_key: meta.flow_key,
            start_time_us: meta.start_time_us,
            end_time_us: meta.end_time_us,
            bytes: stats.bytes,
            messages: stats.messages,
            end_reason: stats.end_reason,
        }
    }
}
