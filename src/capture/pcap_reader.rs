//! Pcap file reading and packet streaming.
//!
//! Streams link-layer frames out of legacy pcap files using the
//! `pcap-parser` crate. Timestamps are normalized to microseconds whether
//! the file uses microsecond (0xa1b2c3d4) or nanosecond (0xa1b23c4d) magic.
//!
//! Reference: the libpcap file format.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError};

const PCAP_MAGIC_NANOS: u32 = 0xa1b2_3c4d;

/// One captured frame: link-layer bytes plus the capture timestamp.
#[derive(Debug, Clone)]
pub struct CapturedPacket {
    /// Capture timestamp in microseconds since the pcap epoch.
    pub timestamp_us: u64,
    /// Raw link-layer payload, typically starting with an Ethernet header.
    pub data: Vec<u8>,
}

/// A pcap file on disk, opened lazily per iteration.
pub struct PcapFile {
    path: PathBuf,
}

impl PcapFile {
    /// Open a pcap file for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::metadata(&path)
            .with_context(|| format!("pcap file not found: {}", path.display()))?;
        Ok(Self { path })
    }

    /// Iterate over every packet in the file.
    pub fn packets(&self) -> Result<PacketIterator> {
        PacketIterator::new(&self.path)
    }
}

/// Lazily reads packets from a legacy pcap file.
pub struct PacketIterator {
    reader: LegacyPcapReader<BufReader<File>>,
    /// Divider turning the file's sub-second field into microseconds.
    subsec_divisor: u64,
    done: bool,
}

impl PacketIterator {
    fn new(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open pcap: {}", path.display()))?;
        let buf = BufReader::with_capacity(256 * 1024, file);
        let reader = LegacyPcapReader::new(65536, buf)
            .map_err(|e| anyhow!("failed to read pcap header: {:?}", e))?;
        Ok(Self {
            reader,
            subsec_divisor: 1,
            done: false,
        })
    }
}

impl Iterator for PacketIterator {
    type Item = Result<CapturedPacket>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut stalled = false;
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    stalled = false;
                    match block {
                        PcapBlockOwned::LegacyHeader(hdr) => {
                            if hdr.magic_number == PCAP_MAGIC_NANOS {
                                self.subsec_divisor = 1_000;
                            }
                            self.reader.consume(offset);
                        }
                        PcapBlockOwned::Legacy(pkt) => {
                            let timestamp_us = (pkt.ts_sec as u64) * 1_000_000
                                + (pkt.ts_usec as u64) / self.subsec_divisor;
                            let data = pkt.data.to_vec();
                            self.reader.consume(offset);
                            return Some(Ok(CapturedPacket { timestamp_us, data }));
                        }
                        _ => {
                            self.reader.consume(offset);
                        }
                    }
                }
                Err(PcapError::Eof) => {
                    self.done = true;
                    return None;
                }
                Err(PcapError::Incomplete(_)) => {
                    // A refill that doesn't unblock the parser means the
                    // file ends with a truncated record.
                    if stalled || self.reader.refill().is_err() {
                        self.done = true;
                        return None;
                    }
                    stalled = true;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(anyhow!("pcap read error: {:?}", e)));
                }
            }
        }
    }
}
