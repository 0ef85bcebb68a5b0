//! Wire format of the natasha control channel
//!
//! Every exchange is a single command byte sent by the exporter, answered by a
//! fixed 5-byte reply header and `data_size` bytes of payload:
//!
//! ```text
//! request:  | code: u8 |
//! reply:    | status: u8 | data_size: u32 | payload[data_size] |
//! ```
//!
//! Payloads are sequences of fixed-width records. All multi-byte integers are
//! big-endian on the wire, regardless of the host byte order. Record widths are
//! declared explicitly by [`WireRecord::WIDTH`] and never derived from native
//! struct layout.

use crate::{ExporterError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;

/// Width of the reply header: status (1) + data_size (4).
pub const HEADER_WIDTH: usize = 5;

/// Largest payload the exporter is willing to buffer for a single reply.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    DpdkStats,
    AppStats,
    CpuUsage,
}

impl Command {
    /// Order in which a scrape cycle issues its commands.
    pub const SCRAPE_ORDER: [Command; 4] = [
        Command::Version,
        Command::DpdkStats,
        Command::AppStats,
        Command::CpuUsage,
    ];

    pub const fn code(&self) -> u8 {
        match self {
            Command::Version => 3,
            Command::DpdkStats => 4,
            Command::AppStats => 5,
            Command::CpuUsage => 7,
        }
    }

    pub const fn from_code(code: u8) -> Option<Command> {
        match code {
            3 => Some(Command::Version),
            4 => Some(Command::DpdkStats),
            5 => Some(Command::AppStats),
            7 => Some(Command::CpuUsage),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::DpdkStats => "dpdk-stats",
            Command::AppStats => "app-stats",
            Command::CpuUsage => "cpu-usage",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub fn encode_command(cmd: Command) -> Bytes {
    let mut buf = BytesMut::with_capacity(1);
    buf.put_u8(cmd.code());
    buf.freeze()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    pub status: u8,
    pub data_size: u32,
}

impl ReplyHeader {
    pub fn new(status: u8, data_size: u32) -> Self {
        Self { status, data_size }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    pub fn payload_len(&self) -> usize {
        self.data_size as usize
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_WIDTH);
        buf.put_u8(self.status);
        buf.put_u32(self.data_size);
        buf.freeze()
    }
}

pub fn decode_header(mut buf: &[u8]) -> Result<ReplyHeader> {
    if buf.len() < HEADER_WIDTH {
        return Err(ExporterError::Truncated {
            expected: HEADER_WIDTH,
            actual: buf.len(),
        });
    }

    let status = buf.get_u8();
    let data_size = buf.get_u32();

    Ok(ReplyHeader { status, data_size })
}

/// A fixed-width record repeated inside a reply payload.
pub trait WireRecord: Sized {
    /// Exact number of bytes one record occupies on the wire.
    const WIDTH: usize;

    /// Decodes one record. The caller guarantees `WIDTH` bytes are remaining.
    fn decode<B: Buf>(buf: &mut B) -> Self;

    fn encode<B: BufMut>(&self, buf: &mut B);
}

/// Splits a payload into records, rejecting any trailing partial record.
pub fn decode_records<R: WireRecord>(payload: &[u8]) -> Result<Vec<R>> {
    if payload.len() % R::WIDTH != 0 {
        return Err(ExporterError::Malformed(format!(
            "payload of {} bytes is not a multiple of the {}-byte record width",
            payload.len(),
            R::WIDTH
        )));
    }

    let mut buf = payload;
    let count = payload.len() / R::WIDTH;
    Ok((0..count).map(|_| R::decode(&mut buf)).collect())
}

/// Encodes records back to back, as the peer lays them out.
pub fn encode_records<R: WireRecord>(records: &[R]) -> Bytes {
    let mut buf = BytesMut::with_capacity(records.len() * R::WIDTH);
    for record in records {
        record.encode(&mut buf);
    }
    buf.freeze()
}

/// The version reply is free-form text, possibly NUL padded.
pub fn decode_version(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

/// Per-port DPDK ethernet statistics.
///
/// Layout (64 bytes): eight big-endian u64 counters in field order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DpdkPortRecord {
    pub ipackets: u64,
    pub opackets: u64,
    pub ibytes: u64,
    pub obytes: u64,
    pub imissed: u64,
    pub ierrors: u64,
    pub oerrors: u64,
    pub rx_nombuf: u64,
}

impl WireRecord for DpdkPortRecord {
    const WIDTH: usize = 8 * 8;

    fn decode<B: Buf>(buf: &mut B) -> Self {
        Self {
            ipackets: buf.get_u64(),
            opackets: buf.get_u64(),
            ibytes: buf.get_u64(),
            obytes: buf.get_u64(),
            imissed: buf.get_u64(),
            ierrors: buf.get_u64(),
            oerrors: buf.get_u64(),
            rx_nombuf: buf.get_u64(),
        }
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64(self.ipackets);
        buf.put_u64(self.opackets);
        buf.put_u64(self.ibytes);
        buf.put_u64(self.obytes);
        buf.put_u64(self.imissed);
        buf.put_u64(self.ierrors);
        buf.put_u64(self.oerrors);
        buf.put_u64(self.rx_nombuf);
    }
}

/// Per-core application (NAT) statistics.
///
/// Layout (57 bytes): core id as u8, then seven big-endian u64 counters.
/// Core ids are not guaranteed to be contiguous.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AppCoreRecord {
    pub core_id: u8,
    pub drop_no_rule: u64,
    pub drop_nat_condition: u64,
    pub drop_bad_l3_cksum: u64,
    pub rx_bad_l4_cksum: u64,
    pub drop_unknown_icmp: u64,
    pub drop_unhandled_ethertype: u64,
    pub drop_tx_not_sent: u64,
}

impl WireRecord for AppCoreRecord {
    const WIDTH: usize = 1 + 7 * 8;

    fn decode<B: Buf>(buf: &mut B) -> Self {
        Self {
            core_id: buf.get_u8(),
            drop_no_rule: buf.get_u64(),
            drop_nat_condition: buf.get_u64(),
            drop_bad_l3_cksum: buf.get_u64(),
            rx_bad_l4_cksum: buf.get_u64(),
            drop_unknown_icmp: buf.get_u64(),
            drop_unhandled_ethertype: buf.get_u64(),
            drop_tx_not_sent: buf.get_u64(),
        }
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.core_id);
        buf.put_u64(self.drop_no_rule);
        buf.put_u64(self.drop_nat_condition);
        buf.put_u64(self.drop_bad_l3_cksum);
        buf.put_u64(self.rx_bad_l4_cksum);
        buf.put_u64(self.drop_unknown_icmp);
        buf.put_u64(self.drop_unhandled_ethertype);
        buf.put_u64(self.drop_tx_not_sent);
    }
}

/// Busy cycles of one worker core against its reference frequency.
///
/// Layout (17 bytes): core id as u8, cycles as u64, frequency as u64.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuCoreSample {
    pub core_id: u8,
    pub cycles: u64,
    pub freq: u64,
}

impl CpuCoreSample {
    /// Busy percentage rounded to two decimals, `None` when the frequency is 0.
    pub fn usage_percent(&self) -> Option<f64> {
        if self.freq == 0 {
            return None;
        }
        let usage = 100.0 * self.cycles as f64 / self.freq as f64;
        Some((usage * 100.0).round() / 100.0)
    }
}

impl WireRecord for CpuCoreSample {
    const WIDTH: usize = 1 + 8 + 8;

    fn decode<B: Buf>(buf: &mut B) -> Self {
        Self {
            core_id: buf.get_u8(),
            cycles: buf.get_u64(),
            freq: buf.get_u64(),
        }
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.core_id);
        buf.put_u64(self.cycles);
        buf.put_u64(self.freq);
    }
}
