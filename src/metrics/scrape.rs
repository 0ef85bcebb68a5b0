//! One scrape cycle against the natasha control channel
//!
//! A cycle walks `Idle -> Connecting -> Exchanging(Version) -> ... ->
//! Exchanging(CpuUsage) -> Closed`. Observations are buffered for the whole
//! cycle and only handed out once the last command succeeded; any error drops
//! them and turns the cycle into `up = 0`. Errors never escape the cycle.

use crate::config::TargetConfig;
use crate::metrics::catalog::keys;
use crate::protocol::codec::{
    decode_records, decode_version, AppCoreRecord, Command, CpuCoreSample, DpdkPortRecord,
};
use crate::protocol::{Session, Transport};
use crate::Result;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub key: &'static str,
    pub label_value: String,
    pub value: f64,
}

impl Observation {
    fn new(key: &'static str, label_value: impl ToString, value: f64) -> Self {
        Self {
            key,
            label_value: label_value.to_string(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeState {
    Idle,
    Connecting,
    Exchanging(Command),
    Closed { success: bool },
}

impl std::fmt::Display for ScrapeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeState::Idle => write!(f, "idle"),
            ScrapeState::Connecting => write!(f, "connecting"),
            ScrapeState::Exchanging(cmd) => write!(f, "exchanging({})", cmd),
            ScrapeState::Closed { success: true } => write!(f, "closed(success)"),
            ScrapeState::Closed { success: false } => write!(f, "closed(failure)"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResult {
    pub up: bool,
    pub observations: Vec<Observation>,
    /// Cores whose CPU sample reported a zero reference frequency.
    pub skipped_cores: Vec<u8>,
    pub duration_seconds: f64,
    pub error: Option<String>,
}

impl ScrapeResult {
    pub fn up_value(&self) -> f64 {
        if self.up {
            1.0
        } else {
            0.0
        }
    }
}

/// Buffer for a cycle in progress.
#[derive(Debug)]
struct Cycle {
    state: ScrapeState,
    observations: Vec<Observation>,
    skipped_cores: Vec<u8>,
}

impl Cycle {
    fn new() -> Self {
        Self {
            state: ScrapeState::Idle,
            observations: Vec::new(),
            skipped_cores: Vec::new(),
        }
    }

    fn record(&mut self, cmd: Command, payload: &[u8]) -> Result<()> {
        match cmd {
            Command::Version => {
                let version = decode_version(payload);
                debug!("natasha version: {}", version);
                self.observations
                    .push(Observation::new(keys::VERSION, version, 1.0));
            }
            Command::DpdkStats => {
                let ports: Vec<DpdkPortRecord> = decode_records(payload)?;
                for (port, record) in ports.iter().enumerate() {
                    self.record_port(port, record);
                }
            }
            Command::AppStats => {
                let cores: Vec<AppCoreRecord> = decode_records(payload)?;
                for record in &cores {
                    self.record_app_core(record);
                }
            }
            Command::CpuUsage => {
                let samples: Vec<CpuCoreSample> = decode_records(payload)?;
                for sample in &samples {
                    self.record_cpu_sample(sample);
                }
            }
        }
        Ok(())
    }

    fn record_port(&mut self, port: usize, r: &DpdkPortRecord) {
        let counters = [
            (keys::IPACKETS, r.ipackets),
            (keys::OPACKETS, r.opackets),
            (keys::IBYTES, r.ibytes),
            (keys::OBYTES, r.obytes),
            (keys::IMISSED, r.imissed),
            (keys::IERRORS, r.ierrors),
            (keys::OERRORS, r.oerrors),
            (keys::RX_NOMBUF, r.rx_nombuf),
        ];
        for (key, value) in counters {
            self.observations
                .push(Observation::new(key, port, value as f64));
        }
    }

    fn record_app_core(&mut self, r: &AppCoreRecord) {
        let counters = [
            (keys::DROP_NO_RULE, r.drop_no_rule),
            (keys::DROP_NAT_CONDITION, r.drop_nat_condition),
            (keys::DROP_BAD_L3_CKSUM, r.drop_bad_l3_cksum),
            (keys::RX_BAD_L4_CKSUM, r.rx_bad_l4_cksum),
            (keys::DROP_UNKNOWN_ICMP, r.drop_unknown_icmp),
            (keys::DROP_UNHANDLED_ETHERTYPE, r.drop_unhandled_ethertype),
            (keys::DROP_TX_NOTSENT, r.drop_tx_not_sent),
        ];
        for (key, value) in counters {
            self.observations
                .push(Observation::new(key, r.core_id, value as f64));
        }
    }

    fn record_cpu_sample(&mut self, sample: &CpuCoreSample) {
        match sample.usage_percent() {
            Some(usage) => self.observations.push(Observation::new(
                keys::REAL_CPU_USAGE,
                sample.core_id,
                usage,
            )),
            None => {
                warn!(
                    coreid = sample.core_id,
                    cycles = sample.cycles,
                    "CPU sample reports a zero frequency, skipping core"
                );
                self.skipped_cores.push(sample.core_id);
            }
        }
    }
}

pub struct Scraper {
    address: String,
    timeout: Duration,
}

impl Scraper {
    pub fn new(target: &TargetConfig) -> Self {
        Self {
            address: target.address.clone(),
            timeout: target.timeout,
        }
    }

    /// Runs a cycle over a fresh TCP connection to the configured target.
    pub fn run(&self) -> ScrapeResult {
        self.run_with(|| Session::open(&self.address, self.timeout))
    }

    /// Runs a cycle over whatever session `connect` opens.
    pub fn run_with<T, F>(&self, connect: F) -> ScrapeResult
    where
        T: Transport,
        F: FnOnce() -> Result<Session<T>>,
    {
        let start = Instant::now();
        let mut cycle = Cycle::new();

        let outcome = Self::scrape(&mut cycle, connect);
        let duration_seconds = start.elapsed().as_secs_f64();

        match outcome {
            Ok(()) => {
                cycle.state = ScrapeState::Closed { success: true };
                debug!(
                    peer = %self.address,
                    state = %cycle.state,
                    observations = cycle.observations.len(),
                    duration_seconds,
                    "Scrape succeeded"
                );
                ScrapeResult {
                    up: true,
                    observations: cycle.observations,
                    skipped_cores: cycle.skipped_cores,
                    duration_seconds,
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    peer = %self.address,
                    state = %cycle.state,
                    kind = e.kind(),
                    "Scrape failed: {}",
                    e
                );
                ScrapeResult {
                    up: false,
                    observations: Vec::new(),
                    skipped_cores: Vec::new(),
                    duration_seconds,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn scrape<T, F>(cycle: &mut Cycle, connect: F) -> Result<()>
    where
        T: Transport,
        F: FnOnce() -> Result<Session<T>>,
    {
        cycle.state = ScrapeState::Connecting;
        let mut session = connect()?;

        let outcome = Self::exchange_all(cycle, &mut session);
        session.close();
        outcome
    }

    fn exchange_all<T: Transport>(cycle: &mut Cycle, session: &mut Session<T>) -> Result<()> {
        for cmd in Command::SCRAPE_ORDER {
            cycle.state = ScrapeState::Exchanging(cmd);
            let payload = session.request(cmd)?;
            cycle.record(cmd, &payload)?;
        }
        Ok(())
    }
}
