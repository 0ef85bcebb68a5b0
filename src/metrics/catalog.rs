//! Metric identities for every counter the natasha process reports
//!
//! The catalog is built once at startup and handed to the collector. Lookups
//! are by stable key (e.g. `"Ipackets"`); asking for a key that is not in the
//! catalog is a programming error and panics.

use crate::Result;
use prometheus::core::Desc;
use prometheus::Opts;
use serde::Serialize;
use std::collections::HashMap;

pub const NAMESPACE: &str = "natasha";

pub const PORT_LABEL: &str = "portid";
pub const CORE_LABEL: &str = "coreid";
pub const VERSION_LABEL: &str = "version";

pub mod keys {
    pub const IPACKETS: &str = "Ipackets";
    pub const OPACKETS: &str = "Opackets";
    pub const IBYTES: &str = "Ibytes";
    pub const OBYTES: &str = "Obytes";
    pub const IMISSED: &str = "Imissed";
    pub const IERRORS: &str = "Ierrors";
    pub const OERRORS: &str = "Oerrors";
    pub const RX_NOMBUF: &str = "RxNombuf";

    pub const DROP_NO_RULE: &str = "DropNoRule";
    pub const DROP_NAT_CONDITION: &str = "DropNatCondition";
    pub const DROP_BAD_L3_CKSUM: &str = "DropBadL3Cksum";
    pub const RX_BAD_L4_CKSUM: &str = "RxBadL4Cksum";
    pub const DROP_UNKNOWN_ICMP: &str = "DropUnknownIcmp";
    pub const DROP_UNHANDLED_ETHERTYPE: &str = "DropUnhandledEthertype";
    pub const DROP_TX_NOTSENT: &str = "DropTxNotsent";

    pub const REAL_CPU_USAGE: &str = "RealCpuUsage";
    pub const VERSION: &str = "Version";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

struct Definition {
    key: &'static str,
    subsystem: &'static str,
    name: &'static str,
    help: &'static str,
    kind: MetricKind,
    label: &'static str,
}

const fn dpdk(key: &'static str, name: &'static str, help: &'static str) -> Definition {
    Definition {
        key,
        subsystem: "dpdk_stats",
        name,
        help,
        kind: MetricKind::Counter,
        label: PORT_LABEL,
    }
}

const fn app(key: &'static str, name: &'static str, help: &'static str) -> Definition {
    Definition {
        key,
        subsystem: "app_stats",
        name,
        help,
        kind: MetricKind::Counter,
        label: CORE_LABEL,
    }
}

const DEFINITIONS: [Definition; 17] = [
    dpdk(keys::IPACKETS, "ipackets", "Total number of successfully received packets."),
    dpdk(keys::OPACKETS, "opackets", "Total number of successfully transmitted packets."),
    dpdk(keys::IBYTES, "ibytes", "Total number of successfully received bytes."),
    dpdk(keys::OBYTES, "obytes", "Total number of successfully transmitted bytes."),
    dpdk(
        keys::IMISSED,
        "imissed",
        "Total of RX packets dropped by the HW because there are no available buffer (i.e. RX queues are full).",
    ),
    dpdk(keys::IERRORS, "ierrors", "Total number of erroneous received packets."),
    dpdk(keys::OERRORS, "oerrors", "Total number of failed transmitted packets."),
    dpdk(keys::RX_NOMBUF, "rxnombuf", "Total number of RX mbuf allocation failures."),
    app(
        keys::DROP_NO_RULE,
        "drop_no_rule",
        "The number of Rx packets dropped due to no NAT rule.",
    ),
    app(
        keys::DROP_NAT_CONDITION,
        "drop_nat_condition",
        "The number of drops due to ip range mismatch.",
    ),
    app(
        keys::DROP_BAD_L3_CKSUM,
        "drop_bad_l3_cksum",
        "The number of Rx packets dropped due to bad l3 checksum.",
    ),
    app(
        keys::RX_BAD_L4_CKSUM,
        "rx_bad_l4_cksum",
        "The number of Rx packets having a bad TCP or UDP checksum.",
    ),
    app(
        keys::DROP_UNKNOWN_ICMP,
        "drop_unknown_icmp",
        "The number of Rx packets dropped due to unhandled or unknown ICMP type.",
    ),
    app(
        keys::DROP_UNHANDLED_ETHERTYPE,
        "drop_unhandled_ether_type",
        "The number of Rx packets dropped due to unhandled ether type.",
    ),
    app(keys::DROP_TX_NOTSENT, "drop_tx_not_sent", "The number of failed Tx packets."),
    Definition {
        key: keys::REAL_CPU_USAGE,
        subsystem: "app_stats",
        name: "real_cpu_usage",
        help: "The real CPU usage.",
        kind: MetricKind::Gauge,
        label: CORE_LABEL,
    },
    Definition {
        key: keys::VERSION,
        subsystem: "",
        name: "version_info",
        help: "Version reported by the natasha process.",
        kind: MetricKind::Gauge,
        label: VERSION_LABEL,
    },
];

#[derive(Debug)]
pub struct CatalogEntry {
    pub key: &'static str,
    pub kind: MetricKind,
    pub label: &'static str,
    opts: Opts,
    desc: Desc,
}

impl CatalogEntry {
    pub fn fq_name(&self) -> &str {
        &self.desc.fq_name
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    pub fn desc(&self) -> &Desc {
        &self.desc
    }
}

#[derive(Debug)]
pub struct MetricCatalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<&'static str, usize>,
}

impl MetricCatalog {
    pub fn new() -> Result<Self> {
        let mut entries = Vec::with_capacity(DEFINITIONS.len());
        let mut index = HashMap::with_capacity(DEFINITIONS.len());

        for def in DEFINITIONS.iter() {
            let opts = Opts::new(def.name, def.help)
                .namespace(NAMESPACE)
                .subsystem(def.subsystem)
                .variable_label(def.label);
            let desc = Desc::new(
                opts.fq_name(),
                def.help.to_string(),
                vec![def.label.to_string()],
                HashMap::new(),
            )?;

            index.insert(def.key, entries.len());
            entries.push(CatalogEntry {
                key: def.key,
                kind: def.kind,
                label: def.label,
                opts,
                desc,
            });
        }

        Ok(Self { entries, index })
    }

    /// # Panics
    ///
    /// Panics if `key` is not part of the catalog.
    pub fn get(&self, key: &str) -> &CatalogEntry {
        match self.index.get(key) {
            Some(&i) => &self.entries[i],
            None => panic!("metric key {key:?} is not in the catalog"),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    pub fn descs(&self) -> Vec<&Desc> {
        self.entries.iter().map(|e| &e.desc).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
