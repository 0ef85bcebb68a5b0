mod common;

use common::{records, reply, unreachable_target, Replies, SimulatedPeer, TEST_TIMEOUT};
use natasha_exporter::metrics::catalog::{keys, CORE_LABEL, PORT_LABEL};
use natasha_exporter::metrics::{MetricCatalog, NatashaCollector, Observation, Scraper};
use natasha_exporter::protocol::codec::ReplyHeader;
use natasha_exporter::protocol::{AppCoreRecord, Command, CpuCoreSample, DpdkPortRecord};
use natasha_exporter::version::BuildInfo;
use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn collector_for(peer_target: natasha_exporter::config::TargetConfig) -> NatashaCollector {
    NatashaCollector::new(
        MetricCatalog::new().unwrap(),
        Scraper::new(&peer_target),
        &BuildInfo::current(),
    )
    .unwrap()
}

fn exposition(collector: NatashaCollector) -> String {
    let registry = Registry::new();
    registry.register(Box::new(collector)).unwrap();
    render(&registry.gather())
}

fn render(families: &[MetricFamily]) -> String {
    let mut buf = Vec::new();
    TextEncoder::new().encode(families, &mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}

fn with_label<'a>(observations: &'a [Observation], label: &str) -> Vec<&'a Observation> {
    let catalog = MetricCatalog::new().unwrap();
    observations
        .iter()
        .filter(|o| catalog.get(o.key).label == label)
        .collect()
}

fn value_of(observations: &[Observation], key: &str, label_value: &str) -> Option<f64> {
    observations
        .iter()
        .find(|o| o.key == key && o.label_value == label_value)
        .map(|o| o.value)
}

#[test]
fn test_unreachable_peer_reports_down() {
    let collector = collector_for(unreachable_target());

    let text = exposition(collector);

    assert!(text.contains("\nnatasha_up 0\n"));
    assert!(text.contains("\nnatasha_last_scrape_status 0\n"));
    assert!(text.contains("\nnatasha_exporter_total_scrapes 1\n"));
    assert!(text.contains("natasha_build_info{"));
    assert!(!text.contains("natasha_dpdk_stats_"));
    assert!(!text.contains("natasha_app_stats_"));
}

#[test]
fn test_single_port_counters() {
    let peer = SimulatedPeer::start(Replies {
        dpdk: records(&[DpdkPortRecord {
            ipackets: 100,
            opackets: 50,
            ibytes: 6400,
            obytes: 3200,
            imissed: 0,
            ierrors: 0,
            oerrors: 0,
            rx_nombuf: 0,
        }]),
        ..Default::default()
    });

    let result = Scraper::new(&peer.target()).run();

    assert!(result.up);
    let ports = with_label(&result.observations, PORT_LABEL);
    assert_eq!(ports.len(), 8);
    assert!(ports.iter().all(|o| o.label_value == "0"));
    assert_eq!(value_of(&result.observations, keys::IPACKETS, "0"), Some(100.0));
    assert_eq!(value_of(&result.observations, keys::OPACKETS, "0"), Some(50.0));
    assert_eq!(value_of(&result.observations, keys::IBYTES, "0"), Some(6400.0));
    assert_eq!(value_of(&result.observations, keys::OBYTES, "0"), Some(3200.0));
    assert_eq!(value_of(&result.observations, keys::RX_NOMBUF, "0"), Some(0.0));
}

#[test]
fn test_port_index_follows_stream_position() {
    let peer = SimulatedPeer::start(Replies {
        dpdk: records(&[
            DpdkPortRecord {
                ipackets: 1,
                ..Default::default()
            },
            DpdkPortRecord {
                ipackets: 2,
                ..Default::default()
            },
        ]),
        ..Default::default()
    });

    let result = Scraper::new(&peer.target()).run();

    assert!(result.up);
    assert_eq!(with_label(&result.observations, PORT_LABEL).len(), 16);
    assert_eq!(value_of(&result.observations, keys::IPACKETS, "0"), Some(1.0));
    assert_eq!(value_of(&result.observations, keys::IPACKETS, "1"), Some(2.0));
}

#[test]
fn test_app_core_uses_explicit_core_id() {
    let peer = SimulatedPeer::start(Replies {
        app: records(&[AppCoreRecord {
            core_id: 3,
            drop_no_rule: 7,
            ..Default::default()
        }]),
        ..Default::default()
    });

    let result = Scraper::new(&peer.target()).run();

    assert!(result.up);
    let cores = with_label(&result.observations, CORE_LABEL);
    assert_eq!(cores.len(), 7);
    assert!(cores.iter().all(|o| o.label_value == "3"));
    assert_eq!(value_of(&result.observations, keys::DROP_NO_RULE, "3"), Some(7.0));
    let zeros = cores.iter().filter(|o| o.value == 0.0).count();
    assert_eq!(zeros, 6);
}

#[test]
fn test_cpu_usage() {
    let peer = SimulatedPeer::start(Replies {
        cpu: records(&[CpuCoreSample {
            core_id: 1,
            cycles: 2_500_000,
            freq: 5_000_000,
        }]),
        ..Default::default()
    });

    let result = Scraper::new(&peer.target()).run();

    assert!(result.up);
    assert_eq!(
        value_of(&result.observations, keys::REAL_CPU_USAGE, "1"),
        Some(50.0)
    );
}

#[test]
fn test_zero_frequency_skips_only_that_core() {
    let peer = SimulatedPeer::start(Replies {
        cpu: records(&[
            CpuCoreSample {
                core_id: 1,
                cycles: 500,
                freq: 0,
            },
            CpuCoreSample {
                core_id: 2,
                cycles: 3,
                freq: 4,
            },
        ]),
        ..Default::default()
    });

    let result = Scraper::new(&peer.target()).run();

    assert!(result.up);
    assert_eq!(result.skipped_cores, vec![1]);
    assert_eq!(value_of(&result.observations, keys::REAL_CPU_USAGE, "1"), None);
    assert_eq!(
        value_of(&result.observations, keys::REAL_CPU_USAGE, "2"),
        Some(75.0)
    );
}

#[test]
fn test_empty_dpdk_reply() {
    let peer = SimulatedPeer::start(Replies::default());

    let result = Scraper::new(&peer.target()).run();

    assert!(result.up);
    assert!(with_label(&result.observations, PORT_LABEL).is_empty());
    assert_eq!(
        value_of(&result.observations, keys::VERSION, "natasha 1.0.0"),
        Some(1.0)
    );
}

#[test]
fn test_misaligned_payload_fails_cycle() {
    let peer = SimulatedPeer::start(Replies {
        dpdk: records(&[DpdkPortRecord::default()]),
        app: reply(&[0u8; 60]),
        ..Default::default()
    });

    let result = Scraper::new(&peer.target()).run();

    assert!(!result.up);
    assert!(result.observations.is_empty());
    assert!(result.error.unwrap().contains("Malformed"));
}

#[test]
fn test_peer_hang_up_mid_payload() {
    let mut dpdk = ReplyHeader::new(0, 64).encode().to_vec();
    dpdk.extend_from_slice(&[0u8; 10]);
    let peer = SimulatedPeer::start(Replies {
        dpdk,
        close_on: Some(Command::DpdkStats),
        ..Default::default()
    });

    let result = Scraper::new(&peer.target()).run();

    assert!(!result.up);
    assert!(result.observations.is_empty());
}

#[test]
fn test_stalled_peer_times_out() {
    let peer = SimulatedPeer::stalled();

    let start = Instant::now();
    let result = Scraper::new(&peer.target()).run();

    assert!(!result.up);
    assert!(start.elapsed() < TEST_TIMEOUT * 4);
    assert!(result.error.unwrap().contains("Timed out"));
}

#[test]
fn test_trickling_peer_is_cut_off_at_deadline() {
    let peer = SimulatedPeer::start(Replies {
        dpdk: records(&[DpdkPortRecord::default()]),
        trickle: Some(Duration::from_millis(100)),
        ..Default::default()
    });

    let start = Instant::now();
    let result = Scraper::new(&peer.target()).run();

    assert!(!result.up);
    assert!(start.elapsed() < TEST_TIMEOUT * 4);
    assert!(result.error.unwrap().contains("Timed out"));
}

#[test]
fn test_consecutive_scrapes_are_identical() {
    let peer = SimulatedPeer::start(Replies {
        dpdk: records(&[DpdkPortRecord {
            ipackets: 10,
            obytes: 20,
            ..Default::default()
        }]),
        app: records(&[AppCoreRecord {
            core_id: 4,
            drop_tx_not_sent: 1,
            ..Default::default()
        }]),
        cpu: records(&[CpuCoreSample {
            core_id: 4,
            cycles: 1,
            freq: 8,
        }]),
        ..Default::default()
    });
    let collector = collector_for(peer.target());

    let first = collector.scrape();
    let second = collector.scrape();

    assert!(first.up && second.up);
    assert_eq!(first.observations, second.observations);
    assert_eq!(collector.total_scrapes(), 2);
    assert_eq!(peer.sessions.load(Ordering::SeqCst), 2);
}

#[test]
fn test_exporter_survives_failures() {
    let collector = collector_for(unreachable_target());

    for _ in 0..3 {
        assert!(!collector.scrape().up);
    }
    assert_eq!(collector.total_scrapes(), 3);
}

#[test]
fn test_concurrent_collects_are_serialized() {
    let peer = SimulatedPeer::start(Replies {
        dpdk: records(&[DpdkPortRecord::default(); 4]),
        ..Default::default()
    });
    let collector = Arc::new(collector_for(peer.target()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let collector = collector.clone();
            thread::spawn(move || collector.collect())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(collector.total_scrapes(), 8);
    assert_eq!(peer.sessions.load(Ordering::SeqCst), 8);
    assert_eq!(peer.max_active.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_collects_report_their_own_up() {
    let peer = SimulatedPeer::start(Replies {
        dpdk: records(&[DpdkPortRecord::default()]),
        hang_up_odd_sessions: true,
        ..Default::default()
    });
    let collector = Arc::new(collector_for(peer.target()));

    for _ in 0..5 {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collector = collector.clone();
                thread::spawn(move || render(&collector.collect()))
            })
            .collect();

        for handle in handles {
            let text = handle.join().unwrap();
            let up = text.contains("\nnatasha_up 1\n");
            let down = text.contains("\nnatasha_up 0\n");
            let observed = text.contains("natasha_dpdk_stats_ipackets{");
            assert!(up != down);
            assert_eq!(up, observed, "up disagrees with observations:\n{}", text);
        }
    }

    assert_eq!(collector.total_scrapes(), 40);
}

#[test]
fn test_exposition_of_healthy_peer() {
    let peer = SimulatedPeer::start(Replies {
        dpdk: records(&[DpdkPortRecord {
            ipackets: 100,
            ..Default::default()
        }]),
        app: records(&[AppCoreRecord {
            core_id: 3,
            drop_no_rule: 7,
            ..Default::default()
        }]),
        ..Default::default()
    });

    let text = exposition(collector_for(peer.target()));

    assert!(text.contains("\nnatasha_up 1\n"));
    assert!(text.contains("natasha_dpdk_stats_ipackets{portid=\"0\"} 100"));
    assert!(text.contains("natasha_app_stats_drop_no_rule{coreid=\"3\"} 7"));
    assert!(text.contains("natasha_version_info{version=\"natasha 1.0.0\"} 1"));
}
