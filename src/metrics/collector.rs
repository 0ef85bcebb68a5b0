use crate::metrics::catalog::{CatalogEntry, MetricCatalog, MetricKind, NAMESPACE};
use crate::metrics::scrape::{Observation, ScrapeResult, Scraper};
use crate::version::BuildInfo;
use crate::Result;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, Gauge, GaugeVec, IntCounter, Opts};
use std::collections::btree_map::{BTreeMap, Entry};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Prometheus collector that scrapes natasha on every `collect`.
///
/// The natasha control channel cannot serve concurrent sessions, so scrapes
/// are serialized behind `scrape_lock`: at most one session is open at a time.
/// `collect` keeps the lock until every family is built, so the self-metrics
/// it emits always describe the cycle whose observations it emits.
pub struct NatashaCollector {
    catalog: MetricCatalog,
    scraper: Scraper,
    scrape_lock: Mutex<()>,

    total_scrapes: IntCounter,
    scrape_failures: IntCounter,
    up: Gauge,
    last_scrape_status: Gauge,
    scrape_duration: Gauge,
    build_info: GaugeVec,
}

impl NatashaCollector {
    pub fn new(catalog: MetricCatalog, scraper: Scraper, build: &BuildInfo) -> Result<Self> {
        let total_scrapes = IntCounter::with_opts(
            Opts::new("exporter_total_scrapes", "Current total Natasha scrapes.")
                .namespace(NAMESPACE),
        )?;
        let scrape_failures = IntCounter::with_opts(
            Opts::new(
                "exporter_scrape_failures_total",
                "Number of Natasha scrapes that failed.",
            )
            .namespace(NAMESPACE),
        )?;
        let up = Gauge::with_opts(Opts::new("up", "The natasha server status.").namespace(NAMESPACE))?;
        let last_scrape_status = Gauge::with_opts(
            Opts::new("last_scrape_status", "Was the last scrape successful.").namespace(NAMESPACE),
        )?;
        let scrape_duration = Gauge::with_opts(
            Opts::new(
                "exporter_scrape_duration_seconds",
                "Duration of the last Natasha scrape.",
            )
            .namespace(NAMESPACE),
        )?;

        let build_info = GaugeVec::new(
            Opts::new("build_info", "Exporter built information.").namespace(NAMESPACE),
            &["version", "revision", "builddate", "rustversion"],
        )?;
        build_info
            .get_metric_with_label_values(&[
                build.version.as_str(),
                build.revision.as_str(),
                build.build_date.as_str(),
                build.rust_version.as_str(),
            ])?
            .set(1.0);

        Ok(Self {
            catalog,
            scraper,
            scrape_lock: Mutex::new(()),
            total_scrapes,
            scrape_failures,
            up,
            last_scrape_status,
            scrape_duration,
            build_info,
        })
    }

    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    pub fn total_scrapes(&self) -> u64 {
        self.total_scrapes.get()
    }

    /// Runs one scrape cycle while holding the scrape lock.
    pub fn scrape(&self) -> ScrapeResult {
        let guard = self.lock();
        self.scrape_locked(&guard)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.scrape_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn scrape_locked(&self, _guard: &MutexGuard<'_, ()>) -> ScrapeResult {
        self.total_scrapes.inc();
        let result = self.scraper.run();

        if !result.up {
            self.scrape_failures.inc();
        }
        self.up.set(result.up_value());
        self.last_scrape_status.set(result.up_value());
        self.scrape_duration.set(result.duration_seconds);

        result
    }

    /// Turns a cycle's observations into metric families, one per catalog entry.
    pub fn observation_families(&self, observations: &[Observation]) -> Result<Vec<MetricFamily>> {
        let mut builders: BTreeMap<&'static str, FamilyBuilder> = BTreeMap::new();

        for observation in observations {
            let entry = self.catalog.get(observation.key);
            let builder = match builders.entry(entry.key) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => e.insert(FamilyBuilder::new(entry)?),
            };
            builder.observe(observation)?;
        }

        Ok(builders.values().flat_map(FamilyBuilder::collect).collect())
    }

    fn self_families(&self) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        families.extend(self.total_scrapes.collect());
        families.extend(self.scrape_failures.collect());
        families.extend(self.up.collect());
        families.extend(self.last_scrape_status.collect());
        families.extend(self.scrape_duration.collect());
        families.extend(self.build_info.collect());
        families
    }
}

impl Collector for NatashaCollector {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = Vec::new();
        descs.extend(self.total_scrapes.desc());
        descs.extend(self.scrape_failures.desc());
        descs.extend(self.up.desc());
        descs.extend(self.last_scrape_status.desc());
        descs.extend(self.scrape_duration.desc());
        descs.extend(self.build_info.desc());
        descs.extend(self.catalog.descs());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let guard = self.lock();
        let result = self.scrape_locked(&guard);

        let mut families = self.self_families();
        match self.observation_families(&result.observations) {
            Ok(observed) => families.extend(observed),
            Err(e) => warn!("Failed to encode natasha observations: {}", e),
        }
        drop(guard);
        families
    }
}

enum FamilyBuilder {
    Counter(CounterVec),
    Gauge(GaugeVec),
}

impl FamilyBuilder {
    fn new(entry: &CatalogEntry) -> Result<Self> {
        let labels = [entry.label];
        Ok(match entry.kind {
            MetricKind::Counter => {
                FamilyBuilder::Counter(CounterVec::new(entry.opts().clone(), &labels)?)
            }
            MetricKind::Gauge => FamilyBuilder::Gauge(GaugeVec::new(entry.opts().clone(), &labels)?),
        })
    }

    fn observe(&self, observation: &Observation) -> Result<()> {
        let labels = [observation.label_value.as_str()];
        match self {
            FamilyBuilder::Counter(vec) => vec
                .get_metric_with_label_values(&labels)?
                .inc_by(observation.value),
            FamilyBuilder::Gauge(vec) => vec
                .get_metric_with_label_values(&labels)?
                .set(observation.value),
        }
        Ok(())
    }

    fn collect(&self) -> Vec<MetricFamily> {
        match self {
            FamilyBuilder::Counter(vec) => vec.collect(),
            FamilyBuilder::Gauge(vec) => vec.collect(),
        }
    }
}
