pub mod catalog;
pub mod collector;
pub mod scrape;

pub use catalog::MetricCatalog;
pub use collector::NatashaCollector;
pub use scrape::{Observation, ScrapeResult, Scraper};

use crate::config::TargetConfig;
use crate::version::BuildInfo;
use crate::Result;
use prometheus::Registry;

/// Builds the registry served on the metrics endpoint.
pub fn new_registry(target: &TargetConfig, build: &BuildInfo) -> Result<Registry> {
    let registry = Registry::new();

    let collector = NatashaCollector::new(MetricCatalog::new()?, Scraper::new(target), build)?;
    registry.register(Box::new(collector))?;

    #[cfg(target_os = "linux")]
    registry.register(Box::new(
        prometheus::process_collector::ProcessCollector::for_self(),
    ))?;

    Ok(registry)
}
