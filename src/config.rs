use crate::{ExporterError, Result};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_WEB_ADDRESS: &str = "0.0.0.0:9507";
pub const DEFAULT_METRICS_PATH: &str = "/natasha_metrics";
pub const DEFAULT_TARGET_ADDRESS: &str = "localhost:4242";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Names a file of `KEY=value` lines loaded into the environment before the
/// command line is parsed.
pub const ENV_FILE_VAR: &str = "NATASHA_EXPORTER_ENV_FILE";

/// HTTP exposition settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: String,
    pub path: String,
}

/// The natasha control channel to scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub address: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub pretty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server: ServerConfig,
    pub target: TargetConfig,
    pub logs: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                addr: DEFAULT_WEB_ADDRESS.to_string(),
                path: DEFAULT_METRICS_PATH.to_string(),
            },
            target: TargetConfig {
                address: DEFAULT_TARGET_ADDRESS.to_string(),
                timeout: DEFAULT_REQUEST_TIMEOUT,
            },
            logs: LogConfig {
                level: "info".to_string(),
                pretty: false,
            },
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.target.timeout.is_zero() {
            return Err(ExporterError::ConfigError(
                "request timeout must be greater than zero".to_string(),
            ));
        }

        if self.target.address.is_empty() {
            return Err(ExporterError::ConfigError(
                "target address must not be empty".to_string(),
            ));
        }

        if !self.server.path.starts_with('/') || self.server.path.len() < 2 {
            return Err(ExporterError::ConfigError(format!(
                "metrics path {:?} must start with '/' and not be the root",
                self.server.path
            )));
        }

        Ok(())
    }
}

/// Loads `path` into the process environment. Variables that are already set
/// keep their value.
pub fn load_env_file(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    dotenvy::from_path(path).map_err(|e| {
        ExporterError::ConfigError(format!("failed to load env file {}: {}", path.display(), e))
    })
}

/// Parses durations like `500ms`, `5s`, `1m` or `1h`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (num, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, Duration::from_millis(1))
    } else if let Some(num) = s.strip_suffix('s') {
        (num, Duration::from_secs(1))
    } else if let Some(num) = s.strip_suffix('m') {
        (num, Duration::from_secs(60))
    } else if let Some(num) = s.strip_suffix('h') {
        (num, Duration::from_secs(3600))
    } else {
        return Err(ExporterError::ConfigError(format!(
            "invalid duration {:?}, use: 500ms, 5s, 1m, 1h",
            s
        )));
    };

    let value: u32 = num
        .trim()
        .parse()
        .map_err(|_| ExporterError::ConfigError(format!("invalid duration number {:?}", num)))?;

    Ok(unit * value)
}
