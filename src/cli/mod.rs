pub mod commands;

use crate::config::{
    self, Config, LogConfig, ServerConfig, TargetConfig, DEFAULT_METRICS_PATH,
    DEFAULT_TARGET_ADDRESS, DEFAULT_WEB_ADDRESS,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "natasha-exporter")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Prometheus exporter for the natasha DPDK NAT application", long_about = None)]
pub struct Cli {
    #[arg(
        long = "log.level",
        env = "NATASHA_EXPORTER_LOG_LEVEL",
        default_value = "info",
        global = true,
        help = "Only log messages with given severity"
    )]
    pub log_level: String,

    #[arg(
        long = "log.pretty",
        env = "NATASHA_EXPORTER_LOG_PRETTY",
        global = true,
        help = "Enable pretty messages for logging"
    )]
    pub log_pretty: bool,

    #[arg(
        long = "web.address",
        env = "NATASHA_EXPORTER_WEB_ADDRESS",
        default_value = DEFAULT_WEB_ADDRESS,
        global = true,
        help = "Address to bind the metrics server"
    )]
    pub web_address: String,

    #[arg(
        long = "web.path",
        env = "NATASHA_EXPORTER_PATH",
        default_value = DEFAULT_METRICS_PATH,
        global = true,
        help = "Metrics path"
    )]
    pub web_path: String,

    #[arg(
        long = "target.address",
        env = "NATASHA_EXPORTER_TARGET_ADDRESS",
        default_value = DEFAULT_TARGET_ADDRESS,
        global = true,
        help = "Address of the natasha control channel"
    )]
    pub target_address: String,

    #[arg(
        long = "request.timeout",
        env = "NATASHA_EXPORTER_REQUEST_TIMEOUT",
        default_value = "5s",
        value_parser = parse_timeout,
        global = true,
        help = "Request timeout as duration (e.g. 500ms, 5s, 1m)"
    )]
    pub request_timeout: Duration,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn config(&self) -> Config {
        Config {
            server: ServerConfig {
                addr: self.web_address.clone(),
                path: self.web_path.clone(),
            },
            target: TargetConfig {
                address: self.target_address.clone(),
                timeout: self.request_timeout,
            },
            logs: LogConfig {
                level: self.log_level.clone(),
                pretty: self.log_pretty,
            },
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    #[command(about = "Serve natasha metrics over HTTP (default)")]
    Server,
    #[command(about = "Scrape natasha once and print the result")]
    Scrape {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, help = "Output format")]
        format: OutputFormat,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

fn parse_timeout(s: &str) -> std::result::Result<Duration, String> {
    config::parse_duration(s).map_err(|e| e.to_string())
}
