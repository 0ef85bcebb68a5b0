use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("Failed to connect to {address}: {source}")]
    ConnectFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out waiting for the natasha control channel")]
    Timeout,

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Truncated reply: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Malformed reply: {0}")]
    Malformed(String),

    #[error("Desynchronized session: {pending} unread reply bytes before sending {command}")]
    Desynchronized {
        command: &'static str,
        pending: usize,
    },

    #[error("Peer rejected {command} with status {status}")]
    PeerStatus { command: &'static str, status: u8 },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Metrics error: {0}")]
    MetricsError(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ExporterError {
    /// Short machine-friendly name, used as a log field.
    pub const fn kind(&self) -> &'static str {
        match self {
            ExporterError::ConnectFailed { .. } => "connect_failed",
            ExporterError::Timeout => "timeout",
            ExporterError::ConnectionClosed => "connection_closed",
            ExporterError::Truncated { .. } => "truncated",
            ExporterError::Malformed(_) => "malformed",
            ExporterError::Desynchronized { .. } => "desynchronized",
            ExporterError::PeerStatus { .. } => "peer_status",
            ExporterError::ConfigError(_) => "config",
            ExporterError::MetricsError(_) => "metrics",
            ExporterError::IoError(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, ExporterError>;
