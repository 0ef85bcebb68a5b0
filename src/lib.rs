pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod version;

pub use error::{ExporterError, Result};

pub use version::VERSION;
