//! Build metadata reported through `natasha_build_info`.
//!
//! Revision, build date and rustc version are injected at compile time through
//! the `NATASHA_EXPORTER_REVISION`, `NATASHA_EXPORTER_BUILD_DATE` and
//! `NATASHA_EXPORTER_RUSTC_VERSION` environment variables.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: String,
    pub revision: String,
    pub build_date: String,
    pub rust_version: String,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION.to_string(),
            revision: option_env!("NATASHA_EXPORTER_REVISION")
                .unwrap_or(UNKNOWN)
                .to_string(),
            build_date: option_env!("NATASHA_EXPORTER_BUILD_DATE")
                .unwrap_or(UNKNOWN)
                .to_string(),
            rust_version: option_env!("NATASHA_EXPORTER_RUSTC_VERSION")
                .unwrap_or(UNKNOWN)
                .to_string(),
        }
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::current()
    }
}
