use thiserror::Error;

/// Errors raised while loading `cortex.toml`.
///
/// The kernel never fails on these: a load error degrades to the default
/// configuration and is reported as a warning.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration from {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: ::config::ConfigError,
    },

    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}
