//! Configuration error types.

use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Port value is outside valid range (1-65535).
    #[error("invalid port '{value}': must be between 1 and 65535")]
    InvalidPort { value: String },

    /// Port string could not be parsed as a number.
    #[error("failed to parse port '{value}': {source}")]
    PortParseError {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    /// Bind address string could not be parsed.
    #[error("failed to parse bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },

    /// An environment variable held a value of the wrong type.
    #[error("invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// A size or count that must be positive was zero.
    #[error("{name} must be greater than zero")]
    ZeroValue { name: &'static str },

    /// A ratio fell outside its allowed range.
    #[error("{name} is {value}, expected a value between {min} and {max}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Entries would expire before the first sweep could ever see them.
    #[error("cache TTL ({ttl_secs}s) must be longer than the sweep interval ({sweep_secs}s)")]
    TtlNotAboveSweep { ttl_secs: u64, sweep_secs: u64 },

    /// Backoff base delay exceeds its cap.
    #[error("retry base delay ({base_ms}ms) exceeds max delay ({max_ms}ms)")]
    RetryDelays { base_ms: u64, max_ms: u64 },
}
