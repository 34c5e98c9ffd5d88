//! Environment-backed configuration.
//!
//! Every setting has a default. Override with `RAGLINE_*` environment variables.

pub mod error;

#[cfg(test)]
mod tests;

pub use error::ConfigError;

use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::ResultCacheConfig;
use crate::constants::{DEFAULT_MAX_QUERY_LEN, DEFAULT_TOP_K};
use crate::embedding::{BatcherConfig, EmbeddingCacheConfig};
use crate::monitor::AlertThresholds;
use crate::pool::PoolConfig;
use crate::retry::RetryPolicy;
use crate::vectordb::{DEFAULT_COLLECTION_NAME, DEFAULT_TEXT_FIELD};

/// Default Qdrant URL used when `RAGLINE_QDRANT_URL` is not set.
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";

/// Default embedding model name sent to the provider.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default chat model used for answer generation.
pub const DEFAULT_GENERATION_MODEL: &str = "gpt-4o-mini";

/// Service configuration loaded from environment variables.
///
/// Use [`Config::from_env`] to read `RAGLINE_*` overrides on top of defaults,
/// then [`Config::validate`] before building the service.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port. Default: `8080`.
    pub port: u16,

    /// IP address to bind to. Default: `127.0.0.1`.
    pub bind_addr: IpAddr,

    /// Qdrant endpoint URL. Default: `http://localhost:6334`.
    pub qdrant_url: String,

    /// Collection searched for documents. Default: `documents`.
    pub collection: String,

    /// Payload field holding document text. Default: `page_content`.
    pub text_field: String,

    /// OpenAI-compatible embeddings endpoint. `None` runs the stub embedder.
    pub embedding_url: Option<String>,

    pub embedding_model: String,

    pub embedding_api_key: Option<String>,

    pub embedding_timeout: Duration,

    pub generation_model: String,

    /// Answer with the mock generator instead of calling a model.
    pub mock_provider: bool,

    pub max_query_len: usize,

    /// Documents fetched per query. Default: `5`.
    pub top_k: usize,

    pub result_cache: ResultCacheConfig,
    pub embedding_cache: EmbeddingCacheConfig,
    pub batcher: BatcherConfig,
    pub pool: PoolConfig,
    pub retry: RetryPolicy,
    pub alerts: AlertThresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_addr: IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)),
            qdrant_url: DEFAULT_QDRANT_URL.to_string(),
            collection: DEFAULT_COLLECTION_NAME.to_string(),
            text_field: DEFAULT_TEXT_FIELD.to_string(),
            embedding_url: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_api_key: None,
            embedding_timeout: Duration::from_secs(30),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            mock_provider: false,
            max_query_len: DEFAULT_MAX_QUERY_LEN,
            top_k: DEFAULT_TOP_K,
            result_cache: ResultCacheConfig::default(),
            embedding_cache: EmbeddingCacheConfig::default(),
            batcher: BatcherConfig::default(),
            pool: PoolConfig::default(),
            retry: RetryPolicy::default(),
            alerts: AlertThresholds::default(),
        }
    }
}

impl Config {
    const ENV_PORT: &'static str = "RAGLINE_PORT";
    const ENV_BIND_ADDR: &'static str = "RAGLINE_BIND_ADDR";
    const ENV_QDRANT_URL: &'static str = "RAGLINE_QDRANT_URL";
    const ENV_COLLECTION: &'static str = "RAGLINE_COLLECTION";
    const ENV_TEXT_FIELD: &'static str = "RAGLINE_TEXT_FIELD";
    const ENV_EMBEDDING_URL: &'static str = "RAGLINE_EMBEDDING_URL";
    const ENV_EMBEDDING_MODEL: &'static str = "RAGLINE_EMBEDDING_MODEL";
    const ENV_EMBEDDING_API_KEY: &'static str = "RAGLINE_EMBEDDING_API_KEY";
    const ENV_EMBEDDING_TIMEOUT_SECS: &'static str = "RAGLINE_EMBEDDING_TIMEOUT_SECS";
    const ENV_GENERATION_MODEL: &'static str = "RAGLINE_GENERATION_MODEL";
    const ENV_MOCK_PROVIDER: &'static str = "RAGLINE_MOCK_PROVIDER";
    const ENV_MAX_QUERY_LEN: &'static str = "RAGLINE_MAX_QUERY_LEN";
    const ENV_TOP_K: &'static str = "RAGLINE_TOP_K";
    const ENV_CACHE_MAX_ENTRIES: &'static str = "RAGLINE_CACHE_MAX_ENTRIES";
    const ENV_CACHE_TTL_SECS: &'static str = "RAGLINE_CACHE_TTL_SECS";
    const ENV_SIMILARITY_THRESHOLD: &'static str = "RAGLINE_SIMILARITY_THRESHOLD";
    const ENV_SWEEP_INTERVAL_SECS: &'static str = "RAGLINE_SWEEP_INTERVAL_SECS";
    const ENV_EMBEDDING_CACHE_MAX_ENTRIES: &'static str = "RAGLINE_EMBEDDING_CACHE_MAX_ENTRIES";
    const ENV_EMBEDDING_CACHE_TTL_SECS: &'static str = "RAGLINE_EMBEDDING_CACHE_TTL_SECS";
    const ENV_BATCH_SIZE: &'static str = "RAGLINE_BATCH_SIZE";
    const ENV_BATCH_DELAY_MS: &'static str = "RAGLINE_BATCH_DELAY_MS";
    const ENV_POOL_MAX_SIZE: &'static str = "RAGLINE_POOL_MAX_SIZE";
    const ENV_POOL_TIMEOUT_MS: &'static str = "RAGLINE_POOL_TIMEOUT_MS";
    const ENV_HEALTH_CHECK_INTERVAL_SECS: &'static str = "RAGLINE_HEALTH_CHECK_INTERVAL_SECS";
    const ENV_RETRY_ATTEMPTS: &'static str = "RAGLINE_RETRY_ATTEMPTS";
    const ENV_RETRY_BASE_DELAY_MS: &'static str = "RAGLINE_RETRY_BASE_DELAY_MS";
    const ENV_RETRY_MAX_DELAY_MS: &'static str = "RAGLINE_RETRY_MAX_DELAY_MS";

    /// Loads configuration from environment variables (falling back to defaults).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = Self::parse_port_from_env(defaults.port)?;
        let bind_addr = Self::parse_bind_addr_from_env(defaults.bind_addr)?;

        let result_cache = ResultCacheConfig {
            max_entries: Self::parse_from_env(
                Self::ENV_CACHE_MAX_ENTRIES,
                defaults.result_cache.max_entries,
            )?,
            ttl: Self::parse_secs_from_env(Self::ENV_CACHE_TTL_SECS, defaults.result_cache.ttl)?,
            similarity_threshold: Self::parse_threshold_from_env(
                defaults.result_cache.similarity_threshold,
            )?,
            sweep_interval: Self::parse_secs_from_env(
                Self::ENV_SWEEP_INTERVAL_SECS,
                defaults.result_cache.sweep_interval,
            )?,
        };

        let embedding_cache = EmbeddingCacheConfig {
            max_entries: Self::parse_from_env(
                Self::ENV_EMBEDDING_CACHE_MAX_ENTRIES,
                defaults.embedding_cache.max_entries,
            )?,
            ttl: Self::parse_secs_from_env(
                Self::ENV_EMBEDDING_CACHE_TTL_SECS,
                defaults.embedding_cache.ttl,
            )?,
        };

        let batcher = BatcherConfig {
            batch_size: Self::parse_from_env(Self::ENV_BATCH_SIZE, defaults.batcher.batch_size)?,
            flush_delay: Self::parse_millis_from_env(
                Self::ENV_BATCH_DELAY_MS,
                defaults.batcher.flush_delay,
            )?,
        };

        let pool = PoolConfig {
            max_size: Self::parse_from_env(Self::ENV_POOL_MAX_SIZE, defaults.pool.max_size)?,
            acquire_timeout: Self::parse_millis_from_env(
                Self::ENV_POOL_TIMEOUT_MS,
                defaults.pool.acquire_timeout,
            )?,
            health_check_interval: Self::parse_secs_from_env(
                Self::ENV_HEALTH_CHECK_INTERVAL_SECS,
                defaults.pool.health_check_interval,
            )?,
            ..defaults.pool
        };

        let retry = RetryPolicy {
            max_attempts: Self::parse_from_env(
                Self::ENV_RETRY_ATTEMPTS,
                defaults.retry.max_attempts,
            )?,
            base_delay: Self::parse_millis_from_env(
                Self::ENV_RETRY_BASE_DELAY_MS,
                defaults.retry.base_delay,
            )?,
            max_delay: Self::parse_millis_from_env(
                Self::ENV_RETRY_MAX_DELAY_MS,
                defaults.retry.max_delay,
            )?,
        };

        Ok(Self {
            port,
            bind_addr,
            qdrant_url: Self::parse_string_from_env(Self::ENV_QDRANT_URL, defaults.qdrant_url),
            collection: Self::parse_string_from_env(Self::ENV_COLLECTION, defaults.collection),
            text_field: Self::parse_string_from_env(Self::ENV_TEXT_FIELD, defaults.text_field),
            embedding_url: Self::parse_optional_string_from_env(Self::ENV_EMBEDDING_URL),
            embedding_model: Self::parse_string_from_env(
                Self::ENV_EMBEDDING_MODEL,
                defaults.embedding_model,
            ),
            embedding_api_key: Self::parse_optional_string_from_env(Self::ENV_EMBEDDING_API_KEY),
            embedding_timeout: Self::parse_secs_from_env(
                Self::ENV_EMBEDDING_TIMEOUT_SECS,
                defaults.embedding_timeout,
            )?,
            generation_model: Self::parse_string_from_env(
                Self::ENV_GENERATION_MODEL,
                defaults.generation_model,
            ),
            mock_provider: env::var_os(Self::ENV_MOCK_PROVIDER).is_some_and(|v| !v.is_empty()),
            max_query_len: Self::parse_from_env(Self::ENV_MAX_QUERY_LEN, defaults.max_query_len)?,
            top_k: Self::parse_from_env(Self::ENV_TOP_K, defaults.top_k)?,
            result_cache,
            embedding_cache,
            batcher,
            pool,
            retry,
            alerts: defaults.alerts,
        })
    }

    /// Checks cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive: [(&'static str, u64); 7] = [
            (Self::ENV_CACHE_MAX_ENTRIES, self.result_cache.max_entries as u64),
            (Self::ENV_EMBEDDING_CACHE_MAX_ENTRIES, self.embedding_cache.max_entries),
            (Self::ENV_BATCH_SIZE, self.batcher.batch_size as u64),
            (Self::ENV_POOL_MAX_SIZE, self.pool.max_size as u64),
            (Self::ENV_TOP_K, self.top_k as u64),
            (Self::ENV_MAX_QUERY_LEN, self.max_query_len as u64),
            (Self::ENV_RETRY_ATTEMPTS, u64::from(self.retry.max_attempts)),
        ];
        if let Some(&(name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ZeroValue { name });
        }

        if let Some(threshold) = self.result_cache.similarity_threshold
            && !(0.0..=1.0).contains(&threshold)
        {
            return Err(ConfigError::OutOfRange {
                name: Self::ENV_SIMILARITY_THRESHOLD,
                value: f64::from(threshold),
                min: 0.0,
                max: 1.0,
            });
        }

        if self.result_cache.ttl <= self.result_cache.sweep_interval {
            return Err(ConfigError::TtlNotAboveSweep {
                ttl_secs: self.result_cache.ttl.as_secs(),
                sweep_secs: self.result_cache.sweep_interval.as_secs(),
            });
        }

        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::RetryDelays {
                base_ms: self.retry.base_delay.as_millis() as u64,
                max_ms: self.retry.max_delay.as_millis() as u64,
            });
        }

        let rates = [
            ("max_error_rate", self.alerts.max_error_rate),
            ("max_pool_exhaustion_rate", self.alerts.max_pool_exhaustion_rate),
            ("min_cache_hit_rate", self.alerts.min_cache_hit_rate),
        ];
        for (name, value) in rates {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    name,
                    value,
                    min: 0.0,
                    max: 1.0,
                });
            }
        }

        Ok(())
    }

    /// Returns `"{bind_addr}:{port}"` (useful for logging/binding).
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    fn parse_port_from_env(default: u16) -> Result<u16, ConfigError> {
        match env::var(Self::ENV_PORT) {
            Ok(value) => {
                let port: u16 = value.parse().map_err(|e| ConfigError::PortParseError {
                    value: value.clone(),
                    source: e,
                })?;

                if port == 0 {
                    return Err(ConfigError::InvalidPort { value });
                }

                Ok(port)
            }
            Err(_) => Ok(default),
        }
    }

    fn parse_bind_addr_from_env(default: IpAddr) -> Result<IpAddr, ConfigError> {
        match env::var(Self::ENV_BIND_ADDR) {
            Ok(value) => value
                .parse()
                .map_err(|e| ConfigError::InvalidBindAddr { value, source: e }),
            Err(_) => Ok(default),
        }
    }

    /// `off`, `none`, or an empty value disables similarity lookups.
    fn parse_threshold_from_env(default: Option<f32>) -> Result<Option<f32>, ConfigError> {
        match env::var(Self::ENV_SIMILARITY_THRESHOLD) {
            Ok(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty()
                    || trimmed.eq_ignore_ascii_case("off")
                    || trimmed.eq_ignore_ascii_case("none")
                {
                    return Ok(None);
                }
                trimmed
                    .parse::<f32>()
                    .map(Some)
                    .map_err(|e| ConfigError::InvalidValue {
                        name: Self::ENV_SIMILARITY_THRESHOLD,
                        value: value.clone(),
                        reason: e.to_string(),
                    })
            }
            Err(_) => Ok(default),
        }
    }

    fn parse_from_env<T>(name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(value) => value
                .trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    name,
                    value: value.clone(),
                    reason: e.to_string(),
                }),
            Err(_) => Ok(default),
        }
    }

    fn parse_secs_from_env(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        Self::parse_from_env(name, default.as_secs()).map(Duration::from_secs)
    }

    fn parse_millis_from_env(
        name: &'static str,
        default: Duration,
    ) -> Result<Duration, ConfigError> {
        Self::parse_from_env(name, default.as_millis() as u64).map(Duration::from_millis)
    }

    fn parse_string_from_env(var_name: &str, default: String) -> String {
        env::var(var_name).unwrap_or(default)
    }

    fn parse_optional_string_from_env(var_name: &str) -> Option<String> {
        env::var(var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}
