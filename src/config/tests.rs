use super::*;
use serial_test::serial;
use std::env;
use std::net::IpAddr;
use std::time::Duration;

fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    // SAFETY: Test code only, we accept the thread-safety risk in tests.
    for (key, value) in vars {
        unsafe { env::set_var(key, value) };
    }

    let result = f();

    // SAFETY: Test code only, we accept the thread-safety risk in tests.
    for (key, _) in vars {
        unsafe { env::remove_var(key) };
    }

    result
}

fn clear_ragline_env() {
    let keys: Vec<String> = env::vars()
        .map(|(k, _)| k)
        .filter(|k| k.starts_with("RAGLINE_"))
        .collect();
    // SAFETY: Test code only, we accept the thread-safety risk in tests.
    for key in keys {
        unsafe { env::remove_var(key) };
    }
}

#[test]
fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.port, 8080);
    assert_eq!(
        config.bind_addr,
        IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1))
    );
    assert_eq!(config.qdrant_url, "http://localhost:6334");
    assert_eq!(config.collection, "documents");
    assert_eq!(config.text_field, "page_content");
    assert!(config.embedding_url.is_none());
    assert_eq!(config.result_cache.similarity_threshold, Some(0.80));
    assert_eq!(config.result_cache.ttl, Duration::from_secs(1800));
    assert_eq!(config.batcher.batch_size, 100);
    assert_eq!(config.batcher.flush_delay, Duration::from_millis(20));
    assert_eq!(config.pool.max_size, 20);
    assert!(config.validate().is_ok());
}

#[test]
fn test_socket_addr() {
    let config = Config {
        port: 3000,
        bind_addr: IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        ..Default::default()
    };
    assert_eq!(config.socket_addr(), "0.0.0.0:3000");
}

#[test]
#[serial]
fn test_from_env_with_defaults() {
    clear_ragline_env();

    let config = Config::from_env().expect("should parse with defaults");
    assert_eq!(config.port, 8080);
    assert_eq!(config.top_k, 5);
    assert!(!config.mock_provider);
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_ragline_env();

    with_env_vars(
        &[
            ("RAGLINE_PORT", "3000"),
            ("RAGLINE_COLLECTION", "bills"),
            ("RAGLINE_EMBEDDING_URL", "http://embed:8000/v1/embeddings"),
            ("RAGLINE_MOCK_PROVIDER", "1"),
            ("RAGLINE_CACHE_TTL_SECS", "600"),
            ("RAGLINE_SIMILARITY_THRESHOLD", "0.9"),
            ("RAGLINE_BATCH_SIZE", "32"),
            ("RAGLINE_BATCH_DELAY_MS", "5"),
            ("RAGLINE_POOL_MAX_SIZE", "4"),
            ("RAGLINE_POOL_TIMEOUT_MS", "250"),
            ("RAGLINE_RETRY_ATTEMPTS", "5"),
        ],
        || {
            let config = Config::from_env().expect("should parse");

            assert_eq!(config.port, 3000);
            assert_eq!(config.collection, "bills");
            assert_eq!(
                config.embedding_url.as_deref(),
                Some("http://embed:8000/v1/embeddings")
            );
            assert!(config.mock_provider);
            assert_eq!(config.result_cache.ttl, Duration::from_secs(600));
            assert_eq!(config.result_cache.similarity_threshold, Some(0.9));
            assert_eq!(config.batcher.batch_size, 32);
            assert_eq!(config.batcher.flush_delay, Duration::from_millis(5));
            assert_eq!(config.pool.max_size, 4);
            assert_eq!(config.pool.acquire_timeout, Duration::from_millis(250));
            assert_eq!(config.retry.max_attempts, 5);
        },
    );
}

#[test]
#[serial]
fn test_similarity_can_be_disabled() {
    clear_ragline_env();

    with_env_vars(&[("RAGLINE_SIMILARITY_THRESHOLD", "off")], || {
        let config = Config::from_env().expect("should parse");
        assert_eq!(config.result_cache.similarity_threshold, None);
        assert!(config.validate().is_ok());
    });
}

#[test]
#[serial]
fn test_invalid_numeric_value() {
    clear_ragline_env();

    with_env_vars(&[("RAGLINE_BATCH_SIZE", "lots")], || {
        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "RAGLINE_BATCH_SIZE",
                ..
            }
        ));
    });
}

#[test]
#[serial]
fn test_invalid_port_zero() {
    clear_ragline_env();

    with_env_vars(&[("RAGLINE_PORT", "0")], || {
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort { .. }));
        assert!(err.to_string().contains("invalid port"));
    });
}

#[test]
#[serial]
fn test_invalid_bind_addr() {
    clear_ragline_env();

    with_env_vars(&[("RAGLINE_BIND_ADDR", "not.an.ip.address")], || {
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBindAddr { .. }));
    });
}

#[test]
fn test_validate_rejects_ttl_not_above_sweep() {
    let mut config = Config::default();
    config.result_cache.ttl = Duration::from_secs(60);
    config.result_cache.sweep_interval = Duration::from_secs(60);

    assert!(matches!(
        config.validate(),
        Err(ConfigError::TtlNotAboveSweep {
            ttl_secs: 60,
            sweep_secs: 60
        })
    ));
}

#[test]
fn test_validate_rejects_threshold_out_of_range() {
    let mut config = Config::default();
    config.result_cache.similarity_threshold = Some(1.5);
    assert!(matches!(
        config.validate(),
        Err(ConfigError::OutOfRange { .. })
    ));
}

#[test]
fn test_validate_rejects_zero_sizes() {
    let mut config = Config::default();
    config.pool.max_size = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ZeroValue {
            name: "RAGLINE_POOL_MAX_SIZE"
        })
    ));

    let mut config = Config::default();
    config.batcher.batch_size = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ZeroValue {
            name: "RAGLINE_BATCH_SIZE"
        })
    ));
}

#[test]
fn test_validate_rejects_inverted_retry_delays() {
    let mut config = Config::default();
    config.retry.base_delay = Duration::from_secs(10);
    config.retry.max_delay = Duration::from_secs(1);
    assert!(matches!(
        config.validate(),
        Err(ConfigError::RetryDelays { .. })
    ));
}
