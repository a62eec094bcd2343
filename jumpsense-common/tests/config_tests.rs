//! Configuration resolution tests
//!
//! Covers the lookup priority (CLI > environment > platform file > defaults)
//! and graceful fallback when no file exists.
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate the config environment variable are marked with
//! #[serial] so they run sequentially.

use jumpsense_common::config::{
    load_or_default, write_toml_config, ConfigResolver, ConfigSource, LoggingConfig,
};
use jumpsense_common::Error;
use serde::{Deserialize, Serialize};
use serial_test::serial;
use std::env;

const TEST_ENV_VAR: &str = "JUMPSENSE_CONFIG_TEST";

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct TestConfig {
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    sample_rate_hz: Option<f64>,
}

#[test]
#[serial]
fn test_cli_argument_wins_over_environment() {
    let dir = tempfile::tempdir().unwrap();
    let cli_path = dir.path().join("cli.toml");
    let env_path = dir.path().join("env.toml");
    std::fs::write(&cli_path, "").unwrap();
    std::fs::write(&env_path, "").unwrap();
    env::set_var(TEST_ENV_VAR, &env_path);

    let resolver = ConfigResolver::new("jumpsense-test").with_env_var(TEST_ENV_VAR);
    let resolved = resolver.resolve(Some(&cli_path)).unwrap().unwrap();

    assert_eq!(resolved.path, cli_path);
    assert_eq!(resolved.source, ConfigSource::CommandLine);

    env::remove_var(TEST_ENV_VAR);
}

#[test]
#[serial]
fn test_environment_variable_used_without_cli() {
    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join("env.toml");
    std::fs::write(&env_path, "sample_rate_hz = 120.0\n").unwrap();
    env::set_var(TEST_ENV_VAR, &env_path);

    let resolver = ConfigResolver::new("jumpsense-test").with_env_var(TEST_ENV_VAR);
    let resolved = resolver.resolve(None).unwrap().unwrap();
    assert_eq!(resolved.source, ConfigSource::Environment);

    let config: TestConfig = load_or_default(Some(&resolved)).unwrap();
    assert_eq!(config.sample_rate_hz, Some(120.0));
    assert_eq!(config.logging, LoggingConfig::default());

    env::remove_var(TEST_ENV_VAR);
}

#[test]
#[serial]
fn test_missing_environment_file_is_an_error() {
    env::set_var(TEST_ENV_VAR, "/tmp/jumpsense-does-not-exist/config.toml");

    let resolver = ConfigResolver::new("jumpsense-test").with_env_var(TEST_ENV_VAR);
    let result = resolver.resolve(None);
    assert!(matches!(result, Err(Error::Config(_))));

    env::remove_var(TEST_ENV_VAR);
}

#[test]
#[serial]
fn test_no_file_falls_back_to_defaults() {
    env::remove_var(TEST_ENV_VAR);

    // App name chosen so no platform config file can exist for it
    let resolver = ConfigResolver::new("jumpsense-test-nonexistent-app").with_env_var(TEST_ENV_VAR);
    let resolved = resolver.resolve(None).unwrap();
    assert!(resolved.is_none());

    let config: TestConfig = load_or_default(resolved.as_ref()).unwrap();
    assert_eq!(config, TestConfig::default());
}

#[test]
fn test_written_config_is_loadable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let config = TestConfig {
        logging: LoggingConfig {
            level: "warn".to_string(),
            file: Some(dir.path().join("jumpsense.log")),
        },
        sample_rate_hz: Some(60.0),
    };

    write_toml_config(&config, &path).unwrap();
    let resolver = ConfigResolver::new("jumpsense-test");
    let resolved = resolver.resolve(Some(&path)).unwrap();
    let loaded: TestConfig = load_or_default(resolved.as_ref()).unwrap();
    assert_eq!(loaded, config);
}
