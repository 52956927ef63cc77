//! Unit tests for configuration parsing, validation, and env overrides.

use std::path::PathBuf;

use serial_test::serial;

use chat_bridge::{config::GlobalConfig, AppError};

const FULL_TOML: &str = r#"
api_id = 12345
backend_url = "https://backend.example.com/"
data_dir = "/var/lib/bridge"

[rpc]
max_concurrent_requests = 8
output_capacity = 500

[sync]
queue_capacity = 10
workers = 2
request_timeout_seconds = 5
max_retries = 1
retry_base_millis = 100

[supervisor]
policy_refresh_seconds = 10
reconnect_attempts = 3
reconnect_base_millis = 250
"#;

#[test]
fn full_config_parses_every_table() {
    let config = GlobalConfig::from_toml_str(FULL_TOML).expect("valid config");

    assert_eq!(config.api_id, 12345);
    assert_eq!(config.backend_url(), Some("https://backend.example.com"));
    assert_eq!(config.data_dir, PathBuf::from("/var/lib/bridge"));
    assert_eq!(config.rpc.max_concurrent_requests, 8);
    assert_eq!(config.sync.queue_capacity, 10);
    assert_eq!(config.sync.max_retries, 1);
    assert_eq!(config.supervisor.reconnect_attempts, 3);
    assert_eq!(
        config.overflow_db_path(),
        PathBuf::from("/var/lib/bridge/queue.sqlite3")
    );
}

#[test]
fn empty_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("defaults are valid");

    assert_eq!(config.rpc.max_concurrent_requests, 32);
    assert_eq!(config.rpc.output_capacity, 10_000);
    assert_eq!(config.sync.queue_capacity, 2000);
    assert_eq!(config.sync.workers, 4);
    assert_eq!(config.sync.request_timeout_seconds, 20);
    assert_eq!(config.sync.max_retries, 2);
    assert_eq!(config.supervisor.policy_refresh_seconds, 30);
    assert_eq!(config.supervisor.refresh_error_window_seconds, 60);
    assert_eq!(config.supervisor.reconnect_attempts, 5);
    assert_eq!(config.data_dir, PathBuf::from(".queue"));
    assert_eq!(config.backend_url(), None);
}

#[test]
fn blank_backend_url_disables_sync() {
    let config = GlobalConfig::from_toml_str("backend_url = \"   \"").expect("valid config");
    assert_eq!(config.backend_url(), None);
}

#[test]
fn zero_queue_capacity_is_rejected() {
    let err = GlobalConfig::from_toml_str("[sync]\nqueue_capacity = 0").expect_err("invalid");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("queue_capacity")));
}

#[test]
fn zero_workers_is_rejected() {
    let err = GlobalConfig::from_toml_str("[sync]\nworkers = 0").expect_err("invalid");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn zero_reconnect_attempts_is_rejected() {
    let err =
        GlobalConfig::from_toml_str("[supervisor]\nreconnect_attempts = 0").expect_err("invalid");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn zero_intervals_are_rejected() {
    for (table, key) in [
        ("supervisor", "policy_refresh_seconds"),
        ("supervisor", "reconnect_base_millis"),
        ("sync", "overflow_poll_millis"),
        ("sync", "request_timeout_seconds"),
    ] {
        let err = GlobalConfig::from_toml_str(&format!("[{table}]\n{key} = 0"))
            .expect_err("zero interval");
        assert!(
            matches!(&err, AppError::Config(msg) if msg == &format!("{table}.{key} must be greater than zero")),
            "unexpected error for {key}: {err}"
        );
    }
}

#[test]
fn malformed_toml_is_config_error() {
    let err = GlobalConfig::from_toml_str("api_id = [").expect_err("invalid");
    assert!(err.to_string().starts_with("config:"));
}

#[test]
fn missing_file_is_config_error() {
    let err = GlobalConfig::load_from_path("/nonexistent/bridge.toml").expect_err("missing");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("failed to read config")));
}

#[test]
#[serial]
fn env_overrides_replace_api_id_and_backend() {
    std::env::set_var("BRIDGE_API_ID", "777");
    std::env::set_var("BRIDGE_BACKEND_URL", "http://localhost:3210");

    let mut config = GlobalConfig::default();
    let result = config.apply_env_overrides();

    std::env::remove_var("BRIDGE_API_ID");
    std::env::remove_var("BRIDGE_BACKEND_URL");

    result.expect("overrides apply");
    assert_eq!(config.api_id, 777);
    assert_eq!(config.backend_url(), Some("http://localhost:3210"));
}

#[test]
#[serial]
fn non_numeric_api_id_override_is_rejected() {
    std::env::set_var("BRIDGE_API_ID", "abc");

    let mut config = GlobalConfig::default();
    let result = config.apply_env_overrides();

    std::env::remove_var("BRIDGE_API_ID");

    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("BRIDGE_API_ID")));
}

#[tokio::test]
#[serial]
async fn api_hash_falls_back_to_env_var() {
    std::env::set_var("BRIDGE_API_HASH", "test-hash");

    let mut config = GlobalConfig {
        api_id: 42,
        ..GlobalConfig::default()
    };
    let result = config.load_credentials().await;

    std::env::remove_var("BRIDGE_API_HASH");

    result.expect("credentials load");
    // The keychain may hold a real entry on developer machines.
    assert!(!config.api_hash.is_empty());
}

#[tokio::test]
#[serial]
async fn unset_api_id_fails_credential_loading() {
    std::env::set_var("BRIDGE_API_HASH", "test-hash");

    let mut config = GlobalConfig::default();
    let result = config.load_credentials().await;

    std::env::remove_var("BRIDGE_API_HASH");

    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("api_id")));
}
