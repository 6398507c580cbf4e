//! Integration tests for configuration validation

#![allow(clippy::expect_used)]

use meshlink::config::{
    DeviceConfig, LoggingConfig, MeshLinkConfig, ProxyConfig, StorageConfig, TracerouteConfig,
    TracerouteFilters,
};
use std::time::Duration;

#[test]
fn test_default_config_validates() {
    let config = MeshLinkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_empty_device_host() {
    let mut config = MeshLinkConfig::default();
    config.device.host = String::from("  ");

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Device host cannot be empty")));
}

#[test]
fn test_zero_device_port() {
    let config = MeshLinkConfig::default_with_overrides(|c| c.device.port = 0);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Device port cannot be 0")));
}

#[test]
fn test_liveness_must_exceed_heartbeat() {
    let device = DeviceConfig {
        heartbeat_interval: Duration::from_secs(30),
        liveness_timeout: Duration::from_secs(30),
        ..DeviceConfig::default()
    };
    let errors = device.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("must exceed the heartbeat interval")));
}

#[test]
fn test_backoff_bounds() {
    let device = DeviceConfig {
        backoff_base: Duration::from_secs(10),
        backoff_max: Duration::from_secs(5),
        backoff_jitter: 1.5,
        ..DeviceConfig::default()
    };
    let errors = device.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Backoff max cannot be smaller than backoff base")));
    assert!(errors.iter().any(|e| e.contains("Invalid backoff jitter")));
}

#[test]
fn test_short_connect_timeout() {
    let device = DeviceConfig {
        connect_timeout: Duration::from_millis(10),
        ..DeviceConfig::default()
    };
    assert!(device
        .validate()
        .iter()
        .any(|e| e.contains("Connect timeout too short")));
}

#[test]
fn test_invalid_proxy_bind_address() {
    let proxy = ProxyConfig {
        bind_address: String::from("not-an-address"),
        ..ProxyConfig::default()
    };
    assert!(proxy
        .validate()
        .iter()
        .any(|e| e.contains("Invalid proxy listen address")));
}

#[test]
fn test_zero_max_clients() {
    let proxy = ProxyConfig {
        max_clients: 0,
        ..ProxyConfig::default()
    };
    assert!(proxy
        .validate()
        .iter()
        .any(|e| e.contains("Max clients must be greater than 0")));
}

#[test]
fn test_lowercase_denylist_entry() {
    let proxy = ProxyConfig {
        denylist: vec![String::from("admin_app")],
        ..ProxyConfig::default()
    };
    assert!(proxy
        .validate()
        .iter()
        .any(|e| e.contains("should use the upper-case type name")));
}

#[test]
fn test_proxy_port_collides_with_local_device() {
    let config = MeshLinkConfig::default_with_overrides(|c| {
        c.device.host = String::from("localhost");
        c.proxy.port = c.device.port;
    });
    assert!(config.validate().iter().any(|e| e.contains("collides")));

    // A remote device may share the port number
    let config = MeshLinkConfig::default_with_overrides(|c| {
        c.device.host = String::from("192.168.1.50");
        c.proxy.port = c.device.port;
    });
    assert!(config.validate().is_empty());
}

#[test]
fn test_invalid_hop_limit() {
    let traceroute = TracerouteConfig {
        hop_limit: 8,
        ..TracerouteConfig::default()
    };
    assert!(traceroute
        .validate()
        .iter()
        .any(|e| e.contains("Invalid traceroute hop limit")));
}

#[test]
fn test_invalid_name_pattern() {
    let filters = TracerouteFilters {
        name_pattern: Some(String::from("(unclosed")),
        ..TracerouteFilters::default()
    };
    assert!(filters
        .validate()
        .iter()
        .any(|e| e.contains("Invalid traceroute name pattern")));
}

#[test]
fn test_node_both_included_and_excluded() {
    let filters = TracerouteFilters {
        include: vec![0x10, 0x20],
        exclude: vec![0x20],
        ..TracerouteFilters::default()
    };
    let errors = filters.validate();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("both included and excluded"));
}

#[test]
fn test_zero_history_limit() {
    let storage = StorageConfig { history_limit: 0 };
    assert!(storage
        .validate()
        .iter()
        .any(|e| e.contains("History limit must be greater than 0")));

    let config = MeshLinkConfig::from_toml("[storage]\nhistory_limit = 250\n").expect("valid toml");
    assert_eq!(config.storage.history_limit, 250);
    assert!(config.validate().is_empty());
}

#[test]
fn test_empty_app_name() {
    let logging = LoggingConfig {
        app_name: String::new(),
        ..LoggingConfig::default()
    };
    assert!(logging
        .validate()
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_log_to_file_without_path() {
    let logging = LoggingConfig {
        log_to_file: true,
        log_file_path: None,
        ..LoggingConfig::default()
    };
    assert!(logging
        .validate()
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_no_logging_outputs() {
    let logging = LoggingConfig {
        log_to_console: false,
        log_to_file: false,
        ..LoggingConfig::default()
    };
    assert!(logging
        .validate()
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_validate_strict_with_valid_config() {
    let config = MeshLinkConfig::default();
    assert!(config.validate_strict().is_ok());
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let config = MeshLinkConfig::default_with_overrides(|c| {
        c.device.port = 0;
        c.proxy.max_clients = 0;
    });
    let err = config.validate_strict().expect_err("should fail");
    let message = err.to_string();
    assert!(message.contains("Device port cannot be 0"));
    assert!(message.contains("Max clients must be greater than 0"));
}

#[test]
fn test_toml_durations_are_milliseconds() {
    let config = MeshLinkConfig::from_toml(
        r#"
        [device]
        host = "10.0.0.7"
        heartbeat_interval = 60000

        [proxy]
        send_gap = 250
        denylist = ["ADMIN_APP"]

        [traceroute]
        enabled = false
        interval = 300000

        [traceroute.filters]
        roles = ["ROUTER"]
        exclude = [16]
        "#,
    )
    .expect("valid toml");

    assert_eq!(config.device.host, "10.0.0.7");
    assert_eq!(config.device.heartbeat_interval, Duration::from_secs(60));
    assert_eq!(config.device.port, 4403);
    assert_eq!(config.proxy.send_gap, Duration::from_millis(250));
    assert_eq!(config.proxy.denylist, vec![String::from("ADMIN_APP")]);
    assert!(!config.traceroute.enabled);
    assert_eq!(config.traceroute.interval, Duration::from_secs(300));
    assert_eq!(config.traceroute.filters.exclude, vec![16]);
    assert!(config.validate().is_empty());
}

#[test]
fn test_example_config_parses_back() {
    let text = MeshLinkConfig::example_config();
    let parsed = MeshLinkConfig::from_toml(&text).expect("example config should parse");
    assert_eq!(parsed.proxy.port, 4404);
    assert_eq!(parsed.traceroute.hop_limit, 7);
}
