//! Configuration file loading tests

use ambrogio_bridge::{BridgeConfig, BridgeError, Credentials};
use std::path::PathBuf;
use std::time::Duration;

fn write_config(name: &str, body: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "ambrogio-node-{}-{}.json",
        name,
        std::process::id()
    ));
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_full_config_file() {
    let path = write_config(
        "full",
        r#"{
            "thing_name": "garden",
            "broker": {
                "host": "192.168.1.10",
                "port": 1884,
                "username": "mower",
                "password": "secret",
                "topic_prefix": "home",
                "keep_alive": "45s",
                "connect_timeout": "5s"
            },
            "device": { "address": "AA:BB:CC:DD:EE:FF", "stay_connected": false },
            "reconnect": {
                "link_cooldown": "1m",
                "broker_cooldown": "2s",
                "discovery_budget": "10s",
                "restart_delay": "500ms",
                "tick_interval": "20ms"
            },
            "bridge": { "max_payload": 512, "forward_raw_frames": true }
        }"#,
    );

    let config = BridgeConfig::load(&path).unwrap();
    assert_eq!(config.thing_name, "garden");
    assert_eq!(config.broker.address(), "192.168.1.10:1884");
    assert_eq!(
        config.broker.credentials(),
        Credentials::UserPassword {
            username: "mower".to_string(),
            password: "secret".to_string(),
        }
    );
    assert_eq!(config.broker.keep_alive, Duration::from_secs(45));
    assert_eq!(config.reconnect.link_cooldown, Duration::from_secs(60));
    assert_eq!(config.reconnect.restart_delay, Duration::from_millis(500));
    assert_eq!(config.topics().state, "home/garden/state");
    assert!(!config.device.stay_connected);
    assert!(config.bridge.forward_raw_frames);
    assert_eq!(config.bridge.max_payload, 512);

    std::fs::remove_file(path).ok();
}

#[test]
fn test_minimal_config_file_uses_defaults() {
    let path = write_config("minimal", r#"{"broker":{"host":"mqtt.local"}}"#);

    let config = BridgeConfig::load(&path).unwrap();
    assert_eq!(config.thing_name, "AmbrogioBTSerialBridge");
    assert_eq!(config.topics().base, "ambrogio/AmbrogioBTSerialBridge");
    assert_eq!(config.broker.credentials(), Credentials::Anonymous);
    assert_eq!(config.device.address, "");
    assert!(config.device.stay_connected);
    assert_eq!(config.reconnect.link_cooldown, Duration::from_secs(30));
    assert_eq!(config.reconnect.discovery_budget, Duration::from_secs(25));

    std::fs::remove_file(path).ok();
}

#[test]
fn test_short_broker_host_rejected() {
    let path = write_config("short-host", r#"{"broker":{"host":"ab"}}"#);
    assert!(matches!(
        BridgeConfig::load(&path),
        Err(BridgeError::InvalidConfig(_))
    ));
    std::fs::remove_file(path).ok();
}

#[test]
fn test_malformed_file_rejected() {
    let path = write_config("malformed", "{ broker: ");
    let err = BridgeConfig::load(&path).unwrap_err();
    assert!(matches!(err, BridgeError::Json(_)));
    assert_eq!(err.error_code(), "JSON_ERROR");
    std::fs::remove_file(path).ok();
}

#[test]
fn test_bad_duration_rejected() {
    let path = write_config(
        "bad-duration",
        r#"{"broker":{"host":"mqtt.local"},"reconnect":{"link_cooldown":"soon"}}"#,
    );
    assert!(BridgeConfig::load(&path).is_err());
    std::fs::remove_file(path).ok();
}
