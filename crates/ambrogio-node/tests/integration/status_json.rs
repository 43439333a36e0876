//! Status JSON shape tests
//!
//! Dashboards poll `/api/status`; these tests pin the field names of the
//! bridge report embedded in it.

use ambrogio_bridge::test_utils::{MockBroker, MockLink, MockPortal, ScriptedProtocol};
use ambrogio_bridge::{BridgeConfigBuilder, BridgeLoop};
use serde_json::Value;
use std::time::Instant;

#[tokio::test]
async fn test_status_report_fields() {
    let config = BridgeConfigBuilder::new()
        .thing_name("garden")
        .broker("mqtt.local", 1883)
        .device_address("AA:BB:CC:DD:EE:FF")
        .build();
    let portal = MockPortal::new(config.device.clone());
    let (mut bridge, _handle) = BridgeLoop::new(
        config,
        portal,
        MockBroker::new(),
        MockLink::new(),
        ScriptedProtocol::new(),
    );
    bridge.tick(Instant::now()).await;

    let json = serde_json::to_value(bridge.status()).unwrap();
    assert_eq!(json["thing_name"], "garden");
    assert_eq!(json["broker_address"], "mqtt.local:1883");
    assert_eq!(json["topic_base"], "ambrogio/garden");
    assert_eq!(json["network_online"], true);
    assert_eq!(json["broker_state"], "connected");
    assert_eq!(json["link_state"], "connected");
    assert!(json["discovery_log"].is_string());
    assert!(json["discovered"].as_array().unwrap().is_empty());
    assert_eq!(json["stats"]["broker_connects"], 1);
    assert_eq!(json["stats"]["link_connects"], 1);
}

#[tokio::test]
async fn test_status_lists_discovered_devices() {
    let config = BridgeConfigBuilder::new()
        .thing_name("garden")
        .broker("mqtt.local", 1883)
        .device_address("")
        .build();
    let portal = MockPortal::new(config.device.clone());
    let mut link = MockLink::new();
    link.add_nearby("11:22:33:44:55:66", "Ambrogio L60");
    let (mut bridge, _handle) =
        BridgeLoop::new(config, portal, MockBroker::new(), link, ScriptedProtocol::new());
    bridge.tick(Instant::now()).await;

    let json: Value = serde_json::to_value(bridge.status()).unwrap();
    let devices = json["discovered"].as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["address"], "11:22:33:44:55:66");
    assert_eq!(devices[0]["name"], "Ambrogio L60");
    assert!(devices[0]["seen_at"].is_string());
    assert!(json["discovery_log"]
        .as_str()
        .unwrap()
        .contains("11:22:33:44:55:66 - Ambrogio L60"));
    assert_eq!(json["stats"]["discovery_scans"], 1);
}
