//! Runtime configuration, loaded from a JSON file.
//!
//! Every component receives its configuration at construction; nothing here
//! is global. Missing fields fall back to serde defaults.

use serde::Deserialize;
use serde_json::Value;

use viewgate_core::connection::HeartbeatPolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// UDS socket the bus server listens on.
    pub socket_path: String,

    /// Device class stamped onto newly allocated views.
    pub device_class: String,

    /// Heartbeat timings for the connection driver.
    pub heartbeat: HeartbeatPolicy,

    /// Bus address of the identity service.
    pub auth_address: String,

    /// Timeout for collaborator bus requests (milliseconds).
    pub collaborator_timeout_ms: u64,

    /// Base URL of the content-delivery service.
    pub content_base_url: String,

    /// SMS gateway; notifications are forwarded as SMS iff this is present.
    pub sms: Option<SmsConfig>,

    /// Site locations returned verbatim by `getFixLocations`.
    pub fix_locations: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsConfig {
    /// HTTP endpoint of the SMS gateway.
    pub endpoint: String,
    /// Optional sender id passed through to the gateway.
    #[serde(default)]
    pub sender: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            socket_path: crate::cli::default_socket_path(),
            device_class: "tablet".to_string(),
            heartbeat: HeartbeatPolicy::default(),
            auth_address: "service:auth".to_string(),
            collaborator_timeout_ms: 5_000,
            content_base_url: "http://localhost:8080/services/cds".to_string(),
            sms: None,
            fix_locations: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {path}: {e}"))?;
        let config = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config {path}: {e}"))?;
        Ok(config)
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_for_empty_config() {
        let config: RuntimeConfig = serde_json::from_str("{}").expect("parse");
        assert_eq!(config.device_class, "tablet");
        assert_eq!(config.heartbeat, HeartbeatPolicy::default());
        assert!(config.sms.is_none());
        assert!(config.fix_locations.is_empty());
    }

    #[test]
    fn partial_config_overrides_selected_fields() {
        let config: RuntimeConfig = serde_json::from_str(
            r#"{
                "deviceClass": "kiosk",
                "heartbeat": {"heartbeatIntervalMs": 5000},
                "sms": {"endpoint": "http://sms.local/send"},
                "fixLocations": [{"type": "fix", "id": "dock-1"}]
            }"#,
        )
        .expect("parse");
        assert_eq!(config.device_class, "kiosk");
        assert_eq!(config.heartbeat.heartbeat_interval_ms, 5_000);
        assert_eq!(config.heartbeat.probe_timeout_ms, 1_000, "rest defaulted");
        let sms = config.sms.expect("sms section");
        assert_eq!(sms.endpoint, "http://sms.local/send");
        assert!(sms.sender.is_none());
        assert_eq!(config.fix_locations.len(), 1);
    }
}
