//! Bridge status reporting.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::publisher::Publisher;

/// Whether the bridge process is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Running,
    Offline,
}

/// Bridge status announcement, published to `<prefix>/@/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name (e.g., "modbus").
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current state.
    pub status: BridgeState,
    /// Bridge-specific details, e.g. the things it serves.
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl BridgeStatus {
    fn new(bridge: impl Into<String>, version: impl Into<String>, status: BridgeState) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status,
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a status in the running state.
    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(bridge, version, BridgeState::Running)
    }

    /// Create a status in the offline state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(bridge, version, BridgeState::Offline)
    }

    /// Merge the fields of a JSON object into the status.
    ///
    /// Non-object values are ignored.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        if let serde_json::Value::Object(fields) = metadata {
            self.metadata.extend(fields);
        }
        self
    }

    /// Publish this status to Zenoh.
    pub async fn publish(&self, publisher: &Publisher) -> Result<()> {
        let key = publisher.keys().bridge_status();
        publisher.publish_json(&key, self).await
    }
}

/// Publishes the bridge status on startup and shutdown.
pub struct StatusPublisher {
    publisher: Publisher,
    bridge_name: String,
    version: String,
}

impl StatusPublisher {
    /// Create a new status publisher.
    pub fn new(
        publisher: Publisher,
        bridge_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            bridge_name: bridge_name.into(),
            version: version.into(),
        }
    }

    /// Publish the running status with optional metadata.
    pub async fn publish_running(&self, metadata: Option<serde_json::Value>) -> Result<()> {
        let mut status = BridgeStatus::running(&self.bridge_name, &self.version);
        if let Some(meta) = metadata {
            status = status.with_metadata(meta);
        }
        status.publish(&self.publisher).await
    }

    /// Publish the offline status.
    pub async fn publish_offline(&self) -> Result<()> {
        BridgeStatus::offline(&self.bridge_name, &self.version)
            .publish(&self.publisher)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_running() {
        let status = BridgeStatus::running("modbus", "0.1.0");
        assert_eq!(status.bridge, "modbus");
        assert_eq!(status.status, BridgeState::Running);
        assert!(status.metadata.is_empty());
    }

    #[test]
    fn test_status_with_metadata() {
        let status = BridgeStatus::running("modbus", "0.1.0").with_metadata(serde_json::json!({
            "things": ["boiler", "heat_pump"],
            "endpoints": 1
        }));

        assert_eq!(status.metadata["things"][0], "boiler");
        assert_eq!(status.metadata["endpoints"], 1);
    }

    #[test]
    fn test_non_object_metadata_is_ignored() {
        let status = BridgeStatus::offline("modbus", "0.1.0").with_metadata(serde_json::json!(42));
        assert!(status.metadata.is_empty());
    }

    #[test]
    fn test_status_serialization() {
        let status = BridgeStatus::offline("modbus", "1.0.0")
            .with_metadata(serde_json::json!({ "things": 2 }));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["bridge"], "modbus");
        assert_eq!(json["status"], "offline");
        assert_eq!(json["things"], 2);
    }
}
