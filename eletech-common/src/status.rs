//! Device status model shared by the bridge and its subscribers.

use serde::{Deserialize, Serialize};

/// Why a device is offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineReason {
    /// Poll requests are failing (timeouts, refused connections, exceptions).
    CommunicationError,
    /// The device cannot run with its current configuration.
    ///
    /// Terminal until the device is restarted.
    ConfigurationError,
    /// The endpoint the device talks through is not available.
    BridgeOffline,
}

impl OfflineReason {
    /// Return the wire name of this reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            OfflineReason::CommunicationError => "communication_error",
            OfflineReason::ConfigurationError => "configuration_error",
            OfflineReason::BridgeOffline => "bridge_offline",
        }
    }
}

impl std::fmt::Display for OfflineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible status of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Polls are succeeding.
    Online,
    /// The device is unavailable for the given reason.
    Offline(OfflineReason),
}

impl DeviceStatus {
    /// Status of a device that has not been started yet.
    pub const INITIAL: DeviceStatus = DeviceStatus::Offline(OfflineReason::BridgeOffline);

    /// Whether the device is online.
    pub fn is_online(&self) -> bool {
        matches!(self, DeviceStatus::Online)
    }

    /// The offline reason, if any.
    pub fn offline_reason(&self) -> Option<OfflineReason> {
        match self {
            DeviceStatus::Online => None,
            DeviceStatus::Offline(reason) => Some(*reason),
        }
    }

    /// Whether the device is offline because of its configuration.
    pub fn has_configuration_error(&self) -> bool {
        self.offline_reason() == Some(OfflineReason::ConfigurationError)
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "online"),
            DeviceStatus::Offline(reason) => write!(f, "offline ({})", reason),
        }
    }
}
