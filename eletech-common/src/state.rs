use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::status::DeviceStatus;

/// A channel value published by a thing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelState {
    /// Unix epoch milliseconds when the value was decoded.
    pub timestamp: i64,

    /// Thing identifier (e.g., "boiler").
    pub thing: String,

    /// Channel identifier (e.g., "channel1").
    pub channel: String,

    /// The decoded value.
    pub value: StateValue,
}

impl ChannelState {
    /// Create a new channel state with the current timestamp.
    pub fn new(thing: impl Into<String>, channel: impl Into<String>, value: StateValue) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            thing: thing.into(),
            channel: channel.into(),
            value,
        }
    }
}

/// Typed channel value.
///
/// Only finite numbers survive JSON; non-finite values encode as `null`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StateValue {
    /// Decimal number.
    Decimal(f64),
}

impl StateValue {
    /// Numeric view of the value.
    pub fn as_f64(&self) -> f64 {
        match self {
            StateValue::Decimal(v) => *v,
        }
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::Decimal(v)
    }
}

impl From<f32> for StateValue {
    fn from(v: f32) -> Self {
        StateValue::Decimal(f64::from(v))
    }
}

/// A device status change published by a thing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Unix epoch milliseconds of the transition.
    pub timestamp: i64,

    /// Thing identifier.
    pub thing: String,

    /// New status.
    #[serde(flatten)]
    pub status: DeviceStatus,

    /// Human-readable detail, e.g. the read error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StatusUpdate {
    /// Create a status update with the current timestamp.
    pub fn new(thing: impl Into<String>, status: DeviceStatus, description: Option<String>) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            thing: thing.into(),
            status,
            description,
        }
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
