//! Where a thing sends its channel values and status transitions.

use eletech_common::{DeviceStatus, StateValue};

/// Receiver of one thing's observable output.
///
/// Called from poll callbacks; implementations must not block and must not
/// call back into the thing handler.
pub trait StateSink: Send + Sync {
    /// A decoded channel value.
    fn publish(&self, channel_id: &str, value: StateValue);

    /// A device status transition.
    fn set_device_status(&self, status: DeviceStatus, description: Option<&str>);
}
