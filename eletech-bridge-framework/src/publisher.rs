//! State publisher for Zenoh.

use std::sync::Arc;

use eletech_common::{ChannelState, Format, KeyExprBuilder, StatusUpdate, encode};

use crate::error::{BridgeError, Result};

/// Publisher for sending thing state to Zenoh.
///
/// Wraps a Zenoh session and a [`KeyExprBuilder`], and serializes channel
/// values and status updates in the configured [`Format`].
#[derive(Clone, Debug)]
pub struct Publisher {
    session: Arc<zenoh::Session>,
    keys: KeyExprBuilder,
    format: Format,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(
        session: Arc<zenoh::Session>,
        key_prefix: impl Into<String>,
        format: Format,
    ) -> Self {
        Self {
            session,
            keys: KeyExprBuilder::with_prefix(key_prefix),
            format,
        }
    }

    /// Get the key prefix.
    pub fn key_prefix(&self) -> &str {
        self.keys.prefix()
    }

    /// Get the key builder.
    pub fn keys(&self) -> &KeyExprBuilder {
        &self.keys
    }

    /// Get the serialization format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Get a reference to the Zenoh session.
    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Publish a channel value to `<prefix>/<thing>/<channel>`.
    pub async fn publish_channel(&self, state: &ChannelState) -> Result<()> {
        let key = self.keys.channel(&state.thing, &state.channel);
        let payload =
            encode(state, self.format).map_err(|e| BridgeError::Serialization(e.to_string()))?;
        self.publish_raw(&key, payload).await
    }

    /// Publish a device status update to `<prefix>/<thing>/@/status`.
    pub async fn publish_status(&self, update: &StatusUpdate) -> Result<()> {
        let key = self.keys.thing_status(&update.thing);
        let payload =
            encode(update, self.format).map_err(|e| BridgeError::Serialization(e.to_string()))?;
        self.publish_raw(&key, payload).await
    }

    /// Publish raw bytes to a key.
    pub async fn publish_raw(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        self.session
            .put(key, payload)
            .await
            .map_err(|e| BridgeError::publish(key, e))?;

        tracing::trace!(key = %key, "Published");
        Ok(())
    }

    /// Publish a JSON value to a key, regardless of the configured format.
    pub async fn publish_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish_raw(key, payload).await
    }
}

/// Running totals of publish attempts.
#[derive(Debug, Default, Clone, Copy)]
pub struct PublishStats {
    /// Number of successfully published updates.
    pub success: usize,
    /// Number of failed publishes.
    pub failed: usize,
}

impl PublishStats {
    /// Count the outcome of one publish.
    pub fn record<T>(&mut self, result: &Result<T>) {
        match result {
            Ok(_) => self.success += 1,
            Err(_) => self.failed += 1,
        }
    }

    /// Total number of attempted publishes.
    pub fn total(&self) -> usize {
        self.success + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            100.0
        } else {
            (self.success as f64 / self.total() as f64) * 100.0
        }
    }
}
