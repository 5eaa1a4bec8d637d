//! eletech Bridge Framework
//!
//! Plumbing shared by eletech bridge binaries.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown hooks, signal handling)
//! - [`Publisher`] for publishing thing state to Zenoh with automatic serialization
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] for bridge status announcements

mod args;
mod config;
mod error;
mod publisher;
mod runner;
mod status;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use publisher::{PublishStats, Publisher};
pub use runner::BridgeRunner;
pub use status::{BridgeState, BridgeStatus, StatusPublisher};

// Re-export commonly used types from eletech-common
pub use eletech_common::{
    ChannelState, DeviceStatus, Format, LoggingConfig, OfflineReason, StateValue, StatusUpdate,
    ZenohConfig,
};
