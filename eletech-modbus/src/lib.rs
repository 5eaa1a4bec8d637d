//! eletech Modbus bridge.
//!
//! Polls the input registers of Modbus slaves ("things") through shared
//! endpoints, decodes them into channel values and tracks each thing's
//! device status. State is published to Zenoh.
//!
//! # Key Expressions
//!
//! ```text
//! eletech/<thing>/<channel>     channel value
//! eletech/<thing>/@/status      device status
//! eletech/@/status              bridge status
//! ```

pub mod config;
pub mod decoder;
pub mod endpoint;
pub mod handler;
pub mod mock;
pub mod publish;
pub mod registers;
pub mod scheduler;
pub mod sink;
pub mod status;
pub mod transport;

pub use handler::{HandlerError, ThingHandler};
pub use registers::DeviceProfile;
pub use sink::StateSink;
pub use transport::{CommunicationInterface, EndpointProvider};
