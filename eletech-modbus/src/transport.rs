//! Contracts of the collaborators a thing polls through.
//!
//! A thing never talks to the wire itself. It asks an [`EndpointProvider`]
//! (the bridge) for a [`CommunicationInterface`] and registers regular polls
//! on it; the interface calls back with a [`PollOutcome`] on every tick.

use std::sync::Arc;
use std::time::Duration;

/// Modbus read function used by a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadFunctionCode {
    /// Function 0x03.
    HoldingRegisters,
    /// Function 0x04.
    InputRegisters,
}

impl ReadFunctionCode {
    /// Modbus function code byte.
    pub fn code(&self) -> u8 {
        match self {
            ReadFunctionCode::HoldingRegisters => 0x03,
            ReadFunctionCode::InputRegisters => 0x04,
        }
    }
}

/// Description of one read request, repeated on every poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// Modbus unit/slave ID.
    pub slave_address: u8,
    pub function_code: ReadFunctionCode,
    /// First register to read (0-based).
    pub start: u16,
    /// Number of 16-bit registers to read.
    pub word_count: u16,
    /// Attempts per tick before the tick is reported as failed.
    pub max_tries: u32,
}

/// Registers returned by a successful read, in wire order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterArray(Vec<u16>);

impl RegisterArray {
    pub fn new(words: Vec<u16>) -> Self {
        Self(words)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }
}

impl From<Vec<u16>> for RegisterArray {
    fn from(words: Vec<u16>) -> Self {
        Self(words)
    }
}

/// Why a poll tick produced no registers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollFailure {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Modbus exception: {0}")]
    Exception(String),
}

/// Result of one poll tick.
pub type PollOutcome = Result<RegisterArray, PollFailure>;

/// Completion callback invoked by the transport on every tick.
///
/// Must return promptly; it runs on the transport's timer.
pub type PollCallback = Arc<dyn Fn(PollOutcome) + Send + Sync>;

/// Identifies a registered regular poll on the interface that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PollTaskHandle(u64);

impl PollTaskHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// An open communication channel to Modbus slaves, owned by a bridge.
pub trait CommunicationInterface: Send + Sync {
    /// Start polling `request` every `interval`, giving each attempt `timeout`.
    ///
    /// `callback` must not be invoked from within this call.
    fn register_regular_poll(
        &self,
        request: ReadRequest,
        interval: Duration,
        timeout: Duration,
        callback: PollCallback,
    ) -> PollTaskHandle;

    /// Stop a poll. Returns `false` if the handle is unknown.
    ///
    /// Once this returns, the poll's callback is not invoked for new ticks.
    fn unregister_regular_poll(&self, handle: PollTaskHandle) -> bool;
}

/// The bridge a thing is attached to.
pub trait EndpointProvider: Send + Sync {
    /// Human-readable bridge name used in status descriptions.
    fn label(&self) -> String;

    /// Whether the bridge itself is online.
    fn is_online(&self) -> bool;

    /// The bridge's communication interface, if it has one right now.
    ///
    /// Callers must not keep the returned handle across a bridge outage.
    fn communication_interface(&self) -> Option<Arc<dyn CommunicationInterface>>;
}
