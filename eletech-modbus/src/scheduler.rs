//! Regular poll registration for one thing.

use std::time::Duration;

use tracing::{debug, warn};

use crate::registers::RegisterEntry;
use crate::transport::{
    CommunicationInterface, PollCallback, PollTaskHandle, ReadFunctionCode, ReadRequest,
};

/// Per-attempt timeout of every poll.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Registers read per poll (one f32).
pub const POLL_WORD_COUNT: u16 = 2;

/// Scheduler errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error(
        "cannot register {requested} poll task(s) with {active} active: capacity is {capacity}"
    )]
    TooManyPollTasks {
        requested: usize,
        active: usize,
        capacity: usize,
    },
}

/// Poll parameters shared by all of a thing's registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub slave_address: u8,
    pub interval: Duration,
    pub max_tries: u32,
}

impl PollSettings {
    /// Read request for the register at `offset`.
    pub fn request_for(&self, offset: u16) -> ReadRequest {
        ReadRequest {
            slave_address: self.slave_address,
            function_code: ReadFunctionCode::InputRegisters,
            start: offset,
            word_count: POLL_WORD_COUNT,
            max_tries: self.max_tries,
        }
    }
}

/// A registered regular poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTask {
    pub register_offset: u16,
    pub request: ReadRequest,
    pub interval: Duration,
    pub timeout: Duration,
    pub handle: PollTaskHandle,
}

/// Owns the active poll tasks of one thing.
///
/// Never holds more tasks than its capacity, which is the size of the
/// thing's register map.
#[derive(Debug)]
pub struct PollScheduler {
    capacity: usize,
    settings: PollSettings,
    tasks: Vec<PollTask>,
}

impl PollScheduler {
    pub fn new(capacity: usize, settings: PollSettings) -> Self {
        Self {
            capacity,
            settings,
            tasks: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn tasks(&self) -> &[PollTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Register one poll per entry on `comms`.
    ///
    /// `callback_for` builds the completion callback of the poll at a given
    /// offset. Fails without registering anything if the entries do not fit
    /// into the remaining capacity.
    pub fn register_all<F>(
        &mut self,
        comms: &dyn CommunicationInterface,
        entries: &[RegisterEntry],
        mut callback_for: F,
    ) -> Result<usize, SchedulerError>
    where
        F: FnMut(u16) -> PollCallback,
    {
        if self.tasks.len() + entries.len() > self.capacity {
            return Err(SchedulerError::TooManyPollTasks {
                requested: entries.len(),
                active: self.tasks.len(),
                capacity: self.capacity,
            });
        }

        for entry in entries {
            let request = self.settings.request_for(entry.offset);
            let handle = comms.register_regular_poll(
                request,
                self.settings.interval,
                POLL_TIMEOUT,
                callback_for(entry.offset),
            );

            debug!(
                offset = entry.offset,
                channel = entry.channel_id,
                handle = handle.id(),
                "Registered poll"
            );

            self.tasks.push(PollTask {
                register_offset: entry.offset,
                request,
                interval: self.settings.interval,
                timeout: POLL_TIMEOUT,
                handle,
            });
        }

        Ok(entries.len())
    }

    /// Unregister every task from `comms` and forget it.
    ///
    /// Returns the number of tasks the interface still knew about.
    pub fn unregister_all(&mut self, comms: &dyn CommunicationInterface) -> usize {
        let mut removed = 0;
        for task in self.tasks.drain(..) {
            if comms.unregister_regular_poll(task.handle) {
                removed += 1;
            } else {
                warn!(
                    offset = task.register_offset,
                    handle = task.handle.id(),
                    "Poll task was not registered"
                );
            }
        }
        removed
    }

    /// Forget every task without touching a transport.
    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}
