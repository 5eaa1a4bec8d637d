//! Lifecycle of one polled thing.
//!
//! A [`ThingHandler`] acquires its bridge's communication interface,
//! registers one regular poll per register of its profile, decodes every
//! response into a channel value and keeps the device status current.
//!
//! Two locks guard a handler. The lifecycle lock serializes `start` and
//! `stop` and owns the interface and the poll tasks. The state lock owns
//! the status tracker and is the only lock poll callbacks take. Lock order
//! is lifecycle, then state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use eletech_common::{DeviceStatus, StateValue};

use crate::decoder::{Decoded, decode_response};
use crate::registers::{DeviceProfile, RegisterEntry, RegisterMap};
use crate::scheduler::{PollScheduler, PollSettings, SchedulerError};
use crate::sink::StateSink;
use crate::status::{StatusTracker, Transition};
use crate::transport::{CommunicationInterface, EndpointProvider, PollCallback, PollOutcome};

/// Handler errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("poll scheduling failed: {0}")]
    Scheduling(#[from] SchedulerError),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Lifecycle {
    comms: Option<Arc<dyn CommunicationInterface>>,
    scheduler: PollScheduler,
}

struct RunState {
    tracker: StatusTracker,
    /// Bumped on every start and stop; callbacks of older runs are dropped.
    generation: u64,
    polling: bool,
}

struct Inner {
    name: String,
    profile: DeviceProfile,
    registers: RegisterMap,
    bridge: Arc<dyn EndpointProvider>,
    sink: Arc<dyn StateSink>,
    lifecycle: Mutex<Lifecycle>,
    state: Mutex<RunState>,
}

/// Polls one Modbus slave through a bridge and reports its state.
#[derive(Clone)]
pub struct ThingHandler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ThingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThingHandler")
            .field("name", &self.inner.name)
            .field("profile", &self.inner.profile)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ThingHandler {
    pub fn new(
        name: impl Into<String>,
        profile: DeviceProfile,
        settings: PollSettings,
        bridge: Arc<dyn EndpointProvider>,
        sink: Arc<dyn StateSink>,
    ) -> Self {
        Self::with_registers(name, profile, profile.register_map(), settings, bridge, sink)
    }

    fn with_registers(
        name: impl Into<String>,
        profile: DeviceProfile,
        registers: RegisterMap,
        settings: PollSettings,
        bridge: Arc<dyn EndpointProvider>,
        sink: Arc<dyn StateSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                profile,
                registers,
                bridge,
                sink,
                lifecycle: Mutex::new(Lifecycle {
                    comms: None,
                    scheduler: PollScheduler::new(registers.len(), settings),
                }),
                state: Mutex::new(RunState {
                    tracker: StatusTracker::new(),
                    generation: 0,
                    polling: false,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn profile(&self) -> DeviceProfile {
        self.inner.profile
    }

    /// Current device status.
    pub fn status(&self) -> DeviceStatus {
        lock(&self.inner.state).tracker.status()
    }

    /// Number of active poll tasks.
    pub fn poll_task_count(&self) -> usize {
        lock(&self.inner.lifecycle).scheduler.len()
    }

    /// Whether a communication interface is held.
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.lifecycle).comms.is_some()
    }

    /// Framework entry point: the thing was created.
    pub fn initialize(&self) -> Result<(), HandlerError> {
        let settings = *lock(&self.inner.lifecycle).scheduler.settings();
        info!(
            thing = %self.inner.name,
            thing_type = %self.inner.profile,
            slave = settings.slave_address,
            interval = ?settings.interval,
            max_tries = settings.max_tries,
            "Initializing thing"
        );
        self.start()
    }

    /// Framework entry point: the thing is being removed.
    pub fn dispose(&self) {
        debug!(thing = %self.inner.name, "Disposing thing");
        self.stop();
    }

    /// The bridge went online or offline.
    pub fn bridge_status_changed(&self, online: bool) -> Result<(), HandlerError> {
        debug!(thing = %self.inner.name, online, "Bridge status changed");
        if online {
            return self.start();
        }

        self.stop();
        let description = format!("Bridge '{}' is offline", self.inner.bridge.label());
        let mut state = lock(&self.inner.state);
        if let Some(transition) = state.tracker.bridge_unavailable(description) {
            self.inner.report(transition);
        }
        Ok(())
    }

    /// Forward every change of `online` to
    /// [`bridge_status_changed`](Self::bridge_status_changed).
    ///
    /// Returns once the sender side is dropped.
    pub async fn follow_bridge(&self, mut online: watch::Receiver<bool>) {
        while online.changed().await.is_ok() {
            let now = *online.borrow_and_update();
            if let Err(e) = self.bridge_status_changed(now) {
                error!(thing = %self.inner.name, error = %e, "Failed to follow bridge status");
            }
        }
        trace!(thing = %self.inner.name, "Bridge status stream closed");
    }

    /// Commands are not supported; channels are read-only.
    pub fn handle_command(&self, channel_id: &str, command: &str) {
        debug!(
            thing = %self.inner.name,
            channel = channel_id,
            command,
            "Ignoring command"
        );
    }

    /// Acquire the bridge's interface and start polling.
    ///
    /// Returns immediately if polling is already running. A missing bridge
    /// or interface is reported as a status, not as an error.
    pub fn start(&self) -> Result<(), HandlerError> {
        let mut lifecycle = lock(&self.inner.lifecycle);
        if lifecycle.comms.is_some() && !lifecycle.scheduler.is_empty() {
            trace!(thing = %self.inner.name, "Already polling");
            return Ok(());
        }

        let Some(comms) = self.inner.acquire_comms() else {
            lifecycle.comms = None;
            return Ok(());
        };
        lifecycle.comms = Some(comms.clone());

        self.register_polls(&mut lifecycle, comms.as_ref(), self.inner.registers.entries())
            .map(|count| {
                info!(thing = %self.inner.name, tasks = count, "Polling started");
            })
    }

    /// Stop polling and release the interface. Idempotent.
    pub fn stop(&self) {
        let mut lifecycle = lock(&self.inner.lifecycle);
        {
            let mut state = lock(&self.inner.state);
            state.generation += 1;
            state.polling = false;
        }

        match lifecycle.comms.take() {
            Some(comms) => {
                let removed = lifecycle.scheduler.unregister_all(comms.as_ref());
                info!(thing = %self.inner.name, tasks = removed, "Polling stopped");
            }
            None => lifecycle.scheduler.clear(),
        }
    }

    fn register_polls(
        &self,
        lifecycle: &mut Lifecycle,
        comms: &dyn CommunicationInterface,
        entries: &[RegisterEntry],
    ) -> Result<usize, HandlerError> {
        // Held across registration so early ticks wait for the new run.
        let mut state = lock(&self.inner.state);
        let generation = state.generation + 1;

        let weak = Arc::downgrade(&self.inner);
        let result = lifecycle.scheduler.register_all(comms, entries, |offset| {
            poll_callback(weak.clone(), generation, offset)
        });

        match result {
            Ok(count) => {
                state.generation = generation;
                state.polling = true;
                state.tracker.reset();
                Ok(count)
            }
            Err(err) => {
                error!(thing = %self.inner.name, error = %err, "Cannot schedule polls");
                if let Some(transition) = state.tracker.configuration_error(err.to_string()) {
                    self.inner.report(transition);
                }
                Err(HandlerError::from(err))
            }
        }
    }
}

fn poll_callback(inner: Weak<Inner>, generation: u64, offset: u16) -> PollCallback {
    Arc::new(move |outcome| {
        if let Some(inner) = inner.upgrade() {
            inner.on_poll_result(generation, offset, outcome);
        }
    })
}

impl Inner {
    fn acquire_comms(&self) -> Option<Arc<dyn CommunicationInterface>> {
        let label = self.bridge.label();
        let description = if !self.bridge.is_online() {
            format!("Bridge '{}' is offline", label)
        } else if let Some(comms) = self.bridge.communication_interface() {
            return Some(comms);
        } else {
            format!("Bridge '{}' not completely initialized", label)
        };

        debug!(thing = %self.name, "{}", description);
        let mut state = lock(&self.state);
        if let Some(transition) = state.tracker.bridge_unavailable(description) {
            self.report(transition);
        }
        None
    }

    fn on_poll_result(&self, generation: u64, offset: u16, outcome: PollOutcome) {
        let mut state = lock(&self.state);
        if !state.polling || state.generation != generation {
            trace!(thing = %self.name, offset, "Dropping result of a stopped poll");
            return;
        }

        let transition = match outcome {
            Ok(registers) => {
                match decode_response(&self.registers, offset, &registers) {
                    Decoded::Value { channel_id, value } => {
                        trace!(thing = %self.name, channel = channel_id, value, "Decoded");
                        self.sink.publish(channel_id, StateValue::from(value));
                    }
                    Decoded::NonFinite { channel_id, bits } => {
                        debug!(
                            thing = %self.name,
                            channel = channel_id,
                            bits,
                            "Dropping non-finite value"
                        );
                    }
                    Decoded::Short { words } => {
                        debug!(thing = %self.name, offset, words, "Response too short for f32");
                    }
                    Decoded::Unmapped { offset } => {
                        debug!(thing = %self.name, offset, "No channel for register");
                    }
                }
                state.tracker.poll_succeeded()
            }
            Err(failure) => {
                debug!(thing = %self.name, offset, error = %failure, "Poll failed");
                state.tracker.poll_failed(&failure)
            }
        };

        if let Some(transition) = transition {
            self.report(transition);
        }
    }

    fn report(&self, transition: Transition) {
        match transition.status {
            DeviceStatus::Online => info!(thing = %self.name, "Thing online"),
            DeviceStatus::Offline(reason) => warn!(
                thing = %self.name,
                reason = %reason,
                description = transition.description.as_deref().unwrap_or(""),
                "Thing offline"
            ),
        }
        self.sink
            .set_device_status(transition.status, transition.description.as_deref());
    }
}
