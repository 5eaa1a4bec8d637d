//! In-memory endpoint, transport and sink.
//!
//! Lets a [`ThingHandler`](crate::handler::ThingHandler) run without a
//! Modbus slave or a Zenoh session. Polls never fire on their own; drive
//! them with [`MockComms::deliver`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use eletech_common::{DeviceStatus, StateValue};

use crate::sink::StateSink;
use crate::transport::{
    CommunicationInterface, EndpointProvider, PollCallback, PollOutcome, PollTaskHandle,
    ReadRequest,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A poll registered on [`MockComms`].
#[derive(Clone)]
pub struct RegisteredPoll {
    pub handle: PollTaskHandle,
    pub request: ReadRequest,
    pub interval: Duration,
    pub timeout: Duration,
    pub callback: PollCallback,
}

impl std::fmt::Debug for RegisteredPoll {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPoll")
            .field("handle", &self.handle)
            .field("request", &self.request)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Communication interface that records registrations.
#[derive(Debug, Default)]
pub struct MockComms {
    next_id: AtomicU64,
    polls: Mutex<BTreeMap<PollTaskHandle, RegisteredPoll>>,
    registrations: AtomicUsize,
    unregistrations: AtomicUsize,
}

impl MockComms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently registered polls, in registration order.
    pub fn active(&self) -> Vec<RegisteredPoll> {
        lock(&self.polls).values().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        lock(&self.polls).len()
    }

    pub fn active_requests(&self) -> Vec<ReadRequest> {
        lock(&self.polls).values().map(|poll| poll.request).collect()
    }

    /// Total successful `register_regular_poll` calls.
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Total successful `unregister_regular_poll` calls.
    pub fn unregistrations(&self) -> usize {
        self.unregistrations.load(Ordering::SeqCst)
    }

    /// Callback of the active poll reading `offset`.
    pub fn callback_for(&self, offset: u16) -> Option<PollCallback> {
        lock(&self.polls)
            .values()
            .find(|poll| poll.request.start == offset)
            .map(|poll| poll.callback.clone())
    }

    /// Complete one tick of the active poll reading `offset`.
    ///
    /// Returns `false` if no such poll is registered.
    pub fn deliver(&self, offset: u16, outcome: PollOutcome) -> bool {
        match self.callback_for(offset) {
            Some(callback) => {
                callback(outcome);
                true
            }
            None => false,
        }
    }
}

impl CommunicationInterface for MockComms {
    fn register_regular_poll(
        &self,
        request: ReadRequest,
        interval: Duration,
        timeout: Duration,
        callback: PollCallback,
    ) -> PollTaskHandle {
        let handle = PollTaskHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.polls).insert(
            handle,
            RegisteredPoll {
                handle,
                request,
                interval,
                timeout,
                callback,
            },
        );
        self.registrations.fetch_add(1, Ordering::SeqCst);
        handle
    }

    fn unregister_regular_poll(&self, handle: PollTaskHandle) -> bool {
        let removed = lock(&self.polls).remove(&handle).is_some();
        if removed {
            self.unregistrations.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }
}

/// Endpoint whose availability is switched by hand.
#[derive(Debug)]
pub struct MockEndpoint {
    label: String,
    online: AtomicBool,
    comms: Mutex<Option<Arc<MockComms>>>,
    acquisitions: AtomicUsize,
}

impl MockEndpoint {
    /// An offline endpoint without a communication interface.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            online: AtomicBool::new(false),
            comms: Mutex::new(None),
            acquisitions: AtomicUsize::new(0),
        }
    }

    /// An online endpoint with a fresh communication interface.
    pub fn online(label: impl Into<String>) -> Self {
        let endpoint = Self::new(label);
        endpoint.set_online(true);
        endpoint.attach(Arc::new(MockComms::new()));
        endpoint
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn attach(&self, comms: Arc<MockComms>) {
        *lock(&self.comms) = Some(comms);
    }

    pub fn detach(&self) -> Option<Arc<MockComms>> {
        lock(&self.comms).take()
    }

    /// The attached interface, for inspection.
    pub fn comms(&self) -> Option<Arc<MockComms>> {
        lock(&self.comms).clone()
    }

    /// Number of times a thing was handed the interface.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl EndpointProvider for MockEndpoint {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn communication_interface(&self) -> Option<Arc<dyn CommunicationInterface>> {
        let comms = lock(&self.comms).clone()?;
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Some(comms as Arc<dyn CommunicationInterface>)
    }
}

/// Everything a sink received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Value {
        channel_id: String,
        value: StateValue,
    },
    Status {
        status: DeviceStatus,
        description: Option<String>,
    },
}

/// Sink that records what it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        lock(&self.events).clone()
    }

    /// Published values as `(channel, value)` pairs.
    pub fn values(&self) -> Vec<(String, StateValue)> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Value { channel_id, value } => Some((channel_id.clone(), *value)),
                SinkEvent::Status { .. } => None,
            })
            .collect()
    }

    /// Reported statuses, without descriptions.
    pub fn statuses(&self) -> Vec<DeviceStatus> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Status { status, .. } => Some(*status),
                SinkEvent::Value { .. } => None,
            })
            .collect()
    }

    /// Description of the most recent status report.
    pub fn last_description(&self) -> Option<String> {
        lock(&self.events).iter().rev().find_map(|event| match event {
            SinkEvent::Status { description, .. } => Some(description.clone()),
            SinkEvent::Value { .. } => None,
        })?
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl StateSink for RecordingSink {
    fn publish(&self, channel_id: &str, value: StateValue) {
        lock(&self.events).push(SinkEvent::Value {
            channel_id: channel_id.to_string(),
            value,
        });
    }

    fn set_device_status(&self, status: DeviceStatus, description: Option<&str>) {
        lock(&self.events).push(SinkEvent::Status {
            status,
            description: description.map(str::to_string),
        });
    }
}
