//! Modbus TCP/RTU endpoint backed by tokio-modbus.
//!
//! Every registered poll runs as its own task on a fixed interval. All polls
//! of an endpoint share one connection, opened on first use and dropped on
//! I/O errors so the next attempt reconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::{debug, info, trace, warn};

use crate::config::{ConnectionConfig, EndpointConfig};
use crate::transport::{
    CommunicationInterface, EndpointProvider, PollCallback, PollFailure, PollOutcome,
    PollTaskHandle, ReadFunctionCode, ReadRequest, RegisterArray,
};

/// Endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("endpoint '{0}' must be opened inside a Tokio runtime")]
    NoRuntime(String),
}

/// Shortest period a poll ticks at.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A configured Modbus endpoint things poll through.
///
/// Offline until [`open`](Self::open) is called. Things learn about
/// `open` and `close` through [`subscribe`](Self::subscribe).
#[derive(Debug)]
pub struct ModbusEndpoint {
    config: EndpointConfig,
    comms: Mutex<Option<Arc<ModbusComms>>>,
    online: watch::Sender<bool>,
}

impl ModbusEndpoint {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            comms: Mutex::new(None),
            online: watch::Sender::new(false),
        }
    }

    /// Receiver of the endpoint's online flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Bring the endpoint online. Polls run on the current Tokio runtime.
    pub fn open(&self) -> Result<(), EndpointError> {
        let runtime =
            Handle::try_current().map_err(|_| EndpointError::NoRuntime(self.config.name.clone()))?;

        {
            let mut comms = lock(&self.comms);
            if comms.is_some() {
                return Ok(());
            }
            *comms = Some(Arc::new(ModbusComms::new(&self.config, runtime)));
        }

        info!(
            endpoint = %self.config.name,
            connection = %self.config.connection,
            "Endpoint online"
        );
        self.online.send_replace(true);
        Ok(())
    }

    /// Take the endpoint offline and stop all of its polls.
    pub fn close(&self) {
        let Some(comms) = lock(&self.comms).take() else {
            return;
        };
        let stopped = comms.shutdown();
        info!(endpoint = %self.config.name, polls = stopped, "Endpoint offline");
        self.online.send_replace(false);
    }

    /// Number of polls currently scheduled on this endpoint.
    pub fn active_polls(&self) -> usize {
        lock(&self.comms)
            .as_ref()
            .map_or(0, |comms| comms.active_polls())
    }
}

impl EndpointProvider for ModbusEndpoint {
    fn label(&self) -> String {
        self.config.label().to_string()
    }

    fn is_online(&self) -> bool {
        lock(&self.comms).is_some()
    }

    fn communication_interface(&self) -> Option<Arc<dyn CommunicationInterface>> {
        lock(&self.comms)
            .clone()
            .map(|comms| comms as Arc<dyn CommunicationInterface>)
    }
}

/// Communication interface of an open [`ModbusEndpoint`].
#[derive(Debug)]
pub struct ModbusComms {
    link: Arc<Link>,
    runtime: Handle,
    next_id: AtomicU64,
    polls: Mutex<HashMap<PollTaskHandle, JoinHandle<()>>>,
}

impl ModbusComms {
    fn new(config: &EndpointConfig, runtime: Handle) -> Self {
        Self {
            link: Arc::new(Link {
                endpoint: config.name.clone(),
                connection: config.connection.clone(),
                connect_timeout: config.connect_timeout(),
                context: tokio::sync::Mutex::new(None),
            }),
            runtime,
            next_id: AtomicU64::new(1),
            polls: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_polls(&self) -> usize {
        lock(&self.polls).len()
    }

    /// Abort every poll. Returns how many were running.
    fn shutdown(&self) -> usize {
        let polls: Vec<_> = lock(&self.polls).drain().collect();
        for (_, task) in &polls {
            task.abort();
        }
        polls.len()
    }
}

impl Drop for ModbusComms {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl CommunicationInterface for ModbusComms {
    fn register_regular_poll(
        &self,
        request: ReadRequest,
        interval: Duration,
        timeout: Duration,
        callback: PollCallback,
    ) -> PollTaskHandle {
        let handle = PollTaskHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let link = self.link.clone();

        if interval < MIN_POLL_INTERVAL {
            warn!(
                endpoint = %self.link.endpoint,
                ?interval,
                "Poll interval too short, using {:?}",
                MIN_POLL_INTERVAL
            );
        }
        let interval = interval.max(MIN_POLL_INTERVAL);

        let task = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let outcome = link.read(&request, timeout).await;
                callback(outcome);
            }
        });

        debug!(
            endpoint = %self.link.endpoint,
            handle = handle.id(),
            slave = request.slave_address,
            function = request.function_code.code(),
            start = request.start,
            count = request.word_count,
            ?interval,
            "Poll registered"
        );

        lock(&self.polls).insert(handle, task);
        handle
    }

    fn unregister_regular_poll(&self, handle: PollTaskHandle) -> bool {
        match lock(&self.polls).remove(&handle) {
            Some(task) => {
                task.abort();
                debug!(endpoint = %self.link.endpoint, handle = handle.id(), "Poll unregistered");
                true
            }
            None => false,
        }
    }
}

/// The shared connection of one endpoint.
struct Link {
    endpoint: String,
    connection: ConnectionConfig,
    connect_timeout: Duration,
    context: tokio::sync::Mutex<Option<Context>>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("endpoint", &self.endpoint)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Execute `request`, retrying up to its `max_tries`.
    async fn read(&self, request: &ReadRequest, timeout: Duration) -> PollOutcome {
        let attempts = request.max_tries.max(1);
        let mut attempt = 1;

        loop {
            match self.read_once(request, timeout).await {
                Ok(registers) => return Ok(registers),
                Err(failure) if attempt >= attempts => return Err(failure),
                Err(failure) => {
                    debug!(
                        endpoint = %self.endpoint,
                        start = request.start,
                        attempt,
                        error = %failure,
                        "Read attempt failed, retrying"
                    );
                    attempt += 1;
                }
            }
        }
    }

    async fn read_once(
        &self,
        request: &ReadRequest,
        timeout: Duration,
    ) -> Result<RegisterArray, PollFailure> {
        let mut slot = self.context.lock().await;
        let mut ctx = match slot.take() {
            Some(ctx) => ctx,
            None => self.connect().await?,
        };

        ctx.set_slave(Slave(request.slave_address));
        let read = async {
            match request.function_code {
                ReadFunctionCode::InputRegisters => {
                    ctx.read_input_registers(request.start, request.word_count)
                        .await
                }
                ReadFunctionCode::HoldingRegisters => {
                    ctx.read_holding_registers(request.start, request.word_count)
                        .await
                }
            }
        };

        // The connection is only put back when the slave answered.
        match tokio::time::timeout(timeout, read).await {
            Err(_) => Err(PollFailure::Timeout(timeout)),
            Ok(Err(e)) => Err(PollFailure::Io(e.to_string())),
            Ok(Ok(Err(exception))) => {
                *slot = Some(ctx);
                Err(PollFailure::Exception(format!("{:?}", exception)))
            }
            Ok(Ok(Ok(words))) => {
                *slot = Some(ctx);
                trace!(endpoint = %self.endpoint, start = request.start, ?words, "Read");
                Ok(RegisterArray::from(words))
            }
        }
    }

    async fn connect(&self) -> Result<Context, PollFailure> {
        match &self.connection {
            ConnectionConfig::Tcp { host, port } => {
                let connect = async {
                    let addr = tokio::net::lookup_host((host.as_str(), *port))
                        .await
                        .map_err(|e| {
                            PollFailure::Connection(format!("Cannot resolve {}: {}", host, e))
                        })?
                        .next()
                        .ok_or_else(|| {
                            PollFailure::Connection(format!("No address for {}", host))
                        })?;

                    let ctx = tcp::connect(addr)
                        .await
                        .map_err(|e| PollFailure::Connection(e.to_string()))?;
                    Ok::<_, PollFailure>(ctx)
                };

                let ctx = tokio::time::timeout(self.connect_timeout, connect)
                    .await
                    .map_err(|_| PollFailure::Connection("Connection timeout".to_string()))??;

                debug!(endpoint = %self.endpoint, "Connected to {}:{}", host, port);
                Ok(ctx)
            }
            ConnectionConfig::Rtu {
                port,
                baud_rate,
                data_bits,
                parity,
                stop_bits,
            } => {
                let parity = match parity.to_lowercase().as_str() {
                    "even" => tokio_serial::Parity::Even,
                    "odd" => tokio_serial::Parity::Odd,
                    _ => tokio_serial::Parity::None,
                };

                let stop_bits = match stop_bits {
                    2 => tokio_serial::StopBits::Two,
                    _ => tokio_serial::StopBits::One,
                };

                let data_bits = match data_bits {
                    5 => tokio_serial::DataBits::Five,
                    6 => tokio_serial::DataBits::Six,
                    7 => tokio_serial::DataBits::Seven,
                    _ => tokio_serial::DataBits::Eight,
                };

                let builder = tokio_serial::new(port, *baud_rate)
                    .parity(parity)
                    .stop_bits(stop_bits)
                    .data_bits(data_bits)
                    .timeout(self.connect_timeout);

                let serial = tokio_serial::SerialStream::open(&builder).map_err(|e| {
                    PollFailure::Connection(format!("Serial open failed: {}", e))
                })?;

                debug!(endpoint = %self.endpoint, "Opened {}", port);
                Ok(rtu::attach(serial))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(port: u16) -> EndpointConfig {
        EndpointConfig {
            name: "local".to_string(),
            label: Some("Local PLC".to_string()),
            connection: ConnectionConfig::Tcp {
                host: "127.0.0.1".to_string(),
                port,
            },
            connect_timeout_ms: 500,
        }
    }

    #[test]
    fn test_open_requires_runtime() {
        let endpoint = ModbusEndpoint::new(config(502));
        assert!(matches!(endpoint.open(), Err(EndpointError::NoRuntime(name)) if name == "local"));
        assert!(!endpoint.is_online());
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let endpoint = ModbusEndpoint::new(config(502));
        assert_eq!(endpoint.label(), "Local PLC");
        assert!(!endpoint.is_online());
        assert!(endpoint.communication_interface().is_none());

        endpoint.open().unwrap();
        assert!(endpoint.is_online());
        assert!(endpoint.communication_interface().is_some());

        endpoint.close();
        assert!(!endpoint.is_online());
        assert!(endpoint.communication_interface().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_follows_open_and_close() {
        let endpoint = ModbusEndpoint::new(config(502));
        let mut online = endpoint.subscribe();
        assert!(!*online.borrow());

        endpoint.open().unwrap();
        assert!(online.has_changed().unwrap());
        assert!(*online.borrow_and_update());

        // Opening twice is not a change.
        endpoint.open().unwrap();
        assert!(!online.has_changed().unwrap());

        endpoint.close();
        assert!(!*online.borrow_and_update());
        endpoint.close();
        assert!(!online.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_unregister_unknown_handle() {
        let endpoint = ModbusEndpoint::new(config(502));
        endpoint.open().unwrap();
        let comms = endpoint.communication_interface().unwrap();

        assert!(!comms.unregister_regular_poll(PollTaskHandle::new(42)));
    }
}
