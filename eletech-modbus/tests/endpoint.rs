//! Modbus TCP endpoint tests against local sockets.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use eletech_common::{DeviceStatus, OfflineReason, StateValue};
use eletech_modbus::config::{ConnectionConfig, EndpointConfig};
use eletech_modbus::endpoint::ModbusEndpoint;
use eletech_modbus::mock::RecordingSink;
use eletech_modbus::registers::CHANNEL_1;
use eletech_modbus::scheduler::PollSettings;
use eletech_modbus::transport::{
    EndpointProvider, PollFailure, PollOutcome, ReadFunctionCode, ReadRequest,
};
use eletech_modbus::{DeviceProfile, ThingHandler};

fn tcp_endpoint(port: u16) -> ModbusEndpoint {
    ModbusEndpoint::new(EndpointConfig {
        name: "local".to_string(),
        label: None,
        connection: ConnectionConfig::Tcp {
            host: "127.0.0.1".to_string(),
            port,
        },
        connect_timeout_ms: 500,
    })
}

fn read_request(max_tries: u32) -> ReadRequest {
    ReadRequest {
        slave_address: 1,
        function_code: ReadFunctionCode::InputRegisters,
        start: 6,
        word_count: 2,
        max_tries,
    }
}

/// Answer every read-input-registers request with `[0x41BC, 0x0000]`.
async fn serve_input_registers(listener: TcpListener) {
    while let Ok((mut socket, _)) = listener.accept().await {
        tokio::spawn(async move {
            // MBAP header (7 bytes) + function (1) + start (2) + count (2)
            let mut request = [0u8; 12];
            while socket.read_exact(&mut request).await.is_ok() {
                let response = [
                    request[0], request[1], // transaction id
                    0x00, 0x00, // protocol id
                    0x00, 0x07, // length
                    request[6], // unit id
                    0x04, // function
                    0x04, // byte count
                    0x41, 0xBC, 0x00, 0x00,
                ];
                if socket.write_all(&response).await.is_err() {
                    break;
                }
            }
        });
    }
}

/// Answer every request with exception 0x02 (illegal data address).
async fn serve_exceptions(listener: TcpListener, requests: Arc<AtomicUsize>) {
    while let Ok((mut socket, _)) = listener.accept().await {
        let requests = requests.clone();
        tokio::spawn(async move {
            let mut request = [0u8; 12];
            while socket.read_exact(&mut request).await.is_ok() {
                requests.fetch_add(1, Ordering::SeqCst);
                let response = [
                    request[0], request[1], // transaction id
                    0x00, 0x00, // protocol id
                    0x00, 0x03, // length
                    request[6], // unit id
                    request[7] | 0x80, // function with error bit
                    0x02, // exception code
                ];
                if socket.write_all(&response).await.is_err() {
                    break;
                }
            }
        });
    }
}

/// Read requests and never answer.
async fn serve_nothing(listener: TcpListener, requests: Arc<AtomicUsize>) {
    while let Ok((mut socket, _)) = listener.accept().await {
        let requests = requests.clone();
        tokio::spawn(async move {
            let mut request = [0u8; 12];
            while socket.read_exact(&mut request).await.is_ok() {
                requests.fetch_add(1, Ordering::SeqCst);
            }
        });
    }
}

async fn next_outcome(rx: &mut mpsc::UnboundedReceiver<PollOutcome>) -> PollOutcome {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no poll result")
        .unwrap()
}

#[tokio::test]
async fn poll_against_refused_port_reports_failure() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let endpoint = tcp_endpoint(port);
    endpoint.open().unwrap();
    let comms = endpoint.communication_interface().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<PollOutcome>();
    let handle = comms.register_regular_poll(
        read_request(2),
        Duration::from_secs(60),
        Duration::from_millis(500),
        Arc::new(move |outcome: PollOutcome| {
            let _ = tx.send(outcome);
        }),
    );

    let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no poll result")
        .unwrap();
    assert!(matches!(outcome, Err(PollFailure::Connection(_))));

    assert!(comms.unregister_regular_poll(handle));
    assert!(!comms.unregister_regular_poll(handle));
    assert_eq!(endpoint.active_polls(), 0);

    endpoint.close();
    assert!(!endpoint.is_online());
}

#[tokio::test]
async fn poll_reads_input_registers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(serve_input_registers(listener));

    let endpoint = tcp_endpoint(port);
    endpoint.open().unwrap();
    let comms = endpoint.communication_interface().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<PollOutcome>();
    comms.register_regular_poll(
        read_request(1),
        Duration::from_millis(50),
        Duration::from_millis(1000),
        Arc::new(move |outcome: PollOutcome| {
            let _ = tx.send(outcome);
        }),
    );

    // Two ticks share one connection.
    for _ in 0..2 {
        let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no poll result")
            .unwrap();
        assert_eq!(outcome.unwrap().as_slice(), &[0x41BC, 0x0000]);
    }

    endpoint.close();
    assert_eq!(endpoint.active_polls(), 0);
}

#[tokio::test]
async fn thing_goes_online_through_tcp_endpoint() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(serve_input_registers(listener));

    let endpoint = Arc::new(tcp_endpoint(port));
    endpoint.open().unwrap();
    let sink = Arc::new(RecordingSink::new());

    let handler = ThingHandler::new(
        "boiler",
        DeviceProfile::Sample,
        PollSettings {
            slave_address: 1,
            interval: Duration::from_secs(1),
            max_tries: 1,
        },
        endpoint.clone(),
        sink.clone(),
    );
    handler.initialize().unwrap();
    assert_eq!(endpoint.active_polls(), 1);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while sink.values().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(
        sink.values().first(),
        Some(&(CHANNEL_1.to_string(), StateValue::Decimal(23.5)))
    );
    assert_eq!(handler.status(), DeviceStatus::Online);

    handler.dispose();
    assert_eq!(endpoint.active_polls(), 0);
    endpoint.close();
}

#[tokio::test]
async fn exception_response_is_retried_then_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(AtomicUsize::new(0));
    tokio::spawn(serve_exceptions(listener, requests.clone()));

    let endpoint = tcp_endpoint(port);
    endpoint.open().unwrap();
    let comms = endpoint.communication_interface().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<PollOutcome>();
    comms.register_regular_poll(
        read_request(3),
        Duration::from_secs(60),
        Duration::from_millis(1000),
        Arc::new(move |outcome: PollOutcome| {
            let _ = tx.send(outcome);
        }),
    );

    let outcome = next_outcome(&mut rx).await;
    assert!(
        matches!(&outcome, Err(PollFailure::Exception(code)) if code.contains("IllegalDataAddress")),
        "unexpected outcome: {outcome:?}"
    );
    assert_eq!(requests.load(Ordering::SeqCst), 3);

    endpoint.close();
}

#[tokio::test]
async fn silent_slave_times_out_every_attempt() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(AtomicUsize::new(0));
    tokio::spawn(serve_nothing(listener, requests.clone()));

    let endpoint = tcp_endpoint(port);
    endpoint.open().unwrap();
    let comms = endpoint.communication_interface().unwrap();

    let timeout = Duration::from_millis(200);
    let (tx, mut rx) = mpsc::unbounded_channel::<PollOutcome>();
    let started = tokio::time::Instant::now();
    comms.register_regular_poll(
        read_request(2),
        Duration::from_secs(60),
        timeout,
        Arc::new(move |outcome: PollOutcome| {
            let _ = tx.send(outcome);
        }),
    );

    let outcome = next_outcome(&mut rx).await;
    let elapsed = started.elapsed();

    assert_eq!(outcome, Err(PollFailure::Timeout(timeout)));
    assert!(elapsed >= 2 * timeout, "finished after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "finished after {elapsed:?}");
    assert_eq!(requests.load(Ordering::SeqCst), 2);

    endpoint.close();
}

#[tokio::test]
async fn zero_interval_is_clamped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(serve_input_registers(listener));

    let endpoint = tcp_endpoint(port);
    endpoint.open().unwrap();
    let comms = endpoint.communication_interface().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<PollOutcome>();
    comms.register_regular_poll(
        read_request(1),
        Duration::ZERO,
        Duration::from_millis(1000),
        Arc::new(move |outcome: PollOutcome| {
            let _ = tx.send(outcome);
        }),
    );

    // The poll task survives and keeps ticking.
    for _ in 0..3 {
        let outcome = next_outcome(&mut rx).await;
        assert_eq!(outcome.unwrap().as_slice(), &[0x41BC, 0x0000]);
    }
    assert_eq!(endpoint.active_polls(), 1);

    endpoint.close();
}

#[tokio::test]
async fn thing_follows_endpoint_close_and_reopen() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(serve_input_registers(listener));

    let endpoint = Arc::new(tcp_endpoint(port));
    endpoint.open().unwrap();
    let sink = Arc::new(RecordingSink::new());

    let handler = ThingHandler::new(
        "boiler",
        DeviceProfile::Sample,
        PollSettings {
            slave_address: 1,
            interval: Duration::from_millis(50),
            max_tries: 1,
        },
        endpoint.clone(),
        sink.clone(),
    );
    handler.initialize().unwrap();

    let follower = handler.clone();
    let online = endpoint.subscribe();
    let follow = tokio::spawn(async move { follower.follow_bridge(online).await });

    let wait_for = |status: DeviceStatus| {
        let handler = handler.clone();
        async move {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            while handler.status() != status && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            handler.status()
        }
    };

    assert_eq!(wait_for(DeviceStatus::Online).await, DeviceStatus::Online);

    endpoint.close();
    let offline = DeviceStatus::Offline(OfflineReason::BridgeOffline);
    assert_eq!(wait_for(offline).await, offline);
    assert_eq!(handler.poll_task_count(), 0);
    assert_eq!(
        sink.last_description().as_deref(),
        Some("Bridge 'local' is offline")
    );

    endpoint.open().unwrap();
    assert_eq!(wait_for(DeviceStatus::Online).await, DeviceStatus::Online);
    assert_eq!(endpoint.active_polls(), 1);

    handler.dispose();
    follow.abort();
    endpoint.close();
}
