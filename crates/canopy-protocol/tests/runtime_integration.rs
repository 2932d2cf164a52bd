/// Integration tests: a spawned NodeRuntime driven on a paused clock.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use canopy_protocol::{
    Address, ConnectionState, Inbound, LinkMetric, NodeConfig, NodeId, NodeRole, NodeRuntime,
    Order, ProtocolEvent, RuntimeConfig, SendOutcome, SensorReading, Transport,
};
use tokio::sync::mpsc;

/// Records every send. Unicasts succeed unless `reachable` is cleared.
#[derive(Clone)]
struct RecordingTransport {
    broadcasts: Arc<Mutex<Vec<Vec<u8>>>>,
    unicasts: Arc<Mutex<Vec<(Address, Vec<u8>)>>>,
    reachable: Arc<Mutex<bool>>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            broadcasts: Arc::new(Mutex::new(Vec::new())),
            unicasts: Arc::new(Mutex::new(Vec::new())),
            reachable: Arc::new(Mutex::new(true)),
        }
    }

    fn broadcasts(&self) -> Vec<Vec<u8>> {
        self.broadcasts.lock().unwrap().clone()
    }

    fn unicasts(&self) -> Vec<(Address, Vec<u8>)> {
        self.unicasts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn broadcast(&self, payload: &[u8]) {
        self.broadcasts.lock().unwrap().push(payload.to_vec());
    }

    async fn unicast(&self, target: Address, payload: &[u8], _max_retries: u8) -> SendOutcome {
        if !*self.reachable.lock().unwrap() {
            return SendOutcome::TimedOut;
        }
        self.unicasts.lock().unwrap().push((target, payload.to_vec()));
        SendOutcome::Sent { retransmissions: 0 }
    }
}

/// Acknowledges unicasts only after `delay`, like a link burning retries.
#[derive(Clone)]
struct SlowTransport {
    inner: RecordingTransport,
    delay: Duration,
}

#[async_trait::async_trait]
impl Transport for SlowTransport {
    async fn broadcast(&self, payload: &[u8]) {
        self.inner.broadcast(payload).await;
    }

    async fn unicast(&self, target: Address, payload: &[u8], max_retries: u8) -> SendOutcome {
        tokio::time::sleep(self.delay).await;
        self.inner.unicast(target, payload, max_retries).await
    }
}

fn frame(payload: &[u8], sender: u16) -> Inbound {
    Inbound {
        payload: payload.to_vec(),
        sender: Address::new(sender),
        metric: LinkMetric(-50),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();
}

fn fast_config() -> RuntimeConfig {
    RuntimeConfig::default()
        .sensor_period(Duration::from_secs(60))
        .rng_seed(7)
}

#[tokio::test(start_paused = true)]
async fn disconnected_node_announces_until_adopted() {
    init_tracing();
    let transport = RecordingTransport::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(16);
    let mut channels = NodeRuntime::spawn(
        transport.clone(),
        inbound_rx,
        NodeConfig::new(NodeId::new(5), NodeRole::Relay),
        fast_config(),
    )
    .unwrap();

    // first announce fires at start, the next within 2-4 s
    tokio::time::sleep(Duration::from_millis(4_100)).await;
    let announces = transport.broadcasts();
    assert!(announces.len() >= 2, "got {announces:?}");
    assert!(announces.iter().all(|b| b == b"NDA"));

    inbound_tx.send(frame(b"NDR005", 1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        channels.events.recv().await.unwrap(),
        ProtocolEvent::ParentAdopted {
            parent: Address::new(1),
            metric: LinkMetric(-50),
            previous: None,
        }
    );

    let count = transport.broadcasts().len();
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(transport.broadcasts().len(), count, "connected nodes stay quiet");

    let snapshot = channels.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.parent, Some(Address::new(1)));
    channels.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn sensor_reports_every_period_once_connected() {
    init_tracing();
    let transport = RecordingTransport::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(16);
    let mut value = 0u8;
    let channels = NodeRuntime::spawn_with_sensor(
        transport.clone(),
        inbound_rx,
        NodeConfig::new(NodeId::new(5), NodeRole::Sensor),
        fast_config(),
        Box::new(move || {
            value += 1;
            value
        }),
    )
    .unwrap();

    inbound_tx.send(frame(b"NDR005", 2)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60 * 3)).await;

    let reports: Vec<_> = transport
        .unicasts()
        .into_iter()
        .filter(|(_, bytes)| bytes.starts_with(b"SRV"))
        .collect();
    assert!(
        (3..=4).contains(&reports.len()),
        "expected one report per minute, got {reports:?}"
    );
    assert!(reports.iter().all(|(to, _)| *to == Address::new(2)));
    assert_eq!(reports[0].1, b"SRV01005");
    assert_eq!(
        channels.handle.metrics().reports_originated.get(),
        reports.len() as u64
    );
    channels.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn gateway_collects_and_routes_commands() {
    init_tracing();
    let transport = RecordingTransport::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(16);
    let mut channels = NodeRuntime::spawn(
        transport.clone(),
        inbound_rx,
        NodeConfig::new(NodeId::new(1), NodeRole::Gateway),
        fast_config(),
    )
    .unwrap();

    inbound_tx.send(frame(b"SRV42005", 3)).await.unwrap();
    assert_eq!(
        channels.reports.recv().await.unwrap(),
        SensorReading {
            origin: NodeId::new(5),
            value: 42
        }
    );

    channels
        .handle
        .issue_command(Order::OPEN, NodeId::new(5))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(transport
        .unicasts()
        .contains(&(Address::new(3), b"COM1005".to_vec())));

    // orders for the gateway itself go to its own actuator
    channels
        .handle
        .issue_command(Order::CLOSE, NodeId::new(1))
        .await
        .unwrap();
    assert_eq!(channels.orders.recv().await.unwrap(), Order::CLOSE);
    channels.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn parent_timeout_restarts_discovery_immediately() {
    init_tracing();
    let transport = RecordingTransport::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(16);
    let mut channels = NodeRuntime::spawn(
        transport.clone(),
        inbound_rx,
        NodeConfig::new(NodeId::new(5), NodeRole::Relay),
        fast_config(),
    )
    .unwrap();

    inbound_tx.send(frame(b"NDR005", 1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let announces_before = transport.broadcasts().len();

    *transport.reachable.lock().unwrap() = false;
    channels.handle.report_reading(30).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut lost = false;
    while let Ok(event) = channels.events.try_recv() {
        lost |= event == ProtocolEvent::ParentLost { parent: Address::new(1) };
    }
    assert!(lost);
    assert_eq!(transport.broadcasts().len(), announces_before + 1);
    assert_eq!(transport.broadcasts().last().unwrap(), b"NDA");
    channels.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn slow_unicast_does_not_stall_the_loop() {
    init_tracing();
    let transport = SlowTransport {
        inner: RecordingTransport::new(),
        delay: Duration::from_secs(5),
    };
    let (inbound_tx, inbound_rx) = mpsc::channel(16);
    let channels = NodeRuntime::spawn(
        transport.clone(),
        inbound_rx,
        NodeConfig::new(NodeId::new(5), NodeRole::Relay),
        fast_config(),
    )
    .unwrap();

    inbound_tx.send(frame(b"NDR005", 1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    channels.handle.report_reading(30).await.unwrap();
    inbound_tx.send(frame(b"SRV42009", 9)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // both reports are still in flight, yet the node answers and learns
    let snapshot = tokio::time::timeout(Duration::from_millis(100), channels.handle.snapshot())
        .await
        .expect("event loop blocked behind a unicast")
        .unwrap();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert!(snapshot
        .routes
        .iter()
        .any(|r| r.destination == NodeId::new(9)));
    assert!(transport.inner.unicasts().is_empty());

    tokio::time::sleep(Duration::from_secs(6)).await;
    let mut sent: Vec<_> = transport
        .inner
        .unicasts()
        .into_iter()
        .filter(|(_, bytes)| bytes.starts_with(b"SRV"))
        .collect();
    sent.sort();
    assert_eq!(
        sent,
        vec![
            (Address::new(1), b"SRV30005".to_vec()),
            (Address::new(1), b"SRV42009".to_vec()),
        ]
    );
    channels.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn handle_fails_after_shutdown() {
    init_tracing();
    let (_inbound_tx, inbound_rx) = mpsc::channel(16);
    let channels = NodeRuntime::spawn(
        RecordingTransport::new(),
        inbound_rx,
        NodeConfig::new(NodeId::new(5), NodeRole::Relay),
        fast_config(),
    )
    .unwrap();

    channels.handle.shutdown().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(channels.handle.snapshot().await.is_err());
}

#[test]
fn invalid_config_is_rejected_before_spawning() {
    let (_tx, rx) = mpsc::channel(1);
    let result = NodeRuntime::spawn(
        RecordingTransport::new(),
        rx,
        NodeConfig::new(NodeId::new(5000), NodeRole::Relay),
        RuntimeConfig::default(),
    );
    assert!(result.is_err());
}
