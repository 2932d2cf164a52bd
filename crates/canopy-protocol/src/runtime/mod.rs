/// Node runtime: drives one `ForwardingEngine` from a live event loop.
///
/// The runtime owns the engine and the transport. It exposes a
/// channel-based API so the application (gateway service, simulator) never
/// touches wire bytes or protocol state directly.
pub mod effect;
mod executor;
mod r#loop;
pub mod reliable;
pub mod sensor;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use canopy_metrics::NodeMetrics;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::config::NodeConfig;
use crate::discovery::{ANNOUNCE_INTERVAL_MAX_MS, ANNOUNCE_INTERVAL_MIN_MS};
use crate::error::MeshProtocolError;
use crate::forwarding::{ForwardingEngine, NodeSnapshot};
use crate::routing::RouteRole;
use crate::types::{Address, LinkMetric, NodeId, Order, SensorReading};

pub use effect::RuntimeEffect;
pub use reliable::{ReliableTransport, MAX_RETRANSMISSIONS};
pub use sensor::{RandomSensor, SensorSource};
pub use transport::{Inbound, SendOutcome, Transport};

// ── Configuration ─────────────────────────────────────────────────────

/// Timers and plumbing of the node runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Announce interval, drawn uniformly in `[min, max]` on every re-arm.
    pub announce_interval_min: Duration,
    pub announce_interval_max: Duration,
    /// Maintenance interval, drawn uniformly in `[min, max]`.
    pub maintenance_interval_min: Duration,
    pub maintenance_interval_max: Duration,
    /// Period of this node's own readings. The first one comes after a
    /// random offset in `[0, period)`.
    pub sensor_period: Duration,
    /// Retransmissions before a unicast is declared timed out.
    pub max_retransmissions: u8,
    /// Capacity of every runtime channel.
    pub channel_capacity: usize,
    /// Seed for timer jitter and the default sensor. `None` uses OS entropy.
    pub rng_seed: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            announce_interval_min: Duration::from_millis(ANNOUNCE_INTERVAL_MIN_MS),
            announce_interval_max: Duration::from_millis(ANNOUNCE_INTERVAL_MAX_MS),
            maintenance_interval_min: Duration::from_secs(10),
            maintenance_interval_max: Duration::from_secs(30),
            sensor_period: Duration::from_secs(60),
            max_retransmissions: MAX_RETRANSMISSIONS,
            channel_capacity: 64,
            rng_seed: None,
        }
    }
}

impl RuntimeConfig {
    pub fn announce_interval(mut self, min: Duration, max: Duration) -> Self {
        self.announce_interval_min = min;
        self.announce_interval_max = max;
        self
    }

    pub fn maintenance_interval(mut self, min: Duration, max: Duration) -> Self {
        self.maintenance_interval_min = min;
        self.maintenance_interval_max = max;
        self
    }

    pub fn sensor_period(mut self, period: Duration) -> Self {
        self.sensor_period = period;
        self
    }

    pub fn max_retransmissions(mut self, retries: u8) -> Self {
        self.max_retransmissions = retries;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), MeshProtocolError> {
        let ranges = [
            (
                "announce",
                self.announce_interval_min,
                self.announce_interval_max,
            ),
            (
                "maintenance",
                self.maintenance_interval_min,
                self.maintenance_interval_max,
            ),
        ];
        for (name, min, max) in ranges {
            if min.is_zero() || min > max {
                return Err(MeshProtocolError::InvalidConfig(format!(
                    "{name} interval must satisfy 0 < min <= max, got {min:?}..{max:?}"
                )));
            }
        }
        if self.sensor_period.is_zero() {
            return Err(MeshProtocolError::InvalidConfig(
                "sensor_period must be non-zero".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(MeshProtocolError::InvalidConfig(
                "channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ── Commands (app → runtime) ──────────────────────────────────────────

/// Commands the application sends to the runtime event loop.
#[derive(Debug)]
pub enum RuntimeCommand {
    /// Route an order to `destination` (or actuate it, if that is us).
    IssueCommand { order: Order, destination: NodeId },
    /// Report an externally sampled reading now, outside the sensor timer.
    ReportReading { value: u8 },
    /// Query: current node state.
    Snapshot { reply: oneshot::Sender<NodeSnapshot> },
    /// Graceful shutdown.
    Shutdown,
}

// ── Events (runtime → app) ───────────────────────────────────────────

/// Protocol-level events the application may want to observe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// A parent was adopted, first or as a stronger replacement.
    ParentAdopted {
        parent: Address,
        metric: LinkMetric,
        previous: Option<Address>,
    },
    /// Delivery to the parent timed out; discovery restarts.
    ParentLost { parent: Address },
    RouteCreated {
        destination: NodeId,
        next_hop: Address,
        role: RouteRole,
    },
    RouteEvicted { destination: NodeId, role: RouteRole },
    /// A pending child moved into a freed aggregation slot.
    ChildPromoted { child: NodeId },
    /// Local aggregation sent an order to a child.
    OrderIssued { child: NodeId, order: Order },
    /// A unicast to a non-parent neighbor timed out.
    DeliveryFailed { target: Address },
    /// An input was discarded.
    Dropped { error: MeshProtocolError },
}

// ── RuntimeHandle ────────────────────────────────────────────────────

/// Handle for sending commands to a running node. Cheap to clone.
#[derive(Clone)]
pub struct RuntimeHandle {
    cmd_tx: mpsc::Sender<RuntimeCommand>,
    local_id: NodeId,
    metrics: Arc<NodeMetrics>,
}

impl RuntimeHandle {
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Counters of the running node, readable without a round trip.
    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }

    /// Route `order` to `destination`.
    pub async fn issue_command(
        &self,
        order: Order,
        destination: NodeId,
    ) -> Result<(), MeshProtocolError> {
        self.send(RuntimeCommand::IssueCommand { order, destination })
            .await
    }

    /// Push a reading from an external sensor.
    pub async fn report_reading(&self, value: u8) -> Result<(), MeshProtocolError> {
        self.send(RuntimeCommand::ReportReading { value }).await
    }

    /// Current node state.
    pub async fn snapshot(&self) -> Result<NodeSnapshot, MeshProtocolError> {
        let (tx, rx) = oneshot::channel();
        self.send(RuntimeCommand::Snapshot { reply: tx }).await?;
        rx.await.map_err(|_| MeshProtocolError::RuntimeShutdown)
    }

    /// Graceful shutdown.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(RuntimeCommand::Shutdown).await;
    }

    async fn send(&self, cmd: RuntimeCommand) -> Result<(), MeshProtocolError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| MeshProtocolError::RuntimeShutdown)
    }
}

// ── RuntimeChannels ──────────────────────────────────────────────────

/// Channels returned to the application when the runtime starts.
pub struct RuntimeChannels {
    /// Handle to send commands to the runtime.
    pub handle: RuntimeHandle,
    /// Readings collected at the gateway. Stays empty on other nodes.
    pub reports: mpsc::Receiver<SensorReading>,
    /// Orders addressed to this node, for the actuator.
    pub orders: mpsc::Receiver<Order>,
    /// Protocol-level events.
    pub events: mpsc::Receiver<ProtocolEvent>,
}

/// Output side of the event loop.
pub(crate) struct Outputs {
    pub reports: mpsc::Sender<SensorReading>,
    pub orders: mpsc::Sender<Order>,
    pub events: mpsc::Sender<ProtocolEvent>,
}

// ── NodeRuntime ──────────────────────────────────────────────────────

/// The node runtime: spawn it and communicate through channels.
pub struct NodeRuntime;

impl NodeRuntime {
    /// Start a node with the default random sensor.
    ///
    /// `inbound` carries frames from the radio. Spawns the event loop as a
    /// tokio task.
    pub fn spawn<T: Transport + 'static>(
        transport: T,
        inbound: mpsc::Receiver<Inbound>,
        node: NodeConfig,
        config: RuntimeConfig,
    ) -> Result<RuntimeChannels, MeshProtocolError> {
        let sensor = match config.rng_seed {
            Some(seed) => RandomSensor::seeded(seed ^ u64::from(node.node_id.get())),
            None => RandomSensor::new(),
        };
        Self::spawn_with_sensor(transport, inbound, node, config, Box::new(sensor))
    }

    /// Start a node reading from a custom sensor.
    pub fn spawn_with_sensor<T: Transport + 'static>(
        transport: T,
        inbound: mpsc::Receiver<Inbound>,
        node: NodeConfig,
        config: RuntimeConfig,
        sensor: Box<dyn SensorSource>,
    ) -> Result<RuntimeChannels, MeshProtocolError> {
        config.validate()?;
        let metrics = Arc::new(NodeMetrics::new());
        let engine = ForwardingEngine::with_metrics(node, Arc::clone(&metrics))?;
        let local_id = engine.local_id();

        // Command channel (app → runtime)
        let (cmd_tx, cmd_rx) = mpsc::channel::<RuntimeCommand>(config.channel_capacity);

        // Output channels (runtime → app)
        let (reports_tx, reports_rx) = mpsc::channel(config.channel_capacity);
        let (orders_tx, orders_rx) = mpsc::channel(config.channel_capacity);
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);

        let transport = ReliableTransport::new(transport, config.max_retransmissions);
        let outputs = Outputs {
            reports: reports_tx,
            orders: orders_tx,
            events: events_tx,
        };

        tokio::spawn(r#loop::runtime_loop(
            engine, transport, sensor, config, inbound, cmd_rx, outputs,
        ));

        Ok(RuntimeChannels {
            handle: RuntimeHandle {
                cmd_tx,
                local_id,
                metrics,
            },
            reports: reports_rx,
            orders: orders_rx,
            events: events_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.announce_interval_min, Duration::from_secs(2));
        assert_eq!(config.announce_interval_max, Duration::from_secs(4));
        assert_eq!(config.max_retransmissions, 4);
    }

    #[test]
    fn inverted_interval_rejected() {
        let config = RuntimeConfig::default()
            .maintenance_interval(Duration::from_secs(30), Duration::from_secs(10));
        assert!(matches!(
            config.validate(),
            Err(MeshProtocolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_sensor_period_rejected() {
        let config = RuntimeConfig::default().sensor_period(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
