//! Scenario setup and execution.
//!
//! Lays nodes out on a grid, attaches each to the radio medium, spawns one
//! `NodeRuntime` per node and lets the paused clock run for the requested
//! simulated duration.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use canopy_protocol::{
    EvaluationPolicy, NodeConfig, NodeId, NodeRole, NodeRuntime, NodeSnapshot,
    ProtocolEvent, RandomSensor, RuntimeChannels, RuntimeConfig, RuntimeHandle, SensorSource,
};
use canopy_protocol::types::MAX_SENSOR_VALUE;
use tokio::time::Instant;

use crate::radio::{Position, RadioMedium};
use crate::report::{OrderRecord, SimReport};

/// Gateway node id. Always at the grid origin.
pub const GATEWAY_ID: u16 = 1;

/// Scheduled power-off of one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Failure {
    pub node: u16,
    pub at: Duration,
}

impl std::str::FromStr for Failure {
    type Err = String;

    /// `NODE@SECONDS`, e.g. `4@120`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (node, at) = s
            .split_once('@')
            .ok_or_else(|| format!("expected NODE@SECONDS, got '{s}'"))?;
        let node = node
            .trim()
            .parse()
            .map_err(|e| format!("bad node id '{node}': {e}"))?;
        let secs: u64 = at
            .trim()
            .parse()
            .map_err(|e| format!("bad time '{at}': {e}"))?;
        Ok(Self {
            node,
            at: Duration::from_secs(secs),
        })
    }
}

/// Anomaly injection: the node's readings sit at a quiet baseline, then
/// climb by a fixed step per reading from `after` on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ramp {
    pub node: u16,
    pub after: Duration,
}

const RAMP_BASELINE: u8 = 1;
const RAMP_STEP: u8 = 20;

#[derive(Debug, Clone)]
pub struct Scenario {
    pub nodes: u16,
    pub columns: u16,
    pub spacing: f64,
    pub range: f64,
    pub loss: f64,
    pub seed: u64,
    pub duration: Duration,
    pub aggregators: Vec<u16>,
    pub window_len: usize,
    pub evaluation: EvaluationPolicy,
    pub ramp: Option<Ramp>,
    pub failures: Vec<Failure>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            nodes: 9,
            columns: 3,
            spacing: 10.0,
            range: 15.0,
            loss: 0.0,
            seed: 42,
            duration: Duration::from_secs(600),
            aggregators: Vec::new(),
            window_len: 5,
            evaluation: EvaluationPolicy::EveryReading,
            ramp: None,
            failures: Vec::new(),
        }
    }
}

impl Scenario {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.nodes >= 1, "need at least one node");
        anyhow::ensure!(self.columns >= 1, "grid needs at least one column");
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.loss),
            "loss must be within 0..=1, got {}",
            self.loss
        );
        for &id in self.aggregators.iter().chain(self.ramp.as_ref().map(|r| &r.node)) {
            anyhow::ensure!(
                (1..=self.nodes).contains(&id),
                "node {id} is not part of the mesh"
            );
        }
        for failure in &self.failures {
            anyhow::ensure!(
                failure.node != GATEWAY_ID,
                "the gateway cannot be failed"
            );
            anyhow::ensure!(
                (1..=self.nodes).contains(&failure.node),
                "node {} is not part of the mesh",
                failure.node
            );
        }
        Ok(())
    }

    /// Grid position of node `id` (row-major, 1-based ids).
    pub fn position(&self, id: u16) -> Position {
        let index = id - 1;
        Position {
            x: f64::from(index % self.columns) * self.spacing,
            y: f64::from(index / self.columns) * self.spacing,
        }
    }

    fn node_config(&self, id: u16) -> NodeConfig {
        let role = if id == GATEWAY_ID {
            NodeRole::Gateway
        } else {
            NodeRole::Sensor
        };
        NodeConfig::new(NodeId::new(id), role)
            .aggregate(self.aggregators.contains(&id))
            .window_len(self.window_len)
            .evaluation(self.evaluation)
    }

    fn sensor(&self, id: u16) -> Box<dyn SensorSource> {
        let mut random = RandomSensor::seeded(self.seed ^ u64::from(id));
        match self.ramp {
            Some(ramp) if ramp.node == id => {
                let start = Instant::now() + ramp.after;
                let mut level = RAMP_BASELINE;
                Box::new(move || {
                    if Instant::now() >= start {
                        level = level.saturating_add(RAMP_STEP).min(MAX_SENSOR_VALUE);
                    }
                    level
                })
            }
            _ => Box::new(move || random.sample()),
        }
    }
}

/// Run the scenario to completion on the current (paused-clock) runtime.
pub async fn run(scenario: &Scenario) -> anyhow::Result<SimReport> {
    scenario.validate()?;
    let started = Instant::now();

    let positions: HashMap<u16, Position> = (1..=scenario.nodes)
        .map(|id| (id, scenario.position(id)))
        .collect();
    let medium = RadioMedium::new(positions, scenario.range, scenario.loss, scenario.seed);
    let runtime_config = RuntimeConfig::default().rng_seed(scenario.seed);

    let collected = Arc::new(Mutex::new(BTreeMap::<u16, u64>::new()));
    let orders = Arc::new(Mutex::new(Vec::<OrderRecord>::new()));
    let events = Arc::new(Mutex::new(BTreeMap::<&'static str, u64>::new()));
    let mut handles: BTreeMap<u16, RuntimeHandle> = BTreeMap::new();

    for id in 1..=scenario.nodes {
        let (port, inbound) = medium.attach(id, runtime_config.channel_capacity);
        let RuntimeChannels {
            handle,
            reports: mut report_rx,
            orders: mut order_rx,
            events: mut event_rx,
        } = NodeRuntime::spawn_with_sensor(
            port,
            inbound,
            scenario.node_config(id),
            runtime_config.clone(),
            scenario.sensor(id),
        )?;

        let sink = Arc::clone(&collected);
        tokio::spawn(async move {
            while let Some(reading) = report_rx.recv().await {
                *lock(&sink).entry(reading.origin.get()).or_default() += 1;
            }
        });

        let sink = Arc::clone(&orders);
        tokio::spawn(async move {
            while let Some(order) = order_rx.recv().await {
                lock(&sink).push(OrderRecord {
                    node: id,
                    order: order.to_string(),
                    at_s: started.elapsed().as_secs_f64(),
                });
            }
        });

        let sink = Arc::clone(&events);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                *lock(&sink).entry(event_name(&event)).or_default() += 1;
            }
        });

        handles.insert(id, handle);
    }

    for failure in scenario.failures.iter().copied() {
        let medium = Arc::clone(&medium);
        let handle = handles.get(&failure.node).cloned();
        tokio::spawn(async move {
            tokio::time::sleep(failure.at).await;
            tracing::info!(node = failure.node, "powering node off");
            medium.set_down(failure.node);
            if let Some(handle) = handle {
                handle.shutdown().await;
            }
        });
    }

    tokio::time::sleep(scenario.duration).await;

    let mut snapshots: Vec<NodeSnapshot> = Vec::new();
    for (&id, handle) in &handles {
        match handle.snapshot().await {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(_) => tracing::debug!(node = id, "node is down, no snapshot"),
        }
    }
    for handle in handles.values() {
        handle.shutdown().await;
    }

    let collected = lock(&collected).clone();
    let orders = lock(&orders).clone();
    let events = lock(&events).clone();
    Ok(SimReport::build(
        scenario,
        &medium,
        snapshots,
        collected,
        orders,
        events,
    ))
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn event_name(event: &ProtocolEvent) -> &'static str {
    match event {
        ProtocolEvent::ParentAdopted { .. } => "parent_adopted",
        ProtocolEvent::ParentLost { .. } => "parent_lost",
        ProtocolEvent::RouteCreated { .. } => "route_created",
        ProtocolEvent::RouteEvicted { .. } => "route_evicted",
        ProtocolEvent::ChildPromoted { .. } => "child_promoted",
        ProtocolEvent::OrderIssued { .. } => "order_issued",
        ProtocolEvent::DeliveryFailed { .. } => "delivery_failed",
        ProtocolEvent::Dropped { .. } => "dropped",
    }
}
