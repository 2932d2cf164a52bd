/// ForwardingEngine: all protocol state of one node, no I/O.
///
/// Owns the codec, parent selection, routes and child aggregation. Each
/// handler processes one input to completion and returns the effects the
/// runtime must carry out.
use std::sync::Arc;

use canopy_metrics::{MetricsSnapshot, NodeMetrics};
use serde::Serialize;

use crate::aggregator::{ChildAggregator, EvaluationPolicy};
use crate::codec::{Message, MessageCodec};
use crate::config::NodeConfig;
use crate::discovery::{ConnectionState, DiscoveryEvent, TopologyManager};
use crate::error::{MeshProtocolError, Pool};
use crate::routing::{RouteEntry, RouteRole, RouteTable, Upsert};
use crate::runtime::{ProtocolEvent, RuntimeEffect, SendOutcome};
use crate::types::{Address, LinkMetric, NodeId, NodeRole, Order, SensorReading, MAX_SENSOR_VALUE};

/// Point-in-time view of a node, for diagnostics and the simulator report.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub role: NodeRole,
    pub state: ConnectionState,
    pub parent: Option<Address>,
    pub best_metric: Option<LinkMetric>,
    pub routes: Vec<RouteEntry>,
    pub children: Vec<NodeId>,
    pub open_valves: Vec<NodeId>,
    pub metrics: MetricsSnapshot,
}

pub struct ForwardingEngine {
    config: NodeConfig,
    codec: MessageCodec,
    topology: TopologyManager,
    routes: RouteTable,
    children: ChildAggregator,
    metrics: Arc<NodeMetrics>,
}

impl ForwardingEngine {
    pub fn new(config: NodeConfig) -> Result<Self, MeshProtocolError> {
        Self::with_metrics(config, Arc::new(NodeMetrics::new()))
    }

    /// Build an engine that counts into shared `metrics`.
    pub fn with_metrics(
        config: NodeConfig,
        metrics: Arc<NodeMetrics>,
    ) -> Result<Self, MeshProtocolError> {
        config.validate()?;
        let codec = MessageCodec::new(config.id_size)?;
        let topology = if config.role.is_root() {
            TopologyManager::root(config.node_id)
        } else {
            TopologyManager::new(config.node_id)
        };
        let routes = RouteTable::new(config.max_routes, config.inactive_threshold);
        let children = ChildAggregator::new(
            config.max_children,
            config.window_len,
            config.trend_threshold,
            config.valve_hold,
        );
        Ok(Self {
            config,
            codec,
            topology,
            routes,
            children,
            metrics,
        })
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn local_id(&self) -> NodeId {
        self.config.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn codec(&self) -> &MessageCodec {
        &self.codec
    }

    pub fn topology(&self) -> &TopologyManager {
        &self.topology
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn children(&self) -> &ChildAggregator {
        &self.children
    }

    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let best = self.topology.best_metric();
        NodeSnapshot {
            node_id: self.config.node_id,
            role: self.config.role,
            state: self.topology.state(),
            parent: self.topology.current_parent(),
            best_metric: (best != LinkMetric::FLOOR).then_some(best),
            routes: self.routes.entries().cloned().collect(),
            children: self.children.children(),
            open_valves: self
                .children
                .children()
                .into_iter()
                .filter(|&c| self.children.valve_open(c))
                .collect(),
            metrics: self.metrics.snapshot(),
        }
    }

    // ── Inbound ──────────────────────────────────────────────────────

    /// A frame arrived from neighbor `sender` with link quality `metric`.
    pub fn handle_incoming(
        &mut self,
        payload: &[u8],
        sender: Address,
        metric: LinkMetric,
    ) -> Vec<RuntimeEffect> {
        match self.codec.decode(payload) {
            Ok(message) => self.handle_message(message, sender, metric),
            Err(err) => vec![self.dropped(err)],
        }
    }

    /// Same as `handle_incoming`, for an already decoded message.
    pub fn handle_message(
        &mut self,
        message: Message,
        sender: Address,
        metric: LinkMetric,
    ) -> Vec<RuntimeEffect> {
        match message {
            Message::Announce => self
                .topology
                .on_announce(sender)
                .map(RuntimeEffect::Broadcast)
                .into_iter()
                .collect(),
            Message::AnnounceReply { recipient } => {
                match self.topology.on_announce_reply(recipient, sender, metric) {
                    Some(event) => self.discovery_effects(event),
                    None => Vec::new(),
                }
            }
            Message::SensorReport { origin, value } => {
                self.handle_sensor_report(origin, value, sender)
            }
            Message::Command { order, destination } => self.route_command(order, destination),
        }
    }

    fn handle_sensor_report(
        &mut self,
        origin: NodeId,
        value: u8,
        sender: Address,
    ) -> Vec<RuntimeEffect> {
        let mut effects = Vec::new();

        // Upward delivery does not need either route; a full table only
        // loses the record.
        self.learn_route(origin, sender, &mut effects);
        let parent = self.topology.current_parent();
        if sender.node_id() != origin && parent != Some(sender) {
            self.learn_route(sender.node_id(), sender, &mut effects);
        }

        if self.config.aggregate && self.routes.role(origin) == Some(RouteRole::Child) {
            self.children.record(origin, value);
            if self.config.evaluation == EvaluationPolicy::EveryReading {
                if let Some(order) = self.children.decide(origin) {
                    effects.extend(self.send_order(origin, order));
                }
            }
        }

        if self.topology.is_root() {
            self.metrics.reports_collected.inc();
            effects.push(RuntimeEffect::Collect(SensorReading { origin, value }));
            return effects;
        }

        match parent {
            None => effects.push(self.dropped(MeshProtocolError::NotConnected)),
            Some(parent) if parent == sender => {
                tracing::debug!(
                    node = %self.local_id(),
                    %origin,
                    "report came from parent, not echoing"
                );
            }
            Some(parent) => {
                self.metrics.reports_forwarded.inc();
                effects.push(RuntimeEffect::Unicast {
                    target: parent,
                    message: Message::SensorReport { origin, value },
                });
            }
        }
        effects
    }

    /// Create or refresh the route `destination -> next_hop`.
    fn learn_route(
        &mut self,
        destination: NodeId,
        next_hop: Address,
        effects: &mut Vec<RuntimeEffect>,
    ) {
        match self.routes.upsert(destination, next_hop, RouteRole::Relay) {
            Ok(Upsert::Inserted) => {
                let role = self.classify_route(destination, next_hop);
                tracing::debug!(
                    node = %self.local_id(),
                    %destination,
                    %next_hop,
                    ?role,
                    "route created"
                );
                effects.push(RuntimeEffect::Emit(ProtocolEvent::RouteCreated {
                    destination,
                    next_hop,
                    role,
                }));
            }
            Ok(Upsert::Refreshed { moved: true }) => {
                tracing::debug!(node = %self.local_id(), %destination, %next_hop, "route moved");
                self.route_moved(destination, next_hop, effects);
            }
            Ok(Upsert::Refreshed { moved: false }) => {}
            Err(err) => effects.push(self.dropped(err)),
        }
    }

    /// Decide the role of a `Relay` route toward `origin`.
    ///
    /// Only an immediate child (the frame came straight from its origin)
    /// can take an aggregation slot; when all slots are taken it waits as
    /// `PendingPromotion`.
    fn classify_route(&mut self, origin: NodeId, next_hop: Address) -> RouteRole {
        if !self.config.aggregate || next_hop.node_id() != origin {
            return RouteRole::Relay;
        }
        let role = match self.children.admit(origin) {
            RouteRole::Child => RouteRole::Child,
            _ => {
                tracing::debug!(
                    node = %self.local_id(),
                    %origin,
                    error = %MeshProtocolError::PoolExhausted { pool: Pool::Children },
                    "child waits for a free slot"
                );
                RouteRole::PendingPromotion
            }
        };
        self.routes.reclassify(origin, role);
        role
    }

    /// Keep the route's role in line with its new next hop.
    ///
    /// A child heard through someone else is no longer an immediate child:
    /// its slot goes to the oldest pending route. A relayed destination now
    /// heard directly competes for a slot like a new child.
    fn route_moved(
        &mut self,
        destination: NodeId,
        next_hop: Address,
        effects: &mut Vec<RuntimeEffect>,
    ) {
        let direct = next_hop.node_id() == destination;
        match self.routes.role(destination) {
            Some(RouteRole::Child) if !direct => {
                self.routes.reclassify(destination, RouteRole::Relay);
                tracing::debug!(node = %self.local_id(), child = %destination, "child moved away");
                if let Some(promoted) = self.children.release(destination, &mut self.routes) {
                    effects.push(self.promoted(promoted));
                }
            }
            Some(RouteRole::PendingPromotion) if !direct => {
                self.routes.reclassify(destination, RouteRole::Relay);
            }
            Some(RouteRole::Relay) if direct => {
                self.classify_route(destination, next_hop);
            }
            _ => {}
        }
    }

    /// Deliver a command locally or one hop down toward `destination`.
    fn route_command(&mut self, order: Order, destination: NodeId) -> Vec<RuntimeEffect> {
        if destination == self.local_id() {
            tracing::info!(node = %self.local_id(), %order, "applying order");
            self.metrics.commands_applied.inc();
            return vec![RuntimeEffect::Actuate(order)];
        }
        match self.routes.lookup(destination) {
            Some(next_hop) => {
                self.metrics.commands_forwarded.inc();
                vec![RuntimeEffect::Unicast {
                    target: next_hop,
                    message: Message::Command { order, destination },
                }]
            }
            None => vec![self.dropped(MeshProtocolError::RouteNotFound { destination })],
        }
    }

    /// Send a locally decided order down to `child`.
    fn send_order(&mut self, child: NodeId, order: Order) -> Vec<RuntimeEffect> {
        tracing::info!(
            node = %self.local_id(),
            %child,
            %order,
            trend = ?self.children.trend(child),
            "issuing order"
        );
        self.metrics.orders_issued.inc();
        let mut effects = vec![RuntimeEffect::Emit(ProtocolEvent::OrderIssued { child, order })];
        effects.extend(self.route_command(order, child));
        effects
    }

    // ── Timers ───────────────────────────────────────────────────────

    /// Announce timer: broadcast Announce while not connected.
    pub fn tick_announce(&mut self) -> Vec<RuntimeEffect> {
        match self.topology.tick_announce() {
            Some(announce) => {
                tracing::debug!(node = %self.local_id(), "looking for a parent");
                vec![RuntimeEffect::Broadcast(announce)]
            }
            None => Vec::new(),
        }
    }

    /// Maintenance timer: age routes, release and promote child slots,
    /// and run the local order check.
    pub fn tick_maintenance(&mut self) -> Vec<RuntimeEffect> {
        let mut effects = Vec::new();

        for entry in self.routes.age_tick() {
            self.metrics.routes_evicted.inc();
            tracing::debug!(
                node = %self.local_id(),
                destination = %entry.destination,
                role = ?entry.role,
                "route evicted"
            );
            effects.push(RuntimeEffect::Emit(ProtocolEvent::RouteEvicted {
                destination: entry.destination,
                role: entry.role,
            }));

            if entry.role != RouteRole::Child {
                continue;
            }
            if let Some(promoted) = self
                .children
                .release(entry.destination, &mut self.routes)
            {
                effects.push(self.promoted(promoted));
            }
        }

        if self.config.aggregate && self.config.evaluation == EvaluationPolicy::Maintenance {
            for child in self.children.full_windows() {
                if let Some(order) = self.children.decide(child) {
                    effects.extend(self.send_order(child, order));
                }
            }
        }
        effects
    }

    /// Sensor timer: report this node's own reading to the parent.
    pub fn tick_sensor(&mut self, value: u8) -> Vec<RuntimeEffect> {
        if value > MAX_SENSOR_VALUE {
            return vec![self.dropped(MeshProtocolError::FieldOverflow {
                field: "value",
                value: value.into(),
                width: crate::types::VALUE_DIGITS,
            })];
        }
        let origin = self.local_id();

        if self.topology.is_root() {
            self.metrics.reports_originated.inc();
            self.metrics.reports_collected.inc();
            return vec![RuntimeEffect::Collect(SensorReading { origin, value })];
        }
        match self.topology.current_parent() {
            Some(parent) => {
                self.metrics.reports_originated.inc();
                vec![RuntimeEffect::Unicast {
                    target: parent,
                    message: Message::SensorReport { origin, value },
                }]
            }
            None => vec![self.dropped(MeshProtocolError::NotConnected)],
        }
    }

    /// Operator command injected at this node, routed like an inbound one.
    pub fn issue_command(&mut self, order: Order, destination: NodeId) -> Vec<RuntimeEffect> {
        tracing::info!(node = %self.local_id(), %order, %destination, "command issued");
        self.route_command(order, destination)
    }

    // ── Transport feedback ───────────────────────────────────────────

    /// Outcome of a unicast this node asked for.
    pub fn handle_send_outcome(
        &mut self,
        target: Address,
        outcome: SendOutcome,
    ) -> Vec<RuntimeEffect> {
        match outcome {
            SendOutcome::Sent { retransmissions } => {
                self.metrics.retransmissions.inc_by(u64::from(retransmissions));
                Vec::new()
            }
            SendOutcome::TimedOut => {
                self.metrics.transport_timeouts.inc();
                match self.topology.on_transport_timeout(target) {
                    Some(event) => self.discovery_effects(event),
                    None => {
                        tracing::debug!(
                            node = %self.local_id(),
                            error = %MeshProtocolError::TransportTimeout { target },
                            "delivery failed"
                        );
                        vec![RuntimeEffect::Emit(ProtocolEvent::DeliveryFailed { target })]
                    }
                }
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn discovery_effects(&mut self, event: DiscoveryEvent) -> Vec<RuntimeEffect> {
        match event {
            DiscoveryEvent::ParentAdopted {
                parent,
                metric,
                previous,
            } => {
                self.metrics.parent_changes.inc();
                tracing::info!(
                    node = %self.local_id(),
                    %parent,
                    %metric,
                    ?previous,
                    "parent adopted"
                );
                vec![RuntimeEffect::Emit(ProtocolEvent::ParentAdopted {
                    parent,
                    metric,
                    previous,
                })]
            }
            DiscoveryEvent::ParentLost { parent } => {
                self.metrics.parent_losses.inc();
                tracing::warn!(
                    node = %self.local_id(),
                    %parent,
                    "parent unreachable, rediscovering"
                );
                vec![
                    RuntimeEffect::Emit(ProtocolEvent::ParentLost { parent }),
                    RuntimeEffect::RestartDiscovery,
                ]
            }
        }
    }

    fn promoted(&self, child: NodeId) -> RuntimeEffect {
        self.metrics.child_promotions.inc();
        tracing::debug!(node = %self.local_id(), %child, "child promoted");
        RuntimeEffect::Emit(ProtocolEvent::ChildPromoted { child })
    }

    /// Log and count a dropped input, returning its diagnostic event.
    fn dropped(&self, error: MeshProtocolError) -> RuntimeEffect {
        let counter = match &error {
            MeshProtocolError::MalformedMessage { .. } => Some(&self.metrics.dropped_malformed),
            MeshProtocolError::RouteNotFound { .. } => Some(&self.metrics.dropped_no_route),
            MeshProtocolError::NotConnected => Some(&self.metrics.dropped_not_connected),
            MeshProtocolError::PoolExhausted { .. } => Some(&self.metrics.dropped_pool_exhausted),
            MeshProtocolError::FieldOverflow { .. } => Some(&self.metrics.dropped_field_overflow),
            // counted where they are detected, if at all
            MeshProtocolError::TransportTimeout { .. }
            | MeshProtocolError::InvalidConfig(_)
            | MeshProtocolError::RuntimeShutdown => None,
        };
        if let Some(counter) = counter {
            counter.inc();
        }
        if matches!(error, MeshProtocolError::PoolExhausted { .. }) {
            tracing::warn!(node = %self.local_id(), %error, "dropped");
        } else {
            tracing::debug!(node = %self.local_id(), %error, "dropped");
        }
        RuntimeEffect::Emit(ProtocolEvent::Dropped { error })
    }
}
