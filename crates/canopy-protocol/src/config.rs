use serde::{Deserialize, Serialize};

use crate::aggregator::{EvaluationPolicy, MAX_CHILDREN, TREND_THRESHOLD, VALVE_HOLD, WINDOW_LEN};
use crate::codec::MessageCodec;
use crate::error::MeshProtocolError;
use crate::routing::{INACTIVE_THRESHOLD, MAX_ROUTES};
use crate::types::{NodeId, NodeRole, ID_SIZE};

/// Configuration of a single mesh node.
///
/// All fields have working defaults; use the builder setters:
///
/// ```rust
/// use canopy_protocol::{NodeConfig, NodeId, NodeRole};
///
/// let config = NodeConfig::new(NodeId::new(7), NodeRole::Sensor)
///     .aggregate(true)
///     .window_len(10);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's provisioned identity.
    pub node_id: NodeId,
    pub role: NodeRole,
    /// Run child aggregation and issue local orders.
    pub aggregate: bool,
    /// Node id width on the wire.
    pub id_size: usize,
    pub max_routes: usize,
    /// Maintenance sweeps without traffic before a route is evicted.
    pub inactive_threshold: u32,
    pub max_children: usize,
    /// Readings per child window (K).
    pub window_len: usize,
    pub trend_threshold: f64,
    /// Decisions an opened valve is held before re-checking. 0 disables.
    pub valve_hold: u32,
    pub evaluation: EvaluationPolicy,
}

impl NodeConfig {
    pub fn new(node_id: NodeId, role: NodeRole) -> Self {
        Self {
            node_id,
            role,
            aggregate: false,
            id_size: ID_SIZE,
            max_routes: MAX_ROUTES,
            inactive_threshold: INACTIVE_THRESHOLD,
            max_children: MAX_CHILDREN,
            window_len: WINDOW_LEN,
            trend_threshold: TREND_THRESHOLD,
            valve_hold: VALVE_HOLD,
            evaluation: EvaluationPolicy::default(),
        }
    }

    /// Enable or disable local child aggregation.
    pub fn aggregate(mut self, enabled: bool) -> Self {
        self.aggregate = enabled;
        self
    }

    pub fn id_size(mut self, digits: usize) -> Self {
        self.id_size = digits;
        self
    }

    pub fn max_routes(mut self, capacity: usize) -> Self {
        self.max_routes = capacity;
        self
    }

    pub fn inactive_threshold(mut self, sweeps: u32) -> Self {
        self.inactive_threshold = sweeps;
        self
    }

    pub fn max_children(mut self, capacity: usize) -> Self {
        self.max_children = capacity;
        self
    }

    pub fn window_len(mut self, readings: usize) -> Self {
        self.window_len = readings;
        self
    }

    pub fn trend_threshold(mut self, threshold: f64) -> Self {
        self.trend_threshold = threshold;
        self
    }

    pub fn valve_hold(mut self, decisions: u32) -> Self {
        self.valve_hold = decisions;
        self
    }

    pub fn evaluation(mut self, policy: EvaluationPolicy) -> Self {
        self.evaluation = policy;
        self
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), MeshProtocolError> {
        let codec = MessageCodec::new(self.id_size)?;
        if self.node_id.get() > codec.max_node_id() {
            return Err(MeshProtocolError::InvalidConfig(format!(
                "node id {} does not fit {} digits",
                self.node_id, self.id_size
            )));
        }
        if self.max_routes == 0 {
            return Err(MeshProtocolError::InvalidConfig(
                "max_routes must be at least 1".into(),
            ));
        }
        if self.inactive_threshold == 0 {
            return Err(MeshProtocolError::InvalidConfig(
                "inactive_threshold must be at least 1".into(),
            ));
        }
        if self.aggregate && self.window_len < 2 {
            return Err(MeshProtocolError::InvalidConfig(format!(
                "window_len must be at least 2 to fit a trend, got {}",
                self.window_len
            )));
        }
        if !self.trend_threshold.is_finite() {
            return Err(MeshProtocolError::InvalidConfig(
                "trend_threshold must be finite".into(),
            ));
        }
        Ok(())
    }
}
