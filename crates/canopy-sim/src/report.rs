//! JSON run report.

use std::collections::BTreeMap;

use canopy_metrics::MetricsSnapshot;
use canopy_protocol::{ConnectionState, NodeSnapshot};
use serde::Serialize;

use crate::radio::{RadioMedium, RadioStats};
use crate::scenario::Scenario;

/// An order that reached a node's actuator.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRecord {
    pub node: u16,
    pub order: String,
    /// Simulated seconds since the start of the run.
    pub at_s: f64,
}

/// One parent link of the final tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEdge {
    pub child: u16,
    pub parent: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub generated_at: String,
    pub seed: u64,
    pub nodes: u16,
    pub duration_s: u64,
    /// Nodes connected at the end of the run (gateway included).
    pub connected: usize,
    pub tree: Vec<TreeEdge>,
    /// Readings collected at the gateway, per origin.
    pub collected: BTreeMap<u16, u64>,
    pub orders: Vec<OrderRecord>,
    /// Protocol events seen across the mesh, per kind.
    pub events: BTreeMap<&'static str, u64>,
    pub radio: RadioStats,
    pub totals: MetricsSnapshot,
    pub snapshots: Vec<NodeSnapshot>,
}

impl SimReport {
    pub fn build(
        scenario: &Scenario,
        medium: &RadioMedium,
        snapshots: Vec<NodeSnapshot>,
        collected: BTreeMap<u16, u64>,
        orders: Vec<OrderRecord>,
        events: BTreeMap<&'static str, u64>,
    ) -> Self {
        let connected = snapshots
            .iter()
            .filter(|s| s.state == ConnectionState::Connected)
            .count();
        let tree = snapshots
            .iter()
            .filter_map(|s| {
                s.parent.map(|p| TreeEdge {
                    child: s.node_id.get(),
                    parent: p.node_id().get(),
                })
            })
            .collect();
        let totals = snapshots
            .iter()
            .fold(MetricsSnapshot::default(), |mut acc, s| {
                acc.merge(&s.metrics);
                acc
            });

        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            seed: scenario.seed,
            nodes: scenario.nodes,
            duration_s: scenario.duration.as_secs(),
            connected,
            tree,
            collected,
            orders,
            events,
            radio: medium.stats(),
            totals,
            snapshots,
        }
    }

    /// Reading delivery ratio at the gateway, against readings originated.
    pub fn delivery_ratio(&self) -> Option<f64> {
        let delivered: u64 = self.collected.values().sum();
        (self.totals.reports_originated > 0)
            .then(|| delivered as f64 / self.totals.reports_originated as f64)
    }

    /// One-paragraph human summary for stderr.
    pub fn summary(&self) -> String {
        let delivered: u64 = self.collected.values().sum();
        let ratio = self
            .delivery_ratio()
            .map(|r| format!("{:.1}%", r * 100.0))
            .unwrap_or_else(|| "n/a".into());
        format!(
            concat!(
                "{}/{} nodes connected after {}s | {} readings at gateway ({} delivered)",
                " | {} orders | {} drops, {} timeouts"
            ),
            self.connected,
            self.nodes,
            self.duration_s,
            delivered,
            ratio,
            self.orders.len(),
            self.totals.dropped,
            self.totals.transport_timeouts,
        )
    }
}
