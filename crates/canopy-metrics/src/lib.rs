//! Per-node counters for the Canopy sensor mesh.
//!
//! [`Counter`] is a relaxed atomic tally. [`NodeMetrics`] groups the
//! counters one mesh node maintains; the runtime shares it behind an
//! `Arc` so the application can take a [`MetricsSnapshot`] at any time
//! without going through the event loop.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A monotonically increasing counter.
///
/// Relaxed ordering only: these are statistics, nothing synchronizes on them.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increment by one.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by `n`.
    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Counter").field(&self.get()).finish()
    }
}

impl Serialize for Counter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

/// Everything a node counts about its own traffic.
#[derive(Debug, Default, Serialize)]
pub struct NodeMetrics {
    /// Sensor reports this node produced itself.
    pub reports_originated: Counter,
    /// Sensor reports relayed one hop closer to the gateway.
    pub reports_forwarded: Counter,
    /// Sensor reports consumed at the gateway.
    pub reports_collected: Counter,
    /// Commands relayed toward their destination.
    pub commands_forwarded: Counter,
    /// Commands addressed to this node and handed to the actuator.
    pub commands_applied: Counter,
    /// Orders produced by local child aggregation.
    pub orders_issued: Counter,
    pub dropped_malformed: Counter,
    pub dropped_no_route: Counter,
    pub dropped_not_connected: Counter,
    pub dropped_pool_exhausted: Counter,
    /// Own readings that did not fit the wire format.
    pub dropped_field_overflow: Counter,
    /// Unicasts that exhausted their retransmissions.
    pub transport_timeouts: Counter,
    /// Total retransmissions reported by successful unicasts.
    pub retransmissions: Counter,
    /// Times a (new or better) parent was adopted.
    pub parent_changes: Counter,
    /// Times the parent was declared lost.
    pub parent_losses: Counter,
    pub routes_evicted: Counter,
    /// PendingPromotion routes moved into a freed child slot.
    pub child_promotions: Counter,
}

impl NodeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of every drop counter.
    pub fn total_dropped(&self) -> u64 {
        self.dropped_malformed.get()
            + self.dropped_no_route.get()
            + self.dropped_not_connected.get()
            + self.dropped_pool_exhausted.get()
            + self.dropped_field_overflow.get()
    }

    /// Copy the current values into a plain, cloneable struct.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reports_originated: self.reports_originated.get(),
            reports_forwarded: self.reports_forwarded.get(),
            reports_collected: self.reports_collected.get(),
            commands_forwarded: self.commands_forwarded.get(),
            commands_applied: self.commands_applied.get(),
            orders_issued: self.orders_issued.get(),
            dropped: self.total_dropped(),
            transport_timeouts: self.transport_timeouts.get(),
            retransmissions: self.retransmissions.get(),
            parent_changes: self.parent_changes.get(),
            parent_losses: self.parent_losses.get(),
            routes_evicted: self.routes_evicted.get(),
            child_promotions: self.child_promotions.get(),
        }
    }
}

/// Point-in-time copy of [`NodeMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub reports_originated: u64,
    pub reports_forwarded: u64,
    pub reports_collected: u64,
    pub commands_forwarded: u64,
    pub commands_applied: u64,
    pub orders_issued: u64,
    pub dropped: u64,
    pub transport_timeouts: u64,
    pub retransmissions: u64,
    pub parent_changes: u64,
    pub parent_losses: u64,
    pub routes_evicted: u64,
    pub child_promotions: u64,
}

impl MetricsSnapshot {
    /// Field-wise sum, used to aggregate a whole simulated mesh.
    pub fn merge(&mut self, other: &MetricsSnapshot) {
        self.reports_originated += other.reports_originated;
        self.reports_forwarded += other.reports_forwarded;
        self.reports_collected += other.reports_collected;
        self.commands_forwarded += other.commands_forwarded;
        self.commands_applied += other.commands_applied;
        self.orders_issued += other.orders_issued;
        self.dropped += other.dropped;
        self.transport_timeouts += other.transport_timeouts;
        self.retransmissions += other.retransmissions;
        self.parent_changes += other.parent_changes;
        self.parent_losses += other.parent_losses;
        self.routes_evicted += other.routes_evicted;
        self.child_promotions += other.child_promotions;
    }
}
