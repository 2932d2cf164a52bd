/// ChildAggregator: closed-loop analysis of immediate children.
///
/// Holds a rolling window of recent readings per child slot, fits a least
/// squares line through each window and turns a steep trend into a valve
/// order. Slots are a fixed arena; a slot freed by route eviction goes to
/// the oldest child waiting for promotion.
///
/// Pure logic, no I/O. Orders are returned to the caller for routing.
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::routing::{RouteRole, RouteTable};
use crate::types::{NodeId, Order};

/// Default number of aggregated children.
pub const MAX_CHILDREN: usize = 5;

/// Default readings per window.
pub const WINDOW_LEN: usize = 30;

/// Default trend above which the valve opens.
pub const TREND_THRESHOLD: f64 = 1.0;

/// Default number of evaluations an opened valve is held before re-checking.
pub const VALVE_HOLD: u32 = 10;

/// When full-window children are evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationPolicy {
    /// After every recorded reading, once the window is full.
    #[default]
    EveryReading,
    /// Only during the maintenance sweep's local order check.
    Maintenance,
}

// ── Reading window ─────────────────────────────────────────────────────

/// Fixed-capacity ring of the most recent readings, oldest first.
#[derive(Debug, Clone)]
pub struct ReadingWindow {
    values: VecDeque<u8>,
    capacity: usize,
}

impl ReadingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a reading, dropping the oldest one when full.
    pub fn push(&mut self, value: u8) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn values(&self) -> impl Iterator<Item = u8> + '_ {
        self.values.iter().copied()
    }
}

// ── Regression ─────────────────────────────────────────────────────────

/// Least squares fit `y = intercept + slope · i` over sample index `i`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
}

impl Regression {
    /// Fit a line through samples taken at indices `0, 1, …, n-1`.
    ///
    /// `None` for fewer than two samples.
    pub fn fit(samples: impl IntoIterator<Item = f64>) -> Option<Self> {
        let (mut n, mut sum_i, mut sum_y, mut sum_iy, mut sum_ii) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (i, y) in samples.into_iter().enumerate() {
            let i = i as f64;
            n += 1.0;
            sum_i += i;
            sum_y += y;
            sum_iy += i * y;
            sum_ii += i * i;
        }

        let denom = n * sum_ii - sum_i * sum_i;
        if n < 2.0 || denom == 0.0 {
            return None;
        }
        let slope = (n * sum_iy - sum_i * sum_y) / denom;
        let intercept = (sum_y - slope * sum_i) / n;
        Some(Self { slope, intercept })
    }

    /// Normalized trend `-slope / intercept`; undefined for a zero intercept.
    pub fn trend(&self) -> Option<f64> {
        if self.intercept.abs() < f64::EPSILON {
            return None;
        }
        Some(-self.slope / self.intercept)
    }
}

// ── Child slots ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Valve {
    Closed,
    /// Opened by us; `remaining` evaluations until the next re-check.
    Open { remaining: u32 },
}

#[derive(Debug, Clone)]
struct ChildRecord {
    id: NodeId,
    window: ReadingWindow,
    valve: Valve,
}

impl ChildRecord {
    fn new(id: NodeId, window_len: usize) -> Self {
        Self {
            id,
            window: ReadingWindow::new(window_len),
            valve: Valve::Closed,
        }
    }
}

/// Per-child reading history and order decisions.
#[derive(Debug, Clone)]
pub struct ChildAggregator {
    slots: Vec<Option<ChildRecord>>,
    window_len: usize,
    trend_threshold: f64,
    valve_hold: u32,
}

impl Default for ChildAggregator {
    fn default() -> Self {
        Self::new(MAX_CHILDREN, WINDOW_LEN, TREND_THRESHOLD, VALVE_HOLD)
    }
}

impl ChildAggregator {
    pub fn new(
        max_children: usize,
        window_len: usize,
        trend_threshold: f64,
        valve_hold: u32,
    ) -> Self {
        Self {
            slots: vec![None; max_children],
            window_len,
            trend_threshold,
            valve_hold,
        }
    }

    /// Try to give `id` a child slot.
    ///
    /// Returns `Child` when a record was created, `Relay` when every slot is
    /// taken (the node's traffic is then only forwarded). Admitting an id
    /// that already holds a slot keeps its record.
    pub fn admit(&mut self, id: NodeId) -> RouteRole {
        if self.contains(id) {
            return RouteRole::Child;
        }
        match self.slots.iter_mut().find(|s| s.is_none()) {
            Some(slot) => {
                *slot = Some(ChildRecord::new(id, self.window_len));
                RouteRole::Child
            }
            None => RouteRole::Relay,
        }
    }

    /// Append a reading to the child's window. False if `id` holds no slot.
    pub fn record(&mut self, id: NodeId, value: u8) -> bool {
        match self.record_mut(id) {
            Some(record) => {
                record.window.push(value);
                true
            }
            None => false,
        }
    }

    /// Regression over the child's window, once it is full.
    pub fn regression(&self, id: NodeId) -> Option<Regression> {
        let record = self.record_ref(id)?;
        if !record.window.is_full() {
            return None;
        }
        Regression::fit(record.window.values().map(f64::from))
    }

    /// Trend of the child's full window.
    pub fn trend(&self, id: NodeId) -> Option<f64> {
        self.regression(id)?.trend()
    }

    /// Raw trend check: `OPEN` iff the full window's trend exceeds the
    /// threshold. No valve bookkeeping.
    pub fn evaluate(&self, id: NodeId) -> Option<Order> {
        let trend = self.trend(id)?;
        (trend > self.trend_threshold).then_some(Order::OPEN)
    }

    /// Valve-aware decision for one child.
    ///
    /// A closed valve opens when the trend triggers and is then held for
    /// `valve_hold` decisions. When the hold runs out the trend is checked
    /// again: still triggered keeps the valve open for another hold,
    /// otherwise the valve is closed.
    pub fn decide(&mut self, id: NodeId) -> Option<Order> {
        let triggered = self.evaluate(id).is_some();
        let hold = self.valve_hold;
        let record = self.record_mut(id)?;

        match record.valve {
            Valve::Closed => {
                if !triggered {
                    return None;
                }
                if hold > 0 {
                    record.valve = Valve::Open { remaining: hold };
                }
                Some(Order::OPEN)
            }
            Valve::Open { remaining } if remaining > 1 => {
                record.valve = Valve::Open {
                    remaining: remaining - 1,
                };
                None
            }
            Valve::Open { .. } if triggered => {
                record.valve = Valve::Open { remaining: hold };
                None
            }
            Valve::Open { .. } => {
                record.valve = Valve::Closed;
                Some(Order::CLOSE)
            }
        }
    }

    /// Release the slot of a child that stopped being one: its route aged
    /// out, or it is now heard through another node.
    ///
    /// Frees the child's slot and, if a route is waiting for promotion,
    /// moves the oldest one into it with a fresh window. Returns the
    /// promoted id.
    pub fn release(&mut self, id: NodeId, routes: &mut RouteTable) -> Option<NodeId> {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|r| r.id == id))
        {
            *slot = None;
        }

        let pending = routes.first_pending()?;
        let slot = self.slots.iter_mut().find(|s| s.is_none())?;
        *slot = Some(ChildRecord::new(pending, self.window_len));
        routes.reclassify(pending, RouteRole::Child);
        Some(pending)
    }

    /// Ids of every child whose window is full.
    pub fn full_windows(&self) -> Vec<NodeId> {
        self.records()
            .filter(|r| r.window.is_full())
            .map(|r| r.id)
            .collect()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.record_ref(id).is_some()
    }

    /// Ids currently holding a slot.
    pub fn children(&self) -> Vec<NodeId> {
        self.records().map(|r| r.id).collect()
    }

    /// Number of readings held for `id`.
    pub fn window_len(&self, id: NodeId) -> Option<usize> {
        self.record_ref(id).map(|r| r.window.len())
    }

    /// Whether this node has opened the valve of `id` and not closed it yet.
    pub fn valve_open(&self, id: NodeId) -> bool {
        self.record_ref(id)
            .is_some_and(|r| matches!(r.valve, Valve::Open { .. }))
    }

    pub fn len(&self) -> usize {
        self.records().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn records(&self) -> impl Iterator<Item = &ChildRecord> {
        self.slots.iter().flatten()
    }

    fn record_ref(&self, id: NodeId) -> Option<&ChildRecord> {
        self.records().find(|r| r.id == id)
    }

    fn record_mut(&mut self, id: NodeId) -> Option<&mut ChildRecord> {
        self.slots.iter_mut().flatten().find(|r| r.id == id)
    }
}
