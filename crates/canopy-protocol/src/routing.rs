/// Bounded routing table for Canopy.
///
/// Maps a destination node to the neighbor that last carried its traffic.
/// Fixed capacity, age-based eviction. Pure logic, no I/O: the caller runs
/// `age_tick()` once per maintenance cycle and handles the evicted entries.
use serde::{Deserialize, Serialize};

use crate::error::{MeshProtocolError, Pool};
use crate::types::{Address, NodeId};

/// Default route capacity.
pub const MAX_ROUTES: usize = 10;

/// Default number of maintenance sweeps without traffic before eviction.
pub const INACTIVE_THRESHOLD: u32 = 10;

// ── Entries ────────────────────────────────────────────────────────────

/// How this node treats traffic from a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteRole {
    /// Reached through us, not aggregated.
    Relay,
    /// Immediate child holding an aggregation slot.
    Child,
    /// Immediate child waiting for an aggregation slot to free up.
    PendingPromotion,
}

/// One known destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: NodeId,
    pub next_hop: Address,
    /// Maintenance sweeps since traffic last refreshed this entry.
    pub age: u32,
    pub role: RouteRole,
}

/// Result of a successful `upsert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    /// Existing entry refreshed. `moved` is set when the next hop changed.
    Refreshed { moved: bool },
}

// ── RouteTable ─────────────────────────────────────────────────────────

/// Capacity-bounded destination → next-hop table.
///
/// Entries stay in insertion order; `first_pending()` relies on it to hand
/// freed child slots out oldest-first.
#[derive(Debug, Clone)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    capacity: usize,
    inactive_threshold: u32,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(MAX_ROUTES, INACTIVE_THRESHOLD)
    }
}

impl RouteTable {
    pub fn new(capacity: usize, inactive_threshold: u32) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            inactive_threshold,
        }
    }

    /// Create or refresh the route to `destination`.
    ///
    /// A refresh resets the age and follows the latest next hop; `role` only
    /// applies to a newly created entry. A new destination on a full table
    /// is refused and the table is left untouched.
    pub fn upsert(
        &mut self,
        destination: NodeId,
        next_hop: Address,
        role: RouteRole,
    ) -> Result<Upsert, MeshProtocolError> {
        if let Some(entry) = self.find_mut(destination) {
            let moved = entry.next_hop != next_hop;
            entry.next_hop = next_hop;
            entry.age = 0;
            return Ok(Upsert::Refreshed { moved });
        }

        if self.is_full() {
            return Err(MeshProtocolError::PoolExhausted { pool: Pool::Routes });
        }

        self.entries.push(RouteEntry {
            destination,
            next_hop,
            age: 0,
            role,
        });
        Ok(Upsert::Inserted)
    }

    /// Next hop toward `destination`, if known.
    pub fn lookup(&self, destination: NodeId) -> Option<Address> {
        self.get(destination).map(|e| e.next_hop)
    }

    pub fn get(&self, destination: NodeId) -> Option<&RouteEntry> {
        self.entries.iter().find(|e| e.destination == destination)
    }

    /// Role of the entry for `destination`, if any.
    pub fn role(&self, destination: NodeId) -> Option<RouteRole> {
        self.get(destination).map(|e| e.role)
    }

    /// Change the role of an existing entry. Returns false if unknown.
    pub fn reclassify(&mut self, destination: NodeId, role: RouteRole) -> bool {
        match self.find_mut(destination) {
            Some(entry) => {
                entry.role = role;
                true
            }
            None => false,
        }
    }

    /// One maintenance sweep: age every entry, evict the inactive ones.
    ///
    /// Returns the evicted entries in table order. Child-role entries among
    /// them must be passed to the aggregator's eviction hook.
    pub fn age_tick(&mut self) -> Vec<RouteEntry> {
        let threshold = self.inactive_threshold;
        let mut evicted = Vec::new();
        self.entries.retain_mut(|entry| {
            entry.age = entry.age.saturating_add(1);
            if entry.age >= threshold {
                evicted.push(entry.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Oldest entry still waiting for a child slot.
    pub fn first_pending(&self) -> Option<NodeId> {
        self.entries
            .iter()
            .find(|e| e.role == RouteRole::PendingPromotion)
            .map(|e| e.destination)
    }

    /// All entries, in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn inactive_threshold(&self) -> u32 {
        self.inactive_threshold
    }

    fn find_mut(&mut self, destination: NodeId) -> Option<&mut RouteEntry> {
        self.entries.iter_mut().find(|e| e.destination == destination)
    }
}
