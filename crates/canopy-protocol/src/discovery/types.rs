use serde::{Deserialize, Serialize};

use crate::types::{Address, LinkMetric};

/// Lower bound of the randomized announce interval (ms).
pub const ANNOUNCE_INTERVAL_MIN_MS: u64 = 2_000;

/// Upper bound of the randomized announce interval (ms).
pub const ANNOUNCE_INTERVAL_MAX_MS: u64 = 4_000;

/// Connection state of a node toward the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No parent, discovery not started (or just lost the parent).
    Disconnected,
    /// Announce sent, waiting for a reply.
    Discovering,
    /// A parent is adopted; upward traffic can flow.
    Connected,
}

/// Parent-selection transitions reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A parent was adopted (first one, or a stronger replacement).
    ParentAdopted {
        parent: Address,
        metric: LinkMetric,
        previous: Option<Address>,
    },
    /// Delivery to the parent failed; the node is disconnected again.
    ParentLost { parent: Address },
}
