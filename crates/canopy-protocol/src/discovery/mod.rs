//! Discovery module for Canopy.
//!
//! Parent selection over the Announce / AnnounceReply exchange: a node
//! without a parent broadcasts Announce, connected neighbors answer, and
//! the strongest reply wins.

pub mod parent;
pub mod types;

pub use parent::TopologyManager;
pub use types::{
    ConnectionState, DiscoveryEvent, ANNOUNCE_INTERVAL_MAX_MS, ANNOUNCE_INTERVAL_MIN_MS,
};
