use std::fmt;

use crate::types::{Address, NodeId};

/// Bounded pool that refused an insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Routes,
    Children,
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pool::Routes => f.write_str("route"),
            Pool::Children => f.write_str("child"),
        }
    }
}

/// Protocol-level errors for Canopy.
///
/// None of these stop a node. The forwarding engine handles each one where
/// it is detected (drop, log, count) and surfaces it as a diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeshProtocolError {
    #[error("{pool} pool exhausted")]
    PoolExhausted { pool: Pool },

    #[error("no route to node {destination}")]
    RouteNotFound { destination: NodeId },

    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("delivery to {target} timed out")]
    TransportTimeout { target: Address },

    #[error("no parent to forward to")]
    NotConnected,

    #[error("{field} value {value} does not fit in {width} digits")]
    FieldOverflow {
        field: &'static str,
        value: u32,
        width: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("runtime shut down")]
    RuntimeShutdown,
}

impl MeshProtocolError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        MeshProtocolError::MalformedMessage {
            reason: reason.into(),
        }
    }
}
