use crate::types::{Address, LinkMetric};

/// Result of an acknowledged unicast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Acknowledged after `retransmissions` extra attempts.
    Sent { retransmissions: u8 },
    /// Every attempt went unacknowledged.
    TimedOut,
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }
}

/// A frame received from the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub payload: Vec<u8>,
    pub sender: Address,
    /// Link quality of this reception.
    pub metric: LinkMetric,
}

/// Network abstraction for the runtime.
///
/// The radio stack provides addressing, range-limited broadcast and
/// acknowledged unicast with retries. In tests: `MockTransport`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Best-effort send to every neighbor in range.
    async fn broadcast(&self, payload: &[u8]);

    /// Send to one neighbor, retrying up to `max_retries` times until
    /// acknowledged.
    async fn unicast(&self, target: Address, payload: &[u8], max_retries: u8) -> SendOutcome;
}

// ── MockTransport (tests) ───────────────────────────────────────────
