/// Thin reliability layer over the radio's acknowledged unicast.
///
/// Applies the configured retransmission budget and logs the outcome.
/// Reacting to a `TimedOut` is the engine's job, not this one's.
use crate::types::Address;

use super::transport::{SendOutcome, Transport};

/// Default retransmissions before a unicast is declared timed out.
pub const MAX_RETRANSMISSIONS: u8 = 4;

pub struct ReliableTransport<T> {
    inner: T,
    max_retransmissions: u8,
}

impl<T: Transport> ReliableTransport<T> {
    pub fn new(inner: T, max_retransmissions: u8) -> Self {
        Self {
            inner,
            max_retransmissions,
        }
    }

    pub fn max_retransmissions(&self) -> u8 {
        self.max_retransmissions
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub async fn broadcast(&self, payload: &[u8]) {
        self.inner.broadcast(payload).await;
    }

    pub async fn send(&self, target: Address, payload: &[u8]) -> SendOutcome {
        let outcome = self
            .inner
            .unicast(target, payload, self.max_retransmissions)
            .await;
        match outcome {
            SendOutcome::Sent { retransmissions } if retransmissions > 0 => {
                tracing::debug!(%target, retransmissions, "unicast delivered after retries");
            }
            SendOutcome::Sent { .. } => {}
            SendOutcome::TimedOut => {
                tracing::debug!(
                    %target,
                    attempts = u32::from(self.max_retransmissions) + 1,
                    "unicast timed out"
                );
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::super::transport::mock::MockTransport;
    use super::*;

    #[tokio::test]
    async fn passes_outcomes_through() {
        let mock = MockTransport::new();
        let reliable = ReliableTransport::new(mock.clone(), MAX_RETRANSMISSIONS);

        assert_eq!(
            reliable.send(Address::new(2), b"NDA").await,
            SendOutcome::Sent { retransmissions: 0 }
        );
        mock.set_unreachable(Address::new(3), true);
        assert!(!reliable.send(Address::new(3), b"NDA").await.is_sent());
        assert_eq!(reliable.max_retransmissions(), MAX_RETRANSMISSIONS);
        assert_eq!(mock.unicasts(), vec![(Address::new(2), b"NDA".to_vec())]);
    }

    #[tokio::test]
    async fn broadcast_passes_through() {
        let mock = MockTransport::new();
        let reliable = ReliableTransport::new(mock.clone(), 0);
        reliable.broadcast(b"NDA").await;
        assert_eq!(mock.broadcasts(), vec![b"NDA".to_vec()]);
    }
}
