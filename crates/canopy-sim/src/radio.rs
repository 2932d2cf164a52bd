//! Shared in-memory radio medium.
//!
//! Nodes sit on a plane. A frame reaches every live node within `range`;
//! each delivery is lost independently with probability `loss`. Link
//! metric follows a log-distance path loss model.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use canopy_protocol::{Address, Inbound, LinkMetric, SendOutcome, Transport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

/// Time a sender waits for an acknowledgement before retrying.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(50);

/// Metric at one distance unit.
const REFERENCE_METRIC: f64 = -40.0;

/// Planar position of a node.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn distance(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Signal metric observed across `distance`.
pub fn link_metric(distance: f64) -> LinkMetric {
    let loss_db = 20.0 * distance.max(1.0).log10();
    LinkMetric((REFERENCE_METRIC - loss_db).round() as i16)
}

/// Frame counters for the whole medium.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct RadioStats {
    pub broadcasts: u64,
    pub unicast_attempts: u64,
    pub delivered: u64,
    pub lost: u64,
    /// Frames dropped because the receiver's inbox was full.
    pub overflowed: u64,
}

struct MediumState {
    inboxes: HashMap<u16, mpsc::Sender<Inbound>>,
    down: HashSet<u16>,
    rng: StdRng,
    stats: RadioStats,
}

pub struct RadioMedium {
    positions: HashMap<u16, Position>,
    range: f64,
    loss: f64,
    state: Mutex<MediumState>,
}

impl RadioMedium {
    pub fn new(positions: HashMap<u16, Position>, range: f64, loss: f64, seed: u64) -> Arc<Self> {
        Arc::new(Self {
            positions,
            range,
            loss: loss.clamp(0.0, 1.0),
            state: Mutex::new(MediumState {
                inboxes: HashMap::new(),
                down: HashSet::new(),
                rng: StdRng::seed_from_u64(seed),
                stats: RadioStats::default(),
            }),
        })
    }

    /// Register node `id` and return its transport plus inbound frames.
    pub fn attach(
        self: &Arc<Self>,
        id: u16,
        capacity: usize,
    ) -> (RadioPort, mpsc::Receiver<Inbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        self.lock().inboxes.insert(id, tx);
        let port = RadioPort {
            medium: Arc::clone(self),
            id,
        };
        (port, rx)
    }

    /// Power a node off: it neither sends nor receives from now on.
    pub fn set_down(&self, id: u16) {
        self.lock().down.insert(id);
    }

    pub fn stats(&self) -> RadioStats {
        self.lock().stats
    }

    /// Live nodes within range of `id`, with the metric they would see.
    pub fn neighbors(&self, id: u16) -> Vec<(u16, LinkMetric)> {
        let Some(origin) = self.positions.get(&id) else {
            return Vec::new();
        };
        let state = self.lock();
        let mut out: Vec<(u16, LinkMetric)> = self
            .positions
            .iter()
            .filter(|&(&other, _)| other != id && !state.down.contains(&other))
            .filter_map(|(&other, pos)| {
                let d = origin.distance(pos);
                (d <= self.range).then(|| (other, link_metric(d)))
            })
            .collect();
        out.sort_by_key(|&(n, _)| n);
        out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MediumState> {
        // a poisoned medium only means another node task panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// One frame from `from` to `to`. True if it was delivered.
    fn transmit(
        &self,
        state: &mut MediumState,
        from: u16,
        to: u16,
        metric: LinkMetric,
        payload: &[u8],
    ) -> bool {
        if self.loss > 0.0 && state.rng.random_bool(self.loss) {
            state.stats.lost += 1;
            return false;
        }
        let Some(inbox) = state.inboxes.get(&to) else {
            return false;
        };
        let frame = Inbound {
            payload: payload.to_vec(),
            sender: Address::new(from),
            metric,
        };
        if inbox.try_send(frame).is_err() {
            state.stats.overflowed += 1;
            return false;
        }
        state.stats.delivered += 1;
        true
    }
}

/// One node's attachment to the medium.
pub struct RadioPort {
    medium: Arc<RadioMedium>,
    id: u16,
}

#[async_trait::async_trait]
impl Transport for RadioPort {
    async fn broadcast(&self, payload: &[u8]) {
        let neighbors = self.medium.neighbors(self.id);
        let mut state = self.medium.lock();
        if state.down.contains(&self.id) {
            return;
        }
        state.stats.broadcasts += 1;
        for (neighbor, metric) in neighbors {
            self.medium
                .transmit(&mut state, self.id, neighbor, metric, payload);
        }
    }

    async fn unicast(&self, target: Address, payload: &[u8], max_retries: u8) -> SendOutcome {
        let to = target.node_id().get();
        for attempt in 0..=max_retries {
            let metric = self
                .medium
                .neighbors(self.id)
                .into_iter()
                .find(|&(n, _)| n == to)
                .map(|(_, m)| m);
            let delivered = {
                let mut state = self.medium.lock();
                if state.down.contains(&self.id) {
                    return SendOutcome::TimedOut;
                }
                state.stats.unicast_attempts += 1;
                match metric {
                    Some(metric) => {
                        self.medium
                            .transmit(&mut state, self.id, to, metric, payload)
                    }
                    None => false,
                }
            };
            if delivered {
                return SendOutcome::Sent {
                    retransmissions: attempt,
                };
            }
            tokio::time::sleep(ACK_TIMEOUT).await;
        }
        SendOutcome::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(range: f64, loss: f64) -> Arc<RadioMedium> {
        let positions = (1..=3)
            .map(|i| {
                (
                    i,
                    Position {
                        x: f64::from(i) * 10.0,
                        y: 0.0,
                    },
                )
            })
            .collect();
        RadioMedium::new(positions, range, loss, 1)
    }

    #[test]
    fn metric_falls_with_distance() {
        assert_eq!(link_metric(1.0), LinkMetric(-40));
        assert_eq!(link_metric(10.0), LinkMetric(-60));
        assert!(link_metric(5.0) > link_metric(50.0));
    }

    #[test]
    fn neighbors_respect_range_and_power() {
        let medium = line(12.0, 0.0);
        assert_eq!(
            medium.neighbors(2).iter().map(|&(n, _)| n).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(medium.neighbors(1).len(), 1);
        medium.set_down(3);
        assert_eq!(medium.neighbors(2).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_reaches_only_neighbors() {
        let medium = line(12.0, 0.0);
        let (port1, _rx1) = medium.attach(1, 8);
        let (_port2, mut rx2) = medium.attach(2, 8);
        let (_port3, mut rx3) = medium.attach(3, 8);

        port1.broadcast(b"NDA").await;
        let frame = rx2.try_recv().unwrap();
        assert_eq!(frame.payload, b"NDA");
        assert_eq!(frame.sender, Address::new(1));
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unicast_out_of_range_times_out() {
        let medium = line(12.0, 0.0);
        let (port1, _rx1) = medium.attach(1, 8);
        let (_port3, _rx3) = medium.attach(3, 8);

        assert_eq!(
            port1.unicast(Address::new(3), b"SRV01001", 2).await,
            SendOutcome::TimedOut
        );
        assert_eq!(medium.stats().unicast_attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn total_loss_exhausts_retries() {
        let medium = line(12.0, 1.0);
        let (port1, _rx1) = medium.attach(1, 8);
        let (_port2, mut rx2) = medium.attach(2, 8);

        assert_eq!(
            port1.unicast(Address::new(2), b"SRV01001", 4).await,
            SendOutcome::TimedOut
        );
        assert!(rx2.try_recv().is_err());
        assert_eq!(medium.stats().lost, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_node_cannot_send() {
        let medium = line(12.0, 0.0);
        let (port1, _rx1) = medium.attach(1, 8);
        let (_port2, mut rx2) = medium.attach(2, 8);
        medium.set_down(1);

        port1.broadcast(b"NDA").await;
        assert!(rx2.try_recv().is_err());
        assert_eq!(
            port1.unicast(Address::new(2), b"NDA", 0).await,
            SendOutcome::TimedOut
        );
    }
}
