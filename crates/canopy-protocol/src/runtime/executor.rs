//! Effect executor: the only place that touches I/O.
//!
//! - Broadcast -> encode, then the transport
//! - Unicast -> encode, then a spawned send whose outcome comes back as a
//!   [`Delivery`]
//! - Actuate -> orders channel
//! - Collect -> reports channel
//! - Emit -> events channel
//!
//! Retries of a unicast can take seconds; the event loop keeps serving
//! frames and commands meanwhile and hands the outcome to the engine once
//! it arrives.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::forwarding::ForwardingEngine;
use crate::types::Address;

use super::effect::RuntimeEffect;
use super::reliable::ReliableTransport;
use super::transport::{SendOutcome, Transport};
use super::{Outputs, ProtocolEvent};

/// Outcome of a unicast, reported back to the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Delivery {
    pub target: Address,
    pub outcome: SendOutcome,
}

/// Execute `effects`. Returns true if discovery must restart now.
pub(super) async fn execute_effects<T: Transport + 'static>(
    effects: Vec<RuntimeEffect>,
    engine: &ForwardingEngine,
    transport: &Arc<ReliableTransport<T>>,
    outputs: &Outputs,
    deliveries: &mpsc::Sender<Delivery>,
) -> bool {
    let mut restart_discovery = false;

    for effect in effects {
        match effect {
            RuntimeEffect::Broadcast(message) => match engine.codec().encode(&message) {
                Ok(bytes) => transport.broadcast(&bytes).await,
                Err(error) => emit_encode_failure(outputs, error),
            },
            RuntimeEffect::Unicast { target, message } => {
                let bytes = match engine.codec().encode(&message) {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        emit_encode_failure(outputs, error);
                        continue;
                    }
                };
                let transport = Arc::clone(transport);
                let deliveries = deliveries.clone();
                tokio::spawn(async move {
                    let outcome = transport.send(target, &bytes).await;
                    // fails only once the loop has stopped
                    let _ = deliveries.send(Delivery { target, outcome }).await;
                });
            }
            RuntimeEffect::Actuate(order) => {
                // try_send: never block the node on a slow consumer
                let _ = outputs.orders.try_send(order);
            }
            RuntimeEffect::Collect(reading) => {
                let _ = outputs.reports.try_send(reading);
            }
            RuntimeEffect::Emit(event) => {
                let _ = outputs.events.try_send(event);
            }
            RuntimeEffect::RestartDiscovery => restart_discovery = true,
        }
    }
    restart_discovery
}

fn emit_encode_failure(outputs: &Outputs, error: crate::error::MeshProtocolError) {
    tracing::warn!(%error, "cannot encode outbound message");
    let _ = outputs.events.try_send(ProtocolEvent::Dropped { error });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Message;
    use crate::config::NodeConfig;
    use crate::runtime::transport::mock::MockTransport;
    use crate::types::{LinkMetric, NodeId, NodeRole, Order, SensorReading};

    struct Harness {
        engine: ForwardingEngine,
        mock: MockTransport,
        transport: Arc<ReliableTransport<MockTransport>>,
        outputs: Outputs,
        deliveries_tx: mpsc::Sender<Delivery>,
        deliveries: mpsc::Receiver<Delivery>,
        reports: mpsc::Receiver<SensorReading>,
        orders: mpsc::Receiver<Order>,
        events: mpsc::Receiver<ProtocolEvent>,
    }

    impl Harness {
        async fn execute(&self, effects: Vec<RuntimeEffect>) -> bool {
            execute_effects(
                effects,
                &self.engine,
                &self.transport,
                &self.outputs,
                &self.deliveries_tx,
            )
            .await
        }
    }

    fn harness(role: NodeRole) -> Harness {
        let engine = ForwardingEngine::new(NodeConfig::new(NodeId::new(5), role)).unwrap();
        let mock = MockTransport::new();
        let transport = Arc::new(ReliableTransport::new(mock.clone(), 4));
        let (reports_tx, reports) = mpsc::channel(16);
        let (orders_tx, orders) = mpsc::channel(16);
        let (events_tx, events) = mpsc::channel(16);
        let (deliveries_tx, deliveries) = mpsc::channel(16);
        Harness {
            engine,
            mock,
            transport,
            outputs: Outputs {
                reports: reports_tx,
                orders: orders_tx,
                events: events_tx,
            },
            deliveries_tx,
            deliveries,
            reports,
            orders,
            events,
        }
    }

    #[tokio::test]
    async fn broadcast_and_actuate() {
        let mut h = harness(NodeRole::Relay);
        let effects = vec![
            RuntimeEffect::Broadcast(Message::Announce),
            RuntimeEffect::Actuate(Order::OPEN),
        ];
        let restart = h.execute(effects).await;
        assert!(!restart);
        assert_eq!(h.mock.broadcasts(), vec![b"NDA".to_vec()]);
        assert_eq!(h.orders.try_recv().unwrap(), Order::OPEN);
    }

    #[tokio::test]
    async fn collect_goes_to_reports() {
        let mut h = harness(NodeRole::Gateway);
        let reading = SensorReading {
            origin: NodeId::new(3),
            value: 12,
        };
        h.execute(vec![RuntimeEffect::Collect(reading)]).await;
        assert_eq!(h.reports.try_recv().unwrap(), reading);
    }

    #[tokio::test]
    async fn parent_timeout_feeds_back_and_requests_restart() {
        let mut h = harness(NodeRole::Sensor);
        h.engine.handle_message(
            Message::AnnounceReply {
                recipient: NodeId::new(5),
            },
            Address::new(1),
            LinkMetric(-40),
        );
        h.mock.set_unreachable(Address::new(1), true);

        let effects = h.engine.tick_sensor(42);
        assert!(!h.execute(effects).await);

        let delivery = h.deliveries.recv().await.unwrap();
        assert_eq!(
            delivery,
            Delivery {
                target: Address::new(1),
                outcome: SendOutcome::TimedOut,
            }
        );
        let follow_up = h.engine.handle_send_outcome(delivery.target, delivery.outcome);
        assert!(h.execute(follow_up).await);

        assert!(!h.engine.topology().is_connected());
        assert_eq!(
            h.events.try_recv().unwrap(),
            ProtocolEvent::ParentLost {
                parent: Address::new(1)
            }
        );
    }

    #[tokio::test]
    async fn unicast_reports_its_outcome() {
        let mut h = harness(NodeRole::Relay);
        let effects = vec![RuntimeEffect::Unicast {
            target: Address::new(2),
            message: Message::Announce,
        }];
        h.execute(effects).await;

        assert_eq!(
            h.deliveries.recv().await.unwrap(),
            Delivery {
                target: Address::new(2),
                outcome: SendOutcome::Sent { retransmissions: 0 },
            }
        );
        assert_eq!(h.mock.unicasts(), vec![(Address::new(2), b"NDA".to_vec())]);
    }

    #[tokio::test]
    async fn unencodable_message_is_reported() {
        let mut h = harness(NodeRole::Relay);
        let effects = vec![RuntimeEffect::Unicast {
            target: Address::new(2),
            message: Message::SensorReport {
                origin: NodeId::new(5000),
                value: 1,
            },
        }];
        h.execute(effects).await;
        assert!(h.mock.unicasts().is_empty());
        assert!(h.deliveries.try_recv().is_err());
        assert!(matches!(
            h.events.try_recv().unwrap(),
            ProtocolEvent::Dropped { .. }
        ));
    }
}
