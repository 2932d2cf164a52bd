use std::collections::BTreeSet;

use canopy_protocol::{
    Address, ForwardingEngine, LinkMetric, Message, NodeConfig, NodeId, NodeRole, RouteRole,
    RouteTable,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum RouteOp {
    Upsert { dest: u16, hop: u16 },
    Sweep,
}

fn arb_route_op() -> impl Strategy<Value = RouteOp> {
    prop_oneof![
        4 => (0u16..30, 0u16..6).prop_map(|(dest, hop)| RouteOp::Upsert { dest, hop }),
        1 => Just(RouteOp::Sweep),
    ]
}

#[derive(Debug, Clone)]
enum EngineOp {
    /// Report from `origin`, heard from neighbor `via`.
    Report { origin: u16, via: u16, value: u8 },
    Maintenance,
}

fn arb_engine_op() -> impl Strategy<Value = EngineOp> {
    prop_oneof![
        5 => (3u16..12, 3u16..8, 0u8..100)
            .prop_map(|(origin, via, value)| EngineOp::Report { origin, via, value }),
        1 => Just(EngineOp::Maintenance),
    ]
}

proptest! {
    /// The table never holds more entries than its capacity, and never two
    /// entries for the same destination.
    #[test]
    fn route_table_respects_capacity(
        capacity in 1usize..12,
        threshold in 1u32..5,
        ops in prop::collection::vec(arb_route_op(), 0..200),
    ) {
        let mut table = RouteTable::new(capacity, threshold);
        for op in ops {
            match op {
                RouteOp::Upsert { dest, hop } => {
                    let _ = table.upsert(NodeId::new(dest), Address::new(hop), RouteRole::Relay);
                }
                RouteOp::Sweep => {
                    table.age_tick();
                }
            }
            prop_assert!(table.len() <= capacity);
            let unique: BTreeSet<_> = table.entries().map(|e| e.destination).collect();
            prop_assert_eq!(unique.len(), table.len());
            prop_assert!(table.entries().all(|e| e.age < threshold));
        }
    }

    /// Aggregation slots and Child-role routes always describe the same
    /// set of nodes, through admissions, moves, evictions and promotions.
    #[test]
    fn children_match_child_routes(ops in prop::collection::vec(arb_engine_op(), 0..300)) {
        let config = NodeConfig::new(NodeId::new(2), NodeRole::Relay)
            .aggregate(true)
            .max_routes(5)
            .max_children(2)
            .inactive_threshold(3)
            .window_len(4);
        let mut engine = ForwardingEngine::new(config).unwrap();
        engine.handle_message(
            Message::AnnounceReply { recipient: NodeId::new(2) },
            Address::new(1),
            LinkMetric(-40),
        );

        for op in ops {
            match op {
                EngineOp::Report { origin, via, value } => {
                    let frame = format!("SRV{value:02}{origin:03}");
                    engine.handle_incoming(frame.as_bytes(), Address::new(via), LinkMetric(-50));
                }
                EngineOp::Maintenance => {
                    engine.tick_maintenance();
                }
            }

            let slots: BTreeSet<NodeId> = engine.children().children().into_iter().collect();
            let child_routes: BTreeSet<NodeId> = engine
                .routes()
                .entries()
                .filter(|e| e.role == RouteRole::Child)
                .map(|e| e.destination)
                .collect();
            prop_assert_eq!(&slots, &child_routes);
            prop_assert!(slots.len() <= 2);
            prop_assert!(engine.routes().len() <= 5);

            // a child is always heard straight from its origin
            let indirect: Vec<NodeId> = engine
                .routes()
                .entries()
                .filter(|e| e.role == RouteRole::Child && e.next_hop.node_id() != e.destination)
                .map(|e| e.destination)
                .collect();
            prop_assert!(indirect.is_empty(), "indirect children {:?}", indirect);

            // a pending route only exists while every slot is taken
            if engine.routes().first_pending().is_some() {
                prop_assert!(engine.children().is_full());
            }
        }
    }
}
