use std::fmt;

use serde::{Deserialize, Serialize};

/// Default width of a node id on the wire (zero-padded decimal digits).
pub const ID_SIZE: usize = 3;

/// Width of the sensor value field on the wire.
pub const VALUE_DIGITS: usize = 2;

/// Width of the order field on the wire.
pub const ORDER_DIGITS: usize = 1;

/// Largest sensor value that fits the wire format.
pub const MAX_SENSOR_VALUE: u8 = 99;

/// Fixed identity of a mesh node, assigned at provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u16);

impl NodeId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for NodeId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

/// Link-layer address of a one-hop neighbor.
///
/// Owned by value everywhere (the parent, every next hop), never borrowed
/// from a receive buffer. Link addresses share the node id numbering, so a
/// neighbor's address converts to its `NodeId` and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(u16);

impl Address {
    pub const fn new(addr: u16) -> Self {
        Self(addr)
    }

    /// Node identity of the neighbor behind this address.
    pub const fn node_id(self) -> NodeId {
        NodeId(self.0)
    }
}

impl From<NodeId> for Address {
    fn from(id: NodeId) -> Self {
        Self(id.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "addr:{}", self.0)
    }
}

/// Signal quality observed on an incoming frame (RSSI-like, higher is better).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkMetric(pub i16);

impl LinkMetric {
    /// Sentinel below every real observation.
    pub const FLOOR: LinkMetric = LinkMetric(i16::MIN);
}

impl fmt::Display for LinkMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Actuator order carried by a Command (single decimal digit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Order(u8);

impl Order {
    /// Close the actuated device (valve).
    pub const CLOSE: Order = Order(0);
    /// Open the actuated device (valve).
    pub const OPEN: Order = Order(1);

    /// Build an order, `None` if it does not fit one digit.
    pub const fn new(code: u8) -> Option<Self> {
        if code <= 9 {
            Some(Self(code))
        } else {
            None
        }
    }

    pub const fn code(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Order::CLOSE => f.write_str("close"),
            Order::OPEN => f.write_str("open"),
            Order(code) => write!(f, "order#{code}"),
        }
    }
}

/// Part a node plays in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// Tree root. Always connected, collects reports, never forwards them up.
    Gateway,
    /// Forwards traffic only.
    Relay,
    /// Forwards traffic and produces its own periodic readings.
    Sensor,
}

impl NodeRole {
    pub fn is_root(self) -> bool {
        matches!(self, NodeRole::Gateway)
    }

    pub fn produces_readings(self) -> bool {
        matches!(self, NodeRole::Sensor)
    }
}

/// A reading delivered to the gateway's collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReading {
    pub origin: NodeId,
    pub value: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_and_node_id_share_numbering() {
        let id = NodeId::new(42);
        let addr = Address::from(id);
        assert_eq!(addr.node_id(), id);
    }

    #[test]
    fn link_metric_floor_is_below_everything() {
        assert!(LinkMetric(i16::MIN + 1) > LinkMetric::FLOOR);
        assert!(LinkMetric(-9999) > LinkMetric::FLOOR);
    }

    #[test]
    fn order_is_single_digit() {
        assert_eq!(Order::new(9).map(Order::code), Some(9));
        assert!(Order::new(10).is_none());
        assert_eq!(Order::OPEN.to_string(), "open");
        assert_eq!(Order::new(7).unwrap().to_string(), "order#7");
    }

    #[test]
    fn role_capabilities() {
        assert!(NodeRole::Gateway.is_root());
        assert!(!NodeRole::Relay.is_root());
        assert!(NodeRole::Sensor.produces_readings());
        assert!(!NodeRole::Gateway.produces_readings());
    }
}
