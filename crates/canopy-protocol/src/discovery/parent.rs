/// TopologyManager: parent selection state machine.
///
/// Pure: takes discovery inputs, returns the message to broadcast (if any)
/// and the transitions that happened. States:
/// Disconnected → Discovering → Connected, and Connected → Disconnected
/// when delivery to the parent times out.
use crate::codec::Message;
use crate::discovery::types::{ConnectionState, DiscoveryEvent};
use crate::types::{Address, LinkMetric, NodeId};

/// Tracks this node's parent in the tree.
#[derive(Debug, Clone)]
pub struct TopologyManager {
    local_id: NodeId,
    state: ConnectionState,
    parent: Option<Address>,
    /// Strongest reply metric accepted so far. Kept across the whole node
    /// lifetime, reset only when the parent is lost.
    best_metric: LinkMetric,
    is_root: bool,
}

impl TopologyManager {
    /// A regular node, starting disconnected.
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            state: ConnectionState::Disconnected,
            parent: None,
            best_metric: LinkMetric::FLOOR,
            is_root: false,
        }
    }

    /// The tree root: permanently connected, no parent.
    pub fn root(local_id: NodeId) -> Self {
        Self {
            local_id,
            state: ConnectionState::Connected,
            parent: None,
            best_metric: LinkMetric::FLOOR,
            is_root: true,
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn current_parent(&self) -> Option<Address> {
        self.parent
    }

    pub fn best_metric(&self) -> LinkMetric {
        self.best_metric
    }

    /// Announce timer fired. Returns the Announce to broadcast while the
    /// node still has no parent.
    pub fn tick_announce(&mut self) -> Option<Message> {
        if self.is_connected() {
            return None;
        }
        self.state = ConnectionState::Discovering;
        Some(Message::Announce)
    }

    /// A neighbor is looking for a parent. Only a connected node offers
    /// itself; a disconnected one has nothing to offer.
    pub fn on_announce(&self, sender: Address) -> Option<Message> {
        if !self.is_connected() {
            return None;
        }
        Some(Message::AnnounceReply {
            recipient: sender.node_id(),
        })
    }

    /// A neighbor offers itself as parent.
    ///
    /// Adopted iff the reply is for us and strictly stronger than the best
    /// seen so far, so the first of two equal replies wins. Evaluated even
    /// while connected, letting a stronger late reply replace the parent.
    pub fn on_announce_reply(
        &mut self,
        recipient: NodeId,
        sender: Address,
        metric: LinkMetric,
    ) -> Option<DiscoveryEvent> {
        if self.is_root || recipient != self.local_id {
            return None;
        }
        if metric <= self.best_metric {
            return None;
        }

        let previous = self.parent.replace(sender);
        self.best_metric = metric;
        self.state = ConnectionState::Connected;
        Some(DiscoveryEvent::ParentAdopted {
            parent: sender,
            metric,
            previous,
        })
    }

    /// A unicast exhausted its retransmissions.
    ///
    /// Only a timeout toward the current parent disconnects the node.
    pub fn on_transport_timeout(&mut self, target: Address) -> Option<DiscoveryEvent> {
        if self.is_root || self.parent != Some(target) {
            return None;
        }
        self.parent = None;
        self.state = ConnectionState::Disconnected;
        self.best_metric = LinkMetric::FLOOR;
        Some(DiscoveryEvent::ParentLost { parent: target })
    }
}
