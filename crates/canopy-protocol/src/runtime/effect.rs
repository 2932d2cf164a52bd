use crate::codec::Message;
use crate::types::{Address, Order, SensorReading};

use super::ProtocolEvent;

/// Intent produced by the pure `ForwardingEngine` handlers.
///
/// Every `handle_*` / `tick_*` returns `Vec<RuntimeEffect>`; the event loop
/// then carries them out through the transport and the output channels.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEffect {
    /// Send to every neighbor in radio range, no acknowledgement.
    Broadcast(Message),

    /// Acknowledged send to one neighbor. The outcome is fed back to the
    /// engine through `handle_send_outcome`.
    Unicast { target: Address, message: Message },

    /// Hand an order to this node's actuator.
    Actuate(Order),

    /// Hand a reading to the gateway's collector.
    Collect(SensorReading),

    /// Protocol event for the application.
    Emit(ProtocolEvent),

    /// The parent was lost: announce again without waiting a full interval.
    RestartDiscovery,
}
