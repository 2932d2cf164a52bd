//! Canopy protocol layer.
//!
//! Self-organizing control plane for a low-power sensor mesh: nodes build
//! a spanning tree toward a gateway, learn downward routes from upward
//! sensor traffic, and aggregating nodes turn each child's reading trend
//! into open/close orders sent back down.
//!
//! Wire format: fixed-width ASCII decimal (see [`codec`]).

pub mod aggregator;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod forwarding;
pub mod routing;
pub mod runtime;
pub mod types;

pub use aggregator::{ChildAggregator, EvaluationPolicy, ReadingWindow, Regression};
pub use codec::{Message, MessageCodec};
pub use config::NodeConfig;
pub use discovery::{ConnectionState, DiscoveryEvent, TopologyManager};
pub use error::{MeshProtocolError, Pool};
pub use forwarding::{ForwardingEngine, NodeSnapshot};
pub use routing::{RouteEntry, RouteRole, RouteTable, Upsert};
pub use runtime::{
    Inbound, NodeRuntime, ProtocolEvent, RandomSensor, ReliableTransport, RuntimeChannels,
    RuntimeCommand, RuntimeConfig, RuntimeEffect, RuntimeHandle, SendOutcome, SensorSource,
    Transport,
};
pub use types::{Address, LinkMetric, NodeId, NodeRole, Order, SensorReading};
