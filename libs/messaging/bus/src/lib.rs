//! Message Bus
//!
//! Topic messaging between master nodes and toward attached consumers:
//!
//! - [`MessageBus`]: full mesh. Every node listens and dials every peer; a
//!   publish goes to all connections, inbound frames feed one receive loop
//!   that dispatches by topic prefix.
//! - [`Publisher`] / [`Subscriber`]: directed pub/sub with exact-topic
//!   subscriptions filtered on the publishing side.
//! - [`ClientRegistry`]: locally attached stream consumers fed by broadcast.
//! - [`publish_metrics_by_host_row`]: one host snapshot to per-metric topics.
//!
//! Frames are `topic:<t>|type:<plain|json>|created:<unix secs>|content:<payload>`
//! carried length-prefixed over TCP or Unix sockets.

pub mod backoff;
pub mod error;
pub mod fanout;
pub mod handler;
pub mod mesh;
mod outbound;
pub mod pubsub;
pub mod registry;
pub mod transport;
pub mod wire;

pub use backoff::Backoff;
pub use error::{BusError, Result};
pub use fanout::{metric_topic, publish_metrics_by_host_row, TopicPublisher, METRIC_TOPIC_PREFIX};
pub use handler::{HandlerSet, TopicHandler};
pub use mesh::{BusOptions, MessageBus};
pub use pubsub::{is_self_url, PubSubs, Publisher, Subscriber};
pub use registry::{ClientId, ClientRegistry, ClientStream, RegistryCoordinator};
pub use transport::Endpoint;
pub use wire::{subscription_prefix, MessageType, WireMessage};

/// Topic every node heartbeats its own address on
pub const PEERS_HEARTBEAT_TOPIC: &str = "peers-heartbeat";
/// Topic prefix asking nodes to reload check definitions
pub const CHECKS_REFETCH_TOPIC: &str = "checks-refetch";
