//! # ResourceD Master
//!
//! One node of the master tier. Each node owns connection pools for every
//! data domain, joins the full-mesh message bus with its peers, and streams
//! metric events to locally attached clients.
//!
//! Bus topics handled:
//!
//! - `peers-heartbeat`: remember the sending node, request a checks refetch
//! - `checks-refetch`: request a checks refetch
//! - `metric-*`: forward the JSON event to every registered client

pub mod app;
pub mod handlers;
pub mod logging;
pub mod node;
pub mod peers;
pub mod storage;

pub use app::Master;
pub use handlers::{MasterHandlers, RefetchSignal};
pub use peers::PeerSet;
