//! Default configuration values
//!
//! Constants used when a configuration file leaves a setting out.

/// General service defaults
pub mod service {
    pub const LOG_LEVEL: &str = "info";

    /// Peers heartbeat publish interval (seconds)
    pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

    /// A peer that missed this many seconds of heartbeats is forgotten
    pub const PEER_TTL_SECS: u64 = 90;

    /// Environment variable prefix for overrides
    pub const ENV_PREFIX: &str = "RESOURCED";
}

/// Storage defaults
pub mod storage {
    /// Writes go to every shard unless configured otherwise
    pub const REPLICATION_PERCENTAGE: u8 = 100;
}

/// Message bus defaults
pub mod bus {
    /// First backoff step after a receive error (milliseconds)
    pub const RECEIVE_BACKOFF_MS: u64 = 50;

    /// Upper bound of the receive error backoff (milliseconds)
    pub const RECEIVE_BACKOFF_MAX_MS: u64 = 5_000;

    /// Largest frame accepted from a peer
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
}
