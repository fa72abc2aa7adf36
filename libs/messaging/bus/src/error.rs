//! Bus error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    /// Socket level failures
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Unsupported or malformed endpoint URL
    #[error("Invalid endpoint '{url}': {reason}")]
    Endpoint { url: String, reason: String },

    /// Frame does not follow `topic:..|type:..|created:..|content:..`
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Receive loop already consumed the inbound queue
    #[error("Receive loop already running")]
    AlreadyRunning,

    /// Client registry coordinator has stopped
    #[error("Client registry is closed")]
    RegistryClosed,

    /// No configured subscriber URL points at this host
    #[error("No subscriber configured for host '{hostname}'")]
    NoSelfSubscriber { hostname: String },

    /// Every peer connection failed while sending
    #[error("Publish failed on all {peers} peer connections")]
    PublishFailed { peers: usize },
}

impl BusError {
    pub fn network(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Network {
            message: message.into(),
            source,
        }
    }

    pub fn endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Endpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
