//! Transport contract shared by the live socket and file replay.

pub mod replay;
pub mod tcp;

use async_trait::async_trait;
use std::sync::Arc;

use self::tcp::TransportStats;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    MessageReceived { payload: String },
    StatusChanged { text: String },
}

impl TransportEvent {
    pub fn status(text: impl Into<String>) -> Self {
        TransportEvent::StatusChanged { text: text.into() }
    }

    pub fn message(payload: impl Into<String>) -> Self {
        TransportEvent::MessageReceived {
            payload: payload.into(),
        }
    }
}

/// Observer registered with a transport. Called from the transport's own
/// tasks, so it must be cheap and must not block.
pub type EventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Where a transport gets its messages from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Port is kept wide so out-of-range values can be reported rather than truncated.
    Tcp {
        host: String,
        port: u32,
        auto_reconnect: bool,
    },
    Replay {
        path: std::path::PathBuf,
    },
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp { host, port, .. } => write!(f, "{host}:{port}"),
            Endpoint::Replay { path } => write!(f, "replay:{}", path.display()),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Start (or restart) the transport. Returns false on synchronous
    /// rejection; asynchronous failures surface as status events.
    fn connect(&self, endpoint: &Endpoint) -> bool;

    /// Stop every loop and wait, bounded, for them to finish.
    async fn disconnect(&self);

    /// Never blocks.
    fn send(&self, message: String);

    fn is_connected(&self) -> bool;

    /// Emit the next message, for transports that support manual stepping.
    fn step(&self) -> bool {
        false
    }

    fn stats(&self) -> Option<TransportStats> {
        None
    }

    /// `(cursor, total)` for transports that know their length.
    fn progress(&self) -> Option<(usize, usize)> {
        None
    }
}
