//! OrcaDash core - protocol and state layer of the controller console
//!
//! This crate keeps a live view of a running simulation controller:
//! - Length-prefixed TCP transport with automatic reconnection
//! - File replay transport for deterministic sessions without a live peer
//! - Message registry turning `|`-delimited wire messages into store updates
//! - Observable, thread-safe state store with a deferred update queue
//! - Operator command encoding (`COMMAND|domains|N|...` batches)
//!
//! Network loops never touch the store directly: every mutation is queued and
//! applied by whichever thread drains [`StateStore::process_ui_updates`].

pub mod command;
pub mod coordinator;
pub mod framing;
pub mod handlers;
pub mod models;
pub mod registry;
pub mod store;
pub mod transport;

pub use command::{CommandBatch, CommandError, CommandMeta};
pub use coordinator::ProtocolCoordinator;
pub use framing::FrameError;
pub use models::{
    Aggregator, LogEntry, LogLevel, Probe, Query, RankRange, RepRange, Schema, StatusUpdate,
    SystemStatus, TimestepInfo,
};
pub use registry::{DispatchError, Handler, HandlerError, Registry};
pub use store::{Category, ListenerId, StateStore, StoreError, StoreState, StoreUpdate};
pub use transport::replay::{ReplayMode, ReplayOptions, ReplayTransport};
pub use transport::tcp::{ShutdownReport, TcpOptions, TcpTransport, TransportStats};
pub use transport::{Endpoint, EventSink, Transport, TransportEvent};
