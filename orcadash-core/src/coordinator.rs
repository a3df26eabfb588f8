/**
 * PROTOCOL COORDINATOR - Binds one transport to the registry and the store
 *
 * INBOUND : transport events → registry dispatch → deferred store queue
 * OUTBOUND : operator text → command encoder → transport send queue
 *
 * Nothing here mutates the store directly; the UI thread applies queued
 * updates with `StateStore::process_ui_updates`.
 */

use crate::command::{self, CommandError};
use crate::models::{LogLevel, StatusUpdate};
use crate::registry::{DispatchError, Registry};
use crate::store::{StateStore, StoreUpdate};
use crate::transport::replay::{ReplayOptions, ReplayTransport};
use crate::transport::tcp::{TcpOptions, TcpTransport, TransportStats};
use crate::transport::{Endpoint, EventSink, Transport, TransportEvent};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

pub struct ProtocolCoordinator {
    store: StateStore,
    transport: Arc<dyn Transport>,
    replay: bool,
}

impl ProtocolCoordinator {
    pub fn live(store: StateStore, registry: Registry, options: TcpOptions, runtime: Handle) -> Self {
        let sink = Self::event_sink(store.clone(), Arc::new(registry));
        Self {
            store,
            transport: Arc::new(TcpTransport::new(sink, options, runtime)),
            replay: false,
        }
    }

    pub fn replay(
        store: StateStore,
        registry: Registry,
        options: ReplayOptions,
        runtime: Handle,
    ) -> Self {
        let sink = Self::event_sink(store.clone(), Arc::new(registry));
        Self {
            store,
            transport: Arc::new(ReplayTransport::new(sink, options, runtime)),
            replay: true,
        }
    }

    /// Wrap a caller-built transport. `make` receives the sink that routes
    /// events into `store`.
    pub fn with_transport<T, F>(store: StateStore, registry: Registry, replay: bool, make: F) -> Self
    where
        T: Transport + 'static,
        F: FnOnce(EventSink) -> T,
    {
        let sink = Self::event_sink(store.clone(), Arc::new(registry));
        Self {
            store,
            transport: Arc::new(make(sink)),
            replay,
        }
    }

    /// The observer handed to the transport: every event becomes a queued update.
    pub fn event_sink(store: StateStore, registry: Arc<Registry>) -> EventSink {
        Arc::new(move |event| route_event(&store, &registry, event))
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn is_replay(&self) -> bool {
        self.replay
    }

    pub fn connect(&self, endpoint: &Endpoint) -> bool {
        info!(%endpoint, "connecting");
        self.transport.connect(endpoint)
    }

    pub async fn disconnect(&self) {
        info!("disconnecting");
        self.transport.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Replay only; always false against a live controller.
    pub fn step(&self) -> bool {
        self.replay && self.transport.step()
    }

    pub fn stats(&self) -> Option<TransportStats> {
        self.transport.stats()
    }

    pub fn progress(&self) -> Option<(usize, usize)> {
        self.transport.progress()
    }

    /// Encode `text` for the domains of its verb and queue it. Validation
    /// errors return before anything is sent.
    pub fn send_command(&self, text: &str) -> Result<(), CommandError> {
        let payload = command::encode_operator_command(text)?;
        debug!(%payload, "sending command");
        self.transport.send(payload);
        Ok(())
    }

    /// Ask the controller to flip a probe and mirror the flag locally.
    pub fn send_probe_toggle(&self, schema: &str, probe: &str, on: bool) -> Result<(), CommandError> {
        let payload = command::probe_toggle(schema, probe, on)?;
        self.transport.send(payload);
        self.store.queue_ui_update(StoreUpdate::SetProbeActive {
            schema: schema.to_string(),
            probe: probe.to_string(),
            active: on,
        });
        Ok(())
    }
}

fn route_event(store: &StateStore, registry: &Registry, event: TransportEvent) {
    match event {
        TransportEvent::MessageReceived { payload } => match registry.dispatch(&payload) {
            Ok(update) => store.queue_ui_update(update),
            Err(DispatchError::Empty) => {}
            Err(e @ DispatchError::UnknownTag(_)) => warn!(error = %e, "dropping message"),
            Err(e) => warn!(error = %e, %payload, "rejecting malformed message"),
        },
        TransportEvent::StatusChanged { text } => {
            store.queue_ui_update(StoreUpdate::Batch(vec![
                StoreUpdate::log(LogLevel::Info, format!("Connection: {text}")),
                StoreUpdate::UpdateStatus(StatusUpdate::connection(text)),
            ]));
        }
    }
}
