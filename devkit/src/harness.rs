/*!
Test harness: a coordinator and its store, driven the way the UI thread drives them
*/

use anyhow::{bail, Result};
use orcadash_core::{
    Endpoint, ProtocolCoordinator, Registry, ReplayOptions, StateStore, TcpOptions,
};
use std::path::Path;
use std::time::Duration;
use tokio::runtime::Handle;

/// Install `env_logger` once; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct TestHarness {
    pub store: StateStore,
    pub coordinator: ProtocolCoordinator,
}

impl TestHarness {
    /// Must be called inside a tokio runtime.
    pub fn live(options: TcpOptions) -> Self {
        init_logging();
        let store = StateStore::new();
        let coordinator =
            ProtocolCoordinator::live(store.clone(), Registry::standard(), options, Handle::current());
        Self { store, coordinator }
    }

    /// Must be called inside a tokio runtime.
    pub fn replay(options: ReplayOptions) -> Self {
        init_logging();
        let store = StateStore::new();
        let coordinator = ProtocolCoordinator::replay(
            store.clone(),
            Registry::standard(),
            options,
            Handle::current(),
        );
        Self { store, coordinator }
    }

    pub fn connect_local(&self, port: u16, auto_reconnect: bool) -> bool {
        self.coordinator.connect(&Endpoint::Tcp {
            host: "127.0.0.1".to_string(),
            port: port.into(),
            auto_reconnect,
        })
    }

    pub fn load(&self, path: &Path) -> bool {
        self.coordinator.connect(&Endpoint::Replay {
            path: path.to_path_buf(),
        })
    }

    /// Apply everything queued so far, like one UI tick.
    pub fn pump(&self) -> usize {
        self.store.process_ui_updates()
    }

    /// Step a replay `n` times, pumping after each step. Returns how many
    /// steps produced a message.
    pub fn step_n(&self, n: usize) -> usize {
        let mut produced = 0;
        for _ in 0..n {
            if self.coordinator.step() {
                produced += 1;
            }
            self.pump();
        }
        produced
    }

    /// Pump repeatedly until `predicate` holds or `timeout` elapses.
    pub async fn wait_until<F>(&self, timeout: Duration, predicate: F) -> Result<()>
    where
        F: Fn(&StateStore) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.pump();
            if predicate(&self.store) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                log::warn!("⏰ Condition not met within {:?}", timeout);
                bail!(
                    "condition not met within {:?}; last logs: {:?}",
                    timeout,
                    self.log_messages()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn log_messages(&self) -> Vec<String> {
        self.store.logs().into_iter().map(|l| l.message).collect()
    }

    pub async fn shutdown(self) {
        self.coordinator.disconnect().await;
        self.pump();
        log::info!("🧹 Test harness shut down");
    }
}
