/*!
Mock controller for tests without a running simulation

Listens on 127.0.0.1 with an ephemeral port, serves one client at a time,
records every frame it receives and can push frames or drop the connection
on demand.
*/

use anyhow::{bail, Result};
use orcadash_core::command::decode_commands;
use orcadash_core::framing::{read_frame, write_frame, DEFAULT_MAX_FRAME_LEN};
use orcadash_core::CommandBatch;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

enum Outbound {
    Frame(String),
    Drop,
}

#[derive(Default)]
struct ControllerState {
    received: Mutex<Vec<String>>,
    accepted: AtomicUsize,
    client: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
}

pub struct MockController {
    port: u16,
    state: Arc<ControllerState>,
    accept_task: JoinHandle<()>,
}

impl MockController {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let state = Arc::new(ControllerState::default());
        let accept_task = tokio::spawn(accept_loop(listener, state.clone()));
        log::info!("🎛️ [MOCK] Controller listening on 127.0.0.1:{}", port);
        Ok(Self {
            port,
            state,
            accept_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    pub fn has_client(&self) -> bool {
        self.state.client.lock().is_some()
    }

    /// Send one frame to the connected client.
    pub fn push(&self, payload: impl Into<String>) -> Result<()> {
        let client = self.state.client.lock();
        let Some(tx) = client.as_ref() else {
            bail!("no client connected");
        };
        tx.send(Outbound::Frame(payload.into()))
            .map_err(|_| anyhow::anyhow!("client connection already closed"))?;
        Ok(())
    }

    pub fn push_all<I, S>(&self, payloads: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        payloads.into_iter().try_for_each(|p| self.push(p))
    }

    /// Close the current client socket; the listener keeps accepting.
    pub fn drop_client(&self) -> Result<()> {
        let client = self.state.client.lock().take();
        match client {
            Some(tx) => {
                let _ = tx.send(Outbound::Drop);
                log::info!("✂️ [MOCK] Dropping client connection");
                Ok(())
            }
            None => bail!("no client connected"),
        }
    }

    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().clone()
    }

    /// Received payloads that decode as `COMMAND` batches.
    pub fn received_batches(&self) -> Vec<CommandBatch> {
        self.received()
            .iter()
            .filter_map(|payload| decode_commands(payload).ok())
            .collect()
    }

    pub async fn wait_for_received(&self, count: usize, timeout: Duration) -> Result<Vec<String>> {
        let received = poll_until(timeout, || self.state.received.lock().len() >= count).await;
        if !received {
            bail!(
                "expected {} frames, got {}: {:?}",
                count,
                self.state.received.lock().len(),
                self.received()
            );
        }
        Ok(self.received())
    }

    /// Wait until `count` connections were accepted and one is live.
    pub async fn wait_for_client(&self, count: usize, timeout: Duration) -> Result<()> {
        let connected = poll_until(timeout, || self.accepted() >= count && self.has_client()).await;
        if !connected {
            bail!("expected connection #{}, saw {}", count, self.accepted());
        }
        Ok(())
    }

    pub fn shutdown(self) {
        self.accept_task.abort();
        log::info!("🛑 [MOCK] Controller on port {} stopped", self.port);
    }
}

impl Drop for MockController {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn poll_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}

async fn accept_loop(listener: TcpListener, state: Arc<ControllerState>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!("⚠️ [MOCK] Accept failed: {}", e);
                continue;
            }
        };
        let n = state.accepted.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("🔌 [MOCK] Client #{} connected from {}", n, peer);

        let (tx, rx) = mpsc::unbounded_channel();
        *state.client.lock() = Some(tx);
        serve(stream, rx, state.clone()).await;
        state.client.lock().take();
        log::info!("👋 [MOCK] Client #{} gone", n);
    }
}

async fn serve(stream: TcpStream, mut rx: mpsc::UnboundedReceiver<Outbound>, state: Arc<ControllerState>) {
    let (mut reader, mut writer) = stream.into_split();

    let recorder = state.clone();
    let mut reader_task = tokio::spawn(async move {
        while let Ok(payload) = read_frame(&mut reader, DEFAULT_MAX_FRAME_LEN).await {
            log::debug!("📥 [MOCK] Received: {}", payload);
            recorder.received.lock().push(payload);
        }
    });

    loop {
        tokio::select! {
            _ = &mut reader_task => break,
            outbound = rx.recv() => match outbound {
                Some(Outbound::Frame(payload)) => {
                    if let Err(e) = write_frame(&mut writer, &payload).await {
                        log::warn!("⚠️ [MOCK] Write failed: {}", e);
                        break;
                    }
                }
                Some(Outbound::Drop) | None => break,
            },
        }
    }
    reader_task.abort();
}
