//! Fake controller for manual end-to-end runs of the console.
//!
//! Serves a replay file over framed TCP, one line per frame, and logs every
//! command batch the console sends back. PAUSE / RESUME gate the stream.
//!
//! cargo run -- session.log   (FAKE_CONTROLLER_PORT, FAKE_CONTROLLER_INTERVAL_MS)

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use orcadash_core::command::decode_commands;
use orcadash_core::framing::{read_frame, write_frame, DEFAULT_MAX_FRAME_LEN};
use orcadash_core::transport::replay::load_messages;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Duration};

// ===== Configuration =====
const DEFAULT_PORT: u16 = 8989;
const DEFAULT_INTERVAL_MS: u64 = 200;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let path: PathBuf = std::env::args()
        .nth(1)
        .context("usage: orcadash-fake-controller <replay-file>")?
        .into();
    let messages = Arc::new(load_messages(&path)?);
    let port = env_or("FAKE_CONTROLLER_PORT", DEFAULT_PORT);
    let interval = Duration::from_millis(env_or("FAKE_CONTROLLER_INTERVAL_MS", DEFAULT_INTERVAL_MS));

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("🚀 Fake controller on :{} serving {} messages from {}", port, messages.len(), path.display());

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("🔌 Console connected from {}", peer);
        let messages = messages.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(stream, messages, interval).await {
                warn!("⚠️ Session with {} ended: {}", peer, e);
            }
        });
    }
}

async fn serve(stream: TcpStream, messages: Arc<Vec<String>>, interval: Duration) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let paused = Arc::new(AtomicBool::new(false));

    let gate = paused.clone();
    let commands = tokio::spawn(async move {
        loop {
            let payload = match read_frame(&mut reader, DEFAULT_MAX_FRAME_LEN).await {
                Ok(payload) => payload,
                Err(e) => {
                    debug!("reader done: {}", e);
                    return;
                }
            };
            match decode_commands(&payload) {
                Ok(batch) => {
                    info!("📨 [{}] {:?}", batch.domain_field(), batch.commands);
                    for verb in batch.verbs() {
                        match verb.to_ascii_uppercase().as_str() {
                            "PAUSE" => gate.store(true, Ordering::SeqCst),
                            "RESUME" => gate.store(false, Ordering::SeqCst),
                            _ => {}
                        }
                    }
                }
                Err(e) => error!("❌ Undecodable payload {:?}: {}", payload, e),
            }
        }
    });

    let mut sent = 0;
    while sent < messages.len() {
        if commands.is_finished() {
            break;
        }
        if !paused.load(Ordering::SeqCst) {
            write_frame(&mut writer, &messages[sent]).await?;
            sent += 1;
        }
        sleep(interval).await;
    }
    info!("✅ Sent {}/{} messages, keeping the session open", sent, messages.len());

    // stay up for commands until the console hangs up
    commands.await?;
    Ok(())
}
