//! File replay transport.
//!
//! Stands in for the live socket: `connect` loads a recorded session (one
//! payload per non-blank line) and messages are emitted either one at a time
//! through `step()` or by an auto-play task at a fixed interval.

use super::{Endpoint, EventSink, Transport, TransportEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const JOIN_TIMEOUT: Duration = Duration::from_secs(1);
const PROGRESS_EVERY: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplayMode {
    #[default]
    Manual,
    AutoPlay,
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub mode: ReplayMode,
    pub interval: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            mode: ReplayMode::Manual,
            interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Error loading file: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read a replay file: trimmed lines, blanks skipped.
pub fn load_messages(path: &Path) -> Result<Vec<String>, ReplayError> {
    if !path.exists() {
        return Err(ReplayError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[derive(Default)]
struct Session {
    messages: Vec<String>,
    cursor: usize,
    loaded: bool,
}

enum Advance {
    Message { payload: String, cursor: usize, total: usize },
    End,
    NotLoaded,
}

struct Shared {
    sink: EventSink,
    session: Mutex<Session>,
    stop: watch::Sender<bool>,
}

impl Shared {
    fn status(&self, text: impl Into<String>) {
        let text = text.into();
        info!(status = %text, "replay status");
        (self.sink)(TransportEvent::StatusChanged { text });
    }

    /// Takes the next message under the lock; emitting happens after release.
    fn advance(&self) -> Advance {
        let mut session = self.session.lock();
        if !session.loaded || session.messages.is_empty() {
            return Advance::NotLoaded;
        }
        if session.cursor >= session.messages.len() {
            return Advance::End;
        }
        let payload = session.messages[session.cursor].clone();
        session.cursor += 1;
        Advance::Message {
            payload,
            cursor: session.cursor,
            total: session.messages.len(),
        }
    }
}

pub struct ReplayTransport {
    shared: Arc<Shared>,
    options: ReplayOptions,
    player: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl ReplayTransport {
    pub fn new(sink: EventSink, options: ReplayOptions, runtime: Handle) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                sink,
                session: Mutex::new(Session::default()),
                stop,
            }),
            options,
            player: Mutex::new(None),
            runtime,
        }
    }

    fn load(&self, path: &Path) -> bool {
        let messages = match load_messages(path) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "replay file rejected");
                self.shared.status(e.to_string());
                return false;
            }
        };

        let total = messages.len();
        *self.shared.session.lock() = Session {
            messages,
            cursor: 0,
            loaded: true,
        };
        self.shared
            .status(format!("Loaded {total} messages from {}", path.display()));
        true
    }

    fn start_player(&self) {
        let mut player = self.player.lock();
        if let Some(previous) = player.take() {
            previous.abort();
        }
        self.shared.stop.send_replace(false);
        *player = Some(
            self.runtime
                .spawn(auto_play(self.shared.clone(), self.options.interval)),
        );
    }
}

impl Drop for ReplayTransport {
    fn drop(&mut self) {
        self.shared.stop.send_replace(true);
        if let Some(player) = self.player.lock().take() {
            player.abort();
        }
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    fn connect(&self, endpoint: &Endpoint) -> bool {
        let Endpoint::Replay { path } = endpoint else {
            self.shared.status(format!("Unsupported endpoint: {endpoint}"));
            return false;
        };
        if !self.load(path) {
            return false;
        }
        if self.options.mode == ReplayMode::AutoPlay {
            self.start_player();
        }
        true
    }

    async fn disconnect(&self) {
        self.shared.stop.send_replace(true);
        let player = self.player.lock().take();
        if let Some(mut player) = player {
            if timeout(JOIN_TIMEOUT, &mut player).await.is_err() {
                warn!("auto-play task did not stop in time, aborting");
                player.abort();
            }
        }
        *self.shared.session.lock() = Session::default();
        debug!("replay session cleared");
    }

    fn send(&self, message: String) {
        info!(%message, "[REPLAY] would send");
    }

    fn is_connected(&self) -> bool {
        self.shared.session.lock().loaded
    }

    fn step(&self) -> bool {
        match self.shared.advance() {
            Advance::Message { payload, .. } => {
                (self.shared.sink)(TransportEvent::MessageReceived { payload });
                true
            }
            Advance::End => {
                self.shared.status("End of replay file reached");
                false
            }
            Advance::NotLoaded => false,
        }
    }

    fn progress(&self) -> Option<(usize, usize)> {
        let session = self.shared.session.lock();
        Some((session.cursor, session.messages.len()))
    }
}

async fn auto_play(shared: Arc<Shared>, interval: Duration) {
    let mut stop = shared.stop.subscribe();
    loop {
        if *stop.borrow() {
            return;
        }
        match shared.advance() {
            Advance::Message { payload, cursor, total } => {
                (shared.sink)(TransportEvent::MessageReceived { payload });
                if cursor % PROGRESS_EVERY == 0 || cursor == total {
                    shared.status(format!("Replayed {cursor}/{total} messages"));
                }
            }
            Advance::End => {
                shared.status("End of replay file reached");
                return;
            }
            Advance::NotLoaded => return,
        }

        tokio::select! {
            _ = stop.changed() => return,
            _ = sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn recording_sink() -> (EventSink, Arc<Mutex<Vec<TransportEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorded = events.clone();
        let sink: EventSink = Arc::new(move |event| recorded.lock().push(event));
        (sink, events)
    }

    fn replay_file(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn test_load_skips_blank_lines_and_trims() {
        let file = replay_file(&["  CLEAR  ", "", "   ", "STATUS|ok"]);
        assert_eq!(load_messages(file.path()).unwrap(), vec!["CLEAR", "STATUS|ok"]);
        assert!(matches!(
            load_messages(Path::new("/definitely/not/here.log")),
            Err(ReplayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manual_step_to_end() {
        let (sink, events) = recording_sink();
        let transport = ReplayTransport::new(sink, ReplayOptions::default(), Handle::current());
        let file = replay_file(&["SCHEMA_ADD|a", "SCHEMA_ADD|b"]);

        assert!(transport.connect(&Endpoint::Replay { path: file.path().to_path_buf() }));
        assert!(transport.is_connected());
        assert_eq!(transport.progress(), Some((0, 2)));

        assert!(transport.step());
        assert!(transport.step());
        assert!(!transport.step());
        assert_eq!(transport.progress(), Some((2, 2)));

        let events = events.lock().clone();
        assert_eq!(
            events[0],
            TransportEvent::status(format!("Loaded 2 messages from {}", file.path().display()))
        );
        assert_eq!(events[1], TransportEvent::message("SCHEMA_ADD|a"));
        assert_eq!(events[2], TransportEvent::message("SCHEMA_ADD|b"));
        assert_eq!(events[3], TransportEvent::status("End of replay file reached"));
    }

    #[tokio::test]
    async fn test_missing_file_reports_status() {
        let (sink, events) = recording_sink();
        let transport = ReplayTransport::new(sink, ReplayOptions::default(), Handle::current());
        let path = PathBuf::from("/no/such/session.log");

        assert!(!transport.connect(&Endpoint::Replay { path }));
        assert!(!transport.is_connected());
        assert!(!transport.step());
        assert_eq!(
            events.lock().clone(),
            vec![TransportEvent::status("File not found: /no/such/session.log")]
        );
    }

    #[tokio::test]
    async fn test_auto_play_reports_progress() {
        let (sink, events) = recording_sink();
        let options = ReplayOptions {
            mode: ReplayMode::AutoPlay,
            interval: Duration::from_millis(1),
        };
        let transport = ReplayTransport::new(sink, options, Handle::current());
        let lines: Vec<String> = (0..12).map(|i| format!("STATUS|tick {i}")).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let file = replay_file(&refs);

        assert!(transport.connect(&Endpoint::Replay { path: file.path().to_path_buf() }));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let done = events
                .lock()
                .contains(&TransportEvent::status("End of replay file reached"));
            if done {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "auto-play never finished");
            sleep(Duration::from_millis(5)).await;
        }

        let statuses: Vec<_> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                TransportEvent::StatusChanged { text } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            &statuses[1..],
            &["Replayed 10/12 messages", "Replayed 12/12 messages", "End of replay file reached"]
        );
        let messages = events
            .lock()
            .iter()
            .filter(|e| matches!(e, TransportEvent::MessageReceived { .. }))
            .count();
        assert_eq!(messages, 12);

        transport.disconnect().await;
        assert!(!transport.is_connected());
        assert_eq!(transport.progress(), Some((0, 0)));
    }

    #[tokio::test]
    async fn test_disconnect_stops_auto_play() {
        let (sink, events) = recording_sink();
        let options = ReplayOptions {
            mode: ReplayMode::AutoPlay,
            interval: Duration::from_secs(10),
        };
        let transport = ReplayTransport::new(sink, options, Handle::current());
        let file = replay_file(&["STATUS|one", "STATUS|two"]);

        assert!(transport.connect(&Endpoint::Replay { path: file.path().to_path_buf() }));
        sleep(Duration::from_millis(50)).await;

        let started = tokio::time::Instant::now();
        transport.disconnect().await;
        assert!(started.elapsed() < JOIN_TIMEOUT);

        let received = events
            .lock()
            .iter()
            .filter(|e| matches!(e, TransportEvent::MessageReceived { .. }))
            .count();
        assert_eq!(received, 1);
    }
}
