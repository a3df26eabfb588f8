/**
 * TCP TRANSPORT - Framed, self-healing client connection to the controller
 *
 * LOOPS :
 * - connection : waits for "retry requested OR retry interval elapsed", then
 *   attempts one bounded connect when idle
 * - sender : drains the outbound FIFO while connected
 * - receiver : one per live socket, reads frames until the socket fails
 *
 * A connection generation counter keeps a stale receiver or writer from
 * tearing down a newer connection.
 */

use super::{Endpoint, EventSink, Transport, TransportEvent};
use crate::framing::{read_frame, write_frame, FrameError, DEFAULT_MAX_FRAME_LEN};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TcpOptions {
    pub connect_timeout: Duration,
    pub retry_interval: Duration,
    pub send_poll: Duration,
    /// Upper bound for each loop to stop during `disconnect()`.
    pub join_timeout: Duration,
    pub max_frame_len: usize,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_secs(1),
            send_poll: Duration::from_millis(100),
            join_timeout: Duration::from_secs(1),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    pub connect_attempts: u64,
    pub connections: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub send_failures: u64,
}

#[derive(Default)]
struct Counters {
    connect_attempts: AtomicU64,
    connections: AtomicU64,
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    send_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TransportStats {
        TransportStats {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of a bounded shutdown: loops that stopped on their own versus
/// loops that had to be aborted after the join timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub joined: usize,
    pub aborted: usize,
}

#[derive(Debug, Clone)]
struct Target {
    host: String,
    port: u16,
}

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Default)]
struct SendQueue {
    items: Mutex<VecDeque<String>>,
    ready: Notify,
}

impl SendQueue {
    fn push(&self, message: String) {
        self.items.lock().push_back(message);
        self.ready.notify_one();
    }

    fn pop(&self) -> Option<String> {
        self.items.lock().pop_front()
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[cfg(test)]
    fn snapshot(&self) -> Vec<String> {
        self.items.lock().iter().cloned().collect()
    }
}

#[derive(Default)]
struct Workers {
    connection: Option<JoinHandle<()>>,
    sender: Option<JoinHandle<()>>,
    receiver: Option<JoinHandle<()>>,
}

impl Workers {
    fn take_all(&mut self) -> Vec<(&'static str, JoinHandle<()>)> {
        [
            ("connection", self.connection.take()),
            ("sender", self.sender.take()),
            ("receiver", self.receiver.take()),
        ]
        .into_iter()
        .filter_map(|(name, handle)| handle.map(|h| (name, h)))
        .collect()
    }
}

struct Shared {
    sink: EventSink,
    options: TcpOptions,
    target: Mutex<Option<Target>>,
    auto_reconnect: AtomicBool,
    connected: AtomicBool,
    stop: watch::Sender<bool>,
    retry: Notify,
    retry_requested: AtomicBool,
    queue: SendQueue,
    writer: tokio::sync::Mutex<Option<BoxWriter>>,
    workers: Mutex<Workers>,
    counters: Counters,
    generation: AtomicU64,
}

impl Shared {
    fn new(sink: EventSink, options: TcpOptions) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            sink,
            options,
            target: Mutex::new(None),
            auto_reconnect: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            stop,
            retry: Notify::new(),
            retry_requested: AtomicBool::new(false),
            queue: SendQueue::default(),
            writer: tokio::sync::Mutex::new(None),
            workers: Mutex::new(Workers::default()),
            counters: Counters::default(),
            generation: AtomicU64::new(0),
        }
    }

    fn status(&self, text: impl Into<String>) {
        let text = text.into();
        info!(status = %text, "transport status");
        (self.sink)(TransportEvent::StatusChanged { text });
    }

    fn request_retry(&self) {
        self.retry_requested.store(true, Ordering::SeqCst);
        self.retry.notify_one();
    }

    fn stopping(&self) -> bool {
        *self.stop.borrow()
    }

    /// Mark connection `generation` as down. Ignored when a newer connection
    /// exists or the loss was already reported. Returns whether it was marked.
    fn connection_lost(&self, generation: u64, status: String) -> bool {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "ignoring loss of a stale connection");
            return false;
        }
        if !self.connected.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.status(status);
        if self.auto_reconnect.load(Ordering::SeqCst) {
            self.request_retry();
        }
        true
    }

    /// Close the writer of connection `generation`, unless a newer one owns it.
    async fn close_writer(&self, generation: u64) {
        let mut writer = self.writer.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if let Some(mut w) = writer.take() {
            let _ = timeout(self.options.join_timeout, w.shutdown()).await;
        }
    }
}

pub struct TcpTransport {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl TcpTransport {
    /// Loops are spawned on `runtime`, so `connect` may be called from any thread.
    pub fn new(sink: EventSink, options: TcpOptions, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared::new(sink, options)),
            runtime,
        }
    }

    pub fn stats(&self) -> TransportStats {
        self.shared.counters.snapshot()
    }

    /// Messages waiting for a live connection.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.shared.retry_requested.load(Ordering::SeqCst)
    }

    /// Stop every loop, close the socket and disable reconnection. Each loop
    /// gets `join_timeout` to finish before it is aborted.
    pub async fn shutdown(&self) -> ShutdownReport {
        let shared = &self.shared;
        shared.auto_reconnect.store(false, Ordering::SeqCst);
        shared.stop.send_replace(true);
        shared.generation.fetch_add(1, Ordering::SeqCst);
        shared.connected.store(false, Ordering::SeqCst);
        shared.retry.notify_one();

        let handles = shared.workers.lock().take_all();
        let mut report = ShutdownReport::default();
        for (name, mut handle) in handles {
            match timeout(shared.options.join_timeout, &mut handle).await {
                Ok(_) => report.joined += 1,
                Err(_) => {
                    warn!(task = name, "transport loop did not stop in time, aborting");
                    handle.abort();
                    report.aborted += 1;
                }
            }
        }

        if let Ok(mut writer) = timeout(shared.options.join_timeout, shared.writer.lock()).await {
            if let Some(mut w) = writer.take() {
                let _ = timeout(shared.options.join_timeout, w.shutdown()).await;
            }
        }

        shared.status("Disconnected");
        info!(joined = report.joined, aborted = report.aborted, "transport stopped");
        report
    }

    fn ensure_workers(&self) {
        let mut workers = self.shared.workers.lock();
        let idle = |h: &Option<JoinHandle<()>>| h.as_ref().map_or(true, JoinHandle::is_finished);

        if idle(&workers.connection) {
            workers.connection = Some(self.runtime.spawn(connection_loop(self.shared.clone())));
        }
        if idle(&workers.sender) {
            workers.sender = Some(self.runtime.spawn(send_loop(self.shared.clone())));
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shared.stop.send_replace(true);
        for (_, handle) in self.shared.workers.lock().take_all() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    /// While already connected only the reconnect policy changes; a new
    /// target takes effect on the next connection attempt.
    fn connect(&self, endpoint: &Endpoint) -> bool {
        let Endpoint::Tcp { host, port, auto_reconnect } = endpoint else {
            self.shared.status(format!("Unsupported endpoint: {endpoint}"));
            return false;
        };

        let host = host.trim();
        if host.is_empty() {
            self.shared.status("Invalid host: empty host name");
            return false;
        }
        let port = match u16::try_from(*port) {
            Ok(p) if p != 0 => p,
            _ => {
                self.shared.status(format!("Invalid port: {port}"));
                return false;
            }
        };

        *self.shared.target.lock() = Some(Target {
            host: host.to_string(),
            port,
        });
        self.shared.auto_reconnect.store(*auto_reconnect, Ordering::SeqCst);
        // only a real stop -> run transition may wake the loops
        self.shared.stop.send_if_modified(|stopped| std::mem::replace(stopped, false));
        self.ensure_workers();
        self.shared.request_retry();
        info!(host, port, auto_reconnect, "tcp transport started");
        true
    }

    async fn disconnect(&self) {
        self.shutdown().await;
    }

    fn send(&self, message: String) {
        debug!(len = message.len(), "queueing outbound message");
        self.shared.queue.push(message);
        if !self.shared.connected.load(Ordering::SeqCst)
            && self.shared.auto_reconnect.load(Ordering::SeqCst)
        {
            self.shared.request_retry();
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn stats(&self) -> Option<TransportStats> {
        Some(TcpTransport::stats(self))
    }
}

// ----- loops -----

async fn connection_loop(shared: Arc<Shared>) {
    let mut stop = shared.stop.subscribe();
    loop {
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shared.retry.notified() => {}
            _ = sleep(shared.options.retry_interval) => {}
        }

        let explicit = shared.retry_requested.swap(false, Ordering::SeqCst);
        if shared.stopping() || shared.connected.load(Ordering::SeqCst) {
            continue;
        }
        if !explicit && !shared.auto_reconnect.load(Ordering::SeqCst) {
            continue;
        }

        let generation = shared.generation.load(Ordering::SeqCst);
        match attempt(&shared).await {
            Ok(stream) => install(&shared, stream, generation).await,
            Err(status) => {
                shared.status(status);
                if !shared.auto_reconnect.load(Ordering::SeqCst) {
                    debug!("auto reconnect disabled, connection loop exiting");
                    break;
                }
            }
        }
    }
}

async fn attempt(shared: &Shared) -> Result<TcpStream, String> {
    let Some(Target { host, port }) = shared.target.lock().clone() else {
        return Err("No controller address configured".to_string());
    };

    Counters::bump(&shared.counters.connect_attempts);
    shared.status("Connecting...");

    match timeout(shared.options.connect_timeout, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::AddrNotAvailable => {
            Err(format!("Can't connect to {host}:{port} - Address not available"))
        }
        Ok(Err(e)) => Err(format!("Socket error: {e}")),
        Err(_) => Err(format!(
            "Connection failed: timed out after {}ms",
            shared.options.connect_timeout.as_millis()
        )),
    }
}

/// Adopt a fresh socket as connection `expected + 1`. The socket is dropped
/// when a shutdown started or another connection was installed since
/// `expected` was read.
async fn install(shared: &Arc<Shared>, stream: TcpStream, expected: u64) {
    let generation = expected + 1;
    if shared.stopping()
        || shared
            .generation
            .compare_exchange(expected, generation, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
    {
        debug!(expected, "dropping socket opened during shutdown");
        return;
    }
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "could not set TCP_NODELAY");
    }
    let (reader, writer) = stream.into_split();
    *shared.writer.lock().await = Some(Box::new(writer));

    let previous = shared.workers.lock().receiver.take();
    if let Some(previous) = previous {
        previous.abort();
        let _ = timeout(shared.options.join_timeout, previous).await;
    }

    shared.connected.store(true, Ordering::SeqCst);

    // shutdown takes the handles under this lock after raising the stop flag
    let installed = {
        let mut workers = shared.workers.lock();
        if shared.stopping() {
            false
        } else {
            Counters::bump(&shared.counters.connections);
            shared.status("Connected");
            workers.receiver = Some(tokio::spawn(receive_loop(shared.clone(), reader, generation)));
            true
        }
    };
    if !installed {
        shared.connected.store(false, Ordering::SeqCst);
        shared.close_writer(generation).await;
        debug!(generation, "shutdown raced a fresh connection, socket closed");
    }
}

async fn receive_loop<R>(shared: Arc<Shared>, mut reader: R, generation: u64)
where
    R: AsyncRead + Unpin + Send,
{
    let mut stop = shared.stop.subscribe();
    loop {
        if *stop.borrow() {
            return;
        }
        let frame = tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    return;
                }
                continue;
            }
            frame = read_frame(&mut reader, shared.options.max_frame_len) => frame,
        };

        match frame {
            Ok(payload) => {
                Counters::bump(&shared.counters.frames_received);
                debug!(len = payload.len(), "frame received");
                (shared.sink)(TransportEvent::MessageReceived { payload });
            }
            Err(e) => {
                let status = if e.is_disconnect() {
                    "Connection closed by server".to_string()
                } else {
                    format!("Receive error: {e}")
                };
                warn!(error = %e, "receive loop ending");
                if shared.connection_lost(generation, status) {
                    shared.close_writer(generation).await;
                }
                return;
            }
        }
    }
}

async fn send_loop(shared: Arc<Shared>) {
    let mut stop = shared.stop.subscribe();
    loop {
        if *stop.borrow() {
            break;
        }
        if !shared.connected.load(Ordering::SeqCst) || shared.queue.len() == 0 {
            tokio::select! {
                _ = stop.changed() => {}
                _ = shared.queue.ready.notified() => {}
                _ = sleep(shared.options.send_poll) => {}
            }
            continue;
        }
        send_next(&shared).await;
    }
}

/// Write the head of the queue. On failure the message goes back at the tail.
async fn send_next(shared: &Shared) -> bool {
    let Some(message) = shared.queue.pop() else {
        return false;
    };
    let generation = shared.generation.load(Ordering::SeqCst);

    let result = {
        let mut writer = shared.writer.lock().await;
        match writer.as_mut() {
            Some(w) => write_frame(w, &message).await,
            None => Err(FrameError::Closed),
        }
    };

    match result {
        Ok(()) => {
            Counters::bump(&shared.counters.frames_sent);
            debug!(len = message.len(), "frame sent");
            true
        }
        Err(e) => {
            warn!(error = %e, "send failed, message re-queued");
            shared.queue.push(message);
            Counters::bump(&shared.counters.send_failures);
            if shared.connection_lost(generation, format!("Send error: {e}")) {
                shared.close_writer(generation).await;
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn recording_sink() -> (EventSink, Arc<Mutex<Vec<TransportEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorded = events.clone();
        let sink: EventSink = Arc::new(move |event| recorded.lock().push(event));
        (sink, events)
    }

    fn statuses(events: &Mutex<Vec<TransportEvent>>) -> Vec<String> {
        events
            .lock()
            .iter()
            .filter_map(|e| match e {
                TransportEvent::StatusChanged { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    async fn free_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_send_failure_requeues_at_tail_and_requests_reconnect() {
        let (sink, events) = recording_sink();
        let shared = Shared::new(sink, TcpOptions::default());
        shared.auto_reconnect.store(true, Ordering::SeqCst);
        shared.connected.store(true, Ordering::SeqCst);
        *shared.writer.lock().await = Some(Box::new(BrokenPipe));
        shared.queue.push("m1".into());
        shared.queue.push("m2".into());

        assert!(!send_next(&shared).await);

        assert_eq!(shared.queue.snapshot(), vec!["m2", "m1"]);
        assert!(!shared.connected.load(Ordering::SeqCst));
        assert!(shared.writer.lock().await.is_none());
        assert!(shared.retry_requested.load(Ordering::SeqCst));
        assert_eq!(shared.counters.snapshot().send_failures, 1);
        let statuses = statuses(&events);
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].starts_with("Send error:"));
    }

    #[tokio::test]
    async fn test_stale_generation_does_not_drop_connection() {
        let (sink, events) = recording_sink();
        let shared = Shared::new(sink, TcpOptions::default());
        shared.connected.store(true, Ordering::SeqCst);
        shared.generation.store(5, Ordering::SeqCst);

        shared.connection_lost(4, "Connection closed by server".into());
        assert!(shared.connected.load(Ordering::SeqCst));
        assert!(events.lock().is_empty());

        shared.connection_lost(5, "Connection closed by server".into());
        shared.connection_lost(5, "Receive error: again".into());
        assert_eq!(statuses(&events), vec!["Connection closed by server"]);
    }

    #[tokio::test]
    async fn test_receive_loop_reports_server_close() {
        let (sink, events) = recording_sink();
        let shared = Arc::new(Shared::new(sink, TcpOptions::default()));
        shared.connected.store(true, Ordering::SeqCst);
        *shared.writer.lock().await = Some(Box::new(BrokenPipe));

        let (mut server, client) = tokio::io::duplex(256);
        write_frame(&mut server, "STATUS|running").await.unwrap();
        drop(server);

        receive_loop(shared.clone(), client, 0).await;

        let events = events.lock().clone();
        assert_eq!(events[0], TransportEvent::message("STATUS|running"));
        assert_eq!(events[1], TransportEvent::status("Connection closed by server"));
        assert!(!shared.connected.load(Ordering::SeqCst));
        assert!(shared.writer.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_receive_loop_ignores_stop_flag_rewrite() {
        let (sink, events) = recording_sink();
        let shared = Arc::new(Shared::new(sink, TcpOptions::default()));
        shared.connected.store(true, Ordering::SeqCst);

        let (mut server, client) = tokio::io::duplex(256);
        let receiver = tokio::spawn(receive_loop(shared.clone(), client, 0));
        tokio::task::yield_now().await;

        // wakes the loop without asking it to stop
        shared.stop.send_replace(false);
        write_frame(&mut server, "STATUS|still-here").await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while events.lock().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "frame never delivered");
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(events.lock()[0], TransportEvent::message("STATUS|still-here"));
        assert!(!receiver.is_finished());

        shared.stop.send_replace(true);
        timeout(Duration::from_secs(1), receiver).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_install_drops_socket_once_shutdown_started() {
        let (sink, events) = recording_sink();
        let shared = Arc::new(Shared::new(sink, TcpOptions::default()));
        let (client, mut server) = socket_pair().await;

        shared.stop.send_replace(true);
        install(&shared, client, 0).await;

        assert!(!shared.connected.load(Ordering::SeqCst));
        assert!(shared.writer.lock().await.is_none());
        assert!(shared.workers.lock().receiver.is_none());
        assert_eq!(shared.generation.load(Ordering::SeqCst), 0);
        assert!(statuses(&events).is_empty());

        let mut buf = [0u8; 1];
        let read = timeout(Duration::from_secs(1), server.read(&mut buf)).await.unwrap();
        assert_eq!(read.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_install_requires_unchanged_generation() {
        let (sink, events) = recording_sink();
        let shared = Arc::new(Shared::new(sink, TcpOptions::default()));
        shared.generation.store(3, Ordering::SeqCst);

        let (stale, _server_a) = socket_pair().await;
        install(&shared, stale, 2).await;
        assert!(!shared.connected.load(Ordering::SeqCst));
        assert_eq!(shared.generation.load(Ordering::SeqCst), 3);

        let (fresh, _server_b) = socket_pair().await;
        install(&shared, fresh, 3).await;
        assert!(shared.connected.load(Ordering::SeqCst));
        assert_eq!(shared.generation.load(Ordering::SeqCst), 4);
        assert!(shared.workers.lock().receiver.is_some());
        assert_eq!(statuses(&events), vec!["Connected"]);

        shared.stop.send_replace(true);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_target_without_network() {
        let (sink, events) = recording_sink();
        let transport = TcpTransport::new(sink, TcpOptions::default(), Handle::current());

        let empty = Endpoint::Tcp { host: " ".into(), port: 8989, auto_reconnect: true };
        let zero = Endpoint::Tcp { host: "localhost".into(), port: 0, auto_reconnect: true };
        let huge = Endpoint::Tcp { host: "localhost".into(), port: 70000, auto_reconnect: true };
        assert!(!transport.connect(&empty));
        assert!(!transport.connect(&zero));
        assert!(!transport.connect(&huge));

        assert_eq!(
            statuses(&events),
            vec!["Invalid host: empty host name", "Invalid port: 0", "Invalid port: 70000"]
        );
        assert_eq!(transport.stats().connect_attempts, 0);
    }

    #[tokio::test]
    async fn test_disconnect_stops_reconnect_attempts() {
        let (sink, events) = recording_sink();
        let options = TcpOptions {
            retry_interval: Duration::from_millis(20),
            ..TcpOptions::default()
        };
        let transport = TcpTransport::new(sink, options, Handle::current());
        let port = free_port().await;

        assert!(transport.connect(&Endpoint::Tcp {
            host: "127.0.0.1".into(),
            port: port.into(),
            auto_reconnect: true,
        }));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while transport.stats().connect_attempts < 2 {
            assert!(tokio::time::Instant::now() < deadline, "no retry observed");
            sleep(Duration::from_millis(10)).await;
        }

        let report = transport.shutdown().await;
        assert_eq!(report.aborted, 0);
        assert_eq!(report.joined, 2);

        let attempts = transport.stats().connect_attempts;
        sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.stats().connect_attempts, attempts);
        assert!(!transport.is_connected());
        assert_eq!(statuses(&events).last().map(String::as_str), Some("Disconnected"));
    }

    #[tokio::test]
    async fn test_permanent_failure_without_auto_reconnect() {
        let (sink, events) = recording_sink();
        let options = TcpOptions {
            retry_interval: Duration::from_millis(20),
            ..TcpOptions::default()
        };
        let transport = TcpTransport::new(sink, options, Handle::current());
        let endpoint = Endpoint::Tcp {
            host: "127.0.0.1".into(),
            port: free_port().await.into(),
            auto_reconnect: false,
        };

        assert!(transport.connect(&endpoint));
        sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.stats().connect_attempts, 1);
        assert!(statuses(&events).iter().any(|s| s.starts_with("Socket error:")));

        // an explicit connect starts the machine again
        assert!(transport.connect(&endpoint));
        sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.stats().connect_attempts, 2);
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_queued() {
        let (sink, _events) = recording_sink();
        let transport = TcpTransport::new(sink, TcpOptions::default(), Handle::current());
        transport.send("COMMAND|MPI|1|1|PAUSE".into());
        transport.send("COMMAND|MPI|1|1|RESUME".into());
        assert_eq!(transport.queued(), 2);
        assert!(!transport.reconnect_pending());
    }
}
