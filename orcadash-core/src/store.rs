/**
 * STATE STORE - Single source of truth for everything the console displays
 *
 * ROLE : Owns schemas, probes, aggregators, logs, queries, timestep and status.
 * Every mutation takes the lock, updates, releases, then notifies the listeners
 * registered for the touched category.
 *
 * HANDOFF : Network loops never mutate directly. They queue `StoreUpdate` values
 * with `queue_ui_update`; the UI thread applies them with `process_ui_updates`.
 */

use crate::models::{
    Aggregator, LogEntry, LogLevel, Probe, Query, RepRange, Schema, StatusUpdate, SystemStatus,
    TimestepInfo,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Number of log entries kept; oldest are evicted first.
pub const LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Schemas,
    Aggregators,
    Logs,
    Queries,
    Timestep,
    Status,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Schemas,
        Category::Aggregators,
        Category::Logs,
        Category::Queries,
        Category::Timestep,
        Category::Status,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Schemas => "schemas",
            Category::Aggregators => "aggregators",
            Category::Logs => "logs",
            Category::Queries => "queries",
            Category::Timestep => "timestep",
            Category::Status => "status",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| StoreError::UnknownCategory(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Schema not found: {0}")]
    UnknownSchema(String),
    #[error("Probe not found: {schema}/{probe}")]
    UnknownProbe { schema: String, probe: String },
    #[error("Unknown listener category: {0}")]
    UnknownCategory(String),
}

/// A mutation request travelling through the deferred queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreUpdate {
    Clear,
    ClearLogs,
    AddSchema { name: String },
    AddProbe(Probe),
    SetProbeActive { schema: String, probe: String, active: bool },
    ToggleSchemaExpanded { schema: String },
    AddAggRep { agg_id: String, rep: RepRange },
    AddLog { level: LogLevel, message: String },
    AddQuery(Query),
    AdvanceTimestep { timestamp: i64, from_ts: i64, to_ts: i64 },
    UpdateStatus(StatusUpdate),
    Batch(Vec<StoreUpdate>),
}

impl StoreUpdate {
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        StoreUpdate::AddLog {
            level,
            message: message.into(),
        }
    }

    /// True for an update that changes nothing (e.g. the heartbeat no-op).
    pub fn is_noop(&self) -> bool {
        matches!(self, StoreUpdate::Batch(updates) if updates.iter().all(StoreUpdate::is_noop))
    }
}

/// Everything the store owns. Readers get clones or borrow it through [`StateStore::read`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreState {
    pub schemas: BTreeMap<String, Schema>,
    pub aggregators: BTreeMap<String, Aggregator>,
    pub logs: VecDeque<LogEntry>,
    pub queries: BTreeMap<u64, Query>,
    pub timestep: TimestepInfo,
    pub status: SystemStatus,
}

/// Subscription handle returned by [`StateStore::listen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(Category) + Send + Sync>;

struct Subscription {
    id: ListenerId,
    category: Category,
    callback: Listener,
}

struct Inner {
    state: Mutex<StoreState>,
    listeners: Mutex<Vec<Subscription>>,
    next_listener: AtomicU64,
    queue_tx: Sender<StoreUpdate>,
    queue_rx: Receiver<StoreUpdate>,
}

/// Cheap to clone; every clone points at the same store.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Inner>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("pending_updates", &self.pending_updates())
            .field("listeners", &self.inner.listeners.lock().len())
            .finish()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = unbounded();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState::default()),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                queue_tx,
                queue_rx,
            }),
        }
    }

    // ----- deferred queue -----

    /// Queue an update for the UI thread. Never blocks.
    pub fn queue_ui_update(&self, update: StoreUpdate) {
        // Both channel ends live in `inner`, so the send cannot fail.
        let _ = self.inner.queue_tx.send(update);
    }

    /// Apply every update queued so far, in FIFO order, on the calling thread.
    ///
    /// Updates queued by listeners while draining wait for the next call.
    /// A failing update is logged and skipped. Returns how many were applied.
    pub fn process_ui_updates(&self) -> usize {
        let pending = self.inner.queue_rx.len();
        let mut applied = 0;
        for _ in 0..pending {
            let Ok(update) = self.inner.queue_rx.try_recv() else {
                break;
            };
            match self.apply(update) {
                Ok(()) => applied += 1,
                Err(e) => warn!(error = %e, "deferred update failed"),
            }
        }
        applied
    }

    pub fn pending_updates(&self) -> usize {
        self.inner.queue_rx.len()
    }

    /// Apply one update immediately. A batch applies every element and
    /// reports the first failure.
    pub fn apply(&self, update: StoreUpdate) -> Result<(), StoreError> {
        match update {
            StoreUpdate::Clear => self.clear(),
            StoreUpdate::ClearLogs => self.clear_logs(),
            StoreUpdate::AddSchema { name } => self.add_schema(&name),
            StoreUpdate::AddProbe(probe) => return self.add_probe(probe),
            StoreUpdate::SetProbeActive { schema, probe, active } => {
                return self.set_probe_active(&schema, &probe, active)
            }
            StoreUpdate::ToggleSchemaExpanded { schema } => {
                return self.toggle_schema_expanded(&schema)
            }
            StoreUpdate::AddAggRep { agg_id, rep } => self.add_agg_reps(&agg_id, rep),
            StoreUpdate::AddLog { level, message } => self.add_log(LogEntry::now(level, message)),
            StoreUpdate::AddQuery(query) => self.add_query(query),
            StoreUpdate::AdvanceTimestep { timestamp, from_ts, to_ts } => {
                self.update_timestep(timestamp, from_ts, to_ts)
            }
            StoreUpdate::UpdateStatus(update) => self.update_status(&update),
            StoreUpdate::Batch(updates) => {
                let mut first_error = None;
                for update in updates {
                    if let Err(e) = self.apply(update) {
                        first_error.get_or_insert(e);
                    }
                }
                return first_error.map_or(Ok(()), Err);
            }
        }
        Ok(())
    }

    // ----- mutations -----

    pub fn clear(&self) {
        self.mutate(&Category::ALL, |state| *state = StoreState::default());
    }

    pub fn clear_logs(&self) {
        self.mutate(&[Category::Logs], |state| state.logs.clear());
    }

    /// Create the schema, replacing any schema of the same name: a re-add
    /// starts over with no probes and expanded.
    pub fn add_schema(&self, name: &str) {
        self.mutate(&[Category::Schemas], |state| {
            state.schemas.insert(name.to_string(), Schema::new(name));
        });
    }

    pub fn add_probe(&self, probe: Probe) -> Result<(), StoreError> {
        self.try_mutate(&[Category::Schemas], |state| {
            let schema = state
                .schemas
                .get_mut(&probe.schema)
                .ok_or_else(|| StoreError::UnknownSchema(probe.schema.clone()))?;
            schema.probes.insert(probe.id.clone(), probe);
            Ok(())
        })
    }

    pub fn set_probe_active(&self, schema: &str, probe: &str, active: bool) -> Result<(), StoreError> {
        self.try_mutate(&[Category::Schemas], |state| {
            let entry = state
                .schemas
                .get_mut(schema)
                .and_then(|s| s.probes.get_mut(probe))
                .ok_or_else(|| StoreError::UnknownProbe {
                    schema: schema.to_string(),
                    probe: probe.to_string(),
                })?;
            entry.active = active;
            Ok(())
        })
    }

    pub fn toggle_schema_expanded(&self, schema: &str) -> Result<(), StoreError> {
        self.try_mutate(&[Category::Schemas], |state| {
            let entry = state
                .schemas
                .get_mut(schema)
                .ok_or_else(|| StoreError::UnknownSchema(schema.to_string()))?;
            entry.expanded = !entry.expanded;
            Ok(())
        })
    }

    pub fn add_agg_reps(&self, agg_id: &str, rep: RepRange) {
        self.mutate(&[Category::Aggregators], |state| {
            state
                .aggregators
                .entry(agg_id.to_string())
                .or_insert_with(|| Aggregator::new(agg_id))
                .add_rep(rep);
        });
    }

    pub fn add_log(&self, entry: LogEntry) {
        self.mutate(&[Category::Logs], |state| {
            state.logs.push_back(entry);
            while state.logs.len() > LOG_CAPACITY {
                state.logs.pop_front();
            }
        });
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.add_log(LogEntry::now(level, message));
    }

    pub fn add_query(&self, query: Query) {
        self.mutate(&[Category::Queries], |state| {
            state.queries.insert(query.id, query);
        });
    }

    pub fn update_timestep(&self, timestamp: i64, from_ts: i64, to_ts: i64) {
        self.mutate(&[Category::Timestep], |state| {
            state.timestep.advance(timestamp, from_ts, to_ts);
        });
    }

    pub fn update_status(&self, update: &StatusUpdate) {
        self.mutate(&[Category::Status], |state| update.apply_to(&mut state.status));
    }

    // ----- reads -----

    /// Borrow the state under the lock. Do not call back into the store from `f`.
    pub fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        f(&self.inner.state.lock())
    }

    pub fn snapshot(&self) -> StoreState {
        self.read(StoreState::clone)
    }

    pub fn schema(&self, name: &str) -> Option<Schema> {
        self.read(|s| s.schemas.get(name).cloned())
    }

    pub fn schemas(&self) -> Vec<Schema> {
        self.read(|s| s.schemas.values().cloned().collect())
    }

    pub fn aggregator(&self, id: &str) -> Option<Aggregator> {
        self.read(|s| s.aggregators.get(id).cloned())
    }

    pub fn aggregators(&self) -> Vec<Aggregator> {
        self.read(|s| s.aggregators.values().cloned().collect())
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.read(|s| s.logs.iter().cloned().collect())
    }

    pub fn log_count(&self) -> usize {
        self.read(|s| s.logs.len())
    }

    pub fn queries(&self) -> Vec<Query> {
        self.read(|s| s.queries.values().cloned().collect())
    }

    pub fn timestep(&self) -> TimestepInfo {
        self.read(|s| s.timestep.clone())
    }

    pub fn status(&self) -> SystemStatus {
        self.read(|s| s.status.clone())
    }

    // ----- listeners -----

    pub fn listen<F>(&self, category: Category, callback: F) -> ListenerId
    where
        F: Fn(Category) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push(Subscription {
            id,
            category,
            callback: Arc::new(callback),
        });
        debug!(listener = id.0, %category, "listener registered");
        id
    }

    /// Returns false when the id was not (or no longer) registered.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|s| s.id != id);
        listeners.len() != before
    }

    fn mutate<R>(&self, categories: &[Category], f: impl FnOnce(&mut StoreState) -> R) -> R {
        let out = {
            let mut state = self.inner.state.lock();
            f(&mut state)
        };
        self.notify(categories);
        out
    }

    fn try_mutate(
        &self,
        categories: &[Category],
        f: impl FnOnce(&mut StoreState) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        {
            let mut state = self.inner.state.lock();
            f(&mut state)?;
        }
        self.notify(categories);
        Ok(())
    }

    /// Runs with no store lock held, so callbacks may read or mutate the store.
    fn notify(&self, categories: &[Category]) {
        let targets: Vec<(ListenerId, Category, Listener)> = self
            .inner
            .listeners
            .lock()
            .iter()
            .filter(|s| categories.contains(&s.category))
            .map(|s| (s.id, s.category, Arc::clone(&s.callback)))
            .collect();

        for (id, category, callback) in targets {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(category))) {
                error!(
                    listener = id.0,
                    %category,
                    "listener panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn probe(schema: &str, id: &str, active: bool) -> Probe {
        Probe {
            id: id.to_string(),
            schema: schema.to_string(),
            name: format!("{id} probe"),
            active,
        }
    }

    #[test]
    fn test_log_ring_keeps_last_hundred_in_order() {
        let store = StateStore::new();
        for i in 0..150 {
            store.log(LogLevel::Info, format!("entry {i}"));
        }

        let logs = store.logs();
        assert_eq!(logs.len(), LOG_CAPACITY);
        assert_eq!(logs.first().unwrap().message, "entry 50");
        assert_eq!(logs.last().unwrap().message, "entry 149");
        for (offset, entry) in logs.iter().enumerate() {
            assert_eq!(entry.message, format!("entry {}", offset + 50));
        }
    }

    #[test]
    fn test_schema_readd_replaces_existing_schema() {
        let store = StateStore::new();
        store.add_schema("X");
        store.add_probe(probe("X", "p1", true)).unwrap();
        store.toggle_schema_expanded("X").unwrap();
        store.add_schema("X");

        assert_eq!(store.schemas().len(), 1);
        let schema = store.schema("X").unwrap();
        assert!(schema.probes.is_empty());
        assert!(schema.expanded);
    }

    #[test]
    fn test_probe_for_unknown_schema_is_rejected() {
        let store = StateStore::new();
        let err = store.add_probe(probe("ghost", "p1", true)).unwrap_err();
        assert_eq!(err, StoreError::UnknownSchema("ghost".into()));
    }

    #[test]
    fn test_set_probe_active_and_toggle_expanded() {
        let store = StateStore::new();
        store.add_schema("flux");
        store.add_probe(probe("flux", "p1", true)).unwrap();

        store.set_probe_active("flux", "p1", false).unwrap();
        store.toggle_schema_expanded("flux").unwrap();

        let schema = store.schema("flux").unwrap();
        assert!(!schema.probes["p1"].active);
        assert!(!schema.expanded);
        assert!(store.set_probe_active("flux", "nope", true).is_err());
    }

    #[test]
    fn test_listeners_only_fire_for_their_category() {
        let store = StateStore::new();
        let schema_hits = Arc::new(AtomicUsize::new(0));
        let log_hits = Arc::new(AtomicUsize::new(0));

        let hits = schema_hits.clone();
        store.listen(Category::Schemas, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        let hits = log_hits.clone();
        store.listen(Category::Logs, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        store.add_schema("a");
        store.log(LogLevel::Info, "hello");
        store.log(LogLevel::Info, "again");
        assert_eq!(schema_hits.load(Ordering::SeqCst), 1);
        assert_eq!(log_hits.load(Ordering::SeqCst), 2);

        store.clear();
        assert_eq!(schema_hits.load(Ordering::SeqCst), 2);
        assert_eq!(log_hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unlisten_stops_notifications() {
        let store = StateStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = store.listen(Category::Status, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.update_status(&StatusUpdate::connection("Connected"));
        assert!(store.unlisten(id));
        assert!(!store.unlisten(id));
        store.update_status(&StatusUpdate::connection("Disconnected"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let store = StateStore::new();
        let hits = Arc::new(AtomicUsize::new(0));

        store.listen(Category::Logs, |_| panic!("listener blew up"));
        let counter = hits.clone();
        store.listen(Category::Logs, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.log(LogLevel::Info, "first");
        store.log(LogLevel::Info, "second");

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(store.log_count(), 2);
    }

    #[test]
    fn test_listener_can_reenter_store() {
        let store = StateStore::new();
        let inner = store.clone();
        store.listen(Category::Schemas, move |_| {
            let count = inner.schemas().len();
            inner.update_status(&StatusUpdate {
                status_text: Some(format!("{count} schemas")),
                ..StatusUpdate::default()
            });
        });

        store.add_schema("a");
        store.add_schema("b");

        assert_eq!(store.status().status_text, "2 schemas");
    }

    #[test]
    fn test_deferred_queue_is_fifo_and_skips_failures() {
        let store = StateStore::new();
        store.queue_ui_update(StoreUpdate::AddSchema { name: "s".into() });
        store.queue_ui_update(StoreUpdate::AddProbe(probe("missing", "p", true)));
        store.queue_ui_update(StoreUpdate::AddProbe(probe("s", "p", true)));
        store.queue_ui_update(StoreUpdate::log(LogLevel::Info, "one"));
        store.queue_ui_update(StoreUpdate::log(LogLevel::Info, "two"));
        assert_eq!(store.pending_updates(), 5);
        assert_eq!(store.log_count(), 0);

        let applied = store.process_ui_updates();

        assert_eq!(applied, 4);
        assert_eq!(store.pending_updates(), 0);
        assert_eq!(store.schema("s").unwrap().probes.len(), 1);
        let messages: Vec<_> = store.logs().into_iter().map(|l| l.message).collect();
        assert_eq!(messages, vec!["one", "two"]);
    }

    #[test]
    fn test_updates_queued_by_listeners_wait_for_next_drain() {
        let store = StateStore::new();
        let inner = store.clone();
        store.listen(Category::Logs, move |_| {
            inner.queue_ui_update(StoreUpdate::UpdateStatus(StatusUpdate::connection("seen")));
        });

        store.queue_ui_update(StoreUpdate::log(LogLevel::Info, "x"));
        assert_eq!(store.process_ui_updates(), 1);
        assert_eq!(store.pending_updates(), 1);
        assert_eq!(store.process_ui_updates(), 1);
        assert_eq!(store.status().connection_status, "seen");
    }

    #[test]
    fn test_concurrent_producers_and_single_consumer() {
        let store = StateStore::new();
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        store.queue_ui_update(StoreUpdate::AddAggRep {
                            agg_id: t.to_string(),
                            rep: RepRange { rep_id: i, rbeg: i * 4, rend: i * 4 + 4 },
                        });
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        assert_eq!(store.process_ui_updates(), 100);
        let aggs = store.aggregators();
        assert_eq!(aggs.len(), 4);
        for agg in aggs {
            assert_eq!(agg.reps.len(), 25);
            assert_eq!((agg.rank_range.lo, agg.rank_range.hi), (0, 100));
        }
    }

    #[test]
    fn test_category_names_round_trip() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert!("widgets".parse::<Category>().is_err());
    }

    #[test]
    fn test_store_update_is_serializable() {
        let update = StoreUpdate::Batch(vec![
            StoreUpdate::ClearLogs,
            StoreUpdate::UpdateStatus(StatusUpdate {
                aggregator_count: Some(2),
                ..StatusUpdate::default()
            }),
        ]);
        let json = serde_json::to_string(&update).unwrap();
        let back: StoreUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, update);
        assert!(StoreUpdate::Batch(vec![]).is_noop());
        assert!(!update.is_noop());
    }
}
