//! In-process key/value store, pub/sub bus and job queue.
//!
//! Plays the role the spec assigns to the shared in-memory store: fast-path
//! caches, coordination signals, the capped per-round action stream and the
//! FIFO checker job queue. Everything held here is derivable from the
//! database; a cold store changes latency, never behavior.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

/// Capacity of a single pub/sub channel before slow subscribers lag.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Default)]
struct StoreInner {
    strings: DashMap<String, Entry>,
    hashes: DashMap<String, (HashMap<String, String>, Option<Instant>)>,
    streams: DashMap<String, VecDeque<serde_json::Value>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

/// Cheaply cloneable handle to the shared store.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- strings ----

    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.inner.strings.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    pub fn set_ex(&self, key: &str, value: impl Into<String>, ttl: Duration) {
        self.inner.strings.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let entry = self.inner.strings.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.inner.strings.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn del(&self, key: &str) {
        self.inner.strings.remove(key);
    }

    /// Remove every string key starting with `prefix`.
    pub fn del_prefix(&self, prefix: &str) {
        self.inner.strings.retain(|key, _| !key.starts_with(prefix));
    }

    // ---- hashes ----

    pub fn hset(&self, key: &str, field: &str, value: impl Into<String>, ttl: Duration) {
        let mut entry = self
            .inner
            .hashes
            .entry(key.to_string())
            .or_insert_with(|| (HashMap::new(), None));
        entry.0.insert(field.to_string(), value.into());
        entry.1 = Some(Instant::now() + ttl);
    }

    pub fn hgetall(&self, key: &str) -> HashMap<String, String> {
        let Some(entry) = self.inner.hashes.get(key) else {
            return HashMap::new();
        };
        if entry.1.is_some_and(|at| Instant::now() >= at) {
            drop(entry);
            self.inner.hashes.remove(key);
            return HashMap::new();
        }
        entry.0.clone()
    }

    // ---- streams ----

    /// Append to a capped stream; oldest entries are dropped past `maxlen`.
    pub fn stream_add(&self, key: &str, value: serde_json::Value, maxlen: usize) {
        let mut stream = self.inner.streams.entry(key.to_string()).or_default();
        stream.push_back(value);
        while stream.len() > maxlen {
            stream.pop_front();
        }
    }

    pub fn stream_range(&self, key: &str) -> Vec<serde_json::Value> {
        self.inner
            .streams
            .get(key)
            .map(|stream| stream.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stream_len(&self, key: &str) -> usize {
        self.inner.streams.get(key).map(|s| s.len()).unwrap_or(0)
    }

    // ---- pub/sub ----

    /// Publish to a channel; returns the number of live subscribers.
    pub fn publish(&self, channel: &str, payload: impl Into<String>) -> usize {
        let channels = self.inner.channels.lock();
        match channels.get(channel) {
            Some(tx) => tx.send(payload.into()).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        let mut channels = self.inner.channels.lock();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop everything. Used by `reset` and by tests.
    pub fn flush_all(&self) {
        self.inner.strings.clear();
        self.inner.hashes.clear();
        self.inner.streams.clear();
        self.inner.channels.lock().clear();
    }
}

/// A checker job enqueued by the ticker for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Check {
        team_id: i64,
        task_id: i64,
        round: i64,
    },
    Put {
        team_id: i64,
        task_id: i64,
        round: i64,
    },
    Get {
        team_id: i64,
        task_id: i64,
        round: i64,
        flag_id: i64,
    },
}

/// FIFO job queue shared by the ticker (producer) and the worker pool.
///
/// Delivery is at-least-once from the handlers' point of view: a worker that
/// dies mid-job simply leaves the round to be re-probed next tick, and the
/// handlers' atomic updates make duplicate execution harmless.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
}

impl JobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    pub fn enqueue(&self, job: Job) -> bool {
        self.tx.send(job).is_ok()
    }

    /// Await the next job. Workers share the receiver; each job is handed to
    /// exactly one of them.
    pub async fn recv(&self) -> Option<Job> {
        self.rx.lock().await.recv().await
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Store key layout. Keeping the names in one place mirrors the database
/// schema acting as the other half of the contract.
pub mod keys {
    pub fn current_round() -> &'static str {
        "real_round"
    }

    pub fn round_start(round: i64) -> String {
        format!("round:{round}:start_time")
    }

    pub fn game_config() -> &'static str {
        "game_config"
    }

    pub fn game_state() -> &'static str {
        "game_state"
    }

    pub fn attack_data() -> &'static str {
        "attack_data"
    }

    pub fn team_by_token(token: &str) -> String {
        format!("team:token:{token}")
    }

    pub fn flag_by_str(flag: &str) -> String {
        format!("flag:str:{flag}")
    }

    pub fn session(token: &str) -> String {
        format!("session:{token}")
    }

    pub fn check_complete(round: i64, team_id: i64, task_id: i64) -> String {
        format!("check_complete:{round}:{team_id}:{task_id}")
    }

    pub fn check_done(round: i64, team_id: i64, task_id: i64) -> String {
        format!("check_done:{round}:{team_id}:{task_id}")
    }

    pub fn action_result(round: i64, team_id: i64, task_id: i64, action: &str) -> String {
        format!("action_result:{round}:{team_id}:{task_id}:{action}")
    }

    pub fn round_tracking(round: i64, team_id: i64, task_id: i64) -> String {
        format!("round_tracking:{round}:{team_id}:{task_id}")
    }

    pub fn action_stream(round: i64) -> String {
        format!("action_stream:{round}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_del() {
        let store = Store::new();
        store.set("real_round", "3");
        assert_eq!(store.get("real_round").as_deref(), Some("3"));
        store.del("real_round");
        assert_eq!(store.get("real_round"), None);
    }

    #[test]
    fn expired_keys_vanish() {
        let store = Store::new();
        store.set_ex("k", "v", Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn streams_are_capped() {
        let store = Store::new();
        for i in 0..20 {
            store.stream_add("s", serde_json::json!(i), 10);
        }
        let range = store.stream_range("s");
        assert_eq!(range.len(), 10);
        assert_eq!(range[0], serde_json::json!(10));
    }

    #[tokio::test]
    async fn publish_reaches_subscribers_in_order() {
        let store = Store::new();
        let mut rx = store.subscribe("check_done:1:2:3");
        assert_eq!(store.publish("check_done:1:2:3", "101"), 1);
        assert_eq!(store.publish("check_done:1:2:3", "104"), 1);
        assert_eq!(rx.recv().await.unwrap(), "101");
        assert_eq!(rx.recv().await.unwrap(), "104");
    }

    #[tokio::test]
    async fn queue_is_fifo() {
        let queue = JobQueue::new();
        queue.enqueue(Job::Check {
            team_id: 1,
            task_id: 1,
            round: 0,
        });
        queue.enqueue(Job::Put {
            team_id: 1,
            task_id: 1,
            round: 0,
        });
        assert!(matches!(queue.recv().await, Some(Job::Check { .. })));
        assert!(matches!(queue.recv().await, Some(Job::Put { .. })));
    }
}
