//! Live-event fan-out to the internal bus and the WebSocket streams.
//!
//! Producers call [`Notifier::notify`] after their transaction commits; a
//! dedicated task drains the bounded queue and republishes on the broadcast
//! channel (WebSocket handlers) and the `adarena-events` store channel (the
//! internal bus). Dropping events under backpressure is acceptable; scoring
//! state never travels through here.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::store::Store;
use crate::structs::events::LiveEvent;

/// Internal pub/sub channel all events are mirrored to.
pub const EVENTS_CHANNEL: &str = "adarena-events";

const QUEUE_CAPACITY: usize = 1000;
const BROADCAST_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<LiveEvent>,
    bus: broadcast::Sender<LiveEvent>,
    rx: Arc<tokio::sync::Mutex<Option<mpsc::Receiver<LiveEvent>>>>,
    store: Store,
}

impl Notifier {
    pub fn new(store: Store) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (bus, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            bus,
            rx: Arc::new(tokio::sync::Mutex::new(Some(rx))),
            store,
        }
    }

    /// Queue an event for broadcast. Never blocks; a full queue drops the
    /// event with a warning.
    pub fn notify(&self, event: LiveEvent) {
        if let Err(err) = self.tx.try_send(event) {
            warn!("notification queue full, dropping event: {err}");
        }
    }

    /// Subscribe to the fan-out; used by the WebSocket handlers.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.bus.subscribe()
    }

    /// Drain the queue until shutdown. Run exactly once.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let Some(mut rx) = self.rx.lock().await.take() else {
            warn!("notifier already running");
            return;
        };
        info!("notifier started");

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    self.broadcast(event);
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("notifier stopped");
    }

    fn broadcast(&self, event: LiveEvent) {
        debug!(kind = event.kind(), "broadcasting live event");
        if let Ok(encoded) = serde_json::to_string(&event) {
            self.store.publish(EVENTS_CHANNEL, encoded);
        }
        // No subscribers is fine; spectators come and go.
        let _ = self.bus.send(event);
    }
}
