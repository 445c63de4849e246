//! Cross-job coordination: the CHECK -> PUT/GET barrier and the per-round
//! result records the monitor aggregates.
//!
//! Backed entirely by the shared store:
//! - `check_complete:{round}:{team}:{task}` - CHECK status, 5 min TTL
//! - `check_done:{round}:{team}:{task}` - pub/sub channel for the barrier
//! - `action_result:{round}:{team}:{task}:{action}` - per-action JSON, 10 min
//! - `round_tracking:{round}:{team}:{task}` - hash of actions, 10 min
//! - `action_stream:{round}` - capped event log (10 000 entries)

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::{keys, Store};

const CHECK_TTL: Duration = Duration::from_secs(300);
const RESULT_TTL: Duration = Duration::from_secs(600);
const STREAM_MAXLEN: usize = 10_000;

/// Result of a single CHECK/PUT/GET, as recorded for monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: String,
    pub team_id: i64,
    pub task_id: i64,
    pub round: i64,
    /// Status name (UP, DOWN, MUMBLE, CORRUPT, CHECK_FAILED, SKIPPED).
    pub status: String,
    pub status_code: i64,
    pub public_message: String,
    pub private_message: String,
    /// Unix timestamp, fractional seconds.
    pub timestamp: f64,
    /// Flag string for PUT actions.
    #[serde(default)]
    pub flag: Option<String>,
}

/// Aggregated statistics for one round.
#[derive(Debug, Clone, Serialize)]
pub struct RoundSummary {
    pub round: i64,
    pub total_actions: usize,
    pub by_action: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub errors: Vec<ErrorEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub team_id: i64,
    pub task_id: i64,
    pub action: String,
    pub status: String,
    pub message: String,
}

/// Coordinates action execution across workers. Cheap to clone.
#[derive(Clone)]
pub struct ActionCoordinator {
    store: Store,
}

impl ActionCoordinator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Signal that CHECK finished. Must be called strictly after the CHECK
    /// transaction committed: PUT/GET take this as permission to read the
    /// row.
    pub fn signal_check_complete(&self, team_id: i64, task_id: i64, round: i64, status_code: i64) {
        let key = keys::check_complete(round, team_id, task_id);
        let channel = keys::check_done(round, team_id, task_id);

        self.store.set_ex(&key, status_code.to_string(), CHECK_TTL);
        self.store.publish(&channel, status_code.to_string());

        debug!(team_id, task_id, round, status_code, "signalled CHECK complete");
    }

    /// Wait for the CHECK of (team, task, round) to finish.
    ///
    /// Fast path reads the status key; otherwise subscribes to the pub/sub
    /// channel (re-checking the key after subscribing to close the race) and
    /// waits up to `timeout`. `None` means unknown; callers fall back to
    /// polling the database.
    pub async fn wait_for_check(
        &self,
        team_id: i64,
        task_id: i64,
        round: i64,
        timeout: Duration,
    ) -> Option<i64> {
        let key = keys::check_complete(round, team_id, task_id);
        if let Some(existing) = self.store.get(&key) {
            return existing.parse().ok();
        }

        let channel = keys::check_done(round, team_id, task_id);
        let mut rx = self.store.subscribe(&channel);

        // The signal may have landed between the get and the subscribe.
        if let Some(existing) = self.store.get(&key) {
            return existing.parse().ok();
        }

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Ok(payload)) => payload.parse().ok(),
            Ok(Err(_)) => None,
            Err(_) => {
                warn!(team_id, task_id, round, "CHECK wait timed out after {timeout:?}");
                None
            }
        }
    }

    /// Store an action result in all three monitoring locations.
    pub fn record_action_result(&self, result: &ActionResult) {
        let Ok(encoded) = serde_json::to_string(result) else {
            return;
        };

        let result_key = keys::action_result(result.round, result.team_id, result.task_id, &result.action);
        self.store.set_ex(&result_key, encoded.clone(), RESULT_TTL);

        let round_key = keys::round_tracking(result.round, result.team_id, result.task_id);
        self.store.hset(&round_key, &result.action, encoded.clone(), RESULT_TTL);

        if let Ok(value) = serde_json::to_value(result) {
            self.store
                .stream_add(&keys::action_stream(result.round), value, STREAM_MAXLEN);
        }

        debug!(
            action = %result.action,
            team_id = result.team_id,
            task_id = result.task_id,
            round = result.round,
            status = %result.status,
            "recorded action result"
        );
    }

    /// All recorded actions for one (team, task, round) cell.
    pub fn get_round_results(&self, team_id: i64, task_id: i64, round: i64) -> HashMap<String, ActionResult> {
        let round_key = keys::round_tracking(round, team_id, task_id);
        self.store
            .hgetall(&round_key)
            .into_iter()
            .filter_map(|(action, encoded)| {
                serde_json::from_str::<ActionResult>(&encoded)
                    .ok()
                    .map(|result| (action, result))
            })
            .collect()
    }

    /// Aggregate statistics over the round's action stream.
    pub fn get_round_summary(&self, round: i64) -> RoundSummary {
        let events = self.store.stream_range(&keys::action_stream(round));

        let mut summary = RoundSummary {
            round,
            total_actions: events.len(),
            by_action: BTreeMap::from([
                ("check".to_string(), 0),
                ("put".to_string(), 0),
                ("get".to_string(), 0),
            ]),
            by_status: BTreeMap::new(),
            errors: Vec::new(),
        };

        for event in events {
            let Ok(result) = serde_json::from_value::<ActionResult>(event) else {
                continue;
            };
            if let Some(count) = summary.by_action.get_mut(&result.action) {
                *count += 1;
            }
            *summary.by_status.entry(result.status.clone()).or_insert(0) += 1;

            if matches!(result.status.as_str(), "DOWN" | "CHECK_FAILED" | "MUMBLE" | "CORRUPT") {
                summary.errors.push(ErrorEvent {
                    team_id: result.team_id,
                    task_id: result.task_id,
                    action: result.action,
                    status: result.status,
                    message: result.public_message,
                });
            }
        }

        summary
    }

    /// Whether the cell's round can be considered complete.
    ///
    /// Simplified to "CHECK record present"; the strict definition would
    /// compare against the task's expected PUT/GET counts.
    pub fn is_round_complete(&self, team_id: i64, task_id: i64, round: i64) -> bool {
        self.get_round_results(team_id, task_id, round).contains_key("check")
    }
}

/// Unix timestamp with fractional seconds for action records.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(action: &str, status: &str, code: i64) -> ActionResult {
        ActionResult {
            action: action.into(),
            team_id: 1,
            task_id: 2,
            round: 3,
            status: status.into(),
            status_code: code,
            public_message: "msg".into(),
            private_message: String::new(),
            timestamp: now_timestamp(),
            flag: None,
        }
    }

    #[tokio::test]
    async fn fast_path_returns_existing_status() {
        let coordinator = ActionCoordinator::new(Store::new());
        coordinator.signal_check_complete(1, 2, 3, 101);

        let status = coordinator.wait_for_check(1, 2, 3, Duration::from_millis(10)).await;
        assert_eq!(status, Some(101));
    }

    #[tokio::test]
    async fn wait_resolves_when_signal_arrives() {
        let coordinator = ActionCoordinator::new(Store::new());
        let waiter = coordinator.clone();

        let handle = tokio::spawn(async move { waiter.wait_for_check(1, 2, 3, Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.signal_check_complete(1, 2, 3, 104);

        assert_eq!(handle.await.unwrap(), Some(104));
    }

    #[tokio::test]
    async fn wait_times_out_to_unknown() {
        let coordinator = ActionCoordinator::new(Store::new());
        let status = coordinator.wait_for_check(9, 9, 9, Duration::from_millis(20)).await;
        assert_eq!(status, None);
    }

    #[test]
    fn summary_counts_actions_and_errors() {
        let coordinator = ActionCoordinator::new(Store::new());
        coordinator.record_action_result(&result("check", "UP", 101));
        coordinator.record_action_result(&result("put", "UP", 101));
        coordinator.record_action_result(&result("get", "MUMBLE", 103));

        let summary = coordinator.get_round_summary(3);
        assert_eq!(summary.total_actions, 3);
        assert_eq!(summary.by_action["check"], 1);
        assert_eq!(summary.by_status["UP"], 2);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].action, "get");

        assert!(coordinator.is_round_complete(1, 2, 3));
        assert!(!coordinator.is_round_complete(1, 2, 4));
    }
}
