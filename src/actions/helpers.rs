//! Shared machinery for the CHECK/PUT/GET handlers: the barrier wait with
//! its database fallback, retry schedules derived from the round length, and
//! result recording.

use std::time::Duration;

use tracing::warn;

use crate::context::Ctx;
use crate::coordinator::{now_timestamp, ActionResult};
use crate::database::{teams, tasks, teamtasks};
use crate::game_state;
use crate::structs::errors::DbError;
use crate::structs::events::{CheckerNotice, LiveEvent};
use crate::structs::status::{Action, NOT_CHECKED};
use crate::structs::task::Task;
use crate::structs::team::Team;

/// Status codes that poison downstream actions.
pub fn is_blocking_failure(status_code: i64) -> bool {
    status_code == 104 || status_code == 110
}

/// How long PUT/GET wait on the barrier: 60 % of the round.
pub fn check_wait_timeout(round_time: i64) -> Duration {
    Duration::from_secs_f64(round_time.max(1) as f64 * 0.6)
}

/// Database-fallback attempts, scaled to the round length.
pub fn max_retries(round_time: i64) -> u32 {
    match round_time {
        ..=60 => 2,
        61..=120 => 3,
        121..=300 => 5,
        _ => 7,
    }
}

/// Initial fallback delay: 1.5 % of the round, clamped to [0.5s, 5s].
/// Subsequent attempts double it.
pub fn initial_backoff(round_time: i64) -> Duration {
    Duration::from_secs_f64((round_time as f64 * 0.015).clamp(0.5, 5.0))
}

/// Wait for the cell's CHECK to finish: pub/sub first, then authoritative
/// polling with exponential backoff. `None` means the status could not be
/// determined within the budget.
pub async fn wait_for_check_completion(ctx: &Ctx, team_id: i64, task_id: i64, round: i64) -> Option<i64> {
    let round_time = match game_state::get_current_game_config(&ctx.db, &ctx.store).await {
        Ok(config) => config.round_time,
        Err(err) => {
            warn!(team_id, task_id, "failed to load config for CHECK wait: {err}");
            60
        }
    };

    let timeout = check_wait_timeout(round_time);
    if let Some(status) = ctx.coordinator.wait_for_check(team_id, task_id, round, timeout).await {
        return Some(status);
    }

    warn!(team_id, task_id, round, "CHECK pub/sub wait timed out, polling the database");

    let mut backoff = initial_backoff(round_time);
    let retries = max_retries(round_time);
    for attempt in 1..=retries {
        let result = ctx
            .db
            .call(move |conn| teamtasks::get_check_and_put_status(conn, team_id, task_id))
            .await;

        if let Ok(Some((check_status, _))) = result {
            if check_status != NOT_CHECKED {
                return Some(check_status);
            }
        }

        if attempt < retries {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    None
}

pub async fn load_team_and_task(ctx: &Ctx, team_id: i64, task_id: i64) -> Result<(Team, Task), DbError> {
    ctx.db
        .call(move |conn| {
            let team = teams::get_team_by_id(conn, team_id)?
                .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            let task = tasks::get_task_by_id(conn, task_id)?
                .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            Ok((team, task))
        })
        .await
}

/// Record an action result for monitoring and put a checker update on the
/// live stream.
#[allow(clippy::too_many_arguments)]
pub fn record_action(
    ctx: &Ctx,
    action: Action,
    team_id: i64,
    task_id: i64,
    round: i64,
    status: &str,
    status_code: i64,
    public_message: &str,
    private_message: &str,
    flag: Option<String>,
) {
    let result = ActionResult {
        action: action.verb().to_string(),
        team_id,
        task_id,
        round,
        status: status.to_string(),
        status_code,
        public_message: teamtasks::clip(public_message, teamtasks::PUBLIC_MESSAGE_MAX).to_string(),
        private_message: teamtasks::clip(private_message, teamtasks::PRIVATE_MESSAGE_MAX).to_string(),
        timestamp: now_timestamp(),
        flag,
    };
    ctx.coordinator.record_action_result(&result);

    ctx.notifier.notify(LiveEvent::checker_update(CheckerNotice {
        team_id,
        task_id,
        round,
        action: result.action,
        status: result.status,
        public_message: result.public_message,
    }));
}

/// Best-effort CHECK_FAILED write for a handler that hit an infrastructure
/// error. The job is still considered done; the next round re-probes.
pub async fn record_handler_error(ctx: &Ctx, team_id: i64, task_id: i64, action: Action, error: &str) {
    let error = error.to_string();
    let outcome = ctx
        .db
        .call(move |conn| teamtasks::apply_error(conn, team_id, task_id, action, &error))
        .await;
    if let Err(err) = outcome {
        warn!(team_id, task_id, "failed to record {action} error: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_schedule_scales_with_round_time() {
        assert_eq!(max_retries(30), 2);
        assert_eq!(max_retries(60), 2);
        assert_eq!(max_retries(61), 3);
        assert_eq!(max_retries(120), 3);
        assert_eq!(max_retries(300), 5);
        assert_eq!(max_retries(600), 7);
    }

    #[test]
    fn backoff_is_clamped() {
        assert_eq!(initial_backoff(10), Duration::from_secs_f64(0.5));
        assert_eq!(initial_backoff(100), Duration::from_secs_f64(1.5));
        assert_eq!(initial_backoff(10_000), Duration::from_secs_f64(5.0));
    }

    #[test]
    fn wait_timeout_is_sixty_percent_of_the_round() {
        assert_eq!(check_wait_timeout(60), Duration::from_secs_f64(36.0));
    }

    #[test]
    fn blocking_failures() {
        assert!(is_blocking_failure(104));
        assert!(is_blocking_failure(110));
        assert!(!is_blocking_failure(101));
        assert!(!is_blocking_failure(103));
        assert!(!is_blocking_failure(NOT_CHECKED));
    }
}
