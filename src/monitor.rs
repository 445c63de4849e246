//! Round monitor: progress and health aggregation over the coordinator's
//! records. Read-only; the admin monitoring endpoints call straight into
//! these queries.

use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::context::Ctx;
use crate::database::{game, tasks, teams};
use crate::structs::errors::DbError;

/// Cadence of the background logging loop.
const MONITOR_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// A round counts as complete once 95 % of expected actions reported.
const COMPLETION_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, Serialize)]
pub struct RoundCompletion {
    pub round: i64,
    pub completed: bool,
    pub progress: f64,
    pub expected_actions: usize,
    pub completed_actions: usize,
    pub expected_breakdown: ExpectedBreakdown,
    pub completed_breakdown: std::collections::BTreeMap<String, usize>,
    pub by_status: std::collections::BTreeMap<String, usize>,
    pub errors: Vec<crate::coordinator::ErrorEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpectedBreakdown {
    pub check: usize,
    pub put: usize,
    pub get: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalHealth {
    pub game_running: bool,
    pub current_round: i64,
    pub health: &'static str,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_actions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_actions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
}

/// Completion ratio of `round` against the expected probe matrix.
pub async fn get_round_completion_status(ctx: &Ctx, round: i64) -> Result<RoundCompletion, DbError> {
    let (team_count, task_list) = ctx
        .db
        .call(|conn| Ok((teams::get_teams(conn)?.len(), tasks::get_tasks(conn)?)))
        .await?;

    let expected_checks = team_count * task_list.len();
    let expected_puts: usize = task_list.iter().map(|task| task.puts as usize).sum::<usize>() * team_count;
    let expected_gets: usize = task_list.iter().map(|task| task.gets as usize).sum::<usize>() * team_count;
    let expected_total = expected_checks + expected_puts + expected_gets;

    let summary = ctx.coordinator.get_round_summary(round);
    let completed_total = summary.total_actions;

    let progress = if expected_total > 0 {
        completed_total as f64 / expected_total as f64
    } else {
        0.0
    };

    Ok(RoundCompletion {
        round,
        completed: progress >= COMPLETION_THRESHOLD,
        progress,
        expected_actions: expected_total,
        completed_actions: completed_total,
        expected_breakdown: ExpectedBreakdown {
            check: expected_checks,
            put: expected_puts,
            get: expected_gets,
        },
        completed_breakdown: summary.by_action,
        by_status: summary.by_status,
        errors: summary.errors,
    })
}

/// Detailed per-cell status: the CHECK result plus every PUT/GET recorded.
pub fn get_team_task_status(ctx: &Ctx, team_id: i64, task_id: i64, round: i64) -> serde_json::Value {
    let results = ctx.coordinator.get_round_results(team_id, task_id, round);

    let mut status = json!({
        "team_id": team_id,
        "task_id": task_id,
        "round": round,
        "check": null,
        "puts": [],
        "gets": [],
        "overall_status": "PENDING",
    });

    if let Some(check) = results.get("check") {
        status["check"] = json!({
            "status": check.status,
            "message": check.public_message,
            "timestamp": check.timestamp,
        });
        status["overall_status"] = json!(check.status);
    }

    for (action, result) in &results {
        if action.starts_with("put") {
            status["puts"].as_array_mut().unwrap().push(json!({
                "status": result.status,
                "flag": result.flag,
                "timestamp": result.timestamp,
            }));
        } else if action.starts_with("get") {
            status["gets"].as_array_mut().unwrap().push(json!({
                "status": result.status,
                "timestamp": result.timestamp,
            }));
        }
    }

    status
}

/// Overall game health from the current round's error rate.
pub async fn get_global_health(ctx: &Ctx) -> Result<GlobalHealth, DbError> {
    let (current_round, game_running) = ctx
        .db
        .call(|conn| Ok((game::get_real_round(conn)?, game::get_game_running(conn)?)))
        .await?;

    if current_round == 0 {
        return Ok(GlobalHealth {
            game_running,
            current_round: 0,
            health: "WAITING",
            message: Some("Game not started yet".into()),
            progress: None,
            completed_actions: None,
            expected_actions: None,
            error_count: None,
            error_rate: None,
        });
    }

    let completion = get_round_completion_status(ctx, current_round).await?;
    let error_rate = completion.errors.len() as f64 / completion.completed_actions.max(1) as f64;

    let health = if error_rate < 0.05 {
        "HEALTHY"
    } else if error_rate < 0.15 {
        "DEGRADED"
    } else {
        "CRITICAL"
    };

    Ok(GlobalHealth {
        game_running,
        current_round,
        health,
        message: None,
        progress: Some(completion.progress),
        completed_actions: Some(completion.completed_actions),
        expected_actions: Some(completion.expected_actions),
        error_count: Some(completion.errors.len()),
        error_rate: Some(error_rate),
    })
}

/// Background loop logging round progress every 5 seconds.
pub async fn run(ctx: Ctx, mut shutdown: watch::Receiver<bool>) {
    info!("round monitor started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(MONITOR_INTERVAL) => {}
            _ = shutdown.changed() => break,
        }

        let current_round = match ctx.db.call(|conn| game::get_real_round(conn)).await {
            Ok(round) => round,
            Err(err) => {
                error!("round monitor database error: {err}");
                continue;
            }
        };
        if current_round == 0 {
            continue;
        }

        let summary = ctx.coordinator.get_round_summary(current_round);
        if !summary.errors.is_empty() {
            warn!(
                round = current_round,
                errors = summary.errors.len(),
                by_status = ?summary.by_status,
                "round has errors"
            );
            for event in summary.errors.iter().take(5) {
                warn!(
                    team_id = event.team_id,
                    task_id = event.task_id,
                    "  - {} {}: {}",
                    event.action.to_uppercase(),
                    event.status,
                    event.message
                );
            }
        }

        if summary.total_actions > 0 {
            debug!(
                round = current_round,
                total = summary.total_actions,
                check = summary.by_action.get("check").copied().unwrap_or(0),
                put = summary.by_action.get("put").copied().unwrap_or(0),
                get = summary.by_action.get("get").copied().unwrap_or(0),
                "round progress"
            );
        }
    }
    info!("round monitor stopped");
}
