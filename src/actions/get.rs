//! GET: retrieve a previously planted flag through the checker.
//!
//! Depends on both CHECK and PUT for the cell. PUT does not signal on the
//! bus (a round can carry several PUTs), so the PUT status comes from
//! polling the authoritative row.

use tracing::{error, info, warn};

use crate::checker::CheckerRunner;
use crate::context::Ctx;
use crate::database::{flags, teamtasks};
use crate::game_state;
use crate::structs::status::{Action, NOT_CHECKED};

use super::helpers::{
    initial_backoff, is_blocking_failure, load_team_and_task, max_retries, record_action,
    record_handler_error, wait_for_check_completion,
};
use super::ActionOutcome;

pub async fn get_action(ctx: &Ctx, team_id: i64, task_id: i64, round: i64, flag_id: i64) -> ActionOutcome {
    info!(team_id, task_id, round, flag_id, "running GET");

    let mut check_status = wait_for_check_completion(ctx, team_id, task_id, round).await;

    // Poll the row until CHECK is determined, picking up the latest PUT
    // status along the way.
    let round_time = game_state::get_current_game_config(&ctx.db, &ctx.store)
        .await
        .map(|config| config.round_time)
        .unwrap_or(60);
    let mut put_status = None;
    let mut backoff = initial_backoff(round_time);
    let retries = max_retries(round_time);

    for attempt in 1..=retries {
        let row = ctx
            .db
            .call(move |conn| teamtasks::get_check_and_put_status(conn, team_id, task_id))
            .await;

        if let Ok(Some((check, put))) = row {
            if check != NOT_CHECKED {
                if check_status.is_none() {
                    check_status = Some(check);
                }
                put_status = Some(put);
                break;
            }
        }

        if attempt < retries {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    let check_failed = check_status.is_some_and(is_blocking_failure);
    let put_failed = put_status.is_some_and(is_blocking_failure);
    if check_failed || put_failed {
        let failed_action = if check_failed { "CHECK" } else { "PUT" };
        let code = if check_failed {
            check_status.unwrap_or(110)
        } else {
            put_status.unwrap_or(110)
        };
        info!(team_id, task_id, round, code, "{failed_action} failed, skipping GET");

        let message = format!("Skipped: {failed_action} failed");
        let skip = {
            let message = message.clone();
            ctx.db
                .call(move |conn| teamtasks::apply_skipped(conn, team_id, task_id, Action::Get, code, &message))
                .await
        };
        if let Err(err) = skip {
            error!(team_id, task_id, "failed to record skipped GET: {err}");
        }

        record_action(
            ctx,
            Action::Get,
            team_id,
            task_id,
            round,
            "SKIPPED",
            code,
            "Service issues, GET skipped",
            &message,
            None,
        );
        return ActionOutcome::new("SKIPPED", "Service issues, GET skipped", message);
    }

    let run = async {
        let flag = ctx.db.call(move |conn| flags::get_flag_by_id(conn, flag_id)).await?;

        let Some(flag) = flag else {
            warn!(flag_id, "flag not found for GET");
            ctx.db
                .call(move |conn| {
                    teamtasks::apply_action_result(
                        conn, team_id, task_id, Action::Get, 103, "Flag not found", "", "",
                    )
                })
                .await?;
            return Ok(None);
        };

        let (team, task) = load_team_and_task(ctx, team_id, task_id).await?;
        let verdict = CheckerRunner {
            team: &team,
            task: &task,
            flag: Some(&flag),
        }
        .get(&ctx.checkers)
        .await;

        let status_code = verdict.status.code();
        let (public, private, command) = (
            verdict.public_message.clone(),
            verdict.private_message.clone(),
            verdict.command.clone(),
        );
        ctx.db
            .call(move |conn| {
                teamtasks::apply_action_result(
                    conn, team_id, task_id, Action::Get, status_code, &public, &private, &command,
                )
            })
            .await?;

        Ok::<_, crate::structs::errors::DbError>(Some(verdict))
    };

    match run.await {
        Ok(Some(verdict)) => {
            info!(flag_id, status = %verdict.status, "GET completed");
            record_action(
                ctx,
                Action::Get,
                team_id,
                task_id,
                round,
                verdict.status.name(),
                verdict.status.code(),
                &verdict.public_message,
                &verdict.private_message,
                None,
            );
            ActionOutcome::new(verdict.status.name(), verdict.public_message, verdict.private_message)
        }
        Ok(None) => {
            record_action(
                ctx,
                Action::Get,
                team_id,
                task_id,
                round,
                "MUMBLE",
                103,
                "Flag not found",
                &format!("Flag id {flag_id} not in database"),
                None,
            );
            ActionOutcome::new("MUMBLE", "Flag not found", format!("Flag id {flag_id} not in database"))
        }
        Err(err) => {
            error!(team_id, task_id, round, flag_id, "GET failed: {err}");
            record_handler_error(ctx, team_id, task_id, Action::Get, &err.to_string()).await;
            record_action(
                ctx,
                Action::Get,
                team_id,
                task_id,
                round,
                "CHECK_FAILED",
                110,
                "GET action failed",
                &err.to_string(),
                None,
            );
            ActionOutcome::new("CHECK_FAILED", "GET action failed", err.to_string())
        }
    }
}
