//! PUT: plant a fresh flag on a service once its CHECK came back healthy.

use std::time::Duration;

use tracing::{error, info};

use crate::checker::CheckerRunner;
use crate::context::Ctx;
use crate::database::{flags, teamtasks};
use crate::game_state;
use crate::store::keys;
use crate::structs::flag::{CachedFlag, Flag};
use crate::structs::status::Action;

use super::helpers::{is_blocking_failure, load_team_and_task, record_action, record_handler_error, wait_for_check_completion};
use super::ActionOutcome;

pub async fn put_action(ctx: &Ctx, team_id: i64, task_id: i64, round: i64) -> ActionOutcome {
    info!(team_id, task_id, round, "running PUT");

    // Barrier: no point planting flags on a service that is down, and the
    // CHECK row must be durable before we touch the same cell.
    let check_status = wait_for_check_completion(ctx, team_id, task_id, round).await;

    // An unknown CHECK (wait and fallback both exhausted) skips as well,
    // inheriting CHECK_FAILED.
    let inherited = match check_status {
        Some(code) if !is_blocking_failure(code) => None,
        Some(code) => Some((code, format!("CHECK status: {code}"))),
        None => Some((110, "CHECK result unknown".to_string())),
    };

    if let Some((code, detail)) = inherited {
        info!(team_id, task_id, round, code, "CHECK failed, skipping PUT");
        let skip = ctx
            .db
            .call(move |conn| {
                teamtasks::apply_skipped(conn, team_id, task_id, Action::Put, code, "Skipped: CHECK failed")
            })
            .await;
        if let Err(err) = skip {
            error!(team_id, task_id, "failed to record skipped PUT: {err}");
        }

        record_action(
            ctx,
            Action::Put,
            team_id,
            task_id,
            round,
            "SKIPPED",
            code,
            "Service down, PUT skipped",
            &detail,
            None,
        );
        return ActionOutcome::new("SKIPPED", "Service down, PUT skipped", detail);
    }

    let run = async {
        let (team, task) = load_team_and_task(ctx, team_id, task_id).await?;
        let config = game_state::get_current_game_config(&ctx.db, &ctx.store).await?;

        let flag = Flag::generate(team_id, task_id, round, &task, &config);
        let flag = ctx.db.call(move |conn| flags::insert_flag(conn, &flag)).await?;

        // Cache for submission lookups; twice the validity window.
        let cache_ttl = Duration::from_secs((2 * config.flag_lifetime * config.round_time).max(1) as u64);
        if let Ok(encoded) = serde_json::to_string(&CachedFlag::from(&flag)) {
            ctx.store.set_ex(&keys::flag_by_str(&flag.flag), encoded, cache_ttl);
        }

        let verdict = CheckerRunner {
            team: &team,
            task: &task,
            flag: Some(&flag),
        }
        .put(&ctx.checkers)
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
                    conn, team_id, task_id, Action::Put, status_code, &public, &private, &command,
                )
            })
            .await?;

        Ok::<_, crate::structs::errors::DbError>((verdict, flag))
    };

    match run.await {
        Ok((verdict, flag)) => {
            info!(team_id, task_id, round, status = %verdict.status, "PUT completed");
            record_action(
                ctx,
                Action::Put,
                team_id,
                task_id,
                round,
                verdict.status.name(),
                verdict.status.code(),
                &verdict.public_message,
                &verdict.private_message,
                Some(flag.flag.clone()),
            );
            let mut outcome =
                ActionOutcome::new(verdict.status.name(), verdict.public_message, verdict.private_message);
            outcome.flag = Some(flag.flag);
            outcome
        }
        Err(err) => {
            error!(team_id, task_id, round, "PUT failed: {err}");
            record_handler_error(ctx, team_id, task_id, Action::Put, &err.to_string()).await;
            record_action(
                ctx,
                Action::Put,
                team_id,
                task_id,
                round,
                "CHECK_FAILED",
                110,
                "PUT action failed",
                &err.to_string(),
                None,
            );
            ActionOutcome::new("CHECK_FAILED", "PUT action failed", err.to_string())
        }
    }
}
