//! CHECK: probe service health and open the round's barrier for PUT/GET.

use tracing::{error, info};

use crate::checker::CheckerRunner;
use crate::context::Ctx;
use crate::database::teamtasks;
use crate::structs::status::Action;

use super::helpers::{load_team_and_task, record_action, record_handler_error};
use super::ActionOutcome;

/// Run the CHECK for one (team, task) cell.
///
/// The per-action columns, SLA counters and the aggregate status land in a
/// single UPDATE; only after that commit do we signal completion, so PUT/GET
/// can never observe the barrier open against an un-persisted CHECK.
pub async fn check_action(ctx: &Ctx, team_id: i64, task_id: i64, round: i64) -> ActionOutcome {
    info!(team_id, task_id, round, "running CHECK");

    let run = async {
        let (team, task) = load_team_and_task(ctx, team_id, task_id).await?;

        let verdict = CheckerRunner {
            team: &team,
            task: &task,
            flag: None,
        }
        .check(&ctx.checkers)
        .await;

        let status_code = verdict.status.code();
        let (public, private, command) = (
            verdict.public_message.clone(),
            verdict.private_message.clone(),
            verdict.command.clone(),
        );
        ctx.db
            .call(move |conn| {
                teamtasks::apply_check_result(conn, team_id, task_id, status_code, &public, &private, &command)
            })
            .await?;

        Ok::<_, crate::structs::errors::DbError>(verdict)
    };

    let (status_code, outcome) = match run.await {
        Ok(verdict) => {
            info!(team_id, task_id, round, status = %verdict.status, "CHECK completed");
            (
                verdict.status.code(),
                ActionOutcome::new(verdict.status.name(), verdict.public_message, verdict.private_message),
            )
        }
        Err(err) => {
            error!(team_id, task_id, round, "CHECK failed: {err}");
            record_handler_error(ctx, team_id, task_id, Action::Check, &err.to_string()).await;
            (
                110,
                ActionOutcome::new("CHECK_FAILED", "CHECK action failed", err.to_string()),
            )
        }
    };

    // Post-commit, unconditionally: waiters must learn the outcome even on
    // the error path, or every PUT/GET of the cell blocks until timeout.
    ctx.coordinator.signal_check_complete(team_id, task_id, round, status_code);
    record_action(
        ctx,
        Action::Check,
        team_id,
        task_id,
        round,
        &outcome.status,
        status_code,
        &outcome.public_message,
        &outcome.private_message,
        None,
    );

    outcome
}
