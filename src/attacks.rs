//! Flag submission pipeline: validation, scoring, notification.
//!
//! Each submitted flag runs the checks strictly in order; the first failure
//! produces that flag's message and the remaining flags in the request are
//! unaffected. The scoring procedure is the only step that writes.

use tracing::{info, warn};

use crate::context::Ctx;
use crate::database::{flags, teamtasks, tasks, teams};
use crate::game_state;
use crate::scoring;
use crate::store::keys;
use crate::structs::errors::SubmitError;
use crate::structs::events::{LiveEvent, StolenNotice, SubmissionNotice};
use crate::structs::flag::CachedFlag;
use crate::structs::status::TaskStatus;

/// Result of processing one submitted flag.
#[derive(Debug, Clone)]
pub struct AttackOutcome {
    pub submit_ok: bool,
    pub message: String,
    pub attacker_id: i64,
    pub victim_id: Option<i64>,
    pub task_id: Option<i64>,
    pub attacker_delta: f64,
    pub victim_delta: f64,
}

impl AttackOutcome {
    fn rejected(attacker_id: i64, error: &SubmitError) -> Self {
        Self {
            submit_ok: false,
            message: error.to_string(),
            attacker_id,
            victim_id: None,
            task_id: None,
            attacker_delta: 0.0,
            victim_delta: 0.0,
        }
    }
}

/// Validate and score one flag for `attacker_id`.
///
/// Emits a `flag_stolen` live event on success and a `flag_submission`
/// event either way.
pub async fn handle_attack(ctx: &Ctx, attacker_id: i64, flag_str: &str, current_round: i64) -> AttackOutcome {
    let outcome = match run_pipeline(ctx, attacker_id, flag_str, current_round).await {
        Ok(outcome) => outcome,
        Err(error) => {
            if matches!(error, SubmitError::Internal(_)) {
                warn!(attacker_id, flag = flag_str, "submission failed: {error}");
            }
            AttackOutcome::rejected(attacker_id, &error)
        }
    };

    ctx.notifier.notify(LiveEvent::flag_submission(SubmissionNotice {
        attacker_id,
        flag: flag_str.to_string(),
        ok: outcome.submit_ok,
        message: outcome.message.clone(),
    }));

    outcome
}

async fn run_pipeline(
    ctx: &Ctx,
    attacker_id: i64,
    flag_str: &str,
    current_round: i64,
) -> Result<AttackOutcome, SubmitError> {
    if current_round == -1 {
        return Err(SubmitError::GameNotAvailable);
    }

    let config = game_state::get_current_game_config(&ctx.db, &ctx.store)
        .await
        .map_err(|err| SubmitError::Internal(err.to_string()))?;

    if config.is_finished(current_round) {
        return Err(SubmitError::GameFinished);
    }

    // The cache is the lookup path: entries expire at twice the validity
    // window, so a miss means the flag never existed or is long dead.
    let cached = ctx
        .store
        .get(&keys::flag_by_str(flag_str))
        .and_then(|encoded| serde_json::from_str::<CachedFlag>(&encoded).ok())
        .ok_or(SubmitError::FlagInvalid)?;

    if cached.team_id == attacker_id {
        return Err(SubmitError::FlagYourOwn);
    }

    if current_round - cached.round > config.flag_lifetime {
        return Err(SubmitError::FlagTooOld);
    }

    if config.volga_attacks_mode {
        let task_id = cached.task_id;
        let cell = ctx
            .db
            .call(move |conn| teamtasks::get_teamtask(conn, attacker_id, task_id))
            .await
            .map_err(|err| SubmitError::Internal(err.to_string()))?;
        let up = cell.is_some_and(|tt| tt.status == TaskStatus::Up.code());
        if !up {
            return Err(SubmitError::ServiceIsDown);
        }
    }

    let flag_id = cached.id;
    let already = ctx
        .db
        .call(move |conn| flags::is_already_stolen(conn, flag_id, attacker_id))
        .await
        .map_err(|err| SubmitError::Internal(err.to_string()))?;
    if already {
        return Err(SubmitError::FlagAlreadyStolen);
    }

    let victim_id = cached.team_id;
    let task_id = cached.task_id;
    let scoring_config = config.clone();
    let delta = ctx
        .db
        .call(move |conn| {
            scoring::recalculate_rating(conn, attacker_id, victim_id, task_id, flag_id, &scoring_config, current_round)
        })
        .await
        .map_err(|err| match err {
            // Lost the race against a concurrent submission of the same flag.
            crate::structs::errors::DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                SubmitError::FlagAlreadyStolen
            }
            other => SubmitError::Internal(other.to_string()),
        })?;

    info!(
        attacker_id,
        victim_id,
        task_id,
        flag = flag_str,
        attacker_delta = delta.attacker,
        "flag accepted"
    );
    notify_stolen(ctx, attacker_id, victim_id, task_id, delta.attacker).await;

    Ok(AttackOutcome {
        submit_ok: true,
        message: format!("Flag accepted! Earned {:.2} flag points!", delta.attacker),
        attacker_id,
        victim_id: Some(victim_id),
        task_id: Some(task_id),
        attacker_delta: delta.attacker,
        victim_delta: delta.victim,
    })
}

async fn notify_stolen(ctx: &Ctx, attacker_id: i64, victim_id: i64, task_id: i64, points: f64) {
    let names = ctx
        .db
        .call(move |conn| {
            let attacker = teams::get_team_by_id(conn, attacker_id)?;
            let victim = teams::get_team_by_id(conn, victim_id)?;
            let task = tasks::get_task_by_id(conn, task_id)?;
            Ok((attacker, victim, task))
        })
        .await;

    let Ok((Some(attacker), Some(victim), Some(task))) = names else {
        warn!(attacker_id, victim_id, task_id, "could not resolve names for flag_stolen event");
        return;
    };

    ctx.notifier.notify(LiveEvent::flag_stolen(StolenNotice {
        attacker_id,
        attacker_name: attacker.name,
        victim_id,
        victim_name: victim.name,
        task_id,
        task_name: task.name,
        points: (points * 100.0).round() / 100.0,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::structs::flag::Flag;
    use std::time::Duration;

    /// Seed two teams, one task and a flag planted on team 3 in `round`.
    async fn seeded_ctx(flag_round: i64) -> (Ctx, Flag) {
        let ctx = Context::for_tests();
        ctx.db
            .with_conn(|conn| {
                conn.execute_batch(
                    "INSERT INTO gameconfig (id, game_running, game_hardness, max_round, round_time,
                                             real_round, flag_prefix, flag_lifetime, inflation,
                                             volga_attacks_mode, timezone, start_time)
                     VALUES (1, 1, 10, 100, 60, 3, 'FLAG', 5, 0, 0, 'UTC', 0);
                     INSERT INTO teams (id, name, ip, token) VALUES (2, 'attacker', '10.0.0.2', 'aa11');
                     INSERT INTO teams (id, name, ip, token) VALUES (3, 'victim', '10.0.0.3', 'bb22');
                     INSERT INTO tasks (id, name, checker, env_path, gets, puts, places, checker_timeout,
                                        checker_type, default_score)
                     VALUES (1, 'web', '/c', '', 1, 1, 1, 10, 'hackerdom', 2500);
                     INSERT INTO teamtasks (team_id, task_id, score) VALUES (2, 1, 2500);
                     INSERT INTO teamtasks (team_id, task_id, score) VALUES (3, 1, 2500);",
                )
            })
            .unwrap();

        let flag = Flag {
            id: 0,
            flag: "FLAG0123456789abcdef0123456789abcdef".into(),
            team_id: 3,
            task_id: 1,
            round: flag_round,
            public_flag_data: "1".into(),
            private_flag_data: "priv".into(),
            vuln_number: Some(1),
        };
        let flag = ctx
            .db
            .call({
                let flag = flag.clone();
                move |conn| crate::database::flags::insert_flag(conn, &flag)
            })
            .await
            .unwrap();
        ctx.store.set_ex(
            &keys::flag_by_str(&flag.flag),
            serde_json::to_string(&CachedFlag::from(&flag)).unwrap(),
            Duration::from_secs(600),
        );
        (ctx, flag)
    }

    #[tokio::test]
    async fn own_flag_is_rejected_without_db_change() {
        let (ctx, flag) = seeded_ctx(3).await;
        let outcome = handle_attack(&ctx, 3, &flag.flag, 3).await;
        assert!(!outcome.submit_ok);
        assert_eq!(outcome.message, "Flag is your own");

        let count: i64 = ctx
            .db
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM stolenflags", [], |r| r.get(0)))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn expired_flag_is_rejected() {
        let (ctx, flag) = seeded_ctx(2).await;
        // lifetime 5, planted round 2, current 9.
        let outcome = handle_attack(&ctx, 2, &flag.flag, 9).await;
        assert_eq!(outcome.message, "Flag is too old");
    }

    #[tokio::test]
    async fn unknown_flag_is_invalid() {
        let (ctx, _) = seeded_ctx(3).await;
        let outcome = handle_attack(&ctx, 2, "FLAGdoesnotexist", 3).await;
        assert_eq!(outcome.message, "Flag is invalid or too old.");
    }

    #[tokio::test]
    async fn round_minus_one_means_game_not_available() {
        let (ctx, flag) = seeded_ctx(3).await;
        let outcome = handle_attack(&ctx, 2, &flag.flag, -1).await;
        assert_eq!(outcome.message, "Game is not available.");
    }

    #[tokio::test]
    async fn finished_game_rejects_flags() {
        let (ctx, flag) = seeded_ctx(3).await;
        let outcome = handle_attack(&ctx, 2, &flag.flag, 101).await;
        assert_eq!(outcome.message, "Game has finished. No more flags accepted.");
    }

    #[tokio::test]
    async fn volga_mode_requires_the_attacker_service_up() {
        let (ctx, flag) = seeded_ctx(3).await;
        ctx.db
            .call(|conn| {
                conn.execute("UPDATE gameconfig SET volga_attacks_mode = 1", [])?;
                conn.execute("UPDATE teamtasks SET status = 104 WHERE team_id = 2", [])?;
                Ok(())
            })
            .await
            .unwrap();
        ctx.store.del(keys::game_config());

        let outcome = handle_attack(&ctx, 2, &flag.flag, 3).await;
        assert_eq!(outcome.message, "Cannot submit flags while service is down");

        // Service back up: the same flag is accepted.
        ctx.db
            .call(|conn| {
                conn.execute("UPDATE teamtasks SET status = 101 WHERE team_id = 2", [])?;
                Ok(())
            })
            .await
            .unwrap();
        let outcome = handle_attack(&ctx, 2, &flag.flag, 3).await;
        assert!(outcome.submit_ok, "{}", outcome.message);
    }

    #[tokio::test]
    async fn double_submission_scores_exactly_once() {
        let (ctx, flag) = seeded_ctx(3).await;

        let first = handle_attack(&ctx, 2, &flag.flag, 3).await;
        assert!(first.submit_ok);
        assert!(first.message.starts_with("Flag accepted! Earned "));
        assert!(first.attacker_delta > 0.0);

        let scores_after_first: (f64, f64) = ctx
            .db
            .call(|conn| {
                conn.query_row(
                    "SELECT (SELECT score FROM teamtasks WHERE team_id = 2),
                            (SELECT score FROM teamtasks WHERE team_id = 3)",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
            })
            .await
            .unwrap();

        let second = handle_attack(&ctx, 2, &flag.flag, 3).await;
        assert!(!second.submit_ok);
        assert_eq!(second.message, "Flag already stolen");

        // Scores unchanged, exactly one StolenFlag row.
        let scores_after_second: (f64, f64) = ctx
            .db
            .call(|conn| {
                conn.query_row(
                    "SELECT (SELECT score FROM teamtasks WHERE team_id = 2),
                            (SELECT score FROM teamtasks WHERE team_id = 3)",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
            })
            .await
            .unwrap();
        assert_eq!(scores_after_first, scores_after_second);

        let count: i64 = ctx
            .db
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM stolenflags", [], |r| r.get(0)))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn deltas_match_the_net_score_changes() {
        let (ctx, flag) = seeded_ctx(3).await;
        let before: (f64, f64) = ctx
            .db
            .call(|conn| {
                conn.query_row(
                    "SELECT (SELECT score FROM teamtasks WHERE team_id = 2),
                            (SELECT score FROM teamtasks WHERE team_id = 3)",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
            })
            .await
            .unwrap();

        let outcome = handle_attack(&ctx, 2, &flag.flag, 3).await;
        assert!(outcome.submit_ok);

        let after: (f64, f64) = ctx
            .db
            .call(|conn| {
                conn.query_row(
                    "SELECT (SELECT score FROM teamtasks WHERE team_id = 2),
                            (SELECT score FROM teamtasks WHERE team_id = 3)",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
            })
            .await
            .unwrap();

        assert!((after.0 - before.0 - outcome.attacker_delta).abs() < 1e-9);
        assert!((after.1 - before.1 - outcome.victim_delta).abs() < 1e-9);
    }
}
