//! Game clock: starts the tournament at the configured instant and advances
//! rounds at fixed intervals.
//!
//! Single-writer by contract: exactly one ticker may run. Both scheduled
//! actions persist their last-run instant, so a killed and restarted ticker
//! neither double-starts the game nor double-advances a round.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::context::Ctx;
use crate::database::{game, schedules, teams, tasks, teamtasks};
use crate::game_state;
use crate::structs::errors::DbError;
use crate::structs::events::LiveEvent;
use crate::worker;

/// Poll interval of the clock loop.
const TICK_POLL: std::time::Duration = std::time::Duration::from_millis(100);

pub struct Ticker {
    ctx: Ctx,
    game_started: bool,
    /// Set once max_round is exceeded; no further ticks fire.
    finished: bool,
    start_time: DateTime<Utc>,
    round_interval: ChronoDuration,
    last_start_check: Option<DateTime<Utc>>,
    last_round_check: Option<DateTime<Utc>>,
}

impl Ticker {
    /// Load game config and schedule history.
    pub async fn initialize(ctx: Ctx) -> Result<Self, DbError> {
        let config = ctx.db.call(|conn| game::get_game_config(conn)).await?;
        let game_started = config.game_running;

        let (last_start_check, last_round_check) = ctx
            .db
            .call(|conn| {
                Ok((
                    schedules::get_last_run(conn, schedules::START_GAME)?,
                    schedules::get_last_run(conn, schedules::ROUNDS)?,
                ))
            })
            .await?;

        info!(game_started, start_time = %config.start_time, round_time = config.round_time, "ticker initialized");

        Ok(Self {
            ctx,
            game_started,
            finished: false,
            start_time: config.start_time,
            round_interval: ChronoDuration::seconds(config.round_time),
            last_start_check,
            last_round_check,
        })
    }

    /// Main clock loop; checks gates every 100 ms until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("ticker started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(TICK_POLL) => {}
                _ = shutdown.changed() => break,
            }

            let now = Utc::now();
            if let Err(err) = self.check_start_game(now).await {
                error!("ticker start gate error: {err}");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
            if let Err(err) = self.check_round_tick(now).await {
                error!("ticker round gate error: {err}");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
        info!("ticker stopped");
    }

    /// Start gate: fire Start-Game exactly once when `start_time` passes.
    async fn check_start_game(&mut self, now: DateTime<Utc>) -> Result<(), DbError> {
        if self.game_started || now < self.start_time {
            return Ok(());
        }

        if self.last_start_check.is_some_and(|last| last >= self.start_time) {
            info!("start game already executed");
            self.game_started = true;
            return Ok(());
        }

        info!("starting game");
        self.start_game().await?;

        let ctx = self.ctx.clone();
        ctx.db
            .call(move |conn| schedules::save_last_run(conn, schedules::START_GAME, now))
            .await?;
        self.last_start_check = Some(now);
        self.game_started = true;
        Ok(())
    }

    /// Start-Game: flip `game_running`, warm the caches, snapshot round 0
    /// and enqueue the initial checks.
    async fn start_game(&self) -> Result<(), DbError> {
        let ctx = &self.ctx;

        let already_started = ctx.db.call(|conn| game::get_game_running(conn)).await?;
        if already_started {
            warn!("game already started");
            return Ok(());
        }

        game_state::set_round_start(&ctx.store, 0);
        ctx.db.call(|conn| game::set_game_running(conn, true)).await?;

        info!("caching teams, tasks and config");
        game_state::cache_teams(&ctx.db, &ctx.store).await?;
        game_state::cache_tasks(&ctx.db, &ctx.store).await?;
        game_state::cache_game_config(&ctx.db, &ctx.store).await?;

        info!("initializing game state for round 0");
        game_state::update_game_state(&ctx.db, &ctx.store, 0).await?;

        let stats = worker::submit_initial_checks(ctx).await?;
        info!(?stats, "initial checker jobs submitted");

        info!("=== game started ===");
        Ok(())
    }

    /// Tick gate: advance when `last_round + round_time` has passed.
    async fn check_round_tick(&mut self, now: DateTime<Utc>) -> Result<(), DbError> {
        if !self.game_started || self.finished {
            return Ok(());
        }

        let next_round_time = match self.last_round_check {
            Some(last) => last + self.round_interval,
            None => self.start_time + self.round_interval,
        };
        if now < next_round_time {
            return Ok(());
        }

        info!(%now, "processing round tick");
        self.process_round().await?;

        let ctx = self.ctx.clone();
        ctx.db
            .call(move |conn| schedules::save_last_run(conn, schedules::ROUNDS, now))
            .await?;
        self.last_round_check = Some(now);
        Ok(())
    }

    /// Advance `real_round`, refresh the derived state, archive the finished
    /// round and enqueue the next round's jobs.
    async fn process_round(&mut self) -> Result<(), DbError> {
        let ctx = &self.ctx;

        let current_round = ctx.db.call(|conn| game::get_real_round(conn)).await?;
        let config = game_state::get_current_game_config(&ctx.db, &ctx.store).await?;

        if config.is_finished(current_round) {
            info!(current_round, "reached max round, game finished");
            let final_round = game_state::update_round(&ctx.db, &ctx.store, current_round).await?;
            game_state::update_game_state(&ctx.db, &ctx.store, final_round).await?;
            self.finished = true;
            return Ok(());
        }

        info!(current_round, "processing round");
        let new_round = game_state::update_round(&ctx.db, &ctx.store, current_round).await?;

        game_state::update_game_state(&ctx.db, &ctx.store, new_round).await?;
        game_state::update_attack_data(&ctx.db, &ctx.store, new_round).await?;
        self.broadcast_scoreboard().await;

        // Archive the finished round before its scores keep moving.
        let ts = Utc::now().timestamp();
        ctx.db
            .call(move |conn| {
                let all_teams = teams::get_teams(conn)?;
                let all_tasks = tasks::get_tasks(conn)?;
                for team in &all_teams {
                    for task in &all_tasks {
                        teamtasks::log_to_history(conn, team.id, task.id, current_round, ts)?;
                    }
                }
                Ok(())
            })
            .await?;

        let stats = worker::submit_round_jobs(ctx, new_round).await?;
        info!(new_round, ?stats, "round ready");
        Ok(())
    }

    async fn broadcast_scoreboard(&self) {
        match game_state::construct_scoreboard(&self.ctx.db).await {
            Ok(board) => {
                self.ctx
                    .notifier
                    .notify(LiveEvent::scoreboard_update(board["state"].clone()));
            }
            Err(err) => error!("failed to broadcast scoreboard update: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::database::init_schema;
    use crate::store::Job;
    use chrono::TimeZone;

    async fn seeded_ctx(start_time: DateTime<Utc>, game_running: bool) -> Ctx {
        let ctx = Context::for_tests();
        let running = game_running as i64;
        let start_ts = start_time.timestamp();
        ctx.db
            .with_conn(move |conn| {
                init_schema(conn)?;
                conn.execute_batch(&format!(
                    "INSERT INTO gameconfig (id, game_running, game_hardness, max_round, round_time,
                                             real_round, flag_prefix, flag_lifetime, inflation,
                                             volga_attacks_mode, timezone, start_time)
                     VALUES (1, {running}, 10, 3, 60, 0, 'FLAG', 5, 1, 0, 'UTC', {start_ts});
                     INSERT INTO teams (id, name, ip, token) VALUES (1, 'alpha', '127.0.0.1', 'aa');
                     INSERT INTO tasks (id, name, checker, env_path, gets, puts, places, checker_timeout,
                                        checker_type, default_score)
                     VALUES (1, 'web', '/bin/true', '', 1, 1, 1, 5, 'hackerdom', 2500);
                     INSERT INTO teamtasks (team_id, task_id, score) VALUES (1, 1, 2500);"
                ))
            })
            .unwrap();
        ctx
    }

    #[tokio::test]
    async fn start_gate_fires_once_and_is_crash_safe() {
        let start = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        let ctx = seeded_ctx(start, false).await;

        let mut ticker = Ticker::initialize(ctx.clone()).await.unwrap();
        let now = start + ChronoDuration::seconds(1);
        ticker.check_start_game(now).await.unwrap();

        assert!(ticker.game_started);
        assert!(ctx.db.call(|c| game::get_game_running(c)).await.unwrap());
        assert!(matches!(ctx.jobs.recv().await, Some(Job::Check { round: 0, .. })));

        // A restarted ticker sees the persisted start_game run and does not
        // start again.
        let mut restarted = Ticker::initialize(ctx.clone()).await.unwrap();
        // Simulate the flag being lost but the schedule row surviving.
        restarted.game_started = false;
        ctx.db.call(|c| game::set_game_running(c, false)).await.unwrap();
        restarted.check_start_game(now + ChronoDuration::seconds(1)).await.unwrap();
        assert!(restarted.game_started);
        // start_game was not re-run: game_running stays false.
        assert!(!ctx.db.call(|c| game::get_game_running(c)).await.unwrap());
    }

    #[tokio::test]
    async fn tick_gate_respects_the_persisted_last_run() {
        let start = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        let ctx = seeded_ctx(start, true).await;

        let advance_instant = start + ChronoDuration::seconds(60);
        ctx.db
            .call(move |conn| schedules::save_last_run(conn, schedules::ROUNDS, advance_instant))
            .await
            .unwrap();

        let mut ticker = Ticker::initialize(ctx.clone()).await.unwrap();
        assert_eq!(ticker.last_round_check, Some(advance_instant));

        // advance_instant + epsilon: no second advance.
        ticker
            .check_round_tick(advance_instant + ChronoDuration::seconds(1))
            .await
            .unwrap();
        assert_eq!(ctx.db.call(|c| game::get_real_round(c)).await.unwrap(), 0);

        // advance_instant + round_time: the next advance fires.
        ticker
            .check_round_tick(advance_instant + ChronoDuration::seconds(60))
            .await
            .unwrap();
        assert_eq!(ctx.db.call(|c| game::get_real_round(c)).await.unwrap(), 1);
        assert_eq!(crate::game_state::get_real_round(&ctx.store), 1);
    }

    #[tokio::test]
    async fn max_round_halts_further_ticks() {
        let start = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        let ctx = seeded_ctx(start, true).await;
        // max_round = 3; put the game past it.
        ctx.db.call(|c| game::set_real_round(c, 4)).await.unwrap();

        let mut ticker = Ticker::initialize(ctx.clone()).await.unwrap();
        ticker.process_round().await.unwrap();

        assert!(ticker.finished);
        assert_eq!(ctx.db.call(|c| game::get_real_round(c)).await.unwrap(), 5);

        // Gate is closed now; time passing changes nothing.
        ticker
            .check_round_tick(start + ChronoDuration::seconds(600))
            .await
            .unwrap();
        assert_eq!(ctx.db.call(|c| game::get_real_round(c)).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn process_round_enqueues_checks_and_puts() {
        let start = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        let ctx = seeded_ctx(start, true).await;

        let mut ticker = Ticker::initialize(ctx.clone()).await.unwrap();
        ticker.process_round().await.unwrap();

        // 1 team x 1 task: one CHECK, one PUT; the GET is skipped because no
        // flag exists yet.
        let first = ctx.jobs.recv().await.unwrap();
        let second = ctx.jobs.recv().await.unwrap();
        assert!(matches!(first, Job::Check { round: 1, .. }));
        assert!(matches!(second, Job::Put { round: 1, .. }));

        // History row archived for round 0.
        let history: i64 = ctx
            .db
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM teamtaskslog WHERE round = 0", [], |r| r.get(0)))
            .await
            .unwrap();
        assert_eq!(history, 1);
    }
}
