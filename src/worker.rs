//! Worker pool: drains the job queue and runs the action handlers.
//!
//! Also home to the job submission side used by the ticker. Delivery is
//! at-least-once; the handlers' single-statement updates make re-execution
//! safe (counters inflate, scoring does not corrupt). A job that fails is
//! never requeued; the next round re-probes the cell.

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::actions;
use crate::context::Ctx;
use crate::database::{flags, tasks, teams};
use crate::game_state;
use crate::store::Job;
use crate::structs::errors::DbError;

/// Tally of jobs enqueued for one round.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JobStats {
    pub round: i64,
    pub check_jobs: usize,
    pub put_jobs: usize,
    pub get_jobs: usize,
    /// GETs not enqueued because no flag was available in the window.
    pub skipped_gets: usize,
}

/// Enqueue the full probe set for `round`: one CHECK per active (team,
/// task), `task.puts` PUTs and up to `task.gets` GETs, each GET carrying a
/// random flag from the lifetime window.
pub async fn submit_round_jobs(ctx: &Ctx, round: i64) -> Result<JobStats, DbError> {
    let (teams, tasks) = active_teams_and_tasks(ctx).await?;
    let config = game_state::get_current_game_config(&ctx.db, &ctx.store).await?;
    let flag_lifetime = config.flag_lifetime;

    info!(round, teams = teams.len(), tasks = tasks.len(), "submitting round jobs");

    let mut stats = JobStats {
        round,
        ..JobStats::default()
    };

    for team in &teams {
        for task in &tasks {
            let (team_id, task_id) = (team.id, task.id);

            if ctx.jobs.enqueue(Job::Check { team_id, task_id, round }) {
                stats.check_jobs += 1;
            }

            for _ in 0..task.puts {
                if ctx.jobs.enqueue(Job::Put { team_id, task_id, round }) {
                    stats.put_jobs += 1;
                }
            }

            for _ in 0..task.gets {
                let from_round = (round - flag_lifetime).max(1);
                let flag = ctx
                    .db
                    .call(move |conn| flags::get_random_round_flag(conn, team_id, task_id, from_round, round))
                    .await?;

                match flag {
                    Some(flag) => {
                        if ctx.jobs.enqueue(Job::Get {
                            team_id,
                            task_id,
                            round,
                            flag_id: flag.id,
                        }) {
                            stats.get_jobs += 1;
                        }
                    }
                    None => {
                        debug!(team_id, task_id, round, "no flag available, skipping GET");
                        stats.skipped_gets += 1;
                    }
                }
            }
        }
    }

    info!(?stats, "round jobs submitted");
    Ok(stats)
}

/// Round 0: health checks only, no flags exist yet.
pub async fn submit_initial_checks(ctx: &Ctx) -> Result<JobStats, DbError> {
    let (teams, tasks) = active_teams_and_tasks(ctx).await?;
    info!(teams = teams.len(), tasks = tasks.len(), "submitting initial checks");

    let mut stats = JobStats::default();
    for team in &teams {
        for task in &tasks {
            if ctx.jobs.enqueue(Job::Check {
                team_id: team.id,
                task_id: task.id,
                round: 0,
            }) {
                stats.check_jobs += 1;
            }
        }
    }
    Ok(stats)
}

async fn active_teams_and_tasks(
    ctx: &Ctx,
) -> Result<(Vec<crate::structs::team::Team>, Vec<crate::structs::task::Task>), DbError> {
    ctx.db
        .call(|conn| Ok((teams::get_teams(conn)?, tasks::get_tasks(conn)?)))
        .await
}

/// Run `max_jobs` consumers until shutdown.
pub async fn run_worker_pool(ctx: Ctx, shutdown: watch::Receiver<bool>) {
    let max_jobs = ctx.settings.runner.max_jobs.max(1);
    info!(max_jobs, "worker pool starting");

    let mut handles = Vec::with_capacity(max_jobs);
    for worker_id in 0..max_jobs {
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(worker_loop(ctx, shutdown, worker_id)));
    }

    for handle in handles {
        if let Err(err) = handle.await {
            error!("worker task panicked: {err}");
        }
    }
    info!("worker pool stopped");
}

async fn worker_loop(ctx: Ctx, mut shutdown: watch::Receiver<bool>, worker_id: usize) {
    loop {
        tokio::select! {
            job = ctx.jobs.recv() => {
                let Some(job) = job else { break };
                debug!(worker_id, ?job, "picked up job");
                dispatch(&ctx, job).await;
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!(worker_id, "worker exiting");
}

/// Run one job to completion.
pub async fn dispatch(ctx: &Ctx, job: Job) {
    let outcome = match job {
        Job::Check { team_id, task_id, round } => actions::check_action(ctx, team_id, task_id, round).await,
        Job::Put { team_id, task_id, round } => actions::put_action(ctx, team_id, task_id, round).await,
        Job::Get {
            team_id,
            task_id,
            round,
            flag_id,
        } => actions::get_action(ctx, team_id, task_id, round, flag_id).await,
    };
    debug!(status = %outcome.status, "job finished");
}
