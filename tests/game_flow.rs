//! End-to-end round flow against fixture checker scripts: CHECK opens the
//! barrier, PUT plants and caches a flag, GET retrieves it, and failures
//! cascade the way the aggregate-status table says they should.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;

use adarena::context::{Context, Ctx};
use adarena::database::{flags, teamtasks};
use adarena::store::{keys, Job};
use adarena::worker;

/// Seed one team and one task whose checker is `script_body` (a shell
/// fragment; `$1` is the action, `$3` the flag for put/get).
fn seed(ctx: &Ctx, dir: &std::path::Path, script_body: &str) {
    let script = dir.join("checker.sh");
    let mut file = std::fs::File::create(&script).unwrap();
    writeln!(file, "#!/bin/sh\n{script_body}").unwrap();
    let mut perms = file.metadata().unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script, perms).unwrap();

    let checker = script.to_string_lossy().into_owned();
    ctx.db
        .with_conn(move |conn| {
            conn.execute_batch(&format!(
                "INSERT INTO gameconfig (id, game_running, game_hardness, max_round, round_time,
                                         real_round, flag_prefix, flag_lifetime, inflation,
                                         volga_attacks_mode, timezone, start_time)
                 VALUES (1, 1, 10, 300, 60, 1, 'FLAG', 5, 1, 0, 'UTC', 0);
                 INSERT INTO teams (id, name, ip, token) VALUES (4, 'delta', '127.0.0.1', 'dd44dd44dd44dd44');
                 INSERT INTO tasks (id, name, checker, env_path, gets, puts, places, checker_timeout,
                                    checker_type, default_score)
                 VALUES (1, 'web', '{checker}', '', 1, 1, 1, 5, 'hackerdom', 2500);
                 INSERT INTO teamtasks (team_id, task_id, score) VALUES (4, 1, 2500);"
            ))
        })
        .unwrap();
}

fn cell(ctx: &Ctx) -> adarena::structs::teamtask::TeamTask {
    ctx.db
        .with_conn(|conn| teamtasks::get_teamtask(conn, 4, 1))
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn healthy_round_runs_check_put_get() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Context::for_tests();
    seed(&ctx, dir.path(), "echo all good; exit 101");

    worker::dispatch(&ctx, Job::Check { team_id: 4, task_id: 1, round: 1 }).await;
    let tt = cell(&ctx);
    assert_eq!(tt.check_status, 101);
    assert_eq!((tt.checks, tt.checks_passed), (1, 1));
    assert_eq!(tt.status, 101);

    worker::dispatch(&ctx, Job::Put { team_id: 4, task_id: 1, round: 1 }).await;
    let tt = cell(&ctx);
    assert_eq!(tt.put_status, 101);

    // The PUT persisted a flag and cached it for submissions.
    let flag = ctx
        .db
        .with_conn(|conn| flags::get_random_round_flag(conn, 4, 1, 1, 1))
        .unwrap()
        .expect("PUT should have planted a flag");
    assert!(flag.flag.starts_with("FLAG"));
    assert!(ctx.store.get(&keys::flag_by_str(&flag.flag)).is_some());

    worker::dispatch(&ctx, Job::Get { team_id: 4, task_id: 1, round: 1, flag_id: flag.id }).await;
    let tt = cell(&ctx);
    assert_eq!(tt.get_status, 101);
    assert_eq!(tt.status, 101);
    assert_eq!(tt.public_message, "Service operational");

    // All three actions recorded for the round.
    let results = ctx.coordinator.get_round_results(4, 1, 1);
    assert_eq!(results.len(), 3);
    assert!(ctx.coordinator.is_round_complete(4, 1, 1));
}

#[tokio::test]
async fn down_service_cascades_to_put_and_get() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Context::for_tests();
    seed(&ctx, dir.path(), "echo unreachable; exit 104");

    worker::dispatch(&ctx, Job::Check { team_id: 4, task_id: 1, round: 1 }).await;
    worker::dispatch(&ctx, Job::Put { team_id: 4, task_id: 1, round: 1 }).await;
    worker::dispatch(&ctx, Job::Get { team_id: 4, task_id: 1, round: 1, flag_id: 999 }).await;

    let tt = cell(&ctx);
    assert_eq!(tt.check_status, 104);
    // PUT and GET inherited the failing code without running the checker.
    assert_eq!(tt.put_status, 104);
    assert_eq!(tt.get_status, 104);
    assert_eq!(tt.status, 104);
    assert_eq!(tt.public_message, "Service is down");

    // No flag was planted.
    let flag = ctx
        .db
        .with_conn(|conn| flags::get_random_round_flag(conn, 4, 1, 1, 1))
        .unwrap();
    assert!(flag.is_none());

    // Monitoring saw the skips.
    let results = ctx.coordinator.get_round_results(4, 1, 1);
    assert_eq!(results["put"].status, "SKIPPED");
    assert_eq!(results["get"].status, "SKIPPED");
}

#[tokio::test]
async fn failed_get_reads_as_mumble() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Context::for_tests();
    // Healthy except for get.
    seed(&ctx, dir.path(), "if [ \"$1\" = get ]; then exit 110; fi; exit 101");

    worker::dispatch(&ctx, Job::Check { team_id: 4, task_id: 1, round: 1 }).await;
    worker::dispatch(&ctx, Job::Put { team_id: 4, task_id: 1, round: 1 }).await;
    let flag = ctx
        .db
        .with_conn(|conn| flags::get_random_round_flag(conn, 4, 1, 1, 1))
        .unwrap()
        .unwrap();
    worker::dispatch(&ctx, Job::Get { team_id: 4, task_id: 1, round: 1, flag_id: flag.id }).await;

    let tt = cell(&ctx);
    assert_eq!(tt.get_status, 110);
    assert_eq!(tt.status, 103);
    assert_eq!(tt.public_message, "Service mumble (GET failed)");
}

#[tokio::test]
async fn rerunning_check_is_idempotent_on_the_aggregate() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Context::for_tests();
    seed(&ctx, dir.path(), "exit 101");

    worker::dispatch(&ctx, Job::Check { team_id: 4, task_id: 1, round: 1 }).await;
    let first = cell(&ctx);

    // At-least-once delivery: the same job again.
    worker::dispatch(&ctx, Job::Check { team_id: 4, task_id: 1, round: 1 }).await;
    let second = cell(&ctx);

    assert_eq!(second.status, first.status);
    assert_eq!(second.check_status, first.check_status);
    // Counters inflate by one, nothing else moves.
    assert_eq!(second.checks, first.checks + 1);
    assert_eq!(second.checks_passed, first.checks_passed + 1);
    assert_eq!(second.score, first.score);
}

#[tokio::test]
async fn missing_flag_on_get_is_mumble() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Context::for_tests();
    seed(&ctx, dir.path(), "exit 101");

    worker::dispatch(&ctx, Job::Check { team_id: 4, task_id: 1, round: 1 }).await;
    worker::dispatch(&ctx, Job::Put { team_id: 4, task_id: 1, round: 1 }).await;
    worker::dispatch(&ctx, Job::Get { team_id: 4, task_id: 1, round: 1, flag_id: 424242 }).await;

    let tt = cell(&ctx);
    assert_eq!(tt.get_status, 103);
    assert_eq!(tt.get_message, "Flag not found");
    assert_eq!(tt.status, 103);
}
