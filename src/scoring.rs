//! Attack scoring: the `recalculate_rating` procedure.
//!
//! Runs as one IMMEDIATE transaction so the score updates, the counters and
//! the StolenFlag insert land together or not at all. The primary key on
//! (flag_id, attacker_id) serializes concurrent submissions of the same
//! flag: the loser of the race fails the insert and the whole transaction
//! rolls back.

use rusqlite::{named_params, params, Connection, TransactionBehavior};

use crate::structs::game::GameConfig;

/// Net score changes applied to the two TeamTask rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreDelta {
    pub attacker: f64,
    pub victim: f64,
}

/// Rank-aware value of a capture.
///
/// The gap between victim and attacker scores is normalized to [-1, 1];
/// beating a stronger team pays more, farming a weaker one pays less, with
/// `game_hardness` damping the spread. With inflation enabled the value
/// additionally grows as the game progresses.
fn attack_value(
    attacker_score: f64,
    victim_score: f64,
    default_score: i64,
    config: &GameConfig,
    current_round: i64,
) -> f64 {
    let hardness = config.game_hardness.max(1.0);
    let base = default_score as f64 / 100.0;

    let gap = (victim_score - attacker_score) / (victim_score + attacker_score).max(1.0);
    let gain = (gap / hardness).exp().clamp(1.0 / hardness, hardness);

    let mut delta = base * gain;
    if config.inflation {
        let horizon = if config.max_round > 0 {
            config.max_round
        } else {
            current_round + 1
        };
        delta *= 1.0 + current_round as f64 / horizon.max(1) as f64;
    }
    delta
}

/// Atomically score a capture and insert the StolenFlag row.
///
/// Returns the applied (attacker, victim) deltas; the victim's score is
/// floored at zero, so `victim` is the actual decrease, not the nominal one.
pub fn recalculate_rating(
    conn: &mut Connection,
    attacker_id: i64,
    victim_id: i64,
    task_id: i64,
    flag_id: i64,
    config: &GameConfig,
    current_round: i64,
) -> rusqlite::Result<ScoreDelta> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let attacker_score: f64 = tx.query_row(
        "SELECT score FROM teamtasks WHERE team_id = ?1 AND task_id = ?2",
        params![attacker_id, task_id],
        |row| row.get(0),
    )?;
    let victim_score: f64 = tx.query_row(
        "SELECT score FROM teamtasks WHERE team_id = ?1 AND task_id = ?2",
        params![victim_id, task_id],
        |row| row.get(0),
    )?;
    let default_score: i64 = tx.query_row(
        "SELECT default_score FROM tasks WHERE id = ?1",
        params![task_id],
        |row| row.get(0),
    )?;

    let attacker_delta = attack_value(attacker_score, victim_score, default_score, config, current_round);
    let victim_delta = -attacker_delta.min(victim_score);

    // The unique key makes double-captures fail here, rolling everything back.
    tx.execute(
        "INSERT INTO stolenflags (flag_id, attacker_id, submit_time) VALUES (?1, ?2, ?3)",
        params![flag_id, attacker_id, chrono::Utc::now().timestamp()],
    )?;

    tx.execute(
        "UPDATE teamtasks SET stolen = stolen + 1, score = score + :delta
         WHERE team_id = :team AND task_id = :task",
        named_params! { ":delta": attacker_delta, ":team": attacker_id, ":task": task_id },
    )?;
    tx.execute(
        "UPDATE teamtasks SET lost = lost + 1, score = MAX(0, score + :delta)
         WHERE team_id = :team AND task_id = :task",
        named_params! { ":delta": victim_delta, ":team": victim_id, ":task": task_id },
    )?;

    tx.commit()?;

    Ok(ScoreDelta {
        attacker: attacker_delta,
        victim: victim_delta,
    })
}
