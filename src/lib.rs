//! Attack-defense CTF platform: round ticker, checker worker pool, action
//! coordination, flag submission and live scoreboard.

pub mod actions;
pub mod attacks;
pub mod bootstrap;
pub mod checker;
pub mod cli;
pub mod context;
pub mod coordinator;
pub mod database;
pub mod game_state;
pub mod logger;
pub mod monitor;
pub mod notifier;
pub mod scoring;
pub mod server;
pub mod store;
pub mod structs;
pub mod ticker;
pub mod worker;
