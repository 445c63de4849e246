use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "adarena", about = "Attack-defense CTF platform")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the default service configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the platform: ticker, workers, monitor and the API
    Run,

    /// Drop and re-initialize the database from a YAML game config
    Reset(ResetArgs),

    /// Print the team submission tokens
    Tokens,
}

#[derive(Parser, Debug, Clone)]
pub struct ResetArgs {
    /// Game definition: game settings, tasks and teams.
    #[arg(long, default_value = "config.yml")]
    pub game_config: PathBuf,
}
