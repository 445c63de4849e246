use anyhow::Context as _;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use adarena::cli::{Args, Commands};
use adarena::context::Context;
use adarena::database::{teams, Db};
use adarena::logger;
use adarena::structs::config::Settings;
use adarena::{bootstrap, monitor, server, store, ticker, worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init_logging();

    let settings = Settings::from_sources(&args)?;

    match &args.command {
        Commands::Run => run(settings).await,
        Commands::Reset(reset_args) => {
            let db = Db::open(&settings.database.file)?;
            let tokens = bootstrap::reset(&db, &store::Store::new(), &reset_args.game_config)?;
            for (name, token) in tokens {
                println!("{name}: {token}");
            }
            Ok(())
        }
        Commands::Tokens => {
            let db = Db::open(&settings.database.file)?;
            let all = db.call(|conn| teams::get_all_teams(conn)).await?;
            for team in all {
                println!("{}: {}", team.name, team.token);
            }
            Ok(())
        }
    }
}

/// Run every service as a supervised task until SIGINT.
async fn run(settings: Settings) -> anyhow::Result<()> {
    let db = Db::open(&settings.database.file)?;
    let ctx = Context::new(settings, db);

    let ticker = ticker::Ticker::initialize(ctx.clone())
        .await
        .context("no game config found; run `adarena reset` first")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let notifier = {
        let ctx = ctx.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { ctx.notifier.run(shutdown).await })
    };
    let ticker_task = tokio::spawn(ticker.run(shutdown_rx.clone()));
    let workers = tokio::spawn(worker::run_worker_pool(ctx.clone(), shutdown_rx.clone()));
    let monitor_task = tokio::spawn(monitor::run(ctx.clone(), shutdown_rx.clone()));
    let api = tokio::spawn(server::serve(ctx.clone(), shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(notifier, ticker_task, workers, monitor_task);
    api.await??;

    info!("all services stopped");
    Ok(())
}
