use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use reaction_logger::args::Args;
use reaction_logger::auth;
use reaction_logger::cfg::Cfg;
use reaction_logger::csv_sink::CsvSink;
use reaction_logger::job::{self, Monitor};
use reaction_logger::sheets::SheetsSink;
use reaction_logger::slack::{ChatSource, SlackClient};
use reaction_logger::state::StateManager;
use reaction_logger::writer::RowSink;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level)?;

    info!("Starting reaction_logger");

    let check_only = args.check;
    let cfg = Cfg::load(args)?;
    cfg.validate()?;

    let chat = SlackClient::new(
        cfg.slack_bot_token.expose().to_string(),
        Duration::from_secs(cfg.request_timeout_secs),
    )?;

    if cfg.dry_run {
        info!("Dry run: writing rows to {}", cfg.output_csv.path);
        let sink = CsvSink::new(&cfg.output_csv.path, cfg.output_csv.ensure);
        run(cfg, chat, sink, check_only).await
    } else {
        let hub = auth::create_sheets_hub(Path::new(&cfg.credentials_path)).await?;
        let sink = SheetsSink::new(hub, cfg.spreadsheet_id.clone(), cfg.sheet_name.clone());
        run(cfg, chat, sink, check_only).await
    }
}

async fn run<C: ChatSource, S: RowSink>(cfg: Cfg, chat: C, sink: S, check_only: bool) -> Result<()> {
    job::check_connections(&chat, &cfg.channel_id, &sink).await?;
    if check_only {
        info!("Connection check passed");
        return Ok(());
    }

    let mut state = StateManager::load(&cfg.state_path);
    let monitor = Monitor::from_cfg(&cfg, chat, sink);

    if cfg.once {
        info!("Running once and exiting");
        let summary = monitor.run_cycle(&mut state).await?;
        info!("Forwarded {} new messages", summary.appended);
    } else {
        let interval = Duration::from_secs(cfg.poll_interval_secs);
        info!("Polling every {:?}", interval);
        monitor.run_until_stopped(&mut state, interval).await?;
    }

    info!("reaction_logger completed successfully");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let level = match level {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    Ok(())
}
