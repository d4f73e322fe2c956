use std::sync::Arc;

use clap::Parser;
use fluxo::cli::{Cli, Commands};
use fluxo::config::AppConfig;
use fluxo::console;
use fluxo::engine::Engine;
use fluxo::error::{FluxoError, Result};
use fluxo::feed::{MarketFeed, ReplayFeed, SimFeed};
use fluxo::sink::RecordSink;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("config error: {e}");
        }
        return Err(FluxoError::ConfigInvalid(errors.join("; ")));
    }

    init_logging(&config);

    match cli.command.unwrap_or(Commands::Run {
        interval_ms: 25,
        seed: None,
    }) {
        Commands::Check => {
            println!("configuration OK");
            println!("  symbols: {:?}", config.system.symbols);
            println!(
                "  max positions: {}, default size: {}",
                config.position_management.max_positions, config.position_management.default_size
            );
            println!(
                "  breaker: {} losses / {}% drawdown, cooldown {}s",
                config.risk_management.consecutive_losses_limit,
                config.risk_management.max_drawdown_percent,
                config.risk_management.circuit_breaker_cooldown
            );
            Ok(())
        }
        Commands::Run { interval_ms, seed } => {
            let symbols = config.system.symbols.clone();
            let feed = match seed {
                Some(seed) => SimFeed::with_seed(symbols, interval_ms, seed),
                None => SimFeed::new(symbols, interval_ms),
            };
            run_engine(config, feed).await
        }
        Commands::Replay { file, pace } => {
            let feed = ReplayFeed::open(&file, pace).await?;
            run_engine(config, feed).await
        }
    }
}

async fn run_engine<F>(config: AppConfig, feed: F) -> Result<()>
where
    F: MarketFeed + 'static,
{
    let log_dir = config.logging.dir.clone();
    let engine = Arc::new(Engine::new(config));

    // Structured record journal, non-blocking and bounded
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let appender = tracing_appender::rolling::daily(&log_dir, "records.jsonl");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let sink = RecordSink::new(writer);
        let events = engine.bus().subscribe();
        let shutdown = engine.shutdown_rx();
        tokio::spawn(async move {
            let _guard = guard;
            sink.run(events, shutdown).await;
        });
    } else {
        error!(dir = %log_dir, "cannot create record directory, journal disabled");
    }

    // Console command loop (q / c / r)
    tokio::spawn(console::run_console(Arc::clone(&engine)));

    // Ctrl-C maps to the same shutdown path as `q`
    {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received");
                engine.shutdown().await;
            }
        });
    }

    engine.run(feed).await
}

fn init_logging(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,fluxo={}", config.logging.level)));

    let log_dir = &config.logging.dir;

    // `tracing_appender::rolling::daily` panics if it cannot create the
    // initial log file, so preflight writability before installing it.
    let file_layer = if std::fs::create_dir_all(log_dir).is_ok() {
        let test_path = std::path::Path::new(log_dir).join(".fluxo_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let appender = tracing_appender::rolling::daily(log_dir, "fluxo.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);

                // Keep the writer's worker alive for the process lifetime
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!("file logging disabled, cannot write to {log_dir}: {e}");
                None
            }
        }
    } else {
        eprintln!("file logging disabled, cannot create {log_dir}");
        None
    };

    let json_console = config
        .logging
        .json
        .then(|| tracing_subscriber::fmt::layer().json());
    let plain_console = (!config.logging.json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(json_console)
        .with(plain_console)
        .with(file_layer)
        .init();
}
