//! `funding-arb` binary: config path in, engine lifecycle out.
//!
//! SIGINT and SIGTERM both trigger a graceful shutdown; the process prints a
//! final performance summary and exits 0. Initialisation failures exit 1.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use funding_arb_core::config::BotConfig;
use funding_arb_core::config_loader::ConfigLoader;
use funding_arb_engine::FundingEngine;

#[derive(Parser)]
#[command(name = "funding-arb")]
#[command(about = "Funding-rate arbitrage bot", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config/bot_config.json")]
    config: String,
}

fn init_tracing(config: &BotConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {path}"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!(error = %err, "cannot install SIGTERM handler, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl+C");
    }
}

async fn run(config_path: &str) -> Result<()> {
    let config = ConfigLoader::load(config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;
    init_tracing(&config)?;

    info!(bot = %config.bot_name, config = config_path, "starting funding-rate arbitrage bot");

    let mut engine = FundingEngine::from_config(config)
        .await
        .context("engine initialisation failed")?;
    engine.start().context("engine start failed")?;

    info!("bot is running, press Ctrl+C to stop");
    wait_for_shutdown_signal().await;

    engine.stop().await.context("engine stop failed")?;

    let stats = engine.performance_stats();
    println!("\nPerformance summary");
    println!("  total trades:      {}", stats.total_trades);
    println!(
        "  profitable trades: {} ({:.1}%)",
        stats.profitable_trades,
        stats.win_rate_pct()
    );
    println!("  total profit:      {:.2} USD", stats.total_profit_usd);
    println!("  max drawdown:      {:.2}%", stats.max_drawdown_pct);
    println!("  annualized return: {:.2}%", stats.annualized_return_pct);
    println!("  sharpe ratio:      {:.2}", stats.sharpe_ratio);

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli.config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Tracing may not be initialised yet when config loading fails.
            eprintln!("fatal: {err:#}");
            ExitCode::FAILURE
        }
    }
}
