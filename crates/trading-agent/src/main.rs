use std::sync::Arc;

use alpaca_broker::AlpacaClient;
use anyhow::Result;
use tokio::signal::unix::SignalKind;

mod agent;
mod config;
mod consortium;
mod events;
mod orchestrator;
mod sources;
mod whitelist;

use config::AgentConfig;
use orchestrator::Orchestrator;
use sources::{AlpacaSmartMoneySource, NoopEarningsSource};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting autonomous multi-agent equities trading consortium");

    // 2. Load configuration
    let config = AgentConfig::from_env()?;
    tracing::info!(
        agents = config.agents.len(),
        interval_minutes = config.trading_interval_minutes,
        max_position_percent = config.max_position_percent,
        "configuration loaded"
    );

    // 3. Initialize Alpaca
    let alpaca = Arc::new(AlpacaClient::new(
        config.alpaca_api_key.clone(),
        config.alpaca_secret_key.clone(),
        config.alpaca_base_url.clone(),
    )?);

    // 4. Safety gate: paper by default, live requires LIVE_TRADING_APPROVED=yes
    if !alpaca.is_paper() {
        let approved = std::env::var("LIVE_TRADING_APPROVED")
            .map(|v| v.eq_ignore_ascii_case("yes"))
            .unwrap_or(false);
        if !approved {
            tracing::error!(
                "ALPACA_BASE_URL points to live trading ({}). Set LIVE_TRADING_APPROVED=yes \
                 to enable, or use https://paper-api.alpaca.markets for paper.",
                config.alpaca_base_url
            );
            std::process::exit(1);
        }
        tracing::warn!("LIVE TRADING MODE — REAL MONEY AT RISK ({})", config.alpaca_base_url);
    } else {
        tracing::info!("Paper trading mode ({})", config.alpaca_base_url);
    }

    // 5. Database: memory store migration
    sqlx::any::install_default_drivers();
    let db_pool = sqlx::AnyPool::connect(&config.database_url).await?;
    let memory = memory_store::MemoryStore::new(db_pool.clone());
    memory.migrate().await?;
    tracing::info!("Memory store migrated");

    // 6. Build the remaining services
    let earnings = earnings_calendar::EarningsCalendar::new(NoopEarningsSource);
    let smart_money = smart_money::SmartMoneyAggregator::new(AlpacaSmartMoneySource::new(Arc::clone(&alpaca)));
    let llm = llm_client::LlmClient::from_env();

    let winning_patterns = Arc::new(winning_patterns::WinningPatternsIndex::new());
    match winning_patterns.refresh(&memory).await {
        Ok(count) => tracing::info!(patterns = count, "winning patterns index primed"),
        Err(e) => tracing::warn!(error = %e, "winning patterns refresh failed at startup"),
    }

    // 7. Startup connectivity checks
    sqlx::query("SELECT 1")
        .execute(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("database connectivity check failed: {e}"))?;
    tracing::info!("startup check: database OK");

    let account = alpaca
        .get_account()
        .await
        .map_err(|e| anyhow::anyhow!("Alpaca connectivity check failed: {e}"))?;
    tracing::info!(
        cash = %account.cash,
        buying_power = %account.buying_power,
        portfolio_value = %account.portfolio_value,
        "startup check: Alpaca OK"
    );

    // 8. Assemble the orchestrator
    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        alpaca,
        llm,
        memory,
        earnings,
        smart_money,
        Arc::clone(&winning_patterns),
    ));

    // Periodic winning-patterns refresh, independent of the trading cycle.
    {
        let memory = memory_store::MemoryStore::new(db_pool.clone());
        let patterns = Arc::clone(&winning_patterns);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(15 * 60));
            loop {
                ticker.tick().await;
                if let Err(e) = patterns.refresh(&memory).await {
                    tracing::warn!(error = %e, "winning patterns refresh failed");
                }
            }
        });
    }

    let background = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run().await })
    };

    tracing::info!(
        "Consortium is now running. Trading cycle every {} minutes. Press Ctrl+C to stop.",
        config.trading_interval_minutes
    );

    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    background.abort();
    tracing::info!("shutdown complete");
    Ok(())
}
