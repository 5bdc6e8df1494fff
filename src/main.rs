use clap::Parser;
use std::sync::Arc;
use vigil::config::{Cli, Config, SymbolSelection};
use vigil::services::StreamCoordinator;
use vigil::sources::{fetch_risk_free_rate, ApiClient};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Days of history requested per underlying for the RV seed.
const HISTORY_DAYS: u32 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Arc::new(Config::from_env());

    if !cli.mock && !config.has_credentials() {
        anyhow::bail!(
            "API credentials required: set APCA_API_KEY_ID and APCA_API_SECRET_KEY (or run with --mock)"
        );
    }

    // Resolve the option symbol universe
    let api_client = ApiClient::new(&config);
    let symbols = match cli.selection() {
        SymbolSelection::Direct(symbols) => symbols,
        SymbolSelection::Query {
            underlying,
            exp_gte,
            exp_lte,
            strike_gte,
            strike_lte,
        } => {
            if cli.mock {
                anyhow::bail!("Mock mode requires explicit option symbols");
            }
            api_client
                .fetch_option_symbols(&underlying, &exp_gte, &exp_lte, strike_gte, strike_lte)
                .await?
        }
    };
    if symbols.is_empty() {
        anyhow::bail!("No option symbols to stream");
    }
    info!("Streaming {} option contracts", symbols.len());

    // One-time risk-free rate fetch (hard fallback inside)
    let risk_free_rate = fetch_risk_free_rate(config.fred_api_key.as_deref()).await;
    info!("Risk-free rate: {:.4}%", risk_free_rate * 100.0);

    let coordinator = StreamCoordinator::new(config.clone(), risk_free_rate);

    // Seed realized-vol series from historical bars
    let underlyings = StreamCoordinator::derive_underlyings(&symbols);
    if config.has_credentials() && !underlyings.is_empty() {
        info!("Seeding realized volatility for {} underlyings", underlyings.len());
        let start_date = (chrono::Utc::now() - chrono::Duration::days(100))
            .format("%Y-%m-%d")
            .to_string();
        for underlying in &underlyings {
            match api_client
                .fetch_historical_bars(underlying, &start_date, HISTORY_DAYS)
                .await
            {
                Ok(bars) => coordinator.rv_store().seed(underlying, &bars),
                Err(e) => warn!("No RV seed for {}: {}", underlying, e),
            }
        }
    }

    // Install the interrupt handler before any stream starts
    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                coordinator.shutdown();
            }
        });
    }

    let analyzer = coordinator.start_analyzer();

    if cli.mock {
        info!("Mock mode: generating local data, no websocket sessions");
        let feed = coordinator.start_mock(symbols);
        let _ = feed.await;
    } else {
        let handles = coordinator.start_streams(symbols);
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    coordinator.shutdown();
                    let _ = analyzer.await;
                    return Err(e.into());
                }
                Err(e) => warn!("Session task panicked: {}", e),
            }
        }
    }

    coordinator.shutdown();
    let _ = analyzer.await;
    info!("Clean shutdown");
    Ok(())
}
