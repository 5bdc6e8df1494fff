//! REST client for contract discovery and historical daily bars.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::types::OhlcBar;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const CONTRACTS_URL: &str = "https://api.alpaca.markets/v2/options/contracts";
const BARS_URL: &str = "https://data.alpaca.markets/v2/stocks";

#[derive(Debug, Deserialize)]
struct ContractsResponse {
    option_contracts: Option<Vec<Contract>>,
}

#[derive(Debug, Deserialize)]
struct Contract {
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    bars: Option<Vec<OhlcBar>>,
}

/// Authenticated REST client for the market-data vendor.
pub struct ApiClient {
    http: Client,
    api_key: String,
    api_secret: String,
    max_symbols: usize,
}

impl ApiClient {
    pub fn new(config: &Config) -> Arc<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("vigil/0.1")
            .build()
            .expect("Failed to create HTTP client");
        Arc::new(Self {
            http,
            api_key: config.api_key.clone().unwrap_or_default(),
            api_secret: config.api_secret.clone().unwrap_or_default(),
            max_symbols: config.max_contracts,
        })
    }

    /// Discover option symbols for an underlying within an expiry window and
    /// optional strike window. Returns at most `max_contracts` symbols.
    pub async fn fetch_option_symbols(
        &self,
        underlying: &str,
        exp_gte: &str,
        exp_lte: &str,
        strike_gte: Option<f64>,
        strike_lte: Option<f64>,
    ) -> Result<Vec<String>> {
        let mut url = format!(
            "{}?underlying_symbols={}&expiration_date_gte={}&expiration_date_lte={}",
            CONTRACTS_URL, underlying, exp_gte, exp_lte
        );
        if let Some(lo) = strike_gte {
            url.push_str(&format!("&strike_price_gte={:.2}", lo));
        }
        if let Some(hi) = strike_lte {
            url.push_str(&format!("&strike_price_lte={:.2}", hi));
        }

        info!(
            "Fetching option contracts for {} ({} to {})",
            underlying, exp_gte, exp_lte
        );

        let response = self
            .http
            .get(&url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Api(format!(
                "contract discovery failed with status {}",
                response.status()
            )));
        }

        let body: ContractsResponse = response.json().await?;
        let symbols: Vec<String> = body
            .option_contracts
            .unwrap_or_default()
            .into_iter()
            .take(self.max_symbols)
            .map(|c| c.symbol)
            .collect();

        if symbols.is_empty() {
            return Err(AppError::Api(format!(
                "no option contracts found for {}",
                underlying
            )));
        }

        info!("Selected {} symbols for streaming", symbols.len());
        Ok(symbols)
    }

    /// Fetch daily OHLC bars for an underlying (IEX feed). Invalid bars are
    /// left to the RV series to reject.
    pub async fn fetch_historical_bars(
        &self,
        symbol: &str,
        start_date: &str,
        limit_days: u32,
    ) -> Result<Vec<OhlcBar>> {
        let url = format!(
            "{}/{}/bars?timeframe=1Day&start={}&limit={}&feed=iex",
            BARS_URL, symbol, start_date, limit_days
        );

        info!("Fetching {} days of history for {}", limit_days, symbol);

        let response = self
            .http
            .get(&url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(
                "Historical bars request for {} failed with status {}",
                symbol,
                response.status()
            );
            return Err(AppError::Api(format!(
                "historical bars failed with status {}",
                response.status()
            )));
        }

        let body: BarsResponse = response.json().await?;
        Ok(body.bars.unwrap_or_default())
    }
}
