//! Risk-free rate from the FRED observations API.
//!
//! One fetch at startup. Series fallback chain: 3-month Treasury, then the
//! federal funds rate, then the 10-year Treasury, then the hard-coded
//! default. The fetched value arrives as a percentage and is returned as a
//! decimal.

use crate::config::DEFAULT_RISK_FREE_RATE;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

const FRED_BASE_URL: &str = "https://api.stlouisfed.org/fred/series/observations";

const FRED_3_MONTH_TREASURY: &str = "DGS3MO";
const FRED_FEDERAL_FUNDS: &str = "FEDFUNDS";
const FRED_10_YEAR_TREASURY: &str = "DGS10";

#[derive(Debug, Deserialize)]
struct FredResponse {
    observations: Vec<FredObservation>,
}

#[derive(Debug, Deserialize)]
struct FredObservation {
    date: String,
    value: String,
}

/// Parse the latest observation out of a FRED response body. FRED encodes
/// missing data as the literal string ".".
fn parse_latest_rate(body: &str) -> Option<(f64, String)> {
    let parsed: FredResponse = serde_json::from_str(body).ok()?;
    let latest = parsed.observations.first()?;
    if latest.value == "." {
        return None;
    }
    let rate: f64 = latest.value.parse().ok()?;
    Some((rate, latest.date.clone()))
}

async fn fetch_series(client: &Client, series_id: &str, api_key: &str) -> Option<f64> {
    let url = format!(
        "{}?series_id={}&api_key={}&file_type=json&limit=1&sort_order=desc",
        FRED_BASE_URL, series_id, api_key
    );

    info!("Fetching risk-free rate from FRED (series: {})", series_id);

    let response = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!("FRED request failed: {}", e);
            return None;
        }
    };
    if !response.status().is_success() {
        warn!("FRED request for {} returned {}", series_id, response.status());
        return None;
    }
    let body = response.text().await.ok()?;

    match parse_latest_rate(&body) {
        Some((rate, date)) => {
            info!("FRED rate ({}): {:.4}% as of {}", series_id, rate, date);
            Some(rate)
        }
        None => {
            warn!("FRED data not available for series {}", series_id);
            None
        }
    }
}

/// Fetch the current risk-free rate as a decimal (e.g. 0.0523 for 5.23%).
///
/// Never fails: walks the series chain and falls back to
/// [`DEFAULT_RISK_FREE_RATE`] when nothing is available or no API key was
/// configured.
pub async fn fetch_risk_free_rate(api_key: Option<&str>) -> f64 {
    let Some(api_key) = api_key.filter(|k| !k.is_empty()) else {
        info!(
            "No FRED API key configured, using default risk-free rate {:.2}%",
            DEFAULT_RISK_FREE_RATE * 100.0
        );
        return DEFAULT_RISK_FREE_RATE;
    };

    let client = match Client::builder().timeout(Duration::from_secs(10)).build() {
        Ok(c) => c,
        Err(_) => return DEFAULT_RISK_FREE_RATE,
    };

    for series in [FRED_3_MONTH_TREASURY, FRED_FEDERAL_FUNDS, FRED_10_YEAR_TREASURY] {
        if let Some(rate_percent) = fetch_series(&client, series, api_key).await {
            return rate_percent / 100.0;
        }
    }

    warn!(
        "All FRED series unavailable, using default rate {:.2}%",
        DEFAULT_RISK_FREE_RATE * 100.0
    );
    DEFAULT_RISK_FREE_RATE
}
