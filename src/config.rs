use clap::Parser;
use std::env;

/// Alpaca options indicative feed (MessagePack frames).
pub const OPTIONS_WS_URL: &str = "wss://stream.data.alpaca.markets/v1beta1/indicative";

/// Alpaca IEX stock feed (JSON frames).
pub const STOCKS_WS_URL: &str = "wss://stream.data.alpaca.markets/v2/iex";

/// Fallback risk-free rate when the FRED fetch fails (5%).
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.05;

/// Command-line interface.
///
/// Three subscription forms, matching the upstream contract-discovery API:
/// - direct symbols: `vigil QQQ250801C00560000 ...`
/// - expiry window: `vigil QQQ 2025-08-01 2025-08-15`
/// - expiry + strike window: `vigil QQQ 2025-08-01 2025-08-15 550 580`
#[derive(Debug, Parser)]
#[command(name = "vigil", about = "Real-time options analytics engine")]
pub struct Cli {
    /// Replace both websocket sessions with a local data generator.
    #[arg(long)]
    pub mock: bool,

    /// Symbols, or UNDERLYING EXP_GTE EXP_LTE [STRIKE_GTE STRIKE_LTE].
    #[arg(required = true)]
    pub args: Vec<String>,
}

/// How the option symbol universe is selected.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolSelection {
    /// Explicit list of option symbols.
    Direct(Vec<String>),
    /// Contract-discovery query: underlying + expiry window + optional strikes.
    Query {
        underlying: String,
        exp_gte: String,
        exp_lte: String,
        strike_gte: Option<f64>,
        strike_lte: Option<f64>,
    },
}

fn looks_like_date(s: &str) -> bool {
    s.len() == 10 && s.as_bytes()[4] == b'-' && s.as_bytes()[7] == b'-'
}

impl Cli {
    /// Interpret the positional arguments as one of the three forms.
    pub fn selection(&self) -> SymbolSelection {
        let args = &self.args;
        if (args.len() == 3 || args.len() == 5)
            && looks_like_date(&args[1])
            && looks_like_date(&args[2])
        {
            let (strike_gte, strike_lte) = if args.len() == 5 {
                // 0 skips that side of the filter, matching the discovery API
                let lo = args[3].parse::<f64>().unwrap_or(0.0);
                let hi = args[4].parse::<f64>().unwrap_or(0.0);
                (
                    (lo > 0.0).then_some(lo),
                    (hi > 0.0).then_some(hi),
                )
            } else {
                (None, None)
            };
            SymbolSelection::Query {
                underlying: args[0].clone(),
                exp_gte: args[1].clone(),
                exp_lte: args[2].clone(),
                strike_gte,
                strike_lte,
            }
        } else {
            SymbolSelection::Direct(args.clone())
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Alpaca API key.
    pub api_key: Option<String>,
    /// Alpaca API secret.
    pub api_secret: Option<String>,
    /// FRED API key for the risk-free rate fetch.
    pub fred_api_key: Option<String>,
    /// Options websocket URL (overridable for tests).
    pub options_ws_url: String,
    /// Stocks websocket URL (overridable for tests).
    pub stocks_ws_url: String,
    /// Maximum tracked option contracts.
    pub max_contracts: usize,
    /// Maximum points per volatility smile.
    pub max_smile_points: usize,
    /// Maximum tracked underlyings.
    pub max_underlyings: usize,
    /// Per-contract analytics throttle (ms).
    pub throttle_ms: u64,
    /// Smile/dislocation analysis interval (seconds).
    pub smile_interval_secs: u64,
    /// Subscribe to option quotes in addition to trades.
    ///
    /// The upstream feed accepts both a trades-only and a trades+quotes
    /// subscription envelope; which one to send is operator-selectable.
    pub subscribe_quotes: bool,
    /// Wall-clock hour (UTC-normalized exchange day) at which options expire.
    pub expiry_hour: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("APCA_API_KEY_ID").ok(),
            api_secret: env::var("APCA_API_SECRET_KEY").ok(),
            fred_api_key: env::var("FRED_API_KEY").ok(),
            options_ws_url: env::var("OPTIONS_WS_URL")
                .unwrap_or_else(|_| OPTIONS_WS_URL.to_string()),
            stocks_ws_url: env::var("STOCKS_WS_URL")
                .unwrap_or_else(|_| STOCKS_WS_URL.to_string()),
            max_contracts: env::var("MAX_CONTRACTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            max_smile_points: env::var("MAX_SMILE_POINTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            max_underlyings: env::var("MAX_UNDERLYINGS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            throttle_ms: env::var("ANALYTICS_THROTTLE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            smile_interval_secs: env::var("SMILE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            subscribe_quotes: env::var("SUBSCRIBE_QUOTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            expiry_hour: env::var("EXPIRY_HOUR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(16),
        }
    }

    /// Whether API credentials are present.
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
