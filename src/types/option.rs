use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Last quote for an option contract (last-writer-wins).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionQuote {
    pub bid_price: f64,
    pub bid_size: u64,
    pub bid_exchange: String,
    pub ask_price: f64,
    pub ask_size: u64,
    pub ask_exchange: String,
    pub quote_time: String,
    pub condition: String,
}

impl OptionQuote {
    /// Mid-price when both sides are positive. Crossed quotes pass through;
    /// only zero/missing sides disqualify.
    pub fn mid_price(&self) -> Option<f64> {
        if self.bid_price > 0.0 && self.ask_price > 0.0 {
            Some((self.bid_price + self.ask_price) / 2.0)
        } else {
            None
        }
    }
}

/// Last trade for an option contract (last-writer-wins).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionTrade {
    pub last_price: f64,
    pub last_size: u64,
    pub trade_exchange: String,
    pub trade_time: String,
    pub condition: String,
}

/// Full Black-Scholes output for one contract at one reference price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BsMetrics {
    pub call_price: f64,
    pub put_price: f64,
    pub implied_vol: f64,
    pub iv_converged: bool,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
    // 2nd order
    pub vanna: f64,
    pub charm: f64,
    pub volga: f64,
    // 3rd order
    pub speed: f64,
    pub zomma: f64,
    pub color: f64,
}

/// Derived analytics for a contract, plus the inputs they were computed from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub metrics: BsMetrics,
    pub underlying_price: f64,
    pub strike: f64,
    pub time_to_expiry: f64,
    pub is_call: bool,
    pub analytics_valid: bool,
}

/// One row of the options table: identity, market data, analytics.
#[derive(Debug, Clone)]
pub struct OptionRow {
    pub symbol: String,
    pub quote: OptionQuote,
    pub has_quote: bool,
    pub trade: OptionTrade,
    pub has_trade: bool,
    pub analytics: AnalyticsSnapshot,
    /// Monotonic timestamp of the last analytics compute, for throttling.
    pub last_computed_at: Option<Instant>,
}

impl OptionRow {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            quote: OptionQuote::default(),
            has_quote: false,
            trade: OptionTrade::default(),
            has_trade: false,
            analytics: AnalyticsSnapshot::default(),
            last_computed_at: None,
        }
    }

    /// The price analytics should be computed against: last trade when
    /// present and positive, else the quote mid.
    pub fn reference_price(&self) -> Option<f64> {
        if self.has_trade && self.trade.last_price > 0.0 {
            Some(self.trade.last_price)
        } else if self.has_quote {
            self.quote.mid_price()
        } else {
            None
        }
    }
}
