use serde::{Deserialize, Serialize};

/// Daily OHLC bar for an underlying.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OhlcBar {
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
}

impl OhlcBar {
    /// A bar is usable when all fields are positive and internally consistent.
    pub fn is_valid(&self) -> bool {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return false;
        }
        if self.high < self.low || self.high < self.open || self.high < self.close {
            return false;
        }
        if self.low > self.open || self.low > self.close {
            return false;
        }
        true
    }
}

/// Latest prices for one underlying, written by the equities session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnderlyingPrice {
    pub symbol: String,
    pub last_price: f64,
    pub bid_price: f64,
    pub ask_price: f64,
    pub last_size: u64,
    pub bid_size: u64,
    pub ask_size: u64,
    pub timestamp: String,
    pub is_valid: bool,
}
