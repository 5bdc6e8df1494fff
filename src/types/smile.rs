use crate::types::OptionType;
use serde::{Deserialize, Serialize};

/// One (strike, IV) observation inside a volatility smile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SmilePoint {
    pub strike: f64,
    pub implied_vol: f64,
    /// strike / underlying_price
    pub moneyness: f64,
    pub time_to_expiry: f64,
    pub option_type: OptionType,
}

/// The IV(strike) curve for one (underlying, expiry) pair, with derived
/// shape metrics and pattern flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilitySmile {
    pub underlying: String,
    /// YYMMDD expiry shared by every point.
    pub expiry_date: String,
    pub time_to_expiry: f64,
    pub underlying_price: f64,
    pub points: Vec<SmilePoint>,

    // Shape metrics
    pub atm_vol: f64,
    pub put_skew: f64,
    pub call_skew: f64,
    pub curvature: f64,
    pub min_vol: f64,
    pub max_vol: f64,
    pub r_squared: f64,

    // Pattern flags
    pub has_put_skew: bool,
    pub has_call_skew: bool,
    pub has_smile: bool,
    pub is_inverted: bool,
    pub sufficient_data: bool,
}

impl VolatilitySmile {
    pub fn new(underlying: &str, expiry_date: &str) -> Self {
        Self {
            underlying: underlying.to_string(),
            expiry_date: expiry_date.to_string(),
            time_to_expiry: 0.0,
            underlying_price: 0.0,
            points: Vec::new(),
            atm_vol: 0.0,
            put_skew: 0.0,
            call_skew: 0.0,
            curvature: 0.0,
            min_vol: 0.0,
            max_vol: 0.0,
            r_squared: 0.0,
            has_put_skew: false,
            has_call_skew: false,
            has_smile: false,
            is_inverted: false,
            sufficient_data: false,
        }
    }
}
