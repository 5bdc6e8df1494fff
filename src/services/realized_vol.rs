//! Realized-volatility estimation from daily OHLC bars.
//!
//! Per-underlying circular buffer of up to a year of bars, with Parkinson,
//! Garman-Klass and close-to-close estimators (all annualized by sqrt 252),
//! and the IV-vs-RV comparison that feeds the dislocation detector.

use crate::types::{IvRvAnalysis, IvRvSignal, OhlcBar, VolRegime};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// One year of daily bars.
pub const MAX_PRICE_HISTORY: usize = 252;

/// Minimum valid rows for any estimator to produce a number.
const MIN_VALID_ROWS: usize = 5;

const TRADING_DAYS: f64 = 252.0;

/// Parkinson estimator over the first `periods` rows (rows ordered newest
/// first). High-low range based; returns 0 below the minimum row count.
pub fn parkinson_rv(bars: &[OhlcBar], periods: usize) -> f64 {
    if periods <= 1 {
        return 0.0;
    }

    let mut sum_log_hl = 0.0;
    let mut valid = 0usize;
    for bar in bars.iter().take(periods) {
        if !bar.is_valid() {
            continue;
        }
        let log_hl = (bar.high / bar.low).ln();
        sum_log_hl += log_hl * log_hl;
        valid += 1;
    }

    if valid < MIN_VALID_ROWS {
        return 0.0;
    }

    let variance = sum_log_hl / (4.0 * 2.0_f64.ln() * valid as f64);
    (variance * TRADING_DAYS).sqrt()
}

/// Garman-Klass estimator over the first `periods` rows, combining the
/// overnight gap against the previous close with the intraday range.
pub fn garman_klass_rv(bars: &[OhlcBar], periods: usize) -> f64 {
    if periods <= 1 {
        return 0.0;
    }

    let mut sum_gk = 0.0;
    let mut valid = 0usize;
    for i in 1..periods.min(bars.len()) {
        let bar = &bars[i];
        let prev = &bars[i - 1];
        if !bar.is_valid() || !prev.is_valid() {
            continue;
        }

        let log_o_c_prev = (bar.open / prev.close).ln();
        let log_h_c = (bar.high / bar.close).ln();
        let log_h_o = (bar.high / bar.open).ln();
        let log_l_c = (bar.low / bar.close).ln();
        let log_l_o = (bar.low / bar.open).ln();

        let gk = log_o_c_prev * log_o_c_prev
            + 0.5 * (log_h_o * log_h_o + log_l_o * log_l_o)
            - (2.0 * 2.0_f64.ln() - 1.0) * (log_h_c * log_h_c + log_l_c * log_l_c);

        sum_gk += gk;
        valid += 1;
    }

    if valid < MIN_VALID_ROWS {
        return 0.0;
    }

    ((sum_gk / valid as f64) * TRADING_DAYS).max(0.0).sqrt()
}

/// Close-to-close estimator from squared log returns.
pub fn close_to_close_rv(bars: &[OhlcBar], periods: usize) -> f64 {
    if periods <= 1 {
        return 0.0;
    }

    let mut sum_sq = 0.0;
    let mut valid = 0usize;
    for i in 1..periods.min(bars.len()) {
        let bar = &bars[i];
        let prev = &bars[i - 1];
        if !bar.is_valid() || !prev.is_valid() {
            continue;
        }
        let log_return = (bar.close / prev.close).ln();
        sum_sq += log_return * log_return;
        valid += 1;
    }

    if valid < MIN_VALID_ROWS {
        return 0.0;
    }

    ((sum_sq / valid as f64) * TRADING_DAYS).sqrt()
}

/// Realized-vol state for one underlying.
#[derive(Debug, Clone)]
pub struct RvSeries {
    pub symbol: String,
    history: Vec<OhlcBar>,
    head: usize,
    count: usize,

    pub rv_10d: f64,
    pub rv_20d: f64,
    pub rv_30d: f64,
    /// (rv_10d - rv_20d) / rv_20d; positive when short-term vol is rising.
    pub rv_trend: f64,
    pub rv_mean: f64,
    pub rv_std: f64,
}

impl RvSeries {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            history: Vec::with_capacity(MAX_PRICE_HISTORY),
            head: 0,
            count: 0,
            rv_10d: 0.0,
            rv_20d: 0.0,
            rv_30d: 0.0,
            rv_trend: 0.0,
            rv_mean: 0.0,
            rv_std: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Insert a bar and refresh the derived metrics. Inconsistent bars are
    /// rejected and leave the series untouched.
    pub fn push_bar(&mut self, bar: OhlcBar) -> bool {
        if !bar.is_valid() {
            return false;
        }

        if self.history.len() < MAX_PRICE_HISTORY {
            self.history.push(bar);
        } else {
            self.history[self.head] = bar;
        }
        self.head = (self.head + 1) % MAX_PRICE_HISTORY;
        if self.count < MAX_PRICE_HISTORY {
            self.count += 1;
        }

        self.recompute();
        true
    }

    /// Bars ordered newest first.
    fn ordered(&self) -> Vec<OhlcBar> {
        let mut out = Vec::with_capacity(self.count);
        for i in 0..self.count {
            let idx = (self.head + MAX_PRICE_HISTORY - 1 - i) % MAX_PRICE_HISTORY;
            out.push(self.history[idx]);
        }
        out
    }

    fn recompute(&mut self) {
        if self.count < 10 {
            return;
        }
        let ordered = self.ordered();

        if ordered.len() >= 10 {
            self.rv_10d = parkinson_rv(&ordered, 10);
        }
        if ordered.len() >= 20 {
            self.rv_20d = parkinson_rv(&ordered, 20);
        }
        if ordered.len() >= 30 {
            self.rv_30d = parkinson_rv(&ordered, 30);
        }

        if self.rv_10d > 0.0 && self.rv_20d > 0.0 {
            self.rv_trend = (self.rv_10d - self.rv_20d) / self.rv_20d;
        }

        // Rolling 20-day windows over the last 60+ bars give the
        // distribution used for percentile judgements.
        if ordered.len() >= 60 {
            let mut values = Vec::with_capacity(40);
            let mut i = 0;
            while i < 40 && i + 20 < ordered.len() {
                let rv = parkinson_rv(&ordered[i..], 20);
                if rv > 0.0 {
                    values.push(rv);
                }
                i += 1;
            }

            if values.len() > 10 {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
                    / values.len() as f64;
                self.rv_mean = mean;
                self.rv_std = var.sqrt();
            }
        }
    }
}

/// Compare an observed implied vol against the realized series, choosing the
/// RV window that matches the contract's days to expiry.
pub fn analyze_iv_vs_rv(implied_vol: f64, rv: &RvSeries, days_to_expiry: f64) -> IvRvAnalysis {
    if implied_vol <= 0.0 || rv.rv_20d <= 0.0 {
        return IvRvAnalysis::no_data();
    }

    let mut relevant_rv = rv.rv_20d;
    if days_to_expiry < 15.0 && rv.rv_10d > 0.0 {
        relevant_rv = rv.rv_10d;
    } else if days_to_expiry > 45.0 && rv.rv_30d > 0.0 {
        relevant_rv = rv.rv_30d;
    }

    let spread = implied_vol - relevant_rv;

    let (percentile, regime) = if rv.rv_mean > 0.0 && rv.rv_std > 0.0 {
        let z = (implied_vol - rv.rv_mean) / rv.rv_std;
        let pct = 0.5 * (1.0 + libm::erf(z / 2.0_f64.sqrt()));
        let regime = if relevant_rv < rv.rv_mean - 0.5 * rv.rv_std {
            VolRegime::Low
        } else if relevant_rv > rv.rv_mean + 0.5 * rv.rv_std {
            VolRegime::High
        } else {
            VolRegime::Normal
        };
        (Some(pct), Some(regime))
    } else {
        (None, None)
    };

    let threshold = relevant_rv * 0.15;
    let (signal, mut recommendation) = if spread > threshold {
        let rec = if percentile.is_some_and(|p| p > 0.8) {
            "SELL VOL - IV extremely rich vs RV"
        } else {
            "SHORT BIAS - IV moderately expensive"
        };
        (IvRvSignal::Expensive, rec.to_string())
    } else if spread < -threshold {
        let rec = if percentile.is_some_and(|p| p < 0.2) {
            "BUY VOL - IV extremely cheap vs RV"
        } else {
            "LONG BIAS - IV moderately cheap"
        };
        (IvRvSignal::Cheap, rec.to_string())
    } else {
        (IvRvSignal::Neutral, "FAIR VALUE - IV in line with RV".to_string())
    };

    if rv.rv_trend > 0.2 {
        recommendation.push_str(" (RV rising)");
    } else if rv.rv_trend < -0.2 {
        recommendation.push_str(" (RV falling)");
    }

    IvRvAnalysis {
        spread,
        percentile,
        regime,
        signal,
        recommendation,
    }
}

/// All realized-vol series, keyed by underlying. Seeded once from historical
/// bars at startup; re-read by the analyzers.
pub struct RvStore {
    series: DashMap<String, RvSeries>,
}

impl RvStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            series: DashMap::new(),
        })
    }

    /// Seed a series from chronological bars, replacing any existing data.
    pub fn seed(&self, symbol: &str, bars: &[OhlcBar]) {
        let mut rv = RvSeries::new(symbol);
        let mut accepted = 0usize;
        for bar in bars {
            if rv.push_bar(*bar) {
                accepted += 1;
            }
        }
        debug!(
            "Seeded RV series for {}: {} of {} bars accepted",
            symbol,
            accepted,
            bars.len()
        );
        self.series.insert(symbol.to_string(), rv);
    }

    /// Clone the series for an underlying, if seeded.
    pub fn get(&self, symbol: &str) -> Option<RvSeries> {
        self.series.get(symbol).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl Default for RvStore {
    fn default() -> Self {
        Self {
            series: DashMap::new(),
        }
    }
}
