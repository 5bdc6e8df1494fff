//! The options table: the single shared store of per-contract market data
//! and derived analytics.
//!
//! One mutex guards the whole table. The websocket session is the only
//! writer; the analyzers copy snapshots out under the same mutex, so they
//! can never observe a half-written row.

use crate::services::pricing;
use crate::services::price_cache::PriceCache;
use crate::types::{parse_option_details, OptionQuote, OptionRow, OptionTrade, OptionType};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct TableInner {
    rows: HashMap<String, OptionRow>,
}

/// Shared options table with a configurable contract cap and a per-row
/// analytics throttle.
pub struct OptionsTable {
    inner: Mutex<TableInner>,
    price_cache: Arc<PriceCache>,
    max_contracts: usize,
    throttle: Duration,
    expiry_hour: u32,
    /// Updates dropped because the table was full.
    capacity_exceeded: AtomicU64,
}

impl OptionsTable {
    pub fn new(
        price_cache: Arc<PriceCache>,
        max_contracts: usize,
        throttle_ms: u64,
        expiry_hour: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(TableInner {
                rows: HashMap::new(),
            }),
            price_cache,
            max_contracts,
            throttle: Duration::from_millis(throttle_ms),
            expiry_hour,
            capacity_exceeded: AtomicU64::new(0),
        })
    }

    /// Apply an inbound trade: upsert the row, then refresh analytics.
    pub fn apply_trade(&self, symbol: &str, trade: OptionTrade, risk_free_rate: f64) {
        let mut inner = self.inner.lock().expect("options table poisoned");
        let Some(row) = Self::find_or_create(
            &mut inner.rows,
            symbol,
            self.max_contracts,
            &self.capacity_exceeded,
        ) else {
            return;
        };
        row.trade = trade;
        row.has_trade = true;
        self.compute_analytics(row, risk_free_rate);
    }

    /// Apply an inbound quote: upsert the row, then refresh analytics.
    pub fn apply_quote(&self, symbol: &str, quote: OptionQuote, risk_free_rate: f64) {
        let mut inner = self.inner.lock().expect("options table poisoned");
        let Some(row) = Self::find_or_create(
            &mut inner.rows,
            symbol,
            self.max_contracts,
            &self.capacity_exceeded,
        ) else {
            return;
        };
        row.quote = quote;
        row.has_quote = true;
        self.compute_analytics(row, risk_free_rate);
    }

    fn find_or_create<'a>(
        rows: &'a mut HashMap<String, OptionRow>,
        symbol: &str,
        max_contracts: usize,
        capacity_exceeded: &AtomicU64,
    ) -> Option<&'a mut OptionRow> {
        if !rows.contains_key(symbol) {
            if rows.len() >= max_contracts {
                let dropped = capacity_exceeded.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 1000 == 0 {
                    warn!(
                        "Options table at capacity ({}), dropped update for {} ({} total)",
                        max_contracts, symbol, dropped
                    );
                }
                return None;
            }
            rows.insert(symbol.to_string(), OptionRow::new(symbol));
        }
        rows.get_mut(symbol)
    }

    /// Refresh a row's analytics snapshot from the latest inputs.
    ///
    /// Throttled per row: within the throttle window the upsert still lands
    /// but the compute is skipped. Any missing input clears
    /// `analytics_valid` and leaves the previous snapshot in place.
    fn compute_analytics(&self, row: &mut OptionRow, risk_free_rate: f64) {
        if let Some(last) = row.last_computed_at {
            if last.elapsed() < self.throttle {
                return;
            }
        }
        row.last_computed_at = Some(Instant::now());

        let Ok(details) = parse_option_details(&row.symbol) else {
            row.analytics.analytics_valid = false;
            return;
        };

        let Some(underlying_price) = self.price_cache.get_price(&details.underlying) else {
            row.analytics.analytics_valid = false;
            return;
        };

        let time_to_expiry = pricing::time_to_expiry_years(&details.expiry_date, self.expiry_hour);
        if time_to_expiry <= 0.0 {
            row.analytics.analytics_valid = false;
            return;
        }

        let Some(option_price) = row.reference_price() else {
            row.analytics.analytics_valid = false;
            return;
        };

        let is_call = details.option_type == OptionType::Call;
        let metrics = pricing::full_metrics(
            underlying_price,
            details.strike,
            time_to_expiry,
            risk_free_rate,
            option_price,
            is_call,
        );

        if !metrics.iv_converged {
            debug!(
                "IV solver did not converge for {} at price {:.4}",
                row.symbol, option_price
            );
        }

        row.analytics.metrics = metrics;
        row.analytics.underlying_price = underlying_price;
        row.analytics.strike = details.strike;
        row.analytics.time_to_expiry = time_to_expiry;
        row.analytics.is_call = is_call;
        row.analytics.analytics_valid = true;
    }

    /// Copy every row out under the table mutex.
    pub fn snapshot(&self) -> Vec<OptionRow> {
        let inner = self.inner.lock().expect("options table poisoned");
        let mut rows: Vec<OptionRow> = inner.rows.values().cloned().collect();
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        rows
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("options table poisoned").rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of updates dropped on the capacity cap.
    pub fn capacity_exceeded_count(&self) -> u64 {
        self.capacity_exceeded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration as ChronoDuration, Utc};

    /// YYMMDD one year from now, so contracts in tests are never expired.
    fn future_expiry() -> String {
        let d = Utc::now() + ChronoDuration::days(365);
        format!("{:02}{:02}{:02}", d.year() % 100, d.month(), d.day())
    }

    fn call_symbol(underlying: &str, strike_thousandths: u64) -> String {
        format!("{}{}C{:08}", underlying, future_expiry(), strike_thousandths)
    }

    fn trade(price: f64) -> OptionTrade {
        OptionTrade {
            last_price: price,
            last_size: 10,
            trade_exchange: "C".to_string(),
            trade_time: "2025-08-01T14:30:00Z".to_string(),
            condition: "".to_string(),
        }
    }

    fn quote(bid: f64, ask: f64) -> OptionQuote {
        OptionQuote {
            bid_price: bid,
            bid_size: 5,
            bid_exchange: "C".to_string(),
            ask_price: ask,
            ask_size: 7,
            ask_exchange: "C".to_string(),
            quote_time: "2025-08-01T14:30:00Z".to_string(),
            condition: "".to_string(),
        }
    }

    fn table_with_spot(spot: f64) -> Arc<OptionsTable> {
        let cache = PriceCache::new(10);
        cache.update_trade("QQQ", spot, 100, "t0");
        OptionsTable::new(cache, 100, 0, 16)
    }

    // =========================================================================
    // Upsert Tests
    // =========================================================================

    #[test]
    fn test_trade_upsert_computes_analytics() {
        let table = table_with_spot(560.0);
        let symbol = call_symbol("QQQ", 560_000);
        table.apply_trade(&symbol, trade(25.0), 0.05);

        let rows = table.snapshot();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert!(row.has_trade);
        assert!(row.analytics.analytics_valid);
        assert_eq!(row.analytics.underlying_price, 560.0);
        assert!((row.analytics.strike - 560.0).abs() < 1e-9);
        assert!(row.analytics.time_to_expiry > 0.0);
        assert!(row.analytics.is_call);
    }

    #[test]
    fn test_quote_upsert_uses_mid() {
        let table = table_with_spot(560.0);
        let symbol = call_symbol("QQQ", 560_000);
        table.apply_quote(&symbol, quote(24.0, 26.0), 0.05);

        let rows = table.snapshot();
        assert!(rows[0].has_quote);
        assert!(rows[0].analytics.analytics_valid);
        assert!(rows[0].analytics.metrics.implied_vol > 0.0);
    }

    #[test]
    fn test_missing_spot_clears_validity() {
        let cache = PriceCache::new(10);
        let table = OptionsTable::new(cache, 100, 0, 16);
        let symbol = call_symbol("QQQ", 560_000);
        table.apply_trade(&symbol, trade(25.0), 0.05);

        let rows = table.snapshot();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].has_trade);
        assert!(!rows[0].analytics.analytics_valid);
    }

    #[test]
    fn test_malformed_symbol_clears_validity() {
        let table = table_with_spot(560.0);
        table.apply_trade("NOTASYMBOL", trade(25.0), 0.05);
        let rows = table.snapshot();
        assert!(!rows[0].analytics.analytics_valid);
    }

    #[test]
    fn test_expired_contract_clears_validity() {
        let table = table_with_spot(560.0);
        table.apply_trade("QQQ200101C00560000", trade(25.0), 0.05);
        let rows = table.snapshot();
        assert!(!rows[0].analytics.analytics_valid);
    }

    // =========================================================================
    // Capacity Tests
    // =========================================================================

    #[test]
    fn test_capacity_cap_drops_and_counts() {
        let cache = PriceCache::new(10);
        cache.update_trade("QQQ", 560.0, 100, "t0");
        let table = OptionsTable::new(cache, 2, 0, 16);

        table.apply_trade(&call_symbol("QQQ", 550_000), trade(30.0), 0.05);
        table.apply_trade(&call_symbol("QQQ", 560_000), trade(25.0), 0.05);
        assert_eq!(table.len(), 2);
        assert_eq!(table.capacity_exceeded_count(), 0);

        // Unknown symbol at capacity: size unchanged, counter increments by 1
        table.apply_trade(&call_symbol("QQQ", 570_000), trade(20.0), 0.05);
        assert_eq!(table.len(), 2);
        assert_eq!(table.capacity_exceeded_count(), 1);
    }

    #[test]
    fn test_existing_row_updates_at_capacity() {
        let cache = PriceCache::new(10);
        cache.update_trade("QQQ", 560.0, 100, "t0");
        let table = OptionsTable::new(cache, 1, 0, 16);

        let symbol = call_symbol("QQQ", 560_000);
        table.apply_trade(&symbol, trade(25.0), 0.05);
        table.apply_trade(&symbol, trade(26.0), 0.05);
        assert_eq!(table.len(), 1);
        assert_eq!(table.capacity_exceeded_count(), 0);
        assert_eq!(table.snapshot()[0].trade.last_price, 26.0);
    }

    // =========================================================================
    // Throttle Tests
    // =========================================================================

    #[test]
    fn test_throttle_skips_recompute_but_upserts() {
        let cache = PriceCache::new(10);
        cache.update_trade("QQQ", 560.0, 100, "t0");
        // Generous throttle so the second compute is guaranteed to be skipped
        let table = OptionsTable::new(cache, 100, 60_000, 16);

        let symbol = call_symbol("QQQ", 560_000);
        table.apply_trade(&symbol, trade(25.0), 0.05);
        let iv_first = table.snapshot()[0].analytics.metrics.implied_vol;

        table.apply_trade(&symbol, trade(40.0), 0.05);
        let rows = table.snapshot();
        // Upsert landed, analytics did not move
        assert_eq!(rows[0].trade.last_price, 40.0);
        assert_eq!(rows[0].analytics.metrics.implied_vol, iv_first);
    }

    #[test]
    fn test_compute_is_idempotent_without_throttle() {
        let table = table_with_spot(560.0);
        let symbol = call_symbol("QQQ", 560_000);
        table.apply_trade(&symbol, trade(25.0), 0.05);
        let first = table.snapshot()[0].analytics.clone();
        table.apply_trade(&symbol, trade(25.0), 0.05);
        let second = table.snapshot()[0].analytics.clone();

        // Identical inputs (modulo the clock's sub-second drift in T)
        assert_eq!(first.underlying_price, second.underlying_price);
        assert!((first.metrics.implied_vol - second.metrics.implied_vol).abs() < 1e-6);
        assert!((first.metrics.delta - second.metrics.delta).abs() < 1e-6);
        assert!(first.analytics_valid && second.analytics_valid);
    }
}
