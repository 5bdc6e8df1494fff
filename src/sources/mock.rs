//! Local data generator for development: replaces both websocket sessions
//! and writes synthetic trades and quotes through the same table and cache
//! paths the live feeds use.

use crate::services::options_table::OptionsTable;
use crate::services::price_cache::PriceCache;
use crate::types::{extract_underlying, OptionQuote, OptionTrade};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::info;

/// Milliseconds between synthetic update rounds.
const MOCK_INTERVAL_MS: u64 = 500;

struct MockOption {
    symbol: String,
    last_trade_price: f64,
    bid_price: f64,
    ask_price: f64,
}

/// Plausible starting spot for well-known tickers.
fn initial_underlying_price(symbol: &str) -> f64 {
    match symbol {
        "AAPL" => 150.0,
        "QQQ" => 350.0,
        "SPY" => 450.0,
        "TSLA" => 200.0,
        "MSFT" => 300.0,
        "NVDA" => 800.0,
        _ => 100.0,
    }
}

fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

/// Synthetic market-data generator.
pub struct MockFeed {
    table: Arc<OptionsTable>,
    cache: Arc<PriceCache>,
    symbols: Vec<String>,
    risk_free_rate: f64,
    shutdown: watch::Receiver<bool>,
}

impl MockFeed {
    pub fn new(
        table: Arc<OptionsTable>,
        cache: Arc<PriceCache>,
        symbols: Vec<String>,
        risk_free_rate: f64,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            table,
            cache,
            symbols,
            risk_free_rate,
            shutdown,
        }
    }

    /// Generate data until shutdown.
    pub async fn run(mut self) {
        info!(
            "Mock feed generating data for {} symbols every {}ms",
            self.symbols.len(),
            MOCK_INTERVAL_MS
        );

        let mut rng = StdRng::from_entropy();
        let mut underlyings: HashMap<String, f64> = HashMap::new();
        let mut options: Vec<MockOption> = Vec::new();

        for symbol in &self.symbols {
            let underlying = extract_underlying(symbol).unwrap_or_else(|| "UNKNOWN".to_string());
            underlyings
                .entry(underlying.clone())
                .or_insert_with(|| initial_underlying_price(&underlying));

            let last = rng.gen_range(1.0..15.0);
            let spread = last * 0.02;
            options.push(MockOption {
                symbol: symbol.clone(),
                last_trade_price: last,
                bid_price: last - spread / 2.0,
                ask_price: last + spread / 2.0,
            });
        }

        let mut ticker = interval(Duration::from_millis(MOCK_INTERVAL_MS));
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("Mock feed stopping");
                        return;
                    }
                }
                _ = ticker.tick() => {}
            }

            // Random-walk each underlying (~1% vol) and publish as trades
            for (symbol, price) in underlyings.iter_mut() {
                let step = rng.gen_range(-1.0..1.0) * 0.01 * *price;
                *price = (*price + step).max(1.0);
                self.cache
                    .update_trade(symbol, *price, rng.gen_range(1..500), &now_timestamp());
            }

            // Drift each option premium (~2% vol) and alternate trade/quote
            for opt in options.iter_mut() {
                let step = rng.gen_range(-1.0..1.0) * 0.02 * opt.last_trade_price;
                opt.last_trade_price = (opt.last_trade_price + step).max(0.01);
                let spread = opt.last_trade_price * 0.02;
                opt.bid_price = (opt.last_trade_price - spread / 2.0).max(0.01);
                opt.ask_price = opt.last_trade_price + spread / 2.0;

                if rng.gen_bool(0.5) {
                    self.table.apply_trade(
                        &opt.symbol,
                        OptionTrade {
                            last_price: opt.last_trade_price,
                            last_size: rng.gen_range(1..50),
                            trade_exchange: "X".to_string(),
                            trade_time: now_timestamp(),
                            condition: "I".to_string(),
                        },
                        self.risk_free_rate,
                    );
                } else {
                    self.table.apply_quote(
                        &opt.symbol,
                        OptionQuote {
                            bid_price: opt.bid_price,
                            bid_size: rng.gen_range(1..100),
                            bid_exchange: "X".to_string(),
                            ask_price: opt.ask_price,
                            ask_size: rng.gen_range(1..100),
                            ask_exchange: "X".to_string(),
                            quote_time: now_timestamp(),
                            condition: "A".to_string(),
                        },
                        self.risk_free_rate,
                    );
                }
            }
        }
    }
}
