//! Per-underlying spot price cache.
//!
//! Written by the equities session, read by the analytics path on every
//! option update. Entries live in a sharded concurrent map so a write to one
//! underlying never blocks reads of another, and readers never take a write
//! lock.

use crate::types::UnderlyingPrice;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Latest underlying prices keyed by ticker.
pub struct PriceCache {
    entries: DashMap<String, UnderlyingPrice>,
    max_underlyings: usize,
}

impl PriceCache {
    pub fn new(max_underlyings: usize) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            max_underlyings,
        })
    }

    /// Latest usable spot for a symbol, or None before the first update.
    pub fn get_price(&self, symbol: &str) -> Option<f64> {
        let entry = self.entries.get(symbol)?;
        if entry.is_valid && entry.last_price > 0.0 {
            Some(entry.last_price)
        } else {
            None
        }
    }

    /// Record a trade print for the underlying.
    pub fn update_trade(&self, symbol: &str, price: f64, size: u64, timestamp: &str) -> bool {
        if !self.ensure_entry(symbol) {
            return false;
        }
        let mut entry = self.entries.get_mut(symbol).expect("entry just ensured");
        entry.last_price = price;
        entry.last_size = size;
        entry.timestamp = timestamp.to_string();
        entry.is_valid = true;
        true
    }

    /// Record a quote. The mid-price becomes the spot only while no trade
    /// print has been seen yet.
    pub fn update_quote(
        &self,
        symbol: &str,
        bid_price: f64,
        bid_size: u64,
        ask_price: f64,
        ask_size: u64,
        timestamp: &str,
    ) -> bool {
        if !self.ensure_entry(symbol) {
            return false;
        }
        let mut entry = self.entries.get_mut(symbol).expect("entry just ensured");
        entry.bid_price = bid_price;
        entry.bid_size = bid_size;
        entry.ask_price = ask_price;
        entry.ask_size = ask_size;
        entry.timestamp = timestamp.to_string();

        if !entry.is_valid && bid_price > 0.0 && ask_price > 0.0 {
            entry.last_price = (bid_price + ask_price) / 2.0;
            entry.is_valid = true;
            debug!(
                "No trade print for {} yet, seeding spot from mid: {:.4}",
                symbol, entry.last_price
            );
        }
        true
    }

    fn ensure_entry(&self, symbol: &str) -> bool {
        if self.entries.contains_key(symbol) {
            return true;
        }
        if self.entries.len() >= self.max_underlyings {
            debug!("Price cache at capacity, dropping update for {}", symbol);
            return false;
        }
        self.entries.insert(
            symbol.to_string(),
            UnderlyingPrice {
                symbol: symbol.to_string(),
                ..Default::default()
            },
        );
        true
    }

    /// Copy out every entry.
    pub fn snapshot(&self) -> Vec<UnderlyingPrice> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
