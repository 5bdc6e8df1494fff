//! Stream coordinator: owns the shared state, both feed sessions and the
//! periodic structural analyzer.
//!
//! The websocket tasks are the only writers of the options table and the
//! price cache. The analyzer reads snapshots on a timer and never mutates
//! source data. A single watch channel fans the shutdown flag out to every
//! task.

use crate::config::Config;
use crate::error::Result;
use crate::services::dislocation::detect_dislocation;
use crate::services::options_table::OptionsTable;
use crate::services::price_cache::PriceCache;
use crate::services::realized_vol::RvStore;
use crate::services::smile::build_smiles;
use crate::sources::{MockFeed, OptionsWs, StocksWs};
use crate::types::{extract_underlying, DislocationAlert, OptionRow, VolatilitySmile};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// Shared engine state plus the lifecycle of the I/O and analyzer tasks.
pub struct StreamCoordinator {
    config: Arc<Config>,
    table: Arc<OptionsTable>,
    cache: Arc<PriceCache>,
    rv_store: Arc<RvStore>,
    risk_free_rate: f64,
    smiles: Mutex<Vec<VolatilitySmile>>,
    alerts: Mutex<Vec<DislocationAlert>>,
    shutdown_tx: watch::Sender<bool>,
}

impl StreamCoordinator {
    pub fn new(config: Arc<Config>, risk_free_rate: f64) -> Arc<Self> {
        let cache = PriceCache::new(config.max_underlyings);
        let table = OptionsTable::new(
            cache.clone(),
            config.max_contracts,
            config.throttle_ms,
            config.expiry_hour,
        );
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            config,
            table,
            cache,
            rv_store: RvStore::new(),
            risk_free_rate,
            smiles: Mutex::new(Vec::new()),
            alerts: Mutex::new(Vec::new()),
            shutdown_tx,
        })
    }

    pub fn table(&self) -> Arc<OptionsTable> {
        self.table.clone()
    }

    pub fn price_cache(&self) -> Arc<PriceCache> {
        self.cache.clone()
    }

    pub fn rv_store(&self) -> Arc<RvStore> {
        self.rv_store.clone()
    }

    pub fn risk_free_rate(&self) -> f64 {
        self.risk_free_rate
    }

    /// Distinct underlyings derivable from the option symbol set.
    pub fn derive_underlyings(symbols: &[String]) -> Vec<String> {
        let mut underlyings: Vec<String> = Vec::new();
        for symbol in symbols {
            if let Some(u) = extract_underlying(symbol) {
                if !underlyings.contains(&u) {
                    underlyings.push(u);
                }
            }
        }
        underlyings
    }

    /// Spawn both live feed sessions.
    pub fn start_streams(self: &Arc<Self>, symbols: Vec<String>) -> Vec<JoinHandle<Result<()>>> {
        let underlyings = Self::derive_underlyings(&symbols);
        info!(
            "Starting streams: {} contracts, {} underlyings",
            symbols.len(),
            underlyings.len()
        );

        let options = OptionsWs::new(
            self.config.clone(),
            self.table.clone(),
            symbols,
            self.risk_free_rate,
            self.shutdown_tx.subscribe(),
        );
        let stocks = StocksWs::new(
            self.config.clone(),
            self.cache.clone(),
            underlyings,
            self.shutdown_tx.subscribe(),
        );

        let coordinator = self.clone();
        let options_handle = tokio::spawn(async move {
            let result = options.run().await;
            if let Err(ref e) = result {
                error!("Options session ended with error: {}", e);
            }
            // Engine is useless without the options feed
            coordinator.shutdown();
            result
        });

        let stocks_handle = tokio::spawn(async move {
            let result = stocks.run().await;
            if let Err(ref e) = result {
                error!("Stock session ended with error: {}", e);
            }
            result
        });

        vec![options_handle, stocks_handle]
    }

    /// Spawn the mock generator instead of the live sessions.
    pub fn start_mock(self: &Arc<Self>, symbols: Vec<String>) -> JoinHandle<()> {
        let feed = MockFeed::new(
            self.table.clone(),
            self.cache.clone(),
            symbols,
            self.risk_free_rate,
            self.shutdown_tx.subscribe(),
        );
        tokio::spawn(feed.run())
    }

    /// Spawn the periodic smile / dislocation analyzer.
    pub fn start_analyzer(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(
                coordinator.config.smile_interval_secs.max(1),
            ));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Analyzer stopping");
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        coordinator.run_analysis_pass();
                    }
                }
            }
        })
    }

    /// One analyzer pass over a consistent snapshot of the table.
    pub fn run_analysis_pass(&self) {
        let rows = self.table.snapshot();
        if rows.is_empty() {
            return;
        }

        let smiles = build_smiles(&rows, self.config.max_smile_points);
        let alerts = self.detect_alerts(&rows);

        for alert in &alerts {
            info!(
                "Dislocation {} | {} | {}",
                alert.symbol, alert.message, alert.trade_recommendation
            );
        }

        *self.smiles.lock().expect("smile table poisoned") = smiles;
        *self.alerts.lock().expect("alert table poisoned") = alerts;
    }

    fn detect_alerts(&self, rows: &[OptionRow]) -> Vec<DislocationAlert> {
        rows.iter()
            .filter_map(|row| {
                let underlying = extract_underlying(&row.symbol)?;
                let rv = self.rv_store.get(&underlying);
                detect_dislocation(&row.symbol, &row.analytics, rv.as_ref())
            })
            .filter(|alert| alert.is_anomalous())
            .collect()
    }

    /// Latest smiles, copied out.
    pub fn smiles(&self) -> Vec<VolatilitySmile> {
        self.smiles.lock().expect("smile table poisoned").clone()
    }

    /// Latest anomalous alerts, copied out.
    pub fn alerts(&self) -> Vec<DislocationAlert> {
        self.alerts.lock().expect("alert table poisoned").clone()
    }

    /// Raise the shutdown flag for every task.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// A receiver for tasks that want to observe shutdown directly.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}
