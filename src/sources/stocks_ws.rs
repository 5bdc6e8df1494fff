//! Equities feed session: JSON text frames over a secure websocket.
//!
//! Same auth/subscribe ritual and `T`-discriminated envelopes as the options
//! feed, but text-encoded. Trades update the underlying spot; quotes only
//! seed a mid-price before the first trade print arrives.

use crate::config::Config;
use crate::error::Result;
use crate::services::price_cache::PriceCache;
use crate::sources::{envelope_items, get_f64, get_str, get_u64, SessionState};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

#[derive(Debug, Serialize)]
struct AuthMessage {
    action: String,
    key: String,
    secret: String,
}

#[derive(Debug, Serialize)]
struct SubscribeMessage {
    action: String,
    trades: Vec<String>,
    quotes: Vec<String>,
}

/// JSON protocol driver for the equities session.
pub struct StocksProtocol {
    cache: Arc<PriceCache>,
    underlyings: Vec<String>,
    pub state: SessionState,
    pub authenticated: bool,
    pub subscribed: bool,
}

impl StocksProtocol {
    pub fn new(cache: Arc<PriceCache>, underlyings: Vec<String>) -> Self {
        Self {
            cache,
            underlyings,
            state: SessionState::Connecting,
            authenticated: false,
            subscribed: false,
        }
    }

    pub fn auth_frame(&mut self, api_key: &str, api_secret: &str) -> Result<String> {
        let msg = AuthMessage {
            action: "auth".to_string(),
            key: api_key.to_string(),
            secret: api_secret.to_string(),
        };
        self.state = SessionState::Authenticating;
        Ok(serde_json::to_string(&msg)?)
    }

    fn subscribe_frame(&self) -> Result<String> {
        let msg = SubscribeMessage {
            action: "subscribe".to_string(),
            trades: self.underlyings.clone(),
            quotes: self.underlyings.clone(),
        };
        Ok(serde_json::to_string(&msg)?)
    }

    /// Process one inbound text frame; returns frames to send back.
    pub fn on_frame(&mut self, text: &str) -> Vec<String> {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("Dropping unparsable stock frame: {}", e);
                return Vec::new();
            }
        };

        let mut outbound = Vec::new();
        for item in envelope_items(value) {
            if let Some(frame) = self.on_envelope(&item) {
                outbound.push(frame);
            }
        }
        outbound
    }

    fn on_envelope(&mut self, item: &Value) -> Option<String> {
        let msg_type = get_str(item, "T")?;
        match msg_type {
            "success" => {
                info!("[STOCK] Authenticated");
                self.authenticated = true;
                if !self.subscribed {
                    match self.subscribe_frame() {
                        Ok(frame) => {
                            self.state = SessionState::Subscribing;
                            self.subscribed = true;
                            info!(
                                "[STOCK] Subscribing to {} underlyings",
                                self.underlyings.len()
                            );
                            return Some(frame);
                        }
                        Err(e) => error!("[STOCK] Failed to encode subscribe: {}", e),
                    }
                }
            }
            "subscription" => {
                info!("[STOCK] Subscription confirmed");
                self.state = SessionState::Streaming;
            }
            "error" => {
                error!(
                    "[STOCK] Server error {:?}: {}",
                    get_u64(item, "code"),
                    get_str(item, "msg").unwrap_or("unknown")
                );
            }
            "t" => {
                if let (Some(symbol), Some(price)) = (get_str(item, "S"), get_f64(item, "p")) {
                    let size = get_u64(item, "s").unwrap_or(0);
                    let timestamp = get_str(item, "t").unwrap_or("");
                    self.cache.update_trade(symbol, price, size, timestamp);
                    debug!("[STOCK] Trade: {} @ {:.4}", symbol, price);
                }
            }
            "q" => {
                if let (Some(symbol), Some(bid), Some(ask)) = (
                    get_str(item, "S"),
                    get_f64(item, "bp"),
                    get_f64(item, "ap"),
                ) {
                    let bid_size = get_u64(item, "bs").unwrap_or(0);
                    let ask_size = get_u64(item, "as").unwrap_or(0);
                    let timestamp = get_str(item, "t").unwrap_or("");
                    self.cache
                        .update_quote(symbol, bid, bid_size, ask, ask_size, timestamp);
                }
            }
            other => debug!("[STOCK] Ignoring message type {:?}", other),
        }
        None
    }
}

/// The equities websocket session.
pub struct StocksWs {
    config: Arc<Config>,
    cache: Arc<PriceCache>,
    underlyings: Vec<String>,
    shutdown: watch::Receiver<bool>,
}

impl StocksWs {
    pub fn new(
        config: Arc<Config>,
        cache: Arc<PriceCache>,
        underlyings: Vec<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            cache,
            underlyings,
            shutdown,
        }
    }

    /// Run the session until shutdown or transport close.
    pub async fn run(mut self) -> Result<()> {
        let url = self.config.stocks_ws_url.clone();
        info!("[STOCK] Connecting to {}", url);

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();
        info!("[STOCK] Connected");

        let mut protocol = StocksProtocol::new(self.cache.clone(), self.underlyings.clone());
        let api_key = self.config.api_key.clone().unwrap_or_default();
        let api_secret = self.config.api_secret.clone().unwrap_or_default();
        let auth = protocol.auth_frame(&api_key, &api_secret)?;
        write.send(Message::Text(auth)).await?;
        debug!("[STOCK] Sent auth (JSON)");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("[STOCK] Shutdown requested, closing");
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            for frame in protocol.on_frame(&text) {
                                write.send(Message::Text(frame)).await?;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("[STOCK] Server closed the connection");
                            break;
                        }
                        Some(Err(e)) => {
                            error!("[STOCK] Transport error: {}", e);
                            protocol.state = SessionState::Closed;
                            return Err(e.into());
                        }
                        None => break,
                        _ => {}
                    }
                }
            }
        }

        protocol.state = SessionState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn protocol() -> (StocksProtocol, Arc<PriceCache>) {
        let cache = PriceCache::new(10);
        let p = StocksProtocol::new(cache.clone(), vec!["QQQ".to_string(), "SPY".to_string()]);
        (p, cache)
    }

    // =========================================================================
    // Wire Format Tests
    // =========================================================================

    #[test]
    fn test_auth_frame_json() {
        let (mut p, _) = protocol();
        let frame = p.auth_frame("test_key", "test_secret").unwrap();
        assert!(frame.contains("\"action\":\"auth\""));
        assert!(frame.contains("\"key\":\"test_key\""));
        assert_eq!(p.state, SessionState::Authenticating);
    }

    #[test]
    fn test_subscribe_frame_lists_underlyings() {
        let (p, _) = protocol();
        let frame = p.subscribe_frame().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["action"], "subscribe");
        assert_eq!(value["trades"].as_array().unwrap().len(), 2);
        assert_eq!(value["quotes"].as_array().unwrap().len(), 2);
    }

    // =========================================================================
    // State Machine Tests
    // =========================================================================

    #[test]
    fn test_auth_then_subscribe_then_stream() {
        let (mut p, _) = protocol();
        p.auth_frame("k", "s").unwrap();

        let outbound = p.on_frame(r#"[{"T":"success","msg":"authenticated"}]"#);
        assert_eq!(outbound.len(), 1);
        assert!(p.authenticated);
        assert_eq!(p.state, SessionState::Subscribing);

        let outbound = p.on_frame(r#"[{"T":"subscription","trades":["QQQ"]}]"#);
        assert!(outbound.is_empty());
        assert_eq!(p.state, SessionState::Streaming);
    }

    #[test]
    fn test_unparsable_frame_dropped() {
        let (mut p, _) = protocol();
        assert!(p.on_frame("not json at all").is_empty());
        assert_eq!(p.state, SessionState::Connecting);
    }

    // =========================================================================
    // Price Update Tests
    // =========================================================================

    #[test]
    fn test_trade_sets_spot() {
        let (mut p, cache) = protocol();
        p.on_frame(r#"[{"T":"t","S":"QQQ","p":560.25,"s":100,"t":"2025-08-01T14:30:00Z"}]"#);
        assert_eq!(cache.get_price("QQQ"), Some(560.25));
    }

    #[test]
    fn test_quote_seeds_mid_only_before_trade() {
        let (mut p, cache) = protocol();
        p.on_frame(r#"[{"T":"q","S":"QQQ","bp":560.0,"bs":5,"ap":560.5,"as":7}]"#);
        assert_eq!(cache.get_price("QQQ"), Some(560.25));

        // A trade print takes over
        p.on_frame(r#"[{"T":"t","S":"QQQ","p":561.0,"s":10}]"#);
        assert_eq!(cache.get_price("QQQ"), Some(561.0));

        // Later quotes no longer move the spot
        p.on_frame(r#"[{"T":"q","S":"QQQ","bp":500.0,"bs":5,"ap":501.0,"as":7}]"#);
        assert_eq!(cache.get_price("QQQ"), Some(561.0));
    }

    #[test]
    fn test_batch_updates_multiple_symbols() {
        let (mut p, cache) = protocol();
        let frame = json!([
            {"T":"t","S":"QQQ","p":560.0,"s":1},
            {"T":"t","S":"SPY","p":450.0,"s":2},
        ])
        .to_string();
        p.on_frame(&frame);
        assert_eq!(cache.get_price("QQQ"), Some(560.0));
        assert_eq!(cache.get_price("SPY"), Some(450.0));
    }

    #[test]
    fn test_missing_fields_ignored() {
        let (mut p, cache) = protocol();
        p.on_frame(r#"[{"T":"t","S":"QQQ"}]"#);
        assert_eq!(cache.get_price("QQQ"), None);
    }
}
