//! Options feed session: binary MessagePack frames over a secure websocket.
//!
//! Connect, authenticate, subscribe, stream. Every inbound frame is a map or
//! an array of maps discriminated by the one-letter `T` key; trades and
//! quotes are upserted straight into the options table.

use crate::config::Config;
use crate::error::Result;
use crate::services::options_table::OptionsTable;
use crate::sources::{envelope_items, get_f64, get_str, get_u64, SessionState};
use crate::types::{OptionQuote, OptionTrade};
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

/// Subscription envelope. The feed accepts trades-only and trades+quotes
/// variants; `quotes` is omitted entirely when not requested.
#[derive(Debug, Serialize)]
struct SubscribeMessage {
    action: String,
    trades: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quotes: Option<Vec<String>>,
}

/// Wire-level protocol driver, separated from the socket so the state
/// machine is testable frame by frame.
pub struct OptionsProtocol {
    table: Arc<OptionsTable>,
    symbols: Vec<String>,
    subscribe_quotes: bool,
    risk_free_rate: f64,
    pub state: SessionState,
    pub authenticated: bool,
    pub subscribed: bool,
}

impl OptionsProtocol {
    pub fn new(
        table: Arc<OptionsTable>,
        symbols: Vec<String>,
        subscribe_quotes: bool,
        risk_free_rate: f64,
    ) -> Self {
        Self {
            table,
            symbols,
            subscribe_quotes,
            risk_free_rate,
            state: SessionState::Connecting,
            authenticated: false,
            subscribed: false,
        }
    }

    /// MessagePack auth frame; sending it moves the session to
    /// `Authenticating`.
    pub fn auth_frame(&mut self, api_key: &str, api_secret: &str) -> Result<Vec<u8>> {
        let msg = AuthMessage {
            action: "auth".to_string(),
            key: api_key.to_string(),
            secret: api_secret.to_string(),
        };
        self.state = SessionState::Authenticating;
        Ok(rmp_serde::to_vec_named(&msg)?)
    }

    fn subscribe_frame(&self) -> Result<Vec<u8>> {
        let msg = SubscribeMessage {
            action: "subscribe".to_string(),
            trades: self.symbols.clone(),
            quotes: self.subscribe_quotes.then(|| self.symbols.clone()),
        };
        Ok(rmp_serde::to_vec_named(&msg)?)
    }

    /// Process one inbound binary frame. Returns frames to send back
    /// (the subscribe request, after a successful auth).
    pub fn on_frame(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let value: Value = match rmp_serde::from_slice(data) {
            Ok(v) => v,
            Err(e) => {
                warn!("Dropping unparsable options frame: {}", e);
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

    fn on_envelope(&mut self, item: &Value) -> Option<Vec<u8>> {
        let msg_type = get_str(item, "T")?;
        match msg_type {
            "success" => {
                info!("[OPTIONS] Authenticated");
                self.authenticated = true;
                if !self.subscribed {
                    match self.subscribe_frame() {
                        Ok(frame) => {
                            self.state = SessionState::Subscribing;
                            self.subscribed = true;
                            info!(
                                "[OPTIONS] Subscribing to {} symbols ({})",
                                self.symbols.len(),
                                if self.subscribe_quotes {
                                    "trades + quotes"
                                } else {
                                    "trades only"
                                }
                            );
                            return Some(frame);
                        }
                        Err(e) => error!("[OPTIONS] Failed to encode subscribe: {}", e),
                    }
                }
            }
            "subscription" => {
                info!("[OPTIONS] Subscription confirmed");
                self.state = SessionState::Streaming;
            }
            "error" => {
                let code = get_u64(item, "code");
                let msg = get_str(item, "msg").unwrap_or("unknown");
                if code == Some(400) {
                    error!(
                        "[OPTIONS] Server error 400: {} (bad subscription shape)",
                        msg
                    );
                } else {
                    error!("[OPTIONS] Server error {:?}: {}", code, msg);
                }
            }
            "t" => self.on_trade(item),
            "q" => self.on_quote(item),
            other => debug!("[OPTIONS] Ignoring message type {:?}", other),
        }
        None
    }

    fn on_trade(&mut self, item: &Value) {
        let Some(symbol) = get_str(item, "S") else {
            return;
        };
        let trade = OptionTrade {
            last_price: get_f64(item, "p").unwrap_or(0.0),
            last_size: get_u64(item, "s").unwrap_or(0),
            trade_exchange: get_str(item, "x").unwrap_or("").to_string(),
            trade_time: get_str(item, "t").unwrap_or("").to_string(),
            condition: get_str(item, "c").unwrap_or("").to_string(),
        };
        self.table
            .apply_trade(symbol, trade, self.risk_free_rate);
    }

    fn on_quote(&mut self, item: &Value) {
        let Some(symbol) = get_str(item, "S") else {
            return;
        };
        let quote = OptionQuote {
            bid_price: get_f64(item, "bp").unwrap_or(0.0),
            bid_size: get_u64(item, "bs").unwrap_or(0),
            bid_exchange: get_str(item, "bx").unwrap_or("").to_string(),
            ask_price: get_f64(item, "ap").unwrap_or(0.0),
            ask_size: get_u64(item, "as").unwrap_or(0),
            ask_exchange: get_str(item, "ax").unwrap_or("").to_string(),
            quote_time: get_str(item, "t").unwrap_or("").to_string(),
            condition: get_str(item, "c").unwrap_or("").to_string(),
        };
        self.table
            .apply_quote(symbol, quote, self.risk_free_rate);
    }
}

/// The options websocket session.
pub struct OptionsWs {
    config: Arc<Config>,
    table: Arc<OptionsTable>,
    symbols: Vec<String>,
    risk_free_rate: f64,
    shutdown: watch::Receiver<bool>,
}

impl OptionsWs {
    pub fn new(
        config: Arc<Config>,
        table: Arc<OptionsTable>,
        symbols: Vec<String>,
        risk_free_rate: f64,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            table,
            symbols,
            risk_free_rate,
            shutdown,
        }
    }

    /// Run the session until shutdown or transport close.
    pub async fn run(mut self) -> Result<()> {
        let url = self.config.options_ws_url.clone();
        info!("[OPTIONS] Connecting to {}", url);

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();
        info!("[OPTIONS] Connected");

        let mut protocol = OptionsProtocol::new(
            self.table.clone(),
            self.symbols.clone(),
            self.config.subscribe_quotes,
            self.risk_free_rate,
        );

        let api_key = self.config.api_key.clone().unwrap_or_default();
        let api_secret = self.config.api_secret.clone().unwrap_or_default();
        let auth = protocol.auth_frame(&api_key, &api_secret)?;
        write.send(Message::Binary(auth)).await?;
        debug!("[OPTIONS] Sent auth (MsgPack)");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("[OPTIONS] Shutdown requested, closing");
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            for frame in protocol.on_frame(&data) {
                                write.send(Message::Binary(frame)).await?;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("[OPTIONS] Server closed the connection");
                            break;
                        }
                        Some(Err(e)) => {
                            error!("[OPTIONS] Transport error: {}", e);
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
