//! Wire-protocol walkthroughs for both sessions, driven frame by frame.

use chrono::{Datelike, Duration, Utc};
use serde_json::{json, Value};
use vigil::services::{OptionsTable, PriceCache};
use vigil::sources::options_ws::OptionsProtocol;
use vigil::sources::stocks_ws::StocksProtocol;
use vigil::sources::SessionState;

fn future_symbol(strike_thousandths: u64) -> String {
    let d = Utc::now() + Duration::days(90);
    format!(
        "QQQ{:02}{:02}{:02}C{:08}",
        d.year() % 100,
        d.month(),
        d.day(),
        strike_thousandths
    )
}

fn pack(value: &Value) -> Vec<u8> {
    rmp_serde::to_vec_named(value).unwrap()
}

#[test]
fn options_session_full_walkthrough() {
    let cache = PriceCache::new(10);
    cache.update_trade("QQQ", 560.0, 100, "t0");
    let table = OptionsTable::new(cache, 100, 0, 16);
    let symbol = future_symbol(560_000);

    let mut protocol = OptionsProtocol::new(table.clone(), vec![symbol.clone()], true, 0.05);

    // Connect -> auth
    let auth = protocol.auth_frame("key", "secret").unwrap();
    assert_eq!(protocol.state, SessionState::Authenticating);
    let decoded: Value = rmp_serde::from_slice(&auth).unwrap();
    assert_eq!(decoded["action"], "auth");

    // Server: [{T: success}] -> client subscribes
    let outbound = protocol.on_frame(&pack(&json!([{"T": "success", "msg": "authenticated"}])));
    assert!(protocol.authenticated);
    assert!(protocol.subscribed);
    assert_eq!(protocol.state, SessionState::Subscribing);
    assert_eq!(outbound.len(), 1);
    let sub: Value = rmp_serde::from_slice(&outbound[0]).unwrap();
    assert_eq!(sub["action"], "subscribe");
    assert_eq!(sub["trades"][0], symbol.as_str());
    assert_eq!(sub["quotes"][0], symbol.as_str());

    // Server: [{T: subscription}] -> streaming
    protocol.on_frame(&pack(&json!([{"T": "subscription"}])));
    assert_eq!(protocol.state, SessionState::Streaming);

    // A trade lands and analytics run against the cached spot
    protocol.on_frame(&pack(&json!([{
        "T": "t", "S": symbol.as_str(), "t": "2025-08-01T14:30:00.123Z",
        "p": 15.25, "s": 2, "x": "C", "c": "I"
    }])));
    let rows = table.snapshot();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].has_trade);
    assert!(rows[0].analytics.analytics_valid);
    assert!(rows[0].analytics.metrics.iv_converged);
}

#[test]
fn options_trades_only_variant_omits_quotes() {
    let cache = PriceCache::new(10);
    let table = OptionsTable::new(cache, 100, 0, 16);
    let mut protocol = OptionsProtocol::new(table, vec![future_symbol(560_000)], false, 0.05);

    let outbound = protocol.on_frame(&pack(&json!([{"T": "success"}])));
    let sub: Value = rmp_serde::from_slice(&outbound[0]).unwrap();
    assert!(sub.get("trades").is_some());
    assert!(sub.get("quotes").is_none());
}

#[test]
fn options_error_is_logged_and_dropped() {
    let cache = PriceCache::new(10);
    let table = OptionsTable::new(cache, 100, 0, 16);
    let mut protocol = OptionsProtocol::new(table.clone(), vec![future_symbol(560_000)], true, 0.05);

    let outbound = protocol.on_frame(&pack(
        &json!([{"T": "error", "code": 400, "msg": "invalid syntax"}]),
    ));
    assert!(outbound.is_empty());
    assert!(!protocol.authenticated);
    assert_eq!(table.len(), 0);
}

#[test]
fn stocks_session_full_walkthrough() {
    let cache = PriceCache::new(10);
    let mut protocol = StocksProtocol::new(cache.clone(), vec!["QQQ".to_string()]);

    let auth = protocol.auth_frame("key", "secret").unwrap();
    assert!(auth.contains("\"action\":\"auth\""));
    assert_eq!(protocol.state, SessionState::Authenticating);

    let outbound =
        protocol.on_frame(r#"[{"T":"success","msg":"authenticated"}]"#);
    assert_eq!(outbound.len(), 1);
    assert!(protocol.authenticated);
    let sub: Value = serde_json::from_str(&outbound[0]).unwrap();
    assert_eq!(sub["action"], "subscribe");
    assert_eq!(sub["trades"][0], "QQQ");

    protocol.on_frame(r#"[{"T":"subscription","trades":["QQQ"],"quotes":["QQQ"]}]"#);
    assert_eq!(protocol.state, SessionState::Streaming);

    protocol.on_frame(r#"[{"T":"t","S":"QQQ","p":561.15,"s":200,"t":"2025-08-01T14:30:01Z"}]"#);
    assert_eq!(cache.get_price("QQQ"), Some(561.15));
}

#[test]
fn cross_session_flow_quote_then_spot_then_analytics() {
    // Session B delivers the spot; session A then produces valid analytics
    let cache = PriceCache::new(10);
    let table = OptionsTable::new(cache.clone(), 100, 0, 16);
    let symbol = future_symbol(560_000);

    let mut stocks = StocksProtocol::new(cache.clone(), vec!["QQQ".to_string()]);
    let mut options = OptionsProtocol::new(table.clone(), vec![symbol.clone()], true, 0.05);

    // Option quote arrives before any spot: row upserted, analytics invalid
    options.on_frame(&pack(&json!([{
        "T": "q", "S": symbol.as_str(),
        "bp": 14.9, "bs": 5, "ap": 15.3, "as": 5
    }])));
    assert!(!table.snapshot()[0].analytics.analytics_valid);

    // Equities quote seeds the spot from the mid
    stocks.on_frame(r#"[{"T":"q","S":"QQQ","bp":559.9,"bs":1,"ap":560.1,"as":1}]"#);
    assert_eq!(cache.get_price("QQQ"), Some(560.0));

    // Next option update recomputes successfully
    options.on_frame(&pack(&json!([{
        "T": "q", "S": symbol.as_str(),
        "bp": 15.0, "bs": 5, "ap": 15.4, "as": 5
    }])));
    let row = &table.snapshot()[0];
    assert!(row.analytics.analytics_valid);
    assert_eq!(row.analytics.underlying_price, 560.0);
}
