pub mod api_client;
pub mod fred;
pub mod mock;
pub mod options_ws;
pub mod stocks_ws;

pub use api_client::ApiClient;
pub use fred::fetch_risk_free_rate;
pub use mock::MockFeed;
pub use options_ws::OptionsWs;
pub use stocks_ws::StocksWs;

use serde_json::Value;

/// Lifecycle of one websocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Subscribing,
    Streaming,
    Closed,
}

/// Both feeds deliver either a single envelope map or an array of them.
pub fn envelope_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        _ => Vec::new(),
    }
}

/// Numeric field tolerant of float64, float32 and integer wire encodings.
pub fn get_f64(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(|v| {
        v.as_f64()
            .or_else(|| v.as_u64().map(|u| u as f64))
            .or_else(|| v.as_i64().map(|i| i as f64))
    })
}

/// Size field: positive or negative integer variants, floats truncated.
pub fn get_u64(value: &Value, key: &str) -> Option<u64> {
    value.get(key).and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_i64().map(|i| i.max(0) as u64))
            .or_else(|| v.as_f64().map(|f| f.max(0.0) as u64))
    })
}

pub fn get_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}
