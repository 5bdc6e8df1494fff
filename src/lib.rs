//! Vigil - real-time options analytics engine.
//!
//! Two market-data sessions (a MessagePack options feed and a JSON equities
//! feed) drive a shared options table; every update refreshes implied vol
//! and the Greeks ladder, and a periodic analyzer derives volatility smiles,
//! IV-vs-RV spreads and dislocation alerts.

pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;

pub use config::Config;
pub use error::{AppError, Result};
