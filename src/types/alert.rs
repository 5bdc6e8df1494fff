use serde::{Deserialize, Serialize};

/// Verdict of the IV-vs-RV comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IvRvSignal {
    Expensive,
    Cheap,
    Neutral,
    NoData,
}

/// Prevailing realized-vol environment relative to its own history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolRegime {
    Low,
    Normal,
    High,
}

/// Output of the IV-vs-RV analysis for one contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvRvAnalysis {
    /// IV - RV over the expiry-matched window (positive = expensive vol).
    pub spread: f64,
    /// IV percentile against the historical RV distribution, when available.
    pub percentile: Option<f64>,
    pub regime: Option<VolRegime>,
    pub signal: IvRvSignal,
    pub recommendation: String,
}

impl IvRvAnalysis {
    pub fn no_data() -> Self {
        Self {
            spread: 0.0,
            percentile: None,
            regime: None,
            signal: IvRvSignal::NoData,
            recommendation: "Insufficient RV data".to_string(),
        }
    }
}

/// Per-contract dislocation verdict combining higher-order Greeks with the
/// IV-vs-RV spread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DislocationAlert {
    pub symbol: String,
    pub vanna_anomaly: bool,
    pub volga_anomaly: bool,
    pub charm_anomaly: bool,
    pub iv_rv_anomaly: bool,
    /// Vanna/Volga ratio, when Volga is meaningfully non-zero.
    pub vanna_volga_ratio: Option<f64>,
    pub iv_rv_spread: f64,
    pub message: String,
    pub trade_recommendation: String,
}

impl DislocationAlert {
    /// Whether any sub-predicate fired.
    pub fn is_anomalous(&self) -> bool {
        self.vanna_anomaly || self.volga_anomaly || self.charm_anomaly || self.iv_rv_anomaly
    }
}
