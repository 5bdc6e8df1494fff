//! Per-contract dislocation detection.
//!
//! Joint anomaly rules over the higher-order Greeks and the IV-vs-RV
//! spread. Pure in (analytics snapshot, RV series): missing inputs suppress
//! the corresponding sub-predicate rather than failing the contract.

use crate::services::realized_vol::{analyze_iv_vs_rv, RvSeries};
use crate::types::{AnalyticsSnapshot, DislocationAlert, IvRvSignal};

/// Contracts this close to expiry are exempt from the Volga/Charm floor
/// rules, which are meaningless in the last days of life.
const MIN_T_FOR_DECAY_RULES: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoneynessBucket {
    Itm,
    Atm,
    Otm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DteBucket {
    Short,
    Near,
    Far,
}

fn moneyness_bucket(analytics: &AnalyticsSnapshot) -> MoneynessBucket {
    let m = analytics.strike / analytics.underlying_price;
    if (0.97..=1.03).contains(&m) {
        return MoneynessBucket::Atm;
    }
    // For calls a strike above spot is OTM; for puts it is ITM
    let strike_above = m > 1.0;
    if strike_above == analytics.is_call {
        MoneynessBucket::Otm
    } else {
        MoneynessBucket::Itm
    }
}

fn dte_bucket(days_to_expiry: f64) -> DteBucket {
    if days_to_expiry < 7.0 {
        DteBucket::Short
    } else if days_to_expiry <= 30.0 {
        DteBucket::Near
    } else {
        DteBucket::Far
    }
}

/// Deterministic recommendation catalog, keyed by which predicates fired and
/// the contract's moneyness and DTE buckets.
fn recommend(
    alert: &DislocationAlert,
    analytics: &AnalyticsSnapshot,
    days_to_expiry: f64,
) -> String {
    let m = moneyness_bucket(analytics);
    let dte = dte_bucket(days_to_expiry);

    if alert.iv_rv_anomaly {
        if alert.iv_rv_spread > 0.0 {
            return match (m, dte) {
                (MoneynessBucket::Atm, DteBucket::Short) => "SELL IRON CONDORS",
                (MoneynessBucket::Otm, _) if !analytics.is_call => "SELL PUT SPREADS",
                (MoneynessBucket::Otm, _) => "SELL CALL SPREADS",
                _ => "SELL STRADDLES",
            }
            .to_string();
        }
        return match (m, dte) {
            (_, DteBucket::Far) => "BUY CALENDARS",
            (MoneynessBucket::Atm, _) => "BUY STRADDLES",
            _ => "BUY VERTICAL SPREADS",
        }
        .to_string();
    }

    if alert.volga_anomaly {
        let rich_volga = analytics.metrics.volga.abs() > 40.0;
        return match (rich_volga, m) {
            (true, MoneynessBucket::Atm) => "SELL BUTTERFLIES",
            (true, _) => "SELL WINGS - RICH VOLGA",
            (false, _) => "BUY BUTTERFLIES - CHEAP CONVEXITY",
        }
        .to_string();
    }

    if alert.vanna_anomaly {
        return "TRADE RISK REVERSALS - VANNA DISLOCATION".to_string();
    }

    if alert.charm_anomaly {
        return match dte {
            DteBucket::Short => "ROLL DELTAS - CHARM DECAY",
            _ => "MONITOR CHARM",
        }
        .to_string();
    }

    "MONITOR".to_string()
}

/// Run the dislocation rules for one contract.
///
/// Returns None for rows without valid analytics; a non-anomalous alert is
/// still returned so callers can read the ratio and spread.
pub fn detect_dislocation(
    symbol: &str,
    analytics: &AnalyticsSnapshot,
    rv: Option<&RvSeries>,
) -> Option<DislocationAlert> {
    if !analytics.analytics_valid {
        return None;
    }
    let metrics = &analytics.metrics;
    let t = analytics.time_to_expiry;
    let days_to_expiry = t * 365.25;

    // Vanna: sign should follow moneyness (positive when ITM)
    let itm = if analytics.is_call {
        analytics.underlying_price > analytics.strike
    } else {
        analytics.underlying_price < analytics.strike
    };
    let expected_sign = if itm { 1.0 } else { -1.0 };
    let vanna_anomaly = expected_sign * metrics.vanna < 0.0 || metrics.vanna.abs() > 2.0;

    let volga_anomaly =
        metrics.volga.abs() > 40.0 || (metrics.volga.abs() < 2.0 && t > MIN_T_FOR_DECAY_RULES);

    let charm_anomaly =
        (metrics.charm > 0.0 && t > MIN_T_FOR_DECAY_RULES) || metrics.charm.abs() > 200.0;

    let vanna_volga_ratio = if metrics.volga.abs() > 1e-3 {
        Some(metrics.vanna / metrics.volga)
    } else {
        None
    };

    // IV vs RV, suppressed when no usable series exists
    let (iv_rv_anomaly, iv_rv_spread) = match rv {
        Some(rv) if rv.rv_20d > 0.0 && metrics.iv_converged => {
            let analysis = analyze_iv_vs_rv(metrics.implied_vol, rv, days_to_expiry);
            match analysis.signal {
                IvRvSignal::NoData => (false, 0.0),
                _ => (analysis.spread.abs() > 0.15, analysis.spread),
            }
        }
        _ => (false, 0.0),
    };

    let mut alert = DislocationAlert {
        symbol: symbol.to_string(),
        vanna_anomaly,
        volga_anomaly,
        charm_anomaly,
        iv_rv_anomaly,
        vanna_volga_ratio,
        iv_rv_spread,
        message: String::new(),
        trade_recommendation: String::new(),
    };

    let mut parts: Vec<String> = Vec::new();
    if vanna_anomaly {
        parts.push(format!("Vanna {:.3} against expected sign", metrics.vanna));
    }
    if volga_anomaly {
        parts.push(format!("Volga {:.2} out of range", metrics.volga));
    }
    if charm_anomaly {
        parts.push(format!("Charm {:.2} anomalous", metrics.charm));
    }
    if iv_rv_anomaly {
        parts.push(format!("IV-RV spread {:+.1}%", iv_rv_spread * 100.0));
    }
    if let Some(ratio) = vanna_volga_ratio {
        if !(0.05..=0.5).contains(&ratio) {
            parts.push(format!("Vanna/Volga ratio {:.3} outside [0.05, 0.5]", ratio));
        }
    }
    alert.message = if parts.is_empty() {
        "No dislocation".to_string()
    } else {
        parts.join("; ")
    };
    alert.trade_recommendation = recommend(&alert, analytics, days_to_expiry);

    Some(alert)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BsMetrics, OhlcBar};

    fn analytics(s: f64, k: f64, t: f64, is_call: bool, metrics: BsMetrics) -> AnalyticsSnapshot {
        AnalyticsSnapshot {
            metrics,
            underlying_price: s,
            strike: k,
            time_to_expiry: t,
            is_call,
            analytics_valid: true,
        }
    }

    /// Metrics engineered so no rule fires on an ITM call: vanna positive
    /// and small, volga in (2, 40), charm negative and modest.
    fn quiet_metrics() -> BsMetrics {
        BsMetrics {
            implied_vol: 0.25,
            iv_converged: true,
            vanna: 1.0,
            volga: 10.0,
            charm: -1.0,
            ..Default::default()
        }
    }

    fn rv_series() -> RvSeries {
        let mut rv = RvSeries::new("QQQ");
        for i in 0..70 {
            let base = 100.0 + (i % 2) as f64;
            rv.push_bar(OhlcBar {
                open: base,
                high: base + 1.0,
                low: base - 1.0,
                close: base + 0.5,
            });
        }
        rv
    }

    // =========================================================================
    // Predicate Tests
    // =========================================================================

    #[test]
    fn test_invalid_analytics_yields_none() {
        let snapshot = AnalyticsSnapshot::default();
        assert!(detect_dislocation("X", &snapshot, None).is_none());
    }

    #[test]
    fn test_quiet_contract_monitors() {
        // ITM call (S > K) with well-behaved higher-order Greeks
        let snap = analytics(110.0, 100.0, 0.25, true, quiet_metrics());
        let alert = detect_dislocation("QQQ_TEST", &snap, None).unwrap();
        assert!(!alert.is_anomalous());
        assert_eq!(alert.trade_recommendation, "MONITOR");
        assert_eq!(alert.message, "No dislocation");
    }

    #[test]
    fn test_vanna_magnitude_anomaly() {
        let mut m = quiet_metrics();
        m.vanna = 5.0;
        let snap = analytics(110.0, 100.0, 0.25, true, m);
        let alert = detect_dislocation("X", &snap, None).unwrap();
        assert!(alert.vanna_anomaly);
    }

    #[test]
    fn test_vanna_sign_anomaly_itm_call() {
        // ITM call expects positive vanna; a negative reading is dislocated
        let mut m = quiet_metrics();
        m.vanna = -0.5;
        let snap = analytics(110.0, 100.0, 0.25, true, m);
        let alert = detect_dislocation("X", &snap, None).unwrap();
        assert!(alert.vanna_anomaly);
    }

    #[test]
    fn test_vanna_sign_anomaly_otm_put() {
        // OTM put (S > K) expects negative vanna
        let mut m = quiet_metrics();
        m.vanna = -1.0;
        let snap = analytics(110.0, 120.0, 0.25, false, m);
        // S < K for the put means ITM; S=110 K=120 is ITM put, negative is wrong
        let alert = detect_dislocation("X", &snap, None).unwrap();
        assert!(alert.vanna_anomaly);
    }

    #[test]
    fn test_volga_high_anomaly() {
        let mut m = quiet_metrics();
        m.volga = 55.0;
        let snap = analytics(110.0, 100.0, 0.25, true, m);
        let alert = detect_dislocation("X", &snap, None).unwrap();
        assert!(alert.volga_anomaly);
    }

    #[test]
    fn test_volga_floor_anomaly_away_from_expiry() {
        let mut m = quiet_metrics();
        m.volga = 0.5;
        let snap = analytics(110.0, 100.0, 0.25, true, m);
        let alert = detect_dislocation("X", &snap, None).unwrap();
        assert!(alert.volga_anomaly);
    }

    #[test]
    fn test_volga_floor_ignored_near_expiry() {
        let mut m = quiet_metrics();
        m.volga = 0.5;
        let snap = analytics(110.0, 100.0, 0.01, true, m);
        let alert = detect_dislocation("X", &snap, None).unwrap();
        assert!(!alert.volga_anomaly);
    }

    #[test]
    fn test_charm_positive_anomaly() {
        let mut m = quiet_metrics();
        m.charm = 0.8;
        let snap = analytics(110.0, 100.0, 0.25, true, m);
        let alert = detect_dislocation("X", &snap, None).unwrap();
        assert!(alert.charm_anomaly);
    }

    #[test]
    fn test_charm_magnitude_anomaly() {
        let mut m = quiet_metrics();
        m.charm = -250.0;
        let snap = analytics(110.0, 100.0, 0.25, true, m);
        let alert = detect_dislocation("X", &snap, None).unwrap();
        assert!(alert.charm_anomaly);
    }

    #[test]
    fn test_ratio_only_with_meaningful_volga() {
        let mut m = quiet_metrics();
        m.volga = 0.0;
        let snap = analytics(110.0, 100.0, 0.25, true, m);
        let alert = detect_dislocation("X", &snap, None).unwrap();
        assert!(alert.vanna_volga_ratio.is_none());
    }

    #[test]
    fn test_ratio_computed_and_noted() {
        let mut m = quiet_metrics();
        m.vanna = 10.0;
        m.volga = 10.0;
        let snap = analytics(110.0, 100.0, 0.25, true, m);
        let alert = detect_dislocation("X", &snap, None).unwrap();
        assert_eq!(alert.vanna_volga_ratio, Some(1.0));
        // 1.0 is outside [0.05, 0.5]
        assert!(alert.message.contains("ratio"));
    }

    #[test]
    fn test_iv_rv_anomaly_fires_on_wide_spread() {
        let rv = rv_series();
        let mut m = quiet_metrics();
        m.implied_vol = rv.rv_20d + 0.30;
        let snap = analytics(110.0, 100.0, 0.1, true, m);
        let alert = detect_dislocation("X", &snap, Some(&rv)).unwrap();
        assert!(alert.iv_rv_anomaly);
        assert!(alert.iv_rv_spread > 0.15);
    }

    #[test]
    fn test_iv_rv_suppressed_without_series() {
        let mut m = quiet_metrics();
        m.implied_vol = 2.0;
        let snap = analytics(110.0, 100.0, 0.1, true, m);
        let alert = detect_dislocation("X", &snap, None).unwrap();
        assert!(!alert.iv_rv_anomaly);
        assert_eq!(alert.iv_rv_spread, 0.0);
    }

    #[test]
    fn test_iv_rv_suppressed_for_unconverged_iv() {
        let rv = rv_series();
        let mut m = quiet_metrics();
        m.implied_vol = rv.rv_20d + 0.30;
        m.iv_converged = false;
        let snap = analytics(110.0, 100.0, 0.1, true, m);
        let alert = detect_dislocation("X", &snap, Some(&rv)).unwrap();
        assert!(!alert.iv_rv_anomaly);
    }

    // =========================================================================
    // Recommendation Catalog Tests
    // =========================================================================

    #[test]
    fn test_expensive_otm_put_recommendation() {
        let rv = rv_series();
        let mut m = quiet_metrics();
        m.implied_vol = rv.rv_20d + 0.30;
        // S=100, K=90 put: strike below spot is OTM for the put
        let snap = analytics(100.0, 90.0, 0.1, false, m);
        let alert = detect_dislocation("X", &snap, Some(&rv)).unwrap();
        assert!(alert.iv_rv_anomaly);
        assert_eq!(alert.trade_recommendation, "SELL PUT SPREADS");
    }

    #[test]
    fn test_expensive_short_dated_atm_recommendation() {
        let rv = rv_series();
        let mut m = quiet_metrics();
        m.implied_vol = rv.rv_20d + 0.30;
        // ~3.6 DTE, ATM
        let snap = analytics(100.0, 100.0, 0.01, true, m);
        let alert = detect_dislocation("X", &snap, Some(&rv)).unwrap();
        assert_eq!(alert.trade_recommendation, "SELL IRON CONDORS");
    }

    #[test]
    fn test_cheap_long_dated_recommendation() {
        let rv = rv_series();
        let mut m = quiet_metrics();
        m.implied_vol = 0.01;
        // ~73 DTE, IV far below RV
        let snap = analytics(100.0, 100.0, 0.2, true, m);
        let alert = detect_dislocation("X", &snap, Some(&rv)).unwrap();
        assert!(alert.iv_rv_anomaly);
        assert!(alert.iv_rv_spread < 0.0);
        assert_eq!(alert.trade_recommendation, "BUY CALENDARS");
    }

    #[test]
    fn test_volga_recommendation_without_iv_rv() {
        let mut m = quiet_metrics();
        m.volga = 55.0;
        let snap = analytics(100.0, 100.0, 0.25, true, m);
        let alert = detect_dislocation("X", &snap, None).unwrap();
        assert_eq!(alert.trade_recommendation, "SELL BUTTERFLIES");
    }

    #[test]
    fn test_detector_is_pure() {
        let rv = rv_series();
        let m = quiet_metrics();
        let snap = analytics(100.0, 105.0, 0.25, true, m);
        let a = detect_dislocation("X", &snap, Some(&rv)).unwrap();
        let b = detect_dislocation("X", &snap, Some(&rv)).unwrap();
        assert_eq!(a.vanna_anomaly, b.vanna_anomaly);
        assert_eq!(a.iv_rv_spread, b.iv_rv_spread);
        assert_eq!(a.message, b.message);
        assert_eq!(a.trade_recommendation, b.trade_recommendation);
    }
}
