//! Volatility smile construction and pattern classification.
//!
//! Rebuilt on every analyzer tick from a snapshot of the options table:
//! one smile per (underlying, expiry), points only from rows whose IV
//! actually converged.

use crate::types::{parse_option_details, OptionRow, OptionType, SmilePoint, VolatilitySmile};
use std::collections::HashMap;
use tracing::{info, warn};

/// 2% IV difference threshold for skew detection.
const SKEW_THRESHOLD: f64 = 0.02;
/// 1% IV difference threshold for smile / inverted-smile detection.
const SMILE_THRESHOLD: f64 = 0.01;
/// Minimum points for a reliable smile.
const MIN_SMILE_POINTS: usize = 3;

/// strike / underlying_price; 0 for a degenerate spot.
pub fn moneyness(strike: f64, underlying_price: f64) -> f64 {
    if underlying_price <= 0.0 {
        return 0.0;
    }
    strike / underlying_price
}

/// ATM vol by interpolation toward moneyness 1.0.
///
/// A point within 1% of ATM wins outright; otherwise interpolate linearly
/// between the neighbors straddling the closest point.
fn interpolate_atm_vol(points: &[SmilePoint]) -> f64 {
    if points.len() < 2 {
        return points.first().map(|p| p.implied_vol).unwrap_or(0.0);
    }

    let target = 1.0;
    let mut best_idx = 0;
    let mut best_diff = (points[0].moneyness - target).abs();
    for (i, p) in points.iter().enumerate().skip(1) {
        let diff = (p.moneyness - target).abs();
        if diff < best_diff {
            best_diff = diff;
            best_idx = i;
        }
    }

    if best_diff < 0.01 {
        return points[best_idx].implied_vol;
    }

    if best_idx > 0 && best_idx < points.len() - 1 {
        let x0 = points[best_idx - 1].moneyness;
        let x1 = points[best_idx + 1].moneyness;
        let y0 = points[best_idx - 1].implied_vol;
        let y1 = points[best_idx + 1].implied_vol;
        if (x1 - x0).abs() > f64::EPSILON {
            let t = (target - x0) / (x1 - x0);
            return y0 + t * (y1 - y0);
        }
    }

    points[best_idx].implied_vol
}

/// R-squared of a linear fit of IV against ln(moneyness).
fn fit_r_squared(points: &[SmilePoint]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }

    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_x2, mut sum_y2) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for p in points {
        let x = p.moneyness.ln();
        let y = p.implied_vol;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
        sum_y2 += y * y;
    }

    let n = points.len() as f64;
    let numerator = n * sum_xy - sum_x * sum_y;
    let denom_x = n * sum_x2 - sum_x * sum_x;
    let denom_y = n * sum_y2 - sum_y * sum_y;
    if denom_x <= 0.0 || denom_y <= 0.0 {
        return 0.0;
    }
    let r = numerator / (denom_x * denom_y).sqrt();
    r * r
}

/// Recompute a smile's shape metrics and pattern flags in place.
pub fn analyze_smile(smile: &mut VolatilitySmile) {
    if smile.points.len() < MIN_SMILE_POINTS {
        smile.sufficient_data = false;
        return;
    }
    smile.sufficient_data = true;

    smile
        .points
        .sort_by(|a, b| a.strike.partial_cmp(&b.strike).unwrap_or(std::cmp::Ordering::Equal));

    smile.min_vol = smile
        .points
        .iter()
        .map(|p| p.implied_vol)
        .fold(f64::INFINITY, f64::min);
    smile.max_vol = smile
        .points
        .iter()
        .map(|p| p.implied_vol)
        .fold(f64::NEG_INFINITY, f64::max);

    smile.atm_vol = interpolate_atm_vol(&smile.points);
    smile.r_squared = fit_r_squared(&smile.points);

    // First OTM put below / first OTM call above, in strike order
    let mut otm_put_vol = None;
    let mut otm_call_vol = None;
    for p in &smile.points {
        if otm_put_vol.is_none() && p.moneyness < 0.95 && p.option_type == OptionType::Put {
            otm_put_vol = Some(p.implied_vol);
        }
        if otm_call_vol.is_none() && p.moneyness > 1.05 && p.option_type == OptionType::Call {
            otm_call_vol = Some(p.implied_vol);
        }
    }

    smile.put_skew = 0.0;
    smile.call_skew = 0.0;
    if smile.atm_vol > 0.0 {
        if let Some(v) = otm_put_vol {
            smile.put_skew = smile.atm_vol - v;
        }
        if let Some(v) = otm_call_vol {
            smile.call_skew = v - smile.atm_vol;
        }
    }

    // Divided-difference second derivative at the middle point
    smile.curvature = 0.0;
    let mid = smile.points.len() / 2;
    if mid > 0 && mid < smile.points.len() - 1 {
        let h1 = smile.points[mid].moneyness - smile.points[mid - 1].moneyness;
        let h2 = smile.points[mid + 1].moneyness - smile.points[mid].moneyness;
        if h1 > 0.0 && h2 > 0.0 {
            let y0 = smile.points[mid - 1].implied_vol;
            let y1 = smile.points[mid].implied_vol;
            let y2 = smile.points[mid + 1].implied_vol;
            smile.curvature = (y2 - 2.0 * y1 + y0) / (h1 * h2);
        }
    }

    smile.has_put_skew = smile.put_skew > SKEW_THRESHOLD;
    smile.has_call_skew = smile.call_skew > SKEW_THRESHOLD;
    smile.has_smile =
        smile.curvature > SMILE_THRESHOLD && (smile.max_vol - smile.atm_vol) > SMILE_THRESHOLD;
    smile.is_inverted =
        smile.curvature < -SMILE_THRESHOLD && (smile.atm_vol - smile.min_vol) > SMILE_THRESHOLD;
}

/// Whether a smile's shape is unusual enough to surface.
pub fn is_smile_anomaly(smile: &VolatilitySmile) -> bool {
    if !smile.sufficient_data {
        return false;
    }
    if smile.put_skew.abs() > 0.05 || smile.call_skew.abs() > 0.05 {
        return true;
    }
    if smile.is_inverted {
        return true;
    }
    if smile.r_squared < 0.7 && smile.points.len() >= 5 {
        return true;
    }
    if (smile.max_vol - smile.min_vol) > 0.10 {
        return true;
    }
    false
}

/// Build smiles from a table snapshot, keyed by (underlying, expiry).
///
/// Rows without valid, converged analytics contribute nothing. Smiles are
/// capped at `max_points`; overflow points are dropped.
pub fn build_smiles(rows: &[OptionRow], max_points: usize) -> Vec<VolatilitySmile> {
    let mut by_key: HashMap<(String, String), VolatilitySmile> = HashMap::new();
    let mut dropped = 0usize;

    for row in rows {
        if !row.analytics.analytics_valid || !row.analytics.metrics.iv_converged {
            continue;
        }
        let Ok(details) = parse_option_details(&row.symbol) else {
            continue;
        };

        let key = (details.underlying.clone(), details.expiry_date.clone());
        let smile = by_key.entry(key).or_insert_with(|| {
            let mut s = VolatilitySmile::new(&details.underlying, &details.expiry_date);
            s.time_to_expiry = row.analytics.time_to_expiry;
            s.underlying_price = row.analytics.underlying_price;
            s
        });

        if smile.points.len() >= max_points {
            dropped += 1;
            continue;
        }
        smile.points.push(SmilePoint {
            strike: details.strike,
            implied_vol: row.analytics.metrics.implied_vol,
            moneyness: moneyness(details.strike, row.analytics.underlying_price),
            time_to_expiry: row.analytics.time_to_expiry,
            option_type: details.option_type,
        });
    }

    if dropped > 0 {
        warn!("Smile point cap reached, dropped {} points", dropped);
    }

    let mut smiles: Vec<VolatilitySmile> = by_key.into_values().collect();
    for smile in &mut smiles {
        analyze_smile(smile);
        if is_smile_anomaly(smile) {
            log_smile_anomaly(smile);
        }
    }
    smiles.sort_by(|a, b| {
        (a.underlying.as_str(), a.expiry_date.as_str())
            .cmp(&(b.underlying.as_str(), b.expiry_date.as_str()))
    });
    smiles
}

fn log_smile_anomaly(smile: &VolatilitySmile) {
    let pattern = if smile.is_inverted {
        "INVERTED SMILE"
    } else if smile.has_put_skew && smile.put_skew.abs() > 0.03 {
        "EXTREME PUT SKEW"
    } else if smile.has_call_skew && smile.call_skew.abs() > 0.03 {
        "EXTREME CALL SKEW"
    } else if smile.r_squared < 0.5 {
        "POOR FIT - POTENTIAL MISPRICING"
    } else {
        "WIDE VOL RANGE"
    };
    info!(
        "Volatility opportunity: {} {} {} | ATM {:.1}% put_skew {:.1}% call_skew {:.1}% range {:.1}%-{:.1}% r2 {:.3} ({} pts)",
        pattern,
        smile.underlying,
        smile.expiry_date,
        smile.atm_vol * 100.0,
        smile.put_skew * 100.0,
        smile.call_skew * 100.0,
        smile.min_vol * 100.0,
        smile.max_vol * 100.0,
        smile.r_squared,
        smile.points.len()
    );
}
