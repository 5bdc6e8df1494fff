//! Black-Scholes pricing, the Greeks ladder through third order, and the
//! implied-volatility solver.
//!
//! All formulas are evaluated in one place (`ladder`); the individual
//! per-Greek functions are thin projections of it, so a refactor cannot let
//! the "full" and "single" paths drift apart.

use crate::types::BsMetrics;
use std::f64::consts::PI;

/// IV solver iteration cap.
pub const IV_MAX_ITERATIONS: u32 = 100;
/// IV solver tolerance, on both price error and vol step.
pub const IV_TOLERANCE: f64 = 1e-6;
/// 0.1% minimum vol.
pub const IV_MIN_VOL: f64 = 0.001;
/// 500% maximum vol.
pub const IV_MAX_VOL: f64 = 5.0;

/// Standard normal cumulative distribution function.
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + libm::erf(x / 2.0_f64.sqrt()))
}

/// Standard normal probability density function.
pub fn norm_pdf(x: f64) -> f64 {
    (1.0 / (2.0 * PI).sqrt()) * (-0.5 * x * x).exp()
}

fn d1(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    ((s / k).ln() + (r + 0.5 * sigma * sigma) * t) / (sigma * t.sqrt())
}

/// Price, Greeks through third order, one evaluation of (d1, d2).
///
/// For `T <= 0` or `sigma <= 0` every field collapses to its deterministic
/// limit; nothing here can produce a NaN for positive S and K.
fn ladder(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> BsMetrics {
    let mut m = BsMetrics::default();

    if t <= 0.0 {
        // At expiry: intrinsic payoff, delta steps at the strike.
        m.call_price = (s - k).max(0.0);
        m.put_price = (k - s).max(0.0);
        m.delta = if s > k { 1.0 } else { 0.0 };
        return m;
    }

    let discounted_strike = k * (-r * t).exp();
    if sigma <= 0.0 {
        // Deterministic forward: payoff against the discounted strike.
        m.call_price = (s - discounted_strike).max(0.0);
        m.put_price = (discounted_strike - s).max(0.0);
        let itm_call = s > discounted_strike;
        m.delta = if itm_call { 1.0 } else { 0.0 };
        m.theta = if itm_call { r * discounted_strike } else { 0.0 };
        m.rho = if itm_call { k * t * (-r * t).exp() } else { 0.0 };
        return m;
    }

    let sqrt_t = t.sqrt();
    let d1 = d1(s, k, t, r, sigma);
    let d2 = d1 - sigma * sqrt_t;
    let phi_d1 = norm_pdf(d1);
    let cdf_d1 = norm_cdf(d1);
    let cdf_d2 = norm_cdf(d2);

    m.call_price = s * cdf_d1 - discounted_strike * cdf_d2;
    m.put_price = discounted_strike * norm_cdf(-d2) - s * norm_cdf(-d1);

    // First order (call convention; put adjustments happen in the wrappers)
    m.delta = cdf_d1;
    m.gamma = phi_d1 / (s * sigma * sqrt_t);
    m.theta = -(s * phi_d1 * sigma) / (2.0 * sqrt_t) - r * discounted_strike * cdf_d2;
    m.vega = s * phi_d1 * sqrt_t;
    m.rho = k * t * (-r * t).exp() * cdf_d2;

    // Second order
    m.vanna = -m.vega * d2 / sigma;
    m.charm = -phi_d1 * (2.0 * r * t - d2 * sigma * sqrt_t) / (2.0 * t * sigma * sqrt_t);
    m.volga = m.vega * d1 * d2 / sigma;

    // Third order
    m.speed = -m.gamma / s * (d1 / (sigma * sqrt_t) + 1.0);
    m.zomma = m.gamma * (d1 * d2 - 1.0) / sigma;
    m.color = -phi_d1 / (2.0 * s * t * sigma * sqrt_t)
        * (2.0 * r * t + 1.0 + d1 * (2.0 * r * t - d2 * sigma * sqrt_t) / (sigma * sqrt_t));

    m
}

/// Adjust the call-convention ladder for a put where the sign differs.
fn put_adjust(s: f64, k: f64, t: f64, r: f64, sigma: f64, m: &BsMetrics) -> BsMetrics {
    let mut p = *m;
    if t <= 0.0 {
        p.delta = if s < k { -1.0 } else { 0.0 };
        return p;
    }
    let discounted_strike = k * (-r * t).exp();
    if sigma <= 0.0 {
        let itm_put = s < discounted_strike;
        p.delta = if itm_put { -1.0 } else { 0.0 };
        p.theta = if itm_put { -r * discounted_strike } else { 0.0 };
        p.rho = if itm_put { -k * t * (-r * t).exp() } else { 0.0 };
        return p;
    }
    let d1 = d1(s, k, t, r, sigma);
    let d2 = d1 - sigma * t.sqrt();
    p.delta = m.delta - 1.0;
    p.theta = -(s * norm_pdf(d1) * sigma) / (2.0 * t.sqrt())
        + r * discounted_strike * norm_cdf(-d2);
    p.rho = -k * t * (-r * t).exp() * norm_cdf(-d2);
    p.charm = m.charm - r * (-r * t).exp();
    p
}

/// Black-Scholes call option price.
pub fn call_price(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    ladder(s, k, t, r, sigma).call_price
}

/// Black-Scholes put option price.
pub fn put_price(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    ladder(s, k, t, r, sigma).put_price
}

pub fn delta_call(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    ladder(s, k, t, r, sigma).delta
}

pub fn delta_put(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    let m = ladder(s, k, t, r, sigma);
    put_adjust(s, k, t, r, sigma, &m).delta
}

/// Gamma is identical for calls and puts.
pub fn gamma(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    ladder(s, k, t, r, sigma).gamma
}

pub fn theta_call(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    ladder(s, k, t, r, sigma).theta
}

pub fn theta_put(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    let m = ladder(s, k, t, r, sigma);
    put_adjust(s, k, t, r, sigma, &m).theta
}

pub fn vega(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    ladder(s, k, t, r, sigma).vega
}

pub fn rho_call(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    ladder(s, k, t, r, sigma).rho
}

pub fn rho_put(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    let m = ladder(s, k, t, r, sigma);
    put_adjust(s, k, t, r, sigma, &m).rho
}

pub fn vanna(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    ladder(s, k, t, r, sigma).vanna
}

pub fn charm_call(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    ladder(s, k, t, r, sigma).charm
}

pub fn charm_put(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    let m = ladder(s, k, t, r, sigma);
    put_adjust(s, k, t, r, sigma, &m).charm
}

pub fn volga(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    ladder(s, k, t, r, sigma).volga
}

pub fn speed(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    ladder(s, k, t, r, sigma).speed
}

pub fn zomma(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    ladder(s, k, t, r, sigma).zomma
}

/// Color is identical for calls and puts (it is a gamma derivative).
pub fn color(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    ladder(s, k, t, r, sigma).color
}

fn price_for(s: f64, k: f64, t: f64, r: f64, sigma: f64, is_call: bool) -> f64 {
    let m = ladder(s, k, t, r, sigma);
    if is_call {
        m.call_price
    } else {
        m.put_price
    }
}

/// Corrado-Miller seed for the IV solver, with the second-order moneyness
/// correction, clamped to [IV_MIN_VOL, IV_MAX_VOL / 2].
fn corrado_miller_seed(option_price: f64, s: f64, k: f64, t: f64, r: f64) -> f64 {
    let sqrt_t = t.sqrt();
    let forward = s * (r * t).exp();
    let x = (forward / k).ln();

    let n1 = (2.0 * PI).sqrt() / sqrt_t;
    let n2 = option_price - 0.5 * (forward - k).abs();
    let n3 = (forward + k) / 2.0;

    let guess = n1 * n2 / n3;
    let corrected = (guess * guess + 2.0 * x.abs() / sqrt_t).sqrt();

    corrected.clamp(IV_MIN_VOL, IV_MAX_VOL * 0.5)
}

fn implied_volatility_bisection(
    option_price: f64,
    s: f64,
    k: f64,
    t: f64,
    r: f64,
    is_call: bool,
) -> f64 {
    let mut vol_low = IV_MIN_VOL;
    let mut vol_high = IV_MAX_VOL;

    let price_low = price_for(s, k, t, r, vol_low, is_call);
    let price_high = price_for(s, k, t, r, vol_high, is_call);
    if option_price < price_low {
        return vol_low;
    }
    if option_price > price_high {
        return vol_high;
    }

    let mut iterations = 0;
    while iterations < IV_MAX_ITERATIONS && (vol_high - vol_low) > IV_TOLERANCE {
        let vol_mid = (vol_low + vol_high) / 2.0;
        let price_mid = price_for(s, k, t, r, vol_mid, is_call);

        if (price_mid - option_price).abs() < IV_TOLERANCE {
            return vol_mid;
        }
        if price_mid < option_price {
            vol_low = vol_mid;
        } else {
            vol_high = vol_mid;
        }
        iterations += 1;
    }

    (vol_low + vol_high) / 2.0
}

/// Implied volatility via Newton-Raphson with a Corrado-Miller seed and a
/// bisection fallback.
///
/// Returns 0.0 for degenerate inputs and `IV_MIN_VOL` for at-intrinsic
/// prices; `full_metrics` derives the converged flag from the bounds.
pub fn implied_volatility(
    option_price: f64,
    s: f64,
    k: f64,
    t: f64,
    r: f64,
    is_call: bool,
) -> f64 {
    if s <= 0.0 || k <= 0.0 {
        return 0.0;
    }

    // At-intrinsic (or zero) prices and expired contracts carry no vol
    // information: report the floor and let the caller flag non-convergence.
    let intrinsic = if is_call {
        (s - k).max(0.0)
    } else {
        (k - s).max(0.0)
    };
    if option_price <= intrinsic + 1e-6 || t <= 0.0 {
        return IV_MIN_VOL;
    }

    let mut vol = corrado_miller_seed(option_price, s, k, t, r);

    let mut iterations = 0;
    while iterations < IV_MAX_ITERATIONS {
        let m = ladder(s, k, t, r, vol);
        let theoretical = if is_call { m.call_price } else { m.put_price };
        let price_diff = theoretical - option_price;

        if price_diff.abs() < IV_TOLERANCE {
            return vol;
        }
        if m.vega < 1e-10 {
            // Flat vega: Newton cannot make progress
            return implied_volatility_bisection(option_price, s, k, t, r, is_call);
        }

        let vol_new = (vol - price_diff / m.vega).clamp(IV_MIN_VOL, IV_MAX_VOL);
        if (vol_new - vol).abs() < IV_TOLERANCE {
            return vol_new;
        }
        vol = vol_new;
        iterations += 1;
    }

    implied_volatility_bisection(option_price, s, k, t, r, is_call)
}

/// Solve IV from the market price, then evaluate the full ladder at the
/// solved (or clamped) vol.
///
/// When the solver did not converge the Greeks are still populated so
/// consumers get sensible defaults, but they should check `iv_converged`.
pub fn full_metrics(
    s: f64,
    k: f64,
    t: f64,
    r: f64,
    market_price: f64,
    is_call: bool,
) -> BsMetrics {
    let implied_vol = implied_volatility(market_price, s, k, t, r, is_call);
    let iv_converged = implied_vol > IV_MIN_VOL && implied_vol < IV_MAX_VOL;

    let m = ladder(s, k, t, r, implied_vol);
    let mut result = if is_call {
        m
    } else {
        put_adjust(s, k, t, r, implied_vol, &m)
    };
    result.implied_vol = implied_vol;
    result.iv_converged = iv_converged;
    result
}

/// Years until a YYMMDD expiry, using the upstream feed's UTC-normalized
/// exchange-day convention: expiration at `expiry_hour`:00 of that date.
///
/// Two-digit years below 50 map to 20YY, the rest to 19YY. Returns 0.0 for
/// malformed dates or expiries in the past.
pub fn time_to_expiry_years(expiry_date: &str, expiry_hour: u32) -> f64 {
    time_to_expiry_years_at(expiry_date, expiry_hour, chrono::Utc::now())
}

/// Same as [`time_to_expiry_years`] but against an explicit "now", so the
/// conversion itself stays testable.
pub fn time_to_expiry_years_at(
    expiry_date: &str,
    expiry_hour: u32,
    now: chrono::DateTime<chrono::Utc>,
) -> f64 {
    if expiry_date.len() < 6 || !expiry_date.as_bytes()[..6].iter().all(u8::is_ascii_digit) {
        return 0.0;
    }

    let yy: i32 = expiry_date[0..2].parse().unwrap_or(0);
    let month: u32 = expiry_date[2..4].parse().unwrap_or(0);
    let day: u32 = expiry_date[4..6].parse().unwrap_or(0);
    let year = if yy < 50 { 2000 + yy } else { 1900 + yy };

    let Some(date) = chrono::NaiveDate::from_ymd_opt(year, month, day) else {
        return 0.0;
    };
    let Some(expiry) = date.and_hms_opt(expiry_hour, 0, 0) else {
        return 0.0;
    };
    let expiry = chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(expiry, chrono::Utc);

    let seconds = (expiry - now).num_seconds();
    if seconds < 0 {
        return 0.0;
    }
    seconds as f64 / (365.25 * 24.0 * 3600.0)
}
