use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Option side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn is_call(&self) -> bool {
        matches!(self, OptionType::Call)
    }

    /// The single-letter code used inside OCC symbols.
    pub fn code(&self) -> char {
        match self {
            OptionType::Call => 'C',
            OptionType::Put => 'P',
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionType::Call => write!(f, "Call"),
            OptionType::Put => write!(f, "Put"),
        }
    }
}

/// Parsed identity of an option contract.
///
/// OCC-style symbols are `TICKER + YYMMDD + [C|P] + STRIKE`, where the strike
/// is the price x1000 zero-padded to 8 digits, e.g. `QQQ250801C00560000`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionDetails {
    /// Underlying ticker, e.g. `QQQ`.
    pub underlying: String,
    /// Expiry as the raw YYMMDD digits from the symbol.
    pub expiry_date: String,
    pub option_type: OptionType,
    /// Strike price in dollars.
    pub strike: f64,
}

/// Minimum length of a well-formed OCC symbol (1-char ticker + 15).
const MIN_SYMBOL_LEN: usize = 15;

/// Locate the `YYMMDD[C|P]D` anchor that separates ticker from contract body.
///
/// Scans from index 1 so a leading digit in the ticker cannot anchor.
fn find_anchor(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < MIN_SYMBOL_LEN {
        return None;
    }
    for i in 1..=bytes.len() - MIN_SYMBOL_LEN {
        let w = &bytes[i..];
        if w[..6].iter().all(|b| b.is_ascii_digit())
            && (w[6] == b'C' || w[6] == b'P')
            && w[7].is_ascii_digit()
        {
            return Some(i);
        }
    }
    None
}

/// Parse an OCC-style option symbol into its components.
pub fn parse_option_details(symbol: &str) -> Result<OptionDetails> {
    let bytes = symbol.as_bytes();
    let anchor = find_anchor(bytes).ok_or_else(|| AppError::Parse(symbol.to_string()))?;

    let underlying = symbol[..anchor].to_string();
    let expiry_date = symbol[anchor..anchor + 6].to_string();
    let option_type = if bytes[anchor + 6] == b'C' {
        OptionType::Call
    } else {
        OptionType::Put
    };

    let strike_digits = &symbol[anchor + 7..anchor + 15];
    let raw: u64 = strike_digits
        .parse()
        .map_err(|_| AppError::Parse(symbol.to_string()))?;
    let strike = raw as f64 / 1000.0;

    Ok(OptionDetails {
        underlying,
        expiry_date,
        option_type,
        strike,
    })
}

/// Extract just the underlying ticker from an option symbol.
pub fn extract_underlying(symbol: &str) -> Option<String> {
    find_anchor(symbol.as_bytes()).map(|anchor| symbol[..anchor].to_string())
}

impl fmt::Display for OptionDetails {
    /// Human-readable form: `QQQ 08/01/25 $560.00 Call`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yy = &self.expiry_date[0..2];
        let mm = &self.expiry_date[2..4];
        let dd = &self.expiry_date[4..6];
        write!(
            f,
            "{} {}/{}/{} ${:.2} {}",
            self.underlying, mm, dd, yy, self.strike, self.option_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Parse Tests
    // =========================================================================

    #[test]
    fn test_parse_call() {
        let details = parse_option_details("QQQ250801C00560000").unwrap();
        assert_eq!(details.underlying, "QQQ");
        assert_eq!(details.expiry_date, "250801");
        assert_eq!(details.option_type, OptionType::Call);
        assert!((details.strike - 560.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_put() {
        let details = parse_option_details("AAPL251220P00150000").unwrap();
        assert_eq!(details.underlying, "AAPL");
        assert_eq!(details.expiry_date, "251220");
        assert_eq!(details.option_type, OptionType::Put);
        assert!((details.strike - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_fractional_strike() {
        // 00560500 -> $560.50
        let details = parse_option_details("SPY250801C00560500").unwrap();
        assert!((details.strike - 560.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_long_underlying() {
        let details = parse_option_details("GOOGL250801C00180000").unwrap();
        assert_eq!(details.underlying, "GOOGL");
    }

    #[test]
    fn test_parse_too_short() {
        assert!(parse_option_details("QQQ250801").is_err());
        assert!(parse_option_details("").is_err());
    }

    #[test]
    fn test_parse_no_anchor() {
        // Long enough but no 6-digit + C/P + digit run
        assert!(parse_option_details("NOTANOPTIONSYMBOLXX").is_err());
    }

    #[test]
    fn test_extract_underlying() {
        assert_eq!(
            extract_underlying("QQQ250801C00560000"),
            Some("QQQ".to_string())
        );
        assert_eq!(extract_underlying("garbage"), None);
    }

    // =========================================================================
    // Render Tests
    // =========================================================================

    #[test]
    fn test_render_round_trip() {
        let details = parse_option_details("QQQ250801C00560000").unwrap();
        let rendered = details.to_string();
        assert!(rendered.contains("QQQ"));
        assert!(rendered.contains("$560.00 Call"));
        assert_eq!(rendered, "QQQ 08/01/25 $560.00 Call");
    }

    #[test]
    fn test_render_put() {
        let details = parse_option_details("TSLA260116P00200000").unwrap();
        assert_eq!(details.to_string(), "TSLA 01/16/26 $200.00 Put");
    }
}
