//! Response text helpers shared by the dialect implementations.

use crate::error::{Result, ScpiError};
use once_cell::sync::Lazy;
use regex::Regex;

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"[-+]?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?").expect("static pattern compiles")
});

/// Extract the first signed decimal or exponential numeral from free-form
/// response text. Instruments pad replies with units, prefixes and quotes, so
/// strict `str::parse` on the whole line is not an option.
pub(crate) fn number(resp: &str) -> Result<f64> {
    let found = NUMBER_RE
        .find(resp)
        .ok_or_else(|| ScpiError::Parse(format!("no numeric value in response: {resp:?}")))?;
    found
        .as_str()
        .parse::<f64>()
        .map_err(|_| ScpiError::Parse(format!("no numeric value in response: {resp:?}")))
}

/// Interpret the usual SCPI boolean spellings.
pub(crate) fn boolean(resp: &str) -> bool {
    matches!(resp.trim().to_uppercase().as_str(), "1" | "ON" | "TRUE")
}

/// SCPI boolean literal for writes.
pub(crate) fn bstr(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_handles_exponents_and_suffixes() {
        assert_eq!(number("1.234E-03").ok(), Some(1.234e-3));
        assert_eq!(number("4.994V").ok(), Some(4.994));
        assert_eq!(number("  +0.5 \n").ok(), Some(0.5));
        assert_eq!(number("V1 5.00").ok(), Some(1.0)); // first numeral wins
    }

    #[test]
    fn number_rejects_text_without_numerals() {
        assert!(matches!(number("no data"), Err(ScpiError::Parse(_))));
    }

    #[test]
    fn boolean_spellings() {
        assert!(boolean("1\n"));
        assert!(boolean(" on "));
        assert!(boolean("TRUE"));
        assert!(!boolean("0"));
        assert!(!boolean("OFF"));
    }
}
