// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed participant-model values and their XML text forms.
//!
//! BICEPS leans on three xsd lexical spaces that need care:
//!
//! - `xsd:decimal` for metric values. The source text is preserved so that
//!   re-encoding an unmodified value is byte-identical (trailing zeros and
//!   all); the text is regenerated only when a typed mutation occurs.
//! - `Timestamp` - unsigned milliseconds since the epoch.
//! - `xsd:duration` for WS-Eventing `Expires` values.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch (BICEPS `Timestamp`).
pub type Timestamp = u64;

/// Current time as a BICEPS timestamp.
pub fn now_timestamp() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `xsd:decimal` with preserved lexical form.
///
/// Stores the canonical text and a parsed `f64`. Values decoded from XML
/// keep their exact source text; values constructed from numbers get a
/// minimal rendering.
#[derive(Debug, Clone)]
pub struct Decimal {
    text: String,
    value: f64,
}

impl Decimal {
    /// Parse an `xsd:decimal` lexical form, keeping the text.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let value: f64 = trimmed.parse().ok()?;
        // xsd:decimal has no exponent form.
        if trimmed.contains(['e', 'E']) {
            return None;
        }
        Some(Self {
            text: trimmed.to_string(),
            value,
        })
    }

    /// Numeric value.
    pub fn as_f64(&self) -> f64 {
        self.value
    }

    /// Lexical form as it will appear on the wire.
    pub fn as_text(&self) -> &str {
        &self.text
    }
}

impl From<f64> for Decimal {
    fn from(value: f64) -> Self {
        // Minimal rendering: integers without fraction, otherwise shortest
        // round-trip text Rust produces.
        let text = if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else {
            format!("{}", value)
        };
        Self { text, value }
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Self {
            text: value.to_string(),
            value: value as f64,
        }
    }
}

impl PartialEq for Decimal {
    /// Equality on the numeric value; the lexical form is presentation.
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl std::fmt::Display for Decimal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Format a duration as `xsd:duration` (`PT{secs}S` form, fractional
/// milliseconds included when present).
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis % 1000 == 0 {
        format!("PT{}S", millis / 1000)
    } else {
        format!("PT{}.{:03}S", millis / 1000, millis % 1000)
    }
}

/// Parse an `xsd:duration` into a [`Duration`].
///
/// Handles the subset that appears in WS-Eventing traffic:
/// `PnYnMnDTnHnMnS` with non-negative components and optional fractional
/// seconds. Years/months use the fixed conversions from the original
/// implementation (365/30 days).
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    let rest = text.strip_prefix('P')?;
    if rest.is_empty() {
        return None;
    }
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };

    let mut total = 0f64;
    let mut num = String::new();
    for ch in date_part.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            num.push(ch);
        } else {
            let n: f64 = num.parse().ok()?;
            num.clear();
            total += match ch {
                'Y' => n * 365.0 * 86_400.0,
                'M' => n * 30.0 * 86_400.0,
                'D' => n * 86_400.0,
                'W' => n * 7.0 * 86_400.0,
                _ => return None,
            };
        }
    }
    if !num.is_empty() {
        return None; // trailing digits without a designator
    }
    if let Some(time_part) = time_part {
        if time_part.is_empty() {
            return None;
        }
        for ch in time_part.chars() {
            if ch.is_ascii_digit() || ch == '.' {
                num.push(ch);
            } else {
                let n: f64 = num.parse().ok()?;
                num.clear();
                total += match ch {
                    'H' => n * 3600.0,
                    'M' => n * 60.0,
                    'S' => n,
                    _ => return None,
                };
            }
        }
        if !num.is_empty() {
            return None;
        }
    }
    Some(Duration::from_secs_f64(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_preserves_source_text() {
        let d = Decimal::parse("72.50").expect("valid decimal");
        assert_eq!(d.as_text(), "72.50", "trailing zero must survive");
        assert_eq!(d.as_f64(), 72.5);
    }

    #[test]
    fn test_decimal_rejects_exponent_form() {
        assert!(Decimal::parse("1e3").is_none());
        assert!(Decimal::parse("nonsense").is_none());
    }

    #[test]
    fn test_decimal_from_f64_minimal_rendering() {
        assert_eq!(Decimal::from(72.0).as_text(), "72");
        assert_eq!(Decimal::from(0.5).as_text(), "0.5");
        assert_eq!(Decimal::from(-3i64).as_text(), "-3");
    }

    #[test]
    fn test_decimal_equality_is_numeric() {
        let a = Decimal::parse("72.50").expect("valid");
        let b = Decimal::parse("72.5").expect("valid");
        assert_eq!(a, b);
    }

    #[test]
    fn test_duration_roundtrip_whole_seconds() {
        let d = Duration::from_secs(3600);
        let text = format_duration(d);
        assert_eq!(text, "PT3600S");
        assert_eq!(parse_duration(&text), Some(d));
    }

    #[test]
    fn test_duration_fractional() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "PT1.500S");
        let parsed = parse_duration("PT1.5S").expect("valid");
        assert_eq!(parsed.as_millis(), 1500);
    }

    #[test]
    fn test_duration_full_designators() {
        let parsed = parse_duration("P1DT2H3M4S").expect("valid");
        assert_eq!(parsed.as_secs(), 86_400 + 2 * 3600 + 3 * 60 + 4);
    }

    #[test]
    fn test_duration_rejects_garbage() {
        assert!(parse_duration("P").is_none());
        assert!(parse_duration("3600").is_none());
        assert!(parse_duration("PT12").is_none());
    }
}
