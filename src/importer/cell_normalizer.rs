// ==========================================
// Ratebook ingestion - cell normalizer
// ==========================================
// Pure conversions from raw cells to canonical scalars:
// trimmed text / integer / integer minor currency units.
// Never panics; garbage becomes None (or Err in the parse_* forms).
// ==========================================

use crate::domain::CellValue;
use regex::Regex;
use std::sync::LazyLock;

/// Text values that mean "no value" in provider sheets.
const EMPTY_SENTINELS: [&str; 6] = ["-", "--", "N/A", "NA", "POA", "TBC"];

/// Currency markers stripped before numeric parsing.
const CURRENCY_MARKERS: [&str; 7] = ["£", "$", "€", "\u{FFFD}", "GBP", "EUR", "USD"];

static MILEAGE_BAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*k\b").unwrap());

/// Stringify a cell verbatim and trim it. Empty cells become "".
pub fn to_trimmed_string(raw: &CellValue) -> String {
    raw.to_string().trim().to_string()
}

/// Trimmed text, None when blank.
pub fn to_optional_string(raw: &CellValue) -> Option<String> {
    let value = to_trimmed_string(raw);
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Blank cells and textual "no value" markers.
pub fn is_empty_value(raw: &CellValue) -> bool {
    match raw {
        CellValue::Empty => true,
        CellValue::Bool(_) | CellValue::Number(_) => false,
        CellValue::Text(s) => {
            let trimmed = s.trim();
            trimmed.is_empty()
                || EMPTY_SENTINELS
                    .iter()
                    .any(|sentinel| trimmed.eq_ignore_ascii_case(sentinel))
        }
    }
}

/// Money in minor units; None for empty, zero or garbage.
pub fn to_minor_units(raw: &CellValue) -> Option<i64> {
    parse_minor_units(raw).ok().flatten()
}

/// Money in minor units, distinguishing garbage (Err) from empty/zero (Ok(None)).
pub fn parse_minor_units(raw: &CellValue) -> Result<Option<i64>, String> {
    let minor = match raw {
        _ if is_empty_value(raw) => return Ok(None),
        CellValue::Number(n) => number_to_minor(*n)?,
        CellValue::Text(s) => decimal_text_to_minor(s)?,
        CellValue::Bool(b) => return Err(format!("not a number: {}", b)),
        CellValue::Empty => return Ok(None),
    };
    Ok(if minor == 0 { None } else { Some(minor) })
}

/// Integer with the same tolerance as money, rounded, no decimal scaling.
pub fn to_int(raw: &CellValue) -> Option<i64> {
    parse_int(raw).ok().flatten()
}

/// Integer, distinguishing garbage (Err) from empty (Ok(None)). Zero is kept.
pub fn parse_int(raw: &CellValue) -> Result<Option<i64>, String> {
    match raw {
        _ if is_empty_value(raw) => Ok(None),
        CellValue::Number(n) => {
            if n.is_finite() {
                Ok(Some(n.round() as i64))
            } else {
                Err(format!("not a finite number: {}", n))
            }
        }
        CellValue::Text(s) => {
            let minor = decimal_text_to_minor(s)?;
            // round half away from zero on the hundredths representation
            let whole = (minor.abs() + 50) / 100;
            Ok(Some(if minor < 0 { -whole } else { whole }))
        }
        CellValue::Bool(b) => Err(format!("not a number: {}", b)),
        CellValue::Empty => Ok(None),
    }
}

/// Annual mileage from a plain number or a band label such as "5k - Non Maintained".
pub fn parse_annual_mileage(raw: &CellValue) -> Result<Option<i64>, String> {
    match parse_int(raw) {
        Ok(value) => Ok(value),
        Err(err) => {
            let text = to_trimmed_string(raw);
            match MILEAGE_BAND.captures(&text) {
                Some(caps) => {
                    let thousands = decimal_text_to_minor(&caps[1])?;
                    // hundredths of a thousand -> miles
                    Ok(Some(thousands * 10))
                }
                None => Err(err),
            }
        }
    }
}

fn number_to_minor(n: f64) -> Result<i64, String> {
    if !n.is_finite() {
        return Err(format!("not a finite number: {}", n));
    }
    Ok((n * 100.0).round() as i64)
}

/// Exact decimal text -> hundredths, rounding half away from zero on the third decimal.
fn decimal_text_to_minor(text: &str) -> Result<i64, String> {
    let mut cleaned: String = text.chars().filter(|c| !c.is_whitespace() && *c != ',').collect();

    let mut negative = false;
    if cleaned.starts_with('(') && cleaned.ends_with(')') && cleaned.len() > 2 {
        negative = true;
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
    }
    if let Some(rest) = cleaned.strip_prefix('-') {
        negative = !negative;
        cleaned = rest.to_string();
    }
    let upper = cleaned.to_uppercase();
    let mut body = upper.as_str();
    for marker in CURRENCY_MARKERS {
        body = body.strip_prefix(marker).unwrap_or(body);
        body = body.strip_suffix(marker).unwrap_or(body);
    }
    if let Some(rest) = body.strip_prefix('-') {
        negative = !negative;
        body = rest;
    }

    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part)
    {
        return Err(format!("not a number: {}", text.trim()));
    }

    let whole: i64 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| format!("number out of range: {}", text.trim()))?
    };
    let mut digits = frac_part.chars().map(|c| c as i64 - '0' as i64);
    let tenths = digits.next().unwrap_or(0);
    let hundredths = digits.next().unwrap_or(0);
    let round_up = digits.next().map(|d| d >= 5).unwrap_or(false);

    let minor = whole
        .checked_mul(100)
        .and_then(|v| v.checked_add(tenths * 10 + hundredths + i64::from(round_up)))
        .ok_or_else(|| format!("number out of range: {}", text.trim()))?;

    Ok(if negative { -minor } else { minor })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_trimmed_string() {
        assert_eq!(to_trimmed_string(&CellValue::text("  Audi ")), "Audi");
        assert_eq!(to_trimmed_string(&CellValue::Number(24.0)), "24");
        assert_eq!(to_trimmed_string(&CellValue::Number(45993.071)), "45993.071");
        assert_eq!(to_trimmed_string(&CellValue::Empty), "");
    }

    #[test]
    fn test_to_minor_units_currency_text() {
        assert_eq!(to_minor_units(&CellValue::text("£344.90")), Some(34490));
        assert_eq!(to_minor_units(&CellValue::text(" £ 1,234.5 ")), Some(123450));
        assert_eq!(to_minor_units(&CellValue::text("GBP 99")), Some(9900));
        assert_eq!(to_minor_units(&CellValue::text("-£12.34")), Some(-1234));
        assert_eq!(to_minor_units(&CellValue::text("(12.34)")), Some(-1234));
        assert_eq!(to_minor_units(&CellValue::text("0.125")), Some(13));
    }

    #[test]
    fn test_to_minor_units_numbers() {
        assert_eq!(to_minor_units(&CellValue::Number(344.9)), Some(34490));
        assert_eq!(to_minor_units(&CellValue::Number(292.07)), Some(29207));
    }

    #[test]
    fn test_to_minor_units_empty_zero_and_garbage() {
        assert_eq!(to_minor_units(&CellValue::Empty), None);
        assert_eq!(to_minor_units(&CellValue::text("  ")), None);
        assert_eq!(to_minor_units(&CellValue::text("N/A")), None);
        assert_eq!(to_minor_units(&CellValue::text("0.00")), None);
        assert_eq!(to_minor_units(&CellValue::Number(0.0)), None);
        assert_eq!(to_minor_units(&CellValue::text("call us")), None);
        assert!(parse_minor_units(&CellValue::text("call us")).is_err());
        assert_eq!(parse_minor_units(&CellValue::text("0")), Ok(None));
    }

    #[test]
    fn test_thousands_separator_parses_identically() {
        assert_eq!(
            to_int(&CellValue::text("45,000")),
            to_int(&CellValue::text("45000"))
        );
        assert_eq!(to_int(&CellValue::text("45,000")), Some(45000));
        assert_eq!(
            to_minor_units(&CellValue::text("45,000")),
            to_minor_units(&CellValue::text("45000"))
        );
    }

    #[test]
    fn test_to_int() {
        assert_eq!(to_int(&CellValue::Number(36.0)), Some(36));
        assert_eq!(to_int(&CellValue::text("0")), Some(0));
        assert_eq!(to_int(&CellValue::text("45.6")), Some(46));
        assert_eq!(to_int(&CellValue::text("abc")), None);
        assert_eq!(to_int(&CellValue::Empty), None);
    }

    #[test]
    fn test_parse_annual_mileage_band_labels() {
        assert_eq!(
            parse_annual_mileage(&CellValue::text("5k - Non Maintained")),
            Ok(Some(5000))
        );
        assert_eq!(parse_annual_mileage(&CellValue::text("12.5K")), Ok(Some(12500)));
        assert_eq!(parse_annual_mileage(&CellValue::text("10,000")), Ok(Some(10000)));
        assert_eq!(parse_annual_mileage(&CellValue::Number(8000.0)), Ok(Some(8000)));
        assert!(parse_annual_mileage(&CellValue::text("lots")).is_err());
    }

    #[test]
    fn test_minor_units_round_trip_to_the_cent() {
        for text in ["344.90", "292.07", "0.01", "1000", "12345.67", "7.5"] {
            let minor = to_minor_units(&CellValue::text(text)).unwrap();
            let expected: f64 = text.parse().unwrap();
            assert!(((minor as f64) / 100.0 - expected).abs() < 1e-9, "{}", text);
        }
    }
}
