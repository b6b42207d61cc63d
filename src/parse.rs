//! Field coercion from raw CSV bytes to physical values.
//!
//! Numeric and timestamp fields are trimmed of surrounding ASCII whitespace;
//! text fields are kept verbatim. Failures carry a short reason string, and the
//! caller attaches file, record and column.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::str;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

fn as_text(field: &[u8]) -> Result<&str, String> {
    str::from_utf8(field).map_err(|e| format!("invalid UTF-8: {e}"))
}

fn numeric_text(field: &[u8]) -> Result<&str, String> {
    let text = as_text(field.trim_ascii())?;
    if text.is_empty() {
        return Err("empty value in non-text column".into());
    }
    Ok(text)
}

pub fn parse_int(field: &[u8]) -> Result<i64, String> {
    let text = numeric_text(field)?;
    text.parse::<i64>()
        .map_err(|e| format!("`{text}` is not a 64-bit integer ({e})"))
}

pub fn parse_float(field: &[u8]) -> Result<f64, String> {
    let text = numeric_text(field)?;
    text.parse::<f64>()
        .map_err(|e| format!("`{text}` is not a floating-point number ({e})"))
}

/// Parse a timestamp into microseconds since the Unix epoch (UTC).
///
/// Accepts RFC 3339 with an offset, naive `YYYY-MM-DD HH:MM:SS[.f]` or
/// `YYYY-MM-DDTHH:MM:SS[.f]` (read as UTC), and bare dates (midnight UTC).
pub fn parse_timestamp_micros(field: &[u8]) -> Result<i64, String> {
    let text = numeric_text(field)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp_micros());
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Ok(naive.and_utc().timestamp_micros());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        && let Some(midnight) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(midnight.and_utc().timestamp_micros());
    }
    Err(format!("`{text}` is not a recognized timestamp"))
}

pub fn parse_utf8(field: &[u8]) -> Result<&str, String> {
    as_text(field)
}
