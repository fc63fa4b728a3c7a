//! Dedup-key derivation for raw phone values.
//!
//! A dedup key is the digit-only projection of a raw value, truncated to its
//! last [`KEY_LEN`] digits. Country-code prefixes and leading zeros fall away,
//! so `0812345678`, `+66 81 234 5678` and `812345678` share one key.

use serde::{Deserialize, Serialize};

/// Length of a duplicate-eligible key.
pub const KEY_LEN: usize = 9;

/// Map a raw value to its dedup key.
///
/// Absent or empty input yields the empty string. Values with fewer than
/// [`KEY_LEN`] digits come back as their full digit string.
pub fn normalize(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };
    let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let start = digits.len().saturating_sub(KEY_LEN);
    digits[start..].iter().collect()
}

/// Shorthand for [`normalize`] on a present value.
pub fn dedup_key(raw: &str) -> String {
    normalize(Some(raw))
}

/// True when `key` participates in duplicate detection.
pub fn is_valid_key(key: &str) -> bool {
    key.len() == KEY_LEN && key.bytes().all(|b| b.is_ascii_digit())
}

/// A spreadsheet cell as handed over by the reading layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Empty,
    Text(String),
    Integer(i64),
    Float(f64),
}

impl CellValue {
    /// Textual form of the cell, as it would be stored in `raw_value`.
    ///
    /// Integral floats render without a fractional part: a sheet that typed
    /// `812345678` as a number must not gain a trailing `0` digit.
    pub fn raw_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Integer(n) => n.to_string(),
            CellValue::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e18 => {
                format!("{}", *f as i64)
            }
            CellValue::Float(f) if f.is_finite() => f.to_string(),
            CellValue::Float(_) => String::new(),
        }
    }

    pub fn dedup_key(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            other => dedup_key(&other.raw_text()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(s.to_string())
        }
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        if s.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(s)
        }
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Integer(n)
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        CellValue::Float(f)
    }
}
