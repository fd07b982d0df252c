//! Typed scalar values and the fixed cell coercion rules.
//!
//! The remote store only holds strings. Every typed value has exactly one
//! canonical cell rendering, and every cell parses back through the rules
//! below. A cell that fails to parse is passed through as raw text rather
//! than rejected, so a malformed remote cell never aborts a sync cycle.

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// The declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Free-form text.
    Text,
    /// Floating point number (also covers integer quantities).
    Number,
    /// Boolean flag, rendered as `TRUE`/`FALSE`.
    Bool,
    /// UTC timestamp, second precision, ISO-8601 with `Z` suffix.
    Timestamp,
}

/// A scalar field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Absent value, rendered as the empty cell.
    Null,
    /// Text value.
    Text(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Bool(bool),
    /// Timestamp value (always UTC).
    Timestamp(DateTime<Utc>),
}

/// Cell tokens recognized as boolean true, matched case-insensitively.
const TRUE_TOKENS: [&str; 4] = ["1", "true", "yes", "y"];
/// Cell tokens recognized as boolean false, matched case-insensitively.
const FALSE_TOKENS: [&str; 4] = ["0", "false", "no", "n"];

impl FieldValue {
    /// Returns true for the absent value.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Renders the canonical cell string for this value.
    ///
    /// Integral numbers render without a fractional part so that a local
    /// `Number(2.0)` round-trips as the remote cell `"2"`.
    pub fn to_cell(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Text(text) => text.clone(),
            FieldValue::Number(value) => {
                if value.fract() == 0.0 && value.abs() < 9.0e15 {
                    format!("{}", *value as i64)
                } else {
                    format!("{value}")
                }
            }
            FieldValue::Bool(flag) => {
                if *flag {
                    "TRUE".into()
                } else {
                    "FALSE".into()
                }
            }
            FieldValue::Timestamp(ts) => format_cell_timestamp(*ts),
        }
    }

    /// Parses a cell string according to the declared field kind.
    ///
    /// An empty cell is `Null`. A cell that does not parse as the declared
    /// kind falls back to `Text` with the raw content preserved.
    pub fn from_cell(kind: FieldKind, cell: &str) -> FieldValue {
        if cell.is_empty() {
            return FieldValue::Null;
        }
        match kind {
            FieldKind::Text => FieldValue::Text(cell.to_string()),
            FieldKind::Number => match cell.trim().parse::<f64>() {
                Ok(value) => FieldValue::Number(value),
                Err(_) => FieldValue::Text(cell.to_string()),
            },
            FieldKind::Bool => match parse_cell_bool(cell) {
                Some(flag) => FieldValue::Bool(flag),
                None => FieldValue::Text(cell.to_string()),
            },
            FieldKind::Timestamp => match parse_cell_timestamp(cell) {
                Some(ts) => FieldValue::Timestamp(ts),
                None => FieldValue::Text(cell.to_string()),
            },
        }
    }

    /// Compares two values by their canonical cell rendering.
    ///
    /// This is the equality used for field diffing: `Number(2.0)` equals a
    /// remote `Text("2")` cell that was never coerced.
    pub fn cell_eq(&self, other: &FieldValue) -> bool {
        self.to_cell() == other.to_cell()
    }
}

/// The current UTC time at second precision.
///
/// Write stamps are truncated to seconds so that a row survives the remote
/// cell round-trip with its timestamp intact.
pub(crate) fn utc_now_seconds() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Parses a boolean cell token, case-insensitively.
pub(crate) fn parse_cell_bool(cell: &str) -> Option<bool> {
    let lowered = cell.trim().to_ascii_lowercase();
    if TRUE_TOKENS.contains(&lowered.as_str()) {
        Some(true)
    } else if FALSE_TOKENS.contains(&lowered.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Renders a timestamp as UTC, second precision, ISO-8601 with `Z` suffix.
pub(crate) fn format_cell_timestamp(ts: DateTime<Utc>) -> String {
    ts.with_nanosecond(0)
        .unwrap_or(ts)
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// Parses a timestamp cell.
///
/// Accepts RFC 3339 (with `Z` or a numeric offset) and the two naive forms
/// the remote store has historically produced (`T`- and space-separated);
/// naive timestamps are interpreted as UTC. Sub-second precision is
/// truncated.
pub fn parse_cell_timestamp(cell: &str) -> Option<DateTime<Utc>> {
    let text = cell.trim();
    if text.is_empty() {
        return None;
    }
    let parsed = DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
                .ok()
                .map(|naive| naive.and_utc())
        })?;
    parsed.with_nanosecond(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn null_renders_empty() {
        assert_eq!(FieldValue::Null.to_cell(), "");
        assert_eq!(FieldValue::from_cell(FieldKind::Text, ""), FieldValue::Null);
    }

    #[test]
    fn integral_numbers_drop_fraction() {
        assert_eq!(FieldValue::Number(2.0).to_cell(), "2");
        assert_eq!(FieldValue::Number(2.5).to_cell(), "2.5");
        assert_eq!(FieldValue::Number(-120.0).to_cell(), "-120");
    }

    #[test]
    fn bool_tokens() {
        assert_eq!(FieldValue::Bool(true).to_cell(), "TRUE");
        assert_eq!(FieldValue::Bool(false).to_cell(), "FALSE");
        for token in ["TRUE", "true", "Yes", "y", "1"] {
            assert_eq!(
                FieldValue::from_cell(FieldKind::Bool, token),
                FieldValue::Bool(true),
                "token {token}"
            );
        }
        for token in ["FALSE", "no", "N", "0"] {
            assert_eq!(
                FieldValue::from_cell(FieldKind::Bool, token),
                FieldValue::Bool(false),
                "token {token}"
            );
        }
    }

    #[test]
    fn timestamp_normalizes_to_utc_seconds() {
        let ts = FieldValue::from_cell(FieldKind::Timestamp, "2024-03-01T10:30:00+02:00");
        assert_eq!(ts.to_cell(), "2024-03-01T08:30:00Z");

        let naive = FieldValue::from_cell(FieldKind::Timestamp, "2024-03-01 08:30:00");
        assert_eq!(naive.to_cell(), "2024-03-01T08:30:00Z");

        let subsec = parse_cell_timestamp("2024-03-01T08:30:00.789Z").unwrap();
        assert_eq!(subsec, Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap());
    }

    #[test]
    fn malformed_cells_pass_through_raw() {
        assert_eq!(
            FieldValue::from_cell(FieldKind::Number, "12 pieces"),
            FieldValue::Text("12 pieces".into())
        );
        assert_eq!(
            FieldValue::from_cell(FieldKind::Timestamp, "yesterday"),
            FieldValue::Text("yesterday".into())
        );
        assert_eq!(
            FieldValue::from_cell(FieldKind::Bool, "maybe"),
            FieldValue::Text("maybe".into())
        );
    }

    #[test]
    fn cell_equality_crosses_types() {
        assert!(FieldValue::Number(2.0).cell_eq(&FieldValue::Text("2".into())));
        assert!(!FieldValue::Number(2.0).cell_eq(&FieldValue::Text("2.0".into())));
        assert!(FieldValue::Null.cell_eq(&FieldValue::Text(String::new())));
    }
}
