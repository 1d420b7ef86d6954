//! Turning raw fields into typed values.
//!
//! Rules are applied in a fixed order: placeholder first, then the unit
//! suffix, then the column's kind. Anything that does not fit its column
//! exactly is an error; nothing is silently coerced to zero.

use crate::parser::RawRow;
use crate::schema::{ColumnSpec, FieldKind, Role};
use log::debug;
use nvsmi_prom_core::exposition::SampleValue;
use nvsmi_prom_core::ExporterError;
use serde::Serialize;
use std::fmt;

/// Placeholders nvidia-smi prints instead of a value. Matched exactly after
/// trimming, ignoring ASCII case.
pub const PLACEHOLDERS: &[&str] = &[
    "[Not Supported]",
    "[N/A]",
    "N/A",
    "[Not Available]",
    "[Unknown Error]",
    "[Insufficient Permissions]",
    "[GPU is lost]",
    "[GPU requires reset]",
];

/// A normalized field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NormalizedValue {
    Text(String),
    Integer(u64),
    Float(f64),
    /// Present in the schema but not reported by the device.
    Unavailable,
}

impl NormalizedValue {
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }

    /// Numeric value for a sample line; `None` for text and unavailable fields.
    pub fn sample_value(&self) -> Option<SampleValue> {
        match self {
            Self::Integer(value) => Some(SampleValue::Integer(*value)),
            Self::Float(value) => Some(SampleValue::Float(*value)),
            Self::Text(_) | Self::Unavailable => None,
        }
    }
}

impl fmt::Display for NormalizedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(value) => f.write_str(value),
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", value),
            Self::Unavailable => f.write_str("unavailable"),
        }
    }
}

/// All normalized fields of one GPU, in column order.
///
/// Serializes as a map from query name to value, unavailable fields as `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    columns: &'static [ColumnSpec],
    values: Vec<NormalizedValue>,
}

impl Serialize for DeviceSnapshot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column.query, value)?;
        }
        map.end()
    }
}

impl DeviceSnapshot {
    /// Value of the column with the given query name.
    pub fn get(&self, query: &str) -> Option<&NormalizedValue> {
        self.columns
            .iter()
            .position(|column| column.query == query)
            .map(|i| &self.values[i])
    }

    /// Columns paired with their values, in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static ColumnSpec, &NormalizedValue)> {
        self.columns.iter().zip(self.values.iter())
    }

    /// Values of `role` columns that are available, as label pairs.
    pub fn labels(&self, role: Role) -> Vec<(String, String)> {
        self.iter()
            .filter(|(column, value)| column.role == role && value.is_available())
            .map(|(column, value)| (column.metric.to_owned(), value.to_string()))
            .collect()
    }
}

/// Normalize every field of `row` under `columns`.
pub fn normalize_row(
    row: &RawRow,
    columns: &'static [ColumnSpec],
) -> Result<DeviceSnapshot, ExporterError> {
    if row.fields.len() != columns.len() {
        return Err(ExporterError::malformed(
            row.line,
            format!("expected {} fields, found {}", columns.len(), row.fields.len()),
        ));
    }

    let values = columns
        .iter()
        .zip(&row.fields)
        .map(|(column, raw)| normalize_field(column, raw))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DeviceSnapshot { columns, values })
}

/// Normalize one raw field under its column rule.
pub fn normalize_field(column: &ColumnSpec, raw: &str) -> Result<NormalizedValue, ExporterError> {
    let value = raw.trim();

    if is_placeholder(value) {
        debug!("Column {} reports {}", column.query, value);
        return Ok(NormalizedValue::Unavailable);
    }

    let number = strip_unit(column, value)?;
    let fail = |reason: &str| ExporterError::field_parse(column.query, value, reason);

    match column.kind {
        FieldKind::Text if value.is_empty() => Err(fail("empty value")),
        FieldKind::Text => Ok(NormalizedValue::Text(value.to_owned())),
        FieldKind::Integer => parse_integer(number)
            .map(NormalizedValue::Integer)
            .ok_or_else(|| fail("expected an unsigned integer")),
        FieldKind::Float => parse_float(number)
            .map(NormalizedValue::Float)
            .ok_or_else(|| fail("expected a decimal number")),
        FieldKind::Hex => parse_hex(number)
            .map(NormalizedValue::Integer)
            .ok_or_else(|| fail("expected a 0x-prefixed hexadecimal number")),
    }
}

/// Exact, case-insensitive placeholder match.
pub fn is_placeholder(value: &str) -> bool {
    PLACEHOLDERS
        .iter()
        .any(|placeholder| placeholder.eq_ignore_ascii_case(value))
}

/// Remove `" <unit>"` from `value`. Exactly one space is accepted; columns
/// without a unit token take the value as is.
fn strip_unit<'a>(column: &ColumnSpec, value: &'a str) -> Result<&'a str, ExporterError> {
    let Some(token) = column.unit.token() else {
        return Ok(value);
    };

    let number = value
        .strip_suffix(token)
        .and_then(|rest| rest.strip_suffix(' '))
        .filter(|rest| !rest.is_empty() && !rest.ends_with(char::is_whitespace));

    number.ok_or_else(|| {
        ExporterError::field_parse(
            column.query,
            value,
            format!("expected a value followed by ' {}'", token),
        )
    })
}

fn parse_integer(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn parse_float(text: &str) -> Option<f64> {
    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());

    if (whole.is_empty() && fraction.is_empty()) || !digits(whole) || !digits(fraction) {
        return None;
    }
    text.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn parse_hex(text: &str) -> Option<u64> {
    let digits = text.strip_prefix("0x")?;
    if digits.is_empty() || digits.len() > 16 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}
