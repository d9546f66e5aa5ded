//! Shared types, error enum, and raw/canonical value types for sonde-core.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;

/// All errors produced by sonde-core.
#[derive(Debug, Error)]
pub enum SondeError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },
    #[error("CRC validation failed")]
    CrcFailed,
    #[error("invalid JSON document: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("radiosonde type unknown: {0}")]
    UnknownType(String),
    #[error("mandatory parameter \"{field}\" is missing ({family})")]
    MandatoryFieldMissing { field: &'static str, family: String },
    #[error("parameter \"{0}\" required for reformatting is missing")]
    MissingField(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SondeError>;

// ---------------------------------------------------------------------------
// Raw values (decoder output)
// ---------------------------------------------------------------------------

/// One scalar extracted from a raw frame or JSON document.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Int(i64),
    Float(f64),
    Char(char),
    Text(String),
    Bytes(Vec<u8>),
}

impl RawValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawValue::Int(v) => Some(*v),
            RawValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Int(v) => Some(*v as f64),
            RawValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_char(&self) -> Option<char> {
        match self {
            RawValue::Char(c) => Some(*c),
            RawValue::Text(s) if s.chars().count() == 1 => s.chars().next(),
            _ => None,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Int(v) => write!(f, "{v}"),
            RawValue::Float(v) => write!(f, "{v}"),
            RawValue::Char(c) => write!(f, "{c}"),
            RawValue::Text(s) => write!(f, "{s}"),
            RawValue::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Flat mapping of raw field names to raw values, produced by the frame decoder.
///
/// A key is present only if its source token was found and parsed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFields(BTreeMap<&'static str, RawValue>);

impl RawFields {
    pub fn new() -> Self {
        RawFields(BTreeMap::new())
    }

    pub fn insert(&mut self, key: &'static str, value: RawValue) {
        self.0.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&&'static str, &RawValue)> {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Canonical values
// ---------------------------------------------------------------------------

/// A typed canonical telemetry value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view; integers widen to float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
        }
    }
}

// ---------------------------------------------------------------------------
// Source schema
// ---------------------------------------------------------------------------

/// Which raw schema a telemetry record was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Aprs,
    Json,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Aprs => write!(f, "APRS"),
            SourceKind::Json => write!(f, "JSON"),
        }
    }
}

/// How incoming datagrams are classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Auto,
    Json,
    Aprs,
}

impl InputMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(InputMode::Auto),
            "json" => Some(InputMode::Json),
            "aprs" => Some(InputMode::Aprs),
            _ => None,
        }
    }

    /// Pick the decoder for one datagram.
    ///
    /// `Auto` sniffs the first non-whitespace byte: `{` means JSON.
    pub fn classify(self, data: &[u8]) -> SourceKind {
        match self {
            InputMode::Json => SourceKind::Json,
            InputMode::Aprs => SourceKind::Aprs,
            InputMode::Auto => {
                let first = data.iter().find(|b| !b.is_ascii_whitespace());
                if first == Some(&b'{') {
                    SourceKind::Json
                } else {
                    SourceKind::Aprs
                }
            }
        }
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputMode::Auto => write!(f, "auto"),
            InputMode::Json => write!(f, "json"),
            InputMode::Aprs => write!(f, "aprs"),
        }
    }
}

// ---------------------------------------------------------------------------
// Time / position references
// ---------------------------------------------------------------------------

/// Time base of a radiosonde clock or of the value SondeHub expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeReference {
    Utc,
    Gps,
}

impl TimeReference {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeReference::Utc => "UTC",
            TimeReference::Gps => "GPS",
        }
    }
}

/// Altitude datum reported to SondeHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionReference {
    Gps,
    Msl,
}

impl PositionReference {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionReference::Gps => "GPS",
            PositionReference::Msl => "MSL",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_value_numeric_views() {
        assert_eq!(RawValue::Int(8).as_f64(), Some(8.0));
        assert_eq!(RawValue::Float(3.0).as_i64(), Some(3));
        assert_eq!(RawValue::Float(3.5).as_i64(), None);
        assert_eq!(RawValue::Text("x".into()).as_f64(), None);
    }

    #[test]
    fn test_raw_value_char_from_text() {
        assert_eq!(RawValue::Text("N".into()).as_char(), Some('N'));
        assert_eq!(RawValue::Text("NS".into()).as_char(), None);
    }

    #[test]
    fn test_bytes_display() {
        assert_eq!(RawValue::Bytes(vec![0x82, 0x0a]).to_string(), "0x820a");
    }

    #[test]
    fn test_input_mode_classify() {
        assert_eq!(InputMode::Auto.classify(b"  {\"a\":1}"), SourceKind::Json);
        assert_eq!(InputMode::Auto.classify(&[0x82, 0xa0]), SourceKind::Aprs);
        assert_eq!(InputMode::Json.classify(&[0x82]), SourceKind::Json);
        assert_eq!(InputMode::Aprs.classify(b"{"), SourceKind::Aprs);
    }

    #[test]
    fn test_input_mode_parse() {
        assert_eq!(InputMode::parse("JSON"), Some(InputMode::Json));
        assert_eq!(InputMode::parse("aprs"), Some(InputMode::Aprs));
        assert_eq!(InputMode::parse("kiss"), None);
    }

    #[test]
    fn test_reference_strings() {
        assert_eq!(TimeReference::Gps.as_str(), "GPS");
        assert_eq!(PositionReference::Msl.as_str(), "MSL");
    }
}
