//! Map APRS-origin and JSON-origin raw values onto canonical telemetry.
//!
//! Every canonical field is looked up through its per-schema [`Source`]. A
//! missing raw value simply leaves the field out.

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, trace};

use crate::convert::{feet_to_meter, gmm_to_dg, hms_to_seconds, knot_to_kph, round_to};
use crate::fields::{Convert, KeyPath, Resolver, Source, Telemetry, FIELDS};
use crate::frame::parse_address;
use crate::types::{RawFields, RawValue, SourceKind, Value};

const COORDINATE_PRECISION: u32 = 5;
const CONVERSION_PRECISION: u32 = 2;

// ---------------------------------------------------------------------------
// Raw sources
// ---------------------------------------------------------------------------

/// Read access to one decoded input, whatever its schema.
pub trait RawLookup {
    fn lookup(&self, path: KeyPath) -> Option<RawValue>;
}

impl RawLookup for RawFields {
    fn lookup(&self, path: KeyPath) -> Option<RawValue> {
        match path {
            KeyPath::Key(key) => self.get(key).cloned(),
            KeyPath::Nested(..) => None,
        }
    }
}

impl RawLookup for serde_json::Value {
    fn lookup(&self, path: KeyPath) -> Option<RawValue> {
        let value = match path {
            KeyPath::Key(key) => self.get(key)?,
            KeyPath::Nested(outer, inner) => self.get(outer)?.get(inner)?,
        };
        json_scalar(value)
    }
}

fn json_scalar(value: &serde_json::Value) -> Option<RawValue> {
    match value {
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Some(RawValue::Int(i)),
            None => n.as_f64().map(RawValue::Float),
        },
        serde_json::Value::String(s) => Some(RawValue::Text(s.clone())),
        serde_json::Value::Bool(b) => Some(RawValue::Int(i64::from(*b))),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Unifier
// ---------------------------------------------------------------------------

/// Build canonical telemetry from a decoded input of the given schema.
pub fn unify(raw: &impl RawLookup, kind: SourceKind) -> Telemetry {
    let mut telemetry = Telemetry::new(kind);

    for spec in FIELDS {
        let Some(source) = spec.source(kind) else {
            trace!(field = spec.name, source = %kind, "field not carried by source");
            continue;
        };
        let value = match *source {
            Source::Direct(key, convert) => direct(raw, KeyPath::Key(key), convert, spec.name),
            Source::Nested(outer, inner, convert) => {
                direct(raw, KeyPath::Nested(outer, inner), convert, spec.name)
            }
            Source::Combine(paths, resolver) => {
                let inputs: Vec<Option<RawValue>> = paths.iter().map(|&p| raw.lookup(p)).collect();
                if inputs.iter().all(Option::is_none) {
                    debug!(field = spec.name, ?resolver, "resolution failed, all inputs missing");
                    None
                } else {
                    let value = resolver.resolve(&inputs);
                    if value.is_none() {
                        debug!(field = spec.name, ?resolver, "resolver produced no value");
                    }
                    value
                }
            }
        };
        if let Some(value) = value {
            trace!(field = spec.name, %value, "field unified");
            telemetry.insert(spec.id, value);
        }
    }

    telemetry
}

fn direct(raw: &impl RawLookup, path: KeyPath, convert: Convert, name: &str) -> Option<Value> {
    let Some(value) = raw.lookup(path) else {
        trace!(field = name, ?path, "raw value not found");
        return None;
    };
    let converted = convert.apply(&value);
    if converted.is_none() {
        debug!(field = name, %value, ?convert, "raw value could not be converted");
    }
    converted
}

impl Convert {
    pub fn apply(self, raw: &RawValue) -> Option<Value> {
        match self {
            Convert::Int => raw.as_i64().map(Value::Int),
            Convert::Float => raw.as_f64().map(Value::Float),
            Convert::Text => raw_to_text(raw).map(Value::Text),
            Convert::Callsign => match raw {
                RawValue::Bytes(bytes) => parse_address(bytes).map(Value::Text),
                other => raw_to_text(other).map(Value::Text),
            },
            Convert::FeetToMeter => raw
                .as_f64()
                .map(|ft| Value::Float(feet_to_meter(ft, CONVERSION_PRECISION))),
            Convert::KnotToKph => raw
                .as_f64()
                .map(|kn| Value::Float(knot_to_kph(kn, CONVERSION_PRECISION))),
            Convert::Date => raw
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
                .map(Value::Date),
            Convert::Time => raw.as_str().and_then(parse_time).map(Value::Time),
        }
    }
}

fn raw_to_text(raw: &RawValue) -> Option<String> {
    match raw {
        RawValue::Bytes(_) => None,
        RawValue::Text(s) if s.trim().is_empty() => None,
        RawValue::Text(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S%.f"))
        .ok()
}

fn raw_to_value(raw: &RawValue) -> Option<Value> {
    match raw {
        RawValue::Int(v) => Some(Value::Int(*v)),
        RawValue::Float(v) => Some(Value::Float(*v)),
        RawValue::Char(c) => Some(Value::Text(c.to_string())),
        RawValue::Text(s) => Some(Value::Text(s.clone())),
        RawValue::Bytes(_) => None,
    }
}

// ---------------------------------------------------------------------------
// Resolvers
// ---------------------------------------------------------------------------

impl Resolver {
    /// Combine raw inputs, in the order of the field's key paths.
    pub fn resolve(self, inputs: &[Option<RawValue>]) -> Option<Value> {
        let arg = |i: usize| inputs.get(i).and_then(Option::as_ref);
        match self {
            Resolver::Type => {
                let base = raw_to_text(arg(0)?)?;
                match arg(1).and_then(raw_to_text) {
                    Some(detailed) if base == "RS41" => Some(Value::Text(detailed)),
                    _ => Some(Value::Text(base)),
                }
            }
            Resolver::TimeOfDay => {
                let hour = u32::try_from(arg(0)?.as_i64()?).ok()?;
                let minute = u32::try_from(arg(1)?.as_i64()?).ok()?;
                let second = u32::try_from(arg(2)?.as_i64()?).ok()?;
                NaiveTime::from_hms_opt(hour, minute, second).map(Value::Time)
            }
            Resolver::Coordinate => {
                let degree = arg(0)?.as_f64()?;
                let minute = arg(1)?.as_f64()?;
                let hemisphere = arg(2)?.as_char()?;
                let minute = match (
                    arg(3).and_then(RawValue::as_char),
                    arg(4).and_then(RawValue::as_char),
                ) {
                    (Some(dao_d), Some(precision)) => {
                        minute_add_precision(minute, dao_d, precision)
                    }
                    _ => minute,
                };
                Some(Value::Float(gmm_to_dg(
                    degree,
                    minute,
                    hemisphere,
                    COORDINATE_PRECISION,
                )))
            }
            Resolver::TxOrRxKhz => match (
                arg(0).and_then(RawValue::as_f64),
                arg(1).and_then(RawValue::as_f64),
            ) {
                (Some(tx), _) => Some(Value::Float(tx)),
                (None, Some(rx_khz)) => Some(Value::Float(round_to(rx_khz / 1000.0, 3))),
                (None, None) => None,
            },
            Resolver::FirstPresent => inputs.iter().flatten().find_map(raw_to_value),
            Resolver::TimerSeconds => {
                let hour = arg(0)?.as_i64()?;
                let minute = arg(1)?.as_i64()?;
                let second = arg(2)?.as_i64()?;
                Some(Value::Int(hms_to_seconds(hour, minute, second)))
            }
        }
    }
}

/// Extend a GMM minute with the APRS DAO datum-option digits.
///
/// `W` appends the precision character as one digit. `w` appends three
/// digits computed from the base-91 character. A space precision character,
/// or any datum character other than `w`/`W`, leaves the minute unchanged.
pub fn minute_add_precision(minute: f64, dao_d: char, precision: char) -> f64 {
    if precision == ' ' {
        trace!("no additional coordinate precision");
        return minute;
    }
    let extended = match dao_d {
        'w' => {
            let extra = ((precision as u32 as f64 - 33.0) * 1.1 * 10.0).round() as i64;
            format!("{minute:.2}{extra:03}")
        }
        'W' => format!("{minute:.2}{precision}"),
        other => {
            debug!(dao_d = %other, "invalid DAO datum character");
            return minute;
        }
    };
    match extended.parse() {
        Ok(v) => v,
        Err(_) => {
            debug!(extended, "DAO extension not numeric");
            minute
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
