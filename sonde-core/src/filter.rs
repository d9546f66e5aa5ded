//! Plausibility filter for canonical telemetry.
//!
//! Builds a fresh record holding only the fields that pass their predicate.
//! Rejected fields are dropped, never the whole record.

use tracing::warn;

use crate::fields::{Check, Telemetry};
use crate::profile;
use crate::types::Value;

impl Check {
    /// True if `value` is plausible under this predicate.
    pub fn passes(&self, value: &Value) -> bool {
        match *self {
            Check::Any => true,
            Check::Range(min, max) => value.as_f64().is_some_and(|v| min <= v && v <= max),
            Check::Below(max) => value.as_f64().is_some_and(|v| v < max),
            Check::HalfOpen(min, max) => value.as_f64().is_some_and(|v| min <= v && v < max),
            Check::Callsign => value.as_str().is_some_and(is_valid_callsign),
            Check::KnownType => value.as_str().is_some_and(profile::is_known_type),
        }
    }
}

/// `CALL` or `CALL-SSID`: 1-6 alphanumerics, SSID 0-15.
pub fn is_valid_callsign(s: &str) -> bool {
    let (call, ssid) = match s.split_once('-') {
        Some((call, ssid)) => (call, Some(ssid)),
        None => (s, None),
    };
    let call_ok = (1..=6).contains(&call.len()) && call.chars().all(|c| c.is_ascii_alphanumeric());
    let ssid_ok = match ssid {
        None => true,
        Some(ssid) => {
            !ssid.is_empty()
                && ssid.len() <= 2
                && ssid.chars().all(|c| c.is_ascii_digit())
                && ssid.parse::<u8>().is_ok_and(|n| n <= 15)
        }
    };
    call_ok && ssid_ok
}

/// Return a copy of `telemetry` without the implausible fields.
pub fn filter(telemetry: &Telemetry) -> Telemetry {
    let mut filtered = Telemetry::new(telemetry.source);
    for (id, value) in telemetry.iter() {
        let spec = id.spec();
        if spec.check.passes(value) {
            filtered.insert(id, value.clone());
        } else {
            warn!(field = spec.name, %value, "implausible parameter removed");
        }
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldId;
    use crate::types::SourceKind;

    fn with(id: FieldId, value: Value) -> Telemetry {
        let mut t = Telemetry::new(SourceKind::Aprs);
        t.insert(id, value);
        t
    }

    #[test]
    fn test_latitude_bounds() {
        for v in [-90.0, 0.0, 90.0] {
            let t = filter(&with(FieldId::Latitude, Value::Float(v)));
            assert!(t.contains(FieldId::Latitude), "{v} should pass");
        }
        for v in [-90.0001, 90.0001] {
            let t = filter(&with(FieldId::Latitude, Value::Float(v)));
            assert!(!t.contains(FieldId::Latitude), "{v} should be rejected");
        }
    }

    #[test]
    fn test_course_half_open() {
        assert!(filter(&with(FieldId::Course, Value::Int(0))).contains(FieldId::Course));
        assert!(filter(&with(FieldId::Course, Value::Int(359))).contains(FieldId::Course));
        assert!(!filter(&with(FieldId::Course, Value::Int(360))).contains(FieldId::Course));
    }

    #[test]
    fn test_altitude_strictly_below() {
        let low = filter(&with(FieldId::Altitude, Value::Float(-50.0)));
        assert!(low.contains(FieldId::Altitude));
        let high = filter(&with(FieldId::Altitude, Value::Float(50000.0)));
        assert!(!high.contains(FieldId::Altitude));
    }

    #[test]
    fn test_humidity_range() {
        assert!(filter(&with(FieldId::Humidity, Value::Float(100.0))).contains(FieldId::Humidity));
        assert!(!filter(&with(FieldId::Humidity, Value::Float(100.5))).contains(FieldId::Humidity));
    }

    #[test]
    fn test_type_check() {
        assert!(filter(&with(FieldId::Type, Value::Text("DFM09".into()))).contains(FieldId::Type));
        assert!(!filter(&with(FieldId::Type, Value::Text("LMS6".into()))).contains(FieldId::Type));
    }

    #[test]
    fn test_callsign() {
        assert!(is_valid_callsign("DL1ABC-11"));
        assert!(is_valid_callsign("N0CALL"));
        assert!(!is_valid_callsign("DL1ABC-16"));
        assert!(!is_valid_callsign("TOOLONGCALL"));
        assert!(!is_valid_callsign("DL1ABC-"));
        assert!(!is_valid_callsign("DL 1AB"));
    }

    #[test]
    fn test_unchecked_fields_pass() {
        let t = filter(&with(FieldId::Device, Value::Text("anything".into())));
        assert!(t.contains(FieldId::Device));
    }

    #[test]
    fn test_only_bad_fields_dropped() {
        let mut t = Telemetry::new(SourceKind::Json);
        t.insert(FieldId::Temperature, Value::Float(-150.0));
        t.insert(FieldId::Pressure, Value::Float(850.0));
        let filtered = filter(&t);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.f64(FieldId::Pressure), Some(850.0));
        // Input untouched
        assert_eq!(t.len(), 2);
    }
}
