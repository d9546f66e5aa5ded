//! Radiosonde family profiles and the mandatory-field checker.
//!
//! One profile per vendor/type family. A record's `type` selects its profile
//! by longest prefix match; a profile disabled in the configuration behaves
//! as if it did not exist.

use tracing::{debug, error};

use crate::fields::{FieldId, Mandatory, Telemetry, FIELDS};
use crate::types::{PositionReference, Result, SondeError, TimeReference};

/// Post-processing applied to a serial after the prefix is stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialFormat {
    Plain,
    /// Reinsert the dashes: `ABCDEFG` -> `ABC-D-EFG`.
    M10Dashes,
    /// Drop everything from the first `[`.
    M20Bracket,
}

/// Where a family's upload serial comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialRule {
    Field {
        field: FieldId,
        strip: usize,
        format: SerialFormat,
    },
    /// Synthetic serial hashed from power-on time and frequency.
    ImetHash,
}

/// Where a family's upload frame number comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRule {
    Direct,
    /// Seconds since the GPS epoch of the record's datetime.
    GpsSeconds,
}

/// Static description of one radiosonde family.
#[derive(Debug)]
pub struct Profile {
    /// Prefix of the telemetry `type` selecting this profile.
    pub key: &'static str,
    pub manufacturer: &'static str,
    pub type_name: &'static str,
    pub subtypes: &'static [&'static str],
    pub serial: SerialRule,
    pub framenumber: FrameRule,
    pub altitude_precision: u32,
    pub radiosonde_time: TimeReference,
    pub sondehub_time: TimeReference,
    pub position_reference: PositionReference,
    pub enabled_by_default: bool,
}

pub static PROFILES: &[Profile] = &[
    Profile {
        key: "RS41",
        manufacturer: "Vaisala",
        type_name: "RS41",
        subtypes: &["RS41-SG", "RS41-SGP", "RS41-SGM"],
        serial: SerialRule::Field {
            field: FieldId::Serial,
            strip: 1,
            format: SerialFormat::Plain,
        },
        framenumber: FrameRule::Direct,
        altitude_precision: 5,
        radiosonde_time: TimeReference::Gps,
        sondehub_time: TimeReference::Gps,
        position_reference: PositionReference::Gps,
        enabled_by_default: true,
    },
    Profile {
        key: "RS92",
        manufacturer: "Vaisala",
        type_name: "RS92",
        subtypes: &[],
        serial: SerialRule::Field {
            field: FieldId::Serial,
            strip: 0,
            format: SerialFormat::Plain,
        },
        framenumber: FrameRule::Direct,
        altitude_precision: 5,
        radiosonde_time: TimeReference::Gps,
        sondehub_time: TimeReference::Gps,
        position_reference: PositionReference::Gps,
        enabled_by_default: true,
    },
    Profile {
        key: "DFM",
        manufacturer: "Graw",
        type_name: "DFM",
        subtypes: &["DFM06", "DFM09", "DFM09P", "DFM17"],
        serial: SerialRule::Field {
            field: FieldId::Serial,
            strip: 1,
            format: SerialFormat::Plain,
        },
        framenumber: FrameRule::GpsSeconds,
        altitude_precision: 2,
        radiosonde_time: TimeReference::Utc,
        sondehub_time: TimeReference::Gps,
        position_reference: PositionReference::Gps,
        enabled_by_default: true,
    },
    Profile {
        key: "iMET",
        manufacturer: "Intermet Systems",
        type_name: "iMet-4",
        subtypes: &[],
        serial: SerialRule::ImetHash,
        framenumber: FrameRule::Direct,
        altitude_precision: 0,
        radiosonde_time: TimeReference::Gps,
        sondehub_time: TimeReference::Gps,
        position_reference: PositionReference::Msl,
        enabled_by_default: true,
    },
    Profile {
        key: "M10",
        manufacturer: "Meteomodem",
        type_name: "M10",
        subtypes: &[],
        serial: SerialRule::Field {
            field: FieldId::DetailedSerial,
            strip: 0,
            format: SerialFormat::M10Dashes,
        },
        framenumber: FrameRule::GpsSeconds,
        altitude_precision: 2,
        radiosonde_time: TimeReference::Utc,
        sondehub_time: TimeReference::Gps,
        position_reference: PositionReference::Gps,
        enabled_by_default: false,
    },
    Profile {
        key: "M20",
        manufacturer: "Meteomodem",
        type_name: "M20",
        subtypes: &[],
        serial: SerialRule::Field {
            field: FieldId::DetailedSerial,
            strip: 0,
            format: SerialFormat::M20Bracket,
        },
        framenumber: FrameRule::GpsSeconds,
        altitude_precision: 2,
        radiosonde_time: TimeReference::Gps,
        sondehub_time: TimeReference::Gps,
        position_reference: PositionReference::Gps,
        enabled_by_default: false,
    },
    Profile {
        key: "MRZ",
        manufacturer: "Meteo-Radiy",
        type_name: "MRZ",
        subtypes: &[],
        serial: SerialRule::Field {
            field: FieldId::DetailedSerial,
            strip: 0,
            format: SerialFormat::Plain,
        },
        framenumber: FrameRule::GpsSeconds,
        altitude_precision: 5,
        radiosonde_time: TimeReference::Utc,
        sondehub_time: TimeReference::Gps,
        position_reference: PositionReference::Gps,
        enabled_by_default: true,
    },
    Profile {
        key: "MEISEI",
        manufacturer: "Meisei",
        type_name: "IMS100",
        subtypes: &[],
        serial: SerialRule::Field {
            field: FieldId::DetailedSerial,
            strip: 7,
            format: SerialFormat::Plain,
        },
        framenumber: FrameRule::Direct,
        altitude_precision: 1,
        radiosonde_time: TimeReference::Utc,
        sondehub_time: TimeReference::Gps,
        position_reference: PositionReference::Gps,
        enabled_by_default: true,
    },
];

/// Longest profile key that prefixes `type_str`, ignoring enabled flags.
pub fn lookup(type_str: &str) -> Option<&'static Profile> {
    PROFILES
        .iter()
        .filter(|p| type_str.starts_with(p.key))
        .max_by_key(|p| p.key.len())
}

/// True if any profile key prefixes `type_str`.
pub fn is_known_type(type_str: &str) -> bool {
    lookup(type_str).is_some()
}

// ---------------------------------------------------------------------------
// Profile table with runtime enable flags
// ---------------------------------------------------------------------------

/// The profile table with enable flags fixed once at startup.
#[derive(Debug, Clone)]
pub struct ProfileTable {
    enabled: Vec<bool>,
}

impl Default for ProfileTable {
    fn default() -> Self {
        ProfileTable {
            enabled: PROFILES.iter().map(|p| p.enabled_by_default).collect(),
        }
    }
}

impl ProfileTable {
    /// Build the table, overriding the enable flag of each listed family key.
    pub fn new(overrides: &[(&str, bool)]) -> Self {
        let mut table = ProfileTable::default();
        for &(key, enabled) in overrides {
            if let Some(i) = PROFILES.iter().position(|p| p.key.eq_ignore_ascii_case(key)) {
                table.enabled[i] = enabled;
            }
        }
        table
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        PROFILES
            .iter()
            .position(|p| p.key == key)
            .map(|i| self.enabled[i])
            .unwrap_or(false)
    }

    /// Enabled profile selected by `type_str`.
    pub fn resolve(&self, type_str: &str) -> Option<&'static Profile> {
        let profile = lookup(type_str)?;
        if self.is_enabled(profile.key) {
            Some(profile)
        } else {
            debug!(family = profile.key, "radiosonde family disabled");
            None
        }
    }

    /// Verify every mandatory field and return the record's profile.
    ///
    /// Always-mandatory fields are checked first, then the family is
    /// determined, then the fields mandatory for that family.
    pub fn check_mandatory(&self, telemetry: &Telemetry) -> Result<&'static Profile> {
        for spec in FIELDS {
            if spec.mandatory == Mandatory::Always && !telemetry.contains(spec.id) {
                error!(field = spec.name, "mandatory parameter missing");
                return Err(SondeError::MandatoryFieldMissing {
                    field: spec.name,
                    family: "all".into(),
                });
            }
        }

        let type_str = telemetry.str(FieldId::Type).unwrap_or_default();
        let Some(profile) = self.resolve(type_str) else {
            error!(type_str, "radiosonde type unknown");
            return Err(SondeError::UnknownType(type_str.to_string()));
        };

        for spec in FIELDS {
            if let Mandatory::Families(families) = spec.mandatory {
                if families.contains(&profile.key) && !telemetry.contains(spec.id) {
                    error!(
                        field = spec.name,
                        family = profile.key,
                        "mandatory parameter missing"
                    );
                    return Err(SondeError::MandatoryFieldMissing {
                        field: spec.name,
                        family: profile.key.to_string(),
                    });
                }
            }
        }

        debug!(family = profile.key, "all mandatory parameters present");
        Ok(profile)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SourceKind, Value};
    use chrono::NaiveTime;

    fn base_telemetry(type_str: &str) -> Telemetry {
        let mut t = Telemetry::new(SourceKind::Aprs);
        t.insert(FieldId::SourceAddress, Value::Text("DL1ABC-11".into()));
        t.insert(FieldId::Type, Value::Text(type_str.into()));
        t.insert(
            FieldId::Time,
            Value::Time(NaiveTime::from_hms_opt(12, 0, 0).unwrap()),
        );
        t.insert(FieldId::Latitude, Value::Float(48.0));
        t.insert(FieldId::Longitude, Value::Float(11.0));
        t.insert(FieldId::Altitude, Value::Float(1000.0));
        t
    }

    #[test]
    fn test_lookup_prefix() {
        assert_eq!(lookup("RS41-SG").map(|p| p.key), Some("RS41"));
        assert_eq!(lookup("DFM17").map(|p| p.key), Some("DFM"));
        assert_eq!(lookup("iMET").map(|p| p.manufacturer), Some("Intermet Systems"));
        assert!(lookup("LMS6").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn test_default_enabled_flags() {
        let table = ProfileTable::default();
        assert!(table.is_enabled("RS41"));
        assert!(!table.is_enabled("M10"));
        assert!(!table.is_enabled("M20"));
        assert!(table.resolve("M10").is_none());
    }

    #[test]
    fn test_overrides() {
        let table = ProfileTable::new(&[("m10", true), ("RS92", false)]);
        assert!(table.resolve("M10").is_some());
        assert!(table.resolve("RS92").is_none());
    }

    #[test]
    fn test_rs41_accepted_with_serial() {
        let table = ProfileTable::default();
        let mut t = base_telemetry("RS41-SG");
        t.insert(FieldId::Serial, Value::Text("S1234567".into()));
        t.insert(FieldId::Framenumber, Value::Int(100));
        let profile = table.check_mandatory(&t).unwrap();
        assert_eq!(profile.key, "RS41");
    }

    #[test]
    fn test_rs41_rejected_without_serial() {
        let table = ProfileTable::default();
        let mut t = base_telemetry("RS41-SG");
        t.insert(FieldId::Framenumber, Value::Int(100));
        match table.check_mandatory(&t) {
            Err(SondeError::MandatoryFieldMissing { field, family }) => {
                assert_eq!(field, "serial");
                assert_eq!(family, "RS41");
            }
            other => panic!("expected missing serial, got {other:?}"),
        }
    }

    #[test]
    fn test_always_mandatory_missing() {
        let table = ProfileTable::default();
        let mut t = base_telemetry("RS41");
        t.remove(FieldId::Latitude);
        assert!(matches!(
            table.check_mandatory(&t),
            Err(SondeError::MandatoryFieldMissing { field: "latitude", .. })
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let table = ProfileTable::default();
        let t = base_telemetry("LMS6");
        assert!(matches!(
            table.check_mandatory(&t),
            Err(SondeError::UnknownType(ref s)) if s == "LMS6"
        ));
    }

    #[test]
    fn test_imet_requires_frequency() {
        let table = ProfileTable::default();
        let mut t = base_telemetry("iMET");
        t.insert(FieldId::Framenumber, Value::Int(100));
        assert!(matches!(
            table.check_mandatory(&t),
            Err(SondeError::MandatoryFieldMissing { field: "frequency", .. })
        ));
        t.insert(FieldId::Frequency, Value::Float(403.0));
        assert!(table.check_mandatory(&t).is_ok());
    }
}
