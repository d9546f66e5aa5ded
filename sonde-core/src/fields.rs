//! Canonical telemetry fields and the static per-field descriptor table.
//!
//! Each row says where a field comes from in APRS and JSON input, how it is
//! plausibility-checked, whether it is mandatory, and which optional upload
//! field it feeds.

use std::collections::BTreeMap;

use crate::types::{SourceKind, Value};

/// Identifier of a canonical telemetry field. Doubles as an index into [`FIELDS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldId {
    SourceAddress,
    Serial,
    DetailedSerial,
    Type,
    Date,
    Time,
    LeapSeconds,
    Latitude,
    Longitude,
    Altitude,
    Climb,
    Speed,
    Course,
    Temperature,
    Pressure,
    Humidity,
    Battery,
    Satellites,
    Framenumber,
    Frequency,
    TxFrequency,
    RxAfc,
    RxAfcMax,
    Rssi,
    TxPower,
    BurstTimer,
    Powerup,
    Device,
    Calibration,
    FakePressure,
    OverGround,
    GpsNoise,
    Ozone,
    Azimuth,
    Elevation,
    Distance,
    PumpCurrent,
    PumpVoltage,
    Xdata,
}

impl FieldId {
    pub fn spec(self) -> &'static FieldSpec {
        &FIELDS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }
}

// ---------------------------------------------------------------------------
// Descriptor types
// ---------------------------------------------------------------------------

/// Location of one raw value: a top-level key or a key inside a sub-object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPath {
    Key(&'static str),
    Nested(&'static str, &'static str),
}

/// Conversion applied to a single raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convert {
    Int,
    Float,
    Text,
    /// AX.25 address bytes or plain text to a callsign.
    Callsign,
    FeetToMeter,
    KnotToKph,
    /// `%Y-%m-%d`
    Date,
    /// `%H:%M:%S` with optional fraction
    Time,
}

/// Named combinator for fields derived from several raw values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolver {
    /// `[type, ser]`: the detailed serial names the subtype of a bare `RS41`.
    Type,
    /// `[hour, minute, second]`
    TimeOfDay,
    /// `[degree, minute, hemisphere, dao_D, dao_A|dao_O]`
    Coordinate,
    /// `[tx MHz, rx kHz]`: transmit frequency, else receiver frequency.
    TxOrRxKhz,
    /// First input that is present.
    FirstPresent,
    /// `[hour, minute, second]` to a count of seconds.
    TimerSeconds,
}

/// Raw source of a canonical field for one input schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Direct(&'static str, Convert),
    Nested(&'static str, &'static str, Convert),
    Combine(&'static [KeyPath], Resolver),
}

/// Plausibility predicate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Check {
    Any,
    /// `min <= v <= max`
    Range(f64, f64),
    /// `v < max`
    Below(f64),
    /// `min <= v < max`
    HalfOpen(f64, f64),
    Callsign,
    KnownType,
}

/// When a field must be present for a record to be uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mandatory {
    Never,
    Always,
    Families(&'static [&'static str]),
}

/// Optional upload field a canonical field feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Temp,
    Pressure,
    Humidity,
    VelV,
    VelH,
    Heading,
    Sats,
    Batt,
    BurstTimer,
    Xdata,
    Frequency,
    TxFrequency,
    Rssi,
}

impl Output {
    pub fn name(self) -> &'static str {
        match self {
            Output::Temp => "temp",
            Output::Pressure => "pressure",
            Output::Humidity => "humidity",
            Output::VelV => "vel_v",
            Output::VelH => "vel_h",
            Output::Heading => "heading",
            Output::Sats => "sats",
            Output::Batt => "batt",
            Output::BurstTimer => "burst_timer",
            Output::Xdata => "xdata",
            Output::Frequency => "frequency",
            Output::TxFrequency => "tx_frequency",
            Output::Rssi => "rssi",
        }
    }
}

/// One row of the field table.
#[derive(Debug)]
pub struct FieldSpec {
    pub id: FieldId,
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub aprs: Option<Source>,
    pub json: Option<Source>,
    pub check: Check,
    pub mandatory: Mandatory,
    pub output: Option<Output>,
}

impl FieldSpec {
    pub fn source(&self, kind: SourceKind) -> Option<&Source> {
        match kind {
            SourceKind::Aprs => self.aprs.as_ref(),
            SourceKind::Json => self.json.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Field table
// ---------------------------------------------------------------------------

use Check::{Any, Below, HalfOpen, Range};
use Source::{Combine, Direct, Nested};

const fn field(
    id: FieldId,
    name: &'static str,
    unit: Option<&'static str>,
    aprs: Option<Source>,
    json: Option<Source>,
    check: Check,
    mandatory: Mandatory,
    output: Option<Output>,
) -> FieldSpec {
    FieldSpec {
        id,
        name,
        unit,
        aprs,
        json,
        check,
        mandatory,
        output,
    }
}

pub static FIELDS: &[FieldSpec] = &[
    field(
        FieldId::SourceAddress,
        "source_address",
        None,
        Some(Direct("source_address", Convert::Callsign)),
        Some(Direct("callsign", Convert::Callsign)),
        Check::Callsign,
        Mandatory::Always,
        None,
    ),
    field(
        FieldId::Serial,
        "serial",
        None,
        Some(Direct("serial", Convert::Text)),
        Some(Direct("id", Convert::Text)),
        Any,
        Mandatory::Families(&["RS41", "RS92", "DFM", "M10"]),
        None,
    ),
    field(
        FieldId::DetailedSerial,
        "detailed_serial",
        None,
        Some(Direct("ser", Convert::Text)),
        Some(Direct("ser", Convert::Text)),
        Any,
        Mandatory::Families(&["M10", "M20", "MRZ", "MEISEI"]),
        None,
    ),
    field(
        FieldId::Type,
        "type",
        None,
        Some(Combine(&[KeyPath::Key("type"), KeyPath::Key("ser")], Resolver::Type)),
        Some(Combine(&[KeyPath::Key("type"), KeyPath::Key("ser")], Resolver::Type)),
        Check::KnownType,
        Mandatory::Always,
        None,
    ),
    field(
        FieldId::Date,
        "date",
        None,
        None,
        Some(Direct("date", Convert::Date)),
        Any,
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::Time,
        "time",
        None,
        Some(Combine(
            &[
                KeyPath::Key("hour"),
                KeyPath::Key("minute"),
                KeyPath::Key("second"),
            ],
            Resolver::TimeOfDay,
        )),
        Some(Direct("time", Convert::Time)),
        Any,
        Mandatory::Always,
        None,
    ),
    field(
        FieldId::LeapSeconds,
        "leap_seconds",
        Some("s"),
        None,
        Some(Direct("leap", Convert::Int)),
        Range(0.0, 60.0),
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::Latitude,
        "latitude",
        Some("°"),
        Some(Combine(
            &[
                KeyPath::Key("latitude_degree"),
                KeyPath::Key("latitude_minute"),
                KeyPath::Key("latitude_ns"),
                KeyPath::Key("dao_D"),
                KeyPath::Key("dao_A"),
            ],
            Resolver::Coordinate,
        )),
        Some(Direct("lat", Convert::Float)),
        Range(-90.0, 90.0),
        Mandatory::Always,
        None,
    ),
    field(
        FieldId::Longitude,
        "longitude",
        Some("°"),
        Some(Combine(
            &[
                KeyPath::Key("longitude_degree"),
                KeyPath::Key("longitude_minute"),
                KeyPath::Key("longitude_we"),
                KeyPath::Key("dao_D"),
                KeyPath::Key("dao_O"),
            ],
            Resolver::Coordinate,
        )),
        Some(Direct("lon", Convert::Float)),
        Range(-180.0, 180.0),
        Mandatory::Always,
        None,
    ),
    field(
        FieldId::Altitude,
        "altitude",
        Some("m"),
        Some(Direct("altitude", Convert::FeetToMeter)),
        Some(Direct("alt", Convert::Float)),
        Below(50000.0),
        Mandatory::Always,
        None,
    ),
    field(
        FieldId::Climb,
        "climb",
        Some("m/s"),
        Some(Direct("clb", Convert::Float)),
        Some(Direct("climb", Convert::Float)),
        Range(-100.0, 100.0),
        Mandatory::Never,
        Some(Output::VelV),
    ),
    field(
        FieldId::Speed,
        "speed",
        Some("kph"),
        Some(Direct("speed", Convert::KnotToKph)),
        Some(Direct("speed", Convert::Float)),
        Below(1000.0),
        Mandatory::Never,
        Some(Output::VelH),
    ),
    field(
        FieldId::Course,
        "course",
        Some("°"),
        Some(Direct("course", Convert::Int)),
        Some(Direct("dir", Convert::Float)),
        HalfOpen(0.0, 360.0),
        Mandatory::Never,
        Some(Output::Heading),
    ),
    field(
        FieldId::Temperature,
        "temperature",
        Some("°C"),
        Some(Direct("t", Convert::Float)),
        Some(Direct("temp", Convert::Float)),
        Range(-100.0, 100.0),
        Mandatory::Never,
        Some(Output::Temp),
    ),
    field(
        FieldId::Pressure,
        "pressure",
        Some("hPa"),
        Some(Direct("p", Convert::Float)),
        Some(Direct("press", Convert::Float)),
        Range(0.0, 2000.0),
        Mandatory::Never,
        Some(Output::Pressure),
    ),
    field(
        FieldId::Humidity,
        "humidity",
        Some("%"),
        Some(Direct("h", Convert::Float)),
        Some(Direct("hum", Convert::Float)),
        Range(0.0, 100.0),
        Mandatory::Never,
        Some(Output::Humidity),
    ),
    field(
        FieldId::Battery,
        "battery",
        Some("V"),
        Some(Direct("batt", Convert::Float)),
        Some(Direct("batt", Convert::Float)),
        Range(0.0, 20.0),
        Mandatory::Never,
        Some(Output::Batt),
    ),
    field(
        FieldId::Satellites,
        "satellites",
        None,
        Some(Direct("sats", Convert::Int)),
        Some(Direct("sats", Convert::Int)),
        Range(0.0, 30.0),
        Mandatory::Never,
        Some(Output::Sats),
    ),
    field(
        FieldId::Framenumber,
        "framenumber",
        None,
        Some(Direct("fn", Convert::Int)),
        Some(Direct("frame", Convert::Int)),
        Range(0.0, 86400.0),
        Mandatory::Families(&["RS41", "RS92", "iMET", "MEISEI"]),
        None,
    ),
    field(
        FieldId::Frequency,
        "frequency",
        Some("MHz"),
        Some(Combine(
            &[KeyPath::Key("f"), KeyPath::Key("rx_f")],
            Resolver::TxOrRxKhz,
        )),
        Some(Combine(
            &[KeyPath::Key("freq"), KeyPath::Nested("rx", "freq")],
            Resolver::FirstPresent,
        )),
        Range(400.0, 406.0),
        Mandatory::Families(&["iMET"]),
        Some(Output::Frequency),
    ),
    field(
        FieldId::TxFrequency,
        "tx_frequency",
        Some("MHz"),
        Some(Direct("f", Convert::Float)),
        Some(Direct("freq", Convert::Float)),
        Range(400.0, 406.0),
        Mandatory::Never,
        Some(Output::TxFrequency),
    ),
    field(
        FieldId::RxAfc,
        "rx_afc",
        Some("kHz"),
        Some(Direct("rx_afc", Convert::Int)),
        Some(Nested("rx", "afc", Convert::Int)),
        Any,
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::RxAfcMax,
        "rx_afc_max",
        Some("kHz"),
        Some(Direct("rx_afc_max", Convert::Int)),
        Some(Nested("rx", "afc_max", Convert::Int)),
        Any,
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::Rssi,
        "rssi",
        Some("dB"),
        Some(Direct("rssi", Convert::Float)),
        Some(Nested("rx", "rssi", Convert::Float)),
        Range(0.0, 200.0),
        Mandatory::Never,
        Some(Output::Rssi),
    ),
    field(
        FieldId::TxPower,
        "tx_power",
        Some("dBm"),
        Some(Direct("tx", Convert::Int)),
        Some(Direct("txpower", Convert::Int)),
        Range(0.0, 200.0),
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::BurstTimer,
        "burst_timer",
        Some("s"),
        Some(Combine(
            &[
                KeyPath::Key("tx_past_burst_hour"),
                KeyPath::Key("tx_past_burst_minute"),
                KeyPath::Key("tx_past_burst_second"),
            ],
            Resolver::TimerSeconds,
        )),
        Some(Combine(
            &[KeyPath::Key("bursttx"), KeyPath::Key("txoff")],
            Resolver::FirstPresent,
        )),
        Range(0.0, 65535.0),
        Mandatory::Never,
        Some(Output::BurstTimer),
    ),
    field(
        FieldId::Powerup,
        "powerup",
        Some("s"),
        Some(Combine(
            &[
                KeyPath::Key("powerup_hour"),
                KeyPath::Key("powerup_minute"),
                KeyPath::Key("powerup_second"),
            ],
            Resolver::TimerSeconds,
        )),
        Some(Direct("powerup", Convert::Int)),
        Range(0.0, 86399.0),
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::Device,
        "device",
        None,
        Some(Direct("dev", Convert::Text)),
        Some(Direct("dev", Convert::Text)),
        Any,
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::Calibration,
        "calibration",
        Some("%"),
        Some(Direct("calibration", Convert::Int)),
        Some(Direct("calibration", Convert::Int)),
        Range(0.0, 100.0),
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::FakePressure,
        "fake_pressure",
        Some("hPa"),
        Some(Direct("fp", Convert::Float)),
        Some(Direct("fp", Convert::Float)),
        Range(0.0, 2000.0),
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::OverGround,
        "over_ground",
        Some("m"),
        Some(Direct("og", Convert::Int)),
        Some(Direct("og", Convert::Int)),
        Range(0.0, 50000.0),
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::GpsNoise,
        "gps_noise",
        Some("m"),
        Some(Direct("hdil", Convert::Float)),
        Some(Direct("hdil", Convert::Float)),
        Range(0.0, 100.0),
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::Ozone,
        "ozone",
        Some("mPa"),
        Some(Direct("o3", Convert::Float)),
        Some(Direct("o3", Convert::Float)),
        Range(0.0, 100.0),
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::Azimuth,
        "azimuth",
        Some("°"),
        Some(Direct("azimuth", Convert::Int)),
        Some(Direct("azimuth", Convert::Float)),
        HalfOpen(0.0, 360.0),
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::Elevation,
        "elevation",
        Some("°"),
        Some(Direct("elevation", Convert::Float)),
        Some(Direct("elevation", Convert::Float)),
        Range(0.0, 90.0),
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::Distance,
        "distance",
        Some("km"),
        Some(Direct("dist", Convert::Float)),
        Some(Direct("dist", Convert::Float)),
        Range(0.0, 1500.0),
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::PumpCurrent,
        "pump_current",
        Some("mA"),
        Some(Direct("pump_ma", Convert::Int)),
        Some(Nested("pump", "ma", Convert::Int)),
        Range(0.0, 10000.0),
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::PumpVoltage,
        "pump_voltage",
        Some("V"),
        Some(Direct("pump_v", Convert::Float)),
        Some(Nested("pump", "v", Convert::Float)),
        Range(0.0, 100.0),
        Mandatory::Never,
        None,
    ),
    field(
        FieldId::Xdata,
        "xdata",
        None,
        None,
        Some(Direct("xdata", Convert::Text)),
        Any,
        Mandatory::Never,
        Some(Output::Xdata),
    ),
];

// ---------------------------------------------------------------------------
// Canonical telemetry record
// ---------------------------------------------------------------------------

/// Canonical telemetry: typed values keyed by field, absent fields omitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub source: SourceKind,
    values: BTreeMap<FieldId, Value>,
}

impl Telemetry {
    pub fn new(source: SourceKind) -> Self {
        Telemetry {
            source,
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, id: FieldId, value: Value) {
        self.values.insert(id, value);
    }

    pub fn remove(&mut self, id: FieldId) -> Option<Value> {
        self.values.remove(&id)
    }

    pub fn get(&self, id: FieldId) -> Option<&Value> {
        self.values.get(&id)
    }

    pub fn contains(&self, id: FieldId) -> bool {
        self.values.contains_key(&id)
    }

    pub fn f64(&self, id: FieldId) -> Option<f64> {
        self.get(id).and_then(Value::as_f64)
    }

    pub fn i64(&self, id: FieldId) -> Option<i64> {
        self.get(id).and_then(Value::as_i64)
    }

    pub fn str(&self, id: FieldId) -> Option<&str> {
        self.get(id).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fields in table order.
    pub fn iter(&self) -> impl Iterator<Item = (FieldId, &Value)> {
        self.values.iter().map(|(&id, v)| (id, v))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_indexed_by_id() {
        for (i, spec) in FIELDS.iter().enumerate() {
            assert_eq!(spec.id as usize, i, "row {i} ({}) out of order", spec.name);
        }
        assert_eq!(FieldId::Xdata as usize, FIELDS.len() - 1);
    }

    #[test]
    fn test_names_unique() {
        let mut names: Vec<_> = FIELDS.iter().map(|f| f.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), FIELDS.len());
    }

    #[test]
    fn test_always_mandatory_set() {
        let always: Vec<_> = FIELDS
            .iter()
            .filter(|f| f.mandatory == Mandatory::Always)
            .map(|f| f.id)
            .collect();
        assert_eq!(
            always,
            vec![
                FieldId::SourceAddress,
                FieldId::Type,
                FieldId::Time,
                FieldId::Latitude,
                FieldId::Longitude,
                FieldId::Altitude,
            ]
        );
    }

    #[test]
    fn test_output_names() {
        assert_eq!(FieldId::Climb.spec().output.map(Output::name), Some("vel_v"));
        assert_eq!(FieldId::Course.spec().output.map(Output::name), Some("heading"));
        assert_eq!(FieldId::Serial.spec().output, None);
    }

    #[test]
    fn test_telemetry_iter_in_table_order() {
        let mut t = Telemetry::new(SourceKind::Json);
        t.insert(FieldId::Altitude, Value::Float(1.0));
        t.insert(FieldId::Serial, Value::Text("X".into()));
        let ids: Vec<_> = t.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![FieldId::Serial, FieldId::Altitude]);
        assert_eq!(t.str(FieldId::Serial), Some("X"));
        assert_eq!(t.f64(FieldId::Altitude), Some(1.0));
    }
}
