//! Reformat accepted telemetry into the SondeHub upload schema.
//!
//! Deterministic: the current time is passed in, never read.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::config::Station;
use crate::convert::{kph_to_ms, round_to};
use crate::fields::{FieldId, Output, Telemetry};
use crate::profile::{FrameRule, Profile, SerialFormat, SerialRule};
use crate::types::{Result, SondeError, TimeReference, Value};

pub const SOFTWARE_NAME: &str = "sonde-relay";
pub const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// GPS-UTC offset applied when the radiosonde does not report one.
pub const LEAP_SECONDS: i64 = 18;

/// Burst timer value some radiosondes send while the timer is inactive.
pub const BURST_TIMER_INACTIVE: i64 = 30600;
/// Burst timer value SondeHub expects for an inactive timer.
pub const BURST_TIMER_DISABLED: i64 = 65535;

/// Unix timestamp of the GPS epoch, 1980-01-06T00:00:00Z.
const GPS_EPOCH_UNIX: i64 = 315_964_800;

const POSITION_PRECISION: u32 = 5;
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

// ---------------------------------------------------------------------------
// Upload schema
// ---------------------------------------------------------------------------

/// One telemetry record in the SondeHub upload schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRecord {
    pub software_name: String,
    pub software_version: String,
    pub uploader_callsign: String,
    pub uploader_position: [f64; 3],
    pub uploader_antenna: String,
    pub time_received: String,
    pub manufacturer: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub serial: String,
    pub datetime: String,
    pub frame: i64,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vel_v: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vel_h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sats: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst_timer: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xdata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
    pub ref_datetime: String,
    pub ref_position: String,
}

/// Upload field names in output order, with units, for tabular dumps.
pub const UPLOAD_COLUMNS: &[(&str, Option<&str>)] = &[
    ("software_name", None),
    ("software_version", None),
    ("uploader_callsign", None),
    ("uploader_position", None),
    ("uploader_antenna", None),
    ("time_received", None),
    ("manufacturer", None),
    ("type", None),
    ("subtype", None),
    ("serial", None),
    ("datetime", None),
    ("frame", None),
    ("lat", Some("°")),
    ("lon", Some("°")),
    ("alt", Some("m")),
    ("temp", Some("°C")),
    ("pressure", Some("hPa")),
    ("humidity", Some("%")),
    ("vel_v", Some("m/s")),
    ("vel_h", Some("m/s")),
    ("heading", Some("°")),
    ("sats", None),
    ("batt", Some("V")),
    ("burst_timer", Some("s")),
    ("xdata", None),
    ("frequency", Some("MHz")),
    ("tx_frequency", Some("MHz")),
    ("rssi", Some("dBm")),
    ("ref_datetime", None),
    ("ref_position", None),
];

impl UploadRecord {
    fn set_output(&mut self, output: Output, value: &Value) {
        match output {
            Output::Temp => self.temp = value.as_f64(),
            Output::Pressure => self.pressure = value.as_f64(),
            Output::Humidity => self.humidity = value.as_f64(),
            Output::VelV => self.vel_v = value.as_f64(),
            Output::VelH => self.vel_h = value.as_f64().map(|kph| kph_to_ms(kph, 1)),
            Output::Heading => self.heading = value.as_f64(),
            Output::Sats => self.sats = value.as_i64(),
            Output::Batt => self.batt = value.as_f64(),
            Output::BurstTimer => {
                self.burst_timer = value.as_i64().map(|v| {
                    if v == BURST_TIMER_INACTIVE {
                        BURST_TIMER_DISABLED
                    } else {
                        v
                    }
                })
            }
            Output::Xdata => self.xdata = value.as_str().map(str::to_string),
            Output::Frequency => self.frequency = value.as_f64(),
            Output::TxFrequency => self.tx_frequency = value.as_f64(),
            Output::Rssi => self.rssi = value.as_f64(),
        }
    }
}

/// Station position report sent to the listeners endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationRecord {
    pub software_name: String,
    pub software_version: String,
    pub uploader_callsign: String,
    pub uploader_position: [f64; 3],
    pub uploader_antenna: String,
    pub uploader_contact_email: String,
    pub mobile: bool,
}

impl StationRecord {
    pub fn new(station: &Station) -> Self {
        StationRecord {
            software_name: SOFTWARE_NAME.into(),
            software_version: SOFTWARE_VERSION.into(),
            uploader_callsign: station.callsign.clone(),
            uploader_position: rounded_position(station.position),
            uploader_antenna: station.antenna.clone(),
            uploader_contact_email: station.contact_email.clone(),
            mobile: false,
        }
    }
}

fn rounded_position(position: [f64; 3]) -> [f64; 3] {
    [
        round_to(position[0], POSITION_PRECISION),
        round_to(position[1], POSITION_PRECISION),
        round_to(position[2], 1),
    ]
}

// ---------------------------------------------------------------------------
// Reformatter
// ---------------------------------------------------------------------------

/// Reshape accepted telemetry into an upload record.
pub fn reformat(
    telemetry: &Telemetry,
    profile: &Profile,
    station: &Station,
    now: DateTime<Utc>,
) -> Result<UploadRecord> {
    let type_str = telemetry
        .str(FieldId::Type)
        .ok_or(SondeError::MissingField("type"))?;
    let subtype = profile
        .subtypes
        .iter()
        .any(|s| *s == type_str)
        .then(|| type_str.to_string());

    let datetime = resolve_datetime(telemetry, profile, now.naive_utc())?;
    let serial = resolve_serial(telemetry, profile, datetime)?;
    let frame = resolve_frame(telemetry, profile, datetime)?;

    let alt = telemetry
        .f64(FieldId::Altitude)
        .ok_or(SondeError::MissingField("altitude"))?;
    let lat = telemetry
        .f64(FieldId::Latitude)
        .ok_or(SondeError::MissingField("latitude"))?;
    let lon = telemetry
        .f64(FieldId::Longitude)
        .ok_or(SondeError::MissingField("longitude"))?;

    let mut record = UploadRecord {
        software_name: SOFTWARE_NAME.into(),
        software_version: SOFTWARE_VERSION.into(),
        uploader_callsign: station.callsign.clone(),
        uploader_position: rounded_position(station.position),
        uploader_antenna: station.antenna.clone(),
        time_received: now.format(DATETIME_FORMAT).to_string(),
        manufacturer: profile.manufacturer.into(),
        type_name: profile.type_name.into(),
        subtype,
        serial,
        datetime: datetime.format(DATETIME_FORMAT).to_string(),
        frame,
        lat,
        lon,
        alt: round_to(alt, profile.altitude_precision),
        temp: None,
        pressure: None,
        humidity: None,
        vel_v: None,
        vel_h: None,
        heading: None,
        sats: None,
        batt: None,
        burst_timer: None,
        xdata: None,
        frequency: None,
        tx_frequency: None,
        rssi: None,
        ref_datetime: profile.sondehub_time.as_str().into(),
        ref_position: profile.position_reference.as_str().into(),
    };

    for (id, value) in telemetry.iter() {
        if let Some(output) = id.spec().output {
            record.set_output(output, value);
            trace!(field = id.name(), output = output.name(), "optional parameter reformatted");
        }
    }

    debug!(serial = %record.serial, frame = record.frame, "telemetry reformatted");
    Ok(record)
}

/// Date and time of the record, with leap seconds applied per profile.
pub fn resolve_datetime(
    telemetry: &Telemetry,
    profile: &Profile,
    now: NaiveDateTime,
) -> Result<NaiveDateTime> {
    let time = telemetry
        .get(FieldId::Time)
        .and_then(Value::as_time)
        .ok_or(SondeError::MissingField("time"))?;

    let datetime = match telemetry.get(FieldId::Date).and_then(Value::as_date) {
        Some(date) => date.and_time(time),
        None => fix_rollover(time, now),
    };

    let same_reference = profile.radiosonde_time == profile.sondehub_time;
    let utc_to_gps = profile.radiosonde_time == TimeReference::Utc
        && profile.sondehub_time == TimeReference::Gps;
    let leap = match telemetry.i64(FieldId::LeapSeconds) {
        Some(leap) if same_reference => leap,
        Some(_) if utc_to_gps => LEAP_SECONDS,
        Some(_) => 0,
        None if profile.sondehub_time == TimeReference::Gps => LEAP_SECONDS,
        None => 0,
    };
    Ok(datetime + Duration::seconds(leap))
}

/// Attach the system date to a time of day, correcting around midnight.
///
/// Within the hour either side of midnight a radiosonde time of 23h seen at
/// system hour 0 belongs to the previous day, and 0h seen at 23h to the next.
pub fn fix_rollover(time: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let datetime = now.date().and_time(time);
    match (now.hour(), datetime.hour()) {
        (0, 23) => {
            debug!("rollover: one day subtracted");
            datetime - Duration::days(1)
        }
        (23, 0) => {
            debug!("rollover: one day added");
            datetime + Duration::days(1)
        }
        _ => datetime,
    }
}

fn resolve_serial(
    telemetry: &Telemetry,
    profile: &Profile,
    datetime: NaiveDateTime,
) -> Result<String> {
    match profile.serial {
        SerialRule::Field {
            field,
            strip,
            format,
        } => {
            let raw = telemetry
                .str(field)
                .ok_or(SondeError::MissingField(field.name()))?;
            let stripped = raw.get(strip..).unwrap_or_default();
            let serial = match format {
                SerialFormat::Plain => stripped.to_string(),
                SerialFormat::M10Dashes => {
                    match (stripped.get(..3), stripped.get(3..4), stripped.get(4..)) {
                        (Some(a), Some(b), Some(c)) => format!("{a}-{b}-{c}"),
                        _ => stripped.to_string(),
                    }
                }
                SerialFormat::M20Bracket => stripped
                    .split('[')
                    .next()
                    .unwrap_or_default()
                    .to_string(),
            };
            if serial.is_empty() {
                return Err(SondeError::MissingField(field.name()));
            }
            Ok(serial)
        }
        SerialRule::ImetHash => {
            let elapsed = telemetry
                .i64(FieldId::Framenumber)
                .or_else(|| telemetry.i64(FieldId::Powerup))
                .ok_or(SondeError::MissingField("framenumber"))?;
            let frequency = telemetry
                .f64(FieldId::Frequency)
                .ok_or(SondeError::MissingField("frequency"))?;
            let serial = imet_serial(datetime, elapsed, frequency);
            Ok(serial
                .strip_prefix("IMET-")
                .unwrap_or(&serial)
                .to_string())
        }
    }
}

/// Synthetic iMet serial: hash of estimated power-on time and frequency.
///
/// iMet radiosondes send one frame per second, so `elapsed` seconds before
/// `datetime` is the power-on time. The frequency is rounded to 100 kHz.
pub fn imet_serial(datetime: NaiveDateTime, elapsed: i64, frequency: f64) -> String {
    let power_on = datetime - Duration::seconds(elapsed);
    let text = format!(
        "{}{:.3} MHzSONDE",
        power_on.format("%Y-%m-%dT%H:%M:%SZ"),
        round_to(frequency, 1)
    );
    let digest = Sha256::digest(text.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02X}")).collect();
    let serial = format!("IMET-{}", &hex[hex.len() - 8..]);
    debug!(%serial, "calculated iMet unique serial");
    serial
}

fn resolve_frame(telemetry: &Telemetry, profile: &Profile, datetime: NaiveDateTime) -> Result<i64> {
    match profile.framenumber {
        FrameRule::Direct => telemetry
            .i64(FieldId::Framenumber)
            .ok_or(SondeError::MissingField("framenumber")),
        FrameRule::GpsSeconds => {
            let mut frame = datetime.and_utc().timestamp() - GPS_EPOCH_UNIX;
            let leap = telemetry.i64(FieldId::LeapSeconds).unwrap_or(LEAP_SECONDS);
            match (profile.radiosonde_time, profile.sondehub_time) {
                (TimeReference::Gps, TimeReference::Utc) => frame += leap,
                (TimeReference::Utc, TimeReference::Gps) => frame -= leap,
                _ => {}
            }
            Ok(frame)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
