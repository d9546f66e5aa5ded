//! Write-only file outputs: raw frame log and per-serial CSV logs.
//!
//! - `rawdata.txt`: one `[timestamp] frame` line per received datagram
//! - `t_<serial>.csv`: filtered canonical telemetry, one column per field
//! - `r_<serial>.csv`: upload records, one column per upload field
//!
//! A header row is written when a CSV file is created. Absent values are
//! written as `N/A`.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{error, trace};

use sonde_core::config::OutputConfig;
use sonde_core::{Telemetry, UploadRecord, FIELDS, UPLOAD_COLUMNS};

pub const RAW_FILE: &str = "rawdata.txt";
pub const LOG_FILE: &str = "log.log";
const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Enabled file outputs under one directory.
#[derive(Debug, Clone)]
pub struct Sinks {
    directory: PathBuf,
    raw_data: bool,
    telemetry: bool,
    reformatted: bool,
}

impl Sinks {
    pub fn new(output: &OutputConfig) -> Self {
        Sinks {
            directory: output.directory.clone(),
            raw_data: output.raw_data,
            telemetry: output.telemetry,
            reformatted: output.reformatted,
        }
    }

    /// Append the datagram to the raw log, if enabled. Failures are logged.
    pub fn raw(&self, data: &[u8], received: DateTime<Local>) {
        if !self.raw_data {
            return;
        }
        if let Err(e) = write_raw(&self.directory.join(RAW_FILE), data, received) {
            error!(%e, "could not write raw data");
        }
    }

    /// Append filtered telemetry to `t_<serial>.csv`, if enabled.
    pub fn telemetry(&self, serial: &str, telemetry: &Telemetry) {
        if !self.telemetry {
            return;
        }
        let path = self.directory.join(format!("t_{serial}.csv"));
        if let Err(e) = write_telemetry(&path, telemetry) {
            error!(%e, serial, "could not write telemetry");
        }
    }

    /// Append an upload record to `r_<serial>.csv`, if enabled.
    pub fn reformatted(&self, record: &UploadRecord) {
        if !self.reformatted {
            return;
        }
        let path = self.directory.join(format!("r_{}.csv", record.serial));
        if let Err(e) = write_reformatted(&path, record) {
            error!(%e, serial = %record.serial, "could not write reformatted telemetry");
        }
    }
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

pub fn write_raw(path: &Path, data: &[u8], received: DateTime<Local>) -> Result<(), SinkError> {
    let mut file = open_append(path)?;
    writeln!(
        file,
        "[{}] {}",
        received.format("%Y-%m-%d %H:%M:%S%.6f"),
        data.escape_ascii()
    )?;
    trace!(path = %path.display(), "raw data written");
    Ok(())
}

/// Column headers for the telemetry CSV: field name plus unit.
pub fn telemetry_header() -> Vec<String> {
    FIELDS
        .iter()
        .map(|spec| match spec.unit {
            Some(unit) => format!("{}[{unit}]", spec.name),
            None => spec.name.to_string(),
        })
        .collect()
}

pub fn telemetry_row(telemetry: &Telemetry) -> Vec<String> {
    FIELDS
        .iter()
        .map(|spec| match telemetry.get(spec.id) {
            Some(value) => value.to_string(),
            None => NOT_AVAILABLE.to_string(),
        })
        .collect()
}

pub fn write_telemetry(path: &Path, telemetry: &Telemetry) -> Result<(), SinkError> {
    append_row(path, telemetry_header(), telemetry_row(telemetry))
}

pub fn reformatted_header() -> Vec<String> {
    UPLOAD_COLUMNS
        .iter()
        .map(|(name, unit)| match unit {
            Some(unit) => format!("{name}[{unit}]"),
            None => name.to_string(),
        })
        .collect()
}

pub fn reformatted_row(record: &UploadRecord) -> Result<Vec<String>, SinkError> {
    let json = serde_json::to_value(record)?;
    Ok(UPLOAD_COLUMNS
        .iter()
        .map(|(name, _)| match json.get(name) {
            None | Some(serde_json::Value::Null) => NOT_AVAILABLE.to_string(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        })
        .collect())
}

pub fn write_reformatted(path: &Path, record: &UploadRecord) -> Result<(), SinkError> {
    append_row(path, reformatted_header(), reformatted_row(record)?)
}

fn append_row(path: &Path, header: Vec<String>, row: Vec<String>) -> Result<(), SinkError> {
    let is_new = !path.exists();
    let mut writer = csv::Writer::from_writer(open_append(path)?);
    if is_new {
        writer.write_record(&header)?;
    }
    writer.write_record(&row)?;
    writer.flush()?;
    trace!(path = %path.display(), "row written");
    Ok(())
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone, Utc};
    use sonde_core::config::Station;
    use sonde_core::fields::FieldId;
    use sonde_core::{SourceKind, Value};

    fn telemetry() -> Telemetry {
        let mut t = Telemetry::new(SourceKind::Aprs);
        t.insert(FieldId::SourceAddress, Value::Text("DL1ABC-11".into()));
        t.insert(FieldId::Type, Value::Text("RS41-SG".into()));
        t.insert(FieldId::Serial, Value::Text("S1234567".into()));
        t.insert(FieldId::Framenumber, Value::Int(42));
        t.insert(
            FieldId::Time,
            Value::Time(NaiveTime::from_hms_opt(12, 0, 0).unwrap()),
        );
        t.insert(FieldId::Latitude, Value::Float(48.5));
        t.insert(FieldId::Longitude, Value::Float(11.25));
        t.insert(FieldId::Altitude, Value::Float(1000.0));
        t
    }

    fn record() -> UploadRecord {
        let station = Station {
            callsign: "DL1ABC".into(),
            position: [48.1, 11.5, 520.0],
            antenna: "1/4 wave monopole".into(),
            contact_email: "dl1abc@example.org".into(),
        };
        let profile = sonde_core::profile::lookup("RS41").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        sonde_core::reformat::reformat(&telemetry(), profile, &station, now).unwrap()
    }

    fn enabled(dir: &Path) -> Sinks {
        Sinks::new(&OutputConfig {
            directory: dir.to_path_buf(),
            raw_data: true,
            telemetry: true,
            reformatted: true,
            log_file: false,
        })
    }

    #[test]
    fn test_raw_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = enabled(dir.path());
        let at = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        sinks.raw(b"frame one", at);
        sinks.raw(b"frame\x01two", at);

        let text = fs::read_to_string(dir.path().join(RAW_FILE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "[2024-03-01 12:00:00.000000] frame one");
        assert_eq!(lines[1], "[2024-03-01 12:00:00.000000] frame\\x01two");
    }

    #[test]
    fn test_telemetry_csv_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = enabled(dir.path());
        sinks.telemetry("1234567", &telemetry());
        sinks.telemetry("1234567", &telemetry());

        let mut reader = csv::Reader::from_path(dir.path().join("t_1234567.csv")).unwrap();
        let header = reader.headers().unwrap().clone();
        assert_eq!(header.len(), FIELDS.len());
        assert_eq!(&header[0], "source_address");
        assert!(header.iter().any(|h| h == "altitude[m]"));

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        let altitude = header.iter().position(|h| h == "altitude[m]").unwrap();
        assert_eq!(&rows[0][altitude], "1000");
        let ozone = header.iter().position(|h| h.starts_with("ozone")).unwrap();
        assert_eq!(&rows[0][ozone], NOT_AVAILABLE);
    }

    #[test]
    fn test_reformatted_csv() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = enabled(dir.path());
        let record = record();
        sinks.reformatted(&record);

        let path = dir.path().join(format!("r_{}.csv", record.serial));
        let mut reader = csv::Reader::from_path(path).unwrap();
        let header = reader.headers().unwrap().clone();
        assert_eq!(header.len(), UPLOAD_COLUMNS.len());
        let row = reader.records().next().unwrap().unwrap();
        let serial = header.iter().position(|h| h == "serial").unwrap();
        assert_eq!(&row[serial], "1234567");
        let temp = header.iter().position(|h| h.starts_with("temp")).unwrap();
        assert_eq!(&row[temp], NOT_AVAILABLE);
    }

    #[test]
    fn test_disabled_sinks_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = Sinks::new(&OutputConfig {
            directory: dir.path().to_path_buf(),
            raw_data: false,
            telemetry: false,
            reformatted: false,
            log_file: false,
        });
        sinks.raw(b"frame", Local::now());
        sinks.telemetry("1", &telemetry());
        sinks.reformatted(&record());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
