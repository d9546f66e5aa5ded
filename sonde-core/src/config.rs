//! Configuration for sonde-relay.
//!
//! Reads a simple sectioned YAML-like file (`key: value` lines indented under
//! unindented section headers). Every value has a default except the station
//! identity: callsign, position and contact e-mail are required.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::profile::ProfileTable;
use crate::types::{InputMode, Result, SondeError};

pub const DEFAULT_TELEMETRY_URL: &str = "https://api.v2.sondehub.org/sondes/telemetry";
pub const DEFAULT_STATION_URL: &str = "https://api.v2.sondehub.org/listeners";

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub station: StationConfig,
    pub receiver: ReceiverConfig,
    pub queues: QueueConfig,
    pub upload: UploadConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
    /// Per-family enable overrides, keyed by profile key.
    pub radiosondes: BTreeMap<String, bool>,
    /// Seconds to run before stopping; 0 runs until interrupted.
    pub runtime: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationConfig {
    pub callsign: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub antenna: String,
    pub contact_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    pub address: String,
    pub port: u16,
    pub input_mode: InputMode,
    pub buffer_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub input: usize,
    pub upload: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    /// Seconds between telemetry uploads.
    pub telemetry_rate: u64,
    /// Hours between station position uploads.
    pub station_rate: u64,
    /// Per-request timeout in seconds.
    pub timeout: u64,
    pub retries: u32,
    pub telemetry_url: String,
    pub station_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub raw_data: bool,
    pub telemetry: bool,
    pub reformatted: bool,
    pub log_file: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// 1=error .. 5=trace
    pub print_level: u8,
    pub write_level: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            station: StationConfig {
                callsign: None,
                latitude: None,
                longitude: None,
                altitude: None,
                antenna: "1/4 wave monopole".into(),
                contact_email: None,
            },
            receiver: ReceiverConfig {
                address: "127.0.0.1".into(),
                port: 18001,
                input_mode: InputMode::Auto,
                buffer_size: 1024,
            },
            queues: QueueConfig {
                input: 20,
                upload: 100,
            },
            upload: UploadConfig {
                telemetry_rate: 30,
                station_rate: 6,
                timeout: 20,
                retries: 5,
                telemetry_url: DEFAULT_TELEMETRY_URL.into(),
                station_url: DEFAULT_STATION_URL.into(),
            },
            output: OutputConfig {
                directory: PathBuf::from("."),
                raw_data: false,
                telemetry: false,
                reformatted: false,
                log_file: true,
            },
            logging: LoggingConfig {
                print_level: 3,
                write_level: 3,
            },
            radiosondes: BTreeMap::new(),
            runtime: 0,
        }
    }
}

/// Validated station identity, shared by the reformatter and station uploads.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub callsign: String,
    pub position: [f64; 3],
    pub antenna: String,
    pub contact_email: String,
}

impl Config {
    /// Load from a file. A missing file is an error; unknown keys are ignored.
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)?;
        Ok(parse_config(&text))
    }

    /// Profile table with the configured enable overrides applied.
    pub fn profile_table(&self) -> ProfileTable {
        let overrides: Vec<(&str, bool)> = self
            .radiosondes
            .iter()
            .map(|(k, &v)| (k.as_str(), v))
            .collect();
        ProfileTable::new(&overrides)
    }

    /// Check every value and return the station identity.
    ///
    /// Optional values out of range fall back to their default with a
    /// warning. A missing or invalid required value is an error.
    pub fn validate(&mut self) -> Result<Station> {
        let defaults = Config::default();

        fallback(&mut self.station.antenna, defaults.station.antenna, "antenna", |a| {
            (4..=25).contains(&a.chars().count())
        });
        fallback(&mut self.receiver.port, defaults.receiver.port, "port", |p| {
            (1024..=65353).contains(p)
        });
        fallback(&mut self.receiver.buffer_size, defaults.receiver.buffer_size, "buffer_size", |b| {
            (64..=65535).contains(b)
        });
        fallback(&mut self.queues.input, defaults.queues.input, "input queue", |q| {
            (1..=100).contains(q)
        });
        fallback(&mut self.queues.upload, defaults.queues.upload, "upload queue", |q| {
            (1..=600).contains(q)
        });
        fallback(&mut self.upload.station_rate, defaults.upload.station_rate, "station_rate", |r| {
            (1..=24).contains(r)
        });
        fallback(
            &mut self.upload.telemetry_rate,
            defaults.upload.telemetry_rate,
            "telemetry_rate",
            |r| (1..=600).contains(r),
        );
        fallback(&mut self.upload.timeout, defaults.upload.timeout, "timeout", |t| {
            (1..=60).contains(t)
        });
        fallback(&mut self.upload.retries, defaults.upload.retries, "retries", |r| {
            (1..=60).contains(r)
        });
        fallback(&mut self.logging.print_level, defaults.logging.print_level, "print_level", |l| {
            (1..=5).contains(l)
        });
        fallback(&mut self.logging.write_level, defaults.logging.write_level, "write_level", |l| {
            (1..=5).contains(l)
        });

        let callsign = match &self.station.callsign {
            Some(c) if is_valid_station_callsign(c) => c.clone(),
            Some(c) => return Err(SondeError::InvalidConfig(format!("invalid callsign \"{c}\""))),
            None => return Err(SondeError::InvalidConfig("callsign is required".into())),
        };

        let (lat, lon, alt) = match (
            self.station.latitude,
            self.station.longitude,
            self.station.altitude,
        ) {
            (Some(lat), Some(lon), Some(alt)) => (lat, lon, alt),
            _ => {
                return Err(SondeError::InvalidConfig(
                    "position (latitude, longitude, altitude) is required".into(),
                ))
            }
        };
        if !(-90.0..=90.0).contains(&lat)
            || !(-180.0..=180.0).contains(&lon)
            || !(-100.0..=8000.0).contains(&alt)
        {
            return Err(SondeError::InvalidConfig(format!(
                "position out of range ({lat}, {lon}, {alt})"
            )));
        }

        let contact_email = match &self.station.contact_email {
            Some(m) if is_valid_email(m) => m.clone(),
            Some(m) => return Err(SondeError::InvalidConfig(format!("invalid e-mail \"{m}\""))),
            None => return Err(SondeError::InvalidConfig("contact e-mail is required".into())),
        };

        Ok(Station {
            callsign,
            position: [lat, lon, alt],
            antenna: self.station.antenna.clone(),
            contact_email,
        })
    }

    /// Serialize to the same YAML-like text `load` reads.
    pub fn to_text(&self) -> String {
        let mut lines = vec!["# sonde-relay configuration".to_string(), String::new()];

        lines.push("station:".into());
        lines.push(format!("  callsign: {}", opt_string(&self.station.callsign)));
        lines.push(format!("  latitude: {}", opt_float(self.station.latitude)));
        lines.push(format!("  longitude: {}", opt_float(self.station.longitude)));
        lines.push(format!("  altitude: {}", opt_float(self.station.altitude)));
        lines.push(format!("  antenna: \"{}\"", self.station.antenna));
        lines.push(format!("  contact_email: {}", opt_string(&self.station.contact_email)));
        lines.push(String::new());

        lines.push("receiver:".into());
        lines.push(format!("  address: \"{}\"", self.receiver.address));
        lines.push(format!("  port: {}", self.receiver.port));
        lines.push(format!("  input_mode: {}", self.receiver.input_mode));
        lines.push(format!("  buffer_size: {}", self.receiver.buffer_size));
        lines.push(String::new());

        lines.push("queues:".into());
        lines.push(format!("  input: {}", self.queues.input));
        lines.push(format!("  upload: {}", self.queues.upload));
        lines.push(String::new());

        lines.push("upload:".into());
        lines.push(format!("  telemetry_rate: {}", self.upload.telemetry_rate));
        lines.push(format!("  station_rate: {}", self.upload.station_rate));
        lines.push(format!("  timeout: {}", self.upload.timeout));
        lines.push(format!("  retries: {}", self.upload.retries));
        lines.push(format!("  telemetry_url: \"{}\"", self.upload.telemetry_url));
        lines.push(format!("  station_url: \"{}\"", self.upload.station_url));
        lines.push(String::new());

        lines.push("output:".into());
        lines.push(format!("  directory: \"{}\"", self.output.directory.display()));
        lines.push(format!("  raw_data: {}", self.output.raw_data));
        lines.push(format!("  telemetry: {}", self.output.telemetry));
        lines.push(format!("  reformatted: {}", self.output.reformatted));
        lines.push(format!("  log_file: {}", self.output.log_file));
        lines.push(String::new());

        lines.push("logging:".into());
        lines.push(format!("  print_level: {}", self.logging.print_level));
        lines.push(format!("  write_level: {}", self.logging.write_level));
        lines.push(String::new());

        if !self.radiosondes.is_empty() {
            lines.push("radiosondes:".into());
            for (key, enabled) in &self.radiosondes {
                lines.push(format!("  {key}: {enabled}"));
            }
            lines.push(String::new());
        }

        lines.push(format!("runtime: {}", self.runtime));

        lines.join("\n") + "\n"
    }
}

fn fallback<T: std::fmt::Debug>(value: &mut T, default: T, name: &str, valid: impl Fn(&T) -> bool) {
    if !valid(value) {
        warn!(parameter = name, value = ?value, default = ?default, "invalid value, using default");
        *value = default;
    }
}

fn opt_string(v: &Option<String>) -> String {
    match v {
        Some(s) => format!("\"{s}\""),
        None => "null".into(),
    }
}

fn opt_float(v: Option<f64>) -> String {
    match v {
        Some(f) => f.to_string(),
        None => "null".into(),
    }
}

/// 4-15 characters of letters, digits, `-` and `_`.
pub fn is_valid_station_callsign(call: &str) -> bool {
    (4..=15).contains(&call.len())
        && call
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// `local@domain.tld` with no whitespace.
pub fn is_valid_email(mail: &str) -> bool {
    if mail.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = mail.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse YAML-like config text on top of the defaults.
pub fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            warn!(line = stripped, "config line without ':' ignored");
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            if val.is_empty() {
                current_section = Some(key.to_string());
            } else {
                current_section = None;
                match key {
                    "runtime" => set(&mut config.runtime, parse_number(val)),
                    _ => warn!(key, "unknown config key ignored"),
                }
            }
            continue;
        }

        let Some(section) = current_section.as_deref() else {
            warn!(key, "indented config key outside a section ignored");
            continue;
        };
        match (section, key) {
            ("station", "callsign") => config.station.callsign = parse_string_value(val),
            ("station", "latitude") => config.station.latitude = parse_float_value(val),
            ("station", "longitude") => config.station.longitude = parse_float_value(val),
            ("station", "altitude") => config.station.altitude = parse_float_value(val),
            ("station", "antenna") => set(&mut config.station.antenna, parse_string_value(val)),
            ("station", "contact_email") => config.station.contact_email = parse_string_value(val),
            ("receiver", "address") => set(&mut config.receiver.address, parse_string_value(val)),
            ("receiver", "port") => set(&mut config.receiver.port, parse_number(val)),
            ("receiver", "input_mode") => set(
                &mut config.receiver.input_mode,
                parse_string_value(val).and_then(|v| InputMode::parse(&v)),
            ),
            ("receiver", "buffer_size") => set(&mut config.receiver.buffer_size, parse_number(val)),
            ("queues", "input") => set(&mut config.queues.input, parse_number(val)),
            ("queues", "upload") => set(&mut config.queues.upload, parse_number(val)),
            ("upload", "telemetry_rate") => {
                set(&mut config.upload.telemetry_rate, parse_number(val))
            }
            ("upload", "station_rate") => set(&mut config.upload.station_rate, parse_number(val)),
            ("upload", "timeout") => set(&mut config.upload.timeout, parse_number(val)),
            ("upload", "retries") => set(&mut config.upload.retries, parse_number(val)),
            ("upload", "telemetry_url") => {
                set(&mut config.upload.telemetry_url, parse_string_value(val))
            }
            ("upload", "station_url") => {
                set(&mut config.upload.station_url, parse_string_value(val))
            }
            ("output", "directory") => set(
                &mut config.output.directory,
                parse_string_value(val).map(PathBuf::from),
            ),
            ("output", "raw_data") => set(&mut config.output.raw_data, parse_bool_value(val)),
            ("output", "telemetry") => set(&mut config.output.telemetry, parse_bool_value(val)),
            ("output", "reformatted") => set(&mut config.output.reformatted, parse_bool_value(val)),
            ("output", "log_file") => set(&mut config.output.log_file, parse_bool_value(val)),
            ("logging", "print_level") => set(&mut config.logging.print_level, parse_number(val)),
            ("logging", "write_level") => set(&mut config.logging.write_level, parse_number(val)),
            ("radiosondes", family) => {
                if let Some(enabled) = parse_bool_value(val) {
                    config.radiosondes.insert(family.to_string(), enabled);
                }
            }
            _ => warn!(section, key, "unknown config key ignored"),
        }
    }

    config
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_float_value(val: &str) -> Option<f64> {
    parse_string_value(val)?.parse().ok()
}

fn parse_number<T: std::str::FromStr>(val: &str) -> Option<T> {
    parse_string_value(val)?.parse().ok()
}

fn parse_bool_value(val: &str) -> Option<bool> {
    match parse_string_value(val)?.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# station identity
station:
  callsign: "DL1ABC-11"
  latitude: 48.1
  longitude: 11.5
  altitude: 520
  antenna: "Diamond X50"
  contact_email: "dl1abc@example.org"

receiver:
  address: "0.0.0.0"
  port: 18002
  input_mode: json

queues:
  input: 50

upload:
  telemetry_rate: 15
  retries: 3

output:
  directory: "/tmp/sonde"
  raw_data: true

radiosondes:
  M10: true
  RS92: false

runtime: 3600
"#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.receiver.address, "127.0.0.1");
        assert_eq!(config.receiver.port, 18001);
        assert_eq!(config.queues.input, 20);
        assert_eq!(config.queues.upload, 100);
        assert_eq!(config.upload.telemetry_rate, 30);
        assert_eq!(config.upload.station_rate, 6);
        assert_eq!(config.upload.timeout, 20);
        assert_eq!(config.upload.retries, 5);
        assert_eq!(config.station.antenna, "1/4 wave monopole");
        assert!(config.output.log_file);
        assert!(!config.output.raw_data);
        assert_eq!(config.runtime, 0);
    }

    #[test]
    fn test_parse_config() {
        let config = parse_config(SAMPLE);
        assert_eq!(config.station.callsign.as_deref(), Some("DL1ABC-11"));
        assert_eq!(config.station.latitude, Some(48.1));
        assert_eq!(config.station.altitude, Some(520.0));
        assert_eq!(config.station.antenna, "Diamond X50");
        assert_eq!(config.receiver.address, "0.0.0.0");
        assert_eq!(config.receiver.port, 18002);
        assert_eq!(config.receiver.input_mode, InputMode::Json);
        assert_eq!(config.queues.input, 50);
        assert_eq!(config.queues.upload, 100);
        assert_eq!(config.upload.telemetry_rate, 15);
        assert_eq!(config.upload.retries, 3);
        assert_eq!(config.output.directory, PathBuf::from("/tmp/sonde"));
        assert!(config.output.raw_data);
        assert_eq!(config.radiosondes.get("M10"), Some(&true));
        assert_eq!(config.runtime, 3600);
    }

    #[test]
    fn test_parse_null_values() {
        let text = "station:\n  callsign: null\n  latitude: ~\n";
        let config = parse_config(text);
        assert!(config.station.callsign.is_none());
        assert!(config.station.latitude.is_none());
    }

    #[test]
    fn test_roundtrip() {
        let config = parse_config(SAMPLE);
        let parsed = parse_config(&config.to_text());
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_profile_overrides() {
        let table = parse_config(SAMPLE).profile_table();
        assert!(table.is_enabled("M10"));
        assert!(!table.is_enabled("RS92"));
        assert!(table.is_enabled("RS41"));
    }

    #[test]
    fn test_validate_ok() {
        let mut config = parse_config(SAMPLE);
        let station = config.validate().unwrap();
        assert_eq!(station.callsign, "DL1ABC-11");
        assert_eq!(station.position, [48.1, 11.5, 520.0]);
        assert_eq!(station.contact_email, "dl1abc@example.org");
    }

    #[test]
    fn test_validate_optional_falls_back() {
        let mut config = parse_config(SAMPLE);
        config.receiver.port = 80;
        config.queues.upload = 0;
        config.logging.print_level = 9;
        config.station.antenna = "ant".into();
        config.validate().unwrap();
        assert_eq!(config.receiver.port, 18001);
        assert_eq!(config.queues.upload, 100);
        assert_eq!(config.logging.print_level, 3);
        assert_eq!(config.station.antenna, "1/4 wave monopole");
    }

    #[test]
    fn test_validate_required_missing() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(SondeError::InvalidConfig(_))));

        let mut config = parse_config(SAMPLE);
        config.station.altitude = Some(9000.0);
        assert!(matches!(config.validate(), Err(SondeError::InvalidConfig(_))));

        let mut config = parse_config(SAMPLE);
        config.station.contact_email = Some("not-an-address".into());
        assert!(matches!(config.validate(), Err(SondeError::InvalidConfig(_))));
    }

    #[test]
    fn test_station_callsign_rules() {
        assert!(is_valid_station_callsign("DL1ABC-11"));
        assert!(is_valid_station_callsign("my_station"));
        assert!(!is_valid_station_callsign("ABC"));
        assert!(!is_valid_station_callsign("DL1ABC 11"));
    }

    #[test]
    fn test_email_rules() {
        assert!(is_valid_email("a@b.de"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("@b.de"));
        assert!(!is_valid_email("a@@b.de"));
        assert!(!is_valid_email("a b@c.de"));
    }
}
