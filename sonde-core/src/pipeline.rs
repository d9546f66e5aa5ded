//! One-frame pipeline: integrity check, decode, unify, filter, check, reformat.
//!
//! Synchronous and stateless apart from the configuration it was built with,
//! so a single decode worker can own it outright.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::config::Station;
use crate::crc::verify_frame;
use crate::fields::Telemetry;
use crate::filter::filter;
use crate::frame::{decode_aprs, MIN_FRAME_LEN};
use crate::profile::ProfileTable;
use crate::reformat::{reformat, UploadRecord};
use crate::types::{InputMode, Result, SondeError, SourceKind};
use crate::unify::unify;

/// A frame that made it through every stage.
#[derive(Debug, Clone)]
pub struct Processed {
    /// Canonical telemetry after the plausibility filter.
    pub telemetry: Telemetry,
    pub record: UploadRecord,
}

pub struct Pipeline {
    profiles: ProfileTable,
    station: Station,
    mode: InputMode,
}

impl Pipeline {
    pub fn new(profiles: ProfileTable, station: Station, mode: InputMode) -> Self {
        Pipeline {
            profiles,
            station,
            mode,
        }
    }

    pub fn station(&self) -> &Station {
        &self.station
    }

    /// Decode and unify one datagram into canonical telemetry.
    pub fn decode(&self, data: &[u8]) -> Result<Telemetry> {
        match self.mode.classify(data) {
            SourceKind::Aprs => {
                let frame = verify_frame(data).inspect_err(|e| error!(%e, "frame rejected"))?;
                if frame.len() < MIN_FRAME_LEN {
                    error!(len = frame.len(), "frame shorter than AX.25 header");
                    return Err(SondeError::FrameTooShort {
                        expected: MIN_FRAME_LEN,
                        actual: frame.len(),
                    });
                }
                let raw = decode_aprs(frame);
                debug!(fields = raw.len(), "APRS frame decoded");
                Ok(unify(&raw, SourceKind::Aprs))
            }
            SourceKind::Json => {
                let doc: serde_json::Value = serde_json::from_slice(data)
                    .inspect_err(|e| error!(%e, "JSON document rejected"))?;
                debug!("JSON document decoded");
                Ok(unify(&doc, SourceKind::Json))
            }
        }
    }

    /// Run every stage on one datagram received at `now`.
    pub fn process(&self, data: &[u8], now: DateTime<Utc>) -> Result<Processed> {
        let unified = self.decode(data)?;
        let telemetry = filter(&unified);
        let profile = self.profiles.check_mandatory(&telemetry)?;
        let record = reformat(&telemetry, profile, &self.station, now)
            .inspect_err(|e| error!(%e, "reformatting failed"))?;
        info!(
            serial = %record.serial,
            type_name = %record.type_name,
            frame = record.frame,
            "telemetry accepted"
        );
        Ok(Processed { telemetry, record })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
