//! sonde-core: Pure decode + normalization library for radiosonde telemetry.
//!
//! No async, no I/O: frame decoding, schema unification, plausibility
//! filtering, vendor profiles and reformatting into the SondeHub upload
//! schema. The `sonde-relay` daemon wraps this crate with sockets and HTTP.

pub mod config;
pub mod convert;
pub mod crc;
pub mod fields;
pub mod filter;
pub mod frame;
pub mod pipeline;
pub mod profile;
pub mod reformat;
pub mod types;
pub mod unify;

// Re-export commonly used types at crate root
pub use config::{Config, Station};
pub use fields::{FieldId, Telemetry, FIELDS};
pub use pipeline::{Pipeline, Processed};
pub use profile::{Profile, ProfileTable};
pub use reformat::{StationRecord, UploadRecord, UPLOAD_COLUMNS};
pub use types::*;
