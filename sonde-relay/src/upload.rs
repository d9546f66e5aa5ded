//! SondeHub upload: gzip batch PUT with retry policy, plus station position.
//!
//! Status policy:
//! - 200 delivered
//! - 201/202 accepted with an issue reported by the service, not retried
//! - 500 retried up to the configured attempt limit
//! - anything else rejected, batch dropped
//! - transport failure (connect, timeout) abandons the batch at once

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use libflate::gzip;
use reqwest::header;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sonde_core::config::UploadConfig;
use sonde_core::reformat::{SOFTWARE_NAME, SOFTWARE_VERSION};
use sonde_core::{StationRecord, UploadRecord};

const STATUS_OK: u16 = 200;
const STATUS_CREATED: u16 = 201;
const STATUS_ACCEPTED: u16 = 202;
const STATUS_SERVER_ERROR: u16 = 500;

/// Upload loops wake up this often and act only when their interval elapsed.
pub const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("compression failed: {0}")]
    Compress(#[from] std::io::Error),

    #[error("transport failed: {0}")]
    Transport(String),
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// One HTTP PUT. Returns the response status code.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn put(&self, url: &str, body: &[u8], gzipped: bool) -> Result<u16, UploadError>;
}

/// reqwest-backed transport with SondeHub headers.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent())
            .build()
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn put(&self, url: &str, body: &[u8], gzipped: bool) -> Result<u16, UploadError> {
        let mut request = self
            .client
            .put(url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::DATE, http_date(chrono::Utc::now()))
            .body(body.to_vec());
        if gzipped {
            request = request.header(header::CONTENT_ENCODING, "gzip");
        }
        let response = request
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        Ok(response.status().as_u16())
    }
}

pub fn user_agent() -> String {
    format!("{SOFTWARE_NAME}-{SOFTWARE_VERSION}")
}

/// RFC 1123 date in GMT, as sent in the `Date` header.
pub fn http_date(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, UploadError> {
    let mut encoder = gzip::Encoder::new(Vec::new())?;
    encoder.write_all(data)?;
    Ok(encoder.finish().into_result()?)
}

/// JSON array of the batch, gzip-compressed.
pub fn encode_batch(batch: &[UploadRecord]) -> Result<Vec<u8>, UploadError> {
    let json = serde_json::to_vec(batch)?;
    let compressed = gzip_compress(&json)?;
    debug!(
        raw = json.len(),
        compressed = compressed.len(),
        ratio = %format!("{:.1}%", compressed.len() as f64 / json.len().max(1) as f64 * 100.0),
        "telemetry batch compressed"
    );
    Ok(compressed)
}

fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, UploadError> {
    Ok(serde_json::to_vec(value)?)
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Delivered,
    /// 201/202: the service took the upload but flagged a problem.
    AcceptedWithIssue(u16),
    Rejected(u16),
    RetriesExhausted,
    TransportFailed,
}

impl UploadOutcome {
    pub fn is_delivered(self) -> bool {
        matches!(self, UploadOutcome::Delivered | UploadOutcome::AcceptedWithIssue(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    pub outcome: UploadOutcome,
    pub attempts: u32,
}

/// PUT `body` until the status code settles it or `max_attempts` is used up.
///
/// `accept_issues` admits 201/202 as delivered; otherwise they are rejections.
pub async fn upload_with_retry(
    transport: &dyn Transport,
    url: &str,
    body: &[u8],
    gzipped: bool,
    accept_issues: bool,
    max_attempts: u32,
) -> UploadReport {
    let mut attempts = 0;
    while attempts < max_attempts {
        attempts += 1;
        let outcome = match transport.put(url, body, gzipped).await {
            Ok(STATUS_OK) => UploadOutcome::Delivered,
            Ok(status @ (STATUS_CREATED | STATUS_ACCEPTED)) if accept_issues => {
                UploadOutcome::AcceptedWithIssue(status)
            }
            Ok(STATUS_SERVER_ERROR) => {
                warn!(url, attempt = attempts, "server error, retrying");
                continue;
            }
            Ok(status) => UploadOutcome::Rejected(status),
            Err(e) => {
                error!(url, %e, "upload aborted");
                UploadOutcome::TransportFailed
            }
        };
        return UploadReport { outcome, attempts };
    }
    UploadReport {
        outcome: UploadOutcome::RetriesExhausted,
        attempts,
    }
}

fn log_report(what: &str, report: UploadReport, count: usize, started: Instant) {
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    match report.outcome {
        UploadOutcome::Delivered => {
            info!(what, count, duration_ms, "upload successful")
        }
        UploadOutcome::AcceptedWithIssue(status) => {
            warn!(what, count, status, "upload accepted, service reported an issue")
        }
        UploadOutcome::Rejected(status) => {
            error!(what, count, status, "upload rejected, dropped")
        }
        UploadOutcome::RetriesExhausted => {
            error!(what, count, attempts = report.attempts, "upload failed after retries, dropped")
        }
        UploadOutcome::TransportFailed => {
            error!(what, count, "upload failed, dropped")
        }
    }
}

// ---------------------------------------------------------------------------
// Single uploads
// ---------------------------------------------------------------------------

/// Upload one telemetry batch. `None` means it could not be encoded.
pub async fn upload_telemetry(
    transport: &dyn Transport,
    settings: &UploadConfig,
    batch: &[UploadRecord],
) -> Option<UploadReport> {
    let body = match encode_batch(batch) {
        Ok(body) => body,
        Err(e) => {
            error!(%e, count = batch.len(), "telemetry batch dropped");
            return None;
        }
    };
    let started = Instant::now();
    let url = &settings.telemetry_url;
    let report = upload_with_retry(transport, url, &body, true, true, settings.retries).await;
    log_report("telemetry", report, batch.len(), started);
    Some(report)
}

/// Upload the station position record.
pub async fn upload_station(
    transport: &dyn Transport,
    settings: &UploadConfig,
    station: &StationRecord,
) -> Option<UploadReport> {
    let body = match encode_json(station) {
        Ok(body) => body,
        Err(e) => {
            error!(%e, "station record dropped");
            return None;
        }
    };
    let started = Instant::now();
    let url = &settings.station_url;
    let report = upload_with_retry(transport, url, &body, false, false, settings.retries).await;
    log_report("station", report, 1, started);
    Some(report)
}

// ---------------------------------------------------------------------------
// Worker loops
// ---------------------------------------------------------------------------

/// True once `period` has passed since `last`, or if nothing was sent yet.
fn is_due(last: Option<Instant>, period: Duration) -> bool {
    last.map_or(true, |at| at.elapsed() >= period)
}

/// Take everything currently queued.
pub fn drain(rx: &mut mpsc::Receiver<UploadRecord>) -> Vec<UploadRecord> {
    let mut batch = Vec::new();
    while let Ok(record) = rx.try_recv() {
        batch.push(record);
    }
    batch
}

/// Batch the upload queue every `telemetry_rate` seconds.
pub async fn telemetry_loop(
    transport: Arc<dyn Transport>,
    settings: UploadConfig,
    mut rx: mpsc::Receiver<UploadRecord>,
    shutdown: CancellationToken,
) {
    let period = Duration::from_secs(settings.telemetry_rate);
    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !is_due(last, period) {
            continue;
        }
        last = Some(Instant::now());

        let batch = drain(&mut rx);
        if batch.is_empty() {
            debug!("no telemetry for uploading");
            continue;
        }
        debug!(count = batch.len(), "telemetry upload");
        upload_telemetry(transport.as_ref(), &settings, &batch).await;
    }
    debug!("telemetry upload loop stopped");
}

/// Send the station position every `station_rate` hours.
pub async fn station_loop(
    transport: Arc<dyn Transport>,
    settings: UploadConfig,
    station: StationRecord,
    shutdown: CancellationToken,
) {
    let period = Duration::from_secs(settings.station_rate * 3600);
    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !is_due(last, period) {
            continue;
        }
        last = Some(Instant::now());
        debug!("station upload");
        upload_station(transport.as_ref(), &settings, &station).await;
    }
    debug!("station upload loop stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::Mutex;

    use chrono::TimeZone;
    use sonde_core::config::{Config, Station};

    /// Replays scripted responses and records every request.
    struct ScriptedTransport {
        responses: Mutex<Vec<Result<u16, UploadError>>>,
        requests: Mutex<Vec<(String, Vec<u8>, bool)>>,
    }

    impl ScriptedTransport {
        fn new(mut responses: Vec<Result<u16, UploadError>>) -> Self {
            responses.reverse();
            ScriptedTransport {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn put(&self, url: &str, body: &[u8], gzipped: bool) -> Result<u16, UploadError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), body.to_vec(), gzipped));
            self.responses.lock().unwrap().pop().unwrap_or(Ok(STATUS_OK))
        }
    }

    fn settings() -> UploadConfig {
        let mut settings = Config::default().upload;
        settings.retries = 5;
        settings
    }

    fn station() -> Station {
        Station {
            callsign: "DL1ABC".into(),
            position: [48.1, 11.5, 520.0],
            antenna: "1/4 wave monopole".into(),
            contact_email: "dl1abc@example.org".into(),
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let transport = ScriptedTransport::new(vec![
            Ok(STATUS_SERVER_ERROR),
            Ok(STATUS_SERVER_ERROR),
            Ok(STATUS_SERVER_ERROR),
            Ok(STATUS_OK),
        ]);
        let report = upload_with_retry(&transport, "http://sondehub", b"[]", true, true, 5).await;
        assert_eq!(report.outcome, UploadOutcome::Delivered);
        assert_eq!(report.attempts, 4);
        assert_eq!(transport.request_count(), 4);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let transport = ScriptedTransport::new((0..10).map(|_| Ok(STATUS_SERVER_ERROR)).collect());
        let report = upload_with_retry(&transport, "http://sondehub", b"[]", true, true, 5).await;
        assert_eq!(report.outcome, UploadOutcome::RetriesExhausted);
        assert_eq!(report.attempts, 5);
        assert_eq!(transport.request_count(), 5);
    }

    #[tokio::test]
    async fn test_soft_success_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(STATUS_ACCEPTED)]);
        let report = upload_with_retry(&transport, "http://sondehub", b"[]", true, true, 5).await;
        assert_eq!(report.outcome, UploadOutcome::AcceptedWithIssue(202));
        assert!(report.outcome.is_delivered());
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_other_status_fatal() {
        let transport = ScriptedTransport::new(vec![Ok(400), Ok(STATUS_OK)]);
        let report = upload_with_retry(&transport, "http://sondehub", b"[]", true, true, 5).await;
        assert_eq!(report.outcome, UploadOutcome::Rejected(400));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_aborts() {
        let transport = ScriptedTransport::new(vec![
            Err(UploadError::Transport("timed out".into())),
            Ok(STATUS_OK),
        ]);
        let report = upload_with_retry(&transport, "http://sondehub", b"[]", true, true, 5).await;
        assert_eq!(report.outcome, UploadOutcome::TransportFailed);
        assert_eq!(report.attempts, 1);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_valid_json_array() {
        let transport = ScriptedTransport::new(vec![Ok(STATUS_OK)]);
        let report = upload_telemetry(&transport, &settings(), &[]).await.unwrap();
        assert_eq!(report.outcome, UploadOutcome::Delivered);

        let requests = transport.requests.lock().unwrap();
        let (url, body, gzipped) = &requests[0];
        assert_eq!(url, sonde_core::config::DEFAULT_TELEMETRY_URL);
        assert!(*gzipped);
        let mut json = String::new();
        gzip::Decoder::new(&body[..])
            .unwrap()
            .read_to_string(&mut json)
            .unwrap();
        assert_eq!(json, "[]");
    }

    #[tokio::test]
    async fn test_station_upload_uncompressed() {
        let transport = ScriptedTransport::new(vec![Ok(STATUS_OK)]);
        let record = StationRecord::new(&station());
        upload_station(&transport, &settings(), &record).await.unwrap();

        let requests = transport.requests.lock().unwrap();
        let (url, body, gzipped) = &requests[0];
        assert_eq!(url, sonde_core::config::DEFAULT_STATION_URL);
        assert!(!*gzipped);
        let json: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(json["uploader_callsign"], "DL1ABC");
        assert_eq!(json["mobile"], false);
    }

    #[tokio::test]
    async fn test_station_upload_requires_ok() {
        let transport = ScriptedTransport::new(vec![Ok(STATUS_CREATED), Ok(STATUS_OK)]);
        let record = StationRecord::new(&station());
        let report = upload_station(&transport, &settings(), &record).await.unwrap();
        assert_eq!(report.outcome, UploadOutcome::Rejected(STATUS_CREATED));
        assert!(!report.outcome.is_delivered());
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_station_upload_retries_server_error() {
        let transport = ScriptedTransport::new(vec![Ok(STATUS_SERVER_ERROR), Ok(STATUS_OK)]);
        let record = StationRecord::new(&station());
        let report = upload_station(&transport, &settings(), &record).await.unwrap();
        assert_eq!(report.outcome, UploadOutcome::Delivered);
        assert_eq!(report.attempts, 2);
    }

    #[test]
    fn test_gzip_round_trip() {
        let compressed = gzip_compress(b"hello sondehub").unwrap();
        let mut out = String::new();
        gzip::Decoder::new(&compressed[..])
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "hello sondehub");
    }

    #[test]
    fn test_http_date() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 35, 0).unwrap();
        assert_eq!(http_date(now), "Fri, 01 Mar 2024 12:35:00 GMT");
    }

    #[test]
    fn test_drain_takes_everything() {
        let (tx, mut rx) = mpsc::channel(4);
        assert!(drain(&mut rx).is_empty());
        let record = reformatted();
        tx.try_send(record.clone()).unwrap();
        tx.try_send(record).unwrap();
        assert_eq!(drain(&mut rx).len(), 2);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_is_due() {
        assert!(is_due(None, Duration::from_secs(30)));
        assert!(!is_due(Some(Instant::now()), Duration::from_secs(30)));
        assert!(is_due(Some(Instant::now()), Duration::ZERO));
    }

    #[tokio::test]
    async fn test_telemetry_loop_uploads_queued_records() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(STATUS_OK)]));
        let (tx, rx) = mpsc::channel(8);
        tx.try_send(reformatted()).unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(telemetry_loop(
            transport.clone(),
            settings(),
            rx,
            shutdown.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(transport.request_count(), 1);
    }

    fn reformatted() -> UploadRecord {
        use sonde_core::fields::FieldId;
        use sonde_core::{SourceKind, Telemetry, Value};

        let mut t = Telemetry::new(SourceKind::Json);
        t.insert(FieldId::Type, Value::Text("RS92".into()));
        t.insert(FieldId::Serial, Value::Text("P1234567".into()));
        t.insert(FieldId::Framenumber, Value::Int(10));
        t.insert(
            FieldId::Time,
            Value::Time(chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap()),
        );
        t.insert(FieldId::Latitude, Value::Float(48.0));
        t.insert(FieldId::Longitude, Value::Float(11.0));
        t.insert(FieldId::Altitude, Value::Float(1000.0));
        let profile = sonde_core::profile::lookup("RS92").unwrap();
        let now = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        sonde_core::reformat::reformat(&t, profile, &station(), now).unwrap()
    }
}
