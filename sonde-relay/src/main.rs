//! sonde-relay: Radiosonde telemetry relay from dxlAPRS/JSON over UDP to SondeHub.
//!
//! Four workers connected by two bounded queues:
//! - receive: UDP datagrams into the input queue
//! - decode: pipeline from the input queue into the upload queue
//! - telemetry upload: batches the upload queue every `telemetry_rate` seconds
//! - station upload: station position every `station_rate` hours

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use sonde_core::config::{Config, Station};
use sonde_core::{InputMode, Pipeline, StationRecord};

mod logging;
mod process;
mod receive;
mod sinks;
mod upload;

use process::DecodeWorker;
use sinks::Sinks;
use upload::{HttpTransport, Transport, UploadError};

#[derive(Parser)]
#[command(
    name = "sonde-relay",
    version,
    about = "Relay radiosonde telemetry from dxlAPRS to SondeHub"
)]
struct Cli {
    /// Configuration file (defaults are used when omitted)
    #[arg(short, long, env = "SONDE_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    dump_config: bool,

    /// Station callsign
    #[arg(long, env = "SONDE_RELAY_CALLSIGN")]
    callsign: Option<String>,

    /// Station latitude in degrees
    #[arg(long, env = "SONDE_RELAY_LATITUDE", allow_hyphen_values = true)]
    latitude: Option<f64>,

    /// Station longitude in degrees
    #[arg(long, env = "SONDE_RELAY_LONGITUDE", allow_hyphen_values = true)]
    longitude: Option<f64>,

    /// Station altitude in metres
    #[arg(long, env = "SONDE_RELAY_ALTITUDE", allow_hyphen_values = true)]
    altitude: Option<f64>,

    /// Antenna description
    #[arg(long, env = "SONDE_RELAY_ANTENNA")]
    antenna: Option<String>,

    /// Contact e-mail sent with the station position
    #[arg(long, env = "SONDE_RELAY_EMAIL")]
    email: Option<String>,

    /// UDP address to listen on
    #[arg(long, env = "SONDE_RELAY_ADDRESS")]
    address: Option<String>,

    /// UDP port to listen on
    #[arg(short, long, env = "SONDE_RELAY_PORT")]
    port: Option<u16>,

    /// Input decoding: auto, json or aprs
    #[arg(long, env = "SONDE_RELAY_INPUT_MODE", value_parser = parse_input_mode)]
    input_mode: Option<InputMode>,

    /// Input queue capacity
    #[arg(long, env = "SONDE_RELAY_INPUT_QUEUE")]
    input_queue: Option<usize>,

    /// Upload queue capacity
    #[arg(long, env = "SONDE_RELAY_UPLOAD_QUEUE")]
    upload_queue: Option<usize>,

    /// Seconds between telemetry uploads
    #[arg(long, env = "SONDE_RELAY_TELEMETRY_RATE")]
    telemetry_rate: Option<u64>,

    /// Hours between station position uploads
    #[arg(long, env = "SONDE_RELAY_STATION_RATE")]
    station_rate: Option<u64>,

    /// Upload timeout in seconds
    #[arg(long, env = "SONDE_RELAY_TIMEOUT")]
    timeout: Option<u64>,

    /// Upload attempts per batch
    #[arg(long, env = "SONDE_RELAY_RETRIES")]
    retries: Option<u32>,

    /// Directory for data and log files
    #[arg(long, env = "SONDE_RELAY_DIRECTORY")]
    directory: Option<PathBuf>,

    /// Write received frames to rawdata.txt
    #[arg(long)]
    write_raw: bool,

    /// Write filtered telemetry to t_<serial>.csv
    #[arg(long)]
    write_telemetry: bool,

    /// Write upload records to r_<serial>.csv
    #[arg(long)]
    write_reformatted: bool,

    /// Do not write log.log
    #[arg(long)]
    no_log_file: bool,

    /// Console log level, 1=error .. 5=trace
    #[arg(long, env = "SONDE_RELAY_PRINT_LEVEL")]
    print_level: Option<u8>,

    /// Log file level, 1=error .. 5=trace
    #[arg(long, env = "SONDE_RELAY_WRITE_LEVEL")]
    write_level: Option<u8>,

    /// Enable or disable a radiosonde family, e.g. M10=true
    #[arg(long = "radiosonde", value_name = "FAMILY=BOOL", value_parser = parse_family)]
    radiosondes: Vec<(String, bool)>,

    /// Seconds to run before stopping, 0 runs until interrupted
    #[arg(long, env = "SONDE_RELAY_RUNTIME")]
    runtime: Option<u64>,
}

fn parse_input_mode(s: &str) -> Result<InputMode, String> {
    InputMode::parse(s).ok_or_else(|| format!("unknown input mode \"{s}\""))
}

fn parse_family(s: &str) -> Result<(String, bool), String> {
    let (family, enabled) = s
        .split_once('=')
        .ok_or_else(|| format!("expected FAMILY=BOOL, got \"{s}\""))?;
    let enabled = enabled
        .parse()
        .map_err(|_| format!("expected true or false, got \"{enabled}\""))?;
    Ok((family.to_string(), enabled))
}

impl Cli {
    /// Overlay every given argument onto `config`.
    fn apply(self, config: &mut Config) {
        let station = &mut config.station;
        override_opt(&mut station.callsign, self.callsign);
        override_opt(&mut station.latitude, self.latitude);
        override_opt(&mut station.longitude, self.longitude);
        override_opt(&mut station.altitude, self.altitude);
        override_opt(&mut station.contact_email, self.email);
        override_val(&mut station.antenna, self.antenna);

        override_val(&mut config.receiver.address, self.address);
        override_val(&mut config.receiver.port, self.port);
        override_val(&mut config.receiver.input_mode, self.input_mode);
        override_val(&mut config.queues.input, self.input_queue);
        override_val(&mut config.queues.upload, self.upload_queue);

        override_val(&mut config.upload.telemetry_rate, self.telemetry_rate);
        override_val(&mut config.upload.station_rate, self.station_rate);
        override_val(&mut config.upload.timeout, self.timeout);
        override_val(&mut config.upload.retries, self.retries);

        override_val(&mut config.output.directory, self.directory);
        config.output.raw_data |= self.write_raw;
        config.output.telemetry |= self.write_telemetry;
        config.output.reformatted |= self.write_reformatted;
        if self.no_log_file {
            config.output.log_file = false;
        }

        override_val(&mut config.logging.print_level, self.print_level);
        override_val(&mut config.logging.write_level, self.write_level);

        for (family, enabled) in self.radiosondes {
            config.radiosondes.insert(family, enabled);
        }
        override_val(&mut config.runtime, self.runtime);
    }
}

fn override_val<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn override_opt<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

#[derive(Debug, Error)]
enum StartupError {
    #[error("cannot bind UDP socket: {0}")]
    Bind(#[from] io::Error),

    #[error("cannot create HTTP client: {0}")]
    Upload(#[from] UploadError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };
    let dump_config = cli.dump_config;
    cli.apply(&mut config);

    if dump_config {
        print!("{}", config.to_text());
        return ExitCode::SUCCESS;
    }

    let log_dir = config
        .output
        .log_file
        .then(|| config.output.directory.clone());
    if let Err(e) = logging::init(&config.logging, log_dir.as_deref()) {
        eprintln!("Error opening log file: {e}");
        return ExitCode::FAILURE;
    }

    let station = match config.validate() {
        Ok(station) => station,
        Err(e) => {
            error!(%e, "configuration invalid");
            return ExitCode::FAILURE;
        }
    };

    match run(config, station).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(%e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config, station: Station) -> Result<(), StartupError> {
    let socket =
        UdpSocket::bind((config.receiver.address.as_str(), config.receiver.port)).await?;
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(Duration::from_secs(
        config.upload.timeout,
    ))?);

    info!(
        callsign = %station.callsign,
        address = %config.receiver.address,
        port = config.receiver.port,
        input_mode = %config.receiver.input_mode,
        "sonde-relay started"
    );

    let (input_tx, input_rx) = mpsc::channel(config.queues.input);
    let (upload_tx, upload_rx) = mpsc::channel(config.queues.upload);
    let shutdown = CancellationToken::new();

    let station_record = StationRecord::new(&station);
    let pipeline = Pipeline::new(config.profile_table(), station, config.receiver.input_mode);
    let worker = DecodeWorker::new(pipeline, Sinks::new(&config.output), upload_tx);

    let workers = vec![
        tokio::spawn(receive::receive_loop(
            socket,
            config.receiver.buffer_size,
            input_tx,
            shutdown.clone(),
        )),
        tokio::spawn(worker.run(input_rx, shutdown.clone())),
        tokio::spawn(upload::telemetry_loop(
            transport.clone(),
            config.upload.clone(),
            upload_rx,
            shutdown.clone(),
        )),
        tokio::spawn(upload::station_loop(
            transport,
            config.upload.clone(),
            station_record,
            shutdown.clone(),
        )),
    ];

    let runtime = (config.runtime > 0).then(|| Duration::from_secs(config.runtime));
    wait_for_shutdown(tokio::signal::ctrl_c(), runtime).await;

    shutdown.cancel();
    for handle in workers {
        if let Err(e) = handle.await {
            error!(%e, "worker panicked");
        }
    }
    info!("sonde-relay stopped");
    Ok(())
}

/// Resolve on `interrupt` or once `runtime` has elapsed. A failed interrupt
/// listener is logged and leaves only the runtime to end the daemon.
async fn wait_for_shutdown<F>(interrupt: F, runtime: Option<Duration>)
where
    F: Future<Output = io::Result<()>>,
{
    let interrupted = async {
        match interrupt.await {
            Ok(()) => info!("interrupted"),
            Err(e) => {
                error!(%e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    };

    match runtime {
        Some(runtime) => tokio::select! {
            _ = interrupted => {}
            _ = tokio::time::sleep(runtime) => info!("runtime elapsed"),
        },
        None => interrupted.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "sonde-relay",
            "--callsign",
            "DL1ABC",
            "--latitude",
            "-33.5",
            "--port",
            "18002",
            "--input-mode",
            "json",
            "--radiosonde",
            "M10=true",
            "--write-raw",
            "--no-log-file",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.station.callsign.as_deref(), Some("DL1ABC"));
        assert_eq!(config.station.latitude, Some(-33.5));
        assert_eq!(config.receiver.port, 18002);
        assert_eq!(config.receiver.input_mode, InputMode::Json);
        assert_eq!(config.radiosondes.get("M10"), Some(&true));
        assert!(config.output.raw_data);
        assert!(!config.output.log_file);
        // Untouched values keep their defaults
        assert_eq!(config.upload.telemetry_rate, 30);
    }

    #[test]
    fn test_parse_family() {
        assert_eq!(parse_family("M20=false"), Ok(("M20".into(), false)));
        assert!(parse_family("M20").is_err());
        assert!(parse_family("M20=maybe").is_err());
    }

    fn listener_failed() -> std::future::Ready<io::Result<()>> {
        std::future::ready(Err(io::Error::new(io::ErrorKind::Other, "no signal driver")))
    }

    #[tokio::test]
    async fn test_interrupt_ends_wait() {
        let wait = wait_for_shutdown(std::future::ready(Ok(())), None);
        tokio::time::timeout(Duration::from_secs(1), wait)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_listener_keeps_running() {
        let wait = wait_for_shutdown(listener_failed(), None);
        assert!(tokio::time::timeout(Duration::from_millis(100), wait)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_failed_listener_still_honours_runtime() {
        let wait = wait_for_shutdown(listener_failed(), Some(Duration::from_millis(50)));
        tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .unwrap();
    }

    #[test]
    fn test_parse_input_mode() {
        assert_eq!(parse_input_mode("aprs"), Ok(InputMode::Aprs));
        assert!(parse_input_mode("xml").is_err());
    }
}
