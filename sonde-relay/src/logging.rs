//! tracing subscriber setup: console output plus optional log file.
//!
//! Levels are configured as numbers: 1=error, 2=warn, 3=info, 4=debug,
//! 5=trace.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

use sonde_core::config::LoggingConfig;

use crate::sinks::LOG_FILE;

/// Map a numeric level onto a filter. Out-of-range values clamp.
pub fn level_filter(level: u8) -> LevelFilter {
    match level {
        0 | 1 => LevelFilter::from_level(Level::ERROR),
        2 => LevelFilter::from_level(Level::WARN),
        3 => LevelFilter::from_level(Level::INFO),
        4 => LevelFilter::from_level(Level::DEBUG),
        _ => LevelFilter::from_level(Level::TRACE),
    }
}

/// Install the global subscriber. `log_dir` enables the file layer.
pub fn init(levels: &LoggingConfig, log_dir: Option<&Path>) -> std::io::Result<()> {
    let console = fmt::layer()
        .with_target(false)
        .with_filter(level_filter(levels.print_level));

    let file = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(LOG_FILE))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(level_filter(levels.write_level)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry().with(console).with(file).init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(level_filter(1), LevelFilter::ERROR);
        assert_eq!(level_filter(2), LevelFilter::WARN);
        assert_eq!(level_filter(3), LevelFilter::INFO);
        assert_eq!(level_filter(4), LevelFilter::DEBUG);
        assert_eq!(level_filter(5), LevelFilter::TRACE);
    }

    #[test]
    fn test_level_clamps() {
        assert_eq!(level_filter(0), LevelFilter::ERROR);
        assert_eq!(level_filter(9), LevelFilter::TRACE);
    }
}
