//! Logging setup for sigil
//!
//! Library code only emits `tracing` events. Binaries and tests that want to
//! see them call [`init`] once, which installs a `tracing-subscriber` fmt
//! subscriber filtered by the `SIGIL_LOG` environment variable (falling back
//! to the configured minimum level) and optionally writes to a timestamped
//! file under a log directory.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Environment variable holding a `tracing` filter directive
pub const LOG_ENV_VAR: &str = "SIGIL_LOG";

/// Number of log files retained by [`init`]
const KEEP_LOG_FILES: usize = 10;

/// Minimum log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    fn directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// Logging configuration options
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Minimum log level when `SIGIL_LOG` is unset
    pub level: LogLevel,
    /// Directory for timestamped log files; stderr is used when `None`
    pub log_dir: Option<PathBuf>,
}

/// Install the global subscriber
///
/// Returns the path of the log file when one was opened. Calling this more
/// than once is harmless: later calls leave the first subscriber in place.
pub fn init(options: LogOptions) -> std::io::Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(options.level.directive()));

    match options.log_dir {
        Some(dir) => {
            fs::create_dir_all(&dir)?;
            let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H%M%S").to_string();
            let path = dir.join(format!("sigil-{}.log", timestamp));
            let file = File::options().create(true).append(true).open(&path)?;
            cleanup(&dir)?;

            let installed = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .is_ok();
            if !installed {
                tracing::debug!("Subscriber already installed; log file {:?} unused", path);
            }
            Ok(Some(path))
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
            Ok(None)
        }
    }
}

/// Remove old log files, keeping the newest ten
fn cleanup(log_dir: &Path) -> std::io::Result<()> {
    let mut log_files: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if path.extension()? == "log" {
                let modified = fs::metadata(&path).ok()?.modified().ok()?;
                Some((path, modified))
            } else {
                None
            }
        })
        .collect();

    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(KEEP_LOG_FILES) {
        let _ = fs::remove_file(path);
    }

    Ok(())
}
