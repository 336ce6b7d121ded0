//! Logging infrastructure for streamlens.
//!
//! Logs go to a daily-rotated file in the platform state directory. Stdout
//! carries the transcript, so nothing is ever logged there.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use directories::ProjectDirs;
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

const LOG_PREFIX: &str = "streamlens";
const RETENTION_DAYS: u64 = 7;

/// Result of initializing the logging system.
pub struct LoggingContext {
    /// Guard that must be held for the application lifetime to ensure logs are flushed.
    pub _guard: WorkerGuard,
    /// The session ID for this invocation.
    pub session_id: String,
    /// The directory where logs are written.
    pub log_directory: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to determine log directory")]
    NoLogDirectory,

    #[error("failed to create log directory {path:?}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install subscriber: {0}")]
    Subscriber(String),
}

/// Generates a 6-character random hex session ID.
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let bytes: [u8; 3] = rng.random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Platform log directory.
///
/// macOS: ~/Library/Logs/streamlens/
/// Linux: ~/.local/state/streamlens/
/// Windows: %LocalAppData%\streamlens\
fn log_directory() -> Option<PathBuf> {
    if cfg!(target_os = "macos") {
        return dirs::home_dir().map(|home| home.join("Library").join("Logs").join(LOG_PREFIX));
    }
    let project_dirs = ProjectDirs::from("", "", LOG_PREFIX)?;
    project_dirs
        .state_dir()
        .map(Path::to_path_buf)
        .or_else(|| Some(project_dirs.data_local_dir().to_path_buf()))
}

/// Initializes the logging system at `level` unless `RUST_LOG` is set.
///
/// The returned `WorkerGuard` must be held for the application lifetime.
pub fn init(level: &str) -> Result<LoggingContext, LoggingError> {
    let session_id = generate_session_id();

    let log_dir = log_directory().ok_or(LoggingError::NoLogDirectory)?;
    fs::create_dir_all(&log_dir).map_err(|source| LoggingError::CreateDirectory {
        path: log_dir.clone(),
        source,
    })?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_span_events(FmtSpan::NONE)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| LoggingError::Subscriber(e.to_string()))?;

    info!(session_id = %session_id, version = env!("CARGO_PKG_VERSION"), "session_start");

    Ok(LoggingContext {
        _guard: guard,
        session_id,
        log_directory: log_dir,
    })
}

/// Deletes `streamlens.*` log files older than the retention period.
///
/// Errors are logged at WARN level and never stop startup.
pub fn cleanup_old_logs(log_dir: &Path) {
    let retention = Duration::from_secs(RETENTION_DAYS * 24 * 60 * 60);
    let deleted = remove_logs_older_than(log_dir, retention, SystemTime::now());
    if deleted > 0 {
        debug!(count = deleted, "log_cleanup_completed");
    }
}

fn remove_logs_older_than(log_dir: &Path, retention: Duration, now: SystemTime) -> u32 {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "log_cleanup_read_dir_failed");
            return 0;
        }
    };

    let prefix = format!("{}.", LOG_PREFIX);
    let mut deleted = 0u32;

    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if name.starts_with(&prefix) => name.to_string(),
            _ => continue,
        };

        let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                warn!(file = %file_name, error = %e, "log_file_metadata_failed");
                continue;
            }
        };

        // files dated in the future are kept
        let Ok(age) = now.duration_since(modified) else {
            continue;
        };

        if age > retention {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(file = %file_name, age_days = age.as_secs() / 86400, "old_log_deleted");
                    deleted += 1;
                }
                Err(e) => warn!(file = %file_name, error = %e, "old_log_delete_failed"),
            }
        }
    }

    deleted
}
