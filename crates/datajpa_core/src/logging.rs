//! Logging bootstrap for the persistence core.
//!
//! # Responsibility
//! - Start file-based rolling logs once per process from
//!   `DATAJPA_LOG_LEVEL` / `DATAJPA_LOG_DIR`.
//!
//! # Invariants
//! - Nothing is started when `DATAJPA_LOG_DIR` is unset.
//! - Starting again with the same config is a no-op; a different config is
//!   rejected.
//! - Core events are `key=value` lines; query events never carry bound values.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::info;
use once_cell::sync::OnceCell;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable holding the log level.
pub const LOG_LEVEL_ENV: &str = "DATAJPA_LOG_LEVEL";
/// Environment variable holding the absolute log directory.
pub const LOG_DIR_ENV: &str = "DATAJPA_LOG_DIR";

const LOG_FILE_BASENAME: &str = "datajpa";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

static ACTIVE_LOGGER: OnceCell<ActiveLogger> = OnceCell::new();

/// Validated logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogConfig {
    level: &'static str,
    dir: PathBuf,
}

struct ActiveLogger {
    config: LogConfig,
    _handle: LoggerHandle,
}

impl LogConfig {
    fn new(level: &str, dir: &str) -> Result<Self, String> {
        let level = match level.trim().to_ascii_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" | "warning" => "warn",
            "error" => "error",
            other => {
                return Err(format!(
                    "unsupported log level `{other}`; expected trace|debug|info|warn|error"
                ))
            }
        };

        let dir = dir.trim();
        if dir.is_empty() {
            return Err(format!("{LOG_DIR_ENV} cannot be empty"));
        }
        let dir = Path::new(dir);
        if !dir.is_absolute() {
            return Err(format!(
                "{LOG_DIR_ENV} must be an absolute path, got `{}`",
                dir.display()
            ));
        }

        Ok(Self {
            level,
            dir: dir.to_path_buf(),
        })
    }

    /// `Ok(None)` when no directory is configured. The level defaults to
    /// `debug` in debug builds and `info` otherwise.
    fn from_vars(level: Option<OsString>, dir: Option<OsString>) -> Result<Option<Self>, String> {
        let Some(dir) = dir else {
            return Ok(None);
        };
        let dir = dir
            .into_string()
            .map_err(|_| format!("{LOG_DIR_ENV} is not valid UTF-8"))?;
        let level = match level {
            Some(level) => level
                .into_string()
                .map_err(|_| format!("{LOG_LEVEL_ENV} is not valid UTF-8"))?,
            None => default_level().to_string(),
        };
        Self::new(&level, &dir).map(Some)
    }
}

/// Starts logging from `DATAJPA_LOG_LEVEL` and `DATAJPA_LOG_DIR`.
///
/// Returns the active log directory, or `Ok(None)` without touching the
/// logger when no directory is configured.
///
/// # Errors
/// - Invalid level or non-absolute directory.
/// - The directory cannot be created or the backend fails to start.
/// - Logging was already started with a different level or directory.
pub fn init_logging_from_env() -> Result<Option<PathBuf>, String> {
    let config = LogConfig::from_vars(
        std::env::var_os(LOG_LEVEL_ENV),
        std::env::var_os(LOG_DIR_ENV),
    )?;
    match config {
        Some(config) => start(config).map(Some),
        None => Ok(None),
    }
}

fn start(config: LogConfig) -> Result<PathBuf, String> {
    let active = ACTIVE_LOGGER.get_or_try_init(|| -> Result<ActiveLogger, String> {
        std::fs::create_dir_all(&config.dir).map_err(|err| {
            format!(
                "failed to create log directory `{}`: {err}",
                config.dir.display()
            )
        })?;

        let handle = Logger::try_with_str(config.level)
            .map_err(|err| format!("invalid log level `{}`: {err}", config.level))?
            .log_to_file(
                FileSpec::default()
                    .directory(config.dir.as_path())
                    .basename(LOG_FILE_BASENAME),
            )
            .rotate(
                Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(MAX_LOG_FILES),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()
            .map_err(|err| format!("failed to start logger: {err}"))?;

        info!(
            "event=logging_init module=core status=ok version={} level={} log_dir={}",
            env!("CARGO_PKG_VERSION"),
            config.level,
            config.dir.display()
        );

        Ok(ActiveLogger {
            config: config.clone(),
            _handle: handle,
        })
    })?;

    if active.config != config {
        return Err(format!(
            "logging already started with level `{}` at `{}`; refusing to switch to `{}` at `{}`",
            active.config.level,
            active.config.dir.display(),
            config.level,
            config.dir.display()
        ));
    }
    Ok(active.config.dir.clone())
}

fn default_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}
