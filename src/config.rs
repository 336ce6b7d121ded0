use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::render::TOOL_INPUT_MAX_LEN;

/// Status of config file loading
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLoadStatus {
    /// Config loaded successfully from existing file
    Loaded,
    /// Created default config file (first run)
    Created,
    /// Error occurred during loading, using defaults.
    Error(String),
}

/// Which front end renders the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Plain transcript written to stdout.
    #[default]
    Line,
    /// Full-screen terminal dashboard.
    Dashboard,
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "line" => Ok(DisplayMode::Line),
            "dashboard" => Ok(DisplayMode::Dashboard),
            other => Err(format!("unknown display mode: {}", other)),
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayMode::Line => write!(f, "line"),
            DisplayMode::Dashboard => write!(f, "dashboard"),
        }
    }
}

/// Display configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub mode: DisplayMode,
    /// Display columns for a tool's headline argument.
    pub tool_input_max_len: usize,
    /// Lines of a tool result shown before eliding the rest.
    pub result_preview_lines: usize,
    /// Show skipped-line diagnostics in the transcript.
    pub show_diagnostics: bool,
    pub show_thinking: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Line,
            tool_input_max_len: TOOL_INPUT_MAX_LEN,
            result_preview_lines: 4,
            show_diagnostics: true,
            show_thinking: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Loaded configuration with metadata
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_path: PathBuf,
    pub status: ConfigLoadStatus,
}

/// Get the platform-appropriate config directory
fn get_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "streamlens").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the full path to the default config file
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.toml"))
}

/// Load configuration from file, environment, and defaults.
///
/// An explicit path must already exist; only the default location is
/// created on first run.
pub fn load_config(explicit: Option<&Path>) -> LoadedConfig {
    if let Some(path) = explicit {
        debug!(path = ?path, "explicit_config_path");
        let (config, status) = match read_config(path) {
            Ok(config) => (config, ConfigLoadStatus::Loaded),
            Err(status) => (Config::default(), status),
        };
        return LoadedConfig {
            config: apply_env_overrides(config),
            config_path: path.to_path_buf(),
            status,
        };
    }

    let config_path = match get_config_path() {
        Some(path) => path,
        None => {
            warn!("config_dir_unavailable");
            return LoadedConfig {
                config: apply_env_overrides(Config::default()),
                config_path: PathBuf::from("config.toml"),
                status: ConfigLoadStatus::Error("Could not determine config directory".to_string()),
            };
        }
    };

    debug!(path = ?config_path, "config_path");
    let (config, status) = load_or_create_config(&config_path);

    LoadedConfig {
        config: apply_env_overrides(config),
        config_path,
        status,
    }
}

/// Reads and parses a config file, mapping failures to a load status.
fn read_config(path: &Path) -> Result<Config, ConfigLoadStatus> {
    let contents = fs::read_to_string(path).map_err(|e| {
        warn!(path = ?path, error = %e, "config_read_failed");
        match e.kind() {
            io::ErrorKind::NotFound => ConfigLoadStatus::Error("Config file not found".to_string()),
            io::ErrorKind::PermissionDenied => {
                ConfigLoadStatus::Error("Permission denied reading config".to_string())
            }
            _ => ConfigLoadStatus::Error(format!("Read error: {}", e)),
        }
    })?;

    let config = toml::from_str::<Config>(&contents).map_err(|e| {
        warn!(path = ?path, error = %e, "config_parse_failed");
        ConfigLoadStatus::Error(format!("Malformed TOML: {}", e))
    })?;

    info!(path = ?path, "config_loaded");
    Ok(config)
}

/// Load config from file, or create default if not exists
fn load_or_create_config(config_path: &Path) -> (Config, ConfigLoadStatus) {
    if !config_path.exists() {
        return create_default_config(config_path);
    }
    match read_config(config_path) {
        Ok(config) => (config, ConfigLoadStatus::Loaded),
        Err(status) => (Config::default(), status),
    }
}

/// Create the default config file
fn create_default_config(config_path: &Path) -> (Config, ConfigLoadStatus) {
    let config = Config::default();

    if let Some(parent) = config_path.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        warn!(path = ?parent, error = %e, "config_dir_create_failed");
        return (
            config,
            ConfigLoadStatus::Error(format!("Could not create config directory: {}", e)),
        );
    }

    let toml_content = match toml::to_string_pretty(&config) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "config_serialize_failed");
            return (
                config,
                ConfigLoadStatus::Error(format!("Serialization error: {}", e)),
            );
        }
    };

    match fs::write(config_path, &toml_content) {
        Ok(()) => {
            info!(path = ?config_path, "config_created");
            (config, ConfigLoadStatus::Created)
        }
        Err(e) => {
            warn!(path = ?config_path, error = %e, "config_write_failed");
            (config, ConfigLoadStatus::Error(format!("Write error: {}", e)))
        }
    }
}

/// Apply environment variable overrides to config
fn apply_env_overrides(config: Config) -> Config {
    apply_overrides(config, |key| env::var(key).ok())
}

fn apply_overrides(mut config: Config, var: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(mode) = var("STREAMLENS_MODE") {
        match mode.parse::<DisplayMode>() {
            Ok(mode) => {
                debug!(%mode, "Overriding display.mode from STREAMLENS_MODE");
                config.display.mode = mode;
            }
            Err(e) => warn!(error = %e, "env_mode_ignored"),
        }
    }

    if let Some(level) = var("STREAMLENS_LOG") {
        debug!("Overriding logging.level from STREAMLENS_LOG");
        config.logging.level = level;
    }

    config
}
