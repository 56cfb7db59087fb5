//! Runtime settings with TOML, environment variable, and default sources.

use std::path::{Path, PathBuf};
use std::{env, fmt, fs};

use serde::{Deserialize, Serialize};

use crate::device_limits::DeviceLimits;

/// File looked up when no explicit config path is given.
pub const DEFAULT_CONFIG_FILE: &str = "axred.toml";

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "AXRED_CONFIG";

// ── Errors ──────────────────────────────────────────────────────────

/// Errors produced by settings loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}")]
    InvalidLogFormat(String),

    #[error("invalid environment variable value for {key}: {value}")]
    InvalidEnvVar { key: String, value: String },
}

// ── Backend ─────────────────────────────────────────────────────────

/// Device that executes reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process reference executor.
    #[default]
    Host,
    #[serde(alias = "OpenCL")]
    OpenCl,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::OpenCl => write!(f, "opencl"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" | "cpu" => Ok(Self::Host),
            "opencl" => Ok(Self::OpenCl),
            other => Err(SettingsError::UnknownBackend(other.to_string())),
        }
    }
}

// ── LogLevel ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(SettingsError::InvalidLogLevel(other.to_string())),
        }
    }
}

// ── LogFormat ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(SettingsError::InvalidLogFormat(other.to_string())),
        }
    }
}

// ── DeviceSettings ──────────────────────────────────────────────────

/// The `[redux.device]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub local_memory_bytes: usize,
    pub max_local_workers: usize,
    pub max_grid_size: usize,
    /// Host backend only: largest local size a built kernel reports it
    /// supports, to simulate register pressure on a real device.
    pub kernel_local_size_cap: Option<usize>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        let limits = DeviceLimits::mock();
        Self {
            local_memory_bytes: limits.local_memory_bytes,
            max_local_workers: limits.max_local_workers,
            max_grid_size: limits.max_grid_size,
            kernel_local_size_cap: None,
        }
    }
}

impl DeviceSettings {
    pub fn limits(&self) -> DeviceLimits {
        DeviceLimits::new(self.local_memory_bytes, self.max_local_workers, self.max_grid_size)
    }
}

// ── TOML wrapper ────────────────────────────────────────────────────

/// Wrapper used for the `[redux]` table in TOML files.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TomlWrapper {
    redux: ReduxSettings,
}

// ── ReduxSettings ───────────────────────────────────────────────────

/// Full runtime settings for building and running reductions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduxSettings {
    pub backend: Backend,
    /// Reuse compiled kernels across calls with the same rank and local size.
    pub kernel_cache: bool,
    /// Upper bound applied to the initial local-size estimate.
    pub max_local_size: Option<usize>,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    pub device: DeviceSettings,
}

impl Default for ReduxSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Host,
            kernel_cache: false,
            max_local_size: None,
            log_level: LogLevel::Warn,
            log_format: LogFormat::Pretty,
            device: DeviceSettings::default(),
        }
    }
}

impl ReduxSettings {
    // ── Constructors ────────────────────────────────────────────

    /// Load settings from a TOML file at `path`.
    ///
    /// The file is expected to contain a `[redux]` table.  If the file
    /// does not exist, returns `Ok(Self::default())`.
    pub fn from_toml(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found; using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse settings from TOML text containing a `[redux]` table.
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        let wrapper: TomlWrapper = toml::from_str(text)?;
        Ok(wrapper.redux)
    }

    /// Serialize to a TOML string (wrapped in `[redux]`).
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        let wrapper = TomlWrapper { redux: self.clone() };
        Ok(toml::to_string_pretty(&wrapper)?)
    }

    /// Build settings from `AXRED_*` environment variables on top of
    /// `Self::default()`.
    pub fn from_env() -> Result<Self, SettingsError> {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("AXRED_BACKEND") {
            cfg.backend = v.parse()?;
        }
        if let Ok(v) = env::var("AXRED_KERNEL_CACHE") {
            cfg.kernel_cache = Self::parse_env_bool("AXRED_KERNEL_CACHE", &v)?;
        }
        if let Ok(v) = env::var("AXRED_MAX_LOCAL_SIZE") {
            cfg.max_local_size = Some(Self::parse_env_usize("AXRED_MAX_LOCAL_SIZE", &v)?);
        }
        if let Ok(v) = env::var("AXRED_LOCAL_MEMORY_BYTES") {
            cfg.device.local_memory_bytes =
                Self::parse_env_usize("AXRED_LOCAL_MEMORY_BYTES", &v)?;
        }
        if let Ok(v) = env::var("AXRED_MAX_LOCAL_WORKERS") {
            cfg.device.max_local_workers = Self::parse_env_usize("AXRED_MAX_LOCAL_WORKERS", &v)?;
        }
        if let Ok(v) = env::var("AXRED_MAX_GRID_SIZE") {
            cfg.device.max_grid_size = Self::parse_env_usize("AXRED_MAX_GRID_SIZE", &v)?;
        }
        if let Ok(v) = env::var("AXRED_KERNEL_LOCAL_SIZE_CAP") {
            cfg.device.kernel_local_size_cap =
                Some(Self::parse_env_usize("AXRED_KERNEL_LOCAL_SIZE_CAP", &v)?);
        }
        if let Ok(v) = env::var("AXRED_LOG_LEVEL") {
            cfg.log_level = v.parse()?;
        }
        if let Ok(v) = env::var("AXRED_LOG_FORMAT") {
            cfg.log_format = v.parse()?;
        }

        Ok(cfg)
    }

    /// File settings (explicit path, else `$AXRED_CONFIG`, else
    /// `axred.toml`) overlaid with the environment, then validated.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let file = Self::from_toml(&path)?;
        let merged = file.merge_with(&Self::from_env()?);
        merged.validate()?;
        Ok(merged)
    }

    /// Config path used when none is given on the command line.
    pub fn default_path() -> PathBuf {
        env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Device limits described by the `[redux.device]` table.
    pub fn limits(&self) -> DeviceLimits {
        self.device.limits()
    }

    // ── Validation ──────────────────────────────────────────────

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.device.local_memory_bytes == 0 {
            return Err(SettingsError::Validation("local_memory_bytes must be > 0".into()));
        }
        if self.device.max_local_workers == 0 {
            return Err(SettingsError::Validation("max_local_workers must be >= 1".into()));
        }
        if self.device.max_grid_size == 0 {
            return Err(SettingsError::Validation("max_grid_size must be >= 1".into()));
        }
        if self.max_local_size == Some(0) {
            return Err(SettingsError::Validation("max_local_size must be > 0 when set".into()));
        }
        if self.device.kernel_local_size_cap.is_some() && self.backend != Backend::Host {
            return Err(SettingsError::Validation(
                "kernel_local_size_cap only applies to the host backend".into(),
            ));
        }
        Ok(())
    }

    // ── Merge ───────────────────────────────────────────────────

    /// Overlay `other` on top of `self`. Fields in `other` that differ
    /// from the default take precedence.
    #[must_use]
    pub fn merge_with(&self, other: &Self) -> Self {
        let d = Self::default();
        Self {
            backend: if other.backend == d.backend { self.backend } else { other.backend },
            kernel_cache: if other.kernel_cache == d.kernel_cache {
                self.kernel_cache
            } else {
                other.kernel_cache
            },
            max_local_size: other.max_local_size.or(self.max_local_size),
            log_level: if other.log_level == d.log_level { self.log_level } else { other.log_level },
            log_format: if other.log_format == d.log_format {
                self.log_format
            } else {
                other.log_format
            },
            device: Self::merge_device(&self.device, &other.device, &d.device),
        }
    }

    fn merge_device(
        base: &DeviceSettings,
        other: &DeviceSettings,
        d: &DeviceSettings,
    ) -> DeviceSettings {
        DeviceSettings {
            local_memory_bytes: if other.local_memory_bytes == d.local_memory_bytes {
                base.local_memory_bytes
            } else {
                other.local_memory_bytes
            },
            max_local_workers: if other.max_local_workers == d.max_local_workers {
                base.max_local_workers
            } else {
                other.max_local_workers
            },
            max_grid_size: if other.max_grid_size == d.max_grid_size {
                base.max_grid_size
            } else {
                other.max_grid_size
            },
            kernel_local_size_cap: other.kernel_local_size_cap.or(base.kernel_local_size_cap),
        }
    }

    // ── Helpers ─────────────────────────────────────────────────

    fn parse_env_usize(key: &str, val: &str) -> Result<usize, SettingsError> {
        val.parse::<usize>().map_err(|_| SettingsError::InvalidEnvVar {
            key: key.to_string(),
            value: val.to_string(),
        })
    }

    fn parse_env_bool(key: &str, val: &str) -> Result<bool, SettingsError> {
        match val.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(SettingsError::InvalidEnvVar { key: key.to_string(), value: val.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(ReduxSettings::default().validate().is_ok());
    }

    #[test]
    fn backend_display_roundtrip() {
        for b in [Backend::Host, Backend::OpenCl] {
            let parsed: Backend = b.to_string().parse().unwrap();
            assert_eq!(b, parsed);
        }
    }

    #[test]
    fn log_level_display_roundtrip() {
        for l in [LogLevel::Error, LogLevel::Warn, LogLevel::Info, LogLevel::Debug, LogLevel::Trace]
        {
            let parsed: LogLevel = l.to_string().parse().unwrap();
            assert_eq!(l, parsed);
        }
    }

    #[test]
    fn log_format_display_roundtrip() {
        for l in [LogFormat::Pretty, LogFormat::Compact, LogFormat::Json] {
            let parsed: LogFormat = l.to_string().parse().unwrap();
            assert_eq!(l, parsed);
        }
    }

    #[test]
    fn unknown_backend_is_error() {
        let r = "cuda".parse::<Backend>();
        assert!(r.unwrap_err().to_string().contains("unknown backend"));
    }

    #[test]
    fn zero_grid_rejected() {
        let mut cfg = ReduxSettings::default();
        cfg.device.max_grid_size = 0;
        assert!(matches!(cfg.validate(), Err(SettingsError::Validation(_))));
    }

    #[test]
    fn zero_max_local_size_rejected() {
        let cfg = ReduxSettings { max_local_size: Some(0), ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn kernel_cap_rejected_for_opencl() {
        let mut cfg = ReduxSettings { backend: Backend::OpenCl, ..Default::default() };
        cfg.device.kernel_local_size_cap = Some(16);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn limits_follow_device_table() {
        let mut cfg = ReduxSettings::default();
        cfg.device.max_local_workers = 64;
        assert_eq!(cfg.limits().max_local_workers, 64);
        assert_eq!(cfg.limits().max_grid_size, DeviceLimits::mock().max_grid_size);
    }
}
