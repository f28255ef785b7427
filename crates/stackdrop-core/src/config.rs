//! Configuration module for Stackdrop.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Stackdrop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub reports: ReportsConfig,
    pub capture: CaptureConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

/// What to do with the rest of a batch when one stored report cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailurePolicy {
    /// Drop the unreadable report and keep dispatching the others.
    #[default]
    SkipFile,
    /// Drop the whole batch on the first unreadable report.
    AbortBatch,
}

impl std::fmt::Display for DecodeFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecodeFailurePolicy::SkipFile => "skip_file",
            DecodeFailurePolicy::AbortBatch => "abort_batch",
        };
        write!(f, "{}", s)
    }
}

/// Pending report storage and dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    /// Directory holding pending report files. `None` uses the per-package default.
    pub dir: Option<PathBuf>,
    /// Reports are no longer written once this many are pending.
    pub max_pending: usize,
    /// Behaviour when a stored report cannot be decoded.
    pub decode_failure: DecodeFailurePolicy,
    /// Run decode-and-send on a worker thread instead of the registering thread.
    pub dispatch_in_background: bool,
}

/// Fault capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Extra capture logging, and a `DEBUG-` prefix on the stored package version.
    pub debug: bool,
    /// Capture a backtrace for the faulting thread.
    pub backtrace: bool,
    /// Maximum number of frames kept from a backtrace.
    pub max_frames: usize,
}

/// Settings for the HTTP POST sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Collector URL reports are posted to. `None` disables HTTP delivery.
    pub endpoint: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/stackdrop/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("stackdrop")
            .join("config.yaml")
    }

    /// Serialize the configuration back to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default cap on pending reports.
pub const DEFAULT_MAX_PENDING: usize = 20;

/// Default cap on captured frames.
pub const DEFAULT_MAX_FRAMES: usize = 128;

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_pending: DEFAULT_MAX_PENDING,
            decode_failure: DecodeFailurePolicy::default(),
            dispatch_in_background: true,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            debug: false,
            backtrace: true,
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"reports.max_pending"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- reports ---
        if self.reports.max_pending == 0 {
            errors.push(ValidationError {
                field: "reports.max_pending".into(),
                message: "must be greater than 0".into(),
            });
        }
        if let Some(dir) = &self.reports.dir {
            if dir.as_os_str().is_empty() {
                errors.push(ValidationError {
                    field: "reports.dir".into(),
                    message: "must not be empty".into(),
                });
            } else if dir.is_file() {
                errors.push(ValidationError {
                    field: "reports.dir".into(),
                    message: format!("is a file, not a directory: {}", dir.display()),
                });
            }
        }

        // --- capture ---
        if self.capture.max_frames == 0 {
            errors.push(ValidationError {
                field: "capture.max_frames".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- http ---
        if let Some(endpoint) = &self.http.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                errors.push(ValidationError {
                    field: "http.endpoint".into(),
                    message: format!("must be an http(s) URL, got '{}'", endpoint),
                });
            }
        }
        if self.http.timeout_secs == 0 {
            errors.push(ValidationError {
                field: "http.timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}', expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // -- reports --

    pub fn reports_dir(mut self, dir: PathBuf) -> Self {
        self.config.reports.dir = Some(dir);
        self
    }

    pub fn reports_max_pending(mut self, n: usize) -> Self {
        self.config.reports.max_pending = n;
        self
    }

    pub fn reports_decode_failure(mut self, policy: DecodeFailurePolicy) -> Self {
        self.config.reports.decode_failure = policy;
        self
    }

    pub fn reports_dispatch_in_background(mut self, background: bool) -> Self {
        self.config.reports.dispatch_in_background = background;
        self
    }

    // -- capture --

    pub fn capture_debug(mut self, debug: bool) -> Self {
        self.config.capture.debug = debug;
        self
    }

    pub fn capture_backtrace(mut self, backtrace: bool) -> Self {
        self.config.capture.backtrace = backtrace;
        self
    }

    pub fn capture_max_frames(mut self, n: usize) -> Self {
        self.config.capture.max_frames = n;
        self
    }

    // -- http --

    pub fn http_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.http.endpoint = Some(endpoint.into());
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http.timeout_secs = secs;
        self
    }

    // -- logging --

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Consume the builder and return the config without validation.
    pub fn build(self) -> Config {
        self.config
    }

    /// Consume the builder, validate, and return the config or errors.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let errors = self.config.validate();
        if errors.is_empty() {
            Ok(self.config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
