//! # nvsmi-prom-core
//!
//! Core library for the nvsmi-prom exporter providing the pieces shared by
//! every collector: the error taxonomy, configuration loading, the
//! [`Collector`] trait, exposition-format primitives and textfile publishing.
//!
//! ## Quick Start
//!
//! ```rust
//! use nvsmi_prom_core::exposition::{render_document, MetricFamily, SampleValue};
//!
//! let mut family = MetricFamily::new("nvsmi_fan_speed_percent", "Fan speed")?;
//! family.push(vec![("index".to_owned(), "0".to_owned())], SampleValue::Integer(30))?;
//!
//! let document = render_document(&[family]);
//! assert!(document.ends_with("nvsmi_fan_speed_percent{index=\"0\"} 30\n"));
//! # Ok::<(), nvsmi_prom_core::ExporterError>(())
//! ```

pub mod exposition;

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Exporter configuration loaded from ~/.config/nvsmi-prom/config.ron
///
/// Every field is optional in the file; missing fields fall back to the
/// defaults below. Command-line flags are applied on top with the `with_*`
/// builders.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExporterConfig {
    /// Prefix put in front of every metric name
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Diagnostic command to run (looked up in PATH)
    #[serde(default = "default_command")]
    pub command: String,
    /// Upper bound on one command invocation, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Collection period in periodic mode, in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Textfile collector target; stdout when unset
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            command: default_command(),
            timeout_ms: default_timeout_ms(),
            interval_ms: default_interval_ms(),
            output: None,
        }
    }
}

fn default_namespace() -> String {
    "nvsmi".to_owned()
}

fn default_command() -> String {
    "nvidia-smi".to_owned()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_interval_ms() -> u64 {
    15_000
}

impl ExporterConfig {
    /// Minimum allowed timeout and interval in milliseconds.
    pub const MIN_DURATION_MS: u64 = 100;

    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the standard config file location.
    ///
    /// Searches for config in:
    /// 1. ~/.config/nvsmi-prom/config.ron
    /// 2. ~/.nvsmi-prom/config.ron (fallback)
    ///
    /// Returns default config if no file is found.
    pub fn load() -> Result<Self, ExporterError> {
        if let Some(config_path) = Self::find_config_file() {
            Self::load_from_file(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load and validate configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ExporterError> {
        let content = fs::read_to_string(path)?;

        let config: ExporterConfig = ron::from_str(&content).map_err(|e| {
            ExporterError::config_with_value(
                format!("Failed to parse config file: {}", e),
                path.display().to_string(),
            )
        })?;
        config.validate()?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Find the config file in standard locations.
    pub fn find_config_file() -> Option<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            let xdg_path = config_dir.join("nvsmi-prom").join("config.ron");
            if xdg_path.exists() {
                return Some(xdg_path);
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".nvsmi-prom").join("config.ron");
            if home_path.exists() {
                return Some(home_path);
            }
        }

        None
    }

    /// Get the default config file path for writing.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("nvsmi-prom").join("config.ron"))
    }

    /// Save configuration to a specific file path, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ExporterError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ExporterError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content)?;
        Ok(())
    }

    /// Example configuration for a node_exporter textfile collector setup.
    pub fn example_config() -> Self {
        Self {
            output: Some(PathBuf::from(
                "/var/lib/node_exporter/textfile_collector/nvsmi.prom",
            )),
            ..Self::default()
        }
    }

    /// Check every field against its constraints.
    pub fn validate(&self) -> Result<(), ExporterError> {
        if !exposition::is_valid_metric_name(&self.namespace) {
            return Err(ExporterError::config_with_value(
                "Namespace must match [a-zA-Z_:][a-zA-Z0-9_:]*",
                self.namespace.clone(),
            ));
        }
        if self.command.trim().is_empty() {
            return Err(ExporterError::config("Command must not be empty"));
        }
        if self.timeout_ms < Self::MIN_DURATION_MS {
            return Err(ExporterError::config_with_value(
                format!("Timeout must be at least {}ms", Self::MIN_DURATION_MS),
                self.timeout_ms.to_string(),
            ));
        }
        if self.interval_ms < Self::MIN_DURATION_MS {
            return Err(ExporterError::config_with_value(
                format!("Interval must be at least {}ms", Self::MIN_DURATION_MS),
                self.interval_ms.to_string(),
            ));
        }
        Ok(())
    }

    /// Set the metric namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the diagnostic command.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// Set the invocation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the collection interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the textfile output path.
    #[must_use]
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Get the timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get the interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Common trait for every telemetry collector.
///
/// A collector runs one full, stateless collection cycle per call to
/// [`Collector::collect`] and returns the finished exposition document.
/// Nothing is carried from one call to the next.
pub trait Collector {
    /// Get the unique name/identifier for this collector.
    fn name(&self) -> &str;

    /// Run one collection cycle and render the exposition document.
    ///
    /// # Errors
    ///
    /// Returns an error if the data cannot be collected, parsed or rendered.
    /// No partial document is ever returned.
    fn collect(&self) -> impl Future<Output = Result<String, ExporterError>> + Send;

    /// Check if the collector can run on this system.
    ///
    /// Default implementation returns `Ok(())`.
    fn check_availability(&self) -> impl Future<Output = Result<(), ExporterError>> + Send {
        async { Ok(()) }
    }

    /// Get the configuration the collector runs with.
    fn config(&self) -> &ExporterConfig;
}

/// Publish a document for the textfile collector.
///
/// The document is written next to `path` under a `.tmp` name and renamed
/// over the target, so readers only ever see a complete file.
pub fn write_textfile(path: &Path, contents: &str) -> Result<(), ExporterError> {
    let file_name = path.file_name().ok_or_else(|| {
        ExporterError::config_with_value("Output path has no file name", path.display().to_string())
    })?;

    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp_path = path.with_file_name(tmp_name);

    if let Err(e) = fs::write(&tmp_path, contents).and_then(|()| fs::rename(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(ExporterError::Io(e));
    }

    debug!("Published {} bytes to {}", contents.len(), path.display());
    Ok(())
}

/// Error taxonomy for one collection cycle.
///
/// Every variant is fatal for the cycle that produced it; none is retried
/// inside the exporter.
#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    /// I/O error while reading configuration or publishing output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The diagnostic command could not be run, failed, timed out or
    /// produced no output.
    #[error("Collection failed: {reason}")]
    CollectionFailed {
        /// What went wrong with the invocation
        reason: String,
        /// Optional source error for chaining
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The header row disagrees with the expected column schema.
    #[error("Schema mismatch at column {position}: expected `{expected}`, found `{found}`")]
    SchemaMismatch {
        /// Zero-based column position
        position: usize,
        /// Column name the schema expects
        expected: String,
        /// Column name found in the header
        found: String,
    },

    /// A data row has the wrong shape.
    #[error("Malformed output on line {line}: {reason}")]
    MalformedOutput {
        /// One-based line number in the command output
        line: usize,
        /// Description of the problem
        reason: String,
    },

    /// A field could not be normalized under its column's rule.
    #[error("Cannot parse column `{column}` value `{value}`: {reason}")]
    FieldParse {
        /// Query name of the offending column
        column: String,
        /// The raw, trimmed value
        value: String,
        /// Which rule rejected it
        reason: String,
    },

    /// Configuration error (invalid settings, bad names, etc.).
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration issue
        message: String,
        /// The invalid configuration value if applicable
        value: Option<String>,
    },
}

impl ExporterError {
    /// Create a new collection failure with a simple message.
    pub fn collection_failed<S: Into<String>>(reason: S) -> Self {
        Self::CollectionFailed {
            reason: reason.into(),
            source: None,
        }
    }

    /// Create a new collection failure with a source error.
    pub fn collection_failed_with_source<S: Into<String>, E>(reason: S, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::CollectionFailed {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new schema mismatch error.
    pub fn schema_mismatch<E: Into<String>, F: Into<String>>(
        position: usize,
        expected: E,
        found: F,
    ) -> Self {
        Self::SchemaMismatch {
            position,
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a new malformed output error.
    pub fn malformed<S: Into<String>>(line: usize, reason: S) -> Self {
        Self::MalformedOutput {
            line,
            reason: reason.into(),
        }
    }

    /// Create a new field parse error.
    pub fn field_parse<C: Into<String>, V: Into<String>, R: Into<String>>(
        column: C,
        value: V,
        reason: R,
    ) -> Self {
        Self::FieldParse {
            column: column.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
            value: None,
        }
    }

    /// Create a new configuration error with the invalid value.
    pub fn config_with_value<S: Into<String>, V: Into<String>>(message: S, value: V) -> Self {
        Self::Config {
            message: message.into(),
            value: Some(value.into()),
        }
    }

    /// Get error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::CollectionFailed { .. } => "collection",
            Self::SchemaMismatch { .. } => "schema",
            Self::MalformedOutput { .. } => "malformed",
            Self::FieldParse { .. } => "field",
            Self::Config { .. } => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ExporterConfig::new();

        assert_eq!(config.namespace, "nvsmi");
        assert_eq!(config.command, "nvidia-smi");
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.interval(), Duration::from_secs(15));
        assert_eq!(config.output, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ExporterConfig::new()
            .with_namespace("gpu")
            .with_command("/opt/bin/nvidia-smi")
            .with_timeout(Duration::from_millis(2500))
            .with_interval(Duration::from_secs(60))
            .with_output("/tmp/gpu.prom");

        assert_eq!(config.namespace, "gpu");
        assert_eq!(config.command, "/opt/bin/nvidia-smi");
        assert_eq!(config.timeout_ms, 2500);
        assert_eq!(config.interval_ms, 60_000);
        assert_eq!(config.output, Some(PathBuf::from("/tmp/gpu.prom")));
    }

    #[test]
    fn test_config_validation() {
        let err = ExporterConfig::new().with_namespace("gpu-metrics").validate();
        assert!(matches!(err, Err(ExporterError::Config { .. })));

        let err = ExporterConfig::new().with_namespace("").validate();
        assert!(matches!(err, Err(ExporterError::Config { .. })));

        let err = ExporterConfig::new().with_command("  ").validate();
        assert!(matches!(err, Err(ExporterError::Config { .. })));

        let err = ExporterConfig::new()
            .with_timeout(Duration::from_millis(50))
            .validate();
        assert!(matches!(err, Err(ExporterError::Config { .. })));

        let err = ExporterConfig::new()
            .with_interval(Duration::from_millis(99))
            .validate();
        assert!(matches!(err, Err(ExporterError::Config { .. })));
    }

    #[test]
    fn test_config_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");
        fs::write(&path, "(namespace: \"gpu\", timeout_ms: 5000)").unwrap();

        let config = ExporterConfig::load_from_file(&path).unwrap();
        assert_eq!(config.namespace, "gpu");
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.command, "nvidia-smi");
        assert_eq!(config.interval_ms, 15_000);
    }

    #[test]
    fn test_config_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");
        fs::write(&path, "(namespace: \"9gpu\")").unwrap();

        let err = ExporterConfig::load_from_file(&path).unwrap_err();
        assert_eq!(err.category(), "config");

        fs::write(&path, "(namespace: ").unwrap();
        let err = ExporterConfig::load_from_file(&path).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_config_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.ron");

        let config = ExporterConfig::example_config();
        config.save_to_file(&path).unwrap();

        let reloaded = ExporterConfig::load_from_file(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_write_textfile_replaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvsmi.prom");
        fs::write(&path, "stale\n").unwrap();

        write_textfile(&path, "# TYPE nvsmi_x gauge\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "# TYPE nvsmi_x gauge\n");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_textfile_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("nvsmi.prom");

        let err = write_textfile(&path, "x\n").unwrap_err();
        assert!(matches!(err, ExporterError::Io(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_error_messages() {
        let err = ExporterError::field_parse("fan.speed", "30%", "expected ' %' unit suffix");
        assert_eq!(
            err.to_string(),
            "Cannot parse column `fan.speed` value `30%`: expected ' %' unit suffix"
        );

        let err = ExporterError::schema_mismatch(3, "name", "gpu_name");
        assert_eq!(
            err.to_string(),
            "Schema mismatch at column 3: expected `name`, found `gpu_name`"
        );

        let err = ExporterError::malformed(4, "expected 22 fields, found 21");
        assert_eq!(err.category(), "malformed");
        assert!(err.to_string().contains("line 4"));

        let err = ExporterError::collection_failed("nvidia-smi exited with status 9");
        assert_eq!(err.category(), "collection");
    }
}
