//! NVIDIA GPU collection by running nvidia-smi.

use crate::schema::query_fields;
use log::debug;
use nvsmi_prom_core::{Collector, ExporterConfig, ExporterError};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// One bounded invocation of the diagnostic command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmiCommand {
    program: String,
    timeout: Duration,
}

impl SmiCommand {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Arguments selecting the fixed column schema in CSV form.
    pub fn args() -> [String; 2] {
        [
            format!("--query-gpu={}", query_fields()),
            "--format=csv".to_owned(),
        ]
    }

    /// Run the query and return its standard output.
    ///
    /// A missing binary, a non-zero exit, a timeout, non-UTF-8 output or an
    /// empty output are all collection failures; the output of a failed run
    /// is never handed on.
    pub async fn query(&self) -> Result<String, ExporterError> {
        self.run(&Self::args()).await
    }

    /// Run the program with `args` under the configured timeout.
    pub async fn run(&self, args: &[String]) -> Result<String, ExporterError> {
        debug!("Running {} {}", self.program, args.join(" "));

        let mut command = Command::new(&self.program);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExporterError::collection_failed_with_source(
                    format!("{} command not found. Please install NVIDIA drivers.", self.program),
                    e,
                ));
            }
            Ok(Err(e)) => {
                return Err(ExporterError::collection_failed_with_source(
                    format!("Failed to run {}", self.program),
                    e,
                ));
            }
            Err(_) => {
                return Err(ExporterError::collection_failed(format!(
                    "{} did not finish within {:?}",
                    self.program, self.timeout
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(ExporterError::collection_failed(format!(
                "{} failed ({}): {}",
                self.program,
                output.status,
                detail.trim()
            )));
        }

        let stdout = String::from_utf8(output.stdout).map_err(|e| {
            ExporterError::collection_failed_with_source(
                format!("Invalid UTF-8 in {} output", self.program),
                e,
            )
        })?;

        if stdout.trim().is_empty() {
            return Err(ExporterError::collection_failed(format!(
                "{} produced no output",
                self.program
            )));
        }

        Ok(stdout)
    }
}

/// Collector exporting the fixed nvidia-smi column schema.
#[derive(Debug)]
pub struct NvidiaGpuCollector {
    name: String,
    config: ExporterConfig,
    smi: SmiCommand,
}

impl NvidiaGpuCollector {
    /// Create a collector from a validated configuration.
    pub fn new(config: ExporterConfig) -> Result<Self, ExporterError> {
        config.validate()?;

        Ok(Self {
            name: "nvidia-gpu".to_owned(),
            smi: SmiCommand::new(config.command.clone(), config.timeout()),
            config,
        })
    }

    /// Create a collector with the default configuration.
    pub fn with_defaults() -> Result<Self, ExporterError> {
        Self::new(ExporterConfig::default())
    }

    /// Run nvidia-smi and return the normalized device snapshots.
    pub async fn snapshots(&self) -> Result<Vec<crate::DeviceSnapshot>, ExporterError> {
        let output = self.smi.query().await?;
        crate::snapshots(&output)
    }
}

impl Collector for NvidiaGpuCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<String, ExporterError> {
        let output = self.smi.query().await?;
        crate::export(&output, &self.config.namespace)
    }

    async fn check_availability(&self) -> Result<(), ExporterError> {
        self.smi.run(&["--list-gpus".to_owned()]).await?;
        self.collect().await.map(|_| ())
    }

    fn config(&self) -> &ExporterConfig {
        &self.config
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::tests::{HEADER, ROW};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// Install an executable stand-in for nvidia-smi and point a config at it.
    fn fake_smi(dir: &Path, script: &str) -> ExporterConfig {
        let path = dir.join("nvidia-smi");
        fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        ExporterConfig::default().with_command(path.to_string_lossy().into_owned())
    }

    fn sh(script: &str) -> (SmiCommand, Vec<String>) {
        (
            SmiCommand::new("sh", Duration::from_secs(5)),
            vec!["-c".to_owned(), script.to_owned()],
        )
    }

    #[test]
    fn test_args_follow_schema() {
        let [query, format] = SmiCommand::args();
        assert!(query.starts_with("--query-gpu=driver_version,serial,uuid,name,index,"));
        assert_eq!(format, "--format=csv");
    }

    #[tokio::test]
    async fn test_run_returns_stdout() {
        let (smi, args) = sh("printf 'index\\n0\\n'");
        assert_eq!(smi.run(&args).await.unwrap(), "index\n0\n");
    }

    #[tokio::test]
    async fn test_missing_command() {
        let smi = SmiCommand::new("nvsmi-prom-does-not-exist", Duration::from_secs(1));
        let err = smi.query().await.unwrap_err();
        assert!(matches!(err, ExporterError::CollectionFailed { .. }));
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let (smi, args) = sh("echo partial; echo 'No devices were found' >&2; exit 6");
        let err = smi.run(&args).await.unwrap_err();

        assert!(matches!(err, ExporterError::CollectionFailed { .. }));
        assert!(err.to_string().contains("No devices were found"));
    }

    #[tokio::test]
    async fn test_empty_output() {
        let (smi, args) = sh("true");
        let err = smi.run(&args).await.unwrap_err();
        assert!(err.to_string().contains("produced no output"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let smi = SmiCommand::new("sh", Duration::from_millis(100));
        let args = vec!["-c".to_owned(), "echo header; sleep 5".to_owned()];

        let err = smi.run(&args).await.unwrap_err();
        assert!(matches!(err, ExporterError::CollectionFailed { .. }));
        assert!(err.to_string().contains("did not finish"));
    }

    #[tokio::test]
    async fn test_collect_renders_command_output() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("query.csv");
        fs::write(&data, format!("{}\n{}\n", HEADER, ROW)).unwrap();

        let config = fake_smi(dir.path(), &format!("exec cat '{}'", data.display()));
        let collector = NvidiaGpuCollector::new(config.with_namespace("gpu")).unwrap();

        let document = collector.collect().await.unwrap();
        let expected = crate::export(&fs::read_to_string(&data).unwrap(), "gpu").unwrap();
        assert_eq!(document, expected);
        assert!(document.contains(
            "gpu_memory_used_mebibytes{uuid=\"GPU-60c-73-d2-85-67bb\",index=\"0\"} 8142\n"
        ));

        let snapshots = collector.snapshots().await.unwrap();
        assert_eq!(snapshots.len(), 1);
    }

    #[tokio::test]
    async fn test_collect_receives_query_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_smi(
            dir.path(),
            "[ \"$2\" = --format=csv ] || exit 2; echo \"$1\" >&2; exit 9",
        );
        let collector = NvidiaGpuCollector::new(config).unwrap();

        let err = collector.collect().await.unwrap_err();
        assert!(matches!(err, ExporterError::CollectionFailed { .. }));
        assert!(err.to_string().contains(&format!("--query-gpu={}", query_fields())));
    }

    #[tokio::test]
    async fn test_collect_rejects_output_of_failed_run() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            "echo '{}'; echo 'Unable to determine the device handle' >&2; exit 15",
            HEADER
        );
        let config = fake_smi(dir.path(), &script);
        let collector = NvidiaGpuCollector::new(config).unwrap();

        let err = collector.collect().await.unwrap_err();
        assert!(matches!(err, ExporterError::CollectionFailed { .. }));
        assert!(collector.check_availability().await.is_err());
    }

    #[test]
    fn test_collector_rejects_invalid_config() {
        let config = ExporterConfig::default().with_namespace("nv smi");
        assert!(NvidiaGpuCollector::new(config).is_err());

        let collector = NvidiaGpuCollector::with_defaults().unwrap();
        assert_eq!(collector.name(), "nvidia-gpu");
        assert_eq!(collector.config().command, "nvidia-smi");
    }
}
