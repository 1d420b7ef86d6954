//! NVIDIA GPU telemetry for the Prometheus textfile collector.
//!
//! This crate runs `nvidia-smi --query-gpu=... --format=csv`, parses its
//! output, normalizes units, placeholders and hex identifiers, and renders a
//! text exposition document.
//!
//! # Examples
//!
//! ```rust
//! let output = "index, fan.speed [%]\n";
//! // Header drift is reported instead of guessed around.
//! assert!(nvsmi_prom::export(output, "nvsmi").is_err());
//! ```

pub mod normalize;
pub mod nvidia_gpu;
pub mod parser;
pub mod render;
pub mod schema;

pub use normalize::{DeviceSnapshot, NormalizedValue};
pub use nvidia_gpu::{NvidiaGpuCollector, SmiCommand};
pub use parser::RawRow;
pub use schema::{ColumnSpec, COLUMNS};

use nvsmi_prom_core::ExporterError;
use schema::Role;
use std::collections::HashSet;

/// Parse and normalize nvidia-smi output into one snapshot per GPU.
///
/// Every GPU must be told apart by its `uuid` or `index` label: a repeated
/// value, or a second GPU reporting neither, rejects the whole output since
/// it would render duplicate series.
pub fn snapshots(output: &str) -> Result<Vec<DeviceSnapshot>, ExporterError> {
    let rows = parser::parse(output, COLUMNS)?;
    let mut snapshots = Vec::with_capacity(rows.len());
    let mut seen = HashSet::new();
    let mut anonymous = false;

    for row in &rows {
        let snapshot = normalize::normalize_row(row, COLUMNS)?;
        let identity = snapshot.labels(Role::Label);

        if identity.is_empty() {
            if anonymous {
                return Err(ExporterError::malformed(
                    row.line,
                    "more than one GPU without uuid or index",
                ));
            }
            anonymous = true;
        }

        for (label, value) in identity {
            if !seen.insert((label.clone(), value.clone())) {
                return Err(ExporterError::malformed(
                    row.line,
                    format!("duplicate GPU {}={}", label, value),
                ));
            }
        }

        snapshots.push(snapshot);
    }

    Ok(snapshots)
}

/// Run the whole pipeline on nvidia-smi output.
///
/// Either the complete document is returned or nothing is.
pub fn export(output: &str, namespace: &str) -> Result<String, ExporterError> {
    render::render(COLUMNS, &snapshots(output)?, namespace)
}
