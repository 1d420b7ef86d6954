//! Mapping device snapshots onto metric families.

use crate::normalize::DeviceSnapshot;
use crate::schema::{ColumnSpec, Role, INFO_METRIC};
use nvsmi_prom_core::exposition::{metric_name, render_document, MetricFamily, SampleValue};
use nvsmi_prom_core::ExporterError;

const INFO_HELP: &str = "Static information about the GPU, value is always 1";

/// Build the families for one collection cycle.
///
/// Family order is the info family followed by one family per `Sample`
/// column in table order; sample order within a family is device order.
/// A device whose value is unavailable is left out of that family only.
pub fn families(
    columns: &[ColumnSpec],
    snapshots: &[DeviceSnapshot],
    namespace: &str,
) -> Result<Vec<MetricFamily>, ExporterError> {
    let mut info = MetricFamily::new(metric_name(namespace, INFO_METRIC, None)?, INFO_HELP)?;

    let mut samples = columns
        .iter()
        .filter(|column| column.role == Role::Sample)
        .map(|column| {
            let name = metric_name(namespace, column.metric, column.unit.metric_suffix())?;
            Ok::<_, ExporterError>((column, MetricFamily::new(name, column.help)?))
        })
        .collect::<Result<Vec<_>, _>>()?;

    for snapshot in snapshots {
        let labels = snapshot.labels(Role::Label);

        let mut info_labels = labels.clone();
        info_labels.extend(snapshot.labels(Role::Info));
        info.push(info_labels, SampleValue::Integer(1))?;

        for (column, family) in &mut samples {
            let Some(value) = snapshot.get(column.query) else {
                continue;
            };
            if !value.is_available() {
                continue;
            }

            let sample = value.sample_value().ok_or_else(|| {
                ExporterError::config_with_value("Sample column holds text", column.query)
            })?;
            family.push(labels.clone(), sample)?;
        }
    }

    let mut families = Vec::with_capacity(samples.len() + 1);
    families.push(info);
    families.extend(samples.into_iter().map(|(_, family)| family));
    Ok(families)
}

/// Render the complete exposition document.
pub fn render(
    columns: &[ColumnSpec],
    snapshots: &[DeviceSnapshot],
    namespace: &str,
) -> Result<String, ExporterError> {
    Ok(render_document(&families(columns, snapshots, namespace)?))
}
