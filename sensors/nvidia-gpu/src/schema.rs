//! Static column schema for `nvidia-smi --query-gpu`.
//!
//! The table below is the single source for the query field list, the header
//! check and the metric mapping. Changing the query means changing this table.
//!
//! Driver version, serial and product name are `Info` columns: they label the
//! single `gpu_info` series rather than every sample, so the per-GPU series
//! stay keyed on `uuid` and `index` alone and can be joined with `gpu_info`.

/// How a raw field is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Passed through verbatim.
    Text,
    /// Unsigned decimal integer.
    Integer,
    /// Decimal floating point.
    Float,
    /// `0x`-prefixed unsigned hexadecimal.
    Hex,
}

/// Unit suffix nvidia-smi appends to a value, separated by one space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    None,
    Percent,
    MiB,
    Watts,
    /// Temperatures are printed without a suffix.
    Celsius,
}

impl Unit {
    /// Token printed after the value, if any.
    pub fn token(self) -> Option<&'static str> {
        match self {
            Self::Percent => Some("%"),
            Self::MiB => Some("MiB"),
            Self::Watts => Some("W"),
            Self::None | Self::Celsius => None,
        }
    }

    /// Suffix appended to the metric name, if any.
    pub fn metric_suffix(self) -> Option<&'static str> {
        match self {
            Self::Percent => Some("percent"),
            Self::MiB => Some("mebibytes"),
            Self::Watts => Some("watts"),
            Self::Celsius => Some("celsius"),
            Self::None => None,
        }
    }
}

/// What a column contributes to the rendered document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Identifying label attached to every sample.
    Label,
    /// Descriptive label attached only to the `gpu_info` family.
    Info,
    /// One gauge family per column.
    Sample,
}

/// One column of the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    /// nvidia-smi query field name
    pub query: &'static str,
    /// Metric base name for samples, label name for labels
    pub metric: &'static str,
    pub kind: FieldKind,
    pub unit: Unit,
    pub role: Role,
    /// HELP text
    pub help: &'static str,
}

const fn column(
    query: &'static str,
    metric: &'static str,
    kind: FieldKind,
    unit: Unit,
    role: Role,
    help: &'static str,
) -> ColumnSpec {
    ColumnSpec {
        query,
        metric,
        kind,
        unit,
        role,
        help,
    }
}

use FieldKind::{Float, Hex, Integer, Text};
use Role::{Info, Label, Sample};

/// Columns in query order.
#[rustfmt::skip]
pub const COLUMNS: &[ColumnSpec] = &[
    column("driver_version", "driver_version", Text, Unit::None, Info, "NVIDIA display driver version"),
    column("serial", "serial", Text, Unit::None, Info, "Serial number physically printed on the board"),
    column("uuid", "uuid", Text, Unit::None, Label, "Globally unique immutable identifier of the GPU"),
    column("name", "name", Text, Unit::None, Info, "Official product name of the GPU"),
    column("index", "index", Integer, Unit::None, Label, "Zero-based index of the GPU"),
    column("utilization.gpu", "utilization_gpu", Integer, Unit::Percent, Sample, "Percent of time the GPU was busy"),
    column("utilization.memory", "utilization_memory", Integer, Unit::Percent, Sample, "Percent of time GPU memory was read or written"),
    column("memory.total", "memory_total", Integer, Unit::MiB, Sample, "Total installed GPU memory in MiB"),
    column("memory.free", "memory_free", Integer, Unit::MiB, Sample, "Free GPU memory in MiB"),
    column("memory.used", "memory_used", Integer, Unit::MiB, Sample, "GPU memory allocated by active contexts in MiB"),
    column("temperature.gpu", "temperature_gpu", Integer, Unit::Celsius, Sample, "Core GPU temperature in degrees Celsius"),
    column("fan.speed", "fan_speed", Integer, Unit::Percent, Sample, "Intended (not measured) fan speed in percent"),
    column("power.draw", "power_draw", Float, Unit::Watts, Sample, "Power draw of the entire board in watts"),
    column("power.limit", "power_limit", Float, Unit::Watts, Sample, "Software power limit in watts"),
    column("pci.domain", "pci_domain", Hex, Unit::None, Sample, "PCI domain number"),
    column("pci.bus", "pci_bus", Hex, Unit::None, Sample, "PCI bus number"),
    column("pci.device", "pci_device", Hex, Unit::None, Sample, "PCI device number"),
    column("pci.device_id", "pci_device_id", Hex, Unit::None, Sample, "PCI vendor and device id"),
    column("pcie.link.gen.current", "pcie_link_gen_current", Integer, Unit::None, Sample, "Current PCIe link generation"),
    column("pcie.link.gen.max", "pcie_link_gen_max", Integer, Unit::None, Sample, "Maximum PCIe link generation supported by the GPU and system"),
    column("pcie.link.width.current", "pcie_link_width_current", Integer, Unit::None, Sample, "Current PCIe link width"),
    column("pcie.link.width.max", "pcie_link_width_max", Integer, Unit::None, Sample, "Maximum PCIe link width supported by the GPU and system"),
];

/// Base name of the info family that carries the `Info` columns.
pub const INFO_METRIC: &str = "gpu_info";

/// Value for `--query-gpu=`.
pub fn query_fields() -> String {
    COLUMNS
        .iter()
        .map(|column| column.query)
        .collect::<Vec<_>>()
        .join(",")
}

/// Look up a column by query name.
pub fn column_by_query(query: &str) -> Option<(usize, &'static ColumnSpec)> {
    COLUMNS
        .iter()
        .enumerate()
        .find(|(_, column)| column.query == query)
}
