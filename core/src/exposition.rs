//! Prometheus text exposition format primitives.
//!
//! Only the subset the exporter needs: gauge families with HELP and TYPE
//! lines, labelled samples, name validation and escaping.

use crate::ExporterError;
use std::fmt;

/// Metric type declared for every family.
pub const GAUGE: &str = "gauge";

/// Check a metric name against `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Check a label name against `[a-zA-Z_][a-zA-Z0-9_]*`, excluding the
/// reserved `__` prefix.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Escape a label value: backslash, double quote and line feed.
pub fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Escape HELP text: backslash and line feed.
pub fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Compose `<namespace>_<base>[_<unit>]` and validate the result.
pub fn metric_name(
    namespace: &str,
    base: &str,
    unit: Option<&str>,
) -> Result<String, ExporterError> {
    let name = match unit {
        Some(unit) => format!("{}_{}_{}", namespace, base, unit),
        None => format!("{}_{}", namespace, base),
    };

    if is_valid_metric_name(&name) {
        Ok(name)
    } else {
        Err(ExporterError::config_with_value("Invalid metric name", name))
    }
}

/// A numeric sample value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    Integer(u64),
    Float(f64),
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) if value.is_nan() => f.write_str("NaN"),
            Self::Float(value) if value.is_infinite() => {
                f.write_str(if *value > 0.0 { "+Inf" } else { "-Inf" })
            }
            Self::Float(value) => write!(f, "{}", value),
        }
    }
}

/// One sample line: ordered label pairs plus the value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: Vec<(String, String)>,
    pub value: SampleValue,
}

/// A named gauge family and its samples, in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    name: String,
    help: String,
    samples: Vec<Sample>,
}

impl MetricFamily {
    /// Create an empty family.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `name` is not a valid metric name.
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Result<Self, ExporterError> {
        let name = name.into();
        if !is_valid_metric_name(&name) {
            return Err(ExporterError::config_with_value("Invalid metric name", name));
        }

        Ok(Self {
            name,
            help: help.into(),
            samples: Vec::new(),
        })
    }

    /// Append a sample.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a label name is invalid or repeated.
    pub fn push(
        &mut self,
        labels: Vec<(String, String)>,
        value: SampleValue,
    ) -> Result<(), ExporterError> {
        for (i, (label, _)) in labels.iter().enumerate() {
            if !is_valid_label_name(label) {
                return Err(ExporterError::config_with_value("Invalid label name", label.clone()));
            }
            if labels[..i].iter().any(|(other, _)| other == label) {
                return Err(ExporterError::config_with_value("Duplicate label name", label.clone()));
            }
        }

        self.samples.push(Sample { labels, value });
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Append HELP, TYPE and sample lines to `out`.
    pub fn render_into(&self, out: &mut String) {
        out.push_str(&format!("# HELP {} {}\n", self.name, escape_help(&self.help)));
        out.push_str(&format!("# TYPE {} {}\n", self.name, GAUGE));

        for sample in &self.samples {
            out.push_str(&self.name);
            if !sample.labels.is_empty() {
                let labels: Vec<String> = sample
                    .labels
                    .iter()
                    .map(|(name, value)| format!("{}=\"{}\"", name, escape_label_value(value)))
                    .collect();
                out.push('{');
                out.push_str(&labels.join(","));
                out.push('}');
            }
            out.push_str(&format!(" {}\n", sample.value));
        }
    }
}

/// Render families in order into one document.
pub fn render_document(families: &[MetricFamily]) -> String {
    let mut out = String::with_capacity(families.len() * 256);
    for family in families {
        family.render_into(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_metric_name_validation() {
        assert!(is_valid_metric_name("nvsmi_power_draw_watts"));
        assert!(is_valid_metric_name("_private"));
        assert!(is_valid_metric_name("job:rate5m"));

        assert!(!is_valid_metric_name(""));
        assert!(!is_valid_metric_name("0gpu"));
        assert!(!is_valid_metric_name("utilization.gpu"));
        assert!(!is_valid_metric_name("gpu-util"));
    }

    #[test]
    fn test_label_name_validation() {
        assert!(is_valid_label_name("uuid"));
        assert!(is_valid_label_name("driver_version"));

        assert!(!is_valid_label_name("__name__"));
        assert!(!is_valid_label_name("pci:bus"));
        assert!(!is_valid_label_name("1index"));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("Tesla M10"), "Tesla M10");
        assert_eq!(escape_label_value(r#"a"b"#), r#"a\"b"#);
        assert_eq!(escape_label_value(r"C:\gpu"), r"C:\\gpu");
        assert_eq!(escape_label_value("line\nbreak"), "line\\nbreak");
    }

    #[test]
    fn test_metric_name_composition() {
        assert_eq!(
            metric_name("nvsmi", "fan_speed", Some("percent")).unwrap(),
            "nvsmi_fan_speed_percent"
        );
        assert_eq!(metric_name("nvsmi", "pci_bus", None).unwrap(), "nvsmi_pci_bus");
        assert!(metric_name("nv-smi", "pci_bus", None).is_err());
    }

    #[test]
    fn test_sample_value_display() {
        assert_eq!(SampleValue::Integer(8142).to_string(), "8142");
        assert_eq!(SampleValue::Float(10.58).to_string(), "10.58");
        assert_eq!(SampleValue::Float(53.0).to_string(), "53");
        assert_eq!(SampleValue::Float(f64::INFINITY).to_string(), "+Inf");
        assert_eq!(SampleValue::Float(f64::NAN).to_string(), "NaN");
    }

    #[test]
    fn test_family_rendering() {
        let mut family = MetricFamily::new("nvsmi_gpu_info", "Static \\ GPU\ninformation").unwrap();
        family
            .push(labels(&[("index", "0"), ("name", "Tesla \"M10\"")]), SampleValue::Integer(1))
            .unwrap();
        family.push(Vec::new(), SampleValue::Float(0.5)).unwrap();

        let document = render_document(&[family]);
        assert_eq!(
            document,
            "# HELP nvsmi_gpu_info Static \\\\ GPU\\ninformation\n\
             # TYPE nvsmi_gpu_info gauge\n\
             nvsmi_gpu_info{index=\"0\",name=\"Tesla \\\"M10\\\"\"} 1\n\
             nvsmi_gpu_info 0.5\n"
        );
    }

    #[test]
    fn test_empty_family_keeps_declarations() {
        let family = MetricFamily::new("nvsmi_fan_speed_percent", "Fan speed").unwrap();
        assert_eq!(
            render_document(&[family]),
            "# HELP nvsmi_fan_speed_percent Fan speed\n# TYPE nvsmi_fan_speed_percent gauge\n"
        );
    }

    #[test]
    fn test_push_rejects_bad_labels() {
        let mut family = MetricFamily::new("nvsmi_pci_bus", "PCI bus").unwrap();

        let err = family.push(labels(&[("pci.bus", "1")]), SampleValue::Integer(1));
        assert!(err.is_err());

        let err = family.push(labels(&[("uuid", "a"), ("uuid", "b")]), SampleValue::Integer(1));
        assert!(err.is_err());
        assert!(family.samples().is_empty());
    }
}
