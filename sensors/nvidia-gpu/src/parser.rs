//! Splitting nvidia-smi CSV output into raw rows.

use crate::schema::ColumnSpec;
use log::debug;
use nvsmi_prom_core::ExporterError;

/// Field delimiter used by `--format=csv`.
pub const DELIMITER: char = ',';

/// Trimmed fields of one data line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// One-based line number in the command output
    pub line: usize,
    pub fields: Vec<String>,
}

/// Parse the full command output against `columns`.
///
/// The first non-empty line is the header and must name `columns` in order.
/// Every following non-empty line must have exactly as many fields. A single
/// bad row rejects the whole document.
pub fn parse(output: &str, columns: &[ColumnSpec]) -> Result<Vec<RawRow>, ExporterError> {
    let mut lines = output
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((_, header)) = lines.next() else {
        debug!("nvidia-smi output is empty, no devices");
        return Ok(Vec::new());
    };
    check_header(header, columns)?;

    let mut rows = Vec::new();
    for (line, text) in lines {
        let fields: Vec<String> = text
            .split(DELIMITER)
            .map(|field| field.trim().to_owned())
            .collect();

        if fields.len() != columns.len() {
            return Err(ExporterError::malformed(
                line,
                format!("expected {} fields, found {}", columns.len(), fields.len()),
            ));
        }

        rows.push(RawRow { line, fields });
    }

    debug!("Parsed {} device row(s)", rows.len());
    Ok(rows)
}

fn check_header(header: &str, columns: &[ColumnSpec]) -> Result<(), ExporterError> {
    let names: Vec<&str> = header.split(DELIMITER).map(header_name).collect();

    for (position, column) in columns.iter().enumerate() {
        match names.get(position) {
            Some(name) if *name == column.query => {}
            Some(name) => return Err(ExporterError::schema_mismatch(position, column.query, *name)),
            None => return Err(ExporterError::schema_mismatch(position, column.query, "<missing>")),
        }
    }

    if let Some(extra) = names.get(columns.len()) {
        return Err(ExporterError::schema_mismatch(columns.len(), "<end of header>", *extra));
    }

    Ok(())
}

/// Header cell without its unit annotation: `"memory.used [MiB]"` -> `"memory.used"`.
fn header_name(cell: &str) -> &str {
    let cell = cell.trim();
    match cell.rfind(" [") {
        Some(start) if cell.ends_with(']') => cell[..start].trim_end(),
        _ => cell,
    }
}
