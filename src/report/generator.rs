//! CSV report generation.
//!
//! This module renders the daily and year-month tables as delimited text
//! and writes them into an experiment's working directory.

use crate::analysis::ReduceOutcome;
use crate::models::{CombinedTable, YearMonthTable};
use anyhow::{Context, Result};
use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Daily table location, relative to the working directory.
pub const DAILY_FILE: &str = "EMOD/InsetChart_daily.csv";

/// Year-month table location, relative to the working directory.
pub const YEARMON_FILE: &str = "InsetChart_yearmon.csv";

/// Files written for one experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenReport {
    pub daily: Option<PathBuf>,
    pub yearmon: PathBuf,
    pub yearmon_rows: usize,
}

/// Quote a field if it contains a delimiter, quote or line break.
fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

fn push_record<S: AsRef<str>>(output: &mut String, fields: &[S]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        output.push_str(&escape_field(field.as_ref()));
    }
    output.push('\n');
}

/// Missing numeric values render as empty fields.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

/// Render the unaggregated table: channels, calendar columns, then tags.
pub fn generate_daily_csv(table: &CombinedTable) -> String {
    let mut output = String::new();

    let mut header: Vec<&str> = table.channels.iter().map(String::as_str).collect();
    header.extend(["Time", "Day", "Year", "date"]);
    header.extend(table.tags.iter().map(String::as_str));
    push_record(&mut output, &header);

    for row in &table.rows {
        let mut fields: Vec<String> = row.values.iter().map(|v| format_value(*v)).collect();
        fields.push(row.time.to_string());
        fields.push(row.day.to_string());
        fields.push(row.year.to_string());
        fields.push(row.date.format("%Y-%m-%d").to_string());
        fields.extend(
            row.tags
                .iter()
                .map(|t| t.as_ref().map(ToString::to_string).unwrap_or_default()),
        );
        push_record(&mut output, &fields);
    }

    output
}

/// Render the year-month table: bucket, tags, sum columns, mean columns.
pub fn generate_yearmon_csv(table: &YearMonthTable) -> String {
    let mut output = String::new();

    let mut header: Vec<&str> = vec!["date"];
    header.extend(table.tags.iter().map(String::as_str));
    header.extend(table.sum_columns.iter().map(String::as_str));
    header.extend(table.mean_columns.iter().map(String::as_str));
    push_record(&mut output, &header);

    for row in &table.rows {
        let mut fields = vec![row.bucket.to_string()];
        fields.extend(row.tags.iter().map(ToString::to_string));
        fields.extend(row.sums.iter().map(|v| format_value(*v)));
        fields.extend(row.means.iter().map(|v| format_value(*v)));
        push_record(&mut output, &fields);
    }

    output
}

/// Write CSV content to a file, creating its parent directory.
pub fn write_csv(content: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(())
}

/// Write the outputs of a reduction into the working directory.
///
/// Returns `None` without touching the filesystem when there was no data.
pub fn write_outputs(working_dir: &Path, outcome: &ReduceOutcome) -> Result<Option<WrittenReport>> {
    let (daily, yearmon) = match outcome {
        ReduceOutcome::NoData => return Ok(None),
        ReduceOutcome::Reduced { daily, yearmon } => (daily, yearmon),
    };

    let daily_path = match daily {
        Some(table) => {
            let path = working_dir.join(DAILY_FILE);
            write_csv(&generate_daily_csv(table), &path)?;
            for (simulation, rows) in table.partition_by_simulation() {
                debug!("Daily rows for simulation {}: {}", simulation, rows.len());
            }
            info!("Daily table written to {}", path.display());
            Some(path)
        }
        None => None,
    };

    let yearmon_path = working_dir.join(YEARMON_FILE);
    write_csv(&generate_yearmon_csv(yearmon), &yearmon_path)?;
    info!("Year-month table written to {}", yearmon_path.display());

    Ok(Some(WrittenReport {
        daily: daily_path,
        yearmon: yearmon_path,
        yearmon_rows: yearmon.rows.len(),
    }))
}
