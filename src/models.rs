//! Data models for the InsetChart analyzer.
//!
//! This module contains the structures flowing through extraction and
//! aggregation: the raw per-simulation output document, sweep tag values,
//! per-timestep rows and the aggregated year-month table.

use crate::calendar::YearMonth;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;

/// One named time series in a simulation's output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelSeries {
    /// Samples indexed by time step, starting at 0.
    #[serde(rename = "Data")]
    pub data: Vec<f64>,
}

/// The per-simulation `InsetChart.json` document.
///
/// Only the `Channels` mapping is read; headers and units are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsetChart {
    #[serde(rename = "Channels")]
    pub channels: HashMap<String, ChannelSeries>,
}

impl InsetChart {
    pub fn channel(&self, name: &str) -> Option<&ChannelSeries> {
        self.channels.get(name)
    }
}

/// A sweep tag value attached to a simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl TagValue {
    /// Convert a JSON value from simulation metadata. `null` means no value.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::Null => None,
            Value::Bool(b) => Some(TagValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(TagValue::Int(i)),
                None => n.as_f64().map(TagValue::Float),
            },
            Value::String(s) => Some(TagValue::Text(s.clone())),
            other => Some(TagValue::Text(other.to_string())),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TagValue::Bool(_) => 0,
            TagValue::Int(_) | TagValue::Float(_) => 1,
            TagValue::Text(_) => 2,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(b) => write!(f, "{}", b),
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Float(x) => write!(f, "{}", x),
            TagValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Text(value.to_string())
    }
}

// Total order so tag values can key a BTreeMap. Integers and floats
// compare numerically with each other.
impl Ord for TagValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (TagValue::Bool(a), TagValue::Bool(b)) => a.cmp(b),
            (TagValue::Int(a), TagValue::Int(b)) => a.cmp(b),
            (TagValue::Int(a), TagValue::Float(b)) => (*a as f64).total_cmp(b),
            (TagValue::Float(a), TagValue::Int(b)) => a.total_cmp(&(*b as f64)),
            (TagValue::Float(a), TagValue::Float(b)) => a.total_cmp(b),
            (TagValue::Text(a), TagValue::Text(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for TagValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TagValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TagValue {}

/// Output document and tags of one simulation, as handed to the extractor.
#[derive(Debug, Clone)]
pub struct SimulationRecord {
    /// Simulation identity assigned by the experiment framework.
    pub id: String,
    pub document: InsetChart,
    pub tags: BTreeMap<String, TagValue>,
}

/// One row per (simulation, time step).
#[derive(Debug, Clone, PartialEq)]
pub struct TimestepRow {
    /// Time step index.
    pub time: u32,
    /// Day of the model year, in `1..=365`.
    pub day: u32,
    pub year: i32,
    pub date: NaiveDate,
    /// Channel values, aligned with the owning table's channel names.
    pub values: Vec<f64>,
    /// Tag values, aligned with the owning table's tag names.
    pub tags: Vec<Option<TagValue>>,
}

/// Extraction result for one simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationTable {
    pub simulation: String,
    pub channels: Vec<String>,
    pub tags: Vec<String>,
    pub rows: Vec<TimestepRow>,
}

/// Contiguous block of combined rows that came from one simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub simulation: String,
    pub rows: Range<usize>,
}

/// All simulation tables of an experiment, concatenated.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedTable {
    pub channels: Vec<String>,
    pub tags: Vec<String>,
    pub rows: Vec<TimestepRow>,
    pub segments: Vec<Segment>,
}

impl CombinedTable {
    /// Index of a channel column by name.
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c == name)
    }

    /// Rows grouped back by the simulation they came from.
    pub fn partition_by_simulation(&self) -> BTreeMap<&str, &[TimestepRow]> {
        self.segments
            .iter()
            .map(|s| (s.simulation.as_str(), &self.rows[s.rows.clone()]))
            .collect()
    }
}

/// One row per (year-month bucket, tag combination).
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRow {
    pub bucket: YearMonth,
    pub tags: Vec<TagValue>,
    /// Aligned with [`YearMonthTable::sum_columns`].
    pub sums: Vec<f64>,
    /// Aligned with [`YearMonthTable::mean_columns`].
    pub means: Vec<f64>,
}

/// The year-month aggregate of an experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct YearMonthTable {
    pub tags: Vec<String>,
    pub sum_columns: Vec<String>,
    pub mean_columns: Vec<String>,
    pub rows: Vec<AggregatedRow>,
}

#[cfg(test)]
impl YearMonthTable {
    /// Find the row for a bucket and tag combination.
    pub fn row(&self, bucket: YearMonth, tags: &[TagValue]) -> Option<&AggregatedRow> {
        self.rows
            .iter()
            .find(|r| r.bucket == bucket && r.tags.as_slice() == tags)
    }

    /// Value of a sum or mean column in a row.
    pub fn value(&self, row: &AggregatedRow, column: &str) -> Option<f64> {
        if let Some(i) = self.sum_columns.iter().position(|c| c == column) {
            return row.sums.get(i).copied();
        }
        self.mean_columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| row.means.get(i).copied())
    }
}
