//! Channel extraction for a single simulation.
//!
//! Turns one `InsetChart.json` document into a per-timestep table with
//! calendar columns and the simulation's sweep tags.

use crate::calendar;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::models::{SimulationRecord, SimulationTable, TagValue, TimestepRow};
use std::collections::BTreeMap;
use tracing::debug;

/// Tag whose absence defaults to `0`.
pub const RUN_NUMBER_TAG: &str = "Run_Number";

/// Default tag value table: `Run_Number → 0`.
pub fn default_tag_defaults() -> BTreeMap<String, TagValue> {
    let mut defaults = BTreeMap::new();
    defaults.insert(RUN_NUMBER_TAG.to_string(), TagValue::Int(0));
    defaults
}

/// Configuration for the extractor.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Channels to pull from each document, in output column order.
    pub channels: Vec<String>,
    /// Sweep tags to attach to each row.
    pub tags: Vec<String>,
    /// Calendar year of time step 1.
    pub start_year: i32,
    /// Values used for tags a simulation does not carry.
    pub tag_defaults: BTreeMap<String, TagValue>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            channels: crate::config::default_channels(),
            tags: vec![RUN_NUMBER_TAG.to_string()],
            start_year: 2022,
            tag_defaults: default_tag_defaults(),
        }
    }
}

/// Extracts channel tables from simulation output documents.
#[derive(Debug, Clone)]
pub struct ChannelExtractor {
    config: ExtractorConfig,
}

impl ChannelExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Extract one row per time step from a simulation record.
    ///
    /// Fails without returning any rows if a requested channel is missing
    /// or the channels disagree on length.
    pub fn extract(&self, record: &SimulationRecord) -> AnalyzerResult<SimulationTable> {
        let mut series = Vec::with_capacity(self.config.channels.len());
        for name in &self.config.channels {
            let channel =
                record
                    .document
                    .channel(name)
                    .ok_or_else(|| AnalyzerError::MissingChannel {
                        channel: name.clone(),
                        simulation: record.id.clone(),
                    })?;
            series.push((name, &channel.data));
        }

        let length = series.first().map(|(_, data)| data.len()).unwrap_or(0);
        if let Some((name, data)) = series.iter().find(|(_, data)| data.len() != length) {
            return Err(AnalyzerError::RaggedChannels {
                channel: (*name).clone(),
                simulation: record.id.clone(),
                expected: length,
                actual: data.len(),
            });
        }

        let tags = self.resolve_tags(record);

        let mut rows = Vec::with_capacity(length);
        for index in 0..length {
            let step = index as u32;
            let derived = calendar::derive(step, self.config.start_year).ok_or(
                AnalyzerError::DateOutOfRange {
                    step,
                    start_year: self.config.start_year,
                },
            )?;

            rows.push(TimestepRow {
                time: step,
                day: derived.day,
                year: derived.year,
                date: derived.date,
                values: series.iter().map(|(_, data)| data[index]).collect(),
                tags: tags.clone(),
            });
        }

        debug!(
            "Extracted {} steps x {} channels from simulation {}",
            rows.len(),
            series.len(),
            record.id
        );

        Ok(SimulationTable {
            simulation: record.id.clone(),
            channels: self.config.channels.clone(),
            tags: self.config.tags.clone(),
            rows,
        })
    }

    /// Tag values for a simulation: its own value, else the default table,
    /// else absent.
    fn resolve_tags(&self, record: &SimulationRecord) -> Vec<Option<TagValue>> {
        self.config
            .tags
            .iter()
            .map(|name| {
                record
                    .tags
                    .get(name)
                    .or_else(|| self.config.tag_defaults.get(name))
                    .cloned()
            })
            .collect()
    }
}
