//! Experiment-level aggregation.
//!
//! This module concatenates the per-simulation tables of an experiment and
//! reduces them to one row per year-month bucket and sweep-tag combination,
//! summing count-like channels and averaging rate-like channels.

use crate::calendar::YearMonth;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::models::{
    AggregatedRow, CombinedTable, Segment, SimulationTable, TagValue, TimestepRow, YearMonthTable,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// How a channel is reduced within a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationKind {
    /// Count-like channels (events per day).
    Sum,
    /// Rate- or prevalence-like channels.
    Mean,
}

/// Static reduction tables: column renames and per-channel aggregation kind.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationPlan {
    /// `(source name, canonical name)` pairs applied after concatenation.
    pub renames: Vec<(String, String)>,
    /// Channels reduced into the year-month table, in output order.
    pub kinds: Vec<(String, AggregationKind)>,
}

const RENAMES: &[(&str, &str)] = &[
    ("Daily Bites per Human", "Bites per Human"),
    ("Daily EIR", "EIR"),
];

const SUM_CHANNELS: &[&str] = &[
    "Births",
    "Disease Deaths",
    "New Infections",
    "Newly Symptomatic",
    "New Clinical Cases",
    "New Severe Cases",
    "Infectious Vectors",
    "EIR",
];

const MEAN_CHANNELS: &[&str] = &[
    "Statistical Population",
    "Fever Prevalence",
    "True Prevalence",
    "PCR Gametocyte Prevalence",
    "PCR Parasite Prevalence",
    "Blood Smear Parasite Prevalence",
    "PfHRP2 Prevalence",
];

impl Default for AggregationPlan {
    fn default() -> Self {
        let kinds = SUM_CHANNELS
            .iter()
            .map(|c| (c.to_string(), AggregationKind::Sum))
            .chain(
                MEAN_CHANNELS
                    .iter()
                    .map(|c| (c.to_string(), AggregationKind::Mean)),
            )
            .collect();

        Self {
            renames: RENAMES
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            kinds,
        }
    }
}

impl AggregationPlan {
    /// Canonical column name for a channel.
    pub fn canonical_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.renames
            .iter()
            .find(|(from, _)| from == name)
            .map(|(_, to)| to.as_str())
            .unwrap_or(name)
    }

    /// Channels of one aggregation kind, in table order.
    pub fn columns(&self, kind: AggregationKind) -> Vec<String> {
        self.kinds
            .iter()
            .filter(|(_, k)| *k == kind)
            .map(|(c, _)| c.clone())
            .collect()
    }
}

/// Result of a reduction.
#[derive(Debug, Clone, PartialEq)]
pub enum ReduceOutcome {
    /// No simulation returned data; nothing to write.
    NoData,
    Reduced {
        /// Unaggregated rows, present when daily output was requested.
        daily: Option<CombinedTable>,
        yearmon: YearMonthTable,
    },
}

type GroupKey = (YearMonth, Vec<TagValue>);

/// Reduces simulation tables into the year-month table.
#[derive(Debug, Clone)]
pub struct Aggregator {
    plan: AggregationPlan,
    tags: Vec<String>,
    daily: bool,
}

impl Aggregator {
    pub fn new(plan: AggregationPlan, tags: Vec<String>, daily: bool) -> Self {
        Self { plan, tags, daily }
    }

    /// Reduce all simulation tables of an experiment.
    ///
    /// Nothing is returned for writing unless every step succeeds.
    pub fn reduce(&self, tables: Vec<SimulationTable>) -> AnalyzerResult<ReduceOutcome> {
        if tables.is_empty() {
            info!("No data have been returned; nothing to aggregate");
            return Ok(ReduceOutcome::NoData);
        }

        let mut combined = concatenate(&tables);
        drop(tables);
        for channel in combined.channels.iter_mut() {
            let canonical = self.plan.canonical_name(channel).to_string();
            if canonical != *channel {
                debug!("Renaming column '{}' to '{}'", channel, canonical);
                *channel = canonical;
            }
        }

        let sum_columns = self.plan.columns(AggregationKind::Sum);
        let mean_columns = self.plan.columns(AggregationKind::Mean);
        let sum_index = resolve_columns(&combined, &sum_columns)?;
        let mean_index = resolve_columns(&combined, &mean_columns)?;
        let tag_index = self.resolve_tags(&combined)?;

        let mut skipped = 0usize;
        let keyed: Vec<(GroupKey, &TimestepRow)> = combined
            .rows
            .iter()
            .filter_map(|row| {
                let key = group_key(row, &tag_index);
                if key.is_none() {
                    skipped += 1;
                }
                key.map(|k| (k, row))
            })
            .collect();

        if skipped > 0 {
            warn!(
                "{} rows lack a value for one of the tags {:?} and were left out of the aggregate",
                skipped, self.tags
            );
        }

        let sums = partition(&keyed, &sum_index, AggregationKind::Sum);
        let means = partition(&keyed, &mean_index, AggregationKind::Mean);

        let rows: Vec<AggregatedRow> = sums
            .into_iter()
            .filter_map(|(key, sums)| {
                means.get(&key).map(|means| AggregatedRow {
                    bucket: key.0,
                    tags: key.1,
                    sums,
                    means: means.clone(),
                })
            })
            .collect();

        info!(
            "Aggregated {} rows from {} simulations into {} year-month rows",
            combined.rows.len(),
            combined.segments.len(),
            rows.len()
        );

        let yearmon = YearMonthTable {
            tags: self.tags.clone(),
            sum_columns,
            mean_columns,
            rows,
        };

        Ok(ReduceOutcome::Reduced {
            daily: self.daily.then_some(combined),
            yearmon,
        })
    }

    /// Position of every grouping tag in the combined table. A tag with no
    /// value in any row counts as a missing column.
    fn resolve_tags(&self, combined: &CombinedTable) -> AnalyzerResult<Vec<usize>> {
        self.tags
            .iter()
            .map(|tag| {
                combined
                    .tags
                    .iter()
                    .position(|t| t == tag)
                    .filter(|&i| combined.rows.iter().any(|r| r.tags[i].is_some()))
                    .ok_or_else(|| AnalyzerError::MissingColumn {
                        column: tag.clone(),
                    })
            })
            .collect()
    }
}

/// Concatenate simulation tables.
///
/// Channel and tag columns are the union across tables in first-seen order;
/// values a table does not carry become NaN (channels) or absent (tags).
pub fn concatenate(tables: &[SimulationTable]) -> CombinedTable {
    let mut channels: Vec<String> = Vec::new();
    let mut tags: Vec<String> = Vec::new();
    for table in tables {
        for c in &table.channels {
            if !channels.contains(c) {
                channels.push(c.clone());
            }
        }
        for t in &table.tags {
            if !tags.contains(t) {
                tags.push(t.clone());
            }
        }
    }

    let mut rows = Vec::with_capacity(tables.iter().map(|t| t.rows.len()).sum());
    let mut segments = Vec::with_capacity(tables.len());

    for table in tables {
        let channel_map: Vec<Option<usize>> = channels
            .iter()
            .map(|c| table.channels.iter().position(|tc| tc == c))
            .collect();
        let tag_map: Vec<Option<usize>> = tags
            .iter()
            .map(|t| table.tags.iter().position(|tt| tt == t))
            .collect();

        let start = rows.len();
        for row in &table.rows {
            rows.push(TimestepRow {
                values: channel_map
                    .iter()
                    .map(|i| i.map(|i| row.values[i]).unwrap_or(f64::NAN))
                    .collect(),
                tags: tag_map
                    .iter()
                    .map(|i| i.and_then(|i| row.tags[i].clone()))
                    .collect(),
                ..row.clone()
            });
        }
        segments.push(Segment {
            simulation: table.simulation.clone(),
            rows: start..rows.len(),
        });
    }

    CombinedTable {
        channels,
        tags,
        rows,
        segments,
    }
}

fn resolve_columns(combined: &CombinedTable, columns: &[String]) -> AnalyzerResult<Vec<usize>> {
    columns
        .iter()
        .map(|c| {
            combined
                .channel_index(c)
                .ok_or_else(|| AnalyzerError::MissingColumn { column: c.clone() })
        })
        .collect()
}

fn group_key(row: &TimestepRow, tag_index: &[usize]) -> Option<GroupKey> {
    let tags: Option<Vec<TagValue>> = tag_index.iter().map(|&i| row.tags[i].clone()).collect();
    tags.map(|tags| (YearMonth::from_date(row.date), tags))
}

/// Reduce the given columns within each group. NaN samples are skipped; a
/// mean over no samples is NaN, a sum over no samples is 0.
fn partition(
    keyed: &[(GroupKey, &TimestepRow)],
    columns: &[usize],
    kind: AggregationKind,
) -> BTreeMap<GroupKey, Vec<f64>> {
    let mut acc: BTreeMap<GroupKey, (Vec<f64>, Vec<usize>)> = BTreeMap::new();

    for (key, row) in keyed {
        let (totals, counts) = acc
            .entry(key.clone())
            .or_insert_with(|| (vec![0.0; columns.len()], vec![0; columns.len()]));

        for (slot, &col) in columns.iter().enumerate() {
            let value = row.values[col];
            if !value.is_nan() {
                totals[slot] += value;
                counts[slot] += 1;
            }
        }
    }

    acc.into_iter()
        .map(|(key, (totals, counts))| {
            let values = match kind {
                AggregationKind::Sum => totals,
                AggregationKind::Mean => totals
                    .iter()
                    .zip(&counts)
                    .map(|(total, &n)| if n == 0 { f64::NAN } else { total / n as f64 })
                    .collect(),
            };
            (key, values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::extractor::{default_tag_defaults, ChannelExtractor, ExtractorConfig};
    use crate::config::default_channels;
    use crate::models::{ChannelSeries, InsetChart, SimulationRecord};

    const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

    fn constant_record(id: &str, run: Option<i64>, steps: usize) -> SimulationRecord {
        let mut document = InsetChart::default();
        for name in default_channels() {
            let value = match name.as_str() {
                "Births" => 10.0,
                "Statistical Population" => 1000.0,
                "Daily EIR" => 0.5,
                _ => 0.25,
            };
            document
                .channels
                .insert(name, ChannelSeries { data: vec![value; steps] });
        }
        SimulationRecord {
            id: id.to_string(),
            document,
            tags: run
                .map(|r| ("Run_Number".to_string(), TagValue::Int(r)))
                .into_iter()
                .collect(),
        }
    }

    fn extract(records: &[SimulationRecord], tags: &[&str], start_year: i32) -> Vec<SimulationTable> {
        let ex = ChannelExtractor::new(ExtractorConfig {
            channels: default_channels(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            start_year,
            tag_defaults: default_tag_defaults(),
        });
        records.iter().map(|r| ex.extract(r).unwrap()).collect()
    }

    fn aggregator(daily: bool) -> Aggregator {
        Aggregator::new(
            AggregationPlan::default(),
            vec!["Run_Number".to_string()],
            daily,
        )
    }

    fn yearmon(outcome: ReduceOutcome) -> YearMonthTable {
        match outcome {
            ReduceOutcome::Reduced { yearmon, .. } => yearmon,
            ReduceOutcome::NoData => panic!("expected data"),
        }
    }

    #[test]
    fn test_two_runs_two_years() {
        let records = vec![
            constant_record("a", Some(0), 730),
            constant_record("b", Some(1), 730),
        ];
        let tables = extract(&records, &["Run_Number"], 2000);
        let table = yearmon(aggregator(false).reduce(tables).unwrap());

        assert_eq!(table.rows.len(), 48);

        for run in 0..2i64 {
            let run_rows: Vec<_> = table
                .rows
                .iter()
                .filter(|r| r.tags == vec![TagValue::Int(run)])
                .collect();
            assert_eq!(run_rows.len(), 24);

            for row in run_rows {
                let expected = 10.0 * DAYS_IN_MONTH[row.bucket.month as usize - 1] as f64;
                assert_eq!(table.value(row, "Births"), Some(expected));
                assert_eq!(table.value(row, "Statistical Population"), Some(1000.0));
            }
        }

        let feb = table
            .row(YearMonth { year: 2001, month: 2 }, &[TagValue::Int(1)])
            .unwrap();
        assert_eq!(table.value(feb, "Births"), Some(280.0));
    }

    #[test]
    fn test_rows_ordered_chronologically() {
        let tables = extract(&[constant_record("a", Some(0), 730)], &["Run_Number"], 2000);
        let table = yearmon(aggregator(false).reduce(tables).unwrap());

        let buckets: Vec<String> = table.rows.iter().map(|r| r.bucket.to_string()).collect();
        assert_eq!(buckets.first().map(String::as_str), Some("Jan-2000"));
        assert_eq!(buckets.get(1).map(String::as_str), Some("Feb-2000"));
        assert_eq!(buckets.last().map(String::as_str), Some("Dec-2001"));
    }

    #[test]
    fn test_empty_input_reports_no_data() {
        let outcome = aggregator(true).reduce(Vec::new()).unwrap();
        assert_eq!(outcome, ReduceOutcome::NoData);
    }

    #[test]
    fn test_missing_sum_column() {
        let mut record = constant_record("a", Some(0), 10);
        record.document.channels.remove("Births");

        let ex = ChannelExtractor::new(ExtractorConfig {
            channels: default_channels()
                .into_iter()
                .filter(|c| c != "Births")
                .collect(),
            ..ExtractorConfig::default()
        });
        let tables = vec![ex.extract(&record).unwrap()];

        match aggregator(true).reduce(tables) {
            Err(AnalyzerError::MissingColumn { column }) => assert_eq!(column, "Births"),
            other => panic!("expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_eir_is_renamed_and_summed() {
        let tables = extract(&[constant_record("a", Some(0), 365)], &["Run_Number"], 2000);
        let outcome = aggregator(true).reduce(tables).unwrap();

        let ReduceOutcome::Reduced { daily, yearmon } = outcome else {
            panic!("expected data");
        };
        let daily = daily.unwrap();
        assert!(daily.channel_index("EIR").is_some());
        assert!(daily.channel_index("Daily EIR").is_none());

        let jan = yearmon
            .row(YearMonth { year: 2000, month: 1 }, &[TagValue::Int(0)])
            .unwrap();
        assert_eq!(yearmon.value(jan, "EIR"), Some(15.5));
    }

    #[test]
    fn test_daily_only_when_requested() {
        let tables = extract(&[constant_record("a", Some(0), 40)], &["Run_Number"], 2000);
        match aggregator(false).reduce(tables).unwrap() {
            ReduceOutcome::Reduced { daily, .. } => assert!(daily.is_none()),
            ReduceOutcome::NoData => panic!("expected data"),
        }
    }

    #[test]
    fn test_reduce_is_idempotent() {
        let records = vec![
            constant_record("a", Some(0), 400),
            constant_record("b", Some(1), 400),
        ];
        let tables = extract(&records, &["Run_Number"], 2010);
        let agg = aggregator(true);

        let first = agg.reduce(tables.clone()).unwrap();
        let second = agg.reduce(tables).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_concatenate_then_partition_recovers_tables() {
        let records = vec![
            constant_record("a", Some(0), 30),
            constant_record("b", Some(1), 45),
            constant_record("c", Some(2), 12),
        ];
        let tables = extract(&records, &["Run_Number"], 2000);
        let combined = concatenate(&tables);

        assert_eq!(combined.rows.len(), 30 + 45 + 12);
        let parts = combined.partition_by_simulation();
        assert_eq!(parts.len(), 3);
        for table in &tables {
            assert_eq!(parts[table.simulation.as_str()], table.rows.as_slice());
        }
    }

    #[test]
    fn test_concatenate_fills_missing_channels_with_nan() {
        let a = SimulationTable {
            simulation: "a".to_string(),
            channels: vec!["Births".to_string()],
            tags: vec![],
            rows: extract(&[constant_record("a", None, 2)], &[], 2000)[0]
                .rows
                .iter()
                .map(|r| TimestepRow {
                    values: vec![1.0],
                    tags: vec![],
                    ..r.clone()
                })
                .collect(),
        };
        let b = SimulationTable {
            simulation: "b".to_string(),
            channels: vec!["True Prevalence".to_string()],
            rows: a
                .rows
                .iter()
                .map(|r| TimestepRow {
                    values: vec![0.3],
                    ..r.clone()
                })
                .collect(),
            ..a.clone()
        };

        let combined = concatenate(&[a, b]);
        assert_eq!(combined.channels, vec!["Births", "True Prevalence"]);
        assert_eq!(combined.rows[0].values[0], 1.0);
        assert!(combined.rows[0].values[1].is_nan());
        assert!(combined.rows[2].values[0].is_nan());
        assert_eq!(combined.rows[2].values[1], 0.3);
    }

    #[test]
    fn test_sum_consistent_across_grouping_granularity() {
        let records = vec![
            constant_record("a", Some(0), 365),
            constant_record("b", Some(1), 365),
            constant_record("c", Some(1), 365),
        ];
        let tables = extract(&records, &["Run_Number"], 2000);

        let by_run = yearmon(aggregator(false).reduce(tables.clone()).unwrap());
        let by_month = yearmon(
            Aggregator::new(AggregationPlan::default(), Vec::new(), false)
                .reduce(tables)
                .unwrap(),
        );

        assert_eq!(by_month.rows.len(), 12);
        for month_row in &by_month.rows {
            let total: f64 = by_run
                .rows
                .iter()
                .filter(|r| r.bucket == month_row.bucket)
                .map(|r| by_run.value(r, "Births").unwrap())
                .sum();
            assert_eq!(by_month.value(month_row, "Births"), Some(total));
        }
    }

    #[test]
    fn test_rows_without_grouping_tag_are_left_out() {
        let records = vec![
            constant_record("a", None, 31),
            constant_record("b", None, 31),
        ];
        let mut tables = extract(&records, &["Arm"], 2000);
        for row in tables[0].rows.iter_mut() {
            row.tags = vec![Some(TagValue::from("control"))];
        }

        let agg = Aggregator::new(AggregationPlan::default(), vec!["Arm".to_string()], false);
        let table = yearmon(agg.reduce(tables).unwrap());

        assert!(table
            .rows
            .iter()
            .all(|r| r.tags == vec![TagValue::from("control")]));
        let jan = table
            .row(YearMonth { year: 2000, month: 1 }, &[TagValue::from("control")])
            .unwrap();
        assert_eq!(table.value(jan, "Births"), Some(300.0));
    }

    #[test]
    fn test_tag_absent_everywhere_is_missing_column() {
        let tables = extract(&[constant_record("a", None, 5)], &["Arm"], 2000);
        let agg = Aggregator::new(AggregationPlan::default(), vec!["Arm".to_string()], false);

        assert!(matches!(
            agg.reduce(tables),
            Err(AnalyzerError::MissingColumn { column }) if column == "Arm"
        ));
    }

    #[test]
    fn test_plan_tables() {
        let plan = AggregationPlan::default();
        assert_eq!(plan.canonical_name("Daily EIR"), "EIR");
        assert_eq!(plan.canonical_name("Daily Bites per Human"), "Bites per Human");
        assert_eq!(plan.canonical_name("Births"), "Births");
        assert_eq!(plan.columns(AggregationKind::Sum).len(), 8);
        assert_eq!(plan.columns(AggregationKind::Mean).len(), 7);
        assert!(plan
            .kinds
            .iter()
            .all(|(c, _)| !c.contains("CasesFever")));
    }
}
