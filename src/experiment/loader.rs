//! Reading simulation outputs and extracting them concurrently.

use super::SimulationDir;
use crate::analysis::ChannelExtractor;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::models::{InsetChart, SimulationRecord, SimulationTable};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options for loading an experiment's tables.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Maximum simulations extracted at once.
    pub concurrency: usize,
    /// Skip simulations without an output document instead of failing.
    pub partial_ok: bool,
    pub show_progress: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            partial_ok: true,
            show_progress: false,
        }
    }
}

/// Read and parse the output document of a simulation.
pub fn read_record(sim: &SimulationDir) -> AnalyzerResult<SimulationRecord> {
    let content = fs::read_to_string(&sim.output)?;
    let document: InsetChart =
        serde_json::from_str(&content).map_err(|source| AnalyzerError::InvalidDocument {
            path: sim.output.clone(),
            source,
        })?;

    Ok(SimulationRecord {
        id: sim.id.clone(),
        document,
        tags: sim.tags.clone(),
    })
}

fn progress_bar(len: usize, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} simulations")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Extract every simulation of an experiment.
///
/// Extraction runs on blocking tasks, at most `concurrency` at a time.
/// Tables are returned sorted by simulation id. The first extraction error
/// aborts the load.
pub async fn load_tables(
    sims: Vec<SimulationDir>,
    extractor: Arc<ChannelExtractor>,
    options: &LoadOptions,
) -> Result<Vec<SimulationTable>> {
    let (present, missing): (Vec<_>, Vec<_>) = sims.into_iter().partition(|s| s.has_output());

    if !missing.is_empty() {
        if !options.partial_ok {
            anyhow::bail!(
                "{} simulations have no output (first: {} at {})",
                missing.len(),
                missing[0].id,
                missing[0].output.display()
            );
        }
        for sim in &missing {
            warn!("Simulation {} has no output; skipping", sim.id);
        }
    }

    info!(
        "Extracting {} simulations ({} at a time)",
        present.len(),
        options.concurrency
    );

    let pb = progress_bar(present.len(), options.show_progress);

    let mut tasks = stream::iter(present.into_iter().map(|sim| {
        let extractor = Arc::clone(&extractor);
        tokio::task::spawn_blocking(move || {
            let record = read_record(&sim)?;
            extractor.extract(&record)
        })
    }))
    .buffer_unordered(options.concurrency.max(1));

    let mut tables = Vec::new();
    while let Some(joined) = tasks.next().await {
        let table = joined.context("Extraction task failed")??;
        debug!("Simulation {}: {} rows", table.simulation, table.rows.len());
        pb.inc(1);
        tables.push(table);
    }

    pb.finish_and_clear();
    tables.sort_by(|a, b| a.simulation.cmp(&b.simulation));

    Ok(tables)
}
