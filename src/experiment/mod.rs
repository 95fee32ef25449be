//! Experiment discovery on the container platform's job directory.
//!
//! The platform lays experiments out as
//! `<job_directory>/<suite>/<experiment>/<simulation>/`, where directory
//! names are either the bare item id or `<name>_<id>`, and every item
//! directory carries a `metadata.json` with its id and tags.

pub mod loader;

pub use loader::{load_tables, LoadOptions};

use crate::error::{AnalyzerError, AnalyzerResult};
use crate::models::TagValue;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Per-item metadata file written by the platform.
pub const METADATA_FILE: &str = "metadata.json";

/// A simulation directory of an experiment.
#[derive(Debug, Clone)]
pub struct SimulationDir {
    pub id: String,
    pub path: PathBuf,
    pub tags: BTreeMap<String, TagValue>,
    /// Path of the output document to analyze.
    pub output: PathBuf,
}

impl SimulationDir {
    pub fn has_output(&self) -> bool {
        self.output.is_file()
    }
}

#[derive(Debug, Deserialize)]
struct ItemMetadata {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    item_type: Option<String>,
    #[serde(default)]
    tags: serde_json::Map<String, serde_json::Value>,
}

/// Whether a directory name refers to the given item id.
fn names_item(dir_name: &str, id: &str) -> bool {
    dir_name == id
        || dir_name
            .strip_suffix(id)
            .is_some_and(|prefix| prefix.ends_with('_'))
}

/// Locate the directory of an experiment under the job directory.
pub fn find_experiment_dir(job_directory: &Path, exp_id: &str) -> AnalyzerResult<PathBuf> {
    let not_found = || AnalyzerError::ExperimentNotFound {
        exp_id: exp_id.to_string(),
        job_directory: job_directory.to_path_buf(),
    };

    if !job_directory.is_dir() {
        return Err(not_found());
    }

    let found = WalkDir::new(job_directory)
        .min_depth(1)
        .max_depth(3)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .find(|entry| names_item(&entry.file_name().to_string_lossy(), exp_id))
        .map(|entry| entry.into_path())
        .ok_or_else(not_found)?;

    info!("Experiment {} found at {}", exp_id, found.display());
    Ok(found)
}

/// List the simulation directories of an experiment, sorted by id.
///
/// A subdirectory counts as a simulation if it has a metadata file or an
/// output document. Metadata marked as another item type is skipped.
pub fn discover_simulations(experiment_dir: &Path, output_file: &Path) -> Result<Vec<SimulationDir>> {
    let entries = fs::read_dir(experiment_dir).with_context(|| {
        format!(
            "Failed to read experiment directory: {}",
            experiment_dir.display()
        )
    })?;

    let mut sims = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let dir_name = entry.file_name().to_string_lossy().to_string();
        let metadata_path = path.join(METADATA_FILE);
        let output = path.join(output_file);

        let metadata = if metadata_path.is_file() {
            let content = fs::read_to_string(&metadata_path)
                .with_context(|| format!("Failed to read {}", metadata_path.display()))?;
            let parsed: ItemMetadata = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", metadata_path.display()))?;
            Some(parsed)
        } else if output.is_file() {
            None
        } else {
            debug!("Skipping {}: no metadata or output", path.display());
            continue;
        };

        if let Some(item_type) = metadata.as_ref().and_then(|m| m.item_type.as_deref()) {
            if !item_type.eq_ignore_ascii_case("simulation") {
                debug!("Skipping {}: item type {}", path.display(), item_type);
                continue;
            }
        }

        let (id, tags) = match metadata {
            Some(m) => {
                let tags = m
                    .tags
                    .iter()
                    .filter_map(|(k, v)| TagValue::from_json(v).map(|v| (k.clone(), v)))
                    .collect();
                (m.id.unwrap_or_else(|| dir_name.clone()), tags)
            }
            None => (dir_name.clone(), BTreeMap::new()),
        };

        sims.push(SimulationDir {
            id,
            path,
            tags,
            output,
        });
    }

    sims.sort_by(|a, b| a.id.cmp(&b.id));
    debug!(
        "Discovered {} simulations in {}",
        sims.len(),
        experiment_dir.display()
    );

    Ok(sims)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    /// Write a simulation directory with metadata and, optionally, output.
    pub(crate) fn write_sim(
        exp_dir: &Path,
        dir_name: &str,
        metadata: serde_json::Value,
        output: Option<serde_json::Value>,
    ) -> PathBuf {
        let dir = exp_dir.join(dir_name);
        fs::create_dir_all(dir.join("output")).unwrap();
        fs::write(dir.join(METADATA_FILE), metadata.to_string()).unwrap();
        if let Some(doc) = output {
            fs::write(dir.join("output/InsetChart.json"), doc.to_string()).unwrap();
        }
        dir
    }

    #[test]
    fn test_names_item() {
        assert!(names_item("abc123", "abc123"));
        assert!(names_item("baseline_abc123", "abc123"));
        assert!(!names_item("xabc123", "abc123"));
        assert!(!names_item("abc1234", "abc123"));
    }

    #[test]
    fn test_find_experiment_dir() {
        let temp = TempDir::new().unwrap();
        let exp = temp.path().join("suite_s1").join("my_exp_e42");
        fs::create_dir_all(&exp).unwrap();
        fs::create_dir_all(temp.path().join("suite_s1").join("other_e4")).unwrap();

        let found = find_experiment_dir(temp.path(), "e42").unwrap();
        assert_eq!(found, exp);
    }

    #[test]
    fn test_find_experiment_dir_missing() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            find_experiment_dir(temp.path(), "nope"),
            Err(AnalyzerError::ExperimentNotFound { .. })
        ));
        assert!(matches!(
            find_experiment_dir(&temp.path().join("absent"), "nope"),
            Err(AnalyzerError::ExperimentNotFound { .. })
        ));
    }

    #[test]
    fn test_discover_simulations() {
        let temp = TempDir::new().unwrap();
        let exp = temp.path();

        write_sim(
            exp,
            "sim_b",
            json!({"id": "b", "item_type": "Simulation", "tags": {"Run_Number": 1, "Arm": "ivm"}}),
            Some(json!({"Channels": {}})),
        );
        write_sim(
            exp,
            "sim_a",
            json!({"id": "a", "item_type": "Simulation", "tags": {"Run_Number": 0, "Note": null}}),
            None,
        );
        write_sim(exp, "assets", json!({"item_type": "AssetCollection"}), None);
        fs::create_dir_all(exp.join("empty")).unwrap();
        fs::write(exp.join("metadata.json"), "{}").unwrap();

        let sims = discover_simulations(exp, Path::new("output/InsetChart.json")).unwrap();
        let ids: Vec<_> = sims.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(!sims[0].has_output());
        assert!(sims[1].has_output());
        assert_eq!(sims[0].tags.get("Run_Number"), Some(&TagValue::Int(0)));
        assert!(!sims[0].tags.contains_key("Note"));
        assert_eq!(sims[1].tags.get("Arm"), Some(&TagValue::from("ivm")));
    }

    #[test]
    fn test_discover_without_metadata_uses_dir_name() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("sim_x");
        fs::create_dir_all(dir.join("output")).unwrap();
        fs::write(dir.join("output/InsetChart.json"), "{\"Channels\": {}}").unwrap();

        let sims = discover_simulations(temp.path(), Path::new("output/InsetChart.json")).unwrap();
        assert_eq!(sims.len(), 1);
        assert_eq!(sims[0].id, "sim_x");
        assert!(sims[0].tags.is_empty());
    }
}
