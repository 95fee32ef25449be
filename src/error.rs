//! Domain errors for extraction and aggregation.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Channel '{channel}' not found in output of simulation {simulation}")]
    MissingChannel { channel: String, simulation: String },

    #[error("Column '{column}' required for aggregation is missing from the combined data")]
    MissingColumn { column: String },

    #[error(
        "Channel '{channel}' of simulation {simulation} has {actual} samples, expected {expected}"
    )]
    RaggedChannels {
        channel: String,
        simulation: String,
        expected: usize,
        actual: usize,
    },

    #[error("Time step {step} from start year {start_year} falls outside the representable date range")]
    DateOutOfRange { step: u32, start_year: i32 },

    #[error("Invalid output document {}: {source}", .path.display())]
    InvalidDocument {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Experiment '{exp_id}' not found under {}", .job_directory.display())]
    ExperimentNotFound {
        exp_id: String,
        job_directory: PathBuf,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AnalyzerResult<T> = Result<T, AnalyzerError>;
