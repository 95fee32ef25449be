//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Values left unset fall back to the config file.

use clap::Parser;
use std::path::PathBuf;

/// Inset Analyzer - year-month reports from EMOD InsetChart outputs
///
/// Collects the InsetChart.json output of every simulation in an
/// experiment, sums count channels and averages prevalence channels per
/// month and sweep tag, and writes InsetChart_yearmon.csv.
///
/// Examples:
///   inset-analyzer --exp-id 3f2a9c
///   inset-analyzer --exp-id 3f2a9c --exp-name baseline --start-year 2000 --daily
///   inset-analyzer --exp-id 3f2a9c --wait 8d41e0b7c2
///   inset-analyzer --exp-id 3f2a9c --write-script
///   inset-analyzer --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Unique ID of the simulation experiment
    #[arg(
        short = 'i',
        long,
        value_name = "ID",
        required_unless_present = "init_config"
    )]
    pub exp_id: Option<String>,

    /// Name of the experiment; names the output directory (defaults to the ID)
    #[arg(short = 'n', long, value_name = "NAME")]
    pub exp_name: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .inset-analyzer.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Platform job directory holding experiment and simulation folders
    #[arg(long, value_name = "DIR", env = "INSET_JOB_DIR")]
    pub job_dir: Option<PathBuf>,

    /// Root directory for per-experiment result folders
    #[arg(long, value_name = "DIR", env = "INSET_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Channels to extract (comma-separated)
    ///
    /// Example: --channels "Births,True Prevalence,Daily EIR"
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub channels: Option<Vec<String>>,

    /// Sweep tags to group by (comma-separated)
    #[arg(long, value_name = "TAGS", value_delimiter = ',')]
    pub tags: Option<Vec<String>>,

    /// Calendar year of the first simulated day
    #[arg(long, value_name = "YEAR")]
    pub start_year: Option<i32>,

    /// Also write the unaggregated daily table
    #[arg(long)]
    pub daily: bool,

    /// Number of simulations extracted concurrently
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Wait for the simulations of this container to finish before analyzing
    #[arg(long, value_name = "CONTAINER_ID")]
    pub wait: Option<String>,

    /// Seconds between job-status polls
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<u64>,

    /// Give up waiting after this many seconds
    ///
    /// Exit code 2 when the timeout is reached.
    #[arg(long, value_name = "SECS")]
    pub poll_timeout: Option<u64>,

    /// Write a run_analyzer.ps1 launcher for this experiment and exit
    #[arg(long)]
    pub write_script: bool,

    /// List the simulations that would be analyzed and exit
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .inset-analyzer.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the experiment ID (should be validated first).
    pub fn exp_id(&self) -> &str {
        self.exp_id.as_deref().unwrap_or("")
    }

    /// Name of the experiment's output directory: the name if given, else the ID.
    pub fn exp_label(&self) -> &str {
        self.exp_name.as_deref().unwrap_or_else(|| self.exp_id())
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        let exp_id = self.exp_id();
        if exp_id.trim().is_empty() {
            return Err("Experiment ID must not be empty".to_string());
        }
        if exp_id.contains(['/', '\\']) {
            return Err("Experiment ID must not contain path separators".to_string());
        }

        if let Some(ref name) = self.exp_name {
            if name.trim().is_empty() || name.contains(['/', '\\']) {
                return Err("Experiment name must be a non-empty directory name".to_string());
            }
        }

        if let Some(year) = self.start_year {
            if !(1..=9999).contains(&year) {
                return Err("Start year must be between 1 and 9999".to_string());
            }
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.poll_interval == Some(0) {
            return Err("Poll interval must be at least 1 second".to_string());
        }

        if let Some(ref channels) = self.channels {
            if channels.iter().any(|c| c.trim().is_empty()) {
                return Err("Channel names must not be empty".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.write_script && self.dry_run {
            return Err("Cannot use both --write-script and --dry-run".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `config_verbose` is the config file's `general.verbose`; `-q` wins
    /// over it.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
