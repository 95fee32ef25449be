//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.inset-analyzer.toml` files.

use crate::analysis::extractor::{default_tag_defaults, RUN_NUMBER_TAG};
use crate::analysis::ExtractorConfig;
use crate::models::TagValue;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = ".inset-analyzer.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Platform directory layout.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Extraction and aggregation settings.
    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    /// Job-status polling settings.
    #[serde(default)]
    pub poller: PollerConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of simulations extracted concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

/// Where the container platform keeps experiments and where results go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the platform's experiment/simulation directories.
    #[serde(default = "default_job_directory")]
    pub job_directory: PathBuf,

    /// Root under which one working directory per experiment is created.
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,

    /// Where launcher scripts and their `log/` directory are written.
    #[serde(default = "default_script_directory")]
    pub script_directory: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            job_directory: default_job_directory(),
            output_directory: default_output_directory(),
            script_directory: default_script_directory(),
        }
    }
}

fn default_job_directory() -> PathBuf {
    PathBuf::from("simulations_local/experiments")
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("simulations_local/simulation_outputs")
}

fn default_script_directory() -> PathBuf {
    PathBuf::from(".")
}

/// InsetChart extraction and aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Output document path, relative to each simulation directory.
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,

    /// Channels to extract.
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,

    /// Sweep tags to carry into the tables and group by.
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,

    /// Calendar year of the first simulated day.
    #[serde(default = "default_start_year")]
    pub start_year: i32,

    /// Also write the unaggregated daily table.
    #[serde(default)]
    pub daily: bool,

    /// Skip simulations that produced no output instead of failing.
    #[serde(default = "default_true")]
    pub partial_ok: bool,

    /// Values for tags a simulation does not carry.
    #[serde(default = "default_tag_defaults")]
    pub tag_defaults: BTreeMap<String, TagValue>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            output_file: default_output_file(),
            channels: default_channels(),
            tags: default_tags(),
            start_year: default_start_year(),
            daily: false,
            partial_ok: true,
            tag_defaults: default_tag_defaults(),
        }
    }
}

fn default_output_file() -> PathBuf {
    PathBuf::from("output/InsetChart.json")
}

/// The InsetChart channels extracted by default.
pub fn default_channels() -> Vec<String> {
    vec![
        "Statistical Population",
        "Births",
        "Disease Deaths",
        "New Infections",
        "Newly Symptomatic",
        "New Clinical Cases",
        "New Severe Cases",
        "Fever Prevalence",
        "True Prevalence",
        "PCR Gametocyte Prevalence",
        "PCR Parasite Prevalence",
        "Blood Smear Parasite Prevalence",
        "PfHRP2 Prevalence",
        "Infectious Vectors",
        "Daily EIR",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_tags() -> Vec<String> {
    vec![RUN_NUMBER_TAG.to_string()]
}

fn default_start_year() -> i32 {
    2022
}

fn default_true() -> bool {
    true
}

/// Job-status polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Status command; the container id is appended as the last argument.
    #[serde(default = "default_status_command")]
    pub command: Vec<String>,

    /// Seconds between polls.
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,

    /// Give up after this many seconds.
    #[serde(default = "default_poll_timeout")]
    pub timeout_seconds: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            command: default_status_command(),
            interval_seconds: default_interval(),
            timeout_seconds: default_poll_timeout(),
        }
    }
}

fn default_status_command() -> Vec<String> {
    vec!["idmtools", "container", "jobs"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_interval() -> u64 {
    30
}

fn default_poll_timeout() -> u64 {
    7200 // 2 hours
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref dir) = args.job_dir {
            self.paths.job_directory = dir.clone();
        }
        if let Some(ref dir) = args.output_dir {
            self.paths.output_directory = dir.clone();
        }

        if let Some(ref channels) = args.channels {
            self.analyzer.channels = channels.clone();
        }
        if let Some(ref tags) = args.tags {
            self.analyzer.tags = tags.clone();
        }
        if let Some(year) = args.start_year {
            self.analyzer.start_year = year;
        }
        if args.daily {
            self.analyzer.daily = true;
        }

        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }

        if let Some(interval) = args.poll_interval {
            self.poller.interval_seconds = interval;
        }
        if let Some(timeout) = args.poll_timeout {
            self.poller.timeout_seconds = timeout;
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Check values the CLI validates for its own flags, since a config
    /// file can set them too.
    pub fn validate(&self) -> Result<()> {
        if self.general.concurrency == 0 {
            anyhow::bail!("general.concurrency must be at least 1");
        }
        if !(1..=9999).contains(&self.analyzer.start_year) {
            anyhow::bail!(
                "analyzer.start_year must be between 1 and 9999, got {}",
                self.analyzer.start_year
            );
        }
        if self.analyzer.channels.iter().any(|c| c.trim().is_empty()) {
            anyhow::bail!("analyzer.channels must not contain empty names");
        }
        if self.poller.command.is_empty() {
            anyhow::bail!("poller.command must not be empty");
        }
        if self.poller.interval_seconds == 0 {
            anyhow::bail!("poller.interval_seconds must be at least 1");
        }
        Ok(())
    }

    /// Extractor settings derived from the analyzer section.
    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            channels: self.analyzer.channels.clone(),
            tags: self.analyzer.tags.clone(),
            start_year: self.analyzer.start_year,
            tag_defaults: self.analyzer.tag_defaults.clone(),
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
