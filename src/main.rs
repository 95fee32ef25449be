//! Inset Analyzer - InsetChart post-processing for EMOD experiments
//!
//! A CLI tool that collects the InsetChart output of every simulation in
//! an experiment run on the container platform and reduces it into a
//! year-month CSV report.
//!
//! Exit codes:
//!   0 - Success (including experiments that returned no data)
//!   1 - Runtime error (config, missing experiment, missing channel, etc.)
//!   2 - Timed out waiting for simulations to finish

mod analysis;
mod calendar;
mod cli;
mod config;
mod error;
mod experiment;
mod models;
mod poller;
mod report;
mod script;

use analysis::{AggregationPlan, Aggregator, ChannelExtractor};
use anyhow::{Context, Result};
use cli::Args;
use config::{Config, CONFIG_FILE_NAME};
use experiment::LoadOptions;
use poller::{CommandProbe, PollOutcome, PollSettings};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Config comes first so `general.verbose` can set the log level
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(args.log_level(config.general.verbose));

    info!("Inset Analyzer v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    debug!("Configuration: {:?}", config);

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .inset-analyzer.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize paths, channels, tags, and polling.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the analysis workflow. Returns the exit code.
async fn run(args: Args, config: Config) -> Result<i32> {
    let start_time = Instant::now();

    if args.write_script {
        return handle_write_script(&args, &config);
    }

    // Step 1: Wait for the simulations, if asked to
    if let Some(ref container_id) = args.wait {
        println!("⏳ Waiting for simulations in container {}...", container_id);

        let probe = CommandProbe::new(&config.poller.command)?;
        let settings = PollSettings::from_secs(
            config.poller.interval_seconds,
            config.poller.timeout_seconds,
        )?;

        match poller::wait_for_completion(&probe, container_id, settings).await {
            PollOutcome::Completed { polls } => {
                println!("   All simulations completed ({} polls).", polls);
            }
            PollOutcome::TimedOut { elapsed } => {
                eprintln!(
                    "\n⛔ Timeout waiting for simulations to finish after {}s. Not analyzing.",
                    elapsed.as_secs()
                );
                return Ok(2);
            }
        }
    }

    // Step 2: Find the experiment's simulations
    let exp_id = args.exp_id();
    println!("🔍 Locating experiment {}...", exp_id);

    let experiment_dir = experiment::find_experiment_dir(&config.paths.job_directory, exp_id)?;
    let sims = experiment::discover_simulations(&experiment_dir, &config.analyzer.output_file)?;

    if args.dry_run {
        return handle_dry_run(&experiment_dir, &sims);
    }

    let working_dir = config.paths.output_directory.join(args.exp_label());
    std::fs::create_dir_all(&working_dir).with_context(|| {
        format!(
            "Failed to create working directory {}",
            working_dir.display()
        )
    })?;
    info!("Working directory: {}", working_dir.display());

    // Step 3: Extract every simulation
    println!("\n🔬 Extracting {} simulations...", sims.len());
    println!("   Channels: {}", config.analyzer.channels.len());
    println!("   Tags: {}", config.analyzer.tags.join(", "));
    println!("   Start year: {}", config.analyzer.start_year);

    let extractor = Arc::new(ChannelExtractor::new(config.extractor_config()));
    let load_options = LoadOptions {
        concurrency: config.general.concurrency,
        partial_ok: config.analyzer.partial_ok,
        show_progress: !args.quiet,
    };
    let tables = experiment::load_tables(sims, extractor, &load_options).await?;
    let simulations = tables.len();

    // Step 4: Aggregate
    println!("\n📊 Aggregating...");
    let aggregator = Aggregator::new(
        AggregationPlan::default(),
        config.analyzer.tags.clone(),
        config.analyzer.daily,
    );
    let outcome = aggregator.reduce(tables)?;

    // Step 5: Write the tables
    let written = match report::write_outputs(&working_dir, &outcome)? {
        Some(written) => written,
        None => {
            warn!("No data have been returned for experiment {}", exp_id);
            println!("\n⚠️  No data have been returned. Nothing written.");
            return Ok(0);
        }
    };

    let duration = start_time.elapsed().as_secs_f64();

    println!("\n📝 Analysis Summary:");
    println!("   Simulations: {}", simulations);
    println!("   Year-month rows: {}", written.yearmon_rows);
    if let Some(ref daily) = written.daily {
        println!("   Daily table: {}", daily.display());
    }
    println!("   Duration: {:.1}s", duration);
    println!(
        "\n✅ Analysis complete! Report saved to: {}",
        written.yearmon.display()
    );

    Ok(0)
}

/// Handle --write-script: write the PowerShell launcher and exit.
fn handle_write_script(args: &Args, config: &Config) -> Result<i32> {
    let program = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| env!("CARGO_PKG_NAME").to_string());

    let spec = script::LauncherSpec {
        exp_id: args.exp_id().to_string(),
        exp_name: args.exp_name.clone(),
        program,
        script_directory: config.paths.script_directory.clone(),
        job_directory: config.paths.job_directory.clone(),
        output_directory: config.paths.output_directory.clone(),
    };

    let path = script::write_launcher(&spec)?;
    println!("✅ PowerShell script written to {}", path.display());
    Ok(0)
}

/// Handle --dry-run: list the simulations that would be analyzed, exit.
fn handle_dry_run(experiment_dir: &Path, sims: &[experiment::SimulationDir]) -> Result<i32> {
    println!(
        "\n🔍 Dry run: simulations in {}\n",
        experiment_dir.display()
    );

    if sims.is_empty() {
        println!("   No simulations found.");
    } else {
        for sim in sims {
            let status = if sim.has_output() { "ready" } else { "no output" };
            let tags: Vec<String> = sim
                .tags
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            println!("     📄 {} [{}] {}", sim.id, status, tags.join(" "));
        }
        println!("\n   Total: {} simulations", sims.len());
    }

    println!("\n✅ Dry run complete. Nothing was written.");
    Ok(0)
}

/// Load configuration from file or use defaults, apply CLI overrides and
/// validate the result.
///
/// Runs before logging is initialized, so problems are reported on stderr.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = if let Some(ref config_path) = args.config {
        // Try explicit config path
        Config::load(config_path)?
    } else {
        // Try default location
        match Config::load_default() {
            Ok(Some(config)) => config,
            Ok(None) => Config::default(),
            Err(e) => {
                eprintln!(
                    "⚠️  Failed to load {}: {:#}. Using defaults.",
                    CONFIG_FILE_NAME, e
                );
                Config::default()
            }
        }
    };

    config.merge_with_args(args);
    config.validate().context("Invalid configuration")?;

    Ok(config)
}
