//! Waiting for an experiment's simulations to finish.
//!
//! The container platform reports job state through a status command
//! whose output lists one line per job. Lines naming a `SIMULATION` that is
//! `running` are counted; polling stops once none are left or the timeout
//! is reached.

use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Number of output lines describing a running simulation.
pub fn count_running(output: &str) -> usize {
    output
        .lines()
        .filter(|line| line.contains("SIMULATION") && line.contains("running"))
        .count()
}

/// Source of job status for a container.
pub trait JobStatusProbe {
    /// Number of simulations still running in the container.
    fn running_simulations(&self, container_id: &str) -> impl Future<Output = Result<usize>>;
}

/// Probe that shells out to the platform's status command.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    program: String,
    args: Vec<String>,
}

impl CommandProbe {
    /// Build from a command line; the container id is appended on each call.
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .context("Job status command must not be empty")?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl JobStatusProbe for CommandProbe {
    async fn running_simulations(&self, container_id: &str) -> Result<usize> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(container_id)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;

        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(count_running(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Polling cadence.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    /// Settings from whole seconds. A zero interval is rejected, since
    /// elapsed time is counted in intervals and would never reach the
    /// timeout.
    pub fn from_secs(interval_seconds: u64, timeout_seconds: u64) -> Result<Self> {
        if interval_seconds == 0 {
            anyhow::bail!("Poll interval must be at least 1 second");
        }
        Ok(Self {
            interval: Duration::from_secs(interval_seconds),
            timeout: Duration::from_secs(timeout_seconds),
        })
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(7200),
        }
    }
}

/// How waiting ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No simulation is running any more.
    Completed { polls: usize },
    /// The timeout elapsed with simulations still running or status unknown.
    TimedOut { elapsed: Duration },
}

/// Poll until no simulation is running or the timeout elapses.
///
/// Probe failures are logged and treated as unknown status; only the
/// timeout ends polling without completion. Elapsed time is counted in
/// whole intervals.
pub async fn wait_for_completion<P: JobStatusProbe>(
    probe: &P,
    container_id: &str,
    settings: PollSettings,
) -> PollOutcome {
    info!("Polling container {} for running simulations", container_id);

    let mut elapsed = Duration::ZERO;
    let mut polls = 0usize;

    loop {
        polls += 1;
        match probe.running_simulations(container_id).await {
            Ok(0) => {
                info!("All simulations completed");
                return PollOutcome::Completed { polls };
            }
            Ok(running) => {
                info!(
                    "{} simulations still running. Elapsed time: {}s",
                    running,
                    elapsed.as_secs()
                );
            }
            Err(e) => {
                warn!("Error checking running jobs ({:#}); continuing polling", e);
            }
        }

        if elapsed >= settings.timeout {
            warn!(
                "Timeout waiting for simulations to finish after {}s",
                elapsed.as_secs()
            );
            return PollOutcome::TimedOut { elapsed };
        }

        debug!("Sleeping {:?} before next poll", settings.interval);
        tokio::time::sleep(settings.interval).await;
        elapsed += settings.interval;
    }
}
