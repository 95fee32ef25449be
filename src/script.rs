//! PowerShell launcher for running the analyzer later.
//!
//! Writes `run_analyzer.ps1`, which changes into the script directory and
//! runs the analyzer for one experiment with the same directory layout.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const SCRIPT_NAME: &str = "run_analyzer.ps1";

const JOB_NAME: &str = "analyzer";

/// What the launcher should run.
#[derive(Debug, Clone)]
pub struct LauncherSpec {
    pub exp_id: String,
    pub exp_name: Option<String>,
    /// Analyzer executable invoked by the script.
    pub program: String,
    pub script_directory: PathBuf,
    pub job_directory: PathBuf,
    pub output_directory: PathBuf,
}

impl LauncherSpec {
    /// The experiment's result directory under the output root.
    pub fn experiment_output_dir(&self) -> PathBuf {
        self.output_directory
            .join(self.exp_name.as_deref().unwrap_or(&self.exp_id))
    }
}

/// Single-quote a PowerShell string literal.
fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn ps_path(path: &Path) -> String {
    ps_quote(&path.display().to_string())
}

/// Render the launcher script.
pub fn render_launcher(spec: &LauncherSpec, work_dir: &Path) -> String {
    let mut command = vec![
        "&".to_string(),
        ps_quote(&spec.program),
        "--exp-id".to_string(),
        ps_quote(&spec.exp_id),
    ];
    if let Some(ref name) = spec.exp_name {
        command.push("--exp-name".to_string());
        command.push(ps_quote(name));
    }
    command.push("--job-dir".to_string());
    command.push("$jobdir".to_string());
    command.push("--output-dir".to_string());
    command.push(ps_path(&spec.output_directory));

    let mut script = String::new();
    script.push_str("# Job settings\n");
    script.push_str(&format!("$job_name = {}\n", ps_quote(JOB_NAME)));
    script.push_str(&format!("$work_dir = {}\n", ps_path(work_dir)));
    script.push_str(&format!("$jobdir = {}\n", ps_path(&spec.job_directory)));
    script.push_str("$log_dir = Join-Path $work_dir \"log\"\n");
    script.push('\n');
    script.push_str("# Navigate to the working directory\n");
    script.push_str("Set-Location -Path \"$work_dir\"\n");
    script.push('\n');
    script.push_str("# Run the analyzer\n");
    script.push_str(&command.join(" "));
    script.push('\n');

    script
}

/// Write the launcher script and create the directories it relies on.
///
/// Returns the path of the written script.
pub fn write_launcher(spec: &LauncherSpec) -> Result<PathBuf> {
    let sim_out_dir = spec.experiment_output_dir();
    fs::create_dir_all(&sim_out_dir)
        .with_context(|| format!("Failed to create {}", sim_out_dir.display()))?;

    let log_dir = spec.script_directory.join("log");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create {}", log_dir.display()))?;

    let work_dir = fs::canonicalize(&spec.script_directory).with_context(|| {
        format!(
            "Failed to resolve script directory {}",
            spec.script_directory.display()
        )
    })?;

    let path = work_dir.join(SCRIPT_NAME);
    fs::write(&path, render_launcher(spec, &work_dir))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!("PowerShell script written to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec(root: &Path, exp_name: Option<&str>) -> LauncherSpec {
        LauncherSpec {
            exp_id: "e42".to_string(),
            exp_name: exp_name.map(String::from),
            program: "inset-analyzer".to_string(),
            script_directory: root.join("scripts"),
            job_directory: root.join("jobs"),
            output_directory: root.join("outputs"),
        }
    }

    #[test]
    fn test_ps_quote() {
        assert_eq!(ps_quote("plain"), "'plain'");
        assert_eq!(ps_quote("it's"), "'it''s'");
    }

    #[test]
    fn test_render_launcher() {
        let s = spec(Path::new("/data"), Some("baseline"));
        let script = render_launcher(&s, Path::new("/data/scripts"));

        assert!(script.contains("$job_name = 'analyzer'"));
        assert!(script.contains("$work_dir = '/data/scripts'"));
        assert!(script.contains("$jobdir = '/data/jobs'"));
        assert!(script.contains("Set-Location -Path \"$work_dir\""));
        assert!(script.contains(
            "& 'inset-analyzer' --exp-id 'e42' --exp-name 'baseline' --job-dir $jobdir --output-dir '/data/outputs'"
        ));
    }

    #[test]
    fn test_render_launcher_without_name() {
        let s = spec(Path::new("/data"), None);
        let script = render_launcher(&s, Path::new("/data/scripts"));
        assert!(!script.contains("--exp-name"));
    }

    #[test]
    fn test_write_launcher_creates_directories() {
        let temp = TempDir::new().unwrap();
        let s = spec(temp.path(), None);

        let path = write_launcher(&s).unwrap();

        assert!(path.ends_with(SCRIPT_NAME));
        assert!(path.is_file());
        assert!(temp.path().join("scripts/log").is_dir());
        assert!(temp.path().join("outputs/e42").is_dir());

        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("--exp-id 'e42'"));
    }
}
