//! Run the multi-agent pipeline over selected benchmark examples.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use color_eyre::Result;
use color_eyre::eyre::{Context, bail};
use owo_colors::OwoColorize;

use eltbench::llm::ApiClient;
use eltbench::orchestrator::{Pipeline, PipelineOptions};
use eltbench::selection::{Dialect, detect_dialects, select_examples};

#[derive(Args, Clone, Debug)]
pub struct Config {
    /// Directory containing one sub-directory per benchmark example.
    #[arg(long, default_value = "data/inputs")]
    pub examples_dir: PathBuf,

    /// Examples to run: `all`, a single index, a comma list (`2,3`), or an
    /// inclusive range (`0-10`).
    #[arg(short = 'i', long, default_value = "all")]
    pub example_index: String,

    /// Run a single example by name instead of by index.
    #[arg(short = 'n', long)]
    pub example_name: Option<String>,

    #[arg(long, default_value = "gpt-4o")]
    pub model: String,

    #[arg(long, default_value_t = 1.0)]
    pub temperature: f64,

    /// Experiment suffix appended to the model name in output paths.
    #[arg(short, long, default_value = "")]
    pub suffix: String,

    #[arg(long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Step budget per agent stage.
    #[arg(long, default_value_t = 15)]
    pub max_steps: usize,

    /// Conversation memory window, in turns.
    #[arg(long, default_value_t = 25)]
    pub max_memory_length: usize,

    /// Total build attempts (correction rounds run between failed attempts).
    #[arg(long, default_value_t = 5)]
    pub max_retries: usize,

    /// Rounds of the semantic verification cycle.
    #[arg(long, default_value_t = 3)]
    pub max_verification_rounds: usize,

    /// Treat a missing verification report as FAIL instead of PASS.
    #[arg(long)]
    pub strict_verification: bool,

    /// Build command executed in each example workspace.
    #[arg(long, default_value = "dbt run")]
    pub build_command: String,

    /// Re-run examples that already have a result.
    #[arg(long)]
    pub overwriting: bool,

    /// Re-run only examples whose recorded result failed.
    #[arg(long)]
    pub retry_failed: bool,

    /// Only run Snowflake examples.
    #[arg(long)]
    pub sf_only: bool,

    /// Only run BigQuery examples.
    #[arg(long)]
    pub bq_only: bool,

    /// Only run local-database examples.
    #[arg(long)]
    pub local_only: bool,
}

pub fn main(config: Config) -> Result<()> {
    let only_flags = [config.sf_only, config.bq_only, config.local_only];
    if only_flags.iter().filter(|f| **f).count() > 1 {
        bail!("at most one of --sf-only, --bq-only, --local-only may be set");
    }

    let experiment_id = experiment_id(&config.model, &config.suffix);
    let mut examples = list_examples(&config.examples_dir)?;
    if let Some(name) = &config.example_name {
        examples.retain(|e| e == name);
        if examples.is_empty() {
            bail!("example not found: {name}");
        }
    } else {
        examples = select_examples(&examples, &config.example_index);
    }
    if let Some(dialect) = requested_dialect(&config) {
        examples.retain(|name| detect_dialects(&config.examples_dir.join(name)).contains(&dialect));
    }
    println!(
        "{} {} example(s) as {}",
        "Running".green().bold(),
        examples.len(),
        experiment_id.dimmed()
    );

    let llm = ApiClient::new()?;

    for name in &examples {
        let workspace = config.output_dir.join(&experiment_id).join(name);
        let result_dir = workspace.join("elt");
        let result_path = result_dir.join("result.json");

        if result_path.exists() {
            if config.retry_failed && recorded_run_succeeded(&result_path) {
                println!("  {} {name} (previous run succeeded)", "Skipping".yellow());
                continue;
            }
            if !config.overwriting && !config.retry_failed {
                println!("  {} {name} (result exists)", "Skipping".yellow());
                continue;
            }
        }
        if workspace.exists() {
            fs::remove_dir_all(&workspace)
                .with_context(|| format!("remove stale workspace {}", workspace.display()))?;
        }
        copy_dir_all(&config.examples_dir.join(name), &workspace)?;

        println!("  {} {name}", "Running".green().bold());
        let dialects = detect_dialects(&config.examples_dir.join(name));
        let backends = (
            dialects.is_empty() || dialects.contains(&Dialect::Snowflake),
            dialects.contains(&Dialect::BigQuery),
            dialects.contains(&Dialect::Local),
        );
        let options = PipelineOptions::builder()
            .model(config.model.clone())
            .temperature(config.temperature)
            .stage_step_budget(config.max_steps)
            .memory_window(config.max_memory_length)
            .max_build_attempts(config.max_retries)
            .max_verification_rounds(config.max_verification_rounds)
            .missing_report_is_pass(!config.strict_verification)
            .backends(backends)
            .build_command(config.build_command.clone())
            .build();
        let outcome = Pipeline::new(&workspace, &llm, options).run()?;

        if outcome.finished {
            println!("    {} {}", "✓".green(), outcome.result);
        } else {
            println!("    {} {}", "✗".red(), outcome.result);
        }

        fs::create_dir_all(&result_dir)
            .with_context(|| format!("create {}", result_dir.display()))?;
        fs::write(&result_path, serde_json::to_string_pretty(&outcome)?)
            .with_context(|| format!("write {}", result_path.display()))?;
    }

    println!("{}", "Benchmark run complete.".bold());
    Ok(())
}

fn experiment_id(model: &str, suffix: &str) -> String {
    let model = model.rsplit('/').next().unwrap_or(model);
    if suffix.is_empty() {
        tracing::warn!("no suffix provided; the experiment id is the model name");
        model.to_string()
    } else {
        format!("{model}-{suffix}")
    }
}

fn requested_dialect(config: &Config) -> Option<Dialect> {
    if config.sf_only {
        Some(Dialect::Snowflake)
    } else if config.bq_only {
        Some(Dialect::BigQuery)
    } else if config.local_only {
        Some(Dialect::Local)
    } else {
        None
    }
}

pub fn list_examples(dir: &Path) -> Result<Vec<String>> {
    let entries = dir
        .read_dir()
        .with_context(|| format!("read examples directory {}", dir.display()))?;
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

/// A previous result counts as a success if it finished and its result text
/// carries neither FAIL nor an error marker.
fn recorded_run_succeeded(path: &Path) -> bool {
    #[derive(serde::Deserialize)]
    struct Recorded {
        finished: bool,
        result: String,
    }
    let Ok(content) = fs::read_to_string(path) else {
        return false;
    };
    match serde_json::from_str::<Recorded>(&content) {
        Ok(recorded) => {
            recorded.finished
                && !recorded.result.contains("FAIL")
                && !recorded.result.to_lowercase().contains("error")
        }
        Err(_) => false,
    }
}

fn copy_dir_all(source: &Path, target: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(source).into_iter().filter_map(Result::ok) {
        let relative = entry
            .path()
            .strip_prefix(source)
            .context("walked entry is under its root")?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)
                .with_context(|| format!("create {}", destination.display()))?;
        } else {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &destination)
                .with_context(|| format!("copy {} to {}", entry.path().display(), destination.display()))?;
        }
    }
    Ok(())
}
