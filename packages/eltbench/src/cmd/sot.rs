//! Run the SQL-of-Thought pipeline for one example workspace.

use std::fs;
use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;
use color_eyre::eyre::Context;
use owo_colors::OwoColorize;

use eltbench::llm::ApiClient;
use eltbench::sot::{self, SotOptions};

const DEFAULT_QUESTION: &str = "\
Write the SQL transformations that construct the final tables defined in \
data_model.yaml from the source tables already loaded in the warehouse.";

#[derive(Args, Clone, Debug)]
pub struct Config {
    /// The example workspace to run in.
    #[arg(long)]
    pub workspace: PathBuf,

    /// Task description; defaults to the standard transformation task.
    #[arg(long)]
    pub question: Option<String>,

    /// Warehouse database to target (defaults to config.yaml).
    #[arg(long)]
    pub database: Option<String>,

    /// Warehouse schema to target (defaults to config.yaml).
    #[arg(long)]
    pub schema: Option<String>,

    #[arg(long, default_value = "gpt-4o")]
    pub model: String,

    #[arg(long, default_value_t = 1.0)]
    pub temperature: f64,

    /// Execute/correct iterations after a failed execution.
    #[arg(long, default_value_t = 3)]
    pub max_retries: usize,

    /// Path of the credentials file, relative to the workspace.
    #[arg(long, default_value = "./snowflake_credential.json")]
    pub creds_path: String,
}

pub fn main(config: Config) -> Result<()> {
    let workspace = fs::canonicalize(&config.workspace)
        .with_context(|| format!("workspace {} does not exist", config.workspace.display()))?;

    let warehouse_config = eltbench::workspace::load_config(&workspace);
    let database = config.database.or(warehouse_config.database);
    let schema = config.schema.or(warehouse_config.schema);

    let options = SotOptions::builder()
        .model(config.model)
        .temperature(config.temperature)
        .max_correction_attempts(config.max_retries)
        .creds_path(config.creds_path)
        .maybe_database(database)
        .maybe_schema(schema)
        .build();

    let question = config.question.as_deref().unwrap_or(DEFAULT_QUESTION);
    let llm = ApiClient::new()?;
    let (outcome, debug_log) = sot::run(question, &workspace, &llm, &options);

    let log_path = workspace.join("sot_debug.log");
    fs::write(&log_path, debug_log).with_context(|| format!("write {}", log_path.display()))?;

    let result_dir = workspace.join("sot");
    fs::create_dir_all(&result_dir).with_context(|| format!("create {}", result_dir.display()))?;
    let result_path = result_dir.join("result.json");
    fs::write(&result_path, serde_json::to_string_pretty(&outcome)?)
        .with_context(|| format!("write {}", result_path.display()))?;

    if outcome.ok {
        println!("{} final SQL after {} correction(s):", "✓".green(), outcome.correction_attempts);
        println!("{}", outcome.result);
    } else {
        println!("{} failed after {} correction(s):", "✗".red(), outcome.correction_attempts);
        println!("{}", outcome.result);
    }
    println!("debug log: {}", log_path.display().to_string().dimmed());
    Ok(())
}
