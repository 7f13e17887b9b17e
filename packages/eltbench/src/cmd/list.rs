//! List the available benchmark examples.

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;
use itertools::Itertools;
use owo_colors::OwoColorize;

use eltbench::selection::detect_dialects;

use super::run::list_examples;

#[derive(Args, Clone, Debug)]
pub struct Config {
    /// Directory containing one sub-directory per benchmark example.
    #[arg(long, default_value = "data/inputs")]
    pub examples_dir: PathBuf,
}

pub fn main(config: Config) -> Result<()> {
    let examples = list_examples(&config.examples_dir)?;
    for (index, name) in examples.iter().enumerate() {
        let dialects = detect_dialects(&config.examples_dir.join(name));
        let tags = if dialects.is_empty() {
            "unknown".to_string()
        } else {
            dialects.iter().map(ToString::to_string).join(", ")
        };
        println!("{index:>4}  {name}  {}", format!("[{tags}]").dimmed());
    }
    println!("{} example(s)", examples.len().to_string().bold());
    Ok(())
}
