//! The permanent record of an agent run.

use std::fs;
use std::path::Path;

use color_eyre::Result;
use color_eyre::eyre::Context;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workspace::FileDiff;

/// One prompt/response/action/observation tuple. `action` is the canonical
/// rendering of the parsed action, or `None` when the turn was malformed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub prompt: String,
    pub response: String,
    pub action: Option<String>,
    pub observation: String,
}

/// The `result.json` artifact written at the end of a run; the contract the
/// downstream evaluation tooling consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub finished: bool,
    pub result: String,
    pub steps: usize,
    #[serde(default)]
    pub result_files: FileDiff,
    pub trajectory: Vec<Turn>,
}

impl RunRecord {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create result directory {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("serialize run record")?;
        fs::write(path, content).with_context(|| format!("write {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parse {}", path.display()))
    }
}
