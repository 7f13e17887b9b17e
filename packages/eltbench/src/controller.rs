//! Executes parsed actions against the workspace.
//!
//! The controller owns the only mutable working-directory state in the
//! system: an explicit field, updated exclusively by `cd`-style commands and
//! read by every path resolution. Execution results always come back as
//! observation strings; failures are reported, never raised.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::Result;
use color_eyre::eyre::Context;

use crate::action::{self, Action};
use crate::process::{self, ShellError};
use crate::templates;

/// Wall-clock bound for a single action.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(200);

/// Observations longer than this are truncated.
pub const MAX_OBSERVATION_LENGTH: usize = 30_000;

const TRUNCATION_MARKER: &str =
    "\n[Observation too long, truncated; Try other commands to get the left part.]";

const TIMEOUT_OBSERVATION: &str = "Action execution time exceeded!";

pub struct Controller {
    workspace_root: PathBuf,
    work_dir: PathBuf,
    timeout: Duration,
}

impl Controller {
    /// Anchors a controller at `root`; the working directory starts there.
    pub fn new(root: &Path) -> Result<Self> {
        let workspace_root = fs::canonicalize(root)
            .with_context(|| format!("canonicalize workspace root {}", root.display()))?;
        Ok(Self {
            work_dir: workspace_root.clone(),
            workspace_root,
            timeout: DEFAULT_ACTION_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Execute one action. Returns the observation for the agent and whether
    /// the action terminated the run. `Terminate` always returns `done`.
    pub fn step(&mut self, action: &Action) -> (String, bool) {
        let (observation, done) = match action {
            Action::Terminate { .. } => ("Terminate".to_string(), true),
            Action::Bash { code } => (self.execute_shell(code), false),
            Action::CreateFile { filepath, content } => (self.create_file(filepath, content), false),
            Action::EditFile { filepath, content } => (self.edit_file(filepath, content), false),
            Action::ExecuteSql {
                warehouse,
                query,
                save,
                save_path,
            } => (
                self.run_script(&templates::exec_sql_script(*warehouse, query, *save, save_path)),
                false,
            ),
            Action::LocalSql {
                file_path,
                query,
                output,
            } => (
                self.run_script(&templates::local_sql_script(file_path, query, output)),
                false,
            ),
            Action::GetTables {
                warehouse,
                database,
                schema,
                save_path,
            } => (
                self.run_script(&templates::get_tables_script(*warehouse, database, schema, save_path)),
                false,
            ),
            Action::GetTableInfo {
                warehouse,
                database,
                schema,
                table,
                save_path,
            } => (
                self.run_script(&templates::table_info_script(
                    *warehouse, database, schema, table, save_path,
                )),
                false,
            ),
            Action::SampleRows {
                warehouse,
                database,
                schema,
                table,
                rows,
                save_path,
            } => (
                self.run_script(&templates::sample_rows_script(
                    *warehouse, database, schema, table, *rows, save_path,
                )),
                false,
            ),
        };
        (clamp_observation(observation), done)
    }

    fn execute_shell(&mut self, command: &str) -> String {
        let trimmed = command.trim();
        if trimmed.contains("venv") {
            return "Creating a new python environment is not allowed. You can use 'pip install' to install the required packages.".to_string();
        }

        if trimmed == "cd" {
            self.work_dir = self.workspace_root.clone();
            return format!(
                "The command to change directory to {} is executed successfully.",
                self.work_dir.display()
            );
        }
        if let Some(rest) = trimmed.strip_prefix("cd ") {
            let (target, remainder) = match rest.split_once("&&") {
                Some((target, remainder)) => (target.trim(), Some(remainder.trim())),
                None => (rest.trim(), None),
            };
            self.work_dir = self.resolve_cd(target);
            let confirmation = format!(
                "The command to change directory to {} is executed successfully.",
                self.work_dir.display()
            );
            return match remainder {
                Some(rest) if !rest.is_empty() => {
                    format!("{confirmation}\n\n{}", self.run_command(rest))
                }
                _ => confirmation,
            };
        }

        self.run_command(trimmed)
    }

    fn run_command(&self, command: &str) -> String {
        match process::run_with_deadline(command, &self.work_dir, self.timeout) {
            Ok(output) => {
                let text = if output.success {
                    output.stdout
                } else if output.stderr.trim().is_empty() {
                    output.stdout
                } else {
                    output.stderr
                };
                let text = text.trim().to_string();
                if text.is_empty() {
                    "Command executed successfully. No output.".to_string()
                } else {
                    text
                }
            }
            Err(ShellError::TimedOut) => TIMEOUT_OBSERVATION.to_string(),
            Err(ShellError::Io(e)) => format!("Error executing command: {e}"),
        }
    }

    /// Write the script to a throwaway file in the working directory, run it
    /// with `python3`, and remove it. The observation is the script's output.
    fn run_script(&self, script: &str) -> String {
        let file = tempfile::Builder::new()
            .prefix("eltbench-")
            .suffix(".py")
            .tempfile_in(&self.work_dir);
        let mut file = match file {
            Ok(file) => file,
            Err(e) => return format!("Error preparing script: {e}"),
        };
        if let Err(e) = file.write_all(script.as_bytes()) {
            return format!("Error preparing script: {e}");
        }
        let command = format!("python3 '{}'", file.path().display());
        self.run_command(&command)
        // the temp file is deleted when `file` drops
    }

    fn create_file(&self, filepath: &str, content: &str) -> String {
        let path = self.resolve(filepath);
        if path.exists() {
            return format!("File {filepath} already exists.");
        }
        if let Some(parent) = path.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            return format!("Error creating {filepath}: {e}");
        }
        if let Err(e) = fs::write(&path, content) {
            return format!("Error creating {filepath}: {e}");
        }
        match validate_structured_file(&path) {
            Ok(()) => format!("File {filepath} created and written successfully."),
            Err(e) => format!("Failed to validate file {filepath}, error: {e}"),
        }
    }

    fn edit_file(&self, filepath: &str, content: &str) -> String {
        let path = self.resolve(filepath);
        if !path.exists() {
            return format!("File {filepath} does not exist.");
        }
        if let Err(e) = fs::write(&path, content) {
            return format!("Error editing {filepath}: {e}");
        }
        match validate_structured_file(&path) {
            Ok(()) => format!("File {filepath} edited successfully."),
            Err(e) => format!("Failed to validate file {filepath}, error: {e}"),
        }
    }

    fn resolve(&self, filepath: &str) -> PathBuf {
        let relative = action::normalize_path(filepath);
        if relative.is_empty() || relative == "." {
            self.work_dir.clone()
        } else {
            self.work_dir.join(relative)
        }
    }

    // Lexical resolution only; nothing stops `..` from climbing above the
    // workspace root, matching the conceptual (unenforced) invariant of the
    // protocol.
    fn resolve_cd(&self, target: &str) -> PathBuf {
        let target = target.trim();
        let (mut dir, rest) = if target.starts_with('/') {
            (self.workspace_root.clone(), action::normalize_path(target))
        } else {
            (self.work_dir.clone(), target.to_string())
        };
        for segment in rest.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    dir.pop();
                }
                other => dir.push(other),
            }
        }
        dir
    }
}

fn clamp_observation(observation: String) -> String {
    if observation.len() <= MAX_OBSERVATION_LENGTH {
        return observation;
    }
    let mut cut = MAX_OBSERVATION_LENGTH;
    while !observation.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{TRUNCATION_MARKER}", &observation[..cut])
}

/// Validate a written file when its extension implies a structured format.
/// CSV must parse with consistent record lengths, JSON and YAML must parse.
fn validate_structured_file(path: &Path) -> Result<(), String> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let Some(extension) = extension else {
        return Ok(());
    };
    let read = || fs::read_to_string(path).map_err(|e| e.to_string());
    match extension.as_str() {
        "csv" => {
            let mut reader = csv::Reader::from_path(path).map_err(|e| e.to_string())?;
            for record in reader.records() {
                record.map_err(|e| e.to_string())?;
            }
            Ok(())
        }
        "json" => serde_json::from_str::<serde_json::Value>(&read()?)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        "yaml" | "yml" => serde_yaml::from_str::<serde_yaml::Value>(&read()?)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn controller() -> (tempfile::TempDir, Controller) {
        let dir = tempfile::tempdir().unwrap();
        let controller = Controller::new(dir.path()).unwrap();
        (dir, controller)
    }

    #[test]
    fn cd_updates_working_directory() {
        let (dir, mut controller) = controller();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let obs = controller.execute_shell("cd sub");
        assert!(obs.contains("executed successfully"));
        assert!(controller.work_dir().ends_with("sub"));

        controller.execute_shell("cd ..");
        assert_eq!(controller.work_dir(), fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn compound_cd_runs_remainder_in_new_directory() {
        let (dir, mut controller) = controller();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/marker.txt"), "x").unwrap();
        let obs = controller.execute_shell("cd sub && ls");
        assert!(obs.contains("marker.txt"), "{obs}");
        assert!(controller.work_dir().ends_with("sub"));
    }

    #[test]
    fn absolute_cd_is_anchored_at_workspace_root() {
        let (dir, mut controller) = controller();
        fs::create_dir(dir.path().join("models")).unwrap();
        controller.execute_shell("cd /workspace/models");
        assert!(controller.work_dir().ends_with("models"));
        controller.execute_shell("cd /");
        assert_eq!(controller.work_dir(), fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn venv_commands_are_refused() {
        let (_dir, mut controller) = controller();
        let obs = controller.execute_shell("python3 -m venv env");
        assert!(obs.contains("not allowed"));
    }

    #[test]
    fn empty_output_reports_success() {
        let (_dir, mut controller) = controller();
        let obs = controller.execute_shell("true");
        assert_eq!(obs, "Command executed successfully. No output.");
    }

    #[test]
    fn failed_command_reports_stderr() {
        let (_dir, mut controller) = controller();
        let obs = controller.execute_shell("ls missing-file-xyz");
        assert!(obs.contains("missing-file-xyz"));
    }

    #[test]
    fn terminate_is_always_done() {
        let (_dir, mut controller) = controller();
        let (obs, done) = controller.step(&Action::Terminate {
            output: "done".to_string(),
        });
        assert!(done);
        assert_eq!(obs, "Terminate");
    }

    #[test]
    fn create_then_create_reports_existing() {
        let (dir, mut controller) = controller();
        let action = Action::CreateFile {
            filepath: "out.csv".to_string(),
            content: "a,b\n1,2".to_string(),
        };
        let (obs, done) = controller.step(&action);
        assert!(!done);
        assert!(obs.contains("created and written successfully"), "{obs}");
        assert_eq!(fs::read_to_string(dir.path().join("out.csv")).unwrap(), "a,b\n1,2");

        let (obs, _) = controller.step(&action);
        assert!(obs.contains("already exists"), "{obs}");
        assert_eq!(fs::read_to_string(dir.path().join("out.csv")).unwrap(), "a,b\n1,2");
    }

    #[test]
    fn edit_missing_file_reports_and_creates_nothing() {
        let (dir, mut controller) = controller();
        let (obs, _) = controller.step(&Action::EditFile {
            filepath: "absent.sql".to_string(),
            content: "SELECT 1".to_string(),
        });
        assert!(obs.contains("does not exist"), "{obs}");
        assert!(!dir.path().join("absent.sql").exists());
    }

    #[test]
    fn invalid_json_write_is_reported_not_raised() {
        let (dir, mut controller) = controller();
        let (obs, _) = controller.step(&Action::CreateFile {
            filepath: "broken.json".to_string(),
            content: "{ not json".to_string(),
        });
        assert!(obs.contains("Failed to validate"), "{obs}");
        // the file is still written; only the validation is reported
        assert!(dir.path().join("broken.json").exists());
    }

    #[test]
    fn uneven_csv_write_is_reported() {
        let (_dir, mut controller) = controller();
        let (obs, _) = controller.step(&Action::CreateFile {
            filepath: "ragged.csv".to_string(),
            content: "a,b\n1,2,3".to_string(),
        });
        assert!(obs.contains("Failed to validate"), "{obs}");
    }

    #[test]
    fn long_observations_are_truncated_with_marker() {
        let (_dir, mut controller) = controller();
        let (obs, _) = controller.step(&Action::Bash {
            code: format!("printf 'x%.0s' $(seq 1 {})", MAX_OBSERVATION_LENGTH + 500),
        });
        assert!(obs.len() <= MAX_OBSERVATION_LENGTH + TRUNCATION_MARKER.len());
        assert!(obs.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn timed_out_commands_report_the_timeout() {
        let (dir, _) = controller();
        let mut controller = Controller::new(dir.path())
            .unwrap()
            .with_timeout(Duration::from_millis(100));
        let (obs, done) = controller.step(&Action::Bash {
            code: "sleep 10".to_string(),
        });
        assert!(!done);
        assert_eq!(obs, TIMEOUT_OBSERVATION);
    }
}
