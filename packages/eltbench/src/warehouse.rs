//! Per-invocation warehouse access for the scripted pipeline.
//!
//! Like the controller's SQL actions, every call here synthesizes a
//! throwaway script, runs it, and lets the connection die with the process.
//! There is no pooling and no shared session on purpose: a failed query
//! cannot leak state into the next one.

use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::process::{self, ShellError};
use crate::templates;

pub const DEFAULT_SQL_TIMEOUT: Duration = Duration::from_secs(200);

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("identifier pattern compiles"));

/// Validate a name for unquoted use in a `USE DATABASE`/`USE SCHEMA`
/// statement. Unquoted identifiers fold to uppercase on the warehouse side,
/// which is what the benchmark inputs rely on.
pub fn validate_ident(name: &str) -> Result<&str, String> {
    if name.is_empty() {
        return Err("Empty identifier".to_string());
    }
    if !IDENT_RE.is_match(name) {
        return Err(format!(
            "Invalid identifier '{name}'. Allowed characters: letters, digits, underscore."
        ));
    }
    Ok(name)
}

/// Execute one SQL statement against the warehouse. Returns `(ok, output)`;
/// every failure mode (bad identifier, script error, timeout) comes back
/// as `(false, message)`, never as an error.
pub fn run_sql(
    workspace: &Path,
    creds_path: &str,
    sql: &str,
    database: Option<&str>,
    schema: Option<&str>,
    timeout: Duration,
) -> (bool, String) {
    for ident in [database, schema].into_iter().flatten() {
        if let Err(e) = validate_ident(ident) {
            return (false, e);
        }
    }
    let script = templates::run_sql_script(sql, creds_path, database, schema);
    run_script(workspace, &script, timeout)
}

/// Fetch a `table: col (type), ...` rendering of the active schema's
/// catalog. Failures degrade to an empty string with a logged warning; the
/// pipeline still runs on workspace context alone.
pub fn fetch_catalog(
    workspace: &Path,
    creds_path: &str,
    database: Option<&str>,
    schema: Option<&str>,
    timeout: Duration,
) -> String {
    for ident in [database, schema].into_iter().flatten() {
        if let Err(e) = validate_ident(ident) {
            tracing::warn!(error = %e, "skipping catalog fetch");
            return String::new();
        }
    }
    let script = templates::catalog_script(creds_path, database, schema);
    let (ok, output) = run_script(workspace, &script, timeout);
    if !ok {
        tracing::warn!(output = %output, "catalog fetch failed");
        return String::new();
    }
    render_catalog(&output)
}

/// Group `table\tcolumn\ttype` lines into one line per table.
fn render_catalog(raw: &str) -> String {
    let mut tables: Vec<(String, Vec<String>)> = Vec::new();
    for line in raw.lines() {
        let mut fields = line.splitn(3, '\t');
        let (Some(table), Some(column), Some(dtype)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        match tables.last_mut() {
            Some((current, columns)) if current == table => {
                columns.push(format!("{column} ({dtype})"));
            }
            _ => tables.push((table.to_string(), vec![format!("{column} ({dtype})")])),
        }
    }
    tables.sort_by(|a, b| a.0.cmp(&b.0));
    tables
        .into_iter()
        .map(|(table, columns)| format!("{table}: {}", columns.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn run_script(workspace: &Path, script: &str, timeout: Duration) -> (bool, String) {
    let file = tempfile::Builder::new()
        .prefix("eltbench-")
        .suffix(".py")
        .tempfile_in(workspace);
    let mut file = match file {
        Ok(file) => file,
        Err(e) => return (false, format!("Error preparing script: {e}")),
    };
    if let Err(e) = file.write_all(script.as_bytes()) {
        return (false, format!("Error preparing script: {e}"));
    }
    let command = format!("python3 '{}'", file.path().display());
    match process::run_with_deadline(&command, workspace, timeout) {
        Ok(output) => {
            let text = if output.success {
                output.stdout
            } else if output.stderr.trim().is_empty() {
                output.stdout
            } else {
                format!("{}{}", output.stdout, output.stderr)
            };
            (output.success, text.trim().to_string())
        }
        Err(ShellError::TimedOut) => (false, "SQL execution time exceeded!".to_string()),
        Err(ShellError::Io(e)) => (false, format!("Error executing script: {e}")),
    }
}
