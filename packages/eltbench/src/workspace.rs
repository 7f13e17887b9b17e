//! Workspace file conventions: schema/data-model readers and content-hash
//! snapshots.
//!
//! The readers are deliberately permissive. Benchmark inputs come in several
//! historical shapes, and a malformed file degrades to an empty contribution
//! with a logged warning rather than failing the run.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Files added or changed in a workspace between two snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileDiff {
    pub added_files: Vec<String>,
    pub changed_files: Vec<String>,
}

/// A content-hash snapshot of every file under a workspace root, used to
/// attribute file changes to the stage that made them.
pub struct WorkspaceSnapshot {
    root: std::path::PathBuf,
    hashes: BTreeMap<String, String>,
}

impl WorkspaceSnapshot {
    pub fn capture(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            hashes: hash_files(root),
        }
    }

    /// Re-hash the workspace and report what appeared or changed since the
    /// snapshot was captured. Deletions are not tracked.
    pub fn diff(&self) -> FileDiff {
        let current = hash_files(&self.root);
        let mut diff = FileDiff::default();
        for (path, hash) in &current {
            match self.hashes.get(path) {
                None => diff.added_files.push(path.clone()),
                Some(old) if old != hash => diff.changed_files.push(path.clone()),
                Some(_) => {}
            }
        }
        diff
    }
}

fn hash_files(root: &Path) -> BTreeMap<String, String> {
    let mut hashes = BTreeMap::new();
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(bytes) = fs::read(entry.path()) else {
            tracing::warn!(path = %entry.path().display(), "skipping unreadable file in snapshot");
            continue;
        };
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        hashes.insert(relative, hex::encode(Sha256::digest(&bytes)));
    }
    hashes
}

/// Warehouse connection settings from `config.yaml`. Unknown keys are
/// ignored; a missing or malformed file yields the default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WarehouseConfig {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

pub fn load_config(root: &Path) -> WarehouseConfig {
    let path = root.join("config.yaml");
    let Ok(content) = fs::read_to_string(&path) else {
        return WarehouseConfig::default();
    };
    match serde_yaml::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unparseable config.yaml, ignoring");
            WarehouseConfig::default()
        }
    }
}

/// Best-effort text rendering of the workspace's schema knowledge: source
/// table definitions from `schemas/*.json` plus target tables from
/// `data_model.yaml`.
pub fn schema_context(root: &Path) -> String {
    let mut parts = Vec::new();

    let sources = render_source_schemas(root);
    if !sources.is_empty() {
        parts.push("WORKSPACE SCHEMAS:".to_string());
        parts.push(sources);
    }

    let targets = render_data_model(root);
    if !targets.is_empty() {
        parts.push("\nDATA MODEL (targets):".to_string());
        parts.push(targets);
    }

    parts.join("\n").trim().to_string()
}

/// `schemas/*.json` accepts either one `{table, columns, pks, fks}` object or
/// a `{table_name: {...}}` map per file.
fn render_source_schemas(root: &Path) -> String {
    let pattern = root.join("schemas").join("*.json");
    let Ok(entries) = glob::glob(&pattern.to_string_lossy()) else {
        return String::new();
    };

    let mut lines = Vec::new();
    for path in entries.filter_map(Result::ok) {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&content) else {
            tracing::warn!(path = %path.display(), "unparseable schema file, skipping");
            continue;
        };
        render_schema_value(&value, &mut lines);
    }
    lines.join("\n")
}

fn render_schema_value(value: &serde_json::Value, lines: &mut Vec<String>) {
    let Some(object) = value.as_object() else {
        return;
    };
    if object.contains_key("table") {
        if let Some(line) = render_table_entry(object.get("table"), value) {
            lines.push(line);
        }
        return;
    }
    for (table, meta) in object {
        if let Some(line) = render_table_entry(Some(&serde_json::Value::String(table.clone())), meta) {
            lines.push(line);
        }
    }
}

fn render_table_entry(table: Option<&serde_json::Value>, meta: &serde_json::Value) -> Option<String> {
    let table = table?.as_str()?.to_string();
    let columns = first_of(meta, &["columns", "cols"])
        .and_then(serde_json::Value::as_array)
        .map(|cols| cols.iter().filter_map(column_name).collect::<Vec<_>>())
        .unwrap_or_default();
    let pks = first_of(meta, &["pks", "primary_keys", "primary_key"])
        .map(string_list)
        .unwrap_or_default();
    let fks = first_of(meta, &["fks", "foreign_keys"])
        .and_then(serde_json::Value::as_array)
        .map(|fks| fks.iter().filter_map(foreign_key).collect::<Vec<_>>())
        .unwrap_or_default();

    let mut line = format!("{table}: cols[{}]", columns.join(", "));
    if !pks.is_empty() {
        line.push_str(&format!(" | PK[{}]", pks.join(", ")));
    }
    if !fks.is_empty() {
        line.push_str(&format!(" | FK[{}]", fks.join(", ")));
    }
    Some(line)
}

fn first_of<'a>(value: &'a serde_json::Value, keys: &[&str]) -> Option<&'a serde_json::Value> {
    keys.iter().find_map(|key| value.get(key))
}

fn column_name(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(o) => o
            .get("name")
            .or_else(|| o.get("column"))
            .or_else(|| o.get("field"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => Some(value.to_string()),
    }
}

fn string_list(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect(),
        other => vec![other.as_str().map(str::to_string).unwrap_or_else(|| other.to_string())],
    }
}

fn foreign_key(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(o) => Some(format!(
            "{}->{}.{}",
            o.get("column").and_then(|v| v.as_str()).unwrap_or(""),
            o.get("ref_table").and_then(|v| v.as_str()).unwrap_or(""),
            o.get("ref_column").and_then(|v| v.as_str()).unwrap_or(""),
        )),
        _ => None,
    }
}

/// `data_model.yaml` accepts four shapes: a list of dicts, a list of strings,
/// a dict of dicts, or a dict of column lists.
fn render_data_model(root: &Path) -> String {
    let path = root.join("data_model.yaml");
    let Ok(content) = fs::read_to_string(&path) else {
        return String::new();
    };
    let value: serde_yaml::Value = match serde_yaml::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unparseable data_model.yaml, ignoring");
            return String::new();
        }
    };

    let mut lines = Vec::new();
    match value {
        serde_yaml::Value::Sequence(items) => {
            for item in items {
                match item {
                    serde_yaml::Value::String(name) => lines.push(format!("[TARGET] {name}")),
                    serde_yaml::Value::Mapping(ref mapping) => {
                        let name = yaml_str(mapping, &["name", "table", "target", "id"]);
                        let columns = yaml_columns(mapping);
                        match name {
                            Some(name) if columns.is_empty() => lines.push(format!("[TARGET] {name}")),
                            Some(name) => lines.push(format!("[TARGET] {name}: {}", columns.join(", "))),
                            None => {}
                        }
                    }
                    other => lines.push(format!("[TARGET] {}", yaml_scalar(&other))),
                }
            }
        }
        serde_yaml::Value::Mapping(mapping) => {
            for (key, meta) in &mapping {
                let name = yaml_scalar(key);
                let columns = match meta {
                    serde_yaml::Value::Mapping(meta) => yaml_columns(meta),
                    serde_yaml::Value::Sequence(cols) => {
                        cols.iter().map(yaml_scalar).collect::<Vec<_>>()
                    }
                    _ => Vec::new(),
                };
                if columns.is_empty() {
                    lines.push(format!("[TARGET] {name}"));
                } else {
                    lines.push(format!("[TARGET] {name}: {}", columns.join(", ")));
                }
            }
        }
        other => lines.push(format!("[TARGET] {}", yaml_scalar(&other))),
    }
    lines.join("\n")
}

fn yaml_str(mapping: &serde_yaml::Mapping, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| mapping.get(*key))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn yaml_columns(mapping: &serde_yaml::Mapping) -> Vec<String> {
    for key in ["columns", "cols", "fields"] {
        if let Some(serde_yaml::Value::Sequence(cols)) = mapping.get(key) {
            return cols
                .iter()
                .filter_map(|col| match col {
                    serde_yaml::Value::String(s) => Some(s.clone()),
                    serde_yaml::Value::Mapping(m) => yaml_str(m, &["name", "column", "field"]),
                    other => Some(yaml_scalar(other)),
                })
                .collect();
        }
    }
    Vec::new()
}

fn yaml_scalar(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}
