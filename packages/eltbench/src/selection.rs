//! Example selection for the CLI: index expressions and dialect detection.

use std::path::Path;

/// Warehouse dialect an example targets, detected from its input files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Dialect {
    #[display("snowflake")]
    Snowflake,
    #[display("bigquery")]
    BigQuery,
    #[display("local")]
    Local,
}

/// Filter example names by an index expression: `all`, a comma list
/// (`"2,3"`), an inclusive range (`"0-10"`), or a single index.
/// Out-of-range indices are dropped; an unparseable expression selects all
/// examples with a logged warning.
pub fn select_examples(names: &[String], expression: &str) -> Vec<String> {
    let expression = expression.trim();
    if expression == "all" {
        return names.to_vec();
    }

    if expression.contains(',') {
        return expression
            .split(',')
            .filter_map(|part| part.trim().parse::<usize>().ok())
            .filter_map(|index| names.get(index).cloned())
            .collect();
    }

    if let Some((start, end)) = expression.split_once('-')
        && let (Ok(start), Ok(end)) = (start.trim().parse::<usize>(), end.trim().parse::<usize>())
    {
        return names
            .iter()
            .skip(start)
            .take((end + 1).saturating_sub(start))
            .cloned()
            .collect();
    }

    match expression.parse::<usize>() {
        Ok(index) => names.get(index).cloned().into_iter().collect(),
        Err(_) => {
            tracing::warn!(expression, "invalid example index expression, selecting all");
            names.to_vec()
        }
    }
}

/// Best-effort detection of which backends an example exercises, from the
/// credential and database files present in its input directory.
pub fn detect_dialects(example_dir: &Path) -> Vec<Dialect> {
    let mut dialects = Vec::new();
    if example_dir.join("snowflake_credential.json").exists() {
        dialects.push(Dialect::Snowflake);
    }
    if example_dir.join("bigquery_credential.json").exists() {
        dialects.push(Dialect::BigQuery);
    }
    let has_local_db = example_dir
        .read_dir()
        .map(|entries| {
            entries.filter_map(Result::ok).any(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.ends_with(".sqlite") || name.ends_with(".duckdb") || name.ends_with(".db")
            })
        })
        .unwrap_or(false);
    if has_local_db {
        dialects.push(Dialect::Local);
    }
    dialects
}
