//! The textual action protocol between the model and the controller.
//!
//! Every action an agent can take has one canonical call-like signature
//! (e.g. `Bash(code="ls -l")`). Responses are free-form text; each variant's
//! parser extracts the *last* occurrence of its signature so that a model
//! which proposes and then revises an action within one response is taken at
//! its final word. Absence of any parseable action is a normal outcome, not
//! an error.

use std::fmt::{self, Display, Formatter};
use std::sync::LazyLock;

use regex::Regex;

/// Warehouse backend addressed by an SQL or catalog action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Warehouse {
    #[display("snowflake")]
    Snowflake,
    #[display("bigquery")]
    BigQuery,
}

/// One structured command an agent can issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// `Bash(code="shell_command")`
    Bash { code: String },

    /// `CreateFile(filepath="path"):` followed by a fenced content block.
    CreateFile { filepath: String, content: String },

    /// `EditFile(filepath="path"):` followed by a fenced content block.
    /// Overwrites the whole file; the file must already exist.
    EditFile { filepath: String, content: String },

    /// `SNOWFLAKE_EXEC_SQL(...)` / `BIGQUERY_EXEC_SQL(...)`
    ExecuteSql {
        warehouse: Warehouse,
        query: String,
        save: bool,
        save_path: String,
    },

    /// `LOCAL_DB_SQL(file_path=..., command=..., output=...)` against a
    /// sqlite/duckdb file in the workspace.
    LocalSql {
        file_path: String,
        query: String,
        output: String,
    },

    /// `SF_GET_TABLES(...)` / `BQ_GET_TABLES(...)`
    GetTables {
        warehouse: Warehouse,
        database: String,
        schema: String,
        save_path: String,
    },

    /// `SF_GET_TABLE_INFO(...)` / `BQ_GET_TABLE_INFO(...)`
    GetTableInfo {
        warehouse: Warehouse,
        database: String,
        schema: String,
        table: String,
        save_path: String,
    },

    /// `SF_SAMPLE_ROWS(...)` / `BQ_SAMPLE_ROWS(...)`
    SampleRows {
        warehouse: Warehouse,
        database: String,
        schema: String,
        table: String,
        rows: u32,
        save_path: String,
    },

    /// `Terminate(output="final_message")`
    Terminate { output: String },
}

/// Parse one action out of a raw model response.
///
/// Signatures are tried in a fixed priority order: fenced file-content
/// actions first (their bodies may embed other signatures verbatim), then SQL
/// execution, then catalog introspection, then `Bash`, with `Terminate` last.
/// Returns `None` when no signature matches.
pub fn parse_action(text: &str) -> Option<Action> {
    parse_create_file(text)
        .or_else(|| parse_edit_file(text))
        .or_else(|| parse_exec_sql(text, Warehouse::Snowflake))
        .or_else(|| parse_exec_sql(text, Warehouse::BigQuery))
        .or_else(|| parse_local_sql(text))
        .or_else(|| parse_sf_get_tables(text))
        .or_else(|| parse_sf_get_table_info(text))
        .or_else(|| parse_sf_sample_rows(text))
        .or_else(|| parse_bq_get_tables(text))
        .or_else(|| parse_bq_get_table_info(text))
        .or_else(|| parse_bq_sample_rows(text))
        .or_else(|| parse_bash(text))
        .or_else(|| parse_terminate(text))
}

/// Lexically normalize a file-path argument into a path relative to the
/// working directory: strip a leading `/workspace` prefix, drop the leading
/// slash, and collapse `.`/`..` segments. Idempotent.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let stripped = trimmed
        .strip_prefix("/workspace/")
        .or_else(|| trimmed.strip_prefix("/workspace"))
        .unwrap_or(trimmed);
    let relative = stripped.trim_start_matches('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        ".".to_string()
    } else {
        segments.join("/")
    }
}

/// Strip one pair of wrapping quote characters (`"`, `'` or backtick) and
/// un-escape embedded occurrences of the same quote.
pub fn remove_quote(text: &str) -> String {
    let trimmed = text.trim();
    for quote in ['"', '\'', '`'] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            let inner = &trimmed[1..trimmed.len() - 1];
            let escaped = format!("\\{quote}");
            return inner.replace(&escaped, &quote.to_string()).trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Un-escape a double-quoted argument body: `\n`, `\t`, `\r`, quotes and
/// backslashes. Unknown escapes are preserved verbatim.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('`') => out.push('`'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Un-escape only quote characters and backslashes, leaving `\n` and friends
/// alone. SQL bodies legitimately contain backslash sequences.
fn unescape_quotes(s: &str) -> String {
    s.replace("\\\"", "\"").replace("\\'", "'").replace("\\\\", "\\")
}

fn escape_double_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("action pattern compiles")
}

static BASH_RE: LazyLock<Regex> = LazyLock::new(|| re(r#"(?s)Bash\(code="((?:\\.|[^"\\])*)"\)"#));

static CREATE_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?s)CreateFile\(filepath=(.*?)\).*?```[ \t]*\w*[ \t]*\r?\n(.*?)[\r\n \t]*```"));

static EDIT_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?s)EditFile\(filepath=(.*?)\).*?```[ \t]*\w*[ \t]*\r?\n(.*?)[\r\n \t]*```"));

static LOCAL_SQL_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?s)LOCAL_DB_SQL\(file_path=(.*?), command=(.*?), output=(.*?)\)"));

static SF_GET_TABLES_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?s)SF_GET_TABLES\(database_name=(.*?), schema_name=(.*?), save_path=(.*?)\)"));

static SF_GET_TABLE_INFO_RE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?s)SF_GET_TABLE_INFO\(database_name=(.*?), schema_name=(.*?), table=(.*?), save_path=(.*?)\)")
});

static SF_SAMPLE_ROWS_RE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?s)SF_SAMPLE_ROWS\(database_name=(.*?), schema_name=(.*?), table=(.*?), row_number=(.*?), save_path=(.*?)\)")
});

// The BigQuery catalog signatures are matched without requiring the `BQ_`
// prefix; `dataset_name=` keeps them from colliding with the Snowflake forms.
static BQ_GET_TABLES_RE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?s)GET_TABLES\(database_name=(.*?), dataset_name=(.*?), save_path=(.*?)\)"));

static BQ_GET_TABLE_INFO_RE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?s)GET_TABLE_INFO\(database_name=(.*?), dataset_name=(.*?), table=(.*?), save_path=(.*?)\)")
});

static BQ_SAMPLE_ROWS_RE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?s)BQ_SAMPLE_ROWS\(database_name=(.*?), dataset_name=(.*?), table=(.*?), row_number=(.*?), save_path=(.*?)\)")
});

static TERMINATE_RE: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)Terminate\(output=(.*?)\)"));

// The `regex` crate has no backreferences, so the quote-matched SQL body is
// written out as one branch per quote form. Triple-quoted
// bodies are non-greedy; single/double-quoted bodies tolerate escaped quotes.
fn exec_sql_pattern(keyword: &str) -> String {
    format!(
        concat!(
            r#"(?s){kw}\(\s*sql_query\s*=\s*"#,
            r#"(?:"""(?P<t2>.*?)"""|'''(?P<t1>.*?)'''|"(?P<d>(?:\\.|[^"\\])*)"|'(?P<s>(?:\\.|[^'\\])*)')"#,
            r#"\s*,\s*is_save\s*=\s*(?P<save>True|False)"#,
            r#"(?:\s*,\s*save_path\s*=\s*(?:"(?P<pd>(?:\\.|[^"\\])*)"|'(?P<ps>(?:\\.|[^'\\])*)'))?"#,
            r#"\s*\)"#,
        ),
        kw = keyword
    )
}

static SF_EXEC_SQL_RE: LazyLock<Regex> =
    LazyLock::new(|| re(&exec_sql_pattern("SNOWFLAKE_EXEC_SQL")));

static BQ_EXEC_SQL_RE: LazyLock<Regex> =
    LazyLock::new(|| re(&exec_sql_pattern("BIGQUERY_EXEC_SQL")));

fn parse_bash(text: &str) -> Option<Action> {
    let caps = BASH_RE.captures_iter(text).last()?;
    Some(Action::Bash {
        code: unescape(caps.get(1)?.as_str()),
    })
}

fn parse_create_file(text: &str) -> Option<Action> {
    let caps = CREATE_FILE_RE.captures_iter(text).last()?;
    Some(Action::CreateFile {
        filepath: normalize_path(&remove_quote(caps.get(1)?.as_str())),
        content: caps.get(2)?.as_str().trim().to_string(),
    })
}

fn parse_edit_file(text: &str) -> Option<Action> {
    let caps = EDIT_FILE_RE.captures_iter(text).last()?;
    Some(Action::EditFile {
        filepath: normalize_path(&remove_quote(caps.get(1)?.as_str())),
        content: caps.get(2)?.as_str().trim().to_string(),
    })
}

fn parse_exec_sql(text: &str, warehouse: Warehouse) -> Option<Action> {
    let pattern = match warehouse {
        Warehouse::Snowflake => &*SF_EXEC_SQL_RE,
        Warehouse::BigQuery => &*BQ_EXEC_SQL_RE,
    };
    let caps = pattern.captures_iter(text).last()?;
    let query = ["t2", "t1", "d", "s"]
        .iter()
        .find_map(|name| caps.name(name))?
        .as_str();
    let save_path = ["pd", "ps"]
        .iter()
        .find_map(|name| caps.name(name))
        .map(|m| m.as_str())
        .unwrap_or("");
    Some(Action::ExecuteSql {
        warehouse,
        query: unescape_quotes(query).trim().to_string(),
        save: caps.name("save")?.as_str() == "True",
        save_path: normalize_path(&unescape_quotes(save_path)),
    })
}

fn parse_local_sql(text: &str) -> Option<Action> {
    let caps = LOCAL_SQL_RE.captures_iter(text).last()?;
    Some(Action::LocalSql {
        file_path: normalize_path(&remove_quote(caps.get(1)?.as_str())),
        query: remove_quote(caps.get(2)?.as_str()),
        output: normalize_path(&remove_quote(caps.get(3)?.as_str())),
    })
}

fn parse_sf_get_tables(text: &str) -> Option<Action> {
    let caps = SF_GET_TABLES_RE.captures_iter(text).last()?;
    Some(Action::GetTables {
        warehouse: Warehouse::Snowflake,
        database: remove_quote(caps.get(1)?.as_str()),
        schema: remove_quote(caps.get(2)?.as_str()),
        save_path: normalize_path(&remove_quote(caps.get(3)?.as_str())),
    })
}

fn parse_sf_get_table_info(text: &str) -> Option<Action> {
    let caps = SF_GET_TABLE_INFO_RE.captures_iter(text).last()?;
    Some(Action::GetTableInfo {
        warehouse: Warehouse::Snowflake,
        database: remove_quote(caps.get(1)?.as_str()),
        schema: remove_quote(caps.get(2)?.as_str()),
        table: remove_quote(caps.get(3)?.as_str()),
        save_path: normalize_path(&remove_quote(caps.get(4)?.as_str())),
    })
}

fn parse_sf_sample_rows(text: &str) -> Option<Action> {
    let caps = SF_SAMPLE_ROWS_RE.captures_iter(text).last()?;
    Some(Action::SampleRows {
        warehouse: Warehouse::Snowflake,
        database: remove_quote(caps.get(1)?.as_str()),
        schema: remove_quote(caps.get(2)?.as_str()),
        table: remove_quote(caps.get(3)?.as_str()),
        rows: remove_quote(caps.get(4)?.as_str()).parse().ok()?,
        save_path: normalize_path(&remove_quote(caps.get(5)?.as_str())),
    })
}

fn parse_bq_get_tables(text: &str) -> Option<Action> {
    let caps = BQ_GET_TABLES_RE.captures_iter(text).last()?;
    Some(Action::GetTables {
        warehouse: Warehouse::BigQuery,
        database: remove_quote(caps.get(1)?.as_str()),
        schema: remove_quote(caps.get(2)?.as_str()),
        save_path: normalize_path(&remove_quote(caps.get(3)?.as_str())),
    })
}

fn parse_bq_get_table_info(text: &str) -> Option<Action> {
    let caps = BQ_GET_TABLE_INFO_RE.captures_iter(text).last()?;
    Some(Action::GetTableInfo {
        warehouse: Warehouse::BigQuery,
        database: remove_quote(caps.get(1)?.as_str()),
        schema: remove_quote(caps.get(2)?.as_str()),
        table: remove_quote(caps.get(3)?.as_str()),
        save_path: normalize_path(&remove_quote(caps.get(4)?.as_str())),
    })
}

fn parse_bq_sample_rows(text: &str) -> Option<Action> {
    let caps = BQ_SAMPLE_ROWS_RE.captures_iter(text).last()?;
    Some(Action::SampleRows {
        warehouse: Warehouse::BigQuery,
        database: remove_quote(caps.get(1)?.as_str()),
        schema: remove_quote(caps.get(2)?.as_str()),
        table: remove_quote(caps.get(3)?.as_str()),
        rows: remove_quote(caps.get(4)?.as_str()).parse().ok()?,
        save_path: normalize_path(&remove_quote(caps.get(5)?.as_str())),
    })
}

fn parse_terminate(text: &str) -> Option<Action> {
    let caps = TERMINATE_RE.captures_iter(text).last()?;
    Some(Action::Terminate {
        output: remove_quote(caps.get(1)?.as_str()),
    })
}

impl Display for Action {
    /// Renders the canonical signature; `parse_action` accepts this form.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Action::Bash { code } => write!(f, "Bash(code=\"{}\")", escape_double_quoted(code)),
            Action::CreateFile { filepath, content } => {
                write!(f, "CreateFile(filepath=\"{filepath}\"):\n```\n{content}\n```")
            }
            Action::EditFile { filepath, content } => {
                write!(f, "EditFile(filepath=\"{filepath}\"):\n```\n{content}\n```")
            }
            Action::ExecuteSql {
                warehouse,
                query,
                save,
                save_path,
            } => {
                let keyword = match warehouse {
                    Warehouse::Snowflake => "SNOWFLAKE_EXEC_SQL",
                    Warehouse::BigQuery => "BIGQUERY_EXEC_SQL",
                };
                let flag = if *save { "True" } else { "False" };
                if save_path.is_empty() {
                    write!(f, "{keyword}(sql_query=\"\"\"{query}\"\"\", is_save={flag})")
                } else {
                    write!(
                        f,
                        "{keyword}(sql_query=\"\"\"{query}\"\"\", is_save={flag}, save_path=\"{save_path}\")"
                    )
                }
            }
            Action::LocalSql {
                file_path,
                query,
                output,
            } => write!(
                f,
                "LOCAL_DB_SQL(file_path=\"{file_path}\", command=\"{query}\", output=\"{output}\")"
            ),
            Action::GetTables {
                warehouse,
                database,
                schema,
                save_path,
            } => match warehouse {
                Warehouse::Snowflake => write!(
                    f,
                    "SF_GET_TABLES(database_name=\"{database}\", schema_name=\"{schema}\", save_path=\"{save_path}\")"
                ),
                Warehouse::BigQuery => write!(
                    f,
                    "BQ_GET_TABLES(database_name=\"{database}\", dataset_name=\"{schema}\", save_path=\"{save_path}\")"
                ),
            },
            Action::GetTableInfo {
                warehouse,
                database,
                schema,
                table,
                save_path,
            } => match warehouse {
                Warehouse::Snowflake => write!(
                    f,
                    "SF_GET_TABLE_INFO(database_name=\"{database}\", schema_name=\"{schema}\", table=\"{table}\", save_path=\"{save_path}\")"
                ),
                Warehouse::BigQuery => write!(
                    f,
                    "BQ_GET_TABLE_INFO(database_name=\"{database}\", dataset_name=\"{schema}\", table=\"{table}\", save_path=\"{save_path}\")"
                ),
            },
            Action::SampleRows {
                warehouse,
                database,
                schema,
                table,
                rows,
                save_path,
            } => match warehouse {
                Warehouse::Snowflake => write!(
                    f,
                    "SF_SAMPLE_ROWS(database_name=\"{database}\", schema_name=\"{schema}\", table=\"{table}\", row_number={rows}, save_path=\"{save_path}\")"
                ),
                Warehouse::BigQuery => write!(
                    f,
                    "BQ_SAMPLE_ROWS(database_name=\"{database}\", dataset_name=\"{schema}\", table=\"{table}\", row_number={rows}, save_path=\"{save_path}\")"
                ),
            },
            Action::Terminate { output } => {
                write!(f, "Terminate(output=\"{}\")", escape_double_quoted(output))
            }
        }
    }
}

/// The action-space documentation block embedded in agent prompts.
///
/// Only the actions usable against the selected backends are documented, so
/// a Snowflake-only run never advertises BigQuery actions.
pub fn action_space_docs(snowflake: bool, bigquery: bool, local: bool) -> String {
    let mut sections = vec![
        r#"## Bash
* Signature: Bash(code="shell_command")
* Description: executes a non-interactive shell command in the working directory. `cd` updates the working directory for subsequent actions.
* Example: Bash(code="ls -l")"#
            .to_string(),
        r#"## CreateFile
* Signature: CreateFile(filepath="path/to/file"):
```
file_content
```
* Description: creates a new file with the fenced content. Fails if the file already exists; use EditFile to modify an existing file.
* Example: CreateFile(filepath="sql/orders.sql"):
```
SELECT * FROM orders
```"#
            .to_string(),
        r#"## EditFile
* Signature: EditFile(filepath="path/to/file"):
```
file_content
```
* Description: overwrites an existing file with the fenced content. Fails if the file does not exist."#
            .to_string(),
    ];

    if snowflake {
        sections.push(
            r#"## SNOWFLAKE_EXEC_SQL
* Signature: SNOWFLAKE_EXEC_SQL(sql_query="SELECT ...", is_save=True, save_path="./out.csv")
* Description: executes a SQL query on Snowflake. With is_save=True the result rows are written to save_path as CSV; otherwise they are printed.
* Example: SNOWFLAKE_EXEC_SQL(sql_query="SELECT * FROM DB.SCHEMA.T LIMIT 10", is_save=False)"#
                .to_string(),
        );
        sections.push(
            r#"## SF_GET_TABLES
* Signature: SF_GET_TABLES(database_name="DB", schema_name="SCHEMA", save_path="./tables.csv")
* Description: lists the tables of a Snowflake schema into a CSV file."#
                .to_string(),
        );
        sections.push(
            r#"## SF_GET_TABLE_INFO
* Signature: SF_GET_TABLE_INFO(database_name="DB", schema_name="SCHEMA", table="T", save_path="./info.csv")
* Description: saves the column names, types and comments of one table to a CSV file."#
                .to_string(),
        );
        sections.push(
            r#"## SF_SAMPLE_ROWS
* Signature: SF_SAMPLE_ROWS(database_name="DB", schema_name="SCHEMA", table="T", row_number=10, save_path="./sample.json")
* Description: samples rows from a table and saves them as JSON."#
                .to_string(),
        );
    }
    if bigquery {
        sections.push(
            r#"## BIGQUERY_EXEC_SQL
* Signature: BIGQUERY_EXEC_SQL(sql_query="SELECT ...", is_save=True, save_path="./out.csv")
* Description: executes a SQL query on BigQuery. With is_save=True the result rows are written to save_path as CSV; otherwise they are printed."#
                .to_string(),
        );
        sections.push(
            r#"## BQ_GET_TABLES
* Signature: BQ_GET_TABLES(database_name="PROJECT", dataset_name="DATASET", save_path="./tables.csv")
* Description: lists the tables of a BigQuery dataset into a CSV file."#
                .to_string(),
        );
        sections.push(
            r#"## BQ_GET_TABLE_INFO
* Signature: BQ_GET_TABLE_INFO(database_name="PROJECT", dataset_name="DATASET", table="T", save_path="./info.csv")
* Description: saves the column field paths and types of one table to a CSV file."#
                .to_string(),
        );
        sections.push(
            r#"## BQ_SAMPLE_ROWS
* Signature: BQ_SAMPLE_ROWS(database_name="PROJECT", dataset_name="DATASET", table="T", row_number=10, save_path="./sample.json")
* Description: samples rows from a table and saves them as JSON."#
                .to_string(),
        );
    }
    if local {
        sections.push(
            r#"## LOCAL_DB_SQL
* Signature: LOCAL_DB_SQL(file_path="./data.duckdb", command="SELECT ...", output="./out.csv")
* Description: runs a query against a local sqlite/duckdb database file. A .csv output path saves the result; any other value prints it."#
                .to_string(),
        );
    }
    sections.push(
        r#"## Terminate
* Signature: Terminate(output="final_message")
* Description: ends the task and reports the final result message."#
            .to_string(),
    );

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    use super::*;

    #[test]
    fn bash_round_trip() {
        let action = parse_action(r#"Bash(code="ls -l")"#);
        assert_eq!(
            action,
            Some(Action::Bash {
                code: "ls -l".to_string()
            })
        );
    }

    #[test]
    fn bash_unescapes_embedded_quotes_and_newlines() {
        let action = parse_action(r#"Bash(code="echo \"hi\"\nls")"#);
        assert_eq!(
            action,
            Some(Action::Bash {
                code: "echo \"hi\"\nls".to_string()
            })
        );
    }

    #[test]
    fn last_occurrence_wins() {
        let text = "Bash(code=\"ls\")\nOn second thought:\nBash(code=\"pwd\")";
        assert_eq!(
            parse_action(text),
            Some(Action::Bash {
                code: "pwd".to_string()
            })
        );
    }

    #[test]
    fn create_file_with_fence() {
        let text = "CreateFile(filepath=\"/workspace/out.csv\"):\n```\na,b\n1,2\n```";
        assert_eq!(
            parse_action(text),
            Some(Action::CreateFile {
                filepath: "out.csv".to_string(),
                content: "a,b\n1,2".to_string(),
            })
        );
    }

    #[test]
    fn create_file_tolerates_fence_language_tag() {
        let text = "CreateFile(filepath='sql/model.sql'):\n```sql\nSELECT 1\n```";
        assert_eq!(
            parse_action(text),
            Some(Action::CreateFile {
                filepath: "sql/model.sql".to_string(),
                content: "SELECT 1".to_string(),
            })
        );
    }

    #[test]
    fn snowflake_exec_sql_triple_quoted() {
        let text = "SNOWFLAKE_EXEC_SQL(sql_query=\"\"\"SELECT *\nFROM T\"\"\", is_save=True, save_path=\"./out.csv\")";
        assert_eq!(
            parse_action(text),
            Some(Action::ExecuteSql {
                warehouse: Warehouse::Snowflake,
                query: "SELECT *\nFROM T".to_string(),
                save: true,
                save_path: "out.csv".to_string(),
            })
        );
    }

    #[test]
    fn snowflake_exec_sql_escaped_quotes_no_save_path() {
        let text = r#"SNOWFLAKE_EXEC_SQL(sql_query="SELECT \"NAME\" FROM T", is_save=False)"#;
        assert_eq!(
            parse_action(text),
            Some(Action::ExecuteSql {
                warehouse: Warehouse::Snowflake,
                query: "SELECT \"NAME\" FROM T".to_string(),
                save: false,
                save_path: String::new(),
            })
        );
    }

    #[test]
    fn bigquery_exec_sql() {
        let text = "BIGQUERY_EXEC_SQL(sql_query='SELECT 1', is_save=False)";
        assert!(matches!(
            parse_action(text),
            Some(Action::ExecuteSql {
                warehouse: Warehouse::BigQuery,
                ..
            })
        ));
    }

    #[test]
    fn catalog_actions_parse() {
        let text = r#"SF_GET_TABLE_INFO(database_name="DB", schema_name="S", table="T", save_path="./schemas/t.csv")"#;
        assert_eq!(
            parse_action(text),
            Some(Action::GetTableInfo {
                warehouse: Warehouse::Snowflake,
                database: "DB".to_string(),
                schema: "S".to_string(),
                table: "T".to_string(),
                save_path: "schemas/t.csv".to_string(),
            })
        );

        let text = r#"BQ_SAMPLE_ROWS(database_name="P", dataset_name="D", table="T", row_number=5, save_path="./s.json")"#;
        assert_eq!(
            parse_action(text),
            Some(Action::SampleRows {
                warehouse: Warehouse::BigQuery,
                database: "P".to_string(),
                schema: "D".to_string(),
                table: "T".to_string(),
                rows: 5,
                save_path: "s.json".to_string(),
            })
        );
    }

    #[test]
    fn local_sql_parses() {
        let text = r#"LOCAL_DB_SQL(file_path="./db.duckdb", command="SELECT 1", output="./out.csv")"#;
        assert_eq!(
            parse_action(text),
            Some(Action::LocalSql {
                file_path: "db.duckdb".to_string(),
                query: "SELECT 1".to_string(),
                output: "out.csv".to_string(),
            })
        );
    }

    #[test]
    fn terminate_parses() {
        assert_eq!(
            parse_action(r#"All done. Terminate(output="Task completed successfully")"#),
            Some(Action::Terminate {
                output: "Task completed successfully".to_string()
            })
        );
    }

    #[test]
    fn prose_without_action_parses_to_none() {
        assert_eq!(parse_action("Let me think about the schema first."), None);
    }

    #[test]
    fn fenced_file_content_shadows_embedded_actions() {
        // A CreateFile body quoting a Bash signature must not be mistaken
        // for a Bash action.
        let text = "CreateFile(filepath=\"notes.md\"):\n```\nRun Bash(code=\"rm -rf /\") to clean up\n```";
        assert!(matches!(parse_action(text), Some(Action::CreateFile { .. })));
    }

    #[test_case("/workspace/foo.csv", "foo.csv"; "workspace prefix")]
    #[test_case("foo.csv", "foo.csv"; "already relative")]
    #[test_case("/foo.csv", "foo.csv"; "leading slash")]
    #[test_case("./foo.csv", "foo.csv"; "dot slash")]
    #[test_case("././foo.csv", "foo.csv"; "double dot slash")]
    #[test_case("a/b/../c.csv", "a/c.csv"; "parent segment")]
    #[test_case("/workspace", "."; "bare workspace")]
    #[test_case(".", "."; "bare dot")]
    #[test]
    fn normalize_path_cases(input: &str, expected: &str) {
        assert_eq!(normalize_path(input), expected);
        // idempotence
        assert_eq!(normalize_path(&normalize_path(input)), normalize_path(input));
    }

    #[test]
    fn render_parse_round_trips() {
        let actions = vec![
            Action::Bash {
                code: "echo \"a\" && ls".to_string(),
            },
            Action::CreateFile {
                filepath: "sql/orders.sql".to_string(),
                content: "SELECT 1".to_string(),
            },
            Action::EditFile {
                filepath: "profiles.yml".to_string(),
                content: "target: dev".to_string(),
            },
            Action::ExecuteSql {
                warehouse: Warehouse::Snowflake,
                query: "SELECT *\nFROM T".to_string(),
                save: true,
                save_path: "out.csv".to_string(),
            },
            Action::LocalSql {
                file_path: "db.sqlite".to_string(),
                query: "SELECT 1".to_string(),
                output: "out.csv".to_string(),
            },
            Action::GetTables {
                warehouse: Warehouse::BigQuery,
                database: "P".to_string(),
                schema: "D".to_string(),
                save_path: "tables.csv".to_string(),
            },
            Action::GetTableInfo {
                warehouse: Warehouse::Snowflake,
                database: "DB".to_string(),
                schema: "S".to_string(),
                table: "T".to_string(),
                save_path: "info.csv".to_string(),
            },
            Action::SampleRows {
                warehouse: Warehouse::Snowflake,
                database: "DB".to_string(),
                schema: "S".to_string(),
                table: "T".to_string(),
                rows: 10,
                save_path: "sample.json".to_string(),
            },
            Action::Terminate {
                output: "done".to_string(),
            },
        ];
        for action in actions {
            assert_eq!(parse_action(&action.to_string()), Some(action.clone()), "{action}");
        }
    }

    #[test]
    fn docs_respect_backend_selection() {
        let docs = action_space_docs(true, false, false);
        assert!(docs.contains("SNOWFLAKE_EXEC_SQL"));
        assert!(!docs.contains("BIGQUERY_EXEC_SQL"));
        assert!(!docs.contains("LOCAL_DB_SQL"));
        assert!(docs.contains("Terminate"));
    }
}
