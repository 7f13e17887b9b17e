//! The SQL-of-Thought pipeline.
//!
//! A deliberately tighter-scripted sibling of the multi-agent pipeline: five
//! single-shot model calls (schema link, decompose, plan, generate, correct)
//! instead of free-running agent loops. All calls share one schema-context
//! string merging workspace files with a live catalog snapshot, and every
//! call plus its output is appended to a flat debug log returned beside the
//! outcome.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use bon::Builder;
use regex::Regex;
use serde::Serialize;

use crate::llm::{CompletionRequest, LlmClient, Payload, parse_payload};
use crate::warehouse;
use crate::workspace;

#[derive(Debug, Clone, Builder)]
pub struct SotOptions {
    #[builder(into)]
    pub model: String,

    #[builder(default = 1.0)]
    pub temperature: f64,

    /// Execute/correct iterations after the first failed execution.
    #[builder(default = 3)]
    pub max_correction_attempts: usize,

    #[builder(into, default = String::from("./snowflake_credential.json"))]
    pub creds_path: String,

    #[builder(into)]
    pub database: Option<String>,

    #[builder(into)]
    pub schema: Option<String>,

    #[builder(default = warehouse::DEFAULT_SQL_TIMEOUT)]
    pub sql_timeout: Duration,
}

#[derive(Debug, Serialize)]
pub struct SotOutcome {
    pub ok: bool,
    /// The final SQL on success, the last error otherwise.
    pub result: String,
    pub correction_attempts: usize,
}

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^```(?:sql)?\s*|\s*```$").expect("fence pattern compiles"));
static SQL_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*SQL\s*:\s*").expect("prefix pattern compiles"));

/// Normalize the SQL a model emits: strip code fences, a leading `SQL:`
/// label, and trailing semicolons/whitespace.
pub fn postprocess_sql(raw: &str) -> String {
    let s = raw.trim();
    let s = FENCE_RE.replace_all(s, "");
    let s = SQL_PREFIX_RE.replace(&s, "");
    s.trim_end_matches([';', ' ', '\n', '\t', '\r']).trim().to_string()
}

struct DebugLog {
    lines: Vec<String>,
}

impl DebugLog {
    fn new() -> Self {
        Self { lines: Vec::new() }
    }

    fn section(&mut self, header: &str, content: &str) {
        tracing::info!("{header}\n{content}");
        self.lines.push(format!("=== {header} ===\n\n{content}\n"));
    }

    fn into_string(self) -> String {
        self.lines.join("\n")
    }
}

/// Run the pipeline for one question. LLM and warehouse failures end the run
/// with `ok: false` and the error text in `result`; the debug log is always
/// returned.
#[tracing::instrument(skip_all, fields(model = %options.model))]
pub fn run(
    question: &str,
    work_dir: &Path,
    llm: &dyn LlmClient,
    options: &SotOptions,
) -> (SotOutcome, String) {
    let mut log = DebugLog::new();
    log.section(
        "RUN_CONFIG",
        &format!(
            "DB: {:?}, SCHEMA_HINT: {:?}, MODEL: {}, TEMP: {}",
            options.database, options.schema, options.model, options.temperature
        ),
    );

    // Schema context = workspace files + live catalog.
    let workspace_schema = workspace::schema_context(work_dir);
    let live_schema = warehouse::fetch_catalog(
        work_dir,
        &options.creds_path,
        options.database.as_deref(),
        options.schema.as_deref(),
        options.sql_timeout,
    );
    let mut schema_context = workspace_schema;
    if !live_schema.is_empty() {
        if !schema_context.is_empty() {
            schema_context.push_str("\n\n");
        }
        schema_context.push_str("WAREHOUSE TABLES (active context):\n");
        schema_context.push_str(&live_schema);
    }
    log.section(
        "SCHEMA_CONTEXT",
        if schema_context.is_empty() { "<EMPTY>" } else { schema_context.as_str() },
    );

    let call = |name: &str, prompt: String, log: &mut DebugLog| -> Result<String, String> {
        log.section(&format!("{name}_INPUT"), &prompt);
        let request = CompletionRequest::builder()
            .model(options.model.clone())
            .prompt(prompt)
            .temperature(options.temperature)
            .build();
        match llm.complete(&request) {
            Ok(response) => {
                log.section(&format!("{name}_OUTPUT"), &response);
                Ok(response)
            }
            Err(e) => {
                let message = format!("{name} call failed: {e}");
                log.section(&format!("{name}_ERROR"), &message);
                Err(message)
            }
        }
    };

    macro_rules! try_call {
        ($name:expr, $prompt:expr) => {
            match call($name, $prompt, &mut log) {
                Ok(response) => response,
                Err(message) => {
                    return (
                        SotOutcome {
                            ok: false,
                            result: message,
                            correction_attempts: 0,
                        },
                        log.into_string(),
                    );
                }
            }
        };
    }

    // 1) Schema linking.
    let linked_schema = try_call!("SCHEMA_AGENT", schema_link_prompt(question, &schema_context));

    // 2) Subproblem decomposition; JSON expected, prose tolerated.
    let decomposition_raw = try_call!("SUBPROBLEM_AGENT", decompose_prompt(question, &linked_schema));
    let decomposition = parse_payload(&decomposition_raw);
    let decomposition_text = match &decomposition {
        Payload::Structured(value) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        Payload::Raw(text) => text.clone(),
    };
    log.section("SUBPROBLEM_PARSED", &decomposition_text);

    // 3) Query plan.
    let plan = try_call!(
        "PLAN_AGENT",
        query_plan_prompt(question, &linked_schema, &decomposition_text)
    );

    // 4) SQL generation.
    let sql_raw = try_call!("SQL_AGENT", sql_prompt(question, &linked_schema, &plan));
    let mut sql = postprocess_sql(&sql_raw);
    log.section("SQL_ATTEMPT_1", &sql);

    // 5) Execute + correction loop.
    let execute = |sql: &str| {
        warehouse::run_sql(
            work_dir,
            &options.creds_path,
            sql,
            options.database.as_deref(),
            options.schema.as_deref(),
            options.sql_timeout,
        )
    };

    let (mut ok, mut output) = execute(&sql);
    let mut attempts = 0;
    while !ok && attempts < options.max_correction_attempts {
        attempts += 1;
        log.section(&format!("EXEC_ERROR_{attempts}"), &output);

        let plan_response = match call(
            "CORRECTION_PLAN_AGENT",
            correction_plan_prompt(question, &sql, &linked_schema, &output),
            &mut log,
        ) {
            Ok(response) => response,
            Err(message) => {
                return (
                    SotOutcome {
                        ok: false,
                        result: message,
                        correction_attempts: attempts,
                    },
                    log.into_string(),
                );
            }
        };

        let corrected = match call(
            "CORRECTION_SQL_AGENT",
            corrected_sql_prompt(question, &linked_schema, &plan_response, &sql),
            &mut log,
        ) {
            Ok(response) => response,
            Err(message) => {
                return (
                    SotOutcome {
                        ok: false,
                        result: message,
                        correction_attempts: attempts,
                    },
                    log.into_string(),
                );
            }
        };

        sql = postprocess_sql(&corrected);
        log.section(&format!("SQL_ATTEMPT_{}", attempts + 1), &sql);
        (ok, output) = execute(&sql);
    }

    if ok {
        log.section("FINAL_SQL", &sql);
        (
            SotOutcome {
                ok: true,
                result: sql,
                correction_attempts: attempts,
            },
            log.into_string(),
        )
    } else {
        log.section("FINAL_ERROR", &output);
        (
            SotOutcome {
                ok: false,
                result: output,
                correction_attempts: attempts,
            },
            log.into_string(),
        )
    }
}

fn schema_link_prompt(question: &str, schema_context: &str) -> String {
    format!(
        "Given the schema below, keep only the tables and columns relevant to \
         the task and fix obvious naming mismatches. Reply with the corrected \
         schema as plain text, one table per line.\n\n\
         # Schema\n{schema_context}\n\n# Task\n{question}"
    )
}

fn decompose_prompt(question: &str, schema: &str) -> String {
    format!(
        "Break the task into atomic sub-problems. Reply with JSON of the form \
         {{\"subproblems\": [\"...\"]}}.\n\n# Schema\n{schema}\n\n# Task\n{question}"
    )
}

fn query_plan_prompt(question: &str, schema: &str, subproblems: &str) -> String {
    format!(
        "Produce a step-by-step query plan that solves the task via the \
         sub-problems. Name the tables, joins, filters, and aggregations of \
         each step.\n\n# Schema\n{schema}\n\n# Sub-problems\n{subproblems}\n\n# Task\n{question}"
    )
}

fn sql_prompt(question: &str, schema: &str, plan: &str) -> String {
    format!(
        "You are a SQL expert. Write the final SQL implementing the plan. \
         Reply with SQL only.\n\n# Schema\n{schema}\n\n# Plan\n{plan}\n\n# Task\n{question}"
    )
}

fn correction_plan_prompt(question: &str, sql: &str, schema: &str, error: &str) -> String {
    format!(
        "The SQL below failed. Diagnose the root cause from the database \
         error and write a short, concrete correction plan (no SQL).\n\n\
         # Schema\n{schema}\n\n# SQL\n{sql}\n\n# Database error\n{error}\n\n# Task\n{question}"
    )
}

fn corrected_sql_prompt(question: &str, schema: &str, plan: &str, sql: &str) -> String {
    format!(
        "Apply the correction plan to the SQL and reply with the corrected \
         SQL only.\n\n# Schema\n{schema}\n\n# Correction plan\n{plan}\n\n\
         # Previous SQL\n{sql}\n\n# Task\n{question}"
    )
}
