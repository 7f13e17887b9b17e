//! The multi-agent pipeline: plan, generate, configure, build, correct,
//! verify.
//!
//! Stages communicate exclusively through files in the shared workspace;
//! nothing is message-passed between agent loops. Stage-level failures drive
//! control flow here; they are never raised. The final outcome record always
//! carries a success flag and either the produced artifacts or the last
//! observed error.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use color_eyre::Result;
use serde::Serialize;
use uuid::Uuid;

use crate::agent::{AgentConfig, PromptAgent};
use crate::controller::Controller;
use crate::llm::LlmClient;
use crate::trajectory::RunRecord;
use crate::workspace::{FileDiff, WorkspaceSnapshot};

pub const VERIFICATION_REPORT_FILE: &str = "verification_report.txt";
const REPORT_PASS_LINE: &str = "overall_status: PASS";

pub const QUERY_PLAN_INSTRUCTION: &str = "\
Focus ONLY on producing the transformation query plan. Study the target \
tables in data_model.yaml and the source schemas, then write query_plan.txt: \
a detailed outline of how source tables are transformed into each target \
model, covering transformation logic, data flow, and dependencies. Do NOT \
write SQL yet.";

pub const SQL_GENERATION_INSTRUCTION: &str = "\
Translate the existing query plan into SQL. Read query_plan.txt and write \
one SQL file per target model under ./sql/, producing exactly the tables \
described in data_model.yaml. Keep the queries efficient and correct.";

pub const DBT_CONFIG_INSTRUCTION: &str = "\
Create the DBT configuration (dbt_project.yml and profiles.yml) needed to \
run the SQL models. Read config.yaml for the connection and schema settings, \
read every SQL model under ./sql/, use exactly the schema from config.yaml \
(uppercase), and produce valid DBT YAML only. Never invent a schema, never \
modify SQL, never create extra files.";

pub const CORRECTION_PLAN_INSTRUCTION: &str = "\
Create or update exactly one file: correction_plan.txt. Analyze the build \
logs under ./logs/, the SQL models under ./sql/, and the DBT configuration, \
and identify the root cause of the failure. Write a deterministic, \
step-by-step plan: exact file paths, exact line ranges or anchor text, exact \
replace/insert/delete operations, minimal changes only. Do not execute SQL \
and do not invent new schemas, tables, directories, or filenames.";

pub const CORRECTION_APPLY_INSTRUCTION: &str = "\
Apply the corrections described in correction_plan.txt, exactly as written. \
Do not analyze the failure yourself and do not invent fixes. Read the plan, \
then modify only the files it lists, performing only the operations it \
prescribes, using EditFile for every modification. Never rewrite whole files \
unless the plan explicitly requires it and never create or rename files.";

pub const VERIFICATION_INSTRUCTION: &str = "\
Inspect the tables produced by the build against the target definitions in \
data_model.yaml. Check table names, column sets, and whether the data looks \
semantically consistent with the model description. Write \
verification_report.txt containing a line 'overall_status: PASS' or \
'overall_status: FAIL' followed by one line per issue found, each tagged \
with a severity.";

pub const SEMANTIC_CORRECTION_PLAN_INSTRUCTION: &str = "\
Create or update exactly one file: correction_plan.txt, addressing the \
issues listed in verification_report.txt. For each issue name the target \
file, a location anchor, the edit operation (replace/insert/delete), and the \
literal replacement content. Minimal changes only; do not execute SQL.";

/// Knobs for one pipeline run.
#[derive(Debug, Clone, Builder)]
pub struct PipelineOptions {
    #[builder(into)]
    pub model: String,

    #[builder(default = 1.0)]
    pub temperature: f64,

    /// Step budget per agent stage.
    #[builder(default = 15)]
    pub stage_step_budget: usize,

    #[builder(default = 25)]
    pub memory_window: usize,

    /// Total build attempts; up to `max_build_attempts - 1` correction
    /// rounds run between them.
    #[builder(default = 5)]
    pub max_build_attempts: usize,

    /// Rounds of the semantic verification cycle.
    #[builder(default = 3)]
    pub max_verification_rounds: usize,

    /// A missing verification report counts as PASS, so a run without
    /// verification tooling is not blocked. Set to `false` to require an
    /// explicit report.
    #[builder(default = true)]
    pub missing_report_is_pass: bool,

    /// Which action docs the stages advertise: (snowflake, bigquery, local).
    #[builder(default = (true, false, false))]
    pub backends: (bool, bool, bool),

    #[builder(into, default = String::from("dbt run"))]
    pub build_command: String,

    #[builder(default = Duration::from_secs(1800))]
    pub build_timeout: Duration,

    #[builder(default = crate::controller::DEFAULT_ACTION_TIMEOUT)]
    pub action_timeout: Duration,
}

/// Metadata recorded for every stage that ran.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub finished: bool,
    pub steps: usize,
    pub files: FileDiff,
}

/// The final record of a pipeline run.
#[derive(Debug, Serialize)]
pub struct PipelineOutcome {
    pub finished: bool,
    pub result: String,
    pub build_attempts: usize,
    pub correction_rounds: usize,
    pub verification_rounds: usize,
    pub stages: Vec<StageReport>,
}

pub struct Pipeline<'a> {
    workspace: PathBuf,
    llm: &'a dyn LlmClient,
    options: PipelineOptions,
    stages: Vec<StageReport>,
}

impl<'a> Pipeline<'a> {
    pub fn new(workspace: &Path, llm: &'a dyn LlmClient, options: PipelineOptions) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            llm,
            options,
            stages: Vec::new(),
        }
    }

    /// Run the full pipeline: three generation stages, the build/correction
    /// cycle, then the semantic verification cycle. Never returns an error
    /// for stage or build failures; those are encoded in the outcome.
    #[tracing::instrument(skip(self), fields(workspace = %self.workspace.display()))]
    pub fn run(mut self) -> Result<PipelineOutcome> {
        self.run_stage("query_plan", QUERY_PLAN_INSTRUCTION)?;
        self.run_stage("sql_generation", SQL_GENERATION_INSTRUCTION)?;
        self.run_stage("dbt_config", DBT_CONFIG_INSTRUCTION)?;

        let (build_ok, build_attempts, correction_rounds, last_build_output) =
            self.build_with_corrections()?;

        if !build_ok {
            return Ok(PipelineOutcome {
                finished: false,
                result: format!(
                    "Build failed after {build_attempts} attempts: {last_build_output}"
                ),
                build_attempts,
                correction_rounds,
                verification_rounds: 0,
                stages: self.stages,
            });
        }

        let (verified, verification_rounds, detail) = self.verify_with_corrections()?;
        Ok(PipelineOutcome {
            finished: verified,
            result: if verified {
                "Build succeeded and verification passed.".to_string()
            } else {
                format!("Verification did not pass: {detail}")
            },
            build_attempts,
            correction_rounds,
            verification_rounds,
            stages: self.stages,
        })
    }

    /// Run the build command up to the attempt cap, interleaving a
    /// correction-plan + correction-apply stage pair after every failure
    /// except the last.
    fn build_with_corrections(&mut self) -> Result<(bool, usize, usize, String)> {
        let attempt_cap = self.options.max_build_attempts.max(1);
        let mut corrections = 0;
        for attempt in 1..=attempt_cap {
            let (ok, output) = self.run_build();
            if ok {
                tracing::info!(attempt, "build succeeded");
                return Ok((true, attempt, corrections, output));
            }
            tracing::info!(attempt, "build failed");
            if attempt == attempt_cap {
                return Ok((false, attempt, corrections, output));
            }
            self.run_stage("correction_plan", CORRECTION_PLAN_INSTRUCTION)?;
            self.run_stage("correction_apply", CORRECTION_APPLY_INSTRUCTION)?;
            corrections += 1;
        }
        unreachable!("the attempt loop always returns");
    }

    /// The semantic verification cycle: check, and on FAIL plan + apply a
    /// fix, rebuild, and re-check, up to the round cap.
    fn verify_with_corrections(&mut self) -> Result<(bool, usize, String)> {
        let round_cap = self.options.max_verification_rounds.max(1);
        for round in 1..=round_cap {
            self.run_stage("verification", VERIFICATION_INSTRUCTION)?;
            if self.verification_passes() {
                tracing::info!(round, "verification passed");
                return Ok((true, round, String::new()));
            }
            tracing::info!(round, "verification failed");
            if round == round_cap {
                return Ok((false, round, "verification report still failing".to_string()));
            }
            self.run_stage("semantic_correction_plan", SEMANTIC_CORRECTION_PLAN_INSTRUCTION)?;
            self.run_stage("correction_apply", CORRECTION_APPLY_INSTRUCTION)?;
            let (ok, output) = self.run_build();
            if !ok {
                return Ok((false, round, format!("rebuild after semantic fix failed: {output}")));
            }
        }
        unreachable!("the round loop always returns");
    }

    fn run_build(&self) -> (bool, String) {
        match crate::process::run_with_deadline(
            &self.options.build_command,
            &self.workspace,
            self.options.build_timeout,
        ) {
            Ok(output) => {
                let text = if output.stderr.trim().is_empty() {
                    output.stdout
                } else {
                    format!("{}{}", output.stdout, output.stderr)
                };
                (output.success, text.trim().to_string())
            }
            Err(e) => (false, format!("build command failed to run: {e}")),
        }
    }

    /// Reads `verification_report.txt`; the report passes only if it
    /// contains the literal PASS line. A missing file defers to the
    /// `missing_report_is_pass` option.
    fn verification_passes(&self) -> bool {
        let path = self.workspace.join(VERIFICATION_REPORT_FILE);
        match fs::read_to_string(&path) {
            Ok(report) => report.lines().any(|line| line.trim() == REPORT_PASS_LINE),
            Err(_) => {
                if self.options.missing_report_is_pass {
                    tracing::warn!(
                        "no {VERIFICATION_REPORT_FILE} was produced; treating as PASS"
                    );
                }
                self.options.missing_report_is_pass
            }
        }
    }

    /// One agent-loop stage: snapshot the workspace, run the agent, record
    /// the file diff, and persist the stage's own `result.json`.
    fn run_stage(&mut self, name: &str, instruction: &str) -> Result<()> {
        tracing::info!(stage = name, "starting stage");
        let snapshot = WorkspaceSnapshot::capture(&self.workspace);
        let mut controller =
            Controller::new(&self.workspace)?.with_timeout(self.options.action_timeout);

        let config = AgentConfig::builder()
            .name(name)
            .instruction(instruction)
            .model(self.options.model.clone())
            .temperature(self.options.temperature)
            .max_steps(self.options.stage_step_budget)
            .max_memory_length(self.options.memory_window)
            .backends(self.options.backends)
            .build();
        let run = PromptAgent::new(config).run(self.llm, &mut controller);

        let files = snapshot.diff();
        let record = RunRecord {
            run_id: Uuid::new_v4(),
            finished: run.finished(),
            result: run.result,
            steps: run.trajectory.len(),
            result_files: files.clone(),
            trajectory: run.trajectory,
        };
        record.save(&self.workspace.join("trajectories").join(name).join("result.json"))?;

        tracing::info!(stage = name, finished = record.finished, steps = record.steps, "stage done");
        self.stages.push(StageReport {
            stage: name.to_string(),
            finished: record.finished,
            steps: record.steps,
            files,
        });
        Ok(())
    }
}
