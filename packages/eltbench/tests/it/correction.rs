//! Orchestrator correction and verification arithmetic.
//!
//! The build command is a counter script that fails until it has been
//! invoked a configured number of times, so the tests control exactly which
//! attempt succeeds.

use std::fs;
use std::path::Path;

use eltbench::orchestrator::{Pipeline, PipelineOptions, VERIFICATION_REPORT_FILE};
use pretty_assertions::assert_eq;

use crate::ConstClient;

/// Shell command that succeeds on the `threshold`-th invocation and later.
fn counting_build_command(threshold: usize) -> String {
    format!(
        "n=$(cat build_attempts 2>/dev/null || echo 0); n=$((n+1)); \
         echo $n > build_attempts; test $n -ge {threshold}"
    )
}

fn options(build_command: String, max_build_attempts: usize) -> PipelineOptions {
    PipelineOptions::builder()
        .model("gpt-4o")
        .stage_step_budget(3)
        .max_build_attempts(max_build_attempts)
        .max_verification_rounds(3)
        .build_command(build_command)
        .build()
}

fn stage_names(outcome: &eltbench::PipelineOutcome) -> Vec<&str> {
    outcome.stages.iter().map(|s| s.stage.as_str()).collect()
}

#[test]
fn build_failing_twice_then_succeeding_runs_two_correction_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ConstClient::terminate();
    let pipeline = Pipeline::new(dir.path(), &llm, options(counting_build_command(3), 3));

    let outcome = pipeline.run().unwrap();

    assert!(outcome.finished, "{}", outcome.result);
    assert_eq!(outcome.build_attempts, 3);
    assert_eq!(outcome.correction_rounds, 2);
    assert_eq!(
        stage_names(&outcome),
        vec![
            "query_plan",
            "sql_generation",
            "dbt_config",
            "correction_plan",
            "correction_apply",
            "correction_plan",
            "correction_apply",
            "verification",
        ]
    );
}

#[test]
fn build_succeeding_first_try_runs_no_corrections() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ConstClient::terminate();
    let pipeline = Pipeline::new(dir.path(), &llm, options("true".to_string(), 5));

    let outcome = pipeline.run().unwrap();

    assert!(outcome.finished);
    assert_eq!(outcome.build_attempts, 1);
    assert_eq!(outcome.correction_rounds, 0);
}

#[test]
fn exhausted_attempts_report_failure_after_cap_minus_one_corrections() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ConstClient::terminate();
    // Never succeeds within the cap.
    let pipeline = Pipeline::new(dir.path(), &llm, options(counting_build_command(10), 3));

    let outcome = pipeline.run().unwrap();

    assert!(!outcome.finished);
    assert!(outcome.result.contains("Build failed"), "{}", outcome.result);
    assert_eq!(outcome.build_attempts, 3);
    assert_eq!(outcome.correction_rounds, 2);
    assert_eq!(outcome.verification_rounds, 0);
}

#[test]
fn missing_verification_report_is_an_implicit_pass() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ConstClient::terminate();
    let pipeline = Pipeline::new(dir.path(), &llm, options("true".to_string(), 1));

    let outcome = pipeline.run().unwrap();

    assert!(outcome.finished);
    assert_eq!(outcome.verification_rounds, 1);
}

#[test]
fn strict_mode_requires_an_explicit_report() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ConstClient::terminate();
    let options = PipelineOptions::builder()
        .model("gpt-4o")
        .stage_step_budget(3)
        .max_build_attempts(1)
        .max_verification_rounds(2)
        .missing_report_is_pass(false)
        .build_command("true".to_string())
        .build();

    let outcome = Pipeline::new(dir.path(), &llm, options).run().unwrap();

    assert!(!outcome.finished);
    assert_eq!(outcome.verification_rounds, 2);
}

#[test]
fn report_gate_is_the_literal_pass_line() {
    let check = |content: &str, expected: bool| {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(VERIFICATION_REPORT_FILE), content).unwrap();
        let llm = ConstClient::terminate();
        let options = PipelineOptions::builder()
            .model("gpt-4o")
            .stage_step_budget(3)
            .max_build_attempts(1)
            .max_verification_rounds(2)
            .build_command("true".to_string())
            .build();
        let outcome = Pipeline::new(dir.path(), &llm, options).run().unwrap();
        assert_eq!(outcome.finished, expected, "content: {content:?}");
    };

    check("overall_status: PASS\n", true);
    check("summary first\noverall_status: PASS\nissue: none\n", true);
    check("overall_status: FAIL\nissue[high]: wrong row count\n", false);
    check("status: PASS\n", false);
}

#[test]
fn stage_metadata_records_files_added_by_the_stage() {
    let dir = tempfile::tempdir().unwrap();
    let llm = crate::ScriptedClient::new([
        // query_plan stage creates its artifact, then terminates.
        "CreateFile(filepath=\"query_plan.txt\"):\n```\nstep 1: join orders to customers\n```",
        "Terminate(output=\"plan written\")",
        // remaining stages terminate immediately
        "Terminate(output=\"done\")",
        "Terminate(output=\"done\")",
        "Terminate(output=\"done\")",
    ]);
    let pipeline = Pipeline::new(dir.path(), &llm, options("true".to_string(), 1));

    let outcome = pipeline.run().unwrap();

    let query_plan = &outcome.stages[0];
    assert_eq!(query_plan.stage, "query_plan");
    assert!(
        query_plan.files.added_files.contains(&"query_plan.txt".to_string()),
        "{:?}",
        query_plan.files
    );
    assert!(persisted_result(dir.path(), "query_plan"));
}

fn persisted_result(workspace: &Path, stage: &str) -> bool {
    workspace
        .join("trajectories")
        .join(stage)
        .join("result.json")
        .exists()
}
