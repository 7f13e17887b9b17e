//! Agent-loop behavior against scripted model clients.

use eltbench::agent::{AgentConfig, PromptAgent, RunStatus};
use eltbench::controller::Controller;
use pretty_assertions::assert_eq;

use crate::{ConstClient, ScriptedClient};

fn config(max_steps: usize) -> AgentConfig {
    AgentConfig::builder()
        .name("test")
        .instruction("do the thing")
        .model("gpt-4o")
        .max_steps(max_steps)
        .build()
}

#[test]
fn loop_finishes_on_terminate() {
    let dir = tempfile::tempdir().unwrap();
    let mut controller = Controller::new(dir.path()).unwrap();
    let llm = ScriptedClient::new([
        "Let me look around first.\nBash(code=\"ls\")",
        "Nothing left to do. Terminate(output=\"all done\")",
    ]);

    let run = PromptAgent::new(config(10)).run(&llm, &mut controller);

    assert_eq!(run.status, RunStatus::Finished);
    assert_eq!(run.result, "all done");
    assert_eq!(run.trajectory.len(), 2);
    assert!(run.trajectory[0].action.as_deref().unwrap().starts_with("Bash"));
    assert_eq!(
        run.trajectory[1].action.as_deref(),
        Some("Terminate(output=\"all done\")")
    );
}

#[test]
fn budget_of_n_without_terminate_yields_n_turns() {
    let dir = tempfile::tempdir().unwrap();
    let mut controller = Controller::new(dir.path()).unwrap();
    let llm = ConstClient("Bash(code=\"true\")".to_string());

    let run = PromptAgent::new(config(3)).run(&llm, &mut controller);

    assert_eq!(run.status, RunStatus::StepBudgetExhausted);
    assert_eq!(run.trajectory.len(), 3);
    assert!(!run.finished());
}

#[test]
fn malformed_turns_get_a_corrective_observation_and_consume_steps() {
    let dir = tempfile::tempdir().unwrap();
    let mut controller = Controller::new(dir.path()).unwrap();
    let llm = ConstClient("I am thinking, no action yet.".to_string());

    let run = PromptAgent::new(config(4)).run(&llm, &mut controller);

    assert_eq!(run.status, RunStatus::StepBudgetExhausted);
    assert_eq!(run.trajectory.len(), 4);
    for turn in &run.trajectory {
        assert_eq!(turn.action, None);
        assert!(turn.observation.contains("No valid action"), "{}", turn.observation);
    }
}

#[test]
fn recovery_after_malformed_turn() {
    let dir = tempfile::tempdir().unwrap();
    let mut controller = Controller::new(dir.path()).unwrap();
    let llm = ScriptedClient::new([
        "thinking out loud, no action",
        "Terminate(output=\"ok\")",
    ]);

    let run = PromptAgent::new(config(5)).run(&llm, &mut controller);

    assert_eq!(run.status, RunStatus::Finished);
    assert_eq!(run.trajectory.len(), 2);
    assert_eq!(run.trajectory[0].action, None);
}

#[test]
fn observations_flow_into_the_next_prompt() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker-xyz.txt"), "x").unwrap();
    let mut controller = Controller::new(dir.path()).unwrap();
    let llm = ScriptedClient::new(["Bash(code=\"ls\")", "Terminate(output=\"done\")"]);

    let run = PromptAgent::new(config(5)).run(&llm, &mut controller);

    // The second prompt must contain the observation from the first action.
    assert!(run.trajectory[1].prompt.contains("marker-xyz.txt"));
}
