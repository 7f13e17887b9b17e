//! The single-agent decision loop.
//!
//! One [`PromptAgent`] repeatedly asks the model for an action, executes it
//! through the controller, and feeds the observation back until the model
//! terminates or the step budget runs out. Conversation memory is a bounded
//! sliding window over whole turns: old turns are dropped, never summarized,
//! to keep prompt cost flat at the price of continuity.

use bon::Builder;

use crate::action::{self, Action};
use crate::controller::Controller;
use crate::llm::{CompletionRequest, LlmClient};
use crate::trajectory::Turn;

const NO_ACTION_OBSERVATION: &str =
    "No valid action was found in your response. Reply with exactly one action in the documented format.";

/// Configuration for one agent-loop instance.
#[derive(Debug, Clone, Builder)]
pub struct AgentConfig {
    #[builder(into)]
    pub name: String,

    /// The stage-specific task instruction.
    #[builder(into)]
    pub instruction: String,

    #[builder(into)]
    pub model: String,

    #[builder(default = 1.0)]
    pub temperature: f64,

    #[builder(default = 15)]
    pub max_steps: usize,

    /// Sliding-window size of the conversation memory, in turns.
    #[builder(default = 25)]
    pub max_memory_length: usize,

    /// Which action docs to advertise: (snowflake, bigquery, local).
    #[builder(default = (true, false, false))]
    pub backends: (bool, bool, bool),
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The model issued `Terminate`.
    Finished,
    /// The step budget was exhausted first; the run is unfinished.
    StepBudgetExhausted,
}

#[derive(Debug)]
pub struct AgentRun {
    pub status: RunStatus,
    pub result: String,
    pub trajectory: Vec<Turn>,
}

impl AgentRun {
    pub fn finished(&self) -> bool {
        self.status == RunStatus::Finished
    }
}

pub struct PromptAgent {
    config: AgentConfig,
    trajectory: Vec<Turn>,
}

impl PromptAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            trajectory: Vec::new(),
        }
    }

    /// Drive the loop to completion. Every step appends exactly one turn to
    /// the trajectory, including malformed turns and failed LLM calls, so a
    /// budget of N yields at most N turns.
    #[tracing::instrument(skip_all, fields(agent = %self.config.name))]
    pub fn run(mut self, llm: &dyn LlmClient, controller: &mut Controller) -> AgentRun {
        let system = self.system_message(controller);

        for step in 1..=self.config.max_steps {
            let prompt = self.build_prompt();
            let request = CompletionRequest::builder()
                .model(self.config.model.clone())
                .prompt(prompt.clone())
                .system(system.clone())
                .temperature(self.config.temperature)
                .build();

            let response = match llm.complete(&request) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(step, error = %e, "LLM call failed");
                    self.trajectory.push(Turn {
                        prompt,
                        response: String::new(),
                        action: None,
                        observation: format!("The model call failed: {e}. Try again."),
                    });
                    continue;
                }
            };

            match action::parse_action(&response) {
                None => {
                    tracing::debug!(step, "no action parsed from response");
                    self.trajectory.push(Turn {
                        prompt,
                        response,
                        action: None,
                        observation: NO_ACTION_OBSERVATION.to_string(),
                    });
                }
                Some(action) => {
                    let (observation, done) = controller.step(&action);
                    tracing::debug!(step, action = %action, "executed action");
                    self.trajectory.push(Turn {
                        prompt,
                        response,
                        action: Some(action.to_string()),
                        observation,
                    });
                    if done {
                        let result = match action {
                            Action::Terminate { output } => output,
                            _ => String::new(),
                        };
                        return AgentRun {
                            status: RunStatus::Finished,
                            result,
                            trajectory: self.trajectory,
                        };
                    }
                }
            }
        }

        AgentRun {
            status: RunStatus::StepBudgetExhausted,
            result: format!(
                "Agent {} exhausted its step budget of {} before terminating.",
                self.config.name, self.config.max_steps
            ),
            trajectory: self.trajectory,
        }
    }

    fn system_message(&self, controller: &Controller) -> String {
        let (snowflake, bigquery, local) = self.config.backends;
        format!(
            "You are a data engineering agent working in {workdir}. \
             Each of your replies must contain exactly one action from the list below. \
             The observation from each action is returned to you before your next turn.\n\n\
             # Task\n{instruction}\n\n# Actions\n{docs}",
            workdir = controller.work_dir().display(),
            instruction = self.config.instruction,
            docs = action::action_space_docs(snowflake, bigquery, local),
        )
    }

    fn build_prompt(&self) -> String {
        let window_start = self.trajectory.len().saturating_sub(self.config.max_memory_length);
        let mut prompt = String::new();
        for turn in &self.trajectory[window_start..] {
            if !turn.response.is_empty() {
                prompt.push_str("Agent: ");
                prompt.push_str(&turn.response);
                prompt.push('\n');
            }
            prompt.push_str("Observation: ");
            prompt.push_str(&turn.observation);
            prompt.push_str("\n\n");
        }
        if prompt.is_empty() {
            prompt.push_str("Begin. Inspect the workspace and work toward the task.\n");
        } else {
            prompt.push_str("Continue with your next action.\n");
        }
        prompt
    }
}
