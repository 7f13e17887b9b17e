//! Integration tests for the benchmark harness.
//!
//! These drive the public API end-to-end: parsing model responses into
//! actions, executing them in a real temporary workspace, running the agent
//! loop against scripted model clients, and checking the orchestrator's
//! correction and verification arithmetic.

mod actions;
mod agent_loop;
mod correction;

use std::cell::RefCell;
use std::collections::VecDeque;

use color_eyre::Result;
use color_eyre::eyre::eyre;
use eltbench::llm::{CompletionRequest, LlmClient};

/// Replays a fixed sequence of responses, then errors.
pub struct ScriptedClient {
    responses: RefCell<VecDeque<String>>,
}

impl ScriptedClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: RefCell::new(responses.into_iter().map(Into::into).collect()),
        }
    }
}

impl LlmClient for ScriptedClient {
    fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| eyre!("scripted client ran out of responses"))
    }
}

/// Always returns the same response.
pub struct ConstClient(pub String);

impl ConstClient {
    pub fn terminate() -> Self {
        Self("Terminate(output=\"done\")".to_string())
    }
}

impl LlmClient for ConstClient {
    fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Ok(self.0.clone())
    }
}
