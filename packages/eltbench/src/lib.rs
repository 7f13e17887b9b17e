//! Benchmark harness for evaluating LLM agents on warehouse transformation
//! tasks.
//!
//! The model under test drives the system through a textual action protocol:
//! free-form responses are parsed into typed [`action::Action`]s, executed by
//! the [`controller::Controller`] against the shell, the file system, and SQL
//! warehouses, and the resulting observations are fed back into the next
//! prompt. Two pipelines sit on top of that loop:
//!
//! - [`orchestrator::Pipeline`], a staged multi-agent run (query plan, SQL
//!   generation, DBT config) followed by a build/correction cycle and a
//!   semantic verification cycle;
//! - [`sot::run`], the tighter-scripted SQL-of-Thought variant built from
//!   five single-shot model calls and an execute/correct loop.
//!
//! Everything is synchronous and single-threaded; the only concurrency
//! primitive is the per-action wall-clock deadline in [`process`]. Failures
//! that the agent can act on are returned as observation text, never raised.

pub use crate::action::{Action, Warehouse, parse_action};
pub use crate::agent::{AgentConfig, AgentRun, PromptAgent, RunStatus};
pub use crate::controller::Controller;
pub use crate::llm::{ApiClient, CompletionRequest, LlmClient, Payload};
pub use crate::orchestrator::{Pipeline, PipelineOptions, PipelineOutcome};
pub use crate::trajectory::{RunRecord, Turn};

pub mod action;
pub mod agent;
pub mod controller;
pub mod llm;
pub mod orchestrator;
pub mod process;
pub mod selection;
pub mod sot;
pub mod templates;
pub mod trajectory;
pub mod warehouse;
pub mod workspace;
