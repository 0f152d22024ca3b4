//! # coderloop agent
//!
//! The agent drives the model <-> tools loop:
//! 1. The user provides a project brief
//! 2. The model answers with tool calls, which run inside the project workspace
//! 3. Tool results go back to the model, and the loop repeats
//! 4. If the model runs out of context, older history is summarized and the turn is retried
//! 5. The loop ends when the model answers without tool calls, or the iteration budget runs out
//!
//! The model is the brain, the tools are the hands.

mod agent;
pub mod compactor;
pub mod context;

pub use agent::{Agent, AgentConfig, BuildOutcome, BuildSession, BuildStatus, LoopState};
pub use compactor::{split_boundary, Compaction, CompactionPlan, Compactor};
