//! # coderloop runtime
//!
//! Everything the agent loop stands on.
//!
//! ## Core Concepts
//! - **Provider**: trait-based chat-completion transport (OpenAI-compatible)
//! - **Transcript**: the ordered message history of one session
//! - **Workspace**: sandboxed root for every file and shell operation
//! - **Tools**: explicit registry of schema-validated tool handlers
//! - **Session log**: append-only JSONL audit trail per session
//! - **Config**: YAML settings, validated once at startup

pub mod config;
pub mod error;
pub mod provider;
pub mod session_log;
pub mod tools;
pub mod transcript;
pub mod workspace;

pub use config::{AgentSettings, AppConfig, LlmSettings};
pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, OpenAIProvider,
    ProviderConfig, Role, ToolCall, ToolChoice, ToolDefinition, Usage, UsageTracker,
};
pub use session_log::{list_sessions, read_entries, EntryKind, LogEntry, SessionLogger, SessionMetrics, SessionSummary};
pub use tools::{
    builtin_registry, ParamKind, ParamSpec, ToolArgs, ToolHandler, ToolOutput, ToolRegistry, ToolResult, ToolSpec,
};
pub use transcript::Transcript;
pub use workspace::Workspace;
