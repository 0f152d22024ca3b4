//! Agent implementation - drives the model <-> tools loop

use crate::compactor::Compactor;
use crate::context;
use coderloop_runtime::{
    builtin_registry, AppConfig, ChatMessage, CompletionRequest, CompletionResponse, Error, ErrorKind,
    FinishReason, LlmProvider, Result, SessionLogger, ToolCall, ToolRegistry, Transcript, UsageTracker,
    Workspace,
};
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Tool-dispatching turns allowed before stopping
    pub max_iterations: usize,
    pub tail_length: usize,
    pub summary_max_tokens: usize,
    pub shell_timeout: Duration,
    pub projects_root: PathBuf,
    pub context_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl AgentConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            max_iterations: config.agent.max_iterations,
            tail_length: config.agent.tail_length,
            summary_max_tokens: config.agent.summary_max_tokens,
            shell_timeout: config.shell_timeout(),
            projects_root: config.projects_root.clone(),
            context_dir: config.context_dir.clone(),
            log_dir: config.log_dir.clone(),
        }
    }
}

/// Where the loop is
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    AwaitingModel,
    DispatchingTools(Vec<ToolCall>),
    Done(String),
    IterationLimitReached,
}

/// How a build ended (fatal errors come back as `Err`)
#[derive(Debug, Clone, PartialEq)]
pub enum BuildStatus {
    Done { answer: String },
    IterationLimitReached,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Done { .. } => "done",
            BuildStatus::IterationLimitReached => "iteration_limit",
        }
    }
}

/// Result from agent execution
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub status: BuildStatus,
    pub iterations: usize,
    pub compactions: usize,
    pub usage: UsageTracker,
    pub transcript: Transcript,
    pub session_id: String,
    pub log_path: PathBuf,
}

/// Everything one run mutates. Kept outside the loop future so a caller
/// that drops the future (Ctrl-C) can still finalize the log.
pub struct BuildSession {
    pub workspace: Option<PathBuf>,
    pub registry: ToolRegistry,
    pub transcript: Transcript,
    pub logger: SessionLogger,
}

impl BuildSession {
    pub fn new(registry: ToolRegistry, transcript: Transcript, logger: SessionLogger) -> Self {
        Self {
            workspace: None,
            registry,
            transcript,
            logger,
        }
    }

    /// Record an interruption and flush the log and transcript snapshot
    pub fn interrupt(&mut self) -> Result<()> {
        tracing::warn!(session_id = %self.logger.session_id(), "session interrupted");
        self.logger.log_error("interrupted", "run interrupted before completion")?;
        self.logger.finalize("interrupted", &self.transcript)
    }

    fn fail(&mut self, err: &Error) {
        if self.logger.is_finalized() {
            return;
        }
        if let Err(log_err) = self.logger.log_error(err.kind().as_str(), &err.to_string()) {
            tracing::warn!(error = %log_err, "could not record fatal error");
        }
        if let Err(log_err) = self.logger.finalize("failed", &self.transcript) {
            tracing::warn!(error = %log_err, "could not finalize session log");
        }
    }
}

/// The agent orchestrator - manages the model <-> tools loop
pub struct Agent<P: LlmProvider> {
    provider: P,
    config: AgentConfig,
    compactor: Compactor,
}

impl<P: LlmProvider> Agent<P> {
    pub fn new(provider: P, config: AgentConfig) -> Self {
        let compactor =
            Compactor::new(config.tail_length, config.summary_max_tokens).with_model(config.model.clone());
        Self {
            provider,
            config,
            compactor,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Set up the workspace, tools, prompt and log for a project build
    pub fn prepare_build(&self, brief: &str, name: Option<&str>, skills: &[String]) -> Result<BuildSession> {
        let slug = context::slugify(name.unwrap_or(brief));
        let workspace = Workspace::new(self.config.projects_root.join(&slug))?;
        let root = workspace.root().to_path_buf();

        let skills = context::merge_skills(skills);
        let system = context::system_prompt(&root, &self.config.context_dir, &skills)?;
        let registry = builtin_registry(workspace, self.config.shell_timeout)?;

        let logger = SessionLogger::create(
            &self.config.log_dir,
            None,
            json!({
                "project": slug,
                "workspace": root.display().to_string(),
                "model": self.config.model,
                "skills": skills,
                "tools": registry.names(),
                "brief": brief,
            }),
        )?;

        tracing::info!(project = %slug, workspace = %root.display(), session_id = %logger.session_id(), "build prepared");

        let mut session = BuildSession::new(registry, Transcript::seeded(system, brief.trim()), logger);
        session.workspace = Some(root);
        Ok(session)
    }

    /// Build a project from a brief, start to finish
    pub async fn build_project(&self, brief: &str, name: Option<&str>, skills: &[String]) -> Result<BuildOutcome> {
        let mut session = self.prepare_build(brief, name, skills)?;
        self.run(&mut session).await
    }

    /// Run the loop on a prepared session. Fatal errors are logged and the
    /// session is finalized before the error is returned.
    pub async fn run(&self, session: &mut BuildSession) -> Result<BuildOutcome> {
        match self.drive(session).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                // nothing retries past this point
                let err = err.persist();
                tracing::error!(error = %err, "build failed");
                session.fail(&err);
                Err(err)
            }
        }
    }

    async fn drive(&self, session: &mut BuildSession) -> Result<BuildOutcome> {
        let definitions = session.registry.definitions();
        // transcript messages already written by an earlier request entry
        let mut logged = 0;
        let mut usage = UsageTracker::new();
        let mut iterations = 0;
        let mut compactions = 0;
        let mut compacted_this_turn = false;
        let mut state = LoopState::AwaitingModel;

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    let request = CompletionRequest::new(session.transcript.messages().to_vec())
                        .with_model(self.config.model.clone())
                        .with_temperature(self.config.temperature)
                        .with_max_tokens(self.config.max_tokens)
                        .with_tools(definitions.clone());
                    session.logger.log_request("turn", Some(iterations), &request, logged)?;
                    logged = request.messages.len();

                    let response = self
                        .provider
                        .complete(request)
                        .await
                        .map_err(|e| e.with_operation("agent::complete"))?;
                    usage.track(&response.usage);
                    session.logger.log_response("turn", &response)?;

                    tracing::debug!(
                        iteration = iterations,
                        finish_reason = response.finish_reason.as_str(),
                        tool_calls = response.tool_calls.len(),
                        "model replied"
                    );

                    match (response.finish_reason, response.has_tool_calls()) {
                        (FinishReason::Length, true) => {
                            return Err(Error::malformed_response("tool call arguments were truncated")
                                .with_operation("agent::drive"));
                        }
                        (FinishReason::Length, false) => {
                            if compacted_this_turn {
                                return Err(Error::new(
                                    ErrorKind::ContextExhausted,
                                    "context still exhausted after compaction",
                                )
                                .with_operation("agent::drive"));
                            }
                            self.compact(session, &mut usage).await?;
                            compactions += 1;
                            compacted_this_turn = true;
                            logged = 0;
                            LoopState::AwaitingModel
                        }
                        (_, true) => {
                            check_call_ids(&response)?;
                            session.transcript.push(response.to_message());
                            LoopState::DispatchingTools(response.tool_calls)
                        }
                        (FinishReason::Stop, false) => {
                            session.transcript.push(response.to_message());
                            LoopState::Done(response.content.unwrap_or_default())
                        }
                        (other, false) => {
                            return Err(Error::malformed_response(format!(
                                "no tool calls and finish reason '{}'",
                                other.as_str()
                            ))
                            .with_operation("agent::drive"));
                        }
                    }
                }

                LoopState::DispatchingTools(calls) => {
                    for call in &calls {
                        session.logger.log_tool_call(call)?;
                        let result = session.registry.execute(call).await;
                        tracing::info!(
                            tool = %call.name,
                            id = %call.id,
                            error = ?result.error_kind(),
                            "tool executed"
                        );
                        session.logger.log_tool_result(call, &result)?;
                        session
                            .transcript
                            .push(ChatMessage::tool_result(&call.id, &call.name, result.to_content()));
                    }

                    iterations += 1;
                    compacted_this_turn = false;
                    if iterations >= self.config.max_iterations {
                        LoopState::IterationLimitReached
                    } else {
                        LoopState::AwaitingModel
                    }
                }

                LoopState::Done(answer) => {
                    return self.finish(session, BuildStatus::Done { answer }, iterations, compactions, usage);
                }

                LoopState::IterationLimitReached => {
                    tracing::warn!(max_iterations = self.config.max_iterations, "iteration limit reached");
                    return self.finish(
                        session,
                        BuildStatus::IterationLimitReached,
                        iterations,
                        compactions,
                        usage,
                    );
                }
            };
        }
    }

    /// Replace the transcript with its compacted form
    async fn compact(&self, session: &mut BuildSession, usage: &mut UsageTracker) -> Result<()> {
        let before = session.transcript.len();
        let Some(plan) = self.compactor.plan(&session.transcript) else {
            return Err(Error::new(
                ErrorKind::ContextExhausted,
                "context exhausted and nothing left to compact",
            )
            .with_operation("agent::compact")
            .with_context("messages", before.to_string()));
        };

        session.logger.log_request("compaction", None, &plan.request, 0)?;
        let response = self.provider.complete(plan.request.clone()).await;
        if let Ok(response) = &response {
            usage.track(&response.usage);
            session.logger.log_response("compaction", response)?;
        }
        let compaction = self.compactor.apply(&session.transcript, plan, response)?;

        compaction.transcript.check_tool_pairing().map_err(|e| {
            Error::compaction_failed(format!("compaction broke tool pairing: {}", e.message()))
                .with_operation("agent::compact")
        })?;

        let after = compaction.transcript.len();
        session.logger.log_compaction(
            before,
            after,
            compaction.summarized,
            compaction.tail,
            compaction.summary.as_deref().unwrap_or(""),
            compaction.input.as_deref().unwrap_or(""),
        )?;
        tracing::info!(before, after, summarized = compaction.summarized, "history compacted");

        session.transcript = compaction.transcript;
        Ok(())
    }

    fn finish(
        &self,
        session: &mut BuildSession,
        status: BuildStatus,
        iterations: usize,
        compactions: usize,
        usage: UsageTracker,
    ) -> Result<BuildOutcome> {
        session.logger.finalize(status.as_str(), &session.transcript)?;

        tracing::info!(
            status = status.as_str(),
            iterations,
            compactions,
            tokens = usage.total_tokens(),
            "build finished"
        );

        Ok(BuildOutcome {
            status,
            iterations,
            compactions,
            usage,
            transcript: session.transcript.clone(),
            session_id: session.logger.session_id().to_string(),
            log_path: session.logger.path().to_path_buf(),
        })
    }
}

/// Call ids must be present and unique within one assistant turn
fn check_call_ids(response: &CompletionResponse) -> Result<()> {
    let mut seen = HashSet::new();
    for call in &response.tool_calls {
        if call.id.is_empty() {
            return Err(Error::malformed_response(format!("tool call to '{}' has no id", call.name))
                .with_operation("agent::drive"));
        }
        if !seen.insert(call.id.as_str()) {
            return Err(Error::malformed_response(format!("duplicate tool call id '{}'", call.id))
                .with_operation("agent::drive"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderloop_runtime::Usage;

    fn response(calls: Vec<ToolCall>) -> CompletionResponse {
        CompletionResponse {
            id: "r".into(),
            model: "m".into(),
            content: None,
            tool_calls: calls,
            finish_reason: FinishReason::ToolCalls,
            usage: Usage::default(),
        }
    }

    #[test]
    fn test_check_call_ids() {
        let ok = response(vec![ToolCall::new("a", "x", "{}"), ToolCall::new("b", "x", "{}")]);
        assert!(check_call_ids(&ok).is_ok());

        let dup = response(vec![ToolCall::new("a", "x", "{}"), ToolCall::new("a", "x", "{}")]);
        assert_eq!(check_call_ids(&dup).unwrap_err().kind(), ErrorKind::MalformedResponse);

        let empty = response(vec![ToolCall::new("", "x", "{}")]);
        assert_eq!(check_call_ids(&empty).unwrap_err().kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn test_build_status_str() {
        assert_eq!(BuildStatus::Done { answer: "ok".into() }.as_str(), "done");
        assert_eq!(BuildStatus::IterationLimitReached.as_str(), "iteration_limit");
    }
}
