//! Scripted provider and fixtures shared by the agent tests

#![allow(dead_code)]

use coderloop_agent::AgentConfig;
use coderloop_runtime::{
    CompletionRequest, CompletionResponse, Error, ErrorKind, FinishReason, LlmProvider, Result, ToolCall, Usage,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

pub enum Step {
    Reply(CompletionResponse),
    Fail(ErrorKind),
}

/// Replays scripted replies in order and records every request it sees
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<Box<dyn Fn(usize) -> CompletionResponse + Send + Sync>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with `f(call_index)` once the script runs out
    pub fn repeating(f: impl Fn(usize) -> CompletionResponse + Send + Sync + 'static) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback: Some(Box::new(f)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(response)) => Ok(response),
            Some(Step::Fail(kind)) => Err(Error::new(kind, "scripted failure")),
            None => match &self.fallback {
                Some(f) => Ok(f(index)),
                None => Err(Error::unexpected(format!("script exhausted at request {}", index))),
            },
        }
    }
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 100,
        completion_tokens: 20,
        total_tokens: 120,
    }
}

pub fn text(content: &str, finish_reason: FinishReason) -> CompletionResponse {
    CompletionResponse {
        id: "resp".into(),
        model: "scripted-model".into(),
        content: Some(content.into()),
        tool_calls: Vec::new(),
        finish_reason,
        usage: usage(),
    }
}

pub fn stop(content: &str) -> Step {
    Step::Reply(text(content, FinishReason::Stop))
}

pub fn length() -> Step {
    Step::Reply(text("partial answer that ran out of", FinishReason::Length))
}

pub fn tool_calls(calls: Vec<ToolCall>) -> CompletionResponse {
    CompletionResponse {
        id: "resp".into(),
        model: "scripted-model".into(),
        content: None,
        tool_calls: calls,
        finish_reason: FinishReason::ToolCalls,
        usage: usage(),
    }
}

pub fn calls(calls: Vec<ToolCall>) -> Step {
    Step::Reply(tool_calls(calls))
}

pub fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall::new(id, name, args.to_string())
}

pub fn config(root: &Path, max_iterations: usize, tail_length: usize) -> AgentConfig {
    AgentConfig {
        model: "scripted-model".into(),
        temperature: 0.2,
        max_tokens: 2000,
        max_iterations,
        tail_length,
        summary_max_tokens: 800,
        shell_timeout: Duration::from_secs(10),
        projects_root: root.join("projects"),
        context_dir: root.join("context"),
        log_dir: root.join("logs"),
    }
}
