//! # Tool Registry & Executor
//!
//! Tools are registered explicitly with a plain-data parameter schema and a
//! handler. The registry validates arguments against the schema before the
//! handler runs, and turns every failure into a `ToolResult::Error` so that a
//! misbehaving tool never takes the loop down.

pub mod fs;
pub mod shell;

use crate::error::{Error, ErrorKind, Result};
use crate::provider::{ToolCall, ToolDefinition};
use crate::workspace::Workspace;
use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
        }
    }
}

/// One declared parameter of a tool
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
        }
    }

    pub fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
        }
    }
}

/// Name, description and parameter schema of a tool
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// JSON-schema wire form
    pub fn to_definition(&self) -> ToolDefinition {
        let mut properties = Map::new();
        for p in &self.params {
            properties.insert(
                p.name.to_string(),
                serde_json::json!({ "type": p.kind.as_str(), "description": p.description }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();

        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    /// Parse raw model arguments and check them against the declared params
    pub fn validate(&self, raw: &str) -> Result<ToolArgs> {
        let value: Value = if raw.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(raw).map_err(|e| {
                Error::invalid_argument(format!("arguments are not valid JSON: {}", e))
                    .with_context("tool", self.name.clone())
            })?
        };

        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(Error::invalid_argument(format!(
                    "arguments must be a JSON object, got {}",
                    json_type(&other)
                ))
                .with_context("tool", self.name.clone()))
            }
        };

        for key in map.keys() {
            if !self.params.iter().any(|p| p.name == key) {
                return Err(Error::invalid_argument(format!("unexpected argument '{}'", key))
                    .with_context("tool", self.name.clone()));
            }
        }

        for p in &self.params {
            match map.get(p.name) {
                None | Some(Value::Null) if p.required => {
                    return Err(Error::invalid_argument(format!("missing required argument '{}'", p.name))
                        .with_context("tool", self.name.clone()));
                }
                Some(v) if !v.is_null() && !p.kind.accepts(v) => {
                    return Err(Error::invalid_argument(format!(
                        "argument '{}' must be {}, got {}",
                        p.name,
                        p.kind.as_str(),
                        json_type(v)
                    ))
                    .with_context("tool", self.name.clone()));
                }
                _ => {}
            }
        }

        Ok(ToolArgs(map))
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validated tool arguments
#[derive(Debug, Clone, Default)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn str(&self, name: &str) -> Result<&str> {
        self.opt_str(name)
            .ok_or_else(|| Error::invalid_argument(format!("missing required argument '{}'", name)))
    }

    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        self.0.get(name).and_then(Value::as_bool).unwrap_or(default)
    }

    /// Non-negative integer argument; negatives are rejected
    pub fn u64_or(&self, name: &str, default: u64) -> Result<u64> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v.as_u64().ok_or_else(|| {
                Error::invalid_argument(format!("argument '{}' must be a non-negative integer", name))
            }),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of one tool invocation, serialized into the tool message content
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolResult {
    Success {
        message: String,
        #[serde(skip_serializing_if = "Value::is_null")]
        data: Value,
    },
    Error {
        #[serde(serialize_with = "serialize_kind")]
        kind: ErrorKind,
        message: String,
    },
}

fn serialize_kind<S: Serializer>(kind: &ErrorKind, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(kind.as_str())
}

impl ToolResult {
    pub fn success(message: impl Into<String>, data: Value) -> Self {
        ToolResult::Success {
            message: message.into(),
            data,
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ToolResult::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn from_error(err: &Error) -> Self {
        Self::error(err.kind(), err.message())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Error { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ToolResult::Error { kind, .. } => Some(*kind),
            ToolResult::Success { .. } => None,
        }
    }

    /// JSON text placed in the tool message
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({
                "status": "error",
                "kind": ErrorKind::SerializationFailed.as_str(),
                "message": e.to_string(),
            })
            .to_string()
        })
    }
}

/// What a handler returns on success
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub message: String,
    pub data: Value,
}

impl ToolOutput {
    pub fn new(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }
}

// ============================================================================
// Handler trait & registry
// ============================================================================

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: ToolArgs) -> Result<ToolOutput>;
}

struct RegisteredTool {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

/// Explicit, ordered set of tools available to one session
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ToolSpec, handler: impl ToolHandler + 'static) -> Result<()> {
        if self.index.contains_key(&spec.name) {
            return Err(Error::duplicate_tool(spec.name).with_operation("tools::register"));
        }
        self.index.insert(spec.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            spec,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    /// Wire schemas in registration order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.spec.to_definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.spec.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run one tool call; never fails, errors come back as `ToolResult::Error`
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(&idx) = self.index.get(&call.name) else {
            tracing::warn!(tool = %call.name, "model called an unknown tool");
            return ToolResult::from_error(&Error::unknown_tool(call.name.clone()));
        };
        let tool = &self.tools[idx];

        let args = match tool.spec.validate(&call.arguments) {
            Ok(args) => args,
            Err(err) => {
                tracing::debug!(tool = %call.name, error = %err, "rejected tool arguments");
                return ToolResult::from_error(&err);
            }
        };

        match AssertUnwindSafe(tool.handler.call(args)).catch_unwind().await {
            Ok(Ok(output)) => ToolResult::success(output.message, output.data),
            Ok(Err(err)) if err.kind().is_tool() => {
                tracing::debug!(tool = %call.name, error = %err, "tool failed");
                ToolResult::from_error(&err)
            }
            Ok(Err(err)) => {
                tracing::warn!(tool = %call.name, error = %err, "tool raised a non-tool error");
                ToolResult::error(ErrorKind::ToolFailed, err.message())
            }
            Err(payload) => {
                let reason = panic_reason(payload.as_ref());
                tracing::error!(tool = %call.name, reason = %reason, "tool panicked");
                ToolResult::error(ErrorKind::ToolFailed, format!("tool '{}' panicked: {}", call.name, reason))
            }
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Registry with the filesystem and shell tools bound to `workspace`
pub fn builtin_registry(workspace: Workspace, shell_timeout: Duration) -> Result<ToolRegistry> {
    let workspace = Arc::new(workspace);
    let mut registry = ToolRegistry::new();
    fs::register(&mut registry, workspace.clone())?;
    shell::register(&mut registry, workspace, shell_timeout)?;
    Ok(registry)
}
