//! # Session Logger
//!
//! Durable audit trail of one build session.
//!
//! ## Layout
//! ```text
//! <log_dir>/
//! ├── session_18c4f2a1b3d.jsonl             # one LogEntry per line, flushed per entry
//! └── session_18c4f2a1b3d.transcript.json   # final transcript, written at finalize
//! ```
//!
//! The logger is the only writer of its files. `finalize` runs once; later
//! calls are ignored so fatal paths can finalize without double-closing.

use crate::error::{self, Error, Result};
use crate::provider::{CompletionRequest, CompletionResponse, ToolCall, Usage};
use crate::tools::ToolResult;
use crate::transcript::Transcript;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    SessionStart,
    Request,
    Response,
    ToolCall,
    ToolResult,
    Compaction,
    Error,
    SessionEnd,
}

/// One line of the session log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: EntryKind,
    pub data: Value,
}

/// Counters reported in the `session_end` entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub llm_calls: usize,
    pub tool_calls: usize,
    pub tool_errors: usize,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
    pub compactions: usize,
    pub errors: usize,
}

impl SessionMetrics {
    fn track_usage(&mut self, usage: &Usage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;
    }
}

pub struct SessionLogger {
    session_id: String,
    log_dir: PathBuf,
    path: PathBuf,
    file: File,
    metrics: SessionMetrics,
    finalized: bool,
}

impl SessionLogger {
    /// Generate a unique session ID
    pub fn generate_id() -> String {
        let millis = Utc::now().timestamp_millis().max(0);
        format!("session_{:x}", millis)
    }

    /// Open `<log_dir>/<session_id>.jsonl` and write the `session_start` entry
    pub fn create(log_dir: impl AsRef<Path>, session_id: Option<String>, start: Value) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| error::log_failed(log_dir.display().to_string(), e).with_operation("session_log::create"))?;

        let session_id = session_id.unwrap_or_else(Self::generate_id);
        let path = log_dir.join(format!("{}.jsonl", session_id));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| error::log_failed(path.display().to_string(), e).with_operation("session_log::create"))?;

        let mut logger = Self {
            session_id,
            log_dir,
            path,
            file,
            metrics: SessionMetrics::default(),
            finalized: false,
        };

        let mut data = json!({ "session_id": logger.session_id });
        if let (Some(obj), Value::Object(extra)) = (data.as_object_mut(), start) {
            obj.extend(extra);
        }
        logger.append(EntryKind::SessionStart, data)?;
        tracing::info!(session_id = %logger.session_id, path = %logger.path.display(), "session log opened");
        Ok(logger)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.log_dir.join(format!("{}.transcript.json", self.session_id))
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Append one entry and flush it to disk
    pub fn append(&mut self, kind: EntryKind, data: Value) -> Result<()> {
        if self.finalized {
            return Err(Error::new(
                coderloop_error::ErrorKind::LogFailed,
                "session log is already finalized",
            )
            .with_operation("session_log::append"));
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            kind,
            data,
        };
        let line = serde_json::to_string(&entry).map_err(error::serialization_error)?;

        writeln!(self.file, "{}", line)
            .and_then(|_| self.file.flush())
            .map_err(|e| error::log_failed(self.path.display().to_string(), e).with_operation("session_log::append"))
    }

    /// Record an outgoing request. `purpose` is `turn` or `compaction`;
    /// messages before `new_from` were written by an earlier request entry.
    pub fn log_request(
        &mut self,
        purpose: &str,
        iteration: Option<usize>,
        request: &CompletionRequest,
        new_from: usize,
    ) -> Result<()> {
        self.metrics.llm_calls += 1;
        let tools: Vec<&str> = request
            .tools
            .iter()
            .flatten()
            .map(|t| t.name.as_str())
            .collect();
        let new_from = new_from.min(request.messages.len());
        self.append(
            EntryKind::Request,
            json!({
                "purpose": purpose,
                "iteration": iteration,
                "model": request.model,
                "temperature": request.temperature,
                "max_tokens": request.max_tokens,
                "tools": tools,
                "message_count": request.messages.len(),
                "new_from": new_from,
                "messages": &request.messages[new_from..],
            }),
        )
    }

    pub fn log_response(&mut self, purpose: &str, response: &CompletionResponse) -> Result<()> {
        self.metrics.track_usage(&response.usage);
        self.append(
            EntryKind::Response,
            json!({
                "purpose": purpose,
                "id": response.id,
                "model": response.model,
                "finish_reason": response.finish_reason.as_str(),
                "content": response.content,
                "tool_calls": response.tool_calls,
                "usage": response.usage,
            }),
        )
    }

    /// Written before the tool runs
    pub fn log_tool_call(&mut self, call: &ToolCall) -> Result<()> {
        self.metrics.tool_calls += 1;
        self.append(
            EntryKind::ToolCall,
            json!({ "id": call.id, "name": call.name, "arguments": call.arguments }),
        )
    }

    pub fn log_tool_result(&mut self, call: &ToolCall, result: &ToolResult) -> Result<()> {
        if result.is_error() {
            self.metrics.tool_errors += 1;
        }
        self.append(
            EntryKind::ToolResult,
            json!({ "id": call.id, "name": call.name, "result": result }),
        )
    }

    /// `input` is the head as the summarizer saw it, `summary` its reply
    pub fn log_compaction(
        &mut self,
        before: usize,
        after: usize,
        summarized: usize,
        tail: usize,
        summary: &str,
        input: &str,
    ) -> Result<()> {
        self.metrics.compactions += 1;
        self.append(
            EntryKind::Compaction,
            json!({
                "messages_before": before,
                "messages_after": after,
                "summarized": summarized,
                "tail": tail,
                "summary": summary,
                "input": input,
            }),
        )
    }

    pub fn log_error(&mut self, error_type: &str, message: &str) -> Result<()> {
        self.metrics.errors += 1;
        self.append(
            EntryKind::Error,
            json!({ "type": error_type, "message": message }),
        )
    }

    /// Write the transcript snapshot and the `session_end` entry. Runs once.
    pub fn finalize(&mut self, status: &str, transcript: &Transcript) -> Result<()> {
        if self.finalized {
            return Ok(());
        }

        let transcript_path = self.transcript_path();
        let json = serde_json::to_string_pretty(transcript).map_err(error::serialization_error)?;
        std::fs::write(&transcript_path, json).map_err(|e| {
            error::log_failed(transcript_path.display().to_string(), e).with_operation("session_log::finalize")
        })?;

        let data = json!({
            "status": status,
            "messages": transcript.len(),
            "transcript": transcript_path.display().to_string(),
            "metrics": self.metrics,
        });
        self.append(EntryKind::SessionEnd, data)?;
        self.finalized = true;

        tracing::info!(
            session_id = %self.session_id,
            status,
            llm_calls = self.metrics.llm_calls,
            tool_calls = self.metrics.tool_calls,
            total_tokens = self.metrics.total_tokens,
            "session finalized"
        );
        Ok(())
    }
}

// ============================================================================
// Reading logs back
// ============================================================================

/// Parse every entry of a `.jsonl` session log
pub fn read_entries(path: impl AsRef<Path>) -> Result<Vec<LogEntry>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| error::io_failed(path.display().to_string(), e))?;

    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| error::io_failed(path.display().to_string(), e))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: LogEntry = serde_json::from_str(&line).map_err(|e| {
            error::serialization_error(e).with_context("path", path.display().to_string())
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Overview of one session found in the log directory
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: Option<DateTime<Utc>>,
    /// Final status from `session_end`; `None` if the session never finalized
    pub status: Option<String>,
    pub entries: usize,
}

/// List sessions in `log_dir`, oldest first
pub fn list_sessions(log_dir: impl AsRef<Path>) -> Result<Vec<SessionSummary>> {
    let log_dir = log_dir.as_ref();
    if !log_dir.exists() {
        return Ok(Vec::new());
    }

    let mut sessions = Vec::new();
    let dir = std::fs::read_dir(log_dir).map_err(|e| error::io_failed(log_dir.display().to_string(), e))?;
    for entry in dir {
        let entry = entry.map_err(|e| error::io_failed(log_dir.display().to_string(), e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let Some(session_id) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
            continue;
        };

        let entries = match read_entries(&path) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable session log");
                continue;
            }
        };
        let started_at = entries
            .iter()
            .find(|e| e.kind == EntryKind::SessionStart)
            .map(|e| e.timestamp);
        let status = entries
            .iter()
            .rev()
            .find(|e| e.kind == EntryKind::SessionEnd)
            .and_then(|e| e.data.get("status").and_then(Value::as_str).map(String::from));

        sessions.push(SessionSummary {
            session_id,
            started_at,
            status,
            entries: entries.len(),
        });
    }

    sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.session_id.cmp(&b.session_id)));
    Ok(sessions)
}
