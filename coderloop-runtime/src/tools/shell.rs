//! run_shell: non-interactive `bash -lc` inside the workspace

use super::{ParamKind, ParamSpec, ToolArgs, ToolHandler, ToolOutput, ToolRegistry, ToolSpec};
use crate::error::{self, Error, Result};
use crate::workspace::Workspace;
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

/// Characters kept from the end of stdout and stderr
pub const OUTPUT_TAIL_CHARS: usize = 10_000;

pub fn register(registry: &mut ToolRegistry, workspace: Arc<Workspace>, timeout: Duration) -> Result<()> {
    registry.register(
        ToolSpec::new(
            "run_shell",
            "Run a non-interactive bash command inside the workspace and return exit code, stdout and stderr.",
        )
        .param(ParamSpec::required("command", ParamKind::String, "The bash command to execute"))
        .param(ParamSpec::optional("cwd", ParamKind::String, "Working directory relative to the workspace root"))
        .param(ParamSpec::optional(
            "timeout_sec",
            ParamKind::Integer,
            "Timeout in seconds (default from configuration)",
        )),
        RunShell { workspace, timeout },
    )
}

struct RunShell {
    workspace: Arc<Workspace>,
    timeout: Duration,
}

#[async_trait]
impl ToolHandler for RunShell {
    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let command = args.str("command")?;
        if command.trim().is_empty() {
            return Err(Error::invalid_argument("command must be a non-empty string"));
        }

        let cwd = self.workspace.resolve(args.opt_str("cwd").unwrap_or("."))?;
        if !cwd.is_dir() {
            return Err(Error::invalid_argument(format!(
                "cwd '{}' is not a directory",
                self.workspace.relative(&cwd)
            )));
        }
        check_path_tokens(&self.workspace, &cwd, command)?;

        let timeout_sec = args.u64_or("timeout_sec", self.timeout.as_secs())?;
        if timeout_sec == 0 {
            return Err(Error::invalid_argument("timeout_sec must be positive"));
        }

        let rel_cwd = self.workspace.relative(&cwd);
        tracing::debug!(command, cwd = %rel_cwd, timeout_sec, "running shell command");

        let child = tokio::process::Command::new("bash")
            .arg("-lc")
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::tool_failed("run_shell", format!("failed to spawn bash: {}", e)).set_source(e)
            })?;

        let output = tokio::time::timeout(Duration::from_secs(timeout_sec), child.wait_with_output())
            .await
            .map_err(|_| error::tool_timeout("run_shell", timeout_sec))?
            .map_err(|e| Error::tool_failed("run_shell", format!("failed to wait for bash: {}", e)).set_source(e))?;

        let exit_code = output.status.code();
        let stdout = tail_chars(&String::from_utf8_lossy(&output.stdout), OUTPUT_TAIL_CHARS);
        let stderr = tail_chars(&String::from_utf8_lossy(&output.stderr), OUTPUT_TAIL_CHARS);

        let message = match exit_code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };

        Ok(ToolOutput::new(
            message,
            json!({
                "exit_code": exit_code,
                "stdout": stdout,
                "stderr": stderr,
                "cwd": rel_cwd,
                "command": command,
            }),
        ))
    }
}

/// Absolute paths outside the workspace a command may still name
const SYSTEM_PATHS: &[&str] = &["/bin/", "/usr/bin/", "/usr/local/bin/", "/dev/null"];

const CHANGE_DIR: &[&str] = &["cd", "pushd"];

/// Reject commands whose path arguments step out of the workspace.
///
/// Checks words, not shell semantics: `..` paths must stay inside from the
/// cwd, and from the root as well once the command changes directory;
/// absolute paths must lie inside the root unless they name a system
/// binary; `~` and a bare `cd` (home) are refused.
fn check_path_tokens(workspace: &Workspace, cwd: &Path, command: &str) -> Result<()> {
    let segments: Vec<Vec<&str>> = command
        .split(|c: char| matches!(c, ';' | '|' | '&' | '(' | ')' | '\n' | '`'))
        .map(|segment| {
            segment
                .split(|c: char| c.is_whitespace() || matches!(c, '<' | '>' | '=' | '"' | '\''))
                .filter(|word| !word.is_empty())
                .collect()
        })
        .collect();
    let changes_dir = segments
        .iter()
        .any(|words| words.first().is_some_and(|w| CHANGE_DIR.contains(w)));

    for words in &segments {
        if let [first, rest @ ..] = words.as_slice() {
            if CHANGE_DIR.contains(first) && matches!(rest.first(), None | Some(&"-")) {
                return Err(escape(workspace, words.join(" ")));
            }
        }
        for word in words {
            if !stays_inside(workspace, cwd, changes_dir, word) {
                return Err(escape(workspace, word.to_string()));
            }
        }
    }
    Ok(())
}

fn stays_inside(workspace: &Workspace, cwd: &Path, changes_dir: bool, word: &str) -> bool {
    if word.starts_with('~') {
        return false;
    }
    if word.starts_with('/') {
        let system = !word.contains("..")
            && SYSTEM_PATHS
                .iter()
                .any(|p| word.starts_with(p) || word == p.trim_end_matches('/'));
        return system || workspace.resolve(word).is_ok();
    }
    if word.contains("..") {
        return workspace.contains_from(cwd, word) && (!changes_dir || workspace.contains_from(workspace.root(), word));
    }
    true
}

fn escape(workspace: &Workspace, word: String) -> Error {
    Error::sandbox_violation(word, workspace.root().display().to_string()).with_operation("run_shell")
}

fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        text.to_string()
    } else {
        text.chars().skip(count - max).collect()
    }
}
