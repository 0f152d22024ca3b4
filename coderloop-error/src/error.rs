//! The error value shared by every coderloop crate

use crate::{ErrorKind, ErrorStatus};
use std::fmt;

/// A failure somewhere in the build loop.
///
/// Carries the [`ErrorKind`], a message, an [`ErrorStatus`], the operation
/// that raised it (`module::function`), key-value context, and optionally the
/// underlying error it wraps.
///
/// ```rust
/// use coderloop_error::{Error, ErrorKind};
///
/// let err = Error::sandbox_violation("../outside.txt", "/tmp/projects/demo")
///     .with_operation("workspace::resolve");
///
/// assert_eq!(err.kind(), ErrorKind::SandboxViolation);
/// assert!(!err.is_retryable());
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: ErrorStatus,
    operation: &'static str,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    /// Status defaults to temporary for kinds that can clear on their own
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: if kind.is_retryable() {
                ErrorStatus::Temporary
            } else {
                ErrorStatus::Permanent
            },
            operation: "",
            context: Vec::new(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    /// Innermost-last operation; empty if none was recorded
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// Look up one context value by key
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    pub fn source_ref(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }

    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }

    /// Record the operation. An earlier operation is kept in context under
    /// `called`, so the chain reads outermost first.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        if !self.operation.is_empty() {
            let inner = std::mem::replace(&mut self.operation, operation);
            self.context.push(("called", inner.to_string()));
        } else {
            self.operation = operation;
        }
        self
    }

    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Wrap the underlying error. Set at most once.
    pub fn set_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "source already set");
        self.source = Some(source.into());
        self
    }

    /// The caller stopped waiting on a temporary condition
    pub fn persist(mut self) -> Self {
        self.status = self.status.persist();
        self
    }
}

/// One line: `Kind at op: message {key=value, ...} [status]`
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.as_str())?;
        if !self.operation.is_empty() {
            write!(f, " at {}", self.operation)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if !self.context.is_empty() {
            let pairs: Vec<String> = self.context.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            write!(f, " {{{}}}", pairs.join(", "))?;
        }
        write!(f, " [{}]", self.status)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({})", self.kind, self.status)?;
        if !self.operation.is_empty() {
            writeln!(f, "  operation: {}", self.operation)?;
        }
        if !self.message.is_empty() {
            writeln!(f, "  message:   {}", self.message)?;
        }
        for (key, value) in &self.context {
            writeln!(f, "  {:<10} {}", format!("{}:", key), value)?;
        }
        if let Some(source) = &self.source {
            writeln!(f, "  source:    {:#}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = ErrorKind::from_io(err.kind());
        Error::new(kind, err.to_string()).set_source(err)
    }
}

// Constructors for the kinds raised in more than one place

impl Error {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }

    pub fn duplicate_tool(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorKind::DuplicateTool, format!("tool '{}' is already registered", name)).with_context("tool", name)
    }

    pub fn unknown_tool(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorKind::UnknownTool, format!("unknown tool '{}'", name)).with_context("tool", name)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// `path` as the model gave it, `root` as the canonical workspace root
    pub fn sandbox_violation(path: impl Into<String>, root: impl Into<String>) -> Self {
        let (path, root) = (path.into(), root.into());
        Self::new(
            ErrorKind::SandboxViolation,
            format!("path '{}' resolves outside the workspace root '{}'", path, root),
        )
        .with_context("path", path)
        .with_context("root", root)
    }

    pub fn tool_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::ToolFailed, reason).with_context("tool", name)
    }

    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResponse, message)
    }

    pub fn compaction_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CompactionFailed, message)
    }
}
