//! What went wrong

use std::fmt;

/// The kind of error that occurred.
///
/// Tool kinds go back to the model as tool results and the loop continues.
/// Transport and compaction kinds end the session. Configuration kinds stop
/// it from starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Catch-all, including broken internal invariants
    Unexpected,
    SerializationFailed,

    // configuration
    ConfigInvalid,
    DuplicateTool,

    // tools
    UnknownTool,
    /// Arguments failed to parse or did not match the tool's schema
    InvalidArgument,
    /// A path resolved outside the workspace root
    SandboxViolation,
    /// Refused to replace an existing file without `overwrite`
    FileExists,
    FileNotFound,
    PermissionDenied,
    IoFailed,
    /// The tool ran but could not complete
    ToolFailed,
    ToolTimeout,

    // transport
    /// Connection refused, reset, DNS
    NetworkFailed,
    TransportTimeout,
    /// Non-success HTTP status other than 401/403/429
    ApiFailed,
    RateLimited,
    AuthenticationFailed,
    /// Undecodable body, or a reply that breaks the protocol
    MalformedResponse,

    // compaction
    CompactionFailed,
    /// Still out of context after compacting, or nothing left to compact
    ContextExhausted,

    /// The session log could not be written
    LogFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            Unexpected => "Unexpected",
            SerializationFailed => "SerializationFailed",
            ConfigInvalid => "ConfigInvalid",
            DuplicateTool => "DuplicateTool",
            UnknownTool => "UnknownTool",
            InvalidArgument => "InvalidArgument",
            SandboxViolation => "SandboxViolation",
            FileExists => "FileExists",
            FileNotFound => "FileNotFound",
            PermissionDenied => "PermissionDenied",
            IoFailed => "IoFailed",
            ToolFailed => "ToolFailed",
            ToolTimeout => "ToolTimeout",
            NetworkFailed => "NetworkFailed",
            TransportTimeout => "TransportTimeout",
            ApiFailed => "ApiFailed",
            RateLimited => "RateLimited",
            AuthenticationFailed => "AuthenticationFailed",
            MalformedResponse => "MalformedResponse",
            CompactionFailed => "CompactionFailed",
            ContextExhausted => "ContextExhausted",
            LogFailed => "LogFailed",
        }
    }

    /// Map an I/O failure onto the closest kind
    pub fn from_io(kind: std::io::ErrorKind) -> Self {
        match kind {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::AlreadyExists => ErrorKind::FileExists,
            _ => ErrorKind::IoFailed,
        }
    }

    /// Temporary by default: the same call could succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkFailed | ErrorKind::TransportTimeout | ErrorKind::RateLimited | ErrorKind::ToolTimeout
        )
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkFailed
                | ErrorKind::TransportTimeout
                | ErrorKind::ApiFailed
                | ErrorKind::RateLimited
                | ErrorKind::AuthenticationFailed
                | ErrorKind::MalformedResponse
        )
    }

    /// Kinds a tool handler may produce; these never end the loop
    pub fn is_tool(&self) -> bool {
        matches!(
            self,
            ErrorKind::UnknownTool
                | ErrorKind::InvalidArgument
                | ErrorKind::SandboxViolation
                | ErrorKind::FileExists
                | ErrorKind::FileNotFound
                | ErrorKind::PermissionDenied
                | ErrorKind::IoFailed
                | ErrorKind::ToolFailed
                | ErrorKind::ToolTimeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_variant() {
        assert_eq!(ErrorKind::SandboxViolation.to_string(), "SandboxViolation");
        assert_eq!(format!("{}", ErrorKind::ContextExhausted), "ContextExhausted");
    }

    #[test]
    fn test_groups() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::MalformedResponse.is_retryable());

        assert!(ErrorKind::MalformedResponse.is_transport());
        assert!(!ErrorKind::ToolTimeout.is_transport());

        assert!(ErrorKind::ToolTimeout.is_tool());
        assert!(!ErrorKind::CompactionFailed.is_tool());
        assert!(!ErrorKind::ConfigInvalid.is_tool());
    }

    #[test]
    fn test_from_io() {
        assert_eq!(ErrorKind::from_io(std::io::ErrorKind::NotFound), ErrorKind::FileNotFound);
        assert_eq!(ErrorKind::from_io(std::io::ErrorKind::AlreadyExists), ErrorKind::FileExists);
        assert_eq!(ErrorKind::from_io(std::io::ErrorKind::BrokenPipe), ErrorKind::IoFailed);
    }
}
