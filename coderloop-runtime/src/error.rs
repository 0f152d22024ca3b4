//! Runtime error helpers
//!
//! Re-exports coderloop-error and provides runtime-specific conveniences.

pub use coderloop_error::{Error, ErrorKind, ErrorStatus, Result};

// =============================================================================
// Transport error constructors
// =============================================================================

/// Map a reqwest failure onto the transport kinds
pub fn transport_error(err: reqwest::Error, base_url: &str) -> Error {
    let kind = if err.is_timeout() {
        ErrorKind::TransportTimeout
    } else if err.is_decode() {
        ErrorKind::MalformedResponse
    } else {
        ErrorKind::NetworkFailed
    };
    Error::new(kind, err.to_string())
        .with_context("base_url", base_url)
        .set_source(err)
}

/// Map a non-success HTTP status onto the transport kinds
pub fn status_error(status: u16, body: impl Into<String>) -> Error {
    let kind = match status {
        429 => ErrorKind::RateLimited,
        401 | 403 => ErrorKind::AuthenticationFailed,
        _ => ErrorKind::ApiFailed,
    };
    Error::new(kind, body).with_context("status", status.to_string())
}

// =============================================================================
// Tool error constructors
// =============================================================================

/// Create a FileExists error
pub fn file_exists(path: impl Into<String>) -> Error {
    let path = path.into();
    Error::new(
        ErrorKind::FileExists,
        format!("'{}' already exists; pass overwrite=true to replace it", path),
    )
    .with_context("path", path)
}

/// Create a FileNotFound error
pub fn file_not_found(path: impl Into<String>) -> Error {
    let path = path.into();
    Error::new(ErrorKind::FileNotFound, format!("'{}' does not exist", path))
        .with_context("path", path)
}

/// Create a ToolTimeout error
pub fn tool_timeout(name: impl Into<String>, secs: u64) -> Error {
    let name = name.into();
    Error::new(
        ErrorKind::ToolTimeout,
        format!("'{}' did not finish within {}s", name, secs),
    )
    .with_context("tool", name)
    .with_context("timeout_sec", secs.to_string())
}

/// Create an IoFailed error carrying the path it concerns
pub fn io_failed(path: impl Into<String>, err: std::io::Error) -> Error {
    let path = path.into();
    Error::new(ErrorKind::from_io(err.kind()), format!("{}: {}", path, err))
        .with_context("path", path)
        .set_source(err)
}

// =============================================================================
// Serialization / log error constructors
// =============================================================================

/// Create a SerializationFailed error
pub fn serialization_error(err: serde_json::Error) -> Error {
    Error::new(ErrorKind::SerializationFailed, err.to_string()).set_source(err)
}

/// Create a LogFailed error
pub fn log_failed(path: impl Into<String>, err: std::io::Error) -> Error {
    let path = path.into();
    Error::new(ErrorKind::LogFailed, format!("{}: {}", path, err))
        .with_context("path", path)
        .set_source(err)
}
