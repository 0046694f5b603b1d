//! Shared error type across panrpc crates.

use thiserror::Error;

/// Wire-level error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A field the method requires was absent.
    MissingField,
    /// Malformed frame, envelope, or value.
    BadRequest,
    /// Service or method name not known to the daemon.
    UnknownMethod,
    /// Telemetry event for a tracing id that was never created.
    UnknownTracer,
    /// Telemetry event after the tracer instance was closed.
    TracerClosed,
    /// The policy script raised an error or returned an unusable value.
    Policy,
    /// RPC channel failure.
    Transport,
    /// Invalid configuration.
    Config,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in response envelopes.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MissingField => "MISSING_FIELD",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::UnknownMethod => "UNKNOWN_METHOD",
            ErrorCode::UnknownTracer => "UNKNOWN_TRACER",
            ErrorCode::TracerClosed => "TRACER_CLOSED",
            ErrorCode::Policy => "POLICY",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// Parse a wire code. Unknown codes map to `Internal`.
    pub fn parse(s: &str) -> Self {
        match s {
            "MISSING_FIELD" => ErrorCode::MissingField,
            "BAD_REQUEST" => ErrorCode::BadRequest,
            "UNKNOWN_METHOD" => ErrorCode::UnknownMethod,
            "UNKNOWN_TRACER" => ErrorCode::UnknownTracer,
            "TRACER_CLOSED" => ErrorCode::TracerClosed,
            "POLICY" => ErrorCode::Policy,
            "TRANSPORT" => ErrorCode::Transport,
            "CONFIG" => ErrorCode::Config,
            _ => ErrorCode::Internal,
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, PanRpcError>;

/// Unified error type used by core, daemon, and client.
#[derive(Debug, Error)]
pub enum PanRpcError {
    #[error("required field missing: {0}")]
    MissingField(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("unknown tracing id: {0}")]
    UnknownTracer(u64),
    #[error("tracer closed: {0}")]
    TracerClosed(u64),
    #[error("policy: {0}")]
    Policy(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl PanRpcError {
    /// Map to a stable wire code.
    pub fn code(&self) -> ErrorCode {
        match self {
            PanRpcError::MissingField(_) => ErrorCode::MissingField,
            PanRpcError::BadRequest(_) => ErrorCode::BadRequest,
            PanRpcError::UnknownMethod(_) => ErrorCode::UnknownMethod,
            PanRpcError::UnknownTracer(_) => ErrorCode::UnknownTracer,
            PanRpcError::TracerClosed(_) => ErrorCode::TracerClosed,
            PanRpcError::Policy(_) => ErrorCode::Policy,
            PanRpcError::Transport(_) => ErrorCode::Transport,
            PanRpcError::Config(_) => ErrorCode::Config,
            PanRpcError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Variant payload without the display prefix (sent as the wire `msg`).
    pub fn detail(&self) -> String {
        match self {
            PanRpcError::MissingField(s)
            | PanRpcError::BadRequest(s)
            | PanRpcError::UnknownMethod(s)
            | PanRpcError::Policy(s)
            | PanRpcError::Transport(s)
            | PanRpcError::Config(s)
            | PanRpcError::Internal(s) => s.clone(),
            PanRpcError::UnknownTracer(id) | PanRpcError::TracerClosed(id) => id.to_string(),
        }
    }

    /// Rebuild an error received in a response envelope (`code` + `detail`).
    pub fn from_wire(code: &str, msg: &str) -> Self {
        let detail = msg.to_string();
        match ErrorCode::parse(code) {
            ErrorCode::MissingField => PanRpcError::MissingField(detail),
            ErrorCode::BadRequest => PanRpcError::BadRequest(detail),
            ErrorCode::UnknownMethod => PanRpcError::UnknownMethod(detail),
            ErrorCode::UnknownTracer => PanRpcError::UnknownTracer(msg.parse().unwrap_or(0)),
            ErrorCode::TracerClosed => PanRpcError::TracerClosed(msg.parse().unwrap_or(0)),
            ErrorCode::Policy => PanRpcError::Policy(detail),
            ErrorCode::Transport => PanRpcError::Transport(detail),
            ErrorCode::Config => PanRpcError::Config(detail),
            ErrorCode::Internal => PanRpcError::Internal(detail),
        }
    }

    /// True for failures the caller caused (rejected before policy ran).
    pub fn is_protocol(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::MissingField
                | ErrorCode::BadRequest
                | ErrorCode::UnknownMethod
                | ErrorCode::UnknownTracer
                | ErrorCode::TracerClosed
        )
    }
}
