//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context. Every variant corresponds to one of the
//! error kinds a caller must be able to distinguish; none of them are coupled
//! to a particular transport — callers that expose this kernel over a network
//! boundary are responsible for mapping these onto their own status codes.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the orchestration kernel.
#[derive(Error, Debug)]
pub enum Error {
    /// Request/config validation failures.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Quota or resource exhaustion.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Invalid state transition.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// Pipeline configuration is invalid (unknown stage name, dangling route, ...).
    #[error("config error: {0}")]
    ConfigError(String),

    /// An agent returned a non-recoverable error.
    #[error("agent error: {0}")]
    AgentError(String),

    /// The LLM collaborator failed.
    #[error("llm error: {0}")]
    LlmError(String),

    /// The tool collaborator failed, or access was denied.
    #[error("tool error: {0}")]
    ToolError(String),

    /// A runtime bound was reached (hops, LLM calls, iterations, edge limit).
    #[error("bounds exceeded: {0}")]
    BoundsExceeded(String),

    /// Operation was cancelled.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Operation timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Execution stopped to await an external response.
    #[error("interrupt pending: {0}")]
    InterruptPending(String),

    /// Submission rejected by the per-user rate limiter.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Internal/infrastructure errors (store, bus, panic recovery).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors (file-backed checkpoint/state stores).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn agent_error(msg: impl Into<String>) -> Self {
        Self::AgentError(msg.into())
    }

    pub fn llm_error(msg: impl Into<String>) -> Self {
        Self::LlmError(msg.into())
    }

    pub fn tool_error(msg: impl Into<String>) -> Self {
        Self::ToolError(msg.into())
    }

    pub fn bounds_exceeded(msg: impl Into<String>) -> Self {
        Self::BoundsExceeded(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn interrupt_pending(msg: impl Into<String>) -> Self {
        Self::InterruptPending(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// The stable error-kind name used in logs and envelope `terminal_reason`
    /// strings (see `envelope::enums::TerminalReason`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::StateTransition(_) => "state_transition",
            Self::ConfigError(_) => "config_error",
            Self::AgentError(_) => "agent_error",
            Self::LlmError(_) => "llm_error",
            Self::ToolError(_) => "tool_error",
            Self::BoundsExceeded(_) => "bounds_exceeded",
            Self::Cancelled(_) => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::InterruptPending(_) => "interrupt_pending",
            Self::RateLimited(_) => "rate_limited",
            Self::Internal(_) => "system_error",
            Self::Serialization(_) => "system_error",
            Self::Io(_) => "system_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(Error::validation("x").kind(), "validation");
        assert_eq!(Error::bounds_exceeded("x").kind(), "bounds_exceeded");
        assert_eq!(Error::internal("x").kind(), "system_error");
    }

    #[test]
    fn display_includes_message() {
        let e = Error::agent_error("boom");
        assert!(e.to_string().contains("boom"));
    }
}
