//! Core enumerations for envelope and pipeline config.

use serde::{Deserialize, Serialize};

/// Why a pipeline run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    Completed,
    MaxHopsReached,
    MaxLlmReached,
    MaxIterationsReached,
    EdgeLimitExceeded,
    Cancelled,
    ConfigError,
    AgentError,
    Timeout,
}

/// Interrupt type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    Clarification,
    Confirmation,
    AgentReview,
    Checkpoint,
    ResourceExhausted,
    Timeout,
    SystemError,
}

/// Lifecycle of a `FlowInterrupt`. Monotonic: once it leaves `Pending` it
/// never returns (spec §3.4, invariant in §8.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptStatus {
    Pending,
    Resolved,
    Cancelled,
    Expired,
}

/// Tool access level granted to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolAccess {
    None,
    Read,
    Write,
    All,
}
