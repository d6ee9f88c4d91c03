//! Configuration structures.
//!
//! Every component that needs configuration receives it by explicit
//! construction — there is no process-global config singleton. `Config`
//! aggregates the pieces; callers embedding this kernel build one `Config`
//! (or `Config::default()`) and pass it to the `Kernel` constructor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::envelope::InterruptKind;
use crate::kernel::rate_limiter::RateLimitConfig;

/// Global kernel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Default resource limits applied when a submission does not override them.
    #[serde(default)]
    pub defaults: DefaultLimits,

    /// Per-user submission rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Per-kind interrupt defaults (TTL, auto-expire, event name).
    #[serde(default = "default_interrupt_configs")]
    pub interrupts: HashMap<InterruptKind, InterruptConfig>,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,

    /// OTLP exporter endpoint (optional). Consumed by whatever `Tracer`
    /// collaborator the embedder wires up; the core never dials it directly.
    pub otlp_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            otlp_endpoint: None,
        }
    }
}

/// Default resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultLimits {
    /// Maximum LLM calls per envelope.
    pub max_llm_calls: u32,

    /// Maximum tool calls per envelope.
    pub max_tool_calls: u32,

    /// Maximum agent hops per envelope.
    pub max_agent_hops: u32,

    /// Maximum iterations (loop-backs) per envelope.
    pub max_iterations: u32,

    /// Default whole-request timeout.
    #[serde(with = "humantime_serde")]
    pub process_timeout: Duration,

    /// Default soft timeout (warning interrupt before the hard limit).
    #[serde(with = "humantime_serde")]
    pub soft_process_timeout: Duration,
}

impl Default for DefaultLimits {
    fn default() -> Self {
        Self {
            max_llm_calls: 100,
            max_tool_calls: 50,
            max_agent_hops: 10,
            max_iterations: 20,
            process_timeout: Duration::from_secs(300),
            soft_process_timeout: Duration::from_secs(240),
        }
    }
}

/// Per-kind interrupt defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptConfig {
    /// Time-to-live before an unresolved interrupt auto-expires.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Whether a pending interrupt of this kind auto-expires at all.
    pub auto_expire: bool,

    /// Whether `respond()` requires a non-empty response payload.
    pub requires_response: bool,

    /// CommBus event name emitted on creation (see spec §6.3).
    pub event_name: String,
}

fn default_interrupt_configs() -> HashMap<InterruptKind, InterruptConfig> {
    use InterruptKind::*;

    let mut m = HashMap::new();
    m.insert(
        Clarification,
        InterruptConfig {
            ttl: Duration::from_secs(3600),
            auto_expire: true,
            requires_response: true,
            event_name: "interrupt.clarification_needed".to_string(),
        },
    );
    m.insert(
        Confirmation,
        InterruptConfig {
            ttl: Duration::from_secs(1800),
            auto_expire: true,
            requires_response: true,
            event_name: "interrupt.confirmation_needed".to_string(),
        },
    );
    m.insert(
        AgentReview,
        InterruptConfig {
            ttl: Duration::from_secs(1800),
            auto_expire: true,
            requires_response: true,
            event_name: "interrupt.agent_review_needed".to_string(),
        },
    );
    m.insert(
        Checkpoint,
        InterruptConfig {
            ttl: Duration::from_secs(86400),
            auto_expire: false,
            requires_response: false,
            event_name: "interrupt.checkpoint_needed".to_string(),
        },
    );
    m.insert(
        ResourceExhausted,
        InterruptConfig {
            ttl: Duration::from_secs(300),
            auto_expire: true,
            requires_response: false,
            event_name: "interrupt.resource_exhausted".to_string(),
        },
    );
    m.insert(
        Timeout,
        InterruptConfig {
            ttl: Duration::from_secs(60),
            auto_expire: true,
            requires_response: false,
            event_name: "interrupt.timeout".to_string(),
        },
    );
    m.insert(
        SystemError,
        InterruptConfig {
            ttl: Duration::from_secs(60),
            auto_expire: true,
            requires_response: false,
            event_name: "interrupt.system_error".to_string(),
        },
    );
    m
}
