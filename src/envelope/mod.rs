//! Envelope - the core state container.
//!
//! The Envelope represents the mutable state of a request as it flows through
//! the multi-agent pipeline. It tracks inputs, outputs, bounds, and interrupts.
//!
//! Fields are organized into semantic sub-structs:
//! - **Identity**: envelope/request/user/session IDs
//! - **Pipeline**: stage sequencing and parallel execution
//! - **Bounds**: resource limits and counters
//! - **InterruptState**: human-in-the-loop flow control
//! - **Audit**: processing history, timing, metadata
//!
//! Ownership: the envelope is single-owner at every moment (the Runtime while
//! executing, the Lifecycle Manager while queued, a `CheckpointStore` in
//! serialized form). No two components may mutate it concurrently; the
//! Runtime is the only component that clones it (under a lock, for parallel
//! stages) and merges clones back (also under that lock).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::types::{EnvelopeId, InterruptId, RequestId, SessionId, UserId};

pub mod enums;
pub mod export;
pub mod import;

pub use enums::*;

/// Reserved key under which `Runtime::resume` merges a resolved interrupt's
/// response into the outputs of the stage that raised it (spec §4.1.4).
pub const INTERRUPT_RESPONSE_KEY: &str = "__interrupt_response__";

/// Reserved stage name meaning "no further stage to run".
pub const STAGE_END: &str = "end";

/// Response to a flow interrupt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterruptResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, serde_json::Value>>,

    pub received_at: DateTime<Utc>,
}

/// A typed suspension of execution awaiting external input (spec §3.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowInterrupt {
    pub id: InterruptId,
    pub kind: InterruptKind,

    pub request_id: RequestId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub envelope_id: EnvelopeId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, serde_json::Value>>,

    pub status: InterruptStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<InterruptResponse>,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// One entry in the envelope's append-only execution history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingRecord {
    pub stage: String,
    pub duration_ms: i64,
    pub status: String,
    pub at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// Sub-structs
// =============================================================================

/// Envelope identity fields. Immutable once the envelope is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    pub envelope_id: EnvelopeId,
    pub request_id: RequestId,
    pub user_id: UserId,
    pub session_id: SessionId,

    /// Caller-supplied conversation id a `StateStore` snapshot is keyed by
    /// (spec §6.2). `None` means the caller opted out of state-store
    /// persistence for this envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// Pipeline sequencing and parallel execution state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pipeline {
    pub current_stage: String,
    pub stage_order: Vec<String>,
    pub iteration: u32,

    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub active_stages: HashSet<String>,

    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub completed_stage_set: HashSet<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub failed_stages: HashMap<String, String>,

    /// Traversal counts keyed by `"from->to"`, checked against
    /// `PipelineConfig::edge_limits` (spec §4.1.1 step 7).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub edge_traversals: HashMap<String, u32>,

    #[serde(default)]
    pub parallel_mode: bool,
}

impl Pipeline {
    pub fn edge_key(from: &str, to: &str) -> String {
        format!("{from}->{to}")
    }

    pub fn traversals_of(&self, from: &str, to: &str) -> u32 {
        self.edge_traversals
            .get(&Self::edge_key(from, to))
            .copied()
            .unwrap_or(0)
    }
}

/// Resource limits (a snapshot taken from `PipelineConfig` at submission time)
/// and usage counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bounds {
    pub llm_call_count: u32,
    pub max_llm_calls: u32,
    pub tool_call_count: u32,
    pub agent_hop_count: u32,
    pub max_agent_hops: u32,
    pub max_iterations: u32,
    pub tokens_in: u64,
    pub tokens_out: u64,

    pub terminated: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_reason: Option<TerminalReason>,
}

/// Human-in-the-loop interrupt state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InterruptState {
    pub interrupt_pending: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<FlowInterrupt>,

    /// The stage that raised the current/most recent interrupt, so
    /// `Runtime::resume` (spec §4.1.4) knows where to merge the response.
    /// Internal bookkeeping, not part of the wire `FlowInterrupt` record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raising_stage: Option<String>,
}

/// Audit trail: history, timing, metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Audit {
    pub processing_history: Vec<ProcessingRecord>,
    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

// =============================================================================
// Envelope
// =============================================================================

/// The single authoritative execution record for one request (spec §3.1).
///
/// Outputs use a dynamic map keyed by stage name rather than hardcoded
/// per-agent fields, so any agent declared in a `PipelineConfig` can write
/// results without the envelope knowing about it in advance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub identity: Identity,
    pub raw_input: String,
    pub received_at: DateTime<Utc>,

    /// outputs[stage_name][field] = value
    pub outputs: HashMap<String, HashMap<String, serde_json::Value>>,

    pub pipeline: Pipeline,
    pub bounds: Bounds,
    pub interrupts: InterruptState,
    pub audit: Audit,
}

impl Envelope {
    /// Create a new envelope for a submission, pre-loaded with the bounds
    /// declared by the pipeline it will run against.
    pub fn new(
        user_id: UserId,
        session_id: SessionId,
        raw_input: impl Into<String>,
        stage_order: Vec<String>,
        max_llm_calls: u32,
        max_agent_hops: u32,
        max_iterations: u32,
    ) -> Self {
        let now = Utc::now();
        let current_stage = stage_order.first().cloned().unwrap_or_else(|| STAGE_END.to_string());

        Self {
            identity: Identity {
                envelope_id: EnvelopeId::new(),
                request_id: RequestId::new(),
                user_id,
                session_id,
                thread_id: None,
            },
            raw_input: raw_input.into(),
            received_at: now,
            outputs: HashMap::new(),
            pipeline: Pipeline {
                current_stage,
                stage_order,
                iteration: 0,
                active_stages: HashSet::new(),
                completed_stage_set: HashSet::new(),
                failed_stages: HashMap::new(),
                edge_traversals: HashMap::new(),
                parallel_mode: false,
            },
            bounds: Bounds {
                llm_call_count: 0,
                max_llm_calls,
                tool_call_count: 0,
                agent_hop_count: 0,
                max_agent_hops,
                max_iterations,
                tokens_in: 0,
                tokens_out: 0,
                terminated: false,
                terminal_reason: None,
            },
            interrupts: InterruptState::default(),
            audit: Audit {
                processing_history: Vec::new(),
                created_at: now,
                completed_at: None,
                metadata: HashMap::new(),
            },
        }
    }

    /// Opt this envelope into `StateStore` persistence under `thread_id`
    /// (spec §4.1.1 step 10, §4.1.4).
    pub fn set_thread_id(&mut self, thread_id: impl Into<String>) {
        self.identity.thread_id = Some(thread_id.into());
    }

    /// Start a stage (mark as actively executing; parallel mode bookkeeping).
    pub fn start_stage(&mut self, stage_name: impl Into<String>) {
        self.pipeline.active_stages.insert(stage_name.into());
    }

    /// Complete a stage successfully.
    pub fn complete_stage(&mut self, stage_name: &str) {
        self.pipeline.completed_stage_set.insert(stage_name.to_string());
        self.pipeline.active_stages.remove(stage_name);
    }

    /// Mark a stage as failed.
    pub fn fail_stage(&mut self, stage_name: impl Into<String>, error_msg: impl Into<String>) {
        let stage_name = stage_name.into();
        self.pipeline.failed_stages.insert(stage_name.clone(), error_msg.into());
        self.pipeline.active_stages.remove(&stage_name);
    }

    pub fn is_stage_completed(&self, stage_name: &str) -> bool {
        self.pipeline.completed_stage_set.contains(stage_name)
    }

    pub fn is_stage_failed(&self, stage_name: &str) -> bool {
        self.pipeline.failed_stages.contains_key(stage_name)
    }

    /// True once any of the envelope-level bounds has been reached.
    pub fn at_limit(&self) -> bool {
        self.bounds.agent_hop_count >= self.bounds.max_agent_hops
            || self.bounds.llm_call_count >= self.bounds.max_llm_calls
            || self.pipeline.iteration >= self.bounds.max_iterations
    }

    pub fn increment_llm_calls(&mut self, count: u32) {
        self.bounds.llm_call_count += count;
    }

    pub fn increment_tool_calls(&mut self, count: u32) {
        self.bounds.tool_call_count += count;
    }

    pub fn increment_agent_hops(&mut self) {
        self.bounds.agent_hop_count += 1;
    }

    pub fn record_tokens(&mut self, tokens_in: u64, tokens_out: u64) {
        self.bounds.tokens_in += tokens_in;
        self.bounds.tokens_out += tokens_out;
    }

    /// Record an edge traversal and return the new count for that edge.
    pub fn record_edge_traversal(&mut self, from: &str, to: &str) -> u32 {
        let key = Pipeline::edge_key(from, to);
        let count = self.pipeline.edge_traversals.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    /// A transition is a loop-back when the target's position in the static
    /// plan is strictly before the source's (spec §3.1, §4.1.1 step 8).
    pub fn is_loop_back(&self, from: &str, to: &str) -> bool {
        let idx = |name: &str| self.pipeline.stage_order.iter().position(|s| s == name);
        match (idx(from), idx(to)) {
            (Some(from_idx), Some(to_idx)) => to_idx < from_idx,
            _ => false,
        }
    }

    pub fn add_processing_record(&mut self, record: ProcessingRecord) {
        self.audit.processing_history.push(record);
    }

    /// Terminate the envelope. Enforces the invariant `terminated ⇒
    /// current_stage == "end"` (spec §3.1) at the single place envelopes are
    /// ever terminated.
    pub fn terminate(&mut self, reason: TerminalReason) {
        self.bounds.terminated = true;
        self.bounds.terminal_reason = Some(reason);
        self.pipeline.current_stage = STAGE_END.to_string();
        self.audit.completed_at = Some(Utc::now());
    }

    pub fn set_interrupt(&mut self, interrupt: FlowInterrupt, raising_stage: impl Into<String>) {
        self.interrupts.interrupt_pending = true;
        self.interrupts.raising_stage = Some(raising_stage.into());
        self.interrupts.interrupt = Some(interrupt);
    }

    pub fn clear_interrupt(&mut self) {
        self.interrupts.interrupt_pending = false;
        self.interrupts.interrupt = None;
        self.interrupts.raising_stage = None;
    }
}
