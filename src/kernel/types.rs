//! Kernel types: ProcessState, ProcessControlBlock, resource quota/usage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::envelope::InterruptKind;
use crate::types::{ProcessId, RequestId, SessionId, UserId};

/// Process lifecycle state (Unix-like).
///
/// State transitions:
/// ```text
/// NEW → READY → RUNNING → {WAITING | BLOCKED | TERMINATED}
///                    ↓         ↓
///                  READY     ZOMBIE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    New,
    Ready,
    Running,
    Waiting,
    Blocked,
    Terminated,
    Zombie,
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Terminated | ProcessState::Zombie)
    }

    pub fn can_schedule(self) -> bool {
        matches!(self, ProcessState::New | ProcessState::Ready)
    }

    pub fn is_runnable(self) -> bool {
        self == ProcessState::Ready
    }

    /// Check if transition is valid (spec §3.5).
    pub fn can_transition_to(self, to: ProcessState) -> bool {
        match (self, to) {
            (ProcessState::New, ProcessState::Ready) => true,
            (ProcessState::New, ProcessState::Terminated) => true,
            (ProcessState::Ready, ProcessState::Running) => true,
            (ProcessState::Ready, ProcessState::Terminated) => true,
            (ProcessState::Running, ProcessState::Ready) => true,
            (ProcessState::Running, ProcessState::Waiting) => true,
            (ProcessState::Running, ProcessState::Blocked) => true,
            (ProcessState::Running, ProcessState::Terminated) => true,
            (ProcessState::Waiting, ProcessState::Ready) => true,
            (ProcessState::Waiting, ProcessState::Terminated) => true,
            (ProcessState::Blocked, ProcessState::Ready) => true,
            (ProcessState::Blocked, ProcessState::Terminated) => true,
            (ProcessState::Terminated, ProcessState::Zombie) => true,
            (ProcessState::Zombie, _) => false,
            _ => false,
        }
    }
}

/// Scheduling priority. Lower heap value runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingPriority {
    Realtime,
    High,
    Normal,
    Low,
    Idle,
}

impl SchedulingPriority {
    pub fn to_heap_value(self) -> i32 {
        match self {
            SchedulingPriority::Realtime => 0,
            SchedulingPriority::High => 1,
            SchedulingPriority::Normal => 2,
            SchedulingPriority::Low => 3,
            SchedulingPriority::Idle => 4,
        }
    }
}

impl Default for SchedulingPriority {
    fn default() -> Self {
        SchedulingPriority::Normal
    }
}

/// Resource quota (spec §4.6). A single struct covering both the token/call
/// bounds and the whole-request timeout — see `DESIGN.md`'s open-question
/// decision on folding what some sources keep as a separate `ContextBounds`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceQuota {
    pub max_llm_calls: i32,
    pub max_tool_calls: i32,
    pub max_agent_hops: i32,
    pub max_iterations: i32,
    pub max_input_tokens: i64,
    pub max_output_tokens: i64,
    pub max_context_tokens: i64,
    pub timeout_seconds: i32,
    pub soft_timeout_seconds: i32,
    pub rate_limit_rpm: i32,
    pub rate_limit_rph: i32,
    pub rate_limit_burst: i32,
    pub max_inference_requests: i32,
    pub max_inference_input_chars: i64,
}

impl ResourceQuota {
    pub fn default_quota() -> Self {
        Self {
            max_llm_calls: 100,
            max_tool_calls: 50,
            max_agent_hops: 10,
            max_iterations: 20,
            max_input_tokens: 100_000,
            max_output_tokens: 50_000,
            max_context_tokens: 150_000,
            timeout_seconds: 300,
            soft_timeout_seconds: 240,
            rate_limit_rpm: 60,
            rate_limit_rph: 1000,
            rate_limit_burst: 10,
            max_inference_requests: 50,
            max_inference_input_chars: 500_000,
        }
    }
}

impl Default for ResourceQuota {
    fn default() -> Self {
        Self::default_quota()
    }
}

/// Resource usage tracking; same shape as `ResourceQuota` plus elapsed time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResourceUsage {
    pub llm_calls: i32,
    pub tool_calls: i32,
    pub agent_hops: i32,
    pub iterations: i32,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub elapsed_seconds: f64,
    pub inference_requests: i32,
    pub inference_input_chars: i64,
}

impl ResourceUsage {
    /// First quota violated, in declaration order (spec §4.6).
    pub fn exceeds_quota(&self, quota: &ResourceQuota) -> Option<String> {
        if self.llm_calls > quota.max_llm_calls {
            return Some(format!("llm_calls {} > {}", self.llm_calls, quota.max_llm_calls));
        }
        if self.tool_calls > quota.max_tool_calls {
            return Some(format!("tool_calls {} > {}", self.tool_calls, quota.max_tool_calls));
        }
        if self.agent_hops > quota.max_agent_hops {
            return Some(format!("agent_hops {} > {}", self.agent_hops, quota.max_agent_hops));
        }
        if self.iterations > quota.max_iterations {
            return Some(format!("iterations {} > {}", self.iterations, quota.max_iterations));
        }
        if self.tokens_in > quota.max_input_tokens {
            return Some(format!("tokens_in {} > {}", self.tokens_in, quota.max_input_tokens));
        }
        if self.tokens_out > quota.max_output_tokens {
            return Some(format!("tokens_out {} > {}", self.tokens_out, quota.max_output_tokens));
        }
        if self.tokens_in + self.tokens_out > quota.max_context_tokens {
            return Some(format!(
                "context_tokens {} > {}",
                self.tokens_in + self.tokens_out,
                quota.max_context_tokens
            ));
        }
        if quota.timeout_seconds > 0 && self.elapsed_seconds > quota.timeout_seconds as f64 {
            return Some(format!(
                "elapsed_seconds {} > {}",
                self.elapsed_seconds, quota.timeout_seconds
            ));
        }
        if self.inference_requests > quota.max_inference_requests {
            return Some(format!(
                "inference_requests {} > {}",
                self.inference_requests, quota.max_inference_requests
            ));
        }
        if self.inference_input_chars > quota.max_inference_input_chars {
            return Some(format!(
                "inference_input_chars {} > {}",
                self.inference_input_chars, quota.max_inference_input_chars
            ));
        }
        None
    }

    /// True once usage has crossed 80% of any threshold (spec §4.6 warning log).
    pub fn crosses_warning_threshold(&self, quota: &ResourceQuota) -> bool {
        let ratio = |used: i64, max: i64| max > 0 && (used as f64) >= 0.8 * (max as f64);
        ratio(self.llm_calls as i64, quota.max_llm_calls as i64)
            || ratio(self.tool_calls as i64, quota.max_tool_calls as i64)
            || ratio(self.agent_hops as i64, quota.max_agent_hops as i64)
            || ratio(self.iterations as i64, quota.max_iterations as i64)
            || ratio(self.tokens_in, quota.max_input_tokens)
            || ratio(self.tokens_out, quota.max_output_tokens)
    }
}

/// Process Control Block — the scheduler's metadata about a submitted
/// request. The request's actual state lives in the `Envelope`; the PCB
/// tracks scheduling state, resource accounting, and interrupt status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessControlBlock {
    pub pid: ProcessId,
    pub request_id: RequestId,
    pub user_id: UserId,
    pub session_id: SessionId,

    pub state: ProcessState,
    pub priority: SchedulingPriority,

    pub quota: ResourceQuota,
    pub usage: ResourceUsage,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scheduled_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_interrupt: Option<InterruptKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupt_data: Option<HashMap<String, serde_json::Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_pid: Option<ProcessId>,

    pub child_pids: Vec<ProcessId>,
}

impl ProcessControlBlock {
    pub fn new(pid: ProcessId, request_id: RequestId, user_id: UserId, session_id: SessionId) -> Self {
        Self {
            pid,
            request_id,
            user_id,
            session_id,
            state: ProcessState::New,
            priority: SchedulingPriority::default(),
            quota: ResourceQuota::default(),
            usage: ResourceUsage::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_scheduled_at: None,
            current_stage: None,
            pending_interrupt: None,
            interrupt_data: None,
            parent_pid: None,
            child_pids: Vec::new(),
        }
    }

    pub fn start(&mut self) {
        let now = Utc::now();
        self.state = ProcessState::Running;
        self.started_at = Some(now);
        self.last_scheduled_at = Some(now);
    }

    pub fn complete(&mut self) {
        let now = Utc::now();
        self.state = ProcessState::Terminated;
        self.completed_at = Some(now);
        if let Some(started) = self.started_at {
            self.usage.elapsed_seconds = (now - started).num_milliseconds() as f64 / 1000.0;
        }
    }

    pub fn block(&mut self, reason: String) {
        self.state = ProcessState::Blocked;
        let data = self.interrupt_data.get_or_insert_with(HashMap::new);
        data.insert("block_reason".to_string(), serde_json::Value::String(reason));
    }

    pub fn wait(&mut self, interrupt_kind: InterruptKind) {
        self.state = ProcessState::Waiting;
        self.pending_interrupt = Some(interrupt_kind);
    }

    pub fn resume(&mut self) {
        if matches!(self.state, ProcessState::Waiting | ProcessState::Blocked) {
            self.state = ProcessState::Ready;
            self.pending_interrupt = None;
        }
    }

    pub fn check_quota(&self) -> Option<String> {
        self.usage.exceeds_quota(&self.quota)
    }

    pub fn can_schedule(&self) -> bool {
        self.state.can_schedule()
    }

    pub fn is_runnable(&self) -> bool {
        self.state.is_runnable()
    }

    pub fn is_terminated(&self) -> bool {
        self.state.is_terminal()
    }
}
