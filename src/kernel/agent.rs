//! Agent: the uniform stage processor (spec §4.3, C3).
//!
//! A single `Agent` implementation is parameterized by its `AgentConfig`;
//! polymorphism over capabilities (`has_llm`, `has_tools`, `has_policies`) is
//! expressed as flags plus collaborator references rather than inheritance
//! (spec §9 "deep inheritance / mixins in agent types").

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::envelope::{Envelope, FlowInterrupt, ToolAccess};
use crate::kernel::pipeline::AgentConfig;
use crate::types::Result;

/// Cooperative cancellation signal, checked at every suspension point
/// (spec §5 "suspension points"). Cloning shares the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<std::sync::atomic::AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// A single LLM completion request, issued by an agent with `has_llm`.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model_role: String,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// The LLM collaborator's response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// LLM collaborator contract (spec §1 "explicitly out of scope: concrete LLM
/// provider implementations"). Embedders supply a concrete implementation;
/// the kernel only depends on this trait.
#[async_trait]
pub trait LlmClient: std::fmt::Debug + Send + Sync {
    async fn complete(&self, request: LlmRequest, cancel: &CancellationToken) -> Result<LlmResponse>;
}

/// A single tool invocation requested by an agent with `has_tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Tool executor collaborator contract (spec §1 "tool implementations and
/// registries; consumed via a `ToolExecutor` contract").
#[async_trait]
pub trait ToolExecutor: std::fmt::Debug + Send + Sync {
    async fn execute(&self, call: ToolCall, cancel: &CancellationToken) -> Result<serde_json::Value>;
}

/// Collaborators and correlation ids an agent needs for a single invocation.
#[derive(Clone)]
pub struct AgentContext {
    pub cancel: CancellationToken,
    pub llm: Option<Arc<dyn LlmClient>>,
    pub tools: Option<Arc<dyn ToolExecutor>>,
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("has_llm", &self.llm.is_some())
            .field("has_tools", &self.tools.is_some())
            .finish()
    }
}

/// What a single agent invocation produced (spec §4.3).
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    pub outputs: HashMap<String, serde_json::Value>,
    pub next_hint: Option<String>,
    pub interrupt: Option<FlowInterrupt>,
    pub error: Option<String>,
    pub llm_calls: u32,
    pub tool_calls: u32,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

impl AgentOutcome {
    pub fn ok(outputs: HashMap<String, serde_json::Value>) -> Self {
        Self {
            outputs,
            ..Default::default()
        }
    }
}

/// A single stage processor, driven uniformly by its `AgentConfig`
/// (spec §4.3). Concrete embedders provide their own implementation per
/// stage; the kernel only depends on this trait and the `AgentRegistry`
/// that resolves it.
#[async_trait]
pub trait Agent: std::fmt::Debug + Send + Sync {
    /// Invoke this agent for one hop. Must never panic; any failure is
    /// surfaced in `AgentOutcome::error`, never as a propagated panic
    /// (the runtime wraps every call in `kernel::with_recovery` regardless).
    async fn invoke(
        &self,
        config: &AgentConfig,
        envelope: &Envelope,
        ctx: &AgentContext,
    ) -> Result<AgentOutcome>;
}

/// Registry of `Agent` implementations keyed by stage name, resolved by the
/// runtime via `AgentConfig::name` (spec §4.1.1 step 3 "agent lookup").
pub trait AgentRegistry: std::fmt::Debug + Send + Sync {
    fn get(&self, stage_name: &str) -> Option<Arc<dyn Agent>>;
}

#[derive(Debug, Default)]
pub struct InMemoryAgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl InMemoryAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage_name: impl Into<String>, agent: Arc<dyn Agent>) {
        self.agents.insert(stage_name.into(), agent);
    }
}

impl AgentRegistry for InMemoryAgentRegistry {
    fn get(&self, stage_name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(stage_name).cloned()
    }
}

/// Validate an outcome's outputs against `required_output_fields`
/// (spec §4.3). Missing fields should trigger a retry up to `max_retries`;
/// this function only reports which fields (if any) are absent.
pub fn missing_required_fields(config: &AgentConfig, outputs: &HashMap<String, serde_json::Value>) -> Vec<String> {
    config
        .required_output_fields
        .iter()
        .filter(|field| !outputs.contains_key(field.as_str()))
        .cloned()
        .collect()
}

/// Check whether a tool call is permitted under an agent's `tool_access`
/// and `allowed_tools` (spec §4.3 "refuse tools outside tool_access /
/// allowed_tools").
pub fn tool_call_allowed(config: &AgentConfig, tool_name: &str) -> bool {
    if config.tool_access == ToolAccess::None {
        return false;
    }
    match &config.allowed_tools {
        Some(allowed) => allowed.contains(tool_name),
        None => true,
    }
}

/// Wraps a `ToolExecutor` so every call is checked against the stage's
/// `tool_access`/`allowed_tools` before reaching the real collaborator
/// (spec §4.3 "refuse tools outside tool_access / allowed_tools").
#[derive(Debug)]
struct ScopedToolExecutor {
    inner: Arc<dyn ToolExecutor>,
    config: AgentConfig,
}

#[async_trait]
impl ToolExecutor for ScopedToolExecutor {
    async fn execute(&self, call: ToolCall, cancel: &CancellationToken) -> Result<serde_json::Value> {
        if !tool_call_allowed(&self.config, &call.name) {
            return Err(crate::types::Error::tool_error(format!(
                "agent {} is not permitted to call tool {}",
                self.config.name, call.name
            )));
        }
        self.inner.execute(call, cancel).await
    }
}

/// Build the context an invocation of this stage should see: same
/// collaborators as `ctx`, but with tool calls scoped to `config`'s access
/// policy. Cheap to call per-hop — it only wraps an `Arc` clone.
pub fn scoped_context(config: &AgentConfig, ctx: &AgentContext) -> AgentContext {
    AgentContext {
        cancel: ctx.cancel.clone(),
        llm: ctx.llm.clone(),
        tools: ctx.tools.clone().map(|inner| {
            Arc::new(ScopedToolExecutor {
                inner,
                config: config.clone(),
            }) as Arc<dyn ToolExecutor>
        }),
    }
}
