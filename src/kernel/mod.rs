//! Kernel - the aggregate root over all subsystems.
//!
//! The Kernel owns every subsystem (lifecycle, resources, rate limiting,
//! interrupts, services, the comm bus, checkpoints, registered pipelines and
//! agents) and exposes a mostly-synchronous API over them. Callers hold a
//! `&mut Kernel` and call directly; it is not an actor in the message-passing
//! sense. The few methods that genuinely need to await (running a pipeline,
//! checkpoint persistence, publishing to the comm bus) are `async fn`.

use std::collections::HashMap;
use std::sync::Arc;

pub mod agent;
pub mod checkpoint;
pub mod cleanup;
pub mod interrupts;
pub mod lifecycle;
pub mod pipeline;
pub mod rate_limiter;
pub mod recovery;
pub mod resources;
pub mod runtime;
pub mod services;
pub mod state_store;
pub mod types;

pub use agent::{Agent, AgentContext, AgentRegistry, CancellationToken, InMemoryAgentRegistry, LlmClient, ToolExecutor};
pub use checkpoint::{CheckpointRecord, CheckpointStore, InMemoryCheckpointStore};
pub use cleanup::{CleanupConfig, CleanupService, CleanupStats};
pub use interrupts::{CreateInterruptParams, InterruptEvent, InterruptProvenance, InterruptService};
pub use lifecycle::LifecycleManager;
pub use pipeline::{AgentConfig, PipelineConfig, RunMode, ValidatedPipeline};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use recovery::with_recovery;
pub use resources::ResourceTracker;
pub use runtime::{RunOutcome, Runtime};
pub use services::{RegistryStats, ServiceInfo, ServiceRegistry, ServiceStats, ServiceStatus};
pub use state_store::{InMemoryStateStore, StateStore};
pub use types::{ProcessControlBlock, ProcessState, ResourceQuota, ResourceUsage, SchedulingPriority};

use crate::envelope::{Envelope, FlowInterrupt, InterruptResponse};
use crate::types::{Config, EnvelopeId, Error, ProcessId, RequestId, Result, SessionId, UserId};

/// Kernel - the aggregate root.
///
/// Owns all subsystems and provides a unified interface for process
/// management, pipeline execution, and interrupt/checkpoint handling.
#[derive(Debug)]
pub struct Kernel {
    /// Process lifecycle management (C5).
    pub lifecycle: LifecycleManager,

    /// Resource tracking and quota enforcement (C6).
    pub resources: ResourceTracker,

    /// Rate limiting per user.
    pub rate_limiter: RateLimiter,

    /// Interrupt handling (human-in-the-loop, C7).
    pub interrupts: InterruptService,

    /// Service registry (IPC and dispatch).
    pub services: ServiceRegistry,

    /// Communication bus (C9).
    pub commbus: crate::commbus::CommBus,

    /// Checkpoint persistence (C8).
    pub checkpoints: Arc<dyn CheckpointStore>,

    /// Thread-keyed envelope snapshotting (spec §6.2), consulted by
    /// `Runtime::resume`/the sequential loop's per-hop persist step.
    pub state_store: Arc<dyn StateStore>,

    /// Validated pipeline definitions, keyed by `PipelineConfig::name`.
    pipelines: HashMap<String, Arc<ValidatedPipeline>>,

    /// Agent implementations shared across all registered pipelines.
    agents: Arc<dyn AgentRegistry>,

    /// Envelope storage. Keyed by envelope id, which doubles as the PCB's
    /// `pid` (spec §3.5 "`pid` = `envelope_id`").
    envelopes: HashMap<String, Envelope>,
}

impl Kernel {
    pub fn new(config: &Config) -> Self {
        Self {
            lifecycle: LifecycleManager::default(),
            resources: ResourceTracker::default(),
            rate_limiter: RateLimiter::default(),
            interrupts: InterruptService::new(config),
            services: ServiceRegistry::new(),
            commbus: crate::commbus::CommBus::new(),
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            state_store: Arc::new(InMemoryStateStore::new()),
            pipelines: HashMap::new(),
            agents: Arc::new(InMemoryAgentRegistry::new()),
            envelopes: HashMap::new(),
        }
    }

    pub fn with_config(
        config: &Config,
        default_quota: Option<ResourceQuota>,
        rate_limit_config: Option<RateLimitConfig>,
        agents: Arc<dyn AgentRegistry>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            lifecycle: LifecycleManager::new(default_quota),
            resources: ResourceTracker::new(),
            rate_limiter: RateLimiter::new(rate_limit_config),
            interrupts: InterruptService::new(config),
            services: ServiceRegistry::new(),
            commbus: crate::commbus::CommBus::new(),
            checkpoints,
            state_store: Arc::new(InMemoryStateStore::new()),
            pipelines: HashMap::new(),
            agents,
            envelopes: HashMap::new(),
        }
    }

    // =========================================================================
    // Pipeline registration
    // =========================================================================

    /// Validate and register a pipeline definition under its own `name`.
    pub fn register_pipeline(&mut self, config: PipelineConfig) -> Result<()> {
        let name = config.name.clone();
        let validated = ValidatedPipeline::build(config)?;
        self.pipelines.insert(name, Arc::new(validated));
        Ok(())
    }

    pub fn get_pipeline(&self, name: &str) -> Option<Arc<ValidatedPipeline>> {
        self.pipelines.get(name).cloned()
    }

    /// Build a `Runtime` bound to a registered pipeline and the kernel's
    /// shared agent registry, checkpoint store, and state store.
    pub fn runtime_for(&self, pipeline_name: &str) -> Result<Runtime> {
        let pipeline = self
            .get_pipeline(pipeline_name)
            .ok_or_else(|| Error::not_found(format!("unknown pipeline: {pipeline_name}")))?;
        Ok(Runtime::new(pipeline, self.agents.clone())
            .with_checkpoints(self.checkpoints.clone())
            .with_state_store(self.state_store.clone()))
    }

    // =========================================================================
    // Process + envelope lifecycle
    // =========================================================================

    /// Admit a new request: check the rate limit, submit a PCB, schedule it,
    /// and create the matching envelope (`pid == envelope_id`).
    pub fn create_process(
        &mut self,
        request_id: RequestId,
        user_id: UserId,
        session_id: SessionId,
        priority: SchedulingPriority,
        quota: Option<ResourceQuota>,
        raw_input: impl Into<String>,
        pipeline_name: &str,
    ) -> Result<ProcessControlBlock> {
        self.rate_limiter.check_rate_limit(user_id.as_str())?;

        let pipeline = self
            .get_pipeline(pipeline_name)
            .ok_or_else(|| Error::not_found(format!("unknown pipeline: {pipeline_name}")))?;

        let envelope = Envelope::new(
            user_id.clone(),
            session_id.clone(),
            raw_input,
            pipeline.stage_order.clone(),
            pipeline.config.max_llm_calls,
            pipeline.config.max_agent_hops,
            pipeline.config.max_iterations,
        );
        let pid = ProcessId::must(envelope.identity.envelope_id.to_string());

        let pcb = self
            .lifecycle
            .submit(pid.clone(), request_id, user_id, session_id, priority, quota)?;
        self.lifecycle.schedule(&pid)?;
        self.envelopes.insert(envelope.identity.envelope_id.to_string(), envelope);

        Ok(pcb)
    }

    pub fn get_process(&self, pid: &ProcessId) -> Option<&ProcessControlBlock> {
        self.lifecycle.get(pid)
    }

    pub fn get_envelope(&self, envelope_id: &str) -> Option<&Envelope> {
        self.envelopes.get(envelope_id)
    }

    pub fn get_envelope_mut(&mut self, envelope_id: &str) -> Option<&mut Envelope> {
        self.envelopes.get_mut(envelope_id)
    }

    /// Drive a process's envelope to completion or suspension using the
    /// named pipeline's runtime, transitioning the PCB to match (spec
    /// §4.1, §4.5).
    pub async fn run_process(
        &mut self,
        pid: &ProcessId,
        pipeline_name: &str,
        ctx: &AgentContext,
    ) -> Result<RunOutcome> {
        let runtime = self.runtime_for(pipeline_name)?;
        self.lifecycle.start(pid)?;

        let envelope = self
            .envelopes
            .get_mut(pid.as_str())
            .ok_or_else(|| Error::not_found(format!("no envelope for process {pid}")))?;

        let outcome = runtime.run(envelope, ctx).await?;

        match outcome {
            RunOutcome::Terminated => {
                self.lifecycle.terminate(pid)?;
            }
            RunOutcome::InterruptRaised => {
                let interrupt = envelope
                    .interrupts
                    .interrupt
                    .clone()
                    .expect("InterruptRaised implies an interrupt is set");
                self.lifecycle.wait(pid, interrupt.kind)?;
            }
        }

        Ok(outcome)
    }

    /// Resume a process whose interrupt has been externally resolved. If
    /// the envelope is not resident (e.g. this kernel instance restarted),
    /// it is rebuilt from the most recent checkpoint before resuming.
    pub async fn resume_process(
        &mut self,
        pid: &ProcessId,
        pipeline_name: &str,
        response: InterruptResponse,
        ctx: &AgentContext,
    ) -> Result<RunOutcome> {
        let runtime = self.runtime_for(pipeline_name)?;
        self.lifecycle.resume(pid)?;

        if !self.envelopes.contains_key(pid.as_str()) {
            self.restore_envelope_from_checkpoint(pid).await?;
        }

        let envelope = self
            .envelopes
            .get_mut(pid.as_str())
            .ok_or_else(|| Error::not_found(format!("no envelope for process {pid}")))?;

        let outcome = runtime.resume(envelope, response, ctx).await?;
        if outcome == RunOutcome::Terminated {
            self.lifecycle.terminate(pid)?;
        }
        Ok(outcome)
    }

    /// Rebuild a resident envelope from its most recent checkpoint (spec
    /// §3.5 "`pid` = `envelope_id`"; C8). Used by `resume_process` when the
    /// envelope is not held in memory.
    async fn restore_envelope_from_checkpoint(&mut self, pid: &ProcessId) -> Result<()> {
        let envelope_id = EnvelopeId::must(pid.as_str());
        let records = self.checkpoints.list(&envelope_id, None).await?;
        let latest = records
            .last()
            .ok_or_else(|| Error::not_found(format!("no checkpoint for process {pid}")))?;
        let state = self.checkpoints.load(&latest.checkpoint_id).await?;
        let envelope = crate::envelope::import::from_value(state)?;
        self.envelopes.insert(pid.as_str().to_string(), envelope);
        Ok(())
    }

    pub fn terminate_process(&mut self, pid: &ProcessId) -> Result<()> {
        self.lifecycle.terminate(pid)?;
        if let Some(env) = self.envelopes.get_mut(pid.as_str()) {
            env.terminate(crate::envelope::TerminalReason::Cancelled);
        }
        Ok(())
    }

    pub fn cleanup_process(&mut self, pid: &ProcessId) -> Result<()> {
        self.lifecycle.cleanup(pid)?;
        self.lifecycle.remove(pid)?;
        self.envelopes.remove(pid.as_str());
        Ok(())
    }

    pub fn list_processes(&self) -> Vec<ProcessControlBlock> {
        self.lifecycle.list()
    }

    pub fn process_count(&self) -> usize {
        self.lifecycle.count()
    }

    pub fn process_count_by_state(&self, state: ProcessState) -> usize {
        self.lifecycle.count_by_state(state)
    }

    /// Drop envelopes that reached a terminal state more than `max_age_seconds`
    /// ago. Unlike PCB zombie cleanup (`lifecycle`'s own table), this only
    /// touches the envelope store.
    pub fn cleanup_stale_envelopes(&mut self, max_age_seconds: i64) -> usize {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(max_age_seconds);
        let before = self.envelopes.len();
        self.envelopes
            .retain(|_, env| !(env.bounds.terminated && env.audit.completed_at.map(|at| at < cutoff).unwrap_or(false)));
        before - self.envelopes.len()
    }

    // =========================================================================
    // Quota / resource accounting
    // =========================================================================

    pub fn check_quota(&self, pid: &ProcessId) -> Result<()> {
        let pcb = self
            .lifecycle
            .get(pid)
            .ok_or_else(|| Error::not_found(format!("Process {} not found", pid)))?;
        self.resources.check_quota(pcb)
    }

    pub fn record_usage(&mut self, user_id: &str, llm_calls: i32, tool_calls: i32, tokens_in: i64, tokens_out: i64) {
        self.resources.record_usage(user_id, llm_calls, tool_calls, tokens_in, tokens_out);
    }

    pub fn get_default_quota(&self) -> &ResourceQuota {
        self.lifecycle.get_default_quota()
    }

    pub fn set_default_quota(&mut self, overrides: &ResourceQuota) {
        self.lifecycle.set_default_quota(overrides);
    }

    /// Remaining resource budget for a process (spec §4.6).
    pub fn get_remaining_budget(&self, pid: &ProcessId) -> Option<RemainingBudget> {
        let pcb = self.lifecycle.get(pid)?;
        Some(RemainingBudget {
            llm_calls_remaining: (pcb.quota.max_llm_calls - pcb.usage.llm_calls).max(0),
            tool_calls_remaining: (pcb.quota.max_tool_calls - pcb.usage.tool_calls).max(0),
            iterations_remaining: (pcb.quota.max_iterations - pcb.usage.iterations).max(0),
            agent_hops_remaining: (pcb.quota.max_agent_hops - pcb.usage.agent_hops).max(0),
            tokens_in_remaining: (pcb.quota.max_input_tokens - pcb.usage.tokens_in).max(0),
            tokens_out_remaining: (pcb.quota.max_output_tokens - pcb.usage.tokens_out).max(0),
            time_remaining_seconds: if pcb.quota.timeout_seconds > 0 {
                (pcb.quota.timeout_seconds as f64 - pcb.usage.elapsed_seconds).max(0.0)
            } else {
                f64::MAX
            },
        })
    }

    // =========================================================================
    // Interrupt methods (delegation to InterruptService), publishing each
    // resulting event on the comm bus (spec §6.3).
    // =========================================================================

    pub async fn create_interrupt(&mut self, params: CreateInterruptParams) -> FlowInterrupt {
        let (interrupt, event) = self.interrupts.create(params);
        self.publish_interrupt_event(event).await;
        interrupt
    }

    pub async fn resolve_interrupt(&mut self, interrupt_id: &crate::types::InterruptId, response: InterruptResponse) -> Result<FlowInterrupt> {
        let (interrupt, event) = self.interrupts.respond(interrupt_id, response)?;
        self.publish_interrupt_event(event).await;
        Ok(interrupt)
    }

    async fn publish_interrupt_event(&self, event: InterruptEvent) {
        let payload = serde_json::to_value(&event.interrupt).unwrap_or(serde_json::Value::Null);
        self.commbus.publish(crate::commbus::Event::new(event.name, payload)).await;
    }

    // =========================================================================
    // Services
    // =========================================================================

    pub fn register_service(&mut self, info: ServiceInfo) -> bool {
        self.services.register_service(info)
    }

    pub fn unregister_service(&mut self, service_name: &str) -> bool {
        self.services.unregister_service(service_name)
    }

    // =========================================================================
    // System status
    // =========================================================================

    pub fn get_system_status(&self) -> SystemStatus {
        let total = self.lifecycle.count();
        let mut by_state = HashMap::new();
        for state in &[
            ProcessState::New,
            ProcessState::Ready,
            ProcessState::Running,
            ProcessState::Waiting,
            ProcessState::Blocked,
            ProcessState::Terminated,
            ProcessState::Zombie,
        ] {
            by_state.insert(*state, self.lifecycle.count_by_state(*state));
        }

        let service_stats = self.services.get_stats();

        SystemStatus {
            processes_total: total,
            processes_by_state: by_state,
            envelopes_total: self.envelopes.len(),
            services_healthy: service_stats.healthy_services,
            services_degraded: service_stats.degraded_services,
            services_unhealthy: service_stats.unhealthy_services,
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

/// Remaining resource budget for a process (spec §4.6).
#[derive(Debug, Clone)]
pub struct RemainingBudget {
    pub llm_calls_remaining: i32,
    pub tool_calls_remaining: i32,
    pub iterations_remaining: i32,
    pub agent_hops_remaining: i32,
    pub tokens_in_remaining: i64,
    pub tokens_out_remaining: i64,
    pub time_remaining_seconds: f64,
}

/// Full system status snapshot returned by `Kernel::get_system_status()`.
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub processes_total: usize,
    pub processes_by_state: HashMap<ProcessState, usize>,
    pub envelopes_total: usize,
    pub services_healthy: usize,
    pub services_degraded: usize,
    pub services_unhealthy: usize,
}
