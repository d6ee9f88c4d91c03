//! Runtime: executes a pipeline against an envelope (spec §4.1, C4 — "the heart").
//!
//! Two execution modes, chosen per-call or taken from the pipeline default:
//! sequential (§4.1.1) and parallel (§4.1.2). The runtime is authoritative
//! for bounds decisions (§4.1.3): once it has terminated an envelope, it
//! will not re-admit it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::envelope::{Envelope, InterruptResponse, STAGE_END};
use crate::kernel::agent::{missing_required_fields, scoped_context, Agent, AgentContext, AgentRegistry};
use crate::kernel::checkpoint::CheckpointStore;
use crate::kernel::pipeline::{AgentConfig, RunMode, ValidatedPipeline};
use crate::kernel::state_store::StateStore;
use crate::types::{CheckpointId, Result};

/// What the caller of `Runtime::run`/`resume` gets back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The envelope reached `"end"` (terminated, for any reason).
    Terminated,
    /// An agent raised an interrupt; the envelope is suspended.
    InterruptRaised,
}

/// Executes `PipelineConfig` stages against a single `Envelope` (spec §4.1).
#[derive(Debug)]
pub struct Runtime {
    pipeline: Arc<ValidatedPipeline>,
    agents: Arc<dyn AgentRegistry>,
    state_store: Option<Arc<dyn StateStore>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl Runtime {
    pub fn new(pipeline: Arc<ValidatedPipeline>, agents: Arc<dyn AgentRegistry>) -> Self {
        Self {
            pipeline,
            agents,
            state_store: None,
            checkpoints: None,
        }
    }

    /// Opt into best-effort envelope snapshotting keyed by thread id (spec
    /// §4.1.1 step 10, §4.1.4).
    pub fn with_state_store(mut self, state_store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(state_store);
        self
    }

    /// Opt into per-stage checkpointing (C8, spec §4.4).
    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Best-effort envelope snapshot after a hop, when both a thread id and a
    /// `StateStore` are present (spec §4.1.1 step 10, §4.1.4). Failure is
    /// logged, never propagated.
    async fn persist_state(&self, envelope: &Envelope) {
        let Some(store) = &self.state_store else { return };
        let Some(thread_id) = &envelope.identity.thread_id else { return };
        match crate::envelope::export::to_value(envelope) {
            Ok(snapshot) => {
                if let Err(e) = store.save(thread_id, snapshot).await {
                    tracing::warn!(%thread_id, error = %e, "failed to persist envelope state snapshot");
                }
            }
            Err(e) => tracing::warn!(%thread_id, error = %e, "failed to serialize envelope for state snapshot"),
        }
    }

    /// Best-effort checkpoint after a stage completes (C8, spec §4.4).
    /// Failure is logged, never propagated — a missed checkpoint does not
    /// halt the run.
    async fn checkpoint_stage(&self, envelope: &Envelope, stage_name: &str) {
        let Some(store) = &self.checkpoints else { return };
        let envelope_id = envelope.identity.envelope_id.clone();
        let checkpoint_id = CheckpointId::new();
        match crate::envelope::export::to_value(envelope) {
            Ok(state) => {
                if let Err(e) = store.save(&envelope_id, &checkpoint_id, stage_name, state, None).await {
                    tracing::warn!(%envelope_id, error = %e, "failed to checkpoint stage");
                }
            }
            Err(e) => tracing::warn!(%envelope_id, error = %e, "failed to serialize envelope for checkpoint"),
        }
    }

    /// Evaluate bounds in the mandated order (spec §4.1.3): cancellation,
    /// terminated flag, max_hops, max_llm, max_iterations. Returns the
    /// terminal reason that applies, if any. Edge-limit checking happens
    /// per-hop after routing (step 7), so it is not part of this check.
    pub fn check_bounds(
        &self,
        envelope: &Envelope,
        ctx: &AgentContext,
    ) -> Option<crate::envelope::TerminalReason> {
        use crate::envelope::TerminalReason::*;

        if ctx.cancel.is_cancelled() {
            return Some(Cancelled);
        }
        if envelope.bounds.terminated {
            return Some(envelope.bounds.terminal_reason.unwrap_or(Completed));
        }
        if envelope.bounds.agent_hop_count >= envelope.bounds.max_agent_hops {
            return Some(MaxHopsReached);
        }
        if envelope.bounds.llm_call_count >= envelope.bounds.max_llm_calls {
            return Some(MaxLlmReached);
        }
        if envelope.pipeline.iteration >= envelope.bounds.max_iterations {
            return Some(MaxIterationsReached);
        }
        None
    }

    /// Run `envelope` to completion or until it suspends on an interrupt,
    /// using the pipeline's default run mode.
    pub async fn run(&self, envelope: &mut Envelope, ctx: &AgentContext) -> Result<RunOutcome> {
        self.run_with_mode(envelope, ctx, self.pipeline.config.default_run_mode).await
    }

    pub async fn run_with_mode(
        &self,
        envelope: &mut Envelope,
        ctx: &AgentContext,
        mode: RunMode,
    ) -> Result<RunOutcome> {
        match mode {
            RunMode::Sequential => self.run_sequential(envelope, ctx).await,
            RunMode::Parallel => self.run_parallel(envelope, ctx).await,
        }
    }

    /// Sequential loop (spec §4.1.1).
    async fn run_sequential(&self, envelope: &mut Envelope, ctx: &AgentContext) -> Result<RunOutcome> {
        loop {
            if envelope.pipeline.current_stage == STAGE_END || envelope.bounds.terminated {
                return Ok(RunOutcome::Terminated);
            }

            if let Some(reason) = self.check_bounds(envelope, ctx) {
                envelope.terminate(reason);
                return Ok(RunOutcome::Terminated);
            }

            let stage_name = envelope.pipeline.current_stage.clone();
            let agent_config = match self.pipeline.agent(&stage_name) {
                Some(cfg) => cfg.clone(),
                None => {
                    envelope.terminate(crate::envelope::TerminalReason::ConfigError);
                    return Ok(RunOutcome::Terminated);
                }
            };

            let agent = self.agents.get(&stage_name);
            let started_at = Utc::now();

            let outcome = match agent {
                Some(agent) => {
                    crate::kernel::recovery::with_recovery_async(
                        || self.invoke_agent(agent, &agent_config, envelope, ctx),
                        &format!("agent:{stage_name}"),
                    )
                    .await
                }
                None => Err(crate::types::Error::config_error(format!(
                    "no agent registered for stage {stage_name}"
                ))),
            };

            let duration_ms = (Utc::now() - started_at).num_milliseconds();

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    envelope.add_processing_record(crate::envelope::ProcessingRecord {
                        stage: stage_name.clone(),
                        duration_ms,
                        status: "error".to_string(),
                        at: Utc::now(),
                        error: Some(e.to_string()),
                    });
                    if let Some(error_next) = &agent_config.error_next {
                        self.route_to(envelope, &stage_name, error_next);
                        continue;
                    }
                    envelope.terminate(crate::envelope::TerminalReason::AgentError);
                    return Ok(RunOutcome::Terminated);
                }
            };

            envelope.increment_llm_calls(outcome.llm_calls);
            envelope.increment_tool_calls(outcome.tool_calls);
            envelope.record_tokens(outcome.tokens_in, outcome.tokens_out);

            envelope
                .outputs
                .insert(stage_name.clone(), outcome.outputs.into_iter().collect());

            envelope.add_processing_record(crate::envelope::ProcessingRecord {
                stage: stage_name.clone(),
                duration_ms,
                status: if outcome.error.is_some() { "error" } else { "ok" }.to_string(),
                at: Utc::now(),
                error: outcome.error.clone(),
            });

            self.checkpoint_stage(envelope, &stage_name).await;

            if let Some(interrupt) = outcome.interrupt {
                envelope.set_interrupt(interrupt, stage_name.clone());
                return Ok(RunOutcome::InterruptRaised);
            }

            if let Some(error) = outcome.error {
                if let Some(error_next) = &agent_config.error_next {
                    self.route_to(envelope, &stage_name, error_next);
                    continue;
                }
                let _ = error;
                envelope.terminate(crate::envelope::TerminalReason::AgentError);
                return Ok(RunOutcome::Terminated);
            }

            let next = self.resolve_next(&agent_config, &envelope.outputs, &stage_name);

            if let Some(limit) = self.pipeline.edge_limit(&stage_name, &next) {
                let count = envelope.record_edge_traversal(&stage_name, &next);
                if count > limit {
                    envelope.terminate(crate::envelope::TerminalReason::EdgeLimitExceeded);
                    return Ok(RunOutcome::Terminated);
                }
            } else {
                envelope.record_edge_traversal(&stage_name, &next);
            }

            if envelope.is_loop_back(&stage_name, &next) {
                envelope.pipeline.iteration += 1;
            }

            envelope.increment_agent_hops();
            envelope.pipeline.current_stage = next;

            self.persist_state(envelope).await;

            if envelope.pipeline.current_stage == STAGE_END {
                envelope.terminate(crate::envelope::TerminalReason::Completed);
                return Ok(RunOutcome::Terminated);
            }
        }
    }

    /// First matching routing rule, else `default_next`, else next by
    /// `stage_order`, else `"end"` (spec §4.1.1 step 6b).
    fn resolve_next(
        &self,
        agent_config: &crate::kernel::pipeline::AgentConfig,
        outputs: &HashMap<String, HashMap<String, serde_json::Value>>,
        stage_name: &str,
    ) -> String {
        let stage_outputs = outputs.get(stage_name);

        for rule in &agent_config.routing_rules {
            if let Some(stage_outputs) = stage_outputs {
                if stage_outputs.get(&rule.condition_key) == Some(&rule.value) {
                    return rule.target.clone();
                }
            }
        }

        if let Some(default_next) = &agent_config.default_next {
            return default_next.clone();
        }

        let idx = self.pipeline.stage_order.iter().position(|s| s == stage_name);
        if let Some(idx) = idx {
            if let Some(next) = self.pipeline.stage_order.get(idx + 1) {
                return next.clone();
            }
        }

        STAGE_END.to_string()
    }

    fn route_to(&self, envelope: &mut Envelope, from: &str, to: &str) {
        envelope.record_edge_traversal(from, to);
        if envelope.is_loop_back(from, to) {
            envelope.pipeline.iteration += 1;
        }
        envelope.increment_agent_hops();
        envelope.pipeline.current_stage = to.to_string();
    }

    async fn invoke_agent(
        &self,
        agent: Arc<dyn Agent>,
        config: &AgentConfig,
        envelope: &Envelope,
        ctx: &AgentContext,
    ) -> Result<crate::kernel::agent::AgentOutcome> {
        invoke_with_retries(agent, config, envelope, ctx).await
    }

    /// Parallel loop (spec §4.1.2), owning the envelope for the duration of
    /// the run. Thin wrapper over `run_parallel_shared` for callers that
    /// don't need to observe the envelope mid-flight from another task.
    async fn run_parallel(&self, envelope: &mut Envelope, ctx: &AgentContext) -> Result<RunOutcome> {
        let placeholder = Envelope::new(
            envelope.identity.user_id.clone(),
            envelope.identity.session_id.clone(),
            "",
            vec![],
            0,
            0,
            0,
        );
        let owned = std::mem::replace(envelope, placeholder);
        let shared = Arc::new(Mutex::new(owned));
        let outcome = self.run_parallel_shared(shared.clone(), ctx).await;
        *envelope = Arc::try_unwrap(shared)
            .expect("no other task retains a reference after run_parallel_shared returns")
            .into_inner();
        outcome
    }

    /// Parallel loop (spec §4.1.2). The envelope is shared behind a mutex so
    /// that concurrently ready stages clone it under the same lock writers
    /// use to merge outputs back (spec §5 "race between Clone and writers").
    pub async fn run_parallel_shared(
        &self,
        envelope: Arc<Mutex<Envelope>>,
        ctx: &AgentContext,
    ) -> Result<RunOutcome> {
        loop {
            let (bounds_reason, completed, active) = {
                let guard = envelope.lock().await;
                let reason = self.check_bounds(&guard, ctx);
                (reason, guard.pipeline.completed_stage_set.clone(), guard.pipeline.active_stages.clone())
            };

            if let Some(reason) = bounds_reason {
                let mut guard = envelope.lock().await;
                guard.terminate(reason);
                return Ok(RunOutcome::Terminated);
            }

            let ready: Vec<String> = self
                .pipeline
                .ready_set(&completed, &active)
                .into_iter()
                .map(|a| a.name.clone())
                .collect();

            if ready.is_empty() {
                if active.is_empty() {
                    let mut guard = envelope.lock().await;
                    guard.pipeline.current_stage = STAGE_END.to_string();
                    guard.terminate(crate::envelope::TerminalReason::Completed);
                    return Ok(RunOutcome::Terminated);
                }
                tokio::task::yield_now().await;
                continue;
            }

            let mut handles = Vec::new();
            for stage_name in ready {
                let agent_config = match self.pipeline.agent(&stage_name) {
                    Some(cfg) => cfg.clone(),
                    None => continue,
                };
                let agent = match self.agents.get(&stage_name) {
                    Some(agent) => agent,
                    None => continue,
                };

                {
                    let mut guard = envelope.lock().await;
                    guard.start_stage(stage_name.clone());
                }

                let envelope_clone = {
                    let guard = envelope.lock().await;
                    guard.clone()
                };

                let ctx = ctx.clone();
                let envelope_handle = envelope.clone();
                let stage_name_owned = stage_name.clone();

                handles.push(tokio::spawn(async move {
                    let started_at = Utc::now();
                    let outcome = crate::kernel::recovery::with_recovery_async(
                        || invoke_with_retries(agent, &agent_config, &envelope_clone, &ctx),
                        &format!("agent:{stage_name_owned}"),
                    )
                    .await;
                    let duration_ms = (Utc::now() - started_at).num_milliseconds();

                    let mut guard = envelope_handle.lock().await;
                    match outcome {
                        Ok(outcome) => {
                            guard.increment_llm_calls(outcome.llm_calls);
                            guard.increment_tool_calls(outcome.tool_calls);
                            guard.record_tokens(outcome.tokens_in, outcome.tokens_out);
                            guard
                                .outputs
                                .insert(stage_name_owned.clone(), outcome.outputs.into_iter().collect());
                            guard.complete_stage(&stage_name_owned);
                            guard.add_processing_record(crate::envelope::ProcessingRecord {
                                stage: stage_name_owned.clone(),
                                duration_ms,
                                status: "ok".to_string(),
                                at: Utc::now(),
                                error: None,
                            });
                        }
                        Err(e) => {
                            guard.fail_stage(stage_name_owned.clone(), e.to_string());
                            guard.add_processing_record(crate::envelope::ProcessingRecord {
                                stage: stage_name_owned.clone(),
                                duration_ms,
                                status: "error".to_string(),
                                at: Utc::now(),
                                error: Some(e.to_string()),
                            });
                        }
                    }
                }));
            }

            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    /// Resume a suspended envelope after its interrupt was resolved
    /// (spec §4.1.4). `response` is merged into the outputs of the stage
    /// that raised the interrupt under the reserved key, and execution
    /// re-enters the loop from the configured resume stage (or the raising
    /// stage itself, which will re-run and see the response).
    pub async fn resume(
        &self,
        envelope: &mut Envelope,
        response: InterruptResponse,
        ctx: &AgentContext,
    ) -> Result<RunOutcome> {
        let interrupt = envelope
            .interrupts
            .interrupt
            .clone()
            .ok_or_else(|| crate::types::Error::state_transition("no interrupt pending to resume from"))?;

        if interrupt.status != crate::envelope::InterruptStatus::Resolved {
            return Err(crate::types::Error::state_transition(format!(
                "interrupt {} is not resolved (status={:?})",
                interrupt.id, interrupt.status
            )));
        }

        let raising_stage = envelope
            .interrupts
            .raising_stage
            .clone()
            .unwrap_or_else(|| envelope.pipeline.current_stage.clone());

        let resume_stage = match interrupt.kind {
            crate::envelope::InterruptKind::Clarification => self
                .pipeline
                .config
                .clarification_resume_stage
                .clone()
                .unwrap_or_else(|| raising_stage.clone()),
            crate::envelope::InterruptKind::Confirmation => self
                .pipeline
                .config
                .confirmation_resume_stage
                .clone()
                .unwrap_or_else(|| raising_stage.clone()),
            _ => raising_stage.clone(),
        };

        let stage_outputs = envelope.outputs.entry(raising_stage).or_default();
        stage_outputs.insert(
            crate::envelope::INTERRUPT_RESPONSE_KEY.to_string(),
            serde_json::to_value(&interrupt.response).unwrap_or(serde_json::Value::Null),
        );

        envelope.clear_interrupt();
        envelope.pipeline.current_stage = resume_stage;

        let outcome = self.run(envelope, ctx).await?;
        self.persist_state(envelope).await;
        Ok(outcome)
    }
}

/// Invoke `agent` with tool calls scoped to `config`'s access policy,
/// retrying up to `config.max_retries` when `required_output_fields` are
/// missing from the outcome (spec §4.3). A persistent miss is surfaced as
/// `AgentOutcome::error` so the caller's existing `error_next`/termination
/// handling applies — it is not a distinct failure path.
async fn invoke_with_retries(
    agent: Arc<dyn Agent>,
    config: &AgentConfig,
    envelope: &Envelope,
    ctx: &AgentContext,
) -> Result<crate::kernel::agent::AgentOutcome> {
    let scoped = scoped_context(config, ctx);
    let mut attempt = 0;
    loop {
        let mut outcome = agent.invoke(config, envelope, &scoped).await?;
        let missing = missing_required_fields(config, &outcome.outputs);
        if missing.is_empty() {
            return Ok(outcome);
        }
        if attempt >= config.max_retries {
            outcome.error = Some(format!(
                "missing required output fields after {} attempt(s): {missing:?}",
                attempt + 1
            ));
            return Ok(outcome);
        }
        attempt += 1;
        tracing::warn!(stage = %config.name, ?missing, attempt, "agent output missing required fields, retrying");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::InterruptStatus;
    use crate::kernel::agent::{AgentOutcome, InMemoryAgentRegistry};
    use crate::kernel::pipeline::{AgentConfig, JoinStrategy, PipelineConfig, RoutingRule};
    use crate::types::{EnvelopeId, InterruptId, RequestId, SessionId, UserId};
    use async_trait::async_trait;
    use std::collections::HashSet;

    #[derive(Debug)]
    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        async fn invoke(
            &self,
            _config: &AgentConfig,
            _envelope: &Envelope,
            _ctx: &AgentContext,
        ) -> Result<AgentOutcome> {
            let mut outputs = HashMap::new();
            outputs.insert("ok".to_string(), serde_json::json!(true));
            Ok(AgentOutcome::ok(outputs))
        }
    }

    #[derive(Debug)]
    struct LoopBackAgent;

    #[async_trait]
    impl Agent for LoopBackAgent {
        async fn invoke(
            &self,
            _config: &AgentConfig,
            _envelope: &Envelope,
            _ctx: &AgentContext,
        ) -> Result<AgentOutcome> {
            let mut outputs = HashMap::new();
            outputs.insert("verdict".to_string(), serde_json::json!("loop_back"));
            Ok(AgentOutcome::ok(outputs))
        }
    }

    fn agent_config(name: &str, stage_order: i32, default_next: Option<&str>) -> AgentConfig {
        AgentConfig {
            name: name.to_string(),
            stage_order,
            requires: HashSet::new(),
            after: HashSet::new(),
            join_strategy: JoinStrategy::All,
            has_llm: false,
            has_tools: false,
            has_policies: false,
            tool_access: crate::envelope::ToolAccess::None,
            allowed_tools: None,
            model_role: None,
            prompt_key: None,
            temperature: None,
            max_tokens: None,
            required_output_fields: vec![],
            routing_rules: vec![],
            default_next: default_next.map(|s| s.to_string()),
            error_next: None,
            timeout_seconds: 60,
            max_retries: 2,
        }
    }

    fn envelope(stage_order: Vec<&str>) -> Envelope {
        Envelope::new(
            UserId::must("u1"),
            SessionId::must("s1"),
            "hi",
            stage_order.into_iter().map(|s| s.to_string()).collect(),
            10,
            10,
            10,
        )
    }

    fn ctx() -> AgentContext {
        AgentContext {
            cancel: crate::kernel::agent::CancellationToken::new(),
            llm: None,
            tools: None,
        }
    }

    #[tokio::test]
    async fn s1_linear_happy_path() {
        let config = PipelineConfig {
            name: "linear".to_string(),
            agents: vec![
                agent_config("a", 0, Some("b")),
                agent_config("b", 1, Some("c")),
                agent_config("c", 2, Some("end")),
            ],
            max_iterations: 10,
            max_llm_calls: 10,
            max_agent_hops: 10,
            edge_limits: vec![],
            default_run_mode: RunMode::Sequential,
            clarification_resume_stage: None,
            confirmation_resume_stage: None,
        };
        let pipeline = Arc::new(ValidatedPipeline::build(config).unwrap());
        let mut registry = InMemoryAgentRegistry::new();
        registry.register("a", Arc::new(EchoAgent));
        registry.register("b", Arc::new(EchoAgent));
        registry.register("c", Arc::new(EchoAgent));
        let runtime = Runtime::new(pipeline, Arc::new(registry));

        let mut env = envelope(vec!["a", "b", "c"]);
        let ctx = ctx();
        let outcome = runtime.run(&mut env, &ctx).await.unwrap();

        assert_eq!(outcome, RunOutcome::Terminated);
        assert_eq!(env.pipeline.current_stage, STAGE_END);
        assert!(env.bounds.terminated);
        assert_eq!(env.bounds.terminal_reason, Some(crate::envelope::TerminalReason::Completed));
        assert_eq!(env.bounds.agent_hop_count, 3);
        assert_eq!(env.pipeline.iteration, 0);
        assert_eq!(env.outputs.len(), 3);
    }

    #[tokio::test]
    async fn s2_cyclic_replan_bounded_by_edge_limit() {
        let mut c_config = agent_config("c", 2, None);
        c_config.routing_rules.push(RoutingRule {
            condition_key: "verdict".to_string(),
            value: serde_json::json!("loop_back"),
            target: "a".to_string(),
        });

        let config = PipelineConfig {
            name: "cyclic".to_string(),
            agents: vec![agent_config("a", 0, Some("b")), agent_config("b", 1, Some("c")), c_config],
            max_iterations: 10,
            max_llm_calls: 100,
            max_agent_hops: 100,
            edge_limits: vec![crate::kernel::pipeline::EdgeLimit {
                from: "c".to_string(),
                to: "a".to_string(),
                max_count: 2,
            }],
            default_run_mode: RunMode::Sequential,
            clarification_resume_stage: None,
            confirmation_resume_stage: None,
        };
        let pipeline = Arc::new(ValidatedPipeline::build(config).unwrap());
        let mut registry = InMemoryAgentRegistry::new();
        registry.register("a", Arc::new(EchoAgent));
        registry.register("b", Arc::new(EchoAgent));
        registry.register("c", Arc::new(LoopBackAgent));
        let runtime = Runtime::new(pipeline, Arc::new(registry));

        let mut env = envelope(vec!["a", "b", "c"]);
        let ctx = ctx();
        let outcome = runtime.run(&mut env, &ctx).await.unwrap();

        assert_eq!(outcome, RunOutcome::Terminated);
        assert_eq!(env.bounds.terminal_reason, Some(crate::envelope::TerminalReason::EdgeLimitExceeded));
        assert_eq!(env.pipeline.iteration, 2);
        assert_eq!(env.pipeline.traversals_of("c", "a"), 3);
    }

    #[tokio::test]
    async fn cancellation_before_first_iteration_terminates_immediately() {
        let config = PipelineConfig {
            name: "single".to_string(),
            agents: vec![agent_config("a", 0, Some("end"))],
            max_iterations: 10,
            max_llm_calls: 10,
            max_agent_hops: 10,
            edge_limits: vec![],
            default_run_mode: RunMode::Sequential,
            clarification_resume_stage: None,
            confirmation_resume_stage: None,
        };
        let pipeline = Arc::new(ValidatedPipeline::build(config).unwrap());
        let mut registry = InMemoryAgentRegistry::new();
        registry.register("a", Arc::new(EchoAgent));
        let runtime = Runtime::new(pipeline, Arc::new(registry));

        let mut env = envelope(vec!["a"]);
        let ctx = ctx();
        ctx.cancel.cancel();

        let outcome = runtime.run(&mut env, &ctx).await.unwrap();
        assert_eq!(outcome, RunOutcome::Terminated);
        assert_eq!(env.bounds.terminal_reason, Some(crate::envelope::TerminalReason::Cancelled));
        assert!(env.audit.processing_history.is_empty());
    }

    #[derive(Debug)]
    struct InterruptingAgent;

    #[async_trait]
    impl Agent for InterruptingAgent {
        async fn invoke(
            &self,
            _config: &AgentConfig,
            envelope: &Envelope,
            _ctx: &AgentContext,
        ) -> Result<AgentOutcome> {
            let mut outcome = AgentOutcome::default();
            outcome.interrupt = Some(crate::envelope::FlowInterrupt {
                id: InterruptId::new(),
                kind: crate::envelope::InterruptKind::Clarification,
                request_id: envelope.identity.request_id.clone(),
                user_id: envelope.identity.user_id.clone(),
                session_id: envelope.identity.session_id.clone(),
                envelope_id: envelope.identity.envelope_id.clone(),
                question: Some("which file?".to_string()),
                message: None,
                data: None,
                status: InterruptStatus::Pending,
                response: None,
                created_at: Utc::now(),
                expires_at: None,
                resolved_at: None,
            });
            Ok(outcome)
        }
    }

    #[tokio::test]
    async fn s4_clarification_interrupt_then_resume() {
        let config = PipelineConfig {
            name: "plan".to_string(),
            agents: vec![agent_config("plan", 0, Some("end"))],
            max_iterations: 10,
            max_llm_calls: 10,
            max_agent_hops: 10,
            edge_limits: vec![],
            default_run_mode: RunMode::Sequential,
            clarification_resume_stage: Some("plan".to_string()),
            confirmation_resume_stage: None,
        };
        let pipeline = Arc::new(ValidatedPipeline::build(config).unwrap());
        let mut registry = InMemoryAgentRegistry::new();
        registry.register("plan", Arc::new(InterruptingAgent));
        let runtime = Runtime::new(pipeline, Arc::new(registry));

        let mut env = envelope(vec!["plan"]);
        let ctx = ctx();
        let outcome = runtime.run(&mut env, &ctx).await.unwrap();
        assert_eq!(outcome, RunOutcome::InterruptRaised);
        assert!(env.interrupts.interrupt_pending);

        let mut interrupt = env.interrupts.interrupt.clone().unwrap();
        interrupt.status = InterruptStatus::Resolved;
        interrupt.resolved_at = Some(Utc::now());
        interrupt.response = Some(InterruptResponse {
            text: Some("auth.py".to_string()),
            approved: None,
            decision: None,
            data: None,
            received_at: Utc::now(),
        });
        env.interrupts.interrupt = Some(interrupt.clone());

        // Swap in an echo agent for the re-entry so we can observe completion.
        let mut registry = InMemoryAgentRegistry::new();
        registry.register("plan", Arc::new(EchoAgent));
        let runtime = Runtime::new(runtime.pipeline.clone(), Arc::new(registry));

        let response = env.interrupts.interrupt.as_ref().unwrap().response.clone().unwrap();
        let outcome = runtime.resume(&mut env, response, &ctx).await.unwrap();
        assert_eq!(outcome, RunOutcome::Terminated);
        assert!(!env.interrupts.interrupt_pending);
        assert_eq!(
            env.outputs["plan"][crate::envelope::INTERRUPT_RESPONSE_KEY]["text"],
            serde_json::json!("auth.py")
        );
    }

    #[tokio::test]
    async fn agent_returning_no_match_routes_to_end() {
        let config = PipelineConfig {
            name: "single".to_string(),
            agents: vec![agent_config("a", 0, None)],
            max_iterations: 10,
            max_llm_calls: 10,
            max_agent_hops: 10,
            edge_limits: vec![],
            default_run_mode: RunMode::Sequential,
            clarification_resume_stage: None,
            confirmation_resume_stage: None,
        };
        let pipeline = Arc::new(ValidatedPipeline::build(config).unwrap());
        let mut registry = InMemoryAgentRegistry::new();
        registry.register("a", Arc::new(EchoAgent));
        let runtime = Runtime::new(pipeline, Arc::new(registry));

        let mut env = envelope(vec!["a"]);
        let ctx = ctx();
        let outcome = runtime.run(&mut env, &ctx).await.unwrap();
        assert_eq!(outcome, RunOutcome::Terminated);
        assert_eq!(env.pipeline.current_stage, STAGE_END);
        assert_eq!(env.bounds.terminal_reason, Some(crate::envelope::TerminalReason::Completed));
    }
}
