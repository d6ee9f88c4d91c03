//! Flow interrupt management (spec §4.7).
//!
//! Creates, persists, and resolves typed `FlowInterrupt`s. Persistence is
//! delegated to a `CheckpointStore`-like collaborator in a full deployment;
//! here the service owns an in-memory table, which is an acceptable fallback
//! per spec §4.7 when no external store is configured.

use chrono::{Duration, Utc};
use std::collections::HashMap;

use crate::envelope::{FlowInterrupt, InterruptKind, InterruptResponse, InterruptStatus};
use crate::types::{Config, EnvelopeId, Error, InterruptId, RequestId, Result, SessionId, UserId};

/// Provenance fields carried by every interrupt.
#[derive(Debug, Clone)]
pub struct InterruptProvenance {
    pub request_id: RequestId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub envelope_id: EnvelopeId,
}

/// Parameters for creating a new interrupt.
#[derive(Debug, Clone)]
pub struct CreateInterruptParams {
    pub kind: InterruptKind,
    pub provenance: InterruptProvenance,
    pub question: Option<String>,
    pub message: Option<String>,
    pub data: Option<HashMap<String, serde_json::Value>>,
    pub ttl: Option<Duration>,
}

/// An event the interrupt service wants published on the `CommBus`
/// (spec §6.3). The service itself does not depend on the bus; the kernel
/// forwards these after each call.
#[derive(Debug, Clone)]
pub struct InterruptEvent {
    pub name: String,
    pub interrupt: FlowInterrupt,
}

/// Interrupt service (spec §4.7, C7).
#[derive(Debug)]
pub struct InterruptService {
    configs: HashMap<InterruptKind, crate::types::InterruptConfig>,
    interrupts: HashMap<InterruptId, FlowInterrupt>,
}

impl InterruptService {
    pub fn new(config: &Config) -> Self {
        Self {
            configs: config.interrupts.clone(),
            interrupts: HashMap::new(),
        }
    }

    fn config_for(&self, kind: InterruptKind) -> Option<&crate::types::InterruptConfig> {
        self.configs.get(&kind)
    }

    pub fn create(&mut self, params: CreateInterruptParams) -> (FlowInterrupt, InterruptEvent) {
        let now = Utc::now();
        let cfg = self.config_for(params.kind);
        let ttl = params.ttl.or_else(|| cfg.map(|c| Duration::from_std(c.ttl).unwrap_or(Duration::zero())));
        let auto_expire = cfg.map(|c| c.auto_expire).unwrap_or(true);
        let event_name = cfg
            .map(|c| c.event_name.clone())
            .unwrap_or_else(|| format!("interrupt.{}", params.kind.as_event_suffix()));

        let expires_at = if auto_expire {
            ttl.map(|d| now + d)
        } else {
            None
        };

        let interrupt = FlowInterrupt {
            id: InterruptId::new(),
            kind: params.kind,
            request_id: params.provenance.request_id,
            user_id: params.provenance.user_id,
            session_id: params.provenance.session_id,
            envelope_id: params.provenance.envelope_id,
            question: params.question,
            message: params.message,
            data: params.data,
            status: InterruptStatus::Pending,
            response: None,
            created_at: now,
            expires_at,
            resolved_at: None,
        };

        self.interrupts.insert(interrupt.id.clone(), interrupt.clone());

        let event = InterruptEvent {
            name: event_name,
            interrupt: interrupt.clone(),
        };
        (interrupt, event)
    }

    pub fn respond(
        &mut self,
        interrupt_id: &InterruptId,
        response: InterruptResponse,
    ) -> Result<(FlowInterrupt, InterruptEvent)> {
        let interrupt = self
            .interrupts
            .get_mut(interrupt_id)
            .ok_or_else(|| Error::not_found(format!("unknown interrupt: {interrupt_id}")))?;

        if interrupt.status != InterruptStatus::Pending {
            return Err(Error::state_transition(format!(
                "interrupt {interrupt_id} is not pending (status={:?})",
                interrupt.status
            )));
        }

        interrupt.status = InterruptStatus::Resolved;
        interrupt.response = Some(response);
        interrupt.resolved_at = Some(Utc::now());

        let interrupt = interrupt.clone();
        let event = InterruptEvent {
            name: "interrupt.resolved".to_string(),
            interrupt: interrupt.clone(),
        };
        Ok((interrupt, event))
    }

    pub fn cancel(
        &mut self,
        interrupt_id: &InterruptId,
        _reason: Option<String>,
    ) -> Result<FlowInterrupt> {
        let interrupt = self
            .interrupts
            .get_mut(interrupt_id)
            .ok_or_else(|| Error::not_found(format!("unknown interrupt: {interrupt_id}")))?;

        if interrupt.status != InterruptStatus::Pending {
            return Err(Error::state_transition(format!(
                "interrupt {interrupt_id} is not pending (status={:?})",
                interrupt.status
            )));
        }

        interrupt.status = InterruptStatus::Cancelled;
        interrupt.resolved_at = Some(Utc::now());
        Ok(interrupt.clone())
    }

    /// Transition all pending interrupts whose `expires_at <= now` to
    /// `expired`. Returns the events to publish, one per expired interrupt.
    pub fn expire_pending(&mut self) -> Vec<InterruptEvent> {
        let now = Utc::now();
        let mut events = Vec::new();

        for interrupt in self.interrupts.values_mut() {
            if interrupt.status == InterruptStatus::Pending {
                if let Some(expires_at) = interrupt.expires_at {
                    if expires_at <= now {
                        interrupt.status = InterruptStatus::Expired;
                        interrupt.resolved_at = Some(now);
                        events.push(InterruptEvent {
                            name: "interrupt.expired".to_string(),
                            interrupt: interrupt.clone(),
                        });
                    }
                }
            }
        }
        events
    }

    pub fn get(&self, interrupt_id: &InterruptId) -> Option<&FlowInterrupt> {
        self.interrupts.get(interrupt_id)
    }

    /// At most one pending interrupt should exist for a given request at a
    /// time (the runtime stops the loop as soon as it raises one).
    pub fn pending_for_request(&self, request_id: &RequestId) -> Option<&FlowInterrupt> {
        self.interrupts
            .values()
            .find(|i| i.status == InterruptStatus::Pending && &i.request_id == request_id)
    }

    pub fn pending_for_session(
        &self,
        session_id: &SessionId,
        kinds: Option<&[InterruptKind]>,
    ) -> Vec<&FlowInterrupt> {
        self.interrupts
            .values()
            .filter(|i| i.status == InterruptStatus::Pending && &i.session_id == session_id)
            .filter(|i| kinds.map(|ks| ks.contains(&i.kind)).unwrap_or(true))
            .collect()
    }

    /// Drop resolved/cancelled/expired interrupts older than `max_age`.
    /// Used by the background cleanup task; returns the number removed.
    pub fn cleanup_resolved(&mut self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.interrupts.len();
        self.interrupts.retain(|_, i| {
            i.status == InterruptStatus::Pending
                || i.resolved_at.map(|at| at > cutoff).unwrap_or(true)
        });
        before - self.interrupts.len()
    }

    pub fn count(&self) -> usize {
        self.interrupts.len()
    }

    pub fn count_pending(&self) -> usize {
        self.interrupts
            .values()
            .filter(|i| i.status == InterruptStatus::Pending)
            .count()
    }
}

impl InterruptKind {
    fn as_event_suffix(self) -> &'static str {
        match self {
            InterruptKind::Clarification => "clarification_needed",
            InterruptKind::Confirmation => "confirmation_needed",
            InterruptKind::AgentReview => "agent_review_needed",
            InterruptKind::Checkpoint => "checkpoint_needed",
            InterruptKind::ResourceExhausted => "resource_exhausted",
            InterruptKind::Timeout => "timeout",
            InterruptKind::SystemError => "system_error",
        }
    }
}
