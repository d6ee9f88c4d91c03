//! CommBus: in-process pub/sub, command, and query primitives (spec §4.8, C9).
//!
//! Three patterns share one dispatch table, each serialized by its own async
//! mutex (spec §5 "CommBus subscribers map and handlers map: serialized;
//! handlers invoked outside the lock to avoid deadlock"). Subscriptions are
//! tracked by a unique id rather than by comparing handler values — identity
//! comparison on trait objects has been a documented defect upstream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::types::{Error, Result};

/// A published event: a name plus an arbitrary JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// A fire-and-forget command routed to exactly one handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub payload: serde_json::Value,
}

/// A request-response query routed to exactly one handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub name: String,
    pub payload: serde_json::Value,
}

/// Subscriber contract for events. `async-trait` so handlers may themselves
/// await (e.g. to re-publish, or to await a lock elsewhere).
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event);
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: &Command) -> Result<()>;
}

#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn handle(&self, query: &Query) -> Result<serde_json::Value>;
}

/// Middleware observing every dispatch (spec §4.8 "an optional middleware
/// chain wraps each dispatch"). Each hook runs in registration order before
/// the dispatch proceeds; middleware cannot veto a publish but may veto a
/// command/query by returning an error.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn before_publish(&self, _event: &Event) {}
    async fn before_send(&self, _command: &Command) -> Result<()> {
        Ok(())
    }
    async fn before_query(&self, _query: &Query) -> Result<()> {
        Ok(())
    }
}

/// Opaque handle returned from `subscribe`. Holds the subscriber id it was
/// issued so `unsubscribe` is idempotent and doesn't need handler identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    event_name: String,
    handler: Arc<dyn EventHandler>,
}

/// In-process communication bus (spec §4.8).
#[derive(Default)]
pub struct CommBus {
    next_subscriber_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
    commands: Mutex<HashMap<String, Arc<dyn CommandHandler>>>,
    queries: Mutex<HashMap<String, Arc<dyn QueryHandler>>>,
    middleware: Mutex<Vec<Arc<dyn Middleware>>>,
}

impl std::fmt::Debug for CommBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommBus").finish_non_exhaustive()
    }
}

impl CommBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event subscriber. Returns an id that `unsubscribe` accepts
    /// regardless of whether the subscription is still active.
    pub async fn subscribe(&self, event_name: impl Into<String>, handler: Arc<dyn EventHandler>) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber_id.fetch_add(1, Ordering::SeqCst));
        let mut subscribers = self.subscribers.lock().await;
        subscribers.push(Subscriber {
            id,
            event_name: event_name.into(),
            handler,
        });
        id
    }

    /// Idempotent: unsubscribing an id twice, or one that never existed,
    /// is a no-op rather than an error.
    pub async fn unsubscribe(&self, id: SubscriberId) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|s| s.id != id);
    }

    pub async fn register_command(&self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        let mut commands = self.commands.lock().await;
        commands.insert(name.into(), handler);
    }

    pub async fn register_query(&self, name: impl Into<String>, handler: Arc<dyn QueryHandler>) {
        let mut queries = self.queries.lock().await;
        queries.insert(name.into(), handler);
    }

    pub async fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        let mut chain = self.middleware.lock().await;
        chain.push(middleware);
    }

    /// Fan out to every subscriber of `event.name`. Handlers run
    /// concurrently and outside the subscriber-map lock (spec §5); a
    /// subscriber's delivery order relative to other events it receives is
    /// preserved (spec §5 "delivered to a given subscriber in publish
    /// order") so long as callers don't publish concurrently on the same
    /// bus without awaiting — each call here runs its fan-out to completion
    /// before returning.
    pub async fn publish(&self, event: Event) {
        {
            let chain = self.middleware.lock().await;
            for mw in chain.iter() {
                mw.before_publish(&event).await;
            }
        }

        let matching: Vec<Arc<dyn EventHandler>> = {
            let subscribers = self.subscribers.lock().await;
            subscribers
                .iter()
                .filter(|s| s.event_name == event.name)
                .map(|s| s.handler.clone())
                .collect()
        };

        let handles: Vec<_> = matching
            .into_iter()
            .map(|handler| {
                let event = event.clone();
                tokio::spawn(async move { handler.handle(&event).await })
            })
            .collect();

        for handle in handles {
            // Subscriber panics are swallowed, not propagated (spec §4.8
            // "Subscriber errors are logged, never propagated").
            let _ = handle.await;
        }
    }

    /// Route to exactly one registered command handler. Errors are the
    /// caller's to log; they are not retried.
    pub async fn send(&self, command: Command) -> Result<()> {
        {
            let chain = self.middleware.lock().await;
            for mw in chain.iter() {
                mw.before_send(&command).await?;
            }
        }

        let handler = {
            let commands = self.commands.lock().await;
            commands.get(&command.name).cloned()
        };
        match handler {
            Some(handler) => handler.handle(&command).await,
            None => Err(Error::not_found(format!("no command handler registered for {}", command.name))),
        }
    }

    /// Route to exactly one registered query handler, bounded by `timeout`.
    pub async fn query(&self, query: Query, timeout: Duration) -> Result<serde_json::Value> {
        {
            let chain = self.middleware.lock().await;
            for mw in chain.iter() {
                mw.before_query(&query).await?;
            }
        }

        let handler = {
            let queries = self.queries.lock().await;
            queries.get(&query.name).cloned()
        };
        let handler = handler.ok_or_else(|| Error::not_found(format!("no query handler registered for {}", query.name)))?;

        match tokio::time::timeout(timeout, handler.handle(&query)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!("query {} timed out after {:?}", query.name, timeout))),
        }
    }

    pub async fn subscriber_count(&self, event_name: &str) -> usize {
        let subscribers = self.subscribers.lock().await;
        subscribers.iter().filter(|s| s.event_name == event_name).count()
    }
}
