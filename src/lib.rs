//! # Agent pipeline orchestration kernel
//!
//! Owns the lifecycle of a request as it flows through a directed pipeline
//! of agents:
//! - Process lifecycle management with Unix-like state transitions
//! - Resource quota enforcement (LLM calls, tool calls, hops, iterations)
//! - Rate limiting with configurable windows
//! - Flow interrupts for human-in-the-loop patterns
//! - A message bus for pub/sub and request/response patterns between
//!   whatever embeds this kernel and the agents it runs
//!
//! ## Architecture
//!
//! The kernel follows a single-actor model where `Kernel` owns all mutable
//! state; callers (a gateway, a CLI, a test harness) drive it directly
//! rather than through any transport baked into this crate:
//! ```text
//!                    ┌─────────────────────────────────┐
//!   caller calls  →  │            Kernel               │
//!                    │  ┌─────────┐ ┌─────────┐        │
//!                    │  │Resources│ │Lifecycle│        │
//!                    │  │ Tracker │ │ Manager │        │
//!                    │  └─────────┘ └─────────┘        │
//!                    │  ┌─────────┐ ┌─────────┐        │
//!                    │  │Interrupt│ │RateLimit│        │
//!                    │  │ Service │ │   er    │        │
//!                    │  └─────────┘ └─────────┘        │
//!                    └─────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod commbus;
pub mod envelope;
pub mod kernel;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
