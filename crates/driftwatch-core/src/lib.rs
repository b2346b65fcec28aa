//! # driftwatch-core
//!
//! Core library for driftwatch - a read-only drift sentinel for Docker
//! Swarm.
//!
//! This crate holds the pure domain logic: the declared and observed state
//! models, the deterministic health evaluator, the transition engine with
//! its stabilization filter, and the persisted snapshot schema. It performs
//! no I/O; fetching, observing, persisting and notifying live in the daemon
//! crate.
//!
//! ## Example
//!
//! ```rust
//! use driftwatch_core::compose::DesiredState;
//! use driftwatch_core::health::evaluate_stack_health;
//! use driftwatch_core::swarm::ActualState;
//!
//! let desired = DesiredState::default();
//! let actual = ActualState::default();
//! let health = evaluate_stack_health(&desired, &actual, false);
//! assert!(health.services.is_empty());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod compose;
pub mod health;
pub mod snapshot;
pub mod swarm;
pub mod transition;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::compose::{DeployMode, DesiredService, DesiredState};
    pub use crate::health::{
        DriftDetail, DriftKind, ResourceKind, ServiceHealth, ServiceStatus, StackHealth,
    };
    pub use crate::snapshot::{StackSnapshot, State};
    pub use crate::swarm::{ActualService, ActualState};
    pub use crate::transition::ServiceTransition;
}

pub use compose::{DesiredService, DesiredState};
pub use health::{ServiceHealth, ServiceStatus, StackHealth};
pub use snapshot::{StackSnapshot, State};
pub use swarm::{ActualService, ActualState};
pub use transition::ServiceTransition;
