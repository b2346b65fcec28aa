//! # driftwatch-daemon
//!
//! The driftwatch daemon: a read-only drift sentinel for Docker Swarm.
//!
//! Every poll interval, each configured stack's rendered Compose file is
//! fetched over HTTP, compared against the Swarm API's observed state, and
//! stabilized status transitions are alerted to Slack and/or a generic
//! webhook. This crate carries all the I/O around the pure evaluation
//! logic in `driftwatch-core`.
//!
//! # Modules
//!
//! - [`config`]: environment-first configuration and the mapping file
//! - [`fetch`]: conditional compose fetching with bounded retry
//! - [`swarm`]: Docker Engine API client
//! - [`state`]: atomic persisted snapshots
//! - [`runner`]: the per-stack poll loop
//! - [`coordinator`]: multi-stack supervision
//! - [`notify`]: the alert delivery pipeline
//! - [`healthcheck`], [`metrics`], [`server`]: observability surfaces

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod coordinator;
pub mod fetch;
pub mod healthcheck;
pub mod metrics;
pub mod notify;
pub mod runner;
pub mod server;
pub mod state;
pub mod swarm;
