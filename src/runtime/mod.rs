//! # Runtime
//!
//! Process plumbing around the control loops.
//!
//! - `initialization`: rustls, tracing, metrics and the HTTP server
//! - `controllers`: wiring of every kube-runtime control loop
//! - `leader`: Lease based leader election

pub mod controllers;
pub mod initialization;
pub mod leader;

pub use leader::{LeaderElectionError, LeaderElector, LeaderGuard};
