//! # Fleet Core
//!
//! Fleet Core is the coordination substrate for a fleet of autonomous
//! software agents collaborating on engineering projects. It makes many
//! concurrent, partially ordered agents behave like one organization.
//!
//! ## Architecture
//!
//! The core consists of:
//! - **Task Store & Assignment**: task hierarchy with progress rollup and
//!   skill-, workload-, and hierarchy-aware auto-assignment
//! - **Lock Manager**: per-project file access control with FIFO queuing
//!   and timeout-driven expiry
//! - **Message Bus**: direct, team, broadcast, and collaboration-request
//!   messaging with per-sender ordering
//! - **Resource Scheduler**: per-agent computational state machine driving
//!   response timing and interruption cost
//! - **Approval Engine**: authority-bounded decisions with escalation up
//!   the reporting chain
//! - **Context Assembler**: budget-bounded packing of prior content for
//!   agent queries
//!
//! The HTTP API, LLM clients, git operations, and embedding backends are
//! external collaborators behind narrow interfaces.

/// HTTP API server and endpoints
pub mod api;
/// Approval routing and escalation
pub mod approvals;
/// Task-to-agent matching algorithms
pub mod assignment;
/// Authentication middleware
pub mod auth;
/// System configuration
pub mod config;
/// System-wide constants
pub mod constants;
/// Content chunking and context assembly
pub mod context;
/// Append-only event log
pub mod events;
/// Core data models
pub mod models;
/// Per-project file lock management
pub mod locks;
/// Inter-agent messaging
pub mod messaging;
/// Dashboards and metric series
pub mod monitoring;
/// Composition root and background loops
pub mod orchestrator;
/// Rate limiting for the API surface
pub mod rate_limit;
/// Agent resource states and response timing
pub mod scheduler;
/// Task storage and hierarchy
pub mod tasks;
/// Error types and handling
pub mod error;

#[cfg(test)]
mod tests;

pub use error::{FleetError, Result};
