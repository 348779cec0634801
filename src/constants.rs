//! System-wide constants for the coordination substrate.

// Background sweep periods. Each loop has a required upper bound; the
// values here leave headroom under it.
/// Lock expiration sweep period (bound: 60s)
pub const LOCK_SWEEP_INTERVAL_SECS: u64 = 30;

/// Delayed message drain period (bound: 5s)
pub const MESSAGE_DRAIN_INTERVAL_SECS: u64 = 2;

/// Resource state update period (bound: 10s)
pub const RESOURCE_SWEEP_INTERVAL_SECS: u64 = 5;

/// Approval escalation evaluation period (bound: 1h)
pub const ESCALATION_SWEEP_INTERVAL_SECS: u64 = 1800;

/// Metric snapshot period (bound: 1h)
pub const METRIC_SNAPSHOT_INTERVAL_SECS: u64 = 1800;

// Lock manager defaults
/// Default lock timeout when the caller does not supply one (30 minutes)
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 1800;

// Event log retention
/// Maximum in-memory event records before the oldest are dropped
pub const MAX_RETAINED_EVENTS: usize = 50_000;

// Messaging
/// Default page size for mailbox listing
pub const DEFAULT_MESSAGE_LIMIT: usize = 50;

// Context assembly
/// Hard cap on a single chunk's token count
pub const MAX_CHUNK_TOKENS: usize = 2000;

/// Target chunk size produced by the splitter
pub const OPTIMAL_CHUNK_TOKENS: usize = 1000;

/// Candidate pool sizes per retrieval leg
pub const SEMANTIC_CANDIDATE_LIMIT: usize = 100;
pub const KEYWORD_CANDIDATE_LIMIT: usize = 100;
pub const RECENT_CANDIDATE_LIMIT: usize = 50;
pub const RELATED_CANDIDATE_LIMIT: usize = 50;

// Scheduler
/// Context switch settles back to the prior state after this many seconds
pub const CONTEXT_SWITCH_SECS: i64 = 5;

/// Coordination surcharge for collaboration-seeking agents (seconds)
pub const COLLABORATION_SURCHARGE_SECS: f64 = 30.0;

// Monitoring
/// Metric samples retained per series
pub const METRIC_RETENTION_COUNT: usize = 200;
