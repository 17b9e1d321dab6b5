//! Operation tracking for automation runs.
//!
//! [`PerformanceTracker`] wraps operations in scopes, keeps per-operation
//! aggregates, feeds successful durations to the adaptive timeout estimator
//! and persists only the events worth reading.

pub mod dedup;
pub mod errors;
pub mod event;
pub mod metrics;
pub mod policy;
pub mod tracker;
pub mod tracing;

pub use dedup::{DedupVerdict, DuplicateFilter};
pub use errors::ObserveError;
pub use event::{PerformanceEvent, SessionSummary};
pub use metrics::{OperationStats, StatsSnapshot};
pub use policy::{operation_class, ObsPolicyView};
pub use tracker::{PerformanceTracker, TrackScope};
