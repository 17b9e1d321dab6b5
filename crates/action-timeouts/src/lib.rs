//! Adaptive timeouts
//!
//! Keeps a small rolling window of observed durations per operation context
//! and turns it into a timeout: a high percentile of recent history scaled by
//! a safety margin, never looser than the caller's ceiling and never tighter
//! than a fixed floor.

pub mod estimator;
pub mod policy;
pub mod window;

pub use estimator::{AdaptiveTimeoutEstimator, WindowStats};
pub use policy::{TimeoutPolicy, TimeoutPolicyError};
pub use window::{SampleWindow, TimingSample};
