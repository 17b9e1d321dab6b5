//! Persisted operational records and their on-disk lifecycle.
//!
//! Records go through an [`EventSink`] into a category/date partitioned tree;
//! [`LogLifecycleManager`] ages that tree (raw -> zstd -> purged).

pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod model;
pub mod reader;
pub mod sink;

mod scan;

pub use config::{AgeThresholds, RetentionPolicy, SCREENSHOTS_CATEGORY};
pub use errors::{EsError, EsErrorKind};
pub use lifecycle::{
    ArtifactInventory, CategoryInventory, LogLifecycleManager, SweepFailure, SweepReport,
};
pub use model::{ArtifactState, LogArtifact, LogRecord, Severity};
pub use reader::{latest_log_date, list_logs, read_log, LogFile};
pub use sink::{log_path, EventSink, FileEventSink, MemoryEventSink};
