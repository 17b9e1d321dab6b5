//! Element location for UI automation steps
//!
//! A logical target ("submit_order") is described by several candidate
//! locators. The resolver first retries the locator that won last time and
//! otherwise races every candidate, keeping the first match. Probe budgets
//! come from the adaptive estimator, so targets that usually appear quickly
//! fail quickly when they do not.

pub mod cache;
pub mod catalog;
pub mod errors;
pub mod probe;
pub mod resolver;
pub mod types;

pub use cache::{LocatorStat, SelectorCache, SelectorCacheEntry};
pub use catalog::LocatorCatalog;
pub use errors::LocatorError;
pub use probe::ProbePort;
pub use resolver::{DefaultElementResolver, ElementResolver, ResolverConfig, ResolverStatsSnapshot};
pub use types::*;
