//! Selector cache
//!
//! One entry per logical name. The front locator of an entry is the one tried
//! first on the next resolution. Only the resolver writes here, and only
//! after a race has settled.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::types::Locator;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocatorStat {
    pub locator: Locator,
    pub successes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectorCacheEntry {
    pub logical_name: String,
    /// Winners so far, most recent winner first.
    pub locators: Vec<LocatorStat>,
    /// Resolutions in a row that found nothing.
    pub failure_streak: u32,
    pub last_used: DateTime<Utc>,
}

impl SelectorCacheEntry {
    pub fn cached(&self) -> Option<&Locator> {
        self.locators.first().map(|s| &s.locator)
    }

    pub fn successes(&self, locator: &Locator) -> u64 {
        self.locators
            .iter()
            .find(|s| &s.locator == locator)
            .map_or(0, |s| s.successes)
    }
}

pub struct SelectorCache {
    entries: DashMap<String, SelectorCacheEntry>,
    max_failure_streak: u32,
    evictions: AtomicU64,
}

impl SelectorCache {
    pub fn new(max_failure_streak: u32) -> Self {
        Self {
            entries: DashMap::new(),
            max_failure_streak: max_failure_streak.max(1),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn cached_locator(&self, logical_name: &str) -> Option<Locator> {
        self.entries
            .get(logical_name)
            .and_then(|entry| entry.cached().cloned())
    }

    pub fn get(&self, logical_name: &str) -> Option<SelectorCacheEntry> {
        self.entries.get(logical_name).map(|e| e.value().clone())
    }

    /// `winner` found the element: bump it to the front, reset the streak.
    /// Whatever was cached before is demoted behind it.
    pub fn record_success(&self, logical_name: &str, winner: &Locator) {
        let mut entry = self
            .entries
            .entry(logical_name.to_string())
            .or_insert_with(|| SelectorCacheEntry {
                logical_name: logical_name.to_string(),
                locators: Vec::new(),
                failure_streak: 0,
                last_used: Utc::now(),
            });
        let existing = entry.locators.iter().position(|s| &s.locator == winner);
        let mut stat = match existing {
            Some(idx) => entry.locators.remove(idx),
            None => LocatorStat {
                locator: winner.clone(),
                successes: 0,
            },
        };
        stat.successes += 1;
        entry.locators.insert(0, stat);
        entry.failure_streak = 0;
        entry.last_used = Utc::now();
    }

    /// A whole resolution failed. Returns `true` when the entry was evicted.
    pub fn record_failure(&self, logical_name: &str) -> bool {
        let streak = match self.entries.get_mut(logical_name) {
            Some(mut entry) => {
                entry.failure_streak += 1;
                entry.last_used = Utc::now();
                entry.failure_streak
            }
            None => return false,
        };
        if streak < self.max_failure_streak {
            debug!(logical_name, streak, "selector cache miss streak");
            return false;
        }
        self.entries.remove(logical_name);
        self.evictions.fetch_add(1, Ordering::Relaxed);
        info!(logical_name, streak, "evicted selector cache entry");
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn snapshot(&self) -> Vec<SelectorCacheEntry> {
        let mut entries: Vec<SelectorCacheEntry> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn winner_moves_to_front_and_previous_is_demoted() {
        let cache = SelectorCache::new(3);
        let a = Locator::css("#a");
        let b = Locator::css("#b");
        cache.record_success("submit", &a);
        cache.record_success("submit", &a);
        cache.record_success("submit", &b);

        let entry = cache.get("submit").unwrap();
        assert_eq!(entry.cached(), Some(&b));
        assert_eq!(entry.locators[1].locator, a);
        assert_eq!(entry.successes(&a), 2);
        assert_eq!(entry.successes(&b), 1);
    }

    #[test]
    fn evicted_after_failure_streak() {
        let cache = SelectorCache::new(3);
        cache.record_success("menu", &Locator::css("#menu"));
        assert!(!cache.record_failure("menu"));
        assert!(!cache.record_failure("menu"));
        assert!(cache.record_failure("menu"));
        assert!(cache.get("menu").is_none());
        assert_eq!(cache.evictions(), 1);
        assert!(!cache.record_failure("menu"));
    }

    #[test]
    fn success_resets_streak() {
        let cache = SelectorCache::new(2);
        let l = Locator::css("#x");
        cache.record_success("x", &l);
        cache.record_failure("x");
        cache.record_success("x", &l);
        assert!(!cache.record_failure("x"));
        assert_eq!(cache.get("x").unwrap().failure_streak, 1);
    }
}
