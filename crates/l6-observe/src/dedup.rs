use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

const MAX_KEYS: usize = 4_096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DedupVerdict {
    Pass,
    /// Let through while suppressing; carries the occurrence count.
    Repeated(u32),
    Suppress,
}

struct Seen {
    window_start: Instant,
    count: u32,
}

/// Collapses bursts of identical events.
///
/// Within one window the first `max_duplicates` occurrences pass, then only
/// every `repeat_every`-th occurrence is let through, tagged with its count.
pub struct DuplicateFilter {
    window: Duration,
    max_duplicates: u32,
    repeat_every: u32,
    seen: HashMap<String, Seen>,
}

impl DuplicateFilter {
    pub fn new(window: Duration, max_duplicates: u32, repeat_every: u32) -> Self {
        Self {
            window,
            max_duplicates,
            repeat_every: repeat_every.max(1),
            seen: HashMap::new(),
        }
    }

    pub fn check(&mut self, key: &str) -> DedupVerdict {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&mut self, key: &str, now: Instant) -> DedupVerdict {
        if self.seen.len() >= MAX_KEYS && !self.seen.contains_key(key) {
            let window = self.window;
            self.seen
                .retain(|_, s| now.saturating_duration_since(s.window_start) < window);
        }
        let entry = self.seen.entry(key.to_string()).or_insert(Seen {
            window_start: now,
            count: 0,
        });
        if now.saturating_duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count += 1;
        if entry.count <= self.max_duplicates {
            DedupVerdict::Pass
        } else if entry.count % self.repeat_every == 0 {
            DedupVerdict::Repeated(entry.count)
        } else {
            DedupVerdict::Suppress
        }
    }
}
