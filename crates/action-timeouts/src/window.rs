use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// One observed duration for a context.
#[derive(Clone, Copy, Debug)]
pub struct TimingSample {
    pub duration: Duration,
    pub recorded_at: Instant,
}

/// Fixed-capacity FIFO of recent samples.
#[derive(Debug)]
pub struct SampleWindow {
    samples: VecDeque<TimingSample>,
    capacity: usize,
    last_touched: Instant,
}

impl SampleWindow {
    pub fn new(capacity: usize, now: Instant) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            last_touched: now,
        }
    }

    pub fn push(&mut self, duration: Duration, now: Instant) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(TimingSample {
            duration,
            recorded_at: now,
        });
        self.last_touched = now;
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_touched = now;
    }

    pub fn last_touched(&self) -> Instant {
        self.last_touched
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &TimingSample> {
        self.samples.iter()
    }

    pub fn sorted_durations(&self) -> Vec<Duration> {
        let mut durations: Vec<Duration> = self.samples.iter().map(|s| s.duration).collect();
        durations.sort_unstable();
        durations
    }

    /// Nearest-rank percentile over the window.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        nearest_rank(&self.sorted_durations(), p)
    }
}

/// Nearest-rank percentile of an ascending slice.
pub(crate) fn nearest_rank(sorted: &[Duration], p: f64) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let rank = (p.clamp(0.0, 1.0) * n as f64).ceil() as usize;
    let idx = rank.clamp(1, n) - 1;
    Some(sorted[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn evicts_oldest_when_full() {
        let now = Instant::now();
        let mut window = SampleWindow::new(3, now);
        for v in [10, 20, 30, 40] {
            window.push(ms(v), now);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.sorted_durations(), vec![ms(20), ms(30), ms(40)]);
    }

    #[test]
    fn nearest_rank_matches_textbook_values() {
        let sorted: Vec<Duration> = (1..=20).map(|v| ms(v * 100)).collect();
        assert_eq!(nearest_rank(&sorted, 0.95), Some(ms(1900)));
        assert_eq!(nearest_rank(&sorted, 0.5), Some(ms(1000)));
        assert_eq!(nearest_rank(&sorted, 1.0), Some(ms(2000)));
        assert_eq!(nearest_rank(&sorted, 0.01), Some(ms(100)));
        assert_eq!(nearest_rank(&[], 0.95), None);
    }
}
