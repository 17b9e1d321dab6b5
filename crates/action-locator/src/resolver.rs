//! Element resolver with cache short-circuit and concurrent candidate race

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use action_timeouts::AdaptiveTimeoutEstimator;
use async_trait::async_trait;
use l6_observe::PerformanceTracker;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::SelectorCache;
use crate::errors::LocatorError;
use crate::probe::ProbePort;
use crate::types::*;

/// Resolver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Upper bound for the single probe of a cached locator.
    pub cache_probe_timeout_ms: u64,
    /// Ceiling handed to the estimator for each race probe.
    pub base_probe_timeout_ms: u64,
    /// Consecutive failed resolutions before a cache entry is evicted.
    pub max_failure_streak: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_probe_timeout_ms: 750,
            base_probe_timeout_ms: 10_000,
            max_failure_streak: 3,
        }
    }
}

impl ResolverConfig {
    pub fn cache_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_probe_timeout_ms)
    }

    pub fn base_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.base_probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolverStatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub races: u64,
    pub not_found: u64,
    pub evictions: u64,
    pub cached_entries: usize,
}

#[derive(Default)]
struct ResolverStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    races: AtomicU64,
    not_found: AtomicU64,
}

/// Element resolver trait
#[async_trait]
pub trait ElementResolver: Send + Sync {
    /// Find `logical_name` using `candidates`, giving up at `deadline`.
    async fn resolve(
        &self,
        logical_name: &str,
        candidates: &[Locator],
        deadline: Instant,
    ) -> Result<ResolvedTarget, LocatorError>;

    async fn resolve_set(
        &self,
        set: &LocatorSet,
        deadline: Instant,
    ) -> Result<ResolvedTarget, LocatorError> {
        self.resolve(&set.logical_name, &set.candidates, deadline)
            .await
    }
}

/// Default element resolver implementation
///
/// Tries the cached locator alone first. On a miss every candidate is probed
/// concurrently, each bounded by the adaptive budget for the logical name;
/// the first success wins and the rest are cancelled.
pub struct DefaultElementResolver {
    probe: Arc<dyn ProbePort>,
    cache: Arc<SelectorCache>,
    estimator: Arc<AdaptiveTimeoutEstimator>,
    tracker: PerformanceTracker,
    config: ResolverConfig,
    stats: ResolverStats,
}

impl DefaultElementResolver {
    pub fn new(
        probe: Arc<dyn ProbePort>,
        cache: Arc<SelectorCache>,
        estimator: Arc<AdaptiveTimeoutEstimator>,
        tracker: PerformanceTracker,
        config: ResolverConfig,
    ) -> Self {
        Self {
            probe,
            cache,
            estimator,
            tracker,
            config,
            stats: ResolverStats::default(),
        }
    }

    pub fn cache(&self) -> &Arc<SelectorCache> {
        &self.cache
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn stats(&self) -> ResolverStatsSnapshot {
        ResolverStatsSnapshot {
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.stats.cache_misses.load(Ordering::Relaxed),
            races: self.stats.races.load(Ordering::Relaxed),
            not_found: self.stats.not_found.load(Ordering::Relaxed),
            evictions: self.cache.evictions(),
            cached_entries: self.cache.len(),
        }
    }

    async fn resolve_inner(
        &self,
        logical_name: &str,
        candidates: &[Locator],
        deadline: Instant,
        context: &str,
    ) -> Result<ResolvedTarget, LocatorError> {
        let started = Instant::now();
        let remaining = deadline.saturating_duration_since(started);
        if remaining.is_zero() {
            self.stats.not_found.fetch_add(1, Ordering::Relaxed);
            return Err(not_found(logical_name, candidates));
        }
        let budget = self
            .estimator
            .get_timeout(context, self.config.base_probe_timeout())
            .min(remaining);

        match self.cache.cached_locator(logical_name) {
            Some(cached) if candidates.contains(&cached) => {
                let short = self.config.cache_probe_timeout().min(budget);
                match self.probe_one(&cached, short).await {
                    Ok(element) => {
                        self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                        self.cache.record_success(logical_name, &cached);
                        debug!(logical_name, locator = %cached, "resolved from cache");
                        return Ok(ResolvedTarget {
                            logical_name: logical_name.to_string(),
                            locator: cached,
                            element,
                            source: ResolveSource::Cache,
                            elapsed: started.elapsed(),
                            budget: short,
                        });
                    }
                    Err(err) => {
                        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
                        debug!(logical_name, locator = %cached, error = %err, "cached locator missed");
                    }
                }
            }
            _ => {
                self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.stats.races.fetch_add(1, Ordering::Relaxed);
        let budget = budget.min(deadline.saturating_duration_since(Instant::now()));
        debug!(
            logical_name,
            candidates = candidates.len(),
            budget_ms = budget.as_millis() as u64,
            "racing candidates"
        );
        match self.race(candidates, budget, deadline).await {
            Some((locator, element)) => {
                self.cache.record_success(logical_name, &locator);
                info!(logical_name, locator = %locator, "resolved by race");
                Ok(ResolvedTarget {
                    logical_name: logical_name.to_string(),
                    locator,
                    element,
                    source: ResolveSource::Race,
                    elapsed: started.elapsed(),
                    budget,
                })
            }
            None => {
                self.stats.not_found.fetch_add(1, Ordering::Relaxed);
                self.cache.record_failure(logical_name);
                warn!(
                    logical_name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "no candidate resolved"
                );
                Err(not_found(logical_name, candidates))
            }
        }
    }

    async fn probe_one(&self, locator: &Locator, budget: Duration) -> Result<ElementRef, LocatorError> {
        let cancel = CancellationToken::new();
        let ctx = ProbeCtx {
            budget,
            cancel: cancel.clone(),
        };
        let outcome = timeout(budget, self.probe.probe(locator, ctx)).await;
        cancel.cancel();
        outcome.unwrap_or_else(|_| {
            Err(LocatorError::ProbeTimeout {
                locator: locator.to_string(),
                budget_ms: budget.as_millis() as u64,
            })
        })
    }

    /// One task per distinct candidate. Returns the first success; every
    /// other probe is cancelled and aborted before this returns.
    async fn race(
        &self,
        candidates: &[Locator],
        budget: Duration,
        deadline: Instant,
    ) -> Option<(Locator, ElementRef)> {
        let cancel = CancellationToken::new();
        let mut set = JoinSet::new();
        let mut seen = HashSet::new();
        for locator in candidates {
            if !seen.insert(locator) {
                continue;
            }
            let probe = Arc::clone(&self.probe);
            let locator = locator.clone();
            let ctx = ProbeCtx {
                budget,
                cancel: cancel.child_token(),
            };
            set.spawn(async move {
                let outcome = match timeout(budget, probe.probe(&locator, ctx)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(LocatorError::ProbeTimeout {
                        locator: locator.to_string(),
                        budget_ms: budget.as_millis() as u64,
                    }),
                };
                (locator, outcome)
            });
        }

        let winner = timeout_at(deadline, async {
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((locator, Ok(element))) => return Some((locator, element)),
                    Ok((locator, Err(err))) => {
                        debug!(locator = %locator, error = %err, "probe lost");
                    }
                    Err(err) => warn!(error = %err, "probe task failed"),
                }
            }
            None
        })
        .await
        .unwrap_or(None);

        cancel.cancel();
        set.abort_all();
        winner
    }
}

fn not_found(logical_name: &str, candidates: &[Locator]) -> LocatorError {
    LocatorError::NotFound {
        logical_name: logical_name.to_string(),
        attempted: candidates.iter().map(ToString::to_string).collect(),
    }
}

#[async_trait]
impl ElementResolver for DefaultElementResolver {
    async fn resolve(
        &self,
        logical_name: &str,
        candidates: &[Locator],
        deadline: Instant,
    ) -> Result<ResolvedTarget, LocatorError> {
        validate_candidates(logical_name, candidates)?;
        let context = format!("locate:{logical_name}");
        let scope = self.tracker.track(context.clone());
        let result = scope
            .run_within(self.resolve_inner(logical_name, candidates, deadline, &context))
            .await;
        match &result {
            Ok(_) => {
                scope.succeed();
            }
            Err(err) => {
                scope.fail(err);
            }
        }
        result
    }
}
