use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::ProxyError;

/// Independently configured throttling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitTier {
    General,
    Search,
    Detail,
}

impl RateLimitTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitTier::General => "general",
            RateLimitTier::Search => "search",
            RateLimitTier::Detail => "detail",
        }
    }
}

impl fmt::Display for RateLimitTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter state after one hit has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    pub resets_in: Duration,
}

/// Storage for per-key fixed-window counters.
///
/// `increment` must be a single atomic read-modify-write: two concurrent
/// hits on the same key always observe distinct counts.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Record one hit for `key`, starting a fresh window if the previous one
    /// has expired, and return the updated count.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, ProxyError>;

    /// Check that the store is reachable
    async fn ping(&self) -> Result<(), ProxyError>;

    /// Drop counters whose window has passed; returns how many were removed
    async fn purge_expired(&self) -> Result<usize, ProxyError> {
        Ok(0)
    }

    fn kind(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    window_start: Instant,
    window: Duration,
}

/// In-process counter store
#[derive(Default)]
pub struct MemoryStore {
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counters.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, ProxyError> {
        let now = Instant::now();

        let mut counters = self
            .counters
            .lock()
            .map_err(|_| ProxyError::Internal("Failed to acquire lock on counters".to_string()))?;

        let counter = counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            window_start: now,
            window,
        });

        if now.duration_since(counter.window_start) >= counter.window {
            counter.count = 0;
            counter.window_start = now;
            counter.window = window;
        }

        counter.count += 1;

        Ok(WindowCount {
            count: counter.count,
            resets_in: counter
                .window
                .saturating_sub(now.duration_since(counter.window_start)),
        })
    }

    async fn ping(&self) -> Result<(), ProxyError> {
        self.counters
            .lock()
            .map(|_| ())
            .map_err(|_| ProxyError::Internal("Counter lock poisoned".to_string()))
    }

    async fn purge_expired(&self) -> Result<usize, ProxyError> {
        let now = Instant::now();

        let mut counters = self
            .counters
            .lock()
            .map_err(|_| ProxyError::Internal("Failed to acquire lock on counters".to_string()))?;

        let initial_count = counters.len();
        counters.retain(|_, counter| now.duration_since(counter.window_start) < counter.window);

        Ok(initial_count - counters.len())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

/// Limits for a single tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    pub max: u64,
    pub window: Duration,
}

impl TierPolicy {
    /// Seconds a throttled client is told to wait
    pub fn retry_after_secs(&self) -> u64 {
        let millis = self.window.as_millis() as u64;
        millis.div_ceil(1000)
    }
}

/// Outcome of an admitted request for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub tier: RateLimitTier,
    pub limit: u64,
    pub remaining: u64,
    pub resets_in: Duration,
}

impl RateLimitDecision {
    /// Whole seconds until the tier's window starts over, rounded up
    pub fn reset_secs(&self) -> u64 {
        (self.resets_in.as_millis() as u64).div_ceil(1000)
    }
}

/// Fixed-window, per-client-IP limiter with three tiers sharing one window:
/// general gets `max`, search `max / 2`, detail `max / 4`.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    general: TierPolicy,
    search: TierPolicy,
    detail: TierPolicy,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, max_requests: u64, window: Duration) -> Self {
        Self {
            store,
            general: TierPolicy {
                max: max_requests.max(1),
                window,
            },
            search: TierPolicy {
                max: (max_requests / 2).max(1),
                window,
            },
            detail: TierPolicy {
                max: (max_requests / 4).max(1),
                window,
            },
        }
    }

    pub fn from_config(store: Arc<dyn RateLimitStore>, config: &Config) -> Self {
        Self::new(
            store,
            u64::from(config.rate_limit_max_requests),
            config.rate_limit_window(),
        )
    }

    pub fn policy(&self, tier: RateLimitTier) -> TierPolicy {
        match tier {
            RateLimitTier::General => self.general,
            RateLimitTier::Search => self.search,
            RateLimitTier::Detail => self.detail,
        }
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    /// Count one request from `client_ip` against `tier`.
    pub async fn check(
        &self,
        tier: RateLimitTier,
        client_ip: &str,
    ) -> Result<RateLimitDecision, ProxyError> {
        let policy = self.policy(tier);
        let key = counter_key(tier, client_ip);

        let hit = self.store.increment(&key, policy.window).await?;

        if hit.count > policy.max {
            tracing::warn!(
                target: "crime_proxy::rate_limiter",
                tier = %tier,
                client_ip = %client_ip,
                count = hit.count,
                limit = policy.max,
                "Rate limit exceeded"
            );
            return Err(ProxyError::RateLimited {
                tier,
                retry_after: policy.retry_after_secs(),
            });
        }

        Ok(RateLimitDecision {
            tier,
            limit: policy.max,
            remaining: policy.max - hit.count,
            resets_in: hit.resets_in,
        })
    }

    /// Pass `client_ip` through each tier in order. Every tier is counted
    /// independently; the first rejection stops the chain.
    ///
    /// Returns the admitted decision with the smallest remaining budget.
    pub async fn check_all(
        &self,
        tiers: &[RateLimitTier],
        client_ip: &str,
    ) -> Result<Option<RateLimitDecision>, ProxyError> {
        let mut tightest: Option<RateLimitDecision> = None;

        for &tier in tiers {
            let decision = self.check(tier, client_ip).await?;
            if tightest.map_or(true, |t| decision.remaining < t.remaining) {
                tightest = Some(decision);
            }
        }

        Ok(tightest)
    }
}

/// Storage key for a (tier, client) pair
pub fn counter_key(tier: RateLimitTier, client_ip: &str) -> String {
    format!("crime_proxy:ratelimit:{}:{}", tier, client_ip)
}
