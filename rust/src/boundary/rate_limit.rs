use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Characters of the API key used to identify the caller for limiting. The
/// first eight are the shared `fp_proj_` literal, so take a few more.
const KEY_ID_CHARS: usize = 16;

/// Identifier a request is limited under: a leading slice of its API key,
/// otherwise the client IP.
pub fn rate_limit_key(api_key: Option<&str>, client_ip: Option<&str>) -> String {
    match (api_key.map(str::trim).filter(|k| !k.is_empty()), client_ip) {
        (Some(key), _) => format!("key:{}", key.chars().take(KEY_ID_CHARS).collect::<String>()),
        (None, Some(ip)) => format!("ip:{ip}"),
        (None, None) => "anonymous".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// How long until one more request would be admitted. Set only on denial.
    pub retry_after: Option<Duration>,
}

impl RateDecision {
    /// Value for a `Retry-After` header, rounded up to whole seconds.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after
            .map(|d| d.as_secs() + u64::from(d.subsec_nanos() > 0))
    }
}

/// Most identifiers tracked at once. Past this the stalest bucket is dropped
/// to make room.
const MAX_TRACKED_KEYS: usize = 10_000;

/// How often `check` sweeps out buckets that have refilled to capacity.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

struct LimiterState {
    buckets: HashMap<String, Bucket>,
    last_sweep: Option<Instant>,
}

/// Per-identifier token bucket. Each identifier starts full at `capacity`
/// and regains `refill_per_second` tokens per second. A bucket that has
/// refilled to capacity is indistinguishable from a new one, so it is dropped
/// on the next sweep.
#[derive(Clone)]
pub struct TokenBucketLimiter {
    state: Arc<Mutex<LimiterState>>,
    capacity: f64,
    refill_per_second: f64,
    max_tracked: usize,
}

impl TokenBucketLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(LimiterState {
                buckets: HashMap::new(),
                last_sweep: None,
            })),
            capacity: f64::from(config.capacity.max(1)),
            refill_per_second: config.refill_per_second.max(0.0),
            max_tracked: MAX_TRACKED_KEYS,
        }
    }

    /// Caps how many identifiers are tracked at once.
    pub fn max_tracked(mut self, max_tracked: usize) -> Self {
        self.max_tracked = max_tracked.max(1);
        self
    }

    /// Number of identifiers currently holding a bucket.
    pub fn tracked(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).buckets.len()
    }

    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let sweep_due = state
            .last_sweep
            .map_or(true, |last| now.saturating_duration_since(last) >= SWEEP_INTERVAL);
        if sweep_due {
            self.sweep(&mut state, now);
        }
        if !state.buckets.contains_key(key) && state.buckets.len() >= self.max_tracked {
            self.sweep(&mut state, now);
            if state.buckets.len() >= self.max_tracked {
                evict_stalest(&mut state.buckets);
            }
        }

        let bucket = state.buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return RateDecision {
                allowed: true,
                remaining: bucket.tokens.floor() as u32,
                retry_after: None,
            };
        }

        let retry_after = (self.refill_per_second > 0.0)
            .then(|| Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_second));
        tracing::warn!(limit_key = key, "rate limited");
        RateDecision {
            allowed: false,
            remaining: 0,
            retry_after,
        }
    }

    /// Drops every bucket that would be full at `now`. Returns how many went.
    pub fn prune(&self, now: Instant) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.sweep(&mut state, now)
    }

    fn sweep(&self, state: &mut LimiterState, now: Instant) -> usize {
        let before = state.buckets.len();
        let (capacity, refill) = (self.capacity, self.refill_per_second);
        state.buckets.retain(|_, bucket| {
            let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
            bucket.tokens + elapsed * refill < capacity
        });
        state.last_sweep = Some(now);
        let removed = before - state.buckets.len();
        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = state.buckets.len(),
                "idle rate-limit buckets dropped"
            );
        }
        removed
    }
}

fn evict_stalest(buckets: &mut HashMap<String, Bucket>) {
    let stalest = buckets
        .iter()
        .min_by_key(|(_, bucket)| bucket.last_refill)
        .map(|(key, _)| key.clone());
    if let Some(key) = stalest {
        buckets.remove(&key);
    }
}
