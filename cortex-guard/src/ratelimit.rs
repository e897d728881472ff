//! Per-tenant token buckets with a bounded FIFO wait queue.
//!
//! Each tenant gets two buckets: one counting requests, one counting
//! estimated prompt tokens. Both refill continuously from elapsed time —
//! no background timer. A caller that cannot be admitted immediately
//! reserves its tokens and sleeps until the reservation matures, bounded
//! by the queue deadline and the caller's own context. Reservations are
//! FIFO, so a later caller can never be admitted ahead of an earlier one.

use cortex_types::{CallContext, Component, Error, ErrorKind, TenantId};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Rate limiter configuration. Defaults follow the runtime-wide config
/// surface: 60 requests/minute, 90k tokens/minute, burst 10, queue of
/// 1000, 30 s maximum queue wait.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Sustained request admission rate.
    pub requests_per_minute: u32,
    /// Sustained estimated-token admission rate.
    pub tokens_per_minute: u32,
    /// Request bucket capacity (instantaneous burst above the rate).
    pub burst: u32,
    /// Maximum queued waiters per tenant. Zero disables queuing.
    pub queue_bound: usize,
    /// Maximum time a waiter may spend queued.
    pub queue_wait_deadline: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            tokens_per_minute: 90_000,
            burst: 10,
            queue_bound: 1000,
            queue_wait_deadline: Duration::from_secs(30),
        }
    }
}

impl RateLimiterConfig {
    fn request_rate_per_sec(&self) -> f64 {
        f64::from(self.requests_per_minute) / 60.0
    }

    fn token_rate_per_sec(&self) -> f64 {
        f64::from(self.tokens_per_minute) / 60.0
    }

    /// Token bucket capacity: the same burst factor applied to the token
    /// rate, floored at one request's worth of sustained flow.
    fn token_capacity(&self) -> f64 {
        (self.token_rate_per_sec() * f64::from(self.burst.max(1)))
            .max(self.token_rate_per_sec())
            .max(1.0)
    }
}

/// One continuously-refilling bucket.
#[derive(Debug)]
struct Bucket {
    available: f64,
    /// Tokens promised to queued waiters ahead of any new arrival.
    committed: f64,
    capacity: f64,
    rate_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: f64, rate_per_sec: f64, now: Instant) -> Self {
        Self {
            available: capacity,
            committed: 0.0,
            capacity,
            rate_per_sec,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.available = (self.available + elapsed * self.rate_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Uncommitted tokens available right now.
    fn free(&self) -> f64 {
        self.available - self.committed
    }

    /// Seconds until `need` tokens beyond the current free amount have
    /// accumulated. Zero when already available. A zero-rate bucket can
    /// never satisfy a deficit; the queue deadline is what fails the
    /// caller, so "a day" stands in for infinity.
    fn seconds_until(&self, need: f64) -> f64 {
        let deficit = need - self.free();
        if deficit <= 0.0 {
            0.0
        } else if self.rate_per_sec <= 0.0 {
            86_400.0
        } else {
            (deficit / self.rate_per_sec).min(86_400.0)
        }
    }
}

#[derive(Debug)]
struct TenantBuckets {
    requests: Bucket,
    tokens: Bucket,
    queued: usize,
}

/// Per-tenant rate limiter. Shared by `Arc`; all state lives behind one
/// mutex held only for bookkeeping.
pub struct RateLimiter {
    config: RateLimiterConfig,
    tenants: Mutex<HashMap<TenantId, TenantBuckets>>,
}

impl RateLimiter {
    /// Create a limiter with the given configuration.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            tenants: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire one request slot plus `n_tokens` estimated tokens for
    /// `tenant`, waiting in the bounded queue when necessary.
    ///
    /// Fails with `RateLimited` when the queue is full or the wait
    /// deadline elapses, and with `Cancelled` when the caller's context is
    /// cancelled while queued. A departing waiter (either way) releases
    /// its reservation immediately.
    pub async fn acquire(
        &self,
        tenant: &TenantId,
        n_tokens: u32,
        ctx: &CallContext,
    ) -> Result<(), Error> {
        let need = f64::from(n_tokens.max(1));
        let now = Instant::now();

        // Admission or reservation, under the lock.
        let ready_at = {
            let mut tenants = self.tenants.lock().expect("rate limiter lock");
            let entry = tenants.entry(tenant.clone()).or_insert_with(|| TenantBuckets {
                requests: Bucket::new(
                    f64::from(self.config.burst.max(1)),
                    self.config.request_rate_per_sec(),
                    now,
                ),
                tokens: Bucket::new(
                    self.config.token_capacity(),
                    self.config.token_rate_per_sec(),
                    now,
                ),
                queued: 0,
            });
            entry.requests.refill(now);
            entry.tokens.refill(now);

            if entry.requests.free() >= 1.0 && entry.tokens.free() >= need {
                entry.requests.available -= 1.0;
                entry.tokens.available -= need;
                return Ok(());
            }

            if self.config.queue_bound == 0 || entry.queued >= self.config.queue_bound {
                tracing::debug!(tenant = %tenant, queued = entry.queued, "rate limit queue full");
                return Err(Error::new(
                    ErrorKind::RateLimited,
                    Component::RateLimiter,
                    "rate limit exceeded and wait queue is full",
                )
                .with_tenant(tenant.clone()));
            }

            // Reserve: later arrivals see these tokens as committed, which
            // is what makes the queue FIFO without tracking an explicit
            // waiter list.
            let wait_requests = entry.requests.seconds_until(1.0);
            let wait_tokens = entry.tokens.seconds_until(need);
            entry.requests.committed += 1.0;
            entry.tokens.committed += need;
            entry.queued += 1;
            now + Duration::from_secs_f64(wait_requests.max(wait_tokens))
        };

        let deadline = now + ctx.budget(self.config.queue_wait_deadline);

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(Error::cancelled(Component::RateLimiter)),
            _ = tokio::time::sleep_until(deadline), if deadline < ready_at => {
                Err(Error::new(
                    ErrorKind::RateLimited,
                    Component::RateLimiter,
                    "queue wait deadline elapsed",
                )
                .with_tenant(tenant.clone()))
            }
            _ = tokio::time::sleep_until(ready_at) => Ok(()),
        };

        // Settle the reservation either way.
        let mut tenants = self.tenants.lock().expect("rate limiter lock");
        let entry = tenants
            .get_mut(tenant)
            .ok_or_else(|| Error::invariant(Component::RateLimiter, "tenant bucket vanished"))?;
        let settle_now = Instant::now();
        entry.requests.refill(settle_now);
        entry.tokens.refill(settle_now);
        entry.requests.committed = (entry.requests.committed - 1.0).max(0.0);
        entry.tokens.committed = (entry.tokens.committed - need).max(0.0);
        entry.queued -= 1;

        match outcome {
            Ok(()) => {
                entry.requests.available = (entry.requests.available - 1.0).max(0.0);
                entry.tokens.available = (entry.tokens.available - need).max(0.0);
                Ok(())
            }
            Err(e) => Err(e.with_tenant(tenant.clone())),
        }
    }

    /// Number of waiters currently queued for `tenant`.
    pub fn queued(&self, tenant: &TenantId) -> usize {
        self.tenants
            .lock()
            .expect("rate limiter lock")
            .get(tenant)
            .map_or(0, |t| t.queued)
    }
}
