#![deny(missing_docs)]
//! Admission guards for the model gateway.
//!
//! Three independent mechanisms, composed by the gateway in a fixed order
//! (dedupe → breaker → rate limit → provider):
//!
//! - [`RateLimiter`] — per-tenant token buckets with a bounded FIFO wait
//!   queue. Refill is computed lazily from elapsed time; there is no
//!   background task.
//! - [`CircuitBreaker`] — Closed/Open/HalfOpen per provider, sliding-window
//!   failure counting, at most one probe in flight while half-open.
//! - [`Deduper`] — coalesces concurrent identical requests onto one
//!   underlying call and serves recent results from a TTL cache.
//!
//! All three are safe to share (`Arc`) and guard their state with
//! fine-grained locks held only across bookkeeping, never across awaits.

pub mod breaker;
pub mod dedupe;
pub mod ratelimit;

pub use breaker::{Admission, BreakerMap, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use dedupe::{DedupeOutcome, Deduper, DeduperConfig};
pub use ratelimit::{RateLimiter, RateLimiterConfig};
