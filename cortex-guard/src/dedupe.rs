//! Request deduplication: in-flight coalescing plus a recent-result cache.
//!
//! The first caller for a fingerprint becomes the leader: the underlying
//! call is spawned onto the runtime so its lifetime is independent of any
//! single caller, and every caller (leader included) subscribes to the
//! shared result. A subscriber cancelling drops only its own wait; the
//! underlying call is cancelled only when the last subscriber departs.
//!
//! Successful results are kept in a TTL cache so identical requests within
//! `recent_ttl` skip the provider entirely.

use cortex_types::{CallContext, Component, Error, ErrorKind, Fingerprint};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deduper configuration.
#[derive(Debug, Clone)]
pub struct DeduperConfig {
    /// How long successful results are served from the recent cache.
    pub recent_ttl: Duration,
}

impl Default for DeduperConfig {
    fn default() -> Self {
        Self {
            recent_ttl: Duration::from_secs(300),
        }
    }
}

/// How a call was satisfied, for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeOutcome {
    /// This caller started the underlying call.
    Led,
    /// This caller attached to a call already in flight.
    Coalesced,
    /// Served from the recent-result cache; no call happened.
    RecentHit,
}

struct InFlight<T> {
    tx: broadcast::Sender<Result<T, Error>>,
    subscribers: usize,
    underlying: CancellationToken,
}

struct DedupeInner<T> {
    in_flight: HashMap<Fingerprint, InFlight<T>>,
    recent: HashMap<Fingerprint, (T, Instant)>,
}

/// Coalesces concurrent identical requests. `T` is the shared result type;
/// it must be cheap to clone since every subscriber receives a copy.
pub struct Deduper<T> {
    config: DeduperConfig,
    inner: Arc<Mutex<DedupeInner<T>>>,
}

impl<T: Clone + Send + 'static> Deduper<T> {
    /// Create a deduper.
    pub fn new(config: DeduperConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(DedupeInner {
                in_flight: HashMap::new(),
                recent: HashMap::new(),
            })),
        }
    }

    /// Run `make_call` at most once per fingerprint across overlapping
    /// callers, or serve the result from the recent cache.
    ///
    /// `make_call` receives the *underlying* cancellation token, which
    /// fires only when every subscriber has cancelled. The caller's own
    /// `ctx` governs only this subscriber's wait.
    pub async fn execute<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        ctx: &CallContext,
        make_call: F,
    ) -> (Result<T, Error>, DedupeOutcome)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let (mut rx, outcome) = {
            let mut inner = self.inner.lock().expect("deduper lock");

            if let Some((cached, expires_at)) = inner.recent.get(&fingerprint) {
                if Instant::now() < *expires_at {
                    return (Ok(cached.clone()), DedupeOutcome::RecentHit);
                }
                inner.recent.remove(&fingerprint);
            }

            if let Some(entry) = inner.in_flight.get_mut(&fingerprint) {
                entry.subscribers += 1;
                (entry.tx.subscribe(), DedupeOutcome::Coalesced)
            } else {
                let (tx, rx) = broadcast::channel(1);
                let underlying = CancellationToken::new();
                inner.in_flight.insert(
                    fingerprint,
                    InFlight {
                        tx: tx.clone(),
                        subscribers: 1,
                        underlying: underlying.clone(),
                    },
                );
                drop(inner);

                let fut = make_call(underlying.clone());
                let shared = Arc::clone(&self.inner);
                let ttl = self.config.recent_ttl;
                tokio::spawn(async move {
                    let result = tokio::select! {
                        _ = underlying.cancelled() => Err(Error::cancelled(Component::Deduper)),
                        r = fut => r,
                    };
                    let mut inner = shared.lock().expect("deduper lock");
                    inner.in_flight.remove(&fingerprint);
                    if let Ok(value) = &result {
                        inner
                            .recent
                            .insert(fingerprint, (value.clone(), Instant::now() + ttl));
                    }
                    drop(inner);
                    // No subscribers left is fine; the result is cached.
                    let _ = tx.send(result);
                });

                (rx, DedupeOutcome::Led)
            }
        };

        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                self.unsubscribe(&fingerprint);
                Err(Error::cancelled(Component::Deduper))
            }
            recv = rx.recv() => match recv {
                Ok(result) => result,
                Err(_) => Err(Error::invariant(
                    Component::Deduper,
                    "in-flight result channel closed without a result",
                )),
            },
        };

        (result, outcome)
    }

    /// Drop one subscription; cancel the underlying call when it was the
    /// last one.
    fn unsubscribe(&self, fingerprint: &Fingerprint) {
        let mut inner = self.inner.lock().expect("deduper lock");
        if let Some(entry) = inner.in_flight.get_mut(fingerprint) {
            entry.subscribers -= 1;
            if entry.subscribers == 0 {
                tracing::debug!(%fingerprint, "last subscriber cancelled, cancelling underlying call");
                entry.underlying.cancel();
                inner.in_flight.remove(fingerprint);
            }
        }
    }

    /// Remove expired entries from the recent cache.
    pub fn prune_recent(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("deduper lock");
        inner.recent.retain(|_, (_, expires_at)| *expires_at > now);
    }

    /// Number of live entries in the recent cache (expired entries that
    /// have not been pruned yet do not count).
    pub fn recent_len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .expect("deduper lock")
            .recent
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    /// Number of fingerprints currently in flight.
    pub fn in_flight_len(&self) -> usize {
        self.inner.lock().expect("deduper lock").in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fp(tag: &str) -> Fingerprint {
        Fingerprint::of(&json!({ "tag": tag })).unwrap()
    }

    #[tokio::test]
    async fn ten_concurrent_callers_one_underlying_call() {
        let deduper = Arc::new(Deduper::new(DeduperConfig::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let fingerprint = fp("same");

        let mut handles = Vec::new();
        for _ in 0..10 {
            let deduper = Arc::clone(&deduper);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                let ctx = CallContext::background();
                deduper
                    .execute(fingerprint, &ctx, move |_cancel| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, Error>("result".to_string())
                    })
                    .await
            }));
        }

        let mut led = 0;
        let mut coalesced = 0;
        for handle in handles {
            let (result, outcome) = handle.await.unwrap();
            assert_eq!(result.unwrap(), "result");
            match outcome {
                DedupeOutcome::Led => led += 1,
                DedupeOutcome::Coalesced => coalesced += 1,
                DedupeOutcome::RecentHit => panic!("no recent hit expected"),
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(led, 1);
        assert_eq!(coalesced, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn recent_cache_serves_within_ttl() {
        let deduper: Deduper<String> = Deduper::new(DeduperConfig {
            recent_ttl: Duration::from_secs(300),
        });
        let ctx = CallContext::background();
        let fingerprint = fp("cached");

        let (r1, o1) = deduper
            .execute(fingerprint, &ctx, |_| async { Ok("v".to_string()) })
            .await;
        assert_eq!(r1.unwrap(), "v");
        assert_eq!(o1, DedupeOutcome::Led);

        let (r2, o2) = deduper
            .execute(fingerprint, &ctx, |_| async {
                panic!("must not be called");
            })
            .await;
        assert_eq!(r2.unwrap(), "v");
        assert_eq!(o2, DedupeOutcome::RecentHit);
    }

    #[tokio::test(start_paused = true)]
    async fn recent_cache_expires() {
        let deduper: Deduper<String> = Deduper::new(DeduperConfig {
            recent_ttl: Duration::from_secs(1),
        });
        let ctx = CallContext::background();
        let fingerprint = fp("expiring");

        deduper
            .execute(fingerprint, &ctx, |_| async { Ok("v1".to_string()) })
            .await
            .0
            .unwrap();
        assert_eq!(deduper.recent_len(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(deduper.recent_len(), 0);

        let (r, o) = deduper
            .execute(fingerprint, &ctx, |_| async { Ok("v2".to_string()) })
            .await;
        assert_eq!(r.unwrap(), "v2");
        assert_eq!(o, DedupeOutcome::Led);
    }

    #[tokio::test]
    async fn errors_are_shared_but_not_cached() {
        let deduper: Deduper<String> = Deduper::new(DeduperConfig::default());
        let ctx = CallContext::background();
        let fingerprint = fp("failing");

        let (r, _) = deduper
            .execute(fingerprint, &ctx, |_| async {
                Err(Error::new(
                    ErrorKind::ProviderUnavailable,
                    Component::Gateway,
                    "boom",
                ))
            })
            .await;
        assert_eq!(r.unwrap_err().kind, ErrorKind::ProviderUnavailable);
        assert_eq!(deduper.recent_len(), 0);

        // A later identical request leads a fresh call.
        let (r, o) = deduper
            .execute(fingerprint, &ctx, |_| async { Ok("recovered".to_string()) })
            .await;
        assert_eq!(r.unwrap(), "recovered");
        assert_eq!(o, DedupeOutcome::Led);
    }

    #[tokio::test]
    async fn one_subscriber_cancelling_does_not_cancel_the_call() {
        let deduper = Arc::new(Deduper::new(DeduperConfig::default()));
        let fingerprint = fp("shared");

        let leader_ctx = CallContext::background();
        let d = Arc::clone(&deduper);
        let leader = tokio::spawn(async move {
            d.execute(fingerprint, &leader_ctx, |cancel| async move {
                tokio::select! {
                    _ = cancel.cancelled() => Err(Error::cancelled(Component::Deduper)),
                    _ = tokio::time::sleep(Duration::from_millis(100)) => Ok("done".to_string()),
                }
            })
            .await
        });

        // Let the leader register.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let follower_ctx = CallContext::background();
        let follower_cancel = follower_ctx.clone();
        let d = Arc::clone(&deduper);
        let follower = tokio::spawn(async move {
            d.execute(fingerprint, &follower_ctx, |_| async {
                panic!("follower must coalesce");
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        follower_cancel.cancel();

        let (fr, fo) = follower.await.unwrap();
        assert_eq!(fr.unwrap_err().kind, ErrorKind::Cancelled);
        assert_eq!(fo, DedupeOutcome::Coalesced);

        // The leader still gets the real result.
        let (lr, lo) = leader.await.unwrap();
        assert_eq!(lr.unwrap(), "done");
        assert_eq!(lo, DedupeOutcome::Led);
    }

    #[tokio::test]
    async fn last_subscriber_cancelling_cancels_the_underlying_call() {
        let deduper = Arc::new(Deduper::new(DeduperConfig::default()));
        let fingerprint = fp("abandoned");
        let cancelled = Arc::new(AtomicUsize::new(0));

        let ctx = CallContext::background();
        let cancel_handle = ctx.clone();
        let observed = Arc::clone(&cancelled);
        let d = Arc::clone(&deduper);
        let only = tokio::spawn(async move {
            d.execute(fingerprint, &ctx, move |cancel| async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        observed.fetch_add(1, Ordering::SeqCst);
                        Err(Error::cancelled(Component::Deduper))
                    }
                    _ = tokio::time::sleep(Duration::from_secs(10)) => Ok("slow".to_string()),
                }
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel_handle.cancel();

        let (r, _) = only.await.unwrap();
        assert_eq!(r.unwrap_err().kind, ErrorKind::Cancelled);
        // Give the spawned underlying task a beat to observe the token.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(deduper.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn different_fingerprints_do_not_coalesce() {
        let deduper: Deduper<String> = Deduper::new(DeduperConfig::default());
        let ctx = CallContext::background();
        let (_, o1) = deduper.execute(fp("a"), &ctx, |_| async { Ok("a".into()) }).await;
        let (_, o2) = deduper.execute(fp("b"), &ctx, |_| async { Ok("b".into()) }).await;
        assert_eq!(o1, DedupeOutcome::Led);
        assert_eq!(o2, DedupeOutcome::Led);
        assert_eq!(deduper.recent_len(), 2);
    }
}
