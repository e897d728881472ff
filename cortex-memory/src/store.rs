//! The bounded memory store.

use crate::item::{MemoryClass, MemoryItem};
use crate::score::{words, ScoringWeights};
use async_trait::async_trait;
use cortex_types::{Clock, Component, DurationMs, Error, ErrorKind, SystemClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Caps and expiry configuration. Defaults: 50 / 1000 / 500 / 2000 items,
/// 30-day maximum age, pressure at 90% of total capacity.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Short-term cap.
    pub max_short: usize,
    /// Long-term cap.
    pub max_long: usize,
    /// Episodic cap.
    pub max_episodic: usize,
    /// Semantic cap.
    pub max_semantic: usize,
    /// Global maximum age; `None` disables age-based expiry.
    pub max_age: Option<DurationMs>,
    /// Fraction of total capacity at which pressure handling kicks in.
    pub pressure_threshold: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_short: 50,
            max_long: 1000,
            max_episodic: 500,
            max_semantic: 2000,
            max_age: Some(DurationMs::from_days(30)),
            pressure_threshold: 0.9,
        }
    }
}

impl MemoryConfig {
    /// The cap for one class.
    pub fn cap(&self, class: MemoryClass) -> usize {
        match class {
            MemoryClass::Short => self.max_short,
            MemoryClass::Long => self.max_long,
            MemoryClass::Episodic => self.max_episodic,
            MemoryClass::Semantic => self.max_semantic,
        }
    }

    /// Sum of all class caps.
    pub fn total_cap(&self) -> usize {
        self.max_short + self.max_long + self.max_episodic + self.max_semantic
    }
}

/// Produces embedding vectors for stored content and queries. The gateway
/// crate adapts its embedding pipeline to this trait; tests use fixed
/// vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per text.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error>;
}

/// What a `store` call did besides inserting.
#[derive(Debug, Default)]
pub struct StoreOutcome {
    /// Items evicted to make room (cap eviction plus any pressure sweep).
    pub evicted: Vec<MemoryItem>,
}

/// Four bounded class stores plus scoring. Owned by one agent; never
/// shared mutably between agents.
pub struct BoundedMemory {
    pub(crate) config: MemoryConfig,
    weights: ScoringWeights,
    pub(crate) clock: Arc<dyn Clock>,
    embedder: Option<Arc<dyn Embedder>>,
    pub(crate) classes: HashMap<MemoryClass, Mutex<HashMap<String, MemoryItem>>>,
}

impl BoundedMemory {
    /// Create a memory with the system clock and no embedder.
    pub fn new(config: MemoryConfig) -> Self {
        Self::with_parts(config, ScoringWeights::default(), Arc::new(SystemClock::new()), None)
    }

    /// Create a memory with explicit scoring weights, clock, and embedder.
    pub fn with_parts(
        config: MemoryConfig,
        weights: ScoringWeights,
        clock: Arc<dyn Clock>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        let classes = MemoryClass::ALL
            .into_iter()
            .map(|c| (c, Mutex::new(HashMap::new())))
            .collect();
        Self {
            config,
            weights,
            clock,
            embedder,
            classes,
        }
    }

    /// Store an item. Importance is clamped to [0, 1]; timestamps are
    /// assigned from the clock; a full class evicts its least important,
    /// least recently accessed item first. Crossing the pressure threshold
    /// additionally shrinks every class by 10%.
    pub async fn store(&self, mut item: MemoryItem) -> Result<StoreOutcome, Error> {
        item.importance = item.importance.clamp(0.0, 1.0);
        let now = self.clock.now_millis();
        item.created_at = now;
        item.last_access = now;

        if item.embedding.is_none() {
            if let Some(embedder) = &self.embedder {
                let mut vectors = embedder.embed(std::slice::from_ref(&item.content)).await?;
                item.embedding = vectors.pop();
            }
        }

        let mut outcome = StoreOutcome::default();
        {
            let mut items = self.lock_class(item.class);
            let cap = self.config.cap(item.class);
            if cap == 0 {
                return Err(Error::new(
                    ErrorKind::MemoryPressure,
                    Component::Memory,
                    format!("class {} has zero capacity", item.class),
                ));
            }
            // Replacing an existing id is not an insertion for cap purposes.
            if !items.contains_key(&item.id) && items.len() >= cap {
                if let Some(evicted) = evict_one(&mut items) {
                    tracing::debug!(
                        class = %item.class,
                        evicted = %evicted.id,
                        importance = evicted.importance,
                        "memory eviction (class full)"
                    );
                    outcome.evicted.push(evicted);
                }
            }
            items.insert(item.id.clone(), item);
        }

        if self.total() as f64 >= self.config.pressure_threshold * self.config.total_cap() as f64 {
            outcome.evicted.extend(self.handle_pressure());
        }
        Ok(outcome)
    }

    /// Retrieve up to `limit` items ranked against `query`, most relevant
    /// first. `class: None` searches all classes. Returned items have
    /// their `last_access` refreshed.
    pub async fn retrieve(
        &self,
        query: &str,
        class: Option<MemoryClass>,
        limit: usize,
    ) -> Result<Vec<MemoryItem>, Error> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let query_embedding = match &self.embedder {
            Some(embedder) => embedder
                .embed(std::slice::from_ref(&query.to_string()))
                .await?
                .pop(),
            None => None,
        };
        let query_words = words(query);
        let now = self.clock.now_millis();

        let mut scored: Vec<(f64, MemoryItem)> = Vec::new();
        for c in class.map_or_else(|| MemoryClass::ALL.to_vec(), |c| vec![c]) {
            let items = self.lock_class(c);
            for item in items.values() {
                if self.is_expired(item, now) {
                    continue;
                }
                let score =
                    self.weights
                        .score(item, &query_words, query_embedding.as_deref(), now);
                scored.push((score, item.clone()));
            }
        }

        // Descending score; deterministic tie-break on id.
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        scored.truncate(limit);

        let mut results = Vec::with_capacity(scored.len());
        for (_, mut item) in scored {
            let mut items = self.lock_class(item.class);
            if let Some(stored) = items.get_mut(&item.id) {
                stored.last_access = now;
            }
            item.last_access = now;
            results.push(item);
        }
        Ok(results)
    }

    /// Remove items whose `ttl` or the global `max_age` has elapsed.
    /// Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut removed = 0;
        for class in MemoryClass::ALL {
            let mut items = self.lock_class(class);
            let before = items.len();
            items.retain(|_, item| !self.is_expired(item, now));
            removed += before - items.len();
        }
        if removed > 0 {
            tracing::debug!(removed, "memory cleanup removed expired items");
        }
        removed
    }

    /// Shrink every class by 10% of its current count via the eviction
    /// rule. Returns the evicted items.
    pub fn handle_pressure(&self) -> Vec<MemoryItem> {
        let mut evicted = Vec::new();
        for class in MemoryClass::ALL {
            let mut items = self.lock_class(class);
            let target = items.len() / 10;
            for _ in 0..target {
                if let Some(item) = evict_one(&mut items) {
                    evicted.push(item);
                }
            }
        }
        if !evicted.is_empty() {
            tracing::warn!(evicted = evicted.len(), "memory pressure sweep");
        }
        evicted
    }

    /// Item count for one class.
    pub fn count(&self, class: MemoryClass) -> usize {
        self.lock_class(class).len()
    }

    /// Total item count across classes.
    pub fn total(&self) -> usize {
        MemoryClass::ALL.iter().map(|c| self.count(*c)).sum()
    }

    /// Fetch one item by id without touching `last_access`.
    pub fn get(&self, class: MemoryClass, id: &str) -> Option<MemoryItem> {
        self.lock_class(class).get(id).cloned()
    }

    /// The configuration.
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn lock_class(&self, class: MemoryClass) -> std::sync::MutexGuard<'_, HashMap<String, MemoryItem>> {
        self.classes
            .get(&class)
            .expect("all classes initialized at construction")
            .lock()
            .expect("memory class lock")
    }

    fn is_expired(&self, item: &MemoryItem, now: u64) -> bool {
        let age = now.saturating_sub(item.created_at);
        if let Some(ttl) = item.ttl {
            if age >= ttl.as_millis() {
                return true;
            }
        }
        if let Some(max_age) = self.config.max_age {
            if age >= max_age.as_millis() {
                return true;
            }
        }
        false
    }
}

/// Remove and return the eviction victim: lowest importance, oldest
/// `last_access` on ties, lexicographic id as the final tie-break so the
/// choice is deterministic.
fn evict_one(items: &mut HashMap<String, MemoryItem>) -> Option<MemoryItem> {
    let victim_id = items
        .values()
        .min_by(|a, b| {
            a.importance
                .partial_cmp(&b.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.last_access.cmp(&b.last_access))
                .then_with(|| a.id.cmp(&b.id))
        })?
        .id
        .clone();
    items.remove(&victim_id)
}
