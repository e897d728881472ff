//! Memory items and classes.

use cortex_types::DurationMs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The four memory classes. A stored item's class never changes; moving
/// content between classes means storing a new item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryClass {
    /// Working memory for the current conversation window.
    Short,
    /// Durable facts and preferences.
    Long,
    /// Records of past task outcomes.
    Episodic,
    /// Distilled knowledge, usually embedded.
    Semantic,
}

impl MemoryClass {
    /// All classes, in a fixed order used for lock acquisition and
    /// pressure sweeps.
    pub const ALL: [MemoryClass; 4] = [
        MemoryClass::Short,
        MemoryClass::Long,
        MemoryClass::Episodic,
        MemoryClass::Semantic,
    ];
}

impl std::fmt::Display for MemoryClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Short => f.write_str("short"),
            Self::Long => f.write_str("long"),
            Self::Episodic => f.write_str("episodic"),
            Self::Semantic => f.write_str("semantic"),
        }
    }
}

/// One memory. `created_at` / `last_access` are monotonic process-clock
/// milliseconds, assigned by the store (callers leave them zero).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique id within the owning memory.
    pub id: String,
    /// Class; immutable after store.
    pub class: MemoryClass,
    /// The remembered content.
    pub content: String,
    /// Retention weight in [0, 1]; clamped on store.
    pub importance: f64,
    /// Free-form tags, used by keyword retrieval.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Clock milliseconds at store time.
    #[serde(default)]
    pub created_at: u64,
    /// Clock milliseconds at the most recent retrieval that returned it.
    #[serde(default)]
    pub last_access: u64,
    /// Per-item time to live; `None` falls back to the store's `max_age`.
    #[serde(default)]
    pub ttl: Option<DurationMs>,
    /// Embedding vector, computed at store time when an embedder is
    /// attached. Not serialized into snapshots (it is derived data).
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl MemoryItem {
    /// Create an item with importance 0.5 and no tags.
    pub fn new(id: impl Into<String>, class: MemoryClass, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class,
            content: content.into(),
            importance: 0.5,
            tags: BTreeSet::new(),
            created_at: 0,
            last_access: 0,
            ttl: None,
            embedding: None,
        }
    }

    /// Set importance (clamped to [0, 1] on store).
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Set a time to live.
    pub fn with_ttl(mut self, ttl: DurationMs) -> Self {
        self.ttl = Some(ttl);
        self
    }
}
