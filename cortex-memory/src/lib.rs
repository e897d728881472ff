#![deny(missing_docs)]
//! Bounded agent memory.
//!
//! Four classes — short-term, long-term, episodic, semantic — each with an
//! independent cap. When a class is full the least important item goes,
//! oldest last-access breaking ties. Retrieval ranks by a weighted blend of
//! similarity, importance, and recency; without an [`Embedder`] the
//! similarity term falls back to keyword overlap.
//!
//! Memory is owned by exactly one agent. There is no sharing and therefore
//! no cross-agent locking: a plain mutex per class serializes concurrent
//! store/retrieve, and no lock is ever held across an await.

pub mod item;
pub mod score;
pub mod snapshot;
pub mod store;

pub use item::{MemoryClass, MemoryItem};
pub use score::ScoringWeights;
pub use snapshot::SCHEMA_VERSION;
pub use store::{BoundedMemory, Embedder, MemoryConfig, StoreOutcome};
