//! Versioned JSON snapshots.
//!
//! Timestamps inside the store are process-monotonic milliseconds, which
//! mean nothing to another process. Snapshots therefore encode each item's
//! *age* and *idle time*; restore rebases them onto the restoring
//! process's clock. An unknown `schema_version` is refused rather than
//! guessed at.

use crate::item::MemoryItem;
use crate::store::BoundedMemory;
use cortex_types::{Component, Error, ErrorKind};
use serde::{Deserialize, Serialize};

/// The snapshot format version this build writes and accepts.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotItem {
    #[serde(flatten)]
    item: MemoryItem,
    age_ms: u64,
    idle_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    schema_version: u32,
    items: Vec<SnapshotItem>,
}

impl BoundedMemory {
    /// Serialize every stored item into a versioned JSON document.
    pub fn snapshot(&self) -> serde_json::Value {
        let now = self.clock.now_millis();
        let mut items = Vec::new();
        for store in self.classes.values() {
            let guard = store.lock().expect("memory class lock");
            for item in guard.values() {
                items.push(SnapshotItem {
                    age_ms: now.saturating_sub(item.created_at),
                    idle_ms: now.saturating_sub(item.last_access),
                    item: item.clone(),
                });
            }
        }
        // Stable output order for diffable snapshots.
        items.sort_by(|a, b| a.item.id.cmp(&b.item.id));
        serde_json::to_value(Snapshot {
            schema_version: SCHEMA_VERSION,
            items,
        })
        .unwrap_or(serde_json::Value::Null)
    }

    /// Load items from a snapshot document, rebasing ages onto this
    /// process's clock. Returns how many items were loaded. Refuses any
    /// `schema_version` other than [`SCHEMA_VERSION`].
    pub fn restore(&self, value: serde_json::Value) -> Result<usize, Error> {
        let snapshot: Snapshot = serde_json::from_value(value).map_err(|e| {
            Error::new(
                ErrorKind::InvalidRequest,
                Component::Memory,
                format!("malformed memory snapshot: {e}"),
            )
        })?;
        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(Error::new(
                ErrorKind::InvalidRequest,
                Component::Memory,
                format!(
                    "unknown snapshot schema version {} (this build reads {})",
                    snapshot.schema_version, SCHEMA_VERSION
                ),
            ));
        }

        let now = self.clock.now_millis();
        let mut loaded = 0;
        for entry in snapshot.items {
            let mut item = entry.item;
            item.created_at = now.saturating_sub(entry.age_ms);
            item.last_access = now.saturating_sub(entry.idle_ms);
            let mut guard = self
                .classes
                .get(&item.class)
                .expect("all classes initialized at construction")
                .lock()
                .expect("memory class lock");
            if guard.len() < self.config.cap(item.class) {
                guard.insert(item.id.clone(), item);
                loaded += 1;
            }
        }
        Ok(loaded)
    }
}
