use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};

/// A change to one key. `value` is `None` for deletions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: String,
    pub value: Option<Vec<u8>>,
    pub revision: u64,
}

pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;

/// A stored value together with the revision it was last modified at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    pub mod_revision: u64,
}

/// Result of a revision-guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write landed at this revision.
    Swapped(u64),
    /// The key was modified since `expected_revision`. `current` is 0 when the key is gone.
    Mismatch { current: u64 },
}

impl CasOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, CasOutcome::Swapped(_))
    }
}

/// Revisioned key/value store holding meridian's records.
///
/// Every write bumps a store-wide revision; a key's `mod_revision` is the revision
/// of its last write and doubles as its optimistic-concurrency token.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64>;
    async fn get(&self, key: &str) -> Result<Option<KeyValue>>;
    async fn delete(&self, key: &str) -> Result<u64>;
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    /// Write `value` only if the key's mod revision still equals `expected_revision`.
    /// An `expected_revision` of 0 means "only if absent".
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: u64,
        value: Vec<u8>,
    ) -> Result<CasOutcome>;

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision_exclusive: Option<u64>,
    ) -> Result<WatchStream>;
}
