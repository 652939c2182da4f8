use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use crate::types::{CasOutcome, KeyValue, MetaStore, WatchEvent, WatchStream};

/// In-process `MetaStore` with the same revision semantics as etcd.
/// Used by tests and `--store memory` runs.
#[derive(Debug, Clone)]
pub struct MemoryMetaStore {
    inner: Arc<RwLock<Inner>>,
    tx: broadcast::Sender<WatchEvent>,
}

#[derive(Debug, Default)]
struct Inner {
    revision: u64,
    kv: BTreeMap<String, (Vec<u8>, u64)>,
}

impl Inner {
    fn apply_put(&mut self, key: &str, value: Vec<u8>) -> WatchEvent {
        self.revision = self.revision.saturating_add(1);
        self.kv.insert(key.to_string(), (value.clone(), self.revision));
        WatchEvent {
            key: key.to_string(),
            value: Some(value),
            revision: self.revision,
        }
    }

    fn mod_revision(&self, key: &str) -> u64 {
        self.kv.get(key).map(|(_, rev)| *rev).unwrap_or(0)
    }
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            tx,
        }
    }

    fn emit(&self, event: WatchEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for MemoryMetaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MetaStore for MemoryMetaStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64> {
        let event = self.inner.write().await.apply_put(key, value);
        let rev = event.revision;
        self.emit(event);
        Ok(rev)
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let inner = self.inner.read().await;
        Ok(inner.kv.get(key).map(|(v, rev)| KeyValue {
            key: key.to_string(),
            value: v.clone(),
            mod_revision: *rev,
        }))
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let event = {
            let mut inner = self.inner.write().await;
            if inner.kv.remove(key).is_none() {
                return Ok(inner.revision);
            }
            inner.revision = inner.revision.saturating_add(1);
            WatchEvent {
                key: key.to_string(),
                value: None,
                revision: inner.revision,
            }
        };
        let rev = event.revision;
        self.emit(event);
        Ok(rev)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let inner = self.inner.read().await;
        Ok(inner
            .kv
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, (v, rev))| KeyValue {
                key: k.clone(),
                value: v.clone(),
                mod_revision: *rev,
            })
            .collect())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: u64,
        value: Vec<u8>,
    ) -> Result<CasOutcome> {
        let event = {
            let mut inner = self.inner.write().await;
            let current = inner.mod_revision(key);
            if current != expected_revision {
                return Ok(CasOutcome::Mismatch { current });
            }
            inner.apply_put(key, value)
        };
        let rev = event.revision;
        self.emit(event);
        Ok(CasOutcome::Swapped(rev))
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision_exclusive: Option<u64>,
    ) -> Result<WatchStream> {
        let prefix = prefix.to_string();
        let min_rev = start_revision_exclusive.unwrap_or(0);
        let rx = self.tx.subscribe();
        let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
            Ok(ev) if ev.revision > min_rev && ev.key.starts_with(&prefix) => Some(ev),
            // lagged receivers drop events; the periodic resync covers the gap
            _ => None,
        });

        Ok(Box::pin(stream))
    }
}
