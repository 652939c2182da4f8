//! Typed access to binding records with optimistic concurrency.

use async_trait::async_trait;
use thiserror::Error;

use meridian_common::Binding;
use meridian_meta::{CasOutcome, MetaStore};

pub const BINDINGS_PREFIX: &str = "/bindings/";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("binding {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("binding {namespace}/{name} was modified concurrently (read at revision {expected}, now {current})")]
    Conflict {
        namespace: String,
        name: String,
        expected: u64,
        current: u64,
    },

    #[error("binding store unavailable: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("malformed binding record: {0}")]
    Codec(#[from] serde_json::Error),
}

impl StoreError {
    /// Conflicts and transport failures clear up on a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::Transport(_))
    }
}

pub fn binding_key(namespace: &str, name: &str) -> String {
    format!("{BINDINGS_PREFIX}{namespace}/{name}")
}

/// Split `/bindings/{namespace}/{name}` back into its parts.
pub fn parse_binding_key(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix(BINDINGS_PREFIX)?;
    let (namespace, name) = rest.split_once('/')?;
    if namespace.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((namespace, name))
}

#[async_trait]
pub trait BindingStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Binding, StoreError>;

    /// Write `binding` if the stored record is still at `binding.resource_version`.
    /// Returns the binding stamped with its new revision.
    async fn update(&self, binding: Binding) -> Result<Binding, StoreError>;

    async fn list(&self) -> Result<Vec<Binding>, StoreError>;
}

/// Bindings stored as JSON under [`BINDINGS_PREFIX`]; the key's mod revision is
/// the binding's resource version.
#[derive(Debug, Clone)]
pub struct MetaBindingStore<M> {
    meta: M,
}

impl<M: MetaStore> MetaBindingStore<M> {
    pub fn new(meta: M) -> Self {
        Self { meta }
    }

    pub fn meta(&self) -> &M {
        &self.meta
    }

    /// Unconditional write, used to seed records.
    pub async fn put(&self, binding: &Binding) -> Result<u64, StoreError> {
        let key = binding_key(&binding.namespace, &binding.name);
        let rev = self.meta.put(&key, serde_json::to_vec(binding)?).await?;
        Ok(rev)
    }
}

#[async_trait]
impl<M: MetaStore> BindingStore for MetaBindingStore<M> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Binding, StoreError> {
        let key = binding_key(namespace, name);
        let kv = self
            .meta
            .get(&key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        let mut binding: Binding = serde_json::from_slice(&kv.value)?;
        binding.resource_version = kv.mod_revision;
        Ok(binding)
    }

    async fn update(&self, mut binding: Binding) -> Result<Binding, StoreError> {
        let key = binding_key(&binding.namespace, &binding.name);
        let value = serde_json::to_vec(&binding)?;

        match self
            .meta
            .compare_and_swap(&key, binding.resource_version, value)
            .await?
        {
            CasOutcome::Swapped(rev) => {
                binding.resource_version = rev;
                Ok(binding)
            }
            CasOutcome::Mismatch { current: 0 } => Err(StoreError::NotFound {
                namespace: binding.namespace,
                name: binding.name,
            }),
            CasOutcome::Mismatch { current } => Err(StoreError::Conflict {
                expected: binding.resource_version,
                current,
                namespace: binding.namespace,
                name: binding.name,
            }),
        }
    }

    async fn list(&self) -> Result<Vec<Binding>, StoreError> {
        let kvs = self.meta.list_prefix(BINDINGS_PREFIX).await?;
        let mut out = Vec::with_capacity(kvs.len());
        for kv in kvs {
            match serde_json::from_slice::<Binding>(&kv.value) {
                Ok(mut b) => {
                    b.resource_version = kv.mod_revision;
                    out.push(b);
                }
                Err(e) => {
                    tracing::warn!(key=%kv.key, error=%e, "skipping malformed binding record");
                }
            }
        }
        Ok(out)
    }
}
