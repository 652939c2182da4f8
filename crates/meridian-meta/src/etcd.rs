use std::sync::Arc;

use anyhow::Result;
use etcd_client::{Client, Compare, CompareOp, EventType, GetOptions, Txn, TxnOp, WatchOptions};
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;

use crate::types::{CasOutcome, KeyValue, MetaStore, WatchEvent, WatchStream};

#[derive(Clone)]
pub struct EtcdMetaStore {
    client: Arc<Mutex<Client>>,
}

impl EtcdMetaStore {
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let c = Client::connect(endpoints, None).await?;
        Ok(Self {
            client: Arc::new(Mutex::new(c)),
        })
    }

    fn to_key_value(kv: &etcd_client::KeyValue) -> KeyValue {
        KeyValue {
            key: String::from_utf8_lossy(kv.key()).to_string(),
            value: kv.value().to_vec(),
            mod_revision: kv.mod_revision() as u64,
        }
    }
}

#[async_trait::async_trait]
impl MetaStore for EtcdMetaStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64> {
        let mut cli = self.client.lock().await;
        let resp = cli.put(key, value, None).await?;
        let rev = resp.header().map(|h| h.revision()).unwrap_or_default();
        Ok(rev as u64)
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let mut cli = self.client.lock().await;
        let resp = cli.get(key, None).await?;
        Ok(resp.kvs().first().map(Self::to_key_value))
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let mut cli = self.client.lock().await;
        let resp = cli.delete(key, None).await?;
        let rev = resp.header().map(|h| h.revision()).unwrap_or_default();
        Ok(rev as u64)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let mut cli = self.client.lock().await;
        let opts = GetOptions::new().with_prefix();
        let resp = cli.get(prefix, Some(opts)).await?;
        Ok(resp.kvs().iter().map(Self::to_key_value).collect())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: u64,
        value: Vec<u8>,
    ) -> Result<CasOutcome> {
        let mut cli = self.client.lock().await;

        // mod_revision of an absent key compares as 0
        let cmp = Compare::mod_revision(key, CompareOp::Equal, expected_revision as i64);
        let put = TxnOp::put(key, value, None);
        let get = TxnOp::get(key, None);
        let txn = Txn::new().when([cmp]).and_then([put]).or_else([get]);
        let resp = cli.txn(txn).await?;

        if resp.succeeded() {
            let rev = resp.header().map(|h| h.revision()).unwrap_or_default();
            return Ok(CasOutcome::Swapped(rev as u64));
        }

        let current = resp
            .op_responses()
            .into_iter()
            .find_map(|op| match op {
                etcd_client::TxnOpResponse::Get(get) => {
                    get.kvs().first().map(|kv| kv.mod_revision() as u64)
                }
                _ => None,
            })
            .unwrap_or(0);
        Ok(CasOutcome::Mismatch { current })
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision_exclusive: Option<u64>,
    ) -> Result<WatchStream> {
        let mut cli = self.client.lock().await;

        let mut opts = WatchOptions::new().with_prefix();
        if let Some(min_rev) = start_revision_exclusive {
            // etcd start_revision is inclusive
            opts = opts.with_start_revision((min_rev.saturating_add(1)) as i64);
        }

        let (watcher, mut stream) = cli.watch(prefix, Some(opts)).await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<WatchEvent>(1024);
        tokio::spawn(async move {
            // dropping the watcher cancels the watch
            let _watcher = watcher;
            while let Some(item) = stream.message().await.transpose() {
                let Ok(resp) = item else { return };

                for ev in resp.events() {
                    let Some(kv) = ev.kv() else { continue };
                    let value = match ev.event_type() {
                        EventType::Put => Some(kv.value().to_vec()),
                        EventType::Delete => None,
                    };
                    let event = WatchEvent {
                        key: String::from_utf8_lossy(kv.key()).to_string(),
                        value,
                        revision: kv.mod_revision() as u64,
                    };
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
