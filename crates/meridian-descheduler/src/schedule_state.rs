//! Per-cluster "last chosen as descheduling target" timestamps, persisted as a
//! JSON annotation on the binding.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Annotation key holding the encoded [`ScheduleState`].
pub const CLUSTER_ORDER_KEY: &str = "cluster-order";

#[derive(Debug, Serialize, Deserialize)]
struct ScheduleRecord {
    clusters: Vec<ClusterTime>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClusterTime {
    cluster: String,
    time: i64,
}

/// Unix timestamp (seconds) at which each cluster last received descheduled replicas.
/// Clusters without an entry count as timestamp 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleState {
    last_chosen: BTreeMap<String, i64>,
}

impl ScheduleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode an annotation value. Empty or malformed input yields an empty state.
    pub fn decode(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::new();
        }

        let record: ScheduleRecord = match serde_json::from_str(raw) {
            Ok(r) => r,
            Err(e) => {
                debug!(error=%e, raw, "discarding unreadable schedule state");
                return Self::new();
            }
        };

        Self {
            last_chosen: record
                .clusters
                .into_iter()
                .map(|c| (c.cluster, c.time))
                .collect(),
        }
    }

    /// Encode as `{"clusters":[{"cluster":..,"time":..},..]}`, entries sorted by cluster name.
    pub fn encode(&self) -> String {
        let record = ScheduleRecord {
            clusters: self
                .last_chosen
                .iter()
                .map(|(cluster, time)| ClusterTime {
                    cluster: cluster.clone(),
                    time: *time,
                })
                .collect(),
        };
        // a Vec of plain structs always serializes
        serde_json::to_string(&record).unwrap_or_default()
    }

    pub fn last_chosen(&self, cluster: &str) -> i64 {
        self.last_chosen.get(cluster).copied().unwrap_or(0)
    }

    pub fn contains(&self, cluster: &str) -> bool {
        self.last_chosen.contains_key(cluster)
    }

    pub fn touch(&mut self, cluster: &str, now: i64) {
        self.last_chosen.insert(cluster.to_string(), now);
    }

    /// Add a zero entry for every eligible cluster not yet tracked.
    pub fn seed(&mut self, eligible: &BTreeSet<String>) {
        for cluster in eligible {
            self.last_chosen.entry(cluster.clone()).or_insert(0);
        }
    }

    /// Forget clusters that are no longer eligible.
    pub fn retain_eligible(&mut self, eligible: &BTreeSet<String>) {
        self.last_chosen.retain(|cluster, _| eligible.contains(cluster));
    }

    /// Tracked cluster names in lexicographic order.
    pub fn clusters(&self) -> impl Iterator<Item = &str> {
        self.last_chosen.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.last_chosen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_chosen.is_empty()
    }
}

impl FromIterator<(String, i64)> for ScheduleState {
    fn from_iter<T: IntoIterator<Item = (String, i64)>>(iter: T) -> Self {
        Self {
            last_chosen: iter.into_iter().collect(),
        }
    }
}
