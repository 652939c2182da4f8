use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A member cluster hosting part of a workload, with its assigned replica count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetCluster {
    pub name: String,
    pub replicas: u32,
}

/// Ready replica count reported back by one member cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregatedStatusItem {
    pub cluster_name: String,
    pub ready_replicas: u32,
    /// Assigned replica count the member cluster was running against when it
    /// reported. Differs from the current assignment until the cluster catches up.
    #[serde(default)]
    pub observed_replicas: u32,
}

impl AggregatedStatusItem {
    pub fn new(cluster_name: impl Into<String>, observed_replicas: u32, ready_replicas: u32) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            ready_replicas,
            observed_replicas,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindingStatus {
    #[serde(default)]
    pub aggregated_status: Vec<AggregatedStatusItem>,
}

/// Placement record of a workload across member clusters.
///
/// Stored under `/bindings/{namespace}/{name}`. The scheduler writes `clusters`
/// at admission; member clusters report back into `status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Binding {
    pub namespace: String,
    pub name: String,

    /// Per-cluster replica assignments. Cluster names are unique.
    #[serde(default)]
    pub clusters: Vec<TargetCluster>,

    /// Free-form metadata. The descheduler keeps its rotation state here.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub status: BindingStatus,

    /// Store revision this copy was read at. Checked on update, never persisted.
    #[serde(skip)]
    pub resource_version: u64,
}

impl Binding {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            clusters: Vec::new(),
            annotations: BTreeMap::new(),
            status: BindingStatus::default(),
            resource_version: 0,
        }
    }

    /// `namespace/name`, used in logs and events.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn total_replicas(&self) -> u64 {
        self.clusters.iter().map(|c| c.replicas as u64).sum()
    }

    pub fn replicas_of(&self, cluster: &str) -> Option<u32> {
        self.clusters
            .iter()
            .find(|c| c.name == cluster)
            .map(|c| c.replicas)
    }

    pub fn status_of(&self, cluster: &str) -> Option<&AggregatedStatusItem> {
        self.status
            .aggregated_status
            .iter()
            .find(|s| s.cluster_name == cluster)
    }

    pub fn ready_replicas_of(&self, cluster: &str) -> Option<u32> {
        self.status_of(cluster).map(|s| s.ready_replicas)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}
