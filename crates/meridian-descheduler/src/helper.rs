//! Scheduling-result view of a binding: which clusters may host it, and which
//! of those cannot keep up with their assigned replica count.

use std::collections::{BTreeMap, BTreeSet};

use meridian_common::Binding;

/// Assigned vs. ready replicas for a cluster that fell behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndesiredClusterInfo {
    pub spec: u32,
    pub ready: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndesiredClusterReport {
    pub infos: BTreeMap<String, UndesiredClusterInfo>,
    /// Same clusters as `infos`, in binding order.
    pub names: Vec<String>,
}

impl UndesiredClusterReport {
    pub fn insert(&mut self, cluster: impl Into<String>, spec: u32, ready: u32) {
        let cluster = cluster.into();
        if self
            .infos
            .insert(cluster.clone(), UndesiredClusterInfo { spec, ready })
            .is_none()
        {
            self.names.push(cluster);
        }
    }

    pub fn get(&self, cluster: &str) -> Option<&UndesiredClusterInfo> {
        self.infos.get(cluster)
    }

    pub fn name_set(&self) -> BTreeSet<String> {
        self.infos.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

pub trait SchedulingResultHelper: Send + Sync {
    fn undesired_clusters(&self, binding: &Binding) -> UndesiredClusterReport;
    fn eligible_clusters(&self, binding: &Binding) -> BTreeSet<String>;
}

/// Derives the report from the binding's own aggregated status.
///
/// Eligible clusters are the binding's target clusters. A target cluster is
/// undesired when it reports fewer ready replicas than assigned. Status only
/// counts when it was observed against the current assignment: clusters that
/// have not reported yet, or whose report predates the last reassignment, are
/// left alone until they report again.
#[derive(Debug, Default, Clone, Copy)]
pub struct AggregatedStatusHelper;

impl SchedulingResultHelper for AggregatedStatusHelper {
    fn undesired_clusters(&self, binding: &Binding) -> UndesiredClusterReport {
        let mut report = UndesiredClusterReport::default();
        for target in &binding.clusters {
            let Some(status) = binding.status_of(&target.name) else {
                continue;
            };
            if status.observed_replicas != target.replicas {
                continue;
            }
            if status.ready_replicas < target.replicas {
                report.insert(target.name.clone(), target.replicas, status.ready_replicas);
            }
        }
        report
    }

    fn eligible_clusters(&self, binding: &Binding) -> BTreeSet<String> {
        binding.clusters.iter().map(|c| c.name.clone()).collect()
    }
}
