use meridian_common::TargetCluster;

use crate::helper::UndesiredClusterReport;

/// One undesired cluster clamped down to its ready replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demotion {
    pub cluster: String,
    pub from: u32,
    pub to: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rebalance {
    pub clusters: Vec<TargetCluster>,
    /// Replicas taken off undesired clusters and added to the target.
    pub moved: u32,
    /// In assignment order.
    pub demotions: Vec<Demotion>,
}

/// Move the replicas undesired clusters cannot run onto `target`.
///
/// Every assignment listed in `report` is set to its ready count and the
/// difference is added to `target`, so the total replica count is unchanged.
/// Entries whose ready count is not below the assigned count move nothing.
pub fn rebalance(
    assignments: &[TargetCluster],
    report: &UndesiredClusterReport,
    target: &str,
) -> Rebalance {
    let mut clusters = assignments.to_vec();
    let mut moved: u32 = 0;
    let mut demotions = Vec::new();

    for assignment in clusters.iter_mut() {
        let Some(info) = report.get(&assignment.name) else {
            continue;
        };
        let shed = info.spec.saturating_sub(info.ready);
        if shed == 0 {
            continue;
        }
        assignment.replicas = info.ready;
        moved = moved.saturating_add(shed);
        demotions.push(Demotion {
            cluster: assignment.name.clone(),
            from: info.spec,
            to: info.ready,
        });
    }

    if moved > 0 {
        match clusters.iter_mut().find(|c| c.name == target) {
            Some(c) => c.replicas = c.replicas.saturating_add(moved),
            None => clusters.push(TargetCluster {
                name: target.to_string(),
                replicas: moved,
            }),
        }
    }

    Rebalance {
        clusters,
        moved,
        demotions,
    }
}
