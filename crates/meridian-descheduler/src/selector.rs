//! Picks the cluster that absorbs replicas shed by undesired clusters.

use std::collections::BTreeSet;

use tracing::debug;

use crate::schedule_state::ScheduleState;

/// Minimum time (seconds) between two selections of the same cluster.
pub const TARGET_COOLDOWN_SECS: i64 = 300; // 5 minutes

/// A chosen target together with the rotation state to persist for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub target: String,
    pub state: ScheduleState,
}

/// Choose the least-recently-chosen eligible cluster.
///
/// `history` is seeded with every eligible cluster (new clusters start at 0) and
/// pruned of clusters that left. Candidates are scanned in lexicographic order;
/// undesired clusters and clusters chosen less than [`TARGET_COOLDOWN_SECS`] before
/// `now` are skipped. The first survivor wins and is stamped with `now`.
///
/// Returns `None` when every cluster is filtered out; the history is dropped.
pub fn select(
    eligible: &BTreeSet<String>,
    mut history: ScheduleState,
    undesired: &BTreeSet<String>,
    now: i64,
) -> Option<Selection> {
    history.seed(eligible);
    history.retain_eligible(eligible);

    let target = history
        .clusters()
        .find(|cluster| {
            if undesired.contains(*cluster) {
                return false;
            }
            let age = now.saturating_sub(history.last_chosen(cluster));
            if age < TARGET_COOLDOWN_SECS {
                debug!(cluster, age_secs = age, "cluster still in target cooldown");
                return false;
            }
            true
        })?
        .to_string();

    history.touch(&target, now);
    Some(Selection {
        target,
        state: history,
    })
}
