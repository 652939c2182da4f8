//! One read-decide-apply pass over a single binding.
//!
//! A cycle loads the binding, asks the [`SchedulingResultHelper`] which clusters
//! are undesired, picks a target with [`select`], moves the shed replicas onto it
//! with [`rebalance`] and commits the binding together with the new rotation
//! state. The commit is guarded by the revision the binding was read at; a lost
//! race fails the cycle and the caller starts over from a fresh read.

use std::fmt::Write as _;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use meridian_common::Binding;

use crate::events::{Event, EventRecorder, EventType, REASON_DESCHEDULE_FAILED, REASON_DESCHEDULE_SUCCEEDED};
use crate::helper::SchedulingResultHelper;
use crate::metrics::SharedMetrics;
use crate::rebalance::{rebalance, Rebalance};
use crate::schedule_state::{ScheduleState, CLUSTER_ORDER_KEY};
use crate::selector::select;
use crate::store::{BindingStore, StoreError};

pub const DESCHEDULE_SUCCESS_MESSAGE: &str = "Binding has been descheduled";

#[derive(Debug, Error)]
pub enum RecalError {
    #[error("failed to load binding: {0}")]
    Load(#[source] StoreError),

    #[error("failed to commit descheduled binding: {0}")]
    Commit(#[source] StoreError),
}

impl RecalError {
    pub fn store_error(&self) -> &StoreError {
        match self {
            RecalError::Load(e) | RecalError::Commit(e) => e,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.store_error(), StoreError::Conflict { .. })
    }

    pub fn is_retryable(&self) -> bool {
        self.store_error().is_retryable()
    }
}

/// How a cycle ended. Only `Descheduled` wrote to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The binding no longer exists.
    BindingGone,
    /// Every eligible cluster is undesired or still cooling down.
    NoEligibleTarget,
    /// A target was available but no replicas needed to move.
    NothingToMove { target: String },
    Descheduled {
        target: String,
        moved: u32,
        message: String,
    },
}

/// Totals of one sweep over all bindings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub bindings: usize,
    pub descheduled: usize,
    pub errors: usize,
}

pub struct Descheduler<S, H, R> {
    store: S,
    helper: H,
    recorder: R,
    metrics: Arc<SharedMetrics>,
}

impl<S, H, R> Descheduler<S, H, R>
where
    S: BindingStore,
    H: SchedulingResultHelper,
    R: EventRecorder,
{
    pub fn new(store: S, helper: H, recorder: R, metrics: Arc<SharedMetrics>) -> Self {
        Self {
            store,
            helper,
            recorder,
            metrics,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one cycle for `namespace/name`. `now` is Unix seconds.
    pub async fn recalibrate(
        &self,
        namespace: &str,
        name: &str,
        now: i64,
    ) -> Result<CycleOutcome, RecalError> {
        let binding = match self.store.get(namespace, name).await {
            Ok(b) => b,
            Err(StoreError::NotFound { .. }) => {
                debug!(namespace, name, "binding gone, nothing to recalibrate");
                return Ok(CycleOutcome::BindingGone);
            }
            Err(e) => {
                SharedMetrics::inc(&self.metrics.cycle_errors_total);
                return Err(RecalError::Load(e));
            }
        };
        self.recalibrate_binding(binding, now).await
    }

    /// Run one cycle on an already loaded binding. The commit is checked against
    /// `binding.resource_version`.
    pub async fn recalibrate_binding(
        &self,
        binding: Binding,
        now: i64,
    ) -> Result<CycleOutcome, RecalError> {
        SharedMetrics::inc(&self.metrics.cycles_total);
        let reference = binding.reference();

        let report = self.helper.undesired_clusters(&binding);
        let eligible = self.helper.eligible_clusters(&binding);
        if !report.is_empty() {
            info!(binding=%reference, clusters=?report.names, "undesired clusters");
        }

        let old_state = binding.annotation(CLUSTER_ORDER_KEY).unwrap_or_default();
        let history = ScheduleState::decode(old_state);

        let Some(selection) = select(&eligible, history, &report.name_set(), now) else {
            debug!(binding=%reference, "no eligible target cluster, skipping");
            SharedMetrics::inc(&self.metrics.no_target_total);
            return Ok(CycleOutcome::NoEligibleTarget);
        };

        let plan = rebalance(&binding.clusters, &report, &selection.target);
        if plan.moved == 0 {
            return Ok(CycleOutcome::NothingToMove {
                target: selection.target,
            });
        }

        let new_state = selection.state.encode();
        info!(
            binding=%reference,
            target=%selection.target,
            old_state,
            new_state=%new_state,
            "descheduling"
        );

        let message = describe(&plan);
        let mut updated = binding.clone();
        updated.clusters = plan.clusters;
        updated
            .annotations
            .insert(CLUSTER_ORDER_KEY.to_string(), new_state);

        debug!(binding=%reference, message=%message, "committing descheduled binding");
        match self.store.update(updated).await {
            Ok(committed) => {
                self.recorder.record(Event {
                    object: reference,
                    event_type: EventType::Normal,
                    reason: REASON_DESCHEDULE_SUCCEEDED.to_string(),
                    message: message.clone(),
                });
                SharedMetrics::inc(&self.metrics.descheduled_total);
                self.metrics
                    .descheduled_replicas_total
                    .fetch_add(plan.moved as u64, Ordering::Relaxed);
                debug!(
                    binding=%committed.reference(),
                    revision=committed.resource_version,
                    "descheduled binding committed"
                );
                Ok(CycleOutcome::Descheduled {
                    target: selection.target,
                    moved: plan.moved,
                    message,
                })
            }
            Err(StoreError::NotFound { .. }) => {
                debug!(binding=%reference, "binding deleted before commit");
                Ok(CycleOutcome::BindingGone)
            }
            Err(e) => {
                self.recorder.record(Event {
                    object: reference,
                    event_type: EventType::Warning,
                    reason: REASON_DESCHEDULE_FAILED.to_string(),
                    message: e.to_string(),
                });
                SharedMetrics::inc(&self.metrics.cycle_errors_total);
                if matches!(e, StoreError::Conflict { .. }) {
                    SharedMetrics::inc(&self.metrics.conflicts_total);
                }
                Err(RecalError::Commit(e))
            }
        }
    }

    /// One cycle for every stored binding. Failures are logged and counted; the
    /// sweep only fails when the binding list itself cannot be read.
    pub async fn sweep(&self, now: i64) -> Result<SweepSummary, StoreError> {
        SharedMetrics::inc(&self.metrics.sweeps_total);
        let bindings = self.store.list().await?;

        let mut summary = SweepSummary {
            bindings: bindings.len(),
            ..Default::default()
        };
        for binding in bindings {
            let reference = binding.reference();
            match self.recalibrate_binding(binding, now).await {
                Ok(CycleOutcome::Descheduled { .. }) => summary.descheduled += 1,
                Ok(_) => {}
                Err(e) => {
                    summary.errors += 1;
                    warn!(binding=%reference, error=%e, retryable=e.is_retryable(), "recalibration failed");
                }
            }
        }
        Ok(summary)
    }
}

/// `"<base>, cluster a from 5 to 2, ..., 3 total descheduled replica(s)"`.
pub fn describe(plan: &Rebalance) -> String {
    let mut message = DESCHEDULE_SUCCESS_MESSAGE.to_string();
    for d in &plan.demotions {
        let _ = write!(message, ", cluster {} from {} to {}", d.cluster, d.from, d.to);
    }
    let _ = write!(message, ", {} total descheduled replica(s)", plan.moved);
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventRecorder;
    use crate::helper::AggregatedStatusHelper;
    use crate::selector::TARGET_COOLDOWN_SECS;
    use crate::store::{binding_key, MetaBindingStore};
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use meridian_common::{AggregatedStatusItem, TargetCluster};
    use meridian_meta::{CasOutcome, KeyValue, MemoryMetaStore, MetaStore, WatchStream};

    const NOW: i64 = 1_760_000_000;

    type TestDescheduler =
        Descheduler<MetaBindingStore<MemoryMetaStore>, AggregatedStatusHelper, Arc<MemoryEventRecorder>>;

    fn binding(targets: &[(&str, u32)], ready: &[(&str, u32)]) -> Binding {
        let mut b = Binding::new("default", "web");
        b.clusters = targets
            .iter()
            .map(|(n, r)| TargetCluster { name: n.to_string(), replicas: *r })
            .collect();
        let status = ready
            .iter()
            .map(|(n, r)| AggregatedStatusItem::new(*n, b.replicas_of(n).unwrap_or_default(), *r))
            .collect();
        b.status.aggregated_status = status;
        b
    }

    /// Memory store whose reads or revision-guarded writes can be switched to fail.
    #[derive(Default)]
    struct UnreachableMetaStore {
        inner: MemoryMetaStore,
        fail_get: AtomicBool,
        fail_cas: AtomicBool,
    }

    #[async_trait]
    impl MetaStore for UnreachableMetaStore {
        async fn put(&self, key: &str, value: Vec<u8>) -> anyhow::Result<u64> {
            self.inner.put(key, value).await
        }

        async fn get(&self, key: &str) -> anyhow::Result<Option<KeyValue>> {
            if self.fail_get.load(Ordering::SeqCst) {
                anyhow::bail!("etcd unavailable");
            }
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> anyhow::Result<u64> {
            self.inner.delete(key).await
        }

        async fn list_prefix(&self, prefix: &str) -> anyhow::Result<Vec<KeyValue>> {
            self.inner.list_prefix(prefix).await
        }

        async fn compare_and_swap(
            &self,
            key: &str,
            expected_revision: u64,
            value: Vec<u8>,
        ) -> anyhow::Result<CasOutcome> {
            if self.fail_cas.load(Ordering::SeqCst) {
                anyhow::bail!("etcd unavailable");
            }
            self.inner.compare_and_swap(key, expected_revision, value).await
        }

        async fn watch_prefix(
            &self,
            prefix: &str,
            start_revision_exclusive: Option<u64>,
        ) -> anyhow::Result<WatchStream> {
            self.inner.watch_prefix(prefix, start_revision_exclusive).await
        }
    }

    async fn setup_unreachable(
        b: &Binding,
    ) -> (
        Descheduler<MetaBindingStore<UnreachableMetaStore>, AggregatedStatusHelper, Arc<MemoryEventRecorder>>,
        Arc<MemoryEventRecorder>,
    ) {
        let store = MetaBindingStore::new(UnreachableMetaStore::default());
        store.put(b).await.unwrap();
        let recorder = Arc::new(MemoryEventRecorder::new());
        let d = Descheduler::new(
            store,
            AggregatedStatusHelper,
            recorder.clone(),
            Arc::new(SharedMetrics::default()),
        );
        (d, recorder)
    }

    async fn setup(b: &Binding) -> (TestDescheduler, Arc<MemoryEventRecorder>) {
        let store = MetaBindingStore::new(MemoryMetaStore::new());
        store.put(b).await.unwrap();
        let recorder = Arc::new(MemoryEventRecorder::new());
        let d = Descheduler::new(
            store,
            AggregatedStatusHelper,
            recorder.clone(),
            Arc::new(SharedMetrics::default()),
        );
        (d, recorder)
    }

    async fn raw_revision(d: &TestDescheduler) -> u64 {
        d.store()
            .meta()
            .get(&binding_key("default", "web"))
            .await
            .unwrap()
            .unwrap()
            .mod_revision
    }

    #[tokio::test]
    async fn test_moves_replicas_and_records_state() {
        let b = binding(&[("clusterA", 3), ("clusterB", 5)], &[("clusterA", 3), ("clusterB", 2)]);
        let (d, recorder) = setup(&b).await;

        let outcome = d.recalibrate("default", "web", NOW).await.unwrap();
        let expected_message =
            "Binding has been descheduled, cluster clusterB from 5 to 2, 3 total descheduled replica(s)";
        assert_eq!(
            outcome,
            CycleOutcome::Descheduled {
                target: "clusterA".to_string(),
                moved: 3,
                message: expected_message.to_string(),
            }
        );

        let stored = d.store().get("default", "web").await.unwrap();
        assert_eq!(stored.replicas_of("clusterA"), Some(6));
        assert_eq!(stored.replicas_of("clusterB"), Some(2));
        assert_eq!(stored.total_replicas(), b.total_replicas());

        let state = ScheduleState::decode(stored.annotation(CLUSTER_ORDER_KEY).unwrap());
        assert_eq!(state.last_chosen("clusterA"), NOW);
        assert_eq!(state.last_chosen("clusterB"), 0);

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Normal);
        assert_eq!(events[0].reason, REASON_DESCHEDULE_SUCCEEDED);
        assert_eq!(events[0].message, expected_message);
        assert_eq!(d.metrics.descheduled_replicas_total.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_cycle_after_commit_keeps_assignment() {
        let b = binding(&[("clusterA", 3), ("clusterB", 5)], &[("clusterA", 3), ("clusterB", 2)]);
        let (d, recorder) = setup(&b).await;

        let first = d.recalibrate("default", "web", NOW).await.unwrap();
        assert!(matches!(first, CycleOutcome::Descheduled { ref target, moved: 3, .. } if target == "clusterA"));
        let committed = raw_revision(&d).await;

        // member clusters have not reported against the new assignment yet
        let second = d.recalibrate("default", "web", NOW + 1).await.unwrap();
        assert!(matches!(
            second,
            CycleOutcome::NothingToMove { .. } | CycleOutcome::NoEligibleTarget
        ));

        let stored = d.store().get("default", "web").await.unwrap();
        assert_eq!(stored.replicas_of("clusterA"), Some(6));
        assert_eq!(stored.replicas_of("clusterB"), Some(2));
        assert_eq!(raw_revision(&d).await, committed);
        assert_eq!(recorder.events().len(), 1);
    }

    #[tokio::test]
    async fn test_load_transport_error_is_retryable() {
        let b = binding(&[("a", 4), ("b", 1)], &[("a", 1), ("b", 1)]);
        let (d, recorder) = setup_unreachable(&b).await;
        d.store().meta().fail_get.store(true, Ordering::SeqCst);

        let err = d.recalibrate("default", "web", NOW).await.unwrap_err();
        assert!(matches!(err, RecalError::Load(StoreError::Transport(_))));
        assert!(err.is_retryable());
        assert!(!err.is_conflict());
        assert!(recorder.events().is_empty());
        assert_eq!(d.metrics.cycle_errors_total.load(Ordering::Relaxed), 1);
        assert_eq!(d.metrics.cycles_total.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_commit_transport_error_records_warning() {
        let b = binding(&[("a", 4), ("b", 1)], &[("a", 1), ("b", 1)]);
        let (d, recorder) = setup_unreachable(&b).await;
        d.store().meta().fail_cas.store(true, Ordering::SeqCst);

        let err = d.recalibrate("default", "web", NOW).await.unwrap_err();
        assert!(matches!(err, RecalError::Commit(StoreError::Transport(_))));
        assert!(err.is_retryable());

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].object, "default/web");
        assert_eq!(events[0].event_type, EventType::Warning);
        assert_eq!(events[0].reason, REASON_DESCHEDULE_FAILED);
        assert_eq!(d.metrics.cycle_errors_total.load(Ordering::Relaxed), 1);
        assert_eq!(d.metrics.conflicts_total.load(Ordering::Relaxed), 0);

        // nothing was written and the store recovers on the next cycle
        d.store().meta().fail_cas.store(false, Ordering::SeqCst);
        let stored = d.store().get("default", "web").await.unwrap();
        assert_eq!(stored.replicas_of("a"), Some(4));
        let outcome = d.recalibrate("default", "web", NOW).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Descheduled { moved: 3, .. }));
    }

    #[tokio::test]
    async fn test_binding_deleted_before_commit_is_gone() {
        let b = binding(&[("a", 4), ("b", 1)], &[("a", 1), ("b", 1)]);
        let (d, recorder) = setup(&b).await;

        let loaded = d.store().get("default", "web").await.unwrap();
        d.store().meta().delete(&binding_key("default", "web")).await.unwrap();

        let outcome = d.recalibrate_binding(loaded, NOW).await.unwrap();
        assert_eq!(outcome, CycleOutcome::BindingGone);
        assert!(recorder.events().is_empty());
        assert_eq!(d.metrics.cycle_errors_total.load(Ordering::Relaxed), 0);
        assert!(d.store().meta().get(&binding_key("default", "web")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_target_does_not_write() {
        let mut b = binding(&[("a", 2), ("b", 2)], &[("a", 0), ("b", 2)]);
        let mut state = ScheduleState::new();
        state.touch("b", NOW - 10);
        b.annotations.insert(CLUSTER_ORDER_KEY.to_string(), state.encode());
        let (d, recorder) = setup(&b).await;
        let before = raw_revision(&d).await;

        for _ in 0..2 {
            let outcome = d.recalibrate("default", "web", NOW).await.unwrap();
            assert_eq!(outcome, CycleOutcome::NoEligibleTarget);
        }

        assert_eq!(raw_revision(&d).await, before);
        assert!(recorder.events().is_empty());
        assert_eq!(d.metrics.no_target_total.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_healthy_binding_is_untouched() {
        let b = binding(&[("a", 2), ("b", 1)], &[("a", 2), ("b", 1)]);
        let (d, recorder) = setup(&b).await;
        let before = raw_revision(&d).await;

        for _ in 0..2 {
            let outcome = d.recalibrate("default", "web", NOW).await.unwrap();
            assert_eq!(outcome, CycleOutcome::NothingToMove { target: "a".to_string() });
        }

        let stored = d.store().get("default", "web").await.unwrap();
        assert_eq!(raw_revision(&d).await, before);
        assert!(stored.annotation(CLUSTER_ORDER_KEY).is_none());
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_binding_is_not_an_error() {
        let b = binding(&[("a", 1)], &[]);
        let (d, _) = setup(&b).await;
        let outcome = d.recalibrate("default", "other", NOW).await.unwrap();
        assert_eq!(outcome, CycleOutcome::BindingGone);
    }

    #[tokio::test]
    async fn test_conflict_surfaces_and_keeps_state() {
        let b = binding(&[("a", 4), ("b", 1)], &[("a", 1), ("b", 1)]);
        let (d, recorder) = setup(&b).await;

        let stale = d.store().get("default", "web").await.unwrap();
        // concurrent writer bumps the revision
        d.store().put(&b).await.unwrap();

        let err = d.recalibrate_binding(stale, NOW).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(err.is_retryable());

        let stored = d.store().get("default", "web").await.unwrap();
        assert_eq!(stored.replicas_of("a"), Some(4));
        assert!(stored.annotation(CLUSTER_ORDER_KEY).is_none());

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Warning);
        assert_eq!(events[0].reason, REASON_DESCHEDULE_FAILED);
        assert_eq!(d.metrics.conflicts_total.load(Ordering::Relaxed), 1);

        // a fresh read succeeds
        let outcome = d.recalibrate("default", "web", NOW).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Descheduled { moved: 3, .. }));
    }

    #[tokio::test]
    async fn test_cooldown_rotates_targets() {
        let b = binding(
            &[("a", 3), ("b", 3), ("c", 3)],
            &[("a", 3), ("b", 3), ("c", 1)],
        );
        let (d, _) = setup(&b).await;

        let first = d.recalibrate("default", "web", NOW).await.unwrap();
        assert!(matches!(first, CycleOutcome::Descheduled { ref target, moved: 2, .. } if target == "a"));

        // "b" degrades a minute later while "a" is cooling down
        let mut degraded = d.store().get("default", "web").await.unwrap();
        degraded.status.aggregated_status = vec![
            AggregatedStatusItem::new("a", 5, 5),
            AggregatedStatusItem::new("b", 3, 0),
            AggregatedStatusItem::new("c", 1, 1),
        ];
        d.store().update(degraded).await.unwrap();

        let second = d.recalibrate("default", "web", NOW + 60).await.unwrap();
        assert!(matches!(second, CycleOutcome::Descheduled { ref target, moved: 3, .. } if target == "c"));

        let stored = d.store().get("default", "web").await.unwrap();
        assert_eq!(stored.replicas_of("a"), Some(5));
        assert_eq!(stored.replicas_of("b"), Some(0));
        assert_eq!(stored.replicas_of("c"), Some(4));
        assert_eq!(stored.total_replicas(), 9);

        let state = ScheduleState::decode(stored.annotation(CLUSTER_ORDER_KEY).unwrap());
        assert_eq!(state.last_chosen("a"), NOW);
        assert_eq!(state.last_chosen("c"), NOW + 60);
        assert!(NOW + 60 - state.last_chosen("a") < TARGET_COOLDOWN_SECS);
    }

    #[tokio::test]
    async fn test_sweep_counts_outcomes() {
        let store = MetaBindingStore::new(MemoryMetaStore::new());
        let mut sick = binding(&[("a", 2), ("b", 2)], &[("a", 2), ("b", 0)]);
        sick.name = "sick".to_string();
        let mut fine = binding(&[("a", 1)], &[("a", 1)]);
        fine.name = "fine".to_string();
        store.put(&sick).await.unwrap();
        store.put(&fine).await.unwrap();

        let d = Descheduler::new(
            store,
            AggregatedStatusHelper,
            MemoryEventRecorder::new(),
            Arc::new(SharedMetrics::default()),
        );
        let summary = d.sweep(NOW).await.unwrap();
        assert_eq!(
            summary,
            SweepSummary {
                bindings: 2,
                descheduled: 1,
                errors: 0
            }
        );
        assert_eq!(d.store().get("default", "sick").await.unwrap().replicas_of("a"), Some(4));
    }

    #[test]
    fn test_describe_lists_every_demotion() {
        let plan = Rebalance {
            clusters: Vec::new(),
            moved: 4,
            demotions: vec![
                crate::rebalance::Demotion { cluster: "x".to_string(), from: 3, to: 1 },
                crate::rebalance::Demotion { cluster: "y".to_string(), from: 2, to: 0 },
            ],
        };
        assert_eq!(
            describe(&plan),
            "Binding has been descheduled, cluster x from 3 to 1, cluster y from 2 to 0, 4 total descheduled replica(s)"
        );
    }
}
