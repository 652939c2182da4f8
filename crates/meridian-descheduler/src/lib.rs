pub mod events;
pub mod helper;
pub mod metrics;
pub mod rebalance;
pub mod recalibrate;
pub mod reconcile;
pub mod schedule_state;
pub mod selector;
pub mod store;
pub mod util;

pub use events::{EventRecorder, MemoryEventRecorder, TracingEventRecorder};
pub use helper::{AggregatedStatusHelper, SchedulingResultHelper, UndesiredClusterInfo, UndesiredClusterReport};
pub use recalibrate::{CycleOutcome, Descheduler, RecalError, SweepSummary};
pub use schedule_state::{ScheduleState, CLUSTER_ORDER_KEY};
pub use selector::{select, Selection, TARGET_COOLDOWN_SECS};
pub use store::{BindingStore, MetaBindingStore, StoreError};
