pub mod binding;

pub use binding::{AggregatedStatusItem, Binding, BindingStatus, TargetCluster};

pub mod telemetry;
