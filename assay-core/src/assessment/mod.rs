//! Assessment snapshots, aggregation and publication.
//!
//! - [`NodeAssessment`] / [`PerformanceAssessment`]: immutable snapshots
//! - [`AggregationMetrics`]: pluggable child-to-parent aggregation
//! - [`AssessmentRegistry`] / [`AssessmentSink`]: per-session publication

mod metrics;
mod registry;
mod snapshot;

pub use metrics::{
    AT_EXPECTATION_UPPER_THRESHOLD, AggregationMetrics, BELOW_EXPECTATION_UPPER_THRESHOLD,
    ChildAssessment, DefaultMetrics,
};
pub use registry::{AssessmentRegistry, AssessmentSink, MemorySink, NullSink};
pub use snapshot::{NodeAssessment, PerformanceAssessment};

pub(crate) use snapshot::SnapshotSlot;
