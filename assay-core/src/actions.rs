//! Callbacks from the engine to the surrounding system.

use crate::assessment::PerformanceAssessment;
use crate::types::{CompletionStatus, DomainAction, NodeView, TrainingAppRequest};

/// Lifecycle callbacks a scenario makes while it runs.
///
/// Every method has an empty default so implementors only override what
/// they observe. Callbacks are invoked from the message path and from the
/// trigger-event consumer, never while two task locks are held, and must not
/// block for long.
pub trait ScenarioActions: Send + Sync {
    /// A task or concept became active.
    fn node_started(&self, _node: &NodeView) {}

    /// A task or concept finished.
    fn node_ended(&self, _node: &NodeView) {}

    /// A concept's assessment changed.
    fn node_assessment_changed(&self, _node: &NodeView) {}

    /// The scenario-level aggregate changed.
    fn performance_assessment_updated(&self, _assessment: &PerformanceAssessment) {}

    /// The scenario reached its end state. Called exactly once.
    fn scenario_ended(&self, _status: CompletionStatus) {}

    /// Something went wrong that the session cannot recover from.
    fn fatal_error(&self, _reason: &str, _details: &str) {}

    /// Present a message to the learner.
    fn display_to_learner(&self, _action: &DomainAction) {}

    /// Ask the training application for additional information.
    fn training_app_request(&self, _request: &TrainingAppRequest) {}
}

/// Actions implementation that ignores everything.
#[derive(Debug, Default)]
pub struct NoopActions;

impl ScenarioActions for NoopActions {}
