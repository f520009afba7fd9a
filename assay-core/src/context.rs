//! Per-session collaborators shared by every node.

use std::sync::Arc;

use crate::actions::ScenarioActions;
use crate::assessment::{AggregationMetrics, AssessmentRegistry, ChildAssessment, NodeAssessment};
use crate::config::EngineConfig;
use crate::plugin;
use crate::queue::{EventSender, TriggerEvent};
use crate::scheduler::Scheduler;
use crate::types::AssessmentLevel;

use tracing::error;

/// Everything a node needs to talk to the rest of its session.
///
/// Created by `Scenario::initialize` and passed down by reference; nodes do
/// not hold on to it.
pub(crate) struct SessionContext {
    pub scenario: String,
    pub events: EventSender,
    pub scheduler: Arc<Scheduler>,
    pub registry: Arc<AssessmentRegistry>,
    pub metrics: Arc<dyn AggregationMetrics>,
    pub actions: Arc<dyn ScenarioActions>,
    pub config: EngineConfig,
}

/// Result of running the aggregation metrics over a node's children.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Aggregate {
    pub level: AssessmentLevel,
    pub confidence: f32,
    pub competence: f32,
    pub trend: f32,
    pub priority: Option<i32>,
}

impl Aggregate {
    /// Copy the aggregate into a snapshot, keeping `level` if overridden.
    pub(crate) fn apply(&self, next: &mut NodeAssessment, override_level: Option<AssessmentLevel>) {
        next.level = override_level.unwrap_or(self.level);
        next.confidence = self.confidence;
        next.competence = self.competence;
        next.trend = self.trend;
        next.priority = self.priority;
    }
}

impl SessionContext {
    pub(crate) fn send(&self, event: TriggerEvent) {
        self.events.add_event(event);
    }

    /// Run the session metrics, isolating a misbehaving implementation.
    pub(crate) fn aggregate(
        &self,
        node: &str,
        children: &[ChildAssessment],
        authored_priority: Option<i32>,
    ) -> Option<Aggregate> {
        let metrics = self.metrics.as_ref();
        let result = plugin::isolate_infallible("aggregation metrics", || Aggregate {
            level: metrics.performance(children),
            confidence: metrics.confidence(children),
            competence: metrics.competence(children),
            trend: metrics.trend(children),
            priority: metrics.priority(children, authored_priority),
        });
        match result {
            Ok(aggregate) => Some(aggregate),
            Err(e) => {
                error!(
                    node = %node,
                    error = %e,
                    "Aggregation metrics failed, keeping previous assessment"
                );
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::actions::NoopActions;
    use crate::assessment::{AssessmentSink, DefaultMetrics};
    use crate::queue::TriggerEventQueue;

    /// A context backed by an unstarted queue, for node-level unit tests.
    pub(crate) fn context(sink: Arc<dyn AssessmentSink>) -> (SessionContext, TriggerEventQueue) {
        let queue = TriggerEventQueue::new("test");
        let ctx = SessionContext {
            scenario: "test".into(),
            events: queue.sender(),
            scheduler: Arc::new(Scheduler::new("test")),
            registry: Arc::new(AssessmentRegistry::new(sink)),
            metrics: Arc::new(DefaultMetrics),
            actions: Arc::new(NoopActions),
            config: EngineConfig::default(),
        };
        (ctx, queue)
    }
}
