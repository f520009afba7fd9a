//! Immutable assessment snapshots.
//!
//! A node never mutates a snapshot after handing it out. Every recalculation
//! clones the previous snapshot, applies the new values, and commits the
//! result as a fresh `Arc`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AssessmentLevel, NodeKind, NodeState, NodeView};

/// Point-in-time assessment of one Task, Concept or IntermediateConcept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAssessment {
    pub node_id: u32,
    pub course_node_id: Uuid,
    pub name: String,
    pub kind: NodeKind,
    pub level: AssessmentLevel,
    pub state: NodeState,
    pub timestamp: DateTime<Utc>,
    pub confidence: f32,
    pub competence: f32,
    pub trend: f32,
    pub priority: Option<i32>,
    pub evaluator: Option<String>,
    pub observer_comment: Option<String>,
    pub observer_media: Option<String>,
    pub explanations: Vec<String>,
    /// Course node ids of the child Concepts (empty for leaf Concepts).
    pub children: Vec<Uuid>,
    pub difficulty: Option<f64>,
    pub difficulty_reason: Option<String>,
    pub stress: Option<f64>,
    pub stress_reason: Option<String>,
    pub scenario_support: bool,
    pub course_concept: bool,
}

impl NodeAssessment {
    /// Initial snapshot of a freshly constructed node.
    pub fn initial(view: &NodeView, children: Vec<Uuid>, priority: Option<i32>) -> Self {
        Self {
            node_id: view.node_id,
            course_node_id: view.course_node_id,
            name: view.name.clone(),
            kind: view.kind,
            level: AssessmentLevel::Unknown,
            state: NodeState::Unstarted,
            timestamp: Utc::now(),
            confidence: 1.0,
            competence: 1.0,
            trend: 0.0,
            priority,
            evaluator: None,
            observer_comment: None,
            observer_media: None,
            explanations: Vec::new(),
            children,
            difficulty: None,
            difficulty_reason: None,
            stress: None,
            stress_reason: None,
            scenario_support: false,
            course_concept: false,
        }
    }

    /// Whether the values an observer cares about differ from `other`.
    ///
    /// Timestamps and free-text fields are ignored so that a recalculation
    /// producing identical metrics is not reported as a change.
    pub fn differs_from(&self, other: &NodeAssessment) -> bool {
        self.level != other.level
            || self.state != other.state
            || (self.confidence - other.confidence).abs() > f32::EPSILON
            || (self.competence - other.competence).abs() > f32::EPSILON
            || (self.trend - other.trend).abs() > f32::EPSILON
            || self.priority != other.priority
            || self.stress != other.stress
            || self.difficulty != other.difficulty
            || self.evaluator != other.evaluator
            || self.observer_comment != other.observer_comment
    }
}

/// Aggregate assessment of a whole scenario: one snapshot per root Task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAssessment {
    pub scenario: String,
    pub tasks: Vec<NodeAssessment>,
    pub evaluator: Option<String>,
    pub observer_comment: Option<String>,
    pub observer_media: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceAssessment {
    /// Find a task snapshot by name, ignoring case.
    pub fn task(&self, name: &str) -> Option<&NodeAssessment> {
        self.tasks.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

/// Per-node slot holding the current snapshot.
///
/// Once retired the slot refuses commits, so a late recalculation racing
/// with cleanup cannot resurrect a dead node's assessment.
#[derive(Debug)]
pub(crate) struct SnapshotSlot {
    current: Option<Arc<NodeAssessment>>,
}

impl SnapshotSlot {
    pub(crate) fn new(initial: NodeAssessment) -> Self {
        Self {
            current: Some(Arc::new(initial)),
        }
    }

    pub(crate) fn get(&self) -> Option<&Arc<NodeAssessment>> {
        self.current.as_ref()
    }

    pub(crate) fn level(&self) -> AssessmentLevel {
        self.current
            .as_ref()
            .map_or(AssessmentLevel::Unknown, |s| s.level)
    }

    /// Build the next snapshot from the current one.
    ///
    /// Returns `None` if the slot is retired.
    pub(crate) fn next(&self) -> Option<NodeAssessment> {
        self.current.as_ref().map(|s| {
            let mut next = (**s).clone();
            next.timestamp = Utc::now();
            next
        })
    }

    /// Replace the current snapshot if `next` actually differs.
    ///
    /// Returns the committed snapshot, or `None` when nothing changed or the
    /// slot is retired.
    pub(crate) fn commit(&mut self, next: NodeAssessment) -> Option<Arc<NodeAssessment>> {
        let current = self.current.as_ref()?;
        if !next.differs_from(current) {
            return None;
        }
        let next = Arc::new(next);
        self.current = Some(Arc::clone(&next));
        Some(next)
    }

    /// Replace the current snapshot even when the metrics are unchanged.
    pub(crate) fn force(&mut self, next: NodeAssessment) -> Option<Arc<NodeAssessment>> {
        self.current.as_ref()?;
        let next = Arc::new(next);
        self.current = Some(Arc::clone(&next));
        Some(next)
    }

    pub(crate) fn retire(&mut self) {
        self.current = None;
    }
}
