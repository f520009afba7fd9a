//! Shared value types: assessment levels, node states, inbound messages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Graded performance outcome of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentLevel {
    /// No evidence yet, or the node's children are all unknown.
    #[default]
    Unknown,
    BelowExpectation,
    AtExpectation,
    AboveExpectation,
}

impl AssessmentLevel {
    /// Numeric score used by the default performance aggregation.
    ///
    /// `Unknown` has no score and is excluded from weighting.
    pub fn score(self) -> Option<f64> {
        match self {
            Self::Unknown => None,
            Self::BelowExpectation => Some(0.0),
            Self::AtExpectation => Some(2.0),
            Self::AboveExpectation => Some(4.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::BelowExpectation => "below_expectation",
            Self::AtExpectation => "at_expectation",
            Self::AboveExpectation => "above_expectation",
        }
    }
}

impl fmt::Display for AssessmentLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state recorded on an assessment snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Initialized but never activated.
    #[default]
    Unstarted,
    Active,
    /// Stopped without finishing (scenario ended around it).
    Deactivated,
    Finished,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unstarted => "unstarted",
            Self::Active => "active",
            Self::Deactivated => "deactivated",
            Self::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// What kind of hierarchy node a view or snapshot describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Task,
    Concept,
    IntermediateConcept,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Task => "task",
            Self::Concept => "concept",
            Self::IntermediateConcept => "intermediate concept",
        };
        f.write_str(s)
    }
}

/// Cheap copy of a node's identity and lifecycle flags.
///
/// Views are handed to triggers and lifecycle callbacks so that neither
/// needs to reach back into the hierarchy while a lock is held.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeView {
    pub node_id: u32,
    pub course_node_id: Uuid,
    pub name: String,
    pub kind: NodeKind,
    pub active: bool,
    pub finished: bool,
    pub level: AssessmentLevel,
}

/// Type of an inbound simulation message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    EntityState,
    Detonation,
    WeaponFire,
    Collision,
    LearnerAction,
    VariableState,
    TrainingAppState,
    /// The training application stopped unexpectedly.
    TrainingAppStopped,
    Custom(String),
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntityState => f.write_str("entity_state"),
            Self::Detonation => f.write_str("detonation"),
            Self::WeaponFire => f.write_str("weapon_fire"),
            Self::Collision => f.write_str("collision"),
            Self::LearnerAction => f.write_str("learner_action"),
            Self::VariableState => f.write_str("variable_state"),
            Self::TrainingAppState => f.write_str("training_app_state"),
            Self::TrainingAppStopped => f.write_str("training_app_stopped"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// A single inbound simulation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationMessage {
    pub message_type: MessageType,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl SimulationMessage {
    pub fn new(message_type: MessageType, payload: serde_json::Value) -> Self {
        Self {
            message_type,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// A pedagogical strategy that the surrounding system applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyApplied {
    pub strategy_name: String,
    /// Course node ids (as strings) of the tasks the strategy targets.
    /// Empty means every active task.
    pub applied_to: Vec<String>,
    pub stress: Option<f64>,
    pub difficulty: Option<f64>,
}

impl StrategyApplied {
    pub fn new(strategy_name: impl Into<String>) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            ..Self::default()
        }
    }
}

/// Manual assessment change requested by a human observer.
///
/// `node_name` of `None` addresses the scenario as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorUpdateRequest {
    pub node_name: Option<String>,
    /// `Active` requests a manual start, `Finished` a manual end.
    pub state: Option<NodeState>,
    pub performance: Option<AssessmentLevel>,
    pub confidence: Option<f32>,
    pub competence: Option<f32>,
    pub trend: Option<f32>,
    pub priority: Option<i32>,
    pub evaluator: Option<String>,
    pub reason: Option<String>,
    pub media: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl EvaluatorUpdateRequest {
    pub fn for_node(name: impl Into<String>) -> Self {
        Self {
            node_name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_performance(mut self, level: AssessmentLevel) -> Self {
        self.performance = Some(level);
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: NodeState) -> Self {
        self.state = Some(state);
        self
    }

    #[must_use]
    pub fn with_evaluator(mut self, evaluator: impl Into<String>) -> Self {
        self.evaluator = Some(evaluator.into());
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Assessment extracted from a conversation with the learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationAssessment {
    pub node_name: String,
    pub level: AssessmentLevel,
    pub confidence: f32,
}

/// Message the surrounding system should present to the learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainAction {
    pub message: String,
}

impl DomainAction {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Request a condition makes for extra training-application information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingAppRequest {
    pub requester: String,
    pub request: serde_json::Value,
}

/// Why a scenario ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// Every task finished, or a scenario end trigger fired.
    LessonRule,
    /// The controlling module ended the session (including auto-complete).
    ControllerEnded,
    /// The learner stopped the session.
    LearnerEnded,
    Error,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LessonRule => "lesson rule",
            Self::ControllerEnded => "controller ended",
            Self::LearnerEnded => "learner ended",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_scores() {
        assert_eq!(AssessmentLevel::Unknown.score(), None);
        assert_eq!(AssessmentLevel::BelowExpectation.score(), Some(0.0));
        assert_eq!(AssessmentLevel::AtExpectation.score(), Some(2.0));
        assert_eq!(AssessmentLevel::AboveExpectation.score(), Some(4.0));
    }

    #[test]
    fn message_deserializes_without_timestamp() {
        let json = r#"{"message_type":"entity_state","payload":{"speed":12.5}}"#;
        let msg: SimulationMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.message_type, MessageType::EntityState);
        assert_eq!(msg.payload["speed"], 12.5);
    }

    #[test]
    fn custom_message_type_round_trips_through_json() {
        let json = r#"{"custom":"radio_call"}"#;
        let ty: MessageType = serde_json::from_str(json).unwrap();
        assert_eq!(ty, MessageType::Custom("radio_call".into()));
        assert_eq!(ty.to_string(), "custom:radio_call");
    }

    #[test]
    fn evaluator_request_builder() {
        let req = EvaluatorUpdateRequest::for_node("Maintain speed")
            .with_performance(AssessmentLevel::BelowExpectation)
            .with_evaluator("observer-1");
        assert_eq!(req.node_name.as_deref(), Some("Maintain speed"));
        assert_eq!(req.performance, Some(AssessmentLevel::BelowExpectation));
        assert_eq!(req.evaluator.as_deref(), Some("observer-1"));
        assert!(req.state.is_none());
    }
}
