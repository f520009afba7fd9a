//! Start and end triggers.
//!
//! A trigger is a predicate over a [`Stimulus`]: an inbound message, a
//! concept or task whose state changed, or an applied strategy. Tasks keep
//! ordered lists of start and end triggers, the scenario a list of end
//! triggers. Lists are evaluated in authored order and the first trigger
//! that fires wins. A predicate that errors or panics is logged and treated
//! as not firing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::PluginError;
use crate::plugin;
use crate::types::{
    AssessmentLevel, DomainAction, MessageType, NodeView, SimulationMessage, StrategyApplied,
};

/// What a trigger is evaluated against.
#[derive(Debug, Clone, Copy)]
pub enum Stimulus<'a> {
    /// An inbound simulation message.
    Message(&'a SimulationMessage),
    /// A concept (at any depth) whose assessment or lifecycle changed.
    Concept(&'a NodeView),
    /// A task, as seen by the task with node id `observer`.
    ///
    /// A task evaluating its own start triggers at scenario start passes
    /// itself as both `task` and `observer`.
    Task { task: &'a NodeView, observer: u32 },
    /// A strategy the surrounding system applied.
    Strategy(&'a StrategyApplied),
}

/// Pluggable trigger predicate.
pub trait TriggerPredicate: Send + Sync + fmt::Debug {
    fn evaluate(&self, stimulus: &Stimulus<'_>) -> Result<bool, PluginError>;
}

/// The condition under which a trigger fires.
#[derive(Debug, Clone)]
pub enum TriggerKind {
    /// Fires when a task evaluates itself at scenario start.
    ScenarioStarted,
    /// Fires when the concept with this node id finishes.
    ConceptEnded { node_id: u32 },
    /// Fires when the nested concept with this node id finishes.
    ChildConceptEnded { node_id: u32 },
    /// Fires when the concept with this node id reaches `level`.
    ConceptAssessment { node_id: u32, level: AssessmentLevel },
    /// Fires when the task with this node id finishes.
    TaskEnded { node_id: u32 },
    /// Fires when a strategy with this name (case-insensitive) is applied.
    StrategyApplied { strategy: String },
    /// Fires on any message of this type.
    MessageReceived { message_type: MessageType },
    Custom(Arc<dyn TriggerPredicate>),
}

impl TriggerKind {
    fn describe(&self) -> String {
        match self {
            Self::ScenarioStarted => "scenario started".to_string(),
            Self::ConceptEnded { node_id } => format!("concept {node_id} ended"),
            Self::ChildConceptEnded { node_id } => format!("child concept {node_id} ended"),
            Self::ConceptAssessment { node_id, level } => {
                format!("concept {node_id} assessed {level}")
            }
            Self::TaskEnded { node_id } => format!("task {node_id} ended"),
            Self::StrategyApplied { strategy } => format!("strategy '{strategy}' applied"),
            Self::MessageReceived { message_type } => format!("{message_type} received"),
            Self::Custom(predicate) => format!("{predicate:?}"),
        }
    }

    /// Node id this trigger refers to, if any.
    pub fn referenced_node(&self) -> Option<u32> {
        match self {
            Self::ConceptEnded { node_id }
            | Self::ChildConceptEnded { node_id }
            | Self::ConceptAssessment { node_id, .. }
            | Self::TaskEnded { node_id } => Some(*node_id),
            _ => None,
        }
    }
}

/// A start or end trigger.
#[derive(Debug, Clone)]
pub struct Trigger {
    name: String,
    kind: TriggerKind,
    delay: Option<Duration>,
    domain_action: Option<DomainAction>,
    scenario_ending: bool,
}

impl Trigger {
    pub fn new(kind: TriggerKind) -> Self {
        Self {
            name: kind.describe(),
            kind,
            delay: None,
            domain_action: None,
            scenario_ending: false,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Apply the transition this long after the trigger fires.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Show this to the learner when the trigger is handled.
    #[must_use]
    pub fn with_domain_action(mut self, action: DomainAction) -> Self {
        self.domain_action = Some(action);
        self
    }

    /// A task end trigger that also ends the whole scenario.
    #[must_use]
    pub fn scenario_ending(mut self) -> Self {
        self.scenario_ending = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &TriggerKind {
        &self.kind
    }

    pub fn is_scenario_started(&self) -> bool {
        matches!(self.kind, TriggerKind::ScenarioStarted)
    }

    /// Whether this trigger fires for `stimulus`.
    pub fn evaluate(&self, stimulus: &Stimulus<'_>) -> Result<bool, PluginError> {
        let fired = match (&self.kind, stimulus) {
            (TriggerKind::ScenarioStarted, Stimulus::Task { task, observer }) => {
                task.node_id == *observer
            }
            (TriggerKind::ConceptEnded { node_id }, Stimulus::Concept(concept))
            | (TriggerKind::ChildConceptEnded { node_id }, Stimulus::Concept(concept)) => {
                concept.node_id == *node_id && concept.finished
            }
            (TriggerKind::ConceptAssessment { node_id, level }, Stimulus::Concept(concept)) => {
                concept.node_id == *node_id && concept.level == *level
            }
            (TriggerKind::TaskEnded { node_id }, Stimulus::Task { task, .. }) => {
                task.node_id == *node_id && task.finished
            }
            (TriggerKind::StrategyApplied { strategy }, Stimulus::Strategy(applied)) => {
                applied.strategy_name.eq_ignore_ascii_case(strategy)
            }
            (TriggerKind::MessageReceived { message_type }, Stimulus::Message(msg)) => {
                msg.message_type == *message_type
            }
            (TriggerKind::Custom(predicate), stimulus) => {
                return plugin::isolate(&self.name, || predicate.evaluate(stimulus));
            }
            _ => false,
        };
        Ok(fired)
    }

    pub(crate) fn firing(&self) -> TriggerFiring {
        TriggerFiring {
            name: self.name.clone(),
            delay: self.delay.filter(|d| !d.is_zero()),
            domain_action: self.domain_action.clone(),
            scenario_ending: self.scenario_ending,
        }
    }
}

/// Everything needed to carry out a trigger after it fired.
///
/// Detached from the trigger so that it can travel through a timer and the
/// event queue.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerFiring {
    pub name: String,
    /// `None` means apply immediately.
    pub delay: Option<Duration>,
    pub domain_action: Option<DomainAction>,
    pub scenario_ending: bool,
}

impl TriggerFiring {
    /// Firing for a transition requested by a human rather than a trigger.
    pub fn manual(reason: impl Into<String>) -> Self {
        Self {
            name: reason.into(),
            delay: None,
            domain_action: None,
            scenario_ending: false,
        }
    }
}

/// Evaluate `triggers` in order and return the first that fires.
pub(crate) fn first_firing<'t>(
    triggers: &'t [Trigger],
    stimulus: &Stimulus<'_>,
    owner: &str,
) -> Option<&'t Trigger> {
    triggers.iter().find(|trigger| match trigger.evaluate(stimulus) {
        Ok(fired) => fired,
        Err(e) => {
            warn!(
                owner = %owner,
                trigger = %trigger.name,
                error = %e,
                "Trigger evaluation failed, treating as not fired"
            );
            false
        }
    })
}
