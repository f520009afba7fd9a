//! Leaf conditions.
//!
//! A [`Condition`] turns raw simulation messages into an assessment level.
//! The algorithms live outside the engine; this module defines the seam,
//! the handle a condition uses to report out-of-band changes, and the
//! isolation wrapper the engine calls conditions through.

mod builtin;
mod registry;

use std::sync::Arc;

use tracing::{debug, error};

pub use builtin::{
    MessageCountCondition, MessageCountParams, PayloadRange, PayloadRangeCondition,
    PayloadRangeParams,
};
pub use registry::{ConditionFactory, ConditionRegistry};

use crate::actions::ScenarioActions;
use crate::error::PluginError;
use crate::plugin;
use crate::queue::{EventSender, TriggerEvent};
use crate::types::{
    AssessmentLevel, DomainAction, MessageType, SimulationMessage, TrainingAppRequest,
};

/// A leaf assessment algorithm.
///
/// Conditions are called with the owning task's lock held. Returned errors
/// and panics are caught, logged, and only affect this condition.
pub trait Condition: Send {
    fn name(&self) -> &str;

    /// Message types this condition wants to see. Must not be empty.
    fn simulation_interests(&self) -> Vec<MessageType>;

    /// Called once, before the scenario starts.
    fn initialize(&mut self, _handle: ConditionHandle) {}

    /// The owning concept became active.
    fn start(&mut self) {}

    /// The owning concept stopped.
    fn stop(&mut self) {}

    /// Evaluate a message. Returns whether the assessment changed.
    fn handle_message(&mut self, msg: &SimulationMessage) -> Result<bool, PluginError>;

    fn assessment(&self) -> AssessmentLevel;

    fn confidence(&self) -> f32 {
        1.0
    }

    fn has_completed(&self) -> bool {
        false
    }

    fn explanation(&self) -> Option<String> {
        None
    }

    /// The owning concept's level was set from outside (observer, survey).
    fn assessment_updated_externally(&mut self, _level: AssessmentLevel) {}
}

/// Location of a condition in the scenario hierarchy.
///
/// `path` holds child indices from the task's top-level concept down to the
/// leaf concept that owns the condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConditionAddress {
    pub task: usize,
    pub path: Vec<usize>,
    pub condition: usize,
}

/// Handle a condition uses to report changes outside of `handle_message`.
///
/// Reports go through the trigger-event queue so that they are applied
/// under the owning task's lock and in order with everything else.
#[derive(Clone)]
pub struct ConditionHandle {
    name: String,
    address: ConditionAddress,
    events: EventSender,
    actions: Arc<dyn ScenarioActions>,
}

impl ConditionHandle {
    pub(crate) fn new(
        name: impl Into<String>,
        address: ConditionAddress,
        events: EventSender,
        actions: Arc<dyn ScenarioActions>,
    ) -> Self {
        Self {
            name: name.into(),
            address,
            events,
            actions,
        }
    }

    pub fn address(&self) -> &ConditionAddress {
        &self.address
    }

    /// The condition's assessment changed asynchronously.
    pub fn assessment_updated(&self) {
        debug!(condition = %self.name, "Condition reported assessment update");
        self.events.add_event(TriggerEvent::ConditionUpdated(self.address.clone()));
    }

    /// The condition finished asynchronously.
    pub fn completed(&self) {
        debug!(condition = %self.name, "Condition reported completion");
        self.events.add_event(TriggerEvent::ConditionCompleted(self.address.clone()));
    }

    pub fn display_to_learner(&self, action: &DomainAction) {
        self.actions.display_to_learner(action);
    }

    pub fn request_training_app_info(&self, request: serde_json::Value) {
        self.actions.training_app_request(&TrainingAppRequest {
            requester: self.name.clone(),
            request,
        });
    }

    pub fn fatal_error(&self, reason: &str, details: &str) {
        error!(condition = %self.name, reason = %reason, "Condition reported fatal error");
        self.actions.fatal_error(reason, details);
    }
}

impl std::fmt::Debug for ConditionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionHandle")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// A condition plus the engine's bookkeeping about it.
pub(crate) struct ConditionSlot {
    condition: Box<dyn Condition>,
    name: String,
    interests: Vec<MessageType>,
    weight: Option<f64>,
    level: AssessmentLevel,
    confidence: f32,
    completed: bool,
}

impl ConditionSlot {
    pub(crate) fn new(condition: Box<dyn Condition>, weight: Option<f64>) -> Self {
        let name = condition.name().to_string();
        let interests = plugin::isolate_infallible(&name, || condition.simulation_interests())
            .unwrap_or_else(|e| {
                error!(condition = %name, error = %e, "Failed to read simulation interests");
                Vec::new()
            });
        Self {
            condition,
            name,
            interests,
            weight,
            level: AssessmentLevel::Unknown,
            confidence: 1.0,
            completed: false,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn interests(&self) -> &[MessageType] {
        &self.interests
    }

    pub(crate) fn is_interested(&self, message_type: &MessageType) -> bool {
        self.interests.contains(message_type)
    }

    pub(crate) fn weight(&self) -> Option<f64> {
        self.weight
    }

    pub(crate) fn level(&self) -> AssessmentLevel {
        self.level
    }

    pub(crate) fn confidence(&self) -> f32 {
        self.confidence
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn initialize(&mut self, handle: ConditionHandle) {
        let condition = &mut self.condition;
        if let Err(e) = plugin::isolate_infallible(&self.name, || condition.initialize(handle)) {
            error!(condition = %self.name, error = %e, "Condition failed to initialize");
        }
    }

    pub(crate) fn start(&mut self) {
        let condition = &mut self.condition;
        if let Err(e) = plugin::isolate_infallible(&self.name, || condition.start()) {
            error!(condition = %self.name, error = %e, "Condition failed to start");
        }
    }

    pub(crate) fn stop(&mut self) {
        let condition = &mut self.condition;
        if let Err(e) = plugin::isolate_infallible(&self.name, || condition.stop()) {
            error!(condition = %self.name, error = %e, "Condition failed to stop");
        }
    }

    /// Deliver a message. Returns whether the condition's level changed.
    pub(crate) fn deliver(&mut self, msg: &SimulationMessage) -> bool {
        let condition = &mut self.condition;
        match plugin::isolate(&self.name, || condition.handle_message(msg)) {
            Ok(true) => self.refresh(),
            Ok(false) => {
                self.refresh_completion();
                false
            }
            Err(e) => {
                error!(
                    condition = %self.name,
                    message_type = %msg.message_type,
                    error = %e,
                    "Condition failed to handle message"
                );
                false
            }
        }
    }

    /// Re-read the condition's level and completion. Returns whether the
    /// level changed.
    pub(crate) fn refresh(&mut self) -> bool {
        let condition = &self.condition;
        let read = plugin::isolate_infallible(&self.name, || {
            (condition.assessment(), condition.confidence())
        });
        self.refresh_completion();
        match read {
            Ok((level, confidence)) => {
                let changed =
                    level != self.level || (confidence - self.confidence).abs() > f32::EPSILON;
                self.level = level;
                self.confidence = confidence;
                changed
            }
            Err(e) => {
                error!(condition = %self.name, error = %e, "Failed to read condition assessment");
                false
            }
        }
    }

    /// Re-read completion. Returns whether the condition is now complete.
    pub(crate) fn refresh_completion(&mut self) -> bool {
        if self.completed {
            return true;
        }
        let condition = &self.condition;
        match plugin::isolate_infallible(&self.name, || condition.has_completed()) {
            Ok(done) => self.completed = done,
            Err(e) => {
                error!(condition = %self.name, error = %e, "Failed to read condition completion");
            }
        }
        self.completed
    }

    pub(crate) fn explanation(&self) -> Option<String> {
        let condition = &self.condition;
        plugin::isolate_infallible(&self.name, || condition.explanation())
            .ok()
            .flatten()
    }

    pub(crate) fn assessment_updated_externally(&mut self, level: AssessmentLevel) {
        let condition = &mut self.condition;
        let result = plugin::isolate_infallible(&self.name, || {
            condition.assessment_updated_externally(level)
        });
        if let Err(e) = result {
            error!(
                condition = %self.name,
                error = %e,
                "Condition failed to accept external assessment"
            );
        }
    }
}

impl std::fmt::Debug for ConditionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionSlot")
            .field("name", &self.name)
            .field("level", &self.level)
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}
