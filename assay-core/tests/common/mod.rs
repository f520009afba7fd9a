//! Shared fixtures for assay-core integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use assay_core::{
    AssessmentLevel, CompletionStatus, Condition, ConditionHandle, DomainAction, MessageType,
    NodeView, PerformanceAssessment, PluginError, ScenarioActions, SimulationMessage,
};

/// Records every callback a scenario makes.
#[derive(Default)]
pub struct Recorder {
    pub lifecycle: Mutex<Vec<String>>,
    pub assessments: Mutex<Vec<PerformanceAssessment>>,
    pub ended: Mutex<Vec<CompletionStatus>>,
    pub displayed: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lifecycle(&self) -> Vec<String> {
        self.lifecycle.lock().unwrap().clone()
    }

    pub fn ended(&self) -> Vec<CompletionStatus> {
        self.ended.lock().unwrap().clone()
    }

    pub fn assessments(&self) -> Vec<PerformanceAssessment> {
        self.assessments.lock().unwrap().clone()
    }

    pub fn displayed(&self) -> Vec<String> {
        self.displayed.lock().unwrap().clone()
    }
}

impl ScenarioActions for Recorder {
    fn node_started(&self, node: &NodeView) {
        self.lifecycle.lock().unwrap().push(format!("started:{}", node.name));
    }

    fn node_ended(&self, node: &NodeView) {
        self.lifecycle.lock().unwrap().push(format!("ended:{}", node.name));
    }

    fn performance_assessment_updated(&self, assessment: &PerformanceAssessment) {
        self.assessments.lock().unwrap().push(assessment.clone());
    }

    fn scenario_ended(&self, status: CompletionStatus) {
        self.ended.lock().unwrap().push(status);
    }

    fn display_to_learner(&self, action: &DomainAction) {
        self.displayed.lock().unwrap().push(action.message.clone());
    }
}

/// Condition that walks through a fixed list of levels, one per message.
pub struct Scripted {
    name: String,
    interests: Vec<MessageType>,
    levels: VecDeque<AssessmentLevel>,
    level: AssessmentLevel,
    completes: bool,
    pub seen: Arc<Mutex<usize>>,
}

impl Scripted {
    pub fn new(name: &str, levels: &[AssessmentLevel]) -> Self {
        Self {
            name: name.into(),
            interests: vec![MessageType::EntityState],
            levels: levels.iter().copied().collect(),
            level: AssessmentLevel::Unknown,
            completes: false,
            seen: Arc::new(Mutex::new(0)),
        }
    }

    /// Complete once the script runs out.
    pub fn completing(mut self) -> Self {
        self.completes = true;
        self
    }

    pub fn boxed(self) -> Box<dyn Condition> {
        Box::new(self)
    }
}

impl Condition for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    fn simulation_interests(&self) -> Vec<MessageType> {
        self.interests.clone()
    }

    fn handle_message(&mut self, _msg: &SimulationMessage) -> Result<bool, PluginError> {
        *self.seen.lock().unwrap() += 1;
        match self.levels.pop_front() {
            Some(level) if level != self.level => {
                self.level = level;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn assessment(&self) -> AssessmentLevel {
        self.level
    }

    fn has_completed(&self) -> bool {
        self.completes && self.levels.is_empty()
    }
}

/// Condition that fails on every message, by error or by panic.
pub struct Faulty {
    pub panics: bool,
}

impl Condition for Faulty {
    fn name(&self) -> &str {
        if self.panics { "panicky" } else { "erroring" }
    }

    fn simulation_interests(&self) -> Vec<MessageType> {
        vec![MessageType::EntityState]
    }

    fn handle_message(&mut self, _msg: &SimulationMessage) -> Result<bool, PluginError> {
        if self.panics {
            panic!("sensor feed corrupted");
        }
        Err(PluginError::failed(self.name(), "sensor feed corrupted"))
    }

    fn assessment(&self) -> AssessmentLevel {
        AssessmentLevel::Unknown
    }
}

/// Condition whose level is set from outside and reported through its
/// handle, the way an asynchronous algorithm would.
pub struct Remote {
    pub level: Arc<Mutex<AssessmentLevel>>,
    pub done: Arc<Mutex<bool>>,
    pub handle: Arc<Mutex<Option<ConditionHandle>>>,
}

impl Remote {
    pub fn new() -> Self {
        Self {
            level: Arc::new(Mutex::new(AssessmentLevel::Unknown)),
            done: Arc::new(Mutex::new(false)),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn handle(&self) -> ConditionHandle {
        self.handle.lock().unwrap().clone().expect("condition not initialized")
    }
}

impl Condition for Remote {
    fn name(&self) -> &str {
        "remote"
    }

    fn simulation_interests(&self) -> Vec<MessageType> {
        vec![MessageType::VariableState]
    }

    fn initialize(&mut self, handle: ConditionHandle) {
        *self.handle.lock().unwrap() = Some(handle);
    }

    fn handle_message(&mut self, _msg: &SimulationMessage) -> Result<bool, PluginError> {
        Ok(false)
    }

    fn assessment(&self) -> AssessmentLevel {
        *self.level.lock().unwrap()
    }

    fn has_completed(&self) -> bool {
        *self.done.lock().unwrap()
    }
}

pub fn message(message_type: MessageType) -> SimulationMessage {
    SimulationMessage::new(message_type, serde_json::Value::Null)
}

pub fn entity_state() -> SimulationMessage {
    message(MessageType::EntityState)
}

/// Neither active and finished at once, for every task and concept.
pub fn assert_consistent(views: &[NodeView]) {
    for view in views {
        assert!(!(view.active && view.finished), "{} is both active and finished", view.name);
    }
}
