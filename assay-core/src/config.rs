//! Engine and scenario configuration.
//!
//! `EngineConfig` tunes the engine itself (`assay.toml`). `ScenarioConfig`
//! is the authored scenario: tasks, concepts, conditions and triggers.
//!
//! ```toml
//! name = "Convoy"
//!
//! [[tasks]]
//! node_id = 1
//! name = "Drive to checkpoint"
//! end_triggers = [{ type = "concept_ended", node_id = 2 }]
//!
//! [[tasks.concepts]]
//! node_id = 2
//! name = "Maintain speed"
//!
//! [[tasks.concepts.conditions]]
//! kind = "payload_range"
//! name = "speed"
//! params = { interests = ["entity_state"], pointer = "/speed", ranges = [] }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{AssessmentLevel, MessageType};

/// Default minimum confidence for a conversation assessment to be applied.
pub const DEFAULT_MIN_CONVERSATION_CONFIDENCE: f32 = 0.80;

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// End the scenario as controller-ended this long after it starts.
    pub auto_complete_seconds: Option<u64>,
    /// Append an end trigger for the training application stopping.
    pub training_app_stopped_trigger: bool,
    pub min_conversation_confidence: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_complete_seconds: None,
            training_app_stopped_trigger: true,
            min_conversation_confidence: DEFAULT_MIN_CONVERSATION_CONFIDENCE,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn auto_complete(&self) -> Option<Duration> {
        self.auto_complete_seconds.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

/// An authored scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub end_triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl ScenarioConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub node_id: u32,
    pub name: String,
    #[serde(default)]
    pub start_triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub end_triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub concepts: Vec<ConceptConfig>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub difficulty: Option<f64>,
    #[serde(default)]
    pub stress: Option<f64>,
    #[serde(default)]
    pub scenario_support: bool,
}

/// A concept. Leaf concepts list `conditions`; intermediate concepts list
/// child `concepts`. Authoring both is an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptConfig {
    pub node_id: u32,
    pub name: String,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub priority: Option<i32>,
    /// Part of the course outline the learner is assessed against.
    #[serde(default)]
    pub course_concept: bool,
    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,
    #[serde(default)]
    pub concepts: Vec<ConceptConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// Factory kind in the [`ConditionRegistry`](crate::ConditionRegistry).
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub params: toml::Table,
}

/// A trigger plus what happens when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(flatten)]
    pub trigger: TriggerTypeConfig,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub delay_seconds: Option<f64>,
    /// Shown to the learner when the trigger fires.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub scenario_ending: bool,
}

impl TriggerConfig {
    pub fn new(trigger: TriggerTypeConfig) -> Self {
        Self {
            trigger,
            name: None,
            delay_seconds: None,
            message: None,
            scenario_ending: false,
        }
    }

    /// Negative and non-finite delays count as none.
    pub fn delay(&self) -> Option<Duration> {
        self.delay_seconds
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerTypeConfig {
    ScenarioStarted,
    ConceptEnded { node_id: u32 },
    ChildConceptEnded { node_id: u32 },
    ConceptAssessment { node_id: u32, level: AssessmentLevel },
    TaskEnded { node_id: u32 },
    StrategyApplied { strategy: String },
    MessageReceived { message_type: MessageType },
}
