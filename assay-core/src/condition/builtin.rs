//! Generic conditions usable straight from scenario configuration.

use serde::Deserialize;
use tracing::trace;

use super::Condition;
use crate::error::PluginError;
use crate::types::{AssessmentLevel, MessageType, SimulationMessage};

/// One band of a [`PayloadRangeCondition`]. `min` is inclusive, `max`
/// exclusive; a missing bound is unbounded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PayloadRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub level: AssessmentLevel,
}

impl PayloadRange {
    fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value < max)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadRangeParams {
    pub interests: Vec<MessageType>,
    /// JSON pointer into the message payload, e.g. `/speed`.
    pub pointer: String,
    pub ranges: Vec<PayloadRange>,
    /// Complete after this many evaluated messages.
    #[serde(default)]
    pub complete_after: Option<u32>,
}

/// Maps a numeric payload field onto a level through ordered ranges.
///
/// Messages without the field, or whose value falls in no range, leave the
/// assessment unchanged.
#[derive(Debug)]
pub struct PayloadRangeCondition {
    name: String,
    params: PayloadRangeParams,
    level: AssessmentLevel,
    evaluated: u32,
    last_value: Option<f64>,
}

impl PayloadRangeCondition {
    pub fn new(name: impl Into<String>, params: PayloadRangeParams) -> Self {
        Self {
            name: name.into(),
            params,
            level: AssessmentLevel::Unknown,
            evaluated: 0,
            last_value: None,
        }
    }
}

impl Condition for PayloadRangeCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn simulation_interests(&self) -> Vec<MessageType> {
        self.params.interests.clone()
    }

    fn handle_message(&mut self, msg: &SimulationMessage) -> Result<bool, PluginError> {
        if !self.params.interests.contains(&msg.message_type) {
            return Ok(false);
        }

        let value = msg
            .payload
            .pointer(&self.params.pointer)
            .and_then(serde_json::Value::as_f64);
        let Some(value) = value else {
            trace!(
                condition = %self.name,
                pointer = %self.params.pointer,
                "Payload has no numeric value"
            );
            return Ok(false);
        };

        self.evaluated += 1;
        self.last_value = Some(value);

        let Some(range) = self.params.ranges.iter().find(|r| r.contains(value)) else {
            return Ok(false);
        };

        let changed = range.level != self.level;
        self.level = range.level;
        Ok(changed)
    }

    fn assessment(&self) -> AssessmentLevel {
        self.level
    }

    fn has_completed(&self) -> bool {
        self.params
            .complete_after
            .is_some_and(|limit| self.evaluated >= limit)
    }

    fn explanation(&self) -> Option<String> {
        self.last_value
            .map(|v| format!("{} was {v}, assessed {}", self.params.pointer, self.level))
    }
}

fn default_reached_level() -> AssessmentLevel {
    AssessmentLevel::AtExpectation
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageCountParams {
    pub interests: Vec<MessageType>,
    pub count: u32,
    /// Level once `count` messages have been seen.
    #[serde(default = "default_reached_level")]
    pub level: AssessmentLevel,
}

/// Reaches a level and completes after seeing enough messages of interest.
#[derive(Debug)]
pub struct MessageCountCondition {
    name: String,
    params: MessageCountParams,
    seen: u32,
}

impl MessageCountCondition {
    pub fn new(name: impl Into<String>, params: MessageCountParams) -> Self {
        Self {
            name: name.into(),
            params,
            seen: 0,
        }
    }

    fn reached(&self) -> bool {
        self.seen >= self.params.count
    }
}

impl Condition for MessageCountCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn simulation_interests(&self) -> Vec<MessageType> {
        self.params.interests.clone()
    }

    fn handle_message(&mut self, msg: &SimulationMessage) -> Result<bool, PluginError> {
        if self.reached() || !self.params.interests.contains(&msg.message_type) {
            return Ok(false);
        }
        self.seen += 1;
        Ok(self.reached())
    }

    fn assessment(&self) -> AssessmentLevel {
        if self.reached() {
            self.params.level
        } else {
            AssessmentLevel::Unknown
        }
    }

    fn has_completed(&self) -> bool {
        self.reached()
    }

    fn explanation(&self) -> Option<String> {
        Some(format!("{} of {} messages seen", self.seen, self.params.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn speed(value: f64) -> SimulationMessage {
        SimulationMessage::new(MessageType::EntityState, json!({ "speed": value }))
    }

    fn speed_condition(complete_after: Option<u32>) -> PayloadRangeCondition {
        PayloadRangeCondition::new(
            "speed",
            PayloadRangeParams {
                interests: vec![MessageType::EntityState],
                pointer: "/speed".into(),
                ranges: vec![
                    PayloadRange {
                        min: None,
                        max: Some(10.0),
                        level: AssessmentLevel::BelowExpectation,
                    },
                    PayloadRange {
                        min: Some(10.0),
                        max: Some(20.0),
                        level: AssessmentLevel::AtExpectation,
                    },
                ],
                complete_after,
            },
        )
    }

    #[test]
    fn payload_range_maps_values() {
        let mut c = speed_condition(None);
        assert!(c.handle_message(&speed(5.0)).unwrap());
        assert_eq!(c.assessment(), AssessmentLevel::BelowExpectation);

        assert!(!c.handle_message(&speed(7.0)).unwrap());

        assert!(c.handle_message(&speed(10.0)).unwrap());
        assert_eq!(c.assessment(), AssessmentLevel::AtExpectation);

        // No band covers 25, level unchanged
        assert!(!c.handle_message(&speed(25.0)).unwrap());
        assert_eq!(c.assessment(), AssessmentLevel::AtExpectation);
        assert!(c.explanation().unwrap().contains("25"));
    }

    #[test]
    fn payload_range_ignores_missing_field_and_other_types() {
        let mut c = speed_condition(None);
        let no_field = SimulationMessage::new(MessageType::EntityState, json!({ "heading": 90 }));
        assert!(!c.handle_message(&no_field).unwrap());

        let other = SimulationMessage::new(MessageType::Detonation, json!({ "speed": 5 }));
        assert!(!c.handle_message(&other).unwrap());
        assert_eq!(c.assessment(), AssessmentLevel::Unknown);
    }

    #[test]
    fn payload_range_completes_after_limit() {
        let mut c = speed_condition(Some(2));
        c.handle_message(&speed(12.0)).unwrap();
        assert!(!c.has_completed());
        c.handle_message(&speed(30.0)).unwrap();
        assert!(c.has_completed());
    }

    #[test]
    fn message_count_reaches_level() {
        let mut c = MessageCountCondition::new(
            "radio calls",
            MessageCountParams {
                interests: vec![MessageType::LearnerAction],
                count: 2,
                level: AssessmentLevel::AboveExpectation,
            },
        );
        let action = SimulationMessage::new(MessageType::LearnerAction, json!({}));

        assert!(!c.handle_message(&action).unwrap());
        assert_eq!(c.assessment(), AssessmentLevel::Unknown);

        assert!(c.handle_message(&action).unwrap());
        assert_eq!(c.assessment(), AssessmentLevel::AboveExpectation);
        assert!(c.has_completed());

        // Saturates
        assert!(!c.handle_message(&action).unwrap());
        assert_eq!(c.explanation().unwrap(), "2 of 2 messages seen");
    }

    #[test]
    fn params_deserialize_from_toml() {
        let params: PayloadRangeParams = toml::from_str(
            r#"
            interests = ["entity_state"]
            pointer = "/speed"
            ranges = [
                { max = 10.0, level = "below_expectation" },
                { min = 10.0, level = "at_expectation" },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(params.ranges.len(), 2);
        assert_eq!(params.ranges[1].min, Some(10.0));
        assert!(params.complete_after.is_none());

        let params: MessageCountParams = toml::from_str(
            r#"
            interests = ["learner_action"]
            count = 3
            "#,
        )
        .unwrap();
        assert_eq!(params.level, AssessmentLevel::AtExpectation);
    }
}
