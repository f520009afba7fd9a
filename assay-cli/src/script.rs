//! Replay scripts: one JSON stimulus per line.
//!
//! ```text
//! {"type": "message", "message_type": "entity_state", "payload": {"speed": 15}}
//! {"type": "strategy", "strategy_name": "Raise fog"}
//! {"type": "evaluator_update", "node_name": "Maintain speed", "performance": "above_expectation"}
//! {"type": "wait", "seconds": 1.5}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use assay_core::{EvaluatorUpdateRequest, SimulationMessage, StrategyApplied};
use serde::Deserialize;

/// A single scripted stimulus.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptStep {
    Message(SimulationMessage),
    Strategy(StrategyApplied),
    EvaluatorUpdate(EvaluatorUpdateRequest),
    Wait { seconds: f64 },
}

impl ScriptStep {
    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            Self::Message(msg) => format!("{} message", msg.message_type),
            Self::Strategy(strategy) => format!("strategy '{}'", strategy.strategy_name),
            Self::EvaluatorUpdate(request) => match &request.node_name {
                Some(name) => format!("evaluator update on '{name}'"),
                None => "evaluator update on scenario".to_string(),
            },
            Self::Wait { seconds } => format!("wait {seconds}s"),
        }
    }
}

/// A step and the script line it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptLine {
    pub line: usize,
    pub step: ScriptStep,
}

impl ScriptLine {
    pub fn wait_duration(&self) -> Option<Duration> {
        match self.step {
            ScriptStep::Wait { seconds } => Some(Duration::from_secs_f64(seconds)),
            _ => None,
        }
    }
}

pub fn load(path: &Path) -> Result<Vec<ScriptLine>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<Vec<ScriptLine>> {
    let mut lines = Vec::new();
    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let step: ScriptStep = serde_json::from_str(trimmed)
            .with_context(|| format!("Invalid script step on line {line}"))?;
        if let ScriptStep::Wait { seconds } = step {
            if !seconds.is_finite() || seconds < 0.0 {
                bail!("Invalid wait of {seconds}s on line {line}");
            }
        }
        lines.push(ScriptLine { line, step });
    }
    Ok(lines)
}
