//! assay-core: real-time hierarchical performance assessment
//!
//! A scenario assesses a learner against authored expectations while a
//! simulation runs. Messages flow down the hierarchy; assessment changes
//! flow back up through a serialized trigger-event queue.
//!
//! - **Hierarchy** - [`Scenario`] → [`Task`] → [`Concept`] → [`Condition`]
//! - **Triggers** - [`Trigger`] gates task start and end, and scenario end
//! - **Snapshots** - immutable [`NodeAssessment`]s published to an [`AssessmentSink`]
//! - **Authoring** - [`ScenarioConfig`] and [`build_scenario`] with a [`ConditionRegistry`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use assay_core::{
//!     ConditionRegistry, MessageType, NoopActions, ScenarioConfig, SessionOptions,
//!     SimulationMessage, build_scenario,
//! };
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScenarioConfig::load("scenario.toml")?;
//!     let registry = ConditionRegistry::with_builtins();
//!     let scenario = build_scenario(&config, &registry, SessionOptions::default())?;
//!     scenario.initialize(Arc::new(NoopActions))?;
//!     scenario.start()?;
//!
//!     let payload = serde_json::json!({ "speed": 42 });
//!     let msg = SimulationMessage::new(MessageType::EntityState, payload);
//!     if let Some(assessment) = scenario.handle_message(&msg).await? {
//!         println!("{} tasks assessed", assessment.tasks.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//!  simulation ──► Scenario::handle_message ──► Task ──► Concept ──► Condition
//!                        ▲                      │
//!                        │                      ▼
//!                 ScenarioEvents ◄── TriggerEventQueue ◄── timers, handles
//! ```

pub mod actions;
pub mod assessment;
pub mod builder;
pub mod concept;
pub mod condition;
pub mod config;
mod context;
pub mod error;
mod plugin;
pub mod queue;
pub mod scenario;
pub mod scheduler;
pub mod task;
pub mod trigger;
pub mod types;

// Re-export key types for convenience
pub use actions::{NoopActions, ScenarioActions};
pub use assessment::{
    AggregationMetrics, AssessmentRegistry, AssessmentSink, ChildAssessment, DefaultMetrics,
    MemorySink, NodeAssessment, NullSink, PerformanceAssessment,
};
pub use builder::build_scenario;
pub use concept::Concept;
pub use condition::{Condition, ConditionAddress, ConditionHandle, ConditionRegistry};
pub use config::{EngineConfig, ScenarioConfig};
pub use error::{AssayError, ConfigError, PluginError, Result};
pub use queue::{TriggerEvent, TriggerEventHandler, TriggerEventQueue};
pub use scenario::{Scenario, SessionOptions};
pub use scheduler::{Scheduler, TimerHandle};
pub use task::Task;
pub use trigger::{Stimulus, Trigger, TriggerFiring, TriggerKind, TriggerPredicate};
pub use types::{
    AssessmentLevel, CompletionStatus, ConversationAssessment, DomainAction, EvaluatorUpdateRequest,
    MessageType, NodeKind, NodeState, NodeView, SimulationMessage, StrategyApplied,
    TrainingAppRequest,
};
