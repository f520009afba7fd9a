//! Error types for assay-core

use thiserror::Error;

/// Errors raised while building a scenario hierarchy.
///
/// These are structural problems in the authored scenario and are fatal:
/// a scenario that fails validation is never started.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A condition declared no simulation message types of interest
    #[error("Condition '{condition}' in concept '{concept}' has no simulation interests")]
    NoSimulationInterests { concept: String, condition: String },

    /// A leaf concept was authored without any conditions
    #[error("Concept '{0}' has no conditions")]
    NoConditions(String),

    /// An intermediate concept was authored without any child concepts
    #[error("Intermediate concept '{0}' has no child concepts")]
    NoChildConcepts(String),

    /// A concept was authored with both conditions and child concepts
    #[error("Concept '{0}' has both conditions and child concepts")]
    MixedConcept(String),

    /// A task was authored without any concepts
    #[error("Task '{0}' has no concepts")]
    NoConcepts(String),

    /// A task was authored without any end triggers
    #[error("Task '{0}' has no end triggers")]
    NoEndTriggers(String),

    /// A task declared more than one scenario-started start trigger
    #[error("Task '{0}' has more than one scenario-started start trigger")]
    MultipleScenarioStartTriggers(String),

    /// A scenario was authored without any tasks
    #[error("Scenario '{0}' has no tasks")]
    NoTasks(String),

    /// Two nodes share the same node id
    #[error("Duplicate node id {0}")]
    DuplicateNodeId(u32),

    /// A trigger refers to a node id that does not exist
    #[error("Trigger '{trigger}' refers to unknown node id {node_id}")]
    UnknownNode { trigger: String, node_id: u32 },

    /// A trigger refers to a node of the wrong kind
    #[error("Trigger '{trigger}' refers to node {node_id}, which is not a {expected}")]
    WrongNodeKind {
        trigger: String,
        node_id: u32,
        expected: &'static str,
    },

    /// A condition kind has no registered factory
    #[error("Unknown condition kind: {0}")]
    UnknownConditionKind(String),

    /// A condition factory rejected its parameters
    #[error("Invalid parameters for condition '{kind}': {message}")]
    InvalidConditionParams { kind: String, message: String },

    /// A weight outside of [0, 1] was authored
    #[error("Invalid weight {weight} on '{node}'")]
    InvalidWeight { node: String, weight: f64 },

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by pluggable code (conditions, trigger predicates, metrics).
///
/// Plugin errors are recoverable: they are logged at the smallest enclosing
/// scope and the engine keeps going.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin returned an error
    #[error("{plugin} failed: {message}")]
    Failed { plugin: String, message: String },

    /// The plugin panicked
    #[error("{plugin} panicked: {message}")]
    Panicked { plugin: String, message: String },
}

impl PluginError {
    /// Convenience constructor for plugin implementations.
    pub fn failed(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

/// Top-level error type for engine operations.
#[derive(Debug, Error)]
pub enum AssayError {
    /// Scenario construction or configuration failed
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The scenario was used before `initialize` was called
    #[error("Scenario '{0}' has not been initialized")]
    NotInitialized(String),

    /// `initialize` was called twice
    #[error("Scenario '{0}' is already initialized")]
    AlreadyInitialized(String),

    /// `start` was called twice
    #[error("Scenario '{0}' is already started")]
    AlreadyStarted(String),

    /// No task or concept has the requested name
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// The scenario has already ended
    #[error("Scenario '{0}' has ended")]
    Terminated(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, AssayError>;
