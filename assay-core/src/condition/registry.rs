//! Condition factories keyed by kind.
//!
//! Scenario configuration names conditions by kind (`payload_range`,
//! `message_count`, or anything the embedding application registers). The
//! registry is owned by whoever builds the scenario; there is no global one.

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use super::{
    Condition, MessageCountCondition, MessageCountParams, PayloadRangeCondition, PayloadRangeParams,
};
use crate::error::ConfigError;

/// Builds a condition from its configured name and parameter table.
pub type ConditionFactory =
    Box<dyn Fn(&str, toml::Table) -> Result<Box<dyn Condition>, ConfigError> + Send + Sync>;

#[derive(Default)]
pub struct ConditionRegistry {
    factories: HashMap<String, ConditionFactory>,
}

impl ConditionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `payload_range` and `message_count` kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("payload_range", |name, params| {
            let params: PayloadRangeParams = parse_params("payload_range", params)?;
            Ok(Box::new(PayloadRangeCondition::new(name, params)))
        });
        registry.register("message_count", |name, params| {
            let params: MessageCountParams = parse_params("message_count", params)?;
            Ok(Box::new(MessageCountCondition::new(name, params)))
        });
        registry
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&str, toml::Table) -> Result<Box<dyn Condition>, ConfigError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Instantiate a condition.
    pub fn create(
        &self,
        kind: &str,
        name: &str,
        params: toml::Table,
    ) -> Result<Box<dyn Condition>, ConfigError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| ConfigError::UnknownConditionKind(kind.to_string()))?;
        factory(name, params)
    }
}

impl std::fmt::Debug for ConditionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Deserialize a factory's parameter table into its typed parameters.
pub fn parse_params<T: DeserializeOwned>(
    kind: &str,
    params: toml::Table,
) -> Result<T, ConfigError> {
    toml::Value::Table(params)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::InvalidConditionParams {
            kind: kind.to_string(),
            message: e.to_string(),
        })
}
