//! Build a runnable [`Scenario`] from a [`ScenarioConfig`].
//!
//! All structural validation happens here, before anything runs: node ids
//! must be unique, every trigger must refer to an existing node of the
//! right kind, and every condition kind must be registered.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::concept::Concept;
use crate::condition::{Condition, ConditionRegistry};
use crate::config::{ConceptConfig, ScenarioConfig, TaskConfig, TriggerConfig, TriggerTypeConfig};
use crate::error::ConfigError;
use crate::scenario::{Scenario, SessionOptions};
use crate::task::Task;
use crate::trigger::{Trigger, TriggerKind};
use crate::types::{DomainAction, NodeKind};

/// Build a scenario, instantiating conditions from `conditions`.
pub fn build_scenario(
    config: &ScenarioConfig,
    conditions: &ConditionRegistry,
    options: SessionOptions,
) -> Result<Scenario, ConfigError> {
    if config.tasks.is_empty() {
        return Err(ConfigError::NoTasks(config.name.clone()));
    }

    let nodes = index_nodes(config)?;
    let resolver = TriggerResolver { nodes: &nodes };

    let mut course_concepts = Vec::new();
    let mut tasks = Vec::with_capacity(config.tasks.len());
    for task in &config.tasks {
        tasks.push(build_task(task, conditions, &resolver, &mut course_concepts)?);
    }

    let end_triggers = resolver.resolve_all(&config.end_triggers)?;
    let mut scenario = Scenario::new(&config.name, tasks, end_triggers, options)?;
    if let Some(description) = &config.description {
        scenario = scenario.with_description(description);
    }

    if !course_concepts.is_empty() {
        let matched = scenario.mark_course_concepts(&course_concepts);
        debug!(scenario = %config.name, count = matched.len(), "Marked course concepts");
    }

    info!(
        scenario = %config.name,
        tasks = config.tasks.len(),
        nodes = nodes.len(),
        "Scenario built"
    );
    Ok(scenario)
}

/// Map every node id to its kind, rejecting duplicates.
fn index_nodes(config: &ScenarioConfig) -> Result<HashMap<u32, NodeKind>, ConfigError> {
    fn visit(
        concept: &ConceptConfig,
        nodes: &mut HashMap<u32, NodeKind>,
    ) -> Result<(), ConfigError> {
        let kind = if concept.concepts.is_empty() {
            NodeKind::Concept
        } else {
            NodeKind::IntermediateConcept
        };
        if nodes.insert(concept.node_id, kind).is_some() {
            return Err(ConfigError::DuplicateNodeId(concept.node_id));
        }
        concept.concepts.iter().try_for_each(|child| visit(child, nodes))
    }

    let mut nodes = HashMap::new();
    for task in &config.tasks {
        if nodes.insert(task.node_id, NodeKind::Task).is_some() {
            return Err(ConfigError::DuplicateNodeId(task.node_id));
        }
        for concept in &task.concepts {
            visit(concept, &mut nodes)?;
        }
    }
    Ok(nodes)
}

struct TriggerResolver<'a> {
    nodes: &'a HashMap<u32, NodeKind>,
}

impl TriggerResolver<'_> {
    fn resolve_all(&self, configs: &[TriggerConfig]) -> Result<Vec<Trigger>, ConfigError> {
        configs.iter().map(|c| self.resolve(c)).collect()
    }

    fn resolve(&self, config: &TriggerConfig) -> Result<Trigger, ConfigError> {
        let kind = match &config.trigger {
            TriggerTypeConfig::ScenarioStarted => TriggerKind::ScenarioStarted,
            TriggerTypeConfig::ConceptEnded { node_id } => {
                self.expect_concept(config, *node_id)?;
                TriggerKind::ConceptEnded { node_id: *node_id }
            }
            TriggerTypeConfig::ChildConceptEnded { node_id } => {
                self.expect_concept(config, *node_id)?;
                TriggerKind::ChildConceptEnded { node_id: *node_id }
            }
            TriggerTypeConfig::ConceptAssessment { node_id, level } => {
                self.expect_concept(config, *node_id)?;
                TriggerKind::ConceptAssessment {
                    node_id: *node_id,
                    level: *level,
                }
            }
            TriggerTypeConfig::TaskEnded { node_id } => {
                self.expect(config, *node_id, |k| k == NodeKind::Task, "task")?;
                TriggerKind::TaskEnded { node_id: *node_id }
            }
            TriggerTypeConfig::StrategyApplied { strategy } => TriggerKind::StrategyApplied {
                strategy: strategy.clone(),
            },
            TriggerTypeConfig::MessageReceived { message_type } => TriggerKind::MessageReceived {
                message_type: message_type.clone(),
            },
        };

        let mut trigger = Trigger::new(kind);
        if let Some(name) = &config.name {
            trigger = trigger.with_name(name);
        }
        if let Some(delay) = config.delay() {
            trigger = trigger.with_delay(delay);
        }
        if let Some(message) = &config.message {
            trigger = trigger.with_domain_action(DomainAction::new(message));
        }
        if config.scenario_ending {
            trigger = trigger.scenario_ending();
        }
        Ok(trigger)
    }

    fn expect_concept(&self, config: &TriggerConfig, node_id: u32) -> Result<(), ConfigError> {
        self.expect(
            config,
            node_id,
            |k| matches!(k, NodeKind::Concept | NodeKind::IntermediateConcept),
            "concept",
        )
    }

    fn expect(
        &self,
        config: &TriggerConfig,
        node_id: u32,
        accept: impl Fn(NodeKind) -> bool,
        expected: &'static str,
    ) -> Result<(), ConfigError> {
        let trigger = config
            .name
            .clone()
            .unwrap_or_else(|| format!("{:?}", config.trigger));
        match self.nodes.get(&node_id) {
            None => Err(ConfigError::UnknownNode { trigger, node_id }),
            Some(kind) if !accept(*kind) => Err(ConfigError::WrongNodeKind {
                trigger,
                node_id,
                expected,
            }),
            Some(_) => Ok(()),
        }
    }
}

fn build_task(
    config: &TaskConfig,
    conditions: &ConditionRegistry,
    resolver: &TriggerResolver<'_>,
    course_concepts: &mut Vec<String>,
) -> Result<Task, ConfigError> {
    let concepts = config
        .concepts
        .iter()
        .map(|c| build_concept(c, conditions, course_concepts))
        .collect::<Result<Vec<_>, _>>()?;

    let mut task = Task::new(
        config.node_id,
        &config.name,
        resolver.resolve_all(&config.start_triggers)?,
        resolver.resolve_all(&config.end_triggers)?,
        concepts,
    )?;
    if let Some(priority) = config.priority {
        task = task.with_priority(priority);
    }
    if let Some(difficulty) = config.difficulty {
        task = task.with_difficulty(difficulty);
    }
    if let Some(stress) = config.stress {
        task = task.with_stress(stress);
    }
    if config.scenario_support {
        task = task.with_scenario_support();
    }
    Ok(task)
}

fn build_concept(
    config: &ConceptConfig,
    registry: &ConditionRegistry,
    course_concepts: &mut Vec<String>,
) -> Result<Concept, ConfigError> {
    if !config.conditions.is_empty() && !config.concepts.is_empty() {
        return Err(ConfigError::MixedConcept(config.name.clone()));
    }
    if config.course_concept {
        course_concepts.push(config.name.clone());
    }

    let mut concept = if config.concepts.is_empty() {
        let conditions = config
            .conditions
            .iter()
            .map(|c| {
                let condition: Box<dyn Condition> =
                    registry.create(&c.kind, &c.name, c.params.clone())?;
                Ok((condition, c.weight))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Concept::leaf_weighted(config.node_id, &config.name, conditions)?
    } else {
        let children = config
            .concepts
            .iter()
            .map(|c| build_concept(c, registry, course_concepts))
            .collect::<Result<Vec<_>, _>>()?;
        Concept::composite(config.node_id, &config.name, children)?
    };

    if let Some(weight) = config.weight {
        if !(0.0..=1.0).contains(&weight) {
            return Err(ConfigError::InvalidWeight {
                node: config.name.clone(),
                weight,
            });
        }
        concept = concept.with_weight(weight);
    }
    if let Some(priority) = config.priority {
        concept = concept.with_priority(priority);
    }
    Ok(concept)
}
