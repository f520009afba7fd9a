//! Scenario validation command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use assay_core::config::{ConceptConfig, TriggerConfig, TriggerTypeConfig};
use assay_core::{ConditionRegistry, ScenarioConfig, SessionOptions, build_scenario};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use tracing::debug;

/// Validate arguments.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Scenario file (TOML)
    pub scenario: PathBuf,
}

/// Run validate command.
pub fn run(args: ValidateArgs) -> Result<()> {
    let config = ScenarioConfig::load(&args.scenario)
        .with_context(|| format!("Failed to load {}", args.scenario.display()))?;
    let registry = ConditionRegistry::with_builtins();
    debug!(kinds = ?registry.kinds(), "Condition kinds available");

    let scenario = build_scenario(&config, &registry, SessionOptions::default())
        .with_context(|| format!("Scenario '{}' is invalid", config.name))?;

    println!("Scenario: {}", scenario.name());
    if let Some(description) = scenario.description() {
        println!("{description}");
    }
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Node").fg(Color::Cyan),
        Cell::new("Name").fg(Color::Cyan),
        Cell::new("Kind").fg(Color::Cyan),
        Cell::new("Details").fg(Color::Cyan),
    ]);
    for row in hierarchy_rows(&config) {
        table.add_row(vec![
            Cell::new(row.node_id),
            Cell::new(row.name),
            Cell::new(row.kind),
            Cell::new(row.details),
        ]);
    }
    println!("{table}");

    if !config.end_triggers.is_empty() {
        println!();
        println!("Scenario ends on: {}", describe_triggers(&config.end_triggers));
    }
    println!();
    println!("{} tasks, valid.", scenario.tasks().len());
    Ok(())
}

#[derive(Debug, PartialEq)]
struct HierarchyRow {
    node_id: u32,
    name: String,
    kind: &'static str,
    details: String,
}

/// Flatten the authored hierarchy into indented table rows.
fn hierarchy_rows(config: &ScenarioConfig) -> Vec<HierarchyRow> {
    let mut rows = Vec::new();
    for task in &config.tasks {
        let mut details = Vec::new();
        if !task.start_triggers.is_empty() {
            details.push(format!("starts on {}", describe_triggers(&task.start_triggers)));
        }
        details.push(format!("ends on {}", describe_triggers(&task.end_triggers)));
        rows.push(HierarchyRow {
            node_id: task.node_id,
            name: task.name.clone(),
            kind: "task",
            details: details.join("; "),
        });
        for concept in &task.concepts {
            concept_rows(concept, 1, &mut rows);
        }
    }
    rows
}

fn concept_rows(concept: &ConceptConfig, depth: usize, rows: &mut Vec<HierarchyRow>) {
    let mut details = Vec::new();
    if let Some(weight) = concept.weight {
        details.push(format!("weight {weight}"));
    }
    if concept.course_concept {
        details.push("course concept".to_string());
    }
    if !concept.conditions.is_empty() {
        let conditions: Vec<String> = concept
            .conditions
            .iter()
            .map(|c| format!("{} ({})", c.name, c.kind))
            .collect();
        details.push(conditions.join(", "));
    }

    rows.push(HierarchyRow {
        node_id: concept.node_id,
        name: format!("{}{}", "  ".repeat(depth), concept.name),
        kind: if concept.concepts.is_empty() { "concept" } else { "intermediate" },
        details: details.join("; "),
    });
    for child in &concept.concepts {
        concept_rows(child, depth + 1, rows);
    }
}

fn describe_triggers(triggers: &[TriggerConfig]) -> String {
    triggers.iter().map(describe_trigger).collect::<Vec<_>>().join(" or ")
}

fn describe_trigger(trigger: &TriggerConfig) -> String {
    let base = match &trigger.trigger {
        TriggerTypeConfig::ScenarioStarted => "scenario start".to_string(),
        TriggerTypeConfig::ConceptEnded { node_id } => format!("concept {node_id} ended"),
        TriggerTypeConfig::ChildConceptEnded { node_id } => {
            format!("any concept under {node_id} ended")
        }
        TriggerTypeConfig::ConceptAssessment { node_id, level } => {
            format!("concept {node_id} {level}")
        }
        TriggerTypeConfig::TaskEnded { node_id } => format!("task {node_id} ended"),
        TriggerTypeConfig::StrategyApplied { strategy } => format!("strategy '{strategy}'"),
        TriggerTypeConfig::MessageReceived { message_type } => format!("{message_type} message"),
    };
    match trigger.delay() {
        Some(delay) => format!("{base} (+{}s)", delay.as_secs_f64()),
        None => base,
    }
}
