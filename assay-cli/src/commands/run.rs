//! Replay a scripted session against a scenario.
//!
//! Every engine callback is logged, and the final performance assessment
//! is printed as a table (or JSON with `--json`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use assay_core::{
    CompletionStatus, ConditionRegistry, DomainAction, EngineConfig, NodeView,
    PerformanceAssessment, Scenario, ScenarioActions, ScenarioConfig, SessionOptions,
    TrainingAppRequest, build_scenario,
};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use tracing::{debug, error, info, warn};

use crate::script::{self, ScriptLine, ScriptStep};

/// Run arguments.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario file (TOML)
    pub scenario: PathBuf,

    /// Script of stimuli to replay (JSON lines)
    #[arg(short, long)]
    pub script: Option<PathBuf>,

    /// Engine settings (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// End the scenario as controller-ended once the script is done
    #[arg(long)]
    pub terminate: bool,

    /// Print the final assessment as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run the replay command.
pub async fn run(args: RunArgs) -> Result<()> {
    let engine = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let config = ScenarioConfig::load(&args.scenario)
        .with_context(|| format!("Failed to load {}", args.scenario.display()))?;
    let steps = match &args.script {
        Some(path) => script::load(path)?,
        None => Vec::new(),
    };

    let scenario = build_scenario(
        &config,
        &ConditionRegistry::with_builtins(),
        SessionOptions::default().with_engine(engine),
    )
    .with_context(|| format!("Scenario '{}' is invalid", config.name))?;

    scenario.initialize(Arc::new(LoggingActions))?;
    scenario.start()?;
    info!(scenario = %scenario.name(), steps = steps.len(), "Replay started");

    replay(&scenario, &steps).await?;
    scenario.drained().await;

    if scenario.is_active() && args.terminate {
        scenario.terminate(CompletionStatus::ControllerEnded);
    }
    match scenario.status() {
        Some(status) => info!(%status, "Scenario ended"),
        None => warn!("Script finished while the scenario is still running"),
    }

    let assessment = scenario.performance_assessment();
    scenario.cleanup();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&assessment)?);
    } else {
        print_assessment(&assessment);
    }
    Ok(())
}

/// Feed each step to the scenario, stopping early once it ends.
async fn replay(scenario: &Scenario, steps: &[ScriptLine]) -> Result<()> {
    for line in steps {
        if !scenario.is_active() {
            debug!(line = line.line, "Scenario ended, skipping rest of script");
            break;
        }
        debug!(line = line.line, step = %line.step.label(), "Replaying");

        match &line.step {
            ScriptStep::Message(msg) => {
                scenario.handle_message(msg).await?;
            }
            ScriptStep::Strategy(strategy) => scenario.apply_strategy(strategy).await?,
            ScriptStep::EvaluatorUpdate(request) => {
                // A bad node name is an authoring slip, not a reason to abort
                if let Err(e) = scenario.evaluator_update(request) {
                    warn!(line = line.line, error = %e, "Evaluator update rejected");
                }
            }
            ScriptStep::Wait { .. } => {
                if let Some(duration) = line.wait_duration() {
                    tokio::time::sleep(duration).await;
                }
            }
        }
        scenario.drained().await;
    }
    Ok(())
}

/// Logs every engine callback.
struct LoggingActions;

impl ScenarioActions for LoggingActions {
    fn node_started(&self, node: &NodeView) {
        info!(node = %node.name, kind = %node.kind, "Started");
    }

    fn node_ended(&self, node: &NodeView) {
        info!(node = %node.name, kind = %node.kind, level = %node.level, "Ended");
    }

    fn node_assessment_changed(&self, node: &NodeView) {
        debug!(node = %node.name, level = %node.level, "Assessment changed");
    }

    fn performance_assessment_updated(&self, assessment: &PerformanceAssessment) {
        let levels: Vec<String> = assessment
            .tasks
            .iter()
            .map(|t| format!("{}={}", t.name, t.level))
            .collect();
        info!(tasks = %levels.join(", "), "Performance assessment");
    }

    fn scenario_ended(&self, status: CompletionStatus) {
        info!(%status, "Scenario end reported");
    }

    fn fatal_error(&self, reason: &str, details: &str) {
        error!(reason, details, "Fatal error");
    }

    fn display_to_learner(&self, action: &DomainAction) {
        info!(message = %action.message, "Learner sees");
    }

    fn training_app_request(&self, request: &TrainingAppRequest) {
        info!(
            requester = %request.requester,
            request = %request.request,
            "Training application request"
        );
    }
}

fn print_assessment(assessment: &PerformanceAssessment) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Task").fg(Color::Cyan),
        Cell::new("State").fg(Color::Cyan),
        Cell::new("Level").fg(Color::Cyan),
        Cell::new("Confidence").fg(Color::Cyan),
        Cell::new("Notes").fg(Color::Cyan),
    ]);

    for task in &assessment.tasks {
        let mut notes = task.explanations.clone();
        if let Some(evaluator) = &task.evaluator {
            notes.push(format!("by {evaluator}"));
        }
        table.add_row(vec![
            Cell::new(&task.name),
            Cell::new(task.state),
            Cell::new(task.level).fg(level_color(task.level)),
            Cell::new(format!("{:.2}", task.confidence)),
            Cell::new(notes.join("; ")),
        ]);
    }

    println!("Scenario: {}", assessment.scenario);
    println!("{table}");
}

fn level_color(level: assay_core::AssessmentLevel) -> Color {
    use assay_core::AssessmentLevel::*;
    match level {
        BelowExpectation => Color::Red,
        AtExpectation => Color::Green,
        AboveExpectation => Color::Blue,
        Unknown => Color::Grey,
    }
}
