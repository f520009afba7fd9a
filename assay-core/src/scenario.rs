//! Scenarios.
//!
//! The scenario is the root of one assessment session. It routes simulation
//! messages to its tasks, consumes the trigger-event queue, aggregates task
//! snapshots into a [`PerformanceAssessment`] and decides when the session
//! is over.
//!
//! Ending is a one-way door: the `active` flag is flipped exactly once with
//! a compare-exchange, and everything after that (stopping tasks, notifying
//! the surrounding system, cancelling timers) happens only for the caller
//! that won the flip.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actions::ScenarioActions;
use crate::assessment::{
    AggregationMetrics, AssessmentRegistry, AssessmentSink, DefaultMetrics, NullSink,
    PerformanceAssessment,
};
use crate::concept::Concept;
use crate::config::EngineConfig;
use crate::context::SessionContext;
use crate::error::{AssayError, ConfigError, Result};
use crate::queue::{TriggerEvent, TriggerEventHandler, TriggerEventQueue};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::task::Task;
use crate::trigger::{Stimulus, Trigger, TriggerFiring, TriggerKind, first_firing};
use crate::types::{
    AssessmentLevel, CompletionStatus, ConversationAssessment, EvaluatorUpdateRequest, MessageType,
    NodeView, SimulationMessage, StrategyApplied,
};

/// Observer id used when the scenario itself evaluates task stimuli.
const SCENARIO_OBSERVER: u32 = u32::MAX;

const TRAINING_APP_STOPPED_TRIGGER: &str = "training application stopped unexpectedly";

/// Session-scoped collaborators for a scenario.
#[derive(Clone)]
pub struct SessionOptions {
    pub sink: Arc<dyn AssessmentSink>,
    pub metrics: Arc<dyn AggregationMetrics>,
    pub engine: EngineConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            sink: Arc::new(NullSink),
            metrics: Arc::new(DefaultMetrics),
            engine: EngineConfig::default(),
        }
    }
}

impl SessionOptions {
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AssessmentSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn AggregationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct ScenarioState {
    started: bool,
    evaluator: Option<String>,
    observer_comment: Option<String>,
    observer_media: Option<String>,
    auto_complete: Option<TimerHandle>,
    delayed_end: Option<TimerHandle>,
}

struct ScenarioInner {
    name: String,
    description: Option<String>,
    tasks: Vec<Task>,
    end_triggers: Vec<Trigger>,
    active: AtomicBool,
    queue: TriggerEventQueue,
    scheduler: Arc<Scheduler>,
    registry: Arc<AssessmentRegistry>,
    metrics: Arc<dyn AggregationMetrics>,
    engine: EngineConfig,
    ctx: OnceLock<SessionContext>,
    state: Mutex<ScenarioState>,
    ended: watch::Sender<Option<CompletionStatus>>,
}

/// One assessment session.
///
/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Scenario {
    inner: Arc<ScenarioInner>,
}

impl Scenario {
    /// Build a scenario from its tasks and end triggers.
    ///
    /// Node ids must be unique across every task and concept.
    pub fn new(
        name: impl Into<String>,
        tasks: Vec<Task>,
        end_triggers: Vec<Trigger>,
        options: SessionOptions,
    ) -> std::result::Result<Self, ConfigError> {
        let name = name.into();
        if tasks.is_empty() {
            return Err(ConfigError::NoTasks(name));
        }

        let mut seen = HashSet::new();
        for task in &tasks {
            let concept_ids = task.concept_views().into_iter().map(|v| v.node_id);
            let ids = std::iter::once(task.node_id()).chain(concept_ids);
            for id in ids {
                if !seen.insert(id) {
                    return Err(ConfigError::DuplicateNodeId(id));
                }
            }
        }

        let tasks: Vec<Task> = tasks
            .into_iter()
            .enumerate()
            .map(|(index, mut task)| {
                task.set_index(index);
                task
            })
            .collect();

        let mut end_triggers = end_triggers;
        if options.engine.training_app_stopped_trigger {
            end_triggers.push(
                Trigger::new(TriggerKind::MessageReceived {
                    message_type: MessageType::TrainingAppStopped,
                })
                .with_name(TRAINING_APP_STOPPED_TRIGGER),
            );
        }

        let (ended, _) = watch::channel(None);
        Ok(Self {
            inner: Arc::new(ScenarioInner {
                queue: TriggerEventQueue::new(name.clone()),
                scheduler: Arc::new(Scheduler::new(name.clone())),
                registry: Arc::new(AssessmentRegistry::new(options.sink)),
                metrics: options.metrics,
                engine: options.engine,
                name,
                description: None,
                tasks,
                end_triggers,
                active: AtomicBool::new(false),
                ctx: OnceLock::new(),
                state: Mutex::new(ScenarioState::default()),
                ended,
            }),
        })
    }

    /// Set the description. Only possible before the scenario is shared.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.description = Some(description.into());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn description(&self) -> Option<&str> {
        self.inner.description.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// How the scenario ended, if it has.
    pub fn status(&self) -> Option<CompletionStatus> {
        *self.inner.ended.borrow()
    }

    pub fn registry(&self) -> &Arc<AssessmentRegistry> {
        &self.inner.registry
    }

    pub fn tasks(&self) -> &[Task] {
        &self.inner.tasks
    }

    /// Task by name, ignoring case.
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.inner.task_named(name)
    }

    // ==================== Lifecycle ====================

    /// Wire the session: build the context, initialize every task and start
    /// the trigger-event consumer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn initialize(&self, actions: Arc<dyn ScenarioActions>) -> Result<()> {
        let inner = &self.inner;
        let ctx = SessionContext {
            scenario: inner.name.clone(),
            events: inner.queue.sender(),
            scheduler: Arc::clone(&inner.scheduler),
            registry: Arc::clone(&inner.registry),
            metrics: Arc::clone(&inner.metrics),
            actions,
            config: inner.engine.clone(),
        };
        if inner.ctx.set(ctx).is_err() {
            return Err(AssayError::AlreadyInitialized(inner.name.clone()));
        }
        let ctx = inner.ctx()?;

        for task in &inner.tasks {
            task.initialize(ctx);
        }

        let handler = Arc::new(ScenarioEvents {
            inner: Arc::downgrade(inner),
        });
        inner.queue.start(handler);
        info!(scenario = %inner.name, tasks = inner.tasks.len(), "Scenario initialized");
        Ok(())
    }

    /// Start the session: activate tasks that start with the scenario and
    /// arm the auto-complete timer.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let ctx = inner.ctx()?;
        if self.status().is_some() {
            return Err(AssayError::Terminated(inner.name.clone()));
        }
        {
            let mut state = inner.lock_state();
            if state.started {
                return Err(AssayError::AlreadyStarted(inner.name.clone()));
            }
            state.started = true;
        }

        inner.active.store(true, Ordering::Release);
        info!(scenario = %inner.name, "Scenario started");

        for task in &inner.tasks {
            task.start(ctx);
        }

        if let Some(delay) = inner.engine.auto_complete() {
            info!(scenario = %inner.name, seconds = delay.as_secs(), "Auto-complete armed");
            let weak = Arc::downgrade(inner);
            let timer = inner.scheduler.schedule(delay, move |_| {
                if let Some(inner) = weak.upgrade() {
                    info!(scenario = %inner.name, "Auto-complete timer fired");
                    inner.terminate(CompletionStatus::ControllerEnded);
                }
            });
            inner.lock_state().auto_complete = Some(timer);
        }

        // Activated tasks publish through the queue; otherwise observers
        // would see nothing until the first task starts.
        if !inner.tasks.iter().any(Task::is_active) {
            inner.send_performance_assessment(ctx);
        }
        Ok(())
    }

    /// End the session. Idempotent: only the first call has any effect.
    pub fn terminate(&self, status: CompletionStatus) {
        self.inner.terminate(status);
    }

    /// Wait until every queued trigger event has been handled.
    pub async fn drained(&self) {
        self.inner.queue.wait_until_drained().await;
    }

    /// Wait until the scenario has ended.
    pub async fn wait_until_ended(&self) -> CompletionStatus {
        let mut rx = self.inner.ended.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(status) => (*status).unwrap_or(CompletionStatus::Error),
            Err(_) => CompletionStatus::Error,
        }
    }

    /// Release every node. The scenario is terminated first if it is still
    /// running.
    pub fn cleanup(&self) {
        let inner = &self.inner;
        inner.terminate(CompletionStatus::ControllerEnded);
        if let Some(ctx) = inner.ctx.get() {
            for task in &inner.tasks {
                task.cleanup(ctx);
            }
        }
        inner.queue.quit();
        inner.scheduler.shutdown();
        debug!(scenario = %inner.name, "Scenario cleaned up");
    }

    // ==================== Stimuli ====================

    /// Route a simulation message through the session.
    ///
    /// Waits for the effects of the previous message to drain first. Returns
    /// the new performance assessment if any task's assessment changed.
    pub async fn handle_message(
        &self,
        msg: &SimulationMessage,
    ) -> Result<Option<PerformanceAssessment>> {
        let inner = &self.inner;
        let ctx = inner.ctx()?;
        self.drained().await;
        if !self.is_active() {
            debug!(
                scenario = %inner.name,
                message_type = %msg.message_type,
                "Scenario inactive, ignoring message"
            );
            return Ok(None);
        }

        let mut changed = false;
        for task in inner.tasks.iter().filter(|t| !t.is_finished()) {
            // A callback may have ended the session part way through
            if !self.is_active() {
                debug!(
                    scenario = %inner.name,
                    task = %task.name(),
                    "Scenario ended while routing message"
                );
                return Ok(None);
            }
            if task.handle_message(msg, ctx).is_some() {
                changed = true;
            }
        }

        let assessment = changed.then(|| inner.send_performance_assessment(ctx));
        inner.check_end_triggers(&Stimulus::Message(msg), ctx);
        Ok(assessment)
    }

    /// A pedagogical strategy was applied in the training application.
    pub async fn apply_strategy(&self, strategy: &StrategyApplied) -> Result<()> {
        let inner = &self.inner;
        let ctx = inner.ctx()?;
        self.drained().await;
        if !self.is_active() {
            return Ok(());
        }

        info!(scenario = %inner.name, strategy = %strategy.strategy_name, "Strategy applied");
        for task in &inner.tasks {
            task.apply_strategy(strategy, ctx);
        }
        inner.check_end_triggers(&Stimulus::Strategy(strategy), ctx);
        Ok(())
    }

    /// Apply an observer's manual assessment.
    ///
    /// A request without a node name updates the scenario-level observer
    /// metadata. Otherwise the name is matched against tasks, then against
    /// concepts at any depth, ignoring case.
    pub fn evaluator_update(&self, request: &EvaluatorUpdateRequest) -> Result<()> {
        let inner = &self.inner;
        let ctx = inner.ctx()?;
        if !self.is_active() {
            warn!(
                scenario = %inner.name,
                node = ?request.node_name,
                "Scenario has ended, ignoring evaluator update"
            );
            return Ok(());
        }

        let Some(name) = request.node_name.as_deref() else {
            {
                let mut state = inner.lock_state();
                state.evaluator.clone_from(&request.evaluator);
                state.observer_comment.clone_from(&request.reason);
                state.observer_media.clone_from(&request.media);
            }
            info!(
                scenario = %inner.name,
                evaluator = ?request.evaluator,
                "Observer updated scenario"
            );
            inner.send_performance_assessment(ctx);
            return Ok(());
        };

        if let Some(task) = inner.task_named(name) {
            task.evaluator_update(request, ctx);
            return Ok(());
        }

        let (task, path) = inner
            .find_concept(name)
            .ok_or_else(|| AssayError::NodeNotFound(name.to_string()))?;
        let task_changed = task.update_concept(&path, ctx, &mut |concept: &mut Concept, ctx| {
            concept.apply_evaluator_update(request, ctx)
        });
        if !task_changed {
            inner.send_performance_assessment(ctx);
        }
        Ok(())
    }

    /// End a task by name on request.
    pub fn end_task(&self, name: &str, reason: &str) -> Result<()> {
        let inner = &self.inner;
        let ctx = inner.ctx()?;
        if !self.is_active() {
            warn!(
                scenario = %inner.name,
                task = name,
                "Scenario has ended, ignoring task end request"
            );
            return Ok(());
        }
        let task = inner
            .task_named(name)
            .ok_or_else(|| AssayError::NodeNotFound(name.to_string()))?;
        task.manual_end(reason, ctx);
        Ok(())
    }

    /// Apply assessments extracted from a conversation with the learner.
    ///
    /// Entries below the configured confidence or naming an unknown node are
    /// skipped. Returns how many were applied.
    pub fn handle_conversation_assessments(
        &self,
        assessments: &[ConversationAssessment],
    ) -> Result<usize> {
        let inner = &self.inner;
        let ctx = inner.ctx()?;
        if !self.is_active() {
            warn!(
                scenario = %inner.name,
                count = assessments.len(),
                "Scenario has ended, ignoring conversation assessments"
            );
            return Ok(0);
        }
        let min = ctx.config.min_conversation_confidence;

        let mut applied = 0;
        for assessment in assessments {
            if assessment.confidence < min {
                debug!(
                    node = %assessment.node_name,
                    confidence = assessment.confidence,
                    min,
                    "Conversation assessment below confidence threshold"
                );
                continue;
            }
            let explanation =
                format!("conversation ({:.0}% confidence)", assessment.confidence * 100.0);
            if inner.override_node(
                &assessment.node_name,
                assessment.level,
                Some(assessment.confidence),
                explanation,
                ctx,
            ) {
                applied += 1;
            } else {
                warn!(node = %assessment.node_name, "Conversation assessment did not match a node");
            }
        }
        Ok(applied)
    }

    /// Apply the result of a survey to the named node.
    pub fn survey_assessment(
        &self,
        node_name: &str,
        level: AssessmentLevel,
        survey: &str,
    ) -> Result<()> {
        let inner = &self.inner;
        let ctx = inner.ctx()?;
        if !self.is_active() {
            warn!(
                scenario = %inner.name,
                node = node_name,
                survey,
                "Scenario has ended, ignoring survey assessment"
            );
            return Ok(());
        }
        if inner.task_named(node_name).is_none() && inner.find_concept(node_name).is_none() {
            return Err(AssayError::NodeNotFound(node_name.to_string()));
        }
        inner.override_node(node_name, level, None, format!("survey '{survey}'"), ctx);
        Ok(())
    }

    // ==================== Queries ====================

    /// Current aggregate of every task snapshot.
    pub fn performance_assessment(&self) -> PerformanceAssessment {
        self.inner.performance_assessment()
    }

    pub fn task_views(&self) -> Vec<NodeView> {
        self.inner.tasks.iter().map(Task::view).collect()
    }

    /// View of the task or concept named `name`, ignoring case.
    pub fn find_node(&self, name: &str) -> Option<NodeView> {
        if let Some(task) = self.inner.task_named(name) {
            return Some(task.view());
        }
        self.inner
            .tasks
            .iter()
            .flat_map(Task::concept_views)
            .find(|v| v.name.eq_ignore_ascii_case(name))
    }

    /// Course node ids of the tasks that are, or contain, any of the given
    /// node ids.
    pub fn course_task_ids(&self, node_ids: &[u32]) -> Vec<Uuid> {
        self.inner
            .tasks
            .iter()
            .filter(|t| node_ids.iter().any(|id| t.contains_node(*id)))
            .map(Task::course_node_id)
            .collect()
    }

    /// Flag concepts that belong to the course outline. Returns the names
    /// that matched.
    pub fn mark_course_concepts(&self, names: &[String]) -> Vec<String> {
        let names: HashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();
        self.inner
            .tasks
            .iter()
            .flat_map(|t| t.mark_course_concepts(&names))
            .collect()
    }

    /// Forget the scenario-level observer metadata.
    pub fn clear_observer_metadata(&self) {
        let mut state = self.inner.lock_state();
        state.evaluator = None;
        state.observer_comment = None;
        state.observer_media = None;
    }
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.inner.name)
            .field("tasks", &self.inner.tasks)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl ScenarioInner {
    fn ctx(&self) -> Result<&SessionContext> {
        self.ctx
            .get()
            .ok_or_else(|| AssayError::NotInitialized(self.name.clone()))
    }

    fn lock_state(&self) -> MutexGuard<'_, ScenarioState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn task_named(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name().eq_ignore_ascii_case(name))
    }

    fn find_concept(&self, name: &str) -> Option<(&Task, Vec<usize>)> {
        self.tasks
            .iter()
            .find_map(|t| t.find_concept_path(name).map(|path| (t, path)))
    }

    fn override_node(
        &self,
        name: &str,
        level: AssessmentLevel,
        confidence: Option<f32>,
        explanation: String,
        ctx: &SessionContext,
    ) -> bool {
        if let Some(task) = self.task_named(name) {
            task.apply_override(level, confidence, Some(explanation), ctx);
            return true;
        }
        let Some((task, path)) = self.find_concept(name) else {
            return false;
        };
        let mut explanation = Some(explanation);
        task.update_concept(&path, ctx, &mut |concept: &mut Concept, ctx| {
            concept.apply_override(level, confidence, explanation.take(), ctx)
        });
        true
    }

    fn performance_assessment(&self) -> PerformanceAssessment {
        let state = self.lock_state();
        PerformanceAssessment {
            scenario: self.name.clone(),
            tasks: self
                .tasks
                .iter()
                .filter_map(Task::assessment)
                .map(|s| (*s).clone())
                .collect(),
            evaluator: state.evaluator.clone(),
            observer_comment: state.observer_comment.clone(),
            observer_media: state.observer_media.clone(),
            timestamp: Utc::now(),
        }
    }

    fn send_performance_assessment(&self, ctx: &SessionContext) -> PerformanceAssessment {
        let assessment = self.performance_assessment();
        debug!(
            scenario = %self.name,
            tasks = assessment.tasks.len(),
            "Sending performance assessment"
        );
        ctx.actions.performance_assessment_updated(&assessment);
        assessment
    }

    /// Evaluate scenario end triggers and end now or after the trigger's
    /// delay.
    fn check_end_triggers(&self, stimulus: &Stimulus<'_>, ctx: &SessionContext) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let firing = first_firing(&self.end_triggers, stimulus, &self.name).map(Trigger::firing);
        let Some(firing) = firing else {
            return;
        };

        if let Some(action) = &firing.domain_action {
            ctx.actions.display_to_learner(action);
        }
        match firing.delay {
            Some(delay) => {
                let mut state = self.lock_state();
                if state.delayed_end.is_some() {
                    debug!(
                        scenario = %self.name,
                        trigger = %firing.name,
                        "Delayed scenario end already pending"
                    );
                    return;
                }
                info!(
                    scenario = %self.name,
                    trigger = %firing.name,
                    delay_ms = delay.as_millis() as u64,
                    "Scenario end scheduled"
                );
                let events = ctx.events.clone();
                let timer = self.scheduler.schedule(delay, move |timer| {
                    events.add_event(TriggerEvent::DelayedScenarioEnd { firing, timer });
                });
                state.delayed_end = Some(timer);
            }
            None => {
                info!(scenario = %self.name, trigger = %firing.name, "Scenario end trigger fired");
                self.end(CompletionStatus::LessonRule);
            }
        }
    }

    /// Flip `active` off. Returns whether this caller won the flip.
    fn begin_end(&self) -> bool {
        self.active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish_end(&self, status: CompletionStatus) {
        info!(scenario = %self.name, status = %status, "Scenario ended");
        self.queue.quit();
        {
            let mut state = self.lock_state();
            if let Some(timer) = state.auto_complete.take() {
                timer.cancel();
            }
            if let Some(timer) = state.delayed_end.take() {
                timer.cancel();
            }
        }
        self.scheduler.shutdown();

        if let Some(ctx) = self.ctx.get() {
            for task in &self.tasks {
                task.assessment_ended(ctx);
            }
            self.send_performance_assessment(ctx);
            ctx.actions.scenario_ended(status);
        }
        self.ended.send_replace(Some(status));
    }

    /// End the scenario without touching task state first.
    fn end(&self, status: CompletionStatus) {
        if self.begin_end() {
            self.finish_end(status);
        }
    }

    /// End the scenario, finishing every task that is still running.
    fn terminate(&self, status: CompletionStatus) {
        if !self.begin_end() {
            debug!(scenario = %self.name, "Scenario already ended");
            return;
        }
        if let Some(ctx) = self.ctx.get() {
            for task in &self.tasks {
                task.deactivate(ctx);
            }
        }
        self.finish_end(status);
    }

    fn handle_event(&self, event: TriggerEvent, ctx: &SessionContext) {
        match event {
            TriggerEvent::TaskStarted { view, .. } => {
                ctx.actions.node_started(&view);
            }
            TriggerEvent::TaskEnded { task, view } => {
                ctx.actions.node_ended(&view);
                for (_, other) in self.tasks.iter().enumerate().filter(|(i, _)| *i != task) {
                    other.task_ended(&view, ctx);
                }
                self.send_performance_assessment(ctx);

                if self.tasks.iter().all(Task::is_finished) {
                    info!(scenario = %self.name, "Every task finished");
                    self.end(CompletionStatus::LessonRule);
                } else {
                    self.check_end_triggers(
                        &Stimulus::Task {
                            task: &view,
                            observer: SCENARIO_OBSERVER,
                        },
                        ctx,
                    );
                }
            }
            TriggerEvent::TaskAssessment { view, .. } => {
                ctx.actions.node_assessment_changed(&view);
                self.send_performance_assessment(ctx);
            }
            TriggerEvent::ConceptStarted { concept, .. } => {
                ctx.actions.node_started(&concept);
            }
            TriggerEvent::ConceptEnded { task, concept } => {
                ctx.actions.node_ended(&concept);
                self.concept_changed(task, &concept, ctx);
            }
            TriggerEvent::ConceptAssessment { task, concept } => {
                ctx.actions.node_assessment_changed(&concept);
                self.concept_changed(task, &concept, ctx);
            }
            TriggerEvent::ConditionUpdated(address) | TriggerEvent::ConditionCompleted(address) => {
                match self.tasks.get(address.task) {
                    Some(task) => task.condition_event(&address.path, address.condition, ctx),
                    None => warn!(
                        scenario = %self.name,
                        task = address.task,
                        "Condition event for unknown task"
                    ),
                }
            }
            TriggerEvent::DelayedTaskStart { task, firing, timer } => {
                if let Some(task) = self.tasks.get(task) {
                    task.delayed_start(firing, &timer, ctx);
                }
            }
            TriggerEvent::DelayedTaskEnd { task, firing, timer } => {
                if let Some(task) = self.tasks.get(task) {
                    task.delayed_end(firing, &timer, ctx);
                }
            }
            TriggerEvent::DelayedScenarioEnd { firing, timer } => {
                self.delayed_end(&firing, &timer);
            }
            TriggerEvent::ScenarioEndRequested { task, trigger } => {
                let task = self.tasks.get(task).map_or("?", Task::name);
                info!(
                    scenario = %self.name,
                    task = %task,
                    trigger = %trigger,
                    "Task requested scenario end"
                );
                self.end(CompletionStatus::LessonRule);
            }
        }
    }

    fn concept_changed(&self, task: usize, concept: &NodeView, ctx: &SessionContext) {
        for (_, other) in self.tasks.iter().enumerate().filter(|(i, _)| *i != task) {
            other.concept_updated(concept, ctx);
        }
        self.check_end_triggers(&Stimulus::Concept(concept), ctx);
    }

    fn delayed_end(&self, firing: &TriggerFiring, timer: &TimerHandle) {
        if timer.is_cancelled() {
            debug!(scenario = %self.name, timer = timer.id(), "Ignoring cancelled scenario end");
            return;
        }
        info!(scenario = %self.name, trigger = %firing.name, "Delayed scenario end came due");
        self.end(CompletionStatus::LessonRule);
    }
}

impl Drop for ScenarioInner {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}

/// Queue consumer side of a scenario.
struct ScenarioEvents {
    inner: Weak<ScenarioInner>,
}

impl TriggerEventHandler for ScenarioEvents {
    fn handle(&self, event: TriggerEvent) -> Result<()> {
        let Some(inner) = self.inner.upgrade() else {
            return Ok(());
        };
        if !inner.active.load(Ordering::Acquire) {
            debug!(
                scenario = %inner.name,
                event = event.kind(),
                "Scenario inactive, dropping event"
            );
            return Ok(());
        }
        let ctx = inner.ctx()?;
        inner.handle_event(event, ctx);
        Ok(())
    }
}
