//! Tasks.
//!
//! A task gates a set of concepts behind start and end triggers and
//! aggregates them into one task assessment.
//!
//! ```text
//!              start trigger              end trigger / all concepts done
//!   INACTIVE ─────────────────► ACTIVE ──────────────────────────────────► FINISHED
//!       │     (or no triggers,    │
//!       │      at scenario start) └─ delayed end: timer ─► FINISHED
//!       └─ delayed start: timer ─► ACTIVE
//! ```
//!
//! All mutable state sits behind one mutex per task. The `active` and
//! `finished` flags are mirrored into an atomic so the scenario can check
//! them without taking the lock. Domain actions raised by triggers are
//! queued while the lock is held and shown to the learner after it is
//! released, so a [`ScenarioActions`](crate::ScenarioActions) callback may
//! call back into the scenario.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::assessment::{ChildAssessment, NodeAssessment, SnapshotSlot};
use crate::concept::{Concept, ConceptSignal};
use crate::context::SessionContext;
use crate::error::ConfigError;
use crate::queue::TriggerEvent;
use crate::scheduler::TimerHandle;
use crate::trigger::{Stimulus, Trigger, TriggerFiring, first_firing};
use crate::types::{
    AssessmentLevel, DomainAction, EvaluatorUpdateRequest, MessageType, NodeKind, NodeState,
    NodeView, SimulationMessage, StrategyApplied,
};

const STATUS_INACTIVE: u8 = 0;
const STATUS_ACTIVE: u8 = 1;
const STATUS_FINISHED: u8 = 2;

struct TaskState {
    start_triggers: Vec<Trigger>,
    end_triggers: Vec<Trigger>,
    concepts: Vec<Concept>,
    /// Message type to indices of interested top-level concepts.
    listeners: HashMap<MessageType, Vec<usize>>,
    active: bool,
    finished: bool,
    /// Set once the scenario has ended; the task never activates again.
    ended: bool,
    priority: Option<i32>,
    override_level: Option<AssessmentLevel>,
    pending_start: Option<TimerHandle>,
    pending_end: Vec<TimerHandle>,
    /// Domain actions to show once the lock is released.
    outbox: Vec<DomainAction>,
    slot: SnapshotSlot,
}

/// A task in a scenario.
pub struct Task {
    index: usize,
    node_id: u32,
    name: String,
    course_node_id: Uuid,
    status: AtomicU8,
    state: Mutex<TaskState>,
}

impl Task {
    /// Build a task.
    ///
    /// Fails if there are no concepts, no end triggers, or more than one
    /// scenario-started start trigger.
    pub fn new(
        node_id: u32,
        name: impl Into<String>,
        start_triggers: Vec<Trigger>,
        end_triggers: Vec<Trigger>,
        concepts: Vec<Concept>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if concepts.is_empty() {
            return Err(ConfigError::NoConcepts(name));
        }
        if end_triggers.is_empty() {
            return Err(ConfigError::NoEndTriggers(name));
        }
        if start_triggers.iter().filter(|t| t.is_scenario_started()).count() > 1 {
            return Err(ConfigError::MultipleScenarioStartTriggers(name));
        }
        for concept in &concepts {
            if let Some(weight) = concept.weight().filter(|w| !(0.0..=1.0).contains(w)) {
                return Err(ConfigError::InvalidWeight {
                    node: concept.name().to_string(),
                    weight,
                });
            }
        }

        let course_node_id = Uuid::now_v7();
        let view = NodeView {
            node_id,
            course_node_id,
            name: name.clone(),
            kind: NodeKind::Task,
            active: false,
            finished: false,
            level: AssessmentLevel::Unknown,
        };
        let children = concepts.iter().map(Concept::course_node_id).collect();
        let slot = SnapshotSlot::new(NodeAssessment::initial(&view, children, None));

        Ok(Self {
            index: 0,
            node_id,
            name,
            course_node_id,
            status: AtomicU8::new(STATUS_INACTIVE),
            state: Mutex::new(TaskState {
                start_triggers,
                end_triggers,
                concepts,
                listeners: HashMap::new(),
                active: false,
                finished: false,
                ended: false,
                priority: None,
                override_level: None,
                pending_start: None,
                pending_end: Vec::new(),
                outbox: Vec::new(),
                slot,
            }),
        })
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner).priority = Some(priority);
        self.edit_initial(|s| s.priority = Some(priority))
    }

    /// Authored difficulty in [0, 1].
    #[must_use]
    pub fn with_difficulty(self, difficulty: f64) -> Self {
        self.edit_initial(|s| s.difficulty = Some(difficulty.clamp(0.0, 1.0)))
    }

    /// Authored stress in [0, 1].
    #[must_use]
    pub fn with_stress(self, stress: f64) -> Self {
        self.edit_initial(|s| s.stress = Some(stress.clamp(0.0, 1.0)))
    }

    /// Mark the task as supported by the training application scenario.
    #[must_use]
    pub fn with_scenario_support(self) -> Self {
        self.edit_initial(|s| s.scenario_support = true)
    }

    fn edit_initial(mut self, edit: impl FnOnce(&mut NodeAssessment)) -> Self {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut next) = state.slot.next() {
            edit(&mut next);
            state.slot.force(next);
        }
        self
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn course_node_id(&self) -> Uuid {
        self.course_node_id
    }

    pub fn is_active(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_ACTIVE
    }

    pub fn is_finished(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_FINISHED
    }

    pub fn view(&self) -> NodeView {
        let state = self.lock();
        self.view_of(&state)
    }

    /// Current snapshot, `None` after cleanup.
    pub fn assessment(&self) -> Option<Arc<NodeAssessment>> {
        self.lock().slot.get().cloned()
    }

    /// Views of every concept in the task, depth first.
    pub fn concept_views(&self) -> Vec<NodeView> {
        self.lock().concepts.iter().flat_map(Concept::views).collect()
    }

    pub fn contains_node(&self, node_id: u32) -> bool {
        self.node_id == node_id || self.lock().concepts.iter().any(|c| c.contains_node(node_id))
    }

    /// Path to the concept named `name` (case-insensitive): the top-level
    /// concept index followed by child indices.
    pub fn find_concept_path(&self, name: &str) -> Option<Vec<usize>> {
        let state = self.lock();
        state.concepts.iter().enumerate().find_map(|(i, concept)| {
            concept.find_path(name).map(|mut path| {
                path.insert(0, i);
                path
            })
        })
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!(task = %self.name, "Task lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn fired(&self, triggers: &[Trigger], stimulus: &Stimulus<'_>) -> Option<TriggerFiring> {
        first_firing(triggers, stimulus, &self.name).map(Trigger::firing)
    }

    /// Drop the guard, then show the domain actions queued under it.
    fn release(&self, mut state: MutexGuard<'_, TaskState>, ctx: &SessionContext) {
        let outbox = std::mem::take(&mut state.outbox);
        drop(state);
        for action in &outbox {
            ctx.actions.display_to_learner(action);
        }
    }

    fn view_of(&self, state: &TaskState) -> NodeView {
        NodeView {
            node_id: self.node_id,
            course_node_id: self.course_node_id,
            name: self.name.clone(),
            kind: NodeKind::Task,
            active: state.active,
            finished: state.finished,
            level: state.slot.level(),
        }
    }

    fn sync_status(&self, state: &TaskState) {
        let status = if state.finished {
            STATUS_FINISHED
        } else if state.active {
            STATUS_ACTIVE
        } else {
            STATUS_INACTIVE
        };
        self.status.store(status, Ordering::Release);
    }

    // ==================== Lifecycle ====================

    /// Index listeners, wire conditions and register initial snapshots.
    pub(crate) fn initialize(&self, ctx: &SessionContext) {
        let mut state = self.lock();
        let state = &mut *state;

        state.listeners.clear();
        for (i, concept) in state.concepts.iter().enumerate() {
            for interest in concept.simulation_interests() {
                state.listeners.entry(interest.clone()).or_default().push(i);
            }
        }

        for (i, concept) in state.concepts.iter_mut().enumerate() {
            concept.initialize(self.index, &mut vec![i], ctx);
        }

        if let Some(snapshot) = state.slot.get() {
            ctx.registry.register(Arc::clone(snapshot));
        }
        debug!(task = %self.name, concepts = state.concepts.len(), "Task initialized");
    }

    /// Scenario start: activate immediately without start triggers,
    /// otherwise give a scenario-started trigger the chance to fire.
    pub(crate) fn start(&self, ctx: &SessionContext) {
        let mut state = self.lock();
        if state.start_triggers.is_empty() {
            self.activate(&mut state, ctx);
        } else {
            let view = self.view_of(&state);
            let stimulus = Stimulus::Task {
                task: &view,
                observer: self.node_id,
            };
            if let Some(firing) = self.fired(&state.start_triggers, &stimulus) {
                self.handle_start_firing(&mut state, firing, ctx);
            }
        }
        self.release(state, ctx);
    }

    fn activate(&self, state: &mut TaskState, ctx: &SessionContext) -> bool {
        if state.ended {
            debug!(task = %self.name, "Activation refused, scenario has ended");
            return false;
        }
        if state.active || state.finished {
            return false;
        }

        state.active = true;
        if let Some(timer) = state.pending_start.take() {
            timer.cancel();
        }
        self.sync_status(state);
        info!(task = %self.name, "Task activated");

        ctx.send(TriggerEvent::TaskStarted {
            task: self.index,
            view: self.view_of(state),
        });

        let mut signals = Vec::new();
        for concept in state.concepts.iter_mut() {
            concept.start(ctx, &mut signals);
        }
        let firings = self.absorb(state, signals, ctx);

        self.update_assessment(state, ctx, true);
        self.handle_end_firings(state, firings, ctx);
        true
    }

    /// Finish the task: cancel timers, stop concepts, notify the scenario.
    fn unload(&self, state: &mut TaskState, ctx: &SessionContext) {
        Self::cancel_timers(state);
        if !state.active {
            return;
        }

        state.active = false;
        state.finished = true;
        self.sync_status(state);

        for concept in state.concepts.iter_mut().filter(|c| c.is_active()) {
            concept.stop(ctx);
        }

        self.update_assessment(state, ctx, false);
        info!(task = %self.name, level = %state.slot.level(), "Task finished");
        ctx.send(TriggerEvent::TaskEnded {
            task: self.index,
            view: self.view_of(state),
        });
    }

    fn cancel_timers(state: &mut TaskState) {
        if let Some(timer) = state.pending_start.take() {
            timer.cancel();
        }
        for timer in state.pending_end.drain(..) {
            timer.cancel();
        }
    }

    /// Finish the task as part of scenario termination.
    pub(crate) fn deactivate(&self, ctx: &SessionContext) {
        let mut state = self.lock();
        state.ended = true;
        self.unload(&mut state, ctx);
    }

    /// The scenario ended around this task: stop everything without
    /// marking an unfinished task finished.
    pub(crate) fn assessment_ended(&self, ctx: &SessionContext) {
        let mut state = self.lock();
        state.ended = true;
        Self::cancel_timers(&mut state);
        if !state.active {
            return;
        }

        state.active = false;
        self.sync_status(&state);
        for concept in state.concepts.iter_mut() {
            concept.stop(ctx);
        }
        self.update_assessment(&mut state, ctx, false);
        debug!(task = %self.name, "Task deactivated at scenario end");
    }

    pub(crate) fn cleanup(&self, ctx: &SessionContext) {
        let mut state = self.lock();
        Self::cancel_timers(&mut state);
        for concept in state.concepts.iter_mut() {
            concept.cleanup(ctx);
        }
        ctx.registry.unregister(&self.course_node_id);
        state.slot.retire();
    }

    // ==================== Trigger handling ====================

    fn handle_start_firing(
        &self,
        state: &mut TaskState,
        firing: TriggerFiring,
        ctx: &SessionContext,
    ) {
        if state.active || state.finished || state.ended {
            return;
        }

        match firing.delay {
            Some(delay) => {
                if state.pending_start.is_some() {
                    debug!(
                        task = %self.name,
                        trigger = %firing.name,
                        "Delayed start already pending"
                    );
                    return;
                }
                info!(
                    task = %self.name,
                    trigger = %firing.name,
                    delay_ms = delay.as_millis() as u64,
                    "Task start scheduled"
                );
                let events = ctx.events.clone();
                let task = self.index;
                let timer = ctx.scheduler.schedule(delay, move |timer| {
                    events.add_event(TriggerEvent::DelayedTaskStart { task, firing, timer });
                });
                state.pending_start = Some(timer);
            }
            None => {
                debug!(task = %self.name, trigger = %firing.name, "Start trigger fired");
                Self::display(state, &firing);
                self.activate(state, ctx);
            }
        }
    }

    fn handle_end_firing(
        &self,
        state: &mut TaskState,
        firing: TriggerFiring,
        ctx: &SessionContext,
    ) {
        if !state.active {
            return;
        }

        Self::display(state, &firing);
        match firing.delay {
            Some(delay) => {
                info!(
                    task = %self.name,
                    trigger = %firing.name,
                    delay_ms = delay.as_millis() as u64,
                    "Task end scheduled"
                );
                let events = ctx.events.clone();
                let task = self.index;
                let timer = ctx.scheduler.schedule(delay, move |timer| {
                    events.add_event(TriggerEvent::DelayedTaskEnd { task, firing, timer });
                });
                state.pending_end.push(timer);
            }
            None => self.end_now(state, &firing, ctx),
        }
    }

    fn handle_end_firings(
        &self,
        state: &mut TaskState,
        firings: Vec<TriggerFiring>,
        ctx: &SessionContext,
    ) {
        for firing in firings {
            if !state.active {
                break;
            }
            self.handle_end_firing(state, firing, ctx);
        }
    }

    fn end_now(&self, state: &mut TaskState, firing: &TriggerFiring, ctx: &SessionContext) {
        debug!(task = %self.name, trigger = %firing.name, "End trigger fired");
        self.unload(state, ctx);
        if firing.scenario_ending {
            ctx.send(TriggerEvent::ScenarioEndRequested {
                task: self.index,
                trigger: firing.name.clone(),
            });
        }
    }

    fn display(state: &mut TaskState, firing: &TriggerFiring) {
        if let Some(action) = &firing.domain_action {
            state.outbox.push(action.clone());
        }
    }

    /// A delayed start came due.
    pub(crate) fn delayed_start(
        &self,
        firing: TriggerFiring,
        timer: &TimerHandle,
        ctx: &SessionContext,
    ) {
        let mut state = self.lock();
        if timer.is_cancelled() {
            debug!(task = %self.name, timer = timer.id(), "Ignoring cancelled delayed start");
            return;
        }
        if state.pending_start.as_ref().is_some_and(|t| t.id() == timer.id()) {
            state.pending_start = None;
        }
        if state.active || state.finished || state.ended {
            return;
        }
        Self::display(&mut state, &firing);
        self.activate(&mut state, ctx);
        self.release(state, ctx);
    }

    /// A delayed end came due.
    pub(crate) fn delayed_end(
        &self,
        firing: TriggerFiring,
        timer: &TimerHandle,
        ctx: &SessionContext,
    ) {
        let mut state = self.lock();
        if timer.is_cancelled() {
            debug!(task = %self.name, timer = timer.id(), "Ignoring cancelled delayed end");
            return;
        }
        state.pending_end.retain(|t| t.id() != timer.id());
        if !state.active {
            return;
        }
        self.end_now(&mut state, &firing, ctx);
    }

    /// Turn concept signals into queue events and collect end triggers
    /// they fire.
    fn absorb(
        &self,
        state: &TaskState,
        signals: Vec<ConceptSignal>,
        ctx: &SessionContext,
    ) -> Vec<TriggerFiring> {
        let mut firings = Vec::new();
        for signal in signals {
            let concept = match signal {
                ConceptSignal::Started(concept) => {
                    ctx.send(TriggerEvent::ConceptStarted {
                        task: self.index,
                        concept,
                    });
                    continue;
                }
                ConceptSignal::AssessmentChanged(concept) => {
                    ctx.send(TriggerEvent::ConceptAssessment {
                        task: self.index,
                        concept: concept.clone(),
                    });
                    concept
                }
                ConceptSignal::Ended(concept) => {
                    ctx.send(TriggerEvent::ConceptEnded {
                        task: self.index,
                        concept: concept.clone(),
                    });
                    concept
                }
            };

            if state.active {
                let stimulus = Stimulus::Concept(&concept);
                if let Some(firing) = self.fired(&state.end_triggers, &stimulus) {
                    firings.push(firing);
                }
            }
        }
        firings
    }

    /// Recalculate the task assessment from its concepts.
    ///
    /// Publishes and returns the new snapshot if anything changed. With
    /// `notify`, also tells the scenario through the queue.
    fn update_assessment(
        &self,
        state: &mut TaskState,
        ctx: &SessionContext,
        notify: bool,
    ) -> Option<Arc<NodeAssessment>> {
        let children: Vec<ChildAssessment> =
            state.concepts.iter().map(Concept::child_assessment).collect();
        let aggregate = ctx.aggregate(&self.name, &children, state.priority)?;
        let mut next = state.slot.next()?;
        aggregate.apply(&mut next, state.override_level);
        next.state = if state.finished {
            NodeState::Finished
        } else if state.active {
            NodeState::Active
        } else if next.state == NodeState::Active {
            NodeState::Deactivated
        } else {
            next.state
        };

        let snapshot = state.slot.commit(next)?;
        debug!(
            task = %self.name,
            level = %snapshot.level,
            state = %snapshot.state,
            "Task assessment changed"
        );
        ctx.registry.publish(Arc::clone(&snapshot));
        if notify {
            ctx.send(TriggerEvent::TaskAssessment {
                task: self.index,
                view: self.view_of(state),
            });
        }
        Some(snapshot)
    }

    // ==================== Stimuli ====================

    /// Route a simulation message through the task.
    ///
    /// Returns the new task snapshot if any concept's assessment changed.
    pub(crate) fn handle_message(
        &self,
        msg: &SimulationMessage,
        ctx: &SessionContext,
    ) -> Option<Arc<NodeAssessment>> {
        let mut state = self.lock();
        let updated = self.route_message(&mut state, msg, ctx);
        self.release(state, ctx);
        updated
    }

    fn route_message(
        &self,
        state: &mut TaskState,
        msg: &SimulationMessage,
        ctx: &SessionContext,
    ) -> Option<Arc<NodeAssessment>> {
        let stimulus = Stimulus::Message(msg);
        if !state.active && !state.finished {
            if let Some(firing) = self.fired(&state.start_triggers, &stimulus) {
                self.handle_start_firing(state, firing, ctx);
            }
        }
        if !state.active {
            return None;
        }

        let interested = state.listeners.get(&msg.message_type).cloned().unwrap_or_default();
        trace!(
            task = %self.name,
            message_type = %msg.message_type,
            concepts = interested.len(),
            "Routing message"
        );

        let mut signals = Vec::new();
        let mut changed = false;
        let mut need_completion_check = false;
        for index in interested {
            let Some(concept) = state.concepts.get_mut(index) else {
                continue;
            };
            if !concept.is_active() {
                continue;
            }
            let was_finished = concept.is_finished();
            if concept.handle_message(msg, ctx, &mut signals) {
                changed = true;
                signals.push(ConceptSignal::AssessmentChanged(concept.view()));
            }
            if !was_finished && concept.is_finished() {
                need_completion_check = true;
            }
        }

        let mut firings = self.absorb(state, signals, ctx);

        let updated = if changed {
            state.override_level = None;
            self.update_assessment(state, ctx, false)
        } else {
            None
        };

        // Concept end triggers fire before the completion unload
        if let Some(firing) = self.fired(&state.end_triggers, &stimulus) {
            firings.push(firing);
        }
        self.handle_end_firings(state, firings, ctx);

        let all_finished = state.concepts.iter().all(Concept::is_finished);
        if need_completion_check && state.active && all_finished {
            debug!(task = %self.name, "All concepts finished");
            self.unload(state, ctx);
        }

        updated
    }

    /// Another task's concept changed or ended.
    pub(crate) fn concept_updated(&self, concept: &NodeView, ctx: &SessionContext) {
        self.observe(&Stimulus::Concept(concept), ctx);
    }

    /// Another task ended.
    pub(crate) fn task_ended(&self, task: &NodeView, ctx: &SessionContext) {
        self.observe(
            &Stimulus::Task {
                task,
                observer: self.node_id,
            },
            ctx,
        );
    }

    fn observe(&self, stimulus: &Stimulus<'_>, ctx: &SessionContext) {
        let mut state = self.lock();
        if state.finished {
            return;
        }

        if !state.active {
            if let Some(firing) = self.fired(&state.start_triggers, stimulus) {
                self.handle_start_firing(&mut state, firing, ctx);
            }
        } else if let Some(firing) = self.fired(&state.end_triggers, stimulus) {
            self.handle_end_firing(&mut state, firing, ctx);
        }
        self.release(state, ctx);
    }

    /// A strategy was applied: check triggers, then update stress and
    /// difficulty if the strategy targets this task.
    pub(crate) fn apply_strategy(&self, strategy: &StrategyApplied, ctx: &SessionContext) {
        let mut state = self.lock();
        self.strategy_applied(&mut state, strategy, ctx);
        self.release(state, ctx);
    }

    fn strategy_applied(
        &self,
        state: &mut TaskState,
        strategy: &StrategyApplied,
        ctx: &SessionContext,
    ) {
        let stimulus = Stimulus::Strategy(strategy);

        if !state.active && !state.finished {
            if let Some(firing) = self.fired(&state.start_triggers, &stimulus) {
                self.handle_start_firing(state, firing, ctx);
            }
        } else if state.active {
            if let Some(firing) = self.fired(&state.end_triggers, &stimulus) {
                self.handle_end_firing(state, firing, ctx);
            }
        }

        let course_id = self.course_node_id.to_string();
        let targeted = if strategy.applied_to.is_empty() {
            state.active
        } else {
            strategy.applied_to.iter().any(|id| id.eq_ignore_ascii_case(&course_id))
        };
        if !targeted {
            return;
        }

        let Some(mut next) = state.slot.next() else {
            return;
        };
        let metrics = ctx.metrics.as_ref();
        let stress = metrics.stress(next.stress, strategy);
        let difficulty = metrics.difficulty(next.difficulty, strategy);
        if stress != next.stress {
            next.stress = stress;
            next.stress_reason = Some(strategy.strategy_name.clone());
        }
        if difficulty != next.difficulty {
            next.difficulty = difficulty;
            next.difficulty_reason = Some(strategy.strategy_name.clone());
        }

        if let Some(snapshot) = state.slot.commit(next) {
            info!(
                task = %self.name,
                strategy = %strategy.strategy_name,
                stress = ?snapshot.stress,
                difficulty = ?snapshot.difficulty,
                "Strategy changed task"
            );
            ctx.registry.publish(snapshot);
            ctx.send(TriggerEvent::TaskAssessment {
                task: self.index,
                view: self.view_of(state),
            });
        }
    }

    /// A condition reported a change or completion out of band.
    pub(crate) fn condition_event(&self, path: &[usize], condition: usize, ctx: &SessionContext) {
        let mut state = self.lock();
        self.condition_changed(&mut state, path, condition, ctx);
        self.release(state, ctx);
    }

    fn condition_changed(
        &self,
        state: &mut TaskState,
        path: &[usize],
        condition: usize,
        ctx: &SessionContext,
    ) {
        if !state.active {
            debug!(task = %self.name, "Ignoring condition event for inactive task");
            return;
        }

        let Some((top, rest)) = path.split_first() else {
            warn!(task = %self.name, "Condition event without concept path");
            return;
        };
        let Some(concept) = state.concepts.get_mut(*top) else {
            warn!(task = %self.name, concept = *top, "Condition event for unknown concept");
            return;
        };

        let mut signals = Vec::new();
        let was_finished = concept.is_finished();
        let changed = concept.apply_condition_event(rest, condition, ctx, &mut signals);
        if changed {
            signals.push(ConceptSignal::AssessmentChanged(concept.view()));
        }
        let ended = !was_finished && concept.is_finished();

        let firings = self.absorb(state, signals, ctx);
        if changed {
            state.override_level = None;
            self.update_assessment(state, ctx, true);
        }
        self.handle_end_firings(state, firings, ctx);

        if ended && state.active && state.concepts.iter().all(Concept::is_finished) {
            debug!(task = %self.name, "All concepts finished");
            self.unload(state, ctx);
        }
    }

    /// Apply `update` to the concept at `path` and propagate the change.
    ///
    /// Returns whether the task's own snapshot changed.
    pub(crate) fn update_concept(
        &self,
        path: &[usize],
        ctx: &SessionContext,
        update: &mut dyn FnMut(&mut Concept, &SessionContext) -> bool,
    ) -> bool {
        let mut state = self.lock();
        let updated = self.update_concept_at(&mut state, path, ctx, update);
        self.release(state, ctx);
        updated
    }

    fn update_concept_at(
        &self,
        state: &mut TaskState,
        path: &[usize],
        ctx: &SessionContext,
        update: &mut dyn FnMut(&mut Concept, &SessionContext) -> bool,
    ) -> bool {
        let Some((top, rest)) = path.split_first() else {
            return false;
        };
        let Some(concept) = state.concepts.get_mut(*top) else {
            return false;
        };

        let mut signals = Vec::new();
        let changed = concept.update_at(rest, ctx, &mut signals, update);
        if changed {
            signals.push(ConceptSignal::AssessmentChanged(concept.view()));
        }

        let firings = self.absorb(state, signals, ctx);
        let updated = changed && {
            state.override_level = None;
            self.update_assessment(state, ctx, true).is_some()
        };
        self.handle_end_firings(state, firings, ctx);
        updated
    }

    /// Apply an observer's manual assessment to the task itself.
    pub(crate) fn evaluator_update(&self, request: &EvaluatorUpdateRequest, ctx: &SessionContext) {
        let mut state = self.lock();
        self.apply_evaluator_update(&mut state, request, ctx);
        self.release(state, ctx);
    }

    fn apply_evaluator_update(
        &self,
        state: &mut TaskState,
        request: &EvaluatorUpdateRequest,
        ctx: &SessionContext,
    ) {
        if let Some(mut next) = state.slot.next() {
            if let Some(level) = request.performance {
                state.override_level = Some(level);
                next.level = level;
            }
            if let Some(confidence) = request.confidence {
                next.confidence = confidence;
            }
            if let Some(competence) = request.competence {
                next.competence = competence;
            }
            if let Some(trend) = request.trend {
                next.trend = trend;
            }
            if request.priority.is_some() {
                next.priority = request.priority;
                state.priority = request.priority;
            }
            next.evaluator.clone_from(&request.evaluator);
            next.observer_comment.clone_from(&request.reason);
            next.observer_media.clone_from(&request.media);
            if let Some(timestamp) = request.timestamp {
                next.timestamp = timestamp;
            }
            if let Some(snapshot) = state.slot.force(next) {
                info!(
                    task = %self.name,
                    level = %snapshot.level,
                    evaluator = ?request.evaluator,
                    "Observer updated task assessment"
                );
                ctx.registry.publish(snapshot);
            }
        }

        let reason = request.reason.clone().unwrap_or_else(|| "observer request".to_string());
        match request.state {
            Some(NodeState::Active) => {
                self.handle_start_firing(state, TriggerFiring::manual(reason), ctx);
            }
            Some(NodeState::Finished) => {
                self.handle_end_firing(state, TriggerFiring::manual(reason), ctx);
            }
            _ => {}
        }

        ctx.send(TriggerEvent::TaskAssessment {
            task: self.index,
            view: self.view_of(state),
        });
    }

    /// End the task on request, as if an undelayed end trigger fired.
    pub(crate) fn manual_end(&self, reason: &str, ctx: &SessionContext) {
        let mut state = self.lock();
        if !state.active {
            debug!(task = %self.name, reason, "Manual end ignored, task not active");
            return;
        }
        info!(task = %self.name, reason, "Task ended manually");
        self.handle_end_firing(&mut state, TriggerFiring::manual(reason), ctx);
        self.release(state, ctx);
    }

    /// Apply a survey or conversation assessment to the task itself.
    pub(crate) fn apply_override(
        &self,
        level: AssessmentLevel,
        confidence: Option<f32>,
        explanation: Option<String>,
        ctx: &SessionContext,
    ) -> bool {
        if level == AssessmentLevel::Unknown {
            return false;
        }
        let mut state = self.lock();
        let state = &mut *state;
        let Some(mut next) = state.slot.next() else {
            return false;
        };

        state.override_level = Some(level);
        next.level = level;
        if let Some(confidence) = confidence {
            next.confidence = confidence;
        }
        if let Some(explanation) = explanation {
            next.explanations = vec![explanation];
        }
        let Some(snapshot) = state.slot.force(next) else {
            return false;
        };
        ctx.registry.publish(snapshot);
        ctx.send(TriggerEvent::TaskAssessment {
            task: self.index,
            view: self.view_of(state),
        });
        true
    }

    /// Mark concepts named in `names` (lowercase) as course concepts.
    pub(crate) fn mark_course_concepts(&self, names: &HashSet<String>) -> Vec<String> {
        let mut state = self.lock();
        state
            .concepts
            .iter_mut()
            .flat_map(|c| c.mark_course_concepts(names, false))
            .collect()
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("node_id", &self.node_id)
            .field("name", &self.name)
            .field("active", &self.is_active())
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ScenarioActions;
    use crate::assessment::MemorySink;
    use crate::concept::tests::StepCondition;
    use crate::context::testing;
    use crate::trigger::TriggerKind;
    use std::sync::OnceLock;
    use std::time::Duration;

    fn msg(message_type: MessageType) -> SimulationMessage {
        SimulationMessage::new(message_type, serde_json::Value::Null)
    }

    fn concept(
        node_id: u32,
        name: &str,
        script: Vec<AssessmentLevel>,
        completing: bool,
    ) -> Concept {
        let mut condition = StepCondition::new(name, script);
        if completing {
            condition = condition.completing();
        }
        Concept::leaf(node_id, name, vec![Box::new(condition)]).unwrap()
    }

    /// One concept that never changes.
    fn idle() -> Vec<Concept> {
        vec![concept(2, "c", vec![], false)]
    }

    fn never_ends() -> Vec<Trigger> {
        vec![Trigger::new(TriggerKind::TaskEnded { node_id: 999 })]
    }

    fn kinds(events: &[TriggerEvent]) -> Vec<&'static str> {
        events.iter().map(TriggerEvent::kind).collect()
    }

    // ==================== Validation Tests ====================

    #[test]
    fn requires_end_triggers() {
        let err = Task::new(1, "t", vec![], vec![], idle()).unwrap_err();
        assert!(matches!(err, ConfigError::NoEndTriggers(_)));
    }

    #[test]
    fn requires_concepts() {
        let err = Task::new(1, "t", vec![], never_ends(), vec![]).unwrap_err();
        assert!(matches!(err, ConfigError::NoConcepts(_)));
    }

    #[test]
    fn rejects_two_scenario_start_triggers() {
        let starts = vec![
            Trigger::new(TriggerKind::ScenarioStarted),
            Trigger::new(TriggerKind::ScenarioStarted),
        ];
        let err = Task::new(1, "t", starts, never_ends(), idle()).unwrap_err();
        assert!(matches!(err, ConfigError::MultipleScenarioStartTriggers(_)));
    }

    #[test]
    fn rejects_out_of_range_concept_weight() {
        let c = concept(2, "c", vec![], false).with_weight(1.5);
        let err = Task::new(1, "t", vec![], never_ends(), vec![c]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWeight { .. }));
    }

    // ==================== Activation Tests ====================

    #[tokio::test]
    async fn starts_without_start_triggers() {
        let (ctx, queue) = testing::context(Arc::new(MemorySink::new()));
        let task = Task::new(1, "t", vec![], never_ends(), idle()).unwrap();
        task.initialize(&ctx);
        task.start(&ctx);

        assert!(task.is_active());
        assert_eq!(task.assessment().unwrap().state, NodeState::Active);
        assert_eq!(
            kinds(&queue.drain_now()),
            vec!["task_started", "concept_started", "task_assessment"]
        );
    }

    #[tokio::test]
    async fn scenario_started_trigger_activates() {
        let (ctx, _queue) = testing::context(Arc::new(MemorySink::new()));
        let task = Task::new(
            1,
            "t",
            vec![Trigger::new(TriggerKind::ScenarioStarted)],
            never_ends(),
            idle(),
        )
        .unwrap();
        task.initialize(&ctx);
        task.start(&ctx);
        assert!(task.is_active());
    }

    #[tokio::test]
    async fn waits_for_start_trigger() {
        let (ctx, _queue) = testing::context(Arc::new(MemorySink::new()));
        let start = Trigger::new(TriggerKind::MessageReceived {
            message_type: MessageType::LearnerAction,
        });
        let task = Task::new(1, "t", vec![start], never_ends(), idle()).unwrap();
        task.initialize(&ctx);
        task.start(&ctx);
        assert!(!task.is_active());

        assert!(task.handle_message(&msg(MessageType::EntityState), &ctx).is_none());
        assert!(!task.is_active());

        task.handle_message(&msg(MessageType::LearnerAction), &ctx);
        assert!(task.is_active());
    }

    // ==================== Message Tests ====================

    #[tokio::test]
    async fn concept_change_returns_task_snapshot() {
        let sink = Arc::new(MemorySink::new());
        let (ctx, queue) = testing::context(sink.clone());
        let task = Task::new(
            1,
            "t",
            vec![],
            never_ends(),
            vec![concept(2, "c", vec![AssessmentLevel::BelowExpectation], false)],
        )
        .unwrap();
        task.initialize(&ctx);
        task.start(&ctx);
        queue.drain_now();

        let snapshot = task.handle_message(&msg(MessageType::EntityState), &ctx).unwrap();
        assert_eq!(snapshot.level, AssessmentLevel::BelowExpectation);
        let below = sink
            .history("t")
            .iter()
            .filter(|s| s.level == AssessmentLevel::BelowExpectation)
            .count();
        assert_eq!(below, 1);
        // The message path does not queue a task assessment event
        assert_eq!(kinds(&queue.drain_now()), vec!["concept_assessment"]);

        // No change, no snapshot
        assert!(task.handle_message(&msg(MessageType::EntityState), &ctx).is_none());
    }

    #[tokio::test]
    async fn uninterested_message_changes_nothing() {
        let (ctx, _queue) = testing::context(Arc::new(MemorySink::new()));
        let task = Task::new(
            1,
            "t",
            vec![],
            never_ends(),
            vec![concept(2, "c", vec![AssessmentLevel::BelowExpectation], false)],
        )
        .unwrap();
        task.initialize(&ctx);
        task.start(&ctx);
        assert!(task.handle_message(&msg(MessageType::Detonation), &ctx).is_none());
    }

    #[tokio::test]
    async fn finishes_when_all_concepts_complete() {
        let (ctx, queue) = testing::context(Arc::new(MemorySink::new()));
        let task = Task::new(
            1,
            "t",
            vec![],
            never_ends(),
            vec![concept(2, "c", vec![AssessmentLevel::AtExpectation], true)],
        )
        .unwrap();
        task.initialize(&ctx);
        task.start(&ctx);
        queue.drain_now();

        task.handle_message(&msg(MessageType::EntityState), &ctx);

        assert!(task.is_finished());
        assert!(!task.is_active());
        let snapshot = task.assessment().unwrap();
        assert_eq!(snapshot.state, NodeState::Finished);
        assert_eq!(snapshot.level, AssessmentLevel::AtExpectation);
        assert_eq!(
            kinds(&queue.drain_now()),
            vec!["concept_ended", "concept_assessment", "task_ended"]
        );
    }

    #[tokio::test]
    async fn concept_end_trigger_finishes_task() {
        let (ctx, _queue) = testing::context(Arc::new(MemorySink::new()));
        let task = Task::new(
            1,
            "t",
            vec![],
            vec![Trigger::new(TriggerKind::ConceptEnded { node_id: 2 })],
            vec![
                concept(2, "quick", vec![AssessmentLevel::AtExpectation], true),
                concept(3, "slow", vec![], false),
            ],
        )
        .unwrap();
        task.initialize(&ctx);
        task.start(&ctx);

        task.handle_message(&msg(MessageType::EntityState), &ctx);
        assert!(task.is_finished());
    }

    #[tokio::test]
    async fn finished_task_never_reactivates() {
        let (ctx, _queue) = testing::context(Arc::new(MemorySink::new()));
        let start = Trigger::new(TriggerKind::MessageReceived {
            message_type: MessageType::LearnerAction,
        });
        let end = Trigger::new(TriggerKind::MessageReceived {
            message_type: MessageType::Collision,
        });
        let task = Task::new(1, "t", vec![start], vec![end], idle()).unwrap();
        task.initialize(&ctx);
        task.start(&ctx);

        task.handle_message(&msg(MessageType::LearnerAction), &ctx);
        assert!(task.is_active());
        task.handle_message(&msg(MessageType::Collision), &ctx);
        assert!(task.is_finished());

        task.handle_message(&msg(MessageType::LearnerAction), &ctx);
        assert!(task.is_finished());
        assert!(!task.is_active());
    }

    #[tokio::test]
    async fn completion_keeps_scenario_ending_trigger() {
        let (ctx, queue) = testing::context(Arc::new(MemorySink::new()));
        let end = Trigger::new(TriggerKind::ConceptEnded { node_id: 2 }).scenario_ending();
        let task = Task::new(
            1,
            "t",
            vec![],
            vec![end],
            vec![concept(2, "c", vec![AssessmentLevel::AtExpectation], true)],
        )
        .unwrap();
        task.initialize(&ctx);
        task.start(&ctx);
        queue.drain_now();

        task.handle_message(&msg(MessageType::EntityState), &ctx);

        assert!(task.is_finished());
        let events = kinds(&queue.drain_now());
        assert_eq!(events.iter().filter(|k| **k == "task_ended").count(), 1);
        assert_eq!(events.last(), Some(&"scenario_end_requested"));
    }

    // ==================== Scenario End Tests ====================

    #[tokio::test]
    async fn unstarted_task_stays_down_after_scenario_end() {
        let (ctx, _queue) = testing::context(Arc::new(MemorySink::new()));
        let start = Trigger::new(TriggerKind::MessageReceived {
            message_type: MessageType::LearnerAction,
        });
        let task = Task::new(1, "t", vec![start], never_ends(), idle()).unwrap();
        task.initialize(&ctx);
        task.start(&ctx);
        task.deactivate(&ctx);
        assert!(!task.is_finished());

        let restart = EvaluatorUpdateRequest::for_node("t").with_state(NodeState::Active);
        task.evaluator_update(&restart, &ctx);
        assert!(!task.is_active());
        task.handle_message(&msg(MessageType::LearnerAction), &ctx);
        assert!(!task.is_active());
    }

    #[tokio::test]
    async fn deactivated_task_stays_down_after_scenario_end() {
        let (ctx, _queue) = testing::context(Arc::new(MemorySink::new()));
        let task = Task::new(1, "t", vec![], never_ends(), idle()).unwrap();
        task.initialize(&ctx);
        task.start(&ctx);
        task.assessment_ended(&ctx);
        assert_eq!(task.assessment().unwrap().state, NodeState::Deactivated);

        let restart = EvaluatorUpdateRequest::for_node("t").with_state(NodeState::Active);
        task.evaluator_update(&restart, &ctx);
        assert!(!task.is_active());
        assert_eq!(task.assessment().unwrap().state, NodeState::Deactivated);
    }

    /// Reads the task back from inside the display callback.
    #[derive(Default)]
    struct ReadsTaskOnDisplay {
        task: OnceLock<Arc<Task>>,
        finished: Mutex<Vec<bool>>,
    }

    impl ScenarioActions for ReadsTaskOnDisplay {
        fn display_to_learner(&self, _action: &DomainAction) {
            if let Some(task) = self.task.get() {
                self.finished.lock().unwrap().push(task.view().finished);
            }
        }
    }

    #[tokio::test]
    async fn domain_action_shown_after_lock_released() {
        let (mut ctx, _queue) = testing::context(Arc::new(MemorySink::new()));
        let actions = Arc::new(ReadsTaskOnDisplay::default());
        let shared: Arc<dyn ScenarioActions> = actions.clone();
        ctx.actions = shared;

        let end = Trigger::new(TriggerKind::MessageReceived {
            message_type: MessageType::Collision,
        })
        .with_domain_action(DomainAction::new("Vehicle down"));
        let task = Arc::new(Task::new(1, "t", vec![], vec![end], idle()).unwrap());
        assert!(actions.task.set(Arc::clone(&task)).is_ok());
        task.initialize(&ctx);
        task.start(&ctx);

        task.handle_message(&msg(MessageType::Collision), &ctx);
        assert_eq!(actions.finished.lock().unwrap().clone(), vec![true]);
    }

    // ==================== Timer Tests ====================

    #[tokio::test(start_paused = true)]
    async fn delayed_end_is_scheduled_and_cancelled_by_unload() {
        let (ctx, queue) = testing::context(Arc::new(MemorySink::new()));
        let end = Trigger::new(TriggerKind::MessageReceived {
            message_type: MessageType::Collision,
        })
        .with_delay(Duration::from_secs(5));
        let task = Task::new(1, "t", vec![], vec![end], idle()).unwrap();
        task.initialize(&ctx);
        task.start(&ctx);
        queue.drain_now();

        task.handle_message(&msg(MessageType::Collision), &ctx);
        assert!(task.is_active());

        task.deactivate(&ctx);
        assert!(task.is_finished());

        tokio::time::sleep(Duration::from_secs(6)).await;
        let events = queue.drain_now();
        assert!(!events.iter().any(|e| matches!(e, TriggerEvent::DelayedTaskEnd { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_end_fires_into_queue() {
        let (ctx, queue) = testing::context(Arc::new(MemorySink::new()));
        let end = Trigger::new(TriggerKind::MessageReceived {
            message_type: MessageType::Collision,
        })
        .with_delay(Duration::from_secs(5));
        let task = Task::new(1, "t", vec![], vec![end], idle()).unwrap();
        task.initialize(&ctx);
        task.start(&ctx);
        task.handle_message(&msg(MessageType::Collision), &ctx);
        queue.drain_now();

        tokio::time::sleep(Duration::from_secs(6)).await;
        let mut events = queue.drain_now();
        assert_eq!(events.len(), 1);
        let Some(TriggerEvent::DelayedTaskEnd { firing, timer, .. }) = events.pop() else {
            panic!("expected delayed end");
        };

        task.delayed_end(firing, &timer, &ctx);
        assert!(task.is_finished());
    }

    #[tokio::test]
    async fn cancelled_delayed_start_is_ignored() {
        let (ctx, _queue) = testing::context(Arc::new(MemorySink::new()));
        let start = Trigger::new(TriggerKind::MessageReceived {
            message_type: MessageType::LearnerAction,
        });
        let task = Task::new(1, "t", vec![start], never_ends(), idle()).unwrap();
        task.initialize(&ctx);

        let timer = ctx.scheduler.schedule(Duration::from_secs(60), |_| {});
        timer.cancel();
        task.delayed_start(TriggerFiring::manual("stale"), &timer, &ctx);
        assert!(!task.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_start_cancels_pending_delayed_start() {
        let (ctx, queue) = testing::context(Arc::new(MemorySink::new()));
        let delayed = Trigger::new(TriggerKind::MessageReceived {
            message_type: MessageType::LearnerAction,
        })
        .with_delay(Duration::from_secs(10));
        let immediate = Trigger::new(TriggerKind::MessageReceived {
            message_type: MessageType::Detonation,
        });
        let end = Trigger::new(TriggerKind::MessageReceived {
            message_type: MessageType::Collision,
        });
        let task = Task::new(1, "t", vec![delayed, immediate], vec![end], idle()).unwrap();
        task.initialize(&ctx);
        task.start(&ctx);

        task.handle_message(&msg(MessageType::LearnerAction), &ctx);
        let pending = task.lock().pending_start.clone().unwrap();
        assert!(!task.is_active());

        task.handle_message(&msg(MessageType::Detonation), &ctx);
        assert!(task.is_active());
        assert!(pending.is_cancelled());

        task.handle_message(&msg(MessageType::Collision), &ctx);
        assert!(task.is_finished());

        tokio::time::sleep(Duration::from_secs(11)).await;
        let events = queue.drain_now();
        assert!(!events.iter().any(|e| matches!(e, TriggerEvent::DelayedTaskStart { .. })));
        task.delayed_start(TriggerFiring::manual("stale"), &pending, &ctx);
        assert!(task.is_finished());
        assert!(!task.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn ending_cancels_pending_delayed_start() {
        let (ctx, queue) = testing::context(Arc::new(MemorySink::new()));
        let start = Trigger::new(TriggerKind::MessageReceived {
            message_type: MessageType::LearnerAction,
        })
        .with_delay(Duration::from_secs(10));
        let task = Task::new(1, "t", vec![start], never_ends(), idle()).unwrap();
        task.initialize(&ctx);
        task.start(&ctx);
        task.handle_message(&msg(MessageType::LearnerAction), &ctx);
        let pending = task.lock().pending_start.clone().unwrap();

        task.deactivate(&ctx);
        assert!(pending.is_cancelled());

        tokio::time::sleep(Duration::from_secs(11)).await;
        let events = queue.drain_now();
        assert!(!events.iter().any(|e| matches!(e, TriggerEvent::DelayedTaskStart { .. })));
        assert!(!task.is_active());
    }

    // ==================== Cross-node Tests ====================

    #[tokio::test]
    async fn task_ended_trigger_starts_follow_on_task() {
        let (ctx, _queue) = testing::context(Arc::new(MemorySink::new()));
        let follow = Task::new(
            2,
            "follow",
            vec![Trigger::new(TriggerKind::TaskEnded { node_id: 1 })],
            never_ends(),
            vec![concept(3, "c", vec![], false)],
        )
        .unwrap();
        follow.initialize(&ctx);
        follow.start(&ctx);
        assert!(!follow.is_active());

        let mut lead = NodeView {
            node_id: 1,
            course_node_id: Uuid::new_v4(),
            name: "lead".into(),
            kind: NodeKind::Task,
            active: true,
            finished: false,
            level: AssessmentLevel::Unknown,
        };
        follow.task_ended(&lead, &ctx);
        assert!(!follow.is_active());

        lead.active = false;
        lead.finished = true;
        follow.task_ended(&lead, &ctx);
        assert!(follow.is_active());
    }

    #[tokio::test]
    async fn strategy_updates_targeted_task_stress() {
        let sink = Arc::new(MemorySink::new());
        let (ctx, queue) = testing::context(sink.clone());
        let task = Task::new(1, "t", vec![], never_ends(), idle())
            .unwrap()
            .with_stress(0.2);
        task.initialize(&ctx);
        task.start(&ctx);
        queue.drain_now();

        let mut other = StrategyApplied::new("raise stress");
        other.applied_to = vec![Uuid::new_v4().to_string()];
        other.stress = Some(0.9);
        task.apply_strategy(&other, &ctx);
        assert_eq!(task.assessment().unwrap().stress, Some(0.2));

        let mut mine = StrategyApplied::new("raise stress");
        mine.applied_to = vec![task.course_node_id().to_string().to_uppercase()];
        mine.stress = Some(0.9);
        task.apply_strategy(&mine, &ctx);
        let snapshot = task.assessment().unwrap();
        assert_eq!(snapshot.stress, Some(0.9));
        assert_eq!(snapshot.stress_reason.as_deref(), Some("raise stress"));
        assert_eq!(kinds(&queue.drain_now()), vec!["task_assessment"]);
    }

    #[tokio::test]
    async fn evaluator_can_end_task_manually() {
        let (ctx, _queue) = testing::context(Arc::new(MemorySink::new()));
        let task = Task::new(1, "t", vec![], never_ends(), idle()).unwrap();
        task.initialize(&ctx);
        task.start(&ctx);

        let request = EvaluatorUpdateRequest::for_node("t")
            .with_performance(AssessmentLevel::AboveExpectation)
            .with_state(NodeState::Finished);
        task.evaluator_update(&request, &ctx);

        assert!(task.is_finished());
        assert_eq!(task.assessment().unwrap().level, AssessmentLevel::AboveExpectation);
    }

    #[tokio::test]
    async fn manual_end_cancels_pending_delayed_end() {
        let (ctx, _queue) = testing::context(Arc::new(MemorySink::new()));
        let end = Trigger::new(TriggerKind::MessageReceived {
            message_type: MessageType::Collision,
        })
        .with_delay(Duration::from_secs(30));
        let task = Task::new(1, "t", vec![], vec![end], idle()).unwrap();
        task.initialize(&ctx);
        task.start(&ctx);
        task.handle_message(&msg(MessageType::Collision), &ctx);
        let pending = task.lock().pending_end.clone();
        assert_eq!(pending.len(), 1);

        task.manual_end("observer", &ctx);
        assert!(task.is_finished());
        assert!(pending[0].is_cancelled());
    }

    #[tokio::test]
    async fn update_concept_propagates_to_task() {
        let (ctx, _queue) = testing::context(Arc::new(MemorySink::new()));
        let speed = concept(2, "Speed", vec![], false);
        let task = Task::new(1, "t", vec![], never_ends(), vec![speed]).unwrap();
        task.initialize(&ctx);
        task.start(&ctx);

        let path = task.find_concept_path("SPEED").unwrap();
        assert_eq!(path, vec![0]);
        let request = EvaluatorUpdateRequest::for_node("speed")
            .with_performance(AssessmentLevel::BelowExpectation);
        assert!(task.update_concept(&path, &ctx, &mut |c, ctx| {
            c.apply_evaluator_update(&request, ctx)
        }));
        assert_eq!(task.assessment().unwrap().level, AssessmentLevel::BelowExpectation);
    }
}
