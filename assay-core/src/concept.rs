//! Concepts and intermediate concepts.
//!
//! A concept aggregates either a list of conditions (leaf) or a list of
//! child concepts (intermediate) into one assessment. Both shapes share the
//! same lifecycle:
//!
//! ```text
//!   Unstarted ──start──► Active ──all children complete──► Finished
//!                          │
//!                          └──stop──► Deactivated
//! ```
//!
//! Concepts never call up the hierarchy. Changes below the node that is
//! returning are reported to the caller as [`ConceptSignal`]s, which the
//! owning task turns into trigger checks and queue events.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assessment::{ChildAssessment, NodeAssessment, SnapshotSlot};
use crate::condition::{Condition, ConditionAddress, ConditionHandle, ConditionSlot};
use crate::context::SessionContext;
use crate::error::ConfigError;
use crate::types::{
    AssessmentLevel, EvaluatorUpdateRequest, MessageType, NodeKind, NodeState, NodeView,
    SimulationMessage,
};

/// Something that happened inside a concept subtree during a call.
#[derive(Debug, Clone)]
pub(crate) enum ConceptSignal {
    /// A descendant's assessment changed.
    AssessmentChanged(NodeView),
    Started(NodeView),
    Ended(NodeView),
}

#[derive(Debug)]
enum ConceptBody {
    Leaf { conditions: Vec<ConditionSlot> },
    Composite { children: Vec<Concept> },
}

/// A leaf or intermediate concept.
#[derive(Debug)]
pub struct Concept {
    node_id: u32,
    name: String,
    course_node_id: Uuid,
    weight: Option<f64>,
    priority: Option<i32>,
    course_concept: bool,
    ancestor_course_concept: bool,
    active: bool,
    finished: bool,
    /// Survey, conversation or observer level that holds until a condition
    /// or child produces a new change.
    override_level: Option<AssessmentLevel>,
    interests: Vec<MessageType>,
    body: ConceptBody,
    slot: SnapshotSlot,
}

impl Concept {
    /// Leaf concept over conditions with no authored weights.
    pub fn leaf(
        node_id: u32,
        name: impl Into<String>,
        conditions: Vec<Box<dyn Condition>>,
    ) -> Result<Self, ConfigError> {
        Self::leaf_weighted(node_id, name, conditions.into_iter().map(|c| (c, None)).collect())
    }

    /// Leaf concept over conditions with optional authored weights.
    pub fn leaf_weighted(
        node_id: u32,
        name: impl Into<String>,
        conditions: Vec<(Box<dyn Condition>, Option<f64>)>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if conditions.is_empty() {
            return Err(ConfigError::NoConditions(name));
        }

        let mut slots = Vec::with_capacity(conditions.len());
        let mut interests = Vec::new();
        for (condition, weight) in conditions {
            let slot = ConditionSlot::new(condition, weight);
            if slot.interests().is_empty() {
                return Err(ConfigError::NoSimulationInterests {
                    concept: name,
                    condition: slot.name().to_string(),
                });
            }
            if let Some(weight) = weight.filter(|w| !(0.0..=1.0).contains(w)) {
                return Err(ConfigError::InvalidWeight {
                    node: slot.name().to_string(),
                    weight,
                });
            }
            merge_interests(&mut interests, slot.interests());
            slots.push(slot);
        }

        Ok(Self::with_body(node_id, name, interests, ConceptBody::Leaf { conditions: slots }))
    }

    /// Intermediate concept over child concepts.
    pub fn composite(
        node_id: u32,
        name: impl Into<String>,
        children: Vec<Concept>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if children.is_empty() {
            return Err(ConfigError::NoChildConcepts(name));
        }

        let mut interests = Vec::new();
        for child in &children {
            merge_interests(&mut interests, &child.interests);
        }

        Ok(Self::with_body(node_id, name, interests, ConceptBody::Composite { children }))
    }

    fn with_body(
        node_id: u32,
        name: String,
        interests: Vec<MessageType>,
        body: ConceptBody,
    ) -> Self {
        let course_node_id = Uuid::now_v7();
        let kind = match body {
            ConceptBody::Leaf { .. } => NodeKind::Concept,
            ConceptBody::Composite { .. } => NodeKind::IntermediateConcept,
        };
        let children = match &body {
            ConceptBody::Leaf { .. } => Vec::new(),
            ConceptBody::Composite { children } => {
                children.iter().map(|c| c.course_node_id).collect()
            }
        };
        let view = NodeView {
            node_id,
            course_node_id,
            name: name.clone(),
            kind,
            active: false,
            finished: false,
            level: AssessmentLevel::Unknown,
        };
        let slot = SnapshotSlot::new(NodeAssessment::initial(&view, children, None));

        Self {
            node_id,
            name,
            course_node_id,
            weight: None,
            priority: None,
            course_concept: false,
            ancestor_course_concept: false,
            active: false,
            finished: false,
            override_level: None,
            interests,
            body,
            slot,
        }
    }

    /// Weight of this concept within its parent, in [0, 1].
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        if let Some(mut next) = self.slot.next() {
            next.priority = Some(priority);
            self.slot.force(next);
        }
        self
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

    pub fn weight(&self) -> Option<f64> {
        self.weight
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_course_concept(&self) -> bool {
        self.course_concept
    }

    pub fn has_ancestor_course_concept(&self) -> bool {
        self.ancestor_course_concept
    }

    pub fn kind(&self) -> NodeKind {
        match self.body {
            ConceptBody::Leaf { .. } => NodeKind::Concept,
            ConceptBody::Composite { .. } => NodeKind::IntermediateConcept,
        }
    }

    /// Child concepts (empty for a leaf).
    pub fn children(&self) -> &[Concept] {
        match &self.body {
            ConceptBody::Leaf { .. } => &[],
            ConceptBody::Composite { children } => children,
        }
    }

    /// Message types any condition in this subtree is interested in.
    pub fn simulation_interests(&self) -> &[MessageType] {
        &self.interests
    }

    pub fn is_interested(&self, message_type: &MessageType) -> bool {
        self.interests.contains(message_type)
    }

    /// Current snapshot, `None` after cleanup.
    pub fn assessment(&self) -> Option<Arc<NodeAssessment>> {
        self.slot.get().cloned()
    }

    pub fn view(&self) -> NodeView {
        NodeView {
            node_id: self.node_id,
            course_node_id: self.course_node_id,
            name: self.name.clone(),
            kind: self.kind(),
            active: self.active,
            finished: self.finished,
            level: self.slot.level(),
        }
    }

    /// Whether every condition (leaf) or child (intermediate) is done.
    pub fn is_completed(&self) -> bool {
        match &self.body {
            ConceptBody::Leaf { conditions } => conditions.iter().all(ConditionSlot::is_completed),
            ConceptBody::Composite { children } => children.iter().all(Concept::is_finished),
        }
    }

    /// Views of this concept and every descendant, depth first.
    pub fn views(&self) -> Vec<NodeView> {
        let mut out = Vec::new();
        self.collect_views(&mut out);
        out
    }

    fn collect_views(&self, out: &mut Vec<NodeView>) {
        out.push(self.view());
        for child in self.children() {
            child.collect_views(out);
        }
    }

    pub fn contains_node(&self, node_id: u32) -> bool {
        self.node_id == node_id || self.children().iter().any(|c| c.contains_node(node_id))
    }

    /// Child-index path to the descendant named `name` (case-insensitive).
    ///
    /// An empty path means this concept itself.
    pub fn find_path(&self, name: &str) -> Option<Vec<usize>> {
        if self.name.eq_ignore_ascii_case(name) {
            return Some(Vec::new());
        }
        self.children().iter().enumerate().find_map(|(i, child)| {
            child.find_path(name).map(|mut path| {
                path.insert(0, i);
                path
            })
        })
    }

    pub(crate) fn child_assessment(&self) -> ChildAssessment {
        match self.slot.get() {
            Some(s) => ChildAssessment {
                level: s.level,
                confidence: s.confidence,
                competence: s.competence,
                trend: s.trend,
                priority: s.priority,
                weight: self.weight,
            },
            None => ChildAssessment::new(AssessmentLevel::Unknown).with_weight(self.weight),
        }
    }

    /// Wire condition handles and register the initial snapshot.
    pub(crate) fn initialize(&mut self, task: usize, path: &mut Vec<usize>, ctx: &SessionContext) {
        match &mut self.body {
            ConceptBody::Leaf { conditions } => {
                for (index, slot) in conditions.iter_mut().enumerate() {
                    let address = ConditionAddress {
                        task,
                        path: path.clone(),
                        condition: index,
                    };
                    let handle = ConditionHandle::new(
                        slot.name(),
                        address,
                        ctx.events.clone(),
                        Arc::clone(&ctx.actions),
                    );
                    slot.initialize(handle);
                }
            }
            ConceptBody::Composite { children } => {
                for (index, child) in children.iter_mut().enumerate() {
                    path.push(index);
                    child.initialize(task, path, ctx);
                    path.pop();
                }
            }
        }

        if let Some(snapshot) = self.slot.get() {
            ctx.registry.register(Arc::clone(snapshot));
        }
    }

    /// Activate this concept and its subtree. Finished concepts stay finished.
    pub(crate) fn start(&mut self, ctx: &SessionContext, signals: &mut Vec<ConceptSignal>) {
        if self.active || self.finished {
            return;
        }

        self.active = true;
        match &mut self.body {
            ConceptBody::Leaf { conditions } => {
                conditions.iter_mut().for_each(ConditionSlot::start);
            }
            ConceptBody::Composite { children } => {
                for child in children.iter_mut() {
                    child.start(ctx, signals);
                }
            }
        }

        self.set_state(NodeState::Active, ctx);
        debug!(concept = %self.name, "Concept started");
        signals.push(ConceptSignal::Started(self.view()));
    }

    /// Deactivate this concept and its subtree without finishing it.
    pub(crate) fn stop(&mut self, ctx: &SessionContext) {
        if !self.active {
            return;
        }

        self.stop_children(ctx);
        self.active = false;
        self.set_state(NodeState::Deactivated, ctx);
        debug!(concept = %self.name, "Concept stopped");
    }

    fn stop_children(&mut self, ctx: &SessionContext) {
        match &mut self.body {
            ConceptBody::Leaf { conditions } => conditions.iter_mut().for_each(ConditionSlot::stop),
            ConceptBody::Composite { children } => {
                for child in children.iter_mut() {
                    child.stop(ctx);
                }
            }
        }
    }

    fn finish(&mut self, ctx: &SessionContext, signals: &mut Vec<ConceptSignal>) {
        if self.finished {
            return;
        }

        self.stop_children(ctx);
        self.active = false;
        self.finished = true;
        self.set_state(NodeState::Finished, ctx);
        info!(concept = %self.name, level = %self.slot.level(), "Concept finished");
        signals.push(ConceptSignal::Ended(self.view()));
    }

    fn set_state(&mut self, state: NodeState, ctx: &SessionContext) {
        let Some(mut next) = self.slot.next() else {
            return;
        };
        next.state = state;
        if let Some(snapshot) = self.slot.commit(next) {
            ctx.registry.publish(snapshot);
        }
    }

    /// Deliver a message to the subtree.
    ///
    /// Returns whether this concept's own snapshot changed. Changes and
    /// completions below it are pushed onto `signals`. Completion is only
    /// resolved after every condition or child has seen the message.
    pub(crate) fn handle_message(
        &mut self,
        msg: &SimulationMessage,
        ctx: &SessionContext,
        signals: &mut Vec<ConceptSignal>,
    ) -> bool {
        if !self.active {
            return false;
        }

        let mut changed = false;
        let mut need_completion_check = false;

        match &mut self.body {
            ConceptBody::Leaf { conditions } => {
                for slot in conditions.iter_mut() {
                    if !slot.is_interested(&msg.message_type) {
                        continue;
                    }
                    let was_completed = slot.is_completed();
                    if slot.deliver(msg) {
                        changed = true;
                    }
                    if !was_completed && slot.is_completed() {
                        need_completion_check = true;
                    }
                }
            }
            ConceptBody::Composite { children } => {
                for child in children.iter_mut() {
                    if !child.active || !child.is_interested(&msg.message_type) {
                        continue;
                    }
                    let was_finished = child.finished;
                    if child.handle_message(msg, ctx, signals) {
                        changed = true;
                        signals.push(ConceptSignal::AssessmentChanged(child.view()));
                    }
                    if !was_finished && child.finished {
                        need_completion_check = true;
                    }
                }
            }
        }

        let updated = changed && self.evidence_changed(ctx);

        if need_completion_check && self.is_completed() {
            self.finish(ctx, signals);
        }

        updated
    }

    /// Apply a condition's out-of-band update or completion.
    pub(crate) fn apply_condition_event(
        &mut self,
        path: &[usize],
        condition: usize,
        ctx: &SessionContext,
        signals: &mut Vec<ConceptSignal>,
    ) -> bool {
        if !self.active {
            debug!(concept = %self.name, "Ignoring condition event for inactive concept");
            return false;
        }

        let (changed, completed) = match (&mut self.body, path.split_first()) {
            (ConceptBody::Leaf { conditions }, None) => {
                let Some(slot) = conditions.get_mut(condition) else {
                    warn!(concept = %self.name, condition, "Condition event for unknown condition");
                    return false;
                };
                let was_completed = slot.is_completed();
                let changed = slot.refresh();
                (changed, !was_completed && slot.is_completed())
            }
            (ConceptBody::Composite { children }, Some((first, rest))) => {
                let Some(child) = children.get_mut(*first) else {
                    warn!(
                        concept = %self.name,
                        child = *first,
                        "Condition event for unknown child"
                    );
                    return false;
                };
                let was_finished = child.finished;
                let changed = child.apply_condition_event(rest, condition, ctx, signals);
                if changed {
                    signals.push(ConceptSignal::AssessmentChanged(child.view()));
                }
                (changed, !was_finished && child.finished)
            }
            _ => {
                warn!(concept = %self.name, ?path, "Condition event path does not match hierarchy");
                return false;
            }
        };

        let updated = changed && self.evidence_changed(ctx);
        if completed && self.is_completed() {
            self.finish(ctx, signals);
        }
        updated
    }

    /// A condition or child produced new evidence: drop any override and
    /// recalculate.
    fn evidence_changed(&mut self, ctx: &SessionContext) -> bool {
        if self.override_level.take().is_some() {
            debug!(concept = %self.name, "New evidence replaces assessment override");
        }
        self.recompute(ctx)
    }

    /// Recalculate from the children and publish if anything changed.
    pub(crate) fn recompute(&mut self, ctx: &SessionContext) -> bool {
        let (children, explanations): (Vec<ChildAssessment>, Vec<String>) = match &self.body {
            ConceptBody::Leaf { conditions } => (
                conditions
                    .iter()
                    .map(|s| {
                        let mut child = ChildAssessment::new(s.level()).with_weight(s.weight());
                        child.confidence = s.confidence();
                        child
                    })
                    .collect(),
                conditions.iter().filter_map(ConditionSlot::explanation).collect(),
            ),
            ConceptBody::Composite { children } => (
                children.iter().map(Concept::child_assessment).collect(),
                Vec::new(),
            ),
        };

        let Some(aggregate) = ctx.aggregate(&self.name, &children, self.priority) else {
            return false;
        };
        let Some(mut next) = self.slot.next() else {
            return false;
        };
        aggregate.apply(&mut next, self.override_level);
        if !explanations.is_empty() {
            next.explanations = explanations;
        }

        match self.slot.commit(next) {
            Some(snapshot) => {
                debug!(concept = %self.name, level = %snapshot.level, "Concept assessment changed");
                ctx.registry.publish(snapshot);
                true
            }
            None => false,
        }
    }

    /// Apply `update` to the descendant at `path` and recalculate every
    /// ancestor on the way back up.
    ///
    /// Returns whether this concept's snapshot changed.
    pub(crate) fn update_at(
        &mut self,
        path: &[usize],
        ctx: &SessionContext,
        signals: &mut Vec<ConceptSignal>,
        update: &mut dyn FnMut(&mut Concept, &SessionContext) -> bool,
    ) -> bool {
        let Some((first, rest)) = path.split_first() else {
            return update(self, ctx);
        };
        let ConceptBody::Composite { children } = &mut self.body else {
            return false;
        };
        let Some(child) = children.get_mut(*first) else {
            return false;
        };
        if !child.update_at(rest, ctx, signals, update) {
            return false;
        }
        signals.push(ConceptSignal::AssessmentChanged(child.view()));
        self.evidence_changed(ctx)
    }

    /// Apply an observer's manual assessment. Always publishes.
    pub(crate) fn apply_evaluator_update(
        &mut self,
        request: &EvaluatorUpdateRequest,
        ctx: &SessionContext,
    ) -> bool {
        let Some(mut next) = self.slot.next() else {
            return false;
        };

        if let Some(level) = request.performance {
            self.override_level = Some(level);
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
        }
        next.evaluator.clone_from(&request.evaluator);
        next.observer_comment.clone_from(&request.reason);
        next.observer_media.clone_from(&request.media);
        if let Some(timestamp) = request.timestamp {
            next.timestamp = timestamp;
        }

        let level = next.level;
        let Some(snapshot) = self.slot.force(next) else {
            return false;
        };
        info!(
            concept = %self.name,
            level = %level,
            evaluator = ?request.evaluator,
            "Observer updated concept assessment"
        );
        ctx.registry.publish(snapshot);

        if let ConceptBody::Leaf { conditions } = &mut self.body {
            for slot in conditions.iter_mut() {
                slot.assessment_updated_externally(level);
            }
        }
        true
    }

    /// Apply a survey or conversation assessment as a sticky override.
    pub(crate) fn apply_override(
        &mut self,
        level: AssessmentLevel,
        confidence: Option<f32>,
        explanation: Option<String>,
        ctx: &SessionContext,
    ) -> bool {
        if level == AssessmentLevel::Unknown {
            return false;
        }
        let Some(mut next) = self.slot.next() else {
            return false;
        };

        self.override_level = Some(level);
        next.level = level;
        if let Some(confidence) = confidence {
            next.confidence = confidence;
        }
        if let Some(explanation) = explanation {
            next.explanations = vec![explanation];
        }

        let Some(snapshot) = self.slot.force(next) else {
            return false;
        };
        debug!(concept = %self.name, level = %level, "Concept assessment overridden");
        ctx.registry.publish(snapshot);

        if let ConceptBody::Leaf { conditions } = &mut self.body {
            for slot in conditions.iter_mut() {
                slot.assessment_updated_externally(level);
            }
        }
        true
    }

    /// Mark concepts named in `names` (lowercase) as course concepts.
    ///
    /// Returns the names that matched.
    pub(crate) fn mark_course_concepts(
        &mut self,
        names: &HashSet<String>,
        ancestor: bool,
    ) -> Vec<String> {
        let mut matched = Vec::new();
        self.ancestor_course_concept = ancestor;
        if names.contains(&self.name.to_lowercase()) {
            self.course_concept = true;
            matched.push(self.name.clone());
            if let Some(mut next) = self.slot.next() {
                next.course_concept = true;
                self.slot.force(next);
            }
        }

        let descendant_ancestor = ancestor || self.course_concept;
        if let ConceptBody::Composite { children } = &mut self.body {
            for child in children.iter_mut() {
                matched.extend(child.mark_course_concepts(names, descendant_ancestor));
            }
        }
        matched
    }

    /// Drop conditions and retire the snapshot. Later commits are no-ops.
    pub(crate) fn cleanup(&mut self, ctx: &SessionContext) {
        match &mut self.body {
            ConceptBody::Leaf { conditions } => conditions.clear(),
            ConceptBody::Composite { children } => {
                for child in children.iter_mut() {
                    child.cleanup(ctx);
                }
            }
        }
        ctx.registry.unregister(&self.course_node_id);
        self.slot.retire();
        self.active = false;
    }
}

fn merge_interests(into: &mut Vec<MessageType>, from: &[MessageType]) {
    for interest in from {
        if !into.contains(interest) {
            into.push(interest.clone());
        }
    }
}
