//! Session-scoped assessment registry.
//!
//! Keeps the latest snapshot of every node by course node id and forwards
//! each committed snapshot to the external [`AssessmentSink`]. A registry
//! lives exactly as long as its scenario; nothing here is global.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::trace;
use uuid::Uuid;

use super::NodeAssessment;

/// Receiver of assessment snapshots (the assessment proxy).
pub trait AssessmentSink: Send + Sync {
    /// Called each time a node commits a new snapshot.
    fn assessment_updated(&self, snapshot: Arc<NodeAssessment>);
}

/// Sink that discards every snapshot.
#[derive(Debug, Default)]
pub struct NullSink;

impl AssessmentSink for NullSink {
    fn assessment_updated(&self, _snapshot: Arc<NodeAssessment>) {}
}

/// Sink that records every snapshot in memory.
///
/// Useful for tests and for replay tooling that prints a history.
#[derive(Debug, Default)]
pub struct MemorySink {
    snapshots: Mutex<Vec<Arc<NodeAssessment>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All snapshots received so far, oldest first.
    pub fn snapshots(&self) -> Vec<Arc<NodeAssessment>> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshots received for the node with the given name (case-insensitive).
    pub fn history(&self, name: &str) -> Vec<Arc<NodeAssessment>> {
        self.snapshots()
            .into_iter()
            .filter(|s| s.name.eq_ignore_ascii_case(name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl AssessmentSink for MemorySink {
    fn assessment_updated(&self, snapshot: Arc<NodeAssessment>) {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snapshot);
    }
}

/// Latest snapshot per node, plus forwarding to the sink.
pub struct AssessmentRegistry {
    latest: RwLock<HashMap<Uuid, Arc<NodeAssessment>>>,
    sink: Arc<dyn AssessmentSink>,
}

impl AssessmentRegistry {
    pub fn new(sink: Arc<dyn AssessmentSink>) -> Self {
        Self {
            latest: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Record the node's initial snapshot without notifying the sink.
    pub fn register(&self, snapshot: Arc<NodeAssessment>) {
        self.latest
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.course_node_id, snapshot);
    }

    /// Record a committed snapshot and forward it to the sink.
    pub fn publish(&self, snapshot: Arc<NodeAssessment>) {
        trace!(
            node = %snapshot.name,
            level = %snapshot.level,
            state = %snapshot.state,
            "Publishing assessment"
        );
        self.latest
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.course_node_id, Arc::clone(&snapshot));
        self.sink.assessment_updated(snapshot);
    }

    /// Latest snapshot of a node.
    pub fn get(&self, course_node_id: &Uuid) -> Option<Arc<NodeAssessment>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(course_node_id)
            .cloned()
    }

    /// Forget a node. Called during cleanup.
    pub fn unregister(&self, course_node_id: &Uuid) {
        self.latest
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(course_node_id);
    }

    pub fn len(&self) -> usize {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AssessmentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssessmentRegistry")
            .field("nodes", &self.len())
            .finish_non_exhaustive()
    }
}
