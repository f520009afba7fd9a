//! End-to-end assessment scenarios through the public API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assay_core::{
    AssessmentLevel, CompletionStatus, Concept, EvaluatorUpdateRequest, MemorySink, MessageType,
    NodeState, Scenario, SessionOptions, Task, Trigger, TriggerKind,
};
use common::{Faulty, Recorder, Remote, Scripted, assert_consistent, entity_state, message};

use AssessmentLevel::{AboveExpectation, AtExpectation, BelowExpectation};

fn collision_ends() -> Vec<Trigger> {
    vec![Trigger::new(TriggerKind::MessageReceived {
        message_type: MessageType::Collision,
    })]
}

fn scripted(node_id: u32, name: &str, condition: &str, levels: &[AssessmentLevel]) -> Concept {
    Concept::leaf(node_id, name, vec![Scripted::new(condition, levels).boxed()]).unwrap()
}

fn start(tasks: Vec<Task>, sink: Arc<MemorySink>) -> (Scenario, Arc<Recorder>) {
    let options = SessionOptions::default().with_sink(sink);
    let scenario = Scenario::new("Convoy", tasks, vec![], options).unwrap();
    let recorder = Recorder::new();
    scenario.initialize(recorder.clone()).unwrap();
    scenario.start().unwrap();
    (scenario, recorder)
}

// ==================== Scenario A ====================

#[tokio::test]
async fn condition_result_reaches_task_exactly_once() {
    let concept = scripted(2, "Maintain speed", "speed", &[BelowExpectation]);
    let task = Task::new(1, "Drive", vec![], collision_ends(), vec![concept]).unwrap();
    let sink = Arc::new(MemorySink::new());
    let (scenario, recorder) = start(vec![task], sink.clone());

    let pa = scenario.handle_message(&entity_state()).await.unwrap().unwrap();
    assert_eq!(pa.task("drive").unwrap().level, BelowExpectation);

    // Same evidence again: nothing changes, nothing is published
    assert!(scenario.handle_message(&entity_state()).await.unwrap().is_none());
    scenario.drained().await;

    let below: Vec<_> = sink
        .history("Drive")
        .into_iter()
        .filter(|s| s.level == BelowExpectation)
        .collect();
    assert_eq!(below.len(), 1);

    let published_below = recorder
        .assessments()
        .iter()
        .filter(|pa| pa.task("Drive").is_some_and(|t| t.level == BelowExpectation))
        .count();
    assert_eq!(published_below, 1);
}

// ==================== Scenario B ====================

#[tokio::test(start_paused = true)]
async fn delayed_end_finishes_task_without_another_message() {
    let end = Trigger::new(TriggerKind::MessageReceived {
        message_type: MessageType::Collision,
    })
    .with_delay(Duration::from_secs(5));
    let concept = scripted(2, "Maintain speed", "speed", &[]);
    let task = Task::new(1, "Drive", vec![], vec![end], vec![concept]).unwrap();
    let (scenario, recorder) = start(vec![task], Arc::new(MemorySink::new()));

    scenario.handle_message(&message(MessageType::Collision)).await.unwrap();
    let drive = scenario.task("Drive").unwrap();
    assert!(drive.is_active());

    tokio::time::sleep(Duration::from_millis(4900)).await;
    assert!(drive.is_active(), "task ended before its delay elapsed");

    assert_eq!(scenario.wait_until_ended().await, CompletionStatus::LessonRule);
    assert!(drive.is_finished());
    assert_eq!(drive.assessment().unwrap().state, NodeState::Finished);
    assert_eq!(recorder.ended(), vec![CompletionStatus::LessonRule]);
}

// ==================== Scenario C ====================

#[tokio::test]
async fn intermediate_concept_averages_children() {
    let below = scripted(3, "Radio discipline", "radio", &[BelowExpectation]);
    let above = scripted(4, "Spacing", "spacing", &[AboveExpectation]);
    let parent = Concept::composite(2, "Convoy drills", vec![below, above]).unwrap();
    let task = Task::new(1, "Drive", vec![], collision_ends(), vec![parent]).unwrap();
    let (scenario, _) = start(vec![task], Arc::new(MemorySink::new()));

    let pa = scenario.handle_message(&entity_state()).await.unwrap().unwrap();
    assert_eq!(scenario.find_node("radio discipline").unwrap().level, BelowExpectation);
    assert_eq!(scenario.find_node("spacing").unwrap().level, AboveExpectation);
    assert_eq!(scenario.find_node("convoy drills").unwrap().level, AtExpectation);
    assert_eq!(pa.task("Drive").unwrap().level, AtExpectation);
}

// ==================== Scenario D ====================

#[tokio::test]
async fn failing_conditions_do_not_stop_siblings() {
    let scripted = Scripted::new("speed", &[BelowExpectation]);
    let seen = scripted.seen.clone();
    let concept = Concept::leaf(
        2,
        "Maintain speed",
        vec![
            Box::new(Faulty { panics: false }),
            Box::new(Faulty { panics: true }),
            scripted.boxed(),
        ],
    )
    .unwrap();
    let task = Task::new(1, "Drive", vec![], collision_ends(), vec![concept]).unwrap();
    let (scenario, _) = start(vec![task], Arc::new(MemorySink::new()));

    let pa = scenario.handle_message(&entity_state()).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), 1);
    assert_eq!(pa.unwrap().task("Drive").unwrap().level, BelowExpectation);
    assert!(scenario.is_active());
}

// ==================== Scenario E ====================

#[tokio::test]
async fn observer_override_propagates_to_ancestors() {
    let speed = scripted(3, "Maintain Speed", "speed", &[]);
    let parent = Concept::composite(2, "Driving", vec![speed]).unwrap();
    let task = Task::new(1, "Drive", vec![], collision_ends(), vec![parent]).unwrap();
    let sink = Arc::new(MemorySink::new());
    let (scenario, recorder) = start(vec![task], sink.clone());
    scenario.drained().await;
    let before = recorder.assessments().len();

    let request = EvaluatorUpdateRequest::for_node("MAINTAIN SPEED")
        .with_performance(AboveExpectation)
        .with_evaluator("Sgt. Ruiz")
        .with_reason("textbook spacing");
    scenario.evaluator_update(&request).unwrap();
    scenario.drained().await;

    let speed = sink.history("Maintain Speed").last().cloned().unwrap();
    assert_eq!(speed.level, AboveExpectation);
    assert_eq!(speed.evaluator.as_deref(), Some("Sgt. Ruiz"));
    assert_eq!(scenario.find_node("driving").unwrap().level, AboveExpectation);

    let assessments = recorder.assessments();
    assert!(assessments.len() > before);
    assert_eq!(assessments.last().unwrap().task("Drive").unwrap().level, AboveExpectation);
}

#[tokio::test]
async fn override_is_replaced_by_new_evidence() {
    let concept = scripted(2, "Maintain speed", "speed", &[BelowExpectation]);
    let task = Task::new(1, "Drive", vec![], collision_ends(), vec![concept]).unwrap();
    let (scenario, _) = start(vec![task], Arc::new(MemorySink::new()));

    scenario
        .evaluator_update(
            &EvaluatorUpdateRequest::for_node("maintain speed").with_performance(AboveExpectation),
        )
        .unwrap();
    assert_eq!(scenario.find_node("maintain speed").unwrap().level, AboveExpectation);

    scenario.handle_message(&entity_state()).await.unwrap();
    assert_eq!(scenario.find_node("maintain speed").unwrap().level, BelowExpectation);
}

// ==================== Out-of-band updates ====================

#[tokio::test]
async fn condition_handle_updates_flow_through_queue() {
    let remote = Remote::new();
    let (level, done, handle) = (remote.level.clone(), remote.done.clone(), remote.handle.clone());
    let concept = Concept::leaf(2, "Threat assessment", vec![Box::new(remote)]).unwrap();
    let task = Task::new(1, "Observe", vec![], collision_ends(), vec![concept]).unwrap();
    let (scenario, recorder) = start(vec![task], Arc::new(MemorySink::new()));
    let handle = handle.lock().unwrap().clone().unwrap();

    *level.lock().unwrap() = AtExpectation;
    handle.assessment_updated();
    scenario.drained().await;
    assert_eq!(scenario.task("Observe").unwrap().assessment().unwrap().level, AtExpectation);

    *done.lock().unwrap() = true;
    handle.completed();
    assert_eq!(scenario.wait_until_ended().await, CompletionStatus::LessonRule);
    assert!(recorder.lifecycle().contains(&"ended:Threat assessment".to_string()));
    assert!(recorder.lifecycle().contains(&"ended:Observe".to_string()));
}

// ==================== Invariants ====================

#[tokio::test]
async fn nodes_are_never_active_and_finished() {
    let speed = Scripted::new("speed", &[AtExpectation, BelowExpectation]).completing();
    let first = Concept::leaf(2, "Speed", vec![speed.boxed()]).unwrap();
    let second = scripted(4, "Heading", "heading", &[AtExpectation]);
    let lead = Task::new(1, "Lead", vec![], collision_ends(), vec![first]).unwrap();
    let follow = Task::new(
        3,
        "Follow",
        vec![Trigger::new(TriggerKind::TaskEnded { node_id: 1 })],
        collision_ends(),
        vec![second],
    )
    .unwrap();
    let (scenario, _) = start(vec![lead, follow], Arc::new(MemorySink::new()));

    for _ in 0..4 {
        scenario.handle_message(&entity_state()).await.unwrap();
        scenario.drained().await;
        let mut views = scenario.task_views();
        for task in scenario.tasks() {
            views.extend(task.concept_views());
        }
        assert_consistent(&views);
    }

    assert!(scenario.task("Lead").unwrap().is_finished());
    assert!(scenario.task("Follow").unwrap().is_active());
}
