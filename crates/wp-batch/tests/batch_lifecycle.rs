// batch_lifecycle.rs — Batches run, fail, get interrupted and resume, on disk.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tempfile::tempdir;

use wp_authz::{AuthorizationPipeline, DeferredPrompt};
use wp_batch::{
    BatchCoordinator, BatchError, BatchEvent, BatchStatus, Checkpoint, CheckpointManager,
    EventDispatcher, NotificationSink, RecoverySource, StageContext, StageExecutor, StageFailure,
    WorkItem,
};
use wp_config::WaypointConfig;
use wp_pipeline::{Stage, StageStatus, StageTracker};
use wp_policy::ToolAction;

/// Collects events in memory.
#[derive(Clone, Default)]
struct Collected(Arc<Mutex<Vec<BatchEvent>>>);

impl Collected {
    fn types(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }
}

impl NotificationSink for Collected {
    fn send(&self, event: &BatchEvent) -> Result<(), BatchError> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Records every (item, stage) it runs; fails or interrupts on cue.
#[derive(Default)]
struct Scripted {
    ran: Vec<(usize, Stage)>,
    fail_item: Option<usize>,
    interrupt_at: Option<(usize, Stage)>,
}

impl StageExecutor for Scripted {
    fn run_stage(
        &mut self,
        item: &WorkItem,
        ctx: &mut StageContext<'_>,
    ) -> Result<String, StageFailure> {
        let stage = ctx.stage();
        if self.interrupt_at == Some((item.index, stage)) {
            return Err(StageFailure::Interrupted);
        }
        self.ran.push((item.index, stage));
        if self.fail_item == Some(item.index) && stage == Stage::Implement {
            return Err(StageFailure::failed("tests still red"));
        }
        Ok(format!("{} finished {}", stage, item.description))
    }
}

fn coordinator(root: &Path, events: Option<Collected>) -> BatchCoordinator {
    let mut dispatcher = EventDispatcher::new();
    if let Some(sink) = events {
        dispatcher.add_sink(Box::new(sink));
    }
    BatchCoordinator::new(
        CheckpointManager::new(root.join("checkpoints"), 50)
            .with_state_file(root.join("batch_state.json")),
        StageTracker::new(root.join("pipeline_logs")),
        AuthorizationPipeline::new(root),
    )
    .with_events(dispatcher)
}

fn items(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("feature {}", i)).collect()
}

#[test]
fn failing_item_is_recorded_and_the_batch_continues() {
    let dir = tempdir().unwrap();
    let events = Collected::default();
    let mut c = coordinator(dir.path(), Some(events.clone()));
    c.submit(Some("b3".into()), items(3)).unwrap();

    let mut exec = Scripted {
        fail_item: Some(2),
        ..Default::default()
    };
    let summary = c.run(&mut exec).unwrap();

    assert_eq!(summary.completed, vec![0, 1]);
    assert_eq!(summary.failed, vec![2]);
    assert_eq!(summary.current_index, 3);
    assert_eq!(summary.status, BatchStatus::Completed);

    // Implement was attempted exactly twice for the failing item.
    let implement_attempts = exec
        .ran
        .iter()
        .filter(|(i, s)| *i == 2 && *s == Stage::Implement)
        .count();
    assert_eq!(implement_attempts, 2);

    let types = events.types();
    assert_eq!(types.first().map(String::as_str), Some("batch_submitted"));
    assert_eq!(types.last().map(String::as_str), Some("batch_finished"));
    assert_eq!(types.iter().filter(|t| *t == "item_completed").count(), 2);
    assert_eq!(types.iter().filter(|t| *t == "item_failed").count(), 1);
}

#[test]
fn completed_items_have_every_stage_exactly_once() {
    let dir = tempdir().unwrap();
    let mut c = coordinator(dir.path(), None);
    c.submit(Some("b2".into()), items(2)).unwrap();
    c.run(&mut Scripted::default()).unwrap();

    for entry in fs::read_dir(dir.path().join("pipeline_logs")).unwrap() {
        let run = StageTracker::read_log(&entry.unwrap().path()).unwrap().unwrap();
        assert!(run.completeness().complete);
        for stage in Stage::ALL {
            let completed = run
                .agents
                .iter()
                .filter(|r| r.agent == stage && r.status == StageStatus::Completed)
                .count();
            assert_eq!(completed, 1, "stage {} in run {}", stage, run.session_id);
        }
    }
}

#[test]
fn resume_from_index_two_never_reruns_earlier_items() {
    let dir = tempdir().unwrap();
    let checkpoint = Checkpoint {
        version: 1,
        batch_id: "b5".into(),
        current_feature_index: 2,
        total_features: 5,
        completed_features: vec![0, 1],
        failed_features: vec![],
        features: items(5),
        saved_at: chrono::Utc::now(),
        current_run_id: None,
        status: None,
    };
    wp_store::write_json(
        &dir.path().join("checkpoints/b5/checkpoint-000001.json"),
        &checkpoint,
    )
    .unwrap();

    let mut c = coordinator(dir.path(), None);
    let report = c.resume("b5").unwrap();
    assert_eq!(report.next_index, Some(2));
    assert_eq!(report.next_stage, Some(Stage::Research));
    assert_eq!(report.completed, 2);
    assert_eq!(report.total, 5);
    assert_eq!(report.status, BatchStatus::InProgress);

    let mut exec = Scripted::default();
    let summary = c.run(&mut exec).unwrap();
    let touched: BTreeSet<usize> = exec.ran.iter().map(|(i, _)| *i).collect();
    assert_eq!(touched, BTreeSet::from([2, 3, 4]));
    assert_eq!(summary.completed, vec![0, 1, 2, 3, 4]);
}

#[test]
fn interruption_after_implement_resumes_at_review() {
    let dir = tempdir().unwrap();
    {
        let mut c = coordinator(dir.path(), None);
        c.submit(Some("bi".into()), items(2)).unwrap();
        let mut exec = Scripted {
            interrupt_at: Some((0, Stage::Review)),
            ..Default::default()
        };
        match c.run(&mut exec) {
            Err(BatchError::Interrupted { index, stage, .. }) => {
                assert_eq!(index, 0);
                assert_eq!(stage, Stage::Review);
            }
            other => panic!("expected interruption, got {:?}", other),
        }
    }

    // A new process picks the batch up from disk.
    let mut c = coordinator(dir.path(), None);
    let report = c.resume("bi").unwrap();
    assert_eq!(report.next_index, Some(0));
    assert_eq!(report.next_stage, Some(Stage::Review));
    assert!(matches!(report.source, RecoverySource::Checkpoint { .. }));

    let mut exec = Scripted::default();
    let summary = c.run(&mut exec).unwrap();
    let first_item: Vec<Stage> = exec
        .ran
        .iter()
        .filter(|(i, _)| *i == 0)
        .map(|(_, s)| *s)
        .collect();
    assert_eq!(
        first_item,
        vec![Stage::Review, Stage::SecurityAudit, Stage::Document, Stage::Commit]
    );
    assert_eq!(summary.completed, vec![0, 1]);
}

#[test]
fn truncated_checkpoint_falls_back_to_the_previous_one() {
    let dir = tempdir().unwrap();
    {
        let mut c = coordinator(dir.path(), None);
        c.submit(Some("bt".into()), items(2)).unwrap();
        let mut exec = Scripted {
            interrupt_at: Some((1, Stage::Research)),
            ..Default::default()
        };
        assert!(matches!(c.run(&mut exec), Err(BatchError::Interrupted { .. })));
    }

    let mgr = CheckpointManager::new(dir.path().join("checkpoints"), 50);
    let files = mgr.list("bt").unwrap();
    let newest = files.last().unwrap();
    let raw = fs::read(newest).unwrap();
    fs::write(newest, &raw[..raw.len() / 2]).unwrap();

    let events = Collected::default();
    let mut c = coordinator(dir.path(), Some(events.clone()));
    let report = c.resume("bt").unwrap();
    assert_eq!(report.next_index, Some(1));
    assert_eq!(report.next_stage, Some(Stage::Research));
    assert_eq!(report.completed, 1);
    assert!(events.types().contains(&"recovery_fallback".to_string()));

    let summary = c.run(&mut Scripted::default()).unwrap();
    assert_eq!(summary.completed, vec![0, 1]);
}

#[test]
fn checkpoint_indices_never_decrease() {
    let dir = tempdir().unwrap();
    let mut c = coordinator(dir.path(), None);
    c.submit(Some("bn".into()), items(4)).unwrap();
    c.run(&mut Scripted {
        fail_item: Some(1),
        ..Default::default()
    })
    .unwrap();

    let mgr = CheckpointManager::new(dir.path().join("checkpoints"), 50);
    let indices: Vec<usize> = mgr
        .list("bn")
        .unwrap()
        .iter()
        .map(|p| {
            wp_store::read_json::<Checkpoint>(p)
                .unwrap()
                .unwrap()
                .current_feature_index
        })
        .collect();
    assert!(indices.len() > 4);
    assert!(indices.windows(2).all(|w| w[0] <= w[1]), "{:?}", indices);
    assert_eq!(indices.last(), Some(&4));
}

#[test]
fn nothing_on_disk_is_an_unknown_batch() {
    let dir = tempdir().unwrap();
    let mut c = coordinator(dir.path(), None);
    assert!(matches!(
        c.resume("ghost"),
        Err(BatchError::UnknownBatch(_))
    ));
}

#[test]
fn blocked_actions_fail_the_stage_through_the_real_pipeline() {
    struct Traversal;
    impl StageExecutor for Traversal {
        fn run_stage(
            &mut self,
            _item: &WorkItem,
            ctx: &mut StageContext<'_>,
        ) -> Result<String, StageFailure> {
            let outcome = ctx.authorize(&ToolAction::write("../../etc/passwd"));
            if outcome.decision.is_safe() {
                Ok("wrote".into())
            } else {
                Err(StageFailure::failed(outcome.explanation()))
            }
        }
    }

    let dir = tempdir().unwrap();
    let config = WaypointConfig::for_project(dir.path());
    fs::create_dir_all(&config.state_dir).unwrap();
    fs::write(&config.policy_file, "{}").unwrap();
    let pipeline = AuthorizationPipeline::standard(&config, Box::new(DeferredPrompt)).unwrap();

    let mut c = BatchCoordinator::from_config(&config, pipeline);
    c.submit(Some("bx".into()), items(1)).unwrap();
    let summary = c.run(&mut Traversal).unwrap();
    assert_eq!(summary.failed, vec![0]);

    let run_log = fs::read_dir(&config.pipeline_log_dir)
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let run = StageTracker::read_log(&run_log).unwrap().unwrap();
    let failure = run.last_failure(Stage::Research).unwrap();
    assert!(failure.message.as_deref().unwrap_or("").contains("blocked"));
    assert!(failure.tools_used.is_empty());

    let events = wp_batch::read_event_log(&config.events_log).unwrap();
    assert!(events.iter().any(|e| e.event_type() == "item_failed"));
}
