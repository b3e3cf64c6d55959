use std::fs;

use bias_harness::checkpoint::CheckpointStore;
use bias_harness::{
    FailureDecision, RunChoice, RunSelector, ScriptedInteraction, SelectionError,
};

fn scripted(choice: RunChoice) -> ScriptedInteraction {
    ScriptedInteraction::new(FailureDecision::Stop {
        save_checkpoint: true,
    })
    .with_run_choice(choice)
}

fn seed_run(root: &std::path::Path, run_id: &str, last: usize, total: usize, end: usize) {
    let dir = root.join(run_id);
    fs::create_dir_all(&dir).unwrap();
    CheckpointStore::new(&dir)
        .save(last, total, "seed/model", 0, end)
        .unwrap();
}

#[test]
fn invalid_ranges_are_rejected_before_anything_is_created() {
    let root = tempfile::tempdir().unwrap();
    let selector = RunSelector::new(root.path().join("results"), 5);

    for (start, end) in [(3, 2), (0, 5), (7, 9)] {
        let err = selector.fresh(start, end).unwrap_err();
        assert!(matches!(err, SelectionError::InvalidRange { .. }), "{start}-{end}");
    }
    assert!(!root.path().join("results").exists());

    let err = RunSelector::new(root.path(), 0).fresh(0, 0).unwrap_err();
    assert_eq!(err, SelectionError::EmptyDataset);
}

#[test]
fn fresh_plan_does_not_create_the_directory() {
    let root = tempfile::tempdir().unwrap();
    let plan = RunSelector::new(root.path(), 5).fresh(1, 3).unwrap();
    assert!(!plan.run_dir.exists());
    assert!(plan.resume_from.is_none());
    assert!(plan.model.is_none());
    assert_eq!(plan.effective_start(), 1);
    assert_eq!(plan.range.len(), 3);
    assert_eq!(plan.run_id.len(), "20240101_000000".len());
}

#[test]
fn named_fresh_run_refuses_an_existing_directory() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join("taken")).unwrap();
    let err = RunSelector::new(root.path(), 5)
        .fresh_named("taken", 0, 4)
        .unwrap_err();
    assert_eq!(err, SelectionError::RunExists("taken".into()));
}

#[test]
fn interactive_fresh_choice_is_validated() {
    let root = tempfile::tempdir().unwrap();
    let selector = RunSelector::new(root.path(), 5);
    let err = selector
        .select(&mut scripted(RunChoice::Fresh { start: 0, end: 9 }))
        .unwrap_err();
    assert!(matches!(err, SelectionError::InvalidRange { end: 9, .. }));
}

#[test]
fn interactive_resume_uses_the_checkpoint() {
    let root = tempfile::tempdir().unwrap();
    seed_run(root.path(), "20240101_000000", 3, 10, 9);
    seed_run(root.path(), "20240102_000000", 6, 10, 8);

    let selector = RunSelector::new(root.path(), 10);
    let plan = selector
        .select(&mut scripted(RunChoice::Resume(0)))
        .unwrap();

    assert_eq!(plan.run_id, "20240102_000000");
    assert_eq!(plan.run_dir, root.path().join("20240102_000000"));
    assert_eq!(plan.range.end_index, 8);
    assert_eq!(plan.effective_start(), 7);
    assert_eq!(plan.model.as_deref(), Some("seed/model"));
    assert!(plan.is_resume());

    let err = selector
        .select(&mut scripted(RunChoice::Resume(5)))
        .unwrap_err();
    assert!(matches!(err, SelectionError::UnknownRun(_)));
}

#[test]
fn resume_rejects_a_different_dataset() {
    let root = tempfile::tempdir().unwrap();
    seed_run(root.path(), "20240101_000000", 3, 10, 9);

    let err = RunSelector::new(root.path(), 12)
        .resume("20240101_000000")
        .unwrap_err();
    assert_eq!(
        err,
        SelectionError::DatasetMismatch {
            run_id: "20240101_000000".into(),
            recorded: 10,
            actual: 12,
        }
    );
}

#[test]
fn resume_of_unknown_run_fails() {
    let root = tempfile::tempdir().unwrap();
    let err = RunSelector::new(root.path(), 10).resume("missing").unwrap_err();
    assert_eq!(err, SelectionError::UnknownRun("missing".into()));
}

#[test]
fn cancel_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let err = RunSelector::new(root.path(), 3)
        .select(&mut scripted(RunChoice::Cancel))
        .unwrap_err();
    assert_eq!(err, SelectionError::Cancelled);
}
