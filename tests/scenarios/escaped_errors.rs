//! Steps that break their contract by returning `Err`, panicking, or never
//! resolving to a module

use crate::helpers::*;
use forgeline::core::{BuildLog, BuildTargetConfig, StageKind, Workspace};
use forgeline::modules::builtin::LocalSourceConfig;
use forgeline::{BuildStatus, CancellationFlag};
use std::sync::Arc;

#[tokio::test]
async fn test_raised_error_becomes_a_stage_failure() {
    let yaml = r#"
name: Demo
targets:
  - name: Release
    build:
      - name: Scripted
        label: compile
        raise: true
      - name: Scripted
        label: package
    notify:
      - name: Scripted
        label: mail
"#;
    let run = run_target(yaml, "Release").await;
    let build = &run.results.build;

    assert_ran(build, false);
    assert_eq!(build.steps.len(), 1);
    let error = build.steps[0].error.as_ref().unwrap();
    assert_eq!(error.kind, "StepExecutionError");
    assert!(error.message.contains("scripted error in compile"));
    assert!(build.error.as_deref().unwrap().contains("raised an error"));

    assert_skipped_failed(&run.results.archive);
    assert_ran(&run.results.notify, true);
    assert_eq!(run.executed(), vec!["compile", "mail"]);
}

#[tokio::test]
async fn test_rejected_configuration_fails_the_stage() {
    let yaml = r#"
name: Demo
targets:
  - name: Release
    build:
      - name: Shell
        command: "   "
"#;
    let run = run_target(yaml, "Release").await;
    let build = &run.results.build;

    assert_ran(build, false);
    assert!(build.steps.is_empty());
    assert!(build
        .error
        .as_deref()
        .unwrap()
        .contains("rejected its configuration"));
}

#[tokio::test]
async fn test_config_from_another_stage_is_a_type_mismatch() {
    let registry = scripted_registry();
    let runner = runner(registry);
    let config = LocalSourceConfig {
        name: "Local".to_string(),
        path: "/nonexistent".into(),
    };
    let target = BuildTargetConfig::new("Release").with_step(StageKind::Build, Arc::new(config));

    let err = runner.loader().validate_target(&target).unwrap_err();
    assert!(matches!(err, forgeline::Error::StepTypeMismatch { .. }));

    let dir = tempfile::tempdir().unwrap();
    let ws = Workspace::new(dir.path(), 1, "Demo", "Release");
    let results = runner
        .run(&target, &ws, &BuildLog::new(1), &CancellationFlag::new())
        .await;

    assert_ran(&results.build, false);
    assert!(results.build.steps.is_empty());
    assert!(results.build.error.as_deref().unwrap().contains("source step"));
}

#[tokio::test]
async fn test_panicking_step_fails_its_stage_and_notify_still_runs() {
    let yaml = r#"
name: Demo
targets:
  - name: Crash
    build:
      - name: Scripted
        label: compile
        panic: true
      - name: Scripted
        label: package
    notify:
      - name: Scripted
        label: mail
  - name: Release
    build:
      - name: Scripted
        label: after-crash
"#;
    let registry = scripted_registry();
    let project = parse_project(yaml, &registry);
    let (queue, _dir) = started_queue(registry).await;

    let crashed = queue
        .enqueue_build(Arc::clone(&project), Some("Crash"))
        .await
        .unwrap();
    let next = queue.enqueue_build(project, Some("Release")).await.unwrap();

    let crashed = queue.wait_for(crashed.id).await.unwrap();
    assert_eq!(crashed.status, BuildStatus::Failed);
    assert!(crashed.error.is_none());
    let results = crashed.results.as_ref().unwrap();
    assert_ran(&results.build, false);
    assert_eq!(results.build.steps.len(), 1);
    let error = results.build.steps[0].error.as_ref().unwrap();
    assert_eq!(error.kind, "StepExecutionError");
    assert!(error.message.contains("scripted panic in compile"));
    assert!(results.build.error.as_deref().unwrap().contains("panicked"));
    assert_skipped_failed(&results.archive);
    assert_skipped_failed(&results.distribute);
    assert_ran(&results.notify, true);
    assert_eq!(executed_labels(&crashed.log), vec!["compile", "mail"]);

    let next = queue.wait_for(next.id).await.unwrap();
    assert_eq!(next.status, BuildStatus::Complete);
    assert_eq!(executed_labels(&next.log), vec!["after-crash"]);
    assert!(queue.active_build().await.is_none());
}
