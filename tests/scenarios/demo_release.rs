//! The Demo/Release walkthrough: one shell build step, nothing else
//! configured except a log notification.

use crate::helpers::*;
use forgeline::BuildStatus;
use std::sync::Arc;

fn demo_project(command: &str) -> String {
    format!(
        r#"
name: Demo
targets:
  - name: Release
    build:
      - name: Shell
        command: "{}"
    notify:
      - name: Log
"#,
        command
    )
}

#[cfg(unix)]
#[tokio::test]
async fn test_successful_shell_build_completes() {
    let registry = scripted_registry();
    let project = parse_project(&demo_project("exit 0"), &registry);
    let (queue, _dir) = started_queue(registry).await;

    let build = queue.enqueue_build(project, Some("Release")).await.unwrap();
    assert_eq!(build.status, BuildStatus::Queued);

    let finished = queue.wait_for(build.id).await.unwrap();
    assert_eq!(finished.status, BuildStatus::Complete);
    let results = finished.results.as_ref().unwrap();
    assert_eq!(results.target, "Release");
    assert_ran(&results.build, true);
    assert_eq!(results.build.steps[0].output.exit_code, Some(0));
    assert_skipped_ok(&results.archive);
    assert_skipped_ok(&results.distribute);
    assert_ran(&results.notify, true);
    assert_eq!(
        results.notify.steps[0].output.delivered_to.as_deref(),
        Some("build log")
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_failing_shell_build_fails_but_still_notifies() {
    let registry = scripted_registry();
    let project = parse_project(&demo_project("exit 1"), &registry);
    let (queue, _dir) = started_queue(registry).await;

    let build = queue.enqueue_build(project, Some("Release")).await.unwrap();
    let finished = queue.wait_for(build.id).await.unwrap();
    assert_eq!(finished.status, BuildStatus::Failed);

    let results = finished.results.as_ref().unwrap();
    assert_ran(&results.build, false);
    let error = results.build.failed_step().unwrap().error.clone().unwrap();
    assert_eq!(error.kind, "NonZeroExit");
    assert_skipped_failed(&results.archive);
    assert_skipped_failed(&results.distribute);
    assert_eq!(results.notify.steps.len(), 1);
    assert!(!results.notify.is_skipped);
}

#[cfg(unix)]
#[tokio::test]
async fn test_shell_output_lands_in_the_build_log() {
    let registry = scripted_registry();
    let project = parse_project(&demo_project("echo compiling demo"), &registry);
    let (queue, _dir) = started_queue(registry).await;

    let build = queue.enqueue_build(project, None).await.unwrap();
    let finished = queue.wait_for(build.id).await.unwrap();
    assert_eq!(finished.status, BuildStatus::Complete);

    let lines = finished.log.lines();
    assert!(lines.iter().any(|line| line.message == "compiling demo"));
    assert!(lines.iter().any(|line| line.message == "Build started"));
}

#[tokio::test]
async fn test_first_target_runs_when_none_is_named() {
    let yaml = r#"
name: Demo
targets:
  - name: Release
    build:
      - name: Scripted
        label: release-build
  - name: Debug
    build:
      - name: Scripted
        label: debug-build
"#;
    let registry = scripted_registry();
    let project = parse_project(yaml, &registry);
    let (queue, _dir) = started_queue(registry).await;

    let build = queue.enqueue_build(project, None).await.unwrap();
    assert_eq!(build.target, "Release");
    let finished = queue.wait_for(build.id).await.unwrap();

    assert_eq!(finished.status, BuildStatus::Complete);
    assert_eq!(finished.target, "Release");
    assert_eq!(finished.results.as_ref().unwrap().target, "Release");
    assert_eq!(executed_labels(&finished.log), vec!["release-build"]);
}

#[tokio::test]
async fn test_other_targets_do_not_affect_the_default_build() {
    let yaml = r#"
name: Demo
targets:
  - name: Release
    build:
      - name: Scripted
        label: release-build
  - name: Debug
    build:
      - name: Scripted
        label: debug-build
        fail: true
"#;
    let registry = scripted_registry();
    let project = parse_project(yaml, &registry);
    let (queue, _dir) = started_queue(registry).await;

    let release = queue
        .enqueue_build(Arc::clone(&project), None)
        .await
        .unwrap();
    let debug = queue.enqueue_build(project, Some("Debug")).await.unwrap();

    let release = queue.wait_for(release.id).await.unwrap();
    assert_eq!(release.status, BuildStatus::Complete);
    assert_eq!(executed_labels(&release.log), vec!["release-build"]);

    let debug = queue.wait_for(debug.id).await.unwrap();
    assert_eq!(debug.status, BuildStatus::Failed);
    assert_eq!(debug.target, "Debug");
    assert_eq!(executed_labels(&debug.log), vec!["debug-build"]);
}
