use crate::helpers::*;
use forgeline::StageKind;

#[tokio::test]
async fn test_empty_optional_stages_are_skipped_and_successful() {
    let yaml = r#"
name: Demo
targets:
  - name: Release
    build:
      - name: Scripted
        label: compile
"#;
    let run = run_target(yaml, "Release").await;
    let results = &run.results;

    assert_skipped_ok(&results.source);
    assert_ran(&results.build, true);
    assert_skipped_ok(&results.archive);
    assert_skipped_ok(&results.distribute);
    assert_skipped_ok(&results.notify);
    assert!(results.is_success());
    assert_eq!(run.executed(), vec!["compile"]);
}

#[tokio::test]
async fn test_empty_build_stage_fails_the_run() {
    let yaml = r#"
name: Demo
targets:
  - name: Release
    source:
      - name: Scripted
        label: checkout
    archive:
      - name: Scripted
        label: zip
    notify:
      - name: Scripted
        label: announce
"#;
    let run = run_target(yaml, "Release").await;
    let results = &run.results;

    assert_ran(&results.source, true);
    assert!(results.build.is_skipped);
    assert!(!results.build.is_success);
    assert!(results.build.is_mandatory);
    assert_eq!(results.build.error.as_deref(), Some("No build steps configured"));
    assert_skipped_failed(&results.archive);
    assert_skipped_failed(&results.distribute);
    assert_ran(&results.notify, true);
    assert!(!results.is_success());
    assert_eq!(run.executed(), vec!["checkout", "announce"]);
}

#[tokio::test]
async fn test_failed_step_stops_its_stage() {
    let yaml = r#"
name: Demo
targets:
  - name: Release
    build:
      - name: Scripted
        label: compile
      - name: Scripted
        label: unit-tests
        fail: true
      - name: Scripted
        label: package
"#;
    let run = run_target(yaml, "Release").await;
    let build = &run.results.build;

    assert_ran(build, false);
    assert_eq!(build.steps.len(), 2);
    assert!(build.steps[0].is_success);
    let failed = build.failed_step().unwrap();
    assert_eq!(failed.error.as_ref().unwrap().kind, "ScriptedFailure");
    assert_eq!(run.executed(), vec!["compile", "unit-tests"]);
}

#[tokio::test]
async fn test_failure_gates_later_stages_but_notify_runs() {
    let yaml = r#"
name: Demo
targets:
  - name: Release
    build:
      - name: Scripted
        label: compile
    archive:
      - name: Scripted
        label: zip
        fail: true
    distribute:
      - name: Scripted
        label: upload
    notify:
      - name: Scripted
        label: mail
      - name: Scripted
        label: chat
"#;
    let run = run_target(yaml, "Release").await;
    let results = &run.results;

    assert_ran(&results.build, true);
    assert_ran(&results.archive, false);
    assert_skipped_failed(&results.distribute);
    assert_eq!(
        results.distribute.error.as_deref(),
        Some("Skipped because the archive stage failed")
    );
    assert_ran(&results.notify, true);
    assert_eq!(results.notify.steps.len(), 2);
    assert!(!results.is_success());
    assert_eq!(run.executed(), vec!["compile", "zip", "mail", "chat"]);
}

#[tokio::test]
async fn test_source_failure_short_circuits_the_run() {
    let yaml = r#"
name: Demo
targets:
  - name: Release
    source:
      - name: Scripted
        label: checkout
        fail: true
    build:
      - name: Scripted
        label: compile
    notify:
      - name: Scripted
        label: mail
"#;
    let run = run_target(yaml, "Release").await;
    let results = &run.results;

    assert_ran(&results.source, false);
    assert_skipped_failed(&results.build);
    assert_skipped_failed(&results.archive);
    assert_skipped_failed(&results.distribute);
    assert_ran(&results.notify, true);
    assert!(!results.is_success());
    assert_eq!(run.executed(), vec!["checkout", "mail"]);
}

#[tokio::test]
async fn test_notify_failure_does_not_change_the_outcome() {
    let yaml = r#"
name: Demo
targets:
  - name: Release
    build:
      - name: Scripted
    notify:
      - name: Scripted
        fail: true
"#;
    let run = run_target(yaml, "Release").await;

    assert_ran(&run.results.notify, false);
    assert!(run.results.build.is_success);
    assert!(run.results.is_success());
}

#[tokio::test]
async fn test_stage_summaries_follow_execution_order() {
    let yaml = r#"
name: Demo
targets:
  - name: Release
    build:
      - name: Scripted
"#;
    let run = run_target(yaml, "Release").await;
    let stages: Vec<StageKind> = run
        .results
        .stage_summaries()
        .iter()
        .map(|(stage, ..)| *stage)
        .collect();

    assert_eq!(stages, StageKind::ALL.to_vec());
    assert_eq!(stage_of(&run.results.distribute), StageKind::Distribute);
}
