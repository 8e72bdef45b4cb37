//! Integration tests for fail-fast pipeline execution with MemoryJournal.

use std::path::PathBuf;

use stepline_core::{
    exit_codes, ExecutionContext, FailureKind, MemoryJournal, Pipeline, PipelineError,
    RunEventKind, RunGate, RunReport, RunStatus, Step, StepStatus,
};
use tempfile::TempDir;

fn workspace() -> (TempDir, ExecutionContext) {
    let dir = TempDir::new().expect("tempdir");
    let ctx = ExecutionContext::from_current_process()
        .expect("capture context")
        .with_cwd(dir.path());
    (dir, ctx)
}

fn image_steps() -> Vec<Step> {
    vec![
        Step::shell("build", "mkdir -p out && echo image > out/img.tar")
            .unwrap()
            .with_artifacts(["out/img.tar"])
            .unwrap(),
        Step::shell("run", "echo '{}' > stats.json")
            .unwrap()
            .with_artifacts(["stats.json"])
            .unwrap(),
        Step::shell("export", "cp out/img.tar exported.tar && touch second.tar")
            .unwrap()
            .with_artifacts(["*.tar"])
            .unwrap(),
    ]
}

/// Test: every step passes, one result per step in order
#[tokio::test]
async fn test_successful_pipeline() {
    let (dir, ctx) = workspace();
    let journal = MemoryJournal::new();
    let pipeline = Pipeline::new("image", image_steps()).unwrap();

    let run = pipeline.run(&ctx, &journal).await.expect("pipeline failed");

    assert_eq!(run.status(), &RunStatus::Succeeded);
    let names: Vec<&str> = run.steps().iter().map(|s| s.step_name.as_str()).collect();
    assert_eq!(names, vec!["build", "run", "export"]);
    assert_eq!(run.passed_count(), 3);
    assert!(run.finished_at().is_some());

    assert_eq!(run.steps()[0].artifacts[0].paths, vec![PathBuf::from("out/img.tar")]);
    assert_eq!(run.steps()[1].artifacts[0].paths, vec![PathBuf::from("stats.json")]);
    assert_eq!(
        run.steps()[2].artifacts[0].paths,
        vec![PathBuf::from("exported.tar"), PathBuf::from("second.tar")]
    );
    assert!(dir.path().join("exported.tar").exists());

    // run_started + 3 x (step_started, step_finished, artifacts_resolved) + run_finished
    let events = journal.events();
    assert_eq!(events.len(), 11);
    assert_eq!(events.first().unwrap().kind.name(), "run_started");
    assert_eq!(events.last().unwrap().kind.name(), "run_finished");
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));

    let verdict = RunGate::evaluate(&events);
    assert!(verdict.passed, "violations: {:?}", verdict.violations);

    let report = RunReport::from_run(pipeline.name(), &run);
    assert_eq!(report.exit_code, exit_codes::SUCCESS);
    assert_eq!(report.artifacts.len(), 4);
}

/// Test: first failing step halts the pipeline
#[tokio::test]
async fn test_fail_fast_stops_at_first_failure() {
    let (dir, ctx) = workspace();
    let journal = MemoryJournal::new();
    let steps = vec![
        Step::shell("build", "true").unwrap(),
        Step::shell("run", "exit 4").unwrap(),
        Step::shell("export", "touch should-not-exist").unwrap(),
    ];

    let run = Pipeline::new("image", steps)
        .unwrap()
        .run(&ctx, &journal)
        .await
        .expect("pipeline failed");

    assert_eq!(
        run.status(),
        &RunStatus::FailedAt {
            step: "run".to_string()
        }
    );
    assert_eq!(run.steps().len(), 2);
    assert_eq!(run.steps()[1].exit_code(), Some(4));
    assert!(!dir.path().join("should-not-exist").exists());

    let events = journal.events();
    assert!(events.iter().any(|e| e.kind.name() == "step_failed"));
    assert!(!events
        .iter()
        .any(|e| matches!(&e.kind, RunEventKind::StepStarted { step, .. } if step == "export")));

    let verdict = RunGate::evaluate(&events);
    assert!(!verdict.passed);
    assert_eq!(
        RunReport::from_run("image", &run).exit_code,
        exit_codes::STEP_FAILED
    );
}

/// Test: a single failing step records no artifacts
#[tokio::test]
async fn test_failed_step_records_no_artifacts() {
    let (_dir, ctx) = workspace();
    let steps = vec![Step::shell("build", "touch img.tar; exit 1")
        .unwrap()
        .with_artifacts(["*.tar"])
        .unwrap()];

    let run = stepline_core::run(steps, &ctx).await.expect("pipeline failed");

    assert_eq!(
        run.status(),
        &RunStatus::FailedAt {
            step: "build".to_string()
        }
    );
    assert_eq!(run.steps().len(), 1);
    assert!(run.steps()[0].artifacts.is_empty());
    assert!(run.artifact_paths().is_empty());
}

/// Test: a missing command aborts distinctly with the completed results
#[tokio::test]
async fn test_missing_command_is_step_not_found() {
    let (dir, ctx) = workspace();
    let journal = MemoryJournal::new();
    let steps = vec![
        Step::shell("build", "true").unwrap(),
        Step::new(
            "run",
            vec!["/nonexistent-binary-that-does-not-exist".to_string()],
        )
        .unwrap(),
        Step::shell("export", "touch should-not-exist").unwrap(),
    ];

    let err = Pipeline::new("image", steps)
        .unwrap()
        .run(&ctx, &journal)
        .await
        .expect_err("missing command should abort");

    match err {
        PipelineError::StepNotFound {
            step, completed, ..
        } => {
            assert_eq!(step, "run");
            assert_eq!(completed.len(), 1);
            assert_eq!(completed[0].step_name, "build");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!dir.path().join("should-not-exist").exists());

    let events = journal.events();
    assert_eq!(events.last().unwrap().kind.name(), "step_not_found");
    assert!(!RunGate::evaluate(&events).passed);
}

/// Test: timeout halts the pipeline and is tagged distinctly
#[tokio::test]
async fn test_timeout_halts_pipeline() {
    let (dir, ctx) = workspace();
    let steps = vec![
        Step::new("run", vec!["sleep".to_string(), "5".to_string()])
            .unwrap()
            .with_timeout_secs(1),
        Step::shell("export", "touch should-not-exist").unwrap(),
    ];

    let run = stepline_core::run(steps, &ctx).await.expect("pipeline failed");

    assert_eq!(run.steps().len(), 1);
    assert_eq!(run.steps()[0].status, StepStatus::TimedOut { timeout_secs: 1 });
    assert_eq!(
        run.steps()[0].failure_kind(),
        Some(FailureKind::StepTimeout)
    );
    assert!(!dir.path().join("should-not-exist").exists());
    assert_eq!(
        RunReport::from_run("image", &run).exit_code,
        exit_codes::STEP_TIMEOUT
    );
}

/// Test: same pipeline against an unchanged workspace matches the same paths
#[tokio::test]
async fn test_artifact_matches_are_idempotent() {
    let (_dir, ctx) = workspace();
    let pipeline = Pipeline::new("image", image_steps()).unwrap();

    let first = pipeline.run(&ctx, &MemoryJournal::new()).await.unwrap();
    let second = pipeline.run(&ctx, &MemoryJournal::new()).await.unwrap();

    let matches = |run: &stepline_core::PipelineRun| {
        run.steps()
            .iter()
            .map(|s| s.artifacts.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(matches(&first), matches(&second));
    assert_ne!(first.run_id(), second.run_id());
    assert_eq!(first.pipeline_digest(), second.pipeline_digest());
}

/// Test: an empty glob is reported, not dropped, and is not a failure
#[tokio::test]
async fn test_empty_artifact_match_is_reported() {
    let (_dir, ctx) = workspace();
    let journal = MemoryJournal::new();
    let steps = vec![Step::shell("run", "true")
        .unwrap()
        .with_artifacts(["output/stats.json", "*.tar"])
        .unwrap()];

    let run = Pipeline::new("image", steps)
        .unwrap()
        .run(&ctx, &journal)
        .await
        .unwrap();

    assert!(run.is_success());
    let artifacts = &run.steps()[0].artifacts;
    assert_eq!(artifacts.len(), 2);
    assert!(artifacts.iter().all(|m| m.is_empty()));

    let resolved = journal
        .events()
        .into_iter()
        .filter(|e| e.kind.name() == "artifacts_resolved")
        .count();
    assert_eq!(resolved, 2);
}

/// Test: steps see the context environment, not the ambient one
#[tokio::test]
async fn test_context_environment_reaches_steps() {
    std::env::set_var("STEPLINE_PIPELINE_AMBIENT_ONLY", "leaked");
    let dir = TempDir::new().expect("tempdir");
    let ctx = ExecutionContext::new(dir.path())
        .with_var("PATH", std::env::var("PATH").unwrap_or_default())
        .with_var("STEPLINE_STATS_NAME", "stats.json");
    let steps = vec![Step::shell(
        "run",
        "echo \"${STEPLINE_PIPELINE_AMBIENT_ONLY-unset}\" > \"$STEPLINE_STATS_NAME\"",
    )
    .unwrap()
    .with_artifacts(["stats.json"])
    .unwrap()];

    let run = stepline_core::run(steps, &ctx).await.unwrap();

    assert!(run.is_success());
    let written = std::fs::read_to_string(dir.path().join("stats.json")).unwrap();
    assert_eq!(written.trim(), "unset");
    assert_eq!(run.artifact_paths(), vec![PathBuf::from("stats.json")]);
    assert_eq!(run.context_digest(), ctx.digest());
}

/// Test: a step killed by a signal halts the pipeline as an execution failure
#[tokio::test]
async fn test_signal_terminated_step_halts_pipeline() {
    let (dir, ctx) = workspace();
    let journal = MemoryJournal::new();
    let steps = vec![
        Step::shell("run", "kill -9 $$").unwrap(),
        Step::shell("export", "touch should-not-exist").unwrap(),
    ];

    let run = Pipeline::new("image", steps)
        .unwrap()
        .run(&ctx, &journal)
        .await
        .expect("pipeline failed");

    assert_eq!(
        run.status(),
        &RunStatus::FailedAt {
            step: "run".to_string()
        }
    );
    assert_eq!(run.steps().len(), 1);
    assert_eq!(run.steps()[0].status, StepStatus::Terminated);
    assert_eq!(run.steps()[0].exit_code(), None);
    assert_eq!(
        run.steps()[0].failure_kind(),
        Some(FailureKind::StepExecutionFailure)
    );
    assert!(!dir.path().join("should-not-exist").exists());

    let events = journal.events();
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        RunEventKind::StepFailed { step, exit_code: None, .. } if step == "run"
    )));
    assert!(!RunGate::evaluate(&events).passed);
    assert_eq!(
        RunReport::from_run("image", &run).exit_code,
        exit_codes::STEP_FAILED
    );
}

/// Test: a step that leaves a background process behind still finishes on time
#[tokio::test]
async fn test_background_process_does_not_stall_pipeline() {
    let (_dir, ctx) = workspace();
    let steps = vec![
        Step::shell("run", "sleep 5 & exit 0")
            .unwrap()
            .with_timeout_secs(1),
        Step::shell("export", "true").unwrap(),
    ];

    let started = std::time::Instant::now();
    let run = stepline_core::run(steps, &ctx).await.expect("pipeline failed");

    assert!(run.is_success());
    assert_eq!(run.passed_count(), 2);
    assert!(started.elapsed() < std::time::Duration::from_secs(4));
}
