//! Incident run lifecycle: trigger, complete, fail, report, remove, summarize.

mod common;

use common::{harness, harness_with, running_fleet};
use incident_shared::{IncidentError, IncidentReport, RunStatus, INSUFFICIENT_DATA_SUMMARY};
use incidentd::lifecycle::CompletionWorker;
use incidentd::runtime::FakeRuntime;
use incidentd::shutdown::ShutdownSignal;
use incidentd::summarizer::FakeSummarizer;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_trigger_then_get_is_triggered() {
    let h = harness(running_fleet()).await;
    let lifecycle = &h.state.lifecycle;

    for scenario in ["stop", "bad_deployment"] {
        let run = lifecycle.trigger(scenario, Some(false)).await.unwrap();
        let loaded = lifecycle.get(run.id).await.unwrap();

        assert_eq!(loaded.status, RunStatus::Triggered);
        assert_eq!(loaded.scenario_name, scenario);
        assert_eq!(loaded.started_at, run.started_at);
        assert!(loaded.ended_at.is_none());
        assert!(h
            .config
            .lifecycle
            .impacted_services
            .contains(&loaded.logs.impacted_service));
    }
    assert_eq!(lifecycle.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_trigger_rejects_blank_scenario() {
    let h = harness(running_fleet()).await;
    let err = h.state.lifecycle.trigger("  ", None).await.unwrap_err();
    assert!(matches!(err, IncidentError::InvalidInput(_)));
    assert!(h.state.lifecycle.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_complete_writes_round_trippable_report() {
    let runtime = running_fleet().with_logs(
        "postgres_db",
        &["2024-05-01T10:00:00.000000000Z database system is ready to accept connections"],
    );
    let h = harness(runtime).await;
    let lifecycle = &h.state.lifecycle;

    let run = lifecycle.trigger("bad_deployment", None).await.unwrap();
    let done = lifecycle.complete(run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Succeeded);
    assert!(done.ended_at.unwrap() >= done.started_at);
    let expected_path = h.config.storage.reports_dir.join(format!("{}.json", run.id));
    assert_eq!(
        done.report_path.as_deref(),
        Some(expected_path.display().to_string().as_str())
    );

    let stored = lifecycle.get(run.id).await.unwrap();
    assert_eq!(stored, done);

    let download = lifecycle.report(run.id).await.unwrap();
    let report: IncidentReport = serde_json::from_slice(&download.bytes).unwrap();
    assert_eq!(report.id, run.id);
    assert_eq!(report.scenario, "bad_deployment");
    assert_eq!(report.status, RunStatus::Succeeded);
    let timeline = report.logs.timeline.unwrap();
    assert_eq!(timeline.get("postgres_db").unwrap().len(), 1);
    assert_eq!(download.file_name, format!("report_{}.json", run.id));
}

#[tokio::test]
async fn test_complete_unknown_run_is_not_found() {
    let h = harness(running_fleet()).await;
    let err = h.state.lifecycle.complete(Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_second_complete_keeps_first_report() {
    let h = harness(running_fleet()).await;
    let lifecycle = &h.state.lifecycle;

    let run = lifecycle.trigger("stop", None).await.unwrap();
    let first = lifecycle.complete(run.id).await.unwrap();
    let bytes = lifecycle.report(run.id).await.unwrap().bytes;

    // new log output must not leak into the existing report
    h.runtime.push_logs("health_checker", &["late line"]);
    let second = lifecycle.complete(run.id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(lifecycle.report(run.id).await.unwrap().bytes, bytes);
}

#[tokio::test]
async fn test_concurrent_completions_write_one_report() {
    let h = harness(running_fleet()).await;
    let lifecycle = h.state.lifecycle.clone();

    let run = lifecycle.trigger("stop", None).await.unwrap();
    let (a, b) = tokio::join!(lifecycle.complete(run.id), lifecycle.complete(run.id));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.status, RunStatus::Succeeded);
    assert_eq!(a.report_path, b.report_path);
    assert_eq!(a.ended_at, b.ended_at);

    let files: Vec<_> = std::fs::read_dir(&h.config.storage.reports_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(files.len(), 1, "unexpected report files: {:?}", files);
}

#[tokio::test]
async fn test_remove_deletes_record_and_file() {
    let h = harness(running_fleet()).await;
    let lifecycle = &h.state.lifecycle;

    let run = lifecycle.trigger("stop", None).await.unwrap();
    let done = lifecycle.complete(run.id).await.unwrap();
    let path = std::path::PathBuf::from(done.report_path.unwrap());
    assert!(path.exists());

    lifecycle.remove(run.id).await.unwrap();
    assert!(!path.exists());
    assert!(lifecycle.get(run.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_remove_without_report_is_fine() {
    let h = harness(running_fleet()).await;
    let lifecycle = &h.state.lifecycle;

    let run = lifecycle.trigger("stop", None).await.unwrap();
    lifecycle.remove(run.id).await.unwrap();
    assert!(lifecycle.list().await.unwrap().is_empty());

    assert!(lifecycle.remove(run.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_report_checks_the_file_not_just_the_row() {
    let h = harness(running_fleet()).await;
    let lifecycle = &h.state.lifecycle;

    let pending = lifecycle.trigger("stop", None).await.unwrap();
    assert!(lifecycle.report(pending.id).await.unwrap_err().is_not_found());

    let run = lifecycle.trigger("stop", None).await.unwrap();
    let done = lifecycle.complete(run.id).await.unwrap();
    std::fs::remove_file(done.report_path.unwrap()).unwrap();

    assert!(lifecycle.report(run.id).await.unwrap_err().is_not_found());
    // a vanished file does not block removal
    lifecycle.remove(run.id).await.unwrap();
}

#[tokio::test]
async fn test_fail_transition() {
    let h = harness(running_fleet()).await;
    let lifecycle = &h.state.lifecycle;

    let run = lifecycle.trigger("stop", None).await.unwrap();
    let failed = lifecycle.fail(run.id, "runtime went away").await.unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(failed.ended_at.is_some());
    assert_eq!(
        failed.logs.failure_reason.as_deref(),
        Some("runtime went away")
    );

    // Failed is terminal without a report
    assert!(lifecycle.complete(run.id).await.unwrap_err().is_not_found());
    assert_eq!(lifecycle.fail(run.id, "again").await.unwrap(), failed);

    let ok = lifecycle.trigger("stop", None).await.unwrap();
    lifecycle.complete(ok.id).await.unwrap();
    assert!(matches!(
        lifecycle.fail(ok.id, "late").await,
        Err(IncidentError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_unwritable_report_dir_fails_run() {
    let h = harness_with(
        running_fleet(),
        FakeSummarizer::new("unused"),
        |config| {
            // a regular file where the reports directory should be
            let blocker = config.storage.database_path.with_file_name("reports-file");
            std::fs::write(&blocker, b"not a directory").unwrap();
            config.storage.reports_dir = blocker;
        },
    )
    .await;
    let lifecycle = &h.state.lifecycle;

    let run = lifecycle.trigger("stop", None).await.unwrap();
    assert!(lifecycle.complete(run.id).await.is_err());

    let stored = lifecycle.get(run.id).await.unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert!(stored.report_path.is_none());
    assert!(stored.logs.failure_reason.is_some());
}

#[tokio::test]
async fn test_summarize_guards_insufficient_data() {
    let runtime = running_fleet().with_logs("health_checker", &["one", "two", "three", "four"]);
    let h = harness(runtime).await;

    let summary = h.state.lifecycle.summarize(200).await.unwrap();
    assert!(summary.insufficient_data);
    assert_eq!(summary.summary, INSUFFICIENT_DATA_SUMMARY);
    assert_eq!(summary.lines_considered, 4);
    assert_eq!(h.summarizer.call_count(), 0);
}

#[tokio::test]
async fn test_summarize_calls_collaborator_with_flattened_logs() {
    let runtime = running_fleet()
        .with_logs("user_service_victim", &["ERROR: could not connect to database"])
        .with_logs("health_checker", &["check 1 failed", "check 2 failed"])
        .with_logs("postgres_db", &["FATAL: password authentication failed"])
        .with_logs("backend_orchestrator", &["stopping user_service_victim"]);
    let h = harness(runtime).await;

    let summary = h.state.lifecycle.summarize(200).await.unwrap();
    assert!(!summary.insufficient_data);
    assert_eq!(summary.summary, "user_service_victim failed at startup.");
    assert_eq!(summary.lines_considered, 5);
    assert_eq!(h.summarizer.call_count(), 1);

    let prompt = h.summarizer.last_prompt().unwrap();
    // whitelist order, not timestamp order
    let victim = prompt.find("[user_service_victim] ERROR").unwrap();
    let db = prompt.find("[postgres_db] FATAL").unwrap();
    assert!(victim < db);
}

#[tokio::test]
async fn test_summarize_without_credentials() {
    let runtime = running_fleet().with_logs("health_checker", &["a", "b", "c", "d", "e"]);
    let h = harness_with(runtime, FakeSummarizer::unauthenticated(), |_| {}).await;

    let err = h.state.lifecycle.summarize(200).await.unwrap_err();
    assert!(matches!(err, IncidentError::Misconfiguration(_)));
    assert_eq!(err.status_code(), 500);
}

#[tokio::test]
async fn test_background_completion() {
    let mut h = harness(running_fleet()).await;
    let shutdown = ShutdownSignal::new();
    let worker = CompletionWorker::new(h.state.lifecycle.clone(), h.jobs.take().unwrap())
        .start(shutdown.listener());

    let run = h.state.lifecycle.trigger("stop", Some(true)).await.unwrap();
    assert_eq!(run.status, RunStatus::Triggered);

    let lifecycle = h.state.lifecycle.clone();
    let completed = tokio::time::timeout(Duration::from_secs(5), async move {
        loop {
            let current = lifecycle.get(run.id).await.unwrap();
            if current.status == RunStatus::Succeeded {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(completed.has_report());

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_background_completion_of_deleted_run_is_harmless() {
    let mut h = harness_with(FakeRuntime::new(), FakeSummarizer::new("x"), |config| {
        config.lifecycle.completion_delay_secs = 1;
    })
    .await;
    let shutdown = ShutdownSignal::new();
    let worker = CompletionWorker::new(h.state.lifecycle.clone(), h.jobs.take().unwrap())
        .start(shutdown.listener());

    let run = h.state.lifecycle.trigger("stop", Some(true)).await.unwrap();
    h.state.lifecycle.remove(run.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert!(h.state.lifecycle.list().await.unwrap().is_empty());
    assert!(!worker.is_finished());

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_remove_clears_report_at_its_expected_path() {
    let h = harness(running_fleet()).await;
    let lifecycle = &h.state.lifecycle;

    // a report on disk the row does not point at yet
    let run = lifecycle.trigger("stop", None).await.unwrap();
    let reports_dir = &h.config.storage.reports_dir;
    std::fs::create_dir_all(reports_dir).unwrap();
    let path = reports_dir.join(format!("{}.json", run.id));
    std::fs::write(&path, b"{}").unwrap();

    lifecycle.remove(run.id).await.unwrap();
    assert!(!path.exists());
    assert!(lifecycle.get(run.id).await.unwrap_err().is_not_found());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_during_completion_leaves_no_report() {
    let h = harness(running_fleet()).await;
    let reports_dir = h.config.storage.reports_dir.clone();

    for _ in 0..100 {
        let run = h.state.lifecycle.trigger("stop", Some(false)).await.unwrap();

        let completer = {
            let lifecycle = h.state.lifecycle.clone();
            tokio::spawn(async move { lifecycle.complete(run.id).await })
        };
        let remover = {
            let lifecycle = h.state.lifecycle.clone();
            tokio::spawn(async move {
                // delete as soon as the row carries its report path
                loop {
                    match lifecycle.get(run.id).await {
                        Ok(current) if current.has_report() => break,
                        Ok(_) => tokio::task::yield_now().await,
                        Err(_) => return,
                    }
                }
                lifecycle.remove(run.id).await.unwrap();
            })
        };

        match completer.await.unwrap() {
            Ok(done) => assert_eq!(done.status, RunStatus::Succeeded),
            Err(e) => assert!(e.is_not_found(), "unexpected error: {}", e),
        }
        remover.await.unwrap();

        assert!(h.state.lifecycle.get(run.id).await.unwrap_err().is_not_found());
        assert!(!reports_dir.join(format!("{}.json", run.id)).exists());
    }

    let leftovers: Vec<_> = std::fs::read_dir(&reports_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert!(leftovers.is_empty(), "files left behind: {:?}", leftovers);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_complete_and_fail_race_agree_on_outcome() {
    let h = harness(running_fleet()).await;

    for _ in 0..50 {
        let run = h.state.lifecycle.trigger("stop", Some(false)).await.unwrap();
        let completing = {
            let lifecycle = h.state.lifecycle.clone();
            tokio::spawn(async move { lifecycle.complete(run.id).await })
        };
        let failing = {
            let lifecycle = h.state.lifecycle.clone();
            tokio::spawn(async move { lifecycle.fail(run.id, "operator abort").await })
        };
        let completed = completing.await.unwrap();
        let failed = failing.await.unwrap();

        let stored = h.state.lifecycle.get(run.id).await.unwrap();
        match stored.status {
            RunStatus::Succeeded => {
                assert_eq!(completed.unwrap(), stored);
                assert!(matches!(failed, Err(IncidentError::InvalidInput(_))));
            }
            RunStatus::Failed => {
                assert!(completed.unwrap_err().is_not_found());
                assert_eq!(failed.unwrap(), stored);
                assert!(stored.report_path.is_none());
                let path = h.config.storage.reports_dir.join(format!("{}.json", run.id));
                assert!(!path.exists());
            }
            other => panic!("run left in {}", other),
        }
    }
}

#[tokio::test]
async fn test_concurrent_completions_with_unwritable_reports_report_the_write_error() {
    let h = harness_with(
        running_fleet(),
        FakeSummarizer::new("unused"),
        |config| {
            let blocker = config.storage.database_path.with_file_name("reports-file");
            std::fs::write(&blocker, b"not a directory").unwrap();
            config.storage.reports_dir = blocker;
        },
    )
    .await;
    let lifecycle = &h.state.lifecycle;

    let run = lifecycle.trigger("stop", None).await.unwrap();
    let (a, b) = tokio::join!(lifecycle.complete(run.id), lifecycle.complete(run.id));
    for result in [a, b] {
        let err = result.unwrap_err();
        assert!(
            !matches!(err, IncidentError::InvalidInput(_)),
            "completion surfaced {}",
            err
        );
    }
    assert_eq!(lifecycle.get(run.id).await.unwrap().status, RunStatus::Failed);
}

#[tokio::test]
async fn test_shutdown_leaves_pending_completions_triggered() {
    let mut h = harness_with(running_fleet(), FakeSummarizer::new("x"), |config| {
        config.lifecycle.completion_delay_secs = 3600;
    })
    .await;
    let shutdown = ShutdownSignal::new();
    let worker = CompletionWorker::new(h.state.lifecycle.clone(), h.jobs.take().unwrap())
        .start(shutdown.listener());

    let first = h.state.lifecycle.trigger("stop", Some(true)).await.unwrap();
    let second = h.state.lifecycle.trigger("stop", Some(true)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .unwrap()
        .unwrap();

    for id in [first.id, second.id] {
        let run = h.state.lifecycle.get(id).await.unwrap();
        assert_eq!(run.status, RunStatus::Triggered);
        assert!(!run.has_report());
    }
}
