//! Process supervision end to end: spawn, interact, stop, exit accounting.

use std::time::Duration;

use devtabs::logstore::LogStore;
use devtabs::models::process::ProcessState;
use devtabs::models::service::ServiceSpec;
use devtabs::orchestrator::spawn_crash_scan;
use devtabs::supervisor::{ManagedProcess, ProcessManager, SupervisorOptions};
use devtabs::AppError;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{quiet_options, wait_until, ECHO_LOOP};

fn sh(name: &str, script: &str) -> ServiceSpec {
    ServiceSpec::new(name, "/bin/sh", vec!["-c".into(), script.into()])
}

fn saw(process: &ManagedProcess, suffix: &str) -> bool {
    process.output().iter().any(|line| line.ends_with(suffix))
}

#[tokio::test]
async fn two_processes_interact_and_stop_independently() {
    let manager = ProcessManager::new(quiet_options());
    let api = manager.start("api", &sh("api", ECHO_LOOP), None).expect("api");
    let worker = manager.start("worker", &sh("worker", ECHO_LOOP), None).expect("worker");

    assert!(api.is_running());
    assert!(worker.is_running());
    assert!(wait_until(Duration::from_secs(5), || saw(&api, "ready")).await);

    api.send_input("r").await.expect("send");
    assert!(wait_until(Duration::from_secs(5), || saw(&api, "got r")).await);
    assert!(api.output().iter().any(|line| line.contains("[api]")));

    manager.stop("api").await.expect("stop api");
    assert_eq!(api.state(), ProcessState::Stopped);
    assert_eq!(worker.state(), ProcessState::Running);

    manager.stop_all().await;
    assert_eq!(worker.state(), ProcessState::Stopped);
    assert_eq!(
        manager.list(),
        vec![
            ("api".to_owned(), ProcessState::Stopped),
            ("worker".to_owned(), ProcessState::Stopped),
        ]
    );
}

#[tokio::test]
async fn duplicate_start_is_rejected_until_stopped() {
    let manager = ProcessManager::new(quiet_options());
    let first = manager.start("api", &sh("api", ECHO_LOOP), None).expect("first");

    let err = manager
        .start("api", &sh("api", ECHO_LOOP), None)
        .expect_err("live duplicate");
    assert!(matches!(err, AppError::AlreadyExists(_)));

    first.stop().await;
    let second = manager.start("api", &sh("api", ECHO_LOOP), None).expect("restart");
    assert_ne!(first.pid(), second.pid());
    assert!(second.is_running());
    second.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent_and_blocks_input() {
    let manager = ProcessManager::new(quiet_options());
    let api = manager.start("api", &sh("api", ECHO_LOOP), None).expect("api");

    api.stop().await;
    api.stop().await;
    manager.stop("api").await.expect("stop again");
    assert_eq!(api.state(), ProcessState::Stopped);

    let err = api.send_input("r").await.expect_err("stopped");
    assert!(matches!(err, AppError::NotRunning(_)));

    let err = manager.stop("ghost").await.expect_err("unknown id");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn launch_failure_records_nothing() {
    let manager = ProcessManager::new(quiet_options());
    let spec = ServiceSpec::new("bogus", "/nonexistent/devtabs-binary", Vec::new());

    let err = manager.start("bogus", &spec, None).expect_err("cannot launch");
    assert!(matches!(err, AppError::Spawn(_)));
    assert!(manager.get("bogus").is_none());
}

#[tokio::test]
async fn natural_failure_is_logged_and_detected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = LogStore::new(dir.path());
    let spec = sh("api", "echo boom; exit 3");
    let run = store.begin_run("api", &spec.command_line()).expect("run");

    let process = ManagedProcess::spawn("api", &spec, Some(&run), quiet_options()).expect("spawn");
    process.wait().await;

    assert_eq!(process.state(), ProcessState::Stopped);
    assert_eq!(process.exit_code(), Some(3));

    let log = std::fs::read_to_string(&run.file_path).expect("log");
    assert!(log.contains("boom"));
    assert!(log.contains("=== Exited with code 3"));
    assert_eq!(store.scan_failures(&["api".to_owned()]), vec!["api".to_owned()]);
}

#[tokio::test]
async fn deliberate_stop_is_not_a_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = LogStore::new(dir.path());
    let spec = sh("api", ECHO_LOOP);
    let run = store.begin_run("api", &spec.command_line()).expect("run");

    let process = ManagedProcess::spawn("api", &spec, Some(&run), quiet_options()).expect("spawn");
    assert!(wait_until(Duration::from_secs(5), || saw(&process, "ready")).await);
    process.stop().await;

    assert!(store.scan_failures(&["api".to_owned()]).is_empty());
}

#[tokio::test]
async fn ignored_sigterm_escalates_to_kill() {
    let options = SupervisorOptions {
        stop_grace: Duration::from_millis(300),
        ..quiet_options()
    };
    let spec = sh("stubborn", "trap '' TERM; echo ready; while true; do sleep 0.1; done");
    let process = ManagedProcess::spawn("stubborn", &spec, None, options).expect("spawn");
    assert!(wait_until(Duration::from_secs(5), || saw(&process, "ready")).await);

    let started = std::time::Instant::now();
    process.stop().await;

    assert!(started.elapsed() >= Duration::from_millis(250));
    assert_eq!(process.state(), ProcessState::Stopped);
    assert_eq!(process.exit_code(), Some(137));
}

#[tokio::test]
async fn output_ring_is_bounded() {
    let options = SupervisorOptions {
        ring_capacity: 5,
        ..quiet_options()
    };
    let spec = sh("counter", "for i in 1 2 3 4 5 6 7 8 9 10; do echo line$i; done");
    let process = ManagedProcess::spawn("counter", &spec, None, options).expect("spawn");
    process.wait().await;

    let output = process.output();
    assert_eq!(output.len(), 5);
    assert!(output[0].ends_with("line6"));
    assert!(output[4].ends_with("line10"));

    let tail = process.tail(2);
    assert_eq!(tail.len(), 2);
    assert!(tail[1].ends_with("line10"));
}

#[tokio::test]
async fn console_mirror_keeps_recording_output() {
    let options = SupervisorOptions {
        mirror_console: true,
        ..quiet_options()
    };
    let spec = sh("mirror", "echo first; echo second");
    let process = ManagedProcess::spawn("mirror", &spec, None, options).expect("spawn");
    process.wait().await;

    assert!(saw(&process, "first"));
    assert!(saw(&process, "second"));
    assert_eq!(process.state(), ProcessState::Stopped);
}

#[tokio::test]
async fn crash_scan_reports_failed_services_after_delay() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = LogStore::new(dir.path());
    for (name, script) in [("api", "exit 2"), ("worker", "exit 0")] {
        let spec = sh(name, script);
        let run = store.begin_run(name, &spec.command_line()).expect("run");
        ManagedProcess::spawn(name, &spec, Some(&run), quiet_options())
            .expect("spawn")
            .wait()
            .await;
    }

    let names = vec!["api".to_owned(), "worker".to_owned()];
    let failed = spawn_crash_scan(
        store.clone(),
        names.clone(),
        Duration::from_millis(10),
        CancellationToken::new(),
    )
    .await
    .expect("join");
    assert_eq!(failed, vec!["api".to_owned()]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let skipped = spawn_crash_scan(store, names, Duration::from_secs(60), cancel)
        .await
        .expect("join");
    assert!(skipped.is_empty());
}
