//! Rotation, alias, and read behaviour of the on-disk log store.

use std::fs;
use std::io::Write;

use devtabs::logstore::crash::exit_footer;
use devtabs::logstore::{LogStore, RunSelector, LATEST_ALIAS, MAX_RUNS};
use devtabs::AppError;

fn store() -> (tempfile::TempDir, LogStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = LogStore::new(dir.path());
    (dir, store)
}

fn append(store: &LogStore, service: &str, text: &str) {
    let path = store.latest_path(service);
    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(path)
        .expect("open latest");
    file.write_all(text.as_bytes()).expect("append");
}

#[test]
fn begin_run_writes_header_and_points_latest() {
    let (_dir, store) = store();
    let run = store.begin_run("api", "cargo run").expect("begin");

    assert!(run.file_path.exists());
    assert_eq!(run.service, "api");
    let header = fs::read_to_string(&run.file_path).expect("read run");
    assert!(header.contains("=== api ==="));
    assert!(header.contains("Command: cargo run"));

    let target = fs::read_link(store.latest_path("api")).expect("latest is a symlink");
    assert_eq!(target.file_name(), run.file_path.file_name());
}

#[test]
fn never_retains_more_than_max_runs() {
    let (_dir, store) = store();
    let mut runs = Vec::new();
    for _ in 0..(MAX_RUNS + 3) {
        runs.push(store.begin_run("api", "x").expect("begin"));
    }

    let listed = store.list_runs("api").expect("list");
    assert_eq!(listed.len(), MAX_RUNS);
    assert!(listed.iter().all(|r| r.timestamp_id != "latest"));

    // Oldest runs are evicted first.
    for old in &runs[..3] {
        assert!(!old.file_path.exists(), "{} should be pruned", old.timestamp_id);
    }
    for kept in &runs[3..] {
        assert!(kept.file_path.exists());
    }

    // Newest first, and latest resolves to the newest.
    let newest = runs.last().expect("runs");
    assert_eq!(listed[0].timestamp_id, newest.timestamp_id);
    let target = fs::read_link(store.latest_path("api")).expect("alias");
    assert_eq!(target.file_name(), newest.file_path.file_name());
    assert!(store.service_dir("api").join(LATEST_ALIAS).exists());
}

#[test]
fn same_second_runs_get_distinct_ids() {
    let (_dir, store) = store();
    let first = store.begin_run("api", "x").expect("begin");
    let second = store.begin_run("api", "x").expect("begin");
    assert_ne!(first.timestamp_id, second.timestamp_id);
    assert_ne!(first.file_path, second.file_path);
}

#[test]
fn read_run_returns_last_lines_of_latest() {
    let (_dir, store) = store();
    store.begin_run("api", "x").expect("begin");
    append(&store, "api", "one\ntwo\nthree\n");

    let text = store
        .read_run("api", &RunSelector::Latest, 2)
        .expect("read latest");
    assert_eq!(text, "two\nthree");
}

#[test]
fn read_run_by_timestamp_and_list() {
    let (_dir, store) = store();
    let first = store.begin_run("api", "first-command").expect("begin");
    store.begin_run("api", "second-command").expect("begin");

    let old = store
        .read_run(
            "api",
            &RunSelector::Timestamp(first.timestamp_id.clone()),
            100,
        )
        .expect("read by id");
    assert!(old.contains("first-command"));

    let listing = store.read_run("api", &RunSelector::List, 0).expect("list");
    assert!(listing.contains("Runs for api"));
    assert!(listing.contains(&first.timestamp_id));
    assert!(listing.contains("KB"));
}

#[test]
fn read_run_rejects_unknown_and_traversing_ids() {
    let (_dir, store) = store();
    store.begin_run("api", "x").expect("begin");

    let missing = store
        .read_run("api", &RunSelector::Timestamp("1999-01-01_000000".into()), 10)
        .expect_err("unknown run");
    assert!(matches!(missing, AppError::NotFound(_)));

    let traversal = store
        .read_run("api", &RunSelector::Timestamp("../../etc/passwd".into()), 10)
        .expect_err("traversal");
    assert!(matches!(traversal, AppError::NotFound(_)));

    let no_service = store
        .read_run("ghost", &RunSelector::Latest, 10)
        .expect_err("no runs");
    assert!(matches!(no_service, AppError::NotFound(_)));
}

#[test]
fn list_services_summarises_each_directory() {
    let (_dir, store) = store();
    store.begin_run("api", "x").expect("begin");
    store.begin_run("api", "x").expect("begin");
    store.begin_run("web", "x").expect("begin");

    let summary = store.list_services();
    assert!(summary.contains("api: 2 runs"));
    assert!(summary.contains("web: 1 runs"));
}

#[test]
fn list_services_without_root_explains_location() {
    let store = LogStore::new("/nonexistent/devtabs-logs");
    assert!(store.list_services().contains("No logs found"));
}

#[test]
fn tail_is_bounded_by_bytes() {
    let (_dir, store) = store();
    store.begin_run("api", "x").expect("begin");
    append(&store, "api", &"x".repeat(5000));
    append(&store, "api", "END");

    let tail = store.tail("api", 100).expect("tail");
    assert_eq!(tail.len(), 100);
    assert!(tail.ends_with("END"));
}

#[test]
fn scan_failures_reports_non_zero_exits_only() {
    let (_dir, store) = store();
    store.begin_run("api", "x").expect("begin");
    append(&store, "api", &exit_footer(1));
    store.begin_run("web", "x").expect("begin");
    append(&store, "web", &exit_footer(0));
    store.begin_run("worker", "x").expect("begin");

    let names: Vec<String> = ["api", "web", "worker", "never-started"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
    assert_eq!(store.scan_failures(&names), vec!["api".to_owned()]);
}

#[test]
fn reads_stay_inside_the_log_root() {
    let parent = tempfile::tempdir().expect("tempdir");
    let store = LogStore::new(parent.path().join("logs"));
    store.begin_run("api", "run").expect("begin");
    let outside = parent.path().join("outside");
    fs::create_dir_all(&outside).expect("mkdir");
    fs::write(outside.join("secret.log"), "TOP SECRET").expect("write");

    for service in ["../outside", "..", ".", "", "api/../../outside", "..\\outside"] {
        let err = store
            .read_run(service, &RunSelector::Timestamp("secret".into()), 10)
            .expect_err("escaping service name");
        assert!(matches!(err, AppError::NotFound(_)), "{service:?}: {err}");
        assert!(!err.to_string().contains("TOP SECRET"));
        assert!(store.tail(service, 64).is_err());
    }

    assert!(store.read_run("api", &RunSelector::Latest, 10).is_ok());
}
