//! Reference resolution and registry bookkeeping.

use devtabs::models::service::{BackendKind, ServiceHandle, ServiceSpec, SessionInfo};
use devtabs::registry::{describe, resolve_reference, SessionRegistry};
use devtabs::AppError;

fn live(names: &[&str]) -> Vec<SessionInfo> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| SessionInfo {
            name: (*name).to_owned(),
            handle_id: (i + 10).to_string(),
            log_dir: format!("/tmp/logs/{name}").into(),
            log_path: format!("/tmp/logs/{name}/latest.log").into(),
        })
        .collect()
}

fn handle(name: &str, id: &str) -> ServiceHandle {
    let spec = ServiceSpec::new(name, "true", Vec::new());
    ServiceHandle::new(&spec, BackendKind::Process, id, "/tmp".into())
}

#[test]
fn numeric_reference_is_one_based_index() {
    let sessions = live(&["backend", "flutter-ios", "flutter-android"]);
    let hit = resolve_reference("2", &sessions).expect("index 2");
    assert_eq!(hit.name, "flutter-ios");
}

#[test]
fn substring_reference_takes_first_match() {
    let sessions = live(&["backend", "flutter-ios", "flutter-android"]);
    let hit = resolve_reference("flutter", &sessions).expect("substring");
    assert!(hit.name.contains("flutter"));
    assert_eq!(hit.name, "flutter-ios");
}

#[test]
fn exact_name_beats_earlier_substring() {
    let sessions = live(&["api-worker", "api"]);
    let hit = resolve_reference("API", &sessions).expect("exact");
    assert_eq!(hit.name, "api");
}

#[test]
fn matching_is_case_insensitive() {
    let sessions = live(&["backend", "Flutter-Android"]);
    let hit = resolve_reference("ANDROID", &sessions).expect("case-insensitive");
    assert_eq!(hit.name, "Flutter-Android");
}

#[test]
fn no_match_enumerates_known_names() {
    let sessions = live(&["backend", "flutter-ios", "flutter-android"]);
    let err = resolve_reference("db", &sessions).expect_err("no match");
    assert!(matches!(err, AppError::NotFound(_)));
    let message = err.to_string();
    for name in ["backend", "flutter-ios", "flutter-android"] {
        assert!(message.contains(name), "{message} should list {name}");
    }
}

#[test]
fn out_of_range_index_is_not_found() {
    let sessions = live(&["backend"]);
    assert!(resolve_reference("0", &sessions).is_err());
    assert!(resolve_reference("9", &sessions).is_err());
    assert!(resolve_reference("", &sessions).is_err());
}

#[test]
fn describe_numbers_sessions() {
    assert_eq!(describe(&live(&["a", "b"])), "1. a, 2. b");
    assert_eq!(describe(&[]), "(none)");
}

#[test]
fn register_keeps_one_handle_per_name() {
    let registry = SessionRegistry::new();
    assert!(registry.register(handle("api", "1")).is_none());
    let replaced = registry.register(handle("api", "2")).expect("replaced");
    assert_eq!(replaced.handle_id, "1");
    assert_eq!(registry.get("api").map(|h| h.handle_id), Some("2".to_owned()));
    assert_eq!(registry.names(), vec!["api"]);
}

#[test]
fn reconcile_drops_handles_missing_from_backend() {
    let registry = SessionRegistry::new();
    registry.register(handle("backend", "10"));
    registry.register(handle("ghost", "99"));

    let dropped = registry.reconcile(&live(&["backend"]));
    assert_eq!(dropped, vec!["ghost"]);
    assert_eq!(registry.names(), vec!["backend"]);
    assert_eq!(registry.snapshot().len(), 1);
    assert!(registry.remove("backend").is_some());
    assert!(registry.names().is_empty());
}
