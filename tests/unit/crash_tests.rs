use devtabs::logstore::crash::{classify_tail, exit_footer, failure_banner, is_failure};

#[test]
fn non_zero_marker_is_a_failure() {
    let tail = "compiling...\nerror: boom\n\n=== Exited with code 1 at Mon Jan  1 ===\n";
    assert_eq!(classify_tail(tail), Some(1));
    assert!(is_failure(tail));
}

#[test]
fn zero_marker_is_not_a_failure() {
    let tail = "=== Exited with code 0 at Mon Jan  1 ===";
    assert_eq!(classify_tail(tail), Some(0));
    assert!(!is_failure(tail));
}

#[test]
fn missing_marker_is_not_a_failure() {
    let tail = "server listening on :8080\n";
    assert_eq!(classify_tail(tail), None);
    assert!(!is_failure(tail));
}

#[test]
fn footer_is_recognised() {
    assert_eq!(classify_tail(&exit_footer(137)), Some(137));
}

#[test]
fn banner_lists_every_failure_with_tab() {
    let order: Vec<String> = ["backend", "flutter-ios", "flutter-android"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
    let failed = vec!["backend".to_owned(), "flutter-android".to_owned()];
    let banner = failure_banner(&order, &failed);
    assert!(banner.contains("backend (tab 1)"));
    assert!(banner.contains("flutter-android (tab 3)"));
    assert!(!banner.contains("flutter-ios"));
}
