use std::path::PathBuf;

use devtabs::config::{BackendChoice, GlobalConfig};
use devtabs::AppError;

const SAMPLE: &str = r#"
backend = "process"
log_root = "/tmp/devtabs-test-logs"

[api]
port = 9999

[[dependencies]]
name = "postgres"
check = "pg_isready"
start = "brew services start postgresql"
timeout = 45

[[dependencies]]
name = "redis"
check = "redis-cli ping"
start = "   "

[[services]]
name = "api"
command = "cargo"
args = ["run", "--bin", "api"]

[[services]]
name = "web"
command = "npm"
args = ["start"]
workdir = "frontend"
pipe = "/tmp/web.pipe"

[services.env]
PORT = "3000"
"#;

#[test]
fn parses_full_config() {
    let config = GlobalConfig::from_toml_str(SAMPLE).expect("valid config");
    assert_eq!(config.backend, BackendChoice::Process);
    assert_eq!(config.api.port, 9999);
    assert_eq!(config.log_root, PathBuf::from("/tmp/devtabs-test-logs"));
    assert_eq!(config.service_names(), vec!["api", "web"]);

    let web = config.service("web").expect("web service");
    assert_eq!(web.env.get("PORT").map(String::as_str), Some("3000"));
    assert_eq!(web.pipe, Some(PathBuf::from("/tmp/web.pipe")));
}

#[test]
fn defaults_apply_when_keys_are_absent() {
    let config = GlobalConfig::from_toml_str(
        r#"
[[services]]
name = "api"
command = "cargo"
"#,
    )
    .expect("valid config");

    assert_eq!(config.backend, BackendChoice::Wezterm);
    assert_eq!(config.api.port, 9876);
    assert_eq!(config.log_root, PathBuf::from("/tmp/devtabs-logs"));
    assert_eq!(config.roster_path, PathBuf::from("/tmp/devtabs-panes.txt"));
    assert_eq!(config.crash_scan_delay_seconds, 15);
    assert!(config.dependencies.is_empty());
}

#[test]
fn dependency_specs_keep_order_and_drop_blank_start() {
    let config = GlobalConfig::from_toml_str(SAMPLE).expect("valid config");
    let deps = config.dependency_specs();
    assert_eq!(deps.len(), 2);
    assert_eq!(deps[0].name, "postgres");
    assert_eq!(deps[0].timeout_seconds, 45);
    assert_eq!(deps[1].name, "redis");
    assert_eq!(deps[1].timeout_seconds, 30);
    assert!(deps[1].start_cmd.is_none());
}

#[test]
fn rejects_config_without_services() {
    let err = GlobalConfig::from_toml_str("backend = \"process\"").expect_err("no services");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn rejects_duplicate_service_names() {
    let err = GlobalConfig::from_toml_str(
        r#"
[[services]]
name = "api"
command = "a"

[[services]]
name = "api"
command = "b"
"#,
    )
    .expect_err("duplicate names");
    assert!(err.to_string().contains("duplicate service name: api"));
}

#[test]
fn rejects_names_unusable_as_directories() {
    let err = GlobalConfig::from_toml_str(
        r#"
[[services]]
name = "api/v2"
command = "a"
"#,
    )
    .expect_err("slash in name");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn rejects_parent_segments_in_names() {
    let err = GlobalConfig::from_toml_str(
        r#"
[[services]]
name = "..hidden"
command = "a"
"#,
    )
    .expect_err("dot-dot in name");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn rejects_env_keys_the_shell_cannot_export() {
    let err = GlobalConfig::from_toml_str(
        r#"
[[services]]
name = "api"
command = "run"
env = { "X=1; rm -rf ~; Y" = "v" }
"#,
    )
    .expect_err("bad env key");
    assert!(err.to_string().contains("invalid environment variable name"));

    GlobalConfig::from_toml_str(
        r#"
[[services]]
name = "api"
command = "run"
env = { _PORT_2 = "8080", RUST_LOG = "debug" }
"#,
    )
    .expect("plain env keys are accepted");
}

#[test]
fn rejects_empty_command() {
    let err = GlobalConfig::from_toml_str(
        r#"
[[services]]
name = "api"
command = "  "
"#,
    )
    .expect_err("empty command");
    assert!(err.to_string().contains("empty command"));
}

#[test]
fn rejects_unknown_backend() {
    let err = GlobalConfig::from_toml_str(
        r#"
backend = "tmux"

[[services]]
name = "api"
command = "a"
"#,
    )
    .expect_err("unknown backend");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn load_resolves_relative_workdir_against_config_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("devtabs.toml");
    std::fs::write(&path, SAMPLE).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    let web = config.service_spec("web").expect("web spec");
    assert_eq!(web.workdir, dir.path().join("frontend"));
}

#[test]
fn load_reports_missing_file() {
    let err = GlobalConfig::load_from_path("/nonexistent/devtabs.toml").expect_err("missing");
    assert!(err.to_string().contains("failed to read"));
}

#[test]
fn unknown_service_spec_lists_available_names() {
    let config = GlobalConfig::from_toml_str(SAMPLE).expect("valid config");
    let err = config.service_spec("db").expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(err.to_string().contains("api, web"));
}
