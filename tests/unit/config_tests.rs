use std::path::{Path, PathBuf};
use std::time::Duration;

use replmux::{AppError, ReplConfig};

fn minimal_toml(root: &Path) -> String {
    format!("project_root = '{}'\n", root.display())
}

// On Windows, `canonicalize()` may add the `\\?\` prefix.
fn strip_unc(p: &Path) -> PathBuf {
    p.to_str()
        .and_then(|s| s.strip_prefix(r"\\?\"))
        .map_or_else(|| p.to_path_buf(), PathBuf::from)
}

#[test]
fn minimal_config_uses_defaults() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = ReplConfig::from_toml_str(&minimal_toml(temp.path())).expect("config parses");

    assert_eq!(config.ipc_name, "replmux");
    assert_eq!(config.output_history, 500);
    assert_eq!(config.discovery.port_file, PathBuf::from(".nrepl-port"));
    assert_eq!(
        config.discovery.build_tool_port_file,
        PathBuf::from(".shadow-cljs/nrepl.port")
    );
    assert_eq!(config.discovery.default_host, "localhost");
    assert_eq!(config.secondary.name, "ClojureScript");
    assert_eq!(config.secondary.build_tool, "shadow-cljs");
    assert_eq!(config.secondary.selected_marker, ":selected");
    assert!(config.secondary.build_targets.is_empty());
    assert!(config.secondary.bootstrap_code.contains("cljs-repl"));
    assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    assert_eq!(config.request_timeout(), Duration::from_secs(30));
}

#[test]
fn project_root_is_canonicalized() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = ReplConfig::from_toml_str(&minimal_toml(temp.path())).expect("config parses");

    let expected = strip_unc(&temp.path().canonicalize().expect("canonicalize"));
    assert_eq!(strip_unc(config.project_root()), expected);
}

#[test]
fn parses_full_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        r#"
project_root = '{root}'
ipc_name = "replmux-test"
output_history = 20

[discovery]
port_file = "repl.port"
default_host = "127.0.0.1"

[secondary]
name = "CLJS"
build_targets = ["app", "test"]
selected_marker = ":ok"

[transport]
connect_timeout_seconds = 3
request_timeout_seconds = 5
"#,
        root = temp.path().display()
    );

    let config = ReplConfig::from_toml_str(&toml).expect("config parses");
    assert_eq!(config.ipc_name, "replmux-test");
    assert_eq!(config.output_history, 20);
    assert_eq!(config.discovery.port_file, PathBuf::from("repl.port"));
    assert_eq!(
        config.discovery.build_tool_port_file,
        PathBuf::from(".shadow-cljs/nrepl.port"),
        "unset keys in a table keep their defaults"
    );
    assert_eq!(config.discovery.default_host, "127.0.0.1");
    assert_eq!(config.secondary.name, "CLJS");
    assert_eq!(config.secondary.build_targets, vec!["app", "test"]);
    assert_eq!(config.secondary.selected_marker, ":ok");
    assert_eq!(config.connect_timeout(), Duration::from_secs(3));
    assert_eq!(config.request_timeout(), Duration::from_secs(5));
}

#[test]
fn rejects_missing_project_root() {
    let result = ReplConfig::from_toml_str("ipc_name = \"x\"\n");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn rejects_nonexistent_project_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("does-not-exist");
    let result = ReplConfig::from_toml_str(&minimal_toml(&missing));
    assert!(
        matches!(result, Err(AppError::Config(ref msg)) if msg.contains("project_root")),
        "got: {result:?}"
    );
}

#[test]
fn rejects_zero_output_history() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!("{}output_history = 0\n", minimal_toml(temp.path()));
    assert!(matches!(
        ReplConfig::from_toml_str(&toml),
        Err(AppError::Config(_))
    ));
}

#[test]
fn rejects_zero_connect_timeout() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "{}[transport]\nconnect_timeout_seconds = 0\n",
        minimal_toml(temp.path())
    );
    assert!(matches!(
        ReplConfig::from_toml_str(&toml),
        Err(AppError::Config(_))
    ));
}

#[test]
fn rejects_zero_request_timeout() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "{}[transport]\nrequest_timeout_seconds = 0\n",
        minimal_toml(temp.path())
    );
    assert!(matches!(
        ReplConfig::from_toml_str(&toml),
        Err(AppError::Config(ref msg)) if msg.contains("request_timeout_seconds")
    ));
}

#[test]
fn rejects_empty_default_host() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "{}[discovery]\ndefault_host = \"  \"\n",
        minimal_toml(temp.path())
    );
    assert!(matches!(
        ReplConfig::from_toml_str(&toml),
        Err(AppError::Config(_))
    ));
}

#[test]
fn rejects_empty_selected_marker() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "{}[secondary]\nselected_marker = \"\"\n",
        minimal_toml(temp.path())
    );
    assert!(matches!(
        ReplConfig::from_toml_str(&toml),
        Err(AppError::Config(_))
    ));
}

#[test]
fn load_from_path_reads_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("replmux.toml");
    std::fs::write(&path, minimal_toml(temp.path())).expect("write config");

    let config = ReplConfig::load_from_path(&path).expect("config loads");
    assert_eq!(config.ipc_name, "replmux");
}

#[test]
fn load_from_missing_path_is_config_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = ReplConfig::load_from_path(temp.path().join("absent.toml"));
    assert!(matches!(result, Err(AppError::Config(ref msg)) if msg.contains("failed to read")));
}
