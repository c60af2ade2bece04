//! Unit tests for preset prompters and configured build targets.

use std::path::Path;

use replmux::prompt::{BuildTargets, ConfiguredBuildTargets, NoPrompt, PresetPrompter, Prompter};
use replmux::ReplConfig;

fn targets(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_owned()).collect()
}

#[tokio::test]
async fn preset_endpoint_is_returned_verbatim() {
    let prompter = PresetPrompter {
        endpoint: Some("localhost:5555".into()),
        build_target: None,
    };
    assert_eq!(
        prompter.endpoint("localhost:").await,
        Some("localhost:5555".to_owned())
    );
}

#[tokio::test]
async fn unset_endpoint_cancels() {
    let prompter = PresetPrompter::default();
    assert_eq!(prompter.endpoint("localhost:7888").await, None);
}

#[tokio::test]
async fn preset_build_target_wins_over_candidates() {
    let prompter = PresetPrompter {
        endpoint: None,
        build_target: Some("test".into()),
    };
    assert_eq!(
        prompter.select_build_target(&targets(&["app"])).await,
        Some("test".to_owned())
    );
}

#[tokio::test]
async fn sole_candidate_is_picked_automatically() {
    let prompter = PresetPrompter::default();
    assert_eq!(
        prompter.select_build_target(&targets(&["app"])).await,
        Some("app".to_owned())
    );
    assert_eq!(
        prompter.select_build_target(&targets(&["app", "test"])).await,
        None,
        "several candidates and no preset must cancel"
    );
    assert_eq!(prompter.select_build_target(&[]).await, None);
}

#[tokio::test]
async fn no_prompt_cancels_everything() {
    assert_eq!(NoPrompt.endpoint("localhost:7888").await, None);
    assert_eq!(NoPrompt.select_build_target(&targets(&["app"])).await, None);
}

#[test]
fn configured_targets_come_from_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = ReplConfig::from_toml_str(&format!(
        "project_root = '{}'\n[secondary]\nbuild_targets = [\"app\", \"worker\"]\n",
        Path::new(temp.path()).display()
    ))
    .expect("valid config");

    let source = ConfiguredBuildTargets::from_config(&config);
    assert_eq!(
        source.build_targets().expect("targets"),
        targets(&["app", "worker"])
    );
    assert!(ConfiguredBuildTargets::default()
        .build_targets()
        .expect("targets")
        .is_empty());
}
