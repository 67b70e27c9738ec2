//! Config loading from TOML files and environment overrides.

use evolvr::config::Config;
use std::collections::HashMap;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_load_partial_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("evolvr.toml");
    std::fs::write(
        &path,
        r#"
[pipeline]
source_root = "crates/core/src"
max_modification_attempts = 1
post_apply_check = ["cargo", "check", "--quiet"]

[policy]
auto_apply_min_confidence = 0.9
"#,
    )
    .unwrap();

    let config = Config::load(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(config.pipeline.source_root, PathBuf::from("crates/core/src"));
    assert_eq!(config.pipeline.max_modification_attempts, 1);
    assert_eq!(config.pipeline.post_apply_check.len(), 3);
    assert!((config.policy.auto_apply_min_confidence - 0.9).abs() < f64::EPSILON);
    // untouched sections keep their defaults
    assert!((config.validation.min_safety_score - 0.7).abs() < f64::EPSILON);
}

#[test]
fn test_out_of_range_policy_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("evolvr.toml");
    std::fs::write(&path, "[validation]\nmin_safety_score = 1.5\n").unwrap();
    assert!(Config::load(Some(path.to_str().unwrap())).is_err());
}

#[test]
fn test_bad_rule_pattern_is_rejected() {
    let mut config = Config::default();
    config.validation.forbidden_patterns[0].pattern = "(unclosed".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_env_overrides() {
    let vars: HashMap<&str, &str> = [
        ("EVOLVR_SOURCE_ROOT", "/tmp/project/src"),
        ("EVOLVR_LEDGER_PATH", ""),
        ("EVOLVR_MODEL", "local-coder"),
    ]
    .into_iter()
    .collect();
    let mut config = Config::default();
    config.apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()));

    assert_eq!(config.pipeline.source_root, PathBuf::from("/tmp/project/src"));
    assert_eq!(config.pipeline.ledger_path, None);
    assert_eq!(config.generator.model, "local-coder");
}
