//! Configuration resolution: explicit file, default path, environment, defaults

use bulwark::config::{
    BulwarkConfig, ConfigError, ConfigOrigin, RetryPreset, ENV_AVAILABILITY_TARGET,
    ENV_ERROR_BUDGET_WINDOW_HOURS,
};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const EXAMPLE: &str = include_str!("../config/bulwark.example.toml");

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn example_config_is_valid() {
    let config = BulwarkConfig::from_toml_str(EXAMPLE).unwrap();
    assert_eq!(config.service_name, "checkout");
    assert_eq!(config.dependencies.len(), 2);

    let payments = config.dependency("payments").unwrap();
    assert_eq!(payments.retry.as_ref().unwrap().preset, RetryPreset::Network);
    assert_eq!(payments.retry_policy().unwrap().max_attempts, 4);
    assert_eq!(payments.bulkhead_config().unwrap().max_concurrency, 20);

    let inventory = config.dependency("inventory").unwrap();
    assert!(inventory.breaker.is_none());
    assert!(!inventory.retry_policy().unwrap().jitter);
}

#[test]
fn explicit_file_wins_over_everything() {
    let dir = TempDir::new().unwrap();
    let explicit = write(&dir, "explicit.toml", "service_name = \"explicit\"");
    let default = write(&dir, "config/bulwark.toml", "service_name = \"default-file\"");

    let (config, origin) = BulwarkConfig::resolve(
        Some(&explicit),
        &default,
        env(&[(ENV_AVAILABILITY_TARGET, "0.95")]),
    )
    .unwrap();

    assert_eq!(config.service_name, "explicit");
    assert_eq!(config.slo.availability_target, 0.999);
    assert_eq!(origin, ConfigOrigin::File(explicit));
}

#[test]
fn default_path_is_used_when_present() {
    let dir = TempDir::new().unwrap();
    let default = write(
        &dir,
        "config/bulwark.toml",
        "service_name = \"orders\"\n[slo]\navailability_target = 0.99\n",
    );

    let (config, origin) =
        BulwarkConfig::resolve(None, &default, env(&[(ENV_AVAILABILITY_TARGET, "0.95")]))
            .unwrap();

    assert_eq!(config.service_name, "orders");
    assert_eq!(config.slo_config().availability_target, 0.99);
    assert_eq!(origin, ConfigOrigin::File(default));
}

#[test]
fn environment_overrides_defaults_without_a_file() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("config/bulwark.toml");

    let (config, origin) = BulwarkConfig::resolve(
        None,
        &missing,
        env(&[
            (ENV_AVAILABILITY_TARGET, "0.995"),
            (ENV_ERROR_BUDGET_WINDOW_HOURS, "168"),
        ]),
    )
    .unwrap();

    assert_eq!(origin, ConfigOrigin::Environment);
    let slo = config.slo_config();
    assert_eq!(slo.availability_target, 0.995);
    assert_eq!(slo.error_budget_window, Duration::from_secs(168 * 3600));
}

#[test]
fn nothing_configured_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let (config, origin) =
        BulwarkConfig::resolve(None, &dir.path().join("absent.toml"), env(&[])).unwrap();

    assert_eq!(origin, ConfigOrigin::Defaults);
    assert_eq!(config, BulwarkConfig::default());
}

#[test]
fn directory_at_default_path_is_ignored() {
    let dir = TempDir::new().unwrap();
    let default = dir.path().join("config/bulwark.toml");
    fs::create_dir_all(&default).unwrap();

    let (_, origin) = BulwarkConfig::resolve(None, &default, env(&[])).unwrap();
    assert_eq!(origin, ConfigOrigin::Defaults);
}

#[test]
fn malformed_environment_value_is_reported() {
    let err = BulwarkConfig::resolve(
        None,
        Path::new("does/not/exist.toml"),
        env(&[(ENV_ERROR_BUDGET_WINDOW_HOURS, "a month")]),
    )
    .unwrap_err();

    assert!(
        matches!(err, ConfigError::Env { var, .. } if var == ENV_ERROR_BUDGET_WINDOW_HOURS),
        "{err}"
    );
}

#[test]
fn invalid_file_reports_every_problem() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "bad.toml",
        r#"
        [slo]
        availability_target = 1.5
        max_error_rate = -1.0

        [[dependencies]]
        name = "db"
        [dependencies.bulkhead]
        max_concurrency = 0

        [[dependencies]]
        name = "db"
        "#,
    );

    let err = BulwarkConfig::resolve(Some(&path), Path::new("unused.toml"), env(&[]))
        .unwrap_err();
    let ConfigError::Validation(problems) = &err else {
        panic!("expected validation error, got {err}");
    };

    assert_eq!(problems.len(), 4, "{problems:?}");
    assert!(problems.iter().any(|p| p.contains("availability_target")));
    assert!(problems.iter().any(|p| p.contains("max_error_rate")));
    assert!(problems.iter().any(|p| p.contains("max_concurrency")));
    assert!(problems.iter().any(|p| p.contains("duplicate")));
}

#[test]
fn missing_explicit_file_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    let err = BulwarkConfig::resolve(Some(&missing), Path::new("unused.toml"), env(&[]))
        .unwrap_err();

    match err {
        ConfigError::Io { path, .. } => assert_eq!(path, missing),
        other => panic!("expected io error, got {other}"),
    }
}

#[test]
fn unparsable_file_names_its_origin() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "broken.toml", "service_name = [");

    let err = BulwarkConfig::resolve(Some(&path), Path::new("unused.toml"), env(&[]))
        .unwrap_err();

    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("broken.toml"), "{err}");
}
