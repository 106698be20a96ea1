use super::*;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[derive(Debug, Deserialize, PartialEq)]
struct ServiceFile {
    service: ServiceSection,
    limits: Option<Limits>,
}

#[derive(Debug, Deserialize, PartialEq)]
struct ServiceSection {
    id: String,
    endpoint: String,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Limits {
    max_models: Option<usize>,
    timeout_ms: Option<u64>,
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn detects_supported_formats() {
    assert_eq!(detect_format("maestro.yaml").unwrap(), FileFormat::Yaml);
    assert_eq!(detect_format("maestro.yml").unwrap(), FileFormat::Yaml);
    assert_eq!(detect_format("maestro.TOML").unwrap(), FileFormat::Toml);
    assert_eq!(detect_format("model.json").unwrap(), FileFormat::Json);
    assert!(matches!(
        detect_format("notes.txt"),
        Err(ConfigError::UnsupportedFormat(_))
    ));
    assert!(detect_format("Makefile").is_err());
    assert!(!is_supported("README.md"));
}

#[test]
fn loads_each_format_into_the_same_shape() {
    let dir = TempDir::new().unwrap();

    let yaml = write(
        &dir,
        "svc.yaml",
        "service:\n  id: openai\n  endpoint: https://api.example.com\nlimits:\n  max_models: 2\n",
    );
    let toml = write(
        &dir,
        "svc.toml",
        "[service]\nid = \"openai\"\nendpoint = \"https://api.example.com\"\n\n[limits]\nmax_models = 2\n",
    );
    let json = write(
        &dir,
        "svc.json",
        r#"{"service": {"id": "openai", "endpoint": "https://api.example.com"}, "limits": {"max_models": 2}}"#,
    );

    for path in [yaml, toml, json] {
        let cfg: ServiceFile = load_config(&path).unwrap();
        assert_eq!(cfg.service.id, "openai");
        assert_eq!(cfg.service.endpoint, "https://api.example.com");
        assert_eq!(cfg.limits.unwrap().max_models, Some(2));
    }
}

#[test]
fn substitutes_braced_and_bare_variables() {
    unsafe {
        std::env::set_var("MAESTRO_TEST_HOST", "inference.local");
        std::env::set_var("MAESTRO_TEST_PORT", "8443");
    }

    let out = substitute_env_vars("https://${MAESTRO_TEST_HOST}:$MAESTRO_TEST_PORT/v1");
    assert_eq!(out, "https://inference.local:8443/v1");
}

#[test]
fn unset_variables_are_left_alone() {
    let out = substitute_env_vars("key: ${MAESTRO_TEST_SURELY_UNSET_42}");
    assert_eq!(out, "key: ${MAESTRO_TEST_SURELY_UNSET_42}");
}

#[test]
fn from_str_substitutes_before_parsing() {
    unsafe {
        std::env::set_var("MAESTRO_TEST_ENDPOINT", "http://127.0.0.1:9000");
    }
    let cfg: ServiceFile = from_str(
        "[service]\nid = \"local\"\nendpoint = \"${MAESTRO_TEST_ENDPOINT}\"\n",
        FileFormat::Toml,
    )
    .unwrap();
    assert_eq!(cfg.service.endpoint, "http://127.0.0.1:9000");
    assert!(cfg.limits.is_none());
}

#[test]
fn env_overrides_nested_values() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "svc.toml",
        "[service]\nid = \"local\"\nendpoint = \"http://a\"\n\n[limits]\ntimeout_ms = 1000\n",
    );

    unsafe {
        std::env::set_var("MAESTROCFGTEST_LIMITS__TIMEOUT_MS", "2500");
    }
    let cfg: ServiceFile = load_with_env(&path, "MAESTROCFGTEST").unwrap();
    assert_eq!(cfg.limits.unwrap().timeout_ms, Some(2500));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "broken.json", "{ not json");
    let result: ConfigResult<ServiceFile> = load_config(&path);
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn missing_file_is_an_io_error() {
    let result: ConfigResult<ServiceFile> = load_config("/nonexistent/maestro.toml");
    assert!(matches!(result, Err(ConfigError::Io(_))));
}
