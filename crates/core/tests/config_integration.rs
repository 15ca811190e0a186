//! logship.toml 통합 설정 테스트
//!
//! - logship.toml.example 파싱 테스트
//! - 부분 설정 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 빈 파일 / 잘못된 형식 에러 테스트

use logship_core::config::{LogshipConfig, RuleKind, SourceKind, TailFrom, TailMode};
use logship_core::error::{ConfigError, LogshipError};

const EXAMPLE: &str = include_str!("../../../logship.toml.example");

// =============================================================================
// logship.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_and_validates() {
    let config = LogshipConfig::parse(EXAMPLE).expect("example config should parse");
    config
        .validate()
        .expect("example config should pass validation");
    assert!(config.logs.sources.is_empty());
}

#[test]
fn example_config_matches_code_defaults() {
    let from_file = LogshipConfig::parse(EXAMPLE).expect("should parse");
    let from_code = LogshipConfig::default();

    assert_eq!(from_file.general.log_level, from_code.general.log_level);
    assert_eq!(from_file.general.log_format, from_code.general.log_format);
    assert_eq!(from_file.general.pid_file, from_code.general.pid_file);

    let (a, b) = (&from_file.logs, &from_code.logs);
    assert_eq!(a.enabled, b.enabled);
    assert_eq!(a.dd_url, b.dd_url);
    assert_eq!(a.dd_port, b.dd_port);
    assert_eq!(a.run_path, b.run_path);
    assert_eq!(a.open_files_limit, b.open_files_limit);
    assert_eq!(a.chan_size, b.chan_size);
    assert_eq!(a.pipelines, b.pipelines);
    assert_eq!(a.tail_mode, b.tail_mode);
    assert_eq!(a.tail_from, b.tail_from);
    assert_eq!(a.sleep_ms, b.sleep_ms);
    assert_eq!(a.scan_period_secs, b.scan_period_secs);
    assert_eq!(a.flush_interval_ms, b.flush_interval_ms);
    assert_eq!(a.registry_ttl_hours, b.registry_ttl_hours);

    assert_eq!(from_file.metrics.enabled, from_code.metrics.enabled);
    assert_eq!(from_file.metrics.port, from_code.metrics.port);
    assert_eq!(from_file.metrics.endpoint, from_code.metrics.endpoint);
}

// =============================================================================
// 부분 설정 로딩 테스트
// =============================================================================

#[test]
fn partial_config_general_only() {
    let toml = r#"
[general]
log_level = "debug"
log_format = "pretty"
"#;
    let config = LogshipConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.general.log_format, "pretty");
    assert!(!config.logs.enabled);
    assert_eq!(config.logs.pipelines, 4);
}

#[test]
fn partial_config_logs_with_every_source_kind() {
    let toml = r#"
[logs]
enabled = true
api_key = "0123456789abcdef"
tail_mode = "reopen"

[[logs.sources]]
type = "file"
path = "/var/log/nginx/access.log"
source = "nginx"
source_category = "http_web_access"

[[logs.sources.log_processing_rules]]
type = "exclude_at_match"
name = "exclude_bots"
pattern = "Googlebot"

[[logs.sources.log_processing_rules]]
type = "include_at_match"
name = "only_api"
pattern = "/api/"

[[logs.sources]]
type = "tcp"
port = 10514
service = "syslog"

[[logs.sources]]
type = "udp"
port = 10515

[[logs.sources]]
type = "docker"
image = "redis"
label = "team=core"
"#;
    let config = LogshipConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert_eq!(config.logs.tail_mode, TailMode::Reopen);
    assert_eq!(config.logs.tail_from, TailFrom::End);

    let kinds: Vec<SourceKind> = config.logs.sources.iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![
            SourceKind::File,
            SourceKind::Tcp,
            SourceKind::Udp,
            SourceKind::Docker
        ]
    );

    let rules = &config.logs.sources[0].log_processing_rules;
    assert_eq!(rules[0].kind, RuleKind::ExcludeAtMatch);
    assert_eq!(rules[1].kind, RuleKind::IncludeAtMatch);
    assert!(rules[1].replace_placeholder.is_none());
    assert_eq!(config.logs.sources[3].label.as_deref(), Some("team=core"));
}

#[test]
fn enabled_logs_without_api_key_fails_validation() {
    let toml = r#"
[logs]
enabled = true
"#;
    let config = LogshipConfig::parse(toml).expect("should parse");
    let err = config.validate().unwrap_err();
    assert!(matches!(
        err,
        LogshipError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "logs.api_key"
    ));
}

// =============================================================================
// 환경변수 우선순위 테스트
// =============================================================================

fn with_env<T>(key: &str, value: &str, f: impl FnOnce() -> T) -> T {
    let original = std::env::var(key).ok();
    // SAFETY: serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe { std::env::set_var(key, value) };
    let result = f();
    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var(key, val),
            None => std::env::remove_var(key),
        }
    }
    result
}

#[test]
#[serial_test::serial]
fn env_override_beats_toml_value() {
    let toml = r#"
[logs]
api_key = "from-file"
"#;
    let config = with_env("LOGSHIP_LOGS_API_KEY", "from-env", || {
        let mut config = LogshipConfig::parse(toml).expect("should parse");
        config.apply_env_overrides();
        config
    });
    assert_eq!(config.logs.api_key, "from-env");
}

#[test]
#[serial_test::serial]
fn env_override_numeric_field() {
    let config = with_env("LOGSHIP_LOGS_CHAN_SIZE", "512", || {
        let mut config = LogshipConfig::parse("").expect("should parse");
        config.apply_env_overrides();
        config
    });
    assert_eq!(config.logs.chan_size, 512);
}

#[test]
#[serial_test::serial]
fn env_override_enum_field() {
    let config = with_env("LOGSHIP_LOGS_TAIL_FROM", "beginning", || {
        let mut config = LogshipConfig::parse("").expect("should parse");
        config.apply_env_overrides();
        config
    });
    assert_eq!(config.logs.tail_from, TailFrom::Beginning);
}

#[test]
#[serial_test::serial]
fn env_override_invalid_value_keeps_toml_value() {
    let toml = r#"
[logs]
pipelines = 2
"#;
    let config = with_env("LOGSHIP_LOGS_PIPELINES", "many", || {
        let mut config = LogshipConfig::parse(toml).expect("should parse");
        config.apply_env_overrides();
        config
    });
    assert_eq!(config.logs.pipelines, 2);
}

#[tokio::test]
#[serial_test::serial]
async fn load_applies_env_before_validation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("logship.toml");
    tokio::fs::write(&path, "[logs]\nenabled = true\n")
        .await
        .expect("write config");

    let original = std::env::var("LOGSHIP_LOGS_API_KEY").ok();
    // SAFETY: serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe { std::env::set_var("LOGSHIP_LOGS_API_KEY", "secret") };
    let result = LogshipConfig::load(&path).await;
    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("LOGSHIP_LOGS_API_KEY", val),
            None => std::env::remove_var("LOGSHIP_LOGS_API_KEY"),
        }
    }

    let config = result.expect("api key from env should satisfy validation");
    assert_eq!(config.logs.api_key, "secret");
}

// =============================================================================
// 빈 파일 / 잘못된 형식 에러 테스트
// =============================================================================

#[test]
fn comments_only_parses_with_defaults() {
    let toml = r#"
# 주석만 있는 파일
"#;
    let config = LogshipConfig::parse(toml).expect("comments-only should parse");
    config.validate().expect("should validate");
    assert_eq!(config.general.log_level, "info");
}

#[test]
fn wrong_type_for_numeric_field() {
    let toml = r#"
[logs]
chan_size = "one hundred"
"#;
    assert!(matches!(
        LogshipConfig::parse(toml).unwrap_err(),
        LogshipError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[test]
fn source_without_type_is_rejected() {
    let toml = r#"
[[logs.sources]]
path = "/var/log/a.log"
"#;
    assert!(LogshipConfig::parse(toml).is_err());
}

#[tokio::test]
async fn from_file_nonexistent_returns_file_not_found() {
    let result = LogshipConfig::from_file("/tmp/logship_test_nonexistent_12345.toml").await;
    assert!(matches!(
        result.unwrap_err(),
        LogshipError::Config(ConfigError::FileNotFound { .. })
    ));
}
