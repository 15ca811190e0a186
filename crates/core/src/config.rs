//! 설정 관리 — logship.toml 파싱 및 런타임 설정
//!
//! [`LogshipConfig`]는 에이전트와 데몬이 공유하는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LOGSHIP_LOGS_API_KEY=...` 형식)
//! 3. 설정 파일 (`logship.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), logship_core::error::LogshipError> {
//! use logship_core::config::LogshipConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = LogshipConfig::load("logship.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = LogshipConfig::parse("[logs]\nenabled = false")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LogshipError};

/// logship 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogshipConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 로그 수집/전송 설정
    #[serde(default)]
    pub logs: LogsConfig,
    /// 메트릭 노출 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl LogshipConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용한 뒤 검증합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LogshipError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드, 검증 없음).
    ///
    /// 오버라이드로 채워질 값(예: `api_key`)이 파일에 없을 수 있으므로
    /// 검증은 [`load`](Self::load)에서 오버라이드 이후에 수행합니다.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LogshipError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LogshipError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LogshipError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LogshipError> {
        toml::from_str(toml_str).map_err(|e| {
            LogshipError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGSHIP_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LOGSHIP_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LOGSHIP_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "LOGSHIP_GENERAL_PID_FILE");
        override_string(&mut self.general.hostname, "LOGSHIP_GENERAL_HOSTNAME");

        // Logs
        let logs = &mut self.logs;
        override_bool(&mut logs.enabled, "LOGSHIP_LOGS_ENABLED");
        override_string(&mut logs.api_key, "LOGSHIP_LOGS_API_KEY");
        override_string(&mut logs.logset, "LOGSHIP_LOGS_LOGSET");
        override_string(&mut logs.dd_url, "LOGSHIP_LOGS_DD_URL");
        override_u16(&mut logs.dd_port, "LOGSHIP_LOGS_DD_PORT");
        override_bool(&mut logs.dev_mode_no_ssl, "LOGSHIP_LOGS_DEV_MODE_NO_SSL");
        override_string(&mut logs.run_path, "LOGSHIP_LOGS_RUN_PATH");
        override_usize(&mut logs.open_files_limit, "LOGSHIP_LOGS_OPEN_FILES_LIMIT");
        override_usize(&mut logs.chan_size, "LOGSHIP_LOGS_CHAN_SIZE");
        override_usize(&mut logs.pipelines, "LOGSHIP_LOGS_PIPELINES");
        override_parsed(&mut logs.tail_mode, "LOGSHIP_LOGS_TAIL_MODE");
        override_parsed(&mut logs.tail_from, "LOGSHIP_LOGS_TAIL_FROM");
        override_u64(&mut logs.sleep_ms, "LOGSHIP_LOGS_SLEEP_MS");
        override_u64(&mut logs.scan_period_secs, "LOGSHIP_LOGS_SCAN_PERIOD_SECS");
        override_u64(&mut logs.flush_interval_ms, "LOGSHIP_LOGS_FLUSH_INTERVAL_MS");
        override_u32(&mut logs.registry_ttl_hours, "LOGSHIP_LOGS_REGISTRY_TTL_HOURS");
        override_string(&mut logs.confd_path, "LOGSHIP_LOGS_CONFD_PATH");

        // Metrics
        override_bool(&mut self.metrics.enabled, "LOGSHIP_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "LOGSHIP_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "LOGSHIP_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogshipError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        self.logs.validate()?;

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> LogshipError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 생성하지 않음)
    pub pid_file: String,
    /// 전송 레코드에 기록할 호스트 이름 (빈 문자열이면 시스템 호스트 이름)
    pub hostname: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
            hostname: String::new(),
        }
    }
}

/// 파일 테일링 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TailMode {
    /// 핸들을 유지한 채 주기적으로 다시 읽음
    #[default]
    Poll,
    /// EOF에서 핸들을 닫고, 파일이 커지면 다시 엶
    Reopen,
}

impl std::str::FromStr for TailMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "poll" => Ok(Self::Poll),
            "reopen" => Ok(Self::Reopen),
            other => Err(format!("unknown tail mode: {other}")),
        }
    }
}

/// 레지스트리에 오프셋이 없을 때의 시작 위치
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TailFrom {
    /// 파일 처음부터
    Beginning,
    /// 파일 끝부터 (새로 추가되는 내용만)
    #[default]
    End,
}

impl std::str::FromStr for TailFrom {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "beginning" => Ok(Self::Beginning),
            "end" => Ok(Self::End),
            other => Err(format!("unknown tail position: {other}")),
        }
    }
}

/// 로그 수집/전송 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수집기 API 키
    pub api_key: String,
    /// API 키 뒤에 `/`로 붙는 logset
    pub logset: String,
    /// 수집기 호스트
    pub dd_url: String,
    /// 수집기 포트
    pub dd_port: u16,
    /// 평문 TCP 사용 (개발용)
    pub dev_mode_no_ssl: bool,
    /// 레지스트리 파일 디렉토리
    pub run_path: String,
    /// 동시에 테일링할 최대 파일 수
    pub open_files_limit: usize,
    /// 스테이지 간 채널 용량
    pub chan_size: usize,
    /// 처리 파이프라인 수
    pub pipelines: usize,
    /// 파일 테일링 방식
    pub tail_mode: TailMode,
    /// 오프셋이 없을 때 시작 위치
    pub tail_from: TailFrom,
    /// 새 데이터가 없을 때 대기 간격 (밀리초)
    pub sleep_ms: u64,
    /// 회전 검사 및 새 파일 스캔 주기 (초)
    pub scan_period_secs: u64,
    /// 레지스트리 저장 주기 (밀리초)
    pub flush_interval_ms: u64,
    /// 갱신되지 않은 레지스트리 항목 보존 시간
    pub registry_ttl_hours: u32,
    /// YAML 소스 정의 디렉토리 (빈 문자열이면 사용 안 함)
    pub confd_path: String,
    /// 인라인 소스 정의
    pub sources: Vec<SourceConfig>,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            logset: String::new(),
            dd_url: "intake.logs.datadoghq.com".to_owned(),
            dd_port: 10516,
            dev_mode_no_ssl: false,
            run_path: "/var/lib/logship".to_owned(),
            open_files_limit: 100,
            chan_size: 100,
            pipelines: 4,
            tail_mode: TailMode::default(),
            tail_from: TailFrom::default(),
            sleep_ms: 1000,
            scan_period_secs: 10,
            flush_interval_ms: 1000,
            registry_ttl_hours: 23,
            confd_path: String::new(),
            sources: Vec::new(),
        }
    }
}

impl LogsConfig {
    /// `[logs]` 섹션을 검증합니다.
    pub fn validate(&self) -> Result<(), LogshipError> {
        if !self.enabled {
            return Ok(());
        }
        if self.api_key.trim().is_empty() {
            return Err(invalid(
                "logs.api_key",
                "must not be empty when logs are enabled",
            ));
        }
        if self.dd_url.is_empty() {
            return Err(invalid("logs.dd_url", "must not be empty"));
        }
        if self.dd_port == 0 {
            return Err(invalid("logs.dd_port", "must be greater than 0"));
        }
        if self.run_path.is_empty() {
            return Err(invalid("logs.run_path", "must not be empty"));
        }

        let positive = [
            ("logs.open_files_limit", self.open_files_limit as u64),
            ("logs.chan_size", self.chan_size as u64),
            ("logs.pipelines", self.pipelines as u64),
            ("logs.sleep_ms", self.sleep_ms),
            ("logs.scan_period_secs", self.scan_period_secs),
            ("logs.flush_interval_ms", self.flush_interval_ms),
            ("logs.registry_ttl_hours", u64::from(self.registry_ttl_hours)),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }
        Ok(())
    }
}

/// 소스 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// 회전되는 로컬 파일
    File,
    /// TCP 리스너
    Tcp,
    /// UDP 리스너
    Udp,
    /// 컨테이너 stdout/stderr
    Docker,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::File => "file",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Docker => "docker",
        };
        f.write_str(s)
    }
}

/// 처리 규칙 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// 매치되면 메시지 폐기
    ExcludeAtMatch,
    /// 매치되는 메시지만 통과
    IncludeAtMatch,
    /// 매치 부분을 치환
    MaskSequences,
}

/// 처리 규칙 원본 정의 (컴파일 전)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingRuleConfig {
    /// 규칙 종류
    #[serde(rename = "type")]
    pub kind: RuleKind,
    /// 규칙 이름
    pub name: String,
    /// 정규식 패턴
    pub pattern: String,
    /// `mask_sequences` 치환 문자열
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_placeholder: Option<String>,
}

/// 소스 원본 정의
///
/// YAML(`logs:` 목록)과 TOML(`[[logs.sources]]`) 양쪽에서 같은 형태로 읽힙니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// 소스 종류
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// 파일 경로 (`file`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// 수신 포트 (`tcp`, `udp`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// 컨테이너 이미지 필터 (`docker`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// 컨테이너 라벨 필터 (`docker`, `key=value` 쉼표 구분)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// 서비스 이름
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// 소스 이름 (`ddsource`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// 소스 카테고리
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_category: Option<String>,
    /// 태그 목록
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// 처리 규칙 (선언 순서대로 평가)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log_processing_rules: Vec<ProcessingRuleConfig>,
}

impl SourceConfig {
    /// 주어진 종류의 빈 소스 정의를 만듭니다.
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            path: None,
            port: None,
            image: None,
            label: None,
            service: None,
            source: None,
            source_category: None,
            tags: Vec::new(),
            log_processing_rules: Vec::new(),
        }
    }
}

/// 메트릭 노출 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 익스포터 활성화 여부
    pub enabled: bool,
    /// 리슨 주소
    pub listen_addr: String,
    /// 리슨 포트
    pub port: u16,
    /// 엔드포인트 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9200,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T>(target: &mut T, env_key: &str)
where
    T: std::str::FromStr,
{
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = std::any::type_name::<T>(),
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key);
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key);
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key);
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key);
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key);
}
