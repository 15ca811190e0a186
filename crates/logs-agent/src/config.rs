//! 에이전트 설정
//!
//! [`AgentConfig`]는 core의 [`LogsConfig`](logship_core::config::LogsConfig)를
//! 기반으로 에이전트 내부에서 쓰는 설정을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use logship_core::config::LogshipConfig;
//! use logship_agent::config::AgentConfig;
//!
//! let core_config = LogshipConfig::default();
//! let config = AgentConfig::from_core(&core_config);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use logship_core::config::{LogshipConfig, TailFrom, TailMode};

use crate::error::AgentError;

/// 레지스트리 파일 이름
pub const REGISTRY_FILE_NAME: &str = "registry.json";

/// 에이전트 설정
///
/// core의 `[logs]`, `[general]` 섹션에서 파생되며, 에이전트 내부에서만
/// 쓰는 확장 필드를 포함합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// 수집기 API 키
    pub api_key: String,
    /// API 키 뒤에 붙는 logset
    pub logset: String,
    /// 수집기 호스트
    pub host: String,
    /// 수집기 포트
    pub port: u16,
    /// 평문 TCP 사용 여부
    pub dev_mode_no_ssl: bool,
    /// 전송 레코드의 호스트 이름
    pub hostname: String,
    /// 레지스트리 디렉토리
    pub run_path: PathBuf,
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
    /// 새 데이터 대기 간격 (밀리초)
    pub sleep_ms: u64,
    /// 회전 검사/새 파일 스캔 주기 (초)
    pub scan_period_secs: u64,
    /// 레지스트리 저장 주기 (밀리초)
    pub flush_interval_ms: u64,
    /// 레지스트리 항목 보존 시간
    pub registry_ttl_hours: u32,

    // --- 확장 설정 (core에 없는 추가 필드) ---
    /// 네트워크 리스너 바인드 호스트
    pub listen_host: String,
    /// TCP 소스당 최대 동시 연결 수
    pub max_tcp_connections: usize,
    /// 헬스 핑 주기 (초)
    pub health_ping_secs: u64,
    /// 재연결 백오프 시작 값 (밀리초)
    pub backoff_initial_ms: u64,
    /// 재연결 백오프 상한 (초)
    pub backoff_max_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            logset: String::new(),
            host: "intake.logs.datadoghq.com".to_owned(),
            port: 10516,
            dev_mode_no_ssl: false,
            hostname: resolve_hostname(""),
            run_path: PathBuf::from("/var/lib/logship"),
            open_files_limit: 100,
            chan_size: 100,
            pipelines: 4,
            tail_mode: TailMode::Poll,
            tail_from: TailFrom::End,
            sleep_ms: 1000,
            scan_period_secs: 10,
            flush_interval_ms: 1000,
            registry_ttl_hours: 23,
            listen_host: "0.0.0.0".to_owned(),
            max_tcp_connections: 100,
            health_ping_secs: 15,
            backoff_initial_ms: 1000,
            backoff_max_secs: 30,
        }
    }
}

impl AgentConfig {
    /// core 설정에서 에이전트 설정을 생성합니다.
    ///
    /// core 설정에 없는 확장 필드는 기본값이 적용됩니다.
    pub fn from_core(core: &LogshipConfig) -> Self {
        let logs = &core.logs;
        Self {
            api_key: logs.api_key.clone(),
            logset: logs.logset.clone(),
            host: logs.dd_url.clone(),
            port: logs.dd_port,
            dev_mode_no_ssl: logs.dev_mode_no_ssl,
            hostname: resolve_hostname(&core.general.hostname),
            run_path: PathBuf::from(&logs.run_path),
            open_files_limit: logs.open_files_limit,
            chan_size: logs.chan_size,
            pipelines: logs.pipelines,
            tail_mode: logs.tail_mode,
            tail_from: logs.tail_from,
            sleep_ms: logs.sleep_ms,
            scan_period_secs: logs.scan_period_secs,
            flush_interval_ms: logs.flush_interval_ms,
            registry_ttl_hours: logs.registry_ttl_hours,
            ..Self::default()
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.api_key.trim().is_empty() {
            return Err(AgentError::Config {
                field: "api_key".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        if self.host.is_empty() {
            return Err(AgentError::Config {
                field: "host".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        let positive = [
            ("port", u64::from(self.port)),
            ("open_files_limit", self.open_files_limit as u64),
            ("chan_size", self.chan_size as u64),
            ("pipelines", self.pipelines as u64),
            ("sleep_ms", self.sleep_ms),
            ("scan_period_secs", self.scan_period_secs),
            ("flush_interval_ms", self.flush_interval_ms),
            ("registry_ttl_hours", u64::from(self.registry_ttl_hours)),
            ("max_tcp_connections", self.max_tcp_connections as u64),
            ("health_ping_secs", self.health_ping_secs),
            ("backoff_initial_ms", self.backoff_initial_ms),
            ("backoff_max_secs", self.backoff_max_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(AgentError::Config {
                    field: field.to_owned(),
                    reason: "must be greater than 0".to_owned(),
                });
            }
        }

        const MAX_PIPELINES: usize = 64;
        if self.pipelines > MAX_PIPELINES {
            return Err(AgentError::Config {
                field: "pipelines".to_owned(),
                reason: format!("must be 1-{MAX_PIPELINES}"),
            });
        }
        Ok(())
    }

    /// 레지스트리 파일 경로
    pub fn registry_path(&self) -> PathBuf {
        self.run_path.join(REGISTRY_FILE_NAME)
    }

    /// 테일러 대기 간격
    pub fn sleep_duration(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }

    /// 스캔 주기
    pub fn scan_period(&self) -> Duration {
        Duration::from_secs(self.scan_period_secs)
    }

    /// 레지스트리 저장 주기
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// 레지스트리 항목 보존 시간
    pub fn registry_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.registry_ttl_hours) * 3600)
    }

    /// 헬스 핑 주기
    pub fn health_ping_interval(&self) -> Duration {
        Duration::from_secs(self.health_ping_secs)
    }
}

/// 설정된 호스트 이름을 반환하고, 비어 있으면 시스템 호스트 이름을 찾습니다.
pub fn resolve_hostname(configured: &str) -> String {
    if !configured.trim().is_empty() {
        return configured.trim().to_owned();
    }
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// 에이전트 설정 빌더
#[derive(Default)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// API 키를 설정합니다.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    /// logset을 설정합니다.
    pub fn logset(mut self, logset: impl Into<String>) -> Self {
        self.config.logset = logset.into();
        self
    }

    /// 수집기 주소를 설정합니다.
    pub fn endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.host = host.into();
        self.config.port = port;
        self
    }

    /// 호스트 이름을 설정합니다.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.hostname = hostname.into();
        self
    }

    /// 레지스트리 디렉토리를 설정합니다.
    pub fn run_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.run_path = path.into();
        self
    }

    /// 최대 테일링 파일 수를 설정합니다.
    pub fn open_files_limit(mut self, limit: usize) -> Self {
        self.config.open_files_limit = limit;
        self
    }

    /// 채널 용량을 설정합니다.
    pub fn chan_size(mut self, size: usize) -> Self {
        self.config.chan_size = size;
        self
    }

    /// 파이프라인 수를 설정합니다.
    pub fn pipelines(mut self, count: usize) -> Self {
        self.config.pipelines = count;
        self
    }

    /// 테일링 방식을 설정합니다.
    pub fn tail_mode(mut self, mode: TailMode) -> Self {
        self.config.tail_mode = mode;
        self
    }

    /// 오프셋이 없을 때의 시작 위치를 설정합니다.
    pub fn tail_from(mut self, from: TailFrom) -> Self {
        self.config.tail_from = from;
        self
    }

    /// 테일러 대기 간격(밀리초)을 설정합니다.
    pub fn sleep_ms(mut self, ms: u64) -> Self {
        self.config.sleep_ms = ms;
        self
    }

    /// 스캔 주기(초)를 설정합니다.
    pub fn scan_period_secs(mut self, secs: u64) -> Self {
        self.config.scan_period_secs = secs;
        self
    }

    /// 레지스트리 저장 주기(밀리초)를 설정합니다.
    pub fn flush_interval_ms(mut self, ms: u64) -> Self {
        self.config.flush_interval_ms = ms;
        self
    }

    /// 네트워크 리스너 바인드 호스트를 설정합니다.
    pub fn listen_host(mut self, host: impl Into<String>) -> Self {
        self.config.listen_host = host.into();
        self
    }

    /// 재연결 백오프를 설정합니다.
    pub fn backoff(mut self, initial_ms: u64, max_secs: u64) -> Self {
        self.config.backoff_initial_ms = initial_ms;
        self.config.backoff_max_secs = max_secs;
        self
    }

    /// 설정을 검증하고 `AgentConfig`를 생성합니다.
    pub fn build(self) -> Result<AgentConfig, AgentError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_requires_api_key() {
        let err = AgentConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn from_core_preserves_values() {
        let mut core = LogshipConfig::default();
        core.general.hostname = "web-1".to_owned();
        core.logs.api_key = "abc".to_owned();
        core.logs.logset = "prod".to_owned();
        core.logs.chan_size = 7;
        core.logs.tail_mode = TailMode::Reopen;
        core.logs.run_path = "/tmp/logship-run".to_owned();

        let config = AgentConfig::from_core(&core);
        assert_eq!(config.api_key, "abc");
        assert_eq!(config.logset, "prod");
        assert_eq!(config.hostname, "web-1");
        assert_eq!(config.chan_size, 7);
        assert_eq!(config.tail_mode, TailMode::Reopen);
        assert_eq!(
            config.registry_path(),
            PathBuf::from("/tmp/logship-run/registry.json")
        );
        // 확장 필드는 기본값
        assert_eq!(config.max_tcp_connections, 100);
        config.validate().unwrap();
    }

    #[test]
    fn builder_creates_valid_config() {
        let config = AgentConfigBuilder::new()
            .api_key("key")
            .chan_size(10)
            .pipelines(2)
            .sleep_ms(50)
            .build()
            .unwrap();
        assert_eq!(config.chan_size, 10);
        assert_eq!(config.pipelines, 2);
        assert_eq!(config.sleep_duration(), Duration::from_millis(50));
    }

    #[test]
    fn builder_rejects_zero_pipelines() {
        let result = AgentConfigBuilder::new().api_key("key").pipelines(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_too_many_pipelines() {
        let result = AgentConfigBuilder::new().api_key("key").pipelines(1000).build();
        assert!(result.is_err());
    }

    #[test]
    fn registry_ttl_is_in_hours() {
        let config = AgentConfig::default();
        assert_eq!(config.registry_ttl(), Duration::from_secs(23 * 3600));
    }

    #[test]
    fn resolve_hostname_prefers_configured_value() {
        assert_eq!(resolve_hostname("  box  "), "box");
        assert!(!resolve_hostname("").is_empty());
    }
}
