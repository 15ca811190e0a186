//! 로그 소스 -- 설정, 컴파일된 규칙, 상태 추적
//!
//! [`LogSource`]는 생성 후 변경되지 않는 설정과 처리 규칙을 가지며,
//! 상태([`SourceStatus`])만 내부 동기화로 갱신됩니다.
//! 입력 스테이지는 `Arc<LogSource>`로 참조만 합니다.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::Serialize;

use logship_core::config::{SourceConfig, SourceKind};

use crate::error::AgentError;
use crate::rule::ProcessingRule;

/// 태그가 하나도 없을 때의 태그 페이로드
pub const EMPTY_TAGS_PAYLOAD: &[u8] = b"-";

/// 소스 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum SourceState {
    /// 아직 발견되지 않았거나 열리지 않음
    Pending,
    /// 정상 수집 중
    Success,
    /// 실패 (사유 포함)
    Error(String),
}

impl std::fmt::Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "ok"),
            Self::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// 소스 상태 추적기
///
/// 여러 입력 태스크가 동시에 갱신할 수 있으며, 마지막 갱신이 이깁니다.
#[derive(Debug)]
pub struct SourceStatus {
    state: Mutex<SourceState>,
}

impl Default for SourceStatus {
    fn default() -> Self {
        Self {
            state: Mutex::new(SourceState::Pending),
        }
    }
}

impl SourceStatus {
    /// 정상 상태로 표시합니다.
    pub fn success(&self) {
        self.set(SourceState::Success);
    }

    /// 실패를 기록합니다.
    pub fn track_error(&self, reason: impl Into<String>) {
        self.set(SourceState::Error(reason.into()));
    }

    /// 대기 상태로 되돌립니다.
    pub fn pending(&self) {
        self.set(SourceState::Pending);
    }

    /// 현재 상태
    pub fn get(&self) -> SourceState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 실패 상태 여부
    pub fn is_error(&self) -> bool {
        matches!(self.get(), SourceState::Error(_))
    }

    fn set(&self, state: SourceState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

/// 이름이 붙은 소스 정의 (컴파일 전)
#[derive(Debug, Clone)]
pub struct SourceDefinition {
    /// 소스 이름 (로그와 상태 표시용)
    pub name: String,
    /// 원본 설정
    pub config: SourceConfig,
}

impl SourceDefinition {
    /// 새 소스 정의를 생성합니다.
    pub fn new(name: impl Into<String>, config: SourceConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

/// 로그 소스
#[derive(Debug)]
pub struct LogSource {
    /// 소스 이름
    pub name: String,
    /// 원본 설정
    pub config: SourceConfig,
    /// 컴파일된 처리 규칙 (선언 순서)
    pub rules: Vec<ProcessingRule>,
    /// 미리 계산된 태그 페이로드
    pub tags_payload: Bytes,
    /// 상태
    pub status: SourceStatus,
}

impl LogSource {
    /// 소스를 생성하고 처리 규칙을 컴파일합니다.
    ///
    /// # Errors
    /// 처리 규칙 중 하나라도 컴파일에 실패하면 [`AgentError::RuleCompile`]을 반환합니다.
    pub fn new(name: impl Into<String>, config: SourceConfig) -> Result<Self, AgentError> {
        let name = name.into();
        let rules = config
            .log_processing_rules
            .iter()
            .map(|rule| ProcessingRule::compile(&name, rule))
            .collect::<Result<Vec<_>, _>>()?;
        let tags_payload = build_tags_payload(&config);

        Ok(Self {
            name,
            config,
            rules,
            tags_payload,
            status: SourceStatus::default(),
        })
    }

    /// 소스 종류
    pub fn kind(&self) -> SourceKind {
        self.config.kind
    }

    /// 종류별 필수 필드를 검사합니다.
    pub fn validate(&self) -> Result<(), String> {
        match self.config.kind {
            SourceKind::File => match self.config.path.as_deref() {
                Some(p) if !p.trim().is_empty() => Ok(()),
                _ => Err("file source requires a path".to_owned()),
            },
            SourceKind::Tcp | SourceKind::Udp => match self.config.port {
                Some(p) if p > 0 => Ok(()),
                _ => Err(format!("{} source requires a port", self.config.kind)),
            },
            SourceKind::Docker => Ok(()),
        }
    }
}

/// 소스 설정에서 태그 페이로드를 계산합니다.
///
/// `[dd ddsource="…"][dd ddsourcecategory="…"][dd ddtags="a,b"]` 형태이며,
/// 모두 비어 있으면 `-`입니다.
pub fn build_tags_payload(config: &SourceConfig) -> Bytes {
    let mut payload = String::new();
    if let Some(source) = config.source.as_deref().filter(|s| !s.is_empty()) {
        payload.push_str(&format!("[dd ddsource=\"{source}\"]"));
    }
    if let Some(category) = config.source_category.as_deref().filter(|s| !s.is_empty()) {
        payload.push_str(&format!("[dd ddsourcecategory=\"{category}\"]"));
    }
    if !config.tags.is_empty() {
        payload.push_str(&format!("[dd ddtags=\"{}\"]", config.tags.join(",")));
    }

    if payload.is_empty() {
        Bytes::from_static(EMPTY_TAGS_PAYLOAD)
    } else {
        Bytes::from(payload)
    }
}

/// 컴파일된 소스 목록
#[derive(Debug, Default, Clone)]
pub struct LogSources {
    sources: Vec<Arc<LogSource>>,
}

impl LogSources {
    /// 소스 정의를 컴파일합니다.
    ///
    /// 규칙 컴파일 에러는 즉시 반환됩니다. 필수 필드가 없는 소스는
    /// 목록에 남지만 `Error` 상태가 되어 [`valid_sources`](Self::valid_sources)에서 제외됩니다.
    pub fn compile(definitions: &[SourceDefinition]) -> Result<Self, AgentError> {
        let mut sources = Vec::with_capacity(definitions.len());
        for def in definitions {
            let source = LogSource::new(def.name.clone(), def.config.clone())?;
            if let Err(reason) = source.validate() {
                tracing::warn!(source = %source.name, reason = %reason, "invalid log source");
                source.status.track_error(reason);
            }
            sources.push(Arc::new(source));
        }
        Ok(Self { sources })
    }

    /// 모든 소스 (유효하지 않은 소스 포함)
    pub fn all(&self) -> &[Arc<LogSource>] {
        &self.sources
    }

    /// 구성 시점에 유효했던 소스
    pub fn valid_sources(&self) -> Vec<Arc<LogSource>> {
        self.sources
            .iter()
            .filter(|s| s.validate().is_ok())
            .cloned()
            .collect()
    }

    /// 주어진 종류의 유효한 소스
    pub fn of_kind(&self, kind: SourceKind) -> Vec<Arc<LogSource>> {
        self.valid_sources()
            .into_iter()
            .filter(|s| s.kind() == kind)
            .collect()
    }

    /// 소스 수
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// 소스가 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
