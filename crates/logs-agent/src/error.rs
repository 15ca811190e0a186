//! 로그 에이전트 에러 타입
//!
//! [`AgentError`]는 에이전트 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<AgentError> for LogshipError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.
//!
//! 스테이지의 `start`/`stop`은 에러를 반환하지 않으므로, 여기 정의된 에러 중
//! 실행 중에 발생하는 것들(`Tailer`, `Connection`, `Registry`)은 로그와
//! 소스 상태로만 드러납니다.

use logship_core::error::{ConfigError, LogshipError, PipelineError, StorageError};

/// 로그 에이전트 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 처리 규칙 컴파일 실패 (소스 구성 시점에 발생)
    #[error("rule compile error: source '{source_name}', rule '{rule}': {reason}")]
    RuleCompile {
        /// 규칙이 속한 소스
        source_name: String,
        /// 규칙 이름
        rule: String,
        /// 실패 사유
        reason: String,
    },

    /// 소스 정의 파일 로딩 실패
    #[error("source load error: {path}: {reason}")]
    SourceLoad {
        /// 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 파일 테일러 에러
    #[error("tailer error: {path}: {reason}")]
    Tailer {
        /// 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 수집기 연결 에러
    #[error("connection error: {0}")]
    Connection(String),

    /// 컨테이너 런타임 에러
    #[error("container runtime error: {0}")]
    Container(String),

    /// 오프셋 레지스트리 에러
    #[error("registry error: {path}: {reason}")]
    Registry {
        /// 레지스트리 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 헬스 카탈로그 에러
    #[error("health catalog error: {0}")]
    Health(String),

    /// 이미 정지된 에이전트를 다시 시작하려 함
    #[error("agent already stopped; build a new agent to run again")]
    AlreadyStopped,

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// YAML 파싱 에러
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON 직렬화 에러
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AgentError> for LogshipError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Config { field, reason } => {
                LogshipError::Config(ConfigError::InvalidValue { field, reason })
            }
            AgentError::Registry { path, reason } => {
                LogshipError::Storage(StorageError::Write { path, reason })
            }
            AgentError::AlreadyStopped => LogshipError::Pipeline(PipelineError::AlreadyStopped),
            AgentError::Io(e) => LogshipError::Io(e),
            other => LogshipError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
