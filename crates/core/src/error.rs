//! 에러 타입 — 도메인별 에러 정의

/// logship 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum LogshipError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 스토리지(레지스트리 파일) 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 채널 수신 실패
    #[error("channel receive failed: {0}")]
    ChannelRecv(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 정지된 인스턴스를 다시 시작하려 함
    #[error("pipeline already stopped; build a new instance to run again")]
    AlreadyStopped,

    /// 실행 중이 아님
    #[error("pipeline is not running")]
    NotRunning,
}

/// 스토리지 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 읽기 실패
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    /// 쓰기 실패
    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },

    /// 손상된 데이터
    #[error("corrupt data in {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_to_logship_error() {
        let err: LogshipError = ConfigError::InvalidValue {
            field: "logs.chan_size".to_owned(),
            reason: "must be greater than 0".to_owned(),
        }
        .into();
        assert!(matches!(err, LogshipError::Config(_)));
        assert!(err.to_string().contains("logs.chan_size"));
    }

    #[test]
    fn storage_error_display_includes_path() {
        let err = StorageError::Write {
            path: "/var/lib/logship/registry.json".to_owned(),
            reason: "disk full".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("registry.json"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn already_stopped_mentions_rebuild() {
        let err = PipelineError::AlreadyStopped;
        assert!(err.to_string().contains("new instance"));
    }
}
