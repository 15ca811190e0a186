//! 파이프라인을 흐르는 메시지 타입
//!
//! [`Message`]는 입력(테일러, 리스너, 컨테이너 스캐너)에서 생성되어
//! 프로세서 → 센더 → 감사기 순서로 소유권이 넘어갑니다.

use std::sync::Arc;

use bytes::Bytes;

use crate::source::LogSource;

/// 정보 수준 심각도 (`<46>`)
pub const SEV_INFO: &[u8] = b"<46>";

/// 에러 수준 심각도 (`<43>`)
pub const SEV_ERROR: &[u8] = b"<43>";

/// 전송 레코드의 타임스탬프 포맷 (chrono `format`용, UTC 나노초)
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9fZ";

/// 파일 소스 식별자 접두어
pub const FILE_IDENTIFIER_PREFIX: &str = "file:";

/// 컨테이너 소스 식별자 접두어
pub const DOCKER_IDENTIFIER_PREFIX: &str = "docker:";

/// 파일 경로로 레지스트리 식별자를 만듭니다.
pub fn file_identifier(path: &str) -> String {
    format!("{FILE_IDENTIFIER_PREFIX}{path}")
}

/// 컨테이너 ID로 레지스트리 식별자를 만듭니다.
pub fn docker_identifier(container_id: &str) -> String {
    format!("{DOCKER_IDENTIFIER_PREFIX}{container_id}")
}

/// 메시지 출처
#[derive(Debug, Clone)]
pub struct Origin {
    /// 메시지를 만든 소스
    pub source: Arc<LogSource>,
    /// 레지스트리 식별자 (네트워크 입력은 `None`이며 감사 대상이 아님)
    pub identifier: Option<String>,
    /// 이 메시지까지 처리된 바이트 위치
    pub offset: u64,
    /// 파일 회전 세대 (감사기가 회전 이전 파일의 확인을 가려냄)
    pub generation: u64,
    /// 원본 타임스탬프 (컨테이너 로그)
    pub timestamp: Option<String>,
}

impl Origin {
    /// 새 출처를 생성합니다.
    pub fn new(source: Arc<LogSource>) -> Self {
        Self {
            source,
            identifier: None,
            offset: 0,
            generation: 0,
            timestamp: None,
        }
    }

    /// 레지스트리 식별자를 설정합니다.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// 오프셋을 설정합니다.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// 회전 세대를 설정합니다.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// 원본 타임스탬프를 설정합니다.
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

/// 로그 메시지
#[derive(Debug, Clone)]
pub struct Message {
    /// 로그 내용 (프로세서 통과 후에는 전송 페이로드)
    pub content: Bytes,
    /// 출처
    pub origin: Origin,
    /// 심각도 (`None`이면 [`SEV_INFO`])
    pub severity: Option<Bytes>,
    /// 태그 페이로드 (`None`이면 소스의 태그 페이로드)
    pub tags_payload: Option<Bytes>,
}

impl Message {
    /// 새 메시지를 생성합니다.
    pub fn new(content: impl Into<Bytes>, origin: Origin) -> Self {
        Self {
            content: content.into(),
            origin,
            severity: None,
            tags_payload: None,
        }
    }

    /// 심각도를 설정합니다.
    pub fn with_severity(mut self, severity: &'static [u8]) -> Self {
        self.severity = Some(Bytes::from_static(severity));
        self
    }

    /// 소스 이름
    pub fn source_name(&self) -> &str {
        &self.origin.source.name
    }
}
