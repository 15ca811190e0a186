//! 컨테이너 런타임 추상화
//!
//! [`ContainerRuntime`]은 실행 중인 컨테이너 목록과 로그 스트림만 다룹니다.
//! 운영 환경은 [`BollardRuntime`], 테스트는 mock 구현을 사용합니다.
//!
//! 로그 라인은 Docker 타임스탬프 옵션으로 요청하며 `"<RFC3339Nano> <content>"`
//! 형식으로 도착합니다.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::error::AgentError;

/// 실행 중인 컨테이너 정보
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSummary {
    /// 컨테이너 ID
    pub id: String,
    /// 이름 (앞의 `/` 제거)
    pub name: String,
    /// 이미지 이름
    pub image: String,
    /// 레이블
    pub labels: HashMap<String, String>,
}

/// 로그 스트림 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    /// 표준 출력
    Stdout,
    /// 표준 에러
    Stderr,
}

/// 타임스탬프가 분리된 로그 라인
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// 출력 스트림
    pub stream: LogStream,
    /// Docker 타임스탬프 (RFC3339Nano)
    pub timestamp: String,
    /// 라인 내용 (줄바꿈 제외)
    pub content: Bytes,
}

impl LogLine {
    /// `"<timestamp> <content>"` 형식의 원시 라인을 나눕니다.
    ///
    /// 공백이 없으면 전체를 내용으로 보고 타임스탬프는 비워 둡니다.
    pub fn parse(stream: LogStream, raw: Bytes) -> Self {
        let mut raw = raw;
        while raw.last().is_some_and(|&b| b == b'\n' || b == b'\r') {
            raw.truncate(raw.len() - 1);
        }

        match raw.iter().position(|&b| b == b' ') {
            Some(i) => {
                let timestamp = String::from_utf8_lossy(&raw[..i]).into_owned();
                Self {
                    stream,
                    timestamp,
                    content: raw.slice(i + 1..),
                }
            }
            None => Self {
                stream,
                timestamp: String::new(),
                content: raw,
            },
        }
    }
}

/// 컨테이너 런타임
pub trait ContainerRuntime: Send + Sync + 'static {
    /// 실행 중인 컨테이너 목록
    ///
    /// # Errors
    /// 런타임 API 호출이 실패하면 [`AgentError::Container`]를 반환합니다.
    fn list_containers(&self) -> impl Future<Output = Result<Vec<ContainerSummary>, AgentError>> + Send;

    /// `since`(유닉스 초) 이후의 로그를 따라갑니다. 컨테이너가 끝나면 스트림도 끝납니다.
    fn logs(&self, id: &str, since: i64) -> BoxStream<'static, Result<LogLine, AgentError>>;
}

/// `bollard` 기반 Docker 런타임
#[derive(Clone)]
pub struct BollardRuntime {
    docker: Arc<bollard::Docker>,
}

impl BollardRuntime {
    /// 기본 로컬 소켓으로 연결합니다.
    ///
    /// # Errors
    /// 소켓이 없거나 권한이 없으면 [`AgentError::Container`]를 반환합니다.
    pub fn connect_local() -> Result<Self, AgentError> {
        let docker = bollard::Docker::connect_with_local_defaults()
            .map_err(|e| AgentError::Container(format!("failed to connect to docker: {e}")))?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }
}

impl ContainerRuntime for BollardRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, AgentError> {
        use bollard::container::ListContainersOptions;

        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| AgentError::Container(format!("list containers failed: {e}")))?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .unwrap_or_default()
                    .first()
                    .map(|n| n.trim_start_matches('/').to_owned())
                    .unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
            })
            .filter(|c| !c.id.is_empty())
            .collect())
    }

    fn logs(&self, id: &str, since: i64) -> BoxStream<'static, Result<LogLine, AgentError>> {
        use bollard::container::{LogOutput, LogsOptions};

        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            since,
            timestamps: true,
            ..Default::default()
        };
        self.docker
            .logs(id, Some(options))
            .filter_map(|item| async move {
                match item {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(LogLine::parse(LogStream::Stdout, message)))
                    }
                    Ok(LogOutput::StdErr { message }) => Some(Ok(LogLine::parse(LogStream::Stderr, message))),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(AgentError::Container(format!("log stream failed: {e}")))),
                }
            })
            .boxed()
    }
}
