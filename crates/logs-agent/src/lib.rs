#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`agent`]: 스테이지 트리 구성과 에이전트 생명주기
//! - [`input`]: 파일 테일러, 컨테이너 로그, TCP/UDP 리스너
//! - [`decoder`]: 바이트 스트림을 라인 단위로 분할
//! - [`rule`]: 처리 규칙 (exclude / include / mask)
//! - [`pipeline`]: 프로세서, 전송기, 라운드로빈 분배기
//! - [`auditor`]: 오프셋 레지스트리와 주기적 저장
//! - [`stages`]: 직렬/병렬 스테이지 그룹
//! - [`health`]: 구성 요소 생존 신호 카탈로그
//! - [`source`], [`loader`]: 소스 정의와 `conf.d` YAML 로딩
//! - [`config`], [`error`], [`status`]: 설정, 에러, 상태 보고
//!
//! # 아키텍처
//!
//! ```text
//! file/docker/tcp/udp -> Provider(round-robin) -> Processor -> Sender -> collector
//!                                                                 |
//!                                                              Auditor -> registry.json
//! ```

pub mod agent;
pub mod auditor;
pub mod config;
pub mod decoder;
pub mod error;
pub mod health;
pub mod input;
pub mod loader;
pub mod message;
pub mod pipeline;
pub mod rule;
pub mod source;
pub mod stages;
pub mod status;

// --- 주요 타입 re-export ---

// 에이전트
pub use agent::{LogsAgent, LogsAgentBuilder};

// 설정
pub use config::{AgentConfig, AgentConfigBuilder};

// 에러
pub use error::AgentError;

// 소스
pub use loader::SourceLoader;
pub use source::{LogSource, LogSources, SourceDefinition, SourceState};

// 메시지와 규칙
pub use message::{Message, Origin};
pub use rule::{ProcessingRule, RuleOutcome, apply_rules};

// 감사와 상태
pub use auditor::{Auditor, Registry, RegistryEntry};
pub use health::{Catalog, HealthReport};
pub use status::{AgentCounters, AgentStatus, CountersSnapshot, SourceReport};

// 전송
pub use pipeline::{Connection, Connector, TcpConnector};
