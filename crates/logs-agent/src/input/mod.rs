//! 로그 입력
//!
//! 모든 입력은 [`Stage`](logship_core::pipeline::Stage)이며, 읽은 라인을
//! [`PipelineChannels`](crate::pipeline::PipelineChannels)에서 받은 채널로 보냅니다.
//!
//! | 입력 | 소스 종류 | 감사 |
//! |------|-----------|------|
//! | [`file::Scanner`] | `file` | 오프셋 |
//! | [`container::ContainerScanner`] | `docker` | 타임스탬프 |
//! | [`listener::Listener`] | `tcp`, `udp` | 없음 |

pub mod container;
pub mod file;
pub mod listener;
