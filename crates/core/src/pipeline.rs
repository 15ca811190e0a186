//! 스테이지 trait — 시작/정지 생명주기의 확장 포인트
//!
//! [`Stage`]는 파이프라인 구성 요소(입력, 프로세서, 감사기, 그룹)가 공유하는
//! 유일한 외부 인터페이스입니다. 두 연산 모두 에러를 반환하지 않으며,
//! 내부 실패는 로그와 상태 조회로 드러냅니다.
//!
//! # 생명주기
//! ```text
//! 생성 → start() → 실행 중 → stop() → 정지 (재시작 불가)
//! ```

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// dyn 호환 trait 메서드가 반환하는 boxed future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 시작/정지 가능한 파이프라인 단위
///
/// 그룹은 `Vec<Arc<dyn Stage>>`로 자식을 보관하므로 `&self`만 받습니다.
/// 한 번 정지한 인스턴스는 다시 시작하지 않으며, 새 실행에는 새 인스턴스를 만듭니다.
pub trait Stage: Send + Sync {
    /// 로그와 상태 표시에 쓰는 이름
    fn name(&self) -> &str;

    /// 작업을 시작합니다. 정상 상태에 도달할 때까지 기다리지 않고 반환해야 합니다.
    fn start(&self) -> BoxFuture<'_, ()>;

    /// 작업을 정지합니다. 보유한 데이터를 모두 내보낸 뒤에 반환합니다.
    fn stop(&self) -> BoxFuture<'_, ()>;
}

/// 구성 요소 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 일부 기능 저하
    Degraded(String),
    /// 비정상
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 여부
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 비정상 여부
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}
