//! 헬스 카탈로그 -- 장기 실행 작업자의 생존 확인
//!
//! 작업자는 [`Catalog::register`]로 [`HealthHandle`]을 받고, 자신의 루프에서
//! 핸들의 핑 채널을 비웁니다. [`Catalog::ping_components`]는 각 채널에 핑을
//! 넣어 보고, 넣을 수 있으면 정상, 버퍼가 가득 찼거나 닫혔으면 비정상으로
//! 표시합니다. 새로 등록된 구성 요소는 첫 핑이 전달되기 전까지 비정상입니다.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use logship_core::pipeline::HealthStatus;

use crate::error::AgentError;

/// 핑 채널 용량
const PING_BUFFER: usize = 2;

/// 등록된 구성 요소가 받는 핸들
#[derive(Debug)]
pub struct HealthHandle {
    /// 등록 토큰
    pub token: Uuid,
    /// 핑 수신 채널
    pub ping: mpsc::Receiver<()>,
}

#[derive(Debug)]
struct Component {
    name: String,
    ping: mpsc::Sender<()>,
    healthy: bool,
}

/// 핸들이 있으면 다음 핑을 기다리고, 없으면 영원히 대기합니다.
///
/// 작업자 루프의 `select!` 분기로 쓰입니다.
pub async fn recv_ping(handle: &mut Option<HealthHandle>) -> Option<()> {
    match handle {
        Some(handle) => handle.ping.recv().await,
        None => std::future::pending().await,
    }
}

/// 헬스 보고서
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// 정상 구성 요소 이름
    pub healthy: Vec<String>,
    /// 비정상 구성 요소 이름
    pub unhealthy: Vec<String>,
}

impl HealthReport {
    /// 모든 구성 요소가 정상인지 여부
    pub fn is_healthy(&self) -> bool {
        self.unhealthy.is_empty()
    }

    /// core의 [`HealthStatus`]로 변환합니다.
    pub fn to_health_status(&self) -> HealthStatus {
        if self.is_healthy() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy(format!("unhealthy: {}", self.unhealthy.join(", ")))
        }
    }
}

/// 헬스 카탈로그
#[derive(Debug, Default)]
pub struct Catalog {
    components: Mutex<HashMap<Uuid, Component>>,
}

impl Catalog {
    /// 빈 카탈로그를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 구성 요소를 등록합니다. 같은 이름도 매번 독립된 항목이 됩니다.
    pub fn register(&self, name: impl Into<String>) -> HealthHandle {
        let (tx, rx) = mpsc::channel(PING_BUFFER);
        let token = Uuid::new_v4();
        let name = name.into();
        tracing::debug!(component = %name, token = %token, "health component registered");

        self.lock().insert(
            token,
            Component {
                name,
                ping: tx,
                healthy: false,
            },
        );
        HealthHandle { token, ping: rx }
    }

    /// 등록을 해제합니다.
    ///
    /// # Errors
    /// 알 수 없는 토큰이면 [`AgentError::Health`]를 반환하며, 다른 항목은 그대로 둡니다.
    pub fn deregister(&self, token: Uuid) -> Result<(), AgentError> {
        match self.lock().remove(&token) {
            Some(component) => {
                tracing::debug!(component = %component.name, "health component deregistered");
                Ok(())
            }
            None => Err(AgentError::Health(format!("unknown token: {token}"))),
        }
    }

    /// 모든 구성 요소에 핑을 보냅니다.
    pub fn ping_components(&self) {
        for component in self.lock().values_mut() {
            component.healthy = component.ping.try_send(()).is_ok();
        }
    }

    /// 현재 헬스 보고서
    pub fn status(&self) -> HealthReport {
        let mut report = HealthReport::default();
        for component in self.lock().values() {
            if component.healthy {
                report.healthy.push(component.name.clone());
            } else {
                report.unhealthy.push(component.name.clone());
            }
        }
        report.healthy.sort();
        report.unhealthy.sort();
        report
    }

    /// 등록된 구성 요소 수
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// 등록된 구성 요소가 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 토큰이 등록되어 있는지 여부
    pub fn contains(&self, token: &Uuid) -> bool {
        self.lock().contains_key(token)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Component>> {
        self.components.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_component_is_unhealthy() {
        let catalog = Catalog::new();
        let handle = catalog.register("test1");
        assert!(catalog.contains(&handle.token));

        let status = catalog.status();
        assert!(status.healthy.is_empty());
        assert_eq!(status.unhealthy, vec!["test1"]);
        assert!(status.to_health_status().is_unhealthy());
    }

    #[test]
    fn same_name_registers_independent_entries() {
        let catalog = Catalog::new();
        let _a = catalog.register("triplet");
        let _b = catalog.register("triplet");
        let _c = catalog.register("triplet");
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn deregister_removes_only_that_entry() {
        let catalog = Catalog::new();
        let first = catalog.register("test1");
        let second = catalog.register("test2");

        catalog.deregister(first.token).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains(&second.token));
    }

    #[test]
    fn deregister_unknown_token_fails() {
        let catalog = Catalog::new();
        let handle = catalog.register("test1");

        let err = catalog.deregister(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AgentError::Health(_)));
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains(&handle.token));
    }

    #[test]
    fn component_becomes_healthy_when_reading_pings() {
        let catalog = Catalog::new();
        let mut handle = catalog.register("test1");

        for _ in 1..10 {
            catalog.ping_components();
            handle.ping.try_recv().unwrap();
        }

        let status = catalog.status();
        assert_eq!(status.healthy, vec!["test1"]);
        assert!(status.unhealthy.is_empty());
        assert!(status.is_healthy());
    }

    #[test]
    fn unhealthy_and_back() {
        let catalog = Catalog::new();
        let mut handle = catalog.register("test1");

        // 핑을 읽지 않으면 버퍼가 차서 비정상
        for _ in 1..10 {
            catalog.ping_components();
        }
        assert_eq!(catalog.status().unhealthy.len(), 1);

        for _ in 1..10 {
            catalog.ping_components();
            let _ = handle.ping.try_recv();
        }
        let status = catalog.status();
        assert_eq!(status.healthy.len(), 1);
        assert!(status.unhealthy.is_empty());
    }

    #[test]
    fn dropped_handle_is_unhealthy() {
        let catalog = Catalog::new();
        let handle = catalog.register("gone");
        drop(handle);
        catalog.ping_components();
        assert_eq!(catalog.status().unhealthy, vec!["gone"]);
    }
}
