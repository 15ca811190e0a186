//! 에이전트 상태 조회
//!
//! 메트릭 레코더가 없어도 상태를 볼 수 있도록 에이전트는 자체 원자 카운터를
//! 유지합니다. [`AgentStatus`]는 외부 HTTP 레이어가 그대로 직렬화할 수 있습니다.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use logship_core::config::SourceKind;

use crate::health::HealthReport;
use crate::source::{LogSource, SourceState};

/// 에이전트 카운터
#[derive(Debug, Default)]
pub struct AgentCounters {
    bytes_read: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    sent: AtomicU64,
    send_errors: AtomicU64,
}

impl AgentCounters {
    /// 읽은 바이트 수를 더합니다.
    pub fn add_bytes_read(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::Relaxed);
    }

    /// 처리된 메시지 수를 하나 늘립니다.
    pub fn inc_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// 드롭된 메시지 수를 하나 늘립니다.
    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// 전송된 메시지 수를 하나 늘립니다.
    pub fn inc_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// 전송 실패 수를 하나 늘립니다.
    pub fn inc_send_errors(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// 현재 값 스냅샷
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// 카운터 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    /// 읽은 바이트
    pub bytes_read: u64,
    /// 처리된 메시지 (필터 통과 여부와 무관)
    pub processed: u64,
    /// 규칙으로 드롭된 메시지
    pub dropped: u64,
    /// 전송 완료된 메시지
    pub sent: u64,
    /// 전송 실패 횟수
    pub send_errors: u64,
}

/// 소스별 상태
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    /// 소스 이름
    pub name: String,
    /// 소스 종류
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// 경로, 포트 또는 컨테이너 필터
    pub target: String,
    /// 상태
    #[serde(flatten)]
    pub state: SourceState,
}

impl SourceReport {
    /// 소스의 현재 상태를 보고서로 만듭니다.
    pub fn from_source(source: &LogSource) -> Self {
        let config = &source.config;
        let target = match config.kind {
            SourceKind::File => config.path.clone().unwrap_or_default(),
            SourceKind::Tcp | SourceKind::Udp => config
                .port
                .map(|p| p.to_string())
                .unwrap_or_default(),
            SourceKind::Docker => config
                .image
                .clone()
                .or_else(|| config.label.clone())
                .unwrap_or_else(|| "*".to_owned()),
        };
        Self {
            name: source.name.clone(),
            kind: config.kind,
            target,
            state: source.status.get(),
        }
    }
}

/// 에이전트 전체 상태
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    /// 실행 중 여부
    pub is_running: bool,
    /// 소스별 상태
    pub sources: Vec<SourceReport>,
    /// 카운터
    pub counters: CountersSnapshot,
    /// 구성 요소 헬스
    pub health: HealthReport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use logship_core::config::SourceConfig;

    #[test]
    fn counters_snapshot() {
        let counters = AgentCounters::default();
        counters.add_bytes_read(10);
        counters.inc_processed();
        counters.inc_processed();
        counters.inc_dropped();
        counters.inc_sent();
        let snap = counters.snapshot();
        assert_eq!(snap.bytes_read, 10);
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.sent, 1);
        assert_eq!(snap.send_errors, 0);
    }

    #[test]
    fn source_report_shows_error_state() {
        let mut config = SourceConfig::new(SourceKind::File);
        config.path = Some("/var/log/app.log".to_owned());
        let source = LogSource::new("app", config).unwrap();
        source
            .status
            .track_error("tailer stopped due to I/O error on path /var/log/app.log");

        let report = SourceReport::from_source(&source);
        assert_eq!(report.target, "/var/log/app.log");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["type"], "file");
        assert_eq!(json["status"], "error");
        assert!(json["error"].as_str().unwrap().contains("I/O error"));
    }

    #[test]
    fn pending_and_success_are_distinct() {
        let source = LogSource::new("net", SourceConfig::new(SourceKind::Udp)).unwrap();
        let pending = serde_json::to_value(SourceReport::from_source(&source)).unwrap();
        source.status.success();
        let ok = serde_json::to_value(SourceReport::from_source(&source)).unwrap();
        assert_eq!(pending["status"], "pending");
        assert_eq!(ok["status"], "success");
    }
}
