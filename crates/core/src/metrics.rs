//! 메트릭 상수 및 설명 등록
//!
//! 에이전트와 데몬이 기록하는 Prometheus 메트릭 이름을 한곳에서 정의합니다.
//! 레코더가 설치되지 않은 경우 `metrics` 매크로 호출은 아무 일도 하지 않습니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logship_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(logship_core::metrics::LOGS_SENT_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 소스 종류 레이블 키 (file, tcp, udp, docker)
pub const LABEL_SOURCE_KIND: &str = "source_kind";

/// 드롭 사유 레이블 키 (excluded, not_included)
pub const LABEL_REASON: &str = "reason";

// ─── 에이전트 메트릭 ───────────────────────────────────────────────

/// 입력에서 읽은 바이트 수 (counter, label: source_kind)
pub const LOGS_BYTES_READ_TOTAL: &str = "logship_logs_bytes_read_total";

/// 프로세서를 통과한 메시지 수 (counter)
pub const LOGS_PROCESSED_TOTAL: &str = "logship_logs_processed_total";

/// 처리 규칙으로 버려진 메시지 수 (counter, label: reason)
pub const LOGS_DROPPED_TOTAL: &str = "logship_logs_dropped_total";

/// 수집기로 전송된 메시지 수 (counter)
pub const LOGS_SENT_TOTAL: &str = "logship_logs_sent_total";

/// 전송 실패(재연결 유발) 수 (counter)
pub const LOGS_SEND_ERRORS_TOTAL: &str = "logship_logs_send_errors_total";

/// 레지스트리 저장 실패 수 (counter)
pub const REGISTRY_FLUSH_ERRORS_TOTAL: &str = "logship_registry_flush_errors_total";

/// 레지스트리 항목 수 (gauge)
pub const REGISTRY_ENTRIES: &str = "logship_registry_entries";

/// 실행 중인 테일러 수 (gauge)
pub const TAILERS_ACTIVE: &str = "logship_tailers_active";

/// 메시지 하나를 처리하는 데 걸린 시간 (histogram, 초)
pub const PROCESSING_DURATION_SECONDS: &str = "logship_processing_duration_seconds";

// ─── 데몬 메트릭 ──────────────────────────────────────────────────

/// 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "logship_daemon_uptime_seconds";

/// 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "logship_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 처리 지연 시간 히스토그램 버킷 (초)
///
/// 규칙 평가는 수 마이크로초 단위이므로 10us ~ 100ms 범위를 사용합니다.
pub const PROCESSING_DURATION_BUCKETS: [f64; 8] =
    [0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.1];

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        LOGS_BYTES_READ_TOTAL,
        "Total bytes read from all log inputs"
    );
    describe_counter!(
        LOGS_PROCESSED_TOTAL,
        "Total number of messages that passed processing rules"
    );
    describe_counter!(
        LOGS_DROPPED_TOTAL,
        "Total number of messages dropped by processing rules"
    );
    describe_counter!(
        LOGS_SENT_TOTAL,
        "Total number of messages written to the collector"
    );
    describe_counter!(
        LOGS_SEND_ERRORS_TOTAL,
        "Total number of failed collector writes"
    );
    describe_counter!(
        REGISTRY_FLUSH_ERRORS_TOTAL,
        "Total number of failed offset registry writes"
    );
    describe_gauge!(REGISTRY_ENTRIES, "Number of entries in the offset registry");
    describe_gauge!(TAILERS_ACTIVE, "Number of running file and container tailers");
    describe_histogram!(
        PROCESSING_DURATION_SECONDS,
        "Time to evaluate rules and frame a single message in seconds"
    );
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
