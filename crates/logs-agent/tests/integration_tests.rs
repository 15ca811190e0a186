//! 통합 테스트 -- 에이전트 전체 흐름 검증
//!
//! 파일 테일링부터 규칙 적용, 전송, 레지스트리 저장까지를 mock 수집기로 확인합니다.

use std::io::{self, Write};
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::AsyncWrite;

use logship_agent::pipeline::BoxConnection;
use logship_agent::{
    AgentConfig, AgentError, Connector, LogsAgent, LogsAgentBuilder, SourceDefinition, SourceLoader,
    SourceState,
};
use logship_core::config::{SourceConfig, SourceKind, TailFrom};
use logship_core::pipeline::BoxFuture;

/// 쓰여진 바이트를 공유 버퍼에 모으는 연결
struct SinkConn {
    sink: Arc<Mutex<Vec<u8>>>,
}

impl AsyncWrite for SinkConn {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.sink.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Default)]
struct MockCollector {
    sink: Arc<Mutex<Vec<u8>>>,
    connects: AtomicUsize,
}

impl MockCollector {
    fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.sink.lock().unwrap())
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl Connector for MockCollector {
    fn address(&self) -> String {
        "mock-collector:10516".to_owned()
    }

    fn connect(&self) -> BoxFuture<'_, io::Result<BoxConnection>> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SinkConn {
                sink: Arc::clone(&self.sink),
            }) as BoxConnection)
        })
    }
}

fn test_config(run_path: &Path) -> AgentConfig {
    AgentConfig {
        api_key: "apikey".to_owned(),
        hostname: "test-host".to_owned(),
        dev_mode_no_ssl: true,
        run_path: run_path.to_path_buf(),
        pipelines: 2,
        tail_from: TailFrom::Beginning,
        sleep_ms: 10,
        flush_interval_ms: 50,
        backoff_initial_ms: 10,
        backoff_max_secs: 1,
        ..AgentConfig::default()
    }
}

fn file_source(name: &str, path: &Path) -> SourceDefinition {
    let mut config = SourceConfig::new(SourceKind::File);
    config.path = Some(path.display().to_string());
    config.service = Some("api".to_owned());
    config.source = Some("nginx".to_owned());
    SourceDefinition::new(name, config)
}

fn agent(config: AgentConfig, sources: Vec<SourceDefinition>, collector: &Arc<MockCollector>) -> LogsAgent {
    LogsAgentBuilder::new()
        .config(config)
        .sources(sources)
        .connector(Arc::clone(collector) as Arc<dyn Connector>)
        .build()
        .expect("valid agent config")
}

async fn wait_for_lines(collector: &MockCollector, expected: usize) -> Vec<String> {
    for _ in 0..250 {
        let lines = collector.lines();
        if lines.len() >= expected {
            return lines;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("collector received {:?}, expected {expected} lines", collector.lines());
}

fn registry_offset(run_path: &Path, log_path: &Path) -> Option<u64> {
    let content = std::fs::read(run_path.join("registry.json")).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&content).ok()?;
    value["registry"][format!("file:{}", log_path.display())]["offset"].as_u64()
}

fn append(path: &Path, data: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(data.as_bytes()).unwrap();
}

/// 파일 → 규칙 → 프로세서 → 전송 → 감사기 흐름
#[tokio::test]
async fn test_file_lines_reach_collector() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    let content = "GET /healthz 200\nuser login token=abc123\nplain line\n";
    append(&log, content);

    let yaml = format!(
        r#"
logs:
  - type: file
    path: {}
    service: api
    source: nginx
    tags: ["env:test"]
    log_processing_rules:
      - type: exclude_at_match
        name: drop_health
        pattern: "healthz"
      - type: mask_sequences
        name: mask_token
        pattern: "token=\\w+"
        replace_placeholder: "token=[redacted]"
"#,
        log.display()
    );
    let sources = SourceLoader::parse_yaml(&yaml, "app").unwrap();

    let collector = Arc::new(MockCollector::default());
    let agent = agent(test_config(dir.path()), sources, &collector);
    agent.start().unwrap();

    let lines = wait_for_lines(&collector, 2).await;
    agent.stop().await;

    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l.starts_with("apikey ")));
    assert!(lines.iter().all(|l| l.contains(" test-host api nginx - ")));
    assert!(lines[0].contains("ddtags=\"env:test\""));
    assert!(lines[0].ends_with("user login token=[redacted]"));
    assert!(lines[1].ends_with("plain line"));
    assert!(!lines.iter().any(|l| l.contains("healthz")));

    // 마지막으로 전송된 라인의 끝이 파일 끝
    assert_eq!(registry_offset(dir.path(), &log), Some(content.len() as u64));

    let status = agent.status();
    assert_eq!(status.counters.processed, 3);
    assert_eq!(status.counters.dropped, 1);
    assert_eq!(status.counters.sent, 2);
    assert_eq!(status.counters.bytes_read, content.len() as u64);
}

/// 재시작 후 레지스트리 오프셋부터 이어서 읽기
#[tokio::test]
async fn test_restart_resumes_from_registry() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("resume.log");
    append(&log, "first\nsecond\n");

    let collector = Arc::new(MockCollector::default());
    let first = agent(test_config(dir.path()), vec![file_source("resume", &log)], &collector);
    first.start().unwrap();
    wait_for_lines(&collector, 2).await;
    first.stop().await;
    assert_eq!(registry_offset(dir.path(), &log), Some(13));

    append(&log, "third\n");

    let collector = Arc::new(MockCollector::default());
    let second = agent(test_config(dir.path()), vec![file_source("resume", &log)], &collector);
    second.start().unwrap();
    let lines = wait_for_lines(&collector, 1).await;
    // 추가 라인이 더 오지 않는지 잠시 확인
    tokio::time::sleep(Duration::from_millis(100)).await;
    second.stop().await;

    assert_eq!(collector.lines().len(), 1);
    assert!(lines[0].ends_with("third"));
    assert_eq!(registry_offset(dir.path(), &log), Some(19));
}

/// tail_from = end 이면 기존 내용은 건너뜀
#[tokio::test]
async fn test_tail_from_end_skips_existing_content() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("end.log");
    append(&log, "old line\n");

    let mut config = test_config(dir.path());
    config.tail_from = TailFrom::End;
    let collector = Arc::new(MockCollector::default());
    let agent = agent(config, vec![file_source("end", &log)], &collector);
    agent.start().unwrap();

    // 테일러가 파일 끝에 자리잡을 때까지 대기
    tokio::time::sleep(Duration::from_millis(200)).await;
    append(&log, "new line\n");

    let lines = wait_for_lines(&collector, 1).await;
    agent.stop().await;

    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("new line"));
}

/// 필수 필드가 없는 소스는 에러 상태로 보고되고 나머지는 동작
#[tokio::test]
async fn test_invalid_source_reported_in_status() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("ok.log");
    append(&log, "ok\n");

    let broken = SourceDefinition::new("no-port", SourceConfig::new(SourceKind::Tcp));
    let collector = Arc::new(MockCollector::default());
    let agent = agent(
        test_config(dir.path()),
        vec![broken, file_source("ok", &log)],
        &collector,
    );
    agent.start().unwrap();
    wait_for_lines(&collector, 1).await;

    let status = agent.status();
    assert!(status.is_running);
    let broken = status.sources.iter().find(|s| s.name == "no-port").unwrap();
    assert!(matches!(broken.state, SourceState::Error(_)));
    let ok = status.sources.iter().find(|s| s.name == "ok").unwrap();
    assert!(matches!(ok.state, SourceState::Success));

    agent.stop().await;
}

/// 구성 요소가 모두 헬스 카탈로그에 등록되고 정상 보고
#[tokio::test]
async fn test_health_catalog_reports_components() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("health.log");
    append(&log, "line\n");

    let collector = Arc::new(MockCollector::default());
    let agent = agent(test_config(dir.path()), vec![file_source("health", &log)], &collector);
    agent.start().unwrap();
    wait_for_lines(&collector, 1).await;

    let report = agent.status().health;
    assert!(report.is_healthy());
    assert!(report.healthy.iter().any(|n| n == "logs-auditor"));
    assert!(report.healthy.iter().any(|n| n == "processor-0"));
    assert!(report.healthy.iter().any(|n| n == "sender-1"));

    agent.stop().await;
}

/// 정지 후 재시작은 실패
#[tokio::test]
async fn test_start_after_stop_fails() {
    let dir = tempfile::tempdir().unwrap();
    let collector = Arc::new(MockCollector::default());
    let agent = agent(test_config(dir.path()), Vec::new(), &collector);

    agent.start().unwrap();
    agent.stop().await;

    assert!(matches!(agent.start(), Err(AgentError::AlreadyStopped)));
    assert_eq!(collector.connects.load(Ordering::SeqCst), 0);
}

/// 빌더는 잘못된 설정을 거부
#[test]
fn test_builder_rejects_invalid_config() {
    let config = AgentConfig {
        api_key: String::new(),
        ..AgentConfig::default()
    };
    let result = LogsAgentBuilder::new().config(config).build();
    assert!(matches!(result, Err(AgentError::Config { .. })));
}
