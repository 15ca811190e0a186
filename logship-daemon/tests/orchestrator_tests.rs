//! Orchestrator integration tests.
//!
//! Tests the full flow: config -> source loading -> agent start -> shipping
//! over TCP -> shutdown with registry flush and PID file cleanup.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use logship_core::config::LogshipConfig;
use logship_core::pipeline::HealthStatus;
use logship_daemon::orchestrator::Orchestrator;

fn logs_config(run_path: &Path, confd: &Path, port: u16, pid_file: &str) -> LogshipConfig {
    let toml_str = format!(
        r#"
[general]
log_level = "info"
pid_file = "{pid_file}"
hostname = "daemon-test"

[logs]
enabled = true
api_key = "apikey"
dd_url = "127.0.0.1"
dd_port = {port}
dev_mode_no_ssl = true
run_path = "{run}"
confd_path = "{confd}"
pipelines = 1
tail_from = "beginning"
sleep_ms = 10
flush_interval_ms = 50
"#,
        run = run_path.display(),
        confd = confd.display(),
    );
    LogshipConfig::parse(&toml_str).expect("failed to parse logs config")
}

/// Accept one connection and forward every received line.
async fn spawn_collector() -> (u16, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
    (port, rx)
}

#[tokio::test]
async fn test_orchestrator_build_with_logs_disabled() {
    let config = LogshipConfig::parse("[general]\nlog_level = \"info\"\n").unwrap();

    let orchestrator = Orchestrator::build_from_config(config)
        .await
        .expect("should build with logs disabled");

    assert!(orchestrator.agent().is_none());
    let health = orchestrator.health();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(health.agent.is_none());
}

#[tokio::test]
async fn test_orchestrator_rejects_missing_api_key() {
    let config = LogshipConfig::parse("[logs]\nenabled = true\n").unwrap();

    let result = Orchestrator::build_from_config(config).await;

    let err = result.err().expect("missing api_key should fail").to_string();
    assert!(err.contains("api_key"), "got: {}", err);
}

#[tokio::test]
async fn test_orchestrator_build_fails_for_missing_confd() {
    let dir = tempfile::tempdir().unwrap();
    let config = logs_config(dir.path(), &dir.path().join("missing"), 10516, "");

    assert!(Orchestrator::build_from_config(config).await.is_err());
}

#[tokio::test]
async fn test_orchestrator_ships_file_lines_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let confd = dir.path().join("conf.d");
    std::fs::create_dir(&confd).unwrap();
    let log = dir.path().join("service.log");
    std::fs::write(&log, "hello from the daemon\n").unwrap();
    std::fs::write(
        confd.join("service.yaml"),
        format!(
            "logs:\n  - type: file\n    path: {}\n    service: svc\n",
            log.display()
        ),
    )
    .unwrap();

    let (port, mut lines) = spawn_collector().await;
    let pid_file = dir.path().join("run").join("logship.pid");
    let config = logs_config(dir.path(), &confd, port, &pid_file.display().to_string());

    let mut orchestrator = Orchestrator::build_from_config(config).await.unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(async move {
        orchestrator
            .run_until(async move {
                let _ = stop_rx.await;
                Ok("test")
            })
            .await
    });

    let line = tokio::time::timeout(Duration::from_secs(5), lines.recv())
        .await
        .expect("collector should receive a line")
        .expect("collector channel open");
    assert!(line.starts_with("apikey <46>0 "), "got: {}", line);
    assert!(line.contains(" daemon-test svc - - - "), "got: {}", line);
    assert!(line.ends_with("hello from the daemon"));
    assert!(pid_file.exists(), "PID file should exist while running");

    stop_tx.send(()).unwrap();
    run.await.unwrap().expect("run should finish cleanly");

    assert!(!pid_file.exists(), "PID file should be removed on shutdown");
    let registry = std::fs::read_to_string(dir.path().join("registry.json")).unwrap();
    assert!(registry.contains(&format!("file:{}", log.display())));
}

#[tokio::test]
async fn test_run_fails_when_pid_file_exists() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("logship.pid");
    std::fs::write(&pid_file, "4242").unwrap();

    let mut config = LogshipConfig::parse("[general]\nlog_level = \"info\"\n").unwrap();
    config.general.pid_file = pid_file.display().to_string();
    let mut orchestrator = Orchestrator::build_from_config(config).await.unwrap();

    let err = orchestrator
        .run_until(async { Ok("test") })
        .await
        .unwrap_err()
        .to_string();
    assert!(err.contains("4242"), "got: {}", err);
    // 다른 인스턴스의 PID 파일은 건드리지 않음
    assert!(pid_file.exists());
}
