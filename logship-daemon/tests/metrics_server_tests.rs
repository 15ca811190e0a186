//! Integration tests for metrics server functionality.

use logship_core::config::MetricsConfig;
use logship_daemon::metrics_server;
use serial_test::serial;

#[test]
#[serial]
fn test_install_metrics_recorder_fails_with_invalid_address() {
    let config = MetricsConfig {
        enabled: true,
        listen_addr: "999.999.999.999".to_owned(),
        port: 9200,
        endpoint: "/metrics".to_owned(),
    };

    let result = metrics_server::install_metrics_recorder(&config);

    assert!(result.is_err(), "invalid address should be rejected");
}

#[test]
#[serial]
fn test_install_metrics_recorder_rejects_unsupported_endpoint() {
    let config = MetricsConfig {
        enabled: true,
        listen_addr: "127.0.0.1".to_owned(),
        port: 19201,
        endpoint: "/custom".to_owned(),
    };

    let err = metrics_server::install_metrics_recorder(&config).unwrap_err();
    assert!(err.to_string().contains("unsupported metrics endpoint"));
}

#[tokio::test]
#[serial]
async fn test_install_metrics_recorder_succeeds_once() {
    let config = MetricsConfig {
        enabled: true,
        listen_addr: "127.0.0.1".to_owned(),
        port: 19200,
        endpoint: "/metrics".to_owned(),
    };

    let first = metrics_server::install_metrics_recorder(&config);
    assert!(first.is_ok(), "first install should succeed: {:?}", first.err());

    // 전역 레코더는 한 번만 설치 가능
    assert!(metrics_server::install_metrics_recorder(&config).is_err());
}
