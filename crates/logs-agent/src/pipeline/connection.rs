//! 수집기 연결 -- 외부 전송 계층과의 경계
//!
//! [`Connector`]는 연결을 하나 여는 방법만 정의합니다. TLS나 핸드셰이크는
//! 구현체의 몫이며, 기본 구현 [`TcpConnector`]는 평문 TCP입니다.
//! [`ConnectionManager`]는 실패 시 지수 백오프로 재시도합니다.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use logship_core::pipeline::BoxFuture;

/// 프레임된 페이로드를 쓸 수 있는 연결
pub trait Connection: AsyncWrite + Send + Unpin {}

impl<T: AsyncWrite + Send + Unpin> Connection for T {}

/// boxed 연결
pub type BoxConnection = Box<dyn Connection>;

/// 연결 생성기
pub trait Connector: Send + Sync {
    /// 로그에 표시할 주소
    fn address(&self) -> String;

    /// 새 연결을 엽니다.
    fn connect(&self) -> BoxFuture<'_, io::Result<BoxConnection>>;
}

/// 평문 TCP 연결 생성기
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    /// 새 TCP 연결 생성기를 만듭니다.
    ///
    /// `use_ssl`이 참이면 경고를 남깁니다. TLS는 외부 [`Connector`] 구현으로 주입해야 합니다.
    pub fn new(host: impl Into<String>, port: u16, use_ssl: bool) -> Self {
        let host = host.into();
        if use_ssl {
            tracing::warn!(
                host = %host,
                port,
                "TLS requested but the built-in connector is plain TCP; set dev_mode_no_ssl or provide a TLS connector"
            );
        }
        Self { host, port }
    }
}

impl Connector for TcpConnector {
    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn connect(&self) -> BoxFuture<'_, io::Result<BoxConnection>> {
        Box::pin(async move {
            let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as BoxConnection)
        })
    }
}

/// 재시도 가능한 연결 관리자
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    backoff_initial: Duration,
    backoff_max: Duration,
}

impl ConnectionManager {
    /// 새 연결 관리자를 생성합니다.
    pub fn new(connector: Arc<dyn Connector>, backoff_initial: Duration, backoff_max: Duration) -> Self {
        Self {
            connector,
            backoff_initial,
            backoff_max: backoff_max.max(backoff_initial),
        }
    }

    /// 수집기 주소
    pub fn address(&self) -> String {
        self.connector.address()
    }

    /// 연결될 때까지 재시도합니다.
    ///
    /// `cancel`이 취소되면 현재 시도가 실패한 뒤 `None`을 반환합니다.
    pub async fn new_connection(&self, cancel: &CancellationToken) -> Option<BoxConnection> {
        let mut attempt: u32 = 0;
        loop {
            match self.connector.connect().await {
                Ok(conn) => {
                    tracing::info!(address = %self.address(), attempt, "connected to collector");
                    return Some(conn);
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        address = %self.address(),
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "connection failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return None,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// `attempt`번째 실패 후 대기 시간 (initial × 2^(attempt-1), 상한 적용)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let shift = attempt.min(20) - 1;
        let initial_ms = self.backoff_initial.as_millis() as u64;
        let exp = initial_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(exp).min(self.backoff_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncReadExt;

    struct FailingConnector {
        attempts: AtomicUsize,
        succeed_after: usize,
    }

    impl Connector for FailingConnector {
        fn address(&self) -> String {
            "test:0".to_owned()
        }

        fn connect(&self) -> BoxFuture<'_, io::Result<BoxConnection>> {
            Box::pin(async move {
                let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n > self.succeed_after {
                    Ok(Box::new(tokio::io::sink()) as BoxConnection)
                } else {
                    Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
                }
            })
        }
    }

    fn manager(connector: Arc<dyn Connector>) -> ConnectionManager {
        ConnectionManager::new(connector, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let m = ConnectionManager::new(
            Arc::new(TcpConnector::new("localhost", 1, false)),
            Duration::from_millis(100),
            Duration::from_secs(1),
        );
        assert_eq!(m.backoff_delay(0), Duration::ZERO);
        assert_eq!(m.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(m.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(m.backoff_delay(4), Duration::from_millis(800));
        assert_eq!(m.backoff_delay(5), Duration::from_secs(1));
        assert_eq!(m.backoff_delay(u32::MAX), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retries_until_connected() {
        let connector = Arc::new(FailingConnector {
            attempts: AtomicUsize::new(0),
            succeed_after: 3,
        });
        let m = manager(connector.clone());
        let conn = m.new_connection(&CancellationToken::new()).await;
        assert!(conn.is_some());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn cancelled_manager_gives_up_after_failure() {
        let connector = Arc::new(FailingConnector {
            attempts: AtomicUsize::new(0),
            succeed_after: usize::MAX,
        });
        let m = manager(connector.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(m.new_connection(&cancel).await.is_none());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tcp_connector_writes_to_listener() {
        use tokio::io::AsyncWriteExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let connector = TcpConnector::new("127.0.0.1", port, false);
        assert_eq!(connector.address(), format!("127.0.0.1:{port}"));
        let mut conn = connector.connect().await.unwrap();
        conn.write_all(b"payload\n").await.unwrap();
        conn.shutdown().await.unwrap();
        drop(conn);

        assert_eq!(accept.await.unwrap(), b"payload\n");
    }
}
