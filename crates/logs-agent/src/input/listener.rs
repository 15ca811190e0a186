//! 네트워크 입력 -- TCP/UDP 소켓에서 라인을 받습니다.
//!
//! - TCP: 소스마다 accept 루프 하나, 연결마다 작업자 태스크 하나.
//!   동시 연결 수는 `max_connections`로 제한하며, 초과 연결은 바로 닫습니다.
//! - UDP: 소스마다 소켓 하나. 데이터그램 하나를 끝까지 디코딩하고 flush합니다.
//!
//! 네트워크 메시지는 식별자가 없으므로 감사 대상이 아닙니다.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use logship_core::config::SourceKind;
use logship_core::metrics as m;
use logship_core::pipeline::{BoxFuture, Stage};

use crate::decoder::{DecodedLine, LineSplitter};
use crate::message::{Message, Origin};
use crate::pipeline::PipelineChannels;
use crate::source::LogSource;
use crate::status::AgentCounters;

/// TCP 연결당 읽기 버퍼 크기
const TCP_READ_BUFFER: usize = 4096;

/// UDP 데이터그램 최대 크기
const UDP_MAX_DATAGRAM: usize = 65_535;

/// 리스너 옵션
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// 바인드 호스트
    pub host: String,
    /// TCP 동시 연결 수
    pub max_connections: usize,
}

/// TCP 또는 UDP 리스너 스테이지
pub struct Listener {
    name: String,
    source: Arc<LogSource>,
    channels: Arc<dyn PipelineChannels>,
    options: ListenerOptions,
    counters: Arc<AgentCounters>,
    bound: StdMutex<Option<SocketAddr>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    /// 새 리스너를 생성합니다. 소켓은 `start`에서 바인드됩니다.
    pub fn new(
        source: Arc<LogSource>,
        channels: Arc<dyn PipelineChannels>,
        options: ListenerOptions,
        counters: Arc<AgentCounters>,
    ) -> Self {
        Self {
            name: format!("{}-listener:{}", source.kind(), source.name),
            source,
            channels,
            options,
            counters,
            bound: StdMutex::new(None),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// 실제로 바인드된 주소 (포트 0으로 바인드한 경우 확인용)
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bind_addr(&self) -> Option<String> {
        self.source
            .config
            .port
            .map(|port| format!("{}:{}", self.options.host, port))
    }

    async fn spawn_tcp(&self, addr: &str) -> Result<JoinHandle<()>, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        *self.bound.lock().unwrap_or_else(|e| e.into_inner()) = listener.local_addr().ok();
        Ok(tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.source),
            self.channels.next_pipeline_chan(),
            Arc::new(Semaphore::new(self.options.max_connections.max(1))),
            Arc::clone(&self.counters),
            self.cancel.clone(),
        )))
    }

    async fn spawn_udp(&self, addr: &str) -> Result<JoinHandle<()>, std::io::Error> {
        let socket = UdpSocket::bind(addr).await?;
        *self.bound.lock().unwrap_or_else(|e| e.into_inner()) = socket.local_addr().ok();
        Ok(tokio::spawn(udp_loop(
            socket,
            Arc::clone(&self.source),
            self.channels.next_pipeline_chan(),
            Arc::clone(&self.counters),
            self.cancel.clone(),
        )))
    }
}

impl Stage for Listener {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let Some(addr) = self.bind_addr() else {
                self.source.status.track_error("missing port");
                return;
            };

            let spawned = match self.source.kind() {
                SourceKind::Tcp => self.spawn_tcp(&addr).await,
                SourceKind::Udp => self.spawn_udp(&addr).await,
                other => {
                    tracing::warn!(source = %self.source.name, kind = %other, "not a network source");
                    return;
                }
            };

            match spawned {
                Ok(task) => {
                    *self.task.lock().await = Some(task);
                    self.source.status.success();
                    tracing::info!(
                        source = %self.source.name,
                        addr = ?self.bound_addr(),
                        kind = %self.source.kind(),
                        "listener started"
                    );
                }
                Err(e) => {
                    tracing::error!(source = %self.source.name, addr = %addr, error = %e, "failed to bind listener");
                    self.source
                        .status
                        .track_error(format!("failed to bind {addr}: {e}"));
                }
            }
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.cancel.cancel();
            if let Some(task) = self.task.lock().await.take() {
                if let Err(e) = task.await {
                    tracing::warn!(listener = %self.name, error = %e, "listener task failed");
                }
            }
            tracing::debug!(listener = %self.name, "listener stopped");
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    source: Arc<LogSource>,
    output: mpsc::Sender<Message>,
    semaphore: Arc<Semaphore>,
    counters: Arc<AgentCounters>,
    cancel: CancellationToken,
) {
    let mut workers = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(source = %source.name, error = %e, "accept failed");
                        continue;
                    }
                };

                // 연결 수 제한 확인
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    tracing::warn!(source = %source.name, peer = %peer, "max connections reached, rejecting connection");
                    continue;
                };

                tracing::debug!(source = %source.name, peer = %peer, "connection accepted");
                let worker = handle_connection(
                    stream,
                    Arc::clone(&source),
                    output.clone(),
                    Arc::clone(&counters),
                    cancel.clone(),
                );
                workers.spawn(async move {
                    worker.await;
                    drop(permit);
                });
            }
            Some(_) = workers.join_next(), if !workers.is_empty() => {}
        }
    }

    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            tracing::warn!(source = %source.name, error = %e, "connection worker failed");
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    source: Arc<LogSource>,
    output: mpsc::Sender<Message>,
    counters: Arc<AgentCounters>,
    cancel: CancellationToken,
) {
    let mut splitter = LineSplitter::new();
    let mut lines = Vec::new();
    let mut buf = vec![0u8; TCP_READ_BUFFER];

    loop {
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            read = stream.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                // 연결 종료: 줄바꿈 없이 끝난 마지막 라인까지 전달
                splitter.flush(&mut lines);
                if !forward(&source, &output, &mut lines).await {
                    tracing::debug!(source = %source.name, "trailing line dropped, pipeline closed");
                }
                break;
            }
            Ok(n) => {
                record_read(&counters, "tcp", n);
                splitter.push(&buf[..n], &mut lines);
                if !forward(&source, &output, &mut lines).await {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(source = %source.name, error = %e, "connection read failed");
                break;
            }
        }
    }
}

async fn udp_loop(
    socket: UdpSocket,
    source: Arc<LogSource>,
    output: mpsc::Sender<Message>,
    counters: Arc<AgentCounters>,
    cancel: CancellationToken,
) {
    let mut splitter = LineSplitter::new();
    let mut lines = Vec::new();
    let mut buf = vec![0u8; UDP_MAX_DATAGRAM];

    loop {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };

        match received {
            Ok((n, _peer)) => {
                record_read(&counters, "udp", n);
                splitter.push(&buf[..n], &mut lines);
                splitter.flush(&mut lines);
                if !forward(&source, &output, &mut lines).await {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(source = %source.name, error = %e, "udp receive failed");
            }
        }
    }
}

fn record_read(counters: &AgentCounters, kind: &'static str, n: usize) {
    counters.add_bytes_read(n as u64);
    metrics::counter!(m::LOGS_BYTES_READ_TOTAL, m::LABEL_SOURCE_KIND => kind).increment(n as u64);
}

/// 디코딩된 라인을 파이프라인으로 보냅니다. 채널이 닫혔으면 `false`.
async fn forward(source: &Arc<LogSource>, output: &mpsc::Sender<Message>, lines: &mut Vec<DecodedLine>) -> bool {
    for line in lines.drain(..) {
        if line.content.is_empty() {
            continue;
        }
        let msg = Message::new(line.content, Origin::new(Arc::clone(source)));
        if output.send(msg).await.is_err() {
            tracing::debug!(source = %source.name, "pipeline input closed, listener exiting");
            return false;
        }
    }
    true
}
