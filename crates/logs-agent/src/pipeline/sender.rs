//! 센더 -- 프레임된 페이로드를 수집기로 전송
//!
//! 연결이 없으면 [`ConnectionManager`]로 새로 연결하고, 쓰기에 실패하면 연결을
//! 버리고 같은 페이로드를 다시 보냅니다. 전송에 성공한 메시지만 감사기로 넘어갑니다.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logship_core::metrics as m;
use logship_core::pipeline::{BoxFuture, Stage};

use crate::health::{Catalog, HealthHandle, recv_ping};
use crate::message::Message;
use crate::pipeline::connection::{BoxConnection, ConnectionManager};
use crate::status::AgentCounters;

/// 센더 스테이지
pub struct Sender {
    name: String,
    manager: Arc<ConnectionManager>,
    counters: Arc<AgentCounters>,
    input: Mutex<Option<mpsc::Receiver<Message>>>,
    auditor: Mutex<Option<mpsc::Sender<Message>>>,
    health: Mutex<Option<HealthHandle>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Sender {
    /// 새 센더를 생성하고 헬스 카탈로그에 등록합니다.
    pub fn new(
        name: impl Into<String>,
        input: mpsc::Receiver<Message>,
        auditor: mpsc::Sender<Message>,
        manager: Arc<ConnectionManager>,
        counters: Arc<AgentCounters>,
        catalog: &Catalog,
    ) -> Self {
        let name = name.into();
        Self {
            health: Mutex::new(Some(catalog.register(name.clone()))),
            name,
            manager,
            counters,
            input: Mutex::new(Some(input)),
            auditor: Mutex::new(Some(auditor)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }
}

impl Stage for Sender {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let input = self.input.lock().await.take();
            let auditor = self.auditor.lock().await.take();
            let (Some(input), Some(auditor)) = (input, auditor) else {
                tracing::warn!(sender = %self.name, "sender already started");
                return;
            };
            let worker = SendWorker {
                name: self.name.clone(),
                manager: Arc::clone(&self.manager),
                counters: Arc::clone(&self.counters),
                auditor,
                conn: None,
                cancel: self.cancel.clone(),
            };
            let health = self.health.lock().await.take();
            let task = tokio::spawn(worker.run(input, health));
            *self.task.lock().await = Some(task);
            tracing::debug!(sender = %self.name, address = %self.manager.address(), "sender started");
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.cancel.cancel();
            if let Some(task) = self.task.lock().await.take() {
                if let Err(e) = task.await {
                    tracing::warn!(sender = %self.name, error = %e, "sender task failed");
                }
            }
            tracing::debug!(sender = %self.name, "sender stopped");
        })
    }
}

struct SendWorker {
    name: String,
    manager: Arc<ConnectionManager>,
    counters: Arc<AgentCounters>,
    auditor: mpsc::Sender<Message>,
    conn: Option<BoxConnection>,
    cancel: CancellationToken,
}

impl SendWorker {
    async fn run(mut self, mut input: mpsc::Receiver<Message>, mut health: Option<HealthHandle>) {
        let mut abandoned = 0usize;
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                maybe = input.recv() => match maybe {
                    Some(msg) => {
                        if !self.send(msg).await {
                            abandoned += 1;
                            break;
                        }
                    }
                    None => break,
                },
                Some(()) = recv_ping(&mut health) => {}
            }
        }

        input.close();
        while let Some(msg) = input.recv().await {
            if !self.send(msg).await {
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            tracing::warn!(
                sender = %self.name,
                abandoned,
                "collector unreachable during shutdown, unsent messages were not audited"
            );
        }
        self.close().await;
    }

    /// 메시지를 전송합니다. 정지 중 연결할 수 없으면 `false`를 반환합니다.
    async fn send(&mut self, msg: Message) -> bool {
        loop {
            if self.conn.is_none() {
                match self.manager.new_connection(&self.cancel).await {
                    Some(conn) => self.conn = Some(conn),
                    None => return false,
                }
            }
            let Some(conn) = self.conn.as_mut() else {
                continue;
            };

            let written = async {
                conn.write_all(&msg.content).await?;
                conn.flush().await
            }
            .await;

            match written {
                Ok(()) => break,
                Err(e) => {
                    self.counters.inc_send_errors();
                    metrics::counter!(m::LOGS_SEND_ERRORS_TOTAL).increment(1);
                    tracing::warn!(
                        sender = %self.name,
                        address = %self.manager.address(),
                        error = %e,
                        "write failed, reconnecting"
                    );
                    self.conn = None;
                }
            }
        }

        self.counters.inc_sent();
        metrics::counter!(m::LOGS_SENT_TOTAL).increment(1);
        if self.auditor.send(msg).await.is_err() {
            tracing::debug!(sender = %self.name, "auditor channel closed");
        }
        true
    }

    async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.shutdown().await {
                tracing::debug!(sender = %self.name, error = %e, "connection shutdown failed");
            }
        }
    }
}
