//! 프로세서 -- 규칙 적용과 메타데이터 프레이밍
//!
//! 입력 채널에서 메시지를 받아 소스의 처리 규칙을 적용하고, 통과한 메시지를
//! 전송 페이로드로 만들어 센더 채널로 넘깁니다.
//!
//! # 페이로드
//! ```text
//! <api_key> <sev>0 <timestamp> <hostname> <service> <source> - <tags> <content>\n
//! ```
//! 내용이 `<`로 시작하면 이미 우선순위 접두어가 있는 것으로 보고 메타데이터를
//! 붙이지 않습니다.

use std::sync::Arc;
use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logship_core::metrics as m;
use logship_core::pipeline::{BoxFuture, Stage};

use crate::health::{Catalog, HealthHandle, recv_ping};
use crate::message::{DATE_FORMAT, Message, SEV_INFO};
use crate::rule::{RuleOutcome, apply_rules};
use crate::status::AgentCounters;

/// 우선순위 접두어 시작 바이트
const ESCAPE_BYTE: u8 = b'<';

/// 프로토콜 버전 접미어
const PROTOCOL_VERSION: &[u8] = b"0";

/// 비어 있는 필드 자리 표시
const NIL_FIELD: &[u8] = b"-";

/// API 키와 logset을 합칩니다 (`key/logset`, logset이 비면 `key`).
pub fn compose_api_key(api_key: &str, logset: &str) -> String {
    if logset.is_empty() {
        api_key.to_owned()
    } else {
        format!("{api_key}/{logset}")
    }
}

/// 메시지 소스의 처리 규칙을 적용합니다.
pub fn apply_redacting_rules(msg: &Message) -> RuleOutcome {
    apply_rules(&msg.origin.source.rules, msg.content.clone())
}

/// 메시지의 메타데이터 레코드를 만듭니다.
///
/// 공백으로 구분된 8개 토큰(마지막은 빈 토큰)이며, 내용이 비었거나 `<`로
/// 시작하면 `None`입니다.
pub fn compute_extra_content(msg: &Message, hostname: &str) -> Option<Bytes> {
    if msg.content.is_empty() || msg.content[0] == ESCAPE_BYTE {
        return None;
    }

    let config = &msg.origin.source.config;
    let mut extra = BytesMut::with_capacity(128);

    extra.put_slice(msg.severity.as_deref().unwrap_or(SEV_INFO));
    extra.put_slice(PROTOCOL_VERSION);
    extra.put_u8(b' ');

    match &msg.origin.timestamp {
        Some(ts) => extra.put_slice(ts.as_bytes()),
        None => extra.put_slice(chrono::Utc::now().format(DATE_FORMAT).to_string().as_bytes()),
    }
    extra.put_u8(b' ');

    extra.put_slice(hostname.as_bytes());
    extra.put_u8(b' ');

    put_field(&mut extra, config.service.as_deref());
    extra.put_u8(b' ');
    put_field(&mut extra, config.source.as_deref());
    extra.put_u8(b' ');
    extra.put_slice(NIL_FIELD);
    extra.put_u8(b' ');

    let tags = msg
        .tags_payload
        .as_deref()
        .unwrap_or(&msg.origin.source.tags_payload[..]);
    if tags.is_empty() {
        extra.put_slice(NIL_FIELD);
    } else {
        extra.put_slice(tags);
    }
    extra.put_u8(b' ');

    Some(extra.freeze())
}

fn put_field(buf: &mut BytesMut, value: Option<&str>) {
    match value.filter(|v| !v.is_empty()) {
        Some(v) => buf.put_slice(v.as_bytes()),
        None => buf.put_slice(NIL_FIELD),
    }
}

/// 전송 페이로드를 조립합니다.
pub fn build_payload(api_key: &[u8], extra: Option<&[u8]>, content: &[u8]) -> Bytes {
    let extra = extra.unwrap_or_default();
    let mut payload = BytesMut::with_capacity(api_key.len() + extra.len() + content.len() + 2);
    payload.put_slice(api_key);
    payload.put_u8(b' ');
    payload.put_slice(extra);
    payload.put_slice(content);
    payload.put_u8(b'\n');
    payload.freeze()
}

/// 프로세서가 공유하는 불변 설정
#[derive(Debug)]
struct ProcessorContext {
    api_key: Bytes,
    hostname: String,
    counters: Arc<AgentCounters>,
}

impl ProcessorContext {
    fn process(&self, mut msg: Message) -> Option<Message> {
        let started = Instant::now();
        self.counters.inc_processed();
        let kind = msg.origin.source.kind().to_string();
        metrics::counter!(m::LOGS_PROCESSED_TOTAL, m::LABEL_SOURCE_KIND => kind.clone()).increment(1);

        let outcome = apply_redacting_rules(&msg);
        if let Some(reason) = outcome.drop_reason() {
            self.counters.inc_dropped();
            metrics::counter!(m::LOGS_DROPPED_TOTAL, m::LABEL_SOURCE_KIND => kind, m::LABEL_REASON => reason)
                .increment(1);
            tracing::trace!(source = %msg.source_name(), reason, "message dropped by rule");
            return None;
        }

        let redacted = outcome.into_content()?;
        let extra = compute_extra_content(&msg, &self.hostname);
        msg.content = build_payload(&self.api_key, extra.as_deref(), &redacted);

        metrics::histogram!(m::PROCESSING_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        Some(msg)
    }
}

/// 프로세서 스테이지
pub struct Processor {
    name: String,
    ctx: Arc<ProcessorContext>,
    input: Mutex<Option<mpsc::Receiver<Message>>>,
    output: Mutex<Option<mpsc::Sender<Message>>>,
    health: Mutex<Option<HealthHandle>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Processor {
    /// 새 프로세서를 생성하고 헬스 카탈로그에 등록합니다.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        api_key: &str,
        logset: &str,
        hostname: impl Into<String>,
        input: mpsc::Receiver<Message>,
        output: mpsc::Sender<Message>,
        counters: Arc<AgentCounters>,
        catalog: &Catalog,
    ) -> Self {
        let name = name.into();
        Self {
            health: Mutex::new(Some(catalog.register(name.clone()))),
            name,
            ctx: Arc::new(ProcessorContext {
                api_key: Bytes::from(compose_api_key(api_key, logset)),
                hostname: hostname.into(),
                counters,
            }),
            input: Mutex::new(Some(input)),
            output: Mutex::new(Some(output)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// 합쳐진 API 키
    pub fn api_key(&self) -> &[u8] {
        &self.ctx.api_key
    }
}

impl Stage for Processor {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let input = self.input.lock().await.take();
            let output = self.output.lock().await.take();
            let (Some(input), Some(output)) = (input, output) else {
                tracing::warn!(processor = %self.name, "processor already started");
                return;
            };
            let health = self.health.lock().await.take();
            let task = tokio::spawn(run(
                Arc::clone(&self.ctx),
                input,
                output,
                health,
                self.cancel.clone(),
            ));
            *self.task.lock().await = Some(task);
            tracing::debug!(processor = %self.name, "processor started");
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.cancel.cancel();
            if let Some(task) = self.task.lock().await.take() {
                if let Err(e) = task.await {
                    tracing::warn!(processor = %self.name, error = %e, "processor task failed");
                }
            }
            tracing::debug!(processor = %self.name, "processor stopped");
        })
    }
}

async fn run(
    ctx: Arc<ProcessorContext>,
    mut input: mpsc::Receiver<Message>,
    output: mpsc::Sender<Message>,
    mut health: Option<HealthHandle>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            maybe = input.recv() => match maybe {
                Some(msg) => {
                    if !forward(&ctx, msg, &output).await {
                        return;
                    }
                }
                None => return,
            },
            Some(()) = recv_ping(&mut health) => {}
        }
    }

    // 입력이 이미 멈춘 뒤이므로 남은 메시지를 모두 처리
    input.close();
    while let Some(msg) = input.recv().await {
        if !forward(&ctx, msg, &output).await {
            return;
        }
    }
}

async fn forward(ctx: &ProcessorContext, msg: Message, output: &mpsc::Sender<Message>) -> bool {
    match ctx.process(msg) {
        Some(processed) => {
            if output.send(processed).await.is_err() {
                tracing::warn!("sender channel closed, processor exiting");
                return false;
            }
            true
        }
        None => true,
    }
}
