//! 컨테이너 입력
//!
//! [`ContainerScanner`]는 `docker` 소스의 `image`/`label` 필터로 실행 중인
//! 컨테이너를 고르고, 컨테이너마다 로그 스트림을 따라가는 작업자를 띄웁니다.
//!
//! - stdout 라인은 `<46>`, stderr 라인은 `<43>` 심각도
//! - 식별자는 `docker:<id>`, 감사 위치는 Docker 타임스탬프
//! - 재시작 시 레지스트리 타임스탬프 `since`로 요청하고, 이미 커밋된
//!   타임스탬프 이하의 라인은 건너뜀
//! - 주기적 스캔으로 새 컨테이너를 추가하고 사라진 컨테이너의 작업자를 정지

pub mod runtime;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::future::join_all;
use futures::stream::BoxStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logship_core::config::{SourceConfig, SourceKind, TailFrom};
use logship_core::metrics as m;
use logship_core::pipeline::{BoxFuture, Stage};

use crate::auditor::Registry;
use crate::error::AgentError;
use crate::message::{Message, Origin, SEV_ERROR, SEV_INFO, docker_identifier};
use crate::pipeline::PipelineChannels;
use crate::source::LogSource;
use crate::status::AgentCounters;

pub use runtime::{BollardRuntime, ContainerRuntime, ContainerSummary, LogLine, LogStream};

/// 컨테이너 스캐너 옵션
#[derive(Debug, Clone, Copy)]
pub struct ContainerScannerOptions {
    /// 컨테이너 목록 재검사 주기
    pub scan_period: Duration,
    /// 레지스트리에 항목이 없을 때 시작 위치
    pub tail_from: TailFrom,
}

/// 소스 필터가 컨테이너와 일치하는지 확인합니다.
///
/// - `image`: 정확히 같거나, 태그/다이제스트를 뺀 이름이 같으면 일치
/// - `label`: `key` 또는 `key=value`
/// - 필터가 없으면 모든 컨테이너와 일치
pub fn container_matches(config: &SourceConfig, container: &ContainerSummary) -> bool {
    let image_ok = match config.image.as_deref().filter(|s| !s.is_empty()) {
        Some(image) => image_matches(image, &container.image),
        None => true,
    };
    let label_ok = match config.label.as_deref().filter(|s| !s.is_empty()) {
        Some(label) => match label.split_once('=') {
            Some((key, value)) => container.labels.get(key).is_some_and(|v| v == value),
            None => container.labels.contains_key(label),
        },
        None => true,
    };
    image_ok && label_ok
}

fn image_matches(filter: &str, image: &str) -> bool {
    image == filter
        || image
            .strip_prefix(filter)
            .is_some_and(|rest| rest.starts_with(':') || rest.starts_with('@'))
}

fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

struct ContainerContext<R: ContainerRuntime> {
    runtime: Arc<R>,
    channels: Arc<dyn PipelineChannels>,
    registry: Arc<Registry>,
    options: ContainerScannerOptions,
    counters: Arc<AgentCounters>,
}

impl<R: ContainerRuntime> ContainerContext<R> {
    fn start_tailer(&self, container: &ContainerSummary, source: &Arc<LogSource>) -> ContainerTailer {
        let committed = self
            .registry
            .timestamp(&docker_identifier(&container.id))
            .as_deref()
            .and_then(parse_timestamp);
        let since = match committed {
            Some(ts) => ts.timestamp(),
            None => match self.options.tail_from {
                TailFrom::Beginning => 0,
                TailFrom::End => Utc::now().timestamp(),
            },
        };

        tracing::info!(
            container = %container.id,
            name = %container.name,
            image = %container.image,
            source = %source.name,
            since,
            "container tailer started"
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(tail_container(
            self.runtime.logs(&container.id, since),
            Arc::clone(source),
            docker_identifier(&container.id),
            committed,
            self.channels.next_pipeline_chan(),
            Arc::clone(&self.counters),
            cancel.clone(),
        ));
        ContainerTailer { cancel, task }
    }
}

struct ContainerTailer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ContainerTailer {
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "container tailer task failed");
        }
    }
}

/// 컨테이너 스캐너 스테이지
pub struct ContainerScanner<R: ContainerRuntime> {
    sources: Arc<Vec<Arc<LogSource>>>,
    ctx: Arc<ContainerContext<R>>,
    tailers: Arc<Mutex<HashMap<String, ContainerTailer>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<R: ContainerRuntime> ContainerScanner<R> {
    /// 새 스캐너를 생성합니다. `sources` 중 `docker` 종류만 사용합니다.
    pub fn new(
        sources: Vec<Arc<LogSource>>,
        runtime: Arc<R>,
        channels: Arc<dyn PipelineChannels>,
        registry: Arc<Registry>,
        options: ContainerScannerOptions,
        counters: Arc<AgentCounters>,
    ) -> Self {
        Self {
            sources: Arc::new(
                sources
                    .into_iter()
                    .filter(|s| s.kind() == SourceKind::Docker)
                    .collect(),
            ),
            ctx: Arc::new(ContainerContext {
                runtime,
                channels,
                registry,
                options,
                counters,
            }),
            tailers: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// 현재 따라가는 컨테이너 ID
    pub async fn tailed_containers(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.tailers.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl<R: ContainerRuntime> Stage for ContainerScanner<R> {
    fn name(&self) -> &str {
        "container-scanner"
    }

    fn start(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.task.lock().await.is_some() {
                tracing::warn!("container scanner already started");
                return;
            }
            {
                let mut tailers = self.tailers.lock().await;
                scan(&self.ctx, &self.sources, &mut tailers).await;
                tracing::info!(containers = tailers.len(), "container scanner started");
            }
            let task = tokio::spawn(scan_loop(
                Arc::clone(&self.ctx),
                Arc::clone(&self.sources),
                Arc::clone(&self.tailers),
                self.cancel.clone(),
            ));
            *self.task.lock().await = Some(task);
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.cancel.cancel();
            if let Some(task) = self.task.lock().await.take() {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "container scan task failed");
                }
            }
            let tailers: Vec<_> = self.tailers.lock().await.drain().map(|(_, t)| t).collect();
            join_all(tailers.into_iter().map(ContainerTailer::stop)).await;
            tracing::info!("container scanner stopped");
        })
    }
}

async fn scan_loop<R: ContainerRuntime>(
    ctx: Arc<ContainerContext<R>>,
    sources: Arc<Vec<Arc<LogSource>>>,
    tailers: Arc<Mutex<HashMap<String, ContainerTailer>>>,
    cancel: CancellationToken,
) {
    let period = ctx.options.scan_period;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let mut tailers = tailers.lock().await;
                scan(&ctx, &sources, &mut tailers).await;
            }
        }
    }
}

async fn scan<R: ContainerRuntime>(
    ctx: &ContainerContext<R>,
    sources: &[Arc<LogSource>],
    tailers: &mut HashMap<String, ContainerTailer>,
) {
    let containers = match ctx.runtime.list_containers().await {
        Ok(containers) => containers,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list containers");
            for source in sources {
                source.status.track_error(e.to_string());
            }
            return;
        }
    };

    let running: HashSet<&str> = containers.iter().map(|c| c.id.as_str()).collect();
    let gone: Vec<String> = tailers
        .iter()
        .filter(|(id, tailer)| !running.contains(id.as_str()) || tailer.task.is_finished())
        .map(|(id, _)| id.clone())
        .collect();
    for id in gone {
        if let Some(tailer) = tailers.remove(&id) {
            tracing::info!(container = %id, "container gone, stopping tailer");
            tailer.stop().await;
        }
    }

    for container in &containers {
        if tailers.contains_key(&container.id) {
            continue;
        }
        // 여러 소스와 일치해도 중복 수집하지 않도록 첫 소스만 사용
        let Some(source) = sources.iter().find(|s| container_matches(&s.config, container)) else {
            continue;
        };
        let tailer = ctx.start_tailer(container, source);
        source.status.success();
        tailers.insert(container.id.clone(), tailer);
    }
}

async fn tail_container(
    mut stream: BoxStream<'static, Result<LogLine, AgentError>>,
    source: Arc<LogSource>,
    identifier: String,
    committed: Option<DateTime<Utc>>,
    output: mpsc::Sender<Message>,
    counters: Arc<AgentCounters>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = stream.next() => item,
        };

        let line = match item {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                tracing::warn!(identifier = %identifier, error = %e, "container log stream failed");
                source.status.track_error(e.to_string());
                break;
            }
            None => {
                tracing::info!(identifier = %identifier, "container log stream ended");
                break;
            }
        };

        counters.add_bytes_read(line.content.len() as u64);
        metrics::counter!(m::LOGS_BYTES_READ_TOTAL, m::LABEL_SOURCE_KIND => "docker")
            .increment(line.content.len() as u64);

        // `since`는 초 단위이므로 이미 커밋된 라인이 다시 올 수 있음
        if let (Some(committed), Some(ts)) = (committed, parse_timestamp(&line.timestamp)) {
            if ts <= committed {
                continue;
            }
        }
        if line.content.is_empty() {
            continue;
        }

        let severity = match line.stream {
            LogStream::Stdout => SEV_INFO,
            LogStream::Stderr => SEV_ERROR,
        };
        let mut origin = Origin::new(Arc::clone(&source)).with_identifier(identifier.clone());
        if !line.timestamp.is_empty() {
            origin = origin.with_timestamp(line.timestamp);
        }
        let msg = Message::new(line.content, origin).with_severity(severity);
        if output.send(msg).await.is_err() {
            tracing::debug!(identifier = %identifier, "pipeline input closed, container tailer exiting");
            break;
        }
    }
}
