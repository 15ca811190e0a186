//! 파일 입력
//!
//! [`Scanner`]는 `file` 소스마다 [`Tailer`]를 하나씩 띄우고, 주기적으로
//! 회전 검사와 새 파일 탐색을 수행합니다.
//!
//! - 시작 위치: 레지스트리 오프셋이 있으면 그 위치, 없으면 `tail_from`
//! - 회전: 이전 테일러는 백그라운드에서 soft stop(EOF까지 읽음), 새 테일러는 처음부터.
//!   레지스트리의 회전 세대를 올려 이전 파일의 늦은 확인이 새 위치를 덮지 않게 함
//! - 파일이 없던 소스: 매 주기 재시도, 생기면 처음부터
//! - I/O 에러로 멈춘 테일러: 재시작하지 않음 (소스 상태가 `Error`)

pub mod strategy;
pub mod tailer;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logship_core::config::{SourceKind, TailFrom};
use logship_core::pipeline::{BoxFuture, Stage};

use crate::auditor::Registry;
use crate::error::AgentError;
use crate::message::file_identifier;
use crate::pipeline::PipelineChannels;
use crate::source::LogSource;
use crate::stages::ParallelGroup;
use crate::status::AgentCounters;

pub use strategy::{PollingStrategy, ReopenStrategy, TailStrategy};
pub use tailer::{StartPosition, Tailer, TailerOptions};

/// 파일 스캐너 옵션
#[derive(Debug, Clone, Copy)]
pub struct ScannerOptions {
    /// 동시에 열 수 있는 파일 수
    pub open_files_limit: usize,
    /// 회전 검사 주기
    pub scan_period: Duration,
    /// 레지스트리에 항목이 없을 때 시작 위치
    pub tail_from: TailFrom,
    /// 테일러 옵션
    pub tailer: TailerOptions,
}

struct ScannerContext<S: TailStrategy> {
    channels: Arc<dyn PipelineChannels>,
    registry: Arc<Registry>,
    strategy: Arc<S>,
    options: ScannerOptions,
    counters: Arc<AgentCounters>,
}

impl<S: TailStrategy> ScannerContext<S> {
    fn initial_position(&self, path: &str) -> StartPosition {
        match self.registry.offset(&file_identifier(path)) {
            Some(offset) => StartPosition::Offset(offset),
            None => match self.options.tail_from {
                TailFrom::Beginning => StartPosition::Beginning,
                TailFrom::End => StartPosition::End,
            },
        }
    }

    /// 레지스트리의 현재 회전 세대로 테일러를 시작합니다.
    async fn start_tailer(
        &self,
        path: &str,
        source: &Arc<LogSource>,
        position: StartPosition,
    ) -> Result<Arc<Tailer<S>>, AgentError> {
        let generation = self.registry.generation(&file_identifier(path));
        let tailer = Arc::new(
            Tailer::new(
                path,
                Arc::clone(source),
                position,
                self.channels.next_pipeline_chan(),
                Arc::clone(&self.strategy),
                self.options.tailer,
                Arc::clone(&self.counters),
            )
            .with_generation(generation),
        );
        tailer.try_start().await?;
        Ok(tailer)
    }
}

struct ScanState<S: TailStrategy> {
    tailers: HashMap<PathBuf, Arc<Tailer<S>>>,
    /// 아직 열지 못한 소스
    pending: Vec<Arc<LogSource>>,
    /// soft stop 중인 회전된 테일러
    rotated: Vec<JoinHandle<()>>,
}

/// 파일 스캐너 스테이지
pub struct Scanner<S: TailStrategy> {
    sources: Vec<Arc<LogSource>>,
    ctx: Arc<ScannerContext<S>>,
    state: Arc<Mutex<ScanState<S>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: TailStrategy> Scanner<S> {
    /// 새 스캐너를 생성합니다. `sources` 중 `file` 종류만 사용합니다.
    pub fn new(
        sources: Vec<Arc<LogSource>>,
        channels: Arc<dyn PipelineChannels>,
        registry: Arc<Registry>,
        strategy: S,
        options: ScannerOptions,
        counters: Arc<AgentCounters>,
    ) -> Self {
        Self {
            sources: sources
                .into_iter()
                .filter(|s| s.kind() == SourceKind::File)
                .collect(),
            ctx: Arc::new(ScannerContext {
                channels,
                registry,
                strategy: Arc::new(strategy),
                options,
                counters,
            }),
            state: Arc::new(Mutex::new(ScanState {
                tailers: HashMap::new(),
                pending: Vec::new(),
                rotated: Vec::new(),
            })),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// 현재 테일링 중인 경로
    pub async fn tailed_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.state.lock().await.tailers.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// 아직 열지 못한 소스 수
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    async fn start_initial(&self) {
        let mut state = self.state.lock().await;
        for source in &self.sources {
            let Some(path) = source.config.path.as_deref() else {
                continue;
            };
            if state.tailers.contains_key(&PathBuf::from(path)) {
                tracing::warn!(source = %source.name, path, "path already tailed by another source");
                source.status.track_error(format!("path {path} is already tailed by another source"));
                continue;
            }
            if state.tailers.len() >= self.ctx.options.open_files_limit {
                tracing::warn!(
                    source = %source.name,
                    path,
                    limit = self.ctx.options.open_files_limit,
                    "open files limit reached, source not tailed"
                );
                source.status.track_error("open files limit reached");
                continue;
            }

            let position = self.ctx.initial_position(path);
            match self.ctx.start_tailer(path, source, position).await {
                Ok(tailer) => {
                    state.tailers.insert(PathBuf::from(path), tailer);
                }
                Err(e) => {
                    tracing::info!(source = %source.name, path, error = %e, "file not available yet, will retry");
                    source.status.pending();
                    state.pending.push(Arc::clone(source));
                }
            }
        }
        tracing::info!(
            tailers = state.tailers.len(),
            pending = state.pending.len(),
            "file scanner started"
        );
    }
}

impl<S: TailStrategy> Stage for Scanner<S> {
    fn name(&self) -> &str {
        "file-scanner"
    }

    fn start(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.task.lock().await.is_some() {
                tracing::warn!("file scanner already started");
                return;
            }
            self.start_initial().await;
            let task = tokio::spawn(scan_loop(
                Arc::clone(&self.ctx),
                Arc::clone(&self.state),
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
                    tracing::warn!(error = %e, "file scan task failed");
                }
            }

            let (tailers, rotated) = {
                let mut state = self.state.lock().await;
                let tailers: Vec<_> = state.tailers.drain().map(|(_, t)| t).collect();
                let rotated: Vec<_> = state.rotated.drain(..).collect();
                (tailers, rotated)
            };

            let mut group = ParallelGroup::new("file-tailers");
            for tailer in tailers {
                group.add(tailer);
            }
            group.stop().await;

            for handle in rotated {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "rotated tailer task failed");
                }
            }
            tracing::info!("file scanner stopped");
        })
    }
}

async fn scan_loop<S: TailStrategy>(
    ctx: Arc<ScannerContext<S>>,
    state: Arc<Mutex<ScanState<S>>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + ctx.options.scan_period,
        ctx.options.scan_period,
    );
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let mut state = state.lock().await;
                scan(&ctx, &mut state).await;
            }
        }
    }
}

async fn scan<S: TailStrategy>(ctx: &ScannerContext<S>, state: &mut ScanState<S>) {
    // I/O 에러로 멈춘 테일러는 정리만 하고 재시작하지 않음
    state.tailers.retain(|path, tailer| {
        if tailer.has_failed() {
            tracing::warn!(path = %path.display(), "tailer failed, not restarting");
            false
        } else {
            true
        }
    });

    let mut rotated_paths = Vec::new();
    for (path, tailer) in &state.tailers {
        if tailer.check_for_rotation().await {
            rotated_paths.push(path.clone());
        }
    }

    for path in rotated_paths {
        let Some(old) = state.tailers.remove(&path) else {
            continue;
        };
        tracing::info!(path = %path.display(), "log rotation detected");
        let source = Arc::clone(old.source());
        let generation = ctx.registry.rotate(old.identifier());
        tracing::debug!(path = %path.display(), generation, "registry position reset for rotated file");
        state
            .rotated
            .push(tokio::spawn(async move { old.stop_after_rotation().await }));

        let path_str = path.display().to_string();
        match ctx.start_tailer(&path_str, &source, StartPosition::Beginning).await {
            Ok(tailer) => {
                state.tailers.insert(path, tailer);
            }
            Err(e) => {
                tracing::info!(path = %path_str, error = %e, "rotated file not available yet, will retry");
                state.pending.push(source);
            }
        }
    }

    let pending = std::mem::take(&mut state.pending);
    for source in pending {
        let Some(path) = source.config.path.clone() else {
            continue;
        };
        if state.tailers.len() >= ctx.options.open_files_limit {
            state.pending.push(source);
            continue;
        }
        match ctx.start_tailer(&path, &source, StartPosition::Beginning).await {
            Ok(tailer) => {
                tracing::info!(path = %path, "new file detected, tailing from beginning");
                state.tailers.insert(PathBuf::from(path), tailer);
            }
            Err(_) => state.pending.push(source),
        }
    }

    state.rotated.retain(|handle| !handle.is_finished());
}
