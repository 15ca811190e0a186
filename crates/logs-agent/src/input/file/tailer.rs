//! 파일 테일러 -- 회전을 감지하며 파일 하나를 끝까지 따라 읽습니다.
//!
//! 테일러는 세 개의 태스크로 동작합니다.
//!
//! ```text
//! reader ──DecoderInput──▶ decoder ──DecodedLine──▶ forwarder ──Message──▶ pipeline
//! ```
//!
//! # 상태 전이
//! ```text
//! NotStarted → Reading ⇄ Waiting → Stopped
//! ```
//! - hard stop: 루프 경계마다 확인하며 어느 상태에서든 즉시 `Stopped`
//! - soft stop: EOF에 도달했을 때 확인하며, 남은 부분 라인을 내보낸 뒤 `Stopped`
//!
//! # 오프셋
//! - `read_offset`: 파일에서 읽은 바이트 위치 (회전 감지용)
//! - `decoded_offset`: 내보낸 라인이 덮는 위치. 메시지의 `Origin.offset`이 되며
//!   감사기가 이 값을 커밋하므로 재시작은 항상 라인 경계에서 이어집니다.
//! - `generation`: 레지스트리의 회전 세대. 메시지마다 실려 감사기가 회전 이전
//!   파일의 늦은 확인을 버릴 수 있게 합니다.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use logship_core::metrics as m;
use logship_core::pipeline::{BoxFuture, Stage};

use super::strategy::{FileIdentity, StopSignals, TailStrategy, WaitContext, WaitOutcome};
use crate::decoder::{DecodedLine, Decoder, DecoderInput};
use crate::error::AgentError;
use crate::message::{Message, Origin, file_identifier};
use crate::source::LogSource;
use crate::status::AgentCounters;

/// 한 번에 읽는 바이트 수
pub const READ_CHUNK_SIZE: usize = 4096;

/// 테일링 시작 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// 파일 처음
    Beginning,
    /// 파일 끝
    End,
    /// 지정 오프셋 (파일보다 크면 처음부터)
    Offset(u64),
}

/// 테일러 실행 옵션
#[derive(Debug, Clone, Copy)]
pub struct TailerOptions {
    /// EOF 대기 간격
    pub sleep: Duration,
    /// 내부 채널 용량
    pub chan_size: usize,
}

/// 태스크 간 공유 상태
#[derive(Debug, Default)]
struct TailerShared {
    read_offset: AtomicU64,
    decoded_offset: AtomicU64,
    identity: OnceLock<Option<FileIdentity>>,
    finished: AtomicBool,
    failed: AtomicBool,
}

/// 파일 테일러
pub struct Tailer<S: TailStrategy> {
    name: String,
    path: PathBuf,
    identifier: String,
    generation: u64,
    position: StartPosition,
    source: Arc<LogSource>,
    output: mpsc::Sender<Message>,
    strategy: Arc<S>,
    options: TailerOptions,
    counters: Arc<AgentCounters>,
    signals: StopSignals,
    shared: Arc<TailerShared>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: TailStrategy> Tailer<S> {
    /// 새 테일러를 생성합니다. 파일은 [`try_start`](Self::try_start)에서 열립니다.
    pub fn new(
        path: impl Into<PathBuf>,
        source: Arc<LogSource>,
        position: StartPosition,
        output: mpsc::Sender<Message>,
        strategy: Arc<S>,
        options: TailerOptions,
        counters: Arc<AgentCounters>,
    ) -> Self {
        let path = path.into();
        let identifier = file_identifier(&path.display().to_string());
        Self {
            name: format!("tailer:{}", path.display()),
            path,
            identifier,
            generation: 0,
            position,
            source,
            output,
            strategy,
            options,
            counters,
            signals: StopSignals::default(),
            shared: Arc::new(TailerShared::default()),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// 메시지에 실을 회전 세대를 지정합니다.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// 회전 세대
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 레지스트리 식별자
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// 테일링 중인 소스
    pub fn source(&self) -> &Arc<LogSource> {
        &self.source
    }

    /// 파일에서 읽은 위치
    pub fn read_offset(&self) -> u64 {
        self.shared.read_offset.load(Ordering::SeqCst)
    }

    /// 내보낸 라인이 덮는 위치
    pub fn decoded_offset(&self) -> u64 {
        self.shared.decoded_offset.load(Ordering::SeqCst)
    }

    /// 리더가 종료되었는지 여부 (정지 또는 I/O 에러)
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst)
    }

    /// I/O 에러로 종료되었는지 여부
    pub fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }

    /// 파일을 열고 읽기를 시작합니다.
    ///
    /// # Errors
    /// 파일을 열거나 이동할 수 없으면 [`AgentError::Tailer`]를 반환합니다.
    /// 이미 시작된 테일러에 호출해도 에러입니다.
    pub async fn try_start(&self) -> Result<(), AgentError> {
        let tailer_err = |reason: String| AgentError::Tailer {
            path: self.path.display().to_string(),
            reason,
        };

        if self.started.swap(true, Ordering::SeqCst) {
            return Err(tailer_err("tailer already started".to_owned()));
        }

        let opened = self.open().await;
        let (file, offset, identity) = match opened {
            Ok(v) => v,
            Err(reason) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(tailer_err(reason));
            }
        };

        let _ = self.shared.identity.set(identity);
        self.shared.read_offset.store(offset, Ordering::SeqCst);
        self.shared.decoded_offset.store(offset, Ordering::SeqCst);

        let (input_tx, input_rx) = mpsc::channel(self.options.chan_size);
        let (line_tx, line_rx) = mpsc::channel(self.options.chan_size);

        let ctx = WaitContext {
            path: self.path.clone(),
            file: Some(file),
            offset,
            identity,
            sleep: self.options.sleep,
            signals: self.signals.clone(),
        };

        let reader = tokio::spawn(read_loop(
            Arc::clone(&self.strategy),
            ctx,
            input_tx,
            Arc::clone(&self.shared),
            Arc::clone(&self.source),
            Arc::clone(&self.counters),
        ));
        let decoder = tokio::spawn(Decoder::new().run(input_rx, line_tx));
        let forwarder = tokio::spawn(forward_loop(
            line_rx,
            self.output.clone(),
            Arc::clone(&self.source),
            self.identifier.clone(),
            self.generation,
            Arc::clone(&self.shared),
        ));
        self.tasks.lock().await.extend([reader, decoder, forwarder]);

        self.source.status.success();
        metrics::gauge!(m::TAILERS_ACTIVE).increment(1.0);
        tracing::info!(
            path = %self.path.display(),
            offset,
            generation = self.generation,
            strategy = self.strategy.name(),
            "tailer started"
        );
        Ok(())
    }

    async fn open(&self) -> Result<(File, u64, Option<FileIdentity>), String> {
        let mut file = File::open(&self.path)
            .await
            .map_err(|e| format!("failed to open file: {e}"))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| format!("failed to read metadata: {e}"))?;
        let len = metadata.len();

        let offset = match self.position {
            StartPosition::Beginning => 0,
            StartPosition::End => len,
            StartPosition::Offset(n) if n > len => {
                tracing::warn!(
                    path = %self.path.display(),
                    offset = n,
                    len,
                    "stored offset beyond file size, restarting from beginning"
                );
                0
            }
            StartPosition::Offset(n) => n,
        };

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| format!("failed to seek to {offset}: {e}"))?;
        Ok((file, offset, FileIdentity::from_metadata(&metadata)))
    }

    /// 경로가 다른 파일로 바뀌었거나 잘렸는지 확인합니다.
    ///
    /// 경로를 확인할 수 없으면 회전이 없는 것으로 보고 다음 주기에 다시 확인합니다.
    pub async fn check_for_rotation(&self) -> bool {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "rotation check failed");
                return false;
            }
        };

        if let Some(Some(opened)) = self.shared.identity.get() {
            if FileIdentity::from_metadata(&metadata) != Some(*opened) {
                return true;
            }
        }
        metadata.len() < self.read_offset()
    }

    /// 즉시 정지하고 태스크가 끝날 때까지 기다립니다.
    ///
    /// 이미 디코더에 들어간 데이터의 완성된 라인은 계속 파이프라인으로 전달되고,
    /// 미완성 라인은 버려집니다.
    pub async fn stop(&self) {
        self.signals.hard.cancel();
        self.join().await;
    }

    /// 회전된 파일을 EOF까지 읽고 부분 라인까지 내보낸 뒤 정지합니다.
    pub async fn stop_after_rotation(&self) {
        self.signals.soft.cancel();
        self.join().await;
    }

    async fn join(&self) {
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(path = %self.path.display(), error = %e, "tailer task failed");
            }
        }
    }
}

impl<S: TailStrategy> Stage for Tailer<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.try_start().await {
                tracing::warn!(error = %e, "tailer could not start");
            }
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(Tailer::stop(self))
    }
}

async fn read_loop<S: TailStrategy>(
    strategy: Arc<S>,
    mut ctx: WaitContext,
    decoder: mpsc::Sender<DecoderInput>,
    shared: Arc<TailerShared>,
    source: Arc<LogSource>,
    counters: Arc<AgentCounters>,
) {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        if ctx.signals.hard.is_cancelled() {
            break;
        }

        let read = match ctx.file.as_mut() {
            Some(file) => file.read(&mut buf).await,
            None => Ok(0),
        };

        match read {
            Ok(0) => {
                if ctx.signals.soft.is_cancelled() {
                    flush_decoder(&decoder, &ctx.signals).await;
                    break;
                }
                match strategy.wait(&mut ctx).await {
                    WaitOutcome::Ready => {}
                    WaitOutcome::HardStop => break,
                    WaitOutcome::SoftStop => {
                        flush_decoder(&decoder, &ctx.signals).await;
                        break;
                    }
                }
            }
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                let sent = tokio::select! {
                    biased;
                    () = ctx.signals.hard.cancelled() => false,
                    result = decoder.send(DecoderInput::Data(chunk)) => result.is_ok(),
                };
                if !sent {
                    break;
                }
                ctx.offset += n as u64;
                shared.read_offset.fetch_add(n as u64, Ordering::SeqCst);
                counters.add_bytes_read(n as u64);
                metrics::counter!(m::LOGS_BYTES_READ_TOTAL, m::LABEL_SOURCE_KIND => "file")
                    .increment(n as u64);
            }
            Err(e) => {
                let reason = format!(
                    "tailer stopped due to I/O error on path {}: {e}",
                    ctx.path.display()
                );
                tracing::error!(path = %ctx.path.display(), error = %e, "tailer read failed");
                source.status.track_error(reason);
                shared.failed.store(true, Ordering::SeqCst);
                break;
            }
        }
    }

    shared.finished.store(true, Ordering::SeqCst);
    metrics::gauge!(m::TAILERS_ACTIVE).decrement(1.0);
    tracing::debug!(path = %ctx.path.display(), offset = ctx.offset, "tailer reader stopped");
}

async fn flush_decoder(decoder: &mpsc::Sender<DecoderInput>, signals: &StopSignals) {
    tokio::select! {
        biased;
        () = signals.hard.cancelled() => {}
        _ = decoder.send(DecoderInput::Flush) => {}
    }
}

async fn forward_loop(
    mut lines: mpsc::Receiver<DecodedLine>,
    output: mpsc::Sender<Message>,
    source: Arc<LogSource>,
    identifier: String,
    generation: u64,
    shared: Arc<TailerShared>,
) {
    while let Some(line) = lines.recv().await {
        let raw_len = line.raw_len as u64;
        let offset = shared.decoded_offset.fetch_add(raw_len, Ordering::SeqCst) + raw_len;
        if line.content.is_empty() {
            continue;
        }

        let origin = Origin::new(Arc::clone(&source))
            .with_identifier(identifier.clone())
            .with_offset(offset)
            .with_generation(generation);
        if output.send(Message::new(line.content, origin)).await.is_err() {
            tracing::debug!(identifier = %identifier, "pipeline input closed, tailer forwarder exiting");
            break;
        }
    }
}
