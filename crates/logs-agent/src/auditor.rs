//! 감사기 -- 전송 완료된 메시지의 오프셋을 영속화합니다.
//!
//! 센더가 전송에 성공한 메시지를 감사기 채널로 넘기면, 감사기는 소스 식별자별
//! 마지막 오프셋을 [`Registry`]에 기록하고 주기적으로 디스크에 저장합니다.
//! 재시작 시 입력은 레지스트리에서 시작 위치를 찾습니다.
//!
//! # 파일 형식
//! ```json
//! {"version":1,"registry":{"file:/var/log/app.log":{"offset":1024,"generation":0,"last_updated":"2024-01-01T00:00:00Z"}}}
//! ```
//!
//! 정지 순서상 감사기는 가장 마지막에 멈추므로, 파이프라인이 비워진 뒤 받은
//! 확인까지 모두 저장됩니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logship_core::metrics as m;
use logship_core::pipeline::{BoxFuture, Stage};

use crate::error::AgentError;
use crate::health::{Catalog, HealthHandle, recv_ping};
use crate::message::Message;

/// 레지스트리 파일 형식 버전
pub const REGISTRY_VERSION: u64 = 1;

/// 오래된 항목 정리 주기
const CLEANUP_PERIOD: Duration = Duration::from_secs(300);

/// 레지스트리 항목
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// 커밋된 오프셋
    pub offset: u64,
    /// 커밋된 원본 타임스탬프 (컨테이너 로그)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// 회전 세대. 회전할 때마다 1씩 증가하며 오프셋은 0으로 돌아갑니다.
    #[serde(default)]
    pub generation: u64,
    /// 마지막 갱신 시각
    pub last_updated: DateTime<Utc>,
}

#[derive(Serialize)]
struct RegistryFile<'a> {
    version: u64,
    registry: &'a HashMap<String, RegistryEntry>,
}

/// 소스 식별자 → 커밋된 오프셋 맵
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl Registry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// 디스크에서 레지스트리를 읽습니다.
    ///
    /// 파일이 없거나, 읽을 수 없거나, 손상되었거나, 버전이 다르면 빈 레지스트리를
    /// 반환합니다. 형식이 잘못된 개별 항목은 건너뜁니다.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let registry = Self::new(path);
        let content = match tokio::fs::read(&registry.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %registry.path.display(), "no registry file, starting empty");
                return registry;
            }
            Err(e) => {
                tracing::warn!(path = %registry.path.display(), error = %e, "failed to read registry, starting empty");
                return registry;
            }
        };

        match parse_registry(&content) {
            Ok(entries) => {
                tracing::info!(
                    path = %registry.path.display(),
                    entries = entries.len(),
                    "registry loaded"
                );
                *registry.write() = entries;
            }
            Err(reason) => {
                tracing::warn!(path = %registry.path.display(), reason = %reason, "corrupt registry, starting empty");
            }
        }
        registry
    }

    /// 레지스트리 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 항목을 조회합니다.
    pub fn get(&self, identifier: &str) -> Option<RegistryEntry> {
        self.read().get(identifier).cloned()
    }

    /// 커밋된 오프셋
    pub fn offset(&self, identifier: &str) -> Option<u64> {
        self.read().get(identifier).map(|e| e.offset)
    }

    /// 커밋된 원본 타임스탬프
    pub fn timestamp(&self, identifier: &str) -> Option<String> {
        self.read().get(identifier).and_then(|e| e.timestamp.clone())
    }

    /// 현재 회전 세대 (항목이 없으면 0)
    pub fn generation(&self, identifier: &str) -> u64 {
        self.read().get(identifier).map_or(0, |e| e.generation)
    }

    /// 항목을 갱신합니다. 회전 세대는 유지됩니다.
    pub fn update(&self, identifier: &str, offset: u64, timestamp: Option<String>) {
        let mut entries = self.write();
        let generation = entries.get(identifier).map_or(0, |e| e.generation);
        entries.insert(
            identifier.to_owned(),
            RegistryEntry {
                offset,
                timestamp,
                generation,
                last_updated: Utc::now(),
            },
        );
    }

    /// 회전을 기록합니다. 세대를 올리고 오프셋을 0으로 되돌린 뒤 새 세대를 반환합니다.
    ///
    /// 이전 세대의 확인이 늦게 도착해도 [`commit`](Self::commit)이 버리므로
    /// 새 파일의 위치를 덮어쓰지 않습니다.
    pub fn rotate(&self, identifier: &str) -> u64 {
        let mut entries = self.write();
        let generation = entries.get(identifier).map_or(0, |e| e.generation) + 1;
        entries.insert(
            identifier.to_owned(),
            RegistryEntry {
                offset: 0,
                timestamp: None,
                generation,
                last_updated: Utc::now(),
            },
        );
        generation
    }

    /// 확인된 위치를 커밋합니다.
    ///
    /// 저장된 세대보다 오래된 세대의 확인은 반영하지 않고 `false`를 반환합니다.
    pub fn commit(
        &self,
        identifier: &str,
        generation: u64,
        offset: u64,
        timestamp: Option<String>,
    ) -> bool {
        let mut entries = self.write();
        if entries
            .get(identifier)
            .is_some_and(|e| e.generation > generation)
        {
            return false;
        }
        entries.insert(
            identifier.to_owned(),
            RegistryEntry {
                offset,
                timestamp,
                generation,
                last_updated: Utc::now(),
            },
        );
        true
    }

    /// `ttl`보다 오래 갱신되지 않은 항목을 지우고, 지운 수를 반환합니다.
    pub fn purge_older_than(&self, ttl: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.last_updated >= cutoff);
        before - entries.len()
    }

    /// 항목 수
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// 레지스트리를 디스크에 원자적으로 저장합니다 (임시 파일 + rename).
    ///
    /// # Errors
    /// 디렉토리 생성, 쓰기, rename 중 하나라도 실패하면 [`AgentError::Registry`]를 반환합니다.
    /// 메모리의 항목은 그대로 유지됩니다.
    pub async fn flush(&self) -> Result<(), AgentError> {
        let registry_err = |reason: String| AgentError::Registry {
            path: self.path.display().to_string(),
            reason,
        };

        let json = {
            let entries = self.read();
            serde_json::to_vec(&RegistryFile {
                version: REGISTRY_VERSION,
                registry: &entries,
            })?
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| registry_err(format!("failed to create directory: {e}")))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| registry_err(format!("failed to write temp file: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| registry_err(format!("failed to rename temp file: {e}")))?;
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_registry(content: &[u8]) -> Result<HashMap<String, RegistryEntry>, String> {
    let value: serde_json::Value =
        serde_json::from_slice(content).map_err(|e| format!("invalid json: {e}"))?;

    let version = value.get("version").and_then(serde_json::Value::as_u64);
    if version != Some(REGISTRY_VERSION) {
        return Err(format!("unsupported registry version: {version:?}"));
    }

    let raw = value
        .get("registry")
        .and_then(serde_json::Value::as_object)
        .ok_or_else(|| "missing registry object".to_owned())?;

    let mut entries = HashMap::with_capacity(raw.len());
    for (identifier, entry) in raw {
        match serde_json::from_value::<RegistryEntry>(entry.clone()) {
            Ok(entry) => {
                entries.insert(identifier.clone(), entry);
            }
            Err(e) => {
                tracing::warn!(identifier = %identifier, error = %e, "skipping malformed registry entry");
            }
        }
    }
    Ok(entries)
}

/// 감사기 실행 옵션
#[derive(Debug, Clone, Copy)]
pub struct AuditorOptions {
    /// 저장 주기
    pub flush_interval: Duration,
    /// 항목 보존 시간
    pub ttl: Duration,
}

/// 감사기 스테이지
pub struct Auditor {
    registry: Arc<Registry>,
    options: AuditorOptions,
    input: Mutex<Option<mpsc::Receiver<Message>>>,
    health: Mutex<Option<HealthHandle>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Auditor {
    /// 새 감사기를 생성하고 헬스 카탈로그에 등록합니다.
    pub fn new(
        registry: Arc<Registry>,
        input: mpsc::Receiver<Message>,
        options: AuditorOptions,
        catalog: &Catalog,
    ) -> Self {
        Self {
            registry,
            options,
            input: Mutex::new(Some(input)),
            health: Mutex::new(Some(catalog.register("logs-auditor"))),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// 공유 레지스트리
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl Stage for Auditor {
    fn name(&self) -> &str {
        "auditor"
    }

    fn start(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let Some(input) = self.input.lock().await.take() else {
                tracing::warn!("auditor already started");
                return;
            };
            let health = self.health.lock().await.take();
            let task = tokio::spawn(run(
                Arc::clone(&self.registry),
                input,
                health,
                self.options,
                self.cancel.clone(),
            ));
            *self.task.lock().await = Some(task);
            tracing::info!(path = %self.registry.path().display(), "auditor started");
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.cancel.cancel();
            if let Some(task) = self.task.lock().await.take() {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "auditor task failed");
                }
            }
            tracing::info!(entries = self.registry.len(), "auditor stopped");
        })
    }
}

async fn run(
    registry: Arc<Registry>,
    mut input: mpsc::Receiver<Message>,
    mut health: Option<HealthHandle>,
    options: AuditorOptions,
    cancel: CancellationToken,
) {
    let start = tokio::time::Instant::now();
    let mut flush_tick = tokio::time::interval_at(start + options.flush_interval, options.flush_interval);
    let mut cleanup_tick = tokio::time::interval_at(start + CLEANUP_PERIOD, CLEANUP_PERIOD);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            maybe = input.recv() => match maybe {
                Some(msg) => commit(&registry, &msg),
                None => break,
            },
            _ = flush_tick.tick() => flush(&registry).await,
            _ = cleanup_tick.tick() => {
                let purged = registry.purge_older_than(options.ttl);
                if purged > 0 {
                    tracing::info!(purged, "purged expired registry entries");
                }
            }
            Some(()) = recv_ping(&mut health) => {}
        }
    }

    // 남은 확인을 모두 반영한 뒤 저장
    input.close();
    while let Some(msg) = input.recv().await {
        commit(&registry, &msg);
    }
    flush(&registry).await;
}

fn commit(registry: &Registry, msg: &Message) {
    let Some(identifier) = &msg.origin.identifier else {
        return;
    };
    let origin = &msg.origin;
    if registry.commit(identifier, origin.generation, origin.offset, origin.timestamp.clone()) {
        tracing::trace!(identifier = %identifier, offset = origin.offset, "offset committed");
    } else {
        tracing::debug!(
            identifier = %identifier,
            generation = origin.generation,
            offset = origin.offset,
            "ack from rotated file ignored"
        );
    }
}

async fn flush(registry: &Registry) {
    match registry.flush().await {
        Ok(()) => {
            metrics::gauge!(m::REGISTRY_ENTRIES).set(registry.len() as f64);
        }
        Err(e) => {
            metrics::counter!(m::REGISTRY_FLUSH_ERRORS_TOTAL).increment(1);
            tracing::warn!(error = %e, "failed to persist registry, will retry");
        }
    }
}
