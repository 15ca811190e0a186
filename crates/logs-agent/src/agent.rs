//! 로그 에이전트 -- 스테이지 트리의 생명주기 관리
//!
//! [`LogsAgent`]는 호출자가 소유하며 실행마다 새로 만듭니다. 정지된 에이전트는
//! 다시 시작할 수 없습니다.
//!
//! # 스테이지 트리
//! ```text
//! Serial "logs-agent"
//! ├── Parallel "inputs"
//! │   ├── file scanner (poll | reopen)
//! │   ├── container scanner
//! │   └── tcp/udp listeners
//! ├── pipeline provider (processor → sender × N)
//! └── auditor
//! ```
//! 직렬 그룹이므로 감사기부터 시작하고, 정지 시에는 입력부터 멈춥니다.
//!
//! # 사용 예시
//! ```ignore
//! use logship_agent::LogsAgentBuilder;
//!
//! let agent = LogsAgentBuilder::new()
//!     .config(agent_config)
//!     .sources(definitions)
//!     .build()?;
//! agent.start()?;
//! // ...
//! agent.stop().await;
//! ```

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logship_core::config::{SourceKind, TailMode};
use logship_core::pipeline::Stage;

use crate::auditor::{Auditor, AuditorOptions, Registry};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::health::Catalog;
use crate::input::container::{BollardRuntime, ContainerScanner, ContainerScannerOptions};
use crate::input::file::{PollingStrategy, ReopenStrategy, Scanner, ScannerOptions, TailerOptions};
use crate::input::listener::{Listener, ListenerOptions};
use crate::pipeline::{ConnectionManager, Connector, PipelineChannels, Provider, ProviderOptions, TcpConnector};
use crate::source::{LogSources, SourceDefinition};
use crate::stages::{ParallelGroup, SerialGroup};
use crate::status::{AgentCounters, AgentStatus, SourceReport};

/// 에이전트 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgentState {
    Initialized,
    Running,
    Stopped,
}

/// 로그 에이전트
pub struct LogsAgent {
    config: AgentConfig,
    definitions: Vec<SourceDefinition>,
    connector: Arc<dyn Connector>,
    catalog: Arc<Catalog>,
    counters: Arc<AgentCounters>,
    state: StdMutex<AgentState>,
    sources: StdMutex<Option<Arc<LogSources>>>,
    /// 백그라운드 시작 태스크 (완료되면 스테이지 트리를 돌려줌)
    starting: StdMutex<Option<JoinHandle<Arc<dyn Stage>>>>,
    ping_cancel: CancellationToken,
}

impl LogsAgent {
    /// 기본 TCP 연결로 에이전트를 생성합니다.
    pub fn new(config: AgentConfig, definitions: Vec<SourceDefinition>) -> Self {
        let connector = Arc::new(TcpConnector::new(
            config.host.clone(),
            config.port,
            !config.dev_mode_no_ssl,
        ));
        Self::with_connector(config, definitions, connector)
    }

    /// 외부 전송 계층을 주입해 에이전트를 생성합니다.
    pub fn with_connector(
        config: AgentConfig,
        definitions: Vec<SourceDefinition>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            definitions,
            connector,
            catalog: Arc::new(Catalog::new()),
            counters: Arc::new(AgentCounters::default()),
            state: StdMutex::new(AgentState::Initialized),
            sources: StdMutex::new(None),
            starting: StdMutex::new(None),
            ping_cancel: CancellationToken::new(),
        }
    }

    /// 헬스 카탈로그
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// 에이전트 설정
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        *self.lock_state() == AgentState::Running
    }

    /// 에이전트를 시작합니다.
    ///
    /// 소스 컴파일까지는 동기적으로 수행하고, 레지스트리 로딩과 스테이지 시작은
    /// 백그라운드 태스크에서 진행한 뒤 즉시 반환합니다. 이미 실행 중이면 아무 일도
    /// 하지 않습니다. tokio 런타임 안에서 호출해야 합니다.
    ///
    /// # Errors
    /// - 이미 정지된 에이전트: [`AgentError::AlreadyStopped`]
    /// - 처리 규칙 컴파일 실패: [`AgentError::RuleCompile`]
    pub fn start(&self) -> Result<(), AgentError> {
        let mut state = self.lock_state();
        match *state {
            AgentState::Running => return Ok(()),
            AgentState::Stopped => return Err(AgentError::AlreadyStopped),
            AgentState::Initialized => {}
        }

        let sources = Arc::new(LogSources::compile(&self.definitions)?);
        *self.sources.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&sources));

        let config = self.config.clone();
        let connector = Arc::clone(&self.connector);
        let catalog = Arc::clone(&self.catalog);
        let counters = Arc::clone(&self.counters);
        let ping_cancel = self.ping_cancel.clone();
        let handle = tokio::spawn(async move {
            let registry = Arc::new(Registry::load(config.registry_path()).await);
            let tree: Arc<dyn Stage> = Arc::new(build_stage_tree(
                &config, &sources, registry, connector, &catalog, counters,
            ));
            tree.start().await;
            // 구성 요소가 모두 등록된 뒤부터 핑
            tokio::spawn(ping_loop(catalog, config.health_ping_interval(), ping_cancel));
            tracing::info!(
                sources = sources.len(),
                pipelines = config.pipelines,
                "logs agent started"
            );
            tree
        });
        *self.starting.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        *state = AgentState::Running;
        Ok(())
    }

    /// 에이전트를 정지합니다.
    ///
    /// 백그라운드 시작이 끝나기를 기다린 뒤 스테이지 트리를 정지하며, 모든 채널이
    /// 비워지고 레지스트리가 저장될 때까지 반환하지 않습니다.
    pub async fn stop(&self) {
        {
            let mut state = self.lock_state();
            let previous = *state;
            *state = AgentState::Stopped;
            if previous != AgentState::Running {
                return;
            }
        }

        self.ping_cancel.cancel();
        let handle = self
            .starting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(tree) => tree.stop().await,
                Err(e) => tracing::error!(error = %e, "agent start task failed"),
            }
        }
        tracing::info!("logs agent stopped");
    }

    /// 현재 상태
    pub fn status(&self) -> AgentStatus {
        let sources = self
            .sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.all().iter().map(|src| SourceReport::from_source(src)).collect())
            .unwrap_or_default();

        AgentStatus {
            is_running: self.is_running(),
            sources,
            counters: self.counters.snapshot(),
            health: self.catalog.status(),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn ping_loop(catalog: Arc<Catalog>, period: Duration, cancel: CancellationToken) {
    let period = period.max(Duration::from_millis(100));
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => catalog.ping_components(),
        }
    }
}

fn build_stage_tree(
    config: &AgentConfig,
    sources: &LogSources,
    registry: Arc<Registry>,
    connector: Arc<dyn Connector>,
    catalog: &Catalog,
    counters: Arc<AgentCounters>,
) -> SerialGroup {
    let (audit_tx, audit_rx) = mpsc::channel(config.chan_size);
    let auditor = Arc::new(Auditor::new(
        Arc::clone(&registry),
        audit_rx,
        AuditorOptions {
            flush_interval: config.flush_interval(),
            ttl: config.registry_ttl(),
        },
        catalog,
    ));

    let manager = Arc::new(ConnectionManager::new(
        connector,
        Duration::from_millis(config.backoff_initial_ms),
        Duration::from_secs(config.backoff_max_secs),
    ));
    let provider = Arc::new(Provider::new(
        &ProviderOptions::from_config(config),
        audit_tx,
        manager,
        Arc::clone(&counters),
        catalog,
    ));
    let channels: Arc<dyn PipelineChannels> = provider.clone();

    let valid = sources.valid_sources();
    let mut inputs = ParallelGroup::new("inputs");

    if valid.iter().any(|s| s.kind() == SourceKind::File) {
        let options = ScannerOptions {
            open_files_limit: config.open_files_limit,
            scan_period: config.scan_period(),
            tail_from: config.tail_from,
            tailer: TailerOptions {
                sleep: config.sleep_duration(),
                chan_size: config.chan_size,
            },
        };
        let scanner: Arc<dyn Stage> = match config.tail_mode {
            TailMode::Poll => Arc::new(Scanner::new(
                valid.clone(),
                Arc::clone(&channels),
                Arc::clone(&registry),
                PollingStrategy,
                options,
                Arc::clone(&counters),
            )),
            TailMode::Reopen => Arc::new(Scanner::new(
                valid.clone(),
                Arc::clone(&channels),
                Arc::clone(&registry),
                ReopenStrategy,
                options,
                Arc::clone(&counters),
            )),
        };
        inputs.add(scanner);
    }

    let docker: Vec<_> = valid
        .iter()
        .filter(|s| s.kind() == SourceKind::Docker)
        .cloned()
        .collect();
    if !docker.is_empty() {
        match BollardRuntime::connect_local() {
            Ok(runtime) => inputs.add(Arc::new(ContainerScanner::new(
                docker,
                Arc::new(runtime),
                Arc::clone(&channels),
                Arc::clone(&registry),
                ContainerScannerOptions {
                    scan_period: config.scan_period(),
                    tail_from: config.tail_from,
                },
                Arc::clone(&counters),
            ))),
            Err(e) => {
                tracing::error!(error = %e, "container runtime unavailable, docker sources disabled");
                for source in &docker {
                    source.status.track_error(e.to_string());
                }
            }
        }
    }

    for source in valid
        .iter()
        .filter(|s| matches!(s.kind(), SourceKind::Tcp | SourceKind::Udp))
    {
        inputs.add(Arc::new(Listener::new(
            Arc::clone(source),
            Arc::clone(&channels),
            ListenerOptions {
                host: config.listen_host.clone(),
                max_connections: config.max_tcp_connections,
            },
            Arc::clone(&counters),
        )));
    }

    tracing::debug!(inputs = inputs.len(), "stage tree built");
    SerialGroup::new("logs-agent")
        .with(Arc::new(inputs))
        .with(provider)
        .with(auditor)
}

/// [`LogsAgent`] 빌더
#[derive(Default)]
pub struct LogsAgentBuilder {
    config: Option<AgentConfig>,
    definitions: Vec<SourceDefinition>,
    connector: Option<Arc<dyn Connector>>,
}

impl LogsAgentBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 에이전트 설정을 지정합니다.
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 소스 정의를 지정합니다.
    pub fn sources(mut self, definitions: Vec<SourceDefinition>) -> Self {
        self.definitions = definitions;
        self
    }

    /// 외부 전송 계층을 지정합니다. 지정하지 않으면 평문 TCP입니다.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// 설정을 검증하고 에이전트를 만듭니다.
    ///
    /// # Errors
    /// 설정 검증에 실패하면 [`AgentError::Config`]를 반환합니다.
    pub fn build(self) -> Result<LogsAgent, AgentError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        Ok(match self.connector {
            Some(connector) => LogsAgent::with_connector(config, self.definitions, connector),
            None => LogsAgent::new(config, self.definitions),
        })
    }
}
