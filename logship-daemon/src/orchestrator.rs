//! Daemon orchestration -- configuration, source loading and agent lifecycle.
//!
//! The [`Orchestrator`] is the central coordinator of `logship-daemon`.
//! It validates configuration, installs the metrics recorder, loads source
//! definitions (inline `[[logs.sources]]` and the `confd_path` directory),
//! builds the [`LogsAgent`], and runs it until a shutdown signal arrives.
//!
//! # Shutdown
//!
//! 1. Broadcast shutdown to background tasks (health reporter)
//! 2. Stop the logs agent (inputs first, auditor last, registry flushed)
//! 3. Remove the PID file

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::broadcast;

use logship_agent::{AgentConfig, LogsAgent, LogsAgentBuilder, SourceDefinition, SourceLoader};
use logship_core::config::{LogsConfig, LogshipConfig};

use crate::health::{DaemonHealth, daemon_health, spawn_health_reporter};
use crate::metrics_server;

/// Interval between aggregated health reports.
const HEALTH_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: LogshipConfig,
    /// Logs agent, `None` when `[logs]` is disabled.
    agent: Option<Arc<LogsAgent>>,
    /// Shutdown broadcast sender (signals all background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or parsed
    /// - Configuration validation fails
    /// - Sources cannot be loaded or the agent cannot be built
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = LogshipConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    pub async fn build_from_config(config: LogshipConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            record_build_info();
        }

        let agent = if config.logs.enabled {
            tracing::info!("initializing logs agent");
            let sources = load_sources(&config.logs).await?;
            let agent = LogsAgentBuilder::new()
                .config(AgentConfig::from_core(&config))
                .sources(sources)
                .build()
                .map_err(|e| anyhow::anyhow!("failed to build logs agent: {}", e))?;
            Some(Arc::new(agent))
        } else {
            tracing::warn!("logs agent disabled, nothing to collect");
            None
        };

        let (shutdown_tx, _) = broadcast::channel(4);
        tracing::info!(logs_enabled = agent.is_some(), "orchestrator initialized");

        Ok(Self {
            config,
            agent,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start the agent and block until SIGINT or SIGTERM.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Start the agent and block until `shutdown` resolves.
    ///
    /// `shutdown` yields the name of the trigger, or an error if it could not
    /// be installed. The PID file is removed on every exit path.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        let pid_file = (!self.config.general.pid_file.is_empty())
            .then(|| self.config.general.pid_file.clone());
        if let Some(path) = &pid_file {
            write_pid_file(Path::new(path))?;
        }

        let result = self.run_agent(shutdown).await;

        if let Some(path) = &pid_file {
            remove_pid_file(Path::new(path));
        }
        result
    }

    async fn run_agent<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        if let Some(agent) = &self.agent {
            agent
                .start()
                .map_err(|e| anyhow::anyhow!("failed to start logs agent: {}", e))?;
        }

        let reporter = spawn_health_reporter(
            self.agent.clone(),
            self.start_time,
            HEALTH_REPORT_INTERVAL,
            self.shutdown_tx.subscribe(),
        );

        tracing::info!("logship-daemon running");
        let signal = shutdown.await;
        match &signal {
            Ok(name) => tracing::info!(signal = name, "shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "shutdown signal handling failed, stopping"),
        }

        let _ = self.shutdown_tx.send(());
        let _ = reporter.await;

        self.shutdown().await;
        signal.map(|_| ())
    }

    /// Stop the logs agent, waiting until its channels are drained.
    async fn shutdown(&self) {
        if let Some(agent) = &self.agent {
            tracing::info!("stopping logs agent");
            agent.stop().await;
        }
        tracing::info!("logship-daemon shut down");
    }

    /// Get the current aggregated health status.
    pub fn health(&self) -> DaemonHealth {
        daemon_health(self.agent.as_deref(), self.start_time)
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &LogshipConfig {
        &self.config
    }

    /// The logs agent, if enabled.
    pub fn agent(&self) -> Option<&Arc<LogsAgent>> {
        self.agent.as_ref()
    }
}

/// Collect source definitions from the inline list and the `confd_path` directory.
///
/// Inline sources come first, then directory files in name order.
///
/// # Errors
///
/// Returns an error if `confd_path` is set but cannot be read. Files that fail to
/// parse are skipped with a warning.
pub async fn load_sources(logs: &LogsConfig) -> Result<Vec<SourceDefinition>> {
    let mut sources = SourceLoader::from_inline(&logs.sources);

    if !logs.confd_path.is_empty() {
        let loaded = SourceLoader::load_directory(&logs.confd_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load sources: {}", e))?;
        sources.extend(loaded);
    }

    if sources.is_empty() {
        tracing::warn!("no log sources configured");
    } else {
        tracing::info!(count = sources.len(), "log sources loaded");
    }
    Ok(sources)
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file.
///
/// Used to prevent duplicate daemon instances.
///
/// # Security
///
/// - Uses `create_new(true)` to atomically create file (prevents TOCTOU races)
/// - Verifies the created file is a regular file (prevents symlink attacks)
/// - Creates parent directory with restrictive permissions (0o700)
///
/// # Errors
///
/// Returns an error if the PID file cannot be written or already exists.
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new().mode(0o700).recursive(true).create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file (possible symlink attack)",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Record the build info gauge (always 1, labelled with the version).
fn record_build_info() {
    use logship_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "daemon metrics recorded");
}
