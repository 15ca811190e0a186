//! Aggregated health check reporting.
//!
//! Folds the logs agent status into a single [`HealthStatus`] and
//! periodically logs it together with the uptime gauge.
//!
//! # Aggregation Rule
//!
//! - Agent not running -> Unhealthy
//! - Any component missed a health ping -> Unhealthy(components)
//! - Any source in error state -> Degraded(sources)
//! - Otherwise -> Healthy

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use logship_agent::{AgentStatus, LogsAgent, SourceState};
use logship_core::metrics as m;
use logship_core::pipeline::HealthStatus;

/// Aggregated health report for the entire daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall daemon health status.
    pub status: HealthStatus,
    /// Daemon uptime in seconds since start.
    pub uptime_secs: u64,
    /// Logs agent status, `None` when `[logs]` is disabled.
    pub agent: Option<AgentStatus>,
}

/// Aggregate an agent status into a single health status.
pub fn aggregate_status(status: &AgentStatus) -> HealthStatus {
    if !status.is_running {
        return HealthStatus::Unhealthy("logs agent is not running".to_owned());
    }
    if !status.health.is_healthy() {
        return HealthStatus::Unhealthy(format!(
            "unresponsive components: {}",
            status.health.unhealthy.join(", ")
        ));
    }

    let failing: Vec<String> = status
        .sources
        .iter()
        .filter_map(|s| match &s.state {
            SourceState::Error(reason) => Some(format!("{}: {}", s.name, reason)),
            _ => None,
        })
        .collect();
    if failing.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded(failing.join("; "))
    }
}

/// Build a daemon health report.
pub fn daemon_health(agent: Option<&LogsAgent>, start_time: Instant) -> DaemonHealth {
    let agent = agent.map(LogsAgent::status);
    let status = agent
        .as_ref()
        .map(aggregate_status)
        .unwrap_or(HealthStatus::Healthy);

    DaemonHealth {
        status,
        uptime_secs: start_time.elapsed().as_secs(),
        agent,
    }
}

/// Spawn a background task that periodically logs aggregated health
/// and refreshes the uptime gauge.
///
/// Health transitions are logged at `warn`, steady state at `debug`.
pub fn spawn_health_reporter(
    agent: Option<Arc<LogsAgent>>,
    start_time: Instant,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut previous = HealthStatus::Healthy;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = daemon_health(agent.as_deref(), start_time);
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(report.uptime_secs as f64);

                    if report.status != previous {
                        if report.status.is_healthy() {
                            tracing::info!(status = %report.status, "daemon health recovered");
                        } else {
                            tracing::warn!(status = %report.status, "daemon health changed");
                        }
                        previous = report.status;
                    } else {
                        tracing::debug!(status = %report.status, uptime_secs = report.uptime_secs, "health check");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("health reporter shutting down");
                    break;
                }
            }
        }
    })
}
