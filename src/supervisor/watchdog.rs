//! Background watchdog for the capture process.
//!
//! One loop per supervisor. Each cycle it checks, in order: unexpected
//! death (crash recovery), operator stop (idle), scheduled restart age,
//! and the freeze signal. Restarts performed here go through
//! `stop_process`/`start_process` so the loop never joins itself.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::ProcessSupervisor;
use crate::config::WatchdogConfig;

/// Backoff after an unexpected cycle failure. The loop must outlive any
/// single bad cycle.
const ERROR_BACKOFF: Duration = Duration::from_secs(10);

/// How long `stop()` waits for the loop to exit before detaching
const JOIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Constant policy for the supervisor's lifetime
#[derive(Debug, Clone)]
pub struct WatchdogPolicy {
    /// Maximum process age before a scheduled restart
    pub restart_interval: Duration,
    /// Cycle cadence; also bounds how late a stop request is observed
    pub frozen_check_interval: Duration,
    /// Maximum health-signal age before the process counts as frozen
    pub frozen_timeout: Duration,
}

impl WatchdogPolicy {
    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self {
            restart_interval: Duration::from_secs(config.restart_interval_secs),
            frozen_check_interval: Duration::from_secs(config.frozen_check_interval_secs),
            frozen_timeout: Duration::from_secs(config.frozen_timeout_secs),
        }
    }
}

impl Default for WatchdogPolicy {
    fn default() -> Self {
        Self {
            restart_interval: Duration::from_secs(3600),
            frozen_check_interval: Duration::from_secs(30),
            frozen_timeout: Duration::from_secs(300),
        }
    }
}

/// Handle for cooperatively stopping the watchdog loop
pub struct WatchdogHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl WatchdogHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to exit and join it with a bounded timeout
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        if timeout(JOIN_TIMEOUT, self.task).await.is_err() {
            warn!("watchdog did not stop within {JOIN_TIMEOUT:?}, detaching");
        }
    }
}

pub(crate) fn spawn(supervisor: Arc<ProcessSupervisor>) -> WatchdogHandle {
    let (stop_tx, stop_rx) = mpsc::channel(1);
    let task = tokio::spawn(run(supervisor, stop_rx));
    WatchdogHandle { stop_tx, task }
}

async fn run(supervisor: Arc<ProcessSupervisor>, mut stop_rx: mpsc::Receiver<()>) {
    info!(
        restart_interval_secs = supervisor.policy.restart_interval.as_secs(),
        frozen_timeout_secs = supervisor.policy.frozen_timeout.as_secs(),
        "watchdog started"
    );

    'outer: loop {
        // Sleep in 1s slices so a stop request is observed promptly. A
        // floor on the cadence keeps a zero interval from spinning.
        let mut remaining = supervisor
            .policy
            .frozen_check_interval
            .max(Duration::from_millis(100));
        while remaining > Duration::ZERO {
            if stop_rx.try_recv().is_ok() {
                break 'outer;
            }
            let step = remaining.min(Duration::from_secs(1));
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
        if stop_rx.try_recv().is_ok() {
            break;
        }

        if let Err(e) = cycle(&supervisor).await {
            error!("watchdog cycle failed: {e:#}");
            tokio::time::sleep(ERROR_BACKOFF).await;
        }
    }

    info!("watchdog stopped");
}

enum Action {
    /// Process died on its own, or a prior recovery attempt failed;
    /// (re)start it
    CrashRestart,
    /// Stopped by an operator; leave it alone
    Idle,
    /// Process is older than the restart interval
    PeriodicRestart { uptime_secs: u64 },
    /// Health signal went stale; the process is hung, not crashed
    FrozenRestart { stale_secs: u64 },
    None,
}

async fn cycle(supervisor: &Arc<ProcessSupervisor>) -> Result<()> {
    // Decide under the state lock, act after releasing it
    let action = {
        let mut state = supervisor.state.lock().await;
        let expect_running = state.expect_running;
        match state.handle.as_mut() {
            // No handle but a start is still on record: a crash whose
            // recovery has not succeeded yet. Keep trying.
            None if expect_running => Action::CrashRestart,
            None => Action::Idle,
            Some(handle) => {
                if handle.child.try_wait()?.is_some() {
                    // Reap the stale handle; expect_running stays set so
                    // a failed restart is retried on later cycles
                    state.handle = None;
                    Action::CrashRestart
                } else if handle.started_at.elapsed() >= supervisor.policy.restart_interval {
                    Action::PeriodicRestart {
                        uptime_secs: handle.started_at.elapsed().as_secs(),
                    }
                } else {
                    match health_signal_age(&supervisor.spec.stderr_log) {
                        Some(age) if age >= supervisor.policy.frozen_timeout => {
                            Action::FrozenRestart {
                                stale_secs: age.as_secs(),
                            }
                        }
                        _ => Action::None,
                    }
                }
            }
        }
    };

    match action {
        Action::CrashRestart => {
            warn!("capture process died unexpectedly, restarting");
            tokio::time::sleep(supervisor.opts.restart_delay).await;
            supervisor.start_process().await?;
        }
        Action::PeriodicRestart { uptime_secs } => {
            info!(uptime_secs, "scheduled restart of capture process");
            supervisor.stop_process().await?;
            tokio::time::sleep(supervisor.opts.restart_delay).await;
            supervisor.start_process().await?;
        }
        Action::FrozenRestart { stale_secs } => {
            warn!(stale_secs, "capture process appears frozen, restarting");
            supervisor.stop_process().await?;
            tokio::time::sleep(supervisor.opts.restart_delay).await;
            supervisor.start_process().await?;
        }
        Action::Idle => {
            debug!("capture process stopped by operator, watchdog idle");
        }
        Action::None => {}
    }

    Ok(())
}

/// Age of the health-signal file, or `None` if it does not exist yet.
///
/// A missing file means the decoder has not written anything, not that it
/// is frozen.
fn health_signal_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified.elapsed().ok()
}
