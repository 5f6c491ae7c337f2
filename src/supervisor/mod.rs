//! Capture process lifecycle management.
//!
//! A [`ProcessSupervisor`] owns at most one running decoder process at a
//! time. Operator actions (start/stop/restart/status) and the background
//! [`watchdog`] loop all serialize on a single lock around the process
//! state, so two callers can never spawn concurrently.

pub mod launch;
pub mod watchdog;

pub use launch::LaunchSpec;
pub use watchdog::{WatchdogHandle, WatchdogPolicy};

use std::fs::OpenOptions;
use std::process::Stdio;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Errors surfaced to callers of [`ProcessSupervisor::start`].
///
/// A failed start leaves the supervisor usable; a later attempt may succeed.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn {program}: {source} (is it installed and in PATH?)")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("capture process exited during startup (exit code {code:?}); check {log}")]
    ExitedEarly { code: Option<i32>, log: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One spawned decoder process.
///
/// The stderr log descriptor is owned by the child; clearing the handle
/// releases it.
pub(crate) struct ProcessHandle {
    pub(crate) child: Child,
    pub(crate) pid: u32,
    pub(crate) started_at: Instant,
    started_wall: DateTime<Utc>,
}

/// Read-only snapshot of the supervisor, computed on demand
#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub uptime_secs: Option<u64>,
    pub next_restart_eta_secs: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub watchdog_active: bool,
    pub frequency: f64,
    pub gain: f64,
    pub device_index: u32,
}

/// Timing knobs for start/stop, separate from the watchdog policy
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// How long to wait after spawning before confirming the process survived
    pub spawn_grace: Duration,
    /// How long to wait for graceful exit before escalating to SIGKILL
    pub stop_timeout: Duration,
    /// Pause between stop and start during a restart
    pub restart_delay: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            spawn_grace: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(5),
            restart_delay: Duration::from_secs(1),
        }
    }
}

/// Mutable supervisor state, all behind one lock
pub(crate) struct SupervisorState {
    pub(crate) handle: Option<ProcessHandle>,
    /// Set by a successful start, cleared only by an operator stop. A
    /// crash clears the handle but not this flag, so the watchdog keeps
    /// retrying recovery even after a failed restart attempt.
    pub(crate) expect_running: bool,
}

/// Supervises the external capture process
pub struct ProcessSupervisor {
    pub(crate) spec: LaunchSpec,
    pub(crate) policy: WatchdogPolicy,
    pub(crate) opts: SupervisorOptions,
    pub(crate) state: Mutex<SupervisorState>,
    watchdog: Mutex<Option<WatchdogHandle>>,
    // Handed to the watchdog task, which needs its own strong reference
    self_ref: Weak<ProcessSupervisor>,
}

impl ProcessSupervisor {
    pub fn new(spec: LaunchSpec, policy: WatchdogPolicy, opts: SupervisorOptions) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            spec,
            policy,
            opts,
            state: Mutex::new(SupervisorState {
                handle: None,
                expect_running: false,
            }),
            watchdog: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Start the capture process and, if needed, the watchdog loop.
    ///
    /// No-op with a warning if the process is already running.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        self.start_process().await?;
        self.ensure_watchdog().await;
        Ok(())
    }

    /// Spawn the process without touching the watchdog.
    ///
    /// The watchdog loop uses this directly so its own restarts never try
    /// to respawn the loop they are running in.
    pub(crate) async fn start_process(&self) -> Result<(), SupervisorError> {
        let mut state = self.state.lock().await;

        if let Some(handle) = state.handle.as_mut() {
            if handle.child.try_wait()?.is_none() {
                warn!(pid = handle.pid, "capture process is already running");
                return Ok(());
            }
            // Stale handle from an exit nobody observed yet
            state.handle = None;
        }

        std::fs::create_dir_all(&self.spec.staging_dir)?;

        // dsd-fme writes its primary output to stderr, not stdout
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.spec.stderr_log)?;

        // A fresh process gets the full frozen timeout before a leftover
        // stale mtime can count against it
        if let Err(e) = log_file.set_modified(std::time::SystemTime::now()) {
            debug!("could not refresh health signal timestamp: {e}");
        }

        info!("starting capture process: {}", self.spec.render());

        let mut child = Command::new(&self.spec.program)
            .args(self.spec.command_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log_file))
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: self.spec.program.clone(),
                source,
            })?;

        // id() is None only once the child has been reaped
        let Some(pid) = child.id() else {
            return Err(SupervisorError::ExitedEarly {
                code: None,
                log: self.spec.stderr_log.display().to_string(),
            });
        };

        // Give it a moment, then confirm it did not exit immediately
        tokio::time::sleep(self.opts.spawn_grace).await;

        if let Some(status) = child.try_wait()? {
            error!(
                code = status.code(),
                "capture process exited during startup; check {}",
                self.spec.stderr_log.display()
            );
            return Err(SupervisorError::ExitedEarly {
                code: status.code(),
                log: self.spec.stderr_log.display().to_string(),
            });
        }

        info!(pid, "capture process started");
        info!(
            "monitoring DMR on {} MHz (gain {}) | logs: {} | recordings: {}",
            self.spec.frequency,
            self.spec.gain,
            self.spec.stderr_log.display(),
            self.spec.staging_dir.display()
        );

        state.handle = Some(ProcessHandle {
            child,
            pid,
            started_at: Instant::now(),
            started_wall: Utc::now(),
        });
        state.expect_running = true;

        Ok(())
    }

    /// Stop the capture process.
    ///
    /// With `stop_watchdog` the watchdog loop is signalled and joined
    /// first, so a stopped supervisor stays stopped. Either variant clears
    /// the expect-running flag; the watchdog's own restarts go through
    /// [`Self::stop_process`] instead and leave it set.
    pub async fn stop(&self, stop_watchdog: bool) -> Result<(), SupervisorError> {
        if stop_watchdog {
            let handle = self.watchdog.lock().await.take();
            if let Some(handle) = handle {
                handle.stop().await;
            }
        }
        // An operator stop is deliberate; the watchdog must not undo it
        self.state.lock().await.expect_running = false;
        self.stop_process().await
    }

    pub(crate) async fn stop_process(&self) -> Result<(), SupervisorError> {
        let mut state = self.state.lock().await;

        let Some(mut handle) = state.handle.take() else {
            warn!("capture process is not running");
            return Ok(());
        };

        info!(pid = handle.pid, "stopping capture process");
        terminate(handle.pid);

        match timeout(self.opts.stop_timeout, handle.child.wait()).await {
            Ok(Ok(status)) => {
                info!(code = status.code(), "capture process stopped gracefully");
            }
            Ok(Err(e)) => {
                error!("error waiting for capture process exit: {e}");
            }
            Err(_) => {
                warn!(
                    pid = handle.pid,
                    "capture process did not stop within {:?}, force killing", self.opts.stop_timeout
                );
                handle.child.start_kill()?;
                let _ = handle.child.wait().await;
                info!("capture process force killed");
            }
        }

        // Handle dropped here, releasing the stderr log descriptor
        Ok(())
    }

    /// Stop, pause briefly, and start again. Keeps the watchdog running.
    pub async fn restart(&self) -> Result<(), SupervisorError> {
        info!("restarting capture process");
        self.stop(false).await?;
        tokio::time::sleep(self.opts.restart_delay).await;
        self.start().await
    }

    /// True iff a handle exists and the underlying process has not exited
    pub async fn is_running(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.handle.as_mut() {
            Some(handle) => matches!(handle.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Compute a consistent status snapshot. Never mutates state.
    pub async fn status(&self) -> ProcessStatus {
        let watchdog_active = self.watchdog_active().await;
        let mut state = self.state.lock().await;

        let mut live = None;
        if let Some(handle) = state.handle.as_mut() {
            if matches!(handle.child.try_wait(), Ok(None)) {
                live = Some((
                    handle.pid,
                    handle.started_at.elapsed().as_secs(),
                    handle.started_wall,
                ));
            }
        }

        let (running, pid, uptime_secs, started_at) = match live {
            Some((pid, uptime, wall)) => (true, Some(pid), Some(uptime), Some(wall)),
            None => (false, None, None, None),
        };

        let next_restart_eta_secs = uptime_secs.filter(|_| watchdog_active).map(|uptime| {
            self.policy
                .restart_interval
                .as_secs()
                .saturating_sub(uptime)
        });

        ProcessStatus {
            running,
            pid,
            uptime_secs,
            next_restart_eta_secs,
            started_at,
            watchdog_active,
            frequency: self.spec.frequency,
            gain: self.spec.gain,
            device_index: self.spec.device_index,
        }
    }

    pub async fn watchdog_active(&self) -> bool {
        self.watchdog
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    async fn ensure_watchdog(&self) {
        let Some(supervisor) = self.self_ref.upgrade() else {
            return;
        };
        let mut slot = self.watchdog.lock().await;
        let active = slot
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);
        if !active {
            *slot = Some(watchdog::spawn(supervisor));
        }
    }
}

/// Request graceful termination. Escalation to SIGKILL happens in
/// [`ProcessSupervisor::stop_process`] after the bounded wait.
#[cfg(unix)]
fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
    debug!(pid, "sent SIGTERM");
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {
    // No graceful signal available; the bounded wait will escalate to kill
}
