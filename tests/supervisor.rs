//! Supervisor Integration Tests
//!
//! Runs the supervisor against small shell scripts standing in for the
//! decoder: a long sleep for the happy path, immediate exits for launch
//! failures, and externally killed processes for crash recovery.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use callkeeper::{LaunchSpec, ProcessSupervisor, SupervisorError, SupervisorOptions, WatchdogPolicy};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn spec_for(dir: &Path, program: &Path) -> LaunchSpec {
    LaunchSpec {
        program: program.display().to_string(),
        frequency: 461.375,
        gain: 32.0,
        device_index: 0,
        staging_dir: dir.join("temp"),
        decode_log: dir.join("dmr_log.jsonl"),
        event_log: dir.join("events.txt"),
        stderr_log: dir.join("dsd-fme.jsonl"),
    }
}

fn fast_opts() -> SupervisorOptions {
    SupervisorOptions {
        spawn_grace: Duration::from_millis(100),
        stop_timeout: Duration::from_secs(2),
        restart_delay: Duration::from_millis(100),
    }
}

/// Policy whose watchdog cycles quickly but never restarts on its own
fn quiet_policy() -> WatchdogPolicy {
    WatchdogPolicy {
        restart_interval: Duration::from_secs(3600),
        frozen_check_interval: Duration::from_millis(300),
        frozen_timeout: Duration::from_secs(3600),
    }
}

fn supervisor(spec: LaunchSpec, policy: WatchdogPolicy) -> Arc<ProcessSupervisor> {
    ProcessSupervisor::new(spec, policy, fast_opts())
}

/// Poll until the supervised pid differs from `initial`, or panic
async fn wait_for_new_pid(supervisor: &Arc<ProcessSupervisor>, initial: u32) -> u32 {
    for _ in 0..200 {
        let status = supervisor.status().await;
        if let Some(pid) = status.pid {
            if pid != initial {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("supervised process was never restarted (pid stayed {initial})");
}

#[tokio::test]
async fn test_fresh_supervisor_status() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "decoder.sh", "exec sleep 30");
    let sup = supervisor(spec_for(temp.path(), &script), quiet_policy());

    let status = sup.status().await;
    assert!(!status.running);
    assert_eq!(status.pid, None);
    assert_eq!(status.uptime_secs, None);
    assert_eq!(status.next_restart_eta_secs, None);
    assert!(!status.watchdog_active);
    assert_eq!(status.frequency, 461.375);

    assert!(!sup.is_running().await);
}

#[tokio::test]
async fn test_start_and_stop() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "decoder.sh", "exec sleep 30");
    let sup = supervisor(spec_for(temp.path(), &script), quiet_policy());

    sup.start().await.unwrap();
    assert!(sup.is_running().await);

    let status = sup.status().await;
    assert!(status.running);
    assert!(status.pid.unwrap() > 0);
    assert!(status.uptime_secs.unwrap() <= 1);
    assert!(status.started_at.is_some());
    assert!(status.watchdog_active);
    // Scheduled restart is an hour out
    let eta = status.next_restart_eta_secs.unwrap();
    assert!(eta > 3590 && eta <= 3600, "eta was {eta}");

    // Stderr log opened in append mode at spawn
    assert!(temp.path().join("dsd-fme.jsonl").exists());
    // Staging directory created on demand
    assert!(temp.path().join("temp").is_dir());

    sup.stop(true).await.unwrap();
    assert!(!sup.is_running().await);

    let status = sup.status().await;
    assert!(!status.running);
    assert_eq!(status.pid, None);
    assert!(!status.watchdog_active);
}

#[tokio::test]
async fn test_uptime_increases_while_running() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "decoder.sh", "exec sleep 30");
    let sup = supervisor(spec_for(temp.path(), &script), quiet_policy());

    sup.start().await.unwrap();
    let first = sup.status().await.uptime_secs.unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let second = sup.status().await.uptime_secs.unwrap();
    assert!(second > first, "uptime did not increase: {first} -> {second}");

    sup.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_start_is_noop_when_already_running() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "decoder.sh", "exec sleep 30");
    let sup = supervisor(spec_for(temp.path(), &script), quiet_policy());

    sup.start().await.unwrap();
    let pid = sup.status().await.pid.unwrap();

    // Second start is a warning, not an error, and spawns nothing
    sup.start().await.unwrap();
    assert_eq!(sup.status().await.pid.unwrap(), pid);

    sup.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_operator_restart_replaces_process() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "decoder.sh", "exec sleep 30");
    let sup = supervisor(spec_for(temp.path(), &script), quiet_policy());

    sup.start().await.unwrap();
    let pid = sup.status().await.pid.unwrap();

    sup.restart().await.unwrap();

    let status = sup.status().await;
    assert!(status.running);
    assert_ne!(status.pid.unwrap(), pid);
    assert!(status.uptime_secs.unwrap() <= 1);
    assert!(status.watchdog_active);

    sup.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_stop_when_not_running_is_noop() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "decoder.sh", "exec sleep 30");
    let sup = supervisor(spec_for(temp.path(), &script), quiet_policy());

    sup.stop(true).await.unwrap();
    sup.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_missing_program_is_launch_error() {
    let temp = TempDir::new().unwrap();
    let spec = spec_for(temp.path(), Path::new("/nonexistent/decoder"));
    let sup = supervisor(spec, quiet_policy());

    let err = sup.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn { .. }), "{err}");

    // The failed start retains nothing
    assert!(!sup.is_running().await);
    assert!(!sup.status().await.watchdog_active);
}

#[tokio::test]
async fn test_immediate_exit_is_launch_error() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "decoder.sh", "exit 7");
    let sup = supervisor(spec_for(temp.path(), &script), quiet_policy());

    let err = sup.start().await.unwrap_err();
    match err {
        SupervisorError::ExitedEarly { code, .. } => assert_eq!(code, Some(7)),
        other => panic!("expected ExitedEarly, got {other}"),
    }
    assert!(!sup.is_running().await);
}

#[tokio::test]
async fn test_supervisor_usable_after_failed_start() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("broken");
    std::fs::write(&marker, b"").unwrap();

    let body = format!(
        "if [ -e {} ]; then exit 1; fi\nexec sleep 30",
        marker.display()
    );
    let script = write_script(temp.path(), "decoder.sh", &body);
    let sup = supervisor(spec_for(temp.path(), &script), quiet_policy());

    assert!(sup.start().await.is_err());

    // Operator fixes the environment; the same supervisor starts fine
    std::fs::remove_file(&marker).unwrap();
    sup.start().await.unwrap();
    assert!(sup.is_running().await);

    sup.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_watchdog_restarts_after_crash() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "decoder.sh", "exec sleep 30");
    let sup = supervisor(spec_for(temp.path(), &script), quiet_policy());

    sup.start().await.unwrap();
    let pid = sup.status().await.pid.unwrap();

    // Simulate a crash; no external trigger follows
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }

    let new_pid = wait_for_new_pid(&sup, pid).await;
    assert_ne!(new_pid, pid);
    assert!(sup.is_running().await);

    sup.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_watchdog_retries_after_failed_crash_recovery() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("decoder-broken");
    let body = format!(
        "if [ -e {} ]; then exit 1; fi\nexec sleep 30",
        marker.display()
    );
    let script = write_script(temp.path(), "decoder.sh", &body);
    let sup = supervisor(spec_for(temp.path(), &script), quiet_policy());

    sup.start().await.unwrap();
    let pid = sup.status().await.pid.unwrap();

    // Crash the decoder and leave it broken, so the first recovery fails
    std::fs::write(&marker, b"").unwrap();
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }

    // The watchdog observes the crash and at least one recovery attempt
    // fails while the decoder stays broken
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!sup.is_running().await);

    // Decoder fixed; a later cycle must pick recovery back up on its own
    std::fs::remove_file(&marker).unwrap();
    let new_pid = wait_for_new_pid(&sup, pid).await;
    assert_ne!(new_pid, pid);

    sup.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_start_resets_stale_health_signal() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "decoder.sh", "exec sleep 30");
    let policy = WatchdogPolicy {
        restart_interval: Duration::from_secs(3600),
        frozen_check_interval: Duration::from_millis(300),
        frozen_timeout: Duration::from_secs(60),
    };
    let sup = supervisor(spec_for(temp.path(), &script), policy);

    // Stale log left over from a previous run
    let log = temp.path().join("dsd-fme.jsonl");
    std::fs::write(&log, b"old\n").unwrap();
    let stale = filetime::FileTime::from_unix_time(
        filetime::FileTime::now().unix_seconds() - 3600,
        0,
    );
    filetime::set_file_mtime(&log, stale).unwrap();

    sup.start().await.unwrap();
    let pid = sup.status().await.pid.unwrap();

    // Several cycles pass; the leftover mtime must not count as frozen
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(sup.status().await.pid.unwrap(), pid);

    sup.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_watchdog_leaves_operator_stop_alone() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "decoder.sh", "exec sleep 30");
    let sup = supervisor(spec_for(temp.path(), &script), quiet_policy());

    sup.start().await.unwrap();
    // Stop the process but leave the watchdog running
    sup.stop(false).await.unwrap();
    assert!(sup.status().await.watchdog_active);

    // Several watchdog cycles pass; a cleanly stopped process stays stopped
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(!sup.is_running().await);

    sup.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_periodic_restart_resets_uptime_and_pid() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "decoder.sh", "exec sleep 30");
    let policy = WatchdogPolicy {
        restart_interval: Duration::from_secs(1),
        frozen_check_interval: Duration::from_millis(300),
        frozen_timeout: Duration::from_secs(3600),
    };
    let sup = supervisor(spec_for(temp.path(), &script), policy);

    sup.start().await.unwrap();
    let pid = sup.status().await.pid.unwrap();

    let new_pid = wait_for_new_pid(&sup, pid).await;
    assert_ne!(new_pid, pid);

    let status = sup.status().await;
    assert!(status.running);
    assert!(status.uptime_secs.unwrap() <= 2, "uptime did not reset");

    sup.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_frozen_health_signal_triggers_restart() {
    let temp = TempDir::new().unwrap();
    let script = write_script(temp.path(), "decoder.sh", "exec sleep 30");
    let policy = WatchdogPolicy {
        restart_interval: Duration::from_secs(3600),
        frozen_check_interval: Duration::from_millis(300),
        frozen_timeout: Duration::from_secs(60),
    };
    let sup = supervisor(spec_for(temp.path(), &script), policy);

    sup.start().await.unwrap();
    let pid = sup.status().await.pid.unwrap();

    // Several cycles with a fresh log: no restart
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(sup.status().await.pid.unwrap(), pid);

    // Backdate the health signal past the frozen timeout
    let log = temp.path().join("dsd-fme.jsonl");
    let stale = filetime::FileTime::from_unix_time(
        filetime::FileTime::now().unix_seconds() - 3600,
        0,
    );
    filetime::set_file_mtime(&log, stale).unwrap();

    let new_pid = wait_for_new_pid(&sup, pid).await;
    assert_ne!(new_pid, pid);

    sup.stop(true).await.unwrap();
}
