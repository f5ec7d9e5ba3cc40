//! Graceful shutdown with a signal escalation ladder.
//!
//! Supervised children are spawned into their own process group, so
//! escalation signals the whole group to catch child-of-child leakage
//! (launch scripts that exec further processes).

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::time::timeout;
use tracing::debug;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

#[cfg(unix)]
use tokio::time::sleep;

/// How long to wait after each group signal before escalating further.
const GROUP_SIGNAL_WAIT: Duration = Duration::from_secs(2);

/// Shut down a child and its process group, escalating as needed.
///
/// # Strategy
/// 1. SIGTERM to the process itself, bounded by `grace`
/// 2. SIGTERM to the whole process group
/// 3. SIGKILL to the whole process group
///
/// The child is reaped before returning (required to avoid zombies).
///
/// # Platform behavior
/// - Unix: signal ladder via the nix crate
/// - Windows: immediate `.kill()` (no graceful shutdown available)
pub async fn shutdown_child_group(mut child: Child, grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        shutdown_unix(&mut child, grace).await
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        child.kill().await?;
        child.wait().await
    }
}

#[cfg(unix)]
async fn shutdown_unix(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    let Some(pid) = child.id() else {
        // Already reaped
        return child.wait().await;
    };
    let nix_pid = Pid::from_raw(pid as i32);

    // Phase 1: SIGTERM to the process, bounded by the grace period
    match signal::kill(nix_pid, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return child.wait().await,
        Err(e) => return Err(io::Error::other(e)),
    }

    if let Ok(result) = timeout(grace, child.wait()).await {
        return result;
    }
    debug!(pid = %pid, "Process ignored SIGTERM, signalling process group");

    // Phase 2: SIGTERM to the whole group (pgid == pid, set at spawn)
    let _ = signal::killpg(nix_pid, Signal::SIGTERM);
    if let Ok(result) = timeout(GROUP_SIGNAL_WAIT, child.wait()).await {
        return result;
    }
    debug!(pid = %pid, "Process group ignored SIGTERM, force killing");

    // Phase 3: SIGKILL the group, then reap
    let _ = signal::killpg(nix_pid, Signal::SIGKILL);
    child.kill().await?;
    child.wait().await
}

/// Kill an orphaned process by PID with SIGTERM → SIGKILL escalation.
///
/// # Differences from `shutdown_child_group`
/// - No `Child` handle, so **cannot reap** the process
/// - Used for cleaning up orphans recorded in stale PID files
///
/// # Returns
/// - `Ok(())` if the process was killed or is already gone
/// - `Err` if it survives SIGKILL (rare) or signalling fails
#[cfg(unix)]
pub async fn kill_pid(pid: u32) -> io::Result<()> {
    let nix_pid = Pid::from_raw(pid as i32);

    // Phase 1: SIGTERM
    match signal::kill(nix_pid, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(()),
        Err(e) => return Err(io::Error::other(e)),
    }

    if poll_for_exit(nix_pid).await {
        return Ok(());
    }

    // Phase 2: SIGKILL
    match signal::kill(nix_pid, Signal::SIGKILL) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(()),
        Err(e) => return Err(io::Error::other(e)),
    }

    if poll_for_exit(nix_pid).await {
        return Ok(());
    }

    Err(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("process {pid} did not exit after SIGKILL"),
    ))
}

#[cfg(not(unix))]
pub async fn kill_pid(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "orphan cleanup not implemented on non-Unix",
    ))
}

/// Poll for up to 2 seconds to verify process exit.
#[cfg(unix)]
async fn poll_for_exit(pid: Pid) -> bool {
    for _ in 0..20 {
        sleep(Duration::from_millis(100)).await;

        match signal::kill(pid, None) {
            Ok(()) => {}                      // still alive
            Err(Errno::ESRCH) => return true, // exited
            Err(_) => {}                      // permission error, assume alive
        }
    }
    false
}
