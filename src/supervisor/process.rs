//! OS process control: liveness checks and process-tree termination.
//!
//! The worker is an opaque owned resource identified by pid — possibly a pid
//! recovered from a record written before this server process even started.
//! Liveness is checked by process-existence queries, and termination is the
//! polite-then-forceful sequence: TERM to every descendant (children first,
//! so the worker cannot respawn them), a grace period, then KILL for any
//! survivor. OCR engines fork model-server children, which is why killing
//! just the recorded pid is not enough.

use crate::error::BookmillError;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Whether a process with this pid currently exists.
pub fn pid_alive(pid: u32) -> bool {
    let target = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    sys.process(target).is_some()
}

/// All pids in the subtree rooted at `root`, deepest-first, root last.
fn process_tree(sys: &System, root: Pid) -> Vec<Pid> {
    let mut tree = vec![root];
    let mut frontier = vec![root];

    while let Some(parent) = frontier.pop() {
        for (pid, process) in sys.processes() {
            if process.parent() == Some(parent) && !tree.contains(pid) {
                tree.push(*pid);
                frontier.push(*pid);
            }
        }
    }

    // Children before parents: reversing the BFS order terminates leaves
    // first so nothing re-parents or respawns mid-kill.
    tree.reverse();
    tree
}

/// Terminate the process tree rooted at `pid`: TERM everything, wait up to
/// `grace`, KILL whatever survived.
///
/// Returns [`BookmillError::ProcessGone`] when the root process does not
/// exist — the caller decides whether that is an error (cancel of a dead
/// job) or good news (reconciliation).
pub async fn kill_tree(pid: u32, grace: Duration) -> Result<(), BookmillError> {
    let root = Pid::from_u32(pid);
    let mut sys = System::new_all();

    if sys.process(root).is_none() {
        return Err(BookmillError::ProcessGone { pid });
    }

    let tree = process_tree(&sys, root);
    info!("Terminating process tree of pid {pid} ({} processes)", tree.len());

    for member in &tree {
        if let Some(process) = sys.process(*member) {
            // TERM where supported; fall back to KILL on platforms without it.
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
        }
    }

    let deadline = Instant::now() + grace;
    loop {
        sleep(Duration::from_millis(100)).await;
        sys.refresh_processes(ProcessesToUpdate::Some(&tree), true);

        let survivors: Vec<Pid> = tree
            .iter()
            .copied()
            .filter(|p| sys.process(*p).is_some())
            .collect();

        if survivors.is_empty() {
            debug!("Process tree of pid {pid} exited within grace period");
            return Ok(());
        }

        if Instant::now() >= deadline {
            warn!(
                "{} process(es) survived the grace period, escalating to KILL",
                survivors.len()
            );
            for survivor in survivors {
                if let Some(process) = sys.process(survivor) {
                    process.kill();
                }
            }
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn absurd_pid_is_dead() {
        // Pid numbers wrap long before this on every supported platform.
        assert!(!pid_alive(u32::MAX - 7));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_tree_terminates_spawned_process() {
        let child = std::process::Command::new("sleep")
            .arg("120")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();
        assert!(pid_alive(pid));

        kill_tree(pid, Duration::from_secs(2)).await.unwrap();

        // Give the OS a moment to reap.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut reaped = child;
        let status = reaped.wait().unwrap();
        assert!(!status.success());
        assert!(!pid_alive(pid));
    }

    #[tokio::test]
    async fn kill_tree_of_dead_pid_reports_gone() {
        let err = kill_tree(u32::MAX - 7, Duration::from_millis(100)).await;
        assert!(matches!(err, Err(BookmillError::ProcessGone { .. })));
    }
}
