//! Crash/orphan detection (§5): is the process recorded in
//! `Task.executor_pid` actually the one that started this phase, or a
//! different process that happens to reuse the same PID?
//!
//! Grounded on the pack's `at-core::lockfile` stale-holder check
//! (`kill(pid, 0)` liveness, auto-reap on death), extended with a
//! process start-time comparison via `sysinfo` so a PID recycled by
//! the OS after a crash isn't mistaken for the still-running executor
//! — `libc::kill(pid, 0)` alone can't distinguish the two.

use std::path::Path;

use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::store::Store;

/// Whether the process recorded as the executor holder is still the
/// one that was spawned, matched by pid *and* start time.
pub fn is_same_process(pid: u32, recorded_start_unix_secs: Option<u64>) -> bool {
    let mut system = System::new();
    let sysinfo_pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[sysinfo_pid]), true);

    let Some(process) = system.process(sysinfo_pid) else {
        return false;
    };

    match recorded_start_unix_secs {
        Some(recorded) => process.start_time() == recorded,
        // No start time recorded (older task row): fall back to mere
        // existence, matching the pack's plain liveness check.
        None => true,
    }
}

/// Start time of the current process, recorded on the task at spawn
/// time (§4.7) so a later liveness check can tell a crash-and-reused
/// PID apart from the executor that's actually still running.
pub fn current_process_start_time() -> u64 {
    let mut system = System::new();
    let pid = Pid::from_u32(std::process::id());
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.start_time()).unwrap_or(0)
}

/// Sends `signal` to `pid` via the process table, used both by the
/// Executor's own cancellation path (SIGTERM-then-grace-then-SIGKILL)
/// and by the `pause`/`stop` CLI commands acting on a different `orc
/// run` process recorded as a task's executor holder. Returns whether
/// the process was found and the signal accepted.
pub fn send_signal(pid: u32, signal: sysinfo::Signal) -> bool {
    let mut system = System::new();
    let sysinfo_pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[sysinfo_pid]), true);
    match system.process(sysinfo_pid) {
        Some(process) => process.kill_with(signal).unwrap_or(false),
        None => false,
    }
}

/// Reaps git worktrees whose owning task is gone from the Store, the
/// same best-effort, log-and-continue shape as
/// `initiative_completer::sweep`. Run opportunistically from the
/// read-only CLI paths (`list`/`show`/`status`/...) rather than as a
/// background job, matching §5's scheduling model.
pub fn reap_orphaned_worktrees(store: &Store, project_root: &Path) {
    let live_task_ids: Vec<String> = match store.load_all_tasks() {
        Ok(tasks) => tasks.into_iter().map(|t| t.id).collect(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to load tasks for orphaned worktree sweep");
            return;
        }
    };

    match crate::worktree::reap_orphaned(project_root, &live_task_ids) {
        Ok(reaped) => {
            for name in reaped {
                tracing::info!(worktree = %name, "reaped orphaned worktree");
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to reap orphaned worktrees");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive_and_matches_its_own_start_time() {
        let pid = std::process::id();
        let start = current_process_start_time();
        assert!(is_same_process(pid, Some(start)));
    }

    #[test]
    fn bogus_pid_is_not_alive() {
        assert!(!is_same_process(4_000_000, Some(0)));
    }

    #[test]
    fn mismatched_start_time_is_treated_as_a_different_process() {
        let pid = std::process::id();
        assert!(!is_same_process(pid, Some(1)));
    }

    #[test]
    fn reap_orphaned_worktrees_is_best_effort_outside_a_repo() {
        let store = Store::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        // No git repo at `dir.path()`: the sweep should log and return
        // rather than propagate an error.
        reap_orphaned_worktrees(&store, dir.path());
    }
}
