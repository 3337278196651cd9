//! CLI command handlers (§6): one module per command group, each a
//! thin layer translating parsed flags into calls against the engine
//! (`scheduler`, `archive`, `gates`, `deps`, ...) and rendering the
//! result to stdout. One free function per command, split across files
//! by command group since this CLI's surface (task lifecycle,
//! initiatives, archives, dependency queries) is wide.

pub mod archive;
pub mod config;
pub mod initiative;
pub mod query;
pub mod task;

use crate::store::models::{Task, TaskStatus};

/// Status a task should be *displayed* as, distinct from its stored
/// status: a `running` task whose recorded executor pid is no longer
/// alive renders as `orphaned` (§5) without ever being written back —
/// only `scheduler::run`'s pre-flight check performs that write, and
/// it normalizes to `interrupted`, not `orphaned`, the next time the
/// task is actually driven forward.
pub fn effective_status(task: &Task) -> TaskStatus {
    if task.status == TaskStatus::Running {
        let alive = task
            .executor_pid
            .map(|pid| crate::liveness::is_same_process(pid, task.executor_start_time))
            .unwrap_or(false);
        if !alive {
            return TaskStatus::Orphaned;
        }
    }
    task.status
}
