//! Read-only inspection commands (§6): `status`, `list`, `show`,
//! `deps`, `log`. These never mutate the Store beyond the Initiative
//! Completer's opportunistic sweep, which every one of them runs first
//! so a listing never shows a stale `active` initiative whose tasks
//! have all quietly finished.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::clock::Clock;
use crate::deps::{self, Classification};
use crate::errors::OrcError;
use crate::initiative_completer;
use crate::liveness;
use crate::store::Store;
use crate::store::models::{Initiative, Task, TaskStatus};

pub enum StatusFilter {
    Initiative(String),
    Unassigned,
}

/// `orc list`: every task, most-recently-updated first.
pub fn list(store: &Store, clock: &dyn Clock, project_root: &Path) -> Result<Vec<Task>, OrcError> {
    initiative_completer::sweep(store, clock);
    liveness::reap_orphaned_worktrees(store, project_root);
    let mut tasks = store.load_all_tasks()?;
    tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(tasks)
}

/// `orc show <task-id>`: the full task record plus its phase history.
pub fn show(store: &Store, clock: &dyn Clock, task_id: &str, project_root: &Path) -> Result<Task, OrcError> {
    initiative_completer::sweep(store, clock);
    liveness::reap_orphaned_worktrees(store, project_root);
    store.load_task(task_id).map_err(OrcError::from)
}

/// `orc status [--initiative ID] [--unassigned] [--all]`: tasks
/// filtered to one initiative, to unassigned tasks, or (with `--all`)
/// every non-terminal task.
pub fn status(
    store: &Store,
    clock: &dyn Clock,
    filter: Option<StatusFilter>,
    all: bool,
    project_root: &Path,
) -> Result<Vec<Task>, OrcError> {
    initiative_completer::sweep(store, clock);
    liveness::reap_orphaned_worktrees(store, project_root);
    let tasks = match filter {
        Some(StatusFilter::Initiative(id)) => store.load_tasks_by_initiative(&id)?,
        Some(StatusFilter::Unassigned) => store
            .load_all_tasks()?
            .into_iter()
            .filter(|t| t.initiative_id.is_none())
            .collect(),
        None => store.load_all_tasks()?,
    };
    Ok(if all {
        tasks
    } else {
        tasks.into_iter().filter(|t| !t.status.is_terminal()).collect()
    })
}

/// Polls `status` every `interval` until canceled by Ctrl-C, calling
/// `render` with each snapshot. Used by `orc status --watch`; kept
/// generic over the render callback so the CLI layer owns formatting.
pub async fn watch(
    store: &Store,
    clock: &dyn Clock,
    filter_factory: impl Fn() -> Option<StatusFilter>,
    all: bool,
    interval: Duration,
    project_root: &Path,
    mut render: impl FnMut(&[Task]),
) -> Result<(), OrcError> {
    loop {
        let tasks = status(store, clock, filter_factory(), all, project_root)?;
        render(&tasks);
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum DepsView {
    Flat,
    Tree,
    Graph,
}

#[derive(Debug)]
pub struct DepsReport {
    pub classification: Vec<(String, Classification)>,
    pub edges: Vec<(String, String)>,
}

/// `orc deps [--tree|--graph]`: classifies every task as ready,
/// blocked, or (for terminal tasks) other, treating a reference to a
/// terminal or unknown task as already satisfied — but never a
/// reference to a missing task as satisfied.
pub fn deps_report(store: &Store) -> Result<DepsReport, OrcError> {
    let all_tasks = store.load_all_tasks()?;
    let satisfied: HashSet<String> = all_tasks
        .iter()
        .filter(|t| t.status.is_terminal())
        .map(|t| t.id.clone())
        .collect();

    let classification = deps::classify(&all_tasks, &satisfied);
    let mut rows: Vec<(String, Classification)> = classification
        .into_iter()
        .map(|(id, c)| (id.to_string(), c))
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    let mut edges = Vec::new();
    for task in all_tasks.iter().filter(|t| !t.status.is_terminal()) {
        for dep in deps::unmet_dependencies(task, &satisfied) {
            edges.push((dep.to_string(), task.id.clone()));
        }
    }

    Ok(DepsReport { classification: rows, edges })
}

/// `orc log <task-id>`: every transcript message across all phases, in
/// recorded order.
pub fn log(store: &Store, task_id: &str) -> Result<Vec<crate::store::models::TranscriptMessage>, OrcError> {
    store.load_task(task_id)?;
    store.get_transcripts(task_id).map_err(OrcError::from)
}

/// `orc log --follow`: polls for new transcript rows past `since_len`
/// until canceled, handing each new batch to `render`.
pub async fn follow_log(
    store: &Store,
    task_id: &str,
    interval: Duration,
    mut render: impl FnMut(&[crate::store::models::TranscriptMessage]),
) -> Result<(), OrcError> {
    let mut seen = 0usize;
    loop {
        let transcripts = store.get_transcripts(task_id)?;
        if transcripts.len() > seen {
            render(&transcripts[seen..]);
            seen = transcripts.len();
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

pub fn list_initiatives(store: &Store, clock: &dyn Clock, project_root: &Path) -> Result<Vec<Initiative>, OrcError> {
    initiative_completer::sweep(store, clock);
    liveness::reap_orphaned_worktrees(store, project_root);
    store.load_all_initiatives().map_err(OrcError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::models::{Execution, Priority, Weight};
    use chrono::Utc;

    fn sample_task(id: &str, blocked_by: &[&str], status: TaskStatus) -> Task {
        Task {
            id: id.to_string(),
            title: "t".into(),
            description: String::new(),
            weight: Weight::Trivial,
            status,
            current_phase: String::new(),
            blocked_by: blocked_by.iter().map(|s| s.to_string()).collect(),
            initiative_id: None,
            priority: Priority::Normal,
            executor_pid: None,
            executor_hostname: None,
            executor_started_at: None,
            executor_start_time: None,
            execution: Execution::default(),
            branch: format!("orc/{id}"),
            target_branch: "main".into(),
            workflow_id: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn deps_report_marks_blocked_on_pending_dependency() {
        let store = Store::open_in_memory().unwrap();
        store.save_task(&sample_task("TASK-0001", &[], TaskStatus::Planned)).unwrap();
        store
            .save_task(&sample_task("TASK-0002", &["TASK-0001"], TaskStatus::Planned))
            .unwrap();

        let report = deps_report(&store).unwrap();
        let blocked = report
            .classification
            .iter()
            .find(|(id, _)| id == "TASK-0002")
            .unwrap();
        assert!(matches!(blocked.1, Classification::Blocked));
        assert_eq!(report.edges, vec![("TASK-0001".to_string(), "TASK-0002".to_string())]);
    }

    #[test]
    fn deps_report_treats_completed_dependency_as_satisfied() {
        let store = Store::open_in_memory().unwrap();
        store.save_task(&sample_task("TASK-0001", &[], TaskStatus::Completed)).unwrap();
        store
            .save_task(&sample_task("TASK-0002", &["TASK-0001"], TaskStatus::Planned))
            .unwrap();

        let report = deps_report(&store).unwrap();
        let row = report.classification.iter().find(|(id, _)| id == "TASK-0002").unwrap();
        assert!(matches!(row.1, Classification::Ready));
    }

    #[test]
    fn status_excludes_terminal_tasks_unless_all() {
        let store = Store::open_in_memory().unwrap();
        store.save_task(&sample_task("TASK-0001", &[], TaskStatus::Completed)).unwrap();
        store.save_task(&sample_task("TASK-0002", &[], TaskStatus::Planned)).unwrap();
        let clock = SystemClock;
        let dir = tempfile::tempdir().unwrap();

        let active = status(&store, &clock, None, false, dir.path()).unwrap();
        assert_eq!(active.len(), 1);
        let everything = status(&store, &clock, None, true, dir.path()).unwrap();
        assert_eq!(everything.len(), 2);
    }
}
