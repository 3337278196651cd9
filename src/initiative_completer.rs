//! Initiative Completer (§4.9): runs on every `list`/`show` invocation
//! rather than as a background job, since there's no standing
//! process to run one in (§5's scheduling model).

use crate::clock::Clock;
use crate::store::Store;
use crate::store::models::{InitiativeStatus, TaskStatus};

/// Scans every non-completed, non-`branch_base` initiative and
/// transitions it to `completed` once all of its referenced tasks are
/// `completed`. Per-initiative failures are logged and skipped rather
/// than propagated, so a single corrupt record can't block the
/// `list`/`show` path for every other initiative.
pub fn sweep(store: &Store, clock: &dyn Clock) {
    let initiatives = match store.load_all_initiatives() {
        Ok(initiatives) => initiatives,
        Err(err) => {
            tracing::warn!(error = %err, "failed to load initiatives for auto-completion sweep");
            return;
        }
    };

    for initiative in initiatives {
        if initiative.status == InitiativeStatus::Completed {
            continue;
        }
        if initiative.branch_base.is_some() {
            continue;
        }
        if initiative.tasks.is_empty() {
            continue;
        }

        if let Err(err) = try_complete(store, &initiative.id, clock) {
            tracing::warn!(initiative_id = %initiative.id, error = %err, "initiative auto-completion check failed");
        }
    }
}

fn try_complete(store: &Store, initiative_id: &str, clock: &dyn Clock) -> Result<(), crate::errors::StoreError> {
    let mut initiative = store.load_initiative(initiative_id)?;
    if initiative.status == InitiativeStatus::Completed || initiative.branch_base.is_some() {
        return Ok(());
    }

    for task_ref in &initiative.tasks {
        let task = store.load_task(&task_ref.id)?;
        if task.status != TaskStatus::Completed {
            return Ok(());
        }
    }

    initiative.status = InitiativeStatus::Completed;
    initiative.updated_at = clock.now();
    store.save_initiative(&initiative)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::models::{Execution, Initiative, InitiativeTaskRef, Priority, Task, Weight};
    use chrono::Utc;

    fn sample_task(id: &str, status: TaskStatus) -> Task {
        Task {
            id: id.to_string(),
            title: "do the thing".into(),
            description: String::new(),
            weight: Weight::Small,
            status,
            current_phase: String::new(),
            blocked_by: vec![],
            initiative_id: Some("INIT-0001".into()),
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

    fn sample_initiative(task_ids: &[&str]) -> Initiative {
        Initiative {
            id: "INIT-0001".into(),
            title: "ship it".into(),
            vision: String::new(),
            status: InitiativeStatus::Active,
            blocked_by: vec![],
            branch_base: None,
            branch_prefix: None,
            tasks: task_ids
                .iter()
                .map(|id| InitiativeTaskRef {
                    id: id.to_string(),
                    title: "do the thing".into(),
                    stored_status: TaskStatus::Created,
                    depends_on: vec![],
                })
                .collect(),
            decisions: vec![],
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn completes_when_every_referenced_task_is_done() {
        let store = Store::open_in_memory().unwrap();
        store.save_task(&sample_task("TASK-0001", TaskStatus::Completed)).unwrap();
        store.save_task(&sample_task("TASK-0002", TaskStatus::Completed)).unwrap();
        store
            .save_initiative(&sample_initiative(&["TASK-0001", "TASK-0002"]))
            .unwrap();

        sweep(&store, &SystemClock);

        assert_eq!(store.load_initiative("INIT-0001").unwrap().status, InitiativeStatus::Completed);
    }

    #[test]
    fn stays_active_while_any_task_is_pending() {
        let store = Store::open_in_memory().unwrap();
        store.save_task(&sample_task("TASK-0001", TaskStatus::Completed)).unwrap();
        store.save_task(&sample_task("TASK-0002", TaskStatus::Running)).unwrap();
        store
            .save_initiative(&sample_initiative(&["TASK-0001", "TASK-0002"]))
            .unwrap();

        sweep(&store, &SystemClock);

        assert_eq!(store.load_initiative("INIT-0001").unwrap().status, InitiativeStatus::Active);
    }

    #[test]
    fn branch_base_initiatives_are_never_auto_completed() {
        let store = Store::open_in_memory().unwrap();
        store.save_task(&sample_task("TASK-0001", TaskStatus::Completed)).unwrap();
        let mut initiative = sample_initiative(&["TASK-0001"]);
        initiative.branch_base = Some("main".into());
        store.save_initiative(&initiative).unwrap();

        sweep(&store, &SystemClock);

        assert_eq!(store.load_initiative("INIT-0001").unwrap().status, InitiativeStatus::Active);
    }

    #[test]
    fn initiative_with_no_tasks_is_left_alone() {
        let store = Store::open_in_memory().unwrap();
        store.save_initiative(&sample_initiative(&[])).unwrap();

        sweep(&store, &SystemClock);

        assert_eq!(store.load_initiative("INIT-0001").unwrap().status, InitiativeStatus::Active);
    }
}
