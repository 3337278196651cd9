//! Initiative commands (§6, §3 Data Model): `new`, `list`, `show`,
//! `edit`, `link`, `unlink`, `decide`, `activate`, `complete`, `run`,
//! `delete`, `plan`. An initiative groups tasks toward a shared vision;
//! most of its state (the `tasks` cross-reference list, `decisions`
//! log) only this module writes to, since `scheduler`/`gates` only
//! ever touch the `Task` side of the relationship.

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::OrcConfig;
use crate::deps::{self, Classification, Dependent};
use crate::errors::OrcError;
use crate::gates::GateOverrides;
use crate::liveness;
use crate::scheduler::RunOutcome;
use crate::store::Store;
use crate::store::models::{Decision, Initiative, InitiativeStatus, InitiativeTaskRef, Task, TaskStatus};

/// `orc initiative new <title>`: drafts a new initiative (§3: initial
/// status is always `draft`, same as a task's `created`).
pub fn new(
    store: &Store,
    clock: &dyn Clock,
    title: &str,
    vision: &str,
    blocked_by: Vec<String>,
) -> Result<String, OrcError> {
    for dep in &blocked_by {
        if !store.initiative_exists(dep)? {
            return Err(OrcError::InvalidArgs(format!("blocked-by initiative {dep} does not exist")));
        }
    }

    let id = crate::identity::next_initiative_id(store)?;
    let initiative = Initiative {
        id: id.clone(),
        title: title.to_string(),
        vision: vision.to_string(),
        status: InitiativeStatus::Draft,
        blocked_by,
        branch_base: None,
        branch_prefix: None,
        tasks: vec![],
        decisions: vec![],
        updated_at: clock.now(),
    };
    store.save_initiative(&initiative)?;
    Ok(id)
}

pub fn list(store: &Store, clock: &dyn Clock, project_root: &Path) -> Result<Vec<Initiative>, OrcError> {
    crate::cmd::query::list_initiatives(store, clock, project_root)
}

/// Loads one initiative after the Initiative Completer's opportunistic
/// sweep, without reaping orphaned worktrees — used internally by the
/// mutation commands below, which don't otherwise touch `project_root`.
fn load(store: &Store, clock: &dyn Clock, initiative_id: &str) -> Result<Initiative, OrcError> {
    crate::initiative_completer::sweep(store, clock);
    store
        .load_initiative(initiative_id)
        .map_err(|_| OrcError::InitiativeNotFound(initiative_id.to_string()))
}

/// `orc initiative show <id>`: the CLI-facing counterpart to [`load`],
/// additionally reaping any worktree whose owning task is gone from the
/// Store (§4.3), the same best-effort sweep `cmd::query`'s read paths run.
pub fn show(store: &Store, clock: &dyn Clock, initiative_id: &str, project_root: &Path) -> Result<Initiative, OrcError> {
    let initiative = load(store, clock, initiative_id)?;
    liveness::reap_orphaned_worktrees(store, project_root);
    Ok(initiative)
}

#[derive(Debug, Default)]
pub struct EditArgs {
    pub title: Option<String>,
    pub vision: Option<String>,
    /// Replaces the initiative's `blocked_by` list wholesale, same
    /// replace-all semantics as `title`/`vision` — there's no dedicated
    /// CLI verb for initiative-to-initiative dependencies (§6), so
    /// `edit` is the extension point.
    pub blocked_by: Option<Vec<String>>,
}

pub fn edit(store: &Store, clock: &dyn Clock, initiative_id: &str, args: EditArgs) -> Result<(), OrcError> {
    let mut initiative = load(store, clock, initiative_id)?;
    if let Some(title) = args.title {
        initiative.title = title;
    }
    if let Some(vision) = args.vision {
        initiative.vision = vision;
    }
    if let Some(blocked_by) = args.blocked_by {
        for dep in &blocked_by {
            if !store.initiative_exists(dep)? {
                return Err(OrcError::InvalidArgs(format!("blocked-by initiative {dep} does not exist")));
            }
        }
        initiative.blocked_by = blocked_by;
    }
    initiative.updated_at = clock.now();
    store.save_initiative(&initiative)?;
    Ok(())
}

/// `orc initiative link <initiative-id> <task-id>`: ties the task to
/// the initiative on both sides of the relationship — `Task.initiative_id`
/// for the forward reference, `Initiative.tasks` for the reverse
/// cross-reference the Initiative Completer walks (§4.9). Idempotent.
pub fn link(store: &Store, clock: &dyn Clock, initiative_id: &str, task_id: &str) -> Result<(), OrcError> {
    let mut initiative = load(store, clock, initiative_id)?;
    let mut task = store.load_task(task_id)?;

    task.initiative_id = Some(initiative_id.to_string());
    task.updated_at = clock.now();
    store.save_task(&task)?;

    if let Some(existing) = initiative.tasks.iter_mut().find(|t| t.id == task_id) {
        existing.title = task.title.clone();
        existing.stored_status = task.status;
    } else {
        initiative.tasks.push(InitiativeTaskRef {
            id: task.id.clone(),
            title: task.title.clone(),
            stored_status: task.status,
            depends_on: task.blocked_by.clone(),
        });
    }
    initiative.updated_at = clock.now();
    store.save_initiative(&initiative)?;
    Ok(())
}

/// `orc initiative unlink <initiative-id> <task-id>`.
pub fn unlink(store: &Store, clock: &dyn Clock, initiative_id: &str, task_id: &str) -> Result<(), OrcError> {
    let mut initiative = load(store, clock, initiative_id)?;
    if let Ok(mut task) = store.load_task(task_id) {
        task.initiative_id = None;
        task.updated_at = clock.now();
        store.save_task(&task)?;
    }
    initiative.tasks.retain(|t| t.id != task_id);
    initiative.updated_at = clock.now();
    store.save_initiative(&initiative)?;
    Ok(())
}

/// `orc initiative decide <initiative-id> <text>`: appends a design
/// decision to the initiative's permanent log. Decisions are never
/// edited or removed once recorded.
pub fn decide(
    store: &Store,
    clock: &dyn Clock,
    initiative_id: &str,
    text: &str,
    rationale: &str,
    author: &str,
) -> Result<(), OrcError> {
    let mut initiative = load(store, clock, initiative_id)?;
    initiative.decisions.push(Decision {
        id: Uuid::new_v4().to_string(),
        text: text.to_string(),
        rationale: rationale.to_string(),
        author: author.to_string(),
        date: clock.now(),
    });
    initiative.updated_at = clock.now();
    store.save_initiative(&initiative)?;
    Ok(())
}

pub fn activate(store: &Store, clock: &dyn Clock, initiative_id: &str) -> Result<(), OrcError> {
    let mut initiative = load(store, clock, initiative_id)?;
    if initiative.status == InitiativeStatus::Completed {
        return Err(OrcError::InvalidArgs(format!("initiative {initiative_id} is completed and cannot be reactivated")));
    }
    initiative.status = InitiativeStatus::Active;
    initiative.updated_at = clock.now();
    store.save_initiative(&initiative)?;
    Ok(())
}

/// `orc initiative complete`: manual override, distinct from the
/// Initiative Completer's automatic sweep (§4.9). Refuses a
/// `branch_base` initiative (§3: those finalize only via merge).
pub fn complete(store: &Store, clock: &dyn Clock, initiative_id: &str) -> Result<(), OrcError> {
    let mut initiative = load(store, clock, initiative_id)?;
    if initiative.branch_base.is_some() {
        return Err(OrcError::InvalidArgs(format!(
            "initiative {initiative_id} has a branch_base and finalizes via merge, not completion"
        )));
    }
    initiative.status = InitiativeStatus::Completed;
    initiative.updated_at = clock.now();
    store.save_initiative(&initiative)?;
    Ok(())
}

/// `orc initiative delete`: refuses while tasks are still linked, so an
/// operator doesn't silently orphan a batch of tasks' `initiative_id`
/// references.
pub fn delete(store: &Store, initiative_id: &str) -> Result<(), OrcError> {
    let initiative = store
        .load_initiative(initiative_id)
        .map_err(|_| OrcError::InitiativeNotFound(initiative_id.to_string()))?;
    if !initiative.tasks.is_empty() {
        return Err(OrcError::InvalidArgs(format!(
            "initiative {initiative_id} still has {} linked task(s); unlink them first",
            initiative.tasks.len()
        )));
    }
    store.delete_initiative(initiative_id)?;
    Ok(())
}

#[derive(Debug)]
pub struct InitiativePlan {
    pub classification: Vec<(String, Classification)>,
    /// How the initiative itself classifies against other initiatives'
    /// `blocked_by` lists, so `plan`/`run` can tell "this initiative's
    /// tasks are ready" apart from "this initiative is itself blocked
    /// on another initiative".
    pub initiative_classification: Classification,
}

/// `orc initiative plan`: classifies the initiative's own tasks as
/// ready or blocked, the same Dependency Graph classifier `orc deps`
/// uses but scoped to one initiative's task set, plus the initiative's
/// own standing against its `blocked_by` list of other initiatives.
pub fn plan(store: &Store, initiative_id: &str) -> Result<InitiativePlan, OrcError> {
    let tasks = store.load_tasks_by_initiative(initiative_id)?;
    let satisfied: HashSet<String> = tasks
        .iter()
        .filter(|t| t.status.is_terminal())
        .map(|t| t.id.clone())
        .collect();
    let mut classification: Vec<(String, Classification)> = deps::classify(&tasks, &satisfied)
        .into_iter()
        .map(|(id, c)| (id.to_string(), c))
        .collect();
    classification.sort_by(|a, b| a.0.cmp(&b.0));

    let initiative_classification = classify_initiative(store, initiative_id)?;

    Ok(InitiativePlan { classification, initiative_classification })
}

/// Classifies one initiative against every other initiative's
/// `blocked_by` list (§4.4: "initiative dependencies use the same
/// rules over `initiative.blocked_by`"). Completed/archived
/// initiatives are satisfied dependencies; a reference to a missing
/// initiative id is never silently satisfied.
fn classify_initiative(store: &Store, initiative_id: &str) -> Result<Classification, OrcError> {
    let initiatives = store.load_all_initiatives()?;
    let satisfied: HashSet<String> = initiatives
        .iter()
        .filter(|i| !i.is_pending())
        .map(|i| i.id.clone())
        .collect();
    let classification = deps::classify(&initiatives, &satisfied);
    Ok(classification
        .get(initiative_id)
        .copied()
        .unwrap_or(Classification::Other))
}

/// `orc initiative run`: drives the initiative's linked tasks forward
/// in dependency order, one `scheduler::run` invocation per task, until
/// one doesn't complete outright or there's nothing left to run.
pub async fn run(
    store: &Store,
    config: &OrcConfig,
    initiative_id: &str,
    skip_gates: bool,
    clock: &dyn Clock,
) -> Result<Vec<(String, RunOutcome)>, OrcError> {
    if classify_initiative(store, initiative_id)? == Classification::Blocked {
        return Err(OrcError::InvalidArgs(format!(
            "initiative {initiative_id} is blocked on another initiative's blocked_by"
        )));
    }

    let tasks = store.load_tasks_by_initiative(initiative_id)?;
    let runnable: Vec<Task> = tasks
        .into_iter()
        .filter(|t| {
            matches!(
                t.status,
                TaskStatus::Created | TaskStatus::Planned | TaskStatus::Paused | TaskStatus::Interrupted
            )
        })
        .collect();
    let ordered = deps::toposort(runnable).map_err(|e| OrcError::InvalidArgs(e.to_string()))?;

    let overrides = GateOverrides {
        task_override: skip_gates.then_some(crate::store::models::GateType::None),
        workflow_phase_override: None,
    };

    let mut results = Vec::new();
    for task in ordered {
        let cancel = tokio_util::sync::CancellationToken::new();
        let outcome = crate::scheduler::run(store, config, &task.id, &overrides, clock, &cancel).await?;
        let stop_here = !matches!(outcome, RunOutcome::Completed);
        results.push((task.id, outcome));
        if stop_here {
            break;
        }
    }
    Ok(results)
}
