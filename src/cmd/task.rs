//! Task lifecycle commands (§6): `init`, `new`, `run`/`resume`,
//! `pause`/`stop`, `skip`, `rewind`, `reset`, `resolve`, `approve`,
//! `reject`. Each is a thin wrapper over `scheduler`/`identity`, adding
//! only the argument validation and console output the engine layer
//! itself has no business doing.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::{AutomationProfile, OrcConfig};
use crate::errors::OrcError;
use crate::gates::GateOverrides;
use crate::identity;
use crate::scheduler::{self, RunOutcome};
use crate::store::Store;
use crate::store::models::{Execution, GateType, Priority, Task, TaskStatus, Weight};

/// `orc init`: creates the `.orc/` sentinel under `project_dir`.
pub fn init(project_dir: &Path) -> Result<bool, OrcError> {
    identity::init_project(project_dir).map_err(OrcError::from)
}

#[derive(Debug, Default)]
pub struct NewTaskArgs {
    pub weight: Option<String>,
    pub blocked_by: Vec<String>,
    pub initiative_id: Option<String>,
    pub branch: Option<String>,
    pub target_branch: Option<String>,
    pub priority: Option<String>,
}

/// `orc new <title>`: mints a task id and persists a freshly `created`
/// task, validating that every `--blocked-by`/`--initiative` reference
/// actually exists rather than silently saving a dangling edge.
pub fn new(store: &Store, clock: &dyn Clock, title: &str, args: NewTaskArgs) -> Result<String, OrcError> {
    let weight = match args.weight {
        Some(w) => Weight::from_str(&w).map_err(OrcError::InvalidArgs)?,
        None => Weight::Medium,
    };
    let priority = match args.priority {
        Some(p) => Priority::from_str(&p).map_err(OrcError::InvalidArgs)?,
        None => Priority::default(),
    };

    for dep in &args.blocked_by {
        if !store.task_exists(dep)? {
            return Err(OrcError::InvalidArgs(format!("blocked-by task {dep} does not exist")));
        }
    }
    if let Some(initiative_id) = &args.initiative_id
        && !store.initiative_exists(initiative_id)?
    {
        return Err(OrcError::InitiativeNotFound(initiative_id.clone()));
    }

    let id = identity::next_task_id(store)?;
    let now = clock.now();
    let task = Task {
        id: id.clone(),
        title: title.to_string(),
        description: String::new(),
        weight,
        status: TaskStatus::Created,
        current_phase: String::new(),
        blocked_by: args.blocked_by,
        initiative_id: args.initiative_id.clone(),
        priority,
        executor_pid: None,
        executor_hostname: None,
        executor_started_at: None,
        executor_start_time: None,
        execution: Execution::default(),
        branch: args.branch.unwrap_or_else(|| format!("orc/{}", id.to_lowercase())),
        target_branch: args.target_branch.unwrap_or_else(|| "main".to_string()),
        workflow_id: None,
        updated_at: now,
    };
    store.save_task(&task)?;

    if let Some(initiative_id) = &args.initiative_id {
        crate::cmd::initiative::link(store, clock, initiative_id, &id)?;
    }

    Ok(id)
}

#[derive(Debug, Default)]
pub struct RunArgs {
    pub force: bool,
    pub skip_gates: bool,
    pub profile: Option<String>,
}

/// `orc run`/`orc resume`: drives the task forward one invocation's
/// worth of phases. `--force` clears a stale `running` row before
/// handing off to the scheduler's own pre-flight, for the case where an
/// operator knows the recorded holder is dead but wants to skip waiting
/// on the liveness check's next natural trigger (a plain `run`).
pub async fn run(
    store: &Store,
    config: &OrcConfig,
    task_id: &str,
    args: RunArgs,
    clock: &dyn Clock,
) -> Result<RunOutcome, OrcError> {
    if args.force {
        let mut task = store.load_task(task_id)?;
        if task.status == TaskStatus::Running {
            task.status = TaskStatus::Interrupted;
            task.executor_pid = None;
            task.executor_hostname = None;
            task.executor_started_at = None;
            task.executor_start_time = None;
            task.updated_at = clock.now();
            store.save_task(&task)?;
            let _ = store.release_lock(task_id);
        }
    }

    let mut local_config = config.clone();
    if let Some(profile) = args.profile {
        local_config.cli_profile = Some(AutomationProfile::from_str(&profile)?);
    }
    local_config.cli_skip_gates = args.skip_gates;

    let overrides = GateOverrides {
        task_override: args.skip_gates.then_some(GateType::None),
        workflow_phase_override: None,
    };

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watcher.cancel();
        }
    });

    scheduler::run(store, &local_config, task_id, &overrides, clock, &cancel).await
}

pub fn pause(store: &Store, task_id: &str) -> Result<(), OrcError> {
    scheduler::pause(store, task_id)
}

pub fn stop(store: &Store, task_id: &str, clock: &dyn Clock) -> Result<(), OrcError> {
    scheduler::stop(store, task_id, clock)
}

pub fn skip(store: &Store, task_id: &str, clock: &dyn Clock) -> Result<(), OrcError> {
    scheduler::skip(store, task_id, clock)
}

pub fn rewind(store: &Store, config: &OrcConfig, task_id: &str, to_phase: &str, clock: &dyn Clock) -> Result<(), OrcError> {
    scheduler::rewind(store, config, task_id, to_phase, clock)
}

pub fn reset(store: &Store, config: &OrcConfig, task_id: &str, clock: &dyn Clock) -> Result<(), OrcError> {
    scheduler::reset(store, config, task_id, clock)
}

pub fn resolve(store: &Store, task_id: &str, message: &str, clock: &dyn Clock) -> Result<(), OrcError> {
    scheduler::resolve(store, task_id, message, clock)
}

pub fn approve(store: &Store, task_id: &str, reason: &str, clock: &dyn Clock) -> Result<(), OrcError> {
    scheduler::approve(store, task_id, reason, clock)
}

pub fn reject(store: &Store, task_id: &str, reason: &str, clock: &dyn Clock) -> Result<(), OrcError> {
    scheduler::reject(store, task_id, reason, clock)
}

impl AutomationProfile {
    fn from_str(s: &str) -> Result<Self, OrcError> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(AutomationProfile::Auto),
            "fast" => Ok(AutomationProfile::Fast),
            "safe" => Ok(AutomationProfile::Safe),
            "strict" => Ok(AutomationProfile::Strict),
            other => Err(OrcError::InvalidArgs(format!("unknown automation profile '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use tempfile::tempdir;

    #[test]
    fn new_task_rejects_unknown_blocked_by() {
        let store = Store::open_in_memory().unwrap();
        let clock = SystemClock;
        let args = NewTaskArgs {
            blocked_by: vec!["TASK-9999".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            new(&store, &clock, "fix thing", args),
            Err(OrcError::InvalidArgs(_))
        ));
    }

    #[test]
    fn new_task_rejects_unknown_initiative() {
        let store = Store::open_in_memory().unwrap();
        let clock = SystemClock;
        let args = NewTaskArgs {
            initiative_id: Some("INIT-9999".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            new(&store, &clock, "fix thing", args),
            Err(OrcError::InitiativeNotFound(_))
        ));
    }

    #[test]
    fn new_task_mints_id_and_defaults_to_medium_weight() {
        let store = Store::open_in_memory().unwrap();
        let clock = SystemClock;
        let id = new(&store, &clock, "fix thing", NewTaskArgs::default()).unwrap();
        let task = store.load_task(&id).unwrap();
        assert_eq!(task.weight, Weight::Medium);
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.branch, format!("orc/{}", id.to_lowercase()));
    }

    #[test]
    fn new_task_links_into_initiative_when_given() {
        let store = Store::open_in_memory().unwrap();
        let clock = SystemClock;
        let init_id = crate::cmd::initiative::new(&store, &clock, "revamp onboarding", "", vec![]).unwrap();
        let args = NewTaskArgs {
            initiative_id: Some(init_id.clone()),
            ..Default::default()
        };
        let task_id = new(&store, &clock, "build step one", args).unwrap();

        let task = store.load_task(&task_id).unwrap();
        assert_eq!(task.initiative_id, Some(init_id.clone()));
        let initiative = store.load_initiative(&init_id).unwrap();
        assert!(initiative.tasks.iter().any(|t| t.id == task_id));
    }

    #[tokio::test]
    async fn force_clears_stale_running_row_before_handoff() {
        let dir = tempdir().unwrap();
        let config = OrcConfig::new(dir.path().to_path_buf()).unwrap();
        let store = Store::open_in_memory().unwrap();
        let clock = SystemClock;
        let id = new(&store, &clock, "do it", NewTaskArgs::default()).unwrap();
        let mut task = store.load_task(&id).unwrap();
        task.status = TaskStatus::Running;
        task.executor_pid = Some(4_000_000);
        store.save_task(&task).unwrap();

        let args = RunArgs {
            force: true,
            skip_gates: true,
            profile: None,
        };
        // No git repo / no agent binary present, so the run itself will
        // error past pre-flight; what this test verifies is that the
        // stale `running` row no longer trips `AlreadyRunning`.
        let result = run(&store, &config, &id, args, &clock).await;
        assert!(!matches!(
            result,
            Err(OrcError::Scheduler(crate::errors::SchedulerError::AlreadyRunning { .. }))
        ));
    }
}
