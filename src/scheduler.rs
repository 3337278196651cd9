//! Phase Scheduler (§4.8): the central state machine. One `orc run`
//! invocation walks the task's resolved plan until it blocks, fails,
//! or completes — no in-process background scheduling, no parallel
//! phase fan-out: a single-threaded, one-phase-at-a-time stepper so
//! each invocation is the one logical operation §5 requires. Each
//! phase's checkpoint commit is delegated to
//! `worktree::checkpoint_commit`.

use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::OrcConfig;
use crate::credentials::{CredentialsProvider, EnvCredentialsProvider};
use crate::errors::{OrcError, SchedulerError};
use crate::executor;
use crate::gates::{self, GateOutcome, GateOverrides};
use crate::liveness;
use crate::phase::{self, Phase};
use crate::store::Store;
use crate::store::models::{PhaseResult, PhaseRunStatus, Task, TaskStatus};
use crate::worktree;

/// Outcome of a single `run`/`resume` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Blocked { phase: String },
    Paused,
    Failed { reason: String },
}

/// Pre-flight: rejects a concurrently-running task, or declares it
/// orphaned and clears its executor fields so the main loop can
/// re-enter cleanly.
fn preflight(store: &Store, task: &mut Task, clock: &dyn Clock) -> Result<(), OrcError> {
    if task.status == TaskStatus::Running {
        let alive = task
            .executor_pid
            .map(|pid| liveness::is_same_process(pid, task.executor_start_time))
            .unwrap_or(false);
        if alive {
            return Err(SchedulerError::AlreadyRunning {
                task_id: task.id.clone(),
                pid: task.executor_pid.unwrap_or(0),
                hostname: task.executor_hostname.clone().unwrap_or_default(),
            }
            .into());
        }
        task.executor_pid = None;
        task.executor_hostname = None;
        task.executor_started_at = None;
        task.executor_start_time = None;
        task.status = TaskStatus::Interrupted;
        task.updated_at = clock.now();
        store.save_task(task)?;
    }
    Ok(())
}

/// Runs the task forward through its resolved plan until it blocks on
/// a human gate, fails, or completes. Equivalent to `resume` once
/// pre-flight has cleared any orphaned executor state.
pub async fn run(
    store: &Store,
    config: &OrcConfig,
    task_id: &str,
    overrides: &GateOverrides,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> Result<RunOutcome, OrcError> {
    let mut task = store.load_task(task_id)?;
    preflight(store, &mut task, clock)?;

    if !matches!(
        task.status,
        TaskStatus::Created | TaskStatus::Planned | TaskStatus::Paused | TaskStatus::Blocked | TaskStatus::Interrupted | TaskStatus::Failed
    ) {
        return Err(OrcError::InvalidArgs(format!(
            "task {task_id} is not runnable from status {:?}",
            task.status
        )));
    }

    let plan = phase::resolve_plan(config, task.weight, task.workflow_id.as_deref())?;
    ensure_execution_seeded(&mut task, &plan);

    store.acquire_lock(task_id, std::process::id(), &crate::util::hostname())?;
    let credentials = EnvCredentialsProvider;
    let outcome = drive(store, config, &mut task, &plan, overrides, &credentials, clock, cancel).await;
    // Best-effort: failing to release the advisory lock shouldn't mask
    // the real outcome of the run.
    if let Err(err) = store.release_lock(task_id) {
        tracing::warn!(%task_id, error = %err, "failed to release advisory lock");
    }
    outcome
}

/// `resume` is the same re-entry path as `run`; kept as a distinct
/// name because the CLI surface (§6) exposes it as its own verb.
pub async fn resume(
    store: &Store,
    config: &OrcConfig,
    task_id: &str,
    overrides: &GateOverrides,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> Result<RunOutcome, OrcError> {
    run(store, config, task_id, overrides, clock, cancel).await
}

fn ensure_execution_seeded(task: &mut Task, plan: &[Phase]) {
    for phase in plan {
        if task.execution.phase(&phase.id).is_none() {
            task.execution.phases.push(PhaseResult {
                phase_id: phase.id.clone(),
                status: PhaseRunStatus::Pending,
                commit_sha: None,
                started_at: None,
                ended_at: None,
            });
        }
    }
}

async fn drive(
    store: &Store,
    config: &OrcConfig,
    task: &mut Task,
    plan: &[Phase],
    overrides: &GateOverrides,
    credentials: &dyn CredentialsProvider,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> Result<RunOutcome, OrcError> {
    loop {
        let Some(next) = task.execution.next_unfinished().map(|p| p.phase_id.clone()) else {
            return finalize(store, config, task, clock).await;
        };
        let Some(phase) = plan.iter().find(|p| p.id == next) else {
            return Err(SchedulerError::UnknownPhase(next).into());
        };

        task.current_phase = phase.id.clone();
        task.updated_at = clock.now();
        store.save_task(task)?;

        let handle = match worktree::acquire(
            &config.project_root,
            &config.sentinel.worktrees_dir(),
            &task.id,
            &task.branch,
            &task.target_branch,
        ) {
            Ok(h) => h,
            Err(err) => return fail(store, task, clock, &err.to_string()).await,
        };

        let gate_type = gates::resolve_gate_type(phase, overrides, config);
        let already_approved = store
            .list_gate_decisions(&task.id)?
            .iter()
            .any(|d| d.phase == phase.id);

        if gate_type == crate::store::models::GateType::Human && !already_approved {
            task.status = TaskStatus::Blocked;
            task.updated_at = clock.now();
            store.save_task(task)?;
            return Ok(RunOutcome::Blocked { phase: phase.id.clone() });
        }

        task.status = TaskStatus::Running;
        task.executor_pid = Some(std::process::id());
        task.executor_hostname = Some(crate::util::hostname());
        task.executor_started_at = Some(clock.now());
        task.executor_start_time = Some(liveness::current_process_start_time());
        task.updated_at = clock.now();
        store.save_task(task)?;

        let prompt = phase::resolve_prompt(&phase.id, &config.project_root, &config.sentinel.root);
        let result = executor::run_phase(
            store,
            config,
            &task.id,
            &phase.id,
            &handle.path,
            &prompt,
            credentials,
            cancel,
        )
        .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => return fail(store, task, clock, &err.to_string()).await,
        };

        if outcome.canceled {
            task.status = TaskStatus::Paused;
            task.executor_pid = None;
            task.executor_hostname = None;
            task.executor_started_at = None;
            task.executor_start_time = None;
            task.updated_at = clock.now();
            store.save_task(task)?;
            return Ok(RunOutcome::Paused);
        }

        task.execution.cost.input_tokens += outcome.cost.input_tokens;
        task.execution.cost.output_tokens += outcome.cost.output_tokens;

        if outcome.exit_code != Some(0) {
            return fail(store, task, clock, &format!("agent exited with {:?}", outcome.exit_code)).await;
        }

        let commit_sha = match worktree::checkpoint_commit(
            &handle.path,
            &format!("{}: {} {}", phase.id, task.id, task.title),
        ) {
            Ok(sha) => sha,
            Err(err) => return fail(store, task, clock, &err.to_string()).await,
        };

        if let Some(sha) = &commit_sha {
            record_diff_summary(store, &handle.path, &task.id, &phase.id, sha);
        }

        let gate_outcome = gates::evaluate(store, &task.id, &phase.id, gate_type, commit_sha.as_deref())?;
        match gate_outcome {
            GateOutcome::Approved => {
                if let Some(result) = task.execution.phase_mut(&phase.id) {
                    result.status = PhaseRunStatus::Completed;
                    result.commit_sha = commit_sha;
                    result.ended_at = Some(clock.now());
                }
                task.executor_pid = None;
                task.executor_hostname = None;
                task.executor_started_at = None;
                task.executor_start_time = None;
                task.updated_at = clock.now();
                store.save_task(task)?;
            }
            GateOutcome::Rejected { reason } => {
                return fail(store, task, clock, &reason).await;
            }
            GateOutcome::AwaitingApproval => {
                task.status = TaskStatus::Blocked;
                task.updated_at = clock.now();
                store.save_task(task)?;
                return Ok(RunOutcome::Blocked { phase: phase.id.clone() });
            }
        }
    }
}

/// Persists the phase's unified diff as a transcript entry so `log`
/// can render a file-change summary alongside the agent's messages.
/// Best-effort: a diff failure shouldn't fail a phase that otherwise
/// completed cleanly.
fn record_diff_summary(store: &Store, worktree_path: &std::path::Path, task_id: &str, phase_id: &str, commit_sha: &str) {
    let diff = match worktree::diff_summary(worktree_path, commit_sha) {
        Ok(diff) => diff,
        Err(err) => {
            tracing::warn!(%task_id, %phase_id, error = %err, "failed to compute phase diff summary");
            return;
        }
    };
    if diff.is_empty() {
        return;
    }
    let msg = crate::store::models::TranscriptMessage {
        task_id: task_id.to_string(),
        phase: phase_id.to_string(),
        message_uuid: format!("{task_id}-{phase_id}-diff-{commit_sha}"),
        role: "diff".to_string(),
        content: diff,
        ts: chrono::Utc::now(),
    };
    if let Err(err) = store.add_transcript_message(&msg) {
        tracing::warn!(%task_id, %phase_id, error = %err, "failed to persist diff summary transcript");
    }
}

async fn finalize(store: &Store, config: &OrcConfig, task: &mut Task, clock: &dyn Clock) -> Result<RunOutcome, OrcError> {
    match worktree::merge_into_target(&config.project_root, &task.branch, &task.target_branch) {
        Ok(true) => {}
        Ok(false) => {
            return fail(
                store,
                task,
                clock,
                &format!("merging {} into {} produced conflicts; resolve manually and resume", task.branch, task.target_branch),
            )
            .await;
        }
        Err(err) => {
            return fail(store, task, clock, &format!("failed to merge {} into {}: {err}", task.branch, task.target_branch)).await;
        }
    }

    task.status = TaskStatus::Completed;
    task.updated_at = clock.now();
    store.save_task(task)?;
    if let Err(err) = worktree::release(&config.project_root, &task.id) {
        tracing::warn!(task_id = %task.id, error = %err, "failed to release worktree after completion");
    }
    Ok(RunOutcome::Completed)
}

async fn fail(store: &Store, task: &mut Task, clock: &dyn Clock, reason: &str) -> Result<RunOutcome, OrcError> {
    task.status = TaskStatus::Failed;
    task.executor_pid = None;
    task.executor_hostname = None;
    task.executor_started_at = None;
    task.executor_start_time = None;
    task.updated_at = clock.now();
    store.save_task(task)?;
    Ok(RunOutcome::Failed { reason: reason.to_string() })
}

/// `Rewind(task, to_phase)`: refuses while running, resets every phase
/// from `to_phase` onward to pending, clears their gate decisions, and
/// hard-resets the worktree to the checkpoint just before `to_phase`.
pub fn rewind(
    store: &Store,
    config: &OrcConfig,
    task_id: &str,
    to_phase: &str,
    clock: &dyn Clock,
) -> Result<(), OrcError> {
    let mut task = store.load_task(task_id)?;
    if task.status == TaskStatus::Running {
        return Err(SchedulerError::RunningRefusal(task_id.to_string()).into());
    }

    let Some(idx) = task.execution.phases.iter().position(|p| p.phase_id == to_phase) else {
        return Err(SchedulerError::UnknownPhase(to_phase.to_string()).into());
    };

    let checkpoint_before = if idx > 0 {
        task.execution.phases[idx - 1].commit_sha.clone()
    } else {
        None
    };
    let rewound_phase_ids: Vec<String> = task.execution.phases[idx..]
        .iter()
        .map(|p| p.phase_id.clone())
        .collect();

    for result in task.execution.phases.iter_mut().skip(idx) {
        result.status = PhaseRunStatus::Pending;
        result.commit_sha = None;
        result.started_at = None;
        result.ended_at = None;
    }

    store.delete_gate_decisions(task_id, &rewound_phase_ids)?;

    if let Some(path) = worktree::worktree_path_if_exists(&config.project_root, &config.sentinel.worktrees_dir(), task_id)? {
        if let Some(sha) = checkpoint_before {
            worktree::hard_reset_to(&path, &sha)?;
        }
    }

    task.current_phase = to_phase.to_string();
    task.status = TaskStatus::Planned;
    task.updated_at = clock.now();
    store.save_task(&task)?;
    Ok(())
}

/// Full wipe: every phase reset to pending, worktree destroyed,
/// status back to `planned`.
pub fn reset(store: &Store, config: &OrcConfig, task_id: &str, clock: &dyn Clock) -> Result<(), OrcError> {
    let mut task = store.load_task(task_id)?;
    if task.status == TaskStatus::Running {
        return Err(SchedulerError::RunningRefusal(task_id.to_string()).into());
    }

    for result in &mut task.execution.phases {
        result.status = PhaseRunStatus::Pending;
        result.commit_sha = None;
        result.started_at = None;
        result.ended_at = None;
    }
    task.execution.cost = Default::default();
    task.current_phase.clear();
    task.status = TaskStatus::Planned;
    task.updated_at = clock.now();
    store.save_task(&task)?;

    if let Err(err) = worktree::release(&config.project_root, task_id) {
        tracing::warn!(%task_id, error = %err, "failed to release worktree during reset");
    }
    Ok(())
}

/// Marks the current phase skipped (recording a `none`-reason gate
/// decision for the audit trail) and advances without running the
/// agent.
pub fn skip(store: &Store, task_id: &str, clock: &dyn Clock) -> Result<(), OrcError> {
    let mut task = store.load_task(task_id)?;
    if task.status == TaskStatus::Running {
        return Err(SchedulerError::RunningRefusal(task_id.to_string()).into());
    }

    let Some(phase_id) = task.execution.next_unfinished().map(|p| p.phase_id.clone()) else {
        return Ok(());
    };

    gates::record_human_decision(store, task_id, &phase_id, true, "skipped by operator")?;
    if let Some(result) = task.execution.phase_mut(&phase_id) {
        result.status = PhaseRunStatus::Skipped;
    }
    task.status = TaskStatus::Planned;
    task.updated_at = clock.now();
    store.save_task(&task)?;
    Ok(())
}

/// Records an operator's approval for the task's current blocked
/// phase, transitioning `blocked → planned` so the next `run` picks up
/// where it left off. A second `approve` for the same `(task, phase)`
/// once it's already been recorded is a no-op rather than an error
/// (§6), since the task may have already moved past `blocked` by the
/// time the operator's second command lands.
pub fn approve(store: &Store, task_id: &str, reason: &str, clock: &dyn Clock) -> Result<(), OrcError> {
    let mut task = store.load_task(task_id)?;
    let phase_id = task.current_phase.clone();

    if task.status != TaskStatus::Blocked {
        if already_approved(store, task_id, &phase_id)? {
            return Ok(());
        }
        return Err(SchedulerError::NotBlocked(task_id.to_string()).into());
    }

    gates::record_human_decision(store, task_id, &phase_id, true, reason)?;
    task.status = TaskStatus::Planned;
    task.updated_at = clock.now();
    store.save_task(&task)?;
    Ok(())
}

/// Records a rejection, transitioning `blocked → failed`.
pub fn reject(store: &Store, task_id: &str, reason: &str, clock: &dyn Clock) -> Result<(), OrcError> {
    let mut task = store.load_task(task_id)?;
    if task.status != TaskStatus::Blocked {
        return Err(SchedulerError::NotBlocked(task_id.to_string()).into());
    }
    let phase_id = task.current_phase.clone();
    gates::record_human_decision(store, task_id, &phase_id, false, reason)?;
    task.status = TaskStatus::Failed;
    task.updated_at = clock.now();
    store.save_task(&task)?;
    Ok(())
}

/// Asks a running task's `orc run` process to stop gracefully: sends
/// `SIGTERM` to its recorded `executor_pid` and leaves the task row
/// untouched. That process owns its own `CancellationToken` wired to
/// the same signal (§5's "one process per invocation" model rules out
/// an in-process pause from a different CLI invocation), so it's the
/// one that transitions the task to `paused` once its current phase
/// iteration unwinds. Refuses if the task isn't currently running.
pub fn pause(store: &Store, task_id: &str) -> Result<(), OrcError> {
    let task = store.load_task(task_id)?;
    if task.status != TaskStatus::Running {
        return Err(SchedulerError::NotRunning(task_id.to_string()).into());
    }
    let Some(pid) = task.executor_pid else {
        return Err(SchedulerError::NotRunning(task_id.to_string()).into());
    };
    liveness::send_signal(pid, sysinfo::Signal::Term);
    Ok(())
}

/// Forcibly stops a running task: `SIGKILL`s its executor process
/// outright rather than waiting for a cooperative shutdown, then
/// clears the executor fields itself since the dead process can no
/// longer do so. Leaves the task `paused`, matching `pause`'s outcome
/// once the owning process would have unwound on its own.
pub fn stop(store: &Store, task_id: &str, clock: &dyn Clock) -> Result<(), OrcError> {
    let mut task = store.load_task(task_id)?;
    if task.status != TaskStatus::Running {
        return Err(SchedulerError::NotRunning(task_id.to_string()).into());
    }
    let Some(pid) = task.executor_pid else {
        return Err(SchedulerError::NotRunning(task_id.to_string()).into());
    };
    liveness::send_signal(pid, sysinfo::Signal::Kill);

    task.status = TaskStatus::Paused;
    task.executor_pid = None;
    task.executor_hostname = None;
    task.executor_started_at = None;
    task.executor_start_time = None;
    task.updated_at = clock.now();
    store.save_task(&task)?;
    Ok(())
}

/// Manually un-fails a task: `failed → planned` with an operator note
/// recorded in the transcript, for incidents the operator has
/// diagnosed and fixed outside the gate/approve-reject vocabulary
/// (which only ever acts on a currently `blocked` gate decision).
pub fn resolve(store: &Store, task_id: &str, message: &str, clock: &dyn Clock) -> Result<(), OrcError> {
    let mut task = store.load_task(task_id)?;
    if task.status != TaskStatus::Failed {
        return Err(SchedulerError::NotFailed(task_id.to_string()).into());
    }

    let phase_id = task.current_phase.clone();
    let note = crate::store::models::TranscriptMessage {
        task_id: task_id.to_string(),
        phase: phase_id,
        message_uuid: format!("{task_id}-resolve-{}", clock.now().timestamp()),
        role: "resolution".to_string(),
        content: message.to_string(),
        ts: clock.now(),
    };
    store.add_transcript_message(&note)?;

    task.status = TaskStatus::Planned;
    task.updated_at = clock.now();
    store.save_task(&task)?;
    Ok(())
}

fn already_approved(store: &Store, task_id: &str, phase_id: &str) -> Result<bool, OrcError> {
    Ok(store
        .list_gate_decisions(task_id)?
        .iter()
        .any(|d| d.phase == phase_id && d.approved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::models::{Priority, Weight};
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample_task(id: &str, status: TaskStatus) -> Task {
        Task {
            id: id.to_string(),
            title: "do the thing".into(),
            description: String::new(),
            weight: Weight::Trivial,
            status,
            current_phase: String::new(),
            blocked_by: vec![],
            initiative_id: None,
            priority: Priority::Normal,
            executor_pid: None,
            executor_hostname: None,
            executor_started_at: None,
            executor_start_time: None,
            execution: Default::default(),
            branch: format!("orc/{id}"),
            target_branch: "main".into(),
            workflow_id: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn rewind_refuses_while_running() {
        let dir = tempdir().unwrap();
        let config = OrcConfig::new(dir.path().to_path_buf()).unwrap();
        let store = Store::open_in_memory().unwrap();
        let task = sample_task("TASK-0001", TaskStatus::Running);
        store.save_task(&task).unwrap();
        let clock = SystemClock;
        assert!(matches!(
            rewind(&store, &config, "TASK-0001", "implement", &clock),
            Err(OrcError::Scheduler(SchedulerError::RunningRefusal(_)))
        ));
    }

    #[test]
    fn rewind_drops_gate_decisions_and_resets_worktree() {
        let dir = tempdir().unwrap();
        let config = OrcConfig::new(dir.path().to_path_buf()).unwrap();
        let store = Store::open_in_memory().unwrap();

        let repo = git2::Repository::init(dir.path()).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let tree_oid = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        let base_oid = repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        let base_commit = repo.find_commit(base_oid).unwrap();
        repo.branch("main", &base_commit, true).unwrap();
        let base_sha = base_oid.to_string();

        let mut task = sample_task("TASK-0001", TaskStatus::Failed);
        task.execution.phases.push(PhaseResult {
            phase_id: "plan".into(),
            status: PhaseRunStatus::Completed,
            commit_sha: Some(base_sha.clone()),
            started_at: None,
            ended_at: None,
        });
        task.execution.phases.push(PhaseResult {
            phase_id: "implement".into(),
            status: PhaseRunStatus::Completed,
            commit_sha: Some("deadbeef".into()),
            started_at: None,
            ended_at: None,
        });
        store.save_task(&task).unwrap();
        gates::record_human_decision(&store, "TASK-0001", "implement", true, "looked fine").unwrap();

        let handle = crate::worktree::acquire(
            dir.path(),
            &config.sentinel.worktrees_dir(),
            "TASK-0001",
            "orc/task-0001",
            "main",
        )
        .unwrap();
        std::fs::write(handle.path.join("note.txt"), "draft").unwrap();
        crate::worktree::checkpoint_commit(&handle.path, "implement checkpoint").unwrap();

        let clock = SystemClock;
        rewind(&store, &config, "TASK-0001", "implement", &clock).unwrap();

        let reloaded = store.load_task("TASK-0001").unwrap();
        assert_eq!(reloaded.status, TaskStatus::Planned);
        assert_eq!(reloaded.execution.phases[0].status, PhaseRunStatus::Completed);
        assert_eq!(reloaded.execution.phases[1].status, PhaseRunStatus::Pending);
        assert!(store.list_gate_decisions("TASK-0001").unwrap().is_empty());
        assert!(!handle.path.join("note.txt").exists());
    }

    #[test]
    fn reset_clears_phase_history() {
        let dir = tempdir().unwrap();
        let config = OrcConfig::new(dir.path().to_path_buf()).unwrap();
        let store = Store::open_in_memory().unwrap();
        let mut task = sample_task("TASK-0001", TaskStatus::Failed);
        task.execution.phases.push(PhaseResult {
            phase_id: "implement".into(),
            status: PhaseRunStatus::Completed,
            commit_sha: Some("abc".into()),
            started_at: None,
            ended_at: None,
        });
        store.save_task(&task).unwrap();

        let clock = SystemClock;
        // No git repository at `dir`, so worktree release best-effort
        // no-ops; the phase-history reset is what this test verifies.
        reset(&store, &config, "TASK-0001", &clock).unwrap();

        let reloaded = store.load_task("TASK-0001").unwrap();
        assert_eq!(reloaded.status, TaskStatus::Planned);
        assert_eq!(reloaded.execution.phases[0].status, PhaseRunStatus::Pending);
        assert!(reloaded.execution.phases[0].commit_sha.is_none());
    }

    #[test]
    fn preflight_declares_orphan_when_pid_not_alive() {
        let store = Store::open_in_memory().unwrap();
        let mut task = sample_task("TASK-0001", TaskStatus::Running);
        task.executor_pid = Some(4_000_000);
        task.executor_start_time = Some(1);
        let clock = SystemClock;

        preflight(&store, &mut task, &clock).unwrap();

        assert_eq!(task.status, TaskStatus::Interrupted);
        assert!(task.executor_pid.is_none());
    }

    #[test]
    fn preflight_rejects_when_holder_is_alive() {
        let store = Store::open_in_memory().unwrap();
        let mut task = sample_task("TASK-0001", TaskStatus::Running);
        task.executor_pid = Some(std::process::id());
        task.executor_start_time = Some(liveness::current_process_start_time());
        let clock = SystemClock;

        assert!(matches!(
            preflight(&store, &mut task, &clock),
            Err(OrcError::Scheduler(SchedulerError::AlreadyRunning { .. }))
        ));
    }

    #[test]
    fn approve_clears_block_and_records_decision() {
        let store = Store::open_in_memory().unwrap();
        let mut task = sample_task("TASK-0001", TaskStatus::Blocked);
        task.current_phase = "review".into();
        store.save_task(&task).unwrap();

        let clock = SystemClock;
        approve(&store, "TASK-0001", "looks good", &clock).unwrap();

        let reloaded = store.load_task("TASK-0001").unwrap();
        assert_eq!(reloaded.status, TaskStatus::Planned);
        let decisions = store.list_gate_decisions("TASK-0001").unwrap();
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].approved);
    }

    #[test]
    fn approve_on_already_approved_phase_is_a_noop() {
        let store = Store::open_in_memory().unwrap();
        let mut task = sample_task("TASK-0001", TaskStatus::Blocked);
        task.current_phase = "review".into();
        store.save_task(&task).unwrap();

        let clock = SystemClock;
        approve(&store, "TASK-0001", "looks good", &clock).unwrap();
        // The task has since moved to `planned`; a repeat approve for
        // the same phase must still succeed as a no-op rather than
        // erroring on the stale "not blocked" status.
        approve(&store, "TASK-0001", "looks good again", &clock).unwrap();

        assert_eq!(store.list_gate_decisions("TASK-0001").unwrap().len(), 1);
    }

    #[test]
    fn reject_marks_task_failed() {
        let store = Store::open_in_memory().unwrap();
        let mut task = sample_task("TASK-0001", TaskStatus::Blocked);
        task.current_phase = "review".into();
        store.save_task(&task).unwrap();

        let clock = SystemClock;
        reject(&store, "TASK-0001", "needs more work", &clock).unwrap();

        let reloaded = store.load_task("TASK-0001").unwrap();
        assert_eq!(reloaded.status, TaskStatus::Failed);
        let decisions = store.list_gate_decisions("TASK-0001").unwrap();
        assert_eq!(decisions.len(), 1);
        assert!(!decisions[0].approved);
    }

    #[test]
    fn approve_refuses_when_task_is_not_blocked() {
        let store = Store::open_in_memory().unwrap();
        let task = sample_task("TASK-0001", TaskStatus::Planned);
        store.save_task(&task).unwrap();

        let clock = SystemClock;
        assert!(matches!(
            approve(&store, "TASK-0001", "n/a", &clock),
            Err(OrcError::Scheduler(SchedulerError::NotBlocked(_)))
        ));
    }

    #[test]
    fn pause_refuses_when_task_is_not_running() {
        let store = Store::open_in_memory().unwrap();
        let task = sample_task("TASK-0001", TaskStatus::Planned);
        store.save_task(&task).unwrap();

        assert!(matches!(
            pause(&store, "TASK-0001"),
            Err(OrcError::Scheduler(SchedulerError::NotRunning(_)))
        ));
    }

    #[test]
    fn stop_kills_and_marks_paused() {
        let store = Store::open_in_memory().unwrap();
        let mut task = sample_task("TASK-0001", TaskStatus::Running);
        // A bogus pid: `send_signal` silently no-ops on a process that
        // isn't there, which is fine — `stop` still clears the row.
        task.executor_pid = Some(4_000_000);
        store.save_task(&task).unwrap();

        let clock = SystemClock;
        stop(&store, "TASK-0001", &clock).unwrap();

        let reloaded = store.load_task("TASK-0001").unwrap();
        assert_eq!(reloaded.status, TaskStatus::Paused);
        assert!(reloaded.executor_pid.is_none());
    }

    #[test]
    fn resolve_unfails_task_and_records_note() {
        let store = Store::open_in_memory().unwrap();
        let mut task = sample_task("TASK-0001", TaskStatus::Failed);
        task.current_phase = "implement".into();
        store.save_task(&task).unwrap();

        let clock = SystemClock;
        resolve(&store, "TASK-0001", "fixed the flaky test manually", &clock).unwrap();

        let reloaded = store.load_task("TASK-0001").unwrap();
        assert_eq!(reloaded.status, TaskStatus::Planned);
        let transcripts = store.get_phase_transcripts("TASK-0001", "implement").unwrap();
        assert_eq!(transcripts.len(), 1);
        assert_eq!(transcripts[0].role, "resolution");
    }

    #[test]
    fn resolve_refuses_when_task_is_not_failed() {
        let store = Store::open_in_memory().unwrap();
        let task = sample_task("TASK-0001", TaskStatus::Planned);
        store.save_task(&task).unwrap();

        let clock = SystemClock;
        assert!(matches!(
            resolve(&store, "TASK-0001", "n/a", &clock),
            Err(OrcError::Scheduler(SchedulerError::NotFailed(_)))
        ));
    }

    #[tokio::test]
    async fn finalize_merges_branch_into_target_and_completes() {
        let dir = tempdir().unwrap();
        let config = OrcConfig::new(dir.path().to_path_buf()).unwrap();
        let store = Store::open_in_memory().unwrap();

        let repo = git2::Repository::init(dir.path()).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let tree_oid = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        let base_oid = repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        let base_commit = repo.find_commit(base_oid).unwrap();
        repo.branch("main", &base_commit, true).unwrap();

        let mut task = sample_task("TASK-0001", TaskStatus::Running);
        task.branch = "orc/task-0001".into();
        task.target_branch = "main".into();
        store.save_task(&task).unwrap();

        let handle = crate::worktree::acquire(
            dir.path(),
            &config.sentinel.worktrees_dir(),
            "TASK-0001",
            &task.branch,
            &task.target_branch,
        )
        .unwrap();
        std::fs::write(handle.path.join("note.txt"), "done").unwrap();
        crate::worktree::checkpoint_commit(&handle.path, "finish").unwrap();

        let clock = SystemClock;
        let outcome = finalize(&store, &config, &mut task, &clock).await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(store.load_task("TASK-0001").unwrap().status, TaskStatus::Completed);
        let main_tip = repo.find_branch("main", git2::BranchType::Local).unwrap().get().peel_to_commit().unwrap();
        assert!(main_tip.tree().unwrap().get_path(std::path::Path::new("note.txt")).is_ok());
    }

    #[tokio::test]
    async fn finalize_fails_the_task_when_merge_conflicts() {
        let dir = tempdir().unwrap();
        let config = OrcConfig::new(dir.path().to_path_buf()).unwrap();
        let store = Store::open_in_memory().unwrap();

        let repo = git2::Repository::init(dir.path()).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        std::fs::write(dir.path().join("note.txt"), "base\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(std::path::Path::new("note.txt")).unwrap();
        index.write().unwrap();
        let tree_oid = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        let base_oid = repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        let base_commit = repo.find_commit(base_oid).unwrap();
        repo.branch("main", &base_commit, true).unwrap();

        let mut task = sample_task("TASK-0001", TaskStatus::Running);
        task.branch = "orc/task-0001".into();
        task.target_branch = "main".into();
        store.save_task(&task).unwrap();

        let handle = crate::worktree::acquire(
            dir.path(),
            &config.sentinel.worktrees_dir(),
            "TASK-0001",
            &task.branch,
            &task.target_branch,
        )
        .unwrap();
        std::fs::write(handle.path.join("note.txt"), "from branch\n").unwrap();
        crate::worktree::checkpoint_commit(&handle.path, "branch edit").unwrap();

        // Diverge `main` itself so the merge can't fast-forward and must
        // actually reconcile conflicting edits to the same file.
        std::fs::write(dir.path().join("note.txt"), "from main\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(std::path::Path::new("note.txt")).unwrap();
        index.write().unwrap();
        let tree_oid = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        repo.commit(Some("refs/heads/main"), &sig, &sig, "main edit", &tree, &[&base_commit]).unwrap();

        let clock = SystemClock;
        let outcome = finalize(&store, &config, &mut task, &clock).await.unwrap();

        assert!(matches!(outcome, RunOutcome::Failed { .. }));
        assert_eq!(store.load_task("TASK-0001").unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn skip_is_a_noop_when_already_fully_resolved() {
        let dir = tempdir().unwrap();
        let _ = dir.path();
        let store = Store::open_in_memory().unwrap();
        let mut task = sample_task("TASK-0001", TaskStatus::Planned);
        task.execution.phases.push(PhaseResult {
            phase_id: "finalize".into(),
            status: PhaseRunStatus::Completed,
            commit_sha: Some("abc".into()),
            started_at: None,
            ended_at: None,
        });
        store.save_task(&task).unwrap();

        let clock = SystemClock;
        skip(&store, "TASK-0001", &clock).unwrap();

        let reloaded = store.load_task("TASK-0001").unwrap();
        assert_eq!(reloaded.execution.phases[0].status, PhaseRunStatus::Completed);
    }
}
