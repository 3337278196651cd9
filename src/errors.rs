//! Typed error hierarchy for the engine.
//!
//! Each subsystem gets its own `thiserror` enum so callers (including
//! tests) can match on kind. [`OrcError`] is the top-level union the CLI
//! layer maps to an exit code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
    #[error("store io error: {0}")]
    Io(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("invalid branch name '{0}'")]
    InvalidBranch(String),
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("worktree locked by running task")]
    Locked,
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("gate blocked: awaiting approval for task {task_id} phase {phase}")]
    Blocked { task_id: String, phase: String },
    #[error("no prior decision to act on for task {0}")]
    NoPendingDecision(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task {task_id} is already running (pid {pid} on {hostname})")]
    AlreadyRunning {
        task_id: String,
        pid: u32,
        hostname: String,
    },
    #[error("task {0} is not blocked")]
    NotBlocked(String),
    #[error("task {0} is running; refuse to rewind/reset while running")]
    RunningRefusal(String),
    #[error("unknown phase '{0}'")]
    UnknownPhase(String),
    #[error("task {0} is not running")]
    NotRunning(String),
    #[error("task {0} is not failed")]
    NotFailed(String),
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn agent process: {0}")]
    SpawnFailed(String),
    #[error("agent exited non-zero: {0}")]
    NonZeroExit(i32),
    #[error("canceled")]
    Canceled,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("unsupported archive format")]
    UnsupportedFormat,
    #[error("file '{0}' exceeds the 100 MiB archive-bomb limit")]
    FileTooLarge(String),
    #[error("no YAML files found")]
    NoYamlFiles,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Top-level error union the CLI maps to an exit code.
#[derive(Debug, Error)]
pub enum OrcError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Worktree(#[from] WorktreeError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("task {0} not found")]
    TaskNotFound(String),
    #[error("initiative {0} not found")]
    InitiativeNotFound(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrcError {
    /// Maps to the process exit code defined in §6 of the spec.
    pub fn exit_code(&self) -> i32 {
        match self {
            OrcError::InvalidArgs(_) => 2,
            OrcError::TaskNotFound(_) | OrcError::InitiativeNotFound(_) => 3,
            OrcError::Store(StoreError::NotFound(_)) => 3,
            OrcError::Gate(GateError::Blocked { .. }) => 4,
            OrcError::Executor(ExecutorError::NonZeroExit(_)) => 5,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(OrcError::InvalidArgs("x".into()).exit_code(), 2);
        assert_eq!(OrcError::TaskNotFound("TASK-001".into()).exit_code(), 3);
        assert_eq!(
            OrcError::Gate(GateError::Blocked {
                task_id: "TASK-001".into(),
                phase: "review".into()
            })
            .exit_code(),
            4
        );
        assert_eq!(
            OrcError::Executor(ExecutorError::NonZeroExit(1)).exit_code(),
            5
        );
        assert_eq!(OrcError::Other(anyhow::anyhow!("boom")).exit_code(), 1);
    }

    #[test]
    fn already_running_carries_holder_identity() {
        let err = SchedulerError::AlreadyRunning {
            task_id: "TASK-001".into(),
            pid: 4242,
            hostname: "dev-box".into(),
        };
        assert!(err.to_string().contains("4242"));
        assert!(err.to_string().contains("dev-box"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StoreError::NotFound("TASK-001".into()));
        assert_std_error(&WorktreeError::Locked);
        assert_std_error(&GateError::NoPendingDecision("TASK-001".into()));
        assert_std_error(&ExecutorError::Canceled);
        assert_std_error(&ArchiveError::NoYamlFiles);
    }
}
