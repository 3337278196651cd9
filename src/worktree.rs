//! Worktree Manager (§4.3): one git worktree per running task, so
//! concurrent tasks never collide on the working directory. Built on
//! `git2`'s `Repository`/`Signature`/index/tree/commit plumbing for
//! checkpoint commits, plus `Repository::worktree`/`find_worktree` for
//! the worktree lifecycle itself.

use std::path::{Path, PathBuf};

use chrono::Utc;
use git2::{Repository, WorktreeAddOptions};

use crate::errors::WorktreeError;

/// Only `[a-zA-Z0-9/_-]`, matching git's own ref-name restrictions
/// closely enough to reject the dangerous cases (no `..`, no leading
/// `-`, no whitespace) without reimplementing git's full grammar.
pub fn validate_branch_name(name: &str) -> Result<(), WorktreeError> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && !name.contains("..")
        && !name.contains(' ')
        && !name.ends_with('/')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(WorktreeError::InvalidBranch(name.to_string()))
    }
}

pub struct WorktreeHandle {
    pub path: PathBuf,
    pub branch: String,
}

/// Acquires (creating if necessary) the worktree for `task_id` off
/// `branch`, based at `target_branch`. Idempotent: calling this again
/// for the same task id returns the existing worktree rather than
/// erroring, so a scheduler resuming after a crash can re-acquire.
pub fn acquire(
    project_root: &Path,
    worktrees_dir: &Path,
    task_id: &str,
    branch: &str,
    target_branch: &str,
) -> Result<WorktreeHandle, WorktreeError> {
    validate_branch_name(branch)?;

    let repo = Repository::open(project_root)?;
    let worktree_name = task_id.to_lowercase();
    let worktree_path = worktrees_dir.join(&worktree_name);

    if let Ok(existing) = repo.find_worktree(&worktree_name) {
        if existing.is_locked().is_ok() && worktree_path.exists() {
            return Ok(WorktreeHandle {
                path: worktree_path,
                branch: branch.to_string(),
            });
        }
    }

    std::fs::create_dir_all(worktrees_dir)?;

    let target_ref = repo
        .find_branch(target_branch, git2::BranchType::Local)
        .map_err(WorktreeError::Git)?;
    let target_commit = target_ref.get().peel_to_commit().map_err(WorktreeError::Git)?;

    let branch_ref = match repo.find_branch(branch, git2::BranchType::Local) {
        Ok(existing) => existing,
        Err(_) => repo.branch(branch, &target_commit, false)?,
    };

    let mut opts = WorktreeAddOptions::new();
    opts.reference(Some(branch_ref.get()));
    repo.worktree(&worktree_name, &worktree_path, Some(&opts))?;

    Ok(WorktreeHandle {
        path: worktree_path,
        branch: branch.to_string(),
    })
}

/// Releases (prunes) the worktree for a completed/failed task.
pub fn release(project_root: &Path, task_id: &str) -> Result<(), WorktreeError> {
    let repo = Repository::open(project_root)?;
    let worktree_name = task_id.to_lowercase();
    if let Ok(worktree) = repo.find_worktree(&worktree_name) {
        let mut opts = git2::WorktreePruneOptions::new();
        opts.valid(true).working_tree(true);
        worktree.prune(Some(&mut opts))?;
    }
    Ok(())
}

/// Reaps worktrees whose owning task is gone from the Store, called
/// from the same best-effort path as `liveness`'s orphan sweep.
pub fn reap_orphaned(project_root: &Path, live_task_ids: &[String]) -> Result<Vec<String>, WorktreeError> {
    let repo = Repository::open(project_root)?;
    let live: std::collections::HashSet<String> =
        live_task_ids.iter().map(|id| id.to_lowercase()).collect();

    let mut reaped = Vec::new();
    for name in repo.worktrees()?.iter().flatten() {
        if !live.contains(name) {
            if let Ok(worktree) = repo.find_worktree(name) {
                let mut opts = git2::WorktreePruneOptions::new();
                opts.valid(true).working_tree(true);
                worktree.prune(Some(&mut opts))?;
                reaped.push(name.to_string());
            }
        }
    }
    Ok(reaped)
}

/// Merges `branch`'s tip into `target_branch` (§4.8: a task's last
/// phase lands its work on the branch it was planned against) entirely
/// through the object database — no checkout of either ref in the main
/// repo's working directory, so it's safe to call while other tasks'
/// worktrees are still checked out. Returns `Ok(true)` once
/// `target_branch` reflects the merge (including a no-op when it's
/// already up to date, or a fast-forward), `Ok(false)` if the merge
/// produced conflicts, in which case nothing is written.
pub fn merge_into_target(project_root: &Path, branch: &str, target_branch: &str) -> Result<bool, WorktreeError> {
    let repo = Repository::open(project_root)?;

    let branch_commit = repo
        .find_branch(branch, git2::BranchType::Local)?
        .get()
        .peel_to_commit()?;
    let target_ref_name = format!("refs/heads/{target_branch}");
    let target_commit = repo
        .find_branch(target_branch, git2::BranchType::Local)?
        .get()
        .peel_to_commit()?;

    if branch_commit.id() == target_commit.id() {
        return Ok(true);
    }

    let branch_annotated = repo.find_annotated_commit(branch_commit.id())?;
    let (analysis, _) = repo.merge_analysis(&[&branch_annotated])?;

    if analysis.is_up_to_date() {
        return Ok(true);
    }

    if analysis.is_fast_forward() {
        repo.reference(&target_ref_name, branch_commit.id(), true, &format!("fast-forward merge of {branch}"))?;
        return Ok(true);
    }

    let mut index = repo.merge_commits(&target_commit, &branch_commit, None)?;
    if index.has_conflicts() {
        return Ok(false);
    }

    let tree_oid = index.write_tree_to(&repo)?;
    let tree = repo.find_tree(tree_oid)?;
    let signature = git2::Signature::now("orc", "orc@localhost")?;
    let message = format!("Merge {branch} into {target_branch}");
    let merge_commit = repo.commit(None, &signature, &signature, &message, &tree, &[&target_commit, &branch_commit])?;
    repo.reference(&target_ref_name, merge_commit, true, &message)?;

    Ok(true)
}

/// Stages all changes in the worktree and commits them as a phase
/// checkpoint, returning the new commit's sha: index add_all +
/// write_tree + commit against the current HEAD, scoped to the
/// worktree's own `Repository` handle rather than the main repo's.
pub fn checkpoint_commit(
    worktree_path: &Path,
    message: &str,
) -> Result<Option<String>, WorktreeError> {
    let repo = Repository::open(worktree_path)?;
    let mut index = repo.index()?;
    index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
    index.write()?;

    let tree_oid = index.write_tree()?;
    let tree = repo.find_tree(tree_oid)?;

    let head = repo.head().ok();
    let parent_commit = head.as_ref().and_then(|h| h.peel_to_commit().ok());

    if let Some(ref parent) = parent_commit
        && parent.tree_id() == tree_oid
    {
        // Nothing changed; no checkpoint needed.
        return Ok(None);
    }

    let signature = git2::Signature::now("orc", "orc@localhost")
        .or_else(|_| git2::Signature::now("orc", "orc@localhost"))?;

    let parents: Vec<&git2::Commit> = parent_commit.iter().collect();
    let oid = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        &format!("{message} ({})", Utc::now().to_rfc3339()),
        &tree,
        &parents,
    )?;

    Ok(Some(oid.to_string()))
}

/// Path of `task_id`'s worktree if it currently exists, for callers
/// that need to act on it without implicitly creating one.
pub fn worktree_path_if_exists(
    project_root: &Path,
    worktrees_dir: &Path,
    task_id: &str,
) -> Result<Option<PathBuf>, WorktreeError> {
    let repo = Repository::open(project_root)?;
    let worktree_name = task_id.to_lowercase();
    let worktree_path = worktrees_dir.join(&worktree_name);
    if repo.find_worktree(&worktree_name).is_ok() && worktree_path.exists() {
        Ok(Some(worktree_path))
    } else {
        Ok(None)
    }
}

/// Hard-resets a worktree's `HEAD`, index, and working tree to
/// `commit_sha`, discarding anything committed after it. Used by
/// `scheduler::rewind` to undo the checkpoints for phases being
/// replayed.
pub fn hard_reset_to(worktree_path: &Path, commit_sha: &str) -> Result<(), WorktreeError> {
    let repo = Repository::open(worktree_path)?;
    let oid = git2::Oid::from_str(commit_sha).map_err(WorktreeError::Git)?;
    let commit = repo.find_commit(oid)?;
    repo.reset(commit.as_object(), git2::ResetType::Hard, None)?;
    Ok(())
}

/// Unified diff of `commit_sha` against its first parent (or against
/// an empty tree, for a repo's very first commit), for the
/// transcript's file-change summary (§1.1 Git plumbing).
pub fn diff_summary(worktree_path: &Path, commit_sha: &str) -> Result<String, WorktreeError> {
    let repo = Repository::open(worktree_path)?;
    let oid = git2::Oid::from_str(commit_sha).map_err(WorktreeError::Git)?;
    let commit = repo.find_commit(oid)?;
    let new_tree = commit.tree()?;
    let old_tree = commit.parent(0).ok().map(|p| p.tree()).transpose()?;

    let diff = repo.diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), None)?;

    let mut out = String::new();
    diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
        let origin = line.origin();
        if matches!(origin, '+' | '-' | ' ') {
            out.push(origin);
        }
        out.push_str(&String::from_utf8_lossy(line.content()));
        true
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_branch_names_with_dotdot() {
        assert!(matches!(
            validate_branch_name("feature/../escape"),
            Err(WorktreeError::InvalidBranch(_))
        ));
    }

    #[test]
    fn rejects_branch_names_starting_with_dash() {
        assert!(matches!(
            validate_branch_name("-rf"),
            Err(WorktreeError::InvalidBranch(_))
        ));
    }

    #[test]
    fn accepts_ordinary_branch_names() {
        assert!(validate_branch_name("orc/task-0001").is_ok());
        assert!(validate_branch_name("feature/add-login").is_ok());
    }

    #[test]
    fn rejects_empty_branch_name() {
        assert!(validate_branch_name("").is_err());
    }

    fn init_repo(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        {
            let sig = git2::Signature::now("test", "test@example.com").unwrap();
            let mut index = repo.index().unwrap();
            let tree_oid = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_oid).unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
                .unwrap();
        }
        // Ensure a `main` branch exists pointing at the initial commit.
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch("main", &head, true).unwrap();
        repo
    }

    #[test]
    fn acquire_creates_worktree_and_branch() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let worktrees_dir = dir.path().join(".orc/worktrees");

        let handle = acquire(dir.path(), &worktrees_dir, "TASK-0001", "orc/task-0001", "main").unwrap();
        assert!(handle.path.exists());
        assert_eq!(handle.branch, "orc/task-0001");
    }

    #[test]
    fn acquire_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let worktrees_dir = dir.path().join(".orc/worktrees");

        acquire(dir.path(), &worktrees_dir, "TASK-0001", "orc/task-0001", "main").unwrap();
        let second = acquire(dir.path(), &worktrees_dir, "TASK-0001", "orc/task-0001", "main").unwrap();
        assert!(second.path.exists());
    }

    #[test]
    fn diff_summary_shows_added_lines() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let worktrees_dir = dir.path().join(".orc/worktrees");

        let handle = acquire(dir.path(), &worktrees_dir, "TASK-0001", "orc/task-0001", "main").unwrap();
        std::fs::write(handle.path.join("note.txt"), "hello\n").unwrap();
        let sha = checkpoint_commit(&handle.path, "add note").unwrap().unwrap();

        let diff = diff_summary(&handle.path, &sha).unwrap();
        assert!(diff.contains("note.txt"));
        assert!(diff.contains("+hello"));
    }

    #[test]
    fn reap_orphaned_prunes_worktrees_with_no_live_task() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let worktrees_dir = dir.path().join(".orc/worktrees");

        acquire(dir.path(), &worktrees_dir, "TASK-0001", "orc/task-0001", "main").unwrap();
        let kept = acquire(dir.path(), &worktrees_dir, "TASK-0002", "orc/task-0002", "main").unwrap();

        let reaped = reap_orphaned(dir.path(), &["TASK-0002".to_string()]).unwrap();

        assert_eq!(reaped, vec!["task-0001".to_string()]);
        assert!(kept.path.exists());
    }

    #[test]
    fn merge_into_target_fast_forwards_when_target_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let worktrees_dir = dir.path().join(".orc/worktrees");

        let handle = acquire(dir.path(), &worktrees_dir, "TASK-0001", "orc/task-0001", "main").unwrap();
        std::fs::write(handle.path.join("note.txt"), "hello\n").unwrap();
        checkpoint_commit(&handle.path, "add note").unwrap();

        let merged = merge_into_target(dir.path(), "orc/task-0001", "main").unwrap();
        assert!(merged);

        let repo = Repository::open(dir.path()).unwrap();
        let main_tip = repo.find_branch("main", git2::BranchType::Local).unwrap().get().peel_to_commit().unwrap();
        assert!(main_tip.tree().unwrap().get_path(Path::new("note.txt")).is_ok());
    }

    #[test]
    fn merge_into_target_is_a_noop_when_branches_are_already_equal() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let worktrees_dir = dir.path().join(".orc/worktrees");

        acquire(dir.path(), &worktrees_dir, "TASK-0001", "orc/task-0001", "main").unwrap();

        let merged = merge_into_target(dir.path(), "orc/task-0001", "main").unwrap();
        assert!(merged);
    }

    #[test]
    fn merge_into_target_reports_conflicts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        let worktrees_dir = dir.path().join(".orc/worktrees");

        let handle = acquire(dir.path(), &worktrees_dir, "TASK-0001", "orc/task-0001", "main").unwrap();
        std::fs::write(handle.path.join("note.txt"), "from branch\n").unwrap();
        checkpoint_commit(&handle.path, "branch edit").unwrap();

        let base_commit = repo.head().unwrap().peel_to_commit().unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        std::fs::write(dir.path().join("note.txt"), "from main\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("note.txt")).unwrap();
        index.write().unwrap();
        let tree_oid = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        let main_tip = repo.commit(Some("refs/heads/main"), &sig, &sig, "main edit", &tree, &[&base_commit]).unwrap();

        let merged = merge_into_target(dir.path(), "orc/task-0001", "main").unwrap();
        assert!(!merged);

        let repo = Repository::open(dir.path()).unwrap();
        let unchanged_tip = repo.find_branch("main", git2::BranchType::Local).unwrap().get().peel_to_commit().unwrap();
        assert_eq!(unchanged_tip.id(), main_tip);
    }

    #[test]
    fn hard_reset_discards_later_commits() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let worktrees_dir = dir.path().join(".orc/worktrees");

        let handle = acquire(dir.path(), &worktrees_dir, "TASK-0001", "orc/task-0001", "main").unwrap();
        let base_sha = {
            let repo = Repository::open(&handle.path).unwrap();
            repo.head().unwrap().peel_to_commit().unwrap().id().to_string()
        };

        std::fs::write(handle.path.join("note.txt"), "draft").unwrap();
        let first_checkpoint = checkpoint_commit(&handle.path, "phase one").unwrap();
        assert!(first_checkpoint.is_some());

        hard_reset_to(&handle.path, &base_sha).unwrap();

        assert!(!handle.path.join("note.txt").exists());
        let repo = Repository::open(&handle.path).unwrap();
        assert_eq!(repo.head().unwrap().peel_to_commit().unwrap().id().to_string(), base_sha);
    }
}
