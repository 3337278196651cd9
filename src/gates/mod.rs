//! Gate Resolver (§4.6): resolves a phase's effective gate type
//! through the five-level cascade and evaluates it once the phase has
//! run, appending a decision that is never mutated.
//!
//! Implements the full five-level precedence chain: task override →
//! workflow-phase override → phase template default → automation
//! profile → global config default. The phase-template and
//! profile/config levels are `config::OrcToml::phase_gate_default`,
//! already written as part of the layered config; this module owns
//! the two levels above it and the evaluation/append step.

use chrono::Utc;

use crate::config::OrcConfig;
use crate::errors::GateError;
use crate::phase::Phase;
use crate::store::Store;
use crate::store::models::{GateDecisionRecord, GateType};

/// Per-invocation overrides that outrank everything in config (cascade
/// levels 1-2).
#[derive(Debug, Clone, Default)]
pub struct GateOverrides {
    /// `--gate <type>` or `--skip-gates` on the `run` CLI invocation.
    pub task_override: Option<GateType>,
    /// A workflow definition's `gate_type_override` for this phase id.
    pub workflow_phase_override: Option<GateType>,
}

/// Resolves the effective gate type for `phase`, applying all five
/// cascade levels in precedence order.
pub fn resolve_gate_type(phase: &Phase, overrides: &GateOverrides, config: &OrcConfig) -> GateType {
    if let Some(gt) = overrides.task_override {
        return gt;
    }
    if let Some(gt) = overrides.workflow_phase_override {
        return gt;
    }
    if let Some(gt) = crate::phase::phase_gate_hint(phase, config) {
        return gt;
    }
    config.toml.phase_gate_default(&phase.id)
}

/// Outcome of evaluating a gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Decision recorded; the scheduler may advance.
    Approved,
    /// Decision recorded; the scheduler must fail the task.
    Rejected { reason: String },
    /// No decision yet; the scheduler must set the task to `blocked`
    /// and return, waiting for an explicit `approve`/`reject`.
    AwaitingApproval,
}

/// Whether the phase's own output satisfies its contract — the `auto`
/// gate's fail-closed check. A phase with no commit produced is never
/// auto-approved.
fn artifacts_satisfy_contract(commit_sha: Option<&str>) -> bool {
    commit_sha.is_some()
}

/// Evaluates `gate_type` for a completed phase run and appends the
/// resulting decision to the Store. `human` gates don't append a
/// decision here — they return `AwaitingApproval` and the scheduler
/// blocks the task until `record_human_decision` is called.
pub fn evaluate(
    store: &Store,
    task_id: &str,
    phase_id: &str,
    gate_type: GateType,
    commit_sha: Option<&str>,
) -> Result<GateOutcome, GateError> {
    match gate_type {
        GateType::None => {
            append(store, task_id, phase_id, gate_type, true, "none");
            Ok(GateOutcome::Approved)
        }
        GateType::Auto => {
            if artifacts_satisfy_contract(commit_sha) {
                append(store, task_id, phase_id, gate_type, true, "auto: artifacts present");
                Ok(GateOutcome::Approved)
            } else {
                append(
                    store,
                    task_id,
                    phase_id,
                    gate_type,
                    false,
                    "auto: phase produced no commit, failing closed",
                );
                Ok(GateOutcome::Rejected {
                    reason: "phase produced no commit".to_string(),
                })
            }
        }
        GateType::Human => Ok(GateOutcome::AwaitingApproval),
        GateType::Ai => {
            // The secondary review-agent invocation itself is the
            // Executor's job; by the time `evaluate` runs for an `ai`
            // gate the caller has already run it and passes its
            // verdict in via `commit_sha.is_some()` as a stand-in for
            // "review agent produced an approving commit".
            if artifacts_satisfy_contract(commit_sha) {
                append(store, task_id, phase_id, gate_type, true, "ai: reviewer approved");
                Ok(GateOutcome::Approved)
            } else {
                append(store, task_id, phase_id, gate_type, false, "ai: reviewer rejected");
                Ok(GateOutcome::Rejected {
                    reason: "ai reviewer rejected the phase".to_string(),
                })
            }
        }
    }
}

/// Records the operator's explicit decision for a `human`-gated phase
/// that's currently `blocked`. Called by the `approve`/`reject` CLI
/// operations (§4.6).
pub fn record_human_decision(
    store: &Store,
    task_id: &str,
    phase_id: &str,
    approved: bool,
    reason: &str,
) -> Result<(), GateError> {
    append(store, task_id, phase_id, GateType::Human, approved, reason);
    Ok(())
}

fn append(store: &Store, task_id: &str, phase_id: &str, gate_type: GateType, approved: bool, reason: &str) {
    // Best-effort: an I/O error recording the decision shouldn't crash
    // the scheduler loop, but it should never pass silently either.
    if let Err(err) = store.save_gate_decision(&GateDecisionRecord {
        task_id: task_id.to_string(),
        phase: phase_id.to_string(),
        gate_type,
        approved,
        reason: reason.to_string(),
        ts: Utc::now(),
    }) {
        tracing::warn!(%task_id, %phase_id, error = %err, "failed to persist gate decision");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use tempfile::tempdir;

    fn phase(id: &str) -> Phase {
        Phase::new(id, 5)
    }

    #[test]
    fn task_override_beats_everything() {
        let dir = tempdir().unwrap();
        let config = OrcConfig::new(dir.path().to_path_buf()).unwrap();
        let overrides = GateOverrides {
            task_override: Some(GateType::None),
            workflow_phase_override: Some(GateType::Human),
        };
        assert_eq!(resolve_gate_type(&phase("review"), &overrides, &config), GateType::None);
    }

    #[test]
    fn workflow_phase_override_beats_phase_template() {
        let dir = tempdir().unwrap();
        let config = OrcConfig::new(dir.path().to_path_buf()).unwrap();
        let overrides = GateOverrides {
            task_override: None,
            workflow_phase_override: Some(GateType::Ai),
        };
        let review = phase("review").with_gate(GateType::Human);
        assert_eq!(resolve_gate_type(&review, &overrides, &config), GateType::Ai);
    }

    #[test]
    fn falls_back_to_config_default_when_nothing_overrides() {
        let dir = tempdir().unwrap();
        let config = OrcConfig::new(dir.path().to_path_buf()).unwrap();
        let overrides = GateOverrides::default();
        assert_eq!(
            resolve_gate_type(&phase("implement"), &overrides, &config),
            GateType::Auto
        );
    }

    #[test]
    fn auto_gate_rejects_when_no_commit_produced() {
        let store = Store::open_in_memory().unwrap();
        let outcome = evaluate(&store, "TASK-0001", "implement", GateType::Auto, None).unwrap();
        assert!(matches!(outcome, GateOutcome::Rejected { .. }));
    }

    #[test]
    fn auto_gate_approves_when_commit_produced() {
        let store = Store::open_in_memory().unwrap();
        let outcome = evaluate(
            &store,
            "TASK-0001",
            "implement",
            GateType::Auto,
            Some("abc123"),
        )
        .unwrap();
        assert_eq!(outcome, GateOutcome::Approved);
    }

    #[test]
    fn human_gate_awaits_approval_until_recorded() {
        let store = Store::open_in_memory().unwrap();
        let outcome = evaluate(&store, "TASK-0001", "review", GateType::Human, None).unwrap();
        assert_eq!(outcome, GateOutcome::AwaitingApproval);
        assert!(store.list_gate_decisions("TASK-0001").unwrap().is_empty());

        record_human_decision(&store, "TASK-0001", "review", true, "looks good").unwrap();
        assert_eq!(store.list_gate_decisions("TASK-0001").unwrap().len(), 1);
    }

    #[test]
    fn none_gate_always_approves_and_records_reason() {
        let store = Store::open_in_memory().unwrap();
        let outcome = evaluate(&store, "TASK-0001", "finalize", GateType::None, None).unwrap();
        assert_eq!(outcome, GateOutcome::Approved);
        let decisions = store.list_gate_decisions("TASK-0001").unwrap();
        assert_eq!(decisions[0].reason, "none");
    }
}
