//! Plan Resolver (§4.5): maps a task's `workflow_id` or `weight` to an
//! ordered phase sequence, and resolves each phase's prompt through a
//! four-level cascade: personal → local → shared → project → embedded
//! default. The lowest level is baked into the binary with
//! `include_str!` rather than pulling in `rust_embed` for a handful of
//! short prompt templates.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{OrcConfig, glob_match};
use crate::store::models::{GateType, Weight};

/// One step in a task's resolved plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    pub id: String,
    #[serde(default)]
    pub gate_hint: Option<GateType>,
    #[serde(default)]
    pub agent_hint: Option<String>,
    pub max_iterations: u32,
    #[serde(default)]
    pub thinking_enabled: bool,
}

impl Phase {
    pub fn new(id: &str, max_iterations: u32) -> Self {
        Self {
            id: id.to_string(),
            gate_hint: None,
            agent_hint: None,
            max_iterations,
            thinking_enabled: false,
        }
    }

    pub fn with_gate(mut self, gate: GateType) -> Self {
        self.gate_hint = Some(gate);
        self
    }

    pub fn with_thinking(mut self) -> Self {
        self.thinking_enabled = true;
        self
    }
}

/// A named, on-disk-overridable sequence of phases, keyed by
/// `workflow_id` and stored as `<sentinel>/workflows/<id>.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub phases: Vec<Phase>,
}

/// Built-in workflow for a weight, applied when the task has no
/// explicit `workflow_id` (§4.5 resolution order, step 2).
pub fn builtin_workflow(weight: Weight) -> Vec<Phase> {
    match weight {
        Weight::Trivial => vec![Phase::new("implement", 8), Phase::new("finalize", 3)],
        Weight::Small => vec![
            Phase::new("implement", 12),
            Phase::new("test", 8),
            Phase::new("finalize", 3),
        ],
        Weight::Medium => vec![
            Phase::new("spec", 5).with_thinking(),
            Phase::new("implement", 20),
            Phase::new("test", 12),
            Phase::new("review", 8).with_gate(GateType::Human),
            Phase::new("finalize", 3),
        ],
        Weight::Large | Weight::Greenfield => vec![
            Phase::new("spec", 8).with_thinking(),
            Phase::new("implement", 30),
            Phase::new("test", 20),
            Phase::new("docs", 8),
            Phase::new("review", 10).with_gate(GateType::Human),
            Phase::new("validate", 10),
            Phase::new("finalize", 3),
        ],
    }
}

/// Loads the workflow a task should run: its explicit `workflow_id` if
/// one is set and a matching definition exists on disk under
/// `<sentinel>/workflows/<id>.yaml`, else the weight's builtin.
pub fn resolve_plan(
    config: &OrcConfig,
    weight: Weight,
    workflow_id: Option<&str>,
) -> anyhow::Result<Vec<Phase>> {
    if let Some(id) = workflow_id {
        let path = config.sentinel.root.join("workflows").join(format!("{id}.yaml"));
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let workflow: Workflow = serde_yaml::from_str(&content)?;
            return Ok(workflow.phases);
        }
    }
    Ok(builtin_workflow(weight))
}

/// Applies the Gate Resolver's levels 2-3 (workflow-phase override,
/// phase-template default) on top of a resolved phase's own hint,
/// producing the final gate type before the automation-profile and
/// config-default levels (config.rs's `phase_gate_default`) are
/// consulted.
pub fn phase_gate_hint(phase: &Phase, config: &OrcConfig) -> Option<GateType> {
    phase.gate_hint.or_else(|| {
        config
            .toml
            .phases
            .overrides
            .iter()
            .find(|(pattern, over)| {
                glob_match(&pattern.to_lowercase(), &phase.id.to_lowercase()) && over.gate_type.is_some()
            })
            .and_then(|(_, over)| over.gate_type)
    })
}

/// Four-level prompt cascade: personal (`~/.orc/prompts/<id>.md`) →
/// local (`<sentinel>/prompts/<id>.md`) → shared
/// (`<sentinel>/../prompts/<id>.md`, a repo-root-level shared
/// directory) → project (`<sentinel>/workflows/prompts/<id>.md`) →
/// embedded default. First hit wins.
pub fn resolve_prompt(phase_id: &str, project_root: &Path, sentinel_root: &Path) -> String {
    let candidates: [PathBuf; 4] = [
        dirs::home_dir()
            .unwrap_or_default()
            .join(".orc")
            .join("prompts")
            .join(format!("{phase_id}.md")),
        sentinel_root.join("prompts").join(format!("{phase_id}.md")),
        project_root.join("prompts").join(format!("{phase_id}.md")),
        sentinel_root
            .join("workflows")
            .join("prompts")
            .join(format!("{phase_id}.md")),
    ];

    for candidate in &candidates {
        if let Ok(content) = std::fs::read_to_string(candidate) {
            return content;
        }
    }

    embedded_default_prompt(phase_id).to_string()
}

fn embedded_default_prompt(phase_id: &str) -> &'static str {
    match phase_id {
        "spec" => include_str!("../prompts/spec.md"),
        "implement" => include_str!("../prompts/implement.md"),
        "test" => include_str!("../prompts/test.md"),
        "docs" => include_str!("../prompts/docs.md"),
        "review" => include_str!("../prompts/review.md"),
        "validate" => include_str!("../prompts/validate.md"),
        "finalize" => include_str!("../prompts/finalize.md"),
        _ => "Work the current phase to completion, then emit its promise tag.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn trivial_weight_has_two_phases() {
        let phases = builtin_workflow(Weight::Trivial);
        assert_eq!(phases.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["implement", "finalize"]);
    }

    #[test]
    fn medium_review_phase_defaults_to_human_gate() {
        let phases = builtin_workflow(Weight::Medium);
        let review = phases.iter().find(|p| p.id == "review").unwrap();
        assert_eq!(review.gate_hint, Some(GateType::Human));
    }

    #[test]
    fn greenfield_and_large_share_the_same_workflow() {
        assert_eq!(builtin_workflow(Weight::Large), builtin_workflow(Weight::Greenfield));
    }

    #[test]
    fn resolve_plan_falls_back_to_builtin_when_workflow_missing() {
        let dir = tempdir().unwrap();
        let config = OrcConfig::new(dir.path().to_path_buf()).unwrap();
        let phases = resolve_plan(&config, Weight::Small, Some("nonexistent")).unwrap();
        assert_eq!(phases, builtin_workflow(Weight::Small));
    }

    #[test]
    fn resolve_plan_prefers_on_disk_workflow() {
        let dir = tempdir().unwrap();
        let config = OrcConfig::new(dir.path().to_path_buf()).unwrap();
        let workflows_dir = config.sentinel.root.join("workflows");
        std::fs::create_dir_all(&workflows_dir).unwrap();
        let custom = Workflow {
            id: "custom".into(),
            phases: vec![Phase::new("implement", 5)],
        };
        std::fs::write(
            workflows_dir.join("custom.yaml"),
            serde_yaml::to_string(&custom).unwrap(),
        )
        .unwrap();

        let phases = resolve_plan(&config, Weight::Large, Some("custom")).unwrap();
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].id, "implement");
    }

    #[test]
    fn resolve_prompt_falls_back_to_embedded_default() {
        let dir = tempdir().unwrap();
        let prompt = resolve_prompt("implement", dir.path(), &dir.path().join(".orc"));
        assert!(!prompt.is_empty());
    }
}
