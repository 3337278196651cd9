//! Layered configuration: `<sentinel>/config.yaml` → environment → CLI.
//!
//! File → CLI-override layering with glob-pattern phase overrides,
//! plus the automation-profile and gate-override levels the Gate
//! Resolver's cascade needs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::store::models::GateType;

/// Marker directory searched for upward from the working directory.
pub const SENTINEL_DIR: &str = ".orc";

/// Command-level flags, threaded explicitly instead of as process
/// globals (§9 Design Notes).
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    pub verbose: bool,
    pub plain: bool,
    pub quiet: bool,
    pub json: bool,
}

/// Automation profile selected by `--profile` or `defaults.profile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AutomationProfile {
    Auto,
    #[default]
    Fast,
    Safe,
    Strict,
}

impl AutomationProfile {
    /// Level 4 of the Gate Resolver cascade (§4.6).
    pub fn default_gate_type(&self) -> GateType {
        match self {
            AutomationProfile::Auto | AutomationProfile::Fast => GateType::Auto,
            AutomationProfile::Safe | AutomationProfile::Strict => GateType::Human,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub profile: AutomationProfile,
    #[serde(default = "default_weight")]
    pub default_weight: String,
    #[serde(default)]
    pub worktree_root: Option<PathBuf>,
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,
    #[serde(default)]
    pub gate_type: Option<GateType>,
    /// Executable invoked by the Executor (§4.7); overridable for
    /// tests and for operators running a differently-named build.
    #[serde(default = "default_agent_cmd")]
    pub agent_cmd: String,
}

fn default_weight() -> String {
    "medium".to_string()
}
fn default_grace_period() -> u64 {
    10
}
fn default_store_timeout() -> u64 {
    30
}
fn default_agent_cmd() -> String {
    "claude".to_string()
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            profile: AutomationProfile::default(),
            default_weight: default_weight(),
            worktree_root: None,
            grace_period_secs: default_grace_period(),
            store_timeout_secs: default_store_timeout(),
            gate_type: None,
            agent_cmd: default_agent_cmd(),
        }
    }
}

/// Level 3 of the Gate Resolver cascade: phase-template overrides
/// matched by glob pattern against the phase id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseOverride {
    #[serde(default)]
    pub gate_type: Option<GateType>,
    #[serde(default)]
    pub budget: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhasesConfig {
    #[serde(default)]
    pub overrides: HashMap<String, PhaseOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrcToml {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub phases: PhasesConfig,
    #[serde(default)]
    pub automation_profiles: HashMap<String, AutomationProfile>,
}

impl OrcToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content).context("Failed to parse config.yaml")
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize config.yaml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Level 3+4 gate resolution for one phase id, applying the first
    /// matching glob override and falling back to the automation
    /// profile's default.
    pub fn phase_gate_default(&self, phase_id: &str) -> GateType {
        for (pattern, over) in &self.phases.overrides {
            if glob_match(&pattern.to_lowercase(), &phase_id.to_lowercase())
                && let Some(gt) = over.gate_type
            {
                return gt;
            }
        }
        self.defaults.gate_type.unwrap_or_else(|| self.defaults.profile.default_gate_type())
    }

    pub fn phase_budget(&self, phase_id: &str, template_default: u32) -> u32 {
        for (pattern, over) in &self.phases.overrides {
            if glob_match(&pattern.to_lowercase(), &phase_id.to_lowercase())
                && let Some(budget) = over.budget
            {
                return budget;
            }
        }
        template_default
    }

    /// Sanity-checks the loaded config: a list of human-readable
    /// problems rather than a hard failure, since a nonsensical value
    /// shouldn't block every other command from running.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.defaults.agent_cmd.trim().is_empty() {
            problems.push("defaults.agent_cmd is empty".to_string());
        }
        if self.defaults.grace_period_secs == 0 {
            problems.push("defaults.grace_period_secs is 0; the executor would kill agents immediately on cancel".to_string());
        }
        if self.defaults.store_timeout_secs == 0 {
            problems.push("defaults.store_timeout_secs is 0; lock contention would fail instantly".to_string());
        }
        if crate::store::models::Weight::from_str(&self.defaults.default_weight).is_err() {
            problems.push(format!("defaults.default_weight '{}' is not a known weight", self.defaults.default_weight));
        }
        problems
    }
}

/// Simple glob matcher supporting `*` and `?`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let mut pattern_chars = pattern.chars().peekable();
    let mut text_chars = text.chars().peekable();

    while let Some(p) = pattern_chars.next() {
        match p {
            '*' => {
                while pattern_chars.peek() == Some(&'*') {
                    pattern_chars.next();
                }
                if pattern_chars.peek().is_none() {
                    return true;
                }
                let remaining_pattern: String = pattern_chars.collect();
                let remaining_text: String = text_chars.collect();
                for i in 0..=remaining_text.len() {
                    if glob_match(&remaining_pattern, &remaining_text[i..]) {
                        return true;
                    }
                }
                return false;
            }
            '?' => {
                if text_chars.next().is_none() {
                    return false;
                }
            }
            c => {
                if text_chars.next() != Some(c) {
                    return false;
                }
            }
        }
    }

    text_chars.next().is_none()
}

/// Resolved sentinel-relative paths for the durable layout (§6).
#[derive(Debug, Clone)]
pub struct SentinelPaths {
    pub root: PathBuf,
}

impl SentinelPaths {
    pub fn new(project_root: &Path) -> Self {
        Self {
            root: project_root.join(SENTINEL_DIR),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.yaml")
    }
    pub fn db_path(&self) -> PathBuf {
        self.root.join("orc.db")
    }
    pub fn worktrees_dir(&self) -> PathBuf {
        self.root.join("worktrees")
    }
    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

/// Unified runtime configuration: `config.yaml` plus CLI overrides.
#[derive(Debug, Clone)]
pub struct OrcConfig {
    pub project_root: PathBuf,
    pub sentinel: SentinelPaths,
    pub toml: OrcToml,
    pub output: OutputOptions,
    pub cli_profile: Option<AutomationProfile>,
    pub cli_skip_gates: bool,
}

impl OrcConfig {
    pub fn new(project_root: PathBuf) -> Result<Self> {
        let project_root = project_root
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let sentinel = SentinelPaths::new(&project_root);
        let toml = OrcToml::load_or_default(&sentinel.config_path())?;
        Ok(Self {
            project_root,
            sentinel,
            toml,
            output: OutputOptions::default(),
            cli_profile: None,
            cli_skip_gates: false,
        })
    }

    pub fn with_cli_args(
        project_root: PathBuf,
        output: OutputOptions,
        cli_profile: Option<AutomationProfile>,
        cli_skip_gates: bool,
    ) -> Result<Self> {
        let mut config = Self::new(project_root)?;
        config.output = output;
        config.cli_profile = cli_profile;
        config.cli_skip_gates = cli_skip_gates;
        Ok(config)
    }

    pub fn effective_profile(&self) -> AutomationProfile {
        self.cli_profile.unwrap_or(self.toml.defaults.profile)
    }

    pub fn grace_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.toml.defaults.grace_period_secs)
    }

    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.toml.defaults.store_timeout_secs)
    }

    /// Flags passed to `agent_cmd` by the Executor: streamed JSON
    /// output, piped prompt via stdin (`--print`), and a
    /// skip-permissions flag only under the `auto`/`fast` profiles
    /// where the gate cascade already implies unattended operation.
    pub fn agent_args(&self) -> Vec<String> {
        let mut flags = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        if matches!(self.effective_profile(), AutomationProfile::Auto | AutomationProfile::Fast) {
            flags.push("--dangerously-skip-permissions".to_string());
        }
        flags
    }

    pub fn worktree_root(&self) -> PathBuf {
        self.toml
            .defaults
            .worktree_root
            .clone()
            .unwrap_or_else(|| {
                dirs::cache_dir()
                    .unwrap_or_else(std::env::temp_dir)
                    .join("orc")
            })
    }
}
