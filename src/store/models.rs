//! Data model (§3 of the spec): `Task`, `Initiative`, and the
//! supporting entities stored alongside them. Enums carry their own
//! `as_str`/`from_str` instead of relying on serde's string
//! (de)serialization so the Store's scalar index columns can store a
//! stable lowercase token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weight {
    Trivial,
    Small,
    Medium,
    Large,
    Greenfield,
}

impl Weight {
    pub fn as_str(&self) -> &'static str {
        match self {
            Weight::Trivial => "trivial",
            Weight::Small => "small",
            Weight::Medium => "medium",
            Weight::Large => "large",
            Weight::Greenfield => "greenfield",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "trivial" => Ok(Weight::Trivial),
            "small" => Ok(Weight::Small),
            "medium" => Ok(Weight::Medium),
            "large" => Ok(Weight::Large),
            "greenfield" => Ok(Weight::Greenfield),
            other => Err(format!("invalid weight: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Planned,
    Running,
    Paused,
    Blocked,
    /// An orphaned task whose executor fields have been cleared by
    /// `resume`'s pre-flight, awaiting the next phase evaluation
    /// rather than a fresh `running` start (§4.8 Resume).
    Interrupted,
    Finalizing,
    Completed,
    Failed,
    /// Not a persisted status value: derived at read time when the
    /// executor's recorded pid is no longer alive (§5 crash/orphan
    /// detection). Never written to storage.
    Orphaned,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Planned => "planned",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Interrupted => "interrupted",
            TaskStatus::Finalizing => "finalizing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Orphaned => "orphaned",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "created" => Ok(TaskStatus::Created),
            "planned" => Ok(TaskStatus::Planned),
            "running" => Ok(TaskStatus::Running),
            "paused" => Ok(TaskStatus::Paused),
            "blocked" => Ok(TaskStatus::Blocked),
            "interrupted" => Ok(TaskStatus::Interrupted),
            "finalizing" => Ok(TaskStatus::Finalizing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "orphaned" => Ok(TaskStatus::Orphaned),
            other => Err(format!("invalid task status: {other}")),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!("invalid priority: {other}")),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseRunStatus {
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_id: String,
    pub status: PhaseRunStatus,
    pub commit_sha: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostAccumulator {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Execution {
    pub phases: Vec<PhaseResult>,
    pub cost: CostAccumulator,
}

impl Execution {
    pub fn phase_mut(&mut self, phase_id: &str) -> Option<&mut PhaseResult> {
        self.phases.iter_mut().find(|p| p.phase_id == phase_id)
    }

    pub fn phase(&self, phase_id: &str) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase_id == phase_id)
    }

    /// First phase not yet completed or skipped, in declared order.
    pub fn next_unfinished(&self) -> Option<&PhaseResult> {
        self.phases
            .iter()
            .find(|p| !matches!(p.status, PhaseRunStatus::Completed | PhaseRunStatus::Skipped))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub weight: Weight,
    pub status: TaskStatus,
    #[serde(default)]
    pub current_phase: String,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub initiative_id: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub executor_pid: Option<u32>,
    #[serde(default)]
    pub executor_hostname: Option<String>,
    #[serde(default)]
    pub executor_started_at: Option<DateTime<Utc>>,
    /// OS process start time (`sysinfo::Process::start_time()`,
    /// seconds since boot epoch), recorded alongside `executor_pid` so
    /// a PID recycled after a crash isn't mistaken for the still-alive
    /// executor (§5).
    #[serde(default)]
    pub executor_start_time: Option<u64>,
    #[serde(default)]
    pub execution: Execution,
    pub branch: String,
    pub target_branch: String,
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Normalizes the legacy empty-string `initiative_id` representation
    /// to `None` on load (§9 open question decision).
    pub fn normalize(&mut self) {
        if matches!(&self.initiative_id, Some(s) if s.is_empty()) {
            self.initiative_id = None;
        }
    }

    pub fn blocked_reason(&self) -> Option<&'static str> {
        if self.status == TaskStatus::Blocked {
            Some("awaiting_approval")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiativeStatus {
    Draft,
    Active,
    Completed,
    Archived,
}

impl InitiativeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitiativeStatus::Draft => "draft",
            InitiativeStatus::Active => "active",
            InitiativeStatus::Completed => "completed",
            InitiativeStatus::Archived => "archived",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "draft" => Ok(InitiativeStatus::Draft),
            "active" => Ok(InitiativeStatus::Active),
            "completed" => Ok(InitiativeStatus::Completed),
            "archived" => Ok(InitiativeStatus::Archived),
            other => Err(format!("invalid initiative status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiativeTaskRef {
    pub id: String,
    pub title: String,
    pub stored_status: TaskStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub text: String,
    pub rationale: String,
    pub author: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Initiative {
    pub id: String,
    pub title: String,
    pub vision: String,
    pub status: InitiativeStatus,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub branch_base: Option<String>,
    #[serde(default)]
    pub branch_prefix: Option<String>,
    #[serde(default)]
    pub tasks: Vec<InitiativeTaskRef>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub task_id: String,
    pub phase: String,
    pub message_uuid: String,
    pub role: String,
    pub content: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateType {
    Auto,
    None,
    Human,
    Ai,
}

impl GateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateType::Auto => "auto",
            GateType::None => "none",
            GateType::Human => "human",
            GateType::Ai => "ai",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "auto" => Ok(GateType::Auto),
            "none" => Ok(GateType::None),
            "human" => Ok(GateType::Human),
            "ai" => Ok(GateType::Ai),
            other => Err(format!("invalid gate type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDecisionRecord {
    pub task_id: String,
    pub phase: String,
    pub gate_type: GateType,
    pub approved: bool,
    pub reason: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub task_id: String,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub sha256: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_round_trips_through_str() {
        for w in [
            Weight::Trivial,
            Weight::Small,
            Weight::Medium,
            Weight::Large,
            Weight::Greenfield,
        ] {
            assert_eq!(Weight::from_str(w.as_str()).unwrap(), w);
        }
    }

    #[test]
    fn task_normalizes_empty_initiative_id_to_none() {
        let mut t = sample_task();
        t.initiative_id = Some(String::new());
        t.normalize();
        assert_eq!(t.initiative_id, None);
    }

    #[test]
    fn execution_next_unfinished_skips_completed_and_skipped() {
        let mut exec = Execution::default();
        exec.phases.push(PhaseResult {
            phase_id: "implement".into(),
            status: PhaseRunStatus::Completed,
            commit_sha: Some("abc".into()),
            started_at: None,
            ended_at: None,
        });
        exec.phases.push(PhaseResult {
            phase_id: "test".into(),
            status: PhaseRunStatus::Skipped,
            commit_sha: None,
            started_at: None,
            ended_at: None,
        });
        exec.phases.push(PhaseResult {
            phase_id: "finalize".into(),
            status: PhaseRunStatus::Pending,
            commit_sha: None,
            started_at: None,
            ended_at: None,
        });
        assert_eq!(exec.next_unfinished().unwrap().phase_id, "finalize");
    }

    fn sample_task() -> Task {
        Task {
            id: "TASK-001".into(),
            title: "t".into(),
            description: String::new(),
            weight: Weight::Trivial,
            status: TaskStatus::Created,
            current_phase: String::new(),
            blocked_by: vec![],
            initiative_id: None,
            priority: Priority::Normal,
            executor_pid: None,
            executor_hostname: None,
            executor_started_at: None,
            executor_start_time: None,
            execution: Execution::default(),
            branch: "orc/task-001".into(),
            target_branch: "main".into(),
            workflow_id: None,
            updated_at: Utc::now(),
        }
    }
}
