//! Executor (§4.7): spawns the external agent for a single phase
//! iteration, streams its `stream-json` output, persists the
//! transcript, and accumulates token usage.
//!
//! Uses `tokio::process::Command` with piped stdio, `BufReader::lines()`
//! over stdout, one `StreamEvent` parsed per line: the single-iteration
//! unit the Phase Scheduler drives per step, persisting each message via
//! the Store as it arrives.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::config::OrcConfig;
use crate::credentials::CredentialsProvider;
use crate::errors::ExecutorError;
use chrono::Utc;

use crate::store::Store;
use crate::store::models::{CostAccumulator, TranscriptMessage};
use crate::stream::{ContentBlock, StreamEvent, assistant_text};

/// Result of one completed (or canceled) phase iteration.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub exit_code: Option<i32>,
    pub cost: CostAccumulator,
    pub canceled: bool,
}

/// Runs `prompt` against the agent CLI inside `worktree_path`,
/// streaming every message into the transcript for `(task_id, phase_id)`.
///
/// Spawn failures surface as `ExecutorError::SpawnFailed` before any
/// transcript rows are written, matching the scheduler's contract of
/// clearing executor fields without a partial transcript in that case.
pub async fn run_phase(
    store: &Store,
    config: &OrcConfig,
    task_id: &str,
    phase_id: &str,
    worktree_path: &Path,
    prompt: &str,
    credentials: &dyn CredentialsProvider,
    cancel: &CancellationToken,
) -> Result<ExecutionOutcome, ExecutorError> {
    let mut cmd = Command::new(&config.toml.defaults.agent_cmd);
    for arg in config.agent_args() {
        cmd.arg(arg);
    }
    credentials.apply(&mut cmd);
    cmd.current_dir(worktree_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .map_err(|e| ExecutorError::SpawnFailed(e.to_string()))?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(prompt.as_bytes()).await;
        let _ = stdin.shutdown().await;
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecutorError::SpawnFailed("no stdout on child process".to_string()))?;
    let mut lines = BufReader::new(stdout).lines();

    let mut cost = CostAccumulator::default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                terminate(&mut child, config.grace_period()).await;
                return Ok(ExecutionOutcome { exit_code: None, cost, canceled: true });
            }
            line = lines.next_line() => {
                let Some(line) = line.map_err(|e| ExecutorError::SpawnFailed(e.to_string()))? else {
                    break;
                };
                if line.is_empty() {
                    continue;
                }
                let Ok(event) = serde_json::from_str::<StreamEvent>(&line) else {
                    continue;
                };
                handle_event(store, task_id, phase_id, event, &mut cost);
            }
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| ExecutorError::SpawnFailed(e.to_string()))?;

    Ok(ExecutionOutcome {
        exit_code: status.code(),
        cost,
        canceled: false,
    })
}

fn handle_event(store: &Store, task_id: &str, phase_id: &str, event: StreamEvent, cost: &mut CostAccumulator) {
    match event {
        StreamEvent::Assistant { message, uuid, .. } => {
            if let Some(usage) = &message.usage {
                cost.input_tokens += usage.input_tokens;
                cost.output_tokens += usage.output_tokens;
            }
            let text = assistant_text(&message);
            let message_uuid = uuid.unwrap_or_else(|| format!("{task_id}-{phase_id}-{}", text.len()));
            if !text.is_empty() {
                let msg = TranscriptMessage {
                    task_id: task_id.to_string(),
                    phase: phase_id.to_string(),
                    message_uuid,
                    role: "assistant".to_string(),
                    content: text,
                    ts: Utc::now(),
                };
                if let Err(err) = store.add_transcript_message(&msg) {
                    tracing::warn!(%task_id, %phase_id, error = %err, "failed to persist transcript message");
                }
            }
        }
        StreamEvent::Result { result, usage, .. } => {
            if let Some(usage) = usage {
                cost.input_tokens += usage.input_tokens;
                cost.output_tokens += usage.output_tokens;
            }
            if let Some(text) = result {
                let msg = TranscriptMessage {
                    task_id: task_id.to_string(),
                    phase: phase_id.to_string(),
                    message_uuid: format!("{task_id}-{phase_id}-result"),
                    role: "result".to_string(),
                    content: text,
                    ts: Utc::now(),
                };
                if let Err(err) = store.add_transcript_message(&msg) {
                    tracing::warn!(%task_id, %phase_id, error = %err, "failed to persist result message");
                }
            }
        }
        StreamEvent::User { .. } | StreamEvent::System { .. } => {}
    }
}

async fn terminate(child: &mut Child, grace_period: std::time::Duration) {
    if let Some(pid) = child.id() {
        crate::liveness::send_signal(pid, sysinfo::Signal::Term);
    }
    let grace = tokio::time::timeout(grace_period, child.wait()).await;
    if grace.is_err() {
        if let Some(pid) = child.id() {
            crate::liveness::send_signal(pid, sysinfo::Signal::Kill);
        }
        let _ = child.wait().await;
    }
}

/// Whether a `ContentBlock::ToolUse` block in the accumulated events
/// would have produced a human-readable description; used only by the
/// CLI's live progress renderer, not by `run_phase` itself.
pub fn describe_block(block: &ContentBlock) -> Option<String> {
    match block {
        ContentBlock::ToolUse { name, input, .. } => Some(crate::stream::describe_tool_use(name, input)),
        ContentBlock::Text { .. } => None,
    }
}
