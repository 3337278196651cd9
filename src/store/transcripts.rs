//! Append-only transcript and gate-decision logs (§4.1, §4.6). Both are
//! write-once-per-row tables: transcript messages dedup on
//! `message_uuid` so a resumed executor replaying output doesn't
//! double-record, and gate decisions are never updated, only appended,
//! to preserve the audit trail. `Rewind` (§4.8) is the sole operation
//! allowed to erase gate decisions, since rewinding a phase means its
//! prior approval no longer applies to the work that will replace it.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::Store;
use super::models::{GateDecisionRecord, GateType, TranscriptMessage};
use crate::errors::StoreError;

impl Store {
    pub fn add_transcript_message(&self, msg: &TranscriptMessage) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO transcripts (task_id, phase, message_uuid, role, content, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                msg.task_id,
                msg.phase,
                msg.message_uuid,
                msg.role,
                msg.content,
                msg.ts.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_transcripts(&self, task_id: &str) -> Result<Vec<TranscriptMessage>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT task_id, phase, message_uuid, role, content, ts
             FROM transcripts WHERE task_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            let ts: String = row.get(5)?;
            Ok(TranscriptMessage {
                task_id: row.get(0)?,
                phase: row.get(1)?,
                message_uuid: row.get(2)?,
                role: row.get(3)?,
                content: row.get(4)?,
                ts: parse_rfc3339(&ts),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_phase_transcripts(
        &self,
        task_id: &str,
        phase: &str,
    ) -> Result<Vec<TranscriptMessage>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT task_id, phase, message_uuid, role, content, ts
             FROM transcripts WHERE task_id = ?1 AND phase = ?2 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![task_id, phase], |row| {
            let ts: String = row.get(5)?;
            Ok(TranscriptMessage {
                task_id: row.get(0)?,
                phase: row.get(1)?,
                message_uuid: row.get(2)?,
                role: row.get(3)?,
                content: row.get(4)?,
                ts: parse_rfc3339(&ts),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn save_gate_decision(&self, decision: &GateDecisionRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO gate_decisions (task_id, phase, gate_type, approved, reason, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                decision.task_id,
                decision.phase,
                decision.gate_type.as_str(),
                decision.approved,
                decision.reason,
                decision.ts.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_gate_decisions(
        &self,
        task_id: &str,
    ) -> Result<Vec<GateDecisionRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT task_id, phase, gate_type, approved, reason, ts
             FROM gate_decisions WHERE task_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            let gate_type: String = row.get(2)?;
            let ts: String = row.get(5)?;
            Ok(GateDecisionRecord {
                task_id: row.get(0)?,
                phase: row.get(1)?,
                gate_type: GateType::from_str(&gate_type).unwrap_or(GateType::Auto),
                approved: row.get(3)?,
                reason: row.get(4)?,
                ts: parse_rfc3339(&ts),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Erases recorded gate decisions for `phase_ids` on `task_id`.
    /// Used only by `scheduler::rewind` to undo a stale approval before
    /// the phase is replayed.
    pub fn delete_gate_decisions(&self, task_id: &str, phase_ids: &[String]) -> Result<(), StoreError> {
        for phase in phase_ids {
            self.conn.execute(
                "DELETE FROM gate_decisions WHERE task_id = ?1 AND phase = ?2",
                params![task_id, phase],
            )?;
        }
        Ok(())
    }
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
