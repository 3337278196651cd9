//! Advisory per-task locking (§5 Concurrency & Resource Model): one row
//! per held lock, keyed on `task_id` so a second scheduler process
//! racing to pick up the same task fails the unique-constraint insert
//! rather than silently double-running it.

use rusqlite::{OptionalExtension, params};

use super::Store;
use crate::errors::StoreError;

pub struct LockHolder {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: chrono::DateTime<chrono::Utc>,
}

impl Store {
    /// Acquires the advisory lock for `task_id`, failing with
    /// `StoreError::Conflict` if another holder already has it.
    pub fn acquire_lock(&self, task_id: &str, pid: u32, hostname: &str) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = self.conn.execute(
            "INSERT INTO locks (task_id, pid, hostname, acquired_at) VALUES (?1, ?2, ?3, ?4)",
            params![task_id, pid, hostname, now],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict(format!(
                    "task {task_id} is already locked"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn release_lock(&self, task_id: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM locks WHERE task_id = ?1", params![task_id])?;
        Ok(())
    }

    /// Forcibly replaces whoever holds the lock, used by the reaper
    /// once `liveness` has confirmed the prior holder's pid is dead.
    pub fn steal_lock(&self, task_id: &str, pid: u32, hostname: &str) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO locks (task_id, pid, hostname, acquired_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(task_id) DO UPDATE SET pid = excluded.pid, hostname = excluded.hostname, acquired_at = excluded.acquired_at",
            params![task_id, pid, hostname, now],
        )?;
        Ok(())
    }

    pub fn lock_holder(&self, task_id: &str) -> Result<Option<LockHolder>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT pid, hostname, acquired_at FROM locks WHERE task_id = ?1",
                params![task_id],
                |row| {
                    let acquired_at: String = row.get(2)?;
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, acquired_at))
                },
            )
            .optional()?;
        Ok(row.map(|(pid, hostname, acquired_at)| LockHolder {
            pid: pid as u32,
            hostname,
            acquired_at: chrono::DateTime::parse_from_rfc3339(&acquired_at)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now()),
        }))
    }
}
