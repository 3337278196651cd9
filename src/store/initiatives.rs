//! Initiative CRUD, mirroring `tasks.rs`'s JSON-body-plus-scalar-index
//! shape.

use rusqlite::{OptionalExtension, params};

use super::Store;
use super::models::Initiative;
use crate::errors::StoreError;

impl Store {
    /// Upserts `initiative`, refusing to write a record whose
    /// `blocked_by` references an initiative that doesn't exist in the
    /// Store.
    pub fn save_initiative(&self, initiative: &Initiative) -> Result<(), StoreError> {
        for dep in &initiative.blocked_by {
            if !self.initiative_exists(dep)? {
                return Err(StoreError::IntegrityViolation(format!(
                    "initiative {} is blocked_by unknown initiative {dep}",
                    initiative.id
                )));
            }
        }

        let body = serde_json::to_string(initiative)
            .map_err(|e| StoreError::IntegrityViolation(e.to_string()))?;
        self.conn.execute(
            "INSERT INTO initiatives (id, status, updated_at, body)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at,
                body = excluded.body",
            params![
                initiative.id,
                initiative.status.as_str(),
                initiative.updated_at.to_rfc3339(),
                body,
            ],
        )?;
        Ok(())
    }

    pub fn load_initiative(&self, id: &str) -> Result<Initiative, StoreError> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM initiatives WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let body = body.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        serde_json::from_str(&body).map_err(|e| StoreError::IntegrityViolation(e.to_string()))
    }

    pub fn initiative_exists(&self, id: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM initiatives WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn delete_initiative(&self, id: &str) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM initiatives WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn load_all_initiatives(&self) -> Result<Vec<Initiative>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM initiatives ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut initiatives = Vec::new();
        for row in rows {
            let body = row?;
            initiatives.push(
                serde_json::from_str(&body)
                    .map_err(|e| StoreError::IntegrityViolation(e.to_string()))?,
            );
        }
        Ok(initiatives)
    }

    pub fn next_initiative_id(&self) -> Result<String, StoreError> {
        let max: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM initiatives ORDER BY CAST(substr(id, 6) AS INTEGER) DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let next = match max {
            Some(id) => id
                .strip_prefix("INIT-")
                .and_then(|n| n.parse::<u64>().ok())
                .unwrap_or(0)
                + 1,
            None => 1,
        };
        Ok(format!("INIT-{next:04}"))
    }
}
