//! Content-addressed task attachments (§3 Supporting entities). Data is
//! stored inline as a BLOB; sha256 is computed by the caller so the
//! Store stays a pure persistence layer and doesn't need to know how
//! attachments are produced.

use rusqlite::{OptionalExtension, params};

use super::Store;
use super::models::Attachment;
use crate::errors::StoreError;

impl Store {
    pub fn save_attachment(&self, attachment: &Attachment) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO attachments (id, task_id, filename, content_type, size, sha256, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size = excluded.size,
                sha256 = excluded.sha256,
                data = excluded.data",
            params![
                attachment.id,
                attachment.task_id,
                attachment.filename,
                attachment.content_type,
                attachment.size as i64,
                attachment.sha256,
                attachment.data,
            ],
        )?;
        Ok(())
    }

    pub fn load_attachment(&self, id: &str) -> Result<Attachment, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, task_id, filename, content_type, size, sha256, data
                 FROM attachments WHERE id = ?1",
                params![id],
                row_to_attachment,
            )
            .optional()?;
        row.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn list_attachments(&self, task_id: &str) -> Result<Vec<Attachment>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, task_id, filename, content_type, size, sha256, data
             FROM attachments WHERE task_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![task_id], row_to_attachment)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn delete_attachment(&self, id: &str) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM attachments WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

fn row_to_attachment(row: &rusqlite::Row) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: row.get(0)?,
        task_id: row.get(1)?,
        filename: row.get(2)?,
        content_type: row.get(3)?,
        size: row.get::<_, i64>(4)? as u64,
        sha256: row.get(5)?,
        data: row.get(6)?,
    })
}
