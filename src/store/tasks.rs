//! Task CRUD, layered over the `tasks` table's JSON `body` column.
//! Scalar `status`/`initiative_id` columns are kept in sync on every
//! write purely so the Store can filter/sort in SQL without
//! deserializing every row.

use rusqlite::{OptionalExtension, params};

use super::Store;
use super::models::Task;
use crate::errors::StoreError;

impl Store {
    /// Upserts `task`, refusing to write a record whose `initiative_id`
    /// or any `blocked_by` entry doesn't exist in the Store — callers
    /// (including archive import) get this for free rather than having
    /// to re-check it themselves.
    pub fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        if let Some(initiative_id) = &task.initiative_id {
            if !self.initiative_exists(initiative_id)? {
                return Err(StoreError::IntegrityViolation(format!(
                    "task {} references unknown initiative {initiative_id}",
                    task.id
                )));
            }
        }
        for dep in &task.blocked_by {
            if !self.task_exists(dep)? {
                return Err(StoreError::IntegrityViolation(format!(
                    "task {} is blocked_by unknown task {dep}",
                    task.id
                )));
            }
        }

        let body = serde_json::to_string(task)
            .map_err(|e| StoreError::IntegrityViolation(e.to_string()))?;
        self.conn.execute(
            "INSERT INTO tasks (id, status, initiative_id, updated_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                initiative_id = excluded.initiative_id,
                updated_at = excluded.updated_at,
                body = excluded.body",
            params![
                task.id,
                task.status.as_str(),
                task.initiative_id,
                task.updated_at.to_rfc3339(),
                body,
            ],
        )?;
        Ok(())
    }

    pub fn load_task(&self, id: &str) -> Result<Task, StoreError> {
        let body: Option<String> = self
            .conn
            .query_row("SELECT body FROM tasks WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        let body = body.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut task: Task = serde_json::from_str(&body)
            .map_err(|e| StoreError::IntegrityViolation(e.to_string()))?;
        task.normalize();
        Ok(task)
    }

    pub fn task_exists(&self, id: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn delete_task(&self, id: &str) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn load_all_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT body FROM tasks ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut tasks = Vec::new();
        for row in rows {
            let body = row?;
            let mut task: Task = serde_json::from_str(&body)
                .map_err(|e| StoreError::IntegrityViolation(e.to_string()))?;
            task.normalize();
            tasks.push(task);
        }
        Ok(tasks)
    }

    pub fn load_tasks_by_initiative(&self, initiative_id: &str) -> Result<Vec<Task>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM tasks WHERE initiative_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![initiative_id], |row| row.get::<_, String>(0))?;
        let mut tasks = Vec::new();
        for row in rows {
            let body = row?;
            let mut task: Task = serde_json::from_str(&body)
                .map_err(|e| StoreError::IntegrityViolation(e.to_string()))?;
            task.normalize();
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Mints the next monotonic task id (`TASK-<n>`) inside the caller's
    /// transaction so concurrent minting can't race (§4.1, §5).
    pub fn next_task_id(&self) -> Result<String, StoreError> {
        let max: Option<String> = self
            .conn
            .query_row("SELECT id FROM tasks ORDER BY CAST(substr(id, 6) AS INTEGER) DESC LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        let next = match max {
            Some(id) => id
                .strip_prefix("TASK-")
                .and_then(|n| n.parse::<u64>().ok())
                .unwrap_or(0)
                + 1,
            None => 1,
        };
        Ok(format!("TASK-{next:04}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{Execution, Priority, TaskStatus, Weight};
    use chrono::Utc;

    fn sample(id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: "do the thing".into(),
            description: String::new(),
            weight: Weight::Small,
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
            branch: format!("orc/{id}"),
            target_branch: "main".into(),
            workflow_id: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.save_task(&sample("TASK-0001")).unwrap();
        let loaded = store.load_task("TASK-0001").unwrap();
        assert_eq!(loaded.title, "do the thing");
    }

    #[test]
    fn load_missing_task_errors_not_found() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.load_task("TASK-9999"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn save_is_an_upsert() {
        let store = Store::open_in_memory().unwrap();
        let mut task = sample("TASK-0001");
        store.save_task(&task).unwrap();
        task.status = TaskStatus::Running;
        store.save_task(&task).unwrap();
        assert_eq!(store.load_task("TASK-0001").unwrap().status, TaskStatus::Running);
        assert_eq!(store.load_all_tasks().unwrap().len(), 1);
    }

    #[test]
    fn next_task_id_is_monotonic() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.next_task_id().unwrap(), "TASK-0001");
        store.save_task(&sample("TASK-0001")).unwrap();
        assert_eq!(store.next_task_id().unwrap(), "TASK-0002");
        store.save_task(&sample("TASK-0002")).unwrap();
        assert_eq!(store.next_task_id().unwrap(), "TASK-0003");
    }

    #[test]
    fn delete_missing_task_errors_not_found() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.delete_task("TASK-9999"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn load_tasks_by_initiative_filters() {
        let store = Store::open_in_memory().unwrap();
        let mut t1 = sample("TASK-0001");
        t1.initiative_id = Some("INIT-0001".into());
        let t2 = sample("TASK-0002");
        store.save_task(&t1).unwrap();
        store.save_task(&t2).unwrap();
        let filtered = store.load_tasks_by_initiative("INIT-0001").unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "TASK-0001");
    }
}
