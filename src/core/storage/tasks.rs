use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::Store;
use crate::core::error::CoreError;
use crate::core::task::{Status, TaskSnapshot};

const TASK_COLUMNS: &str = "id, tool, command, args, status, error, created_at, started_at, ended_at";

impl Store {
    /// Persist a fresh task record, together with any output lines the
    /// snapshot already carries (zero for a newly admitted task).
    pub async fn create_task(&self, snap: &TaskSnapshot) -> Result<(), CoreError> {
        let mut conn = self.conn().lock().await;
        let tx = conn.transaction()?;

        let args_json = serde_json::to_string(&snap.args).unwrap_or_else(|_| "[]".to_string());
        tx.execute(
            "INSERT INTO tasks (id, tool, command, args, status, error, created_at, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                snap.id,
                snap.tool,
                snap.command,
                args_json,
                snap.status.as_str(),
                snap.error,
                snap.created_at,
                snap.started_at,
                snap.ended_at,
            ],
        )?;
        for line in &snap.output {
            insert_output(&tx, &snap.id, line)?;
        }

        tx.commit()?;
        Ok(())
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<TaskSnapshot>, CoreError> {
        let conn = self.conn().lock().await;
        let snap = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                task_from_row,
            )
            .optional()?;

        let Some(mut snap) = snap else {
            return Ok(None);
        };
        snap.output = task_output(&conn, id)?;
        snap.associated_files = task_file_ids(&conn, id)?;
        Ok(Some(snap))
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskSnapshot>, CoreError> {
        let conn = self.conn().lock().await;
        let mut stmt =
            conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC"))?;
        let rows = stmt.query_map([], task_from_row)?;

        let mut tasks = Vec::new();
        for row in rows {
            let mut snap = row?;
            snap.output = task_output(&conn, &snap.id)?;
            tasks.push(snap);
        }
        Ok(tasks)
    }

    pub async fn list_tasks_by_tool(&self, tool: &str) -> Result<Vec<TaskSnapshot>, CoreError> {
        let conn = self.conn().lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE tool = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![tool], task_from_row)?;

        let mut tasks = Vec::new();
        for row in rows {
            let mut snap = row?;
            snap.output = task_output(&conn, &snap.id)?;
            tasks.push(snap);
        }
        Ok(tasks)
    }

    /// Whole-row overwrite. Output lines are immutable once persisted and are
    /// only ever written through `append_output`.
    pub async fn update_task(&self, snap: &TaskSnapshot) -> Result<(), CoreError> {
        let conn = self.conn().lock().await;
        let args_json = serde_json::to_string(&snap.args).unwrap_or_else(|_| "[]".to_string());
        conn.execute(
            "UPDATE tasks
             SET tool = ?1, command = ?2, args = ?3, status = ?4, error = ?5,
                 created_at = ?6, started_at = ?7, ended_at = ?8
             WHERE id = ?9",
            params![
                snap.tool,
                snap.command,
                args_json,
                snap.status.as_str(),
                snap.error,
                snap.created_at,
                snap.started_at,
                snap.ended_at,
                snap.id,
            ],
        )?;
        Ok(())
    }

    pub async fn append_output(&self, task_id: &str, line: &str) -> Result<(), CoreError> {
        if line.trim().is_empty() {
            return Ok(());
        }
        let conn = self.conn().lock().await;
        insert_output(&conn, task_id, line)?;
        Ok(())
    }

    /// (completed, failed) totals for one tool, straight from the store.
    pub async fn status_counts(&self, tool: &str) -> Result<(u64, u64), CoreError> {
        let conn = self.conn().lock().await;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM tasks
             WHERE tool = ?1 AND status IN ('complete', 'failed')
             GROUP BY status",
        )?;
        let rows = stmt.query_map(params![tool], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;

        let mut completed = 0;
        let mut failed = 0;
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "complete" => completed = count,
                "failed" => failed = count,
                _ => {}
            }
        }
        Ok((completed, failed))
    }
}

fn insert_output(conn: &Connection, task_id: &str, line: &str) -> rusqlite::Result<()> {
    if line.trim().is_empty() {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO task_outputs (task_id, output) VALUES (?1, ?2)",
        params![task_id, line],
    )?;
    Ok(())
}

/// Lines ordered by insertion (ascending auto-id), matching arrival order.
fn task_output(conn: &Connection, task_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT output FROM task_outputs WHERE task_id = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![task_id], |row| row.get::<_, String>(0))?;
    rows.collect()
}

fn task_file_ids(conn: &Connection, task_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT id FROM files WHERE task_id = ?1 ORDER BY created_at")?;
    let rows = stmt.query_map(params![task_id], |row| row.get::<_, String>(0))?;
    rows.collect()
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskSnapshot> {
    let args_json: String = row.get(3)?;
    let args: Vec<String> = serde_json::from_str(&args_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    let status_raw: String = row.get(4)?;
    let status: Status = status_raw
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(TaskSnapshot {
        id: row.get(0)?,
        tool: row.get(1)?,
        command: row.get(2)?,
        args,
        status,
        output: Vec::new(),
        error: row.get(5)?,
        created_at: row.get::<_, DateTime<Utc>>(6)?,
        started_at: row.get::<_, Option<DateTime<Utc>>>(7)?,
        ended_at: row.get::<_, Option<DateTime<Utc>>>(8)?,
        associated_files: Vec::new(),
    })
}
