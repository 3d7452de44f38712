mod files;
mod tasks;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::error::CoreError;

/// Durable repository for task records, output lines and artifact metadata,
/// backed by a single embedded SQLite file. The connection is shared behind a
/// mutex; SQLite serialises writes through it.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        info!("opened database at {}", path.display());
        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// An in-memory store, used by tests. Same schema, no file.
    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            tool TEXT NOT NULL,
            command TEXT NOT NULL,
            args TEXT NOT NULL,
            status TEXT NOT NULL,
            error TEXT NOT NULL DEFAULT '',
            created_at DATETIME NOT NULL,
            started_at DATETIME,
            ended_at DATETIME
        );

        CREATE TABLE IF NOT EXISTS task_outputs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL,
            output TEXT NOT NULL,
            timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (task_id) REFERENCES tasks (id)
        );

        CREATE TABLE IF NOT EXISTS download_directories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            path TEXT NOT NULL,
            tool_name TEXT,
            default_dir BOOLEAN NOT NULL DEFAULT 0,
            created_at DATETIME NOT NULL
        );

        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            file_path TEXT NOT NULL,
            directory_id TEXT NOT NULL,
            task_id TEXT,
            file_size INTEGER NOT NULL,
            mime_type TEXT NOT NULL DEFAULT 'application/octet-stream',
            created_at DATETIME NOT NULL,
            accessed_at DATETIME NOT NULL,
            FOREIGN KEY (directory_id) REFERENCES download_directories (id),
            FOREIGN KEY (task_id) REFERENCES tasks (id)
        );

        CREATE TABLE IF NOT EXISTS file_tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id TEXT NOT NULL,
            tag TEXT NOT NULL,
            FOREIGN KEY (file_id) REFERENCES files (id),
            UNIQUE (file_id, tag)
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_tool ON tasks (tool);
        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status);
        CREATE INDEX IF NOT EXISTS idx_task_outputs_task_id ON task_outputs (task_id);
        CREATE INDEX IF NOT EXISTS idx_files_directory_id ON files (directory_id);
        CREATE INDEX IF NOT EXISTS idx_files_task_id ON files (task_id);
        CREATE INDEX IF NOT EXISTS idx_files_created_at ON files (created_at);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_files_path ON files (file_path);
        CREATE INDEX IF NOT EXISTS idx_file_tags_file_id ON file_tags (file_id);",
    )
}
