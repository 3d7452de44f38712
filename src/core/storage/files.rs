use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::Store;
use crate::core::error::CoreError;
use crate::core::files::{DirectoryRecord, FileFilters, FileRecord};

const FILE_COLUMNS: &str =
    "id, filename, file_path, directory_id, task_id, file_size, mime_type, created_at, accessed_at";

impl Store {
    /// Insert a directory row. When the new directory is flagged default, any
    /// previous default is demoted in the same transaction, so at most one
    /// default exists at any time.
    pub async fn create_directory(&self, dir: &DirectoryRecord) -> Result<(), CoreError> {
        let mut conn = self.conn().lock().await;
        let tx = conn.transaction()?;
        if dir.is_default {
            tx.execute(
                "UPDATE download_directories SET default_dir = 0 WHERE default_dir = 1",
                [],
            )?;
        }
        tx.execute(
            "INSERT INTO download_directories (id, name, path, tool_name, default_dir, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                dir.id,
                dir.name,
                dir.path,
                dir.tool_name,
                dir.is_default,
                dir.created_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub async fn get_directory(&self, id: &str) -> Result<Option<DirectoryRecord>, CoreError> {
        let conn = self.conn().lock().await;
        let dir = conn
            .query_row(
                "SELECT id, name, path, tool_name, default_dir, created_at
                 FROM download_directories WHERE id = ?1",
                params![id],
                directory_from_row,
            )
            .optional()?;
        Ok(dir)
    }

    pub async fn list_directories(&self) -> Result<Vec<DirectoryRecord>, CoreError> {
        let conn = self.conn().lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, path, tool_name, default_dir, created_at
             FROM download_directories ORDER BY name",
        )?;
        let rows = stmt.query_map([], directory_from_row)?;
        let mut dirs = Vec::new();
        for row in rows {
            dirs.push(row?);
        }
        Ok(dirs)
    }

    pub async fn default_directory(&self) -> Result<Option<DirectoryRecord>, CoreError> {
        let conn = self.conn().lock().await;
        let dir = conn
            .query_row(
                "SELECT id, name, path, tool_name, default_dir, created_at
                 FROM download_directories WHERE default_dir = 1",
                [],
                directory_from_row,
            )
            .optional()?;
        Ok(dir)
    }

    pub async fn update_directory(&self, dir: &DirectoryRecord) -> Result<(), CoreError> {
        let mut conn = self.conn().lock().await;
        let tx = conn.transaction()?;
        if dir.is_default {
            tx.execute(
                "UPDATE download_directories SET default_dir = 0 WHERE default_dir = 1 AND id != ?1",
                params![dir.id],
            )?;
        }
        tx.execute(
            "UPDATE download_directories
             SET name = ?1, path = ?2, tool_name = ?3, default_dir = ?4
             WHERE id = ?5",
            params![dir.name, dir.path, dir.tool_name, dir.is_default, dir.id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Remove a directory and cascade to its files and their tags.
    pub async fn delete_directory(&self, id: &str) -> Result<bool, CoreError> {
        let mut conn = self.conn().lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM file_tags WHERE file_id IN (SELECT id FROM files WHERE directory_id = ?1)",
            params![id],
        )?;
        tx.execute("DELETE FROM files WHERE directory_id = ?1", params![id])?;
        let removed = tx.execute(
            "DELETE FROM download_directories WHERE id = ?1",
            params![id],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    pub async fn create_file(&self, file: &FileRecord) -> Result<(), CoreError> {
        let mut conn = self.conn().lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO files (id, filename, file_path, directory_id, task_id, file_size, mime_type, created_at, accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                file.id,
                file.filename,
                file.path,
                file.directory_id,
                file.task_id,
                file.size,
                file.mime_type,
                file.created_at,
                file.accessed_at,
            ],
        )?;
        for tag in &file.tags {
            tx.execute(
                "INSERT OR IGNORE INTO file_tags (file_id, tag) VALUES (?1, ?2)",
                params![file.id, tag],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub async fn get_file(&self, id: &str) -> Result<Option<FileRecord>, CoreError> {
        let conn = self.conn().lock().await;
        let file = conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"),
                params![id],
                file_from_row,
            )
            .optional()?;
        let Some(mut file) = file else {
            return Ok(None);
        };
        file.tags = file_tags(&conn, &file.id)?;
        Ok(Some(file))
    }

    pub async fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>, CoreError> {
        let conn = self.conn().lock().await;
        let file = conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE file_path = ?1"),
                params![path],
                file_from_row,
            )
            .optional()?;
        let Some(mut file) = file else {
            return Ok(None);
        };
        file.tags = file_tags(&conn, &file.id)?;
        Ok(Some(file))
    }

    pub async fn list_files(&self, filters: &FileFilters) -> Result<Vec<FileRecord>, CoreError> {
        let mut sql = format!("SELECT {FILE_COLUMNS} FROM files");
        let mut conditions: Vec<&str> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql + Send + Sync>> = Vec::new();

        if let Some(directory_id) = &filters.directory_id {
            conditions.push("directory_id = ?");
            args.push(Box::new(directory_id.clone()));
        }
        if let Some(mime_type) = &filters.mime_type {
            conditions.push("mime_type = ?");
            args.push(Box::new(mime_type.clone()));
        }
        if let Some(min_size) = filters.min_size {
            conditions.push("file_size >= ?");
            args.push(Box::new(min_size));
        }
        if let Some(max_size) = filters.max_size {
            conditions.push("file_size <= ?");
            args.push(Box::new(max_size));
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC");

        let conn = self.conn().lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let arg_refs: Vec<&dyn rusqlite::ToSql> =
            args.iter().map(|a| a.as_ref() as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(&arg_refs[..], file_from_row)?;

        let mut files = Vec::new();
        for row in rows {
            let mut file = row?;
            file.tags = file_tags(&conn, &file.id)?;
            files.push(file);
        }
        Ok(files)
    }

    /// Substring match on filename or path.
    pub async fn search_files(&self, query: &str) -> Result<Vec<FileRecord>, CoreError> {
        let term = format!("%{query}%");
        let conn = self.conn().lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE filename LIKE ?1 OR file_path LIKE ?1
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![term], file_from_row)?;

        let mut files = Vec::new();
        for row in rows {
            let mut file = row?;
            file.tags = file_tags(&conn, &file.id)?;
            files.push(file);
        }
        Ok(files)
    }

    pub async fn update_file(&self, file: &FileRecord) -> Result<(), CoreError> {
        let conn = self.conn().lock().await;
        conn.execute(
            "UPDATE files
             SET filename = ?1, file_path = ?2, directory_id = ?3, task_id = ?4,
                 file_size = ?5, mime_type = ?6, accessed_at = ?7
             WHERE id = ?8",
            params![
                file.filename,
                file.path,
                file.directory_id,
                file.task_id,
                file.size,
                file.mime_type,
                file.accessed_at,
                file.id,
            ],
        )?;
        Ok(())
    }

    pub async fn delete_file(&self, id: &str) -> Result<bool, CoreError> {
        let mut conn = self.conn().lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM file_tags WHERE file_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM files WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    pub async fn add_file_tag(&self, file_id: &str, tag: &str) -> Result<(), CoreError> {
        let conn = self.conn().lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO file_tags (file_id, tag) VALUES (?1, ?2)",
            params![file_id, tag],
        )?;
        Ok(())
    }
}

fn file_tags(conn: &Connection, file_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT tag FROM file_tags WHERE file_id = ?1 ORDER BY tag")?;
    let rows = stmt.query_map(params![file_id], |row| row.get::<_, String>(0))?;
    rows.collect()
}

fn directory_from_row(row: &Row<'_>) -> rusqlite::Result<DirectoryRecord> {
    Ok(DirectoryRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        tool_name: row.get(3)?,
        is_default: row.get(4)?,
        created_at: row.get::<_, DateTime<Utc>>(5)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        path: row.get(2)?,
        directory_id: row.get(3)?,
        task_id: row.get(4)?,
        size: row.get(5)?,
        mime_type: row.get(6)?,
        tags: Vec::new(),
        created_at: row.get::<_, DateTime<Utc>>(7)?,
        accessed_at: row.get::<_, DateTime<Utc>>(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn directory(name: &str, is_default: bool) -> DirectoryRecord {
        DirectoryRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            path: format!("/tmp/{name}"),
            tool_name: None,
            is_default,
            created_at: Utc::now(),
        }
    }

    fn file_in(dir: &DirectoryRecord, filename: &str, size: i64) -> FileRecord {
        FileRecord {
            id: Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            path: format!("{}/{filename}", dir.path),
            directory_id: dir.id.clone(),
            task_id: None,
            size,
            mime_type: "video/mp4".to_string(),
            tags: Vec::new(),
            created_at: Utc::now(),
            accessed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn at_most_one_default_directory() {
        let store = store();
        let first = directory("first", true);
        let second = directory("second", true);
        store.create_directory(&first).await.unwrap();
        store.create_directory(&second).await.unwrap();

        let default = store.default_directory().await.unwrap().unwrap();
        assert_eq!(default.id, second.id);

        let dirs = store.list_directories().await.unwrap();
        assert_eq!(dirs.iter().filter(|d| d.is_default).count(), 1);
    }

    #[tokio::test]
    async fn duplicate_file_path_is_rejected() {
        let store = store();
        let dir = directory("media", false);
        store.create_directory(&dir).await.unwrap();

        let file = file_in(&dir, "clip.mp4", 1024);
        store.create_file(&file).await.unwrap();

        let mut dup = file_in(&dir, "clip.mp4", 1024);
        dup.id = Uuid::new_v4().to_string();
        assert!(store.create_file(&dup).await.is_err());

        let found = store.get_file_by_path(&file.path).await.unwrap().unwrap();
        assert_eq!(found.id, file.id);
    }

    #[tokio::test]
    async fn delete_directory_cascades_to_files_and_tags() {
        let store = store();
        let dir = directory("media", false);
        store.create_directory(&dir).await.unwrap();

        let mut file = file_in(&dir, "clip.mp4", 1024);
        file.tags = vec!["music".to_string()];
        store.create_file(&file).await.unwrap();

        assert!(store.delete_directory(&dir.id).await.unwrap());
        assert!(store.get_directory(&dir.id).await.unwrap().is_none());
        assert!(store.get_file(&file.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_files_applies_filters() {
        let store = store();
        let dir_a = directory("a", false);
        let dir_b = directory("b", false);
        store.create_directory(&dir_a).await.unwrap();
        store.create_directory(&dir_b).await.unwrap();

        store.create_file(&file_in(&dir_a, "small.mp4", 10)).await.unwrap();
        store.create_file(&file_in(&dir_a, "big.mp4", 5000)).await.unwrap();
        store.create_file(&file_in(&dir_b, "other.mp4", 700)).await.unwrap();

        let in_a = store
            .list_files(&FileFilters {
                directory_id: Some(dir_a.id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(in_a.len(), 2);

        let big = store
            .list_files(&FileFilters {
                min_size: Some(1000),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(big.len(), 1);
        assert_eq!(big[0].filename, "big.mp4");

        let mid = store
            .list_files(&FileFilters {
                min_size: Some(100),
                max_size: Some(1000),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(mid.len(), 1);
        assert_eq!(mid[0].filename, "other.mp4");
    }

    #[tokio::test]
    async fn search_matches_filename_and_path() {
        let store = store();
        let dir = directory("media", false);
        store.create_directory(&dir).await.unwrap();
        store
            .create_file(&file_in(&dir, "holiday-video.mp4", 100))
            .await
            .unwrap();
        store.create_file(&file_in(&dir, "notes.txt", 10)).await.unwrap();

        let hits = store.search_files("holiday").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "holiday-video.mp4");

        // "media" only appears in the directory part of the path.
        let hits = store.search_files("media").await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_tags_are_ignored() {
        let store = store();
        let dir = directory("media", false);
        store.create_directory(&dir).await.unwrap();
        let file = file_in(&dir, "clip.mp4", 100);
        store.create_file(&file).await.unwrap();

        store.add_file_tag(&file.id, "music").await.unwrap();
        store.add_file_tag(&file.id, "music").await.unwrap();
        store.add_file_tag(&file.id, "live").await.unwrap();

        let read = store.get_file(&file.id).await.unwrap().unwrap();
        assert_eq!(read.tags, vec!["live".to_string(), "music".to_string()]);
    }
}
