pub mod discovery;

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::core::error::CoreError;
use crate::core::storage::Store;

/// Conventional location for the auto-created default directory, used when
/// the wiring layer does not override it.
pub const DEFAULT_DIRECTORY_PATH: &str = "./downloads";

/// A named filesystem location that artifacts are registered under.
/// Optionally bound to one tool; at most one directory is the default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default, rename = "tool_name", skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(rename = "default_dir")]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// A filesystem artifact the service has recorded, optionally attributed to
/// the task that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub filename: String,
    #[serde(rename = "file_path")]
    pub path: String,
    pub directory_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(rename = "file_size")]
    pub size: i64,
    pub mime_type: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct FileFilters {
    pub directory_id: Option<String>,
    pub mime_type: Option<String>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
}

/// Outcome of an artifact registration: the record plus whether it was newly
/// created (false means the path was already tracked).
#[derive(Debug, Clone)]
pub struct Registration {
    pub record: FileRecord,
    pub created: bool,
}

/// Directory and artifact operations on top of the store. Filesystem effects
/// (mkdir, rename, remove) happen here; row bookkeeping lives in the store.
pub struct FileManager {
    store: Store,
    default_path: String,
}

impl FileManager {
    pub fn new(store: Store, default_path: impl Into<String>) -> Self {
        FileManager {
            store,
            default_path: default_path.into(),
        }
    }

    pub async fn create_directory(
        &self,
        name: &str,
        path: &str,
        tool_name: Option<String>,
        is_default: bool,
    ) -> Result<DirectoryRecord, CoreError> {
        tokio::fs::create_dir_all(path).await?;

        let dir = DirectoryRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            path: path.to_string(),
            tool_name,
            is_default,
            created_at: Utc::now(),
        };
        self.store.create_directory(&dir).await?;
        Ok(dir)
    }

    pub async fn directory(&self, id: &str) -> Result<DirectoryRecord, CoreError> {
        self.store
            .get_directory(id)
            .await?
            .ok_or_else(|| CoreError::DirectoryNotFound(id.to_string()))
    }

    pub async fn directories(&self) -> Result<Vec<DirectoryRecord>, CoreError> {
        self.store.list_directories().await
    }

    pub async fn update_directory(&self, dir: &DirectoryRecord) -> Result<(), CoreError> {
        self.store.update_directory(dir).await
    }

    pub async fn delete_directory(&self, id: &str) -> Result<(), CoreError> {
        if !self.store.delete_directory(id).await? {
            return Err(CoreError::DirectoryNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Walk a directory tree and register every file not yet tracked.
    /// Returns how many new records were created.
    pub async fn scan_directory(&self, id: &str) -> Result<usize, CoreError> {
        let dir = self.directory(id).await?;
        let mut pending = vec![std::path::PathBuf::from(&dir.path)];
        let mut registered = 0;

        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let path_str = path.to_string_lossy().to_string();
                if self.store.get_file_by_path(&path_str).await?.is_some() {
                    continue;
                }
                let meta = entry.metadata().await?;
                let record = new_file_record(&path_str, &dir.id, None, meta.len() as i64);
                self.store.create_file(&record).await?;
                registered += 1;
            }
        }

        info!("scanned {} and registered {registered} files", dir.path);
        Ok(registered)
    }

    /// Register an artifact produced by a task. Idempotent on path: an
    /// already-tracked path returns the existing record untouched. Without an
    /// explicit directory the default directory is used, auto-created at the
    /// conventional path if none exists yet.
    pub async fn register_file_from_task(
        &self,
        task_id: &str,
        path: &str,
        directory_id: Option<&str>,
    ) -> Result<Registration, CoreError> {
        if let Some(existing) = self.store.get_file_by_path(path).await? {
            return Ok(Registration {
                record: existing,
                created: false,
            });
        }

        let meta = tokio::fs::metadata(path).await?;

        let target_dir = match directory_id {
            Some(id) => self.directory(id).await?,
            None => match self.store.default_directory().await? {
                Some(dir) => dir,
                None => {
                    let path = self.default_path.clone();
                    self.create_directory("Default Downloads", &path, None, true)
                        .await?
                }
            },
        };

        let record = new_file_record(path, &target_dir.id, Some(task_id), meta.len() as i64);
        self.store.create_file(&record).await?;
        Ok(Registration {
            record,
            created: true,
        })
    }

    pub async fn file(&self, id: &str) -> Result<FileRecord, CoreError> {
        self.store
            .get_file(id)
            .await?
            .ok_or_else(|| CoreError::FileNotFound(id.to_string()))
    }

    pub async fn files(&self, filters: &FileFilters) -> Result<Vec<FileRecord>, CoreError> {
        self.store.list_files(filters).await
    }

    pub async fn search_files(&self, query: &str) -> Result<Vec<FileRecord>, CoreError> {
        self.store.search_files(query).await
    }

    /// Move the artifact on disk into the target directory and update its row.
    pub async fn move_file(&self, file_id: &str, target_dir_id: &str) -> Result<FileRecord, CoreError> {
        let mut file = self.file(file_id).await?;
        let target = self.directory(target_dir_id).await?;

        let new_path = Path::new(&target.path).join(&file.filename);
        let new_path_str = new_path.to_string_lossy().to_string();
        tokio::fs::rename(&file.path, &new_path).await?;

        file.directory_id = target.id;
        file.path = new_path_str;
        file.accessed_at = Utc::now();
        self.store.update_file(&file).await?;
        Ok(file)
    }

    /// Remove the artifact from disk (a missing file is tolerated) and drop
    /// its record.
    pub async fn delete_file(&self, file_id: &str) -> Result<(), CoreError> {
        let file = self.file(file_id).await?;
        match tokio::fs::remove_file(&file.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.store.delete_file(file_id).await?;
        Ok(())
    }

    pub async fn tag_file(&self, file_id: &str, tags: &[String]) -> Result<(), CoreError> {
        // Validate the file exists before tagging into the void.
        let file = self.file(file_id).await?;
        for tag in tags {
            let tag = tag.trim();
            if tag.is_empty() {
                continue;
            }
            self.store.add_file_tag(&file.id, tag).await?;
        }
        Ok(())
    }
}

fn new_file_record(path: &str, directory_id: &str, task_id: Option<&str>, size: i64) -> FileRecord {
    let filename = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());
    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    FileRecord {
        id: Uuid::new_v4().to_string(),
        filename,
        path: path.to_string(),
        directory_id: directory_id.to_string(),
        task_id: task_id.map(|s| s.to_string()),
        size,
        mime_type,
        tags: Vec::new(),
        created_at: Utc::now(),
        accessed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager_with_dir(root: &Path) -> (FileManager, DirectoryRecord) {
        let store = Store::open_in_memory().unwrap();
        let manager = FileManager::new(store, DEFAULT_DIRECTORY_PATH);
        let dir = manager
            .create_directory("media", &root.to_string_lossy(), None, false)
            .await
            .unwrap();
        (manager, dir)
    }

    #[tokio::test]
    async fn register_is_idempotent_on_path() {
        let tmp = tempfile::tempdir().unwrap();
        let (manager, dir) = manager_with_dir(tmp.path()).await;

        let artifact = tmp.path().join("clip.mp4");
        std::fs::write(&artifact, b"content").unwrap();
        let path = artifact.to_string_lossy().to_string();

        let first = manager
            .register_file_from_task("task-1", &path, Some(&dir.id))
            .await
            .unwrap();
        assert!(first.created);
        assert_eq!(first.record.filename, "clip.mp4");
        assert_eq!(first.record.mime_type, "video/mp4");

        let second = manager
            .register_file_from_task("task-1", &path, Some(&dir.id))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.record.id, first.record.id);
    }

    #[tokio::test]
    async fn register_without_directory_creates_default() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        let manager = FileManager::new(
            store.clone(),
            tmp.path().join("downloads").to_string_lossy().to_string(),
        );

        let artifact = tmp.path().join("artifact.bin");
        std::fs::write(&artifact, b"data").unwrap();
        let registration = manager
            .register_file_from_task("task-1", &artifact.to_string_lossy(), None)
            .await
            .unwrap();
        assert!(registration.created);

        let default = store.default_directory().await.unwrap().unwrap();
        assert_eq!(registration.record.directory_id, default.id);
        assert_eq!(default.name, "Default Downloads");
        assert!(tmp.path().join("downloads").is_dir());
    }

    #[tokio::test]
    async fn scan_directory_registers_untracked_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"aaa").unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested/b.txt"), b"bbb").unwrap();

        let (manager, dir) = manager_with_dir(tmp.path()).await;

        assert_eq!(manager.scan_directory(&dir.id).await.unwrap(), 2);
        // Second scan finds nothing new.
        assert_eq!(manager.scan_directory(&dir.id).await.unwrap(), 0);

        let files = manager
            .files(&FileFilters {
                directory_id: Some(dir.id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn move_file_renames_on_disk_and_updates_row() {
        let tmp = tempfile::tempdir().unwrap();
        let (manager, dir) = manager_with_dir(&tmp.path().join("src")).await;
        let target = manager
            .create_directory("dest", &tmp.path().join("dest").to_string_lossy(), None, false)
            .await
            .unwrap();

        let artifact = tmp.path().join("src").join("clip.mp4");
        std::fs::write(&artifact, b"content").unwrap();
        let registered = manager
            .register_file_from_task("task-1", &artifact.to_string_lossy(), Some(&dir.id))
            .await
            .unwrap();

        let moved = manager
            .move_file(&registered.record.id, &target.id)
            .await
            .unwrap();
        assert_eq!(moved.directory_id, target.id);
        assert!(!artifact.exists());
        assert!(Path::new(&moved.path).exists());
    }

    #[tokio::test]
    async fn delete_file_tolerates_missing_file_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let (manager, dir) = manager_with_dir(tmp.path()).await;

        let artifact = tmp.path().join("gone.bin");
        std::fs::write(&artifact, b"data").unwrap();
        let registered = manager
            .register_file_from_task("task-1", &artifact.to_string_lossy(), Some(&dir.id))
            .await
            .unwrap();

        std::fs::remove_file(&artifact).unwrap();
        manager.delete_file(&registered.record.id).await.unwrap();
        assert!(manager.file(&registered.record.id).await.is_err());
    }
}
