use thiserror::Error;

/// Semantic errors surfaced by the core to its callers. The transport layer
/// maps these onto HTTP statuses; background paths log and recover instead.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("tool '{0}' is not configured")]
    UnknownTool(String),

    #[error("queue for '{0}' is full")]
    QueueFull(String),

    #[error("task {0} already exists")]
    DuplicateTask(String),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("directory {0} not found")]
    DirectoryNotFound(String),

    #[error("file {0} not found")]
    FileNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether the error is a client mistake rather than a service fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CoreError::UnknownTool(_) | CoreError::QueueFull(_) | CoreError::DuplicateTask(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::TaskNotFound(_)
                | CoreError::DirectoryNotFound(_)
                | CoreError::FileNotFound(_)
        )
    }
}
