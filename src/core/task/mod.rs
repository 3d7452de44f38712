pub mod manager;

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Task life-cycle states. `Queued` is initial; `Complete`, `Failed` and
/// `Canceled` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Queued,
    Running,
    Complete,
    Failed,
    Canceled,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Complete | Status::Failed | Status::Canceled)
    }

    /// The transition table. Everything not listed here is rejected.
    pub fn can_transition_to(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Queued, Status::Running)
                | (Status::Queued, Status::Canceled)
                | (Status::Running, Status::Complete)
                | (Status::Running, Status::Failed)
                | (Status::Running, Status::Canceled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Running => "running",
            Status::Complete => "complete",
            Status::Failed => "failed",
            Status::Canceled => "canceled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown task status '{0}'")]
pub struct ParseStatusError(String);

impl std::str::FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Status::Queued),
            "running" => Ok(Status::Running),
            "complete" => Ok(Status::Complete),
            "failed" => Ok(Status::Failed),
            "canceled" => Ok(Status::Canceled),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// A deep, immutable copy of a task at a moment in time. This is what the
/// store persists, the API serialises, and events are built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub tool: String,
    pub command: String,
    pub args: Vec<String>,
    pub status: Status,
    pub output: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub associated_files: Vec<String>,
}

/// Mutable task state guarded by the entity lock.
#[derive(Debug)]
struct TaskState {
    status: Status,
    output: Vec<String>,
    error: String,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    associated_files: Vec<String>,
}

/// One invocation of a tool. Identity fields are immutable; everything that
/// changes over the task's life sits behind the lock. No method performs I/O
/// while the lock is held.
#[derive(Debug)]
pub struct Task {
    id: String,
    tool: String,
    command: String,
    args: Vec<String>,
    created_at: DateTime<Utc>,
    state: RwLock<TaskState>,
    cancel: CancellationToken,
}

impl Task {
    pub fn new(tool: &str, command: &str, args: Vec<String>) -> Self {
        Task {
            id: Uuid::new_v4().to_string(),
            tool: tool.to_string(),
            command: command.to_string(),
            args,
            created_at: Utc::now(),
            state: RwLock::new(TaskState {
                status: Status::Queued,
                output: Vec::new(),
                error: String::new(),
                started_at: None,
                ended_at: None,
                associated_files: Vec::new(),
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Rehydrate an entity from a persisted snapshot. Used for tasks that are
    /// no longer in the live cache; such entities are never re-queued.
    pub fn from_snapshot(snap: TaskSnapshot) -> Self {
        Task {
            id: snap.id,
            tool: snap.tool,
            command: snap.command,
            args: snap.args,
            created_at: snap.created_at,
            state: RwLock::new(TaskState {
                status: snap.status,
                output: snap.output,
                error: snap.error,
                started_at: snap.started_at,
                ended_at: snap.ended_at,
                associated_files: snap.associated_files,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn status(&self) -> Status {
        self.state.read().status
    }

    /// Token cancelled when the task is asked to stop. Workers tie the child
    /// process to it; cancelling a queued task just flips the status.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn append_output(&self, line: &str) {
        self.state.write().output.push(line.to_string());
    }

    /// Apply a status transition, stamping `started_at`/`ended_at` on the
    /// first entry into Running / a terminal state. Returns false when the
    /// transition is not permitted; the caller decides how loudly to complain.
    pub fn set_status(&self, next: Status) -> bool {
        let mut state = self.state.write();
        if !state.status.can_transition_to(next) {
            return false;
        }
        state.status = next;
        match next {
            Status::Running => state.started_at = Some(Utc::now()),
            Status::Complete | Status::Failed | Status::Canceled => {
                state.ended_at = Some(Utc::now());
            }
            Status::Queued => {}
        }
        true
    }

    pub fn set_error(&self, msg: &str) {
        self.state.write().error = msg.to_string();
    }

    pub fn push_associated_file(&self, file_id: &str) {
        self.state.write().associated_files.push(file_id.to_string());
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state.read();
        TaskSnapshot {
            id: self.id.clone(),
            tool: self.tool.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            status: state.status,
            output: state.output.clone(),
            error: state.error.clone(),
            created_at: self.created_at,
            started_at: state.started_at,
            ended_at: state.ended_at,
            associated_files: state.associated_files.clone(),
        }
    }
}
