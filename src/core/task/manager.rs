use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, warn};

use super::{Status, Task, TaskSnapshot};
use crate::core::error::CoreError;
use crate::core::files::discovery::FileDiscovery;
use crate::core::storage::Store;

/// Capacity of each subscriber sink. A sink that stays full loses events.
const SUBSCRIBER_BUFFER: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Status,
    Output,
    FilesDiscovered,
}

/// One incremental task state change, fanned out to all subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub task_id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub tool: String,
    pub pending: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
}

/// Receiving side of a tool queue, shared by that tool's workers.
pub type QueueReceiver = Arc<Mutex<mpsc::Receiver<Arc<Task>>>>;

struct ToolQueue {
    sender: mpsc::Sender<Arc<Task>>,
    receiver: QueueReceiver,
}

/// Central coordinator: owns the live task cache, the per-tool queues and the
/// subscriber list, and writes through to the store. Locks guard only map
/// lookups and updates; nothing blocks on I/O or a channel send while one is
/// held.
pub struct Manager {
    store: Store,
    tasks: RwLock<HashMap<String, Arc<Task>>>,
    queues: RwLock<HashMap<String, ToolQueue>>,
    subscribers: RwLock<HashMap<u64, mpsc::Sender<TaskEvent>>>,
    next_subscriber_id: AtomicU64,
    discovery: OnceLock<Arc<FileDiscovery>>,
    /// Serialises mutation+broadcast pairs so every sink observes a task's
    /// events in mutation order. Only non-blocking sends happen under it.
    broadcast_lock: Mutex<()>,
}

impl Manager {
    pub fn new(store: Store) -> Self {
        Manager {
            store,
            tasks: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(0),
            discovery: OnceLock::new(),
            broadcast_lock: Mutex::new(()),
        }
    }

    /// Wire in artifact discovery. Done once at boot, after the file manager
    /// exists; tasks completing before that simply skip discovery.
    pub fn set_discovery(&self, discovery: Arc<FileDiscovery>) {
        let _ = self.discovery.set(discovery);
    }

    /// Create the bounded queue for a tool. Idempotent: repeat calls return
    /// the existing receiver.
    pub async fn create_queue(&self, tool: &str, buffer: usize) -> QueueReceiver {
        let mut queues = self.queues.write().await;
        let queue = queues.entry(tool.to_string()).or_insert_with(|| {
            let (sender, receiver) = mpsc::channel(buffer);
            ToolQueue {
                sender,
                receiver: Arc::new(Mutex::new(receiver)),
            }
        });
        queue.receiver.clone()
    }

    /// Admit a task: persist it, cache it, enqueue it. Admission is
    /// non-blocking; a full queue fails the task immediately rather than
    /// leaving a phantom Queued record behind.
    pub async fn admit(&self, task: Arc<Task>) -> Result<(), CoreError> {
        let sender = {
            let queues = self.queues.read().await;
            match queues.get(task.tool()) {
                Some(queue) => queue.sender.clone(),
                None => return Err(CoreError::UnknownTool(task.tool().to_string())),
            }
        };

        {
            let tasks = self.tasks.read().await;
            if tasks.contains_key(task.id()) {
                return Err(CoreError::DuplicateTask(task.id().to_string()));
            }
        }

        self.store.create_task(&task.snapshot()).await?;
        self.tasks
            .write()
            .await
            .insert(task.id().to_string(), task.clone());

        // Push and `created` broadcast are one critical section: a worker
        // cannot emit this task's `running` before `created` has gone out.
        let pushed = {
            let _guard = self.broadcast_lock.lock().await;
            match sender.try_send(task.clone()) {
                Ok(()) => {
                    self.broadcast(TaskEvent {
                        task_id: task.id().to_string(),
                        kind: EventKind::Created,
                        data: json!(format!("Task {} queued for {}", task.id(), task.tool())),
                    })
                    .await;
                    true
                }
                Err(TrySendError::Full(_) | TrySendError::Closed(_)) => false,
            }
        };

        if pushed {
            Ok(())
        } else {
            task.set_status(Status::Failed);
            task.set_error("queue full");
            if let Err(e) = self.store.update_task(&task.snapshot()).await {
                warn!("failed to persist queue-full failure for {}: {e}", task.id());
            }
            Err(CoreError::QueueFull(task.tool().to_string()))
        }
    }

    /// Live entity from the cache, or a synthetic one rehydrated from the
    /// store. Synthetic entities are never re-queued.
    pub async fn get(&self, id: &str) -> Result<Arc<Task>, CoreError> {
        if let Some(task) = self.tasks.read().await.get(id) {
            return Ok(task.clone());
        }
        match self.store.get_task(id).await? {
            Some(snap) => Ok(Arc::new(Task::from_snapshot(snap))),
            None => Err(CoreError::TaskNotFound(id.to_string())),
        }
    }

    /// All tasks, store-backed. Degrades to a cache scan when the store is
    /// unreadable.
    pub async fn list(&self) -> Vec<TaskSnapshot> {
        match self.store.list_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("listing tasks from store failed, falling back to cache: {e}");
                self.tasks.read().await.values().map(|t| t.snapshot()).collect()
            }
        }
    }

    pub async fn list_by_tool(&self, tool: &str) -> Vec<TaskSnapshot> {
        match self.store.list_tasks_by_tool(tool).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("listing tasks from store failed, falling back to cache: {e}");
                self.tasks
                    .read()
                    .await
                    .values()
                    .filter(|t| t.tool() == tool)
                    .map(|t| t.snapshot())
                    .collect()
            }
        }
    }

    pub async fn set_status(&self, id: &str, status: Status) -> Result<(), CoreError> {
        let task = self.get(id).await?;
        self.apply_status(&task, status).await;
        Ok(())
    }

    async fn apply_status(&self, task: &Arc<Task>, status: Status) {
        {
            let _guard = self.broadcast_lock.lock().await;
            let previous = task.status();
            if !task.set_status(status) {
                warn!(
                    "rejected status transition {previous} -> {status} for task {}",
                    task.id()
                );
                return;
            }
            self.broadcast(TaskEvent {
                task_id: task.id().to_string(),
                kind: EventKind::Status,
                data: json!(status.as_str()),
            })
            .await;
        }

        // Best effort: a failed store write degrades reads, it never fails
        // the task or crashes the worker.
        if let Err(e) = self.store.update_task(&task.snapshot()).await {
            warn!("failed to update task {} in store: {e}", task.id());
        }

        if status == Status::Complete {
            self.run_discovery(task).await;
        }
    }

    pub async fn append_output(&self, id: &str, line: &str) -> Result<(), CoreError> {
        let task = self.get(id).await?;
        {
            let _guard = self.broadcast_lock.lock().await;
            task.append_output(line);
            self.broadcast(TaskEvent {
                task_id: id.to_string(),
                kind: EventKind::Output,
                data: json!(line),
            })
            .await;
        }

        if let Err(e) = self.store.append_output(id, line).await {
            warn!("failed to persist output for task {id}: {e}");
        }
        Ok(())
    }

    /// Cancel a task. Queued tasks flip straight to Canceled and are skipped
    /// by the worker that eventually dequeues them; Running tasks get their
    /// execution context cancelled. Terminal tasks are left untouched.
    pub async fn cancel(&self, id: &str) -> Result<TaskSnapshot, CoreError> {
        let task = self.get(id).await?;
        if task.status().is_terminal() {
            return Ok(task.snapshot());
        }
        self.apply_status(&task, Status::Canceled).await;
        task.cancel_token().cancel();
        Ok(task.snapshot())
    }

    /// Register a bounded event sink. The returned id identifies the sink for
    /// `unsubscribe`; dropping the receiver alone leaves a dead sender that
    /// is skipped by broadcast.
    pub async fn subscribe(&self) -> (u64, mpsc::Receiver<TaskEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().await.insert(id, tx);
        (id, rx)
    }

    /// Drop the sink, closing the subscriber's stream exactly once.
    pub async fn unsubscribe(&self, id: u64) {
        self.subscribers.write().await.remove(&id);
    }

    /// Non-blocking fan-out: a full sink loses this event, nobody else waits.
    async fn broadcast(&self, event: TaskEvent) {
        let subscribers = self.subscribers.read().await;
        for (id, sink) in subscribers.iter() {
            match sink.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!("subscriber {id} is full, dropping event");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Per-tool scheduling health. `pending` is queue occupancy, `running`
    /// comes from the live cache, terminal counts from the store.
    pub async fn queue_stats(&self) -> HashMap<String, QueueStats> {
        let pending: Vec<(String, usize)> = {
            let queues = self.queues.read().await;
            queues
                .iter()
                .map(|(tool, q)| {
                    (
                        tool.clone(),
                        q.sender.max_capacity() - q.sender.capacity(),
                    )
                })
                .collect()
        };

        let mut stats = HashMap::new();
        for (tool, pending) in pending {
            let running = {
                let tasks = self.tasks.read().await;
                tasks
                    .values()
                    .filter(|t| t.tool() == tool && t.status() == Status::Running)
                    .count()
            };
            let (completed, failed) = match self.store.status_counts(&tool).await {
                Ok(counts) => counts,
                Err(e) => {
                    warn!("failed to count terminal tasks for {tool}: {e}");
                    (0, 0)
                }
            };
            stats.insert(
                tool.clone(),
                QueueStats {
                    tool,
                    pending,
                    running,
                    completed,
                    failed,
                },
            );
        }
        stats
    }

    async fn run_discovery(&self, task: &Arc<Task>) {
        let Some(discovery) = self.discovery.get() else {
            return;
        };
        let snap = task.snapshot();
        match discovery
            .discover_and_register(&snap.id, &snap.tool, &snap.output)
            .await
        {
            Ok(records) if !records.is_empty() => {
                let _guard = self.broadcast_lock.lock().await;
                for record in &records {
                    task.push_associated_file(&record.id);
                }
                self.broadcast(TaskEvent {
                    task_id: snap.id.clone(),
                    kind: EventKind::FilesDiscovered,
                    data: json!(records),
                })
                .await;
            }
            Ok(_) => {}
            Err(e) => warn!("artifact discovery failed for task {}: {e}", snap.id),
        }
    }
}
