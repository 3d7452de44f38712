use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::config::{Tool, ToolCatalog};
use crate::core::task::manager::{Manager, QueueReceiver};
use crate::core::task::{Status, Task};

/// Default bound for each per-tool queue.
pub const QUEUE_BUFFER: usize = 100;

/// How long `stop` waits for in-flight tasks before giving up on the workers.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Holds the tool catalog and runs one worker pool per tool. Each worker owns
/// one task at a time: it spawns the child process, streams its output lines
/// through the manager, and writes the terminal status.
pub struct Executor {
    catalog: ToolCatalog,
    manager: Arc<Manager>,
    default_workers: usize,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Executor {
    pub fn new(catalog: ToolCatalog, default_workers: usize, manager: Arc<Manager>) -> Self {
        Executor {
            catalog,
            manager,
            default_workers,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Create each tool's queue and spawn its worker pool.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        for tool in &self.catalog.tools {
            let count = if tool.workers == 0 {
                self.default_workers
            } else {
                tool.workers
            };
            let queue = self.manager.create_queue(&tool.name, QUEUE_BUFFER).await;

            for _ in 0..count {
                workers.push(tokio::spawn(worker_loop(
                    tool.clone(),
                    queue.clone(),
                    self.manager.clone(),
                    self.shutdown.clone(),
                )));
            }
            info!("started {count} workers for {}", tool.name);
        }
    }

    /// Stop dequeuing, cancel in-flight child processes and wait for the
    /// workers, up to the grace window.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let workers = std::mem::take(&mut *self.workers.lock().await);
        let drain = async {
            for handle in workers {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("workers did not finish within the shutdown grace window");
        }
    }
}

async fn worker_loop(
    tool: Tool,
    queue: QueueReceiver,
    manager: Arc<Manager>,
    shutdown: CancellationToken,
) {
    loop {
        let task = {
            let mut receiver = queue.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => return,
                next = receiver.recv() => match next {
                    Some(task) => task,
                    None => return,
                },
            }
        };
        execute_task(&tool, task, &manager, &shutdown).await;
    }
}

async fn execute_task(
    tool: &Tool,
    task: Arc<Task>,
    manager: &Arc<Manager>,
    shutdown: &CancellationToken,
) {
    // Canceled while it sat in the queue: nothing to run.
    if task.status() != Status::Queued {
        info!("skipping task {} (no longer queued)", task.id());
        return;
    }

    info!("executing task {} with {}", task.id(), tool.name);
    if let Err(e) = manager.set_status(task.id(), Status::Running).await {
        warn!("failed to mark task {} running: {e}", task.id());
    }
    // A cancel racing the dequeue wins: the Running transition was rejected
    // and the process must never start.
    if task.status() != Status::Running {
        return;
    }

    let mut args = tool.default_args.clone();
    args.extend_from_slice(task.args());

    let mut command = Command::new(task.command());
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            fail_task(manager, &task, format!("Failed to start command: {e}")).await;
            return;
        }
    };

    let Some(stdout) = child.stdout.take() else {
        fail_task(manager, &task, "Failed to create stdout pipe: handle missing".to_string())
            .await;
        return;
    };
    let Some(stderr) = child.stderr.take() else {
        fail_task(manager, &task, "Failed to create stderr pipe: handle missing".to_string())
            .await;
        return;
    };

    let stdout_pump = spawn_output_pump(manager.clone(), task.id().to_string(), stdout, false);
    let stderr_pump = spawn_output_pump(manager.clone(), task.id().to_string(), stderr, true);

    let cancel = task.cancel_token();

    // The discriminator for the terminal state is whether the execution
    // context was already cancelled when the exit status was observed.
    // `Child::wait` is cancel safe, so racing it against the tokens and
    // re-awaiting after a kill loses nothing.
    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
        _ = shutdown.cancelled() => None,
    };
    let (exit, canceled) = match waited {
        Some(status) => (status, cancel.is_cancelled() || shutdown.is_cancelled()),
        None => {
            if let Err(e) = child.start_kill() {
                warn!("failed to kill child for task {}: {e}", task.id());
            }
            (child.wait().await, true)
        }
    };

    // The pipes hit EOF once the process is gone; drain what is buffered.
    let _ = stdout_pump.await;
    let _ = stderr_pump.await;

    match exit {
        Ok(status) if canceled => {
            finish_canceled(manager, &task).await;
            info!("task {} canceled ({status})", task.id());
        }
        Ok(status) if status.success() => {
            if let Err(e) = manager.set_status(task.id(), Status::Complete).await {
                warn!("failed to mark task {} complete: {e}", task.id());
            }
            info!("task {} completed successfully", task.id());
        }
        Ok(status) => {
            fail_task(manager, &task, format!("Command failed: {status}")).await;
        }
        Err(e) if canceled => {
            finish_canceled(manager, &task).await;
            warn!("task {} canceled, wait failed: {e}", task.id());
        }
        Err(e) => {
            fail_task(manager, &task, format!("Command failed: {e}")).await;
        }
    }
}

/// Read one pipe line by line and forward each line to the manager; stderr
/// lines carry the `[ERROR] ` prefix.
fn spawn_output_pump<R>(
    manager: Arc<Manager>,
    task_id: String,
    pipe: R,
    is_stderr: bool,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = if is_stderr {
                        format!("[ERROR] {line}")
                    } else {
                        line
                    };
                    if let Err(e) = manager.append_output(&task_id, &line).await {
                        warn!("failed to append output for task {task_id}: {e}");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("output pipe read failed for task {task_id}: {e}");
                    break;
                }
            }
        }
    })
}

async fn fail_task(manager: &Arc<Manager>, task: &Arc<Task>, error: String) {
    task.set_error(&error);
    if let Err(e) = manager.set_status(task.id(), Status::Failed).await {
        warn!("failed to mark task {} failed: {e}", task.id());
    }
}

/// Cancellation may already have written the terminal status through the
/// manager; only write it here when the worker observed the cancel first
/// (executor shutdown, or the status race).
async fn finish_canceled(manager: &Arc<Manager>, task: &Arc<Task>) {
    if task.status().is_terminal() {
        return;
    }
    if let Err(e) = manager.set_status(task.id(), Status::Canceled).await {
        warn!("failed to mark task {} canceled: {e}", task.id());
    }
}
