//! End-to-end scenarios driving the manager and executor against real child
//! processes and an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use conductor::core::config::{Tool, ToolCatalog};
use conductor::core::executor::Executor;
use conductor::core::storage::Store;
use conductor::core::task::manager::{EventKind, Manager, TaskEvent};
use conductor::core::task::{Status, Task, TaskSnapshot};

fn tool(name: &str, command: &str, workers: usize) -> Tool {
    Tool {
        name: name.to_string(),
        command: command.to_string(),
        description: String::new(),
        workers,
        default_args: Vec::new(),
    }
}

struct Service {
    manager: Arc<Manager>,
    executor: Arc<Executor>,
}

async fn start_service(tools: Vec<Tool>) -> Service {
    let store = Store::open_in_memory().unwrap();
    let manager = Arc::new(Manager::new(store));
    let executor = Arc::new(Executor::new(
        ToolCatalog { tools },
        1,
        manager.clone(),
    ));
    executor.start().await;
    Service { manager, executor }
}

async fn submit(service: &Service, tool: &str, command: &str, args: &[&str]) -> Arc<Task> {
    let task = Arc::new(Task::new(
        tool,
        command,
        args.iter().map(|s| s.to_string()).collect(),
    ));
    service.manager.admit(task.clone()).await.unwrap();
    task
}

async fn next_event(rx: &mut mpsc::Receiver<TaskEvent>) -> TaskEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

async fn wait_for_status(service: &Service, id: &str, wanted: Status) -> TaskSnapshot {
    let deadline = Duration::from_secs(10);
    let poll = async {
        loop {
            let snap = service.manager.get(id).await.unwrap().snapshot();
            if snap.status == wanted {
                return snap;
            }
            assert!(
                !snap.status.is_terminal(),
                "task settled at {:?} while waiting for {:?}",
                snap.status,
                wanted
            );
            sleep(Duration::from_millis(20)).await;
        }
    };
    timeout(deadline, poll).await.expect("task never got there")
}

#[tokio::test]
async fn happy_path_echo() {
    let service = start_service(vec![tool("echo", "echo", 1)]).await;
    let (sub, mut rx) = service.manager.subscribe().await;

    let task = submit(&service, "echo", "echo", &["hello", "world"]).await;

    let event = next_event(&mut rx).await;
    assert_eq!(event.kind, EventKind::Created);
    assert_eq!(event.task_id, task.id());

    let event = next_event(&mut rx).await;
    assert_eq!(event.kind, EventKind::Status);
    assert_eq!(event.data, serde_json::json!("running"));

    let event = next_event(&mut rx).await;
    assert_eq!(event.kind, EventKind::Output);
    assert_eq!(event.data, serde_json::json!("hello world"));

    let event = next_event(&mut rx).await;
    assert_eq!(event.kind, EventKind::Status);
    assert_eq!(event.data, serde_json::json!("complete"));

    // The store agrees with what the subscriber saw.
    let snap = wait_for_status(&service, task.id(), Status::Complete).await;
    assert_eq!(snap.output, vec!["hello world".to_string()]);
    assert!(snap.error.is_empty());
    assert!(snap.started_at.is_some() && snap.ended_at.is_some());

    service.manager.unsubscribe(sub).await;
    service.executor.stop().await;
}

#[tokio::test]
async fn stderr_lines_carry_the_error_prefix() {
    let service = start_service(vec![tool("sh", "sh", 1)]).await;

    let task = submit(&service, "sh", "sh", &["-c", "echo out; echo err 1>&2"]).await;
    wait_for_status(&service, task.id(), Status::Complete).await;

    let snap = service.manager.get(task.id()).await.unwrap().snapshot();
    assert_eq!(snap.output.len(), 2, "expected two lines, got {:?}", snap.output);
    assert!(snap.output.contains(&"out".to_string()));
    assert!(snap.output.contains(&"[ERROR] err".to_string()));

    service.executor.stop().await;
}

#[tokio::test]
async fn nonzero_exit_fails_the_task() {
    let service = start_service(vec![tool("sh", "sh", 1)]).await;

    let task = submit(&service, "sh", "sh", &["-c", "exit 2"]).await;
    let snap = wait_for_status(&service, task.id(), Status::Failed).await;

    assert!(
        snap.error.starts_with("Command failed:"),
        "unexpected error text: {:?}",
        snap.error
    );

    service.executor.stop().await;
}

#[tokio::test]
async fn cancel_while_running_kills_the_process() {
    let service = start_service(vec![tool("sh", "sh", 1)]).await;

    let task = submit(&service, "sh", "sh", &["-c", "sleep 60"]).await;
    wait_for_status(&service, task.id(), Status::Running).await;

    service.manager.cancel(task.id()).await.unwrap();

    let settle = async {
        loop {
            let snap = service.manager.get(task.id()).await.unwrap().snapshot();
            if snap.status == Status::Canceled {
                return snap;
            }
            sleep(Duration::from_millis(50)).await;
        }
    };
    let snap = timeout(Duration::from_secs(5), settle)
        .await
        .expect("cancel did not settle in time");

    let lifetime = snap.ended_at.unwrap() - snap.started_at.unwrap();
    assert!(lifetime < chrono::Duration::seconds(10));

    service.executor.stop().await;
}

#[tokio::test]
async fn cancel_queued_task_never_runs_it() {
    // No worker consumes "idle" until start; use a one-worker tool kept busy.
    let service = start_service(vec![tool("sh", "sh", 1)]).await;

    let blocker = submit(&service, "sh", "sh", &["-c", "sleep 60"]).await;
    wait_for_status(&service, blocker.id(), Status::Running).await;

    let queued = submit(&service, "sh", "sh", &["-c", "echo should-not-run"]).await;
    service.manager.cancel(queued.id()).await.unwrap();

    // Unblock the worker; it must skip the canceled task.
    service.manager.cancel(blocker.id()).await.unwrap();
    sleep(Duration::from_millis(300)).await;

    let snap = service.manager.get(queued.id()).await.unwrap().snapshot();
    assert_eq!(snap.status, Status::Canceled);
    assert!(snap.output.is_empty(), "canceled task must not produce output");
    assert!(snap.started_at.is_none());

    service.executor.stop().await;
}

#[tokio::test]
async fn full_queue_rejects_the_overflow_submission() {
    let store = Store::open_in_memory().unwrap();
    let manager = Arc::new(Manager::new(store));
    // Tight buffer ahead of the executor; create_queue is idempotent, so the
    // executor reuses it.
    manager.create_queue("slow", 2).await;
    let executor = Arc::new(Executor::new(
        ToolCatalog {
            tools: vec![tool("slow", "sleep", 1)],
        },
        1,
        manager.clone(),
    ));
    executor.start().await;
    let service = Service { manager, executor };

    let first = submit(&service, "slow", "sleep", &["10"]).await;
    wait_for_status(&service, first.id(), Status::Running).await;

    // Worker is busy: these two fill the buffer.
    submit(&service, "slow", "sleep", &["10"]).await;
    submit(&service, "slow", "sleep", &["10"]).await;

    let overflow = Arc::new(Task::new("slow", "sleep", vec!["10".to_string()]));
    let err = service.manager.admit(overflow.clone()).await.unwrap_err();
    assert!(matches!(
        err,
        conductor::core::error::CoreError::QueueFull(_)
    ));

    // Rejected, and specifically not persisted as Queued.
    let snap = service.manager.get(overflow.id()).await.unwrap().snapshot();
    assert_eq!(snap.status, Status::Failed);
    assert_eq!(snap.error, "queue full");

    service.executor.stop().await;
}

#[tokio::test]
async fn single_worker_starts_tasks_in_admission_order() {
    let service = start_service(vec![tool("sh", "sh", 1)]).await;

    let mut tasks = Vec::new();
    for _ in 0..3 {
        tasks.push(submit(&service, "sh", "sh", &["-c", "sleep 0.1"]).await);
    }
    for task in &tasks {
        wait_for_status(&service, task.id(), Status::Complete).await;
    }

    let starts: Vec<_> = tasks
        .iter()
        .map(|t| t.snapshot().started_at.unwrap())
        .collect();
    assert!(starts[0] <= starts[1] && starts[1] <= starts[2]);

    service.executor.stop().await;
}

#[tokio::test]
async fn executor_shutdown_cancels_inflight_tasks() {
    let service = start_service(vec![tool("sh", "sh", 1)]).await;

    let task = submit(&service, "sh", "sh", &["-c", "sleep 60"]).await;
    wait_for_status(&service, task.id(), Status::Running).await;

    service.executor.stop().await;

    let snap = service.manager.get(task.id()).await.unwrap().snapshot();
    assert_eq!(snap.status, Status::Canceled);
}

#[tokio::test]
async fn stats_reflect_a_worked_queue() {
    let service = start_service(vec![tool("sh", "sh", 1)]).await;

    let ok = submit(&service, "sh", "sh", &["-c", "true"]).await;
    wait_for_status(&service, ok.id(), Status::Complete).await;
    let bad = submit(&service, "sh", "sh", &["-c", "false"]).await;
    wait_for_status(&service, bad.id(), Status::Failed).await;

    let stats = service.manager.queue_stats().await;
    let sh = &stats["sh"];
    assert_eq!(sh.completed, 1);
    assert_eq!(sh.failed, 1);
    assert_eq!(sh.running, 0);
    assert_eq!(sh.pending, 0);

    service.executor.stop().await;
}
