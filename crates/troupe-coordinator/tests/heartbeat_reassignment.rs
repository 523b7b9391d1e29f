//! End-to-end liveness scenario: an agent claims a task, stops
//! heartbeating, the monitor returns the task to pending, and another
//! agent picks it up.

use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::watch;

use troupe_coordinator::{AuditTrail, LivenessConfig, TaskBoard};
use troupe_core::{AgentId, Task, TaskStatus};
use troupe_store::CoordinatorStore;

fn test_board() -> Arc<TaskBoard> {
    let store = Arc::new(CoordinatorStore::new(Connection::open_in_memory().unwrap()).unwrap());
    Arc::new(TaskBoard::new(
        store,
        Arc::new(AuditTrail::default()),
        LivenessConfig {
            monitor_interval: Duration::from_millis(25),
            heartbeat_timeout: Duration::from_millis(80),
            task_gc: Duration::from_secs(3600),
        },
    ))
}

#[tokio::test]
async fn dead_agent_task_is_reassignable_to_another_agent() {
    let board = test_board();
    let agent_x = AgentId::new("agent-x");
    let agent_y = AgentId::new("agent-y");

    let task = board
        .submit(Task::new("long job", "crunch data", "research"))
        .unwrap();
    board.claim(&task.id, &agent_x).unwrap();
    board.start(&task.id, &agent_x).unwrap();

    // one heartbeat shortly after starting, then silence
    tokio::time::sleep(Duration::from_millis(30)).await;
    board.heartbeat(&agent_x);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = tokio::spawn(board.clone().run(shutdown_rx));

    // wait past the heartbeat timeout plus at least one monitor tick
    tokio::time::sleep(Duration::from_millis(200)).await;

    let reclaimed = board.get(&task.id).unwrap();
    assert_eq!(reclaimed.status, TaskStatus::Pending);
    assert_eq!(reclaimed.assigned_to, None);

    // Y claims the freed task
    let stolen = board.claim(&task.id, &agent_y).unwrap();
    assert_eq!(stolen.assigned_to, Some(agent_y.clone()));
    assert_eq!(stolen.status, TaskStatus::Assigned);

    // a late claim by X fails while Y is alive
    board.heartbeat(&agent_y);
    assert!(board.claim(&task.id, &agent_x).is_err());

    shutdown_tx.send(true).unwrap();
    monitor.await.unwrap();

    // Y finishes the work it took over
    board.start(&task.id, &agent_y).unwrap();
    let done = board.complete(&task.id, &agent_y, "crunched", 0.85).unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.started_at.unwrap() <= done.completed_at.unwrap());
}

#[tokio::test]
async fn live_agent_keeps_its_tasks_under_monitoring() {
    let board = test_board();
    let agent = AgentId::new("steady");
    let task = board.submit(Task::new("job", "d", "development")).unwrap();
    board.claim(&task.id, &agent).unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = tokio::spawn(board.clone().run(shutdown_rx));

    // keep heartbeating through several monitor ticks
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(40)).await;
        board.heartbeat(&agent);
    }

    let still_mine = board.get(&task.id).unwrap();
    assert_eq!(still_mine.status, TaskStatus::Assigned);
    assert_eq!(still_mine.assigned_to, Some(agent));

    shutdown_tx.send(true).unwrap();
    monitor.await.unwrap();
}
