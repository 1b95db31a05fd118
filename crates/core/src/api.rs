//! Transport-free operation surface (spec §6, §10.4).
//!
//! Every REST endpoint in the spec's external interface table maps to one
//! function here. There is no HTTP, JSON, or auth in this crate — an outer
//! layer owns sockets and serialization and calls straight into these.

use serde::Serialize;

use crate::batch::{run_batch, BatchOutcome, BatchRequest};
use crate::error::Result;
use crate::result::{ResultId, TaskResult, TriggerReason};
use crate::runner::{FireOutcome, Runner};
use crate::store::Store;
use crate::task::{NewTask, Task, TaskId};
use crate::time::now_local;

/// A task with its most recent result embedded, matching `GET /api/tasks`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskWithLatestResult {
    #[serde(flatten)]
    pub task: Task,
    pub latest_result: Option<TaskResult>,
}

pub async fn list_tasks(store: &Store) -> Result<Vec<TaskWithLatestResult>> {
    let tasks = store.list_tasks().await?;
    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        let latest_result = store.list_results(task.id, 1).await?.into_iter().next();
        out.push(TaskWithLatestResult { task, latest_result });
    }
    Ok(out)
}

pub async fn create_task(store: &Store, new: NewTask) -> Result<Task> {
    store.insert_task(new, now_local()).await
}

pub async fn update_task(store: &Store, id: TaskId, new: NewTask) -> Result<Task> {
    store.update_task(id, new, now_local()).await
}

pub async fn delete_task(store: &Store, id: TaskId) -> Result<bool> {
    store.delete_task(id).await
}

/// Enqueues a manual fire and returns its immediate admission outcome
/// (spec §4.5 steps 1-2; `POST /api/tasks/{id}/run`).
pub async fn run_task(runner: &Runner, id: TaskId) -> Result<FireOutcome> {
    runner.process_fire(id, TriggerReason::Manual).await
}

pub async fn list_results(store: &Store, task_id: TaskId, limit: u32) -> Result<Vec<TaskResult>> {
    store.list_results(task_id, limit).await
}

pub async fn delete_result(store: &Store, task_id: TaskId, result_id: ResultId) -> Result<bool> {
    store.delete_result(task_id, result_id).await
}

pub async fn clear_results(store: &Store, task_id: TaskId) -> Result<u64> {
    store.clear_results(task_id).await
}

pub async fn run_batch_op(store: &Store, runner: &Runner, req: BatchRequest) -> Result<BatchOutcome> {
    run_batch(store, runner, req).await
}

/// `GET /api/accounts` is served by an external collaborator that enumerates
/// OS accounts; this crate only confirms whether that enumeration is
/// meaningful on the current platform (spec §6).
#[derive(Debug, Clone, Serialize)]
pub struct AccountsHook {
    pub posix_supported: bool,
    pub default_account: Option<String>,
}

pub fn accounts_hook() -> AccountsHook {
    AccountsHook {
        posix_supported: cfg!(unix),
        default_account: std::env::var("USER").or_else(|_| std::env::var("LOGNAME")).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TriggerType;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn new_task(name: &str) -> NewTask {
        NewTask {
            name: name.into(),
            account: std::env::var("USER").unwrap_or_else(|_| "root".into()),
            trigger_type: TriggerType::Schedule,
            schedule_expression: Some("*/5 * * * *".into()),
            event_type: None,
            condition_script: None,
            condition_interval: None,
            script_body: "true".into(),
            pre_task_ids: vec![],
            is_active: true,
        }
    }

    #[tokio::test]
    async fn list_tasks_embeds_latest_result() {
        let store = Store::open_in_memory().unwrap();
        let t = create_task(&store, new_task("a")).await.unwrap();
        store.insert_result(t.id, TriggerReason::Manual, now_local()).await.unwrap();

        let listed = list_tasks(&store).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].latest_result.is_some());
    }

    #[tokio::test]
    async fn run_task_returns_queued_for_a_fresh_task() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let t = create_task(&store, new_task("b")).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let runner = Runner::new(store.clone(), tx, std::time::Duration::from_secs(5), 4096, None);

        let outcome = run_task(&runner, t.id).await.unwrap();
        assert_eq!(outcome, FireOutcome::Queued);
    }

    #[test]
    fn accounts_hook_reports_platform_support() {
        let hook = accounts_hook();
        assert_eq!(hook.posix_supported, cfg!(unix));
    }
}
