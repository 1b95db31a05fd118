//! Bulk task operations (spec §4.6).
//!
//! Each id is processed independently and placed into exactly one outcome
//! bucket; a failure on one id never aborts the rest of the batch.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::runner::{FireOutcome, Runner};
use crate::store::Store;
use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchAction {
    Delete,
    Enable,
    Disable,
    Run,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub action: BatchAction,
    pub task_ids: Vec<TaskId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteOutcome {
    pub deleted: Vec<TaskId>,
    pub missing: Vec<TaskId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivationOutcome {
    pub updated: Vec<TaskId>,
    pub unchanged: Vec<TaskId>,
    pub missing: Vec<TaskId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunOutcome {
    pub queued: Vec<TaskId>,
    pub running: Vec<TaskId>,
    pub blocked: Vec<TaskId>,
    pub missing: Vec<TaskId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BatchOutcome {
    Delete(DeleteOutcome),
    Enable(ActivationOutcome),
    Disable(ActivationOutcome),
    Run(RunOutcome),
}

pub async fn run_batch(store: &Store, runner: &Runner, req: BatchRequest) -> Result<BatchOutcome> {
    match req.action {
        BatchAction::Delete => {
            let mut out = DeleteOutcome::default();
            for id in req.task_ids {
                if store.delete_task(id).await? {
                    out.deleted.push(id);
                } else {
                    out.missing.push(id);
                }
            }
            Ok(BatchOutcome::Delete(out))
        }
        BatchAction::Enable => Ok(BatchOutcome::Enable(set_active_batch(store, req.task_ids, true).await?)),
        BatchAction::Disable => Ok(BatchOutcome::Disable(set_active_batch(store, req.task_ids, false).await?)),
        BatchAction::Run => {
            let mut out = RunOutcome::default();
            for id in req.task_ids {
                match runner.process_fire(id, crate::result::TriggerReason::Manual).await {
                    Ok(FireOutcome::Queued) => out.queued.push(id),
                    Ok(FireOutcome::Running) => out.running.push(id),
                    Ok(FireOutcome::Blocked(_)) => out.blocked.push(id),
                    Err(e) if e.kind() == crate::error::ErrorKind::NotFound => out.missing.push(id),
                    Err(e) => return Err(e),
                }
            }
            Ok(BatchOutcome::Run(out))
        }
    }
}

async fn set_active_batch(store: &Store, task_ids: Vec<TaskId>, active: bool) -> Result<ActivationOutcome> {
    let mut out = ActivationOutcome::default();
    for id in task_ids {
        let task = match store.get_task(id).await? {
            Some(t) => t,
            None => {
                out.missing.push(id);
                continue;
            }
        };
        if task.is_active == active {
            out.unchanged.push(id);
            continue;
        }
        store.set_active(id, active).await?;
        out.updated.push(id);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{NewTask, TriggerType};
    use crate::time::now_local;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn task(name: &str) -> NewTask {
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

    fn runner(store: Arc<Store>) -> Runner {
        let (tx, _rx) = mpsc::unbounded_channel();
        Runner::new(store, tx, std::time::Duration::from_secs(5), 4096, None)
    }

    #[tokio::test]
    async fn delete_partitions_found_and_missing() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let t = store.insert_task(task("x"), now_local()).await.unwrap();
        let r = runner(store.clone());

        let outcome = run_batch(
            &store,
            &r,
            BatchRequest {
                action: BatchAction::Delete,
                task_ids: vec![t.id, TaskId(9999)],
            },
        )
        .await
        .unwrap();

        match outcome {
            BatchOutcome::Delete(d) => {
                assert_eq!(d.deleted, vec![t.id]);
                assert_eq!(d.missing, vec![TaskId(9999)]);
            }
            _ => panic!("expected Delete outcome"),
        }
    }

    #[tokio::test]
    async fn disable_is_idempotent_in_one_batch() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let t1 = store.insert_task(task("a"), now_local()).await.unwrap();
        let mut inactive = task("b");
        inactive.is_active = false;
        let t2 = store.insert_task(inactive, now_local()).await.unwrap();
        let r = runner(store.clone());

        let outcome = run_batch(
            &store,
            &r,
            BatchRequest {
                action: BatchAction::Disable,
                task_ids: vec![t1.id, t2.id],
            },
        )
        .await
        .unwrap();

        match outcome {
            BatchOutcome::Disable(d) => {
                assert_eq!(d.updated, vec![t1.id]);
                assert_eq!(d.unchanged, vec![t2.id]);
            }
            _ => panic!("expected Disable outcome"),
        }
    }

    #[tokio::test]
    async fn run_action_partitions_by_fire_outcome() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let a = store.insert_task(task("a"), now_local()).await.unwrap();
        let mut blocked_def = task("b");
        blocked_def.pre_task_ids = vec![a.id];
        let b = store.insert_task(blocked_def, now_local()).await.unwrap();
        let r = runner(store.clone());

        let outcome = run_batch(
            &store,
            &r,
            BatchRequest {
                action: BatchAction::Run,
                task_ids: vec![a.id, b.id, TaskId(12345)],
            },
        )
        .await
        .unwrap();

        match outcome {
            BatchOutcome::Run(o) => {
                assert_eq!(o.queued, vec![a.id]);
                assert_eq!(o.blocked, vec![b.id]);
                assert_eq!(o.missing, vec![TaskId(12345)]);
            }
            _ => panic!("expected Run outcome"),
        }
    }
}
