//! Per-task condition probes for `trigger_type=event, event_type=script`
//! tasks (spec §4.3).
//!
//! Each active probe task gets its own loop: sleep one `condition_interval`,
//! run `condition_script` under the task's account with a bounded timeout,
//! and on exit code 0 enqueue an `event:script` fire-request. A non-zero
//! exit, a spawn failure, or a timeout is a silent no-op — there is no
//! result row and no retry backoff, by design (spec §4.3 Non-goals).
//!
//! State lives only in the running `tokio::task`: nothing is persisted, so a
//! process restart simply re-derives the active set from the store and
//! starts fresh loops (the Dispatcher's reconciliation pass does this).

use std::process::Stdio;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::result::TriggerReason;
use crate::runner::{apply_uid_gid, build_command, FireRequest};
use crate::task::{Task, TaskId};

/// Owns the background loop for one task's condition probe. Dropping aborts
/// it, so the Dispatcher can reap a poller simply by removing it from its map.
pub struct PollerHandle {
    task_id: TaskId,
    join: JoinHandle<()>,
}

impl PollerHandle {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}

pub fn spawn(
    task: Task,
    probe_timeout: Duration,
    fire_tx: mpsc::UnboundedSender<FireRequest>,
) -> PollerHandle {
    let task_id = task.id;
    let interval = Duration::from_secs(task.condition_interval.max(1) as u64);
    let script = task.condition_script.clone().unwrap_or_default();
    let account = task.account.clone();

    let join = tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            // The loop body awaits the whole probe before sleeping again,
            // which is what gives this single-flight behavior per task —
            // a slow probe simply delays the next tick rather than overlapping it.
            match tokio::time::timeout(probe_timeout, run_probe(&script, &account)).await {
                Ok(Ok(true)) => {
                    let _ = fire_tx.send(FireRequest {
                        task_id,
                        reason: TriggerReason::EventScript,
                    });
                }
                Ok(Ok(false)) | Ok(Err(_)) | Err(_) => {}
            }
        }
    });

    PollerHandle { task_id, join }
}

async fn run_probe(script: &str, account: &str) -> Result<bool, ()> {
    let mut command = build_command(script);
    #[cfg(unix)]
    apply_uid_gid(&mut command, account);
    #[cfg(not(unix))]
    let _ = account;

    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(Stdio::null());

    let status = command.status().await.map_err(|_| ())?;
    Ok(status.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TriggerType;
    use std::time::Duration as StdDuration;

    fn probe_task(script: &str, interval: u32) -> Task {
        Task {
            id: TaskId(1),
            name: "probe".into(),
            account: std::env::var("USER").unwrap_or_else(|_| "root".into()),
            trigger_type: TriggerType::Event,
            schedule_expression: None,
            event_type: Some(crate::task::EventType::Script),
            condition_script: Some(script.into()),
            condition_interval: interval,
            script_body: "true".into(),
            pre_task_ids: vec![],
            is_active: true,
            created_at: crate::time::now_local(),
            updated_at: crate::time::now_local(),
            next_run_at: None,
            last_run_at: None,
            last_status: None,
        }
    }

    #[tokio::test]
    async fn successful_probe_fires_event_script() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = probe_task("true", 1);
        let handle = spawn(task, StdDuration::from_secs(2), tx);

        let req = tokio::time::timeout(StdDuration::from_secs(3), rx.recv())
            .await
            .expect("poller should have fired within the timeout")
            .unwrap();
        assert_eq!(req.task_id, TaskId(1));
        assert_eq!(req.reason, TriggerReason::EventScript);
        drop(handle);
    }

    #[tokio::test]
    async fn failing_probe_stays_silent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = probe_task("false", 1);
        let handle = spawn(task, StdDuration::from_secs(2), tx);

        let res = tokio::time::timeout(StdDuration::from_millis(1500), rx.recv()).await;
        assert!(res.is_err(), "a failing probe must not enqueue a fire-request");
        drop(handle);
    }
}
