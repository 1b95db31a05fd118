//! Fire-request processing: single-flight and prerequisite gating, privilege
//! drop, script execution with timeout, log capture, and success cascade
//! (spec §4.5).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, Notify, Semaphore};

use crate::error::{CoreError, Result};
use crate::result::{timeout_marker, truncation_marker, ResultId, ResultStatus, TriggerReason};
use crate::store::Store;
use crate::task::{Task, TaskId};
use crate::time::now_local;

/// A request to run a task once, queued by the Dispatcher, a
/// `ConditionPoller`, or a success cascade.
#[derive(Debug, Clone)]
pub struct FireRequest {
    pub task_id: TaskId,
    pub reason: TriggerReason,
}

/// Outcome of admitting a fire-request, surfaced directly to manual/batch
/// callers (spec §4.6) and otherwise discarded by the background consume loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// A result row was opened and execution was spawned.
    Queued,
    /// Dropped: the task already has a result with `status=running`.
    Running,
    /// Dropped: at least one prerequisite has never succeeded.
    Blocked(Vec<TaskId>),
}

pub struct Runner {
    store: Arc<Store>,
    fire_tx: mpsc::UnboundedSender<FireRequest>,
    active_total: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    semaphore: Option<Arc<Semaphore>>,
    task_timeout: Duration,
    log_cap_bytes: usize,
    /// One cancellation `Notify` per task id currently executing. Used to
    /// force-terminate in-flight children when the shutdown grace period
    /// expires (spec §5 Cancellation). Guarded by a plain `std::sync::Mutex`
    /// since critical sections are tiny map ops, never held across an await.
    active_runs: Arc<Mutex<HashMap<TaskId, Arc<Notify>>>>,
}

impl Runner {
    pub fn new(
        store: Arc<Store>,
        fire_tx: mpsc::UnboundedSender<FireRequest>,
        task_timeout: Duration,
        log_cap_bytes: usize,
        max_concurrent_tasks: Option<usize>,
    ) -> Self {
        Self {
            store,
            fire_tx,
            active_total: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
            semaphore: max_concurrent_tasks.map(|n| Arc::new(Semaphore::new(n))),
            task_timeout,
            log_cap_bytes,
            active_runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Consume fire-requests from `rx` until the channel is closed, spawning
    /// one background task per admitted request so unrelated task ids
    /// execute in parallel.
    pub fn spawn_consumer(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<FireRequest>) {
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let this = self.clone();
                let task_id = req.task_id;
                tokio::spawn(async move {
                    if let Err(e) = this.process_fire(req.task_id, req.reason).await {
                        tracing::error!(%task_id, error = %e, "fire-request processing failed");
                    }
                });
            }
        });
    }

    pub fn active_count(&self) -> usize {
        self.active_total.load(Ordering::SeqCst)
    }

    /// Waits until no execution is in flight, or `grace` elapses first.
    /// Returns `true` if everything drained naturally, `false` if the grace
    /// period expired with executions still active.
    pub async fn wait_drained(&self, grace: Duration) -> bool {
        if self.active_count() == 0 {
            return true;
        }
        tokio::time::timeout(grace, async {
            loop {
                self.drained.notified().await;
                if self.active_count() == 0 {
                    break;
                }
            }
        })
        .await
        .is_ok()
    }

    /// Signals cancellation to every still-active execution and returns the
    /// task ids that were signalled, for the caller to finalize (spec §5
    /// Cancellation, grace-timeout path). Each execution kills its own child;
    /// this call only wakes it, it does not wait for the kill to land.
    pub fn cancel_active(&self) -> Vec<TaskId> {
        let active = self.active_runs.lock().unwrap();
        for cancel in active.values() {
            cancel.notify_waiters();
        }
        active.keys().copied().collect()
    }

    /// Forcibly marks every still-running result as `failed` with a shutdown
    /// marker (spec §5 Cancellation, when the grace period expires).
    pub async fn finalize_abandoned_as_shutdown(&self, task_id: TaskId) -> Result<()> {
        for result in self.store.list_results(task_id, 1).await? {
            if result.status == ResultStatus::Running {
                self.store
                    .finalize_result(
                        result.id,
                        ResultStatus::Failed,
                        now_local(),
                        &format!("{}{}", result.log, crate::result::SHUTDOWN_MARKER),
                        None,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Full admission + gating sequence for one fire (spec §4.5 steps 1-3),
    /// returning before execution completes. Used directly by manual/batch
    /// runs (which need the outcome) and by the channel consumer loop
    /// (which discards it).
    pub async fn process_fire(&self, task_id: TaskId, reason: TriggerReason) -> Result<FireOutcome> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("task {task_id}")))?;

        if self.store.has_running_result(task_id).await? {
            return Ok(FireOutcome::Running);
        }

        let mut unmet = Vec::new();
        for &pre in &task.pre_task_ids {
            if self.store.latest_success(pre).await?.is_none() {
                unmet.push(pre);
            }
        }
        if !unmet.is_empty() {
            return Ok(FireOutcome::Blocked(unmet));
        }

        let result = self.store.insert_result(task_id, reason, now_local()).await?;
        self.spawn_execution(task, result.id);
        Ok(FireOutcome::Queued)
    }

    fn spawn_execution(&self, task: Task, result_id: ResultId) {
        // Clone just the handles the background task needs; Runner itself
        // is usually held behind an Arc by callers, but process_fire takes
        // &self so we rebuild the pieces here instead of requiring Arc<Self>
        // at every call site.
        let store = self.store.clone();
        let fire_tx = self.fire_tx.clone();
        let active_total = self.active_total.clone();
        let drained = self.drained.clone();
        let semaphore = self.semaphore.clone();
        let task_timeout = self.task_timeout;
        let log_cap_bytes = self.log_cap_bytes;
        let active_runs = self.active_runs.clone();
        let task_id = task.id;

        let cancel = Arc::new(Notify::new());
        active_runs.lock().unwrap().insert(task_id, cancel.clone());
        active_total.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let _permit = match &semaphore {
                Some(sem) => sem.clone().acquire_owned().await.ok(),
                None => None,
            };

            run_and_finalize(&store, &task, result_id, task_timeout, log_cap_bytes, cancel).await;
            active_runs.lock().unwrap().remove(&task_id);

            if let Ok(deps) = store.dependents_of(task.id).await {
                for dep in deps {
                    if !dep.is_active {
                        continue;
                    }
                    if matches!(store.has_running_result(dep.id).await, Ok(true)) {
                        continue;
                    }
                    let _ = fire_tx.send(FireRequest {
                        task_id: dep.id,
                        reason: TriggerReason::Prerequisite(task.id),
                    });
                }
            }

            if active_total.fetch_sub(1, Ordering::SeqCst) == 1 {
                drained.notify_waiters();
            }
        });
    }
}

/// Outcome of [`execute_script`]: either the child ran to completion (or
/// timed out) and the result should be finalized normally, or the execution
/// was cancelled by a grace-timeout shutdown, in which case
/// `Runner::finalize_abandoned_as_shutdown` owns writing the result row and
/// `run_and_finalize` must not write it again.
enum ExecOutcome {
    Finished(ResultStatus, String, Option<i32>),
    Cancelled,
}

async fn run_and_finalize(
    store: &Arc<Store>,
    task: &Task,
    result_id: ResultId,
    task_timeout: Duration,
    log_cap_bytes: usize,
    cancel: Arc<Notify>,
) {
    if let Err(reason) = check_account(&task.account) {
        let _ = store
            .finalize_result(result_id, ResultStatus::Failed, now_local(), &reason, None)
            .await;
        return;
    }

    match execute_script(task, task_timeout, log_cap_bytes, cancel).await {
        ExecOutcome::Finished(status, log, exit_code) => {
            let _ = store
                .finalize_result(result_id, status, now_local(), &log, exit_code)
                .await;
        }
        ExecOutcome::Cancelled => {}
    }
}

/// Verifies the Runner is allowed to execute as `account` (spec §4.5 step 4).
/// Returns `Err(explanation)` rather than a typed `CoreError` because the
/// failure belongs *in the result log*, not raised to the caller.
#[cfg(unix)]
pub(crate) fn check_account(account: &str) -> std::result::Result<(), String> {
    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        let (_uid, gid) = posix_account::resolve_uid_gid(account)
            .ok_or_else(|| format!("unknown account: {account}"))?;
        let groups = posix_account::group_ids(account, gid);
        if !groups
            .iter()
            .any(|g| crate::task::ALLOWED_POSIX_GROUPS.contains(g))
        {
            return Err(format!(
                "account '{account}' is not a member of an allowed group (0, 1000, 1001)"
            ));
        }
        Ok(())
    } else {
        let current = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .unwrap_or_default();
        if current != account {
            return Err(format!(
                "process is not root; account '{account}' must equal current user '{current}'"
            ));
        }
        Ok(())
    }
}

#[cfg(windows)]
pub(crate) fn check_account(_account: &str) -> std::result::Result<(), String> {
    // Windows: the account field is informational only; the child inherits
    // the current user (spec §4.5 step 4).
    Ok(())
}

#[cfg(unix)]
mod posix_account {
    use std::ffi::CString;

    pub fn resolve_uid_gid(account: &str) -> Option<(u32, u32)> {
        let cname = CString::new(account).ok()?;
        unsafe {
            let pw = libc::getpwnam(cname.as_ptr());
            if pw.is_null() {
                return None;
            }
            Some(((*pw).pw_uid, (*pw).pw_gid))
        }
    }

    /// Primary plus supplementary group ids for `account`.
    pub fn group_ids(account: &str, primary_gid: u32) -> Vec<u32> {
        let cname = match CString::new(account) {
            Ok(c) => c,
            Err(_) => return vec![primary_gid],
        };
        let mut ngroups: libc::c_int = 32;
        let mut groups: Vec<libc::gid_t> = vec![0; ngroups as usize];
        unsafe {
            let ret = libc::getgrouplist(
                cname.as_ptr(),
                primary_gid as libc::gid_t,
                groups.as_mut_ptr(),
                &mut ngroups,
            );
            if ret < 0 {
                groups.resize(ngroups.max(0) as usize, 0);
                libc::getgrouplist(
                    cname.as_ptr(),
                    primary_gid as libc::gid_t,
                    groups.as_mut_ptr(),
                    &mut ngroups,
                );
            }
        }
        groups.truncate(ngroups.max(0) as usize);
        groups.into_iter().map(|g| g as u32).collect()
    }
}

/// Spawns `task.script_body`, merges stdout+stderr into a capped buffer, and
/// enforces the wall-clock timeout (spec §4.5 steps 5-7).
async fn execute_script(
    task: &Task,
    task_timeout: Duration,
    log_cap_bytes: usize,
    cancel: Arc<Notify>,
) -> ExecOutcome {
    let mut command = build_command(&task.script_body);

    #[cfg(unix)]
    apply_uid_gid(&mut command, &task.account);

    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(c) => c,
        Err(e) => {
            return ExecOutcome::Finished(
                ResultStatus::Failed,
                format!("failed to spawn script: {e}"),
                None,
            )
        }
    };

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let read_and_wait = async {
        let (out, out_trunc) = match stdout.as_mut() {
            Some(s) => read_capped(s, log_cap_bytes).await,
            None => (String::new(), false),
        };
        let (err, err_trunc) = match stderr.as_mut() {
            Some(s) => read_capped(s, log_cap_bytes).await,
            None => (String::new(), false),
        };
        let status = child.wait().await;
        (out, out_trunc, err, err_trunc, status)
    };

    tokio::select! {
        res = tokio::time::timeout(task_timeout, read_and_wait) => {
            match res {
                Ok((out, out_trunc, err, err_trunc, status)) => {
                    let mut log = merge_log(out, out_trunc, err, err_trunc, log_cap_bytes);
                    match status {
                        Ok(exit) => {
                            let code = exit.code();
                            let ok = code == Some(0);
                            if !ok && code.is_none() {
                                log.push_str("\n... [process terminated by signal]");
                            }
                            ExecOutcome::Finished(
                                if ok { ResultStatus::Success } else { ResultStatus::Failed },
                                log,
                                code,
                            )
                        }
                        Err(e) => {
                            log.push_str(&format!("\n... [failed to wait on child: {e}]"));
                            ExecOutcome::Finished(ResultStatus::Failed, log, None)
                        }
                    }
                }
                Err(_) => {
                    // Timed out: terminate, briefly wait, then force-kill.
                    let _ = child.start_kill();
                    let _ = tokio::time::timeout(Duration::from_millis(500), child.wait()).await;
                    let _ = child.kill().await;
                    ExecOutcome::Finished(
                        ResultStatus::Failed,
                        timeout_marker(task_timeout).trim_start().to_string(),
                        None,
                    )
                }
            }
        }
        _ = cancel.notified() => {
            // Shutdown grace period expired: force-terminate and let the
            // caller's finalize_abandoned_as_shutdown own the result row.
            let _ = child.start_kill();
            let _ = tokio::time::timeout(Duration::from_millis(500), child.wait()).await;
            let _ = child.kill().await;
            ExecOutcome::Cancelled
        }
    }
}

fn merge_log(out: String, out_trunc: bool, err: String, err_trunc: bool, cap: usize) -> String {
    let mut log = out;
    if out_trunc {
        log.push_str(&truncation_marker(cap));
    }
    if !err.is_empty() {
        if !log.is_empty() {
            log.push('\n');
        }
        log.push_str(&err);
        if err_trunc {
            log.push_str(&truncation_marker(cap));
        }
    }
    log
}

/// Reads up to `cap_bytes` from `reader` into the returned string. Once the
/// cap is hit, keeps reading (and discarding) until EOF instead of returning
/// immediately, so a chatty child never blocks writing into a full OS pipe
/// buffer waiting for a reader that has stopped (spec §9 Design Notes).
async fn read_capped<R: AsyncReadExt + Unpin>(reader: &mut R, cap_bytes: usize) -> (String, bool) {
    let mut buf = vec![0u8; cap_bytes];
    let mut total = 0usize;
    let mut truncated = false;
    let mut discard = [0u8; 8192];
    loop {
        if total < cap_bytes {
            match reader.read(&mut buf[total..cap_bytes]).await {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(_) => break,
            }
        } else {
            truncated = true;
            match reader.read(&mut discard).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }
    (String::from_utf8_lossy(&buf[..total]).to_string(), truncated)
}

#[cfg(unix)]
pub(crate) fn build_command(script_body: &str) -> Command {
    let mut cmd = Command::new("/bin/bash");
    cmd.arg("-c").arg(script_body);
    cmd
}

#[cfg(windows)]
pub(crate) fn build_command(script_body: &str) -> Command {
    let mut cmd = Command::new("powershell");
    cmd.arg("-NoProfile").arg("-Command").arg(script_body);
    cmd
}

#[cfg(unix)]
pub(crate) fn apply_uid_gid(command: &mut Command, account: &str) {
    if unsafe { libc::geteuid() } != 0 {
        return;
    }
    if let Some((uid, gid)) = posix_account::resolve_uid_gid(account) {
        use std::os::unix::process::CommandExt;
        command.uid(uid);
        command.gid(gid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{NewTask, TriggerType};
    use std::time::Duration as StdDuration;

    fn schedule_task(name: &str, script: &str) -> NewTask {
        NewTask {
            name: name.into(),
            account: std::env::var("USER").unwrap_or_else(|_| "root".into()),
            trigger_type: TriggerType::Schedule,
            schedule_expression: Some("*/5 * * * *".into()),
            event_type: None,
            condition_script: None,
            condition_interval: None,
            script_body: script.into(),
            pre_task_ids: vec![],
            is_active: true,
        }
    }

    async fn new_runner(store: Arc<Store>) -> (Arc<Runner>, mpsc::UnboundedReceiver<FireRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = Arc::new(Runner::new(
            store,
            tx,
            StdDuration::from_secs(5),
            64 * 1024,
            None,
        ));
        (runner, rx)
    }

    // S3 — prerequisite gate.
    #[tokio::test]
    async fn s3_prerequisite_gate() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (runner, _rx) = new_runner(store.clone()).await;

        let a = store
            .insert_task(schedule_task("a", "true"), now_local())
            .await
            .unwrap();
        let mut b_def = schedule_task("b", "true");
        b_def.pre_task_ids = vec![a.id];
        let b = store.insert_task(b_def, now_local()).await.unwrap();

        let outcome = runner.process_fire(b.id, TriggerReason::Manual).await.unwrap();
        assert!(matches!(outcome, FireOutcome::Blocked(ref v) if v == &[a.id]));

        let outcome_a = runner.process_fire(a.id, TriggerReason::Manual).await.unwrap();
        assert_eq!(outcome_a, FireOutcome::Queued);

        // Allow the background execution to finish, then retry B.
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        let outcome_b2 = runner.process_fire(b.id, TriggerReason::Manual).await.unwrap();
        assert_eq!(outcome_b2, FireOutcome::Queued);
    }

    // S4 — single-flight.
    #[tokio::test]
    async fn s4_single_flight_rejects_duplicate() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (runner, _rx) = new_runner(store.clone()).await;

        let c = store
            .insert_task(schedule_task("c", "sleep 1"), now_local())
            .await
            .unwrap();

        let first = runner.process_fire(c.id, TriggerReason::Manual).await.unwrap();
        assert_eq!(first, FireOutcome::Queued);

        let second = runner.process_fire(c.id, TriggerReason::Manual).await.unwrap();
        assert_eq!(second, FireOutcome::Running);
    }

    // S5 — timeout.
    #[tokio::test]
    async fn s5_timeout_marks_failed_with_marker() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (runner, _rx) = new_runner(store.clone()).await;

        let d = store
            .insert_task(schedule_task("d", "sleep 10"), now_local())
            .await
            .unwrap();
        let result = store.insert_result(d.id, TriggerReason::Manual, now_local()).await.unwrap();

        let outcome = execute_script(
            &store.get_task(d.id).await.unwrap().unwrap(),
            StdDuration::from_secs(1),
            4096,
            Arc::new(Notify::new()),
        )
        .await;
        let ExecOutcome::Finished(status, log, exit_code) = outcome else {
            panic!("expected a finished outcome, not a cancellation");
        };
        assert_eq!(status, ResultStatus::Failed);
        assert!(exit_code.is_none());
        assert!(log.contains("timed out"));
        let _ = result.id;
    }

    #[tokio::test]
    async fn nonexistent_task_is_not_found() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (runner, _rx) = new_runner(store).await;
        let err = runner
            .process_fire(TaskId(999), TriggerReason::Manual)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    // S6 — shutdown grace-timeout force-terminate.
    #[tokio::test]
    async fn cancel_active_kills_child_without_double_finalize() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (runner, _rx) = new_runner(store.clone()).await;

        let e = store
            .insert_task(schedule_task("e", "sleep 30"), now_local())
            .await
            .unwrap();
        let outcome = runner.process_fire(e.id, TriggerReason::Manual).await.unwrap();
        assert_eq!(outcome, FireOutcome::Queued);

        // Give the child a moment to actually spawn before cancelling it.
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        let cancelled = runner.cancel_active();
        assert_eq!(cancelled, vec![e.id]);

        // The cancelled execution must not finalize the row itself.
        tokio::time::sleep(StdDuration::from_millis(700)).await;
        let still_running = store.list_results(e.id, 1).await.unwrap();
        assert_eq!(still_running[0].status, ResultStatus::Running);

        // finalize_abandoned_as_shutdown is the sole writer for this row.
        runner.finalize_abandoned_as_shutdown(e.id).await.unwrap();
        let finalized = store.list_results(e.id, 1).await.unwrap();
        assert_eq!(finalized[0].status, ResultStatus::Failed);
        assert!(finalized[0].log.contains("shutdown"));
    }

    #[tokio::test]
    async fn wait_drained_reports_grace_timeout() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (runner, _rx) = new_runner(store.clone()).await;

        let f = store
            .insert_task(schedule_task("f", "sleep 30"), now_local())
            .await
            .unwrap();
        runner.process_fire(f.id, TriggerReason::Manual).await.unwrap();

        let drained = runner.wait_drained(StdDuration::from_millis(100)).await;
        assert!(!drained, "grace period is far shorter than the sleeping child");

        runner.cancel_active();
    }

    #[tokio::test]
    async fn read_capped_drains_past_the_cap() {
        use tokio::io::AsyncWriteExt;

        let (mut writer, mut reader) = tokio::io::duplex(256);
        let writer_task = tokio::spawn(async move {
            // Write far more than the cap so the unread tail would block a
            // real pipe's writer if read_capped stopped reading at the cap.
            writer.write_all(&[b'x'; 4096]).await.unwrap();
            writer.shutdown().await.unwrap();
        });

        let (out, truncated) = read_capped(&mut reader, 16).await;
        writer_task.await.unwrap();

        assert!(truncated);
        assert_eq!(out.len(), 16);
    }
}
