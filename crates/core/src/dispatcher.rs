//! The 1 Hz tick loop: schedule-due detection, condition-poller lifecycle,
//! and system boot/shutdown fires (spec §4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};

use crate::condition_poller::{self, PollerHandle};
use crate::config::CoreConfig;
use crate::error::Result;
use crate::runner::{FireRequest, Runner};
use crate::store::Store;
use crate::task::{EventType, TaskId};
use crate::time::now_local;

pub struct Dispatcher {
    store: Arc<Store>,
    fire_tx: mpsc::UnboundedSender<FireRequest>,
    tick_interval: Duration,
    condition_timeout: Duration,
    pollers: Mutex<HashMap<TaskId, PollerHandle>>,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, fire_tx: mpsc::UnboundedSender<FireRequest>, config: &CoreConfig) -> Self {
        Self {
            store,
            fire_tx,
            tick_interval: Duration::from_secs(config.dispatcher_tick_secs.max(1)),
            condition_timeout: Duration::from_secs(config.condition_timeout_secs),
            pollers: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueues one fire per active `system_boot` task (spec §4.4 Startup).
    pub async fn fire_boot_tasks(&self) -> Result<()> {
        for task in self.store.active_event_tasks(EventType::SystemBoot).await? {
            let _ = self.fire_tx.send(FireRequest {
                task_id: task.id,
                reason: crate::result::TriggerReason::EventBoot,
            });
        }
        Ok(())
    }

    /// Enqueues one fire per active `system_shutdown` task (spec §4.4 Shutdown).
    pub async fn fire_shutdown_tasks(&self) -> Result<()> {
        for task in self.store.active_event_tasks(EventType::SystemShutdown).await? {
            let _ = self.fire_tx.send(FireRequest {
                task_id: task.id,
                reason: crate::result::TriggerReason::EventShutdown,
            });
        }
        Ok(())
    }

    /// Runs until `shutdown` is notified: scans due schedule tasks once per
    /// tick and keeps condition pollers in sync with the active task set.
    pub async fn run(self: Arc<Self>, shutdown: Arc<Notify>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        // The first tick fires immediately; skip it so startup fires (run by
        // the caller before this loop starts) aren't raced by a tick.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(now_local()).await {
                        tracing::error!(error = %e, "dispatcher tick failed");
                    }
                }
                _ = shutdown.notified() => {
                    break;
                }
            }
        }
    }

    async fn tick(&self, now: chrono::NaiveDateTime) -> Result<()> {
        self.fire_due_schedule_tasks(now).await?;
        self.reconcile_condition_pollers().await?;
        Ok(())
    }

    async fn fire_due_schedule_tasks(&self, now: chrono::NaiveDateTime) -> Result<()> {
        for task in self.store.due_schedule_tasks(now).await? {
            let _ = self.fire_tx.send(FireRequest {
                task_id: task.id,
                reason: crate::result::TriggerReason::Cron,
            });

            // Whether the dispatcher was off for one tick or a thousand,
            // `next_after(now)` always lands on the next *future* fire time,
            // so exactly one fire is emitted per missed schedule (spec §4.4
            // Missed ticks).
            let expr = match &task.schedule_expression {
                Some(e) => e,
                None => continue,
            };
            let cron = crate::cron::CronExpr::parse(expr)?;
            let next = cron.next_after(now);
            self.store.set_next_run(task.id, next).await?;
        }
        Ok(())
    }

    async fn reconcile_condition_pollers(&self) -> Result<()> {
        let active = self.store.active_event_tasks(EventType::Script).await?;
        let active_ids: std::collections::HashSet<TaskId> = active.iter().map(|t| t.id).collect();

        let mut pollers = self.pollers.lock().await;
        pollers.retain(|id, _| active_ids.contains(id));

        for task in active {
            if !pollers.contains_key(&task.id) {
                let handle = condition_poller::spawn(task, self.condition_timeout, self.fire_tx.clone());
                pollers.insert(handle.task_id(), handle);
            }
        }
        Ok(())
    }

    /// Ensures every currently-active schedule task has a `next_run_at` set,
    /// so a freshly created or reactivated task is picked up on the next
    /// tick instead of waiting for an external trigger.
    pub async fn prime_next_run_times(&self) -> Result<()> {
        for task in self.store.list_tasks().await? {
            if task.is_active && task.next_run_at.is_none() {
                if let Some(expr) = &task.schedule_expression {
                    let cron = crate::cron::CronExpr::parse(expr)?;
                    let next = cron.next_after(now_local());
                    self.store.set_next_run(task.id, next).await?;
                }
            }
        }
        Ok(())
    }
}

/// Bundles the store, channel, Dispatcher, and Runner into one running
/// engine, and drives the startup/shutdown lifecycle fires around the tick
/// loop (spec §4.4 Startup/Shutdown).
pub struct Engine {
    pub store: Arc<Store>,
    pub runner: Arc<Runner>,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<Notify>,
    shutdown_grace: Duration,
}

impl Engine {
    pub fn new(store: Arc<Store>, config: &CoreConfig) -> Self {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let runner = Arc::new(Runner::new(
            store.clone(),
            fire_tx.clone(),
            Duration::from_secs(config.task_timeout_secs),
            config.log_cap_bytes,
            config.max_concurrent_tasks,
        ));
        runner.clone().spawn_consumer(fire_rx);

        let dispatcher = Arc::new(Dispatcher::new(store.clone(), fire_tx, config));

        Self {
            store,
            runner,
            dispatcher,
            shutdown: Arc::new(Notify::new()),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        }
    }

    /// Runs the boot fire, then the tick loop, until `shutdown()` is called.
    pub async fn run(&self) -> Result<()> {
        self.dispatcher.prime_next_run_times().await?;
        self.dispatcher.fire_boot_tasks().await?;
        self.dispatcher.clone().run(self.shutdown.clone()).await;
        Ok(())
    }

    /// Stops the tick loop, fires shutdown tasks, and waits up to the
    /// configured grace period for the Runner to drain. If anything is still
    /// running once the grace period expires, force-terminates it and
    /// finalizes its result as `failed` with a shutdown marker (spec §5
    /// Cancellation).
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.notify_waiters();
        self.dispatcher.fire_shutdown_tasks().await?;
        // Give the shutdown fires a moment to actually get admitted before
        // we start counting the grace period against them.
        tokio::time::sleep(Duration::from_millis(50)).await;

        if !self.runner.wait_drained(self.shutdown_grace).await {
            let abandoned = self.runner.cancel_active();
            if !abandoned.is_empty() {
                tracing::warn!(
                    count = abandoned.len(),
                    "shutdown grace period expired, force-terminating in-flight tasks"
                );
            }
            for task_id in abandoned {
                self.runner.finalize_abandoned_as_shutdown(task_id).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{NewTask, TriggerType};

    fn boot_task() -> NewTask {
        NewTask {
            name: "on-boot".into(),
            account: std::env::var("USER").unwrap_or_else(|_| "root".into()),
            trigger_type: TriggerType::Event,
            schedule_expression: None,
            event_type: Some(EventType::SystemBoot),
            condition_script: None,
            condition_interval: None,
            script_body: "true".into(),
            pre_task_ids: vec![],
            is_active: true,
        }
    }

    // S6 — lifecycle boot fire.
    #[tokio::test]
    async fn s6_boot_task_fires_on_startup() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let task = store.insert_task(boot_task(), now_local()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = CoreConfig {
            dispatcher_tick_secs: 3600,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(store.clone(), tx, &config);
        dispatcher.fire_boot_tasks().await.unwrap();

        let req = rx.try_recv().unwrap();
        assert_eq!(req.task_id, task.id);
        assert_eq!(req.reason, crate::result::TriggerReason::EventBoot);
    }

    // S6 — lifecycle shutdown fire.
    #[tokio::test]
    async fn s6_shutdown_task_fires_on_shutdown() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut def = boot_task();
        def.name = "on-shutdown".into();
        def.event_type = Some(EventType::SystemShutdown);
        let task = store.insert_task(def, now_local()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = CoreConfig::default();
        let dispatcher = Dispatcher::new(store.clone(), tx, &config);
        dispatcher.fire_shutdown_tasks().await.unwrap();

        let req = rx.try_recv().unwrap();
        assert_eq!(req.task_id, task.id);
        assert_eq!(req.reason, crate::result::TriggerReason::EventShutdown);
    }

    #[tokio::test]
    async fn due_schedule_task_is_fired_and_rescheduled() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let def = NewTask {
            name: "every-minute".into(),
            account: std::env::var("USER").unwrap_or_else(|_| "root".into()),
            trigger_type: TriggerType::Schedule,
            schedule_expression: Some("* * * * *".into()),
            event_type: None,
            condition_script: None,
            condition_interval: None,
            script_body: "true".into(),
            pre_task_ids: vec![],
            is_active: true,
        };
        let task = store.insert_task(def, now_local()).await.unwrap();
        store.set_next_run(task.id, Some(now_local())).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = CoreConfig::default();
        let dispatcher = Dispatcher::new(store.clone(), tx, &config);
        dispatcher.fire_due_schedule_tasks(now_local()).await.unwrap();

        let req = rx.try_recv().unwrap();
        assert_eq!(req.task_id, task.id);

        let reloaded = store.get_task(task.id).await.unwrap().unwrap();
        assert!(reloaded.next_run_at.unwrap() > now_local());
    }
}
