//! Task definitions: the unit of scheduling (spec §3).

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Unique identifier for a task. Assigned by the store on insert; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a task is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    Schedule,
    Event,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Schedule => "schedule",
            TriggerType::Event => "event",
        }
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "schedule" => Ok(TriggerType::Schedule),
            "event" => Ok(TriggerType::Event),
            other => Err(format!("unknown trigger_type: {other}")),
        }
    }
}

/// What kind of event fires an `event`-triggered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Script,
    SystemBoot,
    SystemShutdown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Script => "script",
            EventType::SystemBoot => "system_boot",
            EventType::SystemShutdown => "system_shutdown",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "script" => Ok(EventType::Script),
            "system_boot" => Ok(EventType::SystemBoot),
            "system_shutdown" => Ok(EventType::SystemShutdown),
            other => Err(format!("unknown event_type: {other}")),
        }
    }
}

/// Most recent result's terminal status, denormalized onto the task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastStatus {
    Running,
    Success,
    Failed,
}

impl LastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LastStatus::Running => "running",
            LastStatus::Success => "success",
            LastStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for LastStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(LastStatus::Running),
            "success" => Ok(LastStatus::Success),
            "failed" => Ok(LastStatus::Failed),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

pub const ALLOWED_POSIX_GROUPS: [u32; 3] = [0, 1000, 1001];

/// A registered task (spec §3). Constructed via `NewTask` + `Task::from_new`,
/// which is where §3's field-presence invariants are enforced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub account: String,
    pub trigger_type: TriggerType,
    pub schedule_expression: Option<String>,
    pub event_type: Option<EventType>,
    pub condition_script: Option<String>,
    pub condition_interval: u32,
    pub script_body: String,
    pub pre_task_ids: Vec<TaskId>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub next_run_at: Option<NaiveDateTime>,
    pub last_run_at: Option<NaiveDateTime>,
    pub last_status: Option<LastStatus>,
}

/// Caller-supplied fields for creating or updating a task; `id` and the
/// denormalized `last_*`/`next_run_at` projections are store-managed.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub account: String,
    pub trigger_type: TriggerType,
    pub schedule_expression: Option<String>,
    pub event_type: Option<EventType>,
    pub condition_script: Option<String>,
    pub condition_interval: Option<u32>,
    pub script_body: String,
    pub pre_task_ids: Vec<TaskId>,
    pub is_active: bool,
}

impl NewTask {
    /// Validate §3's field-presence constraints and the prerequisite-list
    /// shape constraints (invariant 7). Does not check that prerequisite ids
    /// exist or that they are acyclic — that requires the store's full task
    /// graph and is done in `Store::insert_task`/`update_task`.
    pub fn validate(&self, self_id: Option<TaskId>) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::validation("name must not be empty"));
        }
        if self.account.trim().is_empty() {
            return Err(CoreError::validation("account must not be empty"));
        }
        if self.script_body.trim().is_empty() {
            return Err(CoreError::validation("script_body must not be empty"));
        }

        match self.trigger_type {
            TriggerType::Schedule => {
                let expr = self.schedule_expression.as_deref().unwrap_or("");
                if expr.trim().is_empty() {
                    return Err(CoreError::validation(
                        "schedule_expression is required when trigger_type=schedule",
                    ));
                }
                crate::cron::CronExpr::parse(expr)?;
            }
            TriggerType::Event => {
                let event_type = self.event_type.ok_or_else(|| {
                    CoreError::validation("event_type is required when trigger_type=event")
                })?;
                if event_type == EventType::Script {
                    let script = self.condition_script.as_deref().unwrap_or("");
                    if script.trim().is_empty() {
                        return Err(CoreError::validation(
                            "condition_script is required when event_type=script",
                        ));
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        for &id in &self.pre_task_ids {
            if Some(id) == self_id {
                return Err(CoreError::validation("pre_task_ids may not include self"));
            }
            if !seen.insert(id) {
                return Err(CoreError::validation("pre_task_ids contains a duplicate"));
            }
        }

        Ok(())
    }

    pub fn condition_interval_or_default(&self) -> u32 {
        self.condition_interval.unwrap_or(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> NewTask {
        NewTask {
            name: "backup".into(),
            account: "svc".into(),
            trigger_type: TriggerType::Schedule,
            schedule_expression: Some("*/5 * * * *".into()),
            event_type: None,
            condition_script: None,
            condition_interval: None,
            script_body: "echo hi".into(),
            pre_task_ids: vec![],
            is_active: true,
        }
    }

    #[test]
    fn rejects_empty_name() {
        let mut t = base();
        t.name = "  ".into();
        assert!(t.validate(None).is_err());
    }

    #[test]
    fn rejects_missing_schedule_expression() {
        let mut t = base();
        t.schedule_expression = None;
        assert!(t.validate(None).is_err());
    }

    #[test]
    fn rejects_self_prerequisite() {
        let mut t = base();
        t.pre_task_ids = vec![TaskId(7)];
        assert!(t.validate(Some(TaskId(7))).is_err());
    }

    #[test]
    fn rejects_duplicate_prerequisites() {
        let mut t = base();
        t.pre_task_ids = vec![TaskId(1), TaskId(1)];
        assert!(t.validate(Some(TaskId(7))).is_err());
    }

    #[test]
    fn event_script_requires_condition_script() {
        let mut t = base();
        t.trigger_type = TriggerType::Event;
        t.event_type = Some(EventType::Script);
        t.condition_script = None;
        assert!(t.validate(None).is_err());
    }

    #[test]
    fn event_boot_does_not_require_condition_script() {
        let mut t = base();
        t.trigger_type = TriggerType::Event;
        t.event_type = Some(EventType::SystemBoot);
        t.schedule_expression = None;
        assert!(t.validate(None).is_ok());
    }

    #[test]
    fn accepts_well_formed_schedule_task() {
        assert!(base().validate(None).is_ok());
    }
}
