//! Task execution history (spec §3).

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Unique identifier for a result. Assigned by the store on insert; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultId(pub i64);

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal/non-terminal status of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    Running,
    Success,
    Failed,
}

impl ResultStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResultStatus::Running)
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultStatus::Running => "running",
            ResultStatus::Success => "success",
            ResultStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ResultStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(ResultStatus::Running),
            "success" => Ok(ResultStatus::Success),
            "failed" => Ok(ResultStatus::Failed),
            other => Err(format!("unknown result status: {other}")),
        }
    }
}

/// Why a fire-request was issued (spec §3, §4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerReason {
    Cron,
    Manual,
    EventScript,
    EventBoot,
    EventShutdown,
    Prerequisite(TaskId),
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::Cron => write!(f, "cron"),
            TriggerReason::Manual => write!(f, "manual"),
            TriggerReason::EventScript => write!(f, "event:script"),
            TriggerReason::EventBoot => write!(f, "event:boot"),
            TriggerReason::EventShutdown => write!(f, "event:shutdown"),
            TriggerReason::Prerequisite(id) => write!(f, "prerequisite:{id}"),
        }
    }
}

impl std::str::FromStr for TriggerReason {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cron" => Ok(TriggerReason::Cron),
            "manual" => Ok(TriggerReason::Manual),
            "event:script" => Ok(TriggerReason::EventScript),
            "event:boot" => Ok(TriggerReason::EventBoot),
            "event:shutdown" => Ok(TriggerReason::EventShutdown),
            other => other
                .strip_prefix("prerequisite:")
                .and_then(|id| id.parse::<i64>().ok())
                .map(|id| TriggerReason::Prerequisite(TaskId(id)))
                .ok_or_else(|| format!("unknown trigger reason: {other}")),
        }
    }
}

/// A single execution record (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: ResultId,
    pub task_id: TaskId,
    pub status: ResultStatus,
    pub trigger_reason: TriggerReason,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub log: String,
    pub exit_code: Option<i32>,
}

/// Appends a truncation marker once `cap_bytes` is reached, mirroring the
/// marker format used elsewhere in this codebase for capped output streams.
pub fn truncation_marker(cap_bytes: usize) -> String {
    format!("\n... [output truncated at {cap_bytes} bytes]")
}

/// Marker appended to the log when a run is killed for exceeding its
/// wall-clock timeout budget (spec §4.5 step 6).
pub fn timeout_marker(timeout: std::time::Duration) -> String {
    format!("\n... [task timed out after {timeout:?} and was terminated]")
}

/// Marker appended when a run is still in flight at shutdown grace expiry
/// (spec §5 Cancellation).
pub const SHUTDOWN_MARKER: &str = "\n... [terminated: shutdown grace period expired]";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_reason_roundtrip() {
        for r in [
            TriggerReason::Cron,
            TriggerReason::Manual,
            TriggerReason::EventScript,
            TriggerReason::EventBoot,
            TriggerReason::EventShutdown,
            TriggerReason::Prerequisite(TaskId(42)),
        ] {
            let s = r.to_string();
            let parsed: TriggerReason = s.parse().unwrap();
            assert_eq!(r, parsed);
        }
    }

    #[test]
    fn status_roundtrip() {
        for s in [ResultStatus::Running, ResultStatus::Success, ResultStatus::Failed] {
            let text = s.to_string();
            let parsed: ResultStatus = text.parse().unwrap();
            assert_eq!(format!("{s}"), format!("{parsed}"));
        }
    }

    #[test]
    fn only_running_is_nonterminal() {
        assert!(!ResultStatus::Running.is_terminal());
        assert!(ResultStatus::Success.is_terminal());
        assert!(ResultStatus::Failed.is_terminal());
    }
}
