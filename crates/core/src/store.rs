//! Durable task and result persistence, backed by SQLite (spec §4.1).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::NaiveDateTime;
use rusqlite::OptionalExtension;

use crate::error::{CoreError, Result};
use crate::result::{ResultId, ResultStatus, TaskResult, TriggerReason};
use crate::task::{EventType, LastStatus, NewTask, Task, TaskId, TriggerType};

const TIMESTAMP_FMT: &str = "%Y-%m-%dT%H:%M:%S%.f";

fn fmt_ts(t: NaiveDateTime) -> String {
    t.format(TIMESTAMP_FMT).to_string()
}

fn parse_ts(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FMT)
        .map_err(|e| CoreError::Internal(format!("corrupt timestamp '{s}': {e}")))
}

/// Durable task/result store. Every multi-row write (insert with
/// prerequisite validation, cascade delete, batch ops) runs inside a single
/// `rusqlite` transaction.
pub struct Store {
    conn: tokio::sync::Mutex<rusqlite::Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::Internal(format!("create db dir: {e}")))?;
        }
        let conn = rusqlite::Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                id                   INTEGER PRIMARY KEY AUTOINCREMENT,
                name                 TEXT NOT NULL UNIQUE,
                account              TEXT NOT NULL,
                trigger_type         TEXT NOT NULL,
                schedule_expression  TEXT,
                event_type           TEXT,
                condition_script     TEXT,
                condition_interval   INTEGER NOT NULL DEFAULT 60,
                script_body          TEXT NOT NULL,
                pre_task_ids         TEXT NOT NULL DEFAULT '[]',
                is_active            INTEGER NOT NULL DEFAULT 1,
                created_at           TEXT NOT NULL,
                updated_at           TEXT NOT NULL,
                next_run_at          TEXT,
                last_run_at          TEXT,
                last_status          TEXT
             );

             CREATE TABLE IF NOT EXISTS task_results (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id         INTEGER NOT NULL,
                status          TEXT NOT NULL,
                trigger_reason  TEXT NOT NULL,
                started_at      TEXT NOT NULL,
                finished_at     TEXT,
                log             TEXT NOT NULL DEFAULT '',
                exit_code       INTEGER,
                FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
             );

             CREATE INDEX IF NOT EXISTS idx_tasks_next_run ON tasks(next_run_at);
             CREATE INDEX IF NOT EXISTS idx_results_task_id ON task_results(task_id);
             CREATE INDEX IF NOT EXISTS idx_results_status ON task_results(task_id, status);",
        )?;
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    // ── Task operations ─────────────────────────────────────────────

    pub async fn insert_task(&self, new: NewTask, now: NaiveDateTime) -> Result<Task> {
        new.validate(None)?;
        let conn = self.conn.lock().await;
        let tx = conn.unchecked_transaction()?;

        check_prereqs_exist(&tx, &new.pre_task_ids)?;
        check_no_cycle(&tx, None, &new.pre_task_ids)?;

        let pre_json = serde_json::to_string(&new.pre_task_ids.iter().map(|t| t.0).collect::<Vec<_>>())
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let insert_result = tx.execute(
            "INSERT INTO tasks
                (name, account, trigger_type, schedule_expression, event_type,
                 condition_script, condition_interval, script_body, pre_task_ids,
                 is_active, created_at, updated_at, next_run_at, last_run_at, last_status)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,NULL,NULL,NULL)",
            rusqlite::params![
                new.name,
                new.account,
                new.trigger_type.as_str(),
                new.schedule_expression,
                new.event_type.map(|e| e.as_str()),
                new.condition_script,
                new.condition_interval_or_default(),
                new.script_body,
                pre_json,
                new.is_active as i32,
                fmt_ts(now),
                fmt_ts(now),
            ],
        );
        let id = match insert_result {
            Ok(_) => tx.last_insert_rowid(),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(CoreError::Conflict(format!("task name already exists: {}", new.name)));
            }
            Err(e) => return Err(e.into()),
        };

        let task = get_task_tx(&tx, TaskId(id))?.ok_or_else(|| {
            CoreError::Internal("inserted task vanished inside its own transaction".into())
        })?;
        tx.commit()?;
        Ok(task)
    }

    pub async fn update_task(&self, id: TaskId, new: NewTask, now: NaiveDateTime) -> Result<Task> {
        new.validate(Some(id))?;
        let conn = self.conn.lock().await;
        let tx = conn.unchecked_transaction()?;

        if get_task_tx(&tx, id)?.is_none() {
            return Err(CoreError::not_found(format!("task {id}")));
        }
        check_prereqs_exist(&tx, &new.pre_task_ids)?;
        check_no_cycle(&tx, Some(id), &new.pre_task_ids)?;

        let pre_json = serde_json::to_string(&new.pre_task_ids.iter().map(|t| t.0).collect::<Vec<_>>())
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let updated = tx.execute(
            "UPDATE tasks SET
                name = ?1, account = ?2, trigger_type = ?3, schedule_expression = ?4,
                event_type = ?5, condition_script = ?6, condition_interval = ?7,
                script_body = ?8, pre_task_ids = ?9, is_active = ?10, updated_at = ?11,
                next_run_at = CASE WHEN ?10 = 0 OR ?3 != 'schedule' THEN NULL ELSE next_run_at END
             WHERE id = ?12",
            rusqlite::params![
                new.name,
                new.account,
                new.trigger_type.as_str(),
                new.schedule_expression,
                new.event_type.map(|e| e.as_str()),
                new.condition_script,
                new.condition_interval_or_default(),
                new.script_body,
                pre_json,
                new.is_active as i32,
                fmt_ts(now),
                id.0,
            ],
        );
        match updated {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(CoreError::Conflict(format!("task name already exists: {}", new.name)));
            }
            Err(e) => return Err(e.into()),
        }

        let task = get_task_tx(&tx, id)?.ok_or_else(|| CoreError::not_found(format!("task {id}")))?;
        tx.commit()?;
        Ok(task)
    }

    pub async fn delete_task(&self, id: TaskId) -> Result<bool> {
        let conn = self.conn.lock().await;
        let rows = conn.execute("DELETE FROM tasks WHERE id = ?1", rusqlite::params![id.0])?;
        Ok(rows > 0)
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let conn = self.conn.lock().await;
        get_task_tx(&conn, id)
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!("{TASK_SELECT} ORDER BY id"))?;
        let rows = stmt.query_map([], row_to_task)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r??);
        }
        Ok(out)
    }

    /// Active schedule tasks whose `next_run_at <= now` (Dispatcher tick, §4.4).
    pub async fn due_schedule_tasks(&self, now: NaiveDateTime) -> Result<Vec<Task>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "{TASK_SELECT} WHERE is_active = 1 AND trigger_type = 'schedule'
                 AND next_run_at IS NOT NULL AND next_run_at <= ?1 ORDER BY next_run_at"
        ))?;
        let rows = stmt.query_map(rusqlite::params![fmt_ts(now)], row_to_task)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r??);
        }
        Ok(out)
    }

    pub async fn active_event_tasks(&self, event_type: EventType) -> Result<Vec<Task>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "{TASK_SELECT} WHERE is_active = 1 AND trigger_type = 'event' AND event_type = ?1"
        ))?;
        let rows = stmt.query_map(rusqlite::params![event_type.as_str()], row_to_task)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r??);
        }
        Ok(out)
    }

    pub async fn set_next_run(&self, id: TaskId, next_run_at: Option<NaiveDateTime>) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE tasks SET next_run_at = ?1 WHERE id = ?2",
            rusqlite::params![next_run_at.map(fmt_ts), id.0],
        )?;
        if rows == 0 {
            return Err(CoreError::not_found(format!("task {id}")));
        }
        Ok(())
    }

    pub async fn set_active(&self, id: TaskId, is_active: bool) -> Result<bool> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE tasks SET is_active = ?1, next_run_at = CASE WHEN ?1 = 0 THEN NULL ELSE next_run_at END
             WHERE id = ?2",
            rusqlite::params![is_active as i32, id.0],
        )?;
        Ok(rows > 0)
    }

    /// Tasks that list `id` in their `pre_task_ids` (Runner cascade, §4.5 step 8).
    pub async fn dependents_of(&self, id: TaskId) -> Result<Vec<Task>> {
        let all = self.list_tasks().await?;
        Ok(all.into_iter().filter(|t| t.pre_task_ids.contains(&id)).collect())
    }

    // ── Result operations ───────────────────────────────────────────

    pub async fn insert_result(
        &self,
        task_id: TaskId,
        trigger_reason: TriggerReason,
        started_at: NaiveDateTime,
    ) -> Result<TaskResult> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO task_results (task_id, status, trigger_reason, started_at, log)
             VALUES (?1, 'running', ?2, ?3, '')",
            rusqlite::params![task_id.0, trigger_reason.to_string(), fmt_ts(started_at)],
        )?;
        let id = ResultId(conn.last_insert_rowid());

        conn.execute(
            "UPDATE tasks SET last_run_at = ?1, last_status = 'running' WHERE id = ?2",
            rusqlite::params![fmt_ts(started_at), task_id.0],
        )?;

        Ok(TaskResult {
            id,
            task_id,
            status: ResultStatus::Running,
            trigger_reason,
            started_at,
            finished_at: None,
            log: String::new(),
            exit_code: None,
        })
    }

    pub async fn finalize_result(
        &self,
        id: ResultId,
        status: ResultStatus,
        finished_at: NaiveDateTime,
        log: &str,
        exit_code: Option<i32>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let task_id: i64 = conn
            .query_row(
                "SELECT task_id FROM task_results WHERE id = ?1",
                rusqlite::params![id.0],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| CoreError::not_found(format!("result {id}")))?;

        conn.execute(
            "UPDATE task_results SET status = ?1, finished_at = ?2, log = ?3, exit_code = ?4 WHERE id = ?5",
            rusqlite::params![status.to_string(), fmt_ts(finished_at), log, exit_code, id.0],
        )?;
        conn.execute(
            "UPDATE tasks SET last_status = ?1 WHERE id = ?2",
            rusqlite::params![status.to_string(), task_id],
        )?;
        Ok(())
    }

    pub async fn list_results(&self, task_id: TaskId, limit: u32) -> Result<Vec<TaskResult>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, task_id, status, trigger_reason, started_at, finished_at, log, exit_code
             FROM task_results WHERE task_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![task_id.0, limit], row_to_result)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r??);
        }
        Ok(out)
    }

    pub async fn delete_result(&self, task_id: TaskId, result_id: ResultId) -> Result<bool> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "DELETE FROM task_results WHERE id = ?1 AND task_id = ?2",
            rusqlite::params![result_id.0, task_id.0],
        )?;
        Ok(rows > 0)
    }

    pub async fn clear_results(&self, task_id: TaskId) -> Result<u64> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "DELETE FROM task_results WHERE task_id = ?1",
            rusqlite::params![task_id.0],
        )?;
        Ok(rows as u64)
    }

    /// Timestamp of the most recent successful result, if any (prerequisite gate, §4.5 step 2).
    pub async fn latest_success(&self, task_id: TaskId) -> Result<Option<NaiveDateTime>> {
        let conn = self.conn.lock().await;
        let ts: Option<String> = conn
            .query_row(
                "SELECT started_at FROM task_results WHERE task_id = ?1 AND status = 'success'
                 ORDER BY id DESC LIMIT 1",
                rusqlite::params![task_id.0],
                |r| r.get(0),
            )
            .optional()?;
        ts.map(|s| parse_ts(&s)).transpose()
    }

    /// Whether this task currently has an in-flight (`running`) result (single-flight, invariant 2).
    pub async fn has_running_result(&self, task_id: TaskId) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM task_results WHERE task_id = ?1 AND status = 'running'",
            rusqlite::params![task_id.0],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }
}

const TASK_SELECT: &str = "SELECT id, name, account, trigger_type, schedule_expression, event_type,
        condition_script, condition_interval, script_body, pre_task_ids, is_active,
        created_at, updated_at, next_run_at, last_run_at, last_status FROM tasks";

fn get_task_tx(conn: &rusqlite::Connection, id: TaskId) -> Result<Option<Task>> {
    conn.query_row(
        &format!("{TASK_SELECT} WHERE id = ?1"),
        rusqlite::params![id.0],
        row_to_task,
    )
    .optional()?
    .transpose()
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Task>> {
    Ok((|| -> Result<Task> {
        let id = TaskId(row.get(0)?);
        let name: String = row.get(1)?;
        let account: String = row.get(2)?;
        let trigger_type: String = row.get(3)?;
        let schedule_expression: Option<String> = row.get(4)?;
        let event_type: Option<String> = row.get(5)?;
        let condition_script: Option<String> = row.get(6)?;
        let condition_interval: i64 = row.get(7)?;
        let script_body: String = row.get(8)?;
        let pre_task_ids_json: String = row.get(9)?;
        let is_active: i64 = row.get(10)?;
        let created_at: String = row.get(11)?;
        let updated_at: String = row.get(12)?;
        let next_run_at: Option<String> = row.get(13)?;
        let last_run_at: Option<String> = row.get(14)?;
        let last_status: Option<String> = row.get(15)?;

        let pre_ids: Vec<i64> = serde_json::from_str(&pre_task_ids_json)
            .map_err(|e| CoreError::Internal(format!("corrupt pre_task_ids: {e}")))?;

        Ok(Task {
            id,
            name,
            account,
            trigger_type: trigger_type
                .parse()
                .map_err(|e: String| CoreError::Internal(e))?,
            schedule_expression,
            event_type: event_type
                .map(|s| s.parse())
                .transpose()
                .map_err(|e: String| CoreError::Internal(e))?,
            condition_script,
            condition_interval: condition_interval as u32,
            script_body,
            pre_task_ids: pre_ids.into_iter().map(TaskId).collect(),
            is_active: is_active != 0,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
            next_run_at: next_run_at.map(|s| parse_ts(&s)).transpose()?,
            last_run_at: last_run_at.map(|s| parse_ts(&s)).transpose()?,
            last_status: last_status
                .map(|s| s.parse())
                .transpose()
                .map_err(|e: String| CoreError::Internal(e))?,
        })
    })())
}

fn row_to_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<TaskResult>> {
    Ok((|| -> Result<TaskResult> {
        let id = ResultId(row.get(0)?);
        let task_id = TaskId(row.get(1)?);
        let status: String = row.get(2)?;
        let trigger_reason: String = row.get(3)?;
        let started_at: String = row.get(4)?;
        let finished_at: Option<String> = row.get(5)?;
        let log: String = row.get(6)?;
        let exit_code: Option<i32> = row.get(7)?;

        Ok(TaskResult {
            id,
            task_id,
            status: status.parse().map_err(CoreError::Internal)?,
            trigger_reason: trigger_reason.parse().map_err(CoreError::Internal)?,
            started_at: parse_ts(&started_at)?,
            finished_at: finished_at.map(|s| parse_ts(&s)).transpose()?,
            log,
            exit_code,
        })
    })())
}

fn check_prereqs_exist(conn: &rusqlite::Connection, pre_task_ids: &[TaskId]) -> Result<()> {
    for &id in pre_task_ids {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1)",
            rusqlite::params![id.0],
            |r| r.get(0),
        )?;
        if !exists {
            return Err(CoreError::validation(format!(
                "pre_task_ids references a task that does not exist: {id}"
            )));
        }
    }
    Ok(())
}

/// Rejects task writes that would introduce a prerequisite cycle (§9 open
/// question, resolved in DESIGN.md: reject at write time).
fn check_no_cycle(
    conn: &rusqlite::Connection,
    self_id: Option<TaskId>,
    new_pre_ids: &[TaskId],
) -> Result<()> {
    let mut edges: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    let mut stmt = conn.prepare("SELECT id, pre_task_ids FROM tasks")?;
    let rows = stmt.query_map([], |row| {
        let id: i64 = row.get(0)?;
        let json: String = row.get(1)?;
        Ok((id, json))
    })?;
    for row in rows {
        let (id, json) = row?;
        let ids: Vec<i64> = serde_json::from_str(&json).unwrap_or_default();
        edges.insert(TaskId(id), ids.into_iter().map(TaskId).collect());
    }

    // Overlay the prospective edges for the task being written. A brand-new
    // task has no id yet; use a sentinel that cannot collide with a real row.
    let probe_id = self_id.unwrap_or(TaskId(i64::MIN));
    edges.insert(probe_id, new_pre_ids.to_vec());

    let mut visiting = HashSet::new();
    let mut visited = HashSet::new();
    if has_cycle_from(probe_id, &edges, &mut visiting, &mut visited) {
        return Err(CoreError::validation(
            "pre_task_ids would introduce a prerequisite cycle",
        ));
    }
    Ok(())
}

fn has_cycle_from(
    node: TaskId,
    edges: &HashMap<TaskId, Vec<TaskId>>,
    visiting: &mut HashSet<TaskId>,
    visited: &mut HashSet<TaskId>,
) -> bool {
    if visited.contains(&node) {
        return false;
    }
    if !visiting.insert(node) {
        return true;
    }
    if let Some(next) = edges.get(&node) {
        for &n in next {
            if has_cycle_from(n, edges, visiting, visited) {
                return true;
            }
        }
    }
    visiting.remove(&node);
    visited.insert(node);
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn schedule_task(name: &str) -> NewTask {
        NewTask {
            name: name.into(),
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

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let task = store.insert_task(schedule_task("a"), now()).await.unwrap();
        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "a");
        assert!(loaded.is_active);
    }

    #[tokio::test]
    async fn duplicate_name_is_conflict() {
        let store = Store::open_in_memory().unwrap();
        store.insert_task(schedule_task("dup"), now()).await.unwrap();
        let err = store.insert_task(schedule_task("dup"), now()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn unknown_prerequisite_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let mut t = schedule_task("b");
        t.pre_task_ids = vec![TaskId(999)];
        let err = store.insert_task(t, now()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn cycle_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert_task(schedule_task("a2"), now()).await.unwrap();
        let mut b_def = schedule_task("b2");
        b_def.pre_task_ids = vec![a.id];
        let b = store.insert_task(b_def, now()).await.unwrap();

        let mut a_update = schedule_task("a2");
        a_update.pre_task_ids = vec![b.id];
        let err = store.update_task(a.id, a_update, now()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn delete_cascades_results() {
        let store = Store::open_in_memory().unwrap();
        let t = store.insert_task(schedule_task("c"), now()).await.unwrap();
        store
            .insert_result(t.id, TriggerReason::Manual, now())
            .await
            .unwrap();
        assert_eq!(store.list_results(t.id, 10).await.unwrap().len(), 1);

        assert!(store.delete_task(t.id).await.unwrap());
        assert_eq!(store.list_results(t.id, 10).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn single_flight_and_latest_success() {
        let store = Store::open_in_memory().unwrap();
        let t = store.insert_task(schedule_task("d"), now()).await.unwrap();
        assert!(!store.has_running_result(t.id).await.unwrap());
        assert!(store.latest_success(t.id).await.unwrap().is_none());

        let r = store
            .insert_result(t.id, TriggerReason::Manual, now())
            .await
            .unwrap();
        assert!(store.has_running_result(t.id).await.unwrap());

        store
            .finalize_result(r.id, ResultStatus::Success, now(), "ok", Some(0))
            .await
            .unwrap();
        assert!(!store.has_running_result(t.id).await.unwrap());
        assert!(store.latest_success(t.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dependents_of_finds_cascading_children() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert_task(schedule_task("e"), now()).await.unwrap();
        let mut child = schedule_task("f");
        child.pre_task_ids = vec![a.id];
        let c = store.insert_task(child, now()).await.unwrap();

        let deps = store.dependents_of(a.id).await.unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].id, c.id);
    }
}
