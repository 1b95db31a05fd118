//! 5-field cron grammar and next-fire-time computation (spec §4.2).
//!
//! Day-of-week is `0=Monday … 6=Sunday`, the project's own convention and a
//! deliberate divergence from POSIX cron (spec §9). This is exactly
//! `chrono::Weekday::num_days_from_monday()`, so no remapping is needed once
//! parsed.
//!
//! The grammar (minute hour day-of-month month day-of-week, each `*` /
//! integer / `a-b` / `a,b,c` / `*/n` / `a-b/n`) does not fit any 6/7-field
//! (with-seconds) cron crate in the ecosystem, so this is a small
//! hand-written field parser rather than an adapted dependency.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{CoreError, Result};

/// How many months ahead `next_after` will search before giving up.
const DEFAULT_HORIZON_MONTHS: u32 = 36;

#[derive(Debug, Clone)]
pub struct CronExpr {
    raw: String,
    minute: FieldSet,
    hour: FieldSet,
    dom: FieldSet,
    month: FieldSet,
    dow: FieldSet,
    dom_is_star: bool,
    dow_is_star: bool,
}

#[derive(Debug, Clone)]
struct FieldSet {
    allowed: Vec<bool>,
    lo: i32,
}

impl FieldSet {
    fn contains(&self, v: i32) -> bool {
        let idx = v - self.lo;
        idx >= 0 && (idx as usize) < self.allowed.len() && self.allowed[idx as usize]
    }
}

fn parse_field(field: &str, lo: i32, hi: i32) -> Result<FieldSet> {
    let mut allowed = vec![false; (hi - lo + 1) as usize];
    for part in field.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: i32 = s
                    .parse()
                    .map_err(|_| CoreError::validation(format!("bad step in cron field: {field}")))?;
                if step <= 0 {
                    return Err(CoreError::validation(format!(
                        "step must be positive in cron field: {field}"
                    )));
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range_part == "*" {
            (lo, hi)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let a: i32 = a
                .parse()
                .map_err(|_| CoreError::validation(format!("bad range in cron field: {field}")))?;
            let b: i32 = b
                .parse()
                .map_err(|_| CoreError::validation(format!("bad range in cron field: {field}")))?;
            (a, b)
        } else {
            let v: i32 = range_part
                .parse()
                .map_err(|_| CoreError::validation(format!("bad value in cron field: {field}")))?;
            (v, v)
        };

        if start > end || start < lo || end > hi {
            return Err(CoreError::validation(format!(
                "cron field out of range {lo}-{hi}: {field}"
            )));
        }

        let mut v = start;
        while v <= end {
            allowed[(v - lo) as usize] = true;
            v += step;
        }
    }
    Ok(FieldSet { allowed, lo })
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CoreError::validation(format!(
                "cron expression must have exactly 5 fields, got {}: {expr}",
                fields.len()
            )));
        }
        let minute = parse_field(fields[0], 0, 59)?;
        let hour = parse_field(fields[1], 0, 23)?;
        let dom = parse_field(fields[2], 1, 31)?;
        let month = parse_field(fields[3], 1, 12)?;
        let dow = parse_field(fields[4], 0, 6)?;

        Ok(CronExpr {
            raw: expr.to_string(),
            minute,
            hour,
            dom,
            month,
            dow,
            dom_is_star: fields[2].trim() == "*",
            dow_is_star: fields[4].trim() == "*",
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        if !self.month.contains(date.month() as i32) {
            return false;
        }
        let dom_ok = self.dom.contains(date.day() as i32);
        let dow_ok = self.dow.contains(date.weekday().num_days_from_monday() as i32);
        match (self.dom_is_star, self.dow_is_star) {
            (true, true) => true,
            (true, false) => dow_ok,
            (false, true) => dom_ok,
            (false, false) => dom_ok || dow_ok,
        }
    }

    /// First `(hour, minute)` on `date` at or after `from_hm` that satisfies
    /// the hour/minute fields, if any.
    fn first_time_on(&self, from_hm: Option<(u32, u32)>) -> Option<(u32, u32)> {
        let (start_h, start_m) = from_hm.unwrap_or((0, 0));
        for h in start_h..24 {
            let min_start = if h == start_h { start_m } else { 0 };
            if !self.hour.contains(h as i32) {
                continue;
            }
            for m in min_start..60 {
                if self.minute.contains(m as i32) {
                    return Some((h, m));
                }
            }
        }
        None
    }

    /// Smallest whole-minute instant strictly greater than `t` satisfying
    /// this expression, searching at most `horizon_months` ahead.
    pub fn next_after_bounded(&self, t: NaiveDateTime, horizon_months: u32) -> Option<NaiveDateTime> {
        let truncated = t.date().and_hms_opt(t.hour(), t.minute(), 0)?;
        let candidate = truncated + Duration::minutes(1);

        let deadline_date = candidate
            .date()
            .checked_add_months(chrono::Months::new(horizon_months))?;

        let mut date = candidate.date();
        let mut from_hm = Some((candidate.hour(), candidate.minute()));

        loop {
            if date > deadline_date {
                return None;
            }
            if self.date_matches(date) {
                if let Some((h, m)) = self.first_time_on(from_hm) {
                    return date.and_hms_opt(h, m, 0);
                }
            }
            date = date.succ_opt()?;
            from_hm = None;
        }
    }

    pub fn next_after(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        self.next_after_bounded(t, DEFAULT_HORIZON_MONTHS)
    }

    /// First `k` fire times strictly after `now` (spec §4.2 preview).
    pub fn next_times(&self, now: NaiveDateTime, k: usize) -> Vec<NaiveDateTime> {
        let mut out = Vec::with_capacity(k);
        let mut cursor = now;
        while out.len() < k {
            match self.next_after(cursor) {
                Some(t) => {
                    out.push(t);
                    cursor = t;
                }
                None => break,
            }
        }
        out
    }
}
