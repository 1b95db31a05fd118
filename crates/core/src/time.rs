//! Wall-clock local time, used for every persisted timestamp (spec §3, §6).
//!
//! The project stores local time with no UTC offset, a deliberate divergence
//! from timestamp handling elsewhere in this codebase's ancestry. Centralized
//! here so call sites never reach for `Utc::now()` by habit.

use chrono::NaiveDateTime;

pub fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}
