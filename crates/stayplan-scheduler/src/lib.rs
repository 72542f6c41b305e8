//! `stayplan-scheduler`: recurring search schedules with SQLite persistence.
//!
//! # Overview
//!
//! Users attach a recurrence rule to a saved collection or search. The
//! [`store::ScheduleStore`] persists rules, run history and payloads; the
//! [`engine::SchedulerEngine`] polls for due schedules, submits each payload
//! to a [`sink::JobSink`] and moves the schedule to its next slot.
//!
//! # Schedule variants
//!
//! | Variant    | Behaviour                                               |
//! |------------|---------------------------------------------------------|
//! | `once`     | Single fire at an absolute instant, then retired        |
//! | `daily`    | HH:MM local time every day                              |
//! | `weekly`   | HH:MM local time on one weekday                         |
//! | `biweekly` | HH:MM local time every other week, phased by start date |
//! | `monthly`  | HH:MM local time on a day of month, clamped to month end|
//!
//! All local-time reasoning happens in the schedule's IANA zone; everything
//! stored is UTC.

pub mod clock;
pub mod db;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod sink;
pub mod store;
pub mod timezone;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use sink::{JobSink, Ledger};
pub use store::ScheduleStore;
pub use types::{NewSchedule, Payload, Recurrence, RunStatus, Schedule, ScheduleRun, SearchItem};
