use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    schedule::next_run,
    timezone::{format_in_zone, format_utc, parse_utc, resolve_zone, DEFAULT_ZONE},
    types::{
        NewSchedule, Payload, Recurrence, RunStatus, Schedule, ScheduleRun, SearchItem,
        WebsiteData,
    },
};

const SCHEDULE_COLUMNS: &str = "id, user_id, name, schedule_type, schedule_data, is_active,
     next_run_at, last_run_at, collection_id, search_id, created_at, updated_at";

const RUN_COLUMNS: &str =
    "r.id, r.schedule_id, r.status, r.started_at, r.completed_at, r.error_msg";

/// Persistent store for schedules, their run history and the collections /
/// searches they submit.
///
/// Shared between the HTTP handlers and the dispatcher. Every operation takes
/// the connection lock for its whole duration, so each one is atomic with
/// respect to the others.
pub struct ScheduleStore {
    conn: Mutex<Connection>,
}

/// Raw `schedules` row before the JSON and timestamp columns are decoded.
struct ScheduleRow {
    id: String,
    user_id: String,
    name: String,
    schedule_type: String,
    schedule_data: String,
    is_active: bool,
    next_run_at: Option<String>,
    last_run_at: Option<String>,
    collection_id: Option<String>,
    search_id: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_schedule_row(row: &Row<'_>) -> rusqlite::Result<ScheduleRow> {
    Ok(ScheduleRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        schedule_type: row.get(3)?,
        schedule_data: row.get(4)?,
        is_active: row.get(5)?,
        next_run_at: row.get(6)?,
        last_run_at: row.get(7)?,
        collection_id: row.get(8)?,
        search_id: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn parse_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_utc).transpose()
}

impl TryFrom<ScheduleRow> for Schedule {
    type Error = SchedulerError;

    fn try_from(row: ScheduleRow) -> Result<Self> {
        Ok(Schedule {
            recurrence: Recurrence::from_stored(&row.schedule_type, &row.schedule_data)?,
            next_run_at: parse_opt(row.next_run_at)?,
            last_run_at: parse_opt(row.last_run_at)?,
            created_at: parse_utc(&row.created_at)?,
            updated_at: parse_utc(&row.updated_at)?,
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            is_active: row.is_active,
            collection_id: row.collection_id,
            search_id: row.search_id,
        })
    }
}

/// Decode rows, skipping (and logging) any that no longer parse.
fn decode_schedules(rows: Vec<ScheduleRow>) -> Vec<Schedule> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            match Schedule::try_from(row) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(schedule_id = %id, error = %e, "skipping undecodable schedule row");
                    None
                }
            }
        })
        .collect()
}

/// id, schedule_id, status, started_at, completed_at, error_msg
type RunRow = (String, String, String, String, Option<String>, Option<String>);

/// location, check_in, check_out, adults, star_rating, website, pos
type ItemRow = (String, String, String, i64, String, String, String);

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ItemRow> {
    Ok((
        row.get(0)?, // location
        row.get(1)?, // check_in_date
        row.get(2)?, // check_out_date
        row.get(3)?, // adults
        row.get(4)?, // star_rating
        row.get(5)?, // website
        row.get(6)?, // pos JSON
    ))
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| SchedulerError::InvalidSchedule(format!("stored date `{raw}`: {e}")))
}

/// Pick the zone a new schedule runs in: its own, then the owner's, then UTC.
fn effective_zone<'a>(recurrence: &'a Recurrence, user_timezone: &'a str) -> &'a str {
    let own = recurrence.timezone().trim();
    if !own.is_empty() {
        return own;
    }
    let user = user_timezone.trim();
    if !user.is_empty() {
        return user;
    }
    DEFAULT_ZONE
}

impl ScheduleStore {
    /// Wrap `conn`, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate a new schedule, resolve its zone, compute the first
    /// `next_run_at` and persist it.
    #[instrument(
        skip(self, new),
        fields(user_id = %new.user_id, schedule_type = %new.schedule_type)
    )]
    pub fn create(&self, new: NewSchedule, now: DateTime<Utc>) -> Result<Schedule> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(SchedulerError::InvalidSchedule("name is required".into()));
        }
        if new.user_id.trim().is_empty() {
            return Err(SchedulerError::InvalidSchedule("user_id is required".into()));
        }

        let mut recurrence = Recurrence::parse(&new.schedule_type, new.schedule_data)?;
        let tz = resolve_zone(effective_zone(&recurrence, &new.user_timezone))?;
        recurrence.set_timezone(tz.name());

        let next = next_run(&recurrence, tz, now)?;
        let id = Uuid::now_v7().to_string();
        let now_str = format_utc(now);
        let data = recurrence.data_json()?;

        let conn = self.conn();
        if let Some(ref collection_id) = new.collection_id {
            ensure_owned(&conn, "collections", "collection", collection_id, &new.user_id)?;
        }
        if let Some(ref search_id) = new.search_id {
            ensure_owned(&conn, "searches", "search", search_id, &new.user_id)?;
        }
        conn.execute(
            "INSERT INTO schedules
             (id, user_id, name, schedule_type, schedule_data, is_active,
              next_run_at, last_run_at, collection_id, search_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, NULL, ?7, ?8, ?9, ?9)",
            params![
                id,
                new.user_id,
                name,
                recurrence.schedule_type().as_str(),
                data,
                format_utc(next),
                new.collection_id,
                new.search_id,
                now_str,
            ],
        )?;
        drop(conn);

        info!(
            schedule_id = %id,
            timezone = %tz.name(),
            next_run_at = %format_utc(next),
            next_run_local = %format_in_zone(next, tz),
            "schedule created"
        );

        Ok(Schedule {
            id,
            user_id: new.user_id,
            name: name.to_string(),
            recurrence,
            is_active: true,
            next_run_at: Some(next),
            last_run_at: None,
            collection_id: new.collection_id,
            search_id: new.search_id,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<Schedule>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1"),
                [id],
                read_schedule_row,
            )
            .optional()?;
        row.map(Schedule::try_from).transpose()
    }

    /// Active schedules owned by `user_id`, soonest first.
    #[instrument(skip(self))]
    pub fn list_active(&self, user_id: &str) -> Result<Vec<Schedule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules
             WHERE user_id = ?1 AND is_active = 1
             ORDER BY next_run_at ASC"
        ))?;
        let rows = stmt
            .query_map([user_id], read_schedule_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(decode_schedules(rows))
    }

    /// Every active schedule whose `next_run_at` is at or before `now`.
    pub fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules
             WHERE is_active = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at ASC"
        ))?;
        let rows = stmt
            .query_map([format_utc(now)], read_schedule_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let due = decode_schedules(rows);
        debug!(count = due.len(), "due schedules");
        Ok(due)
    }

    /// Append a `running` row for an attempt that is about to start.
    pub fn record_run_start(&self, schedule_id: &str, now: DateTime<Utc>) -> Result<ScheduleRun> {
        let id = Uuid::now_v7().to_string();
        self.conn().execute(
            "INSERT INTO schedule_runs
             (id, schedule_id, status, started_at, completed_at, error_msg)
             VALUES (?1, ?2, 'running', ?3, NULL, NULL)",
            params![id, schedule_id, format_utc(now)],
        )?;
        debug!(run_id = %id, %schedule_id, "run started");
        Ok(ScheduleRun {
            id,
            schedule_id: schedule_id.to_string(),
            status: RunStatus::Running,
            started_at: now,
            completed_at: None,
            error_msg: None,
        })
    }

    /// Close a run with its terminal status.
    pub fn record_run_end(
        &self,
        run_id: &str,
        status: RunStatus,
        error_msg: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let n = self.conn().execute(
            "UPDATE schedule_runs SET status = ?1, completed_at = ?2, error_msg = ?3
             WHERE id = ?4",
            params![status.to_string(), format_utc(now), error_msg, run_id],
        )?;
        if n == 0 {
            warn!(%run_id, "run row vanished before it could be closed");
        }
        Ok(())
    }

    /// Move a schedule past the attempt that just ran.
    ///
    /// `once` schedules are retired. Recurring ones get a fresh
    /// `next_run_at` strictly after `now`. `last_run_at` is stamped either way.
    #[instrument(skip(self))]
    pub fn advance_or_retire(&self, schedule_id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let row = tx
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1"),
                [schedule_id],
                read_schedule_row,
            )
            .optional()?
            .ok_or_else(|| SchedulerError::ScheduleNotFound {
                id: schedule_id.to_string(),
            })?;
        let schedule = Schedule::try_from(row)?;
        let now_str = format_utc(now);

        if let Recurrence::Once(_) = schedule.recurrence {
            tx.execute(
                "UPDATE schedules
                 SET is_active = 0, next_run_at = NULL, last_run_at = ?1, updated_at = ?1
                 WHERE id = ?2",
                params![now_str, schedule_id],
            )?;
            tx.commit()?;
            info!("one-time schedule retired");
            return Ok(());
        }

        let tz = resolve_zone(schedule.recurrence.timezone()).unwrap_or_else(|e| {
            warn!(error = %e, "stored timezone no longer resolves; falling back to UTC");
            Tz::UTC
        });
        let next = next_run(&schedule.recurrence, tz, now)?;

        tx.execute(
            "UPDATE schedules
             SET next_run_at = ?1, last_run_at = ?2, updated_at = ?2
             WHERE id = ?3",
            params![format_utc(next), now_str, schedule_id],
        )?;
        tx.commit()?;

        info!(
            next_run_at = %format_utc(next),
            next_run_local = %format_in_zone(next, tz),
            "schedule advanced"
        );
        Ok(())
    }

    /// Soft-delete a schedule owned by `user_id`.
    ///
    /// Matching nothing (unknown id, other owner, already inactive) is not an
    /// error.
    #[instrument(skip(self))]
    pub fn deactivate(&self, schedule_id: &str, user_id: &str, now: DateTime<Utc>) -> Result<()> {
        let n = self.conn().execute(
            "UPDATE schedules SET is_active = 0, updated_at = ?1
             WHERE id = ?2 AND user_id = ?3 AND is_active = 1",
            params![format_utc(now), schedule_id, user_id],
        )?;
        if n == 0 {
            debug!("no active schedule matched");
        } else {
            info!("schedule deactivated");
        }
        Ok(())
    }

    /// Run history for a schedule owned by `user_id`, newest first.
    pub fn list_runs(
        &self,
        schedule_id: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ScheduleRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM schedule_runs r
             JOIN schedules s ON s.id = r.schedule_id
             WHERE r.schedule_id = ?1 AND s.user_id = ?2
             ORDER BY r.started_at DESC, r.rowid DESC
             LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(params![schedule_id, user_id, limit as i64], row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, schedule_id, status, started, completed, error_msg)| -> Result<_> {
                Ok(ScheduleRun {
                    id,
                    schedule_id,
                    status: status
                        .parse::<RunStatus>()
                        .map_err(SchedulerError::InvalidSchedule)?,
                    started_at: parse_utc(&started)?,
                    completed_at: parse_opt(completed)?,
                    error_msg,
                })
            })
            .collect()
    }

    /// Resolve what a due schedule should submit. The collection wins when
    /// both references are set; `None` when neither resolves.
    pub fn load_payload(&self, schedule: &Schedule) -> Result<Option<Payload>> {
        let conn = self.conn();

        if let Some(ref collection_id) = schedule.collection_id {
            let name: Option<String> = conn
                .query_row(
                    "SELECT name FROM collections WHERE id = ?1 AND user_id = ?2",
                    [collection_id, &schedule.user_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(name) = name {
                let items = load_items(&conn, "collection_items", "collection_id", collection_id)?;
                return Ok(Some(Payload::Collection {
                    id: collection_id.clone(),
                    name,
                    items,
                }));
            }
            debug!(
                schedule_id = %schedule.id,
                %collection_id,
                "referenced collection not found for owner"
            );
        }

        if let Some(ref search_id) = schedule.search_id {
            let name: Option<String> = conn
                .query_row(
                    "SELECT name FROM searches WHERE id = ?1 AND user_id = ?2",
                    [search_id, &schedule.user_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(name) = name {
                let items = load_items(&conn, "search_items", "search_id", search_id)?;
                return Ok(Some(Payload::Search {
                    id: search_id.clone(),
                    name,
                    items,
                }));
            }
            debug!(schedule_id = %schedule.id, %search_id, "referenced search not found for owner");
        }

        Ok(None)
    }

    /// Flag a collection as submitted after a successful scheduled run.
    pub fn mark_collection_submitted(&self, collection_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE collections SET status = 'running', last_run_at = ?1 WHERE id = ?2",
            params![format_utc(now), collection_id],
        )?;
        Ok(())
    }

    /// Collection status and last submission time, if it exists.
    pub fn collection_status(
        &self,
        collection_id: &str,
    ) -> Result<Option<(String, Option<DateTime<Utc>>)>> {
        let row: Option<(String, Option<String>)> = self
            .conn()
            .query_row(
                "SELECT status, last_run_at FROM collections WHERE id = ?1",
                [collection_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(status, last)| Ok((status, parse_opt(last)?)))
            .transpose()
    }

    /// Save a named collection of search items; returns its id.
    pub fn insert_collection(
        &self,
        user_id: &str,
        name: &str,
        items: &[SearchItem],
        now: DateTime<Utc>,
    ) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO collections (id, user_id, name, status, last_run_at, created_at)
             VALUES (?1, ?2, ?3, 'saved', NULL, ?4)",
            params![id, user_id, name, format_utc(now)],
        )?;
        insert_items(&tx, "collection_items", "collection_id", &id, items)?;
        tx.commit()?;
        info!(collection_id = %id, %user_id, items = items.len(), "collection saved");
        Ok(id)
    }

    /// Save a named ad-hoc search; returns its id.
    pub fn insert_search(
        &self,
        user_id: &str,
        name: &str,
        items: &[SearchItem],
        now: DateTime<Utc>,
    ) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO searches (id, user_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, user_id, name, format_utc(now)],
        )?;
        insert_items(&tx, "search_items", "search_id", &id, items)?;
        tx.commit()?;
        info!(search_id = %id, %user_id, items = items.len(), "search saved");
        Ok(id)
    }
}

/// Fail unless `table` holds row `id` owned by `user_id`. Someone else's row
/// reads the same as a missing one.
fn ensure_owned(conn: &Connection, table: &str, kind: &str, id: &str, user_id: &str) -> Result<()> {
    let found = conn
        .query_row(
            &format!("SELECT 1 FROM {table} WHERE id = ?1 AND user_id = ?2"),
            [id, user_id],
            |_| Ok(()),
        )
        .optional()?;
    found.ok_or_else(|| SchedulerError::InvalidSchedule(format!("{kind} `{id}` not found")))
}

// `table` and `owner_col` are constants from this module, never user input.
fn load_items(
    conn: &Connection,
    table: &str,
    owner_col: &str,
    owner_id: &str,
) -> Result<Vec<SearchItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT location, check_in_date, check_out_date, adults, star_rating, website, pos
         FROM {table} WHERE {owner_col} = ?1 ORDER BY id"
    ))?;
    let rows = stmt
        .query_map([owner_id], item_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(location, check_in, check_out, adults, star_rating, website, pos)| -> Result<_> {
            Ok(SearchItem {
                website: WebsiteData {
                    name: website,
                    pos: serde_json::from_str(&pos)?,
                },
                location,
                check_in_date: parse_date(&check_in)?,
                check_out_date: parse_date(&check_out)?,
                adults: u32::try_from(adults).map_err(|_| {
                    SchedulerError::InvalidSchedule(format!(
                        "stored adults count {adults} is invalid"
                    ))
                })?,
                star_rating,
            })
        })
        .collect()
}

fn insert_items(
    conn: &Connection,
    table: &str,
    owner_col: &str,
    owner_id: &str,
    items: &[SearchItem],
) -> Result<()> {
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {table}
         ({owner_col}, location, check_in_date, check_out_date, adults, star_rating, website, pos)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
    ))?;
    for item in items {
        stmt.execute(params![
            owner_id,
            item.location,
            item.check_in_date.format("%Y-%m-%d").to_string(),
            item.check_out_date.format("%Y-%m-%d").to_string(),
            item.adults,
            item.star_rating,
            item.website.name,
            serde_json::to_string(&item.website.pos)?,
        ])?;
    }
    Ok(())
}
