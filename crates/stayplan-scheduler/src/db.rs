use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Safe to call on every startup. Timestamps are RFC3339 UTC text with
/// second precision so string comparison matches time order.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedules (
            id             TEXT    NOT NULL PRIMARY KEY,
            user_id        TEXT    NOT NULL,
            name           TEXT    NOT NULL,
            schedule_type  TEXT    NOT NULL,   -- once | daily | weekly | biweekly | monthly
            schedule_data  TEXT    NOT NULL,   -- JSON body of the typed rule
            is_active      INTEGER NOT NULL DEFAULT 1,
            next_run_at    TEXT,
            last_run_at    TEXT,
            collection_id  TEXT,
            search_id      TEXT,
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_schedules_user
            ON schedules (user_id, next_run_at);

        -- The poll query: WHERE is_active = 1 AND next_run_at <= ?
        CREATE INDEX IF NOT EXISTS idx_schedules_active_next_run
            ON schedules (next_run_at) WHERE is_active = 1;

        CREATE TABLE IF NOT EXISTS schedule_runs (
            id            TEXT NOT NULL PRIMARY KEY,
            schedule_id   TEXT NOT NULL REFERENCES schedules (id),
            status        TEXT NOT NULL,       -- running | completed | failed
            started_at    TEXT NOT NULL,
            completed_at  TEXT,
            error_msg     TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_schedule_runs_schedule
            ON schedule_runs (schedule_id, started_at DESC);

        CREATE TABLE IF NOT EXISTS collections (
            id           TEXT NOT NULL PRIMARY KEY,
            user_id      TEXT NOT NULL,
            name         TEXT NOT NULL,
            status       TEXT NOT NULL DEFAULT 'saved',
            last_run_at  TEXT,
            created_at   TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS collection_items (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            collection_id   TEXT    NOT NULL REFERENCES collections (id),
            location        TEXT    NOT NULL,
            check_in_date   TEXT    NOT NULL,   -- YYYY-MM-DD
            check_out_date  TEXT    NOT NULL,
            adults          INTEGER NOT NULL,
            star_rating     TEXT    NOT NULL,
            website         TEXT    NOT NULL,
            pos             TEXT    NOT NULL    -- JSON array of strings
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_collection_items_collection
            ON collection_items (collection_id);

        CREATE TABLE IF NOT EXISTS searches (
            id          TEXT NOT NULL PRIMARY KEY,
            user_id     TEXT NOT NULL,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS search_items (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            search_id       TEXT    NOT NULL REFERENCES searches (id),
            location        TEXT    NOT NULL,
            check_in_date   TEXT    NOT NULL,
            check_out_date  TEXT    NOT NULL,
            adults          INTEGER NOT NULL,
            star_rating     TEXT    NOT NULL,
            website         TEXT    NOT NULL,
            pos             TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_search_items_search
            ON search_items (search_id);
        ",
    )?;
    Ok(())
}
