//! SQL schema for the Environet SQLite store.
//!
//! Executed once at connection startup. Family tables are generated from
//! their [`FamilyTables`] descriptor so hydro and meteo can never drift apart.

use crate::family::FamilyTables;

/// Identity and permission tables; idempotent thanks to
/// `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS operators (
    id         INTEGER PRIMARY KEY,
    name       TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id          INTEGER PRIMARY KEY,
    username    TEXT NOT NULL UNIQUE,   -- the keyId senders claim
    operator_id INTEGER REFERENCES operators(id),
    attributes  TEXT NOT NULL DEFAULT '{}',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS groups (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS user_groups (
    user_id  INTEGER NOT NULL REFERENCES users(id),
    group_id INTEGER NOT NULL REFERENCES groups(id),
    PRIMARY KEY (user_id, group_id)
);

CREATE TABLE IF NOT EXISTS user_permissions (
    user_id    INTEGER NOT NULL REFERENCES users(id),
    permission TEXT NOT NULL,
    PRIMARY KEY (user_id, permission)
);

CREATE TABLE IF NOT EXISTS group_permissions (
    group_id   INTEGER NOT NULL REFERENCES groups(id),
    permission TEXT NOT NULL,
    PRIMARY KEY (group_id, permission)
);

-- Keys are never deleted; rotation marks the previous ones revoked.
CREATE TABLE IF NOT EXISTS public_keys (
    id         INTEGER PRIMARY KEY,
    user_id    INTEGER NOT NULL REFERENCES users(id),
    public_key TEXT NOT NULL,
    revoked    INTEGER NOT NULL DEFAULT 0,
    revoked_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS public_keys_user_idx ON public_keys(user_id, revoked);
";

/// DDL for one family's points, properties, allow-list, series and results.
pub fn family_schema(t: &FamilyTables) -> String {
  let FamilyTables {
    points,
    properties,
    point_properties,
    time_series,
    results,
    point_fk,
    ..
  } = t;

  format!(
    "
CREATE TABLE IF NOT EXISTS {points} (
    id          INTEGER PRIMARY KEY,
    eucd        TEXT,
    ncd         TEXT NOT NULL UNIQUE,
    name        TEXT NOT NULL,
    operator_id INTEGER REFERENCES operators(id),
    is_active   INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS {properties} (
    id          INTEGER PRIMARY KEY,
    symbol      TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL,
    unit        TEXT NOT NULL,
    kind        TEXT NOT NULL       -- 'realtime' | 'processed'
);

CREATE TABLE IF NOT EXISTS {point_properties} (
    {point_fk}           INTEGER NOT NULL REFERENCES {points}(id),
    observed_property_id INTEGER NOT NULL REFERENCES {properties}(id),
    PRIMARY KEY ({point_fk}, observed_property_id)
);

-- One series per (point, property); the constraint closes the creation race.
CREATE TABLE IF NOT EXISTS {time_series} (
    id                    INTEGER PRIMARY KEY,
    {point_fk}            INTEGER NOT NULL REFERENCES {points}(id),
    observed_property_id  INTEGER NOT NULL REFERENCES {properties}(id),
    result_time           TEXT NOT NULL,
    phenomenon_time_begin TEXT,
    phenomenon_time_end   TEXT,
    min_value             REAL,
    min_value_time        TEXT,
    max_value             REAL,
    max_value_time        TEXT,
    UNIQUE ({point_fk}, observed_property_id)
);

-- Append-only. A resent value for a known timestamp is a new row; readers
-- take the most recently created one.
CREATE TABLE IF NOT EXISTS {results} (
    id             INTEGER PRIMARY KEY,
    time_series_id INTEGER NOT NULL REFERENCES {time_series}(id),
    time           TEXT NOT NULL,   -- canonical UTC, see encode::encode_dt
    value          REAL NOT NULL,
    is_forecast    INTEGER NOT NULL,
    created_at     TEXT NOT NULL,
    UNIQUE (time_series_id, time, value, is_forecast)
);

CREATE INDEX IF NOT EXISTS {results}_series_time_idx ON {results}(time_series_id, time);
"
  )
}
