//! SQL schema for the cartrack SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One row per visitor token. email and email_source are null together.
CREATE TABLE IF NOT EXISTS sessions (
    session_id      TEXT PRIMARY KEY,
    created_at      TEXT NOT NULL,
    last_seen       TEXT NOT NULL,
    current_cart_id INTEGER,
    email           TEXT,
    email_source    TEXT
);

CREATE TABLE IF NOT EXISTS carts (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    time       TEXT NOT NULL,
    session_id TEXT NOT NULL,
    user_id    INTEGER,
    ip_address TEXT NOT NULL,
    order_id   INTEGER
);

-- Rewritten wholesale on every persist.
CREATE TABLE IF NOT EXISTS cart_items (
    cart_id    INTEGER NOT NULL REFERENCES carts(id),
    item_key   TEXT NOT NULL,
    product_id INTEGER NOT NULL,
    quantity   INTEGER NOT NULL,
    UNIQUE (cart_id, item_key)
);

CREATE TABLE IF NOT EXISTS utm_data (
    time       TEXT NOT NULL,
    session_id TEXT NOT NULL,
    name       TEXT NOT NULL,
    value      TEXT NOT NULL,
    UNIQUE (name, session_id)
);

CREATE TABLE IF NOT EXISTS order_meta (
    order_id INTEGER NOT NULL,
    name     TEXT NOT NULL,
    value    TEXT NOT NULL,
    UNIQUE (order_id, name)
);

CREATE INDEX IF NOT EXISTS carts_session_idx    ON carts(session_id);
CREATE INDEX IF NOT EXISTS utm_data_session_idx ON utm_data(session_id);

PRAGMA user_version = 1;
";
