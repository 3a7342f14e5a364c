use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

pub const SCHEMA_VERSION: i64 = 2;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS symbols (
            id INTEGER PRIMARY KEY,
            function_name TEXT NOT NULL,
            file_path TEXT NOT NULL DEFAULT '',
            class_name TEXT,
            language TEXT NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(function_name);
        CREATE INDEX IF NOT EXISTS idx_symbols_name_nocase
            ON symbols(function_name COLLATE NOCASE);
        CREATE INDEX IF NOT EXISTS idx_symbols_class ON symbols(class_name COLLATE NOCASE);

        CREATE TABLE IF NOT EXISTS call_edges (
            id INTEGER PRIMARY KEY,
            caller TEXT NOT NULL,
            callee TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 0.8
        );

        CREATE INDEX IF NOT EXISTS idx_call_edges_caller ON call_edges(caller COLLATE NOCASE);

        CREATE TABLE IF NOT EXISTS flows (
            key TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS flow_participants (
            id INTEGER PRIMARY KEY,
            flow_key TEXT NOT NULL,
            key TEXT NOT NULL,
            type TEXT NOT NULL,
            function_name TEXT,
            name TEXT,
            class_name TEXT,
            file_path TEXT NOT NULL DEFAULT '',
            starts_flow INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(flow_key) REFERENCES flows(key) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_flow_participants_flow ON flow_participants(flow_key);

        CREATE TABLE IF NOT EXISTS flow_calls (
            id INTEGER PRIMARY KEY,
            flow_key TEXT NOT NULL,
            caller_key TEXT NOT NULL,
            callee_key TEXT NOT NULL,
            FOREIGN KEY(flow_key) REFERENCES flows(key) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_flow_calls_flow ON flow_calls(flow_key);
        COMMIT;
        ",
    )?;

    let existing: Option<i64> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| {
                row.get::<_, String>(0)
                    .map(|v| v.parse::<i64>().unwrap_or(0))
            },
        )
        .optional()?;
    let existing = existing.unwrap_or(0);

    // v2: participants record the file name next to the path
    if !has_column(conn, "flow_participants", "file_name")? {
        conn.execute(
            "ALTER TABLE flow_participants ADD COLUMN file_name TEXT NOT NULL DEFAULT ''",
            [],
        )?;
    }

    if existing < SCHEMA_VERSION {
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [SCHEMA_VERSION.to_string()],
        )?;
    }

    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for row in rows {
        if row? == column {
            return Ok(true);
        }
    }
    Ok(false)
}
