use crate::config::Config;
use crate::digest::{
    ContentDigest, call_row, digest_rows, edge_row, flow_row, participant_row, symbol_row,
};
use crate::model::{
    CallEdge, ExecutionFlow, FlowCall, FlowParticipant, IndexOverview, IndexedSymbol,
    ParticipantType,
};
use crate::snapshot::Snapshot;
use crate::source::{FlowGraph, StaticIndex};
use anyhow::{Context, Result, anyhow};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

mod migrations;

pub use migrations::SCHEMA_VERSION;

#[derive(Debug)]
struct ConnectionCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        Ok(())
    }

    fn on_release(&self, _conn: Connection) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// Clear every table first; snapshot ids are kept.
    #[default]
    Replace,
    /// Keep existing rows; symbol ids are assigned by the store and flows
    /// with a key already present are replaced.
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub symbols: usize,
    pub edges: usize,
    pub flows: usize,
    pub participants: usize,
    pub calls: usize,
    pub fingerprint: String,
}

const SYMBOL_COLUMNS: &str = "id, function_name, file_path, class_name, language";
const SYMBOL_ORDER: &str = "ORDER BY function_name, file_path, COALESCE(class_name, ''), id";

pub struct Db {
    db_path: PathBuf,
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Pool<SqliteConnectionManager>,
}

impl Db {
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db directory {}", parent.display()))?;
        }

        let config = Config::get();
        tracing::debug!(
            pool_size = config.pool_size,
            pool_min_idle = config.pool_min_idle,
            "initializing connection pool"
        );

        // Open write connection first and run migrations
        let write_conn = Connection::open(db_path)
            .with_context(|| format!("open sqlite db at {}", db_path.display()))?;
        write_conn.busy_timeout(Duration::from_secs(30))?;
        write_conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        migrations::migrate(&write_conn)?;

        let write_conn = Arc::new(Mutex::new(write_conn));

        let manager = SqliteConnectionManager::file(db_path);
        let read_pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(config.pool_min_idle))
            .connection_timeout(Duration::from_secs(30))
            .connection_customizer(Box::new(ConnectionCustomizer))
            .build(manager)
            .with_context(|| "create connection pool")?;

        Ok(Self {
            db_path: db_path.to_path_buf(),
            write_conn,
            read_pool,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn read_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.read_pool
            .get()
            .with_context(|| "get read connection from pool")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.write_conn
            .lock()
            .map_err(|_| anyhow!("write connection lock poisoned"))
    }

    pub fn import_snapshot(&self, snapshot: &Snapshot, mode: ImportMode) -> Result<ImportStats> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if mode == ImportMode::Replace {
            tx.execute_batch(
                "
                DELETE FROM flow_calls;
                DELETE FROM flow_participants;
                DELETE FROM flows;
                DELETE FROM call_edges;
                DELETE FROM symbols;
                ",
            )?;
        }

        let symbols = snapshot.indexed_symbols();
        insert_symbols(&tx, &symbols, mode == ImportMode::Replace)?;
        let edges = snapshot.call_edges();
        insert_edges(&tx, &edges)?;

        let mut participants = 0;
        let mut calls = 0;
        for flow in &snapshot.flows {
            replace_flow(
                &tx,
                &ExecutionFlow {
                    key: flow.key.clone(),
                    name: flow.name.clone(),
                },
                &flow.participants,
                &flow.calls,
            )?;
            participants += flow.participants.len();
            calls += flow.calls.len();
        }
        tx.commit()?;
        drop(conn);

        let fingerprint = self.digest()?.fingerprint();
        self.set_meta("fingerprint", &fingerprint)?;
        tracing::info!(
            db = %self.db_path.display(),
            symbols = symbols.len(),
            edges = edges.len(),
            flows = snapshot.flows.len(),
            "snapshot imported"
        );

        Ok(ImportStats {
            symbols: symbols.len(),
            edges: edges.len(),
            flows: snapshot.flows.len(),
            participants,
            calls,
            fingerprint,
        })
    }

    pub fn insert_flow(
        &self,
        flow: &ExecutionFlow,
        participants: &[FlowParticipant],
        calls: &[FlowCall],
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        replace_flow(&tx, flow, participants, calls)?;
        tx.commit()?;
        Ok(())
    }

    pub fn flow_keys(&self) -> Result<Vec<String>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare("SELECT key FROM flows ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .read_conn()?
            .query_row(
                "SELECT value FROM meta WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn digest(&self) -> Result<ContentDigest> {
        let symbols = self.query_symbols(&format!("SELECT {SYMBOL_COLUMNS} FROM symbols"), [])?;
        let edges = self.all_edges()?;

        let mut flow_rows = Vec::new();
        for key in self.flow_keys()? {
            if let Some(flow) = self.flow(&key)? {
                flow_rows.push(flow_row(&flow));
            }
            for participant in self.participants(&key)? {
                flow_rows.push(participant_row(&key, &participant));
            }
            for call in self.calls(&key)? {
                flow_rows.push(call_row(&key, &call));
            }
        }

        Ok(ContentDigest {
            symbols: digest_rows(symbols.iter().map(symbol_row).collect()),
            edges: digest_rows(edges.iter().map(edge_row).collect()),
            flows: digest_rows(flow_rows),
        })
    }

    fn all_edges(&self) -> Result<Vec<CallEdge>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare("SELECT caller, callee, confidence FROM call_edges ORDER BY id")?;
        let rows = stmt.query_map([], edge_from_row)?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }

    fn query_symbols<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<IndexedSymbol>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, symbol_from_row)?;
        let mut symbols = Vec::new();
        for row in rows {
            symbols.push(row?);
        }
        Ok(symbols)
    }

    fn count(&self, table: &str) -> Result<i64> {
        let count = self
            .read_conn()?
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count)
    }
}

fn insert_symbols(tx: &Transaction<'_>, symbols: &[IndexedSymbol], keep_ids: bool) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO symbols (id, function_name, file_path, class_name, language)
         VALUES (?, ?, ?, ?, ?)",
    )?;
    for symbol in symbols {
        let id = if keep_ids { Some(symbol.id) } else { None };
        stmt.execute(params![
            id,
            symbol.function_name,
            symbol.file_path,
            symbol.class_name,
            symbol.language
        ])
        .with_context(|| format!("insert symbol {}", symbol.function_name))?;
    }
    Ok(())
}

fn insert_edges(tx: &Transaction<'_>, edges: &[CallEdge]) -> Result<()> {
    let mut stmt =
        tx.prepare("INSERT INTO call_edges (caller, callee, confidence) VALUES (?, ?, ?)")?;
    for edge in edges {
        stmt.execute(params![edge.caller, edge.callee, edge.confidence])?;
    }
    Ok(())
}

fn replace_flow(
    tx: &Transaction<'_>,
    flow: &ExecutionFlow,
    participants: &[FlowParticipant],
    calls: &[FlowCall],
) -> Result<()> {
    tx.execute("DELETE FROM flow_calls WHERE flow_key = ?", params![flow.key])?;
    tx.execute(
        "DELETE FROM flow_participants WHERE flow_key = ?",
        params![flow.key],
    )?;
    tx.execute("DELETE FROM flows WHERE key = ?", params![flow.key])?;
    tx.execute(
        "INSERT INTO flows (key, name) VALUES (?, ?)",
        params![flow.key, flow.name],
    )?;

    let mut stmt = tx.prepare(
        "INSERT INTO flow_participants
            (flow_key, key, type, function_name, name, class_name, file_path, file_name, starts_flow)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for participant in participants {
        stmt.execute(params![
            flow.key,
            participant.key,
            participant.kind.as_str(),
            participant.function_name,
            participant.name,
            participant.class_name,
            participant.file_path,
            participant.file_name,
            participant.starts_flow
        ])?;
    }

    let mut stmt = tx.prepare(
        "INSERT INTO flow_calls (flow_key, caller_key, callee_key) VALUES (?, ?, ?)",
    )?;
    for call in calls {
        stmt.execute(params![flow.key, call.caller_key, call.callee_key])?;
    }
    Ok(())
}

fn symbol_from_row(row: &Row<'_>) -> rusqlite::Result<IndexedSymbol> {
    Ok(IndexedSymbol {
        id: row.get(0)?,
        function_name: row.get(1)?,
        file_path: row.get(2)?,
        class_name: row.get(3)?,
        language: row.get(4)?,
    })
}

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<CallEdge> {
    Ok(CallEdge {
        caller: row.get(0)?,
        callee: row.get(1)?,
        confidence: row.get(2)?,
    })
}

impl StaticIndex for Db {
    fn symbols_named(&self, name: &str) -> Result<Vec<IndexedSymbol>> {
        self.query_symbols(
            &format!("SELECT {SYMBOL_COLUMNS} FROM symbols WHERE function_name = ?1 {SYMBOL_ORDER}"),
            params![name],
        )
    }

    fn symbols_named_nocase(&self, name: &str) -> Result<Vec<IndexedSymbol>> {
        self.query_symbols(
            &format!(
                "SELECT {SYMBOL_COLUMNS} FROM symbols
                 WHERE function_name = ?1 COLLATE NOCASE {SYMBOL_ORDER}"
            ),
            params![name],
        )
    }

    fn symbols_containing(&self, fragment: &str) -> Result<Vec<IndexedSymbol>> {
        // instr keeps % and _ in the fragment literal
        self.query_symbols(
            &format!(
                "SELECT {SYMBOL_COLUMNS} FROM symbols
                 WHERE instr(lower(function_name), lower(?1)) > 0 {SYMBOL_ORDER}"
            ),
            params![fragment],
        )
    }

    fn symbols_in_class(&self, class_name: &str) -> Result<Vec<IndexedSymbol>> {
        self.query_symbols(
            &format!(
                "SELECT {SYMBOL_COLUMNS} FROM symbols
                 WHERE class_name = ?1 COLLATE NOCASE {SYMBOL_ORDER}"
            ),
            params![class_name.trim()],
        )
    }

    fn file_paths_containing(&self, fragment: &str) -> Result<Vec<String>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT file_path FROM symbols
             WHERE instr(lower(file_path), lower(?1)) > 0
             ORDER BY file_path",
        )?;
        let rows = stmt.query_map(params![fragment], |row| row.get(0))?;
        let mut paths = Vec::new();
        for row in rows {
            paths.push(row?);
        }
        Ok(paths)
    }

    fn outgoing_edges(&self, caller: &str) -> Result<Vec<CallEdge>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT caller, callee, confidence FROM call_edges
             WHERE caller = ?1 COLLATE NOCASE
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![caller.trim()], edge_from_row)?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }

    fn list_symbols(&self, limit: usize) -> Result<Vec<IndexedSymbol>> {
        self.query_symbols(
            &format!("SELECT {SYMBOL_COLUMNS} FROM symbols ORDER BY function_name, id LIMIT ?1"),
            params![limit as i64],
        )
    }

    fn overview(&self) -> Result<IndexOverview> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT language FROM symbols ORDER BY language")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut languages = Vec::new();
        for row in rows {
            languages.push(row?);
        }
        Ok(IndexOverview {
            symbols: self.count("symbols")?,
            edges: self.count("call_edges")?,
            flows: self.count("flows")?,
            languages,
            fingerprint: self.get_meta("fingerprint")?,
        })
    }
}

impl FlowGraph for Db {
    fn flow(&self, flow_key: &str) -> Result<Option<ExecutionFlow>> {
        let flow = self
            .read_conn()?
            .query_row(
                "SELECT key, name FROM flows WHERE key = ?",
                params![flow_key],
                |row| {
                    Ok(ExecutionFlow {
                        key: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(flow)
    }

    fn participants(&self, flow_key: &str) -> Result<Vec<FlowParticipant>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, type, function_name, name, class_name, file_path, file_name, starts_flow
             FROM flow_participants
             WHERE flow_key = ?
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![flow_key], |row| {
            let kind: String = row.get(1)?;
            Ok(FlowParticipant {
                key: row.get(0)?,
                kind: ParticipantType::parse(&kind),
                function_name: row.get(2)?,
                name: row.get(3)?,
                class_name: row.get(4)?,
                file_path: row.get(5)?,
                file_name: row.get(6)?,
                starts_flow: row.get(7)?,
            })
        })?;
        let mut participants = Vec::new();
        for row in rows {
            participants.push(row?);
        }
        Ok(participants)
    }

    fn calls(&self, flow_key: &str) -> Result<Vec<FlowCall>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT caller_key, callee_key FROM flow_calls WHERE flow_key = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![flow_key], |row| {
            Ok(FlowCall {
                caller_key: row.get(0)?,
                callee_key: row.get(1)?,
            })
        })?;
        let mut calls = Vec::new();
        for row in rows {
            calls.push(row?);
        }
        Ok(calls)
    }
}
