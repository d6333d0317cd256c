//! SQLite-backed local store.
//!
//! Creates one table per [`TableSpec`] plus a `sync_state` key/value table.

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use fieldsync_common::{
    Error, FieldKind, NaturalKey, Record, Result, StatusCounts, SyncStatus, TableSpec,
};

use crate::store::{mapped_columns, LocalStore, SYNC_STATUS_COLUMN};

/// Natural keys matched per statement.
const NATURAL_KEY_CHUNK: usize = 200;

/// Local store backed by a SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a database and make sure every table exists.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>, tables: &[&TableSpec]) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(storage_err)?;
        Self::init(conn, tables)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory(tables: &[&TableSpec]) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn, tables)
    }

    fn init(conn: Connection, tables: &[&TableSpec]) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sync_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .map_err(storage_err)?;

        for table in tables {
            conn.execute_batch(&schema_sql(table)).map_err(storage_err)?;
        }

        info!("SQLite store opened with {} tables", tables.len());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("sqlite connection lock poisoned".to_string()))
    }

    /// Record a local edit: the row is upserted and flagged pending.
    pub fn put_local(&self, table: &TableSpec, row: &Record) -> Result<()> {
        let conn = self.lock()?;
        upsert_row(&conn, table, row, SyncStatus::Pending)
    }

    /// Get a row by primary key.
    pub fn get(&self, table: &TableSpec, id: &str) -> Result<Option<Record>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            select_list(table),
            quote(table.local_name),
            quote(table.primary_key)
        );
        conn.query_row(&sql, [id], |row| read_record(table, row))
            .optional()
            .map_err(storage_err)
    }

    /// Get the sync status of a row.
    pub fn status_of(&self, table: &TableSpec, id: &str) -> Result<Option<SyncStatus>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            quote(SYNC_STATUS_COLUMN),
            quote(table.local_name),
            quote(table.primary_key)
        );
        let status: Option<String> = conn
            .query_row(&sql, [id], |row| row.get(0))
            .optional()
            .map_err(storage_err)?;
        status.map(|s| s.parse::<SyncStatus>()).transpose()
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn select_pending(&self, table: &TableSpec, limit: usize) -> Result<Vec<Record>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY rowid LIMIT ?2",
            select_list(table),
            quote(table.local_name),
            quote(SYNC_STATUS_COLUMN)
        );
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(
                params![SyncStatus::Pending.as_str(), limit as i64],
                |row| read_record(table, row),
            )
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    async fn upsert_many(&self, table: &TableSpec, rows: &[Record]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        for row in rows {
            upsert_row(&tx, table, row, SyncStatus::Synced)?;
        }
        tx.commit().map_err(storage_err)?;
        debug!("Upserted {} rows into {}", rows.len(), table.local_name);
        Ok(rows.len())
    }

    async fn update_status_chunked(
        &self,
        table: &TableSpec,
        ids: &[String],
        status: SyncStatus,
        chunk_size: usize,
    ) -> Result<usize> {
        if chunk_size == 0 {
            return Err(Error::InvalidInput("chunk size must be positive".to_string()));
        }

        let conn = self.lock()?;
        let mut updated = 0;
        for chunk in ids.chunks(chunk_size) {
            let placeholders: Vec<String> = (0..chunk.len()).map(|i| format!("?{}", i + 2)).collect();
            let sql = format!(
                "UPDATE {} SET {} = ?1 WHERE {} IN ({})",
                quote(table.local_name),
                quote(SYNC_STATUS_COLUMN),
                quote(table.primary_key),
                placeholders.join(", ")
            );
            let values = std::iter::once(status.as_str()).chain(chunk.iter().map(String::as_str));
            updated += conn
                .execute(&sql, params_from_iter(values))
                .map_err(storage_err)?;
        }
        Ok(updated)
    }

    async fn select_by_natural_key(
        &self,
        table: &TableSpec,
        keys: &[NaturalKey],
    ) -> Result<Vec<Record>> {
        if keys.is_empty() || !table.has_natural_key() {
            return Ok(Vec::new());
        }

        let width = table.natural_key.len();
        if let Some(bad) = keys.iter().find(|key| key.len() != width) {
            return Err(Error::InvalidInput(format!(
                "Natural key {:?} does not match {} columns of {}",
                bad, width, table.id
            )));
        }

        let conn = self.lock()?;
        let mut out = Vec::new();

        for chunk in keys.chunks(NATURAL_KEY_CHUNK) {
            let mut param_index = 0;
            let clauses: Vec<String> = chunk
                .iter()
                .map(|_| {
                    let parts: Vec<String> = table
                        .natural_key
                        .iter()
                        .map(|column| {
                            param_index += 1;
                            format!("{} = ?{}", quote(column), param_index)
                        })
                        .collect();
                    format!("({})", parts.join(" AND "))
                })
                .collect();

            let sql = format!(
                "SELECT {} FROM {} WHERE {} ORDER BY rowid",
                select_list(table),
                quote(table.local_name),
                clauses.join(" OR ")
            );

            let values = chunk.iter().flat_map(|key| key.iter().map(String::as_str));
            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(params_from_iter(values), |row| read_record(table, row))
                .map_err(storage_err)?;
            for row in rows {
                out.push(row.map_err(storage_err)?);
            }
        }
        Ok(out)
    }

    async fn exists(&self, table: &TableSpec, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = ?1",
            quote(table.local_name),
            quote(table.primary_key)
        );
        let found: Option<i64> = conn
            .query_row(&sql, [id], |row| row.get(0))
            .optional()
            .map_err(storage_err)?;
        Ok(found.is_some())
    }

    async fn count_by_status(&self, table: &TableSpec) -> Result<StatusCounts> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {}, COUNT(*) FROM {} GROUP BY 1",
            quote(SYNC_STATUS_COLUMN),
            quote(table.local_name)
        );
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(storage_err)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row.map_err(storage_err)?;
            match status.parse::<SyncStatus>()? {
                SyncStatus::Pending => counts.pending = count as usize,
                SyncStatus::Synced => counts.synced = count as usize,
                SyncStatus::Error => counts.error = count as usize,
            }
        }
        Ok(counts)
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row("SELECT value FROM sync_state WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(storage_err)
    }

    async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(storage_err)?;
        Ok(())
    }
}

fn storage_err(err: rusqlite::Error) -> Error {
    match err {
        rusqlite::Error::SqliteFailure(code, msg)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(msg.unwrap_or_else(|| code.to_string()))
        }
        other => Error::Storage(other.to_string()),
    }
}

/// Quote an identifier for SQL.
fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn select_list(table: &TableSpec) -> String {
    table.columns().map(quote).collect::<Vec<_>>().join(", ")
}

fn column_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text | FieldKind::Json => "TEXT",
        FieldKind::Integer | FieldKind::Bool => "INTEGER",
        FieldKind::Real => "REAL",
        // No declared type: epoch integers and RFC 3339 strings are kept as given.
        FieldKind::Timestamp => "",
    }
}

fn schema_sql(table: &TableSpec) -> String {
    let mut columns: Vec<String> = table
        .fields
        .iter()
        .map(|f| {
            if f.local == table.primary_key {
                format!("{} TEXT PRIMARY KEY NOT NULL", quote(f.local))
            } else {
                format!("{} {}", quote(f.local), column_type(f.kind)).trim_end().to_string()
            }
        })
        .collect();
    columns.push(format!(
        "{} TEXT NOT NULL DEFAULT '{}'",
        quote(SYNC_STATUS_COLUMN),
        SyncStatus::Pending.as_str()
    ));

    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ({});\n",
        quote(table.local_name),
        columns.join(", ")
    );
    sql.push_str(&format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({});\n",
        quote(&format!("ix_{}_sync_status", table.local_name)),
        quote(table.local_name),
        quote(SYNC_STATUS_COLUMN)
    ));
    if table.has_natural_key() {
        let key_columns: Vec<String> = table.natural_key.iter().map(|c| quote(c)).collect();
        sql.push_str(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({});\n",
            quote(&format!("ux_{}_natural_key", table.local_name)),
            quote(table.local_name),
            key_columns.join(", ")
        ));
    }
    sql
}

fn upsert_row(conn: &Connection, table: &TableSpec, row: &Record, status: SyncStatus) -> Result<()> {
    if table.row_id(row).is_none() {
        return Err(Error::InvalidInput(format!(
            "Row for {} has no primary key",
            table.id
        )));
    }

    let columns = mapped_columns(table, row);
    let mut names: Vec<String> = columns.iter().map(|(c, _)| quote(c)).collect();
    names.push(quote(SYNC_STATUS_COLUMN));
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();

    let updates: Vec<String> = names
        .iter()
        .filter(|c| **c != quote(table.primary_key))
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) DO UPDATE SET {}",
        quote(table.local_name),
        names.join(", "),
        placeholders.join(", "),
        quote(table.primary_key),
        updates.join(", ")
    );

    let mut values: Vec<SqlValue> = columns.iter().map(|(_, v)| to_sql(v)).collect();
    values.push(SqlValue::Text(status.as_str().to_string()));

    conn.execute(&sql, params_from_iter(values))
        .map_err(storage_err)?;
    Ok(())
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    }
}

fn read_record(table: &TableSpec, row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let mut record = Record::new();
    for (i, column) in table.columns().enumerate() {
        let value = from_sql(row.get_ref(i)?);
        record.insert(column.to_string(), value);
    }
    Ok(record)
}
