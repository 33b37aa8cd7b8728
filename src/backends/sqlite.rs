//! SQLite Backend - Embedded Cache Storage
//!
//! File-backed and shared in-memory variants of the same engine. Both pool
//! connections through `r2d2_sqlite`; the in-memory variant additionally
//! keeps one "anchor" connection open for the cache's lifetime so the
//! shared store outlives pool churn.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags, OptionalExtension, ToSql, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::backends::schema::{
    COLUMN_COUNT, PARENT_SLOTS, TABLE, column_list, parent_hash_column, parent_key_column,
    upsert_assignments,
};
use crate::entry::{ClearMode, EntryRow, ParentRef};
use crate::errors::{CacheError, CacheResult};
use crate::settings::CacheSettings;
use crate::traits::{CacheConnection, ConnectionFactory};

/// SQLite's default page size; the `max_cache_size_mb` cap is expressed in
/// pages of this size.
const PAGE_SIZE: u64 = 4096;

/// Command timeout applied through `busy_timeout`, in milliseconds.
const BUSY_TIMEOUT_MS: u64 = 180_000;

/// Bounds of the connection pool.
const POOL_MAX_CONNECTIONS: u32 = 10;
const POOL_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Whether the factory talks to a database file or a named shared-memory
/// store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    File,
    Memory,
}

/// Every statement the SQLite dialect needs, rendered once per factory.
///
/// Parameters use SQLite's `:name` prefix; the parent-slot parameter names
/// are pre-rendered alongside so binding can loop over slots.
#[derive(Debug)]
struct SqliteStatements {
    create_schema: String,
    drop_table: String,
    table_info: String,
    upsert: String,
    parent_hash_params: Vec<String>,
    parent_key_params: Vec<String>,
    contains: String,
    count_all: String,
    count_partition: String,
    count_valid: String,
    count_valid_partition: String,
    select_one: String,
    select_many: String,
    select_many_partition: String,
    extend_expiry: String,
    delete_one: String,
    delete_all: String,
    delete_partition: String,
    delete_expired: String,
    delete_expired_partition: String,
}

impl SqliteStatements {
    fn render() -> Self {
        let columns = column_list();

        let mut body = String::new();
        body.push_str(concat!(
            "    hash INTEGER NOT NULL PRIMARY KEY,\n",
            "    partition TEXT NOT NULL,\n",
            "    key TEXT NOT NULL,\n",
            "    utc_creation INTEGER NOT NULL,\n",
            "    utc_expiry INTEGER NOT NULL,\n",
            "    interval INTEGER NOT NULL,\n",
            "    compressed INTEGER NOT NULL,\n",
            "    value BLOB NOT NULL,\n",
        ));
        for slot in 0..PARENT_SLOTS {
            body.push_str(&format!(
                "    {h} INTEGER NULL REFERENCES {TABLE} (hash) ON DELETE CASCADE,\n    {k} TEXT NULL,\n",
                h = parent_hash_column(slot),
                k = parent_key_column(slot),
            ));
        }
        body.push_str("    UNIQUE (partition, key)\n");

        let mut create_schema =
            format!("CREATE TABLE IF NOT EXISTS {TABLE} (\n{body});\n");
        create_schema.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS ix_{TABLE}_expiry ON {TABLE} (utc_expiry);\n"
        ));
        for slot in 0..PARENT_SLOTS {
            create_schema.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS ix_{TABLE}_parent{slot} ON {TABLE} ({});\n",
                parent_hash_column(slot),
            ));
        }

        let insert_params = {
            let mut names: Vec<String> = vec![
                ":hash".into(),
                ":partition".into(),
                ":key".into(),
                ":utc_creation".into(),
                ":utc_expiry".into(),
                ":interval".into(),
                ":compressed".into(),
                ":value".into(),
            ];
            for slot in 0..PARENT_SLOTS {
                names.push(format!(":{}", parent_hash_column(slot)));
                names.push(format!(":{}", parent_key_column(slot)));
            }
            names.join(", ")
        };

        Self {
            upsert: format!(
                "INSERT INTO {TABLE} ({columns}) VALUES ({insert_params}) \
                 ON CONFLICT (partition, key) DO UPDATE SET {}",
                upsert_assignments(),
            ),
            parent_hash_params: (0..PARENT_SLOTS)
                .map(|slot| format!(":{}", parent_hash_column(slot)))
                .collect(),
            parent_key_params: (0..PARENT_SLOTS)
                .map(|slot| format!(":{}", parent_key_column(slot)))
                .collect(),
            contains: format!(
                "SELECT EXISTS (SELECT 1 FROM {TABLE} \
                 WHERE partition = :partition AND key = :key AND utc_expiry >= :now)"
            ),
            count_all: format!("SELECT COUNT(*) FROM {TABLE}"),
            count_partition: format!("SELECT COUNT(*) FROM {TABLE} WHERE partition = :partition"),
            count_valid: format!("SELECT COUNT(*) FROM {TABLE} WHERE utc_expiry >= :now"),
            count_valid_partition: format!(
                "SELECT COUNT(*) FROM {TABLE} WHERE partition = :partition AND utc_expiry >= :now"
            ),
            select_one: format!(
                "SELECT {columns} FROM {TABLE} \
                 WHERE partition = :partition AND key = :key AND utc_expiry >= :now"
            ),
            select_many: format!("SELECT {columns} FROM {TABLE} WHERE utc_expiry >= :now"),
            select_many_partition: format!(
                "SELECT {columns} FROM {TABLE} \
                 WHERE partition = :partition AND utc_expiry >= :now"
            ),
            extend_expiry: format!(
                "UPDATE {TABLE} SET utc_expiry = :new_expiry \
                 WHERE hash = :hash AND utc_expiry = :observed"
            ),
            delete_one: format!("DELETE FROM {TABLE} WHERE partition = :partition AND key = :key"),
            delete_all: format!("DELETE FROM {TABLE}"),
            delete_partition: format!("DELETE FROM {TABLE} WHERE partition = :partition"),
            delete_expired: format!("DELETE FROM {TABLE} WHERE utc_expiry < :now"),
            delete_expired_partition: format!(
                "DELETE FROM {TABLE} WHERE partition = :partition AND utc_expiry < :now"
            ),
            table_info: format!("PRAGMA table_info({TABLE})"),
            drop_table: format!("DROP TABLE IF EXISTS {TABLE}"),
            create_schema,
        }
    }
}

/// Connection factory for embedded SQLite stores
///
/// Created through [`CacheBuilder`](crate::CacheBuilder) or directly via
/// [`file`](SqliteConnectionFactory::file) /
/// [`in_memory`](SqliteConnectionFactory::in_memory). The `data_source`
/// setting is the database file path for the file variant and the shared
/// store name for the in-memory variant.
pub struct SqliteConnectionFactory {
    location: Location,
    statements: Arc<SqliteStatements>,
    pool: RwLock<Option<Pool<SqliteConnectionManager>>>,
    /// Keeps the shared in-memory store alive between pool rebuilds.
    anchor: Mutex<Option<Connection>>,
}

impl SqliteConnectionFactory {
    /// Open a factory over a database file named by `settings.data_source`
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file cannot be opened or the pool
    /// cannot warm its first connection.
    pub fn file(settings: &CacheSettings) -> CacheResult<Self> {
        Self::open(Location::File, settings)
    }

    /// Open a factory over a shared in-memory store named by
    /// `settings.data_source`
    ///
    /// All pooled connections attach to the same store via a shared-cache
    /// URI; an anchor connection pins the store for the factory's lifetime.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be created.
    pub fn in_memory(settings: &CacheSettings) -> CacheResult<Self> {
        Self::open(Location::Memory, settings)
    }

    fn open(location: Location, settings: &CacheSettings) -> CacheResult<Self> {
        let factory = Self {
            location,
            statements: Arc::new(SqliteStatements::render()),
            pool: RwLock::new(None),
            anchor: Mutex::new(None),
        };
        factory.rebuild_from(settings)?;
        Ok(factory)
    }

    fn connection_target(&self, settings: &CacheSettings) -> String {
        match self.location {
            Location::File => settings.data_source.clone(),
            Location::Memory => {
                format!("file:{}?mode=memory&cache=shared", settings.data_source)
            }
        }
    }

    fn open_flags(&self) -> OpenFlags {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.location == Location::Memory {
            flags |= OpenFlags::SQLITE_OPEN_URI;
        }
        flags
    }

    /// Session PRAGMAs issued once per brand-new pooled connection.
    fn session_setup(&self, settings: &CacheSettings) -> String {
        let journal_mode = match self.location {
            Location::File => "WAL",
            Location::Memory => "MEMORY",
        };
        let max_pages =
            u64::from(settings.max_cache_size_mb).saturating_mul(1024 * 1024) / PAGE_SIZE;
        let journal_limit = u64::from(settings.max_journal_size_mb).saturating_mul(1024 * 1024);
        format!(
            "PRAGMA foreign_keys = ON;\n\
             PRAGMA journal_mode = {journal_mode};\n\
             PRAGMA synchronous = NORMAL;\n\
             PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};\n\
             PRAGMA max_page_count = {max_pages};\n\
             PRAGMA journal_size_limit = {journal_limit};"
        )
    }

    fn rebuild_from(&self, settings: &CacheSettings) -> CacheResult<()> {
        let target = self.connection_target(settings);
        let flags = self.open_flags();
        let setup = self.session_setup(settings);

        // The anchor must exist before the pool warms up, so the store the
        // pool attaches to is the one we keep alive.
        if self.location == Location::Memory {
            let anchor =
                Connection::open_with_flags(&target, flags).map_err(CacheError::storage)?;
            *self.anchor.lock() = Some(anchor);
        }

        let manager = SqliteConnectionManager::file(&target)
            .with_flags(flags)
            .with_init(move |conn| conn.execute_batch(&setup));
        let pool = Pool::builder()
            .max_size(POOL_MAX_CONNECTIONS)
            .min_idle(Some(1))
            .connection_timeout(std::time::Duration::from_secs(POOL_ACQUIRE_TIMEOUT_SECS))
            .build(manager)
            .map_err(CacheError::storage)?;

        *self.pool.write() = Some(pool);
        info!(data_source = %target, backend = self.name(), "sqlite connection pool ready");
        Ok(())
    }

    fn checkout(&self) -> CacheResult<PooledConnection<SqliteConnectionManager>> {
        let guard = self.pool.read();
        let pool = guard.as_ref().ok_or(CacheError::Disposed)?;
        pool.get().map_err(CacheError::storage)
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    fn acquire(&self) -> CacheResult<Box<dyn CacheConnection>> {
        let conn = self.checkout()?;
        Ok(Box::new(SqliteCacheConnection {
            conn,
            statements: Arc::clone(&self.statements),
        }))
    }

    fn bootstrap(&self) -> CacheResult<()> {
        let conn = self.checkout()?;
        let present: usize = {
            let mut stmt =
                conn.prepare(&self.statements.table_info).map_err(CacheError::storage)?;
            let rows = stmt.query_map([], |_| Ok(())).map_err(CacheError::storage)?;
            rows.count()
        };

        if present == COLUMN_COUNT {
            debug!(backend = self.name(), "schema probe: entries table complete");
            return Ok(());
        }
        if present != 0 {
            // A half-created or older table; cache contents are disposable.
            warn!(
                backend = self.name(),
                columns = present,
                expected = COLUMN_COUNT,
                "schema probe found incomplete entries table, recreating"
            );
            conn.execute_batch(&self.statements.drop_table).map_err(CacheError::storage)?;
        }
        conn.execute_batch(&self.statements.create_schema).map_err(CacheError::storage)?;
        info!(backend = self.name(), "entries table created");
        Ok(())
    }

    fn rebuild(&self, settings: &CacheSettings) -> CacheResult<()> {
        self.rebuild_from(settings)?;
        self.bootstrap()
    }

    fn max_parent_keys(&self) -> usize {
        PARENT_SLOTS
    }

    fn cache_size_bytes(&self) -> CacheResult<Option<u64>> {
        let conn = self.checkout()?;
        let pages: i64 = conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .map_err(CacheError::storage)?;
        let page_size: i64 = conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .map_err(CacheError::storage)?;
        let bytes = u64::try_from(pages.saturating_mul(page_size)).unwrap_or(0);
        Ok(Some(bytes))
    }

    fn vacuum(&self) -> CacheResult<()> {
        let conn = self.checkout()?;
        conn.execute_batch("VACUUM").map_err(CacheError::storage)
    }

    fn shutdown(&self) {
        *self.pool.write() = None;
        *self.anchor.lock() = None;
    }

    fn name(&self) -> &'static str {
        match self.location {
            Location::File => "sqlite",
            Location::Memory => "sqlite-memory",
        }
    }
}

/// One pooled SQLite connection bound to the factory's rendered statements
struct SqliteCacheConnection {
    conn: PooledConnection<SqliteConnectionManager>,
    statements: Arc<SqliteStatements>,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
    let mut parents = Vec::new();
    for slot in 0..PARENT_SLOTS {
        let hash: Option<i64> = row.get(8 + 2 * slot)?;
        let key: Option<String> = row.get(9 + 2 * slot)?;
        if let (Some(hash), Some(key)) = (hash, key) {
            parents.push(ParentRef { hash, key });
        }
    }
    Ok(EntryRow {
        hash: row.get(0)?,
        partition: row.get(1)?,
        key: row.get(2)?,
        utc_creation: row.get(3)?,
        utc_expiry: row.get(4)?,
        interval: row.get(5)?,
        compressed: row.get(6)?,
        value: row.get(7)?,
        parents,
    })
}

/// Extend the expiry of every sliding row in `rows`, guarded by the expiry
/// each select observed. Used inside the transactions of `get_entry` and
/// `get_many`.
fn extend_sliding_rows(
    tx: &rusqlite::Transaction<'_>,
    statements: &SqliteStatements,
    rows: &[EntryRow],
    now: i64,
) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare_cached(&statements.extend_expiry)?;
    for row in rows.iter().filter(|row| row.is_sliding()) {
        let new_expiry = now.saturating_add(row.interval);
        let updated = stmt.execute(rusqlite::named_params! {
            ":new_expiry": new_expiry,
            ":hash": row.hash,
            ":observed": row.utc_expiry,
        })?;
        if updated == 0 {
            // A concurrent writer got there first; the value we read stays
            // valid for this caller.
            debug!(hash = row.hash, "expiry extension lost its guard race");
        }
    }
    Ok(())
}

impl CacheConnection for SqliteCacheConnection {
    fn upsert_entry(&mut self, row: &EntryRow) -> CacheResult<()> {
        let statements = Arc::clone(&self.statements);
        let mut stmt =
            self.conn.prepare_cached(&statements.upsert).map_err(CacheError::storage)?;

        let parent_hashes: Vec<Option<i64>> =
            (0..PARENT_SLOTS).map(|slot| row.parents.get(slot).map(|p| p.hash)).collect();
        let parent_keys: Vec<Option<&str>> =
            (0..PARENT_SLOTS).map(|slot| row.parents.get(slot).map(|p| p.key.as_str())).collect();

        let mut params: Vec<(&str, &dyn ToSql)> = vec![
            (":hash", &row.hash),
            (":partition", &row.partition),
            (":key", &row.key),
            (":utc_creation", &row.utc_creation),
            (":utc_expiry", &row.utc_expiry),
            (":interval", &row.interval),
            (":compressed", &row.compressed),
            (":value", &row.value),
        ];
        for (name, value) in statements.parent_hash_params.iter().zip(&parent_hashes) {
            params.push((name.as_str(), value));
        }
        for (name, value) in statements.parent_key_params.iter().zip(&parent_keys) {
            params.push((name.as_str(), value));
        }

        stmt.execute(&params[..]).map_err(CacheError::storage)?;
        Ok(())
    }

    fn contains_entry(&mut self, partition: &str, key: &str, now: i64) -> CacheResult<bool> {
        let statements = Arc::clone(&self.statements);
        let mut stmt =
            self.conn.prepare_cached(&statements.contains).map_err(CacheError::storage)?;
        stmt.query_row(
            rusqlite::named_params! { ":partition": partition, ":key": key, ":now": now },
            |row| row.get(0),
        )
        .map_err(CacheError::storage)
    }

    fn count_entries(&mut self, partition: Option<&str>, now: Option<i64>) -> CacheResult<u64> {
        let statements = Arc::clone(&self.statements);
        let count: i64 = match (partition, now) {
            (None, None) => self
                .conn
                .prepare_cached(&statements.count_all)
                .and_then(|mut stmt| stmt.query_row([], |row| row.get(0))),
            (Some(partition), None) => {
                self.conn.prepare_cached(&statements.count_partition).and_then(|mut stmt| {
                    stmt.query_row(rusqlite::named_params! { ":partition": partition }, |row| {
                        row.get(0)
                    })
                })
            }
            (None, Some(now)) => {
                self.conn.prepare_cached(&statements.count_valid).and_then(|mut stmt| {
                    stmt.query_row(rusqlite::named_params! { ":now": now }, |row| row.get(0))
                })
            }
            (Some(partition), Some(now)) => {
                self.conn.prepare_cached(&statements.count_valid_partition).and_then(|mut stmt| {
                    stmt.query_row(
                        rusqlite::named_params! { ":partition": partition, ":now": now },
                        |row| row.get(0),
                    )
                })
            }
        }
        .map_err(CacheError::storage)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn peek_entry(
        &mut self,
        partition: &str,
        key: &str,
        now: i64,
    ) -> CacheResult<Option<EntryRow>> {
        let statements = Arc::clone(&self.statements);
        let mut stmt =
            self.conn.prepare_cached(&statements.select_one).map_err(CacheError::storage)?;
        stmt.query_row(
            rusqlite::named_params! { ":partition": partition, ":key": key, ":now": now },
            read_row,
        )
        .optional()
        .map_err(CacheError::storage)
    }

    fn peek_many(&mut self, partition: Option<&str>, now: i64) -> CacheResult<Vec<EntryRow>> {
        let statements = Arc::clone(&self.statements);
        select_many(&self.conn, &statements, partition, now).map_err(CacheError::storage)
    }

    fn get_entry(&mut self, partition: &str, key: &str, now: i64) -> CacheResult<Option<EntryRow>> {
        let statements = Arc::clone(&self.statements);
        // Immediate, not deferred: the transaction may upgrade to a write,
        // and a deferred read-then-write loses BUSY_SNAPSHOT races that the
        // busy handler will not retry.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(CacheError::storage)?;
        let row = {
            let mut stmt = tx.prepare_cached(&statements.select_one).map_err(CacheError::storage)?;
            stmt.query_row(
                rusqlite::named_params! { ":partition": partition, ":key": key, ":now": now },
                read_row,
            )
            .optional()
            .map_err(CacheError::storage)?
        };
        if let Some(entry) = &row {
            extend_sliding_rows(&tx, &statements, std::slice::from_ref(entry), now)
                .map_err(CacheError::storage)?;
        }
        tx.commit().map_err(CacheError::storage)?;
        Ok(row)
    }

    fn get_many(&mut self, partition: Option<&str>, now: i64) -> CacheResult<Vec<EntryRow>> {
        let statements = Arc::clone(&self.statements);
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(CacheError::storage)?;
        let rows = select_many(&tx, &statements, partition, now).map_err(CacheError::storage)?;
        extend_sliding_rows(&tx, &statements, &rows, now).map_err(CacheError::storage)?;
        tx.commit().map_err(CacheError::storage)?;
        Ok(rows)
    }

    fn delete_entry(&mut self, partition: &str, key: &str) -> CacheResult<bool> {
        let statements = Arc::clone(&self.statements);
        let mut stmt =
            self.conn.prepare_cached(&statements.delete_one).map_err(CacheError::storage)?;
        let removed = stmt
            .execute(rusqlite::named_params! { ":partition": partition, ":key": key })
            .map_err(CacheError::storage)?;
        Ok(removed > 0)
    }

    fn delete_entries(
        &mut self,
        partition: Option<&str>,
        mode: ClearMode,
        now: i64,
    ) -> CacheResult<u64> {
        let statements = Arc::clone(&self.statements);
        let removed = match (partition, mode) {
            (None, ClearMode::IgnoreExpiry) => self
                .conn
                .prepare_cached(&statements.delete_all)
                .and_then(|mut stmt| stmt.execute([])),
            (Some(partition), ClearMode::IgnoreExpiry) => {
                self.conn.prepare_cached(&statements.delete_partition).and_then(|mut stmt| {
                    stmt.execute(rusqlite::named_params! { ":partition": partition })
                })
            }
            (None, ClearMode::ConsiderExpiry) => self
                .conn
                .prepare_cached(&statements.delete_expired)
                .and_then(|mut stmt| stmt.execute(rusqlite::named_params! { ":now": now })),
            (Some(partition), ClearMode::ConsiderExpiry) => self
                .conn
                .prepare_cached(&statements.delete_expired_partition)
                .and_then(|mut stmt| {
                    stmt.execute(rusqlite::named_params! { ":partition": partition, ":now": now })
                }),
        }
        .map_err(CacheError::storage)?;
        Ok(removed as u64)
    }
}

fn select_many(
    conn: &Connection,
    statements: &SqliteStatements,
    partition: Option<&str>,
    now: i64,
) -> rusqlite::Result<Vec<EntryRow>> {
    match partition {
        Some(partition) => {
            let mut stmt = conn.prepare_cached(&statements.select_many_partition)?;
            let rows = stmt.query_map(
                rusqlite::named_params! { ":partition": partition, ":now": now },
                read_row,
            )?;
            rows.collect()
        }
        None => {
            let mut stmt = conn.prepare_cached(&statements.select_many)?;
            let rows = stmt.query_map(rusqlite::named_params! { ":now": now }, read_row)?;
            rows.collect()
        }
    }
}
