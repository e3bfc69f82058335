use crate::config::Config;
use crate::error::Result;
use crate::model::{Dump, PackageReference, RepositorySummary};
use crate::store::{ReferencePager, Store};
use anyhow::Context;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub mod commit_graph;
mod migrations;
pub mod pager;

pub use commit_graph::{Traversal, VisibleDump};
pub use pager::{PackageKey, SqliteReferencePager};

pub(crate) const DUMP_COLUMNS: &str = "id, repository_id, commit_sha, root, indexer, visible_at_tip, \
     state, uploaded_at, started_at, finished_at";

pub(crate) fn dump_from_row(row: &Row) -> rusqlite::Result<Dump> {
    Ok(Dump {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        commit: row.get(2)?,
        root: row.get(3)?,
        indexer: row.get(4)?,
        visible_at_tip: row.get(5)?,
        state: row.get(6)?,
        uploaded_at: row.get(7)?,
        started_at: row.get(8)?,
        finished_at: row.get(9)?,
    })
}

#[derive(Debug)]
struct ConnectionCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
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

/// SQLite-backed metadata store: commit graph, dumps, packages and package
/// references. Writes go through a single connection; reads and pagers use
/// the pool.
pub struct Db {
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Pool<SqliteConnectionManager>,
    traversal_limit: usize,
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
            min_idle = config.pool_min_idle,
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
            write_conn,
            read_pool,
            traversal_limit: config.max_traversal_limit,
        })
    }

    /// Overrides the commit traversal bound taken from configuration.
    pub fn with_traversal_limit(mut self, limit: usize) -> Self {
        self.traversal_limit = limit.max(1);
        self
    }

    pub fn read_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.read_pool.get()?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.write_conn
            .lock()
            .map_err(|_| anyhow::anyhow!("write connection lock poisoned").into())
    }

    /// Records one parent edge of `commit`; root commits pass `None`.
    pub fn insert_commit(&self, repository_id: i64, commit: &str, parent: Option<&str>) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO commits (repository_id, commit_sha, parent_commit)
             VALUES (?, ?, ?)",
            params![repository_id, commit, parent],
        )?;
        Ok(())
    }

    pub fn insert_dump(&self, dump: &Dump) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO dumps (id, repository_id, commit_sha, root, indexer, visible_at_tip,
                                state, uploaded_at, started_at, finished_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                dump.id,
                dump.repository_id,
                dump.commit,
                dump.root,
                dump.indexer,
                dump.visible_at_tip,
                dump.state,
                dump.uploaded_at,
                dump.started_at,
                dump.finished_at,
            ],
        )?;
        Ok(())
    }

    /// Removes a dump along with the packages and references it provides.
    pub fn delete_dump(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM dumps WHERE id = ?", params![id])?;
        Ok(deleted > 0)
    }

    pub fn insert_package(&self, scheme: &str, name: &str, version: &str, dump_id: i64) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO packages (scheme, name, version, dump_id) VALUES (?, ?, ?, ?)",
            params![scheme, name, version, dump_id],
        )?;
        Ok(())
    }

    pub fn insert_package_references(&self, references: &[PackageReference]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO package_references (scheme, name, version, dump_id, filter)
                 VALUES (?, ?, ?, ?, ?)",
            )?;
            for reference in references {
                stmt.execute(params![
                    reference.scheme,
                    reference.name,
                    reference.version,
                    reference.dump_id,
                    reference.filter,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn visible_dumps(
        &self,
        repository_id: i64,
        commit: &str,
        traversal: Traversal,
    ) -> Result<Vec<VisibleDump>> {
        let conn = self.read_conn()?;
        commit_graph::visible_dumps(&conn, repository_id, commit, traversal, self.traversal_limit)
    }
}

impl Store for Db {
    fn get_dump_by_id(&self, id: i64) -> Result<Option<Dump>> {
        let conn = self.read_conn()?;
        let sql = format!("SELECT {DUMP_COLUMNS} FROM dumps WHERE id = ?");
        Ok(conn
            .query_row(&sql, params![id], dump_from_row)
            .optional()?)
    }

    fn get_package(&self, scheme: &str, name: &str, version: &str) -> Result<Option<Dump>> {
        let conn = self.read_conn()?;
        let sql = format!(
            "SELECT {DUMP_COLUMNS} FROM dumps
             WHERE id = (
                 SELECT dump_id FROM packages
                 WHERE scheme = ? AND name = ? AND version = ?
                 ORDER BY id
                 LIMIT 1
             )"
        );
        Ok(conn
            .query_row(&sql, params![scheme, name, version], dump_from_row)
            .optional()?)
    }

    fn find_closest_dumps(
        &self,
        repository_id: i64,
        commit: &str,
        path: &str,
        indexer: Option<&str>,
    ) -> Result<Vec<Dump>> {
        let conn = self.read_conn()?;
        commit_graph::find_closest_dumps(
            &conn,
            repository_id,
            commit,
            path,
            indexer,
            self.traversal_limit,
        )
    }

    fn same_repo_pager(
        &self,
        repository_id: i64,
        commit: &str,
        scheme: &str,
        name: &str,
        version: &str,
        limit: usize,
    ) -> Result<(usize, Box<dyn ReferencePager>)> {
        let (total, pager) = SqliteReferencePager::same_repo(
            self.read_conn()?,
            repository_id,
            commit,
            PackageKey::new(scheme, name, version),
            limit,
            self.traversal_limit,
        )?;
        Ok((total, Box::new(pager)))
    }

    fn package_reference_pager(
        &self,
        scheme: &str,
        name: &str,
        version: &str,
        repository_id: i64,
        limit: usize,
    ) -> Result<(usize, Box<dyn ReferencePager>)> {
        let (total, pager) = SqliteReferencePager::remote(
            self.read_conn()?,
            repository_id,
            PackageKey::new(scheme, name, version),
            limit,
        )?;
        Ok((total, Box::new(pager)))
    }

    fn list_indexed_repositories(&self) -> Result<Vec<RepositorySummary>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT repository_id, COUNT(*)
             FROM dumps
             WHERE state = 'completed'
             GROUP BY repository_id
             ORDER BY repository_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RepositorySummary {
                repository_id: row.get(0)?,
                dump_count: row.get(1)?,
            })
        })?;
        let mut repositories = Vec::new();
        for row in rows {
            repositories.push(row?);
        }
        Ok(repositories)
    }
}
