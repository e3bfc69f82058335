//! Transaction-scoped paging over package references.
//!
//! A pager owns one pooled connection with an open read transaction, so its
//! total count and every page it returns come from the same snapshot.

use super::commit_graph::{self, Traversal};
use crate::error::Result;
use crate::model::PackageReference;
use crate::store::ReferencePager;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Row, ToSql};

/// Identifies a package by (scheme, name, version).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageKey {
    pub scheme: String,
    pub name: String,
    pub version: String,
}

impl PackageKey {
    pub fn new(scheme: &str, name: &str, version: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        }
    }
}

enum Scope {
    /// Dumps of the querying repository visible from its commit.
    SameRepo(Vec<i64>),
    /// Tip-visible dumps of every other repository.
    Remote(i64),
    Empty,
}

pub struct SqliteReferencePager {
    conn: PooledConnection<SqliteConnectionManager>,
    key: PackageKey,
    scope: Scope,
    limit: usize,
    closed: bool,
}

impl SqliteReferencePager {
    fn begin(
        conn: PooledConnection<SqliteConnectionManager>,
        key: PackageKey,
        limit: usize,
    ) -> Result<Self> {
        conn.execute_batch("BEGIN")?;
        Ok(Self {
            conn,
            key,
            scope: Scope::Empty,
            limit,
            closed: false,
        })
    }

    /// Opens a pager over references from dumps of `repository_id` visible
    /// from `commit` in either direction, ordered by (root, dump id).
    pub fn same_repo(
        conn: PooledConnection<SqliteConnectionManager>,
        repository_id: i64,
        commit: &str,
        key: PackageKey,
        limit: usize,
        traversal_limit: usize,
    ) -> Result<(usize, Self)> {
        let mut pager = Self::begin(conn, key, limit)?;
        let visible = commit_graph::visible_dump_ids(
            &pager.conn,
            repository_id,
            commit,
            Traversal::Bidirectional,
            traversal_limit,
        )?;
        if !visible.is_empty() {
            pager.scope = Scope::SameRepo(visible);
        }
        let total = pager.count()?;
        tracing::debug!(repository_id, commit, total, "opened same-repo reference pager");
        Ok((total, pager))
    }

    /// Opens a pager over references from tip-visible dumps of repositories
    /// other than `repository_id`, ordered by (repository, root, dump id).
    pub fn remote(
        conn: PooledConnection<SqliteConnectionManager>,
        repository_id: i64,
        key: PackageKey,
        limit: usize,
    ) -> Result<(usize, Self)> {
        let mut pager = Self::begin(conn, key, limit)?;
        pager.scope = Scope::Remote(repository_id);
        let total = pager.count()?;
        tracing::debug!(repository_id, total, "opened remote reference pager");
        Ok((total, pager))
    }

    fn filter_clause(&self) -> (String, Vec<&dyn ToSql>) {
        let mut params: Vec<&dyn ToSql> = Vec::new();
        params.push(&self.key.scheme);
        params.push(&self.key.name);
        params.push(&self.key.version);
        let clause = match &self.scope {
            Scope::SameRepo(ids) => {
                for id in ids {
                    params.push(id);
                }
                format!("AND pr.dump_id IN ({})", vec!["?"; ids.len()].join(","))
            }
            Scope::Remote(repository_id) => {
                params.push(repository_id);
                "AND d.repository_id != ? AND d.visible_at_tip = 1 AND d.state = 'completed'"
                    .to_string()
            }
            Scope::Empty => String::new(),
        };
        (clause, params)
    }

    fn order_clause(&self) -> &'static str {
        match self.scope {
            Scope::Remote(_) => "ORDER BY d.repository_id, d.root, d.id, pr.id",
            _ => "ORDER BY d.root, d.id, pr.id",
        }
    }

    fn count(&self) -> Result<usize> {
        if matches!(self.scope, Scope::Empty) {
            return Ok(0);
        }
        let (clause, params) = self.filter_clause();
        let sql = format!(
            "SELECT COUNT(*) FROM package_references pr
             JOIN dumps d ON d.id = pr.dump_id
             WHERE pr.scheme = ? AND pr.name = ? AND pr.version = ? {clause}"
        );
        let count: i64 = self
            .conn
            .query_row(&sql, params.as_slice(), |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

impl ReferencePager for SqliteReferencePager {
    fn page_from_offset(&mut self, offset: usize) -> Result<Vec<PackageReference>> {
        if matches!(self.scope, Scope::Empty) {
            return Ok(Vec::new());
        }

        let limit = self.limit as i64;
        let offset = offset as i64;
        let (clause, mut params) = self.filter_clause();
        params.push(&limit);
        params.push(&offset);
        let sql = format!(
            "SELECT pr.dump_id, pr.scheme, pr.name, pr.version, pr.filter
             FROM package_references pr
             JOIN dumps d ON d.id = pr.dump_id
             WHERE pr.scheme = ? AND pr.name = ? AND pr.version = ? {clause}
             {}
             LIMIT ? OFFSET ?",
            self.order_clause()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params.as_slice(), reference_from_row)?;
        let mut references = Vec::new();
        for row in rows {
            references.push(row?);
        }
        Ok(references)
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for SqliteReferencePager {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            tracing::warn!("failed to roll back reference pager transaction: {err}");
        }
    }
}

fn reference_from_row(row: &Row) -> rusqlite::Result<PackageReference> {
    Ok(PackageReference {
        dump_id: row.get(0)?,
        scheme: row.get(1)?,
        name: row.get(2)?,
        version: row.get(3)?,
        filter: row.get(4)?,
    })
}
