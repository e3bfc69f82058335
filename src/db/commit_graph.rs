//! Dump visibility over the commit graph.
//!
//! A dump is visible from a commit when it sits at a commit reachable within
//! the traversal bound and no dump of the same indexer with an overlapping
//! root is strictly closer.

use super::{DUMP_COLUMNS, dump_from_row};
use crate::error::Result;
use crate::model::Dump;
use rusqlite::{Connection, ToSql, params};
use std::collections::HashMap;

const QUERY_CHUNK: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Parents only. Used for point queries at a commit.
    Ancestors,
    /// Parents and children, each followed in its own direction only.
    Bidirectional,
}

/// A dump together with its distance from the queried commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleDump {
    pub dump: Dump,
    pub depth: usize,
}

/// Returns the non-shadowed completed dumps visible from `commit`, ordered by
/// (depth, root, id). At most `limit` commits are visited; a truncated
/// traversal yields whatever it reached.
pub fn visible_dumps(
    conn: &Connection,
    repository_id: i64,
    commit: &str,
    traversal: Traversal,
    limit: usize,
) -> Result<Vec<VisibleDump>> {
    let depths = reachable_commits(conn, repository_id, commit, traversal, limit)?;
    if depths.is_empty() {
        return Ok(Vec::new());
    }

    let candidates = dumps_at_commits(conn, repository_id, &depths)?;
    let mut visible: Vec<VisibleDump> = candidates
        .iter()
        .filter(|candidate| !is_shadowed(candidate, &candidates))
        .cloned()
        .collect();
    visible.sort_by(|a, b| {
        a.depth
            .cmp(&b.depth)
            .then_with(|| a.dump.root.cmp(&b.dump.root))
            .then_with(|| a.dump.id.cmp(&b.dump.id))
    });

    tracing::debug!(
        repository_id,
        commit,
        ?traversal,
        commits = depths.len(),
        candidates = candidates.len(),
        visible = visible.len(),
        "resolved visible dumps"
    );
    Ok(visible)
}

pub fn visible_dump_ids(
    conn: &Connection,
    repository_id: i64,
    commit: &str,
    traversal: Traversal,
    limit: usize,
) -> Result<Vec<i64>> {
    Ok(visible_dumps(conn, repository_id, commit, traversal, limit)?
        .into_iter()
        .map(|visible| visible.dump.id)
        .collect())
}

/// Visible dumps under the ancestor traversal whose root encloses `path`.
pub fn find_closest_dumps(
    conn: &Connection,
    repository_id: i64,
    commit: &str,
    path: &str,
    indexer: Option<&str>,
    limit: usize,
) -> Result<Vec<Dump>> {
    Ok(
        visible_dumps(conn, repository_id, commit, Traversal::Ancestors, limit)?
            .into_iter()
            .map(|visible| visible.dump)
            .filter(|dump| dump.encloses(path))
            .filter(|dump| indexer.is_none_or(|indexer| dump.indexer == indexer))
            .collect(),
    )
}

fn is_shadowed(candidate: &VisibleDump, all: &[VisibleDump]) -> bool {
    all.iter().any(|other| {
        other.dump.indexer == candidate.dump.indexer
            && other.depth < candidate.depth
            && roots_overlap(&other.dump.root, &candidate.dump.root)
    })
}

fn roots_overlap(a: &str, b: &str) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Breadth-first walk from `commit`, mapping each visited commit to its level.
fn reachable_commits(
    conn: &Connection,
    repository_id: i64,
    commit: &str,
    traversal: Traversal,
    limit: usize,
) -> Result<HashMap<String, usize>> {
    let mut depths: HashMap<String, usize> = HashMap::new();
    if limit == 0 || !commit_exists(conn, repository_id, commit)? {
        return Ok(depths);
    }

    depths.insert(commit.to_string(), 0);
    let mut ancestors = vec![commit.to_string()];
    let mut descendants = match traversal {
        Traversal::Ancestors => Vec::new(),
        Traversal::Bidirectional => vec![commit.to_string()],
    };

    let mut level = 0;
    while (!ancestors.is_empty() || !descendants.is_empty()) && depths.len() < limit {
        level += 1;
        ancestors = expand(conn, repository_id, &ancestors, Direction::Up, level, &mut depths, limit)?;
        descendants = expand(
            conn,
            repository_id,
            &descendants,
            Direction::Down,
            level,
            &mut depths,
            limit,
        )?;
    }

    Ok(depths)
}

#[derive(Clone, Copy)]
enum Direction {
    Up,
    Down,
}

fn expand(
    conn: &Connection,
    repository_id: i64,
    frontier: &[String],
    direction: Direction,
    level: usize,
    depths: &mut HashMap<String, usize>,
    limit: usize,
) -> Result<Vec<String>> {
    let mut next = Vec::new();
    if frontier.is_empty() {
        return Ok(next);
    }

    for neighbor in neighbors(conn, repository_id, frontier, direction)? {
        if depths.len() >= limit {
            break;
        }
        if !depths.contains_key(&neighbor) {
            depths.insert(neighbor.clone(), level);
            next.push(neighbor);
        }
    }
    Ok(next)
}

fn neighbors(
    conn: &Connection,
    repository_id: i64,
    frontier: &[String],
    direction: Direction,
) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for chunk in frontier.chunks(QUERY_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = match direction {
            Direction::Up => format!(
                "SELECT DISTINCT parent_commit FROM commits
                 WHERE repository_id = ? AND parent_commit IS NOT NULL
                   AND commit_sha IN ({placeholders})"
            ),
            Direction::Down => format!(
                "SELECT DISTINCT commit_sha FROM commits
                 WHERE repository_id = ? AND parent_commit IN ({placeholders})"
            ),
        };

        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() + 1);
        params.push(&repository_id);
        for commit in chunk {
            params.push(commit);
        }

        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params.as_slice(), |row| row.get::<_, String>(0))?;
        for row in rows {
            found.push(row?);
        }
    }
    found.sort();
    found.dedup();
    Ok(found)
}

fn commit_exists(conn: &Connection, repository_id: i64, commit: &str) -> Result<bool> {
    let mut stmt = conn.prepare_cached(
        "SELECT EXISTS(
             SELECT 1 FROM commits WHERE repository_id = ? AND commit_sha = ?
         )",
    )?;
    Ok(stmt.query_row(params![repository_id, commit], |row| row.get(0))?)
}

fn dumps_at_commits(
    conn: &Connection,
    repository_id: i64,
    depths: &HashMap<String, usize>,
) -> Result<Vec<VisibleDump>> {
    let mut commits: Vec<&String> = depths.keys().collect();
    commits.sort();

    let mut dumps = Vec::new();
    for chunk in commits.chunks(QUERY_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!(
            "SELECT {DUMP_COLUMNS} FROM dumps
             WHERE repository_id = ? AND state = 'completed'
               AND commit_sha IN ({placeholders})
             ORDER BY id"
        );

        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() + 1);
        params.push(&repository_id);
        for commit in chunk {
            params.push(*commit);
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params.as_slice(), dump_from_row)?;
        for row in rows {
            let dump = row?;
            if let Some(&depth) = depths.get(&dump.commit) {
                dumps.push(VisibleDump { dump, depth });
            }
        }
    }
    Ok(dumps)
}
