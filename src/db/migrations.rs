use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

pub const SCHEMA_VERSION: i64 = 1;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS commits (
            id INTEGER PRIMARY KEY,
            repository_id INTEGER NOT NULL,
            commit_sha TEXT NOT NULL,
            parent_commit TEXT,
            UNIQUE(repository_id, commit_sha, parent_commit)
        );

        CREATE INDEX IF NOT EXISTS idx_commits_commit ON commits(repository_id, commit_sha);
        CREATE INDEX IF NOT EXISTS idx_commits_parent ON commits(repository_id, parent_commit);

        CREATE TABLE IF NOT EXISTS dumps (
            id INTEGER PRIMARY KEY,
            repository_id INTEGER NOT NULL,
            commit_sha TEXT NOT NULL,
            root TEXT NOT NULL DEFAULT '',
            indexer TEXT NOT NULL,
            visible_at_tip INTEGER NOT NULL DEFAULT 0,
            state TEXT NOT NULL DEFAULT 'completed',
            uploaded_at INTEGER NOT NULL,
            started_at INTEGER,
            finished_at INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_dumps_commit ON dumps(repository_id, commit_sha);
        CREATE INDEX IF NOT EXISTS idx_dumps_tip ON dumps(visible_at_tip, repository_id);

        CREATE TABLE IF NOT EXISTS packages (
            id INTEGER PRIMARY KEY,
            scheme TEXT NOT NULL,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            dump_id INTEGER NOT NULL,
            FOREIGN KEY(dump_id) REFERENCES dumps(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_packages_key ON packages(scheme, name, version);

        CREATE TABLE IF NOT EXISTS package_references (
            id INTEGER PRIMARY KEY,
            scheme TEXT NOT NULL,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            dump_id INTEGER NOT NULL,
            filter BLOB NOT NULL,
            FOREIGN KEY(dump_id) REFERENCES dumps(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_package_references_key
            ON package_references(scheme, name, version);
        CREATE INDEX IF NOT EXISTS idx_package_references_dump ON package_references(dump_id);
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

    if existing.unwrap_or(0) < SCHEMA_VERSION {
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [SCHEMA_VERSION.to_string()],
        )?;
    }

    Ok(())
}
