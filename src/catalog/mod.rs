//! Catalog store — a single-file embedded relational store holding the
//! `tapes` and `files` tables, plus the indexes needed for path lookups.
//!
//! Grounded on the `ram-shortage-BRindeX` FFI crate's `db` module for the
//! SQLite connection setup (WAL mode, schema-in-`execute_batch`, typed
//! wrapper struct) and on `original_source/tapevault.py`'s `init_db` for
//! the actual `tapes`/`files` schema and its migration path.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// One physical tape, as last indexed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Tape {
    pub volume_tag: String,
    pub last_seen: i64,
    pub total_space: i64,
    pub free_space: i64,
}

/// One file as last observed on a tape.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FileEntry {
    pub volume_tag: String,
    pub path: String,
    pub size: i64,
    pub mtime: i64,
}

/// The embedded catalog database.
pub struct CatalogStore {
    conn: Connection,
}

/// Upper bound for a half-open range scan over all paths starting with
/// `prefix + '/'`. Appending `'\u{10FFFF}'` (above every path byte we can
/// observe from LTFS) gives an exclusive upper bound without a `LIKE`.
fn prefix_upper_bound(prefix_with_slash: &str) -> String {
    format!("{prefix_with_slash}\u{10FFFF}")
}

impl CatalogStore {
    /// Open (or create) the catalog at `path`.
    ///
    /// Creates the parent directory, creates the schema if absent, and
    /// migrates pre-capacity schemas by adding `total_space`/`free_space`
    /// columns defaulting to 0.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tapes (
                volume_tag  TEXT PRIMARY KEY,
                last_seen   INTEGER NOT NULL,
                total_space INTEGER NOT NULL DEFAULT 0,
                free_space  INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS files (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                volume_tag  TEXT NOT NULL REFERENCES tapes(volume_tag) ON DELETE CASCADE,
                path        TEXT NOT NULL,
                size        INTEGER NOT NULL,
                mtime       INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_path ON files (path);
            CREATE INDEX IF NOT EXISTS idx_files_volume_tag ON files (volume_tag);
            "#,
        )?;

        // Migration path for a pre-capacity schema created by an older
        // version: add the columns if they are missing.
        let has_total_space: bool = conn
            .prepare("SELECT 1 FROM pragma_table_info('tapes') WHERE name = 'total_space'")?
            .exists([])?;
        if !has_total_space {
            conn.execute(
                "ALTER TABLE tapes ADD COLUMN total_space INTEGER NOT NULL DEFAULT 0",
                [],
            )?;
        }
        let has_free_space: bool = conn
            .prepare("SELECT 1 FROM pragma_table_info('tapes') WHERE name = 'free_space'")?
            .exists([])?;
        if !has_free_space {
            conn.execute(
                "ALTER TABLE tapes ADD COLUMN free_space INTEGER NOT NULL DEFAULT 0",
                [],
            )?;
        }

        Ok(CatalogStore { conn })
    }

    /// Open an in-memory catalog (used by tests).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            r#"
            CREATE TABLE tapes (
                volume_tag  TEXT PRIMARY KEY,
                last_seen   INTEGER NOT NULL,
                total_space INTEGER NOT NULL DEFAULT 0,
                free_space  INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE files (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                volume_tag  TEXT NOT NULL REFERENCES tapes(volume_tag) ON DELETE CASCADE,
                path        TEXT NOT NULL,
                size        INTEGER NOT NULL,
                mtime       INTEGER NOT NULL
            );
            CREATE INDEX idx_files_path ON files (path);
            CREATE INDEX idx_files_volume_tag ON files (volume_tag);
            "#,
        )?;
        Ok(CatalogStore { conn })
    }

    /// All currently known volume tags.
    pub fn list_volume_tags(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT volume_tag FROM tapes")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a tape row and all its file rows atomically.
    pub fn drop_tape(&mut self, volume_tag: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM files WHERE volume_tag = ?1",
            params![volume_tag],
        )?;
        tx.execute(
            "DELETE FROM tapes WHERE volume_tag = ?1",
            params![volume_tag],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Within one transaction: delete all files for `volume_tag`, insert
    /// each new entry, and upsert the tape row.
    pub fn replace_tape_contents<I>(
        &mut self,
        volume_tag: &str,
        now: i64,
        total_space: i64,
        free_space: i64,
        entries: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (String, i64, i64)>,
    {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO tapes (volume_tag, last_seen, total_space, free_space)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(volume_tag) DO UPDATE SET
                last_seen = excluded.last_seen,
                total_space = excluded.total_space,
                free_space = excluded.free_space",
            params![volume_tag, now, total_space, free_space],
        )?;
        tx.execute(
            "DELETE FROM files WHERE volume_tag = ?1",
            params![volume_tag],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO files (volume_tag, path, size, mtime) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (path, size, mtime) in entries {
                stmt.execute(params![volume_tag, path, size, mtime])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Exact match on `path`. If multiple rows match, returns any one.
    pub fn lookup_file(&self, path: &str) -> Result<Option<(String, i64, i64)>> {
        let row = self
            .conn
            .query_row(
                "SELECT volume_tag, size, mtime FROM files WHERE path = ?1 LIMIT 1",
                params![path],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        Ok(row)
    }

    /// True iff at least one file's path begins with `prefix + '/'`.
    pub fn has_children(&self, prefix: &str) -> Result<bool> {
        let lower = format!("{prefix}/");
        let upper = prefix_upper_bound(&lower);
        let exists: bool = self
            .conn
            .prepare("SELECT 1 FROM files WHERE path >= ?1 AND path < ?2 LIMIT 1")?
            .exists(params![lower, upper])?;
        Ok(exists)
    }

    /// All paths that begin with `prefix + '/'` (prefix empty means
    /// tape-root).
    pub fn children_under(&self, prefix: &str) -> Result<Vec<String>> {
        let lower = format!("{prefix}/");
        let upper = prefix_upper_bound(&lower);
        let mut stmt = self
            .conn
            .prepare("SELECT path FROM files WHERE path >= ?1 AND path < ?2")?;
        let rows = stmt
            .query_map(params![lower, upper], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Aggregated capacity across all tapes: `(sum_total, sum_free)`.
    pub fn total_capacity(&self) -> Result<(i64, i64)> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(total_space), 0), COALESCE(SUM(free_space), 0) FROM tapes",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(Into::into)
    }

    /// Convenience on top of `lookup_file`.
    pub fn volume_of(&self, path: &str) -> Result<Option<String>> {
        Ok(self.lookup_file(path)?.map(|(tag, _, _)| tag))
    }

    /// All tapes, for the auxiliary web view.
    pub fn list_tapes(&self) -> Result<Vec<Tape>> {
        let mut stmt = self
            .conn
            .prepare("SELECT volume_tag, last_seen, total_space, free_space FROM tapes")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Tape {
                    volume_tag: row.get(0)?,
                    last_seen: row.get(1)?,
                    total_space: row.get(2)?,
                    free_space: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Files belonging to one tape under `prefix` (direct entries, used by
    /// the per-tape catalog browser).
    pub fn files_for_tape(&self, volume_tag: &str, prefix: &str) -> Result<Vec<FileEntry>> {
        let like = if prefix.is_empty() {
            "%".to_string()
        } else {
            format!("{prefix}/%")
        };
        let mut stmt = self.conn.prepare(
            "SELECT volume_tag, path, size, mtime FROM files
             WHERE volume_tag = ?1 AND path LIKE ?2",
        )?;
        let rows = stmt
            .query_map(params![volume_tag, like], |row| {
                Ok(FileEntry {
                    volume_tag: row.get(0)?,
                    path: row.get(1)?,
                    size: row.get(2)?,
                    mtime: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
