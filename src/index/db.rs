//! Index database access: open, attach/detach, permission lookup, bulk insert.
//!
//! A connection is opened, used, and closed inside one task; handles never
//! cross threads, so every connection is opened with `SQLITE_OPEN_NO_MUTEX`.

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use crate::core::errors::{Result, RollupError};
use crate::index::schema::{self, EntryRow, SummaryRow};
use crate::rollup::permissions::Permissions;

/// How to open an index database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    /// Read-write; the file must already exist.
    ReadWrite,
    /// Read-write, creating the file and schema if needed.
    Create,
}

/// Path of the database inside an index directory.
pub fn db_path(dir: &Path, db_name: &str) -> PathBuf {
    dir.join(db_name)
}

/// Open the database at `path`. Never creates a file unless `mode` is `Create`.
pub fn open_index(path: &Path, mode: OpenMode) -> Result<Connection> {
    let base = OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
    let flags = match mode {
        OpenMode::ReadOnly => base | OpenFlags::SQLITE_OPEN_READ_ONLY,
        OpenMode::ReadWrite => base | OpenFlags::SQLITE_OPEN_READ_WRITE,
        OpenMode::Create => {
            base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        }
    };

    let conn =
        Connection::open_with_flags(path, flags).map_err(|e| RollupError::DatabaseOpen {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;

    if mode == OpenMode::Create {
        schema::create_schema(&conn)?;
    }
    Ok(conn)
}

/// Attach `db_path` read-only under `alias`.
pub fn attach(conn: &Connection, db_path: &Path, alias: &str) -> Result<()> {
    check_alias(alias)?;
    conn.execute(
        &format!("ATTACH DATABASE ?1 AS {alias}"),
        params![readonly_uri(db_path)],
    )
    .map_err(|e| RollupError::sql("attach", &e))?;
    Ok(())
}

/// Detach the database attached under `alias`.
pub fn detach(conn: &Connection, alias: &str) -> Result<()> {
    check_alias(alias)?;
    conn.execute(&format!("DETACH DATABASE {alias}"), [])
        .map_err(|e| RollupError::sql("detach", &e))?;
    Ok(())
}

/// Read `{mode, uid, gid}` from the `isroot = 1` summary row.
pub fn root_permissions(conn: &Connection, db_path: &Path) -> Result<Permissions> {
    conn.query_row(
        "SELECT mode, uid, gid FROM summary WHERE isroot = 1",
        [],
        |row| {
            Ok(Permissions {
                mode: row.get(0)?,
                uid: row.get(1)?,
                gid: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(|e| RollupError::sql("read permissions", &e))?
    .ok_or_else(|| RollupError::MissingSummary {
        path: db_path.to_path_buf(),
    })
}

/// Number of rows in `entries`.
pub fn count_entries(conn: &Connection) -> Result<u64> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
        .map_err(|e| RollupError::sql("count entries", &e))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Writes a fresh index database for one directory.
pub struct IndexWriter {
    conn: Connection,
    path: PathBuf,
}

impl IndexWriter {
    /// Create `dir/db_name` with the index schema. `dir` must exist.
    pub fn create(dir: &Path, db_name: &str) -> Result<Self> {
        let path = db_path(dir, db_name);
        if path.exists() {
            fs::remove_file(&path).map_err(|source| RollupError::io(&path, source))?;
        }
        let conn = open_index(&path, OpenMode::Create)?;
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert all rows in one transaction.
    pub fn insert_entries(&mut self, rows: &[EntryRow]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO entries (
                    name, type, inode, mode, nlink, uid, gid, size, blksize,
                    blocks, atime, mtime, ctime, linkname, pinode
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.name,
                    row.kind.as_str(),
                    row.inode,
                    row.mode,
                    row.nlink,
                    row.uid,
                    row.gid,
                    row.size,
                    row.blksize,
                    row.blocks,
                    row.atime,
                    row.mtime,
                    row.ctime,
                    row.linkname,
                    row.pinode,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert the directory's own `isroot = 1` summary row.
    pub fn insert_root_summary(&self, row: &SummaryRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO summary (
                    name, type, inode, mode, nlink, uid, gid, size, mtime,
                    totfiles, totlinks, totsize, minsize, maxsize, depth,
                    pinode, isroot, rollupscore
                ) VALUES (?1,'d',?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,1,0)",
            )?
            .execute(params![
                row.name,
                row.inode,
                row.mode,
                row.nlink,
                row.uid,
                row.gid,
                row.size,
                row.mtime,
                row.totfiles,
                row.totlinks,
                row.totsize,
                row.minsize,
                row.maxsize,
                row.depth,
                row.pinode,
            ])?;
        Ok(())
    }
}

fn check_alias(alias: &str) -> Result<()> {
    let valid = !alias.is_empty()
        && alias.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !alias.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(RollupError::InvalidConfig {
            details: format!("invalid attach alias {alias:?}"),
        })
    }
}

/// `file:` URI that opens `path` read-only. `%`, `?` and `#` are escaped so
/// they stay part of the file name.
fn readonly_uri(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut uri = String::with_capacity(raw.len() + 16);
    uri.push_str("file:");
    for c in raw.chars() {
        match c {
            '%' | '?' | '#' => {
                let _ = write!(uri, "%{:02X}", c as u32);
            }
            _ => uri.push(c),
        }
    }
    uri.push_str("?mode=ro");
    uri
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture(dir: &Path, mode: u32, entries: &[&str]) -> PathBuf {
        let mut writer = IndexWriter::create(dir, "db.db").unwrap();
        let rows: Vec<EntryRow> = entries.iter().map(|n| EntryRow::file(*n, 1)).collect();
        writer.insert_entries(&rows).unwrap();
        writer
            .insert_root_summary(&SummaryRow::directory("d", mode, 1000, 100))
            .unwrap();
        writer.path().to_path_buf()
    }

    #[test]
    fn readonly_open_never_creates() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("db.db");
        let err = open_index(&missing, OpenMode::ReadOnly).unwrap_err();
        assert_eq!(err.code(), "GUR-2001");
        assert!(!missing.exists());
        assert!(open_index(&missing, OpenMode::ReadWrite).is_err());
        assert!(!missing.exists());
    }

    #[test]
    fn reads_root_permissions() {
        let tmp = TempDir::new().unwrap();
        let path = fixture(tmp.path(), 0o40_750, &[]);
        let conn = open_index(&path, OpenMode::ReadOnly).unwrap();
        let perms = root_permissions(&conn, &path).unwrap();
        assert_eq!(
            perms,
            Permissions {
                mode: 0o40_750,
                uid: 1000,
                gid: 100
            }
        );
    }

    #[test]
    fn missing_root_row_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = db_path(tmp.path(), "db.db");
        let conn = open_index(&path, OpenMode::Create).unwrap();
        let err = root_permissions(&conn, &path).unwrap_err();
        assert!(matches!(err, RollupError::MissingSummary { .. }));
    }

    #[test]
    fn attach_reads_child_rows_and_detach_releases() {
        let tmp = TempDir::new().unwrap();
        let parent_dir = tmp.path().join("p");
        let child_dir = tmp.path().join("weird ?#% name");
        fs::create_dir_all(&parent_dir).unwrap();
        fs::create_dir_all(&child_dir).unwrap();
        let parent = fixture(&parent_dir, 0o755, &["x"]);
        let child = fixture(&child_dir, 0o755, &["y", "z"]);

        let conn = open_index(&parent, OpenMode::ReadWrite).unwrap();
        attach(&conn, &child, "subdir").unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM subdir.entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 2);
        // Attached read-only.
        assert!(conn.execute("DELETE FROM subdir.entries", []).is_err());
        detach(&conn, "subdir").unwrap();
        assert!(
            conn.query_row("SELECT COUNT(*) FROM subdir.entries", [], |r| r.get::<_, i64>(0))
                .is_err()
        );
        assert_eq!(count_entries(&conn).unwrap(), 1);
    }

    #[test]
    fn rejects_unsafe_alias() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(attach(&conn, Path::new("/tmp/x.db"), "a; DROP TABLE entries").is_err());
        assert!(detach(&conn, "1abc").is_err());
    }

    #[test]
    fn uri_escapes_reserved_characters() {
        assert_eq!(
            readonly_uri(Path::new("/idx/a?b#c%d/db.db")),
            "file:/idx/a%3Fb%23c%25d/db.db?mode=ro"
        );
    }
}
