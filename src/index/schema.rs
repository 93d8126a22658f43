//! Per-directory index schema and row types.
//!
//! Every index directory holds one database with two tables:
//! - `entries`: one row per non-directory entry. `name` is relative to the
//!   directory owning the database, so rows merged up from a subdirectory
//!   carry the subdirectory's name as a prefix.
//! - `summary`: one `isroot = 1` row describing the directory itself, plus one
//!   `isroot = 0` row per subdirectory that has been merged into it.

#![allow(missing_docs)]

use rusqlite::Connection;

use crate::core::errors::{Result, RollupError};

pub const CREATE_ENTRIES: &str = "CREATE TABLE IF NOT EXISTS entries (
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    inode INTEGER,
    mode INTEGER,
    nlink INTEGER,
    uid INTEGER,
    gid INTEGER,
    size INTEGER,
    blksize INTEGER,
    blocks INTEGER,
    atime INTEGER,
    mtime INTEGER,
    ctime INTEGER,
    linkname TEXT,
    pinode INTEGER
)";

pub const CREATE_SUMMARY: &str = "CREATE TABLE IF NOT EXISTS summary (
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    inode INTEGER,
    mode INTEGER NOT NULL,
    nlink INTEGER,
    uid INTEGER NOT NULL,
    gid INTEGER NOT NULL,
    size INTEGER,
    mtime INTEGER,
    totfiles INTEGER NOT NULL DEFAULT 0,
    totlinks INTEGER NOT NULL DEFAULT 0,
    totsize INTEGER NOT NULL DEFAULT 0,
    minsize INTEGER,
    maxsize INTEGER,
    depth INTEGER NOT NULL DEFAULT 0,
    pinode INTEGER,
    isroot INTEGER NOT NULL DEFAULT 0,
    rollupscore INTEGER NOT NULL DEFAULT 0
)";

/// Create both tables if they are missing.
pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!("{CREATE_ENTRIES};\n{CREATE_SUMMARY};"))
        .map_err(|e| RollupError::sql("create schema", &e))
}

/// Kind of a non-directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Link,
    Other,
}

impl EntryKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "f",
            Self::Link => "l",
            Self::Other => "o",
        }
    }
}

/// One `entries` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRow {
    pub name: String,
    pub kind: EntryKind,
    pub inode: i64,
    pub mode: u32,
    pub nlink: i64,
    pub uid: u32,
    pub gid: u32,
    pub size: i64,
    pub blksize: i64,
    pub blocks: i64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub linkname: String,
    pub pinode: i64,
}

impl EntryRow {
    /// Regular file row with zeroed metadata, for fixtures.
    pub fn file(name: impl Into<String>, size: i64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            inode: 0,
            mode: 0o100_644,
            nlink: 1,
            uid: 0,
            gid: 0,
            size,
            blksize: 4096,
            blocks: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            linkname: String::new(),
            pinode: 0,
        }
    }
}

/// The `isroot = 1` summary row of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub name: String,
    pub inode: i64,
    pub mode: u32,
    pub nlink: i64,
    pub uid: u32,
    pub gid: u32,
    pub size: i64,
    pub mtime: i64,
    pub totfiles: i64,
    pub totlinks: i64,
    pub totsize: i64,
    pub minsize: Option<i64>,
    pub maxsize: Option<i64>,
    pub depth: i64,
    pub pinode: i64,
}

impl SummaryRow {
    /// Summary for a directory with the given permissions and no entries.
    pub fn directory(name: impl Into<String>, mode: u32, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            inode: 0,
            mode,
            nlink: 2,
            uid,
            gid,
            size: 4096,
            mtime: 0,
            totfiles: 0,
            totlinks: 0,
            totsize: 0,
            minsize: None,
            maxsize: None,
            depth: 0,
            pinode: 0,
        }
    }

    /// Fold one entry into the aggregate columns.
    pub fn account(&mut self, entry: &EntryRow) {
        match entry.kind {
            EntryKind::File => {
                self.totfiles += 1;
                self.totsize += entry.size;
                self.minsize = Some(self.minsize.map_or(entry.size, |m| m.min(entry.size)));
                self.maxsize = Some(self.maxsize.map_or(entry.size, |m| m.max(entry.size)));
            }
            EntryKind::Link => self.totlinks += 1,
            EntryKind::Other => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creation_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        create_schema(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('entries', 'summary')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn summary_accounts_files_and_links() {
        let mut summary = SummaryRow::directory("d", 0o755, 1, 1);
        summary.account(&EntryRow::file("a", 10));
        summary.account(&EntryRow::file("b", 3));
        let mut link = EntryRow::file("c", 0);
        link.kind = EntryKind::Link;
        summary.account(&link);

        assert_eq!(summary.totfiles, 2);
        assert_eq!(summary.totlinks, 1);
        assert_eq!(summary.totsize, 13);
        assert_eq!(summary.minsize, Some(3));
        assert_eq!(summary.maxsize, Some(10));
    }
}
