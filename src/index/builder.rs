//! Build a per-directory index tree from a live source tree.
//!
//! Every source directory `S/x/y` gets an index directory `DEST/<basename S>/x/y`
//! holding one database: an `entries` row per non-directory entry and an
//! `isroot = 1` summary row for the directory itself. Directories are indexed
//! top-down, one pool task each; the task that lists a directory creates its
//! subdirectories' index directories before handing them to other workers.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

use crate::core::config::{Config, DEFAULT_DB_NAME};
use crate::core::errors::{Result, RollupError};
use crate::core::paths::{component_name, is_within, resolve_absolute_path};
use crate::index::db::IndexWriter;
use crate::index::schema::{EntryKind, EntryRow, SummaryRow};
use crate::walker::pool::{QueuePool, TaskContext};

/// Index construction parameters.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub threads: usize,
    pub db_name: String,
    /// Copy each source directory's mode and ownership onto its index directory.
    pub preserve_permissions: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            db_name: DEFAULT_DB_NAME.to_string(),
            preserve_permissions: false,
        }
    }
}

impl BuildOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            threads: config.walker.threads,
            db_name: config.rollup.db_name.clone(),
            preserve_permissions: false,
        }
    }
}

/// Outcome of one index build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub source: PathBuf,
    pub index_root: PathBuf,
    pub threads: usize,
    pub directories_indexed: usize,
    pub directories_failed: usize,
    pub entries_indexed: u64,
}

struct DirJob {
    source: PathBuf,
    index_dir: PathBuf,
    depth: i64,
    pinode: i64,
}

struct BuildShared {
    index_root: PathBuf,
    db_name: String,
    preserve_permissions: bool,
    indexed: AtomicUsize,
    failed: AtomicUsize,
    entries: AtomicU64,
}

/// Mirror `source` into `dest/<basename of source>` as an index tree.
///
/// Fails only when `source` is not a directory, the destination cannot be
/// created, or the pool cannot start. Per-directory failures are logged and
/// counted in the report.
pub fn build_index(source: &Path, dest: &Path, options: &BuildOptions) -> Result<BuildReport> {
    let source = resolve_absolute_path(source);
    let meta = fs::metadata(&source).map_err(|err| RollupError::io(&source, err))?;
    if !meta.is_dir() {
        return Err(RollupError::NotADirectory { path: source });
    }
    if is_within(dest, &source) {
        eprintln!(
            "[GUR-INDEX] warning: index destination {} is inside source {}",
            dest.display(),
            source.display()
        );
    }

    fs::create_dir_all(dest).map_err(|err| RollupError::io(dest, err))?;
    let index_root = resolve_absolute_path(dest).join(component_name(&source));
    create_index_dir(&index_root)?;

    let mut pool = QueuePool::start(options.threads)?;
    let shared = Arc::new(BuildShared {
        index_root: index_root.clone(),
        db_name: options.db_name.clone(),
        preserve_permissions: options.preserve_permissions,
        indexed: AtomicUsize::new(0),
        failed: AtomicUsize::new(0),
        entries: AtomicU64::new(0),
    });

    let root_job = DirJob {
        source: source.clone(),
        index_dir: index_root.clone(),
        depth: 0,
        pinode: 0,
    };
    let task_shared = Arc::clone(&shared);
    pool.enqueue(0, move |ctx| index_directory(ctx, &task_shared, root_job));
    pool.wait();
    pool.shutdown();

    Ok(BuildReport {
        source,
        index_root,
        threads: options.threads,
        directories_indexed: shared.indexed.load(Ordering::Acquire),
        directories_failed: shared.failed.load(Ordering::Acquire),
        entries_indexed: shared.entries.load(Ordering::Acquire),
    })
}

fn index_directory(ctx: &TaskContext, shared: &Arc<BuildShared>, job: DirJob) {
    match write_directory(ctx, shared, &job) {
        Ok(entries) => {
            shared.indexed.fetch_add(1, Ordering::AcqRel);
            shared.entries.fetch_add(entries, Ordering::AcqRel);
        }
        Err(err) => {
            eprintln!("[GUR-INDEX] {}: {err}", job.source.display());
            shared.failed.fetch_add(1, Ordering::AcqRel);
        }
    }
}

fn write_directory(ctx: &TaskContext, shared: &Arc<BuildShared>, job: &DirJob) -> Result<u64> {
    let dir_meta =
        fs::symlink_metadata(&job.source).map_err(|err| RollupError::io(&job.source, err))?;
    let listing = fs::read_dir(&job.source).map_err(|err| RollupError::io(&job.source, err))?;
    let dir_stat = StatFields::from_metadata(&dir_meta);

    let mut summary = SummaryRow::directory(
        component_name(&job.source),
        dir_stat.mode,
        dir_stat.uid,
        dir_stat.gid,
    );
    summary.inode = dir_stat.inode;
    summary.nlink = dir_stat.nlink;
    summary.size = dir_stat.size;
    summary.mtime = dir_stat.mtime;
    summary.depth = job.depth;
    summary.pinode = job.pinode;

    let mut rows = Vec::new();
    for entry in listing {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                eprintln!(
                    "[GUR-INDEX] could not read entry in {}: {err}",
                    job.source.display()
                );
                continue;
            }
        };
        let path = entry.path();
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(err) => {
                eprintln!("[GUR-INDEX] could not stat {}: {err}", path.display());
                continue;
            }
        };

        if meta.is_dir() {
            // Never index the index being built.
            if path == shared.index_root {
                continue;
            }
            let child_index = job.index_dir.join(entry.file_name());
            if let Err(err) = create_index_dir(&child_index) {
                eprintln!("[GUR-INDEX] {}: {err}", path.display());
                shared.failed.fetch_add(1, Ordering::AcqRel);
                continue;
            }
            let child = DirJob {
                source: path,
                index_dir: child_index,
                depth: job.depth + 1,
                pinode: dir_stat.inode,
            };
            let shared = Arc::clone(shared);
            ctx.enqueue_next(move |ctx| index_directory(ctx, &shared, child));
            continue;
        }

        let row = entry_row(&entry.file_name().to_string_lossy(), &path, &meta, dir_stat.inode);
        summary.account(&row);
        rows.push(row);
    }

    let mut writer = IndexWriter::create(&job.index_dir, &shared.db_name)?;
    writer.insert_entries(&rows)?;
    writer.insert_root_summary(&summary)?;
    drop(writer);

    if shared.preserve_permissions {
        apply_source_permissions(&job.index_dir, &dir_stat);
    }
    Ok(rows.len() as u64)
}

fn create_index_dir(path: &Path) -> Result<()> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(err) => Err(RollupError::io(path, err)),
    }
}

fn entry_row(name: &str, path: &Path, meta: &fs::Metadata, pinode: i64) -> EntryRow {
    let file_type = meta.file_type();
    let (kind, linkname) = if file_type.is_symlink() {
        let target = fs::read_link(path)
            .map(|t| t.to_string_lossy().into_owned())
            .unwrap_or_default();
        (EntryKind::Link, target)
    } else if file_type.is_file() {
        (EntryKind::File, String::new())
    } else {
        (EntryKind::Other, String::new())
    };

    let stat = StatFields::from_metadata(meta);
    EntryRow {
        name: name.to_string(),
        kind,
        inode: stat.inode,
        mode: stat.mode,
        nlink: stat.nlink,
        uid: stat.uid,
        gid: stat.gid,
        size: stat.size,
        blksize: stat.blksize,
        blocks: stat.blocks,
        atime: stat.atime,
        mtime: stat.mtime,
        ctime: stat.ctime,
        linkname,
        pinode,
    }
}

/// The `lstat` fields recorded in an index.
#[derive(Debug, Clone, Copy, Default)]
struct StatFields {
    inode: i64,
    mode: u32,
    nlink: i64,
    uid: u32,
    gid: u32,
    size: i64,
    blksize: i64,
    blocks: i64,
    atime: i64,
    mtime: i64,
    ctime: i64,
}

impl StatFields {
    fn from_metadata(meta: &fs::Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Self {
                inode: saturating_i64(meta.ino()),
                mode: meta.mode(),
                nlink: saturating_i64(meta.nlink()),
                uid: meta.uid(),
                gid: meta.gid(),
                size: saturating_i64(meta.size()),
                blksize: saturating_i64(meta.blksize()),
                blocks: saturating_i64(meta.blocks()),
                atime: meta.atime(),
                mtime: meta.mtime(),
                ctime: meta.ctime(),
            }
        }
        #[cfg(not(unix))]
        {
            Self {
                size: saturating_i64(meta.len()),
                mode: if meta.is_dir() { 0o40_755 } else { 0o100_644 },
                nlink: 1,
                ..Self::default()
            }
        }
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Best effort: ownership changes need privileges most callers lack.
fn apply_source_permissions(index_dir: &Path, stat: &StatFields) {
    #[cfg(unix)]
    {
        use nix::unistd::{Gid, Uid, chown};
        use std::os::unix::fs::PermissionsExt;

        let _ = chown(
            index_dir,
            Some(Uid::from_raw(stat.uid)),
            Some(Gid::from_raw(stat.gid)),
        );
        let _ = fs::set_permissions(index_dir, fs::Permissions::from_mode(stat.mode & 0o7777));
    }
    #[cfg(not(unix))]
    {
        let _ = (index_dir, stat);
    }
}
