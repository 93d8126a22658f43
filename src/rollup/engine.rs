//! The rollup decision and merge, run once per directory by the bottom-up walk.
//!
//! For every ready directory:
//! 1. open its own database (failure: not processed);
//! 2. gate: every subdirectory must already carry a nonzero score;
//! 3. score the directory's permissions against all subdirectories at once;
//! 4. stage every subdirectory's rows in temporary tables, then move them into
//!    the directory's tables in one transaction;
//! 5. delete the merged subdirectories' databases and directories.
//!
//! A dry run stops after step 3 but still records the score, so ancestors are
//! scored as if the merge had happened.

#![allow(missing_docs)]

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rusqlite::{Connection, TransactionBehavior, params};

use crate::core::config::Config;
use crate::core::errors::{Result, RollupError};
use crate::core::paths::component_name;
use crate::index::db::{self, OpenMode};
use crate::logger::EventLog;
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::rollup::permissions::{Permissions, RollupScore, check_permissions};
use crate::rollup::stats::{RollupStats, RollupSummary};
use crate::walker::bottom_up::{ReadyDir, TreeNode, WalkConfig, WalkReport, walk};

/// Alias a subdirectory's database is attached under during a merge.
pub const ATTACH_ALIAS: &str = "subdir";

const STAGE_CREATE: &str = "
    DROP TABLE IF EXISTS temp.staged_entries;
    DROP TABLE IF EXISTS temp.staged_summary;
    CREATE TEMP TABLE staged_entries AS SELECT * FROM main.entries WHERE 0;
    CREATE TEMP TABLE staged_summary AS SELECT * FROM main.summary WHERE 0;";

const STAGE_DROP: &str = "
    DROP TABLE IF EXISTS temp.staged_entries;
    DROP TABLE IF EXISTS temp.staged_summary;";

const STAGE_ENTRIES: &str = "
    INSERT INTO temp.staged_entries
    SELECT ?1 || '/' || name, type, inode, mode, nlink, uid, gid, size, blksize,
           blocks, atime, mtime, ctime, linkname, pinode
    FROM subdir.entries";

const STAGE_SUMMARY: &str = "
    INSERT INTO temp.staged_summary
    SELECT CASE WHEN isroot = 1 THEN ?1 ELSE ?1 || '/' || name END,
           type, inode, mode, nlink, uid, gid, size, mtime, totfiles, totlinks,
           totsize, minsize, maxsize, depth, pinode, 0, rollupscore
    FROM subdir.summary";

const COMMIT_ENTRIES: &str = "INSERT INTO main.entries SELECT * FROM temp.staged_entries";
const COMMIT_SUMMARY: &str = "INSERT INTO main.summary SELECT * FROM temp.staged_summary";
const SET_SCORE: &str = "UPDATE main.summary SET rollupscore = ?1 WHERE isroot = 1";

/// Per-directory payload carried through the walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollupRecord {
    /// 0 when not merged, otherwise the score it was merged at.
    pub rolled_up: u8,
    /// Index databases this subtree still holds: 1 once rolled up, otherwise
    /// 1 plus the count of every subdirectory.
    pub remaining_dirs: usize,
}

/// Engine parameters.
#[derive(Debug, Clone)]
pub struct RollupOptions {
    pub dry_run: bool,
    pub print_scores: bool,
    pub db_name: String,
}

impl RollupOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dry_run: config.rollup.dry_run,
            print_scores: config.rollup.print_scores,
            db_name: config.rollup.db_name.clone(),
        }
    }
}

/// What happened to one directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The directory's database, or a subdirectory's, could not be read.
    NotProcessed,
    /// Gate or permission check said no.
    NotRolledUp,
    RolledUp(RollupScore),
    /// Eligible at this score but the merge did not commit.
    Failed(RollupScore),
}

impl Outcome {
    /// Score stored in the directory's payload.
    pub const fn rolled_up(self) -> u8 {
        match self {
            Self::RolledUp(score) => score.as_u8(),
            Self::NotProcessed | Self::NotRolledUp | Self::Failed(_) => 0,
        }
    }
}

/// A subdirectory database taking part in a merge.
#[derive(Debug, Clone)]
pub struct ChildDb {
    /// Name prefixed onto the child's rows.
    pub name: String,
    pub db: PathBuf,
}

/// Rolls up directories as the walk reports them ready.
pub struct RollupEngine {
    options: RollupOptions,
    stats: Vec<Mutex<RollupStats>>,
    events: Option<EventLog>,
    /// Set after the first failed `--print-scores` write.
    score_output_failed: AtomicBool,
}

impl RollupEngine {
    /// `threads` must match the walk's worker count; one stats slot each.
    pub fn new(options: RollupOptions, threads: usize, events: Option<EventLog>) -> Self {
        Self {
            options,
            stats: (0..threads.max(1))
                .map(|_| Mutex::new(RollupStats::default()))
                .collect(),
            events,
            score_output_failed: AtomicBool::new(false),
        }
    }

    /// Process one ready directory and record its score in its payload.
    pub fn rollup(&self, dir: &ReadyDir<'_, RollupRecord>) -> Outcome {
        let slot = &self.stats[dir.worker_id() % self.stats.len()];
        let outcome = self.process(dir, slot);

        let remaining_dirs = if outcome.rolled_up() == 0 {
            1 + dir
                .subdirs()
                .iter()
                .map(|child| child.payload().remaining_dirs)
                .sum::<usize>()
        } else {
            1
        };
        *dir.payload() = RollupRecord {
            rolled_up: outcome.rolled_up(),
            remaining_dirs,
        };

        let mut stats = slot.lock();
        match outcome {
            Outcome::NotProcessed => stats.not_processed += 1,
            Outcome::NotRolledUp => stats.not_rolled_up += 1,
            Outcome::RolledUp(score) => stats.record_success(score, dir.level()),
            Outcome::Failed(score) => stats.record_failure(score),
        }
        // Subtrees that stay separate: under a directory that did not roll
        // up, and the rolled-up roots themselves.
        match outcome {
            Outcome::RolledUp(_) if dir.is_root() => stats.remaining_subdirs.push(1),
            Outcome::RolledUp(_) => {}
            Outcome::NotProcessed | Outcome::NotRolledUp | Outcome::Failed(_) => {
                for child in dir.subdirs() {
                    stats.remaining_subdirs.push(child.payload().remaining_dirs);
                }
            }
        }
        outcome
    }

    fn process(&self, dir: &ReadyDir<'_, RollupRecord>, slot: &Mutex<RollupStats>) -> Outcome {
        let db_path = db::db_path(dir.path(), &self.options.db_name);
        let mode = if self.options.dry_run {
            OpenMode::ReadOnly
        } else {
            OpenMode::ReadWrite
        };
        let mut conn = match db::open_index(&db_path, mode) {
            Ok(conn) => conn,
            Err(err) => {
                eprintln!("[GUR-ROLLUP] {}: {err}", dir.path().display());
                self.event(
                    LogEntry::new(EventType::NotProcessed, Severity::Error)
                        .path(dir.path())
                        .level(dir.level())
                        .error(&err),
                );
                return Outcome::NotProcessed;
            }
        };

        match db::count_entries(&conn) {
            Ok(entries) => {
                let mut stats = slot.lock();
                stats.entries += entries;
                if entries == 0 && dir.subdirs().is_empty() {
                    stats.empty_dirs += 1;
                }
            }
            Err(err) => eprintln!("[GUR-ROLLUP] {}: {err}", dir.path().display()),
        }

        let (outcome, score) = self.decide(dir, &mut conn, &db_path);
        if self.options.print_scores {
            self.print_score(&mut io::stderr().lock(), dir.path(), score);
        }
        outcome
    }

    /// Write `<path> <score>` (0 when unscored). Only the first failure is logged.
    fn print_score(&self, out: &mut impl io::Write, path: &Path, score: Option<RollupScore>) {
        let written = writeln!(out, "{} {}", path.display(), score.map_or(0, RollupScore::as_u8));
        if let Err(err) = written
            && !self.score_output_failed.swap(true, Ordering::Relaxed)
        {
            eprintln!("[GUR-ROLLUP] could not write rollup scores: {err}");
        }
    }

    /// Returns the outcome and the computed score, if scoring was reached.
    fn decide(
        &self,
        dir: &ReadyDir<'_, RollupRecord>,
        conn: &mut Connection,
        db_path: &Path,
    ) -> (Outcome, Option<RollupScore>) {
        let path = dir.path();

        if let Some(blocker) = dir.subdirs().iter().find(|c| c.payload().rolled_up == 0) {
            self.not_rolled_up(
                dir,
                format!("subdirectory {} was not rolled up", blocker.path().display()),
            );
            return (Outcome::NotRolledUp, None);
        }

        let own = match db::root_permissions(conn, db_path) {
            Ok(perms) => perms,
            Err(err) => {
                eprintln!(
                    "[GUR-ROLLUP] could not get permissions of {}: {err}",
                    path.display()
                );
                self.not_rolled_up(dir, err.to_string());
                return (Outcome::NotRolledUp, None);
            }
        };

        let children = match self.child_permissions(dir.subdirs()) {
            Ok(children) => children,
            Err(err) => {
                eprintln!("[GUR-ROLLUP] {}: {err}", path.display());
                self.event(
                    LogEntry::new(EventType::NotProcessed, Severity::Error)
                        .path(path)
                        .level(dir.level())
                        .error(&err),
                );
                return (Outcome::NotProcessed, None);
            }
        };

        let Some(score) = check_permissions(&own, &children) else {
            self.not_rolled_up(dir, "permissions differ from a subdirectory".to_string());
            return (Outcome::NotRolledUp, None);
        };

        if self.options.dry_run {
            self.rolled_up(dir, score);
            return (Outcome::RolledUp(score), Some(score));
        }

        let child_dbs: Vec<ChildDb> = dir
            .subdirs()
            .iter()
            .map(|child| ChildDb {
                name: component_name(child.path()),
                db: db::db_path(child.path(), &self.options.db_name),
            })
            .collect();

        match merge_children(conn, &child_dbs, score) {
            Ok(()) => {
                self.rolled_up(dir, score);
                self.remove_children(dir.subdirs());
                (Outcome::RolledUp(score), Some(score))
            }
            Err(err) => {
                eprintln!("[GUR-ROLLUP] rollup of {} failed: {err}", path.display());
                self.event(
                    LogEntry::new(EventType::RollupFailed, Severity::Error)
                        .path(path)
                        .level(dir.level())
                        .score(score.as_u8())
                        .error(&err),
                );
                (Outcome::Failed(score), Some(score))
            }
        }
    }

    fn child_permissions(
        &self,
        children: &[Arc<TreeNode<RollupRecord>>],
    ) -> Result<Vec<Permissions>> {
        children
            .iter()
            .map(|child| {
                let db_path = db::db_path(child.path(), &self.options.db_name);
                let conn = db::open_index(&db_path, OpenMode::ReadOnly)?;
                db::root_permissions(&conn, &db_path)
            })
            .collect()
    }

    /// Best effort: the merge already committed, leftovers only waste space.
    fn remove_children(&self, children: &[Arc<TreeNode<RollupRecord>>]) {
        for child in children {
            let db_path = db::db_path(child.path(), &self.options.db_name);
            if let Err(err) = fs::remove_file(&db_path) {
                self.cleanup_warning(&db_path, &err);
            }
            if let Err(err) = fs::remove_dir(child.path()) {
                self.cleanup_warning(child.path(), &err);
            }
        }
    }

    fn cleanup_warning(&self, path: &Path, err: &io::Error) {
        eprintln!(
            "[GUR-ROLLUP] warning: could not remove {}: {err}",
            path.display()
        );
        self.event(
            LogEntry::new(EventType::CleanupWarning, Severity::Warning)
                .path(path)
                .details(err.to_string()),
        );
    }

    fn rolled_up(&self, dir: &ReadyDir<'_, RollupRecord>, score: RollupScore) {
        self.event(
            LogEntry::new(EventType::RollupComplete, Severity::Info)
                .path(dir.path())
                .level(dir.level())
                .score(score.as_u8())
                .dry_run(self.options.dry_run),
        );
    }

    fn not_rolled_up(&self, dir: &ReadyDir<'_, RollupRecord>, reason: String) {
        self.event(
            LogEntry::new(EventType::NotRolledUp, Severity::Info)
                .path(dir.path())
                .level(dir.level())
                .details(reason),
        );
    }

    fn event(&self, entry: LogEntry) {
        if let Some(events) = &self.events {
            events.record(&entry);
        }
    }

    /// Drain every worker slot into one summary. Later calls see only new work.
    pub fn take_summary(&self) -> RollupSummary {
        RollupStats::reduce(self.stats.iter().map(|slot| std::mem::take(&mut *slot.lock())))
            .summarize(self.options.dry_run)
    }

    /// Record the end of a walk in the event log and flush it.
    pub fn finish_events(&self, walk: &WalkReport, summary: &RollupSummary) {
        if let Some(events) = &self.events {
            let details = serde_json::json!({
                "directories_ready": walk.directories_ready,
                "directories_unreadable": walk.directories_unreadable,
                "tasks_panicked": walk.tasks_panicked,
                "not_processed": summary.not_processed,
                "not_rolled_up": summary.not_rolled_up,
                "successful": summary.successful.total,
                "failed": summary.failed.total,
            });
            events.record(
                &LogEntry::new(EventType::WalkComplete, Severity::Info)
                    .dry_run(self.options.dry_run)
                    .details(details.to_string()),
            );
            events.flush();
        }
    }
}

/// Merge every child database into `conn` as one unit.
///
/// Children are attached one at a time under [`ATTACH_ALIAS`] and staged into
/// temporary tables; a failing child does not stop the others from being
/// tried. Only if every child staged are the rows committed, together with
/// the root row's new `rollupscore`. On any failure the parent database is
/// left as it was.
pub fn merge_children(conn: &mut Connection, children: &[ChildDb], score: RollupScore) -> Result<()> {
    conn.execute_batch(STAGE_CREATE)
        .map_err(|e| RollupError::sql("create staging tables", &e))?;

    let mut failures = Vec::new();
    for child in children {
        if let Err(err) = stage_child(conn, child) {
            eprintln!(
                "[GUR-ROLLUP] could not merge {}: {err}",
                child.db.display()
            );
            failures.push(child.name.clone());
        }
    }

    let result = if failures.is_empty() {
        commit_staged(conn, score)
    } else {
        Err(RollupError::Runtime {
            details: format!(
                "{} of {} subdirectories failed to merge: {}",
                failures.len(),
                children.len(),
                failures.join(", ")
            ),
        })
    };

    if let Err(e) = conn.execute_batch(STAGE_DROP) {
        eprintln!("[GUR-ROLLUP] could not drop staging tables: {e}");
    }
    result
}

fn stage_child(conn: &Connection, child: &ChildDb) -> Result<()> {
    db::attach(conn, &child.db, ATTACH_ALIAS)?;
    let staged = conn
        .execute(STAGE_ENTRIES, params![child.name])
        .and_then(|_| conn.execute(STAGE_SUMMARY, params![child.name]))
        .map_err(|e| RollupError::sql("stage subdirectory rows", &e));
    if let Err(err) = db::detach(conn, ATTACH_ALIAS) {
        eprintln!(
            "[GUR-ROLLUP] could not detach {}: {err}",
            child.db.display()
        );
    }
    staged.map(|_| ())
}

fn commit_staged(conn: &mut Connection, score: RollupScore) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| RollupError::sql("begin merge", &e))?;
    tx.execute(COMMIT_ENTRIES, [])
        .map_err(|e| RollupError::sql("merge entries", &e))?;
    tx.execute(COMMIT_SUMMARY, [])
        .map_err(|e| RollupError::sql("merge summary", &e))?;
    tx.execute(SET_SCORE, params![score.as_u8()])
        .map_err(|e| RollupError::sql("set rollup score", &e))?;
    tx.commit().map_err(|e| RollupError::sql("commit merge", &e))
}

/// Result of a whole rollup run.
#[derive(Debug, Clone)]
pub struct RollupRun {
    pub walk: WalkReport,
    pub summary: RollupSummary,
}

/// Walk every root bottom-up and roll up each directory.
///
/// Per-directory failures end up in the summary; only configuration and pool
/// start failures are returned as errors.
pub fn run_rollup(roots: &[PathBuf], config: &Config) -> Result<RollupRun> {
    config.validate()?;
    let threads = config.walker.threads;
    let events = config.paths.event_log.as_deref().map(EventLog::open);
    let engine = Arc::new(RollupEngine::new(
        RollupOptions::from_config(config),
        threads,
        events,
    ));

    let walk_config = WalkConfig {
        roots: roots.to_vec(),
        threads,
        track_non_dirs: config.walker.track_non_dirs,
    };
    let callback_engine = Arc::clone(&engine);
    let walk = walk::<RollupRecord, _>(&walk_config, move |dir| {
        callback_engine.rollup(dir);
    })?;

    let summary = engine.take_summary();
    engine.finish_events(&walk, &summary);
    Ok(RollupRun { walk, summary })
}
