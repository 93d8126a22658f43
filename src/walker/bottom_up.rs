//! Parallel bottom-up directory walk.
//!
//! Two phases per directory. *Descend* lists the directory once, records its
//! subdirectories as owned children and sets a pending counter to their
//! number, then dispatches a descend task for each child. *Ascend* runs when a
//! child finishes: it decrements the parent's counter, and the task that takes
//! the counter to zero invokes the caller's `on_ready` for that directory,
//! frees the directory's children and moves one level up.
//!
//! Ownership: the walk owns the roots, every node owns its children, and a
//! child only holds a `Weak` back-reference to its parent. A node's children
//! are dropped by the single task that observed its zero transition, right
//! after `on_ready` returns and before the parent is signalled.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

use crate::core::errors::{Result, RollupError};
use crate::walker::pool::{QueuePool, TaskContext};

/// Walk parameters.
#[derive(Debug, Clone)]
pub struct WalkConfig {
    pub roots: Vec<PathBuf>,
    pub threads: usize,
    /// Keep the paths of non-directory entries on each node.
    pub track_non_dirs: bool,
}

/// One directory in the walk, carrying a caller-defined payload.
pub struct TreeNode<P> {
    path: PathBuf,
    level: usize,
    is_root: bool,
    parent: Weak<TreeNode<P>>,
    pending: AtomicUsize,
    listing: Mutex<Listing<P>>,
    payload: Mutex<P>,
}

struct Listing<P> {
    subdirs: Vec<Arc<TreeNode<P>>>,
    non_dirs: Vec<PathBuf>,
    non_dir_count: usize,
}

impl<P> Default for Listing<P> {
    fn default() -> Self {
        Self {
            subdirs: Vec::new(),
            non_dirs: Vec::new(),
            non_dir_count: 0,
        }
    }
}

impl<P: Default> TreeNode<P> {
    fn new(path: PathBuf, level: usize, parent: Weak<Self>, is_root: bool) -> Self {
        Self {
            path,
            level,
            is_root,
            parent,
            pending: AtomicUsize::new(0),
            listing: Mutex::new(Listing::default()),
            payload: Mutex::new(P::default()),
        }
    }
}

impl<P> TreeNode<P> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Depth below the root this node was discovered from (roots are level 0).
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Lock the caller payload.
    pub fn payload(&self) -> MutexGuard<'_, P> {
        self.payload.lock()
    }
}

/// View handed to `on_ready`: the directory plus every subdirectory it listed.
///
/// All subdirectories have already finished (or failed to list) when this is built.
pub struct ReadyDir<'a, P> {
    node: &'a TreeNode<P>,
    subdirs: &'a [Arc<TreeNode<P>>],
    non_dirs: &'a [PathBuf],
    non_dir_count: usize,
    worker: usize,
}

impl<P> ReadyDir<'_, P> {
    pub fn path(&self) -> &Path {
        self.node.path()
    }

    pub fn level(&self) -> usize {
        self.node.level()
    }

    pub fn is_root(&self) -> bool {
        self.node.is_root()
    }

    /// Worker running the callback; stable index for per-worker accumulators.
    pub fn worker_id(&self) -> usize {
        self.worker
    }

    /// Subdirectories in listing order.
    pub fn subdirs(&self) -> &[Arc<TreeNode<P>>] {
        self.subdirs
    }

    /// Non-directory entry paths; empty unless `track_non_dirs` was set.
    pub fn non_dirs(&self) -> &[PathBuf] {
        self.non_dirs
    }

    pub fn non_dir_count(&self) -> usize {
        self.non_dir_count
    }

    pub fn payload(&self) -> MutexGuard<'_, P> {
        self.node.payload()
    }
}

/// Counters describing one finished walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkReport {
    pub threads: usize,
    pub roots_requested: usize,
    pub roots_skipped: usize,
    pub directories_listed: usize,
    pub directories_ready: usize,
    pub directories_unreadable: usize,
    pub entries_unstatable: usize,
    pub tasks_completed: usize,
    /// Tasks whose panic was contained by the pool. A panic in `on_ready`
    /// leaves every ancestor of that directory without a callback.
    pub tasks_panicked: usize,
}

#[derive(Default)]
struct WalkCounters {
    listed: AtomicUsize,
    ready: AtomicUsize,
    unreadable: AtomicUsize,
    unstatable: AtomicUsize,
}

struct WalkShared<F> {
    on_ready: F,
    track_non_dirs: bool,
    counters: WalkCounters,
}

/// Walk every root bottom-up, calling `on_ready` once per listable directory
/// strictly after all of its subdirectories' calls have returned.
///
/// Missing or non-directory roots are logged and skipped. Per-directory
/// failures are logged and counted, never returned.
pub fn walk<P, F>(config: &WalkConfig, on_ready: F) -> Result<WalkReport>
where
    P: Default + Send + 'static,
    F: Fn(&ReadyDir<'_, P>) + Send + Sync + 'static,
{
    if config.threads == 0 {
        return Err(RollupError::InvalidConfig {
            details: "walk needs at least one thread".to_string(),
        });
    }

    let mut pool = QueuePool::start(config.threads)?;
    let shared = Arc::new(WalkShared {
        on_ready,
        track_non_dirs: config.track_non_dirs,
        counters: WalkCounters::default(),
    });

    let mut report = WalkReport {
        threads: pool.thread_count(),
        roots_requested: config.roots.len(),
        ..WalkReport::default()
    };

    // Roots stay owned here until the pool drains.
    let mut roots: Vec<Arc<TreeNode<P>>> = Vec::with_capacity(config.roots.len());
    for (index, root) in config.roots.iter().enumerate() {
        match fs::symlink_metadata(root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                eprintln!("[GUR-WALK] {} is not a directory; skipping", root.display());
                report.roots_skipped += 1;
                continue;
            }
            Err(err) => {
                eprintln!("[GUR-WALK] could not stat {}: {err}; skipping", root.display());
                report.roots_skipped += 1;
                continue;
            }
        }

        let node = Arc::new(TreeNode::new(root.clone(), 0, Weak::new(), true));
        roots.push(Arc::clone(&node));
        let shared = Arc::clone(&shared);
        pool.enqueue(index % pool.thread_count(), move |ctx| {
            descend(ctx, &shared, node);
        });
    }

    pool.wait();
    report.tasks_completed = pool.tasks_completed();
    report.tasks_panicked = pool.tasks_panicked();
    pool.shutdown();
    drop(roots);

    report.directories_listed = shared.counters.listed.load(Ordering::Acquire);
    report.directories_ready = shared.counters.ready.load(Ordering::Acquire);
    report.directories_unreadable = shared.counters.unreadable.load(Ordering::Acquire);
    report.entries_unstatable = shared.counters.unstatable.load(Ordering::Acquire);
    Ok(report)
}

fn descend<P, F>(ctx: &TaskContext, shared: &Arc<WalkShared<F>>, node: Arc<TreeNode<P>>)
where
    P: Default + Send + 'static,
    F: Fn(&ReadyDir<'_, P>) + Send + Sync + 'static,
{
    let entries = match fs::read_dir(&node.path) {
        Ok(entries) => entries,
        Err(err) => {
            eprintln!(
                "[GUR-WALK] could not open directory {}: {err}",
                node.path.display()
            );
            shared.counters.unreadable.fetch_add(1, Ordering::AcqRel);
            // The parent counted this child when it listed it; release that count
            // without ever making this node ready.
            let parent = node.parent.upgrade();
            drop(node);
            let shared = Arc::clone(shared);
            ctx.enqueue(ctx.worker_id(), move |ctx| ascend(ctx, &shared, parent));
            return;
        }
    };

    let mut listing = Listing::default();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                eprintln!(
                    "[GUR-WALK] could not read entry in {}: {err}",
                    node.path.display()
                );
                shared.counters.unstatable.fetch_add(1, Ordering::AcqRel);
                continue;
            }
        };
        let child_path = entry.path();

        // DirEntry::file_type does not follow symlinks, same as lstat.
        let is_dir = match entry.file_type() {
            Ok(ft) => ft.is_dir(),
            Err(_) => match fs::symlink_metadata(&child_path) {
                Ok(meta) => meta.is_dir(),
                Err(err) => {
                    eprintln!("[GUR-WALK] could not stat {}: {err}", child_path.display());
                    shared.counters.unstatable.fetch_add(1, Ordering::AcqRel);
                    continue;
                }
            },
        };

        if is_dir {
            listing.subdirs.push(Arc::new(TreeNode::new(
                child_path,
                node.level + 1,
                Arc::downgrade(&node),
                false,
            )));
        } else {
            listing.non_dir_count += 1;
            if shared.track_non_dirs {
                listing.non_dirs.push(child_path);
            }
        }
    }
    shared.counters.listed.fetch_add(1, Ordering::AcqRel);

    // Count and publish every child before any child task can run.
    let children: Vec<Arc<TreeNode<P>>> = listing.subdirs.clone();
    node.pending.store(children.len(), Ordering::Release);
    *node.listing.lock() = listing;

    if children.is_empty() {
        let shared = Arc::clone(shared);
        ctx.enqueue(ctx.worker_id(), move |ctx| ascend(ctx, &shared, Some(node)));
        return;
    }

    for child in children {
        let shared = Arc::clone(shared);
        ctx.enqueue_next(move |ctx| descend(ctx, &shared, child));
    }
}

fn ascend<P, F>(ctx: &TaskContext, shared: &Arc<WalkShared<F>>, node: Option<Arc<TreeNode<P>>>)
where
    P: Default + Send + 'static,
    F: Fn(&ReadyDir<'_, P>) + Send + Sync + 'static,
{
    // Above the roots: nothing left to signal.
    let Some(node) = node else {
        return;
    };

    let remaining = node
        .pending
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
            Some(count.saturating_sub(1))
        })
        .map_or(0, |previous| previous.saturating_sub(1));
    if remaining > 0 {
        return;
    }

    let listing = std::mem::take(&mut *node.listing.lock());
    {
        let ready = ReadyDir {
            node: &node,
            subdirs: &listing.subdirs,
            non_dirs: &listing.non_dirs,
            non_dir_count: listing.non_dir_count,
            worker: ctx.worker_id(),
        };
        (shared.on_ready)(&ready);
    }
    shared.counters.ready.fetch_add(1, Ordering::AcqRel);

    // Children go before the parent hears about this node.
    drop(listing);
    let parent = node.parent.upgrade();
    drop(node);

    let shared = Arc::clone(shared);
    ctx.enqueue(ctx.worker_id(), move |ctx| ascend(ctx, &shared, parent));
}
