//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use gufi_rollup::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, RollupError};

// Index
pub use crate::index::builder::{BuildOptions, BuildReport, build_index};
pub use crate::index::db::{IndexWriter, OpenMode, open_index};

// Rollup
pub use crate::rollup::engine::{Outcome, RollupEngine, RollupRecord, RollupRun, run_rollup};
pub use crate::rollup::permissions::{Permissions, RollupScore, check_permissions};
pub use crate::rollup::stats::{Distribution, RollupSummary};

// Walker
pub use crate::walker::bottom_up::{ReadyDir, WalkConfig, WalkReport, walk};
pub use crate::walker::pool::QueuePool;
