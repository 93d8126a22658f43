#![forbid(unsafe_code)]

//! Per-directory metadata indexes and their bottom-up rollup.
//!
//! An index tree mirrors a filesystem tree with one database per directory.
//! Rolling it up merges a directory's subdirectory databases into its own
//! wherever the permissions make that invisible to readers, leaving fewer,
//! larger databases.
//!
//! - [`walker`]: a queue-per-thread task pool and a parallel bottom-up walk
//!   that calls back once per directory after all its subdirectories.
//! - [`rollup`]: the per-directory decision, merge, and run statistics.
//! - [`index`]: database schema and helpers, plus index construction.
//!
//! ```rust,no_run
//! use gufi_rollup::prelude::*;
//!
//! let config = Config::load(None)?;
//! let run = run_rollup(&["/search/index".into()], &config)?;
//! print!("{}", run.summary.render_human());
//! # Ok::<(), RollupError>(())
//! ```

pub mod prelude;

pub mod core;
pub mod index;
pub mod logger;
pub mod rollup;
pub mod walker;
