//! Rollup: merge each directory's subdirectory indexes into its own when
//! permissions allow, bottom-up.

pub mod engine;
pub mod permissions;
pub mod stats;
