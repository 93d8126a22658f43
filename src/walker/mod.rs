//! Task pool and the parallel bottom-up directory walk built on it.

pub mod bottom_up;
pub mod pool;
