//! Per-directory index databases: schema, access helpers, and construction
//! from a live source tree.

pub mod builder;
pub mod db;
pub mod schema;
