//! Query compilation and search over columnar, schema-partitioned log
//! archives.
//!
//! A [`query::Query`] is normalized, narrowed against literal types, pruned
//! with the archive's timestamp and range indexes, and split into one
//! sub-query per schema table. [`search::search_archive`] then scans only
//! the tables that can still match.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod archive;
pub mod config;
pub mod error;
pub mod query;
pub mod search;

pub use error::{Result, SiftError};
