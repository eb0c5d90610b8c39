//! Ordered key-value capability for the logstead storage engine.
//!
//! The engine above this crate composes atomic write batches and relies on
//! lexicographic key ordering for range scans, range deletes, and
//! compaction. This crate defines that capability as a trait so backends
//! stay interchangeable, and ships one backend over redb with a file mode
//! for production and an in-memory mode for tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod error;
pub mod redb_store;
pub mod store;

pub use batch::{Mutation, WriteBatch};
pub use error::{Error, Result};
pub use redb_store::RedbKv;
pub use store::KvStore;
