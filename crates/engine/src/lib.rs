//! Persistent log storage for a multi-group Raft runtime.
//!
//! One process hosts many Raft replicas; this crate stores durable state
//! for all of them in a single ordered keyspace. Each replica is addressed
//! by `(cluster_id, node_id)` and owns five record kinds: Raft state,
//! bootstrap info, max entry index, snapshots, and log entries.
//!
//! The engine turns a slice of Raft [`Update`](logstead_types::Update)s
//! into one atomic write batch, so recovery always observes either the
//! pre-image or the complete post-image of a save. Log entries are laid
//! out by one of two interchangeable managers: one record per entry, or
//! consecutive entries packed into batch records.
//!
//! ```no_run
//! use logstead_engine::{LogDb, SaveContext};
//! use logstead_types::{Entry, RaftState, Update};
//!
//! let db = LogDb::open("data", "wal", true)?;
//! let mut ctx = SaveContext::new();
//! let update = Update {
//!     cluster_id: 1,
//!     node_id: 2,
//!     state: RaftState { term: 3, vote: 0, commit: 0 },
//!     snapshot: None,
//!     entries_to_save: vec![Entry { term: 3, index: 1, ..Default::default() }],
//! };
//! db.save_raft_state(&[update], &mut ctx)?;
//! # Ok::<(), logstead_engine::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;

pub mod context;
pub mod db;
pub mod entries;
pub mod error;
pub mod key;
pub mod pool;

pub use context::SaveContext;
pub use db::{LogDb, ReplicaRaftState};
pub use entries::{BATCHED_BINARY_FORMAT, ENTRY_BATCH_SIZE, PLAIN_BINARY_FORMAT};
pub use error::{Error, Result};
