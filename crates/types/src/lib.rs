//! Core types for the logstead Raft log storage engine.
//!
//! This crate provides the record types that the storage engine persists:
//! - Identifier aliases (`ClusterId`, `NodeId`) and replica addressing
//! - Durable Raft state, log entries, snapshots, and bootstrap records
//! - The `Update` unit of work handed to the engine by the Raft runtime
//! - A centralized codec for turning records into bytes

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod records;

pub use codec::{decode, encode, encode_into, CodecError};
pub use records::*;
