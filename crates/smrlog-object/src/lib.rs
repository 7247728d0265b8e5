//! Replicated objects over a shared log.
//!
//! An object's state is never stored; it is derived by replaying the
//! object's stream of update entries in log order. This crate provides:
//!
//! - [`DispatchTable`]: per-type registry classifying each operation as an
//!   accessor, mutator, or mutator-accessor and binding its handler
//! - [`ObjectReplica`]: one materialized object, its version, and its
//!   pending result slots
//! - [`SyncEngine`]: deterministic, mutually exclusive replay of a stream
//!   onto a replica, skipping aborted transaction batches
//! - [`ObjectHandle`]: routes each call to the log or, inside a
//!   [`Transaction`], to the transaction's snapshot-isolated view
//! - [`ObjectRuntime`]: opens objects on a [`smrlog_log::SharedLog`]
//!
//! # Consistency
//!
//! 1. Accessors outside a transaction sync to the log tail observed at call
//!    time before reading, so reads are linearizable.
//! 2. Mutators append and return without waiting.
//! 3. Mutator-accessors append, then block until the entry has been applied
//!    by this thread or any other one, and return the applied result.
//! 4. Inside a transaction all reads see the snapshot fixed by the first
//!    access plus the transaction's own buffered writes.

pub mod args;
pub mod collections;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod oracle;
pub mod replica;
pub mod runtime;
pub mod slot;
pub mod sync;
pub mod transaction;

pub use config::ObjectConfig;
pub use dispatch::{DispatchTable, DispatchTableBuilder, Operation, OperationKind};
pub use error::{DispatchError, HandlerError, ObjectError, ObjectResult};
pub use handle::ObjectHandle;
pub use oracle::{AbortOracle, CommitAll};
pub use replica::{ApplyFailure, ObjectReplica, ReplicaStats};
pub use runtime::ObjectRuntime;
pub use slot::PendingResults;
pub use sync::{SyncEngine, SyncOutcome};
pub use transaction::{Transaction, TransactionPhase};
