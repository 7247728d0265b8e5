//! Foundation types for smrlog.
//!
//! This crate provides the identity, position, and log-entry types shared by
//! the log transport, the object layer, and the transaction coordinator.
//!
//! # Key Types
//!
//! - [`StreamId`]: BLAKE3-derived identifier of one object stream
//! - [`TransactionId`]: UUID v7 transaction identifier
//! - [`LogPosition`]: position assigned by the shared log on append
//! - [`ReadBound`]: a concrete position or the current `Tail`
//! - [`UpdateEntry`]: one deterministic state transition (an SMR entry)
//! - [`TransactionBatch`]: a multi-stream set of updates that commits or aborts atomically
//! - [`LogPayload`]: tagged payload of a log record

pub mod entry;
pub mod identity;
pub mod position;

pub use entry::{LogPayload, SerializerTag, TransactionBatch, UpdateEntry};
pub use identity::{StreamId, TransactionId};
pub use position::{LogPosition, ReadBound};
