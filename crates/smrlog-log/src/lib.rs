//! Shared-log transport for smrlog.
//!
//! The object layer only needs a narrow contract from the log: append a
//! payload to one or more streams and learn its position, and read a
//! stream's records in position order up to a bound. This crate defines that
//! contract and ships an in-memory implementation.
//!
//! - [`SharedLog`]: append / ranged read / tail boundary
//! - [`StreamView`]: a [`SharedLog`] bound to a single stream
//! - [`InMemoryLog`]: thread-safe log for tests, demos, and embedding
//! - [`codec`]: length + CRC32 framing of bincode-encoded payloads

pub mod codec;
pub mod error;
pub mod memory;
pub mod stream;
pub mod traits;

pub use error::{LogError, LogResult};
pub use memory::InMemoryLog;
pub use stream::StreamView;
pub use traits::{LogRecord, SharedLog};
