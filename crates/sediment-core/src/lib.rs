//! Record format, configuration, and error types for sedimentdb.
//!
//! This crate has no I/O of its own: it defines the byte-level contract
//! (`record`), the configuration surface (`options`), and the error type
//! (`error`) shared by `sediment-storage`'s segment, index, recovery,
//! batch, and merge machinery.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod options;
pub mod record;

pub use error::{Error, Result};
pub use options::{IndexType, Options};
pub use record::{LogRecord, RecordPosition, RecordType, HEADER_SIZE, MAX_RECORD_PAYLOAD, POSITION_SIZE};
