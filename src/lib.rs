//! # sedimentdb
//!
//! An embedded, persistent key-value store on the Bitcask model: an
//! append-only write-ahead log of fixed-size segment files, a
//! rebuilt-on-open in-memory index, crash-safe recovery, atomic
//! multi-key batches, and offline merge/compaction.
//!
//! # Quick Start
//!
//! ```no_run
//! use sedimentdb::{Database, Options};
//!
//! fn main() -> sedimentdb::Result<()> {
//!     let db = Database::open(Options::new("./my-data"))?;
//!
//!     db.put("user:name", "Alice")?;
//!     assert_eq!(db.get(b"user:name")?, Some(b"Alice".to_vec()));
//!
//!     let mut batch = db.new_batch();
//!     batch.put("a", "1")?;
//!     batch.put("b", "2")?;
//!     batch.commit()?;
//!
//!     db.merge()?;
//!     db.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! [`Database`] is the only entry point most callers need. It is backed
//! by [`sediment_storage`], which implements segments, the index, the
//! directory lock, recovery, batching, and merge; [`sediment_core`]
//! defines the shared record format, error type, and configuration
//! surface. Neither internal crate is re-exported beyond the names below
//! — only this facade's surface is considered stable.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use sediment_core::{Error, IndexType, Options, Result};
pub use sediment_storage::{Batch, Database, Iter, Stats};
