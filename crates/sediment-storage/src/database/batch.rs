//! Atomic multi-key batches: buffer an ordered set of puts/deletes, then
//! commit them as one unit bracketed by `TXN_START`/`TXN_FINISHED`
//! markers (or a best-effort `TXN_ABORT` on failure).
//!
//! The bracket-marker scheme — rather than tagging every data record
//! with a transaction id — matches the original Bitcask-style
//! implementation this crate's commit protocol is grounded on: a
//! transaction's records sit between two marker records whose own key is
//! the ASCII-decimal transaction id.

use std::collections::BTreeMap;

use sediment_core::{Error, LogRecord, RecordType};

use super::{Database, DatabaseInner};

/// A buffered set of writes, committed atomically.
///
/// Insertion order is preserved (a `Vec` of keys alongside the map would
/// work too, but since later writes to the same key simply overwrite the
/// earlier one — matching single-key put/delete semantics — a
/// `BTreeMap` for the write set itself is enough; the commit still
/// applies index mutations for each distinct key exactly once, same as
/// `Database::put`/`Database::delete`).
pub struct Batch<'db> {
    db: &'db Database,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    committed: bool,
}

impl<'db> Batch<'db> {
    pub(crate) fn new(db: &'db Database) -> Batch<'db> {
        Batch {
            db,
            writes: BTreeMap::new(),
            committed: false,
        }
    }

    /// Buffer a put. Rejects an empty key or a batch already committed.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<(), Error> {
        if self.committed {
            return Err(Error::BatchClosed);
        }
        let key = key.into();
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        self.writes.insert(key, Some(value.into()));
        Ok(())
    }

    /// Buffer a delete. Rejects an empty key or a batch already committed.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> Result<(), Error> {
        if self.committed {
            return Err(Error::BatchClosed);
        }
        let key = key.into();
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        self.writes.insert(key, None);
        Ok(())
    }

    /// Commit every buffered write atomically. An empty batch commits as
    /// a no-op. A committed batch cannot be reused.
    pub fn commit(mut self) -> Result<(), Error> {
        if self.committed {
            return Err(Error::BatchClosed);
        }
        self.committed = true;
        if self.writes.is_empty() {
            return Ok(());
        }

        let mut inner = self.db.inner.lock();
        commit_writes(&mut inner, std::mem::take(&mut self.writes))
    }
}

/// Run the bracketed commit protocol against an already-locked
/// `DatabaseInner`. Shared by `Batch::commit` and by `Database::put`/
/// `Database::delete`'s internal single-op path is intentionally *not*
/// routed through here — single ops never allocate a transaction id,
/// matching the original semantics where only explicit batches pay for
/// markers.
fn commit_writes(inner: &mut DatabaseInner, writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>) -> Result<(), Error> {
    let txn_id = inner.seq_no + 1;

    let result = (|| -> Result<(), Error> {
        inner.ensure_open()?;
        inner.append_log_record(&LogRecord::txn_marker(txn_id, RecordType::TxnStart))?;

        let mut mutations = Vec::with_capacity(writes.len());
        for (key, value) in &writes {
            let record = match value {
                Some(v) => LogRecord::normal(key.clone(), v.clone()),
                None => LogRecord::deleted(key.clone()),
            };
            let (segment_id, offset, size) = inner.append_log_record(&record)?;
            mutations.push((key.clone(), value.is_some(), segment_id, offset, size));
        }

        inner.append_log_record(&LogRecord::txn_marker(txn_id, RecordType::TxnFinished))?;
        inner.seq_no = txn_id;

        for (key, is_put, segment_id, offset, size) in mutations {
            inner.apply_mutation(key, is_put, segment_id, offset, size);
        }

        if inner.options.sync_writes {
            inner.active.sync().map_err(Error::Io)?;
        }
        Ok(())
    })();

    if result.is_err() {
        // Best-effort abort marker; the commit already failed, so a
        // second failure here is not reported further. Recovery will
        // discard this transaction's staged records regardless, since
        // it was never finished.
        let _ = inner.append_log_record(&LogRecord::txn_marker(txn_id, RecordType::TxnAbort));
    }

    result
}
