//! The database handle: lifecycle, write path, read path, sync policy,
//! and statistics, all serialized behind one mutex per instance.
//!
//! Where the teacher's `DatabaseHandle` splits its state across several
//! independently-locked fields, this type consolidates everything
//! mutable into one `DatabaseInner` behind a single `parking_lot::Mutex`
//! — a deliberate simplification that trades a small amount of read
//! concurrency for removing an entire class of lock-ordering bugs in an
//! embedded, single-process store.

pub mod batch;
pub mod merge;
pub mod recovery;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sediment_core::{Error, LogRecord, Options, RecordPosition, RecordType, Result};

use crate::index::KeyDirIndex;
use crate::lock::DirectoryLock;
use crate::segment::Segment;

pub use batch::Batch;

const SEQ_NO_FILE_NAME: &str = "seq-no.data";
const RESERVED_FILE_NAMES: &[&str] = &[
    SEQ_NO_FILE_NAME,
    "flock",
    "hint-index",
    "merge.data",
    "merge-finished.data",
];

/// Point-in-time statistics about a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Number of live keys in the index.
    pub key_count: u64,
    /// Number of segment files (active plus immutable).
    pub segment_count: u64,
    /// Total bytes occupied by all segment files.
    pub on_disk_bytes: u64,
    /// Bytes occupied by superseded or deleted records, eligible for
    /// reclamation by a merge.
    pub reclaimable_bytes: u64,
}

/// A forward- or reverse-ordered snapshot iterator over live keys,
/// fetching values on demand via the standard read path.
pub struct Iter<'db> {
    db: &'db Database,
    cursor: crate::index::IndexCursor,
}

impl<'db> Iter<'db> {
    /// Reset to the first entry.
    pub fn rewind(&mut self) {
        self.cursor.rewind();
    }

    /// Advance to the first entry at or past `key` (direction-dependent).
    pub fn seek(&mut self, key: &[u8]) {
        self.cursor.seek(key);
    }

    /// Whether the cursor currently points at an entry.
    pub fn valid(&self) -> bool {
        self.cursor.valid()
    }

    /// The current entry's key. Panics if `!valid()`.
    pub fn key(&self) -> Vec<u8> {
        self.cursor.key().to_vec()
    }

    /// The current entry's value, read fresh from its segment. `None` if
    /// the position no longer resolves to a live record (a concurrent
    /// delete landed between snapshot and read).
    pub fn value(&self) -> Result<Option<Vec<u8>>> {
        let pos = self.cursor.position();
        let mut inner = self.db.inner.lock();
        inner.read_at(pos).map_err(Error::Io)
    }

    /// Advance to the next entry.
    pub fn next(&mut self) {
        self.cursor.next();
    }
}

/// An open, crash-recoverable key-value database backed by one directory
/// of append-only segment files.
pub struct Database {
    inner: Mutex<DatabaseInner>,
    _lock: DirectoryLock,
}

struct DatabaseInner {
    dir_path: PathBuf,
    options: Options,
    active: Segment,
    older: HashMap<u32, Segment>,
    file_ids: Vec<u32>,
    index: KeyDirIndex,
    seq_no: u64,
    bytes_written: u64,
    reclaim_size: u64,
    closed: bool,
}

impl Database {
    /// Open (creating if necessary) the database directory named by
    /// `options.dir_path`.
    pub fn open(options: Options) -> Result<Database> {
        fs::create_dir_all(&options.dir_path).map_err(Error::Io)?;
        let dir_path = options.dir_path.clone();

        let lock = DirectoryLock::acquire(&dir_path)?;

        merge::load_merge_artifacts(&dir_path).map_err(Error::Io)?;

        let mut file_ids = enumerate_segment_ids(&dir_path).map_err(Error::Io)?;
        if file_ids.is_empty() {
            file_ids.push(1);
        }
        let active_id = *file_ids.last().unwrap();

        let mut older = HashMap::new();
        for &id in &file_ids {
            if id == active_id {
                continue;
            }
            let segment = if options.mmap_at_startup {
                Segment::open_mmap(&dir_path, id).map_err(Error::Io)?
            } else {
                Segment::open_buffered(&dir_path, id).map_err(Error::Io)?
            };
            older.insert(id, segment);
        }

        let mut active = if options.mmap_at_startup {
            Segment::open_mmap(&dir_path, active_id).map_err(Error::Io)?
        } else {
            Segment::open_buffered(&dir_path, active_id).map_err(Error::Io)?
        };

        let recovered = {
            let mut segment_refs: Vec<(u32, &mut Segment)> = older
                .iter_mut()
                .map(|(id, seg)| (*id, seg))
                .collect();
            segment_refs.sort_by_key(|(id, _)| *id);
            segment_refs.push((active_id, &mut active));
            recovery::recover(&dir_path, &mut segment_refs).map_err(Error::Io)?
        };

        if options.mmap_at_startup {
            active.rebind_buffered(&dir_path).map_err(Error::Io)?;
        }

        let seq_no = load_seq_no(&dir_path).map_err(Error::Io)?.unwrap_or(recovered.seq_no);

        let inner = DatabaseInner {
            dir_path,
            options,
            active,
            older,
            file_ids,
            index: recovered.index,
            seq_no,
            bytes_written: 0,
            reclaim_size: recovered.reclaim_size,
            closed: false,
        };

        Ok(Database {
            inner: Mutex::new(inner),
            _lock: lock,
        })
    }

    /// Insert or overwrite `key`. Rejects an empty key.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        let record = LogRecord::normal(key.clone(), value.into());
        let (segment_id, offset, size) = inner.append_log_record(&record)?;
        inner.apply_mutation(key, true, segment_id, offset, size);
        inner.maybe_sync()?;
        Ok(())
    }

    /// Look up `key`'s current value. Rejects an empty key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        let Some(pos) = inner.index.get(key) else {
            return Ok(None);
        };
        inner.read_at(pos).map_err(Error::Io)
    }

    /// Remove `key` if present. Rejects an empty key.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        if inner.index.get(key).is_none() {
            return Ok(());
        }
        let record = LogRecord::deleted(key.to_vec());
        let (segment_id, offset, size) = inner.append_log_record(&record)?;
        inner.apply_mutation(key.to_vec(), false, segment_id, offset, size);
        inner.maybe_sync()?;
        Ok(())
    }

    /// Start a new atomic batch. The batch borrows this database and must
    /// be committed (or dropped) before it goes out of scope.
    pub fn new_batch(&self) -> Batch<'_> {
        Batch::new(self)
    }

    /// Compact every live key into a fresh segment, discarding
    /// superseded and deleted records.
    pub fn merge(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        merge::merge(&mut inner)
    }

    /// Create a forward (or, if `reverse`, backward) snapshot iterator
    /// over live keys.
    pub fn iterator(&self, reverse: bool) -> Iter<'_> {
        let cursor = self.inner.lock().index.cursor(reverse);
        Iter { db: self, cursor }
    }

    /// Collect every live key, in ascending order.
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        let mut iter = self.iterator(false);
        iter.rewind();
        let mut out = Vec::new();
        while iter.valid() {
            out.push(iter.key());
            iter.next();
        }
        out
    }

    /// Visit every live `(key, value)` pair in ascending key order,
    /// stopping early if `f` returns `false`.
    pub fn fold(&self, mut f: impl FnMut(&[u8], &[u8]) -> bool) -> Result<()> {
        let mut iter = self.iterator(false);
        iter.rewind();
        while iter.valid() {
            let key = iter.key();
            if let Some(value) = iter.value()? {
                if !f(&key, &value) {
                    break;
                }
            }
            iter.next();
        }
        Ok(())
    }

    /// Snapshot statistics.
    pub fn stat(&self) -> Stats {
        let inner = self.inner.lock();
        let segment_count = inner.older.len() as u64 + 1;
        let mut on_disk_bytes = inner.active.size();
        for seg in inner.older.values() {
            on_disk_bytes += seg.size();
        }
        Stats {
            key_count: inner.index.len() as u64,
            segment_count,
            on_disk_bytes,
            reclaimable_bytes: inner.reclaim_size,
        }
    }

    /// Copy every file under the database directory except the lock file
    /// to `dest_dir`, preserving relative paths.
    pub fn backup(&self, dest_dir: impl AsRef<Path>) -> Result<()> {
        let inner = self.inner.lock();
        let dest_dir = dest_dir.as_ref();
        fs::create_dir_all(dest_dir).map_err(Error::Io)?;
        for entry in fs::read_dir(&inner.dir_path).map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            let name = entry.file_name();
            if name == "flock" {
                continue;
            }
            if entry.path().is_file() {
                fs::copy(entry.path(), dest_dir.join(&name)).map_err(Error::Io)?;
            }
        }
        Ok(())
    }

    /// Flush the transaction counter, close every segment, and release
    /// the directory lock. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.close()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if let Err(err) = inner.close() {
            tracing::warn!(%err, "best-effort close on drop failed");
        }
    }
}

impl DatabaseInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::DatabaseClosed);
        }
        Ok(())
    }

    /// Append `record` to the active segment, rolling over first if the
    /// append would exceed `max_file_size`. Returns the segment it was
    /// written to, its offset, and its encoded size.
    fn append_log_record(&mut self, record: &LogRecord) -> Result<(u32, u64, u32)> {
        let (_, projected_size) = record.encode();
        if self.active.size() + projected_size as u64 > self.options.max_file_size && self.active.size() > 0 {
            self.rollover()?;
        }
        let (offset, size) = self.active.append(record).map_err(Error::Io)?;
        Ok((self.active.id(), offset, size))
    }

    fn rollover(&mut self) -> Result<()> {
        self.active.sync().map_err(Error::Io)?;
        let new_id = self.file_ids.iter().copied().max().unwrap_or(0) + 1;
        let new_active = Segment::open_buffered(&self.dir_path, new_id).map_err(Error::Io)?;
        let old_active = std::mem::replace(&mut self.active, new_active);
        let old_id = old_active.id();
        self.older.insert(old_id, old_active);
        self.file_ids.push(new_id);
        Ok(())
    }

    fn apply_mutation(&mut self, key: Vec<u8>, is_put: bool, segment_id: u32, offset: u64, size: u32) {
        if is_put {
            let prev = self.index.put(key, RecordPosition::new(segment_id, offset, size));
            if let Some(prev) = prev {
                self.reclaim_size += prev.size as u64;
            }
        } else {
            if let Some(prev) = self.index.delete(&key) {
                self.reclaim_size += prev.size as u64;
            }
            self.reclaim_size += size as u64;
        }
        self.bytes_written += size as u64;
    }

    fn maybe_sync(&mut self) -> Result<()> {
        let should_sync = self.options.sync_writes
            || (self.options.bytes_per_sync > 0 && self.bytes_written >= self.options.bytes_per_sync);
        if should_sync {
            self.active.sync().map_err(Error::Io)?;
            self.bytes_written = 0;
        }
        Ok(())
    }

    /// Read the value at `pos`, resolving it from either the active or
    /// an immutable segment. A record that is missing, the wrong type,
    /// or fails CRC is treated as "not found" rather than a hard error —
    /// the index will be rebuilt correctly on the next open.
    fn read_at(&mut self, pos: RecordPosition) -> io::Result<Option<Vec<u8>>> {
        let segment = if pos.segment_id == self.active.id() {
            &mut self.active
        } else if let Some(seg) = self.older.get_mut(&pos.segment_id) {
            seg
        } else {
            tracing::warn!(segment_id = pos.segment_id, "index referenced an unknown segment");
            return Ok(None);
        };

        match segment.read_record_at(pos.offset)? {
            Some((record, _)) if record.record_type == RecordType::Normal => Ok(Some(record.value)),
            Some(_) => Ok(None),
            None => {
                tracing::warn!(segment_id = pos.segment_id, offset = pos.offset, "failed to decode record at indexed position");
                Ok(None)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        save_seq_no(&self.dir_path, self.seq_no).map_err(Error::Io)?;
        self.active.close().map_err(Error::Io)?;
        for seg in self.older.values_mut() {
            seg.close().map_err(Error::Io)?;
        }
        Ok(())
    }
}

fn enumerate_segment_ids(dir: &Path) -> io::Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if RESERVED_FILE_NAMES.contains(&name.as_ref()) {
            continue;
        }
        if let Some(stem) = name.strip_suffix(".data") {
            if stem.len() == 9 && stem.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(id) = stem.parse::<u32>() {
                    ids.push(id);
                }
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

fn load_seq_no(dir: &Path) -> io::Result<Option<u64>> {
    let path = dir.join(SEQ_NO_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path)?;
    if bytes.len() != 8 {
        return Ok(None);
    }
    Ok(Some(u64::from_le_bytes(bytes.try_into().unwrap())))
}

fn save_seq_no(dir: &Path, seq_no: u64) -> io::Result<()> {
    let path = dir.join(SEQ_NO_FILE_NAME);
    fs::write(path, seq_no.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let db = Database::open(Options::for_testing(dir.path())).unwrap();
        db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn put_rejects_empty_key() {
        let dir = tempdir().unwrap();
        let db = Database::open(Options::for_testing(dir.path())).unwrap();
        assert!(matches!(db.put(Vec::new(), b"1".to_vec()), Err(Error::KeyEmpty)));
    }

    #[test]
    fn delete_removes_key() {
        let dir = tempdir().unwrap();
        let db = Database::open(Options::for_testing(dir.path())).unwrap();
        db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        db.delete(b"a").unwrap();
        assert_eq!(db.get(b"a").unwrap(), None);
    }

    #[test]
    fn reopen_recovers_state() {
        let dir = tempdir().unwrap();
        {
            let db = Database::open(Options::for_testing(dir.path())).unwrap();
            db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
            db.put(b"b".to_vec(), b"2".to_vec()).unwrap();
            db.put(b"a".to_vec(), b"3".to_vec()).unwrap();
            db.delete(b"b").unwrap();
            db.close().unwrap();
        }
        let db = Database::open(Options::for_testing(dir.path())).unwrap();
        assert_eq!(db.get(b"a").unwrap(), Some(b"3".to_vec()));
        assert_eq!(db.get(b"b").unwrap(), None);
        assert_eq!(db.list_keys(), vec![b"a".to_vec()]);
    }

    #[test]
    fn rollover_creates_additional_segments() {
        let dir = tempdir().unwrap();
        let db = Database::open(Options::for_testing(dir.path())).unwrap();
        for i in 0..20 {
            let key = format!("k{:03}", i);
            db.put(key.into_bytes(), vec![b'x'; 20]).unwrap();
        }
        let stats = db.stat();
        assert!(stats.segment_count >= 2);
        assert_eq!(stats.key_count, 20);
    }

    #[test]
    fn batch_commit_is_visible_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let db = Database::open(Options::for_testing(dir.path())).unwrap();
            let mut batch = db.new_batch();
            batch.put(b"x".to_vec(), b"1".to_vec()).unwrap();
            batch.put(b"y".to_vec(), b"2".to_vec()).unwrap();
            batch.commit().unwrap();
            db.close().unwrap();
        }
        let db = Database::open(Options::for_testing(dir.path())).unwrap();
        assert_eq!(db.get(b"x").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.get(b"y").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn merge_preserves_live_keys_and_shrinks_reclaimable() {
        let dir = tempdir().unwrap();
        let db = Database::open(Options::for_testing(dir.path())).unwrap();
        for i in 0..10 {
            db.put(format!("k{}", i).into_bytes(), b"v".to_vec()).unwrap();
        }
        for i in 0..5 {
            db.put(format!("k{}", i).into_bytes(), b"updated".to_vec()).unwrap();
        }
        assert!(db.stat().reclaimable_bytes > 0);
        db.merge().unwrap();
        assert_eq!(db.stat().reclaimable_bytes, 0);
        for i in 0..10 {
            let expected = if i < 5 { b"updated".to_vec() } else { b"v".to_vec() };
            assert_eq!(db.get(format!("k{}", i).as_bytes()).unwrap(), Some(expected));
        }
    }

    #[test]
    fn stat_reports_key_count_and_bytes() {
        let dir = tempdir().unwrap();
        let db = Database::open(Options::for_testing(dir.path())).unwrap();
        db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        let stats = db.stat();
        assert_eq!(stats.key_count, 1);
        assert!(stats.on_disk_bytes > 0);
    }

    #[test]
    fn backup_copies_segment_files() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let db = Database::open(Options::for_testing(src.path())).unwrap();
        db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        db.backup(dest.path()).unwrap();
        assert!(!fs::read_dir(dest.path()).unwrap().collect::<Vec<_>>().is_empty());
        assert!(!dest.path().join("flock").exists());
    }

    #[test]
    fn second_instance_on_same_directory_is_rejected() {
        let dir = tempdir().unwrap();
        let _db = Database::open(Options::for_testing(dir.path())).unwrap();
        let second = Database::open(Options::for_testing(dir.path()));
        assert!(matches!(second, Err(Error::DirectoryInUse)));
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let db = Database::open(Options::for_testing(dir.path())).unwrap();
        db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        db.close().unwrap();
        db.close().unwrap();
    }

    #[test]
    fn iterator_is_stable_against_concurrent_put() {
        let dir = tempdir().unwrap();
        let db = Database::open(Options::for_testing(dir.path())).unwrap();
        db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        db.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        db.put(b"c".to_vec(), b"3".to_vec()).unwrap();

        let mut iter = db.iterator(false);
        iter.rewind();
        db.put(b"b2".to_vec(), b"x".to_vec()).unwrap();

        let mut seen = Vec::new();
        while iter.valid() {
            seen.push(iter.key());
            iter.next();
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }
}
