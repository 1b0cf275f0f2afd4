//! Merge (compaction): rewrite every live key into a fresh segment 1,
//! drop everything superseded or deleted, and optionally produce a hint
//! file so the next open can skip straight to Phase A recovery.
//!
//! The marker-vs-deletion ordering here is hardened relative to the
//! original implementation, which deletes every prior segment *before*
//! writing `merge-finished.data` — a crash in between leaves a directory
//! with neither the pre-merge data nor proof that merge completed. This
//! version writes and fsyncs the new segment, renames it into place,
//! writes and fsyncs the marker, and only *then* removes the stale
//! segments; recovery on next open does the final cleanup if a crash
//! happens between the marker and the deletes (see `Database::open`).

use std::fs;
use std::path::Path;

use sediment_core::{Error, LogRecord, RecordPosition};

use crate::segment::file::segment_path;
use crate::segment::Segment;

use super::DatabaseInner;

const MERGE_SCRATCH_NAME: &str = "merge.data";
const MERGE_FINISHED_NAME: &str = "merge-finished.data";
const HINT_FILE_NAME: &str = "hint-index";
const MERGE_FINISHED_KEY: &str = "merge_finished";

/// Open `path` for buffered append+read with any pre-existing contents
/// discarded first. `BufferedIo::open` always opens in append mode, so
/// reusing it directly on a merge artifact left over from a prior merge
/// (a stale `merge.data` from a crash before rename, or a `hint-index`/
/// `merge-finished.data` from an earlier merge run without an
/// intervening reopen) would append after the old bytes instead of
/// replacing them.
fn open_fresh(path: &Path) -> std::io::Result<crate::segment::io::BufferedIo> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    crate::segment::io::BufferedIo::open(path)
}

/// Run compaction against an already-locked `DatabaseInner`.
pub fn merge(inner: &mut DatabaseInner) -> Result<(), Error> {
    let dir = inner.dir_path.clone();
    let scratch_path = dir.join(MERGE_SCRATCH_NAME);

    let mut new_index = crate::index::KeyDirIndex::new();
    let mut hint_records = Vec::new();

    {
        let mut scratch = open_fresh(&scratch_path).map_err(Error::Io)?;
        let mut offset: u64 = 0;
        let mut cursor = inner.index.cursor(false);
        cursor.rewind();
        while cursor.valid() {
            let key = cursor.key().to_vec();
            let pos = cursor.position();
            if let Some(value) = inner.read_at(pos).map_err(Error::Io)? {
                let record = LogRecord::normal(key.clone(), value);
                let (encoded, size) = record.encode();
                use crate::segment::SegmentIo;
                scratch.write(&encoded).map_err(Error::Io)?;
                let new_pos = RecordPosition::new(1, offset, size as u32);
                hint_records.push((key.clone(), new_pos));
                new_index.put(key, new_pos);
                offset += size as u64;
            }
            cursor.next();
        }
        use crate::segment::SegmentIo;
        scratch.sync().map_err(Error::Io)?;
    }

    inner.active.close().map_err(Error::Io)?;
    for (_, seg) in inner.older.iter_mut() {
        seg.close().map_err(Error::Io)?;
    }

    let target_path = segment_path(&dir, 1);
    if target_path.exists() && target_path != scratch_path {
        fs::remove_file(&target_path).map_err(Error::Io)?;
    }
    fs::rename(&scratch_path, &target_path).map_err(Error::Io)?;

    write_hint_file(&dir, &hint_records)?;
    write_merge_finished_marker(&dir)?;

    let stale_ids: Vec<u32> = inner.file_ids.iter().copied().filter(|id| *id != 1).collect();
    for id in stale_ids {
        let path = segment_path(&dir, id);
        if path.exists() {
            let _ = fs::remove_file(&path);
        }
    }

    inner.older.clear();
    inner.file_ids = vec![1];
    inner.active = Segment::open_buffered(&dir, 1).map_err(Error::Io)?;
    inner.index = new_index;
    inner.reclaim_size = 0;

    Ok(())
}

fn write_hint_file(dir: &Path, records: &[(Vec<u8>, RecordPosition)]) -> Result<(), Error> {
    let hint_path = dir.join(HINT_FILE_NAME);
    use crate::segment::SegmentIo;
    let mut io = open_fresh(&hint_path).map_err(Error::Io)?;
    for (key, pos) in records {
        let record = LogRecord::normal(key.clone(), pos.encode().to_vec());
        let (encoded, _) = record.encode();
        io.write(&encoded).map_err(Error::Io)?;
    }
    io.sync().map_err(Error::Io)?;
    Ok(())
}

fn write_merge_finished_marker(dir: &Path) -> Result<(), Error> {
    use crate::segment::SegmentIo;
    let path = dir.join(MERGE_FINISHED_NAME);
    let mut io = open_fresh(&path).map_err(Error::Io)?;
    let record = LogRecord::normal(MERGE_FINISHED_KEY.as_bytes().to_vec(), Vec::new());
    let (encoded, _) = record.encode();
    io.write(&encoded).map_err(Error::Io)?;
    io.sync().map_err(Error::Io)?;
    Ok(())
}

/// Defensive cleanup run at open time: if a previous merge completed
/// (the marker exists) but the stale-segment deletion pass was
/// interrupted, finish it now and remove the marker. If the marker is
/// absent, any scratch file or partial rename is simply ignored and
/// normal recovery proceeds over the pre-merge segments.
pub fn load_merge_artifacts(dir: &Path) -> std::io::Result<()> {
    let marker_path = dir.join(MERGE_FINISHED_NAME);
    if !marker_path.exists() {
        return Ok(());
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(id) = parse_segment_id(&name) {
            if id > 1 {
                let _ = fs::remove_file(entry.path());
            }
        }
    }
    fs::remove_file(&marker_path)?;
    Ok(())
}

fn parse_segment_id(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(".data")?;
    if stem.len() != 9 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}
