//! Black-box scenarios: a database is opened, written to, then either
//! closed cleanly, dropped without `close()`, or has its tail truncated
//! to simulate an interrupted append or crash mid-transaction, before
//! being reopened and checked against the expected recovered state.

use sediment_core::Options;
use sediment_storage::Database;
use tempfile::tempdir;

/// S1. `put("a","1") put("b","2") put("a","3") delete("b") close reopen`
/// leaves `a == "3"`, `b` absent, and `list_keys() == ["a"]`.
#[test]
fn s1_overwrite_then_delete_survives_reopen() {
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

/// S2. `max_file_size=64`; 100 `("kNNN", 20-byte value)` puts produce at
/// least two segments, with every key still readable.
#[test]
fn s2_small_max_file_size_spans_multiple_segments() {
    let dir = tempdir().unwrap();
    let db = Database::open(Options::for_testing(dir.path()).with_max_file_size(64)).unwrap();
    for i in 0..100 {
        let key = format!("k{:03}", i);
        db.put(key.into_bytes(), vec![b'v'; 20]).unwrap();
    }
    let stats = db.stat();
    assert!(stats.segment_count >= 2);
    for i in 0..100 {
        let key = format!("k{:03}", i);
        assert!(db.get(key.as_bytes()).unwrap().is_some());
    }
}

/// S3. Fill with `k0..k99`, delete even keys, merge. Afterward: only
/// segment 1 remains, odd keys are readable, `reclaimable_bytes == 0`.
#[test]
fn s3_merge_keeps_only_live_keys_in_one_segment() {
    let dir = tempdir().unwrap();
    let db = Database::open(Options::for_testing(dir.path()).with_max_file_size(64)).unwrap();
    for i in 0..100 {
        db.put(format!("k{i}").into_bytes(), format!("v{i}").into_bytes()).unwrap();
    }
    for i in (0..100).step_by(2) {
        db.delete(format!("k{i}").as_bytes()).unwrap();
    }
    db.merge().unwrap();

    assert!(!dir.path().join("000000002.data").exists());
    assert!(dir.path().join("000000001.data").exists());
    assert_eq!(db.stat().reclaimable_bytes, 0);
    for i in 0..100 {
        let key = format!("k{i}");
        let expected = if i % 2 == 1 { Some(format!("v{i}").into_bytes()) } else { None };
        assert_eq!(db.get(key.as_bytes()).unwrap(), expected);
    }
}

/// S4. A committed batch is visible after reopen; a batch truncated
/// before its `TXN_FINISHED` marker is entirely invisible, even though
/// its individual records decoded fine.
#[test]
fn s4_batch_atomicity_across_crash() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open(Options::for_testing(dir.path())).unwrap();
        let mut batch = db.new_batch();
        batch.put(b"x".to_vec(), b"1".to_vec()).unwrap();
        batch.put(b"y".to_vec(), b"2".to_vec()).unwrap();
        batch.delete(b"z".to_vec()).unwrap();
        assert_eq!(db.get(b"x").unwrap(), None);
        batch.commit().unwrap();
        assert_eq!(db.get(b"x").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.get(b"y").unwrap(), Some(b"2".to_vec()));
        db.close().unwrap();
    }

    // Truncate the segment back to just before TXN_FINISHED was
    // appended: TXN_START + two NORMAL records + one DELETED record
    // remain on disk, but the closing marker does not.
    let segment_path = dir.path().join("000000001.data");
    let full_len = std::fs::metadata(&segment_path).unwrap().len();
    let txn_finished_record_len = 13 + 1; // header + 1-byte ascii txn id "1"
    let file = std::fs::OpenOptions::new().write(true).open(&segment_path).unwrap();
    file.set_len(full_len - txn_finished_record_len).unwrap();
    drop(file);

    let db = Database::open(Options::for_testing(dir.path())).unwrap();
    assert_eq!(db.get(b"x").unwrap(), None);
    assert_eq!(db.get(b"y").unwrap(), None);
}

/// S5. A directory already locked by one instance refuses a second
/// opener, and releases the lock once the first instance closes.
#[test]
fn s5_directory_lock_is_exclusive_and_released_on_close() {
    let dir = tempdir().unwrap();
    let first = Database::open(Options::for_testing(dir.path())).unwrap();
    let second = Database::open(Options::for_testing(dir.path()));
    assert!(second.is_err());
    first.close().unwrap();
    drop(first);
    assert!(Database::open(Options::for_testing(dir.path())).is_ok());
}

/// S6. An iterator snapshot is stable against mutation performed after
/// it was created.
#[test]
fn s6_iterator_is_stable_against_concurrent_mutation() {
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

/// Invariant 4 (CRC): flipping a byte in an already-written record makes
/// it, and everything after it in that segment, disappear after reopen.
#[test]
fn flipped_byte_hides_record_and_everything_after_it() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open(Options::for_testing(dir.path())).unwrap();
        db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        db.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        db.close().unwrap();
    }

    let segment_path = dir.path().join("000000001.data");
    let mut bytes = std::fs::read(&segment_path).unwrap();
    // first record is 13 + 1 + 1 = 15 bytes; flip a byte inside it.
    bytes[5] ^= 0xFF;
    std::fs::write(&segment_path, bytes).unwrap();

    let db = Database::open(Options::for_testing(dir.path())).unwrap();
    assert_eq!(db.get(b"a").unwrap(), None);
    assert_eq!(db.get(b"b").unwrap(), None);
}

/// Invariant 5 (reclamation monotonicity): `reclaimable_bytes` only
/// grows as keys are overwritten/deleted and drops to exactly zero right
/// after a merge.
#[test]
fn reclaimable_bytes_grows_then_resets_after_merge() {
    let dir = tempdir().unwrap();
    let db = Database::open(Options::for_testing(dir.path())).unwrap();
    assert_eq!(db.stat().reclaimable_bytes, 0);

    db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    assert_eq!(db.stat().reclaimable_bytes, 0);

    db.put(b"a".to_vec(), b"2".to_vec()).unwrap();
    let after_overwrite = db.stat().reclaimable_bytes;
    assert!(after_overwrite > 0);

    db.delete(b"a").unwrap();
    assert!(db.stat().reclaimable_bytes > after_overwrite);

    db.merge().unwrap();
    assert_eq!(db.stat().reclaimable_bytes, 0);
}

/// The hint file produced by merge accelerates the next open without
/// reintroducing phantom reclaimable bytes for keys that were never
/// actually superseded after the merge.
#[test]
fn reclaimable_bytes_stays_zero_after_merge_and_reopen() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open(Options::for_testing(dir.path()).with_max_file_size(64)).unwrap();
        for i in 0..30 {
            db.put(format!("k{i}").into_bytes(), format!("v{i}").into_bytes()).unwrap();
        }
        db.merge().unwrap();
        db.close().unwrap();
    }
    let db = Database::open(Options::for_testing(dir.path())).unwrap();
    assert_eq!(db.stat().reclaimable_bytes, 0);
    assert_eq!(db.stat().key_count, 30);
    for i in 0..30 {
        assert_eq!(db.get(format!("k{i}").as_bytes()).unwrap(), Some(format!("v{i}").into_bytes()));
    }
}

/// A write to a key made after a merge must survive a reopen even though
/// the hint file left behind by the merge still describes that key's
/// pre-write position: `put; merge; put (same key); close; reopen` must
/// see the post-merge value, not the stale hint-covered one.
#[test]
fn write_after_merge_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open(Options::for_testing(dir.path())).unwrap();
        db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        db.merge().unwrap();
        db.put(b"a".to_vec(), b"2".to_vec()).unwrap();
        db.close().unwrap();
    }
    let db = Database::open(Options::for_testing(dir.path())).unwrap();
    assert_eq!(db.get(b"a").unwrap(), Some(b"2".to_vec()));
}

/// A key deleted after a merge must stay deleted across a reopen, even
/// though the hint file still lists its pre-delete position.
#[test]
fn delete_after_merge_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open(Options::for_testing(dir.path())).unwrap();
        db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        db.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        db.merge().unwrap();
        db.delete(b"a").unwrap();
        db.close().unwrap();
    }
    let db = Database::open(Options::for_testing(dir.path())).unwrap();
    assert_eq!(db.get(b"a").unwrap(), None);
    assert_eq!(db.get(b"b").unwrap(), Some(b"2".to_vec()));
}

/// A second merge must fully replace the first merge's hint file and
/// scratch segment rather than appending to them: a key deleted between
/// two merges must not be resurrected by a leftover first-merge hint
/// entry, and a key overwritten between two merges must read back as its
/// latest value.
#[test]
fn second_merge_replaces_first_merge_artifacts() {
    let dir = tempdir().unwrap();
    let db = Database::open(Options::for_testing(dir.path())).unwrap();
    db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    db.put(b"b".to_vec(), b"2".to_vec()).unwrap();
    db.merge().unwrap();

    db.delete(b"a").unwrap();
    db.put(b"b".to_vec(), b"2-updated".to_vec()).unwrap();
    db.merge().unwrap();

    assert_eq!(db.get(b"a").unwrap(), None);
    assert_eq!(db.get(b"b").unwrap(), Some(b"2-updated".to_vec()));

    db.close().unwrap();
    let reopened = Database::open(Options::for_testing(dir.path())).unwrap();
    assert_eq!(reopened.get(b"a").unwrap(), None);
    assert_eq!(reopened.get(b"b").unwrap(), Some(b"2-updated".to_vec()));
}

/// Dropping a `Database` without calling `close()` still releases the
/// directory lock and leaves data durable for the next opener.
#[test]
fn drop_without_close_still_releases_lock_and_persists_data() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open(Options::for_testing(dir.path())).unwrap();
        db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    }
    let db = Database::open(Options::for_testing(dir.path())).unwrap();
    assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
}
