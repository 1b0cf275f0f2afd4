//! The on-disk record format: a fixed 13-byte header, followed by key and
//! value bytes, framed by a CRC-32 over everything after the CRC field
//! itself. Also the 16-byte little-endian encoding of a record's position
//! within its segment, used as the hint file's value payload.
//!
//! The header layout (CRC, then type, then two big-endian length fields)
//! matches the original Bitcask-style implementation this crate descends
//! from byte-for-byte, so hint files and data segments are unambiguous
//! even without a version tag.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Size of the fixed record header in bytes: CRC(4) + type(1) + key_len(4)
/// + value_len(4).
pub const HEADER_SIZE: usize = 13;

/// Records larger than this (key + value) are rejected as corrupt rather
/// than trusted, guarding against a wild length field from a torn write.
pub const MAX_RECORD_PAYLOAD: usize = 100 * 1024 * 1024;

/// Size of an encoded [`RecordPosition`] in bytes.
pub const POSITION_SIZE: usize = 16;

/// The kind of a [`LogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// A live key/value write.
    Normal = 1,
    /// A tombstone: the key's prior value is no longer live.
    Deleted = 2,
    /// Brackets the start of a batch commit; key is the ASCII-decimal
    /// transaction id, value is empty.
    TxnStart = 3,
    /// Brackets the successful end of a batch commit.
    TxnFinished = 4,
    /// Brackets an aborted batch commit.
    TxnAbort = 5,
}

impl RecordType {
    fn from_byte(b: u8) -> Option<RecordType> {
        match b {
            1 => Some(RecordType::Normal),
            2 => Some(RecordType::Deleted),
            3 => Some(RecordType::TxnStart),
            4 => Some(RecordType::TxnFinished),
            5 => Some(RecordType::TxnAbort),
            _ => None,
        }
    }

    /// Whether this type brackets a transaction rather than carrying data.
    pub fn is_txn_marker(&self) -> bool {
        matches!(
            self,
            RecordType::TxnStart | RecordType::TxnFinished | RecordType::TxnAbort
        )
    }
}

/// One append-only log record: a typed, CRC-framed `(key, value)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// The record's key bytes (the ASCII-decimal transaction id for
    /// marker records).
    pub key: Vec<u8>,
    /// The record's value bytes (empty for deletes and markers).
    pub value: Vec<u8>,
    /// The record's type.
    pub record_type: RecordType,
}

impl LogRecord {
    /// Build a NORMAL record.
    pub fn normal(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        LogRecord {
            key: key.into(),
            value: value.into(),
            record_type: RecordType::Normal,
        }
    }

    /// Build a DELETED tombstone record for `key`.
    pub fn deleted(key: impl Into<Vec<u8>>) -> Self {
        LogRecord {
            key: key.into(),
            value: Vec::new(),
            record_type: RecordType::Deleted,
        }
    }

    /// Build a transaction bracket marker for `txn_id`.
    pub fn txn_marker(txn_id: u64, record_type: RecordType) -> Self {
        debug_assert!(record_type.is_txn_marker());
        LogRecord {
            key: txn_id.to_string().into_bytes(),
            value: Vec::new(),
            record_type,
        }
    }

    /// Encode this record, returning the encoded bytes and their length.
    pub fn encode(&self) -> (Vec<u8>, usize) {
        let total_size = HEADER_SIZE + self.key.len() + self.value.len();
        let mut buf = vec![0u8; total_size];

        buf[4] = self.record_type as u8;
        BigEndian::write_u32(&mut buf[5..9], self.key.len() as u32);
        BigEndian::write_u32(&mut buf[9..13], self.value.len() as u32);

        let key_start = HEADER_SIZE;
        let value_start = key_start + self.key.len();
        buf[key_start..value_start].copy_from_slice(&self.key);
        buf[value_start..total_size].copy_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[4..]);
        BigEndian::write_u32(&mut buf[0..4], crc);

        (buf, total_size)
    }

    /// Decode a record from exactly its own bytes (header + key + value,
    /// no trailing bytes). Returns `None` on any validation failure:
    /// short buffer, unrecognized type, an empty key on a data record, an
    /// oversized payload, or a CRC mismatch. The caller treats `None` as
    /// "no more valid records here" rather than a hard error, since the
    /// tail of a segment after an interrupted append decodes this way.
    pub fn decode(data: &[u8]) -> Option<LogRecord> {
        if data.len() < HEADER_SIZE {
            return None;
        }

        let crc = BigEndian::read_u32(&data[0..4]);
        let record_type = RecordType::from_byte(data[4])?;
        let key_len = BigEndian::read_u32(&data[5..9]) as usize;
        let value_len = BigEndian::read_u32(&data[9..13]) as usize;

        match key_len.checked_add(value_len) {
            Some(total) if total <= MAX_RECORD_PAYLOAD => {}
            _ => return None,
        }
        if !record_type.is_txn_marker() && key_len == 0 {
            return None;
        }
        if data.len() < HEADER_SIZE + key_len + value_len {
            return None;
        }

        let computed_crc = crc32fast::hash(&data[4..HEADER_SIZE + key_len + value_len]);
        if crc != computed_crc {
            return None;
        }

        let key_start = HEADER_SIZE;
        let value_start = key_start + key_len;
        let value_end = value_start + value_len;

        Some(LogRecord {
            key: data[key_start..value_start].to_vec(),
            value: data[value_start..value_end].to_vec(),
            record_type,
        })
    }
}

/// The byte span of a record within a segment: which segment, at what
/// offset, and how many bytes it occupies (header + key + value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordPosition {
    /// The segment containing the record.
    pub segment_id: u32,
    /// The byte offset of the record's header within the segment.
    pub offset: u64,
    /// The total encoded size of the record.
    pub size: u32,
}

impl RecordPosition {
    /// Construct a position.
    pub fn new(segment_id: u32, offset: u64, size: u32) -> Self {
        RecordPosition {
            segment_id,
            offset,
            size,
        }
    }

    /// Encode as 16 bytes, little-endian: `segment_id(4) || offset(8) ||
    /// size(4)`. Pinned to little-endian for cross-architecture
    /// portability of hint files (the originating implementation used
    /// native byte order, which isn't portable).
    pub fn encode(&self) -> [u8; POSITION_SIZE] {
        let mut buf = [0u8; POSITION_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.segment_id);
        LittleEndian::write_u64(&mut buf[4..12], self.offset);
        LittleEndian::write_u32(&mut buf[12..16], self.size);
        buf
    }

    /// Decode from exactly 16 little-endian bytes. Returns `None` if the
    /// slice is the wrong length.
    pub fn decode(data: &[u8]) -> Option<RecordPosition> {
        if data.len() != POSITION_SIZE {
            return None;
        }
        Some(RecordPosition {
            segment_id: LittleEndian::read_u32(&data[0..4]),
            offset: LittleEndian::read_u64(&data[4..12]),
            size: LittleEndian::read_u32(&data[12..16]),
        })
    }
}
