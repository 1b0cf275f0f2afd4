//! A single numbered, append-only segment: an I/O backend plus the
//! `write_offset` bookkeeping and record-level read/append/scan
//! operations built on top of it.

use sediment_core::{LogRecord, HEADER_SIZE, MAX_RECORD_PAYLOAD};
use std::io;
use std::path::{Path, PathBuf};

use super::io::{BufferedIo, MmapIo, SegmentIo};

/// Segment file names are nine-digit zero-padded ids with a `.data`
/// suffix: `000000001.data`.
pub fn segment_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("{:09}.data", id))
}

/// One append-only segment file.
pub struct Segment {
    id: u32,
    io: Box<dyn SegmentIo>,
    write_offset: u64,
}

impl Segment {
    /// Open (creating if necessary) segment `id` under `dir`, using the
    /// buffered backend.
    pub fn open_buffered(dir: &Path, id: u32) -> io::Result<Segment> {
        let path = segment_path(dir, id);
        let io = BufferedIo::open(&path)?;
        let write_offset = io.size()?;
        Ok(Segment {
            id,
            io: Box::new(io),
            write_offset,
        })
    }

    /// Open a segment-framed file at a fixed name rather than the
    /// `NNNNNNNNN.data` id convention. Used only for the `hint-index`
    /// file, which uses the record codec but not the segment-id naming
    /// scheme; its "id" is reported as 0 and is never used to resolve a
    /// record position.
    pub fn open_named(dir: &Path, name: &str) -> io::Result<Segment> {
        let path = dir.join(name);
        let io = BufferedIo::open(&path)?;
        let write_offset = io.size()?;
        Ok(Segment {
            id: 0,
            io: Box::new(io),
            write_offset,
        })
    }

    /// Open (creating if necessary) segment `id` under `dir`, using the
    /// memory-mapped backend. Used to accelerate recovery scans; the
    /// active segment is rebound to the buffered backend before the
    /// first write (see [`Segment::rebind_buffered`]).
    pub fn open_mmap(dir: &Path, id: u32) -> io::Result<Segment> {
        let path = segment_path(dir, id);
        let io = MmapIo::open(&path)?;
        let write_offset = io.size()?;
        Ok(Segment {
            id,
            io: Box::new(io),
            write_offset,
        })
    }

    /// Re-open this segment's file with the buffered backend, preserving
    /// its id and current write offset. Used once recovery has finished
    /// scanning a segment opened with mmap, since the active segment
    /// must accept writes through the buffered path.
    pub fn rebind_buffered(&mut self, dir: &Path) -> io::Result<()> {
        let path = segment_path(dir, self.id);
        self.io.close()?;
        let io = BufferedIo::open(&path)?;
        self.io = Box::new(io);
        Ok(())
    }

    /// This segment's id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current size in bytes (equal to the write offset).
    pub fn size(&self) -> u64 {
        self.write_offset
    }

    /// Encode and append `record`, returning the offset it was written
    /// at and its encoded size.
    pub fn append(&mut self, record: &LogRecord) -> io::Result<(u64, u32)> {
        let (encoded, size) = record.encode();
        let offset = self.write_offset;
        self.io.write(&encoded)?;
        self.write_offset += size as u64;
        Ok((offset, size as u32))
    }

    /// Read and decode the record at `offset`. Returns `None` on any
    /// out-of-range read, short read, malformed header, or CRC mismatch
    /// — all of which signal "no more valid data here" rather than a
    /// hard I/O failure.
    pub fn read_record_at(&mut self, offset: u64) -> io::Result<Option<(LogRecord, u32)>> {
        if offset >= self.write_offset {
            return Ok(None);
        }
        let mut header = [0u8; HEADER_SIZE];
        let n = self.io.read(&mut header, offset)?;
        if n < HEADER_SIZE {
            return Ok(None);
        }

        let key_len = u32::from_be_bytes(header[5..9].try_into().unwrap()) as usize;
        let value_len = u32::from_be_bytes(header[9..13].try_into().unwrap()) as usize;
        let body_len = match key_len.checked_add(value_len) {
            Some(n) if n <= MAX_RECORD_PAYLOAD => n,
            _ => return Ok(None),
        };

        let total = HEADER_SIZE + body_len;
        let mut buf = vec![0u8; total];
        buf[..HEADER_SIZE].copy_from_slice(&header);
        let read_body = self.io.read(&mut buf[HEADER_SIZE..], offset + HEADER_SIZE as u64)?;
        if read_body < body_len {
            return Ok(None);
        }

        match LogRecord::decode(&buf) {
            Some(record) => Ok(Some((record, total as u32))),
            None => Ok(None),
        }
    }

    /// Iterate every valid record from offset 0, stopping at the first
    /// one that fails to decode (a truncated tail from an interrupted
    /// append).
    pub fn scan(&mut self) -> io::Result<Vec<(u64, LogRecord, u32)>> {
        self.scan_from(0)
    }

    /// Iterate every valid record starting at `start_offset`, stopping at
    /// the first one that fails to decode. Used to resume a scan past a
    /// prefix already accounted for by other means (e.g. a hint file).
    pub fn scan_from(&mut self, start_offset: u64) -> io::Result<Vec<(u64, LogRecord, u32)>> {
        let mut out = Vec::new();
        let mut offset = start_offset;
        while let Some((record, size)) = self.read_record_at(offset)? {
            out.push((offset, record, size));
            offset += size as u64;
        }
        Ok(out)
    }

    /// Force buffered writes to durable storage.
    pub fn sync(&mut self) -> io::Result<()> {
        self.io.sync()
    }

    /// Release resources held by this segment's backend.
    pub fn close(&mut self) -> io::Result<()> {
        self.io.close()
    }
}
