//! The segment I/O contract and its two backends: a buffered POSIX-style
//! handle, and a memory-mapped one used to accelerate recovery scans.
//!
//! Both backends implement the same [`SegmentIo`] trait so the rest of
//! the crate never branches on which one is in play — the same
//! trait-object-behind-a-factory shape this codebase uses for its
//! storage codec seam.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use memmap2::MmapMut;

/// Read/write/sync/size access over a single segment file.
pub trait SegmentIo: Send {
    /// Read into `buf` starting at `offset`, returning the number of
    /// bytes actually read (short reads at EOF are expected and are not
    /// an error).
    fn read(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Append `buf` at the current end of file, returning the number of
    /// bytes written.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Force buffered writes to durable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Current length of the file in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Release any resources held by this backend.
    fn close(&mut self) -> io::Result<()>;
}

/// A plain `File` opened for append-and-read, seeking before each random
/// read.
pub struct BufferedIo {
    file: File,
}

impl BufferedIo {
    /// Open (creating if necessary) `path` for buffered append+read.
    pub fn open(path: &Path) -> io::Result<BufferedIo> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(BufferedIo { file })
    }
}

impl SegmentIo for BufferedIo {
    fn read(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match self.file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn close(&mut self) -> io::Result<()> {
        self.sync()
    }
}

/// A memory-mapped handle that grows by truncating the file and
/// remapping before any write that would exceed the current mapping.
pub struct MmapIo {
    file: File,
    mmap: Option<MmapMut>,
    len: u64,
}

const GROWTH_CHUNK: u64 = 1024 * 1024;

impl MmapIo {
    /// Open (creating if necessary) `path` and map it. Zero-length files
    /// are mapped as an empty mapping (no bytes mapped until the first
    /// growth).
    pub fn open(path: &Path) -> io::Result<MmapIo> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let mmap = if len == 0 {
            None
        } else {
            Some(unsafe { MmapMut::map_mut(&file)? })
        };
        Ok(MmapIo { file, mmap, len })
    }

    fn grow_to(&mut self, min_capacity: u64) -> io::Result<()> {
        let mapped_len = self.mmap.as_ref().map(|m| m.len() as u64).unwrap_or(0);
        if min_capacity <= mapped_len {
            return Ok(());
        }
        let new_capacity = min_capacity.max(mapped_len + GROWTH_CHUNK);
        self.file.set_len(new_capacity)?;
        self.mmap = Some(unsafe { MmapMut::map_mut(&self.file)? });
        Ok(())
    }
}

impl SegmentIo for MmapIo {
    fn read(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let Some(mmap) = &self.mmap else {
            return Ok(0);
        };
        let start = offset.min(self.len) as usize;
        let end = (offset + buf.len() as u64).min(self.len) as usize;
        if start >= end {
            return Ok(0);
        }
        let n = end - start;
        buf[..n].copy_from_slice(&mmap[start..end]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let start = self.len;
        let end = start + buf.len() as u64;
        self.grow_to(end)?;
        let mmap = self.mmap.as_mut().expect("grown above");
        mmap[start as usize..end as usize].copy_from_slice(buf);
        self.len = end;
        Ok(buf.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.set_len(self.len)?;
        if let Some(mmap) = &self.mmap {
            mmap.flush()?;
        }
        self.file.sync_all()
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len)
    }

    fn close(&mut self) -> io::Result<()> {
        self.sync()
    }
}
