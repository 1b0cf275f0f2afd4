//! Segment files: one append-only numbered data file, wrapping a
//! [`SegmentIo`] backend.

pub mod file;
pub mod io;

pub use file::Segment;
pub use io::{BufferedIo, MmapIo, SegmentIo};
