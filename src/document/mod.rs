//! Named random-access byte streams and the managers that own them.
//!
//! A [`Document`] is an independently readable and writable byte stream
//! identified by a name that is unique within its [`DocumentManager`]. The
//! read position and the write position move independently: reads walk the
//! stream from wherever they were positioned, writes always append at the
//! write position, which starts at end of stream when a document is opened.
//!
//! Three managers share the same contract:
//!
//! - [`FileDocumentManager`]: one file per document inside a locked
//!   directory, or inside a temp directory removed on drop.
//! - [`MemoryDocumentManager`]: documents live in process memory.
//! - [`ArchiveDocumentManager`]: read-only view over an archive produced by
//!   [`ArchiveWriter`]; every write fails with `Error::Unsupported`.
//!
//! [`DocumentObjectCache`] sits in front of a manager and bounds how many
//! handles are open at once, closing the least recently used one on overflow.

pub mod archive;
pub mod cache;
pub mod file;
pub mod memory;

pub use archive::{ArchiveDocumentManager, ArchiveWriter};
pub use cache::{DocumentHandle, DocumentObjectCache};
pub use file::FileDocumentManager;
pub use memory::MemoryDocumentManager;

use std::fmt::Debug;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::Result;
use crate::Error;

/// Positional byte storage behind a document.
pub trait Storage: Send + Debug {
    /// Reads up to `buf.len()` bytes at `pos`, returning how many were read.
    /// Zero means end of stream.
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize>;

    /// Writes all of `buf` at `pos`, growing the stream if needed.
    fn write_at(&mut self, pos: u64, buf: &[u8]) -> Result<()>;

    /// Current length of the stream in bytes.
    fn len(&mut self) -> Result<u64>;

    fn flush(&mut self) -> Result<()>;
}

/// Contract shared by every document backend.
pub trait DocumentManager: Send {
    /// Opens the named document, creating it when absent. The returned
    /// document writes at end of stream.
    fn open_or_create(&mut self, name: &str) -> Result<Document>;

    /// Opens an existing document.
    fn open(&mut self, name: &str) -> Result<Document>;

    fn exists(&self, name: &str) -> bool;

    /// Names of every document, sorted.
    fn names(&self) -> Result<Vec<String>>;

    fn remove(&mut self, name: &str) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Releases the backend. Calling it more than once is a no-op.
    fn close(&mut self) -> Result<()>;

    fn is_read_only(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct Document {
    name: String,
    storage: Option<Box<dyn Storage>>,
    read_pos: u64,
    write_pos: u64,
}

impl Document {
    /// Wraps storage, positioning the writer at end of stream.
    pub fn new(name: impl Into<String>, mut storage: Box<dyn Storage>) -> Result<Self> {
        let write_pos = storage.len()?;
        Ok(Self {
            name: name.into(),
            storage: Some(storage),
            read_pos: 0,
            write_pos,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn storage(&mut self) -> Result<&mut Box<dyn Storage>> {
        match self.storage.as_mut() {
            Some(storage) => Ok(storage),
            None => Err(Error::DocumentClosed(self.name.clone())),
        }
    }

    pub fn len(&mut self) -> Result<u64> {
        self.storage()?.len()
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn read_position(&self) -> u64 {
        self.read_pos
    }

    pub fn write_position(&self) -> u64 {
        self.write_pos
    }

    /// Moves the read position; the write position is untouched.
    pub fn seek_read(&mut self, pos: u64) {
        self.read_pos = pos;
    }

    /// True once the read position has reached end of stream.
    pub fn at_end(&mut self) -> Result<bool> {
        let len = self.len()?;
        Ok(self.read_pos >= len)
    }

    /// Appends at the write position.
    pub fn append(&mut self, buf: &[u8]) -> Result<()> {
        let pos = self.write_pos;
        self.storage()?.write_at(pos, buf)?;
        self.write_pos += buf.len() as u64;
        Ok(())
    }

    /// Reads exactly `buf.len()` bytes at `pos` without moving either cursor.
    pub fn read_exact_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .storage()?
                .read_at(pos + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                return Err(Error::CorruptedDocument(format!(
                    "{}: read past end of stream at offset {}",
                    self.name,
                    pos + filled as u64
                )));
            }
            filled += n;
        }
        Ok(())
    }

    /// Whole content of the stream, leaving the read position at the end.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let len = self.len()? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact_at(0, &mut buf)?;
        self.read_pos = len as u64;
        Ok(buf)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.storage()?.flush()
    }

    /// Flushes and releases the storage. Further access fails with
    /// `Error::DocumentClosed`.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut storage) = self.storage.take() {
            storage.flush()?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.storage.is_none()
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(document = %self.name, error = %e, "Failed to flush document on drop");
        }
    }
}

fn to_io(err: Error) -> io::Error {
    match err {
        Error::IoError(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

impl Read for Document {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pos = self.read_pos;
        let n = self.storage().map_err(to_io)?.read_at(pos, buf).map_err(to_io)?;
        self.read_pos += n as u64;
        Ok(n)
    }
}

impl Write for Document {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf).map_err(to_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Document::flush(self).map_err(to_io)
    }
}

/// Seeking moves the read position only.
impl Seek for Document {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p as i128,
            SeekFrom::Current(d) => self.read_pos as i128 + d as i128,
            SeekFrom::End(d) => self.len().map_err(to_io)? as i128 + d as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of document",
            ));
        }
        self.read_pos = target as u64;
        Ok(self.read_pos)
    }
}
