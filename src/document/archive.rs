//! Write-once archive of named streams, and a read-only manager over it.
//!
//! # File Format
//!
//! ```text
//! +----------------------+
//! | magic "CUBEARCH"     |  8 bytes
//! | version:u32          |
//! +----------------------+
//! | 0x01 | name | chunks | crc64:u64 |   one entry per stream
//! +----------------------+
//! | ...                  |
//! +----------------------+
//! | 0x00                 |  end marker
//! +----------------------+
//! ```
//!
//! `name` is a length-prefixed string. A stream body is a run of chunks,
//! each `len:u32` followed by `len` bytes, terminated by a zero length, so a
//! stream can be copied without knowing its size up front. The checksum
//! covers the body bytes only.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::{Document, DocumentManager, Storage};
use crate::encoding::{expect_string, write_string};
use crate::error::Result;
use crate::hasher::{checksum, Hasher};
use crate::Error;

const MAGIC: &[u8; 8] = b"CUBEARCH";
const VERSION: u32 = 1;
const TAG_STREAM: u8 = 0x01;
const TAG_END: u8 = 0x00;
const CHUNK_SIZE: usize = 64 * 1024;

/// Sequential writer of named streams.
pub struct ArchiveWriter<W: Write> {
    writer: W,
    written: HashSet<String>,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(mut writer: W) -> Result<Self> {
        writer.write_all(MAGIC)?;
        writer.write_u32::<BigEndian>(VERSION)?;
        Ok(Self {
            writer,
            written: HashSet::new(),
        })
    }

    /// Copies `reader` to the archive as stream `name`, returning the number
    /// of body bytes written.
    pub fn write_stream(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64> {
        if !self.written.insert(name.to_string()) {
            return Err(Error::InvalidArgument(format!(
                "stream {} already written to archive",
                name
            )));
        }
        self.writer.write_u8(TAG_STREAM)?;
        write_string(&mut self.writer, name)?;

        let mut hasher = Hasher::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.writer.write_u32::<BigEndian>(n as u32)?;
            self.writer.write_all(&buf[..n])?;
            hasher.write(&buf[..n]);
            total += n as u64;
        }
        self.writer.write_u32::<BigEndian>(0)?;
        self.writer.write_u64::<BigEndian>(hasher.checksum())?;
        Ok(total)
    }

    pub fn stream_count(&self) -> usize {
        self.written.len()
    }

    /// Writes the end marker and hands back the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.writer.write_u8(TAG_END)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Read-only document manager over a finished archive.
#[derive(Debug)]
pub struct ArchiveDocumentManager {
    order: Vec<String>,
    streams: HashMap<String, Arc<Vec<u8>>>,
}

impl ArchiveDocumentManager {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&fs::read(path)?)
    }

    /// Parses an archive, verifying every stream checksum.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = bytes;
        let mut magic = [0u8; 8];
        reader
            .read_exact(&mut magic)
            .map_err(|_| Error::CorruptedDocument("archive too short".to_string()))?;
        if &magic != MAGIC {
            return Err(Error::CorruptedDocument("bad archive magic".to_string()));
        }
        let version = reader.read_u32::<BigEndian>()?;
        if version != VERSION {
            return Err(Error::CorruptedDocument(format!(
                "unsupported archive version {}",
                version
            )));
        }

        let mut order = Vec::new();
        let mut streams = HashMap::new();
        loop {
            match reader.read_u8()? {
                TAG_END => break,
                TAG_STREAM => {
                    let name = expect_string(&mut reader, "stream name")?;
                    let mut body = Vec::new();
                    loop {
                        let len = reader.read_u32::<BigEndian>()? as usize;
                        if len == 0 {
                            break;
                        }
                        if reader.len() < len {
                            return Err(Error::CorruptedDocument(format!(
                                "stream {} truncated",
                                name
                            )));
                        }
                        body.extend_from_slice(&reader[..len]);
                        reader = &reader[len..];
                    }
                    let stored = reader.read_u64::<BigEndian>()?;
                    if stored != checksum(&body) {
                        return Err(Error::ChecksumMismatch(name));
                    }
                    order.push(name.clone());
                    streams.insert(name, Arc::new(body));
                }
                tag => {
                    return Err(Error::CorruptedDocument(format!(
                        "unknown archive tag {:#04x}",
                        tag
                    )))
                }
            }
        }
        Ok(Self { order, streams })
    }

    /// Stream names in the order they were archived.
    pub fn stream_order(&self) -> &[String] {
        &self.order
    }
}

impl DocumentManager for ArchiveDocumentManager {
    fn open_or_create(&mut self, name: &str) -> Result<Document> {
        Err(Error::Unsupported(format!(
            "cannot create {} in a read-only archive",
            name
        )))
    }

    fn open(&mut self, name: &str) -> Result<Document> {
        let data = self
            .streams
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DocumentNotFound(name.to_string()))?;
        Document::new(name, Box::new(ArchiveStorage { data }))
    }

    fn exists(&self, name: &str) -> bool {
        self.streams.contains_key(name)
    }

    fn names(&self) -> Result<Vec<String>> {
        let mut names = self.order.clone();
        names.sort();
        Ok(names)
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        Err(Error::Unsupported(format!(
            "cannot remove {} from a read-only archive",
            name
        )))
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.order.clear();
        self.streams.clear();
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct ArchiveStorage {
    data: Arc<Vec<u8>>,
}

impl Storage for ArchiveStorage {
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let start = (pos as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn write_at(&mut self, _pos: u64, _buf: &[u8]) -> Result<()> {
        Err(Error::Unsupported(
            "archive documents are read-only".to_string(),
        ))
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
