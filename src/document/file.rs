use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::{Document, DocumentManager, Storage};
use crate::error::Result;
use crate::flock::FileLock;
use crate::Error;

const LOCK_FILE: &str = "cubecore.lock";
const DOCS_DIR: &str = "docs";

/// Stores each document as one file under `<dir>/docs`.
///
/// Document names may contain any character; they are percent-escaped into
/// flat file names so `cube/sales/fact` becomes `cube%2Fsales%2Ffact`.
pub struct FileDocumentManager {
    dir: PathBuf,
    lock: Option<FileLock>,
    // Keeps a temp directory alive until the manager is dropped.
    temp: Option<TempDir>,
    closed: bool,
}

impl FileDocumentManager {
    /// Opens (creating if needed) a document directory and locks it.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join(DOCS_DIR))?;
        let lock = FileLock::lock(dir.join(LOCK_FILE)).map_err(Error::LockError)?;
        Ok(Self {
            dir,
            lock: Some(lock),
            temp: None,
            closed: false,
        })
    }

    /// A manager over a fresh temp directory that is deleted on drop.
    pub fn temp() -> Result<Self> {
        Self::with_temp_dir(tempfile::Builder::new().prefix("cubecore-").tempdir()?)
    }

    /// Like `temp`, with the temp directory created under `parent`.
    pub fn temp_in(parent: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(parent.as_ref())?;
        Self::with_temp_dir(
            tempfile::Builder::new()
                .prefix("cubecore-")
                .tempdir_in(parent)?,
        )
    }

    fn with_temp_dir(temp: TempDir) -> Result<Self> {
        let mut manager = Self::open(temp.path())?;
        manager.temp = Some(temp);
        Ok(manager)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(DOCS_DIR).join(encode_name(name))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidState("document manager is closed".to_string()));
        }
        Ok(())
    }

    fn open_file(&self, name: &str, create: bool) -> Result<Document> {
        self.ensure_open()?;
        let file = File::options()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(self.path_of(name))
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::DocumentNotFound(name.to_string()),
                _ => Error::IoError(e),
            })?;
        Document::new(name, Box::new(FileStorage::new(file)?))
    }
}

impl DocumentManager for FileDocumentManager {
    fn open_or_create(&mut self, name: &str) -> Result<Document> {
        self.open_file(name, true)
    }

    fn open(&mut self, name: &str) -> Result<Document> {
        self.open_file(name, false)
    }

    fn exists(&self, name: &str) -> bool {
        !self.closed && self.path_of(name).is_file()
    }

    fn names(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let mut names = Vec::new();
        for entry in fs::read_dir(self.dir.join(DOCS_DIR))? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str().and_then(decode_name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        match fs::remove_file(self.path_of(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::DocumentNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        // Documents flush their own file handles; nothing is buffered here.
        self.ensure_open()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.lock.take();
        tracing::debug!(dir = %self.dir.display(), "Document directory closed");
        Ok(())
    }
}

impl Drop for FileDocumentManager {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// A document file with buffered appends. Both handles share one file
/// offset, so the writer is flushed before every read or size query.
#[derive(Debug)]
struct FileStorage {
    file: File,              // Reads and metadata
    writer: BufWriter<File>, // Buffered writes
    // Offset the next buffered write lands at without seeking, when known.
    cursor: Option<u64>,
}

impl FileStorage {
    fn new(file: File) -> Result<Self> {
        let writer = BufWriter::new(file.try_clone()?);
        Ok(Self {
            file,
            writer,
            cursor: Some(0),
        })
    }
}

impl Storage for FileStorage {
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        self.writer.flush()?;
        self.cursor = None;
        self.file.seek(SeekFrom::Start(pos))?;
        let n = self.file.read(buf)?;
        self.cursor = Some(pos + n as u64);
        Ok(n)
    }

    fn write_at(&mut self, pos: u64, buf: &[u8]) -> Result<()> {
        if self.cursor != Some(pos) {
            self.cursor = None;
            self.writer.seek(SeekFrom::Start(pos))?;
        }
        self.cursor = None;
        self.writer.write_all(buf)?;
        self.cursor = Some(pos + buf.len() as u64);
        Ok(())
    }

    fn len(&mut self) -> Result<u64> {
        self.writer.flush()?;
        Ok(self.file.metadata()?.len())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

fn encode_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, byte) in name.bytes().enumerate() {
        let plain = byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' || (byte == b'.' && i > 0);
        if plain {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn decode_name(file_name: &str) -> Option<String> {
    let bytes = file_name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = file_name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_escaping() {
        for name in ["cube/sales/fact", ".hidden", "a b%c", "dim/時間", ""] {
            let encoded = encode_name(name);
            assert!(!encoded.contains('/'));
            assert!(!encoded.starts_with('.'));
            assert_eq!(decode_name(&encoded).as_deref(), Some(name));
        }
    }

    #[test]
    fn test_directory_is_single_writer() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut first = FileDocumentManager::open(dir.path())?;
        assert!(matches!(
            FileDocumentManager::open(dir.path()),
            Err(Error::LockError(_))
        ));

        first.close()?;
        let second = FileDocumentManager::open(dir.path())?;
        assert_eq!(second.dir(), dir.path());
        Ok(())
    }

    #[test]
    fn test_closed_manager_rejects_open() -> Result<()> {
        let mut manager = FileDocumentManager::temp()?;
        manager.open_or_create("a")?;
        manager.close()?;
        assert!(matches!(
            manager.open_or_create("a"),
            Err(Error::InvalidState(_))
        ));
        assert!(!manager.exists("a"));
        Ok(())
    }

    #[test]
    fn test_appends_are_buffered() -> Result<()> {
        let mut manager = FileDocumentManager::temp()?;
        let path = manager.path_of("cube/fact");
        let mut doc = manager.open_or_create("cube/fact")?;
        for i in 0..100u32 {
            doc.append(&i.to_be_bytes())?;
        }
        // Small appends stay in the buffer.
        assert_eq!(fs::metadata(&path)?.len(), 0);

        // Reads and sizes see buffered bytes.
        assert_eq!(doc.len()?, 400);
        let mut word = [0u8; 4];
        doc.read_exact_at(396, &mut word)?;
        assert_eq!(u32::from_be_bytes(word), 99);

        // Appending after a read moved the shared offset.
        doc.read_exact_at(0, &mut word)?;
        doc.append(b"tail")?;
        doc.close()?;
        assert_eq!(fs::metadata(&path)?.len(), 404);

        let bytes = manager.open("cube/fact")?.read_all()?;
        assert_eq!(&bytes[..4], &0u32.to_be_bytes());
        assert_eq!(&bytes[396..400], &99u32.to_be_bytes());
        assert_eq!(&bytes[400..], b"tail");
        Ok(())
    }

    #[test]
    fn test_reopened_document_appends_at_end() -> Result<()> {
        let mut manager = FileDocumentManager::temp()?;
        let mut doc = manager.open_or_create("log")?;
        doc.append(b"abc")?;
        doc.close()?;

        let mut doc = manager.open("log")?;
        doc.append(b"def")?;
        assert_eq!(doc.read_all()?, b"abcdef");
        Ok(())
    }

    #[test]
    fn test_temp_dir_removed_on_drop() -> Result<()> {
        let manager = FileDocumentManager::temp()?;
        let dir = manager.dir().to_path_buf();
        assert!(dir.exists());
        drop(manager);
        assert!(!dir.exists());
        Ok(())
    }
}
