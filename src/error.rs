use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    Decode(&'static str, String),
    Encode(&'static str, String),
    // Setup
    Configuration(String),
    // Arguments and positions
    InvalidArgument(String),
    IndexOutOfRange { index: usize, size: usize },
    // Convergence / validity of an aggregation
    Aggregation(String),
    // Documents
    Unsupported(String),
    DocumentNotFound(String),
    DocumentClosed(String),
    CorruptedDocument(String),
    ChecksumMismatch(String),
    // Lifecycle
    Cancelled,
    InvalidState(String),
    MutexPoisoned,
    LockError(io::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::MutexPoisoned
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::Decode(field, msg) => write!(f, "Failed to decode {}: {}", field, msg),
            Error::Encode(field, msg) => write!(f, "Failed to encode {}: {}", field, msg),
            Error::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::IndexOutOfRange { index, size } => {
                write!(f, "Index {} out of range for size {}", index, size)
            }
            Error::Aggregation(msg) => write!(f, "Aggregation error: {}", msg),
            Error::Unsupported(msg) => write!(f, "Unsupported operation: {}", msg),
            Error::DocumentNotFound(name) => write!(f, "Document not found: {}", name),
            Error::DocumentClosed(name) => write!(f, "Document is closed: {}", name),
            Error::CorruptedDocument(msg) => write!(f, "Corrupted document: {}", msg),
            Error::ChecksumMismatch(name) => write!(f, "Checksum mismatch: {}", name),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::MutexPoisoned => write!(f, "Mutex was poisoned"),
            Error::LockError(err) => write!(f, "Lock error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) | Error::LockError(err) => Some(err),
            _ => None,
        }
    }
}
