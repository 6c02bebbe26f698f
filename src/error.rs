use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    Decode(&'static str, io::Error),
    /// The active buffer has no room left for the entry. Handled by flushing.
    BufferFull,
    Frozen,
    MutexPoisoned,
    /// A sorted run failed validation while being read.
    Corruption(String),
    /// A previous flush failed; the engine refuses further work.
    EngineFailed,
    InvalidWorkload { line: usize, reason: String },
    UnknownBufferKind(String),
    InvalidConfig(String),
    InvalidOperation(String),
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

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidOperation(format!("json: {}", err))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::Decode(field, err) => write!(f, "Failed to decode {}: {}", field, err),
            Error::BufferFull => write!(f, "Buffer is full"),
            Error::Frozen => write!(f, "Buffer is frozen"),
            Error::MutexPoisoned => write!(f, "Mutex was poisoned"),
            Error::Corruption(msg) => write!(f, "Corrupted run: {}", msg),
            Error::EngineFailed => write!(f, "Engine failed after a flush error"),
            Error::InvalidWorkload { line, reason } => {
                write!(f, "Invalid workload at line {}: {}", line, reason)
            }
            Error::UnknownBufferKind(kind) => write!(f, "Unknown buffer implementation: {}", kind),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) | Error::Decode(_, err) => Some(err),
            _ => None,
        }
    }
}
