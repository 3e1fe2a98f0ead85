// Error kinds for the storage engine's public API: a flat enum with a
// `Display` impl and `From` conversions for the error sources the engine
// actually produces, rather than a `thiserror` derive.

/// Errors returned by the storage engine's public API.
#[derive(Debug)]
pub enum Error {
    /// A caller-supplied argument was malformed (e.g. `t0 > t1` is NOT this
    /// variant -- that is defined to return an empty result; this is for
    /// things like an empty `data_dir` or a negative pool size).
    InvalidArgument(String),

    /// The requested entity (series, cold file, segment) does not exist.
    NotFound(String),

    /// The operation conflicts with concurrent state (e.g. two writers
    /// raced to rotate the same block).
    Conflict(String),

    /// The underlying filesystem failed.
    Io(std::io::Error),

    /// A CRC or structural check failed while reading persisted data.
    CorruptData(String),

    /// A background subsystem is not accepting work (e.g. queue full or
    /// the engine is shutting down).
    Unavailable(String),

    /// A query's deadline elapsed before it could complete.
    DeadlineExceeded,

    /// An invariant the engine relies on was violated; this should never
    /// happen in practice and indicates a bug rather than bad input.
    Internal(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::CorruptData(msg) => write!(f, "corrupt data: {msg}"),
            Self::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// The kind of an [`Error`], useful for callers that branch on error class
/// without matching the full enum (and its associated message strings).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    IoError,
    CorruptData,
    Unavailable,
    DeadlineExceeded,
    Internal,
}

impl Error {
    /// Returns the error's kind, for callers that branch on error class.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Io(_) => ErrorKind::IoError,
            Self::CorruptData(_) => ErrorKind::CorruptData,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Storage engine result alias.
pub type Result<T> = std::result::Result<T, Error>;
