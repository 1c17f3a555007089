//! Error codes returned at the library surface.

/// Closed set of error conditions the library surfaces to callers.
///
/// Mirrors `ERR_INVAL` / `ERR_BUSY` / `ERR_NOMEM` from the reference kernel's
/// error header: invalid argument, resource busy (reserved, currently unused),
/// and out of memory.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorKind {
    InvalidArgument = -1,
    Busy = -2,
    NoMemory = -3,
}

/// Error from a thread-library operation, wrapping the raw numeric code.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ThreadLibError(ErrorKind);

impl ThreadLibError {
    pub const fn new(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub const fn invalid_argument() -> Self {
        Self(ErrorKind::InvalidArgument)
    }

    pub const fn busy() -> Self {
        Self(ErrorKind::Busy)
    }

    pub const fn no_memory() -> Self {
        Self(ErrorKind::NoMemory)
    }

    pub fn kind(self) -> ErrorKind {
        self.0
    }

    /// The raw negative status code, for callers at the FFI-shaped boundary.
    pub fn code(self) -> i32 {
        self.0 as i32
    }
}

impl From<ErrorKind> for i32 {
    fn from(kind: ErrorKind) -> i32 {
        kind as i32
    }
}

impl core::fmt::Debug for ThreadLibError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ThreadLibError({})", self.code())
    }
}

impl core::fmt::Display for ThreadLibError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "thread library error {}", self.code())
    }
}

pub type Result<T> = core::result::Result<T, ThreadLibError>;
