//! The closed error taxonomy shared by the native-driver capability surface
//! and the runtime built on top of it.

use std::fmt;
use failure::{Backtrace, Context, Fail};

/// Result type used throughout `gpurt-core`.
pub type Result<T> = ::std::result::Result<T, Error>;

/// The closed set of error kinds a native driver call (real or simulated)
/// can surface. Deliberately closed: new variants are not expected to be
/// added as the system grows, only new call sites translating into the
/// existing kinds.
#[derive(Debug, Fail, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[fail(display = "invalid value: {}", _0)]
    InvalidValue(String),
    #[fail(display = "invalid handle: {}", _0)]
    InvalidHandle(String),
    #[fail(display = "invalid symbol: {}", _0)]
    InvalidSymbol(String),
    #[fail(display = "invalid device pointer: {}", _0)]
    InvalidDevicePointer(String),
    #[fail(display = "out of memory: {}", _0)]
    OutOfMemory(String),
    #[fail(display = "launch failure: {}", _0)]
    LaunchFailure(String),
    #[fail(display = "not ready")]
    NotReady,
    #[fail(display = "resource busy: {}", _0)]
    ResourceBusy(String),
    #[fail(display = "initialization error: {}", _0)]
    InitializationError(String),
    #[fail(display = "unimplemented: {}", _0)]
    Unimplemented(String),
    #[fail(display = "unknown error: {}", _0)]
    Unknown(String),
}

/// An opaque error carrying one of the closed `ErrorKind`s plus a cause
/// chain, modeled on `ocl_core::Error`.
pub struct Error {
    inner: Context<ErrorKind>,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.inner.get_context()
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotReady)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error { inner: Context::new(kind) }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }
}

unsafe impl Send for Error {}
unsafe impl Sync for Error {}
