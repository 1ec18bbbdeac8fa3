//! Error handling, layered over `gpurt_core::error`.
//!
//! The taxonomy is closed at the `gpurt-core` layer (spec.md §7); this
//! module only adds an operation-name context the way `ocl::error` wraps
//! `ocl_core::error` with higher-level call-site information.

use std::fmt;

use failure::{Backtrace, Context, Fail};
use gpurt_core::error::ErrorKind;

pub type Result<T> = ::std::result::Result<T, Error>;

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

impl From<gpurt_core::error::Error> for Error {
    fn from(e: gpurt_core::error::Error) -> Error {
        Error { inner: Context::new(e.kind().clone()) }
    }
}

unsafe impl Send for Error {}
unsafe impl Sync for Error {}
