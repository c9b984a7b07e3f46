use std::fmt::{Display, Formatter, Result as FmtResult};

use failure::{Backtrace, Context, Fail, SyncFailure};

/// A convenient alias for Result.
pub type Result<T> = ::std::result::Result<T, Error>;

/// The kind of an application error.
#[derive(Debug, Fail)]
pub enum ErrorKind {
    /// The token-signing secret was empty.
    #[fail(display = "The signing secret must not be empty")]
    EmptySecret,

    /// An error from Diesel.
    #[fail(display = "Diesel error: {}", _0)]
    Diesel(::diesel::result::Error),

    /// An error from R2D2.
    #[fail(display = "R2D2 error: {}", _0)]
    R2D2(::diesel::r2d2::PoolError),

    /// An error from the Tera template engine.
    #[fail(display = "Template error: {}", _0)]
    Tera(SyncFailure<::tera::Error>),

    /// An error when constructing a URL.
    #[fail(display = "URL error: {}", _0)]
    Url(::url::ParseError),
}

impl From<::diesel::result::Error> for ErrorKind {
    fn from(err: ::diesel::result::Error) -> ErrorKind {
        ErrorKind::Diesel(err)
    }
}

impl From<::diesel::r2d2::PoolError> for ErrorKind {
    fn from(err: ::diesel::r2d2::PoolError) -> ErrorKind {
        ErrorKind::R2D2(err)
    }
}

impl From<::tera::Error> for ErrorKind {
    fn from(err: ::tera::Error) -> ErrorKind {
        ErrorKind::Tera(SyncFailure::new(err))
    }
}

impl From<::url::ParseError> for ErrorKind {
    fn from(err: ::url::ParseError) -> ErrorKind {
        ErrorKind::Url(err)
    }
}

/// An application error.
#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.inner.get_context()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        Display::fmt(&self.inner, f)
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

impl<E: Into<ErrorKind>> From<E> for Error {
    fn from(err: E) -> Error {
        Context::new(err.into()).into()
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner: inner }
    }
}
