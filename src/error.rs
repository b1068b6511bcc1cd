//! Error type shared by every tunestatus component.
//!
//! An [`Error`] pairs a coarse [`ErrorKind`], modelled after the gRPC status
//! codes, with the underlying cause. Callers branch on the kind; the cause is
//! for humans.
//!
//! The failures the daemon deals with fall into three families:
//! * Persistence: the credential store is unreachable, unreadable or
//!   corrupt (`Unavailable`, `DataLoss`, `FailedPrecondition`)
//! * Authorization: an OAuth `state` nonce was invalid or replayed
//!   (`PermissionDenied`), or the provider rejected a code or refresh
//!   exchange (`Unauthenticated`)
//! * Requests: a call to the music service or Slack failed
//!   (`Unavailable`, `DeadlineExceeded`, `ResourceExhausted`, ...)
//!
//! Every kind maps to an HTTP status code, so that the callback server can
//! render failures without knowing where they came from.
//!
//! # Example
//!
//! ```rust
//! use tunestatus::error::{Error, ErrorKind, Result};
//!
//! fn redeem(known: bool) -> Result<()> {
//!     if !known {
//!         return Err(Error::permission_denied("invalid or replayed state"));
//!     }
//!     Ok(())
//! }
//!
//! assert_eq!(redeem(false).unwrap_err().kind, ErrorKind::PermissionDenied);
//! ```

use std::fmt;

use http::StatusCode;
use thiserror::Error;

type Cause = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,

    /// The underlying cause.
    pub error: Cause,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error categories.
///
/// Discriminants follow the gRPC status codes.
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum ErrorKind {
    #[error("cancelled")]
    Cancelled = 1,

    #[error("unknown error")]
    Unknown = 2,

    #[error("invalid argument")]
    InvalidArgument = 3,

    #[error("deadline exceeded")]
    DeadlineExceeded = 4,

    #[error("not found")]
    NotFound = 5,

    /// Forged or replayed authorization attempts.
    #[error("permission denied")]
    PermissionDenied = 7,

    #[error("resource exhausted")]
    ResourceExhausted = 8,

    /// The session is not in a state that allows the operation.
    #[error("failed precondition")]
    FailedPrecondition = 9,

    #[error("internal error")]
    Internal = 13,

    #[error("unavailable")]
    Unavailable = 14,

    /// A persisted document can no longer be decoded.
    #[error("data loss")]
    DataLoss = 15,

    /// Rejected authorization codes, access tokens or refresh tokens.
    #[error("unauthenticated")]
    Unauthenticated = 16,
}

impl ErrorKind {
    /// The HTTP status code the callback server answers with.
    #[must_use]
    pub fn status_code(self) -> StatusCode {
        match self {
            // Not registered in `http`, but a valid status code all the same.
            Self::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Self::Unknown | Self::Internal | Self::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidArgument | Self::FailedPrecondition => StatusCode::BAD_REQUEST,
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

macro_rules! constructors {
    ($($(#[$doc:meta])* $name:ident => $kind:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $name<E: Into<Cause>>(error: E) -> Self {
                Self::new(ErrorKind::$kind, error)
            }
        )*
    };
}

impl Error {
    pub fn new<E: Into<Cause>>(kind: ErrorKind, error: E) -> Self {
        Self {
            kind,
            error: error.into(),
        }
    }

    constructors! {
        cancelled => Cancelled;
        data_loss => DataLoss;
        deadline_exceeded => DeadlineExceeded;
        /// The session state does not allow the operation, e.g. authorizing
        /// without an app registration.
        failed_precondition => FailedPrecondition;
        internal => Internal;
        invalid_argument => InvalidArgument;
        not_found => NotFound;
        permission_denied => PermissionDenied;
        resource_exhausted => ResourceExhausted;
        unauthenticated => Unauthenticated;
        unavailable => Unavailable;
        unknown => Unknown;
    }

    /// Attempts to downcast the cause to a concrete type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match err.kind() {
            Io::NotFound => ErrorKind::NotFound,
            Io::PermissionDenied => ErrorKind::PermissionDenied,
            Io::AddrNotAvailable | Io::AddrInUse | Io::ConnectionRefused | Io::NotConnected => {
                ErrorKind::Unavailable
            }
            Io::Interrupted | Io::WouldBlock => ErrorKind::Cancelled,
            Io::UnexpectedEof => ErrorKind::DataLoss,
            Io::TimedOut => ErrorKind::DeadlineExceeded,
            Io::InvalidInput | Io::InvalidData => ErrorKind::InvalidArgument,
            Io::WriteZero => ErrorKind::ResourceExhausted,
            _ => ErrorKind::Unknown,
        };
        Self::new(kind, err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::DeadlineExceeded
        } else if err.is_connect() || err.is_redirect() {
            ErrorKind::Unavailable
        } else if err.is_body() {
            ErrorKind::DataLoss
        } else if err.is_decode() {
            ErrorKind::InvalidArgument
        } else if err.is_builder() {
            ErrorKind::Internal
        } else {
            ErrorKind::Unknown
        };
        Self::new(kind, err)
    }
}

/// Malformed payloads map like the I/O error they convert to.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::invalid_argument(err.to_string())
    }
}

impl From<http::header::MaxSizeReached> for Error {
    fn from(err: http::header::MaxSizeReached) -> Self {
        Self::resource_exhausted(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::internal(err.to_string())
    }
}
