use std::fmt;
use std::io;

use crate::variant::VariantType;

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("IO error: {0:?}")]
    Io(io::ErrorKind),
    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),
    #[error("Unknown method: '{0}'")]
    UnknownMethod(String),
    #[error("Arity mismatch for '{method}': expected {expected} arguments, got {got}")]
    ArityMismatch {
        method: String,
        expected: usize,
        got: usize,
    },
    #[error("Incompatible type: cannot convert {from} to {to}")]
    IncompatibleType { from: VariantType, to: VariantType },
    #[error("Permission denied: '{0}'")]
    PermissionDenied(String),
    #[error("Unknown status: '{0}'")]
    UnknownStatus(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("Could not load interface: {0}")]
    SchemaLoadError(String),
    #[error("Could not resolve address: {0}")]
    AddressResolutionError(String),
    #[error("Invalid address: '{0}'")]
    InvalidAddress(String),
    #[error("Timeout")]
    Timeout,
    #[error("Remote error: {0}")]
    Remote(String),
}

/// Error codes carried in an acknowledgement when a remote dispatch fails.
pub(crate) mod code {
    pub const GENERIC: u8 = 0;
    pub const UNKNOWN_METHOD: u8 = 1;
    pub const ARITY_MISMATCH: u8 = 2;
    pub const INCOMPATIBLE_TYPE: u8 = 3;
    pub const PERMISSION_DENIED: u8 = 4;
    pub const UNKNOWN_STATUS: u8 = 5;
    pub const MALFORMED_ENCODING: u8 = 6;
}

impl ErrorKind {
    /// The code and text sent back to a caller when a dispatch fails with
    /// this error.
    ///
    /// Structured kinds pack their fields into the text: arity mismatches as
    /// `method:expected:got`, type mismatches as `FROM:TO`.
    pub(crate) fn to_reply(&self) -> (u8, String) {
        match self {
            ErrorKind::UnknownMethod(m) => (code::UNKNOWN_METHOD, m.clone()),
            ErrorKind::PermissionDenied(m) => (code::PERMISSION_DENIED, m.clone()),
            ErrorKind::UnknownStatus(s) => (code::UNKNOWN_STATUS, s.clone()),
            ErrorKind::ArityMismatch {
                method,
                expected,
                got,
            } => (
                code::ARITY_MISMATCH,
                format!("{}:{}:{}", method, expected, got),
            ),
            ErrorKind::IncompatibleType { from, to } => {
                (code::INCOMPATIBLE_TYPE, format!("{}:{}", from, to))
            }
            ErrorKind::MalformedEncoding(m) => (code::MALFORMED_ENCODING, m.clone()),
            _ => (code::GENERIC, self.to_string()),
        }
    }

    /// Rebuild the error a remote dispatch reported. Text that does not
    /// unpack into the kind of its code is kept as `Remote`.
    pub(crate) fn from_reply(code: u8, text: String) -> ErrorKind {
        match code {
            code::UNKNOWN_METHOD => ErrorKind::UnknownMethod(text),
            code::PERMISSION_DENIED => ErrorKind::PermissionDenied(text),
            code::UNKNOWN_STATUS => ErrorKind::UnknownStatus(text),
            code::MALFORMED_ENCODING => ErrorKind::MalformedEncoding(text),
            code::ARITY_MISMATCH => arity_from_reply(&text).unwrap_or(ErrorKind::Remote(text)),
            code::INCOMPATIBLE_TYPE => {
                incompatible_from_reply(&text).unwrap_or(ErrorKind::Remote(text))
            }
            _ => ErrorKind::Remote(text),
        }
    }
}

fn arity_from_reply(text: &str) -> Option<ErrorKind> {
    let mut fields = text.rsplitn(3, ':');
    let got = fields.next()?.parse().ok()?;
    let expected = fields.next()?.parse().ok()?;
    let method = fields.next()?.to_string();
    Some(ErrorKind::ArityMismatch {
        method,
        expected,
        got,
    })
}

fn incompatible_from_reply(text: &str) -> Option<ErrorKind> {
    let (from, to) = text.split_once(':')?;
    Some(ErrorKind::IncompatibleType {
        from: from.parse().ok()?,
        to: to.parse().ok()?,
    })
}

pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error { kind, source: None }
    }

    pub fn with_source<E>(kind: ErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Error {
            kind,
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.source {
            Some(ref source) => write!(f, "{:?}: {:?}", self.kind, source),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.source {
            Some(ref source) => Some(source.as_ref()),
            None => None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        let kind = match e.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset => ErrorKind::ConnectionClosed,
            io::ErrorKind::ConnectionRefused | io::ErrorKind::NotConnected => {
                ErrorKind::ConnectionError(e.to_string())
            }
            kind => ErrorKind::Io(kind),
        };
        Error::with_source(kind, e)
    }
}

impl From<libapp_parser::Error> for Error {
    fn from(e: libapp_parser::Error) -> Self {
        let kind = ErrorKind::SchemaLoadError(e.to_string());
        Error::with_source(kind, e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
