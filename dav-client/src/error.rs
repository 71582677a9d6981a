use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use http::StatusCode;

use super::types::Violation;

/// Structural failures while walking an XML document
#[derive(Debug)]
pub enum ParsingError {
    MissingMultistatus,
    MissingText,
    WrongToken,
    DepthMismatch { expected: usize, found: usize },
    Utf8Error(std::str::Utf8Error),
    QuickXml(quick_xml::Error),
    Eof,
}
impl std::fmt::Display for ParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingMultistatus => write!(
                f,
                "Multi-Status response didn't contain multistatus XML element"
            ),
            Self::MissingText => write!(f, "Missing text content"),
            Self::WrongToken => write!(f, "Wrong token"),
            Self::DepthMismatch { expected, found } => write!(
                f,
                "Property parser left the reader at depth {} instead of {}",
                found, expected
            ),
            Self::Utf8Error(_) => write!(f, "Utf8 Error"),
            Self::QuickXml(e) => write!(f, "Couldn't parse XML: {}", e),
            Self::Eof => write!(f, "Found EOF while expecting data"),
        }
    }
}
impl std::error::Error for ParsingError {}
impl From<quick_xml::Error> for ParsingError {
    fn from(value: quick_xml::Error) -> Self {
        Self::QuickXml(value)
    }
}
impl From<std::str::Utf8Error> for ParsingError {
    fn from(value: std::str::Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}
impl ParsingError {
    /// I/O failures surface through quick-xml when the body stream breaks
    /// while the document is being pulled.
    pub fn io_error(&self) -> Option<&Arc<std::io::Error>> {
        match self {
            Self::QuickXml(quick_xml::Error::Io(e)) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request cancelled")]
    Cancelled,
    #[error("request timed out")]
    Timeout,
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bounded description of an exchange, kept for error reporting
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Excerpt {
    pub request: String,
    pub response: Option<String>,
}
impl std::fmt::Display for Excerpt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request: {}", self.request)?;
        if let Some(response) = &self.response {
            write!(f, "; response: {}", response)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HttpErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Gone,
    PreconditionFailed,
    ServiceUnavailable { retry_after: Option<DateTime<Utc>> },
    Other,
}
impl HttpErrorKind {
    pub fn from_status(status: StatusCode, retry_after: Option<DateTime<Utc>>) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => Self::Unauthorized,
            StatusCode::FORBIDDEN => Self::Forbidden,
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::CONFLICT => Self::Conflict,
            StatusCode::GONE => Self::Gone,
            StatusCode::PRECONDITION_FAILED => Self::PreconditionFailed,
            StatusCode::SERVICE_UNAVAILABLE => Self::ServiceUnavailable { retry_after },
            _ => Self::Other,
        }
    }
}

/// A final response outside of the 2xx class
#[derive(Debug, Clone, PartialEq)]
pub struct HttpError {
    pub kind: HttpErrorKind,
    pub status: StatusCode,
    pub excerpt: Excerpt,
    /// `<DAV:error>` children found in an XML response body
    pub errors: Vec<Violation>,
}
impl HttpError {
    pub const DEFAULT_RETRY_DELAY: i64 = 15 * 60;
    pub const MIN_RETRY_DELAY: i64 = 60;
    pub const MAX_RETRY_DELAY: i64 = 2 * 60 * 60;

    /// When a 503 may be retried: the server's Retry-After clamped to
    /// [start + 1 min, start + 2 h], start + 15 min when absent.
    pub fn delay_until(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        let retry_after = match &self.kind {
            HttpErrorKind::ServiceUnavailable { retry_after } => *retry_after,
            _ => None,
        };
        let min = start + Duration::seconds(Self::MIN_RETRY_DELAY);
        let max = start + Duration::seconds(Self::MAX_RETRY_DELAY);
        match retry_after {
            None => start + Duration::seconds(Self::DEFAULT_RETRY_DELAY),
            Some(at) => at.clamp(min, max),
        }
    }
}
impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {}", self.status)?;
        for violation in self.errors.iter() {
            write!(f, " [{}]", violation.name)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("structural XML error: {0}")]
    Xml(ParsingError),
    #[error("{message}")]
    Protocol {
        message: String,
        excerpt: Option<Box<Excerpt>>,
    },
    #[error("{0}")]
    Http(Box<HttpError>),
    #[error("response callback failed: {0}")]
    Callback(anyhow::Error),
}
impl From<ParsingError> for Error {
    fn from(value: ParsingError) -> Self {
        match value.io_error() {
            Some(e) => Self::Transport(TransportError::Io(std::io::Error::new(
                e.kind(),
                e.to_string(),
            ))),
            None => Self::Xml(value),
        }
    }
}
impl From<HttpError> for Error {
    fn from(value: HttpError) -> Self {
        Self::Http(Box::new(value))
    }
}
impl Error {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            excerpt: None,
        }
    }

    pub fn protocol_with(message: impl Into<String>, excerpt: Excerpt) -> Self {
        Self::Protocol {
            message: message.into(),
            excerpt: Some(Box::new(excerpt)),
        }
    }

    pub fn http(&self) -> Option<&HttpError> {
        match self {
            Self::Http(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Cancelled))
    }
}
