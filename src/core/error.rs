//! Purpose: Error taxonomy shared by the codec, planner, storage, and transport layers.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: One error type for the whole crate; callers add context with builder methods.
//! Invariants: Every error is terminal for the current request; nothing here retries.
//! Invariants: `ErrorKind` names are stable; they appear verbatim in HTTP error envelopes.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    MalformedToken,
    ExpiredToken,
    Usage,
    NotFound,
    Query,
    Encoding,
    Internal,
}

impl ErrorKind {
    /// Client errors are caused by the request itself and map to HTTP 4xx.
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            ErrorKind::MalformedToken
                | ErrorKind::ExpiredToken
                | ErrorKind::Usage
                | ErrorKind::NotFound
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MalformedToken => "MalformedToken",
            ErrorKind::ExpiredToken => "ExpiredToken",
            ErrorKind::Usage => "Usage",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Query => "Query",
            ErrorKind::Encoding => "Encoding",
            ErrorKind::Internal => "Internal",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        let kind = match kind {
            "MalformedToken" => ErrorKind::MalformedToken,
            "ExpiredToken" => ErrorKind::ExpiredToken,
            "Usage" => ErrorKind::Usage,
            "NotFound" => ErrorKind::NotFound,
            "Query" => ErrorKind::Query,
            "Encoding" => ErrorKind::Encoding,
            "Internal" => ErrorKind::Internal,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::MalformedToken => 4,
        ErrorKind::ExpiredToken => 5,
        ErrorKind::Query => 6,
        ErrorKind::Encoding => 7,
    }
}
