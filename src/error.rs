//! Error types for pgwire-engine.

use thiserror::Error;

/// Result type for pgwire-engine operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Fields of an ErrorResponse or NoticeResponse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerError {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (same as severity but never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Position in internal query
    pub internal_position: Option<u32>,
    /// Failed internal command text
    pub internal_query: Option<String>,
    /// Context/stack trace
    pub where_: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub data_type: Option<String>,
    pub constraint: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ServerError {
    /// Severity, preferring the non-localized field.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }

    /// FATAL and PANIC errors end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity(), Some("FATAL" | "PANIC"))
    }

    /// DB-API class of this error, derived from the SQLSTATE class.
    pub fn class(&self) -> DatabaseErrorClass {
        DatabaseErrorClass::from_sqlstate(self.code.as_deref().unwrap_or_default())
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = self.severity() {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Database error classes, following the DB-API exception hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseErrorClass {
    /// Class 23: integrity constraint violation
    Integrity,
    /// Class 28: invalid authorization specification
    InvalidAuthorization,
    /// Class 22: data exception
    Data,
    /// Class 0A: feature not supported
    NotSupported,
    /// Class XX: internal error
    Internal,
    /// Classes 08, 53, 57, 58: connection, resources, operator intervention, system
    Operational,
    /// Everything else (syntax errors, undefined objects, ...)
    Programming,
}

impl DatabaseErrorClass {
    pub fn from_sqlstate(code: &str) -> Self {
        match code.get(..2) {
            Some("23") => Self::Integrity,
            Some("28") => Self::InvalidAuthorization,
            Some("22") => Self::Data,
            Some("0A") => Self::NotSupported,
            Some("XX") => Self::Internal,
            Some("08" | "53" | "57" | "58") => Self::Operational,
            _ => Self::Programming,
        }
    }
}

/// Coarse error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misuse of the client: bad state, bad parameters, connect failure
    Interface,
    /// Transport I/O failure
    Network,
    /// The server sent something that violates the protocol
    Protocol,
    Authentication,
    /// An ErrorResponse from the server
    Database(DatabaseErrorClass),
}

/// Error type for pgwire-engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ServerError),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not open the transport
    #[error("could not connect to {target}: {source}")]
    Connect {
        target: String,
        source: std::io::Error,
    },

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// TLS error
    #[cfg(feature = "sync-tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// Connection is broken and cannot be reused
    #[error("Connection is broken")]
    ConnectionBroken,

    /// Invalid usage (e.g., nested transactions)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Operation not allowed in the current protocol state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Placeholder or parameter mismatch
    #[error("Parameter error: {0}")]
    Param(String),

    /// The caller's COPY source or sink failed
    #[error("COPY stream error: {0}")]
    CopyStream(std::io::Error),

    /// A column value could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// A parameter value could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl From<std::convert::Infallible> for Error {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

impl Error {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionBroken | Error::Protocol(_) | Error::Auth(_) => true,
            #[cfg(feature = "sync-tls")]
            Error::Tls(_) => true,
            Error::Server(fields) => fields.is_fatal(),
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            _ => None,
        }
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Server(fields) => ErrorKind::Database(fields.class()),
            Error::Protocol(_) | Error::Decode(_) => ErrorKind::Protocol,
            Error::Io(_) | Error::ConnectionBroken => ErrorKind::Network,
            #[cfg(feature = "sync-tls")]
            Error::Tls(_) => ErrorKind::Network,
            Error::Auth(_) => ErrorKind::Authentication,
            Error::Connect { .. }
            | Error::InvalidUsage(_)
            | Error::InvalidState(_)
            | Error::Param(_)
            | Error::CopyStream(_)
            | Error::Encode(_)
            | Error::Unsupported(_) => ErrorKind::Interface,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(code: &str, severity: &str) -> Error {
        Error::Server(ServerError {
            severity: Some(severity.into()),
            code: Some(code.into()),
            message: Some("boom".into()),
            ..Default::default()
        })
    }

    #[test]
    fn sqlstate_classes() {
        let cases = [
            ("23505", DatabaseErrorClass::Integrity),
            ("28P01", DatabaseErrorClass::InvalidAuthorization),
            ("22012", DatabaseErrorClass::Data),
            ("0A000", DatabaseErrorClass::NotSupported),
            ("XX000", DatabaseErrorClass::Internal),
            ("57014", DatabaseErrorClass::Operational),
            ("42P01", DatabaseErrorClass::Programming),
        ];
        for (code, class) in cases {
            assert_eq!(server_error(code, "ERROR").kind(), ErrorKind::Database(class));
        }
    }

    #[test]
    fn fatal_server_errors_break_the_connection() {
        assert!(!server_error("42P01", "ERROR").is_connection_broken());
        assert!(server_error("57P01", "FATAL").is_connection_broken());
        assert_eq!(server_error("42P01", "ERROR").sqlstate(), Some("42P01"));
    }

    #[test]
    fn connect_error_names_the_target() {
        let err = Error::Connect {
            target: "/tmp/nope/.s.PGSQL.5432".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(err.kind(), ErrorKind::Interface);
        assert!(err.to_string().contains("/tmp/nope/.s.PGSQL.5432"));
    }
}
