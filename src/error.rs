//! Error types for postwire.

use thiserror::Error;

use crate::protocol::types::Oid;

/// Result type for postwire operations.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Fields of an `ErrorResponse` or `NoticeResponse`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerError {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    pub internal_position: Option<u32>,
    pub internal_query: Option<String>,
    /// Context/stack trace
    pub where_: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub data_type: Option<String>,
    pub constraint: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub routine: Option<String>,
}

impl ServerError {
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }

    /// Severity, preferring the non-localized form.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }

    /// FATAL and PANIC end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity(), Some("FATAL") | Some("PANIC"))
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{severity}: ")?;
        }
        if let Some(message) = &self.message {
            write!(f, "{message}")?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {code})")?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

/// Error type for postwire.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unexpected frame. The stream cannot be trusted afterwards.
    #[error("protocol out of sync: {0}")]
    ProtocolSync(String),

    /// Bad credentials or an unsupported authentication method.
    #[error("authentication failed: {message}")]
    AuthenticationFailed {
        message: String,
        server: Option<ServerError>,
    },

    /// Operation attempted on a closed or broken connection.
    #[error("connection does not exist")]
    ConnectionDoesNotExist,

    /// Commit or release refused locally because the transaction is aborted.
    #[error("current transaction is aborted; roll back before continuing")]
    InFailedTransaction,

    /// `ErrorResponse` from the server.
    #[error("server error: {0}")]
    Server(ServerError),

    /// A wire value could not be decoded into the requested type.
    #[error("decode error: {0}")]
    Decode(String),

    /// No writer exists for the parameter's declared type.
    #[error("unsupported type: cannot encode {rust_type} as oid {oid}")]
    UnsupportedType { oid: Oid, rust_type: &'static str },

    /// Parameter arity or range mismatch detected before sending.
    #[error("bind parameter error: {0}")]
    BindParameter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(any(feature = "sync-tls", feature = "tokio-tls"))]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// API misuse that did not touch the connection.
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// Rejected connection options.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<core::convert::Infallible> for Error {
    fn from(never: core::convert::Infallible) -> Self {
        match never {}
    }
}

impl Error {
    /// Returns true if the error leaves the connection unusable.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::ProtocolSync(_) | Error::AuthenticationFailed { .. } => true,
            #[cfg(any(feature = "sync-tls", feature = "tokio-tls"))]
            Error::Tls(_) => true,
            Error::Server(fields) => fields.is_fatal(),
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code(),
            Error::AuthenticationFailed {
                server: Some(fields),
                ..
            } => fields.code(),
            _ => None,
        }
    }

    pub(crate) fn auth(message: impl Into<String>) -> Self {
        Error::AuthenticationFailed {
            message: message.into(),
            server: None,
        }
    }

    pub(crate) fn unsupported(oid: Oid, rust_type: &'static str) -> Self {
        Error::UnsupportedType { oid, rust_type }
    }

    /// Encode-side range failure.
    pub(crate) fn overflow(from: &str, to: &str) -> Self {
        Error::BindParameter(format!("{from} value out of range for {to}"))
    }

    /// Decode-side range failure.
    pub(crate) fn decode_overflow(from: &str, to: &str) -> Self {
        Error::Decode(format!("{from} value out of range for {to}"))
    }
}
