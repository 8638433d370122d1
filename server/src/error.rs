use std::fmt;
use std::error::Error as StdError;
use anyhow::Error as AnyError;
use displaydoc::Display;
use tracing_error::SpanTrace;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub type ServerResult<T> = Result<T, ServerError>;

/// The kind of an error.
#[derive(Debug, Display)]
pub enum ErrorKind {
    /// The requested object does not exist: {0}
    NotFound(String),
    /// Rewriting the signature set failed: {0}
    Signing(String),
    /// The server encountered an internal error: {0}
    Internal(AnyError),
}
impl ErrorKind {
    fn http_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The plaintext body clients see. Internal detail stays in the logs.
    fn body(&self) -> String {
        match self {
            Self::NotFound(name) => format!("Not Found: {name}"),
            Self::Signing(name) => format!("Signing Error: {name}"),
            Self::Internal(_) => "Internal Server Error".to_string(),
        }
    }
}

/// A server error.
#[derive(Debug)]
pub struct ServerError {
    /// The kind of the error.
    kind: ErrorKind,
    /// Context of where the error occurred.
    context: SpanTrace,
}
impl ServerError {
    pub fn internal(error: impl StdError + Send + Sync + 'static) -> Self {
        ErrorKind::Internal(AnyError::new(error)).into()
    }
}
impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.kind)?;
        self.context.fmt(f)?;
        Ok(())
    }
}
impl StdError for ServerError {}
impl From<ErrorKind> for ServerError {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: SpanTrace::capture(),
        }
    }
}
impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match &self.kind {
            ErrorKind::NotFound(_) => tracing::debug!("{}", self),
            _ => tracing::warn!("{}", self),
        }

        (self.kind.http_status_code(), self.kind.body()).into_response()
    }
}
