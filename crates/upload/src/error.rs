//! Error types.

use std::fmt;

/// What went wrong with a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    /// The server answered with a status outside 200–299.
    Status,
    /// The request never completed (connection, TLS, protocol).
    Network,
    /// The payload could not be read.
    Io,
    /// The request could not be built (bad method, MIME type, URL).
    Request,
    /// The transfer was cancelled before completion.
    Aborted,
}

/// Failure outcome of one transfer.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransferError {
    pub kind: TransferErrorKind,
    /// HTTP status, 0 when no response was received.
    pub status: u16,
    pub status_text: String,
    /// Raw response text, empty when unavailable.
    pub body: String,
    pub method: String,
    pub url: String,
    pub message: String,
}

impl TransferError {
    /// A completed request with a non-2xx status.
    ///
    /// The message is the response text when there is one, else
    /// `fail to <method> <url> <status>`.
    pub fn from_status(
        method: &str,
        url: &str,
        status: u16,
        status_text: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let body = body.into();
        let message = if body.is_empty() {
            format!("fail to {method} {url} {status}")
        } else {
            body.clone()
        };
        Self {
            kind: TransferErrorKind::Status,
            status,
            status_text: status_text.into(),
            body,
            method: method.to_string(),
            url: url.to_string(),
            message,
        }
    }

    pub fn network(method: &str, url: &str, detail: impl fmt::Display) -> Self {
        Self::without_response(TransferErrorKind::Network, method, url, detail)
    }

    pub fn io(method: &str, url: &str, err: &std::io::Error) -> Self {
        Self::without_response(TransferErrorKind::Io, method, url, err)
    }

    pub fn request(method: &str, url: &str, detail: impl fmt::Display) -> Self {
        Self::without_response(TransferErrorKind::Request, method, url, detail)
    }

    pub fn aborted(method: &str, url: &str) -> Self {
        Self::without_response(TransferErrorKind::Aborted, method, url, "upload aborted")
    }

    fn without_response(
        kind: TransferErrorKind,
        method: &str,
        url: &str,
        detail: impl fmt::Display,
    ) -> Self {
        Self {
            kind,
            status: 0,
            status_text: String::new(),
            body: String::new(),
            method: method.to_string(),
            url: url.to_string(),
            message: format!("fail to {method} {url}: {detail}"),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.kind == TransferErrorKind::Aborted
    }
}

/// Invalid uploader configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no upload action configured")]
    MissingAction,

    #[error("invalid HTTP method: {0:?}")]
    InvalidMethod(String),

    #[error("invalid file field name: {0:?}")]
    InvalidFieldName(String),
}
