//! Transport abstraction: one request in, progress ticks and one outcome out.
//!
//! The coordinator never talks HTTP itself. It builds a [`TransferRequest`]
//! per attempt and hands it to a [`Transport`]; `upkit-http-transfer`
//! provides the default multipart implementation, tests provide mocks.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::TransferError;
use crate::types::{FormData, ProgressEvent, RawFile};

/// Everything needed for one upload attempt.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub action: String,
    pub method: String,
    /// `None` values are omitted from the request.
    pub headers: Vec<(String, Option<String>)>,
    pub data: FormData,
    /// Form field name of the file part.
    pub field_name: String,
    pub file: RawFile,
    pub with_credentials: bool,
}

/// Successful outcome of a transfer.
#[derive(Debug, Clone)]
pub struct TransferResponse {
    pub status: u16,
    /// Parsed JSON, or a JSON string holding the raw text.
    pub body: serde_json::Value,
}

/// Receives progress ticks of one transfer.
#[derive(Clone)]
pub struct ProgressSink(Arc<dyn Fn(ProgressEvent) + Send + Sync>);

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressSink")
    }
}

impl ProgressSink {
    pub fn new(f: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// A sink that drops every tick.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn emit(&self, event: ProgressEvent) {
        (self.0)(event);
    }

    /// Emits a tick for `loaded` out of `total` bytes.
    pub fn report(&self, loaded: u64, total: u64) {
        self.emit(ProgressEvent::new(loaded, total));
    }
}

/// Performs uploads.
///
/// Implementations must resolve with `Err` of kind
/// [`Aborted`](crate::TransferErrorKind::Aborted) once `cancel` fires, and
/// must only report progress for the upload phase.
pub trait Transport: Send + Sync {
    fn upload(
        &self,
        request: TransferRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<TransferResponse, TransferError>> + Send + '_>>;
}

/// Interprets a response body: JSON when it parses, the raw text otherwise.
pub fn parse_body(text: &str) -> serde_json::Value {
    if text.is_empty() {
        return serde_json::Value::String(String::new());
    }
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}
