//! `reqwest`-backed [`Transport`].

use std::future::Future;
use std::pin::Pin;

use reqwest::Method;
use reqwest::multipart::{Form, Part};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use upkit_upload::{
    ProgressSink, TransferError, TransferRequest, TransferResponse, Transport, form_fields,
    parse_body,
};

use crate::DEFAULT_CHUNK_SIZE;
use crate::body;

/// Sends each upload as one `multipart/form-data` request.
///
/// `with_credentials` has no native counterpart and is ignored; configure
/// cookies or auth on the `reqwest::Client` passed to [`with_client`](Self::with_client).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    chunk_size: usize,
}

impl HttpTransport {
    /// Creates a transport with a default rustls client.
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self::with_client(http))
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sets how many bytes are read per body chunk (and so per progress tick).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    async fn send(
        &self,
        request: TransferRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<TransferResponse, TransferError> {
        let TransferRequest {
            action,
            method,
            headers,
            data,
            field_name,
            file,
            with_credentials: _,
        } = request;

        let http_method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|e| TransferError::request(&method, &action, e))?;

        let reader = body::open(&file)
            .await
            .map_err(|e| TransferError::io(&method, &action, &e))?;
        let total = file.size;
        let stream = body::progress_body(reader, self.chunk_size, total, progress);

        let mut part = Part::stream_with_length(stream, total).file_name(file.name.clone());
        if let Some(content_type) = &file.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| TransferError::request(&method, &action, e))?;
        }

        let mut form = Form::new();
        for (name, value) in form_fields(&data) {
            form = form.text(name.to_string(), value.to_string());
        }
        form = form.part(field_name, part);

        let mut builder = self.http.request(http_method, &action).multipart(form);
        for (name, value) in &headers {
            if let Some(value) = value {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        debug!(method = %method, url = %action, name = %file.name, size = total, "sending upload");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::aborted(&method, &action)),
            result = builder.send() => result.map_err(|e| {
                if e.is_builder() {
                    TransferError::request(&method, &action, e)
                } else {
                    TransferError::network(&method, &action, e)
                }
            })?,
        };

        let status = response.status();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::aborted(&method, &action)),
            body = response.text() => body,
        };

        if !status.is_success() {
            return Err(TransferError::from_status(
                &method,
                &action,
                status.as_u16(),
                status.canonical_reason().unwrap_or_default(),
                body.unwrap_or_default(),
            ));
        }
        let text = body.map_err(|e| TransferError::network(&method, &action, e))?;

        trace!(status = status.as_u16(), bytes = text.len(), "upload response");
        Ok(TransferResponse {
            status: status.as_u16(),
            body: parse_body(&text),
        })
    }
}

impl Transport for HttpTransport {
    fn upload(
        &self,
        request: TransferRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<TransferResponse, TransferError>> + Send + '_>> {
        Box::pin(self.send(request, progress, cancel))
    }
}
