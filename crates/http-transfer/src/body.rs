//! Streamed file bodies with progress reporting.

use std::io::Cursor;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use upkit_upload::{FileSource, ProgressSink, RawFile};

pub(crate) type FileReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Opens the payload of `file` for reading.
pub(crate) async fn open(file: &RawFile) -> std::io::Result<FileReader> {
    match &file.source {
        FileSource::Memory(data) => Ok(Box::new(Cursor::new(data.clone()))),
        FileSource::Path(path) => {
            let f = tokio::fs::File::open(path).await?;
            Ok(Box::new(f))
        }
    }
}

/// Wraps `reader` into a request body that reports the cumulative number of
/// bytes read to `progress`, out of `total`.
pub(crate) fn progress_body(
    reader: FileReader,
    chunk_size: usize,
    total: u64,
    progress: ProgressSink,
) -> reqwest::Body {
    let mut loaded: u64 = 0;
    let stream = ReaderStream::with_capacity(reader, chunk_size).inspect(move |chunk| {
        if let Ok(bytes) = chunk {
            loaded += bytes.len() as u64;
            progress.report(loaded, total);
        }
    });
    reqwest::Body::wrap_stream(stream)
}
