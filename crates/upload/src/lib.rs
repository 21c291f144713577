//! File upload orchestration.
//!
//! Turns user-selected files into tracked, cancellable, progress-reporting
//! transfers. The crate has no HTTP dependency: callers plug in a
//! [`Transport`] (see `upkit-http-transfer` for the multipart one).
//!
//! # Pipeline
//!
//! 1. **Accept**: a batch is checked against `limit` and `max_sizes`
//!    and rejected whole through `on_exceed`
//! 2. **Track**: each file becomes a `ready` [`FileRecord`]
//! 3. **Vet**: `before_upload` may proceed, abort or replace the payload
//! 4. **Transfer**: the transport reports progress ticks and one outcome
//! 5. **Settle**: the record ends as `success` or `fail`; it stays listed
//!    until removed or cleared

mod config;
mod coordinator;
mod error;
mod hooks;
mod store;
mod transport;
pub mod types;

pub use config::{UploadConfig, UploadData, accept_matches};
pub use coordinator::{BatchOutcome, Uploader};
pub use error::{ConfigError, TransferError, TransferErrorKind};
pub use hooks::{BeforeUpload, HookFuture, Hooks};
pub use store::{FileStore, UidGenerator};
pub use transport::{ProgressSink, TransferRequest, TransferResponse, Transport, parse_body};
pub use types::{
    FileRecord, FileSource, FormData, FormValue, ProgressEvent, RawFile, Uid, UploadStatus,
    UserFile, detect_content_type, form_fields,
};
