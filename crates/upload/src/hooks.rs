//! Lifecycle hooks invoked by the upload coordinator.
//!
//! Every hook is optional and owned by a single [`Hooks`] value, which is
//! moved into the coordinator when it is spawned:
//!
//! - [`before_upload`](Hooks::before_upload): awaited once per file before any request;
//!   decides [`BeforeUpload::Proceed`], [`BeforeUpload::Abort`] or
//!   [`BeforeUpload::Replace`]
//! - [`on_exceed`](Hooks::on_exceed): a batch would break `limit` or `max_sizes`
//! - [`on_progress`](Hooks::on_progress): each progress tick of a transfer
//! - [`on_success`](Hooks::on_success) / [`on_error`](Hooks::on_error): terminal outcome
//! - [`on_change`](Hooks::on_change): after add, start, success and fail
//! - [`before_remove`](Hooks::before_remove): awaited before removal; `false` vetoes
//! - [`on_remove`](Hooks::on_remove): a record left the list
//! - [`on_preview`](Hooks::on_preview): caller asked to preview a record
//!
//! # Example
//!
//! ```rust
//! use upkit_upload::{BeforeUpload, Hooks};
//!
//! let hooks = Hooks::new()
//!     .before_upload(|raw| async move {
//!         if raw.size > 10 * 1024 * 1024 {
//!             BeforeUpload::Abort
//!         } else {
//!             BeforeUpload::Proceed
//!         }
//!     })
//!     .on_progress(|event, record, _| println!("{}: {}%", record.name, event.percent));
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::TransferError;
use crate::types::{FileRecord, ProgressEvent, RawFile};

/// Boxed future returned by asynchronous hooks.
pub type HookFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Decision of the `before_upload` hook.
#[derive(Debug, Clone)]
pub enum BeforeUpload {
    /// Upload the file as selected.
    Proceed,
    /// Drop the file without uploading or reporting an error.
    Abort,
    /// Upload this payload instead.
    Replace(RawFile),
}

impl From<bool> for BeforeUpload {
    fn from(proceed: bool) -> Self {
        if proceed {
            BeforeUpload::Proceed
        } else {
            BeforeUpload::Abort
        }
    }
}

type BeforeUploadCallback = Arc<dyn Fn(RawFile) -> HookFuture<BeforeUpload> + Send + Sync>;
type BeforeRemoveCallback =
    Arc<dyn Fn(FileRecord, Vec<FileRecord>) -> HookFuture<bool> + Send + Sync>;
type ExceedCallback = Arc<dyn Fn(&[RawFile], &[FileRecord]) + Send + Sync>;
type ProgressCallback = Arc<dyn Fn(&ProgressEvent, &FileRecord, &[FileRecord]) + Send + Sync>;
type SuccessCallback =
    Arc<dyn Fn(&serde_json::Value, &FileRecord, &[FileRecord]) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&TransferError, &FileRecord, &[FileRecord]) + Send + Sync>;
type RecordListCallback = Arc<dyn Fn(&FileRecord, &[FileRecord]) + Send + Sync>;
type PreviewCallback = Arc<dyn Fn(&FileRecord) + Send + Sync>;

/// Optional lifecycle callbacks.
#[derive(Clone, Default)]
pub struct Hooks {
    before_upload: Option<BeforeUploadCallback>,
    before_remove: Option<BeforeRemoveCallback>,
    on_exceed: Option<ExceedCallback>,
    on_progress: Option<ProgressCallback>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    on_change: Option<RecordListCallback>,
    on_remove: Option<RecordListCallback>,
    on_preview: Option<PreviewCallback>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_upload", &self.before_upload.is_some())
            .field("before_remove", &self.before_remove.is_some())
            .field("on_exceed", &self.on_exceed.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_change", &self.on_change.is_some())
            .field("on_remove", &self.on_remove.is_some())
            .field("on_preview", &self.on_preview.is_some())
            .finish()
    }
}

impl Hooks {
    /// Creates an empty hook set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the pre-upload gate.
    ///
    /// A panicking hook future counts as [`BeforeUpload::Abort`].
    pub fn before_upload<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RawFile) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BeforeUpload> + Send + 'static,
    {
        self.before_upload = Some(Arc::new(move |raw| -> HookFuture<BeforeUpload> {
            Box::pin(f(raw))
        }));
        self
    }

    /// Registers the removal gate. Returning `false` (or panicking) keeps the record.
    pub fn before_remove<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(FileRecord, Vec<FileRecord>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.before_remove = Some(Arc::new(move |record, list| -> HookFuture<bool> {
            Box::pin(f(record, list))
        }));
        self
    }

    /// Called with the rejected batch and the current list.
    pub fn on_exceed(
        mut self,
        f: impl Fn(&[RawFile], &[FileRecord]) + Send + Sync + 'static,
    ) -> Self {
        self.on_exceed = Some(Arc::new(f));
        self
    }

    pub fn on_progress(
        mut self,
        f: impl Fn(&ProgressEvent, &FileRecord, &[FileRecord]) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    /// Called with the response body: parsed JSON, or a JSON string holding
    /// the raw text.
    pub fn on_success(
        mut self,
        f: impl Fn(&serde_json::Value, &FileRecord, &[FileRecord]) + Send + Sync + 'static,
    ) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(
        mut self,
        f: impl Fn(&TransferError, &FileRecord, &[FileRecord]) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_change(
        mut self,
        f: impl Fn(&FileRecord, &[FileRecord]) + Send + Sync + 'static,
    ) -> Self {
        self.on_change = Some(Arc::new(f));
        self
    }

    pub fn on_remove(
        mut self,
        f: impl Fn(&FileRecord, &[FileRecord]) + Send + Sync + 'static,
    ) -> Self {
        self.on_remove = Some(Arc::new(f));
        self
    }

    pub fn on_preview(mut self, f: impl Fn(&FileRecord) + Send + Sync + 'static) -> Self {
        self.on_preview = Some(Arc::new(f));
        self
    }

    // ---------------------------------------------------------------
    // Internal dispatch helpers
    // ---------------------------------------------------------------

    pub(crate) fn before_upload_future(&self, raw: RawFile) -> Option<HookFuture<BeforeUpload>> {
        self.before_upload.as_ref().map(|cb| cb(raw))
    }

    pub(crate) fn before_remove_future(
        &self,
        record: FileRecord,
        list: Vec<FileRecord>,
    ) -> Option<HookFuture<bool>> {
        self.before_remove.as_ref().map(|cb| cb(record, list))
    }

    pub(crate) fn emit_exceed(&self, files: &[RawFile], list: &[FileRecord]) {
        if let Some(cb) = &self.on_exceed {
            cb(files, list);
        }
    }

    pub(crate) fn emit_progress(&self, event: &ProgressEvent, record: &FileRecord, list: &[FileRecord]) {
        if let Some(cb) = &self.on_progress {
            cb(event, record, list);
        }
    }

    pub(crate) fn emit_success(
        &self,
        response: &serde_json::Value,
        record: &FileRecord,
        list: &[FileRecord],
    ) {
        if let Some(cb) = &self.on_success {
            cb(response, record, list);
        }
    }

    pub(crate) fn emit_error(&self, error: &TransferError, record: &FileRecord, list: &[FileRecord]) {
        if let Some(cb) = &self.on_error {
            cb(error, record, list);
        }
    }

    pub(crate) fn emit_change(&self, record: &FileRecord, list: &[FileRecord]) {
        if let Some(cb) = &self.on_change {
            cb(record, list);
        }
    }

    pub(crate) fn emit_remove(&self, record: &FileRecord, list: &[FileRecord]) {
        if let Some(cb) = &self.on_remove {
            cb(record, list);
        }
    }

    pub(crate) fn emit_preview(&self, record: &FileRecord) {
        if let Some(cb) = &self.on_preview {
            cb(record);
        }
    }
}
