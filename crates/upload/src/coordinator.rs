//! Upload coordinator: drives every tracked file through its lifecycle.
//!
//! The coordinator runs as a single tokio task that owns the [`FileStore`]
//! and the hooks. Callers talk to it through the cloneable [`Uploader`]
//! handle; per-file work (`before_upload`, data resolution, the transfer
//! itself) runs in spawned tasks that report back over an internal channel.
//! Every store mutation and every hook call therefore happens on the
//! coordinator task, in the order its messages arrive.
//!
//! Per file the order is `before_upload → uploading/on_change →
//! on_progress* → on_success|on_error → on_change`. Nothing is ordered
//! across files.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::UploadConfig;
use crate::error::TransferError;
use crate::hooks::{BeforeUpload, Hooks};
use crate::store::FileStore;
use crate::transport::{ProgressSink, TransferRequest, TransferResponse, Transport};
use crate::types::{FileRecord, ProgressEvent, RawFile, Uid, UploadStatus, UserFile};

/// Result of handing a batch of files to the uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every file was added; uids in submission order.
    Accepted(Vec<Uid>),
    /// The batch would break `limit` or `max_sizes`; nothing was added.
    Exceeded,
    /// The uploader is disabled; nothing was added.
    Disabled,
    /// The coordinator is no longer running.
    Stopped,
}

enum Command {
    Accept {
        files: Vec<RawFile>,
        reply: oneshot::Sender<BatchOutcome>,
    },
    SetFileList(Vec<UserFile>),
    Upload(Option<Uid>),
    Remove {
        uid: Uid,
        reply: oneshot::Sender<bool>,
    },
    Abort(Option<Uid>),
    Clear(Vec<UploadStatus>),
    Preview(Uid),
    SetUrl {
        uid: Uid,
        url: Option<String>,
    },
    Snapshot(oneshot::Sender<Vec<FileRecord>>),
    WhenIdle(oneshot::Sender<Vec<FileRecord>>),
}

enum Event {
    Vetted {
        uid: Uid,
        attempt: u64,
        decision: BeforeUpload,
    },
    Progress {
        uid: Uid,
        attempt: u64,
        event: ProgressEvent,
    },
    Finished {
        uid: Uid,
        attempt: u64,
        outcome: Result<TransferResponse, TransferError>,
    },
    RemoveDecided {
        uid: Uid,
        allowed: bool,
        reply: oneshot::Sender<bool>,
    },
}

/// Handle to a running upload coordinator.
///
/// Cloning is cheap; the coordinator stops (aborting its transfers) once
/// every handle is dropped or [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct Uploader {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
}

impl Uploader {
    /// Spawns a coordinator on the current tokio runtime.
    pub fn spawn(config: UploadConfig, hooks: Hooks, transport: Arc<dyn Transport>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let coordinator = Coordinator {
            config,
            hooks,
            transport,
            store: FileStore::new(),
            attempts: 0,
            vetting: HashMap::new(),
            in_flight: HashMap::new(),
            removing: HashSet::new(),
            idle_waiters: Vec::new(),
            events: events_tx,
            shutdown: shutdown.clone(),
        };
        tokio::spawn(coordinator.run(commands_rx, events_rx));

        Self {
            commands: commands_tx,
            shutdown,
        }
    }

    /// Hands a batch of newly selected files to the uploader.
    ///
    /// The batch is taken whole or not at all; a rejection is reported
    /// through `on_exceed`.
    pub async fn accept(&self, files: Vec<RawFile>) -> BatchOutcome {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::Accept { files, reply }) {
            return BatchOutcome::Stopped;
        }
        rx.await.unwrap_or(BatchOutcome::Stopped)
    }

    /// Replaces the tracked list with already-known files. No hooks fire.
    pub fn set_file_list(&self, files: Vec<UserFile>) {
        self.send(Command::SetFileList(files));
    }

    /// Starts uploading every `ready` record.
    pub fn submit(&self) {
        self.send(Command::Upload(None));
    }

    /// Starts uploading one `ready` record.
    pub fn upload(&self, uid: Uid) {
        self.send(Command::Upload(Some(uid)));
    }

    /// Removes a record after `before_remove` allows it, aborting its
    /// transfer. Returns whether the record was removed.
    pub async fn remove(&self, uid: Uid) -> bool {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::Remove { uid, reply }) {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Aborts the transfer of one record; the record ends as `fail`.
    pub fn abort(&self, uid: Uid) {
        self.send(Command::Abort(Some(uid)));
    }

    /// Aborts every pending or running transfer.
    pub fn abort_all(&self) {
        self.send(Command::Abort(None));
    }

    /// Drops every record whose status is in `statuses`, without hooks.
    pub fn clear_files(&self, statuses: &[UploadStatus]) {
        self.send(Command::Clear(statuses.to_vec()));
    }

    /// Fires `on_preview` for a tracked record.
    pub fn preview(&self, uid: Uid) {
        self.send(Command::Preview(uid));
    }

    /// Sets or clears the display URL of a record.
    pub fn set_url(&self, uid: Uid, url: Option<String>) {
        self.send(Command::SetUrl { uid, url });
    }

    /// Returns the tracked records in insertion order.
    pub async fn files(&self) -> Vec<FileRecord> {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::Snapshot(reply)) {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn get(&self, uid: Uid) -> Option<FileRecord> {
        self.files().await.into_iter().find(|r| r.uid == uid)
    }

    /// Waits until no file is being vetted, transferred or removed, then
    /// returns the tracked records.
    pub async fn idle(&self) -> Vec<FileRecord> {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::WhenIdle(reply)) {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Stops the coordinator and aborts its transfers.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn send(&self, command: Command) -> bool {
        if self.commands.send(command).is_err() {
            warn!("upload coordinator is not running");
            return false;
        }
        true
    }
}

/// A running transfer. Events carrying another attempt number are stale.
struct Transfer {
    attempt: u64,
    cancel: CancellationToken,
}

struct Coordinator {
    config: UploadConfig,
    hooks: Hooks,
    transport: Arc<dyn Transport>,
    store: FileStore,
    /// Last issued upload attempt number.
    attempts: u64,
    /// Records whose `before_upload` is pending, with the attempt it belongs to.
    vetting: HashMap<Uid, u64>,
    in_flight: HashMap<Uid, Transfer>,
    /// Records whose `before_remove` is pending.
    removing: HashSet<Uid>,
    idle_waiters: Vec<oneshot::Sender<Vec<FileRecord>>>,
    events: mpsc::UnboundedSender<Event>,
    shutdown: CancellationToken,
}

impl Coordinator {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        debug!(action = %self.config.action, "upload coordinator started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(event) = events.recv() => self.handle_event(event),
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
            self.notify_idle();
        }

        self.shutdown.cancel();
        debug!(
            in_flight = self.in_flight.len(),
            "upload coordinator stopped"
        );
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Accept { files, reply } => {
                let outcome = self.accept(files);
                let _ = reply.send(outcome);
            }
            Command::SetFileList(files) => self.set_file_list(files),
            Command::Upload(Some(uid)) => self.start_upload(uid),
            Command::Upload(None) => {
                for uid in self.store.uids_with_status(UploadStatus::Ready) {
                    self.start_upload(uid);
                }
            }
            Command::Remove { uid, reply } => self.request_remove(uid, reply),
            Command::Abort(uid) => self.abort(uid),
            Command::Clear(statuses) => self.clear(&statuses),
            Command::Preview(uid) => {
                if let Some(record) = self.store.get(uid) {
                    self.hooks.emit_preview(record);
                }
            }
            Command::SetUrl { uid, url } => {
                self.store.update(uid, |r| r.url = url);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.store.snapshot());
            }
            Command::WhenIdle(reply) => self.idle_waiters.push(reply),
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Vetted {
                uid,
                attempt,
                decision,
            } => self.on_vetted(uid, attempt, decision),
            Event::Progress {
                uid,
                attempt,
                event,
            } => self.on_progress(uid, attempt, event),
            Event::Finished {
                uid,
                attempt,
                outcome,
            } => self.on_finished(uid, attempt, outcome),
            Event::RemoveDecided {
                uid,
                allowed,
                reply,
            } => {
                let removed = self.finish_remove(uid, allowed);
                let _ = reply.send(removed);
            }
        }
    }

    // ---------------------------------------------------------------
    // Batch acceptance
    // ---------------------------------------------------------------

    fn accept(&mut self, files: Vec<RawFile>) -> BatchOutcome {
        if self.config.disabled {
            debug!(files = files.len(), "uploader disabled, ignoring batch");
            return BatchOutcome::Disabled;
        }

        if self.exceeds_limits(&files) {
            info!(
                files = files.len(),
                tracked = self.store.len(),
                "batch exceeds upload limits"
            );
            self.hooks.emit_exceed(&files, self.store.records());
            return BatchOutcome::Exceeded;
        }

        let mut uids = Vec::with_capacity(files.len());
        for raw in files {
            let uid = self.store.create_id();
            debug!(uid, name = %raw.name, size = raw.size, "file added");
            self.store.add(FileRecord::ready(uid, raw));
            self.emit_change(uid);
            uids.push(uid);

            if self.config.auto_upload {
                self.start_upload(uid);
            }
        }

        BatchOutcome::Accepted(uids)
    }

    fn exceeds_limits(&self, files: &[RawFile]) -> bool {
        if let Some(limit) = self.config.limit
            && self.store.len() + files.len() > limit
        {
            return true;
        }
        if let Some(max) = self.config.max_sizes {
            let incoming: u64 = files.iter().map(|f| f.size).sum();
            if self.store.total_size().saturating_add(incoming) > max {
                return true;
            }
        }
        false
    }

    fn set_file_list(&mut self, files: Vec<UserFile>) {
        let mut records: Vec<FileRecord> = Vec::with_capacity(files.len());
        for file in files {
            let uid = match file.uid {
                Some(uid) if !records.iter().any(|r| r.uid == uid) => uid,
                _ => loop {
                    let uid = self.store.create_id();
                    if !records.iter().any(|r| r.uid == uid) {
                        break uid;
                    }
                },
            };
            records.push(FileRecord {
                uid,
                size: file
                    .size
                    .or_else(|| file.raw.as_ref().map(|r| r.size))
                    .unwrap_or(0),
                name: file.name,
                status: file.status.unwrap_or(UploadStatus::Success),
                percentage: file.percentage.unwrap_or(0).min(100),
                raw: file.raw,
                response: file.response,
                url: file.url,
            });
        }

        let previous = self.store.replace_all(records);
        for record in &previous {
            let pending =
                self.vetting.contains_key(&record.uid) || self.in_flight.contains_key(&record.uid);
            if pending && self.store.contains(record.uid) {
                // Still listed: the running attempt owns its status and payload.
                let (status, percentage, raw) =
                    (record.status, record.percentage, record.raw.clone());
                self.store.update(record.uid, |r| {
                    r.status = status;
                    r.percentage = percentage;
                    r.raw = raw;
                });
                continue;
            }
            self.forget(record.uid);
        }
        debug!(
            replaced = previous.len(),
            files = self.store.len(),
            "file list seeded"
        );
    }

    // ---------------------------------------------------------------
    // Per-file upload sequence
    // ---------------------------------------------------------------

    fn start_upload(&mut self, uid: Uid) {
        let Some(record) = self.store.get(uid) else {
            return;
        };
        if record.status != UploadStatus::Ready
            || self.vetting.contains_key(&uid)
            || self.removing.contains(&uid)
        {
            return;
        }
        let Some(raw) = record.raw.clone() else {
            warn!(uid, "record has no payload, cannot upload");
            return;
        };

        self.attempts += 1;
        let attempt = self.attempts;
        self.vetting.insert(uid, attempt);

        match self.hooks.before_upload_future(raw) {
            None => self.on_vetted(uid, attempt, BeforeUpload::Proceed),
            Some(hook) => {
                let events = self.events.clone();
                tokio::spawn(async move {
                    let decision = AssertUnwindSafe(hook)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            warn!(uid, "before_upload hook panicked, skipping file");
                            BeforeUpload::Abort
                        });
                    let _ = events.send(Event::Vetted {
                        uid,
                        attempt,
                        decision,
                    });
                });
            }
        }
    }

    fn on_vetted(&mut self, uid: Uid, attempt: u64, decision: BeforeUpload) {
        // Aborted, removed or restarted while the hook was pending.
        if self.vetting.get(&uid) != Some(&attempt) {
            debug!(uid, attempt, "ignoring stale before_upload decision");
            return;
        }
        self.vetting.remove(&uid);

        match decision {
            BeforeUpload::Abort => {
                if let Some(record) = self.store.remove(uid) {
                    info!(uid, name = %record.name, "upload skipped by before_upload");
                    self.hooks.emit_remove(&record, self.store.records());
                }
                return;
            }
            BeforeUpload::Replace(raw) => {
                debug!(uid, size = raw.size, "payload replaced by before_upload");
                self.store.update(uid, |r| {
                    r.size = raw.size;
                    r.raw = Some(raw);
                });
            }
            BeforeUpload::Proceed => {}
        }

        let mut payload = None;
        self.store.update(uid, |r| {
            r.status = UploadStatus::Uploading;
            r.percentage = 0;
            payload = r.raw.clone();
        });
        let Some(raw) = payload else {
            return;
        };
        self.emit_change(uid);

        let cancel = self.shutdown.child_token();
        self.in_flight.insert(
            uid,
            Transfer {
                attempt,
                cancel: cancel.clone(),
            },
        );
        self.spawn_transfer(uid, attempt, raw, cancel);
    }

    fn spawn_transfer(&self, uid: Uid, attempt: u64, raw: RawFile, cancel: CancellationToken) {
        let transport = Arc::clone(&self.transport);
        let data = self.config.data.clone();
        let events = self.events.clone();
        let method = self.config.method.clone();
        let action = self.config.action.clone();
        let headers = self.config.header_list();
        let field_name = self.config.name.clone();
        let with_credentials = self.config.with_credentials;

        let progress = {
            let events = self.events.clone();
            ProgressSink::new(move |event| {
                let _ = events.send(Event::Progress {
                    uid,
                    attempt,
                    event,
                });
            })
        };

        info!(uid, name = %raw.name, action = %action, "upload started");

        tokio::spawn(async move {
            let transfer = {
                let method = method.clone();
                let action = action.clone();
                let cancel = cancel.clone();
                async move {
                    let data = data.resolve(&raw).await;
                    let request = TransferRequest {
                        action,
                        method,
                        headers,
                        data,
                        field_name,
                        file: raw,
                        with_credentials,
                    };
                    transport.upload(request, progress, cancel).await
                }
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransferError::aborted(&method, &action)),
                result = transfer => result,
            };
            let _ = events.send(Event::Finished {
                uid,
                attempt,
                outcome,
            });
        });
    }

    fn is_current(&self, uid: Uid, attempt: u64) -> bool {
        self.in_flight.get(&uid).is_some_and(|t| t.attempt == attempt)
    }

    fn on_progress(&mut self, uid: Uid, attempt: u64, event: ProgressEvent) {
        if !self.is_current(uid, attempt) {
            return;
        }
        let updated = self.store.update(uid, |r| r.percentage = event.percent);
        if !updated {
            return;
        }
        trace!(uid, percent = event.percent, "upload progress");
        if let Some(record) = self.store.get(uid) {
            self.hooks
                .emit_progress(&event, record, self.store.records());
        }
    }

    fn on_finished(
        &mut self,
        uid: Uid,
        attempt: u64,
        outcome: Result<TransferResponse, TransferError>,
    ) {
        if !self.is_current(uid, attempt) {
            debug!(uid, attempt, "ignoring outcome of a cancelled transfer");
            return;
        }
        self.in_flight.remove(&uid);

        match outcome {
            Ok(response) => {
                let body = response.body;
                let updated = self.store.update(uid, |r| {
                    r.status = UploadStatus::Success;
                    r.response = Some(body.clone());
                    r.raw = None;
                });
                if !updated {
                    return;
                }
                info!(uid, status = response.status, "upload succeeded");
                if let Some(record) = self.store.get(uid) {
                    self.hooks.emit_success(&body, record, self.store.records());
                }
                self.emit_change(uid);
            }
            Err(err) => self.fail(uid, &err),
        }
    }

    fn fail(&mut self, uid: Uid, err: &TransferError) {
        if !self.store.update(uid, |r| r.status = UploadStatus::Fail) {
            return;
        }
        warn!(uid, status = err.status, kind = ?err.kind, error = %err, "upload failed");
        if let Some(record) = self.store.get(uid) {
            self.hooks.emit_error(err, record, self.store.records());
        }
        self.emit_change(uid);
    }

    // ---------------------------------------------------------------
    // Removal and cancellation
    // ---------------------------------------------------------------

    fn request_remove(&mut self, uid: Uid, reply: oneshot::Sender<bool>) {
        let Some(record) = self.store.get(uid) else {
            let _ = reply.send(false);
            return;
        };
        if !self.removing.insert(uid) {
            // Another removal of this record is already waiting on its hook.
            let _ = reply.send(false);
            return;
        }

        match self
            .hooks
            .before_remove_future(record.clone(), self.store.snapshot())
        {
            None => {
                let removed = self.finish_remove(uid, true);
                let _ = reply.send(removed);
            }
            Some(hook) => {
                let events = self.events.clone();
                tokio::spawn(async move {
                    let allowed = AssertUnwindSafe(hook)
                        .catch_unwind()
                        .await
                        .unwrap_or(false);
                    let _ = events.send(Event::RemoveDecided {
                        uid,
                        allowed,
                        reply,
                    });
                });
            }
        }
    }

    fn finish_remove(&mut self, uid: Uid, allowed: bool) -> bool {
        self.removing.remove(&uid);
        if !allowed {
            debug!(uid, "removal vetoed by before_remove");
            return false;
        }

        self.forget(uid);
        match self.store.remove(uid) {
            Some(record) => {
                info!(uid, name = %record.name, "file removed");
                self.hooks.emit_remove(&record, self.store.records());
                true
            }
            None => false,
        }
    }

    fn abort(&mut self, uid: Option<Uid>) {
        let targets: Vec<Uid> = match uid {
            Some(uid) => vec![uid],
            None => self
                .store
                .records()
                .iter()
                .map(|r| r.uid)
                .filter(|uid| self.vetting.contains_key(uid) || self.in_flight.contains_key(uid))
                .collect(),
        };

        for uid in targets {
            if self.vetting.remove(&uid).is_some() {
                debug!(uid, "upload aborted before it started");
                continue;
            }
            if let Some(transfer) = self.in_flight.remove(&uid) {
                transfer.cancel.cancel();
                let err = TransferError::aborted(&self.config.method, &self.config.action);
                self.fail(uid, &err);
            }
        }
    }

    fn clear(&mut self, statuses: &[UploadStatus]) {
        let dropped = self.store.retain(|r| !statuses.contains(&r.status));
        for record in &dropped {
            self.forget(record.uid);
        }
        debug!(cleared = dropped.len(), "file list cleared");
    }

    /// Drops all pending work for `uid`, cancelling its transfer.
    fn forget(&mut self, uid: Uid) {
        self.vetting.remove(&uid);
        if let Some(transfer) = self.in_flight.remove(&uid) {
            debug!(uid, "transfer cancelled");
            transfer.cancel.cancel();
        }
    }

    // ---------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------

    fn emit_change(&self, uid: Uid) {
        if let Some(record) = self.store.get(uid) {
            self.hooks.emit_change(record, self.store.records());
        }
    }

    fn notify_idle(&mut self) {
        if self.idle_waiters.is_empty()
            || !self.vetting.is_empty()
            || !self.in_flight.is_empty()
            || !self.removing.is_empty()
        {
            return;
        }
        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(self.store.snapshot());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::{Value, json};

    use crate::config::UploadData;
    use crate::error::TransferErrorKind;
    use crate::hooks::HookFuture;
    use crate::types::{FormData, FormValue};

    type Outcome = Result<TransferResponse, TransferError>;
    type Handler =
        Arc<dyn Fn(TransferRequest, ProgressSink, CancellationToken) -> HookFuture<Outcome> + Send + Sync>;

    struct MockTransport {
        handler: Handler,
        requests: Mutex<Vec<TransferRequest>>,
    }

    impl MockTransport {
        fn new<F, Fut>(f: F) -> Arc<Self>
        where
            F: Fn(TransferRequest, ProgressSink, CancellationToken) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Outcome> + Send + 'static,
        {
            Arc::new(Self {
                handler: Arc::new(move |req, progress, cancel| -> HookFuture<Outcome> {
                    Box::pin(f(req, progress, cancel))
                }),
                requests: Mutex::new(Vec::new()),
            })
        }

        /// Answers every request with 200 and `body`.
        fn ok(body: Value) -> Arc<Self> {
            Self::new(move |_, _, _| {
                let body = body.clone();
                async move { Ok(TransferResponse { status: 200, body }) }
            })
        }

        /// Never answers; resolves only once cancelled.
        fn hanging() -> Arc<Self> {
            Self::new(|req, _, cancel| async move {
                cancel.cancelled().await;
                Err(TransferError::aborted(&req.method, &req.action))
            })
        }

        fn requests(&self) -> Vec<TransferRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Transport for MockTransport {
        fn upload(
            &self,
            request: TransferRequest,
            progress: ProgressSink,
            cancel: CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Outcome> + Send + '_>> {
            self.requests.lock().unwrap().push(request.clone());
            (self.handler)(request, progress, cancel)
        }
    }

    /// Logs every synchronous hook call as a short line.
    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Recorder {
        fn push(&self, line: String) {
            self.0.lock().unwrap().push(line);
        }

        fn lines(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.lines().iter().filter(|l| l.starts_with(prefix)).count()
        }

        fn hooks(&self) -> Hooks {
            let (a, b, c, d, e, f, g) = (
                self.clone(),
                self.clone(),
                self.clone(),
                self.clone(),
                self.clone(),
                self.clone(),
                self.clone(),
            );
            Hooks::new()
                .on_exceed(move |files, list| {
                    a.push(format!("exceed {} over {}", files.len(), list.len()))
                })
                .on_progress(move |ev, r, _| b.push(format!("progress {} {}", r.name, ev.percent)))
                .on_success(move |_, r, _| c.push(format!("success {}", r.name)))
                .on_error(move |err, r, _| {
                    if err.is_aborted() {
                        d.push(format!("error {} aborted", r.name));
                    } else {
                        d.push(format!("error {} {}", r.name, err.status));
                    }
                })
                .on_change(move |r, list| {
                    e.push(format!("change {} {} in {}", r.name, r.status, list.len()))
                })
                .on_remove(move |r, _| f.push(format!("remove {}", r.name)))
                .on_preview(move |r| g.push(format!("preview {}", r.name)))
        }
    }

    fn file(name: &str, size: usize) -> RawFile {
        RawFile::from_bytes(name, vec![b'x'; size])
    }

    fn accepted(outcome: BatchOutcome) -> Vec<Uid> {
        match outcome {
            BatchOutcome::Accepted(uids) => uids,
            other => panic!("expected accepted batch, got {other:?}"),
        }
    }

    fn config() -> UploadConfig {
        UploadConfig::new("https://example.com/upload")
    }

    #[tokio::test]
    async fn single_file_reports_progress_then_success() {
        let transport = MockTransport::new(|_, progress, _| async move {
            progress.report(10, 100);
            progress.report(55, 100);
            progress.report(100, 100);
            Ok(TransferResponse {
                status: 200,
                body: json!({"url": "/f/1"}),
            })
        });
        let rec = Recorder::default();
        let uploader = Uploader::spawn(config(), rec.hooks(), transport);

        let uids = accepted(uploader.accept(vec![file("a.txt", 100)]).await);
        let files = uploader.idle().await;

        assert_eq!(
            rec.lines(),
            vec![
                "change a.txt ready in 1",
                "change a.txt uploading in 1",
                "progress a.txt 10",
                "progress a.txt 55",
                "progress a.txt 100",
                "success a.txt",
                "change a.txt success in 1",
            ]
        );
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].uid, uids[0]);
        assert_eq!(files[0].status, UploadStatus::Success);
        assert_eq!(files[0].percentage, 100);
        assert_eq!(files[0].response, Some(json!({"url": "/f/1"})));
        assert!(files[0].raw.is_none());
    }

    #[tokio::test]
    async fn request_carries_config() {
        let transport = MockTransport::ok(json!("ok"));
        let mut config = config();
        config.method = "put".into();
        config.name = "attachment".into();
        config.with_credentials = true;
        config.headers.insert("x-token".into(), Some("abc".into()));
        config.headers.insert("x-skip".into(), None);
        let mut data = FormData::new();
        data.insert("album".into(), "holiday".into());
        config.data = UploadData::Static(data);

        let uploader = Uploader::spawn(config, Hooks::new(), transport.clone());
        uploader.accept(vec![file("a.png", 3)]).await;
        uploader.idle().await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.action, "https://example.com/upload");
        assert_eq!(req.method, "put");
        assert_eq!(req.field_name, "attachment");
        assert!(req.with_credentials);
        assert_eq!(req.file.name, "a.png");
        assert_eq!(req.data["album"], FormValue::Text("holiday".into()));
        assert!(req.headers.contains(&("x-token".into(), Some("abc".into()))));
        assert!(req.headers.contains(&("x-skip".into(), None)));
    }

    #[tokio::test]
    async fn status_error_marks_fail_and_keeps_record() {
        let transport = MockTransport::new(|req, _, _| async move {
            Err(TransferError::from_status(&req.method, &req.action, 404, "Not Found", ""))
        });
        let rec = Recorder::default();
        let uploader = Uploader::spawn(config(), rec.hooks(), transport);

        uploader.accept(vec![file("a.txt", 4)]).await;
        let files = uploader.idle().await;

        assert_eq!(
            rec.lines(),
            vec![
                "change a.txt ready in 1",
                "change a.txt uploading in 1",
                "error a.txt 404",
                "change a.txt fail in 1",
            ]
        );
        assert_eq!(files[0].status, UploadStatus::Fail);
        assert!(files[0].raw.is_some());
        assert!(files[0].response.is_none());
    }

    #[tokio::test]
    async fn limit_rejects_whole_batch() {
        let transport = MockTransport::ok(json!({"url": "/f/1"}));
        let rec = Recorder::default();
        let mut config = config();
        config.limit = Some(2);
        let uploader = Uploader::spawn(config, rec.hooks(), transport.clone());

        let outcome = uploader
            .accept(vec![file("a", 1), file("b", 1), file("c", 1)])
            .await;
        assert_eq!(outcome, BatchOutcome::Exceeded);
        assert!(uploader.files().await.is_empty());
        assert_eq!(rec.lines(), vec!["exceed 3 over 0"]);

        let uids = accepted(uploader.accept(vec![file("a", 1), file("b", 1)]).await);
        assert_eq!(uids.len(), 2);
        assert_ne!(uids[0], uids[1]);

        let files = uploader.idle().await;
        assert!(files.iter().all(|f| f.status == UploadStatus::Success));
        assert!(files.iter().all(|f| f.response == Some(json!({"url": "/f/1"}))));
        assert_eq!(rec.count("success"), 2);
        assert_eq!(transport.requests().len(), 2);

        assert_eq!(
            uploader.accept(vec![file("d", 1)]).await,
            BatchOutcome::Exceeded
        );
    }

    #[tokio::test]
    async fn exceed_reports_tracked_list() {
        let transport = MockTransport::ok(json!({"url": "/f/1"}));
        let rec = Recorder::default();
        let mut config = config();
        config.limit = Some(2);
        let uploader = Uploader::spawn(config, rec.hooks(), transport);

        let uids = accepted(uploader.accept(vec![file("a.png", 3)]).await);
        let files = uploader.idle().await;
        assert_eq!(files[0].uid, uids[0]);
        assert_eq!(files[0].status, UploadStatus::Success);
        assert_eq!(files[0].response, Some(json!({"url": "/f/1"})));

        assert_eq!(
            uploader.accept(vec![file("b.png", 1), file("c.png", 1)]).await,
            BatchOutcome::Exceeded
        );
        assert_eq!(
            rec.lines(),
            vec![
                "change a.png ready in 1",
                "change a.png uploading in 1",
                "success a.png",
                "change a.png success in 1",
                "exceed 2 over 1",
            ]
        );
        assert_eq!(uploader.files().await.len(), 1);
    }

    #[tokio::test]
    async fn change_sees_store_at_call_time() {
        let rec = Recorder::default();
        let mut config = config();
        config.auto_upload = false;
        let uploader = Uploader::spawn(config, rec.hooks(), MockTransport::ok(json!("")));

        accepted(uploader.accept(vec![file("a", 1), file("b", 1)]).await);
        let uids = accepted(uploader.accept(vec![file("c", 1)]).await);
        assert!(uploader.remove(uids[0]).await);

        assert_eq!(
            rec.lines(),
            vec![
                "change a ready in 1",
                "change b ready in 2",
                "change c ready in 3",
                "remove c",
            ]
        );
    }

    #[tokio::test]
    async fn max_sizes_counts_tracked_bytes() {
        let rec = Recorder::default();
        let mut config = config();
        config.max_sizes = Some(10);
        let uploader = Uploader::spawn(config, rec.hooks(), MockTransport::ok(json!("")));

        accepted(uploader.accept(vec![file("a", 6)]).await);
        assert_eq!(
            uploader.accept(vec![file("b", 6)]).await,
            BatchOutcome::Exceeded
        );
        accepted(uploader.accept(vec![file("c", 4)]).await);

        uploader.idle().await;
        assert_eq!(rec.count("exceed 1"), 1);
        assert_eq!(uploader.files().await.len(), 2);
    }

    #[tokio::test]
    async fn disabled_ignores_batches() {
        let rec = Recorder::default();
        let mut config = config();
        config.disabled = true;
        let uploader = Uploader::spawn(config, rec.hooks(), MockTransport::ok(json!("")));

        assert_eq!(
            uploader.accept(vec![file("a", 1)]).await,
            BatchOutcome::Disabled
        );
        assert!(uploader.files().await.is_empty());
        assert!(rec.lines().is_empty());
    }

    #[tokio::test]
    async fn before_upload_abort_drops_file() {
        let transport = MockTransport::ok(json!("ok"));
        let rec = Recorder::default();
        let hooks = rec
            .hooks()
            .before_upload(|raw| async move { BeforeUpload::from(raw.name != "skip.txt") });
        let uploader = Uploader::spawn(config(), hooks, transport.clone());

        accepted(
            uploader
                .accept(vec![file("keep.txt", 1), file("skip.txt", 1)])
                .await,
        );
        let files = uploader.idle().await;

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "keep.txt");
        assert_eq!(files[0].status, UploadStatus::Success);

        let lines = rec.lines();
        assert!(lines.contains(&"remove skip.txt".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("change skip.txt uploading")));
        assert!(!lines.iter().any(|l| l.starts_with("error")));

        let sent: Vec<_> = transport.requests().into_iter().map(|r| r.file.name).collect();
        assert_eq!(sent, vec!["keep.txt"]);
    }

    #[tokio::test]
    async fn before_upload_panic_counts_as_abort() {
        let transport = MockTransport::ok(json!("ok"));
        let rec = Recorder::default();
        let hooks = rec.hooks().before_upload(|raw| async move {
            if raw.size > 0 {
                panic!("hook failed");
            }
            BeforeUpload::Proceed
        });
        let uploader = Uploader::spawn(config(), hooks, transport.clone());

        accepted(uploader.accept(vec![file("a.txt", 1)]).await);
        let files = uploader.idle().await;

        assert!(files.is_empty());
        assert!(transport.requests().is_empty());
        assert_eq!(rec.count("remove a.txt"), 1);
    }

    #[tokio::test]
    async fn before_upload_replace_sends_substitute() {
        let transport = MockTransport::ok(json!("ok"));
        let hooks = Hooks::new().before_upload(|_| async move {
            BeforeUpload::Replace(RawFile::from_bytes("small.jpg", vec![1, 2]))
        });
        let uploader = Uploader::spawn(config(), hooks, transport.clone());

        accepted(uploader.accept(vec![file("big.png", 50)]).await);
        let files = uploader.idle().await;

        let requests = transport.requests();
        assert_eq!(requests[0].file.name, "small.jpg");
        assert_eq!(requests[0].file.size, 2);
        assert_eq!(files[0].name, "big.png");
        assert_eq!(files[0].size, 2);
    }

    #[tokio::test]
    async fn data_resolver_runs_per_file() {
        let transport = MockTransport::ok(json!("ok"));
        let mut config = config();
        config.data = UploadData::resolver(|raw| {
            let name = raw.name.clone();
            async move {
                let mut data = FormData::new();
                data.insert("source_name".into(), name.into());
                data
            }
        });
        let uploader = Uploader::spawn(config, Hooks::new(), transport.clone());

        accepted(uploader.accept(vec![file("a.txt", 1), file("b.txt", 1)]).await);
        uploader.idle().await;

        let mut source_names: Vec<_> = transport
            .requests()
            .into_iter()
            .map(|r| r.data["source_name"].clone())
            .collect();
        source_names.sort_by_key(|v| format!("{v:?}"));
        assert_eq!(
            source_names,
            vec![FormValue::Text("a.txt".into()), FormValue::Text("b.txt".into())]
        );
    }

    #[tokio::test]
    async fn remove_mid_upload_silences_outcome() {
        let rec = Recorder::default();
        let uploader = Uploader::spawn(config(), rec.hooks(), MockTransport::hanging());

        let uids = accepted(uploader.accept(vec![file("a.txt", 4)]).await);
        assert!(uploader.remove(uids[0]).await);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let files = uploader.idle().await;

        assert!(files.is_empty());
        assert_eq!(
            rec.lines(),
            vec![
                "change a.txt ready in 1",
                "change a.txt uploading in 1",
                "remove a.txt",
            ]
        );
    }

    #[tokio::test]
    async fn remove_twice_is_noop() {
        let rec = Recorder::default();
        let uploader = Uploader::spawn(config(), rec.hooks(), MockTransport::ok(json!("")));

        let uids = accepted(uploader.accept(vec![file("a.txt", 1)]).await);
        uploader.idle().await;

        assert!(uploader.remove(uids[0]).await);
        assert!(!uploader.remove(uids[0]).await);
        assert!(!uploader.remove(12345).await);
        assert_eq!(rec.count("remove"), 1);
    }

    #[tokio::test]
    async fn before_remove_can_veto() {
        let rec = Recorder::default();
        let hooks = rec
            .hooks()
            .before_remove(|record, list| async move { record.name == "ok.txt" && list.len() == 2 });
        let uploader = Uploader::spawn(config(), hooks, MockTransport::ok(json!("")));

        let uids = accepted(uploader.accept(vec![file("keep.txt", 1), file("ok.txt", 1)]).await);
        uploader.idle().await;

        assert!(!uploader.remove(uids[0]).await);
        assert!(uploader.remove(uids[1]).await);

        let files = uploader.files().await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "keep.txt");
        assert_eq!(rec.count("remove"), 1);
    }

    #[tokio::test]
    async fn manual_mode_waits_for_submit() {
        let transport = MockTransport::ok(json!("ok"));
        let rec = Recorder::default();
        let mut config = config();
        config.auto_upload = false;
        let uploader = Uploader::spawn(config, rec.hooks(), transport.clone());

        let uids = accepted(uploader.accept(vec![file("a", 1), file("b", 1), file("c", 1)]).await);
        let files = uploader.idle().await;
        assert!(files.iter().all(|f| f.status == UploadStatus::Ready));
        assert!(transport.requests().is_empty());

        uploader.upload(uids[0]);
        let files = uploader.idle().await;
        assert_eq!(files[0].status, UploadStatus::Success);
        assert_eq!(files[1].status, UploadStatus::Ready);

        uploader.submit();
        let files = uploader.idle().await;
        assert!(files.iter().all(|f| f.status == UploadStatus::Success));
        assert_eq!(transport.requests().len(), 3);
        assert_eq!(rec.count("success"), 3);
    }

    #[tokio::test]
    async fn abort_marks_fail() {
        let rec = Recorder::default();
        let uploader = Uploader::spawn(config(), rec.hooks(), MockTransport::hanging());

        let uids = accepted(uploader.accept(vec![file("a.txt", 4), file("b.txt", 4)]).await);
        uploader.abort(uids[0]);
        uploader.abort(uids[0]);
        let files = uploader.files().await;
        assert_eq!(files[0].status, UploadStatus::Fail);
        assert_eq!(files[1].status, UploadStatus::Uploading);
        assert_eq!(rec.count("error a.txt aborted"), 1);

        uploader.abort_all();
        let files = uploader.idle().await;
        assert!(files.iter().all(|f| f.status == UploadStatus::Fail));
        assert_eq!(rec.count("error"), 2);
        assert_eq!(rec.count("change b.txt fail"), 1);
    }

    #[tokio::test]
    async fn abort_during_before_upload_leaves_ready() {
        let transport = MockTransport::ok(json!("ok"));
        let gate = Arc::new(tokio::sync::Notify::new());
        let g = Arc::clone(&gate);
        let hooks = Hooks::new().before_upload(move |_| {
            let g = Arc::clone(&g);
            async move {
                g.notified().await;
                BeforeUpload::Proceed
            }
        });
        let uploader = Uploader::spawn(config(), hooks, transport.clone());

        let uids = accepted(uploader.accept(vec![file("a.txt", 1)]).await);
        uploader.abort(uids[0]);
        gate.notify_one();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let files = uploader.idle().await;
        assert_eq!(files[0].status, UploadStatus::Ready);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn stale_before_upload_decision_is_ignored() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::sync::Notify;

        let transport = MockTransport::ok(json!("ok"));
        let calls = Arc::new(AtomicUsize::new(0));
        let first = Arc::new(Notify::new());
        let second = Arc::new(Notify::new());
        let hooks = {
            let (calls, first, second) = (calls.clone(), first.clone(), second.clone());
            Hooks::new().before_upload(move |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                let (first, second) = (first.clone(), second.clone());
                async move {
                    if n == 0 {
                        first.notified().await;
                        BeforeUpload::Abort
                    } else {
                        second.notified().await;
                        BeforeUpload::Proceed
                    }
                }
            })
        };
        let mut config = config();
        config.auto_upload = false;
        let uploader = Uploader::spawn(config, hooks, transport.clone());

        let uids = accepted(uploader.accept(vec![file("a.txt", 1)]).await);
        uploader.upload(uids[0]);
        uploader.abort(uids[0]);
        uploader.upload(uids[0]);

        // The aborted attempt vetoes only after the file was resubmitted.
        first.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(uploader.files().await.len(), 1);

        second.notify_one();
        let files = uploader.idle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].status, UploadStatus::Success);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn reseeding_keeps_running_transfer() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let transport = {
            let gate = gate.clone();
            MockTransport::new(move |_, _, _| {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok(TransferResponse {
                        status: 200,
                        body: json!("ok"),
                    })
                }
            })
        };
        let uploader = Uploader::spawn(config(), Hooks::new(), transport);

        let uids = accepted(uploader.accept(vec![file("a.txt", 4)]).await);
        uploader.set_file_list(vec![
            UserFile {
                name: "a.txt".into(),
                uid: Some(uids[0]),
                ..UserFile::default()
            },
            UserFile {
                name: "old.png".into(),
                ..UserFile::default()
            },
        ]);

        let files = uploader.files().await;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].uid, uids[0]);
        assert_eq!(files[0].status, UploadStatus::Uploading);
        assert_eq!(files[1].status, UploadStatus::Success);

        gate.notify_one();
        let files = uploader.idle().await;
        assert_eq!(files[0].status, UploadStatus::Success);
        assert_eq!(files[0].response, Some(json!("ok")));
    }

    #[tokio::test]
    async fn clear_files_by_status() {
        let transport = MockTransport::new(|req, _, _| async move {
            if req.file.name == "bad.txt" {
                Err(TransferError::from_status(&req.method, &req.action, 500, "Internal Server Error", "boom"))
            } else {
                Ok(TransferResponse {
                    status: 200,
                    body: json!("ok"),
                })
            }
        });
        let rec = Recorder::default();
        let uploader = Uploader::spawn(config(), rec.hooks(), transport);

        accepted(uploader.accept(vec![file("good.txt", 1), file("bad.txt", 1)]).await);
        uploader.idle().await;
        let before = rec.lines().len();

        uploader.clear_files(&[UploadStatus::Fail]);
        let files = uploader.files().await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "good.txt");

        uploader.clear_files(&UploadStatus::ALL);
        assert!(uploader.files().await.is_empty());
        assert_eq!(rec.lines().len(), before);
    }

    #[tokio::test]
    async fn clear_cancels_running_transfer() {
        let rec = Recorder::default();
        let uploader = Uploader::spawn(config(), rec.hooks(), MockTransport::hanging());

        accepted(uploader.accept(vec![file("a.txt", 1)]).await);
        uploader.clear_files(&[UploadStatus::Uploading]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(uploader.idle().await.is_empty());
        assert_eq!(rec.count("error"), 0);
    }

    #[tokio::test]
    async fn file_list_seeds_records() {
        let rec = Recorder::default();
        let mut config = config();
        config.limit = Some(3);
        let uploader = Uploader::spawn(config, rec.hooks(), MockTransport::ok(json!("")));

        let seeded: Vec<UserFile> = serde_json::from_str(
            r#"[
                {"name":"a.png","uid":7,"url":"/f/a.png"},
                {"name":"b.png","size":3},
                {"name":"c.png","uid":7,"status":"fail"}
            ]"#,
        )
        .unwrap();
        uploader.set_file_list(seeded);

        let files = uploader.files().await;
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].uid, 7);
        assert_eq!(files[0].status, UploadStatus::Success);
        assert_eq!(files[0].url.as_deref(), Some("/f/a.png"));
        assert_eq!(files[1].size, 3);
        assert_ne!(files[2].uid, 7);
        assert_ne!(files[1].uid, files[2].uid);
        assert_eq!(files[2].status, UploadStatus::Fail);
        assert!(rec.lines().is_empty());

        assert_eq!(
            uploader.accept(vec![file("d.png", 1)]).await,
            BatchOutcome::Exceeded
        );
    }

    #[tokio::test]
    async fn preview_and_url() {
        let rec = Recorder::default();
        let uploader = Uploader::spawn(config(), rec.hooks(), MockTransport::ok(json!("")));

        let uids = accepted(uploader.accept(vec![file("a.txt", 1)]).await);
        uploader.preview(uids[0]);
        uploader.preview(999);
        uploader.set_url(uids[0], Some("/f/a.txt".into()));

        let record = uploader.get(uids[0]).await.unwrap();
        assert_eq!(record.url.as_deref(), Some("/f/a.txt"));
        assert_eq!(rec.count("preview"), 1);
    }

    #[tokio::test]
    async fn stopped_uploader_reports_stopped() {
        let uploader = Uploader::spawn(config(), Hooks::new(), MockTransport::hanging());
        accepted(uploader.accept(vec![file("a.txt", 1)]).await);

        uploader.shutdown();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            uploader.accept(vec![file("b.txt", 1)]).await,
            BatchOutcome::Stopped
        );
        assert!(!uploader.remove(1).await);
        assert!(uploader.files().await.is_empty());
    }

    #[tokio::test]
    async fn network_error_kind_reaches_hook() {
        let transport = MockTransport::new(|req, _, _| async move {
            Err(TransferError::network(&req.method, &req.action, "connection refused"))
        });
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let k = Arc::clone(&kinds);
        let hooks = Hooks::new().on_error(move |err, _, _| k.lock().unwrap().push(err.kind));
        let uploader = Uploader::spawn(config(), hooks, transport);

        accepted(uploader.accept(vec![file("a.txt", 1)]).await);
        uploader.idle().await;
        assert_eq!(*kinds.lock().unwrap(), vec![TransferErrorKind::Network]);
    }
}
