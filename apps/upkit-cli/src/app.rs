//! Application orchestrator: turns command-line paths into upload batches.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use upkit_http_transfer::HttpTransport;
use upkit_upload::{BatchOutcome, FileRecord, Hooks, RawFile, UploadStatus, Uploader};

use crate::config::Config;

const USAGE: &str = "usage: upkit [--action URL] FILE...";

/// Parsed command line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Args {
    /// Overrides `upload.action` from the config file.
    pub action: Option<String>,
    pub paths: Vec<PathBuf>,
}

impl Args {
    pub fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut parsed = Args::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--action" | "-a" => {
                    let action = args.next().context(USAGE)?;
                    parsed.action = Some(action);
                }
                "--" => parsed.paths.extend(args.by_ref().map(PathBuf::from)),
                "-h" | "--help" => bail!(USAGE),
                flag if flag.starts_with('-') && flag.len() > 1 => {
                    bail!("unknown option {flag}\n{USAGE}")
                }
                _ => parsed.paths.push(PathBuf::from(arg)),
            }
        }
        if parsed.paths.is_empty() {
            bail!(USAGE);
        }
        Ok(parsed)
    }
}

/// Uploads the given files and waits for every transfer to settle.
pub async fn run(config: Config, args: Args, config_path: &Path) -> anyhow::Result<()> {
    let mut options = config.upload;
    if let Some(action) = args.action {
        options.action = action;
    }
    options.validate().with_context(|| {
        format!(
            "set `upload.action` in {} or pass --action",
            config_path.display()
        )
    })?;

    let mut files = Vec::with_capacity(args.paths.len());
    for path in &args.paths {
        let raw = RawFile::from_path(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        if !options.accepts(&raw) {
            tracing::warn!(name = %raw.name, accept = %options.accept, "file does not match accept filter, skipping");
            continue;
        }
        files.push(raw);
    }
    if files.is_empty() {
        bail!("no files left to upload");
    }

    let transport = Arc::new(HttpTransport::new()?);
    let auto_upload = options.auto_upload;
    let uploader = Uploader::spawn(options.clone(), logging_hooks(), transport);

    let mut rejected = 0;
    for batch in batches(files, options.multiple) {
        let count = batch.len();
        match uploader.accept(batch).await {
            BatchOutcome::Accepted(uids) => tracing::debug!(?uids, "batch accepted"),
            BatchOutcome::Exceeded => rejected += count,
            BatchOutcome::Disabled => bail!("uploads are disabled in {}", config_path.display()),
            BatchOutcome::Stopped => bail!("uploader stopped unexpectedly"),
        }
    }
    if !auto_upload {
        uploader.submit();
    }

    let records = tokio::select! {
        records = uploader.idle() => records,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, aborting uploads");
            uploader.abort_all();
            uploader.idle().await
        }
    };
    uploader.shutdown();

    let summary = Summary::of(&records, rejected);
    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        pending = summary.pending,
        rejected = summary.rejected,
        "uploads finished"
    );
    summary.check()
}

/// One batch with every file when `multiple` is set, else one batch per file.
fn batches(files: Vec<RawFile>, multiple: bool) -> Vec<Vec<RawFile>> {
    if multiple {
        vec![files]
    } else {
        files.into_iter().map(|f| vec![f]).collect()
    }
}

fn logging_hooks() -> Hooks {
    Hooks::new()
        .on_exceed(|files, list| {
            tracing::warn!(
                files = files.len(),
                tracked = list.len(),
                "batch exceeds the configured limits, skipped"
            );
        })
        .on_progress(|event, record, _| {
            tracing::debug!(name = %record.name, percent = event.percent, "uploading");
        })
        .on_success(|response, record, _| {
            tracing::info!(name = %record.name, %response, "uploaded");
        })
        .on_error(|err, record, _| {
            tracing::error!(name = %record.name, status = err.status, error = %err, "upload failed");
        })
        .on_remove(|record, _| {
            tracing::info!(name = %record.name, "skipped");
        })
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    succeeded: usize,
    failed: usize,
    pending: usize,
    /// Files in batches refused by `limit` or `max_sizes`.
    rejected: usize,
}

impl Summary {
    fn of(records: &[FileRecord], rejected: usize) -> Self {
        let mut summary = Summary {
            rejected,
            ..Summary::default()
        };
        for record in records {
            if !record.status.is_terminal() {
                summary.pending += 1;
            } else if record.status == UploadStatus::Success {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }
        summary
    }

    fn check(&self) -> anyhow::Result<()> {
        let total = self.succeeded + self.failed + self.pending + self.rejected;
        if self.failed > 0 {
            bail!("{} of {} uploads failed", self.failed, total);
        }
        if self.rejected > 0 {
            bail!("{} of {} files exceeded the upload limits", self.rejected, total);
        }
        Ok(())
    }
}
