//! Data types shared by the store, the coordinator and transports.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Process-unique identifier of a tracked file.
pub type Uid = u64;

/// Upload status of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Ready,
    Uploading,
    Success,
    Fail,
}

impl UploadStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [UploadStatus; 4] = [
        UploadStatus::Ready,
        UploadStatus::Uploading,
        UploadStatus::Success,
        UploadStatus::Fail,
    ];

    /// Returns `true` for `success` and `fail`.
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Success | UploadStatus::Fail)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadStatus::Ready => "ready",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Success => "success",
            UploadStatus::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Where the bytes of a file live.
#[derive(Clone)]
pub enum FileSource {
    /// Contents held in memory.
    Memory(Arc<[u8]>),
    /// Contents read from disk when the transfer starts.
    Path(PathBuf),
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSource::Memory(data) => write!(f, "Memory({} bytes)", data.len()),
            FileSource::Path(path) => write!(f, "Path({})", path.display()),
        }
    }
}

/// A user-selected file payload.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub name: String,
    pub content_type: Option<String>,
    pub size: u64,
    pub source: FileSource,
}

impl RawFile {
    /// Wraps in-memory contents. The content type is guessed from the name.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        let data: Arc<[u8]> = Arc::from(data.into());
        Self {
            content_type: detect_content_type(&name).map(str::to_string),
            size: data.len() as u64,
            name,
            source: FileSource::Memory(data),
        }
    }

    /// Describes a file on disk. Only metadata is read here.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            content_type: detect_content_type(&name).map(str::to_string),
            size: meta.len(),
            name,
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    /// Overrides the guessed content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A tracked file and its upload state.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub uid: Uid,
    pub name: String,
    pub size: u64,
    pub status: UploadStatus,
    /// 0–100, meaningful while `status` is `uploading`.
    pub percentage: u8,
    pub raw: Option<RawFile>,
    /// Parsed response body, set on success.
    pub response: Option<serde_json::Value>,
    pub url: Option<String>,
}

impl FileRecord {
    /// Creates a `ready` record for a freshly selected file.
    pub fn ready(uid: Uid, raw: RawFile) -> Self {
        Self {
            uid,
            name: raw.name.clone(),
            size: raw.size,
            status: UploadStatus::Ready,
            percentage: 0,
            raw: Some(raw),
            response: None,
            url: None,
        }
    }
}

/// A caller-supplied entry of an existing file list.
///
/// Missing `uid` and `status` are filled in when the list is seeded
/// (fresh id, `success`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFile {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub status: Option<UploadStatus>,
    #[serde(default)]
    pub uid: Option<Uid>,
    #[serde(default)]
    pub percentage: Option<u8>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub response: Option<serde_json::Value>,
    #[serde(skip)]
    pub raw: Option<RawFile>,
}

/// Upload progress of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Bytes handed to the transport so far.
    pub loaded: u64,
    /// Total bytes of the payload (0 when unknown).
    pub total: u64,
    /// `loaded / total` as an integer percentage, clamped to 0–100.
    pub percent: u8,
}

impl ProgressEvent {
    pub fn new(loaded: u64, total: u64) -> Self {
        let percent = if total == 0 {
            0
        } else {
            (loaded.saturating_mul(100) / total).min(100) as u8
        };
        Self {
            loaded,
            total,
            percent,
        }
    }

    /// Builds an event from a bare percentage (for transports without byte counts).
    pub fn from_percent(percent: u8) -> Self {
        let percent = percent.min(100);
        Self {
            loaded: u64::from(percent),
            total: 100,
            percent,
        }
    }
}

/// A value of an extra multipart field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormValue {
    Text(String),
    /// Sent as one field per element, all under the same name.
    List(Vec<String>),
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        FormValue::Text(value.to_string())
    }
}

impl From<String> for FormValue {
    fn from(value: String) -> Self {
        FormValue::Text(value)
    }
}

impl From<Vec<String>> for FormValue {
    fn from(values: Vec<String>) -> Self {
        FormValue::List(values)
    }
}

/// Extra form fields sent alongside the file.
pub type FormData = BTreeMap<String, FormValue>;

/// Flattens form data into `(name, value)` pairs, expanding lists into
/// repeated fields.
pub fn form_fields(data: &FormData) -> Vec<(&str, &str)> {
    let mut fields = Vec::with_capacity(data.len());
    for (key, value) in data {
        match value {
            FormValue::Text(text) => fields.push((key.as_str(), text.as_str())),
            FormValue::List(items) => {
                fields.extend(items.iter().map(|item| (key.as_str(), item.as_str())));
            }
        }
    }
    fields
}

/// Guesses a MIME type from a file name's extension.
pub fn detect_content_type(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("webp") => Some("image/webp"),
        Some("gif") => Some("image/gif"),
        Some("svg") => Some("image/svg+xml"),
        Some("ico") => Some("image/x-icon"),
        Some("pdf") => Some("application/pdf"),
        Some("json") => Some("application/json"),
        Some("zip") => Some("application/zip"),
        Some("txt") => Some("text/plain"),
        Some("csv") => Some("text/csv"),
        Some("html" | "htm") => Some("text/html"),
        Some("mp4") => Some("video/mp4"),
        Some("mp3") => Some("audio/mpeg"),
        _ => None,
    }
}
