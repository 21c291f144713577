//! Uploader options.
//!
//! Deserializes from TOML/JSON with per-field defaults, so a config file
//! only needs the keys it changes:
//!
//! ```toml
//! action = "https://example.com/upload"
//! limit = 5
//!
//! [headers]
//! authorization = "Bearer abc"
//!
//! [data]
//! album = "holiday"
//! tags = ["beach", "sun"]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;
use crate::hooks::HookFuture;
use crate::types::{FormData, RawFile};

type DataResolver = Arc<dyn Fn(&RawFile) -> HookFuture<FormData> + Send + Sync>;

/// Extra form fields: fixed, or computed per file.
#[derive(Clone)]
pub enum UploadData {
    Static(FormData),
    Resolver(DataResolver),
}

impl Default for UploadData {
    fn default() -> Self {
        UploadData::Static(FormData::new())
    }
}

impl fmt::Debug for UploadData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadData::Static(data) => f.debug_tuple("Static").field(data).finish(),
            UploadData::Resolver(_) => f.write_str("Resolver"),
        }
    }
}

impl From<FormData> for UploadData {
    fn from(data: FormData) -> Self {
        UploadData::Static(data)
    }
}

impl UploadData {
    /// Computes the fields from each file right before its transfer.
    pub fn resolver<F, Fut>(f: F) -> Self
    where
        F: Fn(&RawFile) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FormData> + Send + 'static,
    {
        UploadData::Resolver(Arc::new(move |raw| -> HookFuture<FormData> {
            Box::pin(f(raw))
        }))
    }

    pub(crate) async fn resolve(&self, raw: &RawFile) -> FormData {
        match self {
            UploadData::Static(data) => data.clone(),
            UploadData::Resolver(f) => f(raw).await,
        }
    }
}

impl Serialize for UploadData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            UploadData::Static(data) => data.serialize(serializer),
            UploadData::Resolver(_) => FormData::new().serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for UploadData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        FormData::deserialize(deserializer).map(UploadData::Static)
    }
}

/// Options of one uploader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Target URL of every transfer.
    #[serde(default = "default_action")]
    pub action: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// Headers sent with every request; `None` values are left out.
    #[serde(default, serialize_with = "serialize_headers")]
    pub headers: BTreeMap<String, Option<String>>,

    #[serde(default)]
    pub data: UploadData,

    /// Form field name of the file part.
    #[serde(default = "default_name")]
    pub name: String,

    /// Whether the selection surface may pick several files at once.
    #[serde(default)]
    pub multiple: bool,

    #[serde(default)]
    pub with_credentials: bool,

    /// Selection filter hint (`.png, image/*`); never enforced by the coordinator.
    #[serde(default)]
    pub accept: String,

    #[serde(default = "default_true")]
    pub auto_upload: bool,

    /// Maximum number of tracked records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Maximum cumulative size in bytes of tracked records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sizes: Option<u64>,

    /// A disabled uploader ignores new batches.
    #[serde(default)]
    pub disabled: bool,
}

fn default_action() -> String {
    "#".into()
}

fn default_method() -> String {
    "post".into()
}

fn default_name() -> String {
    "file".into()
}

fn default_true() -> bool {
    true
}

fn serialize_headers<S: Serializer>(
    headers: &BTreeMap<String, Option<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let present: BTreeMap<&str, &str> = headers
        .iter()
        .filter_map(|(k, v)| v.as_deref().map(|v| (k.as_str(), v)))
        .collect();
    present.serialize(serializer)
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            action: default_action(),
            method: default_method(),
            headers: BTreeMap::new(),
            data: UploadData::default(),
            name: default_name(),
            multiple: false,
            with_credentials: false,
            accept: String::new(),
            auto_upload: default_true(),
            limit: None,
            max_sizes: None,
            disabled: false,
        }
    }
}

impl UploadConfig {
    /// Creates a config targeting `action` with defaults for everything else.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Self::default()
        }
    }

    /// Checks the options a transfer cannot do without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.action.trim().is_empty() || self.action == "#" {
            return Err(ConfigError::MissingAction);
        }
        if self.method.is_empty() || !self.method.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(ConfigError::InvalidMethod(self.method.clone()));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidFieldName(self.name.clone()));
        }
        Ok(())
    }

    /// Whether `file` passes the `accept` filter.
    pub fn accepts(&self, file: &RawFile) -> bool {
        accept_matches(&self.accept, &file.name, file.content_type.as_deref())
    }

    pub(crate) fn header_list(&self) -> Vec<(String, Option<String>)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Matches a file against an `accept` list of `.ext`, `type/*` and
/// `type/subtype` entries. An empty list accepts everything.
pub fn accept_matches(accept: &str, name: &str, content_type: Option<&str>) -> bool {
    let mut entries = accept
        .split(',')
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .peekable();

    if entries.peek().is_none() {
        return true;
    }

    let name = name.to_lowercase();
    let content_type = content_type.map(str::to_lowercase);

    entries.any(|entry| {
        if entry.starts_with('.') {
            name.ends_with(&entry)
        } else if let Some(major) = entry.strip_suffix("/*") {
            content_type
                .as_deref()
                .and_then(|ct| ct.split_once('/'))
                .is_some_and(|(m, _)| m == major)
        } else {
            content_type.as_deref() == Some(entry.as_str())
        }
    })
}
