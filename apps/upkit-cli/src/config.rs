//! CLI configuration management.
//!
//! Configuration is stored as TOML at `~/.config/upkit/upload.toml`, or at
//! the path named by `UPKIT_CONFIG`:
//!
//! ```toml
//! [upload]
//! action = "https://example.com/upload"
//! multiple = true
//! limit = 10
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use upkit_upload::UploadConfig;

/// CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Uploader options.
    #[serde(default)]
    pub upload: UploadConfig,
}

impl Config {
    /// Loads configuration from `path`, or creates a default there if not found.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the configuration file path.
pub fn config_path() -> PathBuf {
    resolve_path(std::env::var_os("UPKIT_CONFIG"), std::env::var_os("HOME"))
}

fn resolve_path(explicit: Option<OsString>, home: Option<OsString>) -> PathBuf {
    if let Some(path) = explicit.filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    let home = home.unwrap_or_else(|| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("upkit")
        .join("upload.toml")
}
