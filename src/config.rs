//! Session configuration

use crate::error::{BindError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Knobs shared by every bind started from one `InternetSession`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Redirects followed per bind before failing with `RedirectFailed`
    pub max_redirects: u32,

    /// Follow redirects when the callback has no redirect approver
    pub auto_redirect: bool,

    /// Buffer size `BindingSession::read_available` reads with
    pub read_chunk_size: usize,

    /// Treat dotless hosts as Intranet
    pub intranet_dotless_hosts: bool,

    /// User-Agent sent when the callback supplies none
    pub user_agent: String,

    /// Interpose registered MIME filters
    pub enable_mime_filters: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_redirects: 20,
            auto_redirect: true,
            read_chunk_size: 8192,
            intranet_dotless_hosts: true,
            user_agent: format!("a3s-bind/{}", env!("CARGO_PKG_VERSION")),
            enable_mime_filters: true,
        }
    }
}

impl SessionConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)
            .map_err(|e| BindError::Config(format!("Invalid session config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: SessionConfig = read_json_file(path, "session config")?.ok_or_else(|| {
            BindError::Config(format!("Session config {} not found", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Persist as pretty JSON, replacing any existing file atomically
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.validate()?;
        write_json_file(path.as_ref(), "session config", self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_chunk_size == 0 {
            return Err(BindError::Config(
                "readChunkSize must be greater than zero".to_string(),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(BindError::Config("userAgent must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Read a JSON document; `None` when the file does not exist
pub(crate) fn read_json_file<T: DeserializeOwned>(path: &Path, what: &str) -> Result<Option<T>> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(BindError::Config(format!(
                "Failed to read {} {}: {}",
                what,
                path.display(),
                e
            )))
        }
    };
    serde_json::from_str(&json).map(Some).map_err(|e| {
        BindError::Config(format!("Failed to parse {} {}: {}", what, path.display(), e))
    })
}

/// Write a JSON document through a hidden sibling file and rename it into place
pub(crate) fn write_json_file<T: Serialize>(path: &Path, what: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| BindError::Config(format!("{} path {} names no file", what, path.display())))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| {
        BindError::Config(format!("Failed to create {} directory {}: {}", what, dir.display(), e))
    })?;

    let staging = dir.join(format!(".{}.{}.tmp", file_name, std::process::id()));
    std::fs::write(&staging, json).map_err(|e| {
        BindError::Config(format!("Failed to write {} {}: {}", what, staging.display(), e))
    })?;
    if let Err(e) = std::fs::rename(&staging, path) {
        if let Err(cleanup) = std::fs::remove_file(&staging) {
            tracing::warn!(path = %staging.display(), error = %cleanup, "Staging file left behind");
        }
        return Err(BindError::Config(format!(
            "Failed to replace {} {}: {}",
            what,
            path.display(),
            e
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_redirects, 20);
        assert!(config.auto_redirect);
        assert_eq!(config.read_chunk_size, 8192);
        assert!(config.user_agent.starts_with("a3s-bind/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = SessionConfig::from_json(r#"{"maxRedirects": 3, "autoRedirect": false}"#)
            .unwrap();
        assert_eq!(config.max_redirects, 3);
        assert!(!config.auto_redirect);
        assert!(config.enable_mime_filters);
    }

    #[test]
    fn test_from_json_rejects_bad_values() {
        assert!(matches!(
            SessionConfig::from_json(r#"{"readChunkSize": 0}"#),
            Err(BindError::Config(_))
        ));
        assert!(matches!(
            SessionConfig::from_json("not json"),
            Err(BindError::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bind.json");
        std::fs::write(&path, r#"{"userAgent": "bindtool/1.0"}"#).unwrap();

        let config = SessionConfig::from_file(&path).unwrap();
        assert_eq!(config.user_agent, "bindtool/1.0");

        assert!(matches!(
            SessionConfig::from_file(dir.path().join("missing.json")),
            Err(BindError::Config(_))
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("bind.json");
        let config = SessionConfig {
            max_redirects: 5,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(SessionConfig::from_file(&path).unwrap(), config);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("bind.json")]);

        let invalid = SessionConfig {
            read_chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(invalid.save(&path), Err(BindError::Config(_))));
    }
}
