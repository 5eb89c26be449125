//! Persisted zone overrides
//!
//! The policy engine reads domain rules, policy overrides, and per-scheme
//! default zones from a `ZoneOverrideSource` at load time and on reload.

use super::policy::PolicyOverride;
use super::rules::ZoneRule;
use super::Zone;
use crate::config::{read_json_file, write_json_file};
use crate::error::{BindError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Everything an override store can contribute
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneOverrides {
    #[serde(default)]
    pub rules: Vec<ZoneRule>,

    #[serde(default)]
    pub policies: Vec<PolicyOverride>,

    /// scheme → zone for locators no rule matches
    #[serde(default)]
    pub scheme_defaults: HashMap<String, Zone>,
}

/// Source of zone overrides
pub trait ZoneOverrideSource: Send + Sync {
    fn load(&self) -> Result<ZoneOverrides>;

    fn save(&self, overrides: &ZoneOverrides) -> Result<()>;
}

/// Layout version written by `FileZoneOverrideSource`
pub const OVERRIDES_FORMAT_VERSION: u32 = 1;

fn format_version() -> u32 {
    OVERRIDES_FORMAT_VERSION
}

/// On-disk envelope; files without a version are read as version 1
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverridesDocument {
    #[serde(default = "format_version")]
    version: u32,

    #[serde(flatten)]
    overrides: ZoneOverrides,
}

/// JSON file-based override store
///
/// Files from a newer layout version are refused rather than half-read.
pub struct FileZoneOverrideSource {
    path: PathBuf,
}

impl FileZoneOverrideSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ZoneOverrideSource for FileZoneOverrideSource {
    fn load(&self) -> Result<ZoneOverrides> {
        let document: OverridesDocument = match read_json_file(&self.path, "zone overrides")? {
            Some(document) => document,
            None => return Ok(ZoneOverrides::default()),
        };
        if document.version > OVERRIDES_FORMAT_VERSION {
            return Err(BindError::Config(format!(
                "Zone overrides {} use layout version {}, newest supported is {}",
                self.path.display(),
                document.version,
                OVERRIDES_FORMAT_VERSION
            )));
        }

        let overrides = document.overrides;
        tracing::debug!(
            path = %self.path.display(),
            rules = overrides.rules.len(),
            policies = overrides.policies.len(),
            "Zone overrides loaded"
        );
        Ok(overrides)
    }

    fn save(&self, overrides: &ZoneOverrides) -> Result<()> {
        let document = OverridesDocument {
            version: OVERRIDES_FORMAT_VERSION,
            overrides: overrides.clone(),
        };
        write_json_file(&self.path, "zone overrides", &document)?;
        tracing::debug!(path = %self.path.display(), "Zone overrides saved");
        Ok(())
    }
}

/// In-memory override store for testing
#[derive(Default)]
pub struct MemoryZoneOverrideSource {
    overrides: std::sync::RwLock<ZoneOverrides>,
}

impl MemoryZoneOverrideSource {
    pub fn new(overrides: ZoneOverrides) -> Self {
        Self {
            overrides: std::sync::RwLock::new(overrides),
        }
    }
}

impl ZoneOverrideSource for MemoryZoneOverrideSource {
    fn load(&self) -> Result<ZoneOverrides> {
        let overrides = self.overrides.read().map_err(|e| {
            BindError::Config(format!("Failed to acquire override lock: {}", e))
        })?;
        Ok(overrides.clone())
    }

    fn save(&self, overrides: &ZoneOverrides) -> Result<()> {
        let mut current = self.overrides.write().map_err(|e| {
            BindError::Config(format!("Failed to acquire override lock: {}", e))
        })?;
        *current = overrides.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::policy::Verdict;

    fn sample() -> ZoneOverrides {
        let mut scheme_defaults = HashMap::new();
        scheme_defaults.insert("gopher".to_string(), Zone::Untrusted);
        ZoneOverrides {
            rules: vec![ZoneRule::new("*.corp.example", None, Zone::Intranet)],
            policies: vec![PolicyOverride {
                zone: Zone::Internet,
                action: 0x1400,
                verdict: Verdict::Disallow,
            }],
            scheme_defaults,
        }
    }

    #[test]
    fn test_memory_source_roundtrip() {
        let source = MemoryZoneOverrideSource::default();
        assert_eq!(source.load().unwrap(), ZoneOverrides::default());
        source.save(&sample()).unwrap();
        assert_eq!(source.load().unwrap(), sample());
    }

    #[test]
    fn test_file_source_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("zones.json");
        let source = FileZoneOverrideSource::new(&path);

        source.save(&sample()).unwrap();
        let files: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(files, vec![std::ffi::OsString::from("zones.json")]);

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["version"], OVERRIDES_FORMAT_VERSION);

        let loaded = source.load().unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn test_file_source_rejects_newer_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.json");
        std::fs::write(&path, r#"{"version": 9, "rules": []}"#).unwrap();
        assert!(matches!(
            FileZoneOverrideSource::new(&path).load(),
            Err(BindError::Config(_))
        ));
    }

    #[test]
    fn test_file_source_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileZoneOverrideSource::new(dir.path().join("none.json"));
        assert_eq!(source.load().unwrap(), ZoneOverrides::default());
    }

    #[test]
    fn test_file_source_parses_wire_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.json");
        std::fs::write(
            &path,
            r#"{
                "rules": [{"pattern": "example.com", "scheme": "*", "zone": "trusted"}],
                "policies": [{"zone": "internet", "action": 5120, "verdict": "disallow"}]
            }"#,
        )
        .unwrap();

        let loaded = FileZoneOverrideSource::new(&path).load().unwrap();
        assert_eq!(loaded.rules[0].zone, Zone::Trusted);
        assert_eq!(loaded.policies[0].verdict, Verdict::Disallow);
        assert!(loaded.scheme_defaults.is_empty());
    }

    #[test]
    fn test_file_source_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileZoneOverrideSource::new(&path).load(),
            Err(BindError::Config(_))
        ));
    }
}
