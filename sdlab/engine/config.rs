use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use shared_logging::LogLevel;

use crate::indicators::SecurityInputs;

/// Lab configuration loaded from TOML. Relative paths are resolved against
/// the directory of the configuration file.
#[derive(Debug, Clone)]
pub struct LabConfig {
    /// Stock/flow model definition.
    pub model_path: PathBuf,
    /// Output variable metadata.
    pub metadata_path: PathBuf,
    /// Preview rows per variable.
    pub preview_len: usize,
    /// JSON-lines log file.
    pub log_path: Option<PathBuf>,
    /// Minimum log level.
    pub log_level: LogLevel,
    /// JSON-lines event file.
    pub event_log_path: Option<PathBuf>,
    /// Security index settings.
    pub security_index: SecurityIndexConfig,
}

/// `[security_index]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityIndexConfig {
    /// Whether the indicator is derived.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// At-large population column.
    #[serde(default = "default_at_large")]
    pub at_large: String,
    /// Active capacity column.
    #[serde(default = "default_capacity")]
    pub capacity: String,
    /// Resolved count column.
    #[serde(default = "default_resolved")]
    pub resolved: String,
}

impl Default for SecurityIndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            at_large: default_at_large(),
            capacity: default_capacity(),
            resolved: default_resolved(),
        }
    }
}

impl SecurityIndexConfig {
    /// Input columns of the indicator.
    #[must_use]
    pub fn inputs(&self) -> SecurityInputs {
        SecurityInputs {
            at_large: self.at_large.clone(),
            capacity: self.capacity.clone(),
            resolved: self.resolved.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LabConfigSerde {
    #[serde(default = "default_model_path")]
    model_path: PathBuf,
    #[serde(default = "default_metadata_path")]
    metadata_path: PathBuf,
    #[serde(default = "default_preview_len")]
    preview_len: usize,
    #[serde(default)]
    log_path: Option<PathBuf>,
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    event_log_path: Option<PathBuf>,
    #[serde(default)]
    security_index: SecurityIndexConfig,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            metadata_path: default_metadata_path(),
            preview_len: default_preview_len(),
            log_path: None,
            log_level: LogLevel::Info,
            event_log_path: None,
            security_index: SecurityIndexConfig::default(),
        }
    }
}

impl LabConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading lab config {}", path.display()))?;
        let source_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::parse(&raw, &source_dir).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses configuration text, resolving relative paths against `base`.
    pub fn parse(raw: &str, base: &Path) -> Result<Self> {
        let document: LabConfigSerde = toml::from_str(raw)?;
        if document.preview_len == 0 {
            bail!("preview_len must be at least 1");
        }
        let security = &document.security_index;
        if security.enabled
            && [&security.at_large, &security.capacity, &security.resolved]
                .iter()
                .any(|name| name.trim().is_empty())
        {
            bail!("security_index columns must not be empty");
        }
        let log_level = match document.log_level.as_deref() {
            Some(raw) => LogLevel::parse(raw)
                .with_context(|| format!("unknown log_level \"{raw}\""))?,
            None => LogLevel::Info,
        };
        let resolve = |candidate: PathBuf| {
            if candidate.is_absolute() {
                candidate
            } else {
                base.join(candidate)
            }
        };
        Ok(Self {
            model_path: resolve(document.model_path),
            metadata_path: resolve(document.metadata_path),
            preview_len: document.preview_len,
            log_path: document.log_path.map(resolve),
            log_level,
            event_log_path: document.event_log_path.map(resolve),
            security_index: document.security_index,
        })
    }
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/forrester.toml")
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("models/metadata.toml")
}

const fn default_preview_len() -> usize {
    10
}

const fn default_true() -> bool {
    true
}

fn default_at_large() -> String {
    SecurityInputs::default().at_large
}

fn default_capacity() -> String {
    SecurityInputs::default().capacity
}

fn default_resolved() -> String {
    SecurityInputs::default().resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolves_paths_relative_to_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sdlab.toml");
        fs::write(
            &path,
            r#"
                model_path = "m/model.toml"
                log_path = "/var/log/sdlab.jsonl"
                log_level = "warn"
                preview_len = 5

                [security_index]
                capacity = "Guards"
            "#,
        )
        .unwrap();
        let config = LabConfig::load(&path).unwrap();
        assert_eq!(config.model_path, dir.path().join("m/model.toml"));
        assert_eq!(config.metadata_path, dir.path().join("models/metadata.toml"));
        assert_eq!(config.log_path, Some(PathBuf::from("/var/log/sdlab.jsonl")));
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.preview_len, 5);
        assert_eq!(config.security_index.inputs().capacity, "Guards");
        assert_eq!(
            config.security_index.at_large,
            "Delincuentes en la calle"
        );
    }

    #[test]
    fn rejects_invalid_values() {
        let base = Path::new(".");
        assert!(LabConfig::parse("preview_len = 0", base).is_err());
        assert!(LabConfig::parse("log_level = \"loud\"", base).is_err());
        assert!(LabConfig::parse("unknown = 1", base).is_err());
        assert!(LabConfig::parse("[security_index]\nresolved = \"\"", base).is_err());
        assert!(LabConfig::parse(
            "[security_index]\nenabled = false\nresolved = \"\"",
            base
        )
        .is_ok());
    }

    #[test]
    fn defaults_match_shipped_layout() {
        let config = LabConfig::default();
        assert_eq!(config.preview_len, 10);
        assert!(config.security_index.enabled);
        assert_eq!(config.model_path, PathBuf::from("models/forrester.toml"));
    }
}
