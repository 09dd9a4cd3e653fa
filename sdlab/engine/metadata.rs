use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::series::DisplayMetadata;

/// One output variable the pipeline extracts from the model table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableMetadata {
    /// Record id.
    pub id: u32,
    /// Chart title.
    pub title: String,
    /// X axis label.
    pub x_label: String,
    /// Y axis label.
    pub y_label: String,
    /// Ordering key.
    pub position: i32,
    /// Model column to extract.
    pub variable_name: String,
    /// Line color.
    pub color_name: String,
}

impl VariableMetadata {
    /// Display labels carried into the result.
    #[must_use]
    pub fn display(&self) -> DisplayMetadata {
        DisplayMetadata {
            title: self.title.clone(),
            x_label: self.x_label.clone(),
            y_label: self.y_label.clone(),
            color: self.color_name.clone(),
        }
    }
}

/// Supplies the ordered list of output variables.
pub trait MetadataSource: Send + Sync {
    /// Returns records sorted by `position`.
    fn fetch(&self) -> Result<Vec<VariableMetadata>>;
}

/// In-memory records.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataSource {
    records: Vec<VariableMetadata>,
}

impl StaticMetadataSource {
    /// Wraps records, sorting them by position.
    #[must_use]
    pub fn new(mut records: Vec<VariableMetadata>) -> Self {
        records.sort_by_key(|record| record.position);
        Self { records }
    }
}

impl MetadataSource for StaticMetadataSource {
    fn fetch(&self) -> Result<Vec<VariableMetadata>> {
        Ok(self.records.clone())
    }
}

/// Reads a TOML `[[variables]]` list on every fetch.
#[derive(Debug, Clone)]
pub struct FileMetadataSource {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct MetadataDocument {
    #[serde(default)]
    variables: Vec<VariableMetadata>,
}

impl FileMetadataSource {
    /// Creates a source for the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetadataSource for FileMetadataSource {
    fn fetch(&self) -> Result<Vec<VariableMetadata>> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading variable metadata {}", self.path.display()))?;
        let document: MetadataDocument = toml::from_str(&raw)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        if let Some(record) = document
            .variables
            .iter()
            .find(|record| record.variable_name.trim().is_empty())
        {
            bail!("metadata record {} has an empty variable_name", record.id);
        }
        let mut records = document.variables;
        records.sort_by_key(|record| record.position);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(id: u32, position: i32, variable: &str) -> VariableMetadata {
        VariableMetadata {
            id,
            title: variable.to_string(),
            x_label: "Meses".into(),
            y_label: "Valor".into(),
            position,
            variable_name: variable.to_string(),
            color_name: "#22c55e".into(),
        }
    }

    #[test]
    fn static_source_orders_by_position() {
        let source = StaticMetadataSource::new(vec![record(1, 2, "b"), record(2, 1, "a")]);
        let names: Vec<_> = source
            .fetch()
            .unwrap()
            .into_iter()
            .map(|r| r.variable_name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn file_source_reads_shipped_metadata() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../models/metadata.toml");
        let records = FileMetadataSource::new(path).fetch().unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].variable_name, "Poblacion inmigrante");
        assert!(records.windows(2).all(|w| w[0].position <= w[1].position));
    }

    #[test]
    fn file_source_reports_missing_and_invalid_files() {
        let dir = tempdir().unwrap();
        assert!(FileMetadataSource::new(dir.path().join("none.toml"))
            .fetch()
            .is_err());
        let path = dir.path().join("bad.toml");
        fs::write(
            &path,
            "[[variables]]\nid = 1\ntitle = \"t\"\nx_label = \"x\"\ny_label = \"y\"\nposition = 1\nvariable_name = \" \"\ncolor_name = \"red\"\n",
        )
        .unwrap();
        let err = FileMetadataSource::new(&path).fetch().unwrap_err();
        assert!(err.to_string().contains("empty variable_name"));
    }
}
