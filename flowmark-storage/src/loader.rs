//! Workflow definition loading.
//!
//! Definitions live under a root directory as `<name>.json`, `<name>.yaml`
//! or `<name>.yml`, tried in that order. Explicit paths with any other
//! extension are read as JSON.

use crate::error::StorageError;
use flowmark_core::{Definition, DefinitionRaw};
use std::fs;
use std::path::{Path, PathBuf};

/// Document format, picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Extensions tried by [`DefinitionLoader::load`], in order.
    pub const EXTENSIONS: [&'static str; 3] = ["json", "yaml", "yml"];

    /// `.yaml` and `.yml` are YAML; everything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Json,
        }
    }

    /// Parses a raw document in this format.
    pub fn parse(&self, content: &str) -> Result<DefinitionRaw, StorageError> {
        Ok(match self {
            DocumentFormat::Json => serde_json::from_str(content)?,
            DocumentFormat::Yaml => serde_yaml::from_str(content)?,
        })
    }
}

/// Loads workflow definitions by name from a directory.
#[derive(Debug, Clone)]
pub struct DefinitionLoader {
    root: PathBuf,
}

impl DefinitionLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the first existing definition file for `name`.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        DocumentFormat::EXTENSIONS
            .iter()
            .map(|ext| self.root.join(format!("{}.{}", name, ext)))
            .find(|path| path.is_file())
            .ok_or_else(|| StorageError::DefinitionNotFound {
                name: name.to_string(),
                root: self.root.clone(),
            })
    }

    /// Loads the raw document for `name` without building it.
    pub fn load_raw(&self, name: &str) -> Result<DefinitionRaw, StorageError> {
        let path = self.resolve(name)?;
        Self::load_raw_path(&path)
    }

    /// Loads and builds the definition for `name`.
    pub fn load(&self, name: &str) -> Result<Definition, StorageError> {
        let raw = self.load_raw(name)?;
        Ok(Definition::from_raw(raw)?)
    }

    /// Loads the raw document at an explicit path.
    pub fn load_raw_path(path: &Path) -> Result<DefinitionRaw, StorageError> {
        let format = DocumentFormat::from_path(path);
        let content = fs::read_to_string(path)?;
        let raw = format.parse(&content)?;

        tracing::info!("Loaded workflow definition '{}' from {}", raw.name, path.display());

        Ok(raw)
    }

    /// Loads and builds the definition at an explicit path.
    pub fn load_path(path: &Path) -> Result<Definition, StorageError> {
        let raw = Self::load_raw_path(path)?;
        Ok(Definition::from_raw(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmark_core::Mode;
    use tempfile::TempDir;

    const ORDER_JSON: &str = r#"{
        "name": "orders",
        "type": "workflow",
        "initialState": ["draft"],
        "places": {"draft": {}, "pending": {}},
        "transitions": {"initiate": {"from": "draft", "to": "pending"}}
    }"#;

    const LIGHT_YAML: &str = r#"
name: light
type: state_machine
initialState: red
places:
  red: {}
  green: {}
transitions:
  go: {from: red, to: green}
"#;

    #[test]
    fn test_load_json_by_name() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("orders.json"), ORDER_JSON).unwrap();

        let loader = DefinitionLoader::new(temp_dir.path());
        let def = loader.load("orders").unwrap();
        assert_eq!(def.name, "orders");
        assert_eq!(def.mode, Mode::MultiState);
    }

    #[test]
    fn test_load_yaml_by_name() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("light.yml"), LIGHT_YAML).unwrap();

        let loader = DefinitionLoader::new(temp_dir.path());
        let def = loader.load("light").unwrap();
        assert_eq!(def.mode, Mode::SingleState);
        assert!(def.has_place("green"));
    }

    #[test]
    fn test_json_tried_before_yaml() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("orders.json"), ORDER_JSON).unwrap();
        fs::write(temp_dir.path().join("orders.yaml"), LIGHT_YAML).unwrap();

        let loader = DefinitionLoader::new(temp_dir.path());
        let path = loader.resolve("orders").unwrap();
        assert_eq!(path.extension().unwrap(), "json");
    }

    #[test]
    fn test_missing_definition() {
        let temp_dir = TempDir::new().unwrap();
        let loader = DefinitionLoader::new(temp_dir.path());

        let err = loader.load("nothing").unwrap_err();
        assert!(matches!(err, StorageError::DefinitionNotFound { .. }));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(DocumentFormat::from_path(Path::new("a.yml")), DocumentFormat::Yaml);
        assert_eq!(DocumentFormat::from_path(Path::new("a.yaml")), DocumentFormat::Yaml);
        assert_eq!(DocumentFormat::from_path(Path::new("a.json")), DocumentFormat::Json);
        assert_eq!(DocumentFormat::from_path(Path::new("a.wf")), DocumentFormat::Json);
        assert_eq!(DocumentFormat::from_path(Path::new("workflow")), DocumentFormat::Json);
    }

    #[test]
    fn test_other_extension_read_as_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("orders.workflow");
        fs::write(&path, ORDER_JSON).unwrap();

        let def = DefinitionLoader::load_path(&path).unwrap();
        assert_eq!(def.name, "orders");

        let path = temp_dir.path().join("orders.toml");
        fs::write(&path, "name = 'orders'").unwrap();
        let err = DefinitionLoader::load_path(&path).unwrap_err();
        assert!(matches!(err, StorageError::Json(_)));
        assert_eq!(err.error_code(), "INVALID_DEFINITION");
    }

    #[test]
    fn test_invalid_definition_surfaces_core_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        fs::write(
            &path,
            r#"{"name": "bad", "initialState": "nowhere", "places": {"a": {}}}"#,
        )
        .unwrap();

        let err = DefinitionLoader::load_path(&path).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_DEFINITION");
        assert!(matches!(err, StorageError::Core(_)));

        // Raw loading still succeeds
        let raw = DefinitionLoader::load_raw_path(&path).unwrap();
        assert_eq!(raw.name, "bad");
    }
}
