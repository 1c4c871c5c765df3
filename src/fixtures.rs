//! Resource definitions for scenarios
//!
//! Steps refer to request bodies by short name ("`demo`", "`demo-update`").
//! A [`FixtureResolver`] turns `(apiVersion, kind, name)` into the body.
//!
//! [`DefinitionDir`] reads them from YAML files named
//! `{apiVersion}_{kind}_{name}.yaml`, with every `/` replaced by `_`:
//!
//! ```text
//! tests/definitions/
//!   v1_ConfigMap_demo.yaml
//!   rbac.authorization.k8s.io_v1_RoleBinding_viewer.yaml
//! ```
//!
//! # Example
//!
//! ```ignore
//! let defs = DefinitionDir::new("tests/definitions");
//! let body = defs.resolve("apps/v1", "Deployment", "web")?;
//! ```

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Errors loading a definition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FixtureError {
    #[error("definition not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

/// Looks up request bodies by resource type and short name
pub trait FixtureResolver: Send + Sync {
    fn resolve(&self, api_version: &str, kind: &str, name: &str) -> Result<Value, FixtureError>;
}

/// File name for a definition, e.g. `apps_v1_Deployment_web.yaml`
#[must_use]
pub fn definition_file_name(api_version: &str, kind: &str, name: &str) -> String {
    format!("{api_version}_{kind}_{name}.yaml").replace('/', "_")
}

/// Directory of YAML definitions
#[derive(Debug, Clone)]
pub struct DefinitionDir {
    root: PathBuf,
}

impl DefinitionDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path a definition is read from
    #[must_use]
    pub fn path_for(&self, api_version: &str, kind: &str, name: &str) -> PathBuf {
        self.root.join(definition_file_name(api_version, kind, name))
    }
}

impl FixtureResolver for DefinitionDir {
    fn resolve(&self, api_version: &str, kind: &str, name: &str) -> Result<Value, FixtureError> {
        let path = self.path_for(api_version, kind, name);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FixtureError::NotFound { path: path.clone() }
            } else {
                FixtureError::Io {
                    path: path.clone(),
                    message: e.to_string(),
                }
            }
        })?;
        parse_definition(&path, &text)
    }
}

fn parse_definition(path: &Path, text: &str) -> Result<Value, FixtureError> {
    let value: Value = serde_yaml::from_str(text).map_err(|e| FixtureError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    if value.is_null() {
        return Err(FixtureError::Parse {
            path: path.to_path_buf(),
            message: "definition is empty".to_string(),
        });
    }
    Ok(value)
}

/// Definitions held in memory, keyed like [`DefinitionDir`] file names
///
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct InlineFixtures {
    bodies: Arc<Mutex<HashMap<String, Value>>>,
}

impl InlineFixtures {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition
    #[must_use]
    pub fn with(self, api_version: &str, kind: &str, name: &str, body: Value) -> Self {
        self.insert(api_version, kind, name, body);
        self
    }

    pub fn insert(&self, api_version: &str, kind: &str, name: &str, body: Value) {
        self.bodies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(definition_file_name(api_version, kind, name), body);
    }
}

impl FixtureResolver for InlineFixtures {
    fn resolve(&self, api_version: &str, kind: &str, name: &str) -> Result<Value, FixtureError> {
        let key = definition_file_name(api_version, kind, name);
        self.bodies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .ok_or(FixtureError::NotFound {
                path: PathBuf::from(key),
            })
    }
}
