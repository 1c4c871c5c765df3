//! Resource access surface
//!
//! A [`ResourceClient`] hands out [`ResourceHandle`]s for a resource type,
//! and a handle performs CRUD calls on untyped bodies. The step library only
//! talks to these traits, so the same scenarios run against a live cluster
//! ([`KubeClient`](crate::kube_client::KubeClient)) or the in-process
//! [`MemoryClient`](crate::memory::MemoryClient).

use crate::error::ApiError;
use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Identifies a resource type by `apiVersion` and `kind`
///
/// # Example
///
/// ```
/// use kubestep::ResourceRef;
///
/// let rr = ResourceRef::new("rbac.authorization.k8s.io/v1", "RoleBinding");
/// assert_eq!(rr.group(), "rbac.authorization.k8s.io");
/// assert_eq!(rr.version(), "v1");
///
/// let core = ResourceRef::new("v1", "ConfigMap");
/// assert_eq!(core.group(), "");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    /// `group/version`, or just `version` for the core group
    pub api_version: String,
    /// Kind name (e.g. "`ConfigMap`")
    pub kind: String,
}

impl ResourceRef {
    #[must_use]
    pub fn new(api_version: &str, kind: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Read `apiVersion` and `kind` from a manifest
    #[must_use]
    pub fn from_manifest(manifest: &Value) -> Option<Self> {
        let api_version = manifest.get("apiVersion")?.as_str()?;
        let kind = manifest.get("kind")?.as_str()?;
        Some(Self::new(api_version, kind))
    }

    /// API group, empty for the core group
    #[must_use]
    pub fn group(&self) -> &str {
        self.api_version
            .split_once('/')
            .map_or("", |(group, _)| group)
    }

    /// API version without the group
    #[must_use]
    pub fn version(&self) -> &str {
        self.api_version
            .split_once('/')
            .map_or(self.api_version.as_str(), |(_, version)| version)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.api_version, self.kind)
    }
}

/// Text that is not `apiVersion.kind`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected <apiVersion>.<kind>, got {0:?}")]
pub struct InvalidResourceRef(pub String);

impl FromStr for ResourceRef {
    type Err = InvalidResourceRef;

    /// Parse the scenario spelling `apps/v1.Deployment`
    ///
    /// The kind follows the last dot, so dotted groups work.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.rsplit_once('.') {
            Some((api_version, kind)) if !api_version.is_empty() && !kind.is_empty() => {
                Ok(Self::new(api_version, kind))
            }
            _ => Err(InvalidResourceRef(trimmed.to_string())),
        }
    }
}

/// Whether a resource type lives in a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
    Namespaced,
    Cluster,
}

/// A resource as returned by the API server
///
/// Thin wrapper over [`DynamicObject`] with the accessors the step library
/// needs.
#[derive(Debug, Clone)]
pub struct Instance(pub DynamicObject);

impl Instance {
    /// Build an instance from a JSON body
    pub fn from_value(value: Value) -> Result<Self, ApiError> {
        serde_json::from_value(value)
            .map(Self)
            .map_err(|e| ApiError::InvalidObject(format!("not a kubernetes object: {e}")))
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.metadata.name.as_deref()
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.0.metadata.namespace.as_deref()
    }

    #[must_use]
    pub fn resource_version(&self) -> Option<&str> {
        self.0.metadata.resource_version.as_deref()
    }

    /// Plain nested value, suitable for [`object_contains`](crate::matcher::object_contains)
    #[must_use]
    pub fn to_value(&self) -> Value {
        // DynamicObject serialization only fails for non-string map keys,
        // which ObjectMeta and a JSON body cannot contain.
        serde_json::to_value(&self.0).unwrap_or(Value::Null)
    }

    #[must_use]
    pub fn into_inner(self) -> DynamicObject {
        self.0
    }
}

impl From<DynamicObject> for Instance {
    fn from(obj: DynamicObject) -> Self {
        Self(obj)
    }
}

/// Resolves resource types to handles
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Look up the handle for `apiVersion` + `kind`
    async fn resource(&self, rr: &ResourceRef) -> Result<Box<dyn ResourceHandle>, ApiError>;
}

/// CRUD operations for one resource type
///
/// `namespace` is `None` for cluster-scoped calls.
#[async_trait]
pub trait ResourceHandle: Send + Sync {
    /// The type this handle operates on
    fn resource_ref(&self) -> &ResourceRef;

    /// Scope of the resource type
    fn scope(&self) -> ResourceScope;

    async fn create(&self, body: &Value, namespace: Option<&str>) -> Result<Instance, ApiError>;

    async fn get(&self, name: &str, namespace: Option<&str>) -> Result<Instance, ApiError>;

    /// Patch `name` with `body`
    ///
    /// Object bodies are merge patches; array bodies are RFC 6902 JSON
    /// patches.
    async fn patch(
        &self,
        body: &Value,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Instance, ApiError>;

    /// Replace the object named by `body.metadata.name`
    async fn replace(&self, body: &Value, namespace: Option<&str>) -> Result<Instance, ApiError>;

    /// Delete `name`
    ///
    /// Returns the object when the server still reports it (for example while
    /// finalizers run), `None` when it only acknowledged with a status.
    async fn delete(&self, name: &str, namespace: Option<&str>)
        -> Result<Option<Instance>, ApiError>;
}

/// `metadata.name` of a request body
#[must_use]
pub fn body_name(body: &Value) -> Option<&str> {
    body.get("metadata")?.get("name")?.as_str()
}

/// Map scenario namespace text to an API namespace
///
/// Empty text and the literal `all namespaces` mean cluster scope.
#[must_use]
pub fn scoped_namespace(namespace: &str) -> Option<&str> {
    let trimmed = namespace.trim();
    if trimmed.is_empty() || trimmed == ALL_NAMESPACES {
        None
    } else {
        Some(trimmed)
    }
}

/// Scenario literal for cluster-wide scope
pub const ALL_NAMESPACES: &str = "all namespaces";
