//! In-process stand-in for a Kubernetes API server
//!
//! [`MemoryClient`] keeps objects in a map and mimics the server behaviour
//! the step library depends on: name conflicts, not-found errors,
//! resource-version checks on replace, merge and JSON patches. Faults can be
//! queued per resource type and verb to exercise recovery paths, and every
//! call is counted.
//!
//! # Example
//!
//! ```
//! use kubestep::memory::{MemoryClient, Verb};
//! use kubestep::{ApiError, ResourceClient, ResourceRef, ResourceScope};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), ApiError> {
//! let cm = ResourceRef::new("v1", "ConfigMap");
//! let client = MemoryClient::new().register(cm.clone(), ResourceScope::Namespaced);
//! client.fail_next(&cm, Verb::Create, ApiError::Transport("connection reset".into()));
//!
//! let handle = client.resource(&cm).await?;
//! let body = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "demo"}});
//! assert!(handle.create(&body, Some("default")).await.is_err());
//! assert!(handle.create(&body, Some("default")).await.is_ok());
//! assert_eq!(client.calls(&cm, Verb::Create), 2);
//! # Ok(())
//! # }
//! ```

use crate::client::{body_name, Instance, ResourceClient, ResourceHandle, ResourceRef, ResourceScope};
use crate::error::ApiError;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// API verbs tracked by [`MemoryClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Get,
    Patch,
    Replace,
    Delete,
}

/// Transforms the body of a create on a virtual type into its response
pub type CreateHook = Arc<dyn Fn(Value) -> Result<Value, ApiError> + Send + Sync>;

#[derive(Clone)]
struct TypeEntry {
    scope: ResourceScope,
    create_on_update: bool,
    /// Virtual types (reviews) are answered by the hook and never stored
    hook: Option<CreateHook>,
}

type ObjectKey = (ResourceRef, Option<String>, String);

#[derive(Default)]
struct Store {
    types: HashMap<ResourceRef, TypeEntry>,
    objects: BTreeMap<ObjectKey, Value>,
    revision: u64,
    faults: HashMap<(ResourceRef, Verb), VecDeque<ApiError>>,
    calls: HashMap<(ResourceRef, Verb), usize>,
    bodies: HashMap<(ResourceRef, Verb), Value>,
}

impl Store {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    /// Count the call, remember its body, and pop a queued fault
    fn enter(&mut self, rr: &ResourceRef, verb: Verb, body: Option<&Value>) -> Result<(), ApiError> {
        let key = (rr.clone(), verb);
        *self.calls.entry(key.clone()).or_default() += 1;
        if let Some(body) = body {
            self.bodies.insert(key.clone(), body.clone());
        }
        match self.faults.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(err) => {
                trace!(resource = %rr, verb = ?verb, error = %err, "Injected fault");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

/// In-memory [`ResourceClient`]
///
/// Clones share the same store.
#[derive(Clone, Default)]
pub struct MemoryClient {
    store: Arc<Mutex<Store>>,
}

impl std::fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryClient").finish_non_exhaustive()
    }
}

impl MemoryClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Client with the core types the step library itself touches
    ///
    /// `Namespace`, `ConfigMap`, `Secret`, `ServiceAccount` and RBAC
    /// `RoleBinding`.
    #[must_use]
    pub fn with_core_types() -> Self {
        Self::new()
            .register(ResourceRef::new("v1", "Namespace"), ResourceScope::Cluster)
            .register(ResourceRef::new("v1", "ConfigMap"), ResourceScope::Namespaced)
            .register(ResourceRef::new("v1", "Secret"), ResourceScope::Namespaced)
            .register(ResourceRef::new("v1", "ServiceAccount"), ResourceScope::Namespaced)
            .register(
                ResourceRef::new("rbac.authorization.k8s.io/v1", "RoleBinding"),
                ResourceScope::Namespaced,
            )
    }

    /// Make a resource type known
    #[must_use]
    pub fn register(self, rr: ResourceRef, scope: ResourceScope) -> Self {
        self.insert_type(
            rr,
            TypeEntry {
                scope,
                create_on_update: false,
                hook: None,
            },
        );
        self
    }

    /// Make a type known whose replace creates missing objects
    #[must_use]
    pub fn register_with_create_on_update(self, rr: ResourceRef, scope: ResourceScope) -> Self {
        self.insert_type(
            rr,
            TypeEntry {
                scope,
                create_on_update: true,
                hook: None,
            },
        );
        self
    }

    /// Make a create-only type known whose response is computed by `hook`
    ///
    /// Used for review resources such as `TokenReview`, which the server
    /// answers without persisting.
    #[must_use]
    pub fn register_virtual(
        self,
        rr: ResourceRef,
        hook: impl Fn(Value) -> Result<Value, ApiError> + Send + Sync + 'static,
    ) -> Self {
        self.insert_type(
            rr,
            TypeEntry {
                scope: ResourceScope::Cluster,
                create_on_update: false,
                hook: Some(Arc::new(hook)),
            },
        );
        self
    }

    /// Answer `TokenReview`s from a fixed token to username table
    ///
    /// Unknown tokens are reported as unauthenticated, like the server does.
    #[must_use]
    pub fn register_token_review<T, U>(self, tokens: impl IntoIterator<Item = (T, U)>) -> Self
    where
        T: Into<String>,
        U: Into<String>,
    {
        let tokens: HashMap<String, String> = tokens
            .into_iter()
            .map(|(t, u)| (t.into(), u.into()))
            .collect();

        self.register_virtual(
            ResourceRef::new("authentication.k8s.io/v1", "TokenReview"),
            move |mut review| {
                let token = review["spec"]["token"].as_str().unwrap_or_default();
                let status = match tokens.get(token) {
                    Some(username) => json!({"authenticated": true, "user": {"username": username}}),
                    None => json!({"authenticated": false, "error": "invalid bearer token"}),
                };
                review["status"] = status;
                Ok(review)
            },
        )
    }

    fn insert_type(&self, rr: ResourceRef, entry: TypeEntry) {
        lock(&self.store).types.insert(rr, entry);
    }

    /// Queue `err` as the result of the next `verb` call on `rr`
    ///
    /// Several queued faults are returned in order.
    pub fn fail_next(&self, rr: &ResourceRef, verb: Verb, err: ApiError) {
        lock(&self.store)
            .faults
            .entry((rr.clone(), verb))
            .or_default()
            .push_back(err);
    }

    /// How many times `verb` was called on `rr`
    #[must_use]
    pub fn calls(&self, rr: &ResourceRef, verb: Verb) -> usize {
        lock(&self.store)
            .calls
            .get(&(rr.clone(), verb))
            .copied()
            .unwrap_or(0)
    }

    /// Body sent with the most recent `verb` call on `rr`
    #[must_use]
    pub fn last_body(&self, rr: &ResourceRef, verb: Verb) -> Option<Value> {
        lock(&self.store).bodies.get(&(rr.clone(), verb)).cloned()
    }

    /// Number of stored objects of type `rr`
    #[must_use]
    pub fn count(&self, rr: &ResourceRef) -> usize {
        lock(&self.store)
            .objects
            .keys()
            .filter(|(r, _, _)| r == rr)
            .count()
    }

    /// Stored object, bypassing call accounting and faults
    #[must_use]
    pub fn object(&self, rr: &ResourceRef, namespace: Option<&str>, name: &str) -> Option<Value> {
        let store = lock(&self.store);
        let scope = store.types.get(rr)?.scope;
        let key = object_key(rr, scope, namespace, name);
        store.objects.get(&key).cloned()
    }
}

#[async_trait]
impl ResourceClient for MemoryClient {
    async fn resource(&self, rr: &ResourceRef) -> Result<Box<dyn ResourceHandle>, ApiError> {
        let entry = lock(&self.store)
            .types
            .get(rr)
            .cloned()
            .ok_or_else(|| ApiError::UnknownResource {
                api_version: rr.api_version.clone(),
                kind: rr.kind.clone(),
            })?;

        Ok(Box::new(MemoryHandle {
            rr: rr.clone(),
            entry,
            store: Arc::clone(&self.store),
        }))
    }
}

/// Store guard, recovering a poisoned lock
///
/// Objects are written only after every check of a call passed.
fn lock(store: &Mutex<Store>) -> MutexGuard<'_, Store> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

fn object_key(rr: &ResourceRef, scope: ResourceScope, namespace: Option<&str>, name: &str) -> ObjectKey {
    let namespace = match scope {
        ResourceScope::Namespaced => namespace.map(str::to_string),
        ResourceScope::Cluster => None,
    };
    (rr.clone(), namespace, name.to_string())
}

struct MemoryHandle {
    rr: ResourceRef,
    entry: TypeEntry,
    store: Arc<Mutex<Store>>,
}

impl MemoryHandle {
    fn not_found(&self, name: &str) -> ApiError {
        ApiError::NotFound(format!("{} \"{name}\" not found", self.rr.kind))
    }

    /// Namespace the call operates in, checked against the body
    fn target_namespace(&self, body: Option<&Value>, namespace: Option<&str>) -> Result<Option<String>, ApiError> {
        if self.entry.scope == ResourceScope::Cluster {
            return Ok(None);
        }
        let from_body = body
            .and_then(|b| b.get("metadata"))
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str);
        match (namespace, from_body) {
            (Some(ns), Some(body_ns)) if ns != body_ns => Err(ApiError::BadRequest(format!(
                "the namespace of the provided object ({body_ns}) does not match the namespace sent on the request ({ns})"
            ))),
            (Some(ns), _) | (None, Some(ns)) => Ok(Some(ns.to_string())),
            (None, None) => Err(ApiError::BadRequest(format!(
                "{} is namespaced, a namespace is required",
                self.rr.kind
            ))),
        }
    }

    fn key(&self, namespace: Option<&str>, name: &str) -> ObjectKey {
        object_key(&self.rr, self.entry.scope, namespace, name)
    }

    /// Fill in identity and server-owned metadata
    fn stamp(&self, body: &mut Value, namespace: Option<&str>, revision: String, uid: Option<Value>) -> Result<(), ApiError> {
        let obj = body
            .as_object_mut()
            .ok_or_else(|| ApiError::BadRequest("body must be a mapping".into()))?;
        obj.entry("apiVersion")
            .or_insert_with(|| Value::String(self.rr.api_version.clone()));
        obj.entry("kind")
            .or_insert_with(|| Value::String(self.rr.kind.clone()));
        let metadata = obj
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| ApiError::BadRequest("metadata must be a mapping".into()))?;
        match namespace {
            Some(ns) => {
                metadata.insert("namespace".into(), Value::String(ns.to_string()));
            }
            None => {
                metadata.remove("namespace");
            }
        }
        metadata.insert("resourceVersion".into(), Value::String(revision.clone()));
        let uid = uid.unwrap_or_else(|| Value::String(format!("uid-{revision}")));
        metadata.insert("uid".into(), uid);
        Ok(())
    }

    fn do_create(&self, body: &Value, namespace: Option<&str>) -> Result<Instance, ApiError> {
        let mut store = lock(&self.store);
        store.enter(&self.rr, Verb::Create, Some(body))?;

        if let Some(hook) = &self.entry.hook {
            return Instance::from_value(hook(body.clone())?);
        }

        let name = body_name(body)
            .ok_or_else(|| ApiError::Invalid("metadata.name: Required value: name is required".into()))?;
        let namespace = self.target_namespace(Some(body), namespace)?;
        let key = self.key(namespace.as_deref(), name);
        if store.objects.contains_key(&key) {
            return Err(ApiError::Conflict(format!(
                "{} \"{name}\" already exists",
                self.rr.kind
            )));
        }

        let mut stored = body.clone();
        let revision = store.next_revision();
        self.stamp(&mut stored, namespace.as_deref(), revision, None)?;
        store.objects.insert(key, stored.clone());
        Instance::from_value(stored)
    }

    fn do_get(&self, name: &str, namespace: Option<&str>) -> Result<Instance, ApiError> {
        let mut store = lock(&self.store);
        store.enter(&self.rr, Verb::Get, None)?;
        let namespace = self.target_namespace(None, namespace)?;
        let key = self.key(namespace.as_deref(), name);
        let found = store.objects.get(&key).cloned().ok_or_else(|| self.not_found(name))?;
        Instance::from_value(found)
    }

    fn do_patch(&self, body: &Value, name: &str, namespace: Option<&str>) -> Result<Instance, ApiError> {
        let mut store = lock(&self.store);
        store.enter(&self.rr, Verb::Patch, Some(body))?;
        let namespace = self.target_namespace(None, namespace)?;
        let key = self.key(namespace.as_deref(), name);
        let current = store.objects.get(&key).cloned().ok_or_else(|| self.not_found(name))?;
        let current_version = current["metadata"]["resourceVersion"].clone();
        let uid = current["metadata"].get("uid").cloned();

        let mut patched = current;
        match body {
            Value::Array(_) => {
                let ops: json_patch::Patch = serde_json::from_value(body.clone())
                    .map_err(|e| ApiError::BadRequest(format!("invalid JSON patch: {e}")))?;
                json_patch::patch(&mut patched, &ops.0)
                    .map_err(|e| ApiError::Invalid(format!("JSON patch failed: {e}")))?;
            }
            Value::Object(_) => {
                if let Some(wanted) = body.get("metadata").and_then(|m| m.get("resourceVersion")) {
                    if *wanted != current_version {
                        return Err(ApiError::Conflict(modified_message()));
                    }
                }
                json_patch::merge(&mut patched, body);
            }
            _ => return Err(ApiError::BadRequest("patch body must be a mapping or a list".into())),
        }

        if body_name(&patched) != Some(name) {
            return Err(ApiError::Invalid("metadata.name: field is immutable".into()));
        }

        let revision = store.next_revision();
        self.stamp(&mut patched, namespace.as_deref(), revision, uid)?;
        store.objects.insert(key, patched.clone());
        Instance::from_value(patched)
    }

    fn do_replace(&self, body: &Value, namespace: Option<&str>) -> Result<Instance, ApiError> {
        let mut store = lock(&self.store);
        store.enter(&self.rr, Verb::Replace, Some(body))?;
        let name = body_name(body)
            .ok_or_else(|| ApiError::Invalid("metadata.name: Required value: name is required".into()))?;
        let namespace = self.target_namespace(Some(body), namespace)?;
        let key = self.key(namespace.as_deref(), name);
        let sent_version = body
            .get("metadata")
            .and_then(|m| m.get("resourceVersion"))
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty());

        let uid = match store.objects.get(&key) {
            Some(current) => {
                let Some(sent) = sent_version else {
                    return Err(ApiError::Invalid(
                        "metadata.resourceVersion: Invalid value: 0x0: must be specified for an update".into(),
                    ));
                };
                if current["metadata"]["resourceVersion"].as_str() != Some(sent) {
                    return Err(ApiError::Conflict(modified_message()));
                }
                current["metadata"].get("uid").cloned()
            }
            None if self.entry.create_on_update && matches!(sent_version, None | Some("0")) => None,
            None => return Err(self.not_found(name)),
        };

        let mut stored = body.clone();
        let revision = store.next_revision();
        self.stamp(&mut stored, namespace.as_deref(), revision, uid)?;
        store.objects.insert(key, stored.clone());
        Instance::from_value(stored)
    }

    fn do_delete(&self, name: &str, namespace: Option<&str>) -> Result<Option<Instance>, ApiError> {
        let mut store = lock(&self.store);
        store.enter(&self.rr, Verb::Delete, None)?;
        let namespace = self.target_namespace(None, namespace)?;
        let key = self.key(namespace.as_deref(), name);
        let removed = store.objects.remove(&key).ok_or_else(|| self.not_found(name))?;
        Instance::from_value(removed).map(Some)
    }
}

fn modified_message() -> String {
    "the object has been modified; please apply your changes to the latest version and try again"
        .to_string()
}

#[async_trait]
impl ResourceHandle for MemoryHandle {
    fn resource_ref(&self) -> &ResourceRef {
        &self.rr
    }

    fn scope(&self) -> ResourceScope {
        self.entry.scope
    }

    async fn create(&self, body: &Value, namespace: Option<&str>) -> Result<Instance, ApiError> {
        self.do_create(body, namespace)
    }

    async fn get(&self, name: &str, namespace: Option<&str>) -> Result<Instance, ApiError> {
        self.do_get(name, namespace)
    }

    async fn patch(
        &self,
        body: &Value,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Instance, ApiError> {
        self.do_patch(body, name, namespace)
    }

    async fn replace(&self, body: &Value, namespace: Option<&str>) -> Result<Instance, ApiError> {
        self.do_replace(body, namespace)
    }

    async fn delete(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<Instance>, ApiError> {
        self.do_delete(name, namespace)
    }
}
