//! [`ResourceClient`] backed by a live cluster through kube-rs
//!
//! Types are resolved with discovery on first use, so any served kind works,
//! including CRDs installed by the scenario itself. Resolved types are kept
//! for the life of the client; failed lookups are not, so a kind that appears
//! later is still found.

use crate::client::{Instance, ResourceClient, ResourceHandle, ResourceRef, ResourceScope};
use crate::error::ApiError;
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::core::GroupVersionKind;
use kube::discovery::{oneshot::pinned_kind, ApiResource, Scope};
use kube::{Client, Config};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, instrument};

/// Timeout for individual API requests
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors while building a client
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Kubeconfig(#[from] KubeconfigError),

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// Discovered type with the scope its handles need
#[derive(Debug, Clone)]
struct DiscoveredResource {
    api_resource: ApiResource,
    scope: ResourceScope,
}

/// Discovery results by resource reference
///
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
struct DiscoveryCache {
    resources: Arc<Mutex<HashMap<ResourceRef, DiscoveredResource>>>,
}

impl DiscoveryCache {
    fn lookup(&self, rr: &ResourceRef) -> Option<DiscoveredResource> {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(rr)
            .cloned()
    }

    fn insert(&self, rr: ResourceRef, resource: DiscoveredResource) {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(rr, resource);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Cluster-backed resource client
///
/// Clones share the discovery cache.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    discovered: DiscoveryCache,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient").finish_non_exhaustive()
    }
}

impl KubeClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovered: DiscoveryCache::default(),
        }
    }

    /// Connect with the ambient configuration (`KUBECONFIG` or in-cluster)
    pub async fn try_default() -> Result<Self, ConnectError> {
        Ok(Self::new(Client::try_default().await?))
    }

    /// Connect with an explicit kubeconfig file, e.g. an admin credential
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn from_kubeconfig(
        path: impl AsRef<Path>,
        context: Option<String>,
    ) -> Result<Self, ConnectError> {
        let kubeconfig = Kubeconfig::read_from(path.as_ref())?;
        let mut config = Config::from_custom_kubeconfig(
            kubeconfig,
            &KubeConfigOptions {
                context,
                ..Default::default()
            },
        )
        .await?;
        config.read_timeout = Some(DEFAULT_API_TIMEOUT);
        Ok(Self::new(Client::try_from(config)?))
    }

    /// Underlying kube client
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ResourceClient for KubeClient {
    async fn resource(&self, rr: &ResourceRef) -> Result<Box<dyn ResourceHandle>, ApiError> {
        let discovered = match self.discovered.lookup(rr) {
            Some(discovered) => discovered,
            None => {
                let discovered = self.discover(rr).await?;
                self.discovered.insert(rr.clone(), discovered.clone());
                discovered
            }
        };

        Ok(Box::new(KubeHandle {
            client: self.client.clone(),
            rr: rr.clone(),
            api_resource: discovered.api_resource,
            scope: discovered.scope,
        }))
    }
}

impl KubeClient {
    async fn discover(&self, rr: &ResourceRef) -> Result<DiscoveredResource, ApiError> {
        let gvk = GroupVersionKind::gvk(rr.group(), rr.version(), &rr.kind);
        let (api_resource, capabilities) =
            pinned_kind(&self.client, &gvk).await.map_err(|err| match err {
                kube::Error::Discovery(_) => ApiError::UnknownResource {
                    api_version: rr.api_version.clone(),
                    kind: rr.kind.clone(),
                },
                kube::Error::Api(ref status) if status.code == 404 => ApiError::UnknownResource {
                    api_version: rr.api_version.clone(),
                    kind: rr.kind.clone(),
                },
                other => classify(other),
            })?;

        let scope = match capabilities.scope {
            Scope::Namespaced => ResourceScope::Namespaced,
            Scope::Cluster => ResourceScope::Cluster,
        };
        debug!(resource = %rr, plural = %api_resource.plural, scope = ?scope, "Resolved resource type");

        Ok(DiscoveredResource {
            api_resource,
            scope,
        })
    }
}

struct KubeHandle {
    client: Client,
    rr: ResourceRef,
    api_resource: ApiResource,
    scope: ResourceScope,
}

impl KubeHandle {
    fn api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        match (self.scope, namespace) {
            (ResourceScope::Namespaced, Some(ns)) => {
                Api::namespaced_with(self.client.clone(), ns, &self.api_resource)
            }
            _ => Api::all_with(self.client.clone(), &self.api_resource),
        }
    }

    /// Namespace for a write, falling back to the body's own namespace
    fn write_namespace<'a>(namespace: Option<&'a str>, obj: &'a DynamicObject) -> Option<&'a str> {
        namespace.or(obj.metadata.namespace.as_deref())
    }
}

fn to_object(body: &Value) -> Result<DynamicObject, ApiError> {
    serde_json::from_value(body.clone())
        .map_err(|e| ApiError::InvalidObject(format!("invalid object format: {e}")))
}

#[async_trait]
impl ResourceHandle for KubeHandle {
    fn resource_ref(&self) -> &ResourceRef {
        &self.rr
    }

    fn scope(&self) -> ResourceScope {
        self.scope
    }

    async fn create(&self, body: &Value, namespace: Option<&str>) -> Result<Instance, ApiError> {
        let obj = to_object(body)?;
        let api = self.api(Self::write_namespace(namespace, &obj));
        api.create(&PostParams::default(), &obj)
            .await
            .map(Instance::from)
            .map_err(classify)
    }

    async fn get(&self, name: &str, namespace: Option<&str>) -> Result<Instance, ApiError> {
        self.api(namespace)
            .get(name)
            .await
            .map(Instance::from)
            .map_err(classify)
    }

    async fn patch(
        &self,
        body: &Value,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Instance, ApiError> {
        let api = self.api(namespace);
        let params = PatchParams::default();

        if body.is_array() {
            let ops: json_patch::Patch = serde_json::from_value(body.clone())
                .map_err(|e| ApiError::InvalidObject(format!("invalid JSON patch: {e}")))?;
            return api
                .patch(name, &params, &Patch::<()>::Json(ops))
                .await
                .map(Instance::from)
                .map_err(classify);
        }

        // Strategic merge works for built-in types only
        match api.patch(name, &params, &Patch::Strategic(body)).await {
            Ok(obj) => Ok(Instance::from(obj)),
            Err(kube::Error::Api(ref status)) if status.code == 415 => {
                debug!(resource = %self.rr, name = %name, "Strategic merge unsupported, using merge patch");
                api.patch(name, &params, &Patch::Merge(body))
                    .await
                    .map(Instance::from)
                    .map_err(classify)
            }
            Err(err) => Err(classify(err)),
        }
    }

    async fn replace(&self, body: &Value, namespace: Option<&str>) -> Result<Instance, ApiError> {
        let obj = to_object(body)?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| ApiError::InvalidObject("object must have metadata.name".into()))?;
        let api = self.api(Self::write_namespace(namespace, &obj));
        api.replace(&name, &PostParams::default(), &obj)
            .await
            .map(Instance::from)
            .map_err(classify)
    }

    async fn delete(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<Instance>, ApiError> {
        let outcome = self
            .api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(classify)?;
        Ok(outcome.left().map(Instance::from))
    }
}

/// Map a kube-rs error onto [`ApiError`]
///
/// Server responses are classified by HTTP code; everything else (TLS,
/// connection, decoding) is a transport failure.
pub fn classify(err: kube::Error) -> ApiError {
    match err {
        kube::Error::Api(status) => {
            let body = serde_json::to_value(&status).unwrap_or(Value::Null);
            classify_status(&body)
        }
        other => ApiError::Transport(other.to_string()),
    }
}

/// Classify a `Status` body as returned by the API server
#[must_use]
pub fn classify_status(status: &Value) -> ApiError {
    let message = status
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let retry_after = status
        .get("details")
        .and_then(|d| d.get("retryAfterSeconds"))
        .and_then(Value::as_u64)
        .map(Duration::from_secs);

    match status
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
    {
        Some(code) => ApiError::from_status(code, message, retry_after),
        None => ApiError::Other {
            code: None,
            message,
        },
    }
}
