//! Read-modify-write replace with resource version tracking
//!
//! A replace first reads the live object to learn its `resourceVersion` and
//! sends the desired body with that version attached, so the server rejects
//! the write if someone else changed the object in between. When the object
//! does not exist the sentinel version [`SENTINEL_RESOURCE_VERSION`] is sent
//! instead of failing.
//!
//! The read and the write are two separate calls. Two replacers racing on
//! the same object can both read the same version; the server then accepts
//! the first write and answers the second with `Conflict`.

use crate::client::{body_name, Instance, ResourceHandle};
use crate::error::ApiError;
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Version sent when no prior object exists
pub const SENTINEL_RESOURCE_VERSION: &str = "0";

/// Outcome of [`try_replace`]
#[derive(Debug, Clone)]
#[must_use]
pub enum Attempt {
    Succeeded(Instance),
    Failed(ApiError),
}

impl Attempt {
    /// The captured error, if the attempt failed
    pub fn error(&self) -> Option<&ApiError> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed(err) => Some(err),
        }
    }

    /// The returned instance, if the attempt succeeded
    pub fn instance(&self) -> Option<&Instance> {
        match self {
            Self::Succeeded(instance) => Some(instance),
            Self::Failed(_) => None,
        }
    }

    pub fn into_result(self) -> Result<Instance, ApiError> {
        match self {
            Self::Succeeded(instance) => Ok(instance),
            Self::Failed(err) => Err(err),
        }
    }
}

impl From<Result<Instance, ApiError>> for Attempt {
    fn from(result: Result<Instance, ApiError>) -> Self {
        match result {
            Ok(instance) => Self::Succeeded(instance),
            Err(err) => Self::Failed(err),
        }
    }
}

/// Replace the object named by `desired.metadata.name`, propagating failure
pub async fn replace(
    handle: &dyn ResourceHandle,
    desired: &Value,
    namespace: Option<&str>,
) -> Result<Instance, ApiError> {
    let body = versioned_body(handle, desired, namespace).await?;
    let instance = handle.replace(&body, namespace).await?;

    info!(
        resource = %handle.resource_ref(),
        namespace = ?namespace,
        name = ?instance.name(),
        resource_version = ?instance.resource_version(),
        "Replaced resource"
    );

    Ok(instance)
}

/// Like [`replace`], but failures are captured in the returned [`Attempt`]
pub async fn try_replace(
    handle: &dyn ResourceHandle,
    desired: &Value,
    namespace: Option<&str>,
) -> Attempt {
    let attempt = Attempt::from(replace(handle, desired, namespace).await);
    if let Attempt::Failed(err) = &attempt {
        debug!(
            resource = %handle.resource_ref(),
            namespace = ?namespace,
            error = %err,
            "Replace attempt failed"
        );
    }
    attempt
}

/// Copy of `desired` carrying the live object's resource version
async fn versioned_body(
    handle: &dyn ResourceHandle,
    desired: &Value,
    namespace: Option<&str>,
) -> Result<Value, ApiError> {
    let name = body_name(desired)
        .ok_or_else(|| ApiError::InvalidObject("replace body must have metadata.name".into()))?;

    let version = match handle.get(name, namespace).await {
        Ok(current) => current
            .resource_version()
            .unwrap_or(SENTINEL_RESOURCE_VERSION)
            .to_string(),
        Err(ApiError::NotFound(_)) => {
            debug!(
                resource = %handle.resource_ref(),
                namespace = ?namespace,
                name = %name,
                "No prior object, using sentinel resource version"
            );
            SENTINEL_RESOURCE_VERSION.to_string()
        }
        Err(err) => return Err(err),
    };

    let mut body = desired.clone();
    set_resource_version(&mut body, version)?;
    Ok(body)
}

/// Write `metadata.resourceVersion`, creating `metadata` when absent
pub fn set_resource_version(body: &mut Value, version: String) -> Result<(), ApiError> {
    let obj = body
        .as_object_mut()
        .ok_or_else(|| ApiError::InvalidObject("body must be a mapping".into()))?;
    let metadata = obj
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| ApiError::InvalidObject("metadata must be a mapping".into()))?;
    metadata.insert("resourceVersion".to_string(), Value::String(version));
    Ok(())
}
