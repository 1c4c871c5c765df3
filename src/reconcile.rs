//! Idempotent "make sure it exists" for untyped resources
//!
//! [`ensure_resource`] creates a resource and absorbs the failures that a
//! freshly started or busy API server produces:
//!
//! - `Conflict`: the object is already there, so it is fetched and returned.
//!   A pre-existing object wins; its body is not compared with the request.
//! - `InternalServerError` with a retry hint: wait the hinted time, create
//!   once more. Without a hint the error is returned as is.
//! - anything else: wait [`RetryPolicy::backoff`], create once more.
//!
//! There is never a third attempt. The retried call's error is returned
//! unchanged.

use crate::client::{body_name, Instance, ResourceHandle};
use crate::config::RetryPolicy;
use crate::error::ApiError;
use crate::sleeper::Sleeper;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Create `body` in `namespace`, or return the existing object of that name
///
/// # Example
///
/// ```ignore
/// let handle = client.resource(&ResourceRef::new("v1", "ConfigMap")).await?;
/// let cm = ensure_resource(handle.as_ref(), &body, Some("demo"), &RetryPolicy::default(), &TokioSleeper).await?;
/// ```
pub async fn ensure_resource(
    handle: &dyn ResourceHandle,
    body: &Value,
    namespace: Option<&str>,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<Instance, ApiError> {
    let rr = handle.resource_ref();
    let name = body_name(body);

    let err = match handle.create(body, namespace).await {
        Ok(instance) => {
            info!(
                resource = %rr,
                namespace = ?namespace,
                name = ?instance.name(),
                "Created resource"
            );
            return Ok(instance);
        }
        Err(err) => err,
    };

    match err {
        ApiError::Conflict(_) => {
            let Some(name) = name else {
                return Err(err);
            };
            debug!(resource = %rr, namespace = ?namespace, name = %name, "Resource exists, fetching it");
            handle.get(name, namespace).await
        }
        ApiError::InternalServerError {
            retry_after: Some(delay),
            ..
        } if policy.allows_retry() => {
            warn!(
                resource = %rr,
                namespace = ?namespace,
                name = ?name,
                retry_after = ?delay,
                error = %err,
                "Server asked to retry create"
            );
            sleeper.sleep(delay).await;
            handle.create(body, namespace).await
        }
        ApiError::InternalServerError { .. } => Err(err),
        err if policy.allows_retry() => {
            warn!(
                resource = %rr,
                namespace = ?namespace,
                name = ?name,
                backoff = ?policy.backoff,
                error = %err,
                "Create failed, retrying once"
            );
            sleeper.sleep(policy.backoff).await;
            handle.create(body, namespace).await
        }
        err => Err(err),
    }
}
