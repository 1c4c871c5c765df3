//! Permission bootstrap for "I have `<role>` permissions in `<namespace>`"
//!
//! With an admin client the bootstrap:
//!
//! 1. asks a `TokenReview` who the user's token belongs to,
//! 2. makes sure the namespace exists (a `Namespace`, or an `OpenShift`
//!    `Project` when [`SuiteConfig::use_projects`](crate::config::SuiteConfig::use_projects)
//!    is set),
//! 3. binds the cluster role to that user in the namespace with a
//!    `RoleBinding` named `{username}-{clusterrole}`.
//!
//! Steps 2 and 3 tolerate `Conflict`, so repeating a bootstrap is harmless.
//! For the literal namespace `all namespaces` nothing is bound and the admin
//! client itself is used.

use crate::client::{ResourceClient, ResourceRef, ALL_NAMESPACES};
use crate::error::ApiError;
use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// Errors while setting up user permissions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("token review did not authenticate a user: {0}")]
    Unauthenticated(String),

    #[error("failed to encode {kind}: {message}")]
    Encode { kind: &'static str, message: String },
}

/// A user's client together with the bearer token it authenticates with
#[derive(Clone)]
pub struct UserCredentials {
    pub client: Arc<dyn ResourceClient>,
    pub token: String,
}

impl std::fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCredentials").finish_non_exhaustive()
    }
}

fn token_review_ref() -> ResourceRef {
    ResourceRef::new("authentication.k8s.io/v1", "TokenReview")
}

fn role_binding_ref() -> ResourceRef {
    ResourceRef::new("rbac.authorization.k8s.io/v1", "RoleBinding")
}

fn encode<T: serde::Serialize>(kind: &'static str, obj: &T) -> Result<Value, PermissionError> {
    serde_json::to_value(obj).map_err(|e| PermissionError::Encode {
        kind,
        message: e.to_string(),
    })
}

/// Username the API server associates with `token`
pub async fn whoami(admin: &dyn ResourceClient, token: &str) -> Result<String, PermissionError> {
    let review = TokenReview {
        spec: TokenReviewSpec {
            token: Some(token.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    let reviews = admin.resource(&token_review_ref()).await?;
    let answer = reviews
        .create(&encode("TokenReview", &review)?, None)
        .await?;

    let reviewed: TokenReview =
        serde_json::from_value(answer.to_value()).map_err(|e| PermissionError::Encode {
            kind: "TokenReview",
            message: e.to_string(),
        })?;
    let status = reviewed.status.unwrap_or_default();
    let reason = status
        .error
        .clone()
        .unwrap_or_else(|| "no username in status".to_string());

    status
        .user
        .and_then(|user| user.username)
        .filter(|name| !name.is_empty())
        .ok_or(PermissionError::Unauthenticated(reason))
}

/// Create the namespace object, keeping an existing one
pub async fn ensure_namespace(
    admin: &dyn ResourceClient,
    namespace_resource: &ResourceRef,
    namespace: &str,
) -> Result<(), ApiError> {
    let namespaces = admin.resource(namespace_resource).await?;
    let body = json!({
        "apiVersion": namespace_resource.api_version,
        "kind": namespace_resource.kind,
        "metadata": {"name": namespace},
    });

    match namespaces.create(&body, None).await {
        Ok(_) => {
            info!(namespace = %namespace, kind = %namespace_resource.kind, "Created namespace");
            Ok(())
        }
        Err(ApiError::Conflict(_)) => {
            debug!(namespace = %namespace, "Namespace already exists");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// `RoleBinding` granting `clusterrole` to `username` in `namespace`
#[must_use]
pub fn user_role_binding(username: &str, clusterrole: &str, namespace: &str) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(format!("{username}-{clusterrole}")),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: clusterrole.to_string(),
        },
        subjects: Some(vec![Subject {
            api_group: Some(RBAC_GROUP.to_string()),
            kind: "User".to_string(),
            name: username.to_string(),
            namespace: None,
        }]),
    }
}

/// Bind `clusterrole` to `username` in `namespace`, keeping an existing binding
pub async fn bind_cluster_role(
    admin: &dyn ResourceClient,
    username: &str,
    clusterrole: &str,
    namespace: &str,
) -> Result<(), PermissionError> {
    let binding = user_role_binding(username, clusterrole, namespace);
    let bindings = admin.resource(&role_binding_ref()).await?;

    match bindings
        .create(&encode("RoleBinding", &binding)?, Some(namespace))
        .await
    {
        Ok(_) => {
            info!(
                namespace = %namespace,
                user = %username,
                clusterrole = %clusterrole,
                "Bound cluster role"
            );
            Ok(())
        }
        Err(ApiError::Conflict(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Client acting with `clusterrole` permissions in `namespace`
///
/// Returns `admin` itself for `all namespaces`; otherwise bootstraps the
/// namespace and binding and returns the user's client.
pub async fn client_with_permissions(
    admin: Arc<dyn ResourceClient>,
    user: &UserCredentials,
    clusterrole: &str,
    namespace: &str,
    namespace_resource: &ResourceRef,
) -> Result<Arc<dyn ResourceClient>, PermissionError> {
    if namespace.trim() == ALL_NAMESPACES {
        debug!(clusterrole = %clusterrole, "Cluster-wide scope, using admin client");
        return Ok(admin);
    }

    let username = whoami(admin.as_ref(), &user.token).await?;
    ensure_namespace(admin.as_ref(), namespace_resource, namespace).await?;
    bind_cluster_role(admin.as_ref(), &username, clusterrole, namespace).await?;

    Ok(Arc::clone(&user.client))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ResourceScope;
    use crate::memory::{MemoryClient, Verb};
    use assert_matches::assert_matches;

    fn admin() -> MemoryClient {
        MemoryClient::with_core_types().register_token_review([("dev-token", "developer")])
    }

    fn credentials() -> UserCredentials {
        UserCredentials {
            client: Arc::new(MemoryClient::new()),
            token: "dev-token".into(),
        }
    }

    #[test]
    fn test_role_binding_shape() {
        let binding = encode("RoleBinding", &user_role_binding("dev", "edit", "team")).unwrap();

        assert_eq!(binding["apiVersion"], "rbac.authorization.k8s.io/v1");
        assert_eq!(binding["kind"], "RoleBinding");
        assert_eq!(binding["metadata"]["name"], "dev-edit");
        assert_eq!(binding["metadata"]["namespace"], "team");
        assert_eq!(binding["roleRef"]["kind"], "ClusterRole");
        assert_eq!(binding["roleRef"]["name"], "edit");
        assert_eq!(binding["subjects"][0]["kind"], "User");
        assert_eq!(binding["subjects"][0]["name"], "dev");
    }

    #[tokio::test]
    async fn test_whoami() {
        let admin = admin();
        assert_eq!(whoami(&admin, "dev-token").await.unwrap(), "developer");
    }

    #[tokio::test]
    async fn test_whoami_unknown_token() {
        let admin = admin();
        let err = whoami(&admin, "stolen").await.unwrap_err();
        assert_matches!(err, PermissionError::Unauthenticated(_));
    }

    #[tokio::test]
    async fn test_bootstrap_creates_namespace_and_binding() {
        let admin = admin();
        let rb = role_binding_ref();

        client_with_permissions(
            Arc::new(admin.clone()),
            &credentials(),
            "edit",
            "team",
            &ResourceRef::new("v1", "Namespace"),
        )
        .await
        .unwrap();

        assert!(admin
            .object(&ResourceRef::new("v1", "Namespace"), None, "team")
            .is_some());
        let binding = admin.object(&rb, Some("team"), "developer-edit").unwrap();
        assert_eq!(binding["subjects"][0]["name"], "developer");
    }

    #[tokio::test]
    async fn test_bootstrap_is_repeatable() {
        let admin = admin();
        let ns = ResourceRef::new("v1", "Namespace");
        let admin_client: Arc<dyn ResourceClient> = Arc::new(admin.clone());

        for _ in 0..2 {
            client_with_permissions(admin_client.clone(), &credentials(), "view", "team", &ns)
                .await
                .unwrap();
        }

        assert_eq!(admin.calls(&role_binding_ref(), Verb::Create), 2);
        assert_eq!(admin.count(&role_binding_ref()), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_all_namespaces_uses_admin() {
        let admin = admin();

        client_with_permissions(
            Arc::new(admin.clone()),
            &credentials(),
            "cluster-admin",
            "all namespaces",
            &ResourceRef::new("v1", "Namespace"),
        )
        .await
        .unwrap();

        assert_eq!(admin.calls(&token_review_ref(), Verb::Create), 0);
        assert_eq!(admin.count(&role_binding_ref()), 0);
    }

    #[tokio::test]
    async fn test_bootstrap_with_projects() {
        let project = ResourceRef::new("project.openshift.io/v1", "Project");
        let admin = admin().register(project.clone(), ResourceScope::Cluster);

        ensure_namespace(&admin, &project, "team").await.unwrap();
        ensure_namespace(&admin, &project, "team").await.unwrap();

        assert_eq!(admin.count(&project), 1);
    }

    #[tokio::test]
    async fn test_binding_failure_propagates() {
        let admin = admin();
        admin.fail_next(&role_binding_ref(), Verb::Create, ApiError::Forbidden("escalation".into()));

        let err = bind_cluster_role(&admin, "dev", "admin", "team").await.unwrap_err();

        assert_eq!(err, PermissionError::Api(ApiError::Forbidden("escalation".into())));
    }
}
