//! Step operations for resource scenarios
//!
//! A [`StepContext`] lives for one scenario. It carries the admin client,
//! the client currently acting (the admin until permissions are granted),
//! the definition resolver, and the outcome of the last action: the
//! returned instance or the captured error.
//!
//! Setup and verification steps ("exists", "does not exist") always use
//! the admin client. Action steps use the acting client. The `try_*` form
//! of an action records a failure instead of returning it, so a following
//! [`StepContext::assert_throws`] can inspect it.
//!
//! # Example
//!
//! ```ignore
//! let mut ctx = StepContext::new(admin, Arc::new(DefinitionDir::new("tests/definitions")));
//! let cm: ResourceRef = "v1.ConfigMap".parse()?;
//!
//! ctx.ensure_absent(&cm, "demo", "team").await?;
//! ctx.try_create(&cm, "demo", "team").await?;
//! ctx.assert_matches_definition(&cm, "demo", "team", "demo").await?;
//! ```

use crate::client::{
    scoped_namespace, Instance, InvalidResourceRef, ResourceClient, ResourceHandle, ResourceRef,
};
use crate::config::SuiteConfig;
use crate::error::{ApiError, ErrorKind, UnknownErrorKind};
use crate::eventually::{eventually, ConditionError};
use crate::fixtures::{DefinitionDir, FixtureError, FixtureResolver};
use crate::matcher::{contains_strict, object_contains};
use crate::permissions::{client_with_permissions, PermissionError, UserCredentials};
use crate::reconcile::ensure_resource;
use crate::replace::{replace, try_replace};
use crate::sleeper::{Sleeper, TokioSleeper};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Error type for step operations
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Fixture(#[from] FixtureError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Condition(#[from] ConditionError),

    #[error(transparent)]
    InvalidResourceRef(#[from] InvalidResourceRef),

    #[error(transparent)]
    UnknownErrorKind(#[from] UnknownErrorKind),

    #[error("unable to {0} resource")]
    UnknownAction(String),

    #[error("expected a {expected} error, but the last action succeeded")]
    NoErrorCaptured { expected: ErrorKind },

    #[error("expected a {expected} error, got {actual}")]
    WrongError { expected: ErrorKind, actual: ApiError },

    #[error("assertion failed: {0}")]
    AssertionFailed(String),
}

/// Verb of the generic "I `<action>`" step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Create,
    Delete,
    Get,
}

/// Parsed action text such as `create` or `try to delete`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub kind: ActionKind,
    /// `try to ...`: record a failure instead of failing the step
    pub tolerant: bool,
}

const TRY_PREFIX: &str = "try to ";

impl FromStr for Action {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let (tolerant, verb) = match text.strip_prefix(TRY_PREFIX) {
            Some(rest) => (true, rest.trim()),
            None => (false, text),
        };
        let kind = match verb {
            "create" => ActionKind::Create,
            "delete" => ActionKind::Delete,
            "get" => ActionKind::Get,
            other => return Err(ScenarioError::UnknownAction(other.to_string())),
        };
        Ok(Self { kind, tolerant })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tolerant {
            f.write_str(TRY_PREFIX)?;
        }
        f.write_str(match self.kind {
            ActionKind::Create => "create",
            ActionKind::Delete => "delete",
            ActionKind::Get => "get",
        })
    }
}

/// Per-scenario state and step operations
pub struct StepContext {
    admin: Arc<dyn ResourceClient>,
    client: Arc<dyn ResourceClient>,
    fixtures: Arc<dyn FixtureResolver>,
    sleeper: Arc<dyn Sleeper>,
    config: SuiteConfig,
    instance: Option<Instance>,
    error: Option<ApiError>,
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("config", &self.config)
            .field("instance", &self.instance)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl StepContext {
    /// Context acting as `admin` until permissions are granted
    pub fn new(admin: Arc<dyn ResourceClient>, fixtures: Arc<dyn FixtureResolver>) -> Self {
        Self {
            client: Arc::clone(&admin),
            admin,
            fixtures,
            sleeper: Arc::new(TokioSleeper),
            config: SuiteConfig::default(),
            instance: None,
            error: None,
        }
    }

    /// Context reading definitions from `config.definitions`
    pub fn from_config(admin: Arc<dyn ResourceClient>, config: SuiteConfig) -> Self {
        let fixtures = Arc::new(DefinitionDir::new(config.definitions.clone()));
        Self::new(admin, fixtures).config(config)
    }

    #[must_use]
    pub fn config(mut self, config: SuiteConfig) -> Self {
        self.config = config;
        self
    }

    /// Sleeper used by the reconciler's retry backoff
    #[must_use]
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Act with `client` from now on
    pub fn act_as(&mut self, client: Arc<dyn ResourceClient>) {
        self.client = client;
    }

    /// Instance returned by the last successful action
    #[must_use]
    pub fn instance(&self) -> Option<&Instance> {
        self.instance.as_ref()
    }

    /// Error captured by the last failed action
    #[must_use]
    pub fn error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }

    fn definition(&self, rr: &ResourceRef, name: &str) -> Result<Value, FixtureError> {
        self.fixtures.resolve(&rr.api_version, &rr.kind, name)
    }

    async fn admin_handle(&self, rr: &ResourceRef) -> Result<Box<dyn ResourceHandle>, ApiError> {
        self.admin.resource(rr).await
    }

    async fn acting_handle(&self, rr: &ResourceRef) -> Result<Box<dyn ResourceHandle>, ApiError> {
        self.client.resource(rr).await
    }

    /// Store an action's outcome, replacing the previous one
    fn record(&mut self, outcome: Result<Option<Instance>, ApiError>) -> Result<(), ApiError> {
        match outcome {
            Ok(instance) => {
                self.instance = instance;
                self.error = None;
                Ok(())
            }
            Err(err) => {
                debug!(error = %err, "Captured action error");
                self.instance = None;
                self.error = Some(err.clone());
                Err(err)
            }
        }
    }

    // Given

    /// `<rr> <name> does not exist in <namespace>`
    pub async fn ensure_absent(
        &self,
        rr: &ResourceRef,
        name: &str,
        namespace: &str,
    ) -> Result<(), ScenarioError> {
        let handle = self.admin_handle(rr).await?;
        match handle.delete(name, scoped_namespace(namespace)).await {
            Ok(_) => {
                info!(resource = %rr, name = %name, namespace = %namespace, "Removed resource");
                Ok(())
            }
            Err(ApiError::NotFound(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// `<rr> <name> exists in <namespace>`, created by the admin
    pub async fn ensure_present(
        &self,
        rr: &ResourceRef,
        name: &str,
        namespace: &str,
    ) -> Result<Instance, ScenarioError> {
        let handle = self.admin_handle(rr).await?;
        self.ensure_with(handle.as_ref(), rr, name, namespace).await
    }

    /// `I have created <rr> <name> in <namespace>`, created by the acting user
    pub async fn ensure_created_by_user(
        &self,
        rr: &ResourceRef,
        name: &str,
        namespace: &str,
    ) -> Result<Instance, ScenarioError> {
        let handle = self.acting_handle(rr).await?;
        self.ensure_with(handle.as_ref(), rr, name, namespace).await
    }

    async fn ensure_with(
        &self,
        handle: &dyn ResourceHandle,
        rr: &ResourceRef,
        name: &str,
        namespace: &str,
    ) -> Result<Instance, ScenarioError> {
        let body = self.definition(rr, name)?;
        let instance = ensure_resource(
            handle,
            &body,
            scoped_namespace(namespace),
            &self.config.retry,
            self.sleeper.as_ref(),
        )
        .await?;
        Ok(instance)
    }

    /// `I have <clusterrole> permissions in <namespace>`
    pub async fn grant_permissions(
        &mut self,
        user: &UserCredentials,
        clusterrole: &str,
        namespace: &str,
    ) -> Result<(), ScenarioError> {
        let client = client_with_permissions(
            Arc::clone(&self.admin),
            user,
            clusterrole,
            namespace,
            &self.config.namespace_resource,
        )
        .await?;
        self.act_as(client);
        Ok(())
    }

    // When

    /// `I create <rr> <name> in <namespace>`
    pub async fn create(
        &mut self,
        rr: &ResourceRef,
        name: &str,
        namespace: &str,
    ) -> Result<(), ScenarioError> {
        let body = self.definition(rr, name)?;
        let outcome = self.create_body(rr, &body, namespace).await;
        self.record(outcome.map(Some)).map_err(Into::into)
    }

    /// `I try to create <rr> <name> in <namespace>`
    pub async fn try_create(
        &mut self,
        rr: &ResourceRef,
        name: &str,
        namespace: &str,
    ) -> Result<(), ScenarioError> {
        let body = self.definition(rr, name)?;
        let outcome = self.create_body(rr, &body, namespace).await;
        let _ = self.record(outcome.map(Some));
        Ok(())
    }

    async fn create_body(
        &self,
        rr: &ResourceRef,
        body: &Value,
        namespace: &str,
    ) -> Result<Instance, ApiError> {
        self.acting_handle(rr)
            .await?
            .create(body, scoped_namespace(namespace))
            .await
    }

    /// `I patch <rr> <name> in <namespace> with <update>`
    pub async fn patch(
        &mut self,
        rr: &ResourceRef,
        name: &str,
        namespace: &str,
        update: &str,
    ) -> Result<(), ScenarioError> {
        let body = self.definition(rr, update)?;
        let outcome = self.patch_body(rr, name, namespace, &body).await;
        self.record(outcome.map(Some)).map_err(Into::into)
    }

    /// `I try to patch <rr> <name> in <namespace> with <update>`
    pub async fn try_patch(
        &mut self,
        rr: &ResourceRef,
        name: &str,
        namespace: &str,
        update: &str,
    ) -> Result<(), ScenarioError> {
        let body = self.definition(rr, update)?;
        let outcome = self.patch_body(rr, name, namespace, &body).await;
        let _ = self.record(outcome.map(Some));
        Ok(())
    }

    async fn patch_body(
        &self,
        rr: &ResourceRef,
        name: &str,
        namespace: &str,
        body: &Value,
    ) -> Result<Instance, ApiError> {
        self.acting_handle(rr)
            .await?
            .patch(body, name, scoped_namespace(namespace))
            .await
    }

    /// `I replace <rr> <name> in <namespace> with <update>`
    ///
    /// The object replaced is the one named in the definition.
    pub async fn replace(
        &mut self,
        rr: &ResourceRef,
        namespace: &str,
        update: &str,
    ) -> Result<(), ScenarioError> {
        let body = self.definition(rr, update)?;
        let outcome = match self.acting_handle(rr).await {
            Ok(handle) => replace(handle.as_ref(), &body, scoped_namespace(namespace)).await,
            Err(err) => Err(err),
        };
        self.record(outcome.map(Some)).map_err(Into::into)
    }

    /// `I try to replace <rr> <name> in <namespace> with <update>`
    pub async fn try_replace(
        &mut self,
        rr: &ResourceRef,
        namespace: &str,
        update: &str,
    ) -> Result<(), ScenarioError> {
        let body = self.definition(rr, update)?;
        let outcome = match self.acting_handle(rr).await {
            Ok(handle) => try_replace(handle.as_ref(), &body, scoped_namespace(namespace))
                .await
                .into_result(),
            Err(err) => Err(err),
        };
        let _ = self.record(outcome.map(Some));
        Ok(())
    }

    /// `I <action> <rr> <name> in <namespace>`
    pub async fn perform(
        &mut self,
        action: &str,
        rr: &ResourceRef,
        name: &str,
        namespace: &str,
    ) -> Result<(), ScenarioError> {
        let action: Action = action.parse()?;
        let ns = scoped_namespace(namespace);

        let outcome = match self.acting_handle(rr).await {
            Err(err) => Err(err),
            Ok(handle) => match action.kind {
                ActionKind::Create => {
                    let body = self.definition(rr, name)?;
                    handle.create(&body, ns).await.map(Some)
                }
                ActionKind::Delete => handle.delete(name, ns).await,
                ActionKind::Get => handle.get(name, ns).await.map(Some),
            },
        };

        match self.record(outcome) {
            Err(_) if action.tolerant => Ok(()),
            other => other.map_err(Into::into),
        }
    }

    // Then

    /// `It throws a <error>`
    ///
    /// `error` is an [`ErrorKind`] name, with or without the `Error` suffix.
    /// `DynamicApiError` accepts any status the server answered with.
    pub fn assert_throws(&self, error: &str) -> Result<(), ScenarioError> {
        let expected: ErrorKind = error.parse()?;
        match &self.error {
            None => Err(ScenarioError::NoErrorCaptured { expected }),
            Some(actual) if expected.matches(actual) => Ok(()),
            Some(actual) => Err(ScenarioError::WrongError {
                expected,
                actual: actual.clone(),
            }),
        }
    }

    /// `<rr> <name> in <namespace> should match the content of <update>`
    pub async fn assert_matches_definition(
        &self,
        rr: &ResourceRef,
        name: &str,
        namespace: &str,
        update: &str,
    ) -> Result<(), ScenarioError> {
        let expected = self.definition(rr, update)?;
        let handle = self.acting_handle(rr).await?;
        let live = handle.get(name, scoped_namespace(namespace)).await?;
        check_contains(&live, &expected).map_err(ScenarioError::AssertionFailed)
    }

    /// Like [`assert_matches_definition`](Self::assert_matches_definition),
    /// polling until the match holds or `match_timeout` passes
    pub async fn assert_eventually_matches(
        &self,
        rr: &ResourceRef,
        name: &str,
        namespace: &str,
        update: &str,
    ) -> Result<Instance, ScenarioError> {
        let expected = self.definition(rr, update)?;
        let handle = self.acting_handle(rr).await?;
        let handle = handle.as_ref();
        let expected = &expected;
        let ns = scoped_namespace(namespace);

        let live = eventually(move || async move {
            let live = handle.get(name, ns).await.map_err(|e| e.to_string())?;
            check_contains(&live, expected).map(|()| live)
        })
        .timeout(self.config.match_timeout)
        .interval(self.config.match_interval)
        .run()
        .await?;
        Ok(live)
    }

    /// `<rr> <name> does not exist in <namespace>`
    pub async fn assert_absent(
        &self,
        rr: &ResourceRef,
        name: &str,
        namespace: &str,
    ) -> Result<(), ScenarioError> {
        let handle = self.admin_handle(rr).await?;
        match handle.get(name, scoped_namespace(namespace)).await {
            Err(ApiError::NotFound(_)) => Ok(()),
            Err(err) => Err(err.into()),
            Ok(_) => Err(ScenarioError::AssertionFailed(format!(
                "{rr} {name} still exists in {namespace}"
            ))),
        }
    }

    /// `<rr> <name> exists in <namespace>`
    pub async fn assert_present(
        &self,
        rr: &ResourceRef,
        name: &str,
        namespace: &str,
    ) -> Result<Instance, ScenarioError> {
        let handle = self.admin_handle(rr).await?;
        let ns = scoped_namespace(namespace);
        let live = handle.get(name, ns).await?;

        if live.name() != Some(name) {
            return Err(ScenarioError::AssertionFailed(format!(
                "expected name {name}, got {:?}",
                live.name()
            )));
        }
        if live.namespace() != ns {
            return Err(ScenarioError::AssertionFailed(format!(
                "expected namespace {ns:?}, got {:?}",
                live.namespace()
            )));
        }
        Ok(live)
    }
}

/// Subset check with a readable failure
fn check_contains(live: &Instance, expected: &Value) -> Result<(), String> {
    let actual = live.to_value();
    if object_contains(&actual, expected) {
        return Ok(());
    }
    Err(match contains_strict(&actual, expected) {
        Err(mismatch) => mismatch.to_string(),
        Ok(()) => "live object does not contain the expected content".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ResourceScope;
    use crate::fixtures::InlineFixtures;
    use crate::memory::{MemoryClient, Verb};
    use crate::sleeper::RecordingSleeper;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::time::Duration;

    fn cm() -> ResourceRef {
        ResourceRef::new("v1", "ConfigMap")
    }

    fn fixtures() -> InlineFixtures {
        InlineFixtures::new()
            .with(
                "v1",
                "ConfigMap",
                "demo",
                json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "demo"}, "data": {"a": "1"}}),
            )
            .with("v1", "ConfigMap", "demo-patch", json!({"data": {"b": "2"}}))
            .with(
                "v1",
                "ConfigMap",
                "demo-replace",
                json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "demo"}, "data": {"c": "3"}}),
            )
            .with("v1", "ConfigMap", "demo-expect-patched", json!({"data": {"a": "1", "b": "2"}}))
    }

    fn context(admin: &MemoryClient) -> StepContext {
        StepContext::new(Arc::new(admin.clone()), Arc::new(fixtures()))
            .sleeper(Arc::new(RecordingSleeper::new()))
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(
            "try to delete".parse::<Action>().unwrap(),
            Action {
                kind: ActionKind::Delete,
                tolerant: true
            }
        );
        assert_eq!("get".parse::<Action>().unwrap().kind, ActionKind::Get);
        assert_matches!(
            "frobnicate".parse::<Action>(),
            Err(ScenarioError::UnknownAction(verb)) if verb == "frobnicate"
        );
        assert_eq!("try to create".parse::<Action>().unwrap().to_string(), "try to create");
    }

    #[tokio::test]
    async fn test_create_then_exists() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);

        ctx.ensure_absent(&cm(), "demo", "team").await.unwrap();
        ctx.create(&cm(), "demo", "team").await.unwrap();

        assert_eq!(ctx.instance().and_then(Instance::name), Some("demo"));
        ctx.assert_present(&cm(), "demo", "team").await.unwrap();
        ctx.assert_matches_definition(&cm(), "demo", "team", "demo")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_try_create_records_conflict() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);
        ctx.ensure_present(&cm(), "demo", "team").await.unwrap();

        ctx.try_create(&cm(), "demo", "team").await.unwrap();

        assert!(ctx.instance().is_none());
        ctx.assert_throws("ConflictError").unwrap();
        assert_matches!(
            ctx.assert_throws("NotFoundError"),
            Err(ScenarioError::WrongError {
                expected: ErrorKind::NotFound,
                ..
            })
        );
    }

    #[tokio::test]
    async fn test_strict_create_fails_step() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);
        ctx.ensure_present(&cm(), "demo", "team").await.unwrap();

        let err = ctx.create(&cm(), "demo", "team").await.unwrap_err();

        assert_matches!(err, ScenarioError::Api(ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_assert_throws_without_error() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);
        ctx.try_create(&cm(), "demo", "team").await.unwrap();

        assert_matches!(
            ctx.assert_throws("Conflict"),
            Err(ScenarioError::NoErrorCaptured { .. })
        );
        assert_matches!(ctx.assert_throws("Teapot"), Err(ScenarioError::UnknownErrorKind(_)));
    }

    #[tokio::test]
    async fn test_dynamic_api_error_matches_any_status() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);
        ctx.ensure_present(&cm(), "demo", "team").await.unwrap();

        ctx.try_create(&cm(), "demo", "team").await.unwrap();
        ctx.assert_throws("DynamicApiError").unwrap();
        ctx.assert_throws("ConflictError").unwrap();

        admin.fail_next(&cm(), Verb::Get, ApiError::from_status(503, "etcd unavailable", None));
        ctx.perform("try to get", &cm(), "demo", "team").await.unwrap();
        ctx.assert_throws("ServiceUnavailableError").unwrap();
        ctx.assert_throws("DynamicApiError").unwrap();
    }

    #[tokio::test]
    async fn test_dynamic_api_error_ignores_client_side_failures() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);
        admin.fail_next(&cm(), Verb::Get, ApiError::Transport("connection reset".into()));

        ctx.perform("try to get", &cm(), "demo", "team").await.unwrap();

        assert_matches!(
            ctx.assert_throws("DynamicApiError"),
            Err(ScenarioError::WrongError {
                expected: ErrorKind::Api,
                ..
            })
        );
    }

    #[tokio::test]
    async fn test_success_clears_previous_error() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);
        ctx.perform("try to get", &cm(), "demo", "team").await.unwrap();
        assert!(ctx.error().is_some());

        ctx.create(&cm(), "demo", "team").await.unwrap();

        assert!(ctx.error().is_none());
    }

    #[tokio::test]
    async fn test_patch_and_match() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);
        ctx.ensure_present(&cm(), "demo", "team").await.unwrap();

        ctx.patch(&cm(), "demo", "team", "demo-patch").await.unwrap();

        ctx.assert_matches_definition(&cm(), "demo", "team", "demo-expect-patched")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_try_patch_missing_records_not_found() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);

        ctx.try_patch(&cm(), "demo", "team", "demo-patch").await.unwrap();

        ctx.assert_throws("NotFoundError").unwrap();
    }

    #[tokio::test]
    async fn test_replace_drops_unlisted_fields() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);
        ctx.ensure_present(&cm(), "demo", "team").await.unwrap();

        ctx.replace(&cm(), "team", "demo-replace").await.unwrap();

        let live = admin.object(&cm(), Some("team"), "demo").unwrap();
        assert_eq!(live["data"], json!({"c": "3"}));
        assert!(ctx
            .assert_matches_definition(&cm(), "demo", "team", "demo")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_try_replace_records_forbidden() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);
        ctx.ensure_present(&cm(), "demo", "team").await.unwrap();
        admin.fail_next(&cm(), Verb::Replace, ApiError::Forbidden("read only".into()));

        ctx.try_replace(&cm(), "team", "demo-replace").await.unwrap();

        ctx.assert_throws("ForbiddenError").unwrap();
    }

    #[tokio::test]
    async fn test_perform_delete_then_absent() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);
        ctx.ensure_present(&cm(), "demo", "team").await.unwrap();

        ctx.perform("delete", &cm(), "demo", "team").await.unwrap();

        assert_eq!(ctx.instance().and_then(Instance::name), Some("demo"));
        ctx.assert_absent(&cm(), "demo", "team").await.unwrap();
    }

    #[tokio::test]
    async fn test_perform_strict_failure_records_and_fails() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);

        let err = ctx.perform("get", &cm(), "demo", "team").await.unwrap_err();

        assert_matches!(err, ScenarioError::Api(ApiError::NotFound(_)));
        assert_eq!(ctx.error().map(ApiError::kind), Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_perform_unknown_action() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);

        let err = ctx.perform("try to scale", &cm(), "demo", "team").await.unwrap_err();

        assert_matches!(err, ScenarioError::UnknownAction(_));
    }

    #[tokio::test]
    async fn test_assert_absent_fails_for_existing() {
        let admin = MemoryClient::with_core_types();
        let ctx = context(&admin);
        ctx.ensure_present(&cm(), "demo", "team").await.unwrap();

        assert_matches!(
            ctx.assert_absent(&cm(), "demo", "team").await,
            Err(ScenarioError::AssertionFailed(_))
        );
    }

    #[tokio::test]
    async fn test_assert_present_checks_namespace() {
        let admin = MemoryClient::with_core_types();
        let ctx = context(&admin);
        ctx.ensure_present(&cm(), "demo", "team").await.unwrap();

        assert_matches!(
            ctx.assert_present(&cm(), "demo", "other").await,
            Err(ScenarioError::Api(ApiError::NotFound(_)))
        );
    }

    #[tokio::test]
    async fn test_mismatch_message_names_path() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);
        ctx.ensure_present(&cm(), "demo", "team").await.unwrap();
        ctx.replace(&cm(), "team", "demo-replace").await.unwrap();

        let err = ctx
            .assert_matches_definition(&cm(), "demo", "team", "demo")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("$.data.a"), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_matches_after_update() {
        let admin = MemoryClient::with_core_types();
        let ctx = context(&admin).config(
            SuiteConfig::default()
                .match_timeout(Duration::from_secs(5))
                .match_interval(Duration::from_millis(100)),
        );
        ctx.ensure_present(&cm(), "demo", "team").await.unwrap();

        let writer = admin.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            let handle = writer.resource(&cm()).await.unwrap();
            handle
                .patch(&json!({"data": {"b": "2"}}), "demo", Some("team"))
                .await
                .unwrap();
        });

        let live = ctx
            .assert_eventually_matches(&cm(), "demo", "team", "demo-expect-patched")
            .await
            .unwrap();
        assert_eq!(live.to_value()["data"]["b"], "2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_matches_times_out() {
        let admin = MemoryClient::with_core_types();
        let ctx = context(&admin).config(
            SuiteConfig::default()
                .match_timeout(Duration::from_millis(300))
                .match_interval(Duration::from_millis(100)),
        );
        ctx.ensure_present(&cm(), "demo", "team").await.unwrap();

        let err = ctx
            .assert_eventually_matches(&cm(), "demo", "team", "demo-expect-patched")
            .await
            .unwrap_err();

        assert_matches!(err, ScenarioError::Condition(ConditionError::EventuallyFailed { .. }));
    }

    #[tokio::test]
    async fn test_missing_definition() {
        let admin = MemoryClient::with_core_types();
        let mut ctx = context(&admin);

        let err = ctx.create(&cm(), "unknown", "team").await.unwrap_err();

        assert_matches!(err, ScenarioError::Fixture(FixtureError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_grant_permissions_switches_client() {
        let widget = ResourceRef::new("example.com/v1", "Widget");
        let admin = MemoryClient::with_core_types().register_token_review([("tok", "dev")]);
        let user = MemoryClient::new().register(widget.clone(), ResourceScope::Namespaced);
        let mut ctx = StepContext::new(
            Arc::new(admin.clone()),
            Arc::new(InlineFixtures::new().with(
                "example.com/v1",
                "Widget",
                "w",
                json!({"apiVersion": "example.com/v1", "kind": "Widget", "metadata": {"name": "w"}}),
            )),
        );
        let creds = UserCredentials {
            client: Arc::new(user.clone()),
            token: "tok".into(),
        };

        ctx.grant_permissions(&creds, "edit", "team").await.unwrap();
        ctx.create(&widget, "w", "team").await.unwrap();

        assert_eq!(user.count(&widget), 1);
        assert!(admin
            .object(
                &ResourceRef::new("rbac.authorization.k8s.io/v1", "RoleBinding"),
                Some("team"),
                "dev-edit"
            )
            .is_some());
    }

    #[tokio::test]
    async fn test_ensure_present_retries_through_sleeper() {
        let admin = MemoryClient::with_core_types();
        let sleeper = RecordingSleeper::new();
        let ctx = StepContext::new(Arc::new(admin.clone()), Arc::new(fixtures()))
            .sleeper(Arc::new(sleeper.clone()));
        admin.fail_next(&cm(), Verb::Create, ApiError::Transport("reset".into()));

        ctx.ensure_present(&cm(), "demo", "team").await.unwrap();

        assert_eq!(sleeper.calls(), vec![Duration::from_secs(3)]);
    }
}
