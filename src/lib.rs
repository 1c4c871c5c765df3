//! kubestep - behaviour-driven steps for dynamic Kubernetes clients
//!
//! kubestep provides the step operations behind scenarios such as
//!
//! ```text
//! Given v1.ConfigMap demo exists in team
//! When I try to create v1.ConfigMap demo in team
//! Then It throws a ConflictError
//! ```
//!
//! for any resource type, described by YAML definitions and driven through a
//! schema-less client. The core pieces can also be used on their own:
//!
//! - [`reconcile::ensure_resource`]: idempotent create with one bounded retry
//! - [`replace::replace`] / [`replace::try_replace`]: read-modify-write with
//!   resource version tracking
//! - [`matcher::object_contains`]: recursive subset matching
//!
//! Steps run against a live cluster through [`kube_client::KubeClient`] or
//! against the in-process [`memory::MemoryClient`].
//!
//! # Example
//!
//! ```no_run
//! use kubestep::fixtures::DefinitionDir;
//! use kubestep::kube_client::KubeClient;
//! use kubestep::scenario::StepContext;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     kubestep::telemetry::init_logging();
//!
//!     let admin = Arc::new(KubeClient::try_default().await?);
//!     let mut ctx = StepContext::new(admin, Arc::new(DefinitionDir::new("tests/definitions")));
//!     let cm = "v1.ConfigMap".parse()?;
//!
//!     ctx.ensure_present(&cm, "demo", "default").await?;
//!     ctx.try_create(&cm, "demo", "default").await?;
//!     ctx.assert_throws("ConflictError")?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::missing_errors_doc)]

pub mod client;
pub mod config;
pub mod error;
pub mod eventually;
pub mod fixtures;
pub mod kube_client;
pub mod matcher;
pub mod memory;
pub mod permissions;
pub mod reconcile;
pub mod replace;
pub mod scenario;
pub mod sleeper;
pub mod telemetry;

// Re-export commonly used types
pub use client::{Instance, ResourceClient, ResourceHandle, ResourceRef, ResourceScope};
pub use config::{RetryPolicy, SuiteConfig};
pub use error::{ApiError, ErrorKind};
pub use eventually::{eventually, ConditionError};
pub use fixtures::{DefinitionDir, FixtureError, FixtureResolver};
pub use matcher::{contains_strict, object_contains, Mismatch};
pub use reconcile::ensure_resource;
pub use replace::{replace, try_replace, Attempt};
pub use scenario::{ScenarioError, StepContext};
